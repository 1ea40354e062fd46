//! MT-SICS Balance Console
//!
//! A standalone tool to check communication with a laboratory balance and run
//! a short weighing session.
//!
//! Usage:
//!   cargo run --example balance_console -- [OPTIONS] [PORT]
//!
//! Options:
//!   --port PORT       Serial port (default: first detected)
//!   --baud RATE       Baud rate (default: 9600)
//!   --timeout MS      Reply timeout in ms (default: 5000)
//!   --config FILE     Load settings from a JSON file
//!   --count N         Transfer-key readings to collect (default: 3)
//!   --window SECS     Give up collecting after this many seconds (default: 30)
//!   --list            List serial ports and exit
//!   --demo            Use the simulated balance instead of a port
//!
//! Set `RUST_LOG=mtsics_core=debug` to see every command and reply.

use anyhow::{bail, Context};
use mtsics_core::catalog::UnitChannel;
use mtsics_core::config::BalanceConfig;
use mtsics_core::protocol::{list_ports, Transport};
use mtsics_core::simulator::SimulatedBalance;
use mtsics_core::{Balance, StreamBounds};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut config = BalanceConfig::default();
    let mut count = 3usize;
    let mut window_secs = 30u64;
    let mut demo = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if i < args.len() {
                    config.serial.port_name = args[i].clone();
                }
            }
            "--baud" | "-b" => {
                i += 1;
                if i < args.len() {
                    config.serial.baud_rate = args[i].parse().unwrap_or(9600);
                }
            }
            "--timeout" | "-t" => {
                i += 1;
                if i < args.len() {
                    config.channel.timeout_ms = args[i].parse().unwrap_or(5000);
                }
            }
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    config = BalanceConfig::load(&args[i])
                        .with_context(|| format!("loading {}", args[i]))?;
                }
            }
            "--count" | "-n" => {
                i += 1;
                if i < args.len() {
                    count = args[i].parse().unwrap_or(3);
                }
            }
            "--window" | "-w" => {
                i += 1;
                if i < args.len() {
                    window_secs = args[i].parse().unwrap_or(30);
                }
            }
            "--list" | "-l" => {
                for port in list_ports() {
                    println!(
                        "{:<20} {}",
                        port.name,
                        port.product.as_deref().unwrap_or("-")
                    );
                }
                return Ok(());
            }
            "--demo" => {
                demo = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            arg if !arg.starts_with('-') => {
                config.serial.port_name = arg.to_string();
            }
            _ => {
                eprintln!("Unknown option: {}", args[i]);
            }
        }
        i += 1;
    }

    let window = Duration::from_secs(window_secs);

    if demo {
        println!("Using simulated balance");
        let sim = SimulatedBalance::new(42)
            .with_load(12.34)
            .with_noise(0.02)
            .with_frame_interval(Duration::from_millis(500));
        let mut balance = Balance::new(sim, config.channel.clone())?;
        return session(&mut balance, count, window);
    }

    if config.serial.port_name.is_empty() {
        match list_ports().into_iter().next() {
            Some(port) => config.serial.port_name = port.name,
            None => bail!("no serial ports found, pass --port or use --demo"),
        }
    }

    println!("Configuration:");
    println!("  Port:       {}", config.serial.port_name);
    println!("  Baud rate:  {}", config.serial.baud_rate);
    println!("  Timeout:    {}ms", config.channel.timeout_ms);
    println!();

    let mut balance = Balance::connect(&config)
        .with_context(|| format!("opening {}", config.serial.port_name))?;
    session(&mut balance, count, window)
}

fn session<T: Transport>(
    balance: &mut Balance<T>,
    count: usize,
    window: Duration,
) -> anyhow::Result<()> {
    let token = balance.cancel_token();
    cancel_on_enter(token);

    let status = balance.power_on()?;
    println!("Power on:       {:?}", status);

    let unit = balance.unit(UnitChannel::Host)?;
    println!("Host unit:      {}", unit);

    match balance.door_status() {
        Ok(doors) => println!("Draft shield:   {:?}", doors),
        Err(e) => println!("Draft shield:   not available ({})", e),
    }

    let start = Instant::now();
    let weight = balance.weight()?;
    println!(
        "Stable weight:  {} ({}ms)",
        weight,
        start.elapsed().as_millis()
    );

    let (stability, weight) = balance.weight_immediately()?;
    println!("Immediate:      {} [{:?}]", weight, stability);

    balance.set_message("Press transfer key")?;
    println!();
    println!(
        "Collecting up to {} readings for {}s (press Enter to abort)...",
        count,
        window.as_secs()
    );
    let result = balance.stream(StreamBounds::new(Some(count), Some(window)));
    balance.channel_mut().reset_cancellation();
    balance.show_weight()?;

    let readings = result?;
    for (n, reading) in readings.iter().enumerate() {
        println!("  #{:<3} {}", n + 1, reading);
    }
    println!("Collected {} of {}", readings.len(), count);

    let counters = balance.channel().counters();
    println!(
        "Traffic: {} commands, {} bytes out, {} bytes in",
        counters.commands_sent, counters.tx_bytes, counters.rx_bytes
    );

    balance.close()?;
    Ok(())
}

/// Cancel the running session when a line is entered on stdin
fn cancel_on_enter(token: tokio_util::sync::CancellationToken) {
    std::thread::spawn(move || {
        let mut line = String::new();
        if let Ok(n) = std::io::stdin().read_line(&mut line) {
            if n > 0 {
                token.cancel();
            }
        }
    });
}

fn print_help() {
    println!("MT-SICS Balance Console");
    println!();
    println!("Usage: balance_console [OPTIONS] [PORT]");
    println!();
    println!("Options:");
    println!("  --port, -p PORT       Serial port (default: first detected)");
    println!("  --baud, -b RATE       Baud rate (default: 9600)");
    println!("  --timeout, -t MS      Reply timeout in ms (default: 5000)");
    println!("  --config, -c FILE     Load settings from a JSON file");
    println!("  --count, -n N         Transfer-key readings to collect (default: 3)");
    println!("  --window, -w SECS     Collection window in seconds (default: 30)");
    println!("  --list, -l            List serial ports and exit");
    println!("  --demo                Use the simulated balance");
    println!("  --help, -h            Show this help");
}
