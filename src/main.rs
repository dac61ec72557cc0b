use std::io::{self, BufRead};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};

use fsr_rs::fsr_client::{FsrClient, FsrClientConfig};
use fsr_rs::protocol::CHANNEL_NAMES;
use fsr_rs::types::{EventKind, FsrEvent};

fn load_config(path: &Path) -> Result<FsrClientConfig> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("cannot open config file {}", path.display()))?;
    let config: FsrClientConfig = serde_json::from_reader(io::BufReader::new(file))
        .with_context(|| format!("invalid config file {}", path.display()))?;
    Ok(config)
}

fn print_usage() {
    println!("usage: fsr-rs [--port <device>] [--config <file.json>] [--list]");
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ───────────────────────────────────────────────────────────────
    // Set RUST_LOG=debug for verbose output, e.g.:
    //   RUST_LOG=fsr_rs=debug cargo run
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // ── Configuration ─────────────────────────────────────────────────────────
    let mut config = FsrClientConfig::default();
    let mut port_override = None;
    let mut list_only = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--port" | "-p" => {
                port_override = Some(args.next().ok_or_else(|| anyhow!("--port needs a device name"))?);
            }
            "--config" | "-c" => {
                let path = args.next().ok_or_else(|| anyhow!("--config needs a file path"))?;
                config = load_config(Path::new(&path))?;
            }
            "--list" | "-l" => list_only = true,
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            other => {
                print_usage();
                return Err(anyhow!("unknown argument {other:?}"));
            }
        }
    }
    if port_override.is_some() {
        config.port_name = port_override;
    }

    let client = FsrClient::new(config);

    if list_only {
        let candidates = client.list_candidates();
        if candidates.is_empty() {
            println!("no matching serial devices");
        }
        for c in candidates {
            println!("{:<32} confidence {:.2}", c.name, c.confidence);
        }
        return Ok(());
    }

    // ── Start ─────────────────────────────────────────────────────────────────
    let handle = client.start()?;
    let mut events = handle.subscribe(&[
        EventKind::ActivationChanged,
        EventKind::ConnectionStatus,
        EventKind::Error,
        EventKind::HoldTriggered,
    ]);

    info!("Listening for force-sensor data. Type 'q' + Enter to quit.\n");
    info!("Commands (type + Enter):");
    info!("  q  – quit");
    info!("  s  – print all channels");
    info!("  r  – reset hold time on all channels");
    info!("  c  – connect (re-enables auto-reconnect)");
    info!("  d  – disconnect");
    info!("  <any other string> – send to the controller\n");

    // ── Stdin command loop ────────────────────────────────────────────────────
    // Lines are read on a dedicated OS thread and relayed to an async task.
    let (line_tx, mut line_rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if line_tx.send(l.trim().to_owned()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let handle_cmd = handle.clone();
    let commands = tokio::spawn(async move {
        while let Some(line) = line_rx.recv().await {
            if line.is_empty() {
                continue;
            }
            match line.as_str() {
                "q" => {
                    info!("Quit requested.");
                    break;
                }
                "s" => {
                    for ch in handle_cmd.get_all_channels() {
                        println!(
                            "{:5} raw={:6.1} smoothed={:.3} shaped={:.3} active={:5} hold={:7.2}",
                            CHANNEL_NAMES[ch.channel],
                            ch.raw,
                            ch.smoothed,
                            ch.shaped,
                            ch.active,
                            ch.hold_time
                        );
                    }
                }
                "r" => {
                    if let Err(e) = handle_cmd.reset_hold(None).await {
                        error!("Reset error: {e}");
                    }
                }
                "c" => {
                    if let Err(e) = handle_cmd.connect().await {
                        error!("Connect error: {e}");
                    }
                }
                "d" => {
                    if let Err(e) = handle_cmd.disconnect().await {
                        error!("Disconnect error: {e}");
                    }
                }
                cmd => {
                    info!("Sending command: '{cmd}'");
                    if let Err(e) = handle_cmd.send_command(cmd).await {
                        error!("Command error: {e}");
                    }
                }
            }
        }
    });

    // ── Main event loop ───────────────────────────────────────────────────────
    tokio::select! {
        _ = commands => {}
        _ = async {
            while let Some(event) = events.recv().await {
                match event {
                    FsrEvent::ConnectionStatus { state, device } => match device {
                        Some(name) => info!("Link {state}: {name}"),
                        None => info!("Link {state}"),
                    },
                    FsrEvent::ActivationChanged { channel, active } => {
                        println!(
                            "[{}] {}",
                            CHANNEL_NAMES[channel],
                            if active { "pressed" } else { "released" }
                        );
                    }
                    FsrEvent::HoldTriggered { channel, current_hold } => {
                        println!("[{}] held for {current_hold:.1} s", CHANNEL_NAMES[channel]);
                    }
                    FsrEvent::Error(e) if e.is_transport_fault() => error!("{e}"),
                    FsrEvent::Error(e) => warn!("{e}"),
                    _ => {}
                }
            }
        } => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted."),
    }

    handle.shutdown().await.ok();
    info!("Event loop finished – exiting.");
    Ok(())
}
