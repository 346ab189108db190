//! Entry point for `osc-codec`.
//!
//! `send` encodes one OSC message from the command line and sends it;
//! `listen` opens a receiver and prints every decoded message.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use net_transport::{ClientConfig, Protocol, ServerConfig};
use osc_codec::{OscArg, OscMessage, OscReceiver, OscSender};

/// Send and receive Open Sound Control messages.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send one message.
    Send {
        #[arg(short, long, default_value = "udp")]
        protocol: Protocol,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 50001)]
        port: u16,
        /// OSC address, e.g. /synth/1/freq.
        address: String,
        /// Arguments: integers, floats, 0x-prefixed hex blobs, else strings.
        args: Vec<String>,
    },
    /// Print every message received on a port.
    Listen {
        #[arg(short, long, default_value = "udp")]
        protocol: Protocol,
        #[arg(long, default_value_t = 50000)]
        port: u16,
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
    },
}

/// Interpret one command-line token as the narrowest fitting OSC argument.
fn parse_arg(token: &str) -> OscArg {
    if let Ok(v) = token.parse::<i32>() {
        return OscArg::Int(v);
    }
    if let Ok(v) = token.parse::<i64>() {
        return OscArg::Long(v);
    }
    if let Ok(v) = token.parse::<f32>() {
        return OscArg::Float(v);
    }
    if let Some(hex) = token.strip_prefix("0x") {
        if let Some(blob) = parse_hex(hex) {
            return OscArg::Blob(blob);
        }
    }
    OscArg::String(token.to_string())
}

fn parse_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| hex.get(i..i + 2).and_then(|b| u8::from_str_radix(b, 16).ok()))
        .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Send {
            protocol,
            host,
            port,
            address,
            args,
        } => {
            let message = OscMessage::with_args(address, args.iter().map(|a| parse_arg(a)).collect());
            let sender = OscSender::new(protocol, ClientConfig::default());
            sender.subscribe(|e| log::info!("[sender] {e}"));
            sender.connect(&host, port).await?;
            if !sender.client().wait_connected(Duration::from_secs(2)).await {
                bail!("could not connect to {host}:{port}");
            }
            if !sender.send(&message).await {
                bail!("failed to send {message}");
            }
            log::info!("Sent {message} to {host}:{port} ({protocol})");
            sender.disconnect().await;
        }
        Mode::Listen {
            protocol,
            port,
            bind,
        } => {
            let config = ServerConfig::default().with_bind_host(bind);
            let (receiver, mut messages) = OscReceiver::bind(protocol, port, config)
                .await
                .context("opening receiver")?;
            receiver.subscribe(|e| log::info!("[receiver] {e}"));
            log::info!("Listening for OSC on port {port} ({protocol}); Ctrl-C to stop");

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    msg = messages.recv() => match msg {
                        Some(m) => println!("{m}"),
                        None => break,
                    },
                }
            }
            receiver.close().await;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_parse_to_narrowest_type() {
        assert_eq!(parse_arg("42"), OscArg::Int(42));
        assert_eq!(parse_arg("5000000000"), OscArg::Long(5_000_000_000));
        assert_eq!(parse_arg("1.5"), OscArg::Float(1.5));
        assert_eq!(parse_arg("0x0aff"), OscArg::Blob(vec![0x0A, 0xFF]));
        assert_eq!(parse_arg("hello"), OscArg::String("hello".into()));
        assert_eq!(parse_arg("0xZZ"), OscArg::String("0xZZ".into()));
    }
}
