//! Entry point for `net-transport`.
//!
//! Runs either an echo/sink **server** or a one-shot **client**.  All
//! transport work lives in the library; `main.rs` owns only process setup
//! (logging, signal handling, argument parsing).

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use net_transport::{Client, ClientConfig, Protocol, ReplyHandler, Server, ServerConfig};
use tokio::sync::oneshot;

/// Send and receive discrete messages over UDP or TCP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Listen for messages and print them.
    Server {
        /// Transport to listen on (udp or tcp).
        #[arg(short, long, default_value = "udp")]
        protocol: Protocol,
        #[arg(long, default_value_t = 9000)]
        port: u16,
        /// Interface to bind.
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        /// Send every message back to its sender.
        #[arg(long)]
        echo: bool,
    },
    /// Send one message.
    Client {
        #[arg(short, long, default_value = "udp")]
        protocol: Protocol,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 9000)]
        port: u16,
        /// Wait for one reply and print it.
        #[arg(long)]
        wait_reply: bool,
        /// Reply timeout in milliseconds.
        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,
        message: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Server {
            protocol,
            port,
            bind,
            echo,
        } => {
            let config = ServerConfig::default().with_bind_host(bind);
            let server = Server::new(protocol, config, move |payload: &[u8]| {
                println!("{}", String::from_utf8_lossy(payload));
                Ok(echo.then(|| payload.to_vec()))
            });
            server.subscribe(|e| log::info!("[server] {e}"));
            server.open(port).await.context("opening server")?;
            log::info!("Serving {protocol} on port {port}; Ctrl-C to stop");

            tokio::signal::ctrl_c().await?;
            server.close().await;
        }
        Mode::Client {
            protocol,
            host,
            port,
            wait_reply,
            timeout_ms,
            message,
        } => {
            let limit = Duration::from_millis(timeout_ms);
            let config = ClientConfig::default().with_response_timeout(limit);
            let client = Client::new(protocol, config);
            client.subscribe(|e| log::info!("[client] {e}"));
            client.connect(&host, port).await?;
            if !client.wait_connected(limit).await {
                bail!("could not connect to {host}:{port} within {limit:?}");
            }

            if wait_reply {
                let (tx, rx) = oneshot::channel();
                let handler: ReplyHandler = Box::new(move |reply| {
                    let _ = tx.send(reply);
                });
                if !client.send(message.as_bytes(), Some(handler)).await {
                    bail!("send failed");
                }
                // The UDP reply arrives on a background task; allow it the
                // same window before giving up.
                match tokio::time::timeout(limit + Duration::from_millis(100), rx).await {
                    Ok(Ok(reply)) => println!("{}", String::from_utf8_lossy(&reply)),
                    _ => bail!("no reply within {limit:?}"),
                }
            } else if !client.send(message.as_bytes(), None).await {
                bail!("send failed");
            }

            client.disconnect().await;
        }
    }

    Ok(())
}
