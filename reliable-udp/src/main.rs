//! Entry point for `reliable-udp`.
//!
//! `listen` waits for one peer and sends it a message or a file; `connect`
//! opens a connection, reads until the peer closes and writes what arrived
//! to stdout or a file.  Set `RUST_LOG` to see the protocol at work.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tokio::io::AsyncWriteExt;

use reliable_udp::{Config, Connection};

/// TCP-like reliable byte stream over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Wait for a peer, send it the payload, then close.
    Listen {
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
        /// Text to send.
        #[arg(short, long, conflicts_with = "file")]
        message: Option<String>,
        /// File whose contents to send.
        #[arg(short, long)]
        file: Option<PathBuf>,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Connect to a listening peer and read until it closes.
    Connect {
        /// Remote address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        peer: SocketAddr,
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
        /// Write received bytes here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        tuning: Tuning,
    },
}

#[derive(Args)]
struct Tuning {
    /// Segments allowed in flight.
    #[arg(short, long, default_value_t = reliable_udp::config::DEFAULT_WINDOW_SIZE)]
    window: usize,
    /// Base time unit for every protocol deadline, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    time_unit_ms: u64,
}

impl Tuning {
    fn config(&self) -> Config {
        Config::default()
            .with_window_size(self.window)
            .with_time_unit(Duration::from_millis(self.time_unit_ms))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    match Cli::parse().mode {
        Mode::Listen {
            bind,
            message,
            file,
            tuning,
        } => {
            let payload = match (message, file) {
                (Some(text), _) => text.into_bytes(),
                (None, Some(path)) => tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?,
                (None, None) => bail!("nothing to send: pass --message or --file"),
            };

            let mut conn = Connection::bind(bind, tuning.config())
                .await
                .with_context(|| format!("binding {bind}"))?;
            conn.listen()?;
            let peer = conn.accept().await.context("waiting for a peer")?;
            log::info!("Sending {} byte(s) to {peer}", payload.len());
            conn.send(&payload).await.context("sending")?;
            conn.close().await?;
        }
        Mode::Connect {
            peer,
            bind,
            output,
            tuning,
        } => {
            let mut conn = Connection::bind(bind, tuning.config())
                .await
                .with_context(|| format!("binding {bind}"))?;
            conn.connect(peer)
                .await
                .with_context(|| format!("connecting to {peer}"))?;
            let data = conn.read_to_end().await.context("receiving")?;
            conn.close().await?;

            log::info!("Received {} byte(s) from {peer}", data.len());
            match output {
                Some(path) => tokio::fs::write(&path, &data)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?,
                None => {
                    let mut stdout = tokio::io::stdout();
                    stdout.write_all(&data).await?;
                    stdout.flush().await?;
                }
            }
        }
    }
    Ok(())
}
