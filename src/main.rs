//! # Murmur
//!
//! A gossip broadcast node speaking line-delimited JSON on stdin/stdout.
//! Logs go to stderr; stdout carries only protocol messages.

use clap::Parser;
use murmur_gossip::GossipConfigBuilder;
use murmur_node::{Node, NodeConfigBuilder, StdioTransport};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
#[cfg(unix)]
use tokio::signal::unix::SignalKind;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "murmur")]
#[command(about = "Gossip broadcast node (line-delimited JSON over stdio)")]
#[command(version)]
struct Cli {
    /// Node id to use before (or instead of) the init handshake
    #[arg(long)]
    node_id: Option<String>,

    /// Delay before the first resend of an unacknowledged value, in ms
    #[arg(long, default_value_t = 100)]
    retry_initial_ms: u64,

    /// Upper bound on the delay between resends, in ms
    #[arg(long, default_value_t = 1600)]
    retry_max_ms: u64,

    /// How often due resends are looked for, in ms
    #[arg(long, default_value_t = 25)]
    scan_interval_ms: u64,

    /// Capacity of the inbound and outbound message queues
    #[arg(long, default_value_t = 1024)]
    buffer: usize,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };
    let healthy = rt.block_on(async_main(cli));
    // The blocking stdin read cannot be cancelled; don't wait on it.
    rt.shutdown_timeout(Duration::from_millis(100));
    if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// SIGINT and, on unix, SIGTERM.
struct Signals {
    #[cfg(unix)]
    terminate: Option<tokio::signal::unix::Signal>,
}

impl Signals {
    /// Registers the SIGTERM handler immediately.
    fn install() -> Self {
        #[cfg(unix)]
        let terminate = match tokio::signal::unix::signal(SignalKind::terminate()) {
            Ok(signal) => Some(signal),
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler not installed");
                None
            }
        };
        Self {
            #[cfg(unix)]
            terminate,
        }
    }

    /// Waits for the first shutdown signal and returns its name.
    async fn recv(&mut self) -> &'static str {
        #[cfg(unix)]
        let terminate = async {
            match self.terminate.as_mut() {
                Some(signal) => {
                    signal.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = terminate => "SIGTERM",
        }
    }
}

/// Runs the node until its input ends or it is interrupted.
///
/// Returns false if the node task failed while not being interrupted.
async fn async_main(cli: Cli) -> bool {
    let gossip = GossipConfigBuilder::new()
        .retry_initial(cli.retry_initial_ms)
        .retry_max(cli.retry_max_ms)
        .scan_interval(cli.scan_interval_ms)
        .build();
    let mut config = NodeConfigBuilder::new().gossip(gossip);
    if let Some(id) = cli.node_id {
        config = config.node_id(id);
    }

    let mut signals = Signals::install();
    let (transport, inbound, tasks) = StdioTransport::spawn(cli.buffer);
    let node = Node::new(config.build(), Arc::new(transport));
    let running = tokio::spawn(node.clone().run(inbound));

    let healthy = tokio::select! {
        signal = signals.recv() => {
            tracing::info!(signal, "interrupted, shutting down");
            node.shutdown();
            true
        }
        result = running => match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "node task failed");
                false
            }
        },
    };

    // Input is done; nothing more will be read.
    tasks.reader.abort();
    // Replies queued before shutdown still get written out.
    drop(node);
    match timeout(Duration::from_secs(1), tasks.writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "writer task failed"),
        Err(_) => tracing::warn!("output not drained before exit"),
    }
    healthy
}
