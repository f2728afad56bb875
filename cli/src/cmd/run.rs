use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use kadnode_network::{Dht, UdpTransport};
use kadnode_util::cli::logger::init_logger;
use kadnode_util::futures::JoinTask;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::node::console::{self, Command};
use crate::node::{NodeConfig, bootstrap, http};

/// Run a DHT node with an interactive console.
#[derive(clap::Parser)]
pub struct CmdRun {
    /// IPv4 address of this node. The node identifier is derived from it.
    #[clap(long)]
    ip: Ipv4Addr,

    /// Address of a known peer to join through (can be repeated).
    #[clap(long = "join")]
    join: Vec<Ipv4Addr>,

    /// How long to keep retrying the bootstrap peers.
    #[clap(long, value_parser = humantime::parse_duration, default_value = "60s")]
    join_timeout: Duration,

    /// Path to the node config. Defaults are used when not specified.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Path to the logger targets.
    #[clap(long)]
    logger_config: Option<PathBuf>,
}

impl CmdRun {
    pub fn run(self) -> Result<()> {
        let node_config = match &self.config {
            Some(path) => NodeConfig::from_file(path)
                .with_context(|| format!("failed to load node config from {}", path.display()))?,
            None => NodeConfig::default(),
        };

        init_logger(&node_config.logger, self.logger_config.as_deref())?;

        let rt = node_config
            .threads
            .build_tokio_runtime()
            .context("failed to build tokio runtime")?;

        let res = rt.block_on(async move {
            tokio::select! {
                res = self.run_impl(node_config) => res,
                signal = tokio::signal::ctrl_c() => match signal {
                    Ok(()) => {
                        tracing::info!("received termination signal");
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
        });

        // Stdin is read on a blocking thread which never finishes on its own
        rt.shutdown_timeout(SHUTDOWN_TIMEOUT);
        res
    }

    async fn run_impl(self, node_config: NodeConfig) -> Result<()> {
        let dht = Dht::builder(self.ip)
            .with_config(node_config.dht)
            .bind(UdpTransport)
            .await?;

        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(
                format!(
                    "Started node with ID {}\nNode has IP address {}\n",
                    dht.local_id(),
                    self.ip
                )
                .as_bytes(),
            )
            .await?;

        if !bootstrap(&dht, &self.join, self.join_timeout).await {
            tracing::warn!("running without peers");
        }

        let _http_task = match node_config.http {
            Some(http_config) => {
                let listener = http::bind(&http_config).await?;
                let router = http::router(dht.clone());
                Some(JoinTask::new(async move {
                    if let Err(e) = axum::serve(listener, router).await {
                        tracing::error!("HTTP gateway failed: {e}");
                    }
                }))
            }
            None => None,
        };

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            stdout.write_all(b"\nEnter a command: ").await?;
            stdout.flush().await?;

            let Some(line) = lines.next_line().await? else {
                break;
            };

            let output = match line.parse::<Command>() {
                Ok(Command::Exit) => break,
                Ok(command) => console::execute(&dht, command).await,
                Err(e) => e.to_string(),
            };
            stdout.write_all(format!("{output}\n").as_bytes()).await?;
        }

        dht.shutdown();
        tracing::info!("node stopped");
        Ok(())
    }
}

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);
