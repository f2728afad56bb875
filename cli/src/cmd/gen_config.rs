use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::node::NodeConfig;

/// Generate a default node config
#[derive(clap::Parser)]
pub struct CmdGenConfig {
    /// Output file path (prints to stdout if not specified)
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Overwrite the existing file
    #[clap(short, long)]
    force: bool,
}

impl CmdGenConfig {
    pub fn run(self) -> Result<()> {
        let config = NodeConfig::default();

        match self.output {
            Some(path) => {
                if path.exists() && !self.force {
                    anyhow::bail!("config file already exists: {}", path.display());
                }
                config
                    .save_to_file(&path)
                    .with_context(|| format!("failed to write config to {}", path.display()))
            }
            None => {
                let output = serde_json::to_string_pretty(&config)?;
                println!("{output}");
                Ok(())
            }
        }
    }
}
