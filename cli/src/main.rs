use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd {
    pub mod gen_config;
    pub mod run;
}

mod node;

fn main() -> ExitCode {
    match App::parse().run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

/// Kademlia DHT node
#[derive(Parser)]
#[clap(name = "kadnode")]
#[clap(version)]
#[clap(subcommand_required = true, arg_required_else_help = true)]
struct App {
    #[clap(subcommand)]
    cmd: Cmd,
}

impl App {
    fn run(self) -> Result<()> {
        match self.cmd {
            Cmd::Run(cmd) => cmd.run(),
            Cmd::GenConfig(cmd) => cmd.run(),
        }
    }
}

#[derive(Subcommand)]
enum Cmd {
    Run(cmd::run::CmdRun),
    GenConfig(cmd::gen_config::CmdGenConfig),
}
