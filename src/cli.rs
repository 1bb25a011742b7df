use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "swarm")]
#[command(about = "Swarm orchestrator - multi-agent turn, dispatch and lifecycle core")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file (default: .swarm/orchestrator.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a scripted demo swarm end-to-end and print the transcript
    Demo {
        /// Goal the demo swarm collaborates on
        #[arg(long, default_value = "Ship the quarterly report")]
        goal: String,
    },

    /// Run the scripted demo and show the conversation's budget status
    Status {
        /// Goal the demo swarm collaborates on
        #[arg(long, default_value = "Ship the quarterly report")]
        goal: String,
    },
}
