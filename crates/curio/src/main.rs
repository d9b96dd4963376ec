//! Curio launcher

use anyhow::Result;
use clap::Parser;
use curio::cli::{self, Cli};
use curio_logging::{init_logging, LogConfig};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogConfig {
        app_name: "curio",
        verbose: cli.verbose,
    })?;
    cli::run(cli)
}
