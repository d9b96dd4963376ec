//! CLI commands, a thin shell over the library API.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::curate::{self, CurateOptions, MapOptions};
use crate::rules::ruleset::RuleSet;

#[derive(Parser)]
#[command(name = "curio", about = "Curate scientific recordings into a canonical archive", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Mirror the full log stream to stderr
    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Apply a rule catalog to a prepared source tree
    Curate {
        /// Prepared source tree (sub-*/ses-*/<format>/*.json)
        source: PathBuf,
        /// Destination archive root
        destination: PathBuf,
        /// Rule catalog file
        #[arg(long, default_value = "curio-rules.yaml")]
        ruleset: PathBuf,
        /// Subject-id expression, e.g. "<PatientID>" (default: directory name)
        #[arg(long)]
        subject: Option<String>,
        /// Session-id expression (default: directory name)
        #[arg(long)]
        session: Option<String>,
        /// Classify and name without writing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Scan a source tree and append templates for unclassified recordings
    Map {
        /// Prepared source tree
        source: PathBuf,
        /// Rule catalog file to extend
        #[arg(long, default_value = "curio-rules.yaml")]
        ruleset: PathBuf,
        /// Where to write the extended catalog (defaults to the input file)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Run the catalog integrity sweep
    Check {
        /// Rule catalog file
        ruleset: PathBuf,
    },
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Curate {
            source,
            destination,
            ruleset,
            subject,
            session,
            dry_run,
        } => {
            let summary = curate::curate(&CurateOptions {
                source: &source,
                destination: &destination,
                ruleset: &ruleset,
                subject,
                session,
                dry_run,
            })
            .context("curation failed")?;
            println!(
                "archived {} recording(s), {} ignored, {} unclassified, {} failed",
                summary.archived, summary.ignored, summary.unclassified, summary.failed
            );
            if summary.failed > 0 || summary.unclassified > 0 {
                anyhow::bail!("some recordings were not archived");
            }
            Ok(())
        }
        Command::Map { source, ruleset, out } => {
            let out = out.unwrap_or_else(|| ruleset.clone());
            let summary = curate::map_tree(&MapOptions {
                source: &source,
                ruleset: &ruleset,
                out: &out,
            })
            .context("mapping failed")?;
            println!(
                "scanned {} recording(s): {} new template(s), {} ambiguous match(es)",
                summary.scanned, summary.new_templates, summary.ambiguous
            );
            Ok(())
        }
        Command::Check { ruleset } => {
            let rs = RuleSet::load(&ruleset).context("failed to load catalog")?;
            let counts = rs.count_runs();
            println!("{} run(s), {} unchecked", counts.total, counts.unchecked);
            let issues = rs.sanity_check();
            for issue in &issues {
                println!("warning: {}", issue);
            }
            if issues.is_empty() {
                println!("catalog is sane");
            }
            Ok(())
        }
    }
}
