//! Command-line runner for skirmish encounters.
//!
//! Loads an encounter file, fights it out and prints who is left standing:
//!
//! ```bash
//! cargo run -p skirmish -- encounters/goblin_ambush.json --seed 42
//! ```
//!
//! Set `RUST_LOG=skirmish_core=debug` to follow every roll and condition.

mod report;

use anyhow::{Context, Result};
use clap::Parser;
use skirmish_core::{Encounter, EncounterConfig, EncounterFile};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "skirmish", version, about = "Simulate a tabletop combat encounter")]
struct Args {
    /// Encounter file (JSON list of character templates)
    file: PathBuf,

    /// Seed for the dice; omit for a different fight every run
    #[arg(long)]
    seed: Option<u64>,

    /// Rounds before the fight is called a draw
    #[arg(long, default_value_t = skirmish_core::config::DEFAULT_MAX_ROUNDS)]
    max_rounds: u32,

    /// Directory holding actions.json, attacks.json and spells.json
    #[arg(long)]
    tables: Option<PathBuf>,

    /// Print the summary as JSON instead of text
    #[arg(long)]
    json_summary: bool,

    /// Write every trace event to this file, one JSON object per line
    #[arg(long)]
    journal: Option<PathBuf>,
}

impl Args {
    fn config(&self) -> EncounterConfig {
        let mut config = EncounterConfig::new()
            .with_max_rounds(self.max_rounds)
            .with_journal(self.journal.is_some());
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        if let Some(dir) = &self.tables {
            config = config.with_tables_dir(dir);
        }
        config
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skirmish=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let file = EncounterFile::from_path(&args.file)
        .with_context(|| format!("failed to load {}", args.file.display()))?;

    let mut encounter =
        Encounter::from_config(&args.config()).context("failed to set up the encounter")?;
    encounter
        .add_file(&file)
        .context("failed to add the encounter's characters")?;
    tracing::info!(
        encounter = file.name.as_deref().unwrap_or("unnamed"),
        characters = encounter.roster().len(),
        seed = ?args.seed,
        "starting encounter"
    );

    let summary = encounter.simulate_to_end().context("encounter failed")?;

    if let Some(path) = &args.journal {
        let events = encounter.referee_mut().take_journal();
        report::write_journal(path, &events)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    if args.json_summary {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", report::render(file.name.as_deref(), &encounter, &summary));
    }
    Ok(())
}
