//! Plain-text rendering of a finished encounter.

use skirmish_core::{Encounter, EncounterSummary, LifeState, Side, TraceEvent};
use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// The end-of-fight report: result, time taken and everyone's state.
pub fn render(name: Option<&str>, encounter: &Encounter, summary: &EncounterSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== {} ===", name.unwrap_or("Encounter"));
    let result = match summary.winner {
        Some(Side::Good) => "the party wins",
        Some(Side::Bad) => "the enemies win",
        None => "draw",
    };
    let _ = writeln!(out, "Result: {result} after {} round(s)", summary.rounds);
    let _ = writeln!(out, "Estimated time: {}", clock(summary.estimated_seconds));
    let _ = writeln!(out);

    for character in encounter.roster().iter() {
        let state = match character.life_state() {
            LifeState::Stable => "",
            LifeState::Dying => " [dying]",
            LifeState::Stabilized => " [stabilized]",
            LifeState::Dead => " [dead]",
        };
        let _ = writeln!(
            out,
            "  {:<16} {:<6} HP {:>3}/{:<3}{state}",
            character.name, character.team, character.resources.hp, character.stats.max_hp
        );
    }
    out
}

fn clock(seconds: u64) -> String {
    match (seconds / 60, seconds % 60) {
        (0, s) => format!("{s}s"),
        (m, s) => format!("{m}m {s:02}s"),
    }
}

/// One JSON object per line.
pub fn write_journal(path: &Path, events: &[TraceEvent]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for event in events {
        serde_json::to_writer(&mut writer, event)?;
        writeln!(writer)?;
    }
    writer.flush()
}
