//! Turn-based tabletop combat simulation.
//!
//! This crate provides:
//! - 5e-style combat mechanics: dice, stat blocks, resources, conditions
//! - a rules engine that resolves one character's action at a time
//! - an encounter loop that runs a whole fight with biased random choices
//! - a structured trace of everything that happened
//!
//! # Quick Start
//!
//! ```no_run
//! use skirmish_core::{Encounter, EncounterConfig, EncounterFile};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let file = EncounterFile::from_path("goblin_ambush.json")?;
//!     let config = EncounterConfig::new().with_seed(42);
//!
//!     let mut encounter = Encounter::from_config(&config)?;
//!     encounter.add_file(&file)?;
//!
//!     let summary = encounter.simulate_to_end()?;
//!     println!("{} rounds, winner: {:?}", summary.rounds, summary.winner);
//!     Ok(())
//! }
//! ```

pub mod attacks;
pub mod character;
pub mod conditions;
pub mod config;
pub mod dice;
pub mod encounter;
pub mod resources;
pub mod rules;
pub mod spells;
pub mod stats;
pub mod tables;
pub mod testing;
pub mod trace;

// Primary public API
pub use character::{Bias, Character, CharacterId, LifeState, Side, StatRoll, Team};
pub use conditions::{Condition, Duration, TimeUnit};
pub use config::{CharacterTemplate, EncounterConfig, EncounterFile};
pub use dice::{Advantage, Dice, DiceSpec};
pub use encounter::{Encounter, EncounterError, EncounterSummary};
pub use resources::{ActionCost, ResourceDelta, ResourceError, TurnResources};
pub use rules::{ActionArgs, ActionError, Outcomes, Resolution, Roster, RulesEngine};
pub use stats::{Ability, CharacterClass, DamageType, StatBlock};
pub use tables::{TableError, Tables};
pub use testing::TestHarness;
pub use trace::{NullSink, Referee, TraceEvent, TraceSink, TracingSink};
