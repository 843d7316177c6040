//! Structured trace records for everything that happens in a fight.
//!
//! Every roll and every state change is reported as a [`TraceEvent`] to a
//! [`TraceSink`]. The sink is write-only: nothing it does can change a
//! result. Presentation (log lines, banners, JSON) lives entirely in sinks.

use crate::character::{Side, Team};
use crate::conditions::{Condition, Duration};
use crate::dice::{Advantage, DiceSpec, Dice, RollResult};
use crate::resources::TurnResources;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Which kind of rest was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestKind {
    Short,
    Long,
}

impl fmt::Display for RestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestKind::Short => write!(f, "short rest"),
            RestKind::Long => write!(f, "long rest"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    DiceRolled {
        actor: String,
        purpose: String,
        roll: RollResult,
    },
    HpChanged {
        actor: String,
        delta: i32,
        hp: i32,
        max_hp: i32,
        temp_hp: i32,
    },
    DamageTaken {
        actor: String,
        amount: i32,
        critical: bool,
    },
    ConditionGained {
        actor: String,
        condition: Condition,
        duration: Duration,
    },
    ConditionExtended {
        actor: String,
        condition: Condition,
        added: Duration,
    },
    ConditionRefused {
        actor: String,
        condition: Condition,
    },
    ConditionLost {
        actor: String,
        condition: Condition,
    },
    DeathSave {
        actor: String,
        roll: Option<i32>,
        successes: u8,
        failures: u8,
    },
    ResourceChanged {
        actor: String,
        resource: String,
        value: f64,
    },
    AttackRolled {
        actor: String,
        target: String,
        attack: String,
        advantage: Advantage,
        natural: u32,
        total: i32,
        hit: bool,
        critical: bool,
    },
    SpellCast {
        actor: String,
        spell: String,
        slot: Option<u8>,
    },
    ActionResolved {
        actor: String,
        action: String,
        outcomes: BTreeMap<String, String>,
    },
    ActionFizzled {
        actor: String,
        action: String,
        reason: String,
    },
    TargetRejected {
        actor: String,
        action: String,
        target: String,
        reason: String,
    },
    Rested {
        actor: String,
        kind: RestKind,
        applied: bool,
    },
    TurnStarted {
        actor: String,
        team: Team,
        resources: TurnResources,
    },
    TurnEnded {
        actor: String,
    },
    RoundStarted {
        round: u32,
    },
    CharacterDied {
        actor: String,
    },
    EncounterEnded {
        rounds: u32,
        winner: Option<Side>,
    },
}

/// Receiver for trace records.
pub trait TraceSink {
    fn record(&mut self, event: &TraceEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TraceSink for NullSink {
    fn record(&mut self, _event: &TraceEvent) {}
}

/// Forwards records to the `tracing` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn record(&mut self, event: &TraceEvent) {
        match event {
            TraceEvent::DiceRolled {
                actor,
                purpose,
                roll,
            } => {
                tracing::trace!(actor = %actor, purpose = %purpose, roll = %roll, "dice rolled");
            }
            TraceEvent::HpChanged {
                actor,
                delta,
                hp,
                max_hp,
                temp_hp,
            } => {
                tracing::debug!(actor = %actor, delta, hp, max_hp, temp_hp, "hp changed");
            }
            TraceEvent::DamageTaken {
                actor,
                amount,
                critical,
            } => {
                tracing::debug!(actor = %actor, amount, critical, "damage taken");
            }
            TraceEvent::ConditionGained {
                actor,
                condition,
                duration,
            } => {
                tracing::debug!(actor = %actor, condition = %condition, duration = %duration, "condition gained");
            }
            TraceEvent::ConditionExtended {
                actor,
                condition,
                added,
            } => {
                tracing::debug!(actor = %actor, condition = %condition, added = %added, "condition extended");
            }
            TraceEvent::ConditionRefused { actor, condition } => {
                tracing::debug!(actor = %actor, condition = %condition, "condition refused by immunity");
            }
            TraceEvent::ConditionLost { actor, condition } => {
                tracing::debug!(actor = %actor, condition = %condition, "condition lost");
            }
            TraceEvent::DeathSave {
                actor,
                roll,
                successes,
                failures,
            } => {
                tracing::info!(actor = %actor, roll = ?roll, successes, failures, "death save");
            }
            TraceEvent::ResourceChanged {
                actor,
                resource,
                value,
            } => {
                tracing::debug!(actor = %actor, resource = %resource, value, "resource changed");
            }
            TraceEvent::AttackRolled {
                actor,
                target,
                attack,
                advantage,
                natural,
                total,
                hit,
                critical,
            } => {
                tracing::debug!(
                    actor = %actor,
                    target = %target,
                    attack = %attack,
                    advantage = ?advantage,
                    natural,
                    total,
                    hit,
                    critical,
                    "attack rolled"
                );
            }
            TraceEvent::SpellCast { actor, spell, slot } => {
                tracing::debug!(actor = %actor, spell = %spell, slot = ?slot, "spell cast");
            }
            TraceEvent::ActionResolved {
                actor,
                action,
                outcomes,
            } => {
                tracing::info!(actor = %actor, action = %action, outcomes = ?outcomes, "action resolved");
            }
            TraceEvent::ActionFizzled {
                actor,
                action,
                reason,
            } => {
                tracing::debug!(actor = %actor, action = %action, reason = %reason, "action had no effect");
            }
            TraceEvent::TargetRejected {
                actor,
                action,
                target,
                reason,
            } => {
                tracing::debug!(actor = %actor, action = %action, target = %target, reason = %reason, "target rejected");
            }
            TraceEvent::Rested {
                actor,
                kind,
                applied,
            } => {
                tracing::debug!(actor = %actor, kind = %kind, applied, "rest");
            }
            TraceEvent::TurnStarted {
                actor,
                team,
                resources,
            } => {
                tracing::debug!(actor = %actor, team = %team, resources = ?resources, "turn started");
            }
            TraceEvent::TurnEnded { actor } => {
                tracing::debug!(actor = %actor, "turn ended");
            }
            TraceEvent::RoundStarted { round } => {
                tracing::info!(round, "round started");
            }
            TraceEvent::CharacterDied { actor } => {
                tracing::info!(actor = %actor, "character died");
            }
            TraceEvent::EncounterEnded { rounds, winner } => {
                tracing::info!(rounds, winner = ?winner, "encounter ended");
            }
        }
    }
}

// ============================================================================
// Referee
// ============================================================================

/// Dice plus a trace sink: the one handle every rolling or mutating call
/// receives.
///
/// With [`Referee::recording`] every event is also kept in an in-memory
/// journal, which is how tests inspect what happened.
pub struct Referee {
    dice: Dice,
    sink: Box<dyn TraceSink>,
    journal: Option<Vec<TraceEvent>>,
}

impl Referee {
    pub fn new(dice: Dice) -> Self {
        Self {
            dice,
            sink: Box::new(TracingSink),
            journal: None,
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(Dice::seeded(seed))
    }

    pub fn from_entropy() -> Self {
        Self::new(Dice::from_entropy())
    }

    /// A recording referee over pre-chosen faces.
    pub fn scripted(faces: impl IntoIterator<Item = u32>) -> Self {
        Self::new(Dice::scripted(faces)).recording()
    }

    pub fn with_sink(mut self, sink: impl TraceSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn recording(mut self) -> Self {
        self.journal.get_or_insert_with(Vec::new);
        self
    }

    pub fn record(&mut self, event: TraceEvent) {
        self.sink.record(&event);
        if let Some(journal) = &mut self.journal {
            journal.push(event);
        }
    }

    /// Recorded events, empty unless recording.
    pub fn journal(&self) -> &[TraceEvent] {
        self.journal.as_deref().unwrap_or(&[])
    }

    pub fn take_journal(&mut self) -> Vec<TraceEvent> {
        self.journal.as_mut().map(std::mem::take).unwrap_or_default()
    }

    pub fn d20(&mut self, advantage: Advantage, actor: &str, purpose: &str) -> i32 {
        let roll = self.dice.roll_d20(advantage);
        let total = roll.total;
        self.rolled(actor, purpose, roll);
        total
    }

    /// Like [`Referee::d20`], returning the full roll.
    pub fn d20_roll(&mut self, advantage: Advantage, actor: &str, purpose: &str) -> RollResult {
        let roll = self.dice.roll_d20(advantage);
        self.rolled(actor, purpose, roll.clone());
        roll
    }

    pub fn roll(&mut self, faces: u32, count: u32, actor: &str, purpose: &str) -> i32 {
        let roll = self.dice.roll_die(faces, count);
        let total = roll.total;
        self.rolled(actor, purpose, roll);
        total
    }

    pub fn roll_spec(&mut self, spec: &DiceSpec, actor: &str, purpose: &str) -> i32 {
        let roll = self.dice.roll_spec(spec);
        let total = roll.total;
        self.rolled(actor, purpose, roll);
        total
    }

    /// Uniform index into `len` items, drawn from the same source as every
    /// roll.
    pub fn pick(&mut self, len: usize) -> Option<usize> {
        self.dice.pick(len)
    }

    fn rolled(&mut self, actor: &str, purpose: &str, roll: RollResult) {
        self.record(TraceEvent::DiceRolled {
            actor: actor.to_string(),
            purpose: purpose.to_string(),
            roll,
        });
    }
}

impl fmt::Debug for Referee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Referee")
            .field("dice", &self.dice)
            .field("recording", &self.journal.is_some())
            .finish()
    }
}
