//! Timed status effects.
//!
//! Each character owns a [`ConditionRegistry`]. Conditions carry their own
//! clock in their own unit; elapsed time is converted through
//! [`TimeUnit::seconds`]. Gaining or losing a condition runs its hook and
//! then walks the static [`CASCADES`] table, so `dying` drags in
//! `unconscious`, which drags in `prone` and `incapacitated`.

use crate::resources::ResourcePool;
use crate::trace::{Referee, TraceEvent};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DurationError {
    #[error("Duration must be '<amount> <unit>' or 'indefinite': {0}")]
    Malformed(String),
    #[error("Unknown time unit: {0}")]
    UnknownUnit(String),
    #[error("Duration amount is not a number: {0}")]
    NotANumber(String),
    #[error("Unknown condition: {0}")]
    UnknownCondition(String),
}

// ============================================================================
// Conditions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Blinded,
    Charmed,
    Deafened,
    Frightened,
    Grappled,
    Grappling,
    Incapacitated,
    Invisible,
    Paralyzed,
    Petrified,
    Poisoned,
    Prone,
    Restrained,
    Stunned,
    Unconscious,
    Dodge,
    Dying,
    Stabilized,
    #[serde(alias = "death")]
    Dead,
    Shillelagh,
    WildShape,
    BardicInspiration,
    Unstoppable,
}

impl Condition {
    pub fn name(&self) -> &'static str {
        match self {
            Condition::Blinded => "blinded",
            Condition::Charmed => "charmed",
            Condition::Deafened => "deafened",
            Condition::Frightened => "frightened",
            Condition::Grappled => "grappled",
            Condition::Grappling => "grappling",
            Condition::Incapacitated => "incapacitated",
            Condition::Invisible => "invisible",
            Condition::Paralyzed => "paralyzed",
            Condition::Petrified => "petrified",
            Condition::Poisoned => "poisoned",
            Condition::Prone => "prone",
            Condition::Restrained => "restrained",
            Condition::Stunned => "stunned",
            Condition::Unconscious => "unconscious",
            Condition::Dodge => "dodge",
            Condition::Dying => "dying",
            Condition::Stabilized => "stabilized",
            Condition::Dead => "dead",
            Condition::Shillelagh => "shillelagh",
            Condition::WildShape => "wild_shape",
            Condition::BardicInspiration => "bardic_inspiration",
            Condition::Unstoppable => "unstoppable",
        }
    }

    pub fn all() -> [Condition; 23] {
        [
            Condition::Blinded,
            Condition::Charmed,
            Condition::Deafened,
            Condition::Frightened,
            Condition::Grappled,
            Condition::Grappling,
            Condition::Incapacitated,
            Condition::Invisible,
            Condition::Paralyzed,
            Condition::Petrified,
            Condition::Poisoned,
            Condition::Prone,
            Condition::Restrained,
            Condition::Stunned,
            Condition::Unconscious,
            Condition::Dodge,
            Condition::Dying,
            Condition::Stabilized,
            Condition::Dead,
            Condition::Shillelagh,
            Condition::WildShape,
            Condition::BardicInspiration,
            Condition::Unstoppable,
        ]
    }

    /// Conditions that imply `incapacitated`.
    pub const INCAPACITATING: [Condition; 4] = [
        Condition::Paralyzed,
        Condition::Petrified,
        Condition::Stunned,
        Condition::Unconscious,
    ];

    pub fn is_incapacitating(&self) -> bool {
        Self::INCAPACITATING.contains(self)
    }

    /// Conditions the death state machine owns. Immunities never block them.
    pub fn is_death_state(&self) -> bool {
        matches!(self, Condition::Dying | Condition::Stabilized | Condition::Dead)
    }

    /// Conditions that pin speed to zero while held.
    pub fn locks_speed(&self) -> bool {
        matches!(self, Condition::Grappled | Condition::Restrained)
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Condition {
    type Err = DurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "death" {
            return Ok(Condition::Dead);
        }
        Condition::all()
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| DurationError::UnknownCondition(s.to_string()))
    }
}

// ============================================================================
// Durations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeUnit {
    #[serde(rename = "round")]
    Round,
    #[serde(rename = "second")]
    Second,
    #[serde(rename = "minute")]
    Minute,
    #[serde(rename = "hour")]
    Hour,
    #[serde(rename = "day")]
    Day,
    /// Until the start of the owner's next turn.
    #[serde(rename = "sont")]
    StartOfNextTurn,
    /// Until the end of the owner's next turn.
    #[serde(rename = "eont")]
    EndOfNextTurn,
}

impl TimeUnit {
    pub fn seconds(&self) -> f64 {
        match self {
            TimeUnit::Round => 6.0,
            TimeUnit::Second => 1.0,
            TimeUnit::Minute => 60.0,
            TimeUnit::Hour => 3600.0,
            TimeUnit::Day => 86400.0,
            TimeUnit::StartOfNextTurn | TimeUnit::EndOfNextTurn => 3.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TimeUnit::Round => "round",
            TimeUnit::Second => "second",
            TimeUnit::Minute => "minute",
            TimeUnit::Hour => "hour",
            TimeUnit::Day => "day",
            TimeUnit::StartOfNextTurn => "sont",
            TimeUnit::EndOfNextTurn => "eont",
        }
    }

    pub fn is_turn_bound(&self) -> bool {
        matches!(self, TimeUnit::StartOfNextTurn | TimeUnit::EndOfNextTurn)
    }

    fn is_coarse(&self) -> bool {
        matches!(self, TimeUnit::Minute | TimeUnit::Hour | TimeUnit::Day)
    }

    /// How much of `self` an `amount` of `other` is worth when decaying a
    /// clock. Turn-bound clocks only feel minutes, hours and days.
    fn decay_from(&self, amount: f64, other: TimeUnit) -> f64 {
        if *self == other {
            amount
        } else if self.is_turn_bound() {
            if other.is_coarse() {
                other.seconds() / self.seconds() * amount
            } else {
                0.0
            }
        } else {
            other.seconds() / self.seconds() * amount
        }
    }
}

impl FromStr for TimeUnit {
    type Err = DurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round" => Ok(TimeUnit::Round),
            "second" => Ok(TimeUnit::Second),
            "minute" => Ok(TimeUnit::Minute),
            "hour" => Ok(TimeUnit::Hour),
            "day" => Ok(TimeUnit::Day),
            "sont" => Ok(TimeUnit::StartOfNextTurn),
            "eont" => Ok(TimeUnit::EndOfNextTurn),
            _ => Err(DurationError::UnknownUnit(s.to_string())),
        }
    }
}

/// How long a condition lasts, written `"<amount> <unit>"` or
/// `"indefinite"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Duration {
    Indefinite,
    Timed { amount: f64, unit: TimeUnit },
}

impl Duration {
    pub fn new(amount: f64, unit: TimeUnit) -> Self {
        Duration::Timed { amount, unit }
    }

    pub fn rounds(n: u32) -> Self {
        Self::new(n as f64, TimeUnit::Round)
    }

    pub fn minutes(n: u32) -> Self {
        Self::new(n as f64, TimeUnit::Minute)
    }

    pub fn hours(n: u32) -> Self {
        Self::new(n as f64, TimeUnit::Hour)
    }

    pub fn start_of_next_turn() -> Self {
        Self::new(1.0, TimeUnit::StartOfNextTurn)
    }

    pub fn end_of_next_turn() -> Self {
        Self::new(1.0, TimeUnit::EndOfNextTurn)
    }

    pub fn parse(s: &str) -> Result<Self, DurationError> {
        let s = s.trim();
        if s == "indefinite" {
            return Ok(Duration::Indefinite);
        }
        let parts: Vec<&str> = s.split(' ').collect();
        let [amount, unit] = parts.as_slice() else {
            return Err(DurationError::Malformed(s.to_string()));
        };
        let unit: TimeUnit = unit.parse()?;
        if amount.is_empty() || !amount.chars().all(|c| c.is_ascii_digit()) {
            return Err(DurationError::NotANumber(amount.to_string()));
        }
        let amount: f64 = amount
            .parse()
            .map_err(|_| DurationError::NotANumber(amount.to_string()))?;
        Ok(Duration::Timed { amount, unit })
    }

    pub fn is_indefinite(&self) -> bool {
        matches!(self, Duration::Indefinite)
    }
}

impl FromStr for Duration {
    type Err = DurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Duration::parse(s)
    }
}

impl TryFrom<String> for Duration {
    type Error = DurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Duration::parse(&value)
    }
}

impl From<Duration> for String {
    fn from(duration: Duration) -> Self {
        duration.to_string()
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Duration::Indefinite => write!(f, "indefinite"),
            Duration::Timed { amount, unit } => {
                let amount = (amount * 100.0).round() / 100.0;
                write!(f, "{amount} {}", unit.name())
            }
        }
    }
}

// ============================================================================
// Active Conditions
// ============================================================================

/// Unit conversions go through float division; anything this close to zero
/// has run out.
const EXPIRY_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveCondition {
    pub condition: Condition,
    pub remaining: Duration,
    /// Extra data, e.g. the die string of a bardic inspiration.
    pub payload: Option<String>,
    /// Speed to restore when a speed lock ends.
    pub stored_speed: Option<f64>,
    /// Block charges for `unstoppable`.
    pub charges: u32,
    pub valid: bool,
}

impl ActiveCondition {
    pub fn new(condition: Condition, duration: Duration, payload: Option<String>) -> Self {
        Self {
            condition,
            remaining: duration,
            payload,
            stored_speed: None,
            charges: 0,
            valid: true,
        }
    }

    /// Subtract elapsed time. Returns true once the clock has run out.
    pub fn elapse(&mut self, elapsed: &Duration) -> bool {
        if let (Duration::Timed { amount, unit }, Duration::Timed { amount: e, unit: u }) =
            (self.remaining, *elapsed)
        {
            let left = amount - unit.decay_from(e, u);
            self.remaining = Duration::Timed { amount: left, unit };
            if left <= EXPIRY_EPSILON {
                self.valid = false;
            }
        }
        !self.valid
    }

    /// Add time in this condition's own unit. Adding an indefinite
    /// duration makes the condition indefinite.
    pub fn extend(&mut self, added: &Duration) {
        self.remaining = match (self.remaining, *added) {
            (Duration::Indefinite, _) | (_, Duration::Indefinite) => Duration::Indefinite,
            (Duration::Timed { amount, unit }, Duration::Timed { amount: a, unit: u }) => {
                let a = if unit == u {
                    a
                } else {
                    u.seconds() / unit.seconds() * a
                };
                Duration::Timed {
                    amount: amount + a,
                    unit,
                }
            }
        };
    }
}

// ============================================================================
// Cascades
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Edge {
    Gain,
    Loss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeEffect {
    Add(Condition),
    Remove(Condition),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cascade {
    pub trigger: Condition,
    pub on: Edge,
    pub effect: CascadeEffect,
}

const fn cascade(trigger: Condition, on: Edge, effect: CascadeEffect) -> Cascade {
    Cascade {
        trigger,
        on,
        effect,
    }
}

/// Follow-on gains and losses. Cascaded gains are indefinite.
pub static CASCADES: &[Cascade] = &[
    cascade(Condition::Dying, Edge::Gain, CascadeEffect::Add(Condition::Unconscious)),
    cascade(Condition::Stabilized, Edge::Gain, CascadeEffect::Add(Condition::Unconscious)),
    cascade(Condition::Paralyzed, Edge::Gain, CascadeEffect::Add(Condition::Incapacitated)),
    cascade(Condition::Petrified, Edge::Gain, CascadeEffect::Add(Condition::Incapacitated)),
    cascade(Condition::Stunned, Edge::Gain, CascadeEffect::Add(Condition::Incapacitated)),
    cascade(Condition::Unconscious, Edge::Gain, CascadeEffect::Add(Condition::Incapacitated)),
    cascade(Condition::Unconscious, Edge::Gain, CascadeEffect::Add(Condition::Prone)),
    cascade(Condition::Incapacitated, Edge::Gain, CascadeEffect::Remove(Condition::Dodge)),
    cascade(Condition::Dead, Edge::Gain, CascadeEffect::Remove(Condition::Dying)),
    cascade(Condition::Dead, Edge::Gain, CascadeEffect::Remove(Condition::Stabilized)),
    cascade(Condition::Dying, Edge::Loss, CascadeEffect::Remove(Condition::Unconscious)),
    cascade(Condition::Stabilized, Edge::Loss, CascadeEffect::Remove(Condition::Unconscious)),
    cascade(Condition::Paralyzed, Edge::Loss, CascadeEffect::Remove(Condition::Incapacitated)),
    cascade(Condition::Petrified, Edge::Loss, CascadeEffect::Remove(Condition::Incapacitated)),
    cascade(Condition::Stunned, Edge::Loss, CascadeEffect::Remove(Condition::Incapacitated)),
    cascade(Condition::Unconscious, Edge::Loss, CascadeEffect::Remove(Condition::Incapacitated)),
];

/// Verify a cascade table has no cycles.
///
/// Nodes are (condition, gain/loss) pairs. `Add(b)` leads to (b, gain) and
/// `Remove(b)` to (b, loss). Returns the condition where a cycle was found.
pub fn check_cascades(table: &[Cascade]) -> Result<(), Condition> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn next(table: &[Cascade], node: (Condition, Edge)) -> impl Iterator<Item = (Condition, Edge)> + '_ {
        table
            .iter()
            .filter(move |c| c.trigger == node.0 && c.on == node.1)
            .map(|c| match c.effect {
                CascadeEffect::Add(b) => (b, Edge::Gain),
                CascadeEffect::Remove(b) => (b, Edge::Loss),
            })
    }

    fn visit(
        table: &[Cascade],
        node: (Condition, Edge),
        marks: &mut BTreeMap<(Condition, Edge), Mark>,
    ) -> Result<(), Condition> {
        match marks.get(&node) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => return Err(node.0),
            None => {}
        }
        marks.insert(node, Mark::Visiting);
        for n in next(table, node) {
            visit(table, n, marks)?;
        }
        marks.insert(node, Mark::Done);
        Ok(())
    }

    let mut marks = BTreeMap::new();
    for c in table {
        visit(table, (c.trigger, c.on), &mut marks)?;
    }
    Ok(())
}

// ============================================================================
// Registry
// ============================================================================

/// What a hook is allowed to touch.
pub struct HookContext<'a> {
    pub actor: &'a str,
    pub pool: &'a mut ResourcePool,
    pub referee: &'a mut Referee,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionRegistry {
    active: BTreeMap<Condition, ActiveCondition>,
}

impl ConditionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, condition: Condition) -> bool {
        self.active.contains_key(&condition)
    }

    pub fn any_of(&self, set: &[Condition]) -> bool {
        set.iter().any(|c| self.has(*c))
    }

    pub fn get(&self, condition: Condition) -> Option<&ActiveCondition> {
        self.active.get(&condition)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActiveCondition> {
        self.active.values()
    }

    pub fn names(&self) -> BTreeSet<Condition> {
        self.active.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Gain a condition, or extend it if already held.
    pub fn add(
        &mut self,
        condition: Condition,
        duration: Duration,
        payload: Option<String>,
        ctx: &mut HookContext<'_>,
    ) {
        let mut trail = Vec::new();
        self.add_inner(condition, duration, payload, ctx, &mut trail);
    }

    /// Lose a condition. Returns false if it was not held.
    pub fn remove(&mut self, condition: Condition, ctx: &mut HookContext<'_>) -> bool {
        let mut trail = Vec::new();
        self.remove_inner(condition, ctx, &mut trail)
    }

    fn add_inner(
        &mut self,
        condition: Condition,
        duration: Duration,
        payload: Option<String>,
        ctx: &mut HookContext<'_>,
        trail: &mut Vec<(Condition, Edge)>,
    ) {
        if let Some(existing) = self.active.get_mut(&condition) {
            existing.extend(&duration);
            ctx.referee.record(TraceEvent::ConditionExtended {
                actor: ctx.actor.to_string(),
                condition,
                added: duration,
            });
            return;
        }
        if trail.contains(&(condition, Edge::Gain)) {
            return;
        }
        trail.push((condition, Edge::Gain));

        let mut entry = ActiveCondition::new(condition, duration, payload);
        self.on_gain(&mut entry, ctx);
        self.active.insert(condition, entry);
        ctx.referee.record(TraceEvent::ConditionGained {
            actor: ctx.actor.to_string(),
            condition,
            duration,
        });

        for c in CASCADES
            .iter()
            .filter(|c| c.trigger == condition && c.on == Edge::Gain)
        {
            match c.effect {
                CascadeEffect::Add(b) => self.add_inner(b, Duration::Indefinite, None, ctx, trail),
                CascadeEffect::Remove(b) => {
                    self.remove_inner(b, ctx, trail);
                }
            }
        }
    }

    fn remove_inner(
        &mut self,
        condition: Condition,
        ctx: &mut HookContext<'_>,
        trail: &mut Vec<(Condition, Edge)>,
    ) -> bool {
        if trail.contains(&(condition, Edge::Loss)) {
            return false;
        }
        if self.source_remains(condition) {
            return false;
        }
        let Some(entry) = self.active.remove(&condition) else {
            return false;
        };
        trail.push((condition, Edge::Loss));

        self.on_loss(&entry, ctx);
        ctx.referee.record(TraceEvent::ConditionLost {
            actor: ctx.actor.to_string(),
            condition,
        });

        for c in CASCADES
            .iter()
            .filter(|c| c.trigger == condition && c.on == Edge::Loss)
        {
            match c.effect {
                CascadeEffect::Add(b) => self.add_inner(b, Duration::Indefinite, None, ctx, trail),
                CascadeEffect::Remove(b) => {
                    self.remove_inner(b, ctx, trail);
                }
            }
        }
        true
    }

    /// Cascaded conditions stay while something else still implies them.
    fn source_remains(&self, condition: Condition) -> bool {
        match condition {
            Condition::Incapacitated => self.any_of(&Condition::INCAPACITATING),
            Condition::Unconscious => self.any_of(&[Condition::Dying, Condition::Stabilized]),
            _ => false,
        }
    }

    fn on_gain(&self, entry: &mut ActiveCondition, ctx: &mut HookContext<'_>) {
        match entry.condition {
            c if c.locks_speed() => {
                // A second lock inherits the first lock's restore value.
                let held = self
                    .active
                    .values()
                    .find(|a| a.condition.locks_speed())
                    .and_then(|a| a.stored_speed);
                entry.stored_speed = Some(held.unwrap_or(ctx.pool.speed));
                ctx.pool.speed = 0.0;
                ctx.pool.movement = 0.0;
            }
            Condition::Dying => ctx.pool.death_saves.reset(),
            Condition::Unstoppable => {
                entry.charges = entry
                    .payload
                    .as_deref()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(3);
            }
            _ => {}
        }
    }

    fn on_loss(&self, entry: &ActiveCondition, ctx: &mut HookContext<'_>) {
        match entry.condition {
            c if c.locks_speed() => {
                let still_locked = self.active.values().any(|a| a.condition.locks_speed());
                if !still_locked {
                    if let Some(speed) = entry.stored_speed {
                        ctx.pool.speed = speed;
                        ctx.pool.movement = speed;
                    }
                }
            }
            _ => {}
        }
    }

    /// Start-of-turn hook: speed locks keep movement at zero.
    pub fn on_turn_start(&mut self, ctx: &mut HookContext<'_>) {
        if self.active.keys().any(|c| c.locks_speed()) {
            ctx.pool.movement = 0.0;
        }
    }

    /// Hook for events on another character's turn. For `unstoppable` each
    /// call spends one block charge; the condition drops when none remain.
    /// Returns true if the condition reacted.
    pub fn on_other_turn(&mut self, condition: Condition, ctx: &mut HookContext<'_>) -> bool {
        let Some(entry) = self.active.get_mut(&condition) else {
            return false;
        };
        match condition {
            Condition::Unstoppable => {
                entry.charges = entry.charges.saturating_sub(1);
                if entry.charges == 0 {
                    entry.valid = false;
                    self.remove(condition, ctx);
                }
                true
            }
            _ => false,
        }
    }

    /// Decay every timed condition by `elapsed`, then remove the expired
    /// ones. Returns what was removed.
    pub fn advance(&mut self, elapsed: &Duration, ctx: &mut HookContext<'_>) -> Vec<Condition> {
        let expired: Vec<Condition> = self
            .active
            .values_mut()
            .filter_map(|a| a.elapse(elapsed).then_some(a.condition))
            .collect();
        expired
            .into_iter()
            .filter(|c| self.remove(*c, ctx))
            .collect()
    }
}
