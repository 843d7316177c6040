//! The action resolver.
//!
//! [`RulesEngine::resolve`] takes one character's chosen action and its
//! targets, filters the targets by the action's target categories, and runs
//! the routine the action was bound to when the tables were loaded:
//!
//! 1. attack: weapon strikes, see [`crate::attacks`]
//! 2. spell: slot choice and effect, see [`crate::spells`]
//! 3. movement, auto, contest and special: coded here
//!
//! The action's cost is spent only when the routine had an effect. "Nothing
//! to do" outcomes (no valid target, no slot, no charge) are `Ok` with
//! [`Resolution::fizzled`] set.

use crate::attacks::{self, StrikeOptions};
use crate::character::{Character, Side};
use crate::conditions::{Condition, Duration, TimeUnit};
use crate::dice::{Advantage, DiceSpec};
use crate::resources::{counters, ActionCost, ResourceDelta, ResourceError};
use crate::spells;
use crate::stats::CharacterClass;
use crate::tables::{
    Action, AttackDef, AutoEffect, Handler, Routine, SpecialEffect, TableError, Tables, TargetKind,
};
use crate::trace::{Referee, TraceEvent};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Target name to a short description of what happened to it.
pub type Outcomes = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("Unknown character: {0}")]
    UnknownCharacter(String),
    #[error("{character} does not know the action {action}")]
    NotKnown { character: String, action: String },
    #[error("{character} does not know the attack {attack}")]
    UnknownAttack { character: String, attack: String },
    #[error("{action} needs the argument '{argument}'")]
    MissingArgument {
        action: String,
        argument: &'static str,
    },
    #[error("Invalid argument for {action}: {reason}")]
    InvalidArgument { action: String, reason: String },
    #[error("{0} needs a target")]
    MissingTarget(String),
}

// ============================================================================
// Roster
// ============================================================================

/// Every character in an encounter, addressed by index or name.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Roster {
    characters: Vec<Character>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a character, returning its index.
    pub fn push(&mut self, character: Character) -> usize {
        self.characters.push(character);
        self.characters.len() - 1
    }

    /// Add a character and hand it back.
    pub fn insert(&mut self, character: Character) -> &mut Character {
        let index = self.push(character);
        &mut self.characters[index]
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.characters.iter().position(|c| c.name == name)
    }

    pub fn get(&self, index: usize) -> Option<&Character> {
        self.characters.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Character> {
        self.characters.get_mut(index)
    }

    pub fn by_name(&self, name: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.name == name)
    }

    pub fn by_name_mut(&mut self, name: &str) -> Option<&mut Character> {
        self.characters.iter_mut().find(|c| c.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Character> {
        self.characters.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Character> {
        self.characters.iter_mut()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.characters.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    /// Two distinct characters, mutably.
    pub fn pair_mut(&mut self, a: usize, b: usize) -> Option<(&mut Character, &mut Character)> {
        if a == b || a >= self.len() || b >= self.len() {
            return None;
        }
        if a < b {
            let (left, right) = self.characters.split_at_mut(b);
            Some((&mut left[a], &mut right[0]))
        } else {
            let (left, right) = self.characters.split_at_mut(a);
            Some((&mut right[0], &mut left[b]))
        }
    }

    /// Living characters on `side`.
    pub fn living_on(&self, side: Side) -> impl Iterator<Item = &Character> {
        self.characters
            .iter()
            .filter(move |c| c.side() == side && !c.is_dead())
    }
}

// ============================================================================
// Arguments and results
// ============================================================================

/// Per-handler parameters to an action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionArgs {
    /// Attack to strike with. Required for attack actions other than
    /// martial arts.
    pub attack: Option<String>,
    /// Slot level to cast at, if above the lowest available.
    pub upcast: Option<u8>,
    /// Feet to move. Defaults to all remaining movement.
    pub distance: Option<f64>,
    pub difficult_terrain: bool,
    /// Beast form for wild shape.
    pub form: Option<String>,
    /// Hit dice to spend on a short rest.
    pub hit_dice: Vec<DiceSpec>,
    pub advantage: Advantage,
    pub adjacent_enemy: bool,
    pub within_5ft: bool,
}

impl ActionArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attack(mut self, attack: impl Into<String>) -> Self {
        self.attack = Some(attack.into());
        self
    }

    pub fn with_upcast(mut self, level: u8) -> Self {
        self.upcast = Some(level);
        self
    }

    pub fn with_distance(mut self, feet: f64) -> Self {
        self.distance = Some(feet);
        self
    }

    pub fn on_difficult_terrain(mut self) -> Self {
        self.difficult_terrain = true;
        self
    }

    pub fn with_form(mut self, form: impl Into<String>) -> Self {
        self.form = Some(form.into());
        self
    }

    pub fn with_hit_dice(mut self, dice: impl IntoIterator<Item = DiceSpec>) -> Self {
        self.hit_dice.extend(dice);
        self
    }

    pub fn with_advantage(mut self, advantage: Advantage) -> Self {
        self.advantage = advantage;
        self
    }

    pub fn with_adjacent_enemy(mut self) -> Self {
        self.adjacent_enemy = true;
        self
    }
}

/// The result of resolving one action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub actor: String,
    pub action: String,
    pub handler: Handler,
    pub cost: ActionCost,
    pub outcomes: Outcomes,
    /// Why nothing happened, if nothing did. The cost is not spent.
    pub fizzled: Option<String>,
}

impl Resolution {
    fn new(actor: &str, action: &Action) -> Self {
        Self {
            actor: actor.to_string(),
            action: action.name.clone(),
            handler: action.handler(),
            cost: action.cost,
            outcomes: Outcomes::new(),
            fizzled: None,
        }
    }

    fn with_outcomes(mut self, outcomes: Outcomes) -> Self {
        self.outcomes = outcomes;
        self
    }

    fn with_outcome(mut self, target: &str, outcome: impl Into<String>) -> Self {
        self.outcomes.insert(target.to_string(), outcome.into());
        self
    }

    fn fizzle(mut self, reason: impl Into<String>) -> Self {
        self.fizzled = Some(reason.into());
        self
    }

    pub fn had_effect(&self) -> bool {
        self.fizzled.is_none()
    }
}

// ============================================================================
// Rules Engine
// ============================================================================

/// Resolves actions against a roster using the loaded tables.
#[derive(Debug, Clone, Copy)]
pub struct RulesEngine<'a> {
    tables: &'a Tables,
}

impl<'a> RulesEngine<'a> {
    pub fn new(tables: &'a Tables) -> Self {
        Self { tables }
    }

    pub fn tables(&self) -> &'a Tables {
        self.tables
    }

    /// Keep the candidates an action with `kinds` may be aimed at. Names
    /// must exist in the roster; dead or mismatched candidates are dropped
    /// and traced. No kinds means any living candidate.
    pub fn validate_targets(
        &self,
        roster: &Roster,
        source: usize,
        action: &str,
        kinds: &BTreeSet<TargetKind>,
        candidates: &[String],
        referee: &mut Referee,
    ) -> Result<Vec<usize>, ActionError> {
        let actor = roster
            .get(source)
            .ok_or_else(|| ActionError::UnknownCharacter(format!("#{source}")))?;
        let mut accepted = Vec::with_capacity(candidates.len());
        for name in candidates {
            let index = roster
                .index_of(name)
                .ok_or_else(|| ActionError::UnknownCharacter(name.clone()))?;
            let Some(target) = roster.get(index) else {
                continue;
            };
            let reason = if target.is_dead() {
                Some("dead")
            } else if kinds.is_empty() {
                None
            } else {
                let is_self = index == source;
                let same_side = target.side() == actor.side();
                let allowed = (is_self && kinds.contains(&TargetKind::Self_))
                    || (!is_self && same_side && kinds.contains(&TargetKind::Ally))
                    || (!same_side && kinds.contains(&TargetKind::Enemy));
                (!allowed).then_some(if is_self {
                    "not a valid target for itself"
                } else if same_side {
                    "on the same side"
                } else {
                    "on the other side"
                })
            };
            match reason {
                Some(reason) => referee.record(TraceEvent::TargetRejected {
                    actor: actor.name.clone(),
                    action: action.to_string(),
                    target: name.clone(),
                    reason: reason.to_string(),
                }),
                None => accepted.push(index),
            }
        }
        Ok(accepted)
    }

    /// Resolve `action` taken by the character named `source` against
    /// `targets`.
    pub fn resolve(
        &self,
        roster: &mut Roster,
        source: &str,
        action: &str,
        targets: &[String],
        args: &ActionArgs,
        referee: &mut Referee,
    ) -> Result<Resolution, ActionError> {
        let source_index = roster
            .index_of(source)
            .ok_or_else(|| ActionError::UnknownCharacter(source.to_string()))?;
        let known = roster
            .get(source_index)
            .and_then(|c| c.actions.get(action))
            .cloned()
            .ok_or_else(|| ActionError::NotKnown {
                character: source.to_string(),
                action: action.to_string(),
            })?;
        if matches!(known.routine, Routine::Special(_)) && targets.is_empty() {
            return Err(ActionError::MissingTarget(action.to_string()));
        }
        let targets = self.validate_targets(
            roster,
            source_index,
            action,
            &known.targets,
            targets,
            referee,
        )?;

        let resolution = Resolution::new(source, &known);
        let resolution = match &known.routine {
            Routine::Attack {
                scale,
                offhand,
                martial_arts,
            } => self.resolve_attack(
                roster,
                source_index,
                &targets,
                *scale,
                *offhand,
                *martial_arts,
                args,
                resolution,
                referee,
            )?,
            Routine::Spell {
                spell,
                channel_divinity,
            } => self.resolve_spell(
                roster,
                source_index,
                &targets,
                spell,
                *channel_divinity,
                args,
                resolution,
                referee,
            )?,
            Routine::Movement { slow } => {
                resolve_movement(roster, source_index, *slow, args, resolution, referee)?
            }
            Routine::Auto(effect) => {
                resolve_auto(roster, source_index, *effect, args, resolution, referee)?
            }
            Routine::Contest => resolution,
            Routine::Special(effect) => {
                resolve_special(roster, source_index, &targets, *effect, resolution, referee)?
            }
        };

        match &resolution.fizzled {
            Some(reason) => referee.record(TraceEvent::ActionFizzled {
                actor: resolution.actor.clone(),
                action: resolution.action.clone(),
                reason: reason.clone(),
            }),
            None => {
                if let Some(character) = roster.get_mut(source_index) {
                    character.adjust_resources(&ResourceDelta::spend(known.cost), referee);
                }
                referee.record(TraceEvent::ActionResolved {
                    actor: resolution.actor.clone(),
                    action: resolution.action.clone(),
                    outcomes: resolution.outcomes.clone(),
                });
            }
        }
        Ok(resolution)
    }

    // ------------------------------------------------------------------------
    // Attacks
    // ------------------------------------------------------------------------

    /// The attack actually used: martial arts and monks' unarmed strikes
    /// take the best unarmed variant, and shillelagh enchants a club or
    /// quarterstaff.
    fn pick_attack(
        &self,
        attacker: &Character,
        requested: Option<&str>,
        martial_arts: bool,
        action: &str,
    ) -> Result<(String, &'a AttackDef), ActionError> {
        let name = if martial_arts {
            self.best_unarmed(attacker)
        } else {
            let requested = requested.ok_or_else(|| ActionError::MissingArgument {
                action: action.to_string(),
                argument: "attack",
            })?;
            if !attacker.attacks.contains_key(requested) {
                return Err(ActionError::UnknownAttack {
                    character: attacker.name.clone(),
                    attack: requested.to_string(),
                });
            }
            if requested == "unarmed" && attacker.stats.has_class(CharacterClass::Monk) {
                self.best_unarmed(attacker)
            } else if attacker.has_condition(Condition::Shillelagh)
                && matches!(requested, "club" | "quarterstaff")
            {
                format!("{requested}_shillelagh")
            } else {
                requested.to_string()
            }
        };
        let def = self.tables.attack(&name)?;
        Ok((name, def))
    }

    fn best_unarmed(&self, attacker: &Character) -> String {
        attacker
            .attacks
            .keys()
            .filter(|name| name.starts_with("unarmed"))
            .filter_map(|name| {
                let def = self.tables.attack(name).ok()?;
                let faces = def.damage.first().map_or(0, |entry| entry.dice.faces);
                Some((faces, name))
            })
            .max()
            .map_or_else(|| "unarmed".to_string(), |(_, name)| name.clone())
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_attack(
        &self,
        roster: &mut Roster,
        source: usize,
        targets: &[usize],
        scale: u32,
        offhand: bool,
        martial_arts: bool,
        args: &ActionArgs,
        resolution: Resolution,
        referee: &mut Referee,
    ) -> Result<Resolution, ActionError> {
        let targets: Vec<usize> = targets.iter().copied().filter(|&t| t != source).collect();
        if targets.is_empty() {
            return Ok(resolution.fizzle("no valid target"));
        }
        let attacker = roster
            .get(source)
            .ok_or_else(|| ActionError::UnknownCharacter(resolution.actor.clone()))?;
        let (name, def) =
            self.pick_attack(attacker, args.attack.as_deref(), martial_arts, &resolution.action)?;

        let count = def.multi.max(1) * scale.max(1);
        let mut outcomes = Outcomes::new();
        for i in 0..count as usize {
            let target_index = targets[i % targets.len()];
            let Some((attacker, target)) = roster.pair_mut(source, target_index) else {
                continue;
            };
            if target.is_dead() {
                continue;
            }
            let mut options = StrikeOptions {
                advantage: args.advantage,
                offhand,
                adjacent_enemy: args.adjacent_enemy,
                within_5ft: args.within_5ft,
            };
            if target.resources.counter(counters::WARDING_FLARE) > 0 && target.resources.reaction > 0 {
                tracing::debug!(target = %target.name, "warding flare");
                options.advantage = options.advantage.combine(Advantage::Disadvantage);
                target.set_counter(counters::WARDING_FLARE, 0, referee);
                target.adjust_resources(&ResourceDelta::new().reaction(-1), referee);
            }
            let outcome = attacks::strike(&name, def, attacker, target, &options, referee)?;
            outcomes.insert(target.name.clone(), format!("now has {} HP", outcome.target_hp));
        }
        Ok(resolution.with_outcomes(outcomes))
    }

    // ------------------------------------------------------------------------
    // Spells
    // ------------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn resolve_spell(
        &self,
        roster: &mut Roster,
        source: usize,
        targets: &[usize],
        spell: &str,
        channel_divinity: bool,
        args: &ActionArgs,
        resolution: Resolution,
        referee: &mut Referee,
    ) -> Result<Resolution, ActionError> {
        let spell = self.tables.spell(spell)?;
        if targets.is_empty() {
            return Ok(resolution.fizzle("no valid target"));
        }
        if channel_divinity {
            let Some(caster) = roster.get_mut(source) else {
                return Err(ActionError::UnknownCharacter(resolution.actor.clone()));
            };
            if caster.resources.charges.channel_divinity == 0 {
                return Ok(resolution.fizzle("no channel divinity left"));
            }
            caster.resources.charges.channel_divinity -= 1;
        }
        match spells::cast(spell, roster, source, targets, args.upcast, referee)? {
            Some(outcomes) => Ok(resolution.with_outcomes(outcomes)),
            None => Ok(resolution.fizzle("no spell slot")),
        }
    }
}

// ============================================================================
// Movement, auto and special actions
// ============================================================================

fn actor_mut<'r>(
    roster: &'r mut Roster,
    index: usize,
    resolution: &Resolution,
) -> Result<&'r mut Character, ActionError> {
    roster
        .get_mut(index)
        .ok_or_else(|| ActionError::UnknownCharacter(resolution.actor.clone()))
}

/// Ground covered by `distance` feet of movement on this terrain.
pub fn movement_covered(distance: f64, difficult_terrain: bool, slow: bool) -> f64 {
    let divisor = if difficult_terrain { 2.0 } else { 1.0 } + if slow { 1.0 } else { 0.0 };
    (distance / divisor * 100.0).round() / 100.0
}

fn resolve_movement(
    roster: &mut Roster,
    source: usize,
    slow: bool,
    args: &ActionArgs,
    resolution: Resolution,
    referee: &mut Referee,
) -> Result<Resolution, ActionError> {
    let mover = actor_mut(roster, source, &resolution)?;
    let distance = match args.distance {
        Some(d) if d <= 0.0 => {
            return Err(ActionError::InvalidArgument {
                action: resolution.action.clone(),
                reason: format!("distance must be positive, got {d}"),
            })
        }
        Some(d) => d,
        None => mover.resources.movement,
    };
    if mover.resources.movement <= 0.0 {
        return Ok(resolution.fizzle("no movement left"));
    }
    let covered = movement_covered(distance, args.difficult_terrain, slow);
    mover.adjust_resources(&ResourceDelta::new().movement(-distance), referee);
    let name = mover.name.clone();
    Ok(resolution.with_outcome(&name, format!("moved {covered} ft")))
}

fn resolve_auto(
    roster: &mut Roster,
    source: usize,
    effect: AutoEffect,
    args: &ActionArgs,
    resolution: Resolution,
    referee: &mut Referee,
) -> Result<Resolution, ActionError> {
    let actor = actor_mut(roster, source, &resolution)?;
    let name = actor.name.clone();
    let resolution = match effect {
        AutoEffect::LongRest => {
            if !actor.long_rest(referee) {
                return Ok(resolution.fizzle("cannot rest at 0 HP"));
            }
            resolution.with_outcome(&name, format!("rested, now has {} HP", actor.resources.hp))
        }
        AutoEffect::ShortRest => {
            if actor.is_dead() || actor.resources.hp == 0 {
                return Ok(resolution.fizzle("cannot rest at 0 HP"));
            }
            let healed = actor.short_rest(&args.hit_dice, referee)?;
            resolution.with_outcome(&name, format!("regained {healed} HP"))
        }
        AutoEffect::DeathSave => {
            if !actor.has_condition(Condition::Dying) {
                return Ok(resolution.fizzle("not dying"));
            }
            let saves = actor.death_save(referee)?;
            let outcome = if actor.has_condition(Condition::Stabilized) {
                "stabilized".to_string()
            } else if actor.has_condition(Condition::Dying) {
                format!(
                    "death saves: {} successes, {} failures",
                    saves.successes, saves.failures
                )
            } else if actor.is_dead() {
                "died".to_string()
            } else {
                format!("back up with {} HP", actor.resources.hp)
            };
            resolution.with_outcome(&name, outcome)
        }
        AutoEffect::Dodge => {
            actor.add_condition(Condition::Dodge, Duration::start_of_next_turn(), None, referee);
            resolution.with_outcome(&name, "is dodging")
        }
        AutoEffect::WildShape => {
            let form = args.form.clone().ok_or_else(|| ActionError::MissingArgument {
                action: resolution.action.clone(),
                argument: "form",
            })?;
            if actor.resources.charges.wild_shape == 0 {
                return Ok(resolution.fizzle("no wild shape left"));
            }
            let hours = (actor.stats.class_level(CharacterClass::Druid) / 2) as f64;
            if hours <= 0.0 {
                return Ok(resolution.fizzle("druid level too low"));
            }
            actor.resources.charges.wild_shape -= 1;
            actor.add_condition(
                Condition::WildShape,
                Duration::new(hours, TimeUnit::Hour),
                Some(form.clone()),
                referee,
            );
            resolution.with_outcome(&name, format!("is now a {form}"))
        }
        AutoEffect::DropWildShape => {
            if !actor.remove_condition(Condition::WildShape, referee) {
                return Ok(resolution.fizzle("not wild shaped"));
            }
            resolution.with_outcome(&name, "returns to their normal form")
        }
        AutoEffect::SecondWind => match actor.second_wind(referee)? {
            Some(_) => resolution.with_outcome(&name, format!("now has {} HP", actor.resources.hp)),
            None => resolution.fizzle("no second wind left"),
        },
    };
    Ok(resolution)
}

/// Bardic inspiration die by bard level.
fn inspiration_die(level: u8) -> DiceSpec {
    let faces = match level {
        0..=4 => 6,
        5..=9 => 8,
        10..=14 => 10,
        _ => 12,
    };
    DiceSpec::new(1, faces, 0)
}

fn resolve_special(
    roster: &mut Roster,
    source: usize,
    targets: &[usize],
    effect: SpecialEffect,
    resolution: Resolution,
    referee: &mut Referee,
) -> Result<Resolution, ActionError> {
    let Some(&target_index) = targets.first() else {
        return Ok(resolution.fizzle("no valid target"));
    };
    match effect {
        SpecialEffect::Stabilize => {
            let target = actor_mut(roster, target_index, &resolution)?;
            if !target.stabilize(referee) {
                return Ok(resolution.fizzle("target does not need stabilizing"));
            }
            let name = target.name.clone();
            Ok(resolution.with_outcome(&name, "now stabilized"))
        }
        SpecialEffect::BardicInspiration => {
            let bard = actor_mut(roster, source, &resolution)?;
            let level = bard.stats.class_level(CharacterClass::Bard);
            if bard.resources.charges.bardic_inspiration == 0 {
                return Ok(resolution.fizzle("no bardic inspiration left"));
            }
            bard.resources.charges.bardic_inspiration -= 1;
            let die = inspiration_die(level);
            let target = actor_mut(roster, target_index, &resolution)?;
            target.add_condition(
                Condition::BardicInspiration,
                Duration::minutes(10),
                Some(die.to_string()),
                referee,
            );
            let name = target.name.clone();
            Ok(resolution.with_outcome(&name, format!("got {die} bardic inspiration")))
        }
    }
}
