//! Combatants.
//!
//! A [`Character`] owns one stat block, one resource pool and one condition
//! registry. Everything that needs more than one of them lives here: damage
//! and the death state machine, rests, the turn cycle, condition-modified
//! rolls, and the weighted choice of what to do next.

use crate::conditions::{Condition, ConditionRegistry, Duration, HookContext, TimeUnit};
use crate::config::CharacterTemplate;
use crate::dice::{Advantage, DiceSpec, DieType};
use crate::resources::{
    counters, ActionCost, DeathSaves, ResourceDelta, ResourceError, ResourcePool, TurnResources,
};
use crate::stats::{Ability, CharacterClass, DamageType, Skill, StatBlock};
use crate::tables::{Action, TableError, Tables, DEFAULT_CATEGORY};
use crate::trace::{Referee, RestKind, TraceEvent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// What a check or save returns when a condition makes it fail outright.
pub const AUTO_FAIL: i32 = -100;

// ============================================================================
// Identity
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacterId(pub Uuid);

impl CharacterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CharacterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CharacterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Team as written in encounter files. Anything unrecognised is an enemy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Team {
    Pc,
    Ally,
    #[default]
    Enemy,
}

impl Team {
    pub fn name(&self) -> &'static str {
        match self {
            Team::Pc => "pc",
            Team::Ally => "ally",
            Team::Enemy => "enemy",
        }
    }

    pub fn side(&self) -> Side {
        match self {
            Team::Pc | Team::Ally => Side::Good,
            Team::Enemy => Side::Bad,
        }
    }
}

impl From<String> for Team {
    fn from(value: String) -> Self {
        match value.as_str() {
            "pc" => Team::Pc,
            "ally" => Team::Ally,
            _ => Team::Enemy,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Alignment for targeting and victory: player characters and their allies
/// against everyone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Good,
    Bad,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Good => Side::Bad,
            Side::Bad => Side::Good,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Good => write!(f, "good"),
            Side::Bad => write!(f, "bad"),
        }
    }
}

/// Where a character stands on the road to death.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifeState {
    /// Above 0 HP.
    Stable,
    Dying,
    Stabilized,
    Dead,
}

// ============================================================================
// Biases
// ============================================================================

/// Selection weight of an action or attack. One of 16, 8, 4, 2, 1, or 0
/// for never.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub struct Bias(u8);

const BIAS_TIERS: usize = 5;

impl Bias {
    pub const NEVER: Bias = Bias(0);
    pub const RARE: Bias = Bias(1);
    pub const HIGHEST: Bias = Bias(16);
    pub const ALLOWED: [u8; 6] = [16, 8, 4, 2, 1, 0];

    pub fn new(weight: u8) -> Option<Bias> {
        Self::ALLOWED.contains(&weight).then_some(Bias(weight))
    }

    pub fn weight(self) -> u8 {
        self.0
    }

    /// 1 is tier 0, 16 is tier 4; never has no tier.
    fn tier(self) -> Option<usize> {
        (self.0 > 0).then(|| self.0.trailing_zeros() as usize)
    }
}

impl TryFrom<u8> for Bias {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Bias::new(value).ok_or_else(|| format!("bias must be one of {:?}, got {value}", Bias::ALLOWED))
    }
}

impl From<Bias> for u8 {
    fn from(bias: Bias) -> Self {
        bias.0
    }
}

impl fmt::Display for Bias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Weighted pick: a bias tier is drawn with probability proportional to its
/// weight, then a name uniformly from that tier. A tier that turns out empty
/// is struck and the draw repeated, at most five times.
pub fn pick_by_bias<'a>(
    candidates: impl IntoIterator<Item = (&'a str, Bias)>,
    referee: &mut Referee,
) -> Option<String> {
    let candidates: Vec<(&str, usize)> = candidates
        .into_iter()
        .filter_map(|(name, bias)| bias.tier().map(|tier| (name, tier)))
        .collect();
    if candidates.is_empty() {
        return None;
    }

    let mut open = [true; BIAS_TIERS];
    for attempt in 0..BIAS_TIERS {
        let total: usize = (0..BIAS_TIERS).filter(|&t| open[t]).map(|t| 1 << t).sum();
        let mut index = referee.pick(total)?;
        let tier = (0..BIAS_TIERS).filter(|&t| open[t]).find(|&t| {
            if index < 1 << t {
                true
            } else {
                index -= 1 << t;
                false
            }
        })?;

        let pool: Vec<&str> = candidates
            .iter()
            .filter(|(_, t)| *t == tier)
            .map(|(name, _)| *name)
            .collect();
        if let Some(i) = referee.pick(pool.len()) {
            return Some(pool[i].to_string());
        }
        tracing::trace!(attempt, tier, "empty bias tier");
        open[tier] = false;
    }
    None
}

/// An action a character knows, with its configured and current bias.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnownAction {
    pub action: Action,
    pub base: Bias,
    pub bias: Bias,
}

/// The actions one character can take.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionSet {
    known: BTreeMap<String, KnownAction>,
}

impl ActionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, action: Action) {
        let bias = action.bias;
        self.known.insert(
            action.name.clone(),
            KnownAction {
                action,
                base: bias,
                bias,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&Action> {
        self.known.get(name).map(|k| &k.action)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.known.contains_key(name)
    }

    pub fn bias(&self, name: &str) -> Option<Bias> {
        self.known.get(name).map(|k| k.bias)
    }

    /// Replace the configured bias. False if the action is unknown.
    pub fn set_base_bias(&mut self, name: &str, bias: Bias) -> bool {
        match self.known.get_mut(name) {
            Some(known) => {
                known.base = bias;
                known.bias = bias;
                true
            }
            None => false,
        }
    }

    /// Override the current bias until the next [`ActionSet::restore`].
    pub fn set_bias(&mut self, name: &str, bias: Bias) {
        if let Some(known) = self.known.get_mut(name) {
            known.bias = bias;
        }
    }

    pub fn restore(&mut self, name: &str) {
        if let Some(known) = self.known.get_mut(name) {
            known.bias = known.base;
        }
    }

    /// Current biases of every action with `cost`.
    pub fn of_cost(&self, cost: ActionCost) -> impl Iterator<Item = (&str, Bias)> {
        self.known
            .iter()
            .filter(move |(_, k)| k.action.cost == cost)
            .map(|(name, k)| (name.as_str(), k.bias))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.known.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

// ============================================================================
// Rolls
// ============================================================================

/// A check or save a character can be asked to make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatRoll {
    Check(Ability),
    Skill(Skill),
    Save(Ability),
}

impl fmt::Display for StatRoll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatRoll::Check(ability) => write!(f, "{ability} check"),
            StatRoll::Skill(skill) => write!(f, "{skill} check"),
            StatRoll::Save(ability) => write!(f, "{ability} save"),
        }
    }
}

/// Conditions that fail strength and dexterity saves outright.
const SAVE_FAILING: [Condition; 4] = [
    Condition::Paralyzed,
    Condition::Petrified,
    Condition::Stunned,
    Condition::Unconscious,
];

/// Conditions under which a character takes no action at all.
const HELPLESS: [Condition; 4] = [
    Condition::Unconscious,
    Condition::Petrified,
    Condition::Paralyzed,
    Condition::Stunned,
];

// ============================================================================
// Character
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Character {
    pub id: CharacterId,
    pub name: String,
    pub team: Team,
    pub stats: StatBlock,
    pub resources: ResourcePool,
    pub conditions: ConditionRegistry,
    pub actions: ActionSet,
    /// Known attacks with their selection bias.
    pub attacks: BTreeMap<String, Bias>,
}

/// Unarmed strikes a character knows without being told.
fn default_attacks(stats: &StatBlock) -> BTreeMap<String, Bias> {
    let monk = stats.class_level(CharacterClass::Monk);
    let name = match monk {
        0 => "unarmed",
        1..=4 => "unarmed_4",
        5..=10 => "unarmed_6",
        11..=16 => "unarmed_8",
        _ => "unarmed_10",
    };
    BTreeMap::from([(name.to_string(), Bias::RARE)])
}

impl Character {
    /// A character with no actions beyond what is added later.
    pub fn new(name: impl Into<String>, team: Team, stats: StatBlock) -> Self {
        let mut resources = ResourcePool::new(&stats);
        resources.refresh_features(&stats, RestKind::Long);
        let attacks = default_attacks(&stats);
        Self {
            id: CharacterId::new(),
            name: name.into(),
            team,
            stats,
            resources,
            conditions: ConditionRegistry::new(),
            actions: ActionSet::new(),
            attacks,
        }
    }

    /// Build a character from an encounter-file template. Unknown actions,
    /// categories and attacks are configuration errors.
    pub fn from_template(
        template: &CharacterTemplate,
        tables: &Tables,
        referee: &mut Referee,
    ) -> Result<Self, TableError> {
        let mut stats = StatBlock::default();
        stats.apply(&template.stats, &template.name, referee)?;
        stats.properties.merge(&template.property);

        let mut character = Character::new(template.name.clone(), template.team, stats);

        let categories = std::iter::once(DEFAULT_CATEGORY)
            .chain(template.actions.inc_category.iter().map(String::as_str));
        for category in categories {
            for name in tables.category(category)? {
                character.actions.insert(tables.action(name)?.clone());
            }
        }
        for name in &template.actions.inc_action {
            character.actions.insert(tables.action(name)?.clone());
        }
        for (name, def) in &template.actions.unique_actions {
            character.actions.insert(tables.resolve_action(name, def)?);
        }
        for (name, &bias) in &template.bias {
            if !character.actions.set_base_bias(name, bias) {
                return Err(TableError::UnknownAction(name.clone()));
            }
        }

        character.attacks.extend(template.attacks.clone());
        for name in character.attacks.keys() {
            tables.attack(name)?;
        }

        character.resources.add_counters(&template.resource);
        if character.stats.properties.patron.is_some()
            && !character.resources.has_counter(counters::GENIES_WRATH)
        {
            character.resources.add_counters([counters::GENIES_WRATH]);
        }
        character
            .resources
            .refresh_features(&character.stats, RestKind::Long);

        tracing::debug!(
            character = %character.name,
            team = %character.team,
            actions = character.actions.len(),
            attacks = character.attacks.len(),
            "created character"
        );
        Ok(character)
    }

    pub fn side(&self) -> Side {
        self.team.side()
    }

    /// Player characters and characters flagged important make death saves;
    /// everyone else dies at 0 HP.
    pub fn makes_death_saves(&self) -> bool {
        self.team == Team::Pc || self.stats.properties.important
    }

    // ------------------------------------------------------------------------
    // Conditions
    // ------------------------------------------------------------------------

    pub fn has_condition(&self, condition: Condition) -> bool {
        self.conditions.has(condition)
    }

    /// Gain `condition`, or extend it if already held. Refused (returning
    /// false) if the character is immune, except for the death states.
    pub fn add_condition(
        &mut self,
        condition: Condition,
        duration: Duration,
        payload: Option<String>,
        referee: &mut Referee,
    ) -> bool {
        if !condition.is_death_state() && self.stats.condition_immunities.contains(&condition) {
            referee.record(TraceEvent::ConditionRefused {
                actor: self.name.clone(),
                condition,
            });
            return false;
        }
        let mut ctx = HookContext {
            actor: &self.name,
            pool: &mut self.resources,
            referee,
        };
        self.conditions.add(condition, duration, payload, &mut ctx);
        true
    }

    pub fn remove_condition(&mut self, condition: Condition, referee: &mut Referee) -> bool {
        let mut ctx = HookContext {
            actor: &self.name,
            pool: &mut self.resources,
            referee,
        };
        self.conditions.remove(condition, &mut ctx)
    }

    /// Let time pass for every timed condition. Returns what expired.
    pub fn advance_conditions(&mut self, elapsed: &Duration, referee: &mut Referee) -> Vec<Condition> {
        let mut ctx = HookContext {
            actor: &self.name,
            pool: &mut self.resources,
            referee,
        };
        self.conditions.advance(elapsed, &mut ctx)
    }

    /// Something happened to this character on someone else's turn.
    pub fn react_on_other_turn(&mut self, condition: Condition, referee: &mut Referee) -> bool {
        let mut ctx = HookContext {
            actor: &self.name,
            pool: &mut self.resources,
            referee,
        };
        self.conditions.on_other_turn(condition, &mut ctx)
    }

    // ------------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------------

    /// Apply a resource delta, tracing every counter that moved.
    pub fn adjust_resources(&mut self, delta: &ResourceDelta, referee: &mut Referee) {
        let grappled = self.has_condition(Condition::Grappled);
        for (resource, value) in self.resources.adjust(delta, &self.stats, grappled) {
            referee.record(TraceEvent::ResourceChanged {
                actor: self.name.clone(),
                resource,
                value,
            });
        }
    }

    pub fn set_counter(&mut self, name: &str, value: i32, referee: &mut Referee) {
        self.resources.set_counter(name, value);
        referee.record(TraceEvent::ResourceChanged {
            actor: self.name.clone(),
            resource: name.to_string(),
            value: self.resources.counter(name) as f64,
        });
    }

    // ------------------------------------------------------------------------
    // Damage, healing and death
    // ------------------------------------------------------------------------

    pub fn is_dead(&self) -> bool {
        self.has_condition(Condition::Dead)
    }

    pub fn life_state(&self) -> LifeState {
        if self.has_condition(Condition::Dead) {
            LifeState::Dead
        } else if self.has_condition(Condition::Stabilized) {
            LifeState::Stabilized
        } else if self.has_condition(Condition::Dying) {
            LifeState::Dying
        } else {
            LifeState::Stable
        }
    }

    /// Take typed damage. Returns the damage that landed and the HP left.
    ///
    /// Petrified halves every amount first, then immunity, resistance and
    /// vulnerability apply per type. A character already at 0 HP takes a
    /// death-save failure instead, two on a critical hit.
    pub fn take_damage(
        &mut self,
        damage: &BTreeMap<DamageType, i32>,
        critical: bool,
        referee: &mut Referee,
    ) -> Result<(i32, i32), ResourceError> {
        let petrified = self.has_condition(Condition::Petrified);
        let mut total = 0;
        for (&kind, &amount) in damage {
            if amount < 0 {
                return Err(ResourceError::NegativeAmount(amount));
            }
            let mut amount = if petrified { amount / 2 } else { amount };
            if self.stats.immunities.contains(&kind) {
                continue;
            }
            if self.stats.resistances.contains(&kind) {
                amount /= 2;
            }
            if self.stats.vulnerabilities.contains(&kind) {
                amount *= 2;
            }
            total += amount;
        }
        referee.record(TraceEvent::DamageTaken {
            actor: self.name.clone(),
            amount: total,
            critical,
        });

        if self.is_dead() {
            return Ok((total, 0));
        }
        if self.resources.hp == 0 {
            if total > 0 {
                self.gain_death_save(None, false, if critical { 2 } else { 1 }, referee);
            }
            return Ok((total, 0));
        }
        let hp = self.remove_hp(total, referee)?;
        Ok((total, hp))
    }

    /// Lose `amount` HP, temporary HP first. Reaching 0 starts dying, or
    /// kills outright when the overflow is at least max HP or the character
    /// makes no death saves. Returns the HP left.
    pub fn remove_hp(&mut self, amount: i32, referee: &mut Referee) -> Result<i32, ResourceError> {
        if amount < 0 {
            return Err(ResourceError::NegativeAmount(amount));
        }
        if self.is_dead() {
            return Ok(0);
        }
        if self.resources.hp == 0 {
            if amount > 0 {
                self.gain_death_save(None, false, 1, referee);
            }
            return Ok(0);
        }

        let through = self.resources.absorb(amount);
        let before = self.resources.hp;
        let remainder = before - through;
        self.resources.hp = remainder.max(0);
        self.record_hp(self.resources.hp - before, referee);

        if remainder <= 0 {
            if self.makes_death_saves() && remainder.abs() < self.stats.max_hp {
                tracing::info!(character = %self.name, "dropped to 0 HP and is dying");
                self.add_condition(Condition::Dying, Duration::Indefinite, None, referee);
            } else {
                self.die(referee);
            }
        }
        Ok(self.resources.hp)
    }

    /// Regain HP. A negative amount heals to full. Any healing that lifts a
    /// character off 0 HP ends dying and clears the death-save tally.
    pub fn heal_hp(&mut self, amount: i32, referee: &mut Referee) -> Result<i32, ResourceError> {
        if self.is_dead() {
            return Err(ResourceError::DeadCharacter(self.name.clone()));
        }
        let before = self.resources.hp;
        let healed = if amount < 0 {
            self.stats.max_hp
        } else {
            (before + amount).min(self.stats.max_hp)
        };
        self.resources.hp = healed.max(before);
        self.record_hp(self.resources.hp - before, referee);

        if self.resources.hp > 0
            && self
                .conditions
                .any_of(&[Condition::Dying, Condition::Stabilized])
        {
            self.remove_condition(Condition::Stabilized, referee);
            self.remove_condition(Condition::Dying, referee);
            self.resources.death_saves.reset();
        }
        Ok(self.resources.hp)
    }

    fn record_hp(&self, delta: i32, referee: &mut Referee) {
        referee.record(TraceEvent::HpChanged {
            actor: self.name.clone(),
            delta,
            hp: self.resources.hp,
            max_hp: self.stats.max_hp,
            temp_hp: self.resources.temp_hp,
        });
    }

    fn die(&mut self, referee: &mut Referee) {
        if self.is_dead() {
            return;
        }
        self.resources.hp = 0;
        self.add_condition(Condition::Dead, Duration::Indefinite, None, referee);
        tracing::info!(character = %self.name, "died");
        referee.record(TraceEvent::CharacterDied {
            actor: self.name.clone(),
        });
    }

    /// Tally death-save results. Three successes stabilize, three failures
    /// kill, and a failure while stabilized starts the dying again.
    pub fn gain_death_save(
        &mut self,
        roll: Option<i32>,
        success: bool,
        count: u8,
        referee: &mut Referee,
    ) {
        if !self
            .conditions
            .any_of(&[Condition::Dying, Condition::Stabilized])
        {
            return;
        }
        let saves = &mut self.resources.death_saves;
        let (stabilized, dead) = if success {
            let mut done = false;
            for _ in 0..count {
                done = saves.add_success();
            }
            (done, false)
        } else {
            (false, saves.add_failures(count))
        };
        referee.record(TraceEvent::DeathSave {
            actor: self.name.clone(),
            roll,
            successes: self.resources.death_saves.successes,
            failures: self.resources.death_saves.failures,
        });

        if dead {
            self.die(referee);
        } else if stabilized {
            self.stabilize(referee);
        } else if !success && self.has_condition(Condition::Stabilized) {
            // Back to dying with the tally intact.
            let saves = self.resources.death_saves;
            self.add_condition(Condition::Dying, Duration::Indefinite, None, referee);
            self.remove_condition(Condition::Stabilized, referee);
            self.resources.death_saves = saves;
            tracing::info!(character = %self.name, "is dying again");
        }
    }

    /// Swap `dying` for `stabilized`, keeping the death-save tally. False
    /// if the character was not dying.
    pub fn stabilize(&mut self, referee: &mut Referee) -> bool {
        if !self.has_condition(Condition::Dying) {
            return false;
        }
        self.add_condition(Condition::Stabilized, Duration::Indefinite, None, referee);
        self.remove_condition(Condition::Dying, referee);
        tracing::info!(character = %self.name, "is stabilized");
        true
    }

    /// Roll a death save: 20 wakes up with 1 HP, 10 or more succeeds, 1
    /// fails twice, anything else fails once. A stabilized character rolls
    /// nothing.
    pub fn death_save(&mut self, referee: &mut Referee) -> Result<DeathSaves, ResourceError> {
        if self.has_condition(Condition::Stabilized) {
            return Ok(self.resources.death_saves);
        }
        if !self.has_condition(Condition::Dying) {
            return Err(ResourceError::NotDying(self.name.clone()));
        }
        let roll = referee.d20(Advantage::Normal, &self.name, "death save");
        match roll {
            20 => {
                referee.record(TraceEvent::DeathSave {
                    actor: self.name.clone(),
                    roll: Some(roll),
                    successes: self.resources.death_saves.successes,
                    failures: self.resources.death_saves.failures,
                });
                self.heal_hp(1, referee)?;
            }
            10..=19 => self.gain_death_save(Some(roll), true, 1, referee),
            1 => self.gain_death_save(Some(roll), false, 2, referee),
            _ => self.gain_death_save(Some(roll), false, 1, referee),
        }
        Ok(self.resources.death_saves)
    }

    // ------------------------------------------------------------------------
    // Rests
    // ------------------------------------------------------------------------

    /// Full HP, half the hit dice, slots and long-rest features. Nothing
    /// happens at 0 HP. Returns whether the rest was taken.
    pub fn long_rest(&mut self, referee: &mut Referee) -> bool {
        let applied = !self.is_dead() && self.resources.hp > 0;
        if applied {
            let before = self.resources.hp;
            self.resources.hp = self.stats.max_hp;
            if self.resources.hp != before {
                self.record_hp(self.resources.hp - before, referee);
            }
            self.resources.recover_hit_dice(&self.stats);
            self.resources
                .refresh_features(&self.stats, RestKind::Long);
            self.resources.death_saves.reset();
        }
        referee.record(TraceEvent::Rested {
            actor: self.name.clone(),
            kind: RestKind::Long,
            applied,
        });
        applied
    }

    /// Short-rest features, plus healing from each hit die in `spend`
    /// (`"2d8"` spends two d8s). Each die heals its roll plus the
    /// constitution modifier. Returns the HP regained.
    pub fn short_rest(
        &mut self,
        spend: &[DiceSpec],
        referee: &mut Referee,
    ) -> Result<i32, ResourceError> {
        let mut dice = Vec::with_capacity(spend.len());
        for spec in spend {
            let die = spec
                .die_type()
                .filter(DieType::is_hit_die)
                .ok_or(ResourceError::InvalidHitDie(spec.faces))?;
            dice.push((die, spec.count));
        }

        if self.is_dead() || self.resources.hp == 0 {
            referee.record(TraceEvent::Rested {
                actor: self.name.clone(),
                kind: RestKind::Short,
                applied: false,
            });
            return Ok(0);
        }

        let con = self.stats.modifier(Ability::Constitution);
        let mut healing = 0;
        for (die, count) in dice {
            for _ in 0..count {
                if !self.resources.spend_hit_die(die) {
                    tracing::debug!(character = %self.name, %die, "no hit dice left");
                    break;
                }
                let roll = referee.roll(die.sides(), 1, &self.name, "hit die");
                healing += (roll + con).max(0);
            }
        }
        self.resources
            .refresh_features(&self.stats, RestKind::Short);
        if healing > 0 {
            self.heal_hp(healing, referee)?;
        }
        referee.record(TraceEvent::Rested {
            actor: self.name.clone(),
            kind: RestKind::Short,
            applied: true,
        });
        Ok(healing)
    }

    /// Fighter's second wind: 1d10 + fighter level. `None` without a charge.
    pub fn second_wind(&mut self, referee: &mut Referee) -> Result<Option<i32>, ResourceError> {
        let level = self.stats.class_level(CharacterClass::Fighter);
        if level == 0 || self.resources.charges.second_wind == 0 {
            return Ok(None);
        }
        self.resources.charges.second_wind -= 1;
        let amount = referee.roll(10, 1, &self.name, "second wind") + level as i32;
        self.heal_hp(amount, referee)?;
        Ok(Some(amount))
    }

    // ------------------------------------------------------------------------
    // Turn cycle
    // ------------------------------------------------------------------------

    /// Regain actions and movement, run start-of-turn hooks, and let the
    /// start-of-turn clocks tick.
    pub fn start_turn(&mut self, referee: &mut Referee) -> TurnResources {
        self.resources.reset_turn(&self.stats);
        {
            let mut ctx = HookContext {
                actor: &self.name,
                pool: &mut self.resources,
                referee,
            };
            self.conditions.on_turn_start(&mut ctx);
            self.conditions
                .advance(&Duration::new(1.0, TimeUnit::StartOfNextTurn), &mut ctx);
        }
        let resources = self.resources.snapshot();
        referee.record(TraceEvent::TurnStarted {
            actor: self.name.clone(),
            team: self.team,
            resources: resources.clone(),
        });
        resources
    }

    pub fn end_turn(&mut self, referee: &mut Referee) {
        self.advance_conditions(&Duration::new(1.0, TimeUnit::EndOfNextTurn), referee);
        referee.record(TraceEvent::TurnEnded {
            actor: self.name.clone(),
        });
    }

    // ------------------------------------------------------------------------
    // Rolls
    // ------------------------------------------------------------------------

    /// A check or save with this character's conditions applied. Returns
    /// [`AUTO_FAIL`] when a condition fails it outright.
    pub fn roll_stat(&mut self, roll: StatRoll, advantage: Advantage, referee: &mut Referee) -> i32 {
        let mut tally = advantage.tally();
        let total = match roll {
            StatRoll::Save(ability) => {
                if ability.is_physical() && self.conditions.any_of(&SAVE_FAILING) {
                    tracing::debug!(character = %self.name, %roll, "fails automatically");
                    return AUTO_FAIL;
                }
                if ability == Ability::Dexterity {
                    if self.has_condition(Condition::Restrained) {
                        tally -= 1;
                    } else if self.has_condition(Condition::Dodge) {
                        tally += 1;
                    }
                }
                self.stats.roll_saving_throw(
                    ability,
                    Advantage::from_tally(tally),
                    &self.name,
                    referee,
                )
            }
            StatRoll::Check(_) | StatRoll::Skill(_) => {
                if self
                    .conditions
                    .any_of(&[Condition::Blinded, Condition::Deafened])
                {
                    tracing::debug!(character = %self.name, %roll, "fails automatically");
                    return AUTO_FAIL;
                }
                if self.conditions.any_of(&[
                    Condition::Charmed,
                    Condition::Frightened,
                    Condition::Poisoned,
                ]) {
                    tally -= 1;
                }
                let advantage = Advantage::from_tally(tally);
                match roll {
                    StatRoll::Skill(skill) => {
                        self.stats
                            .roll_skill_check(skill, advantage, &self.name, referee)
                    }
                    StatRoll::Check(ability) | StatRoll::Save(ability) => {
                        self.stats
                            .roll_ability_check(ability, advantage, &self.name, referee)
                    }
                }
            }
        };
        total + self.spend_inspiration(referee)
    }

    /// Roll and use up a held bardic inspiration die. 0 if none is held.
    pub fn spend_inspiration(&mut self, referee: &mut Referee) -> i32 {
        let Some(held) = self.conditions.get(Condition::BardicInspiration) else {
            return 0;
        };
        let die = held.payload.as_deref().and_then(|p| DiceSpec::parse(p).ok());
        let bonus = match die {
            Some(die) => referee.roll_spec(&die, &self.name, "bardic inspiration"),
            None => 0,
        };
        self.remove_condition(Condition::BardicInspiration, referee);
        bonus
    }

    // ------------------------------------------------------------------------
    // Choosing what to do
    // ------------------------------------------------------------------------

    /// Adjust biases for the coming turn and return the order in which the
    /// turn's action types should be tried.
    pub fn refresh_biases(&mut self, ally_dying: bool) -> Vec<ActionCost> {
        let mut shillelagh_pending = false;
        if let Some(cost) = self.actions.get("cast_shillelagh").map(|a| a.cost) {
            if self.has_condition(Condition::Shillelagh) {
                self.actions.set_bias("cast_shillelagh", Bias::NEVER);
            } else if cost == ActionCost::Bonus {
                self.actions.set_bias("cast_shillelagh", Bias::HIGHEST);
                shillelagh_pending = true;
            }
        }

        let divinity: Vec<String> = self
            .actions
            .names()
            .filter(|n| n.starts_with("cd_"))
            .map(str::to_string)
            .collect();
        let spent = self.resources.charges.channel_divinity == 0;
        for name in &divinity {
            if spent {
                self.actions.set_bias(name, Bias::NEVER);
            } else {
                self.actions.restore(name);
            }
        }

        if ally_dying {
            self.actions.set_bias("stabilize", Bias::HIGHEST);
        } else {
            self.actions.set_bias("stabilize", Bias::NEVER);
        }

        if shillelagh_pending {
            vec![ActionCost::Bonus, ActionCost::Regular, ActionCost::Movement]
        } else {
            vec![ActionCost::Regular, ActionCost::Bonus, ActionCost::Movement]
        }
    }

    /// Pick an action of `cost`, honouring conditions that take the choice
    /// away. `None` means nothing to do.
    pub fn choose_action(&self, cost: ActionCost, referee: &mut Referee) -> Option<String> {
        if let Some(forced) = self.forced_action(cost) {
            return forced.map(str::to_string);
        }
        pick_by_bias(self.actions.of_cost(cost), referee)
    }

    fn forced_action(&self, cost: ActionCost) -> Option<Option<&'static str>> {
        let reason = if self.is_dead() {
            "dead"
        } else if self.has_condition(Condition::Stabilized) {
            "stabilized"
        } else if self.has_condition(Condition::Dying) {
            if cost == ActionCost::Regular {
                tracing::debug!(character = %self.name, "makes a death save");
                return Some(Some("death_save"));
            }
            "dying"
        } else if self.conditions.any_of(&HELPLESS) {
            "helpless"
        } else if self.has_condition(Condition::Incapacitated)
            && matches!(
                cost,
                ActionCost::Regular | ActionCost::Bonus | ActionCost::Reaction
            )
        {
            "incapacitated"
        } else if cost == ActionCost::Movement && self.has_condition(Condition::Prone) {
            return Some(Some("crawl"));
        } else if cost == ActionCost::Movement && self.has_condition(Condition::Grappling) {
            return Some(Some("move_while_grappling"));
        } else {
            return None;
        };
        tracing::debug!(character = %self.name, %cost, reason, "takes no action");
        Some(None)
    }

    /// Pick one of the known attacks by bias.
    pub fn random_attack(&self, referee: &mut Referee) -> Option<String> {
        pick_by_bias(
            self.attacks.iter().map(|(name, &bias)| (name.as_str(), bias)),
            referee,
        )
    }
}
