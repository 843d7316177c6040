//! Per-character dynamic resources.
//!
//! The pool only knows counters and their ceilings. Anything that depends on
//! conditions (death, grapple) is driven from [`crate::character`].

use crate::dice::DieType;
use crate::stats::{Ability, CharacterClass, StatBlock};
use crate::trace::RestKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("Invalid spell level: {0}")]
    InvalidSpellLevel(u8),
    #[error("Invalid hit die: d{0}")]
    InvalidHitDie(u32),
    #[error("Amount must not be negative: {0}")]
    NegativeAmount(i32),
    #[error("{0} is dead")]
    DeadCharacter(String),
    #[error("{0} is not dying")]
    NotDying(String),
}

/// What an action uses up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionCost {
    Regular,
    Bonus,
    Movement,
    Reaction,
    Free,
    Special,
}

impl ActionCost {
    pub fn name(&self) -> &'static str {
        match self {
            ActionCost::Regular => "regular",
            ActionCost::Bonus => "bonus",
            ActionCost::Movement => "movement",
            ActionCost::Reaction => "reaction",
            ActionCost::Free => "free",
            ActionCost::Special => "special",
        }
    }
}

impl fmt::Display for ActionCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Death saving throws.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeathSaves {
    pub successes: u8,
    pub failures: u8,
}

impl DeathSaves {
    /// Returns true once three successes are reached.
    pub fn add_success(&mut self) -> bool {
        self.successes = (self.successes + 1).min(3);
        self.successes >= 3
    }

    /// Returns true once three failures are reached.
    pub fn add_failures(&mut self, count: u8) -> bool {
        self.failures = (self.failures + count).min(3);
        self.failures >= 3
    }

    pub fn reset(&mut self) {
        self.successes = 0;
        self.failures = 0;
    }
}

/// Class-feature charges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCharges {
    pub bardic_inspiration: u8,
    pub channel_divinity: u8,
    pub wild_shape: u8,
    pub second_wind: u8,
    pub action_surge: u8,
    pub sneak_attack: u8,
}

impl ClassCharges {
    fn refresh(&mut self, stats: &StatBlock, kind: RestKind) {
        for (&class, &level) in &stats.class_levels {
            match class {
                CharacterClass::Bard if kind == RestKind::Long => {
                    self.bardic_inspiration = stats.modifier(Ability::Charisma).max(1) as u8;
                }
                CharacterClass::Cleric => {
                    self.channel_divinity = if level >= 18 {
                        3
                    } else if level >= 6 {
                        2
                    } else {
                        1
                    };
                }
                CharacterClass::Druid => self.wild_shape = 2,
                CharacterClass::Fighter => {
                    self.second_wind = 1;
                    if level >= 2 {
                        self.action_surge = if level >= 17 { 2 } else { 1 };
                    }
                }
                _ => {}
            }
        }
    }
}

/// Named one-off counters with a refresh rule.
pub mod counters {
    pub const PSIONIC_DICE_REGAIN: &str = "psionic_dice_regain";
    pub const PSIONIC_ENERGY: &str = "psionic_energy";
    pub const WARDING_FLARE: &str = "warding_flare";
    pub const GENIES_WRATH: &str = "genies_wrath";
}

/// A requested change to the pool. Negative values spend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceDelta {
    pub temp_hp: i32,
    pub regular: i32,
    pub bonus: i32,
    pub reaction: i32,
    pub movement: f64,
    /// Keyed by die faces.
    pub hit_dice: BTreeMap<u32, i32>,
    /// Keyed by spell level.
    pub slots: BTreeMap<u8, i32>,
}

impl ResourceDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn temp_hp(mut self, amount: i32) -> Self {
        self.temp_hp += amount;
        self
    }

    pub fn regular(mut self, amount: i32) -> Self {
        self.regular += amount;
        self
    }

    pub fn bonus(mut self, amount: i32) -> Self {
        self.bonus += amount;
        self
    }

    pub fn reaction(mut self, amount: i32) -> Self {
        self.reaction += amount;
        self
    }

    pub fn movement(mut self, feet: f64) -> Self {
        self.movement += feet;
        self
    }

    pub fn hit_die(mut self, faces: u32, amount: i32) -> Self {
        *self.hit_dice.entry(faces).or_insert(0) += amount;
        self
    }

    pub fn slot(mut self, level: u8, amount: i32) -> Self {
        *self.slots.entry(level).or_insert(0) += amount;
        self
    }

    /// The cost of taking one action of `cost`.
    pub fn spend(cost: ActionCost) -> Self {
        match cost {
            ActionCost::Regular => Self::new().regular(-1),
            ActionCost::Bonus => Self::new().bonus(-1),
            ActionCost::Reaction => Self::new().reaction(-1),
            ActionCost::Movement | ActionCost::Free | ActionCost::Special => Self::new(),
        }
    }
}

/// What a character has left to spend this turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResources {
    pub regular: u32,
    pub bonus: u32,
    pub reaction: u32,
    pub movement: f64,
    pub slots: [u8; 9],
}

// ============================================================================
// Resource Pool
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcePool {
    pub hp: i32,
    pub temp_hp: i32,
    pub regular: u32,
    pub bonus: u32,
    pub reaction: u32,
    pub movement: f64,
    /// Current speed. Conditions may zero it; the stat block keeps the base.
    pub speed: f64,
    pub hit_dice: BTreeMap<DieType, u8>,
    /// Remaining slots, index 0 is 1st level.
    pub slots: [u8; 9],
    pub death_saves: DeathSaves,
    pub charges: ClassCharges,
    pub counters: BTreeMap<String, i32>,
}

impl ResourcePool {
    pub fn new(stats: &StatBlock) -> Self {
        Self {
            hp: stats.max_hp,
            temp_hp: 0,
            regular: 1,
            bonus: 1,
            reaction: 1,
            movement: stats.speed,
            speed: stats.speed,
            hit_dice: stats.hit_dice.clone(),
            slots: stats.slots,
            death_saves: DeathSaves::default(),
            charges: ClassCharges::default(),
            counters: BTreeMap::new(),
        }
    }

    /// Register counters, each starting at 1.
    pub fn add_counters<S: AsRef<str>>(&mut self, names: impl IntoIterator<Item = S>) {
        for name in names {
            self.counters.insert(name.as_ref().to_string(), 1);
        }
    }

    pub fn counter(&self, name: &str) -> i32 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn has_counter(&self, name: &str) -> bool {
        self.counters.contains_key(name)
    }

    pub fn set_counter(&mut self, name: &str, value: i32) {
        self.counters.insert(name.to_string(), value.max(0));
    }

    /// Apply a delta, clamping every counter to `0..=ceiling`.
    ///
    /// Movement cannot be gained while `movement_locked` (grappled). Hit dice
    /// of unknown sizes and slots of invalid levels are skipped. Returns the
    /// resources that changed with their new values.
    pub fn adjust(
        &mut self,
        delta: &ResourceDelta,
        stats: &StatBlock,
        movement_locked: bool,
    ) -> Vec<(String, f64)> {
        let mut changes = Vec::new();

        if delta.temp_hp != 0 {
            self.temp_hp = (self.temp_hp + delta.temp_hp).max(0);
            changes.push(("temp_hp".to_string(), self.temp_hp as f64));
        }
        for (name, counter, amount) in [
            ("regular", &mut self.regular, delta.regular),
            ("bonus", &mut self.bonus, delta.bonus),
            ("reaction", &mut self.reaction, delta.reaction),
        ] {
            if amount != 0 {
                *counter = (*counter as i64 + amount as i64).max(0) as u32;
                changes.push((name.to_string(), *counter as f64));
            }
        }
        if delta.movement != 0.0 {
            if movement_locked && delta.movement > 0.0 {
                tracing::debug!("cannot gain movement while grappled");
            } else {
                self.movement = (self.movement + delta.movement).max(0.0);
                changes.push(("movement".to_string(), self.movement));
            }
        }
        for (&faces, &amount) in &delta.hit_dice {
            let Some(die) = DieType::from_sides(faces).filter(DieType::is_hit_die) else {
                continue;
            };
            let ceiling = stats.hit_dice.get(&die).copied().unwrap_or(0) as i32;
            let current = self.hit_dice.entry(die).or_insert(0);
            *current = (*current as i32 + amount).clamp(0, ceiling) as u8;
            changes.push((format!("hit_dice_{die}"), *current as f64));
        }
        for (&level, &amount) in &delta.slots {
            if !(1..=9).contains(&level) {
                continue;
            }
            let idx = level as usize - 1;
            let ceiling = stats.slots[idx] as i32;
            self.slots[idx] = (self.slots[idx] as i32 + amount).clamp(0, ceiling) as u8;
            changes.push((format!("slot_{level}"), self.slots[idx] as f64));
        }

        changes
    }

    pub fn available(&self, cost: ActionCost) -> bool {
        match cost {
            ActionCost::Regular => self.regular > 0,
            ActionCost::Bonus => self.bonus > 0,
            ActionCost::Reaction => self.reaction > 0,
            ActionCost::Movement => self.movement > 0.0,
            ActionCost::Free | ActionCost::Special => true,
        }
    }

    pub fn slots_at(&self, level: u8) -> Result<u8, ResourceError> {
        match level {
            1..=9 => Ok(self.slots[level as usize - 1]),
            _ => Err(ResourceError::InvalidSpellLevel(level)),
        }
    }

    /// Lowest spell level at or above `min_level` with a slot left.
    pub fn next_available_slot(&self, min_level: u8) -> Result<Option<u8>, ResourceError> {
        if !(1..=9).contains(&min_level) {
            return Err(ResourceError::InvalidSpellLevel(min_level));
        }
        Ok((min_level..=9).find(|&level| self.slots[level as usize - 1] > 0))
    }

    pub fn restore_all_slots(&mut self, stats: &StatBlock) {
        self.slots = stats.slots;
    }

    /// Soak `amount` damage with temporary HP, returning what gets through.
    pub fn absorb(&mut self, amount: i32) -> i32 {
        let soaked = self.temp_hp.min(amount);
        self.temp_hp -= soaked;
        amount - soaked
    }

    /// Long-rest hit-dice recovery: half the total (at least one), largest
    /// dice first, never above each ceiling. Returns how many came back.
    pub fn recover_hit_dice(&mut self, stats: &StatBlock) -> u32 {
        let total = stats.total_hit_dice();
        if total == 0 {
            return 0;
        }
        let mut budget = (total / 2).max(1);
        let mut recovered = 0;
        for die in DieType::hit_dice().into_iter().rev() {
            let ceiling = stats.hit_dice.get(&die).copied().unwrap_or(0);
            let current = self.hit_dice.entry(die).or_insert(0);
            let gain = (ceiling.saturating_sub(*current) as u32).min(budget);
            *current += gain as u8;
            budget -= gain;
            recovered += gain;
            if budget == 0 {
                break;
            }
        }
        recovered
    }

    /// Spend one hit die of `die`. False if none remain.
    pub fn spend_hit_die(&mut self, die: DieType) -> bool {
        match self.hit_dice.get_mut(&die) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    /// Class features and counters that come back on a rest.
    pub fn refresh_features(&mut self, stats: &StatBlock, kind: RestKind) {
        self.charges.refresh(stats, kind);

        // Pact magic comes back on a short rest too.
        if kind == RestKind::Long || stats.has_class(CharacterClass::Warlock) {
            self.restore_all_slots(stats);
        }

        let prof = stats.proficiency;
        let wis = stats.modifier(Ability::Wisdom);
        for (name, value) in self.counters.iter_mut() {
            match (name.as_str(), kind) {
                (counters::PSIONIC_DICE_REGAIN, _) => *value = 1,
                (counters::PSIONIC_ENERGY, RestKind::Long) => *value = 2 * prof,
                (counters::WARDING_FLARE, RestKind::Long) => *value = wis.clamp(0, 1),
                _ => {}
            }
        }
    }

    /// Turn-start reset of the action economy and per-turn class resources.
    pub fn reset_turn(&mut self, stats: &StatBlock) {
        self.regular = 1;
        self.bonus = 1;
        self.reaction = 1;
        self.movement = self.speed;
        if stats.has_class(CharacterClass::Rogue) {
            self.charges.sneak_attack = 1;
        }
        if self.has_counter(counters::GENIES_WRATH) {
            self.set_counter(counters::GENIES_WRATH, 1);
        }
    }

    pub fn snapshot(&self) -> TurnResources {
        TurnResources {
            regular: self.regular,
            bonus: self.bonus,
            reaction: self.reaction,
            movement: self.movement,
            slots: self.slots,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caster() -> StatBlock {
        StatBlock {
            slots: [4, 3, 3, 2, 3, 0, 0, 0, 0],
            ..StatBlock::default()
        }
    }

    #[test]
    fn test_next_available_slot_is_lowest_at_or_above() {
        let stats = caster();
        let mut pool = ResourcePool::new(&stats);
        pool.slots = [2, 0, 0, 2, 3, 0, 0, 0, 0];
        assert_eq!(pool.next_available_slot(3).unwrap(), Some(4));
        assert_eq!(pool.next_available_slot(1).unwrap(), Some(1));
        assert_eq!(pool.next_available_slot(6).unwrap(), None);
        assert!(matches!(
            pool.next_available_slot(0),
            Err(ResourceError::InvalidSpellLevel(0))
        ));
    }

    #[test]
    fn test_adjust_clamps_to_ceilings() {
        let mut stats = caster();
        stats.hit_dice.insert(DieType::D8, 3);
        let mut pool = ResourcePool::new(&stats);

        pool.adjust(
            &ResourceDelta::new()
                .slot(1, 5)
                .slot(2, -10)
                .hit_die(8, 4)
                .hit_die(6, 2)
                .regular(-3),
            &stats,
            false,
        );
        assert_eq!(pool.slots[0], 4);
        assert_eq!(pool.slots[1], 0);
        assert_eq!(pool.hit_dice[&DieType::D8], 3);
        assert_eq!(pool.hit_dice[&DieType::D6], 0);
        assert_eq!(pool.regular, 0);
    }

    #[test]
    fn test_adjust_skips_invalid_keys() {
        let stats = caster();
        let mut pool = ResourcePool::new(&stats);
        let changes = pool.adjust(
            &ResourceDelta::new().slot(12, 1).hit_die(20, 1),
            &stats,
            false,
        );
        assert!(changes.is_empty());
    }

    #[test]
    fn test_grappled_cannot_gain_movement() {
        let stats = StatBlock::default();
        let mut pool = ResourcePool::new(&stats);
        pool.movement = 0.0;
        pool.adjust(&ResourceDelta::new().movement(10.0), &stats, true);
        assert_eq!(pool.movement, 0.0);
        pool.adjust(&ResourceDelta::new().movement(10.0), &stats, false);
        assert_eq!(pool.movement, 10.0);
    }

    #[test]
    fn test_absorb_uses_temp_hp_first() {
        let stats = StatBlock::default();
        let mut pool = ResourcePool::new(&stats);
        pool.temp_hp = 5;
        assert_eq!(pool.absorb(3), 0);
        assert_eq!(pool.temp_hp, 2);
        assert_eq!(pool.absorb(7), 5);
        assert_eq!(pool.temp_hp, 0);
    }

    #[test]
    fn test_recover_hit_dice_largest_first() {
        let mut stats = StatBlock::default();
        stats.hit_dice.insert(DieType::D10, 2);
        stats.hit_dice.insert(DieType::D8, 4);
        let mut pool = ResourcePool::new(&stats);
        pool.hit_dice.insert(DieType::D10, 1);
        pool.hit_dice.insert(DieType::D8, 0);

        // Six total dice: three come back, one d10 then two d8.
        assert_eq!(pool.recover_hit_dice(&stats), 3);
        assert_eq!(pool.hit_dice[&DieType::D10], 2);
        assert_eq!(pool.hit_dice[&DieType::D8], 2);
    }

    #[test]
    fn test_recover_hit_dice_at_least_one() {
        let mut stats = StatBlock::default();
        stats.hit_dice.insert(DieType::D6, 1);
        let mut pool = ResourcePool::new(&stats);
        pool.hit_dice.insert(DieType::D6, 0);
        assert_eq!(pool.recover_hit_dice(&stats), 1);
    }

    #[test]
    fn test_long_rest_refresh_by_class() {
        let mut stats = StatBlock::default();
        stats.class_levels.insert(CharacterClass::Cleric, 6);
        stats.class_levels.insert(CharacterClass::Fighter, 17);
        stats.class_levels.insert(CharacterClass::Bard, 1);
        stats.scores.charisma = 8;
        stats.slots = [2, 0, 0, 0, 0, 0, 0, 0, 0];
        stats.proficiency = 3;
        stats.scores.wisdom = 16;
        let mut pool = ResourcePool::new(&stats);
        pool.slots = [0; 9];
        pool.add_counters([counters::PSIONIC_ENERGY, counters::WARDING_FLARE]);

        pool.refresh_features(&stats, RestKind::Long);
        assert_eq!(pool.charges.channel_divinity, 2);
        assert_eq!(pool.charges.second_wind, 1);
        assert_eq!(pool.charges.action_surge, 2);
        assert_eq!(pool.charges.bardic_inspiration, 1);
        assert_eq!(pool.slots[0], 2);
        assert_eq!(pool.counter(counters::PSIONIC_ENERGY), 6);
        assert_eq!(pool.counter(counters::WARDING_FLARE), 1);
    }

    #[test]
    fn test_short_rest_skips_long_rest_features() {
        let mut stats = StatBlock::default();
        stats.class_levels.insert(CharacterClass::Bard, 5);
        stats.slots = [2, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut pool = ResourcePool::new(&stats);
        pool.slots = [0; 9];
        pool.refresh_features(&stats, RestKind::Short);
        assert_eq!(pool.charges.bardic_inspiration, 0);
        assert_eq!(pool.slots[0], 0);
    }

    #[test]
    fn test_slots_come_back_by_rest_kind() {
        let mut wizard = StatBlock::default();
        wizard.class_levels.insert(CharacterClass::Wizard, 3);
        wizard.slots = [4, 2, 0, 0, 0, 0, 0, 0, 0];
        let mut pool = ResourcePool::new(&wizard);
        pool.slots = [1, 0, 0, 0, 0, 0, 0, 0, 0];
        pool.refresh_features(&wizard, RestKind::Short);
        assert_eq!(pool.slots[0], 1);
        pool.refresh_features(&wizard, RestKind::Long);
        assert_eq!(pool.slots, wizard.slots);

        let mut warlock = StatBlock::default();
        warlock.class_levels.insert(CharacterClass::Warlock, 2);
        warlock.slots = [2, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut pool = ResourcePool::new(&warlock);
        pool.slots = [0; 9];
        pool.refresh_features(&warlock, RestKind::Short);
        assert_eq!(pool.slots[0], 2);
    }

    #[test]
    fn test_reset_turn() {
        let mut stats = StatBlock::default();
        stats.class_levels.insert(CharacterClass::Rogue, 3);
        let mut pool = ResourcePool::new(&stats);
        pool.add_counters([counters::GENIES_WRATH]);
        pool.set_counter(counters::GENIES_WRATH, 0);
        pool.regular = 0;
        pool.movement = 0.0;
        pool.speed = 25.0;

        pool.reset_turn(&stats);
        let snap = pool.snapshot();
        assert_eq!(snap.regular, 1);
        assert_eq!(snap.movement, 25.0);
        assert_eq!(pool.charges.sneak_attack, 1);
        assert_eq!(pool.counter(counters::GENIES_WRATH), 1);
    }

    #[test]
    fn test_death_saves_cap_at_three() {
        let mut saves = DeathSaves::default();
        assert!(!saves.add_failures(2));
        assert!(saves.add_failures(2));
        assert_eq!(saves.failures, 3);
        saves.reset();
        assert_eq!(saves, DeathSaves::default());
    }
}
