//! Testing utilities for combat scenarios.
//!
//! This module provides:
//! - sample character templates (fighter, rogue, cleric, goblin)
//! - `TestHarness`: a roster, the built-in tables and a scripted referee
//! - assertion helpers for HP and conditions

use crate::character::{Bias, Character, Team};
use crate::conditions::Condition;
use crate::config::CharacterTemplate;
use crate::dice::DiceSpec;
use crate::rules::{ActionArgs, ActionError, Resolution, Roster, RulesEngine};
use crate::stats::{Ability, CharacterClass, MaxHp, StatPatch};
use crate::tables::{TableError, Tables};
use crate::trace::{Referee, TraceEvent};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// Sample characters
// ============================================================================

fn class(class: CharacterClass, level: u8) -> Option<BTreeMap<CharacterClass, u8>> {
    Some(BTreeMap::from([(class, level)]))
}

/// Level 3 fighter with a longsword: AC 16, 28 HP.
pub fn sample_fighter(name: &str) -> CharacterTemplate {
    CharacterTemplate::new(name, Team::Pc)
        .with_stats(StatPatch {
            level: Some(3),
            class_level: class(CharacterClass::Fighter, 3),
            prof: Some(2),
            strength: Some(16),
            dexterity: Some(12),
            constitution: Some(14),
            ac: Some(16),
            max_hp: Some(MaxHp::Fixed(28)),
            hit_dice: Some(vec![DiceSpec::new(3, 10, 0)]),
            saves: Some(BTreeSet::from([Ability::Strength, Ability::Constitution])),
            ..StatPatch::default()
        })
        .with_attack("longsword", Bias::HIGHEST)
        .with_category("fighter")
}

/// Level 3 rogue with a shortsword and a shortbow: AC 14, 20 HP.
pub fn sample_rogue(name: &str) -> CharacterTemplate {
    CharacterTemplate::new(name, Team::Pc)
        .with_stats(StatPatch {
            level: Some(3),
            class_level: class(CharacterClass::Rogue, 3),
            prof: Some(2),
            strength: Some(10),
            dexterity: Some(16),
            constitution: Some(12),
            ac: Some(14),
            max_hp: Some(MaxHp::Fixed(20)),
            hit_dice: Some(vec![DiceSpec::new(3, 8, 0)]),
            saves: Some(BTreeSet::from([Ability::Dexterity, Ability::Intelligence])),
            tools: Some(vec!["shortbow".to_string()]),
            ..StatPatch::default()
        })
        .with_attack("shortsword", Bias::HIGHEST)
        .with_attack("shortbow", Bias::new(8).unwrap_or(Bias::RARE))
        .with_category("two_weapon_fighting")
}

/// Level 3 cleric with a mace and four 1st-level slots: AC 18, 24 HP.
pub fn sample_cleric(name: &str) -> CharacterTemplate {
    CharacterTemplate::new(name, Team::Pc)
        .with_stats(StatPatch {
            level: Some(3),
            class_level: class(CharacterClass::Cleric, 3),
            prof: Some(2),
            strength: Some(12),
            constitution: Some(14),
            wisdom: Some(16),
            ac: Some(18),
            max_hp: Some(MaxHp::Fixed(24)),
            hit_dice: Some(vec![DiceSpec::new(3, 8, 0)]),
            saves: Some(BTreeSet::from([Ability::Wisdom, Ability::Charisma])),
            spellcast: Some(Ability::Wisdom),
            slots: Some(BTreeMap::from([(1, 4), (2, 2)])),
            ..StatPatch::default()
        })
        .with_attack("mace", Bias::HIGHEST)
        .with_category("cleric")
}

/// A goblin with a scimitar: AC 15, 7 HP, dies at 0 HP.
pub fn sample_goblin(name: &str) -> CharacterTemplate {
    CharacterTemplate::new(name, Team::Enemy)
        .with_stats(StatPatch {
            strength: Some(8),
            dexterity: Some(14),
            ac: Some(15),
            max_hp: Some(MaxHp::Fixed(7)),
            prof: Some(2),
            tools: Some(vec!["scimitar".to_string()]),
            ..StatPatch::default()
        })
        .with_attack("scimitar", Bias::HIGHEST)
}

// ============================================================================
// Test Harness
// ============================================================================

/// A roster under test with dice chosen by the test.
pub struct TestHarness {
    pub roster: Roster,
    pub referee: Referee,
    tables: Tables,
}

impl TestHarness {
    /// An empty harness over the built-in tables. Rolls past the script
    /// come up 1.
    pub fn new() -> Self {
        Self::with_rolls([])
    }

    pub fn with_rolls(faces: impl IntoIterator<Item = u32>) -> Self {
        Self {
            roster: Roster::new(),
            referee: Referee::scripted(faces),
            tables: Tables::builtin().cloned().unwrap_or_default(),
        }
    }

    /// Replace the dice script. The journal starts over.
    pub fn script(&mut self, faces: impl IntoIterator<Item = u32>) -> &mut Self {
        self.referee = Referee::scripted(faces);
        self
    }

    /// Build a character from a template and add it.
    pub fn spawn(&mut self, template: &CharacterTemplate) -> Result<&mut Character, TableError> {
        let character = Character::from_template(template, &self.tables, &mut self.referee)?;
        Ok(self.add(character))
    }

    pub fn add(&mut self, character: Character) -> &mut Character {
        self.roster.insert(character)
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    /// Resolve one action through the rules engine.
    pub fn resolve(
        &mut self,
        source: &str,
        action: &str,
        targets: &[&str],
        args: &ActionArgs,
    ) -> Result<Resolution, ActionError> {
        let targets: Vec<String> = targets.iter().map(|t| t.to_string()).collect();
        RulesEngine::new(&self.tables).resolve(
            &mut self.roster,
            source,
            action,
            &targets,
            args,
            &mut self.referee,
        )
    }

    pub fn character(&self, name: &str) -> Option<&Character> {
        self.roster.by_name(name)
    }

    pub fn character_mut(&mut self, name: &str) -> Option<&mut Character> {
        self.roster.by_name_mut(name)
    }

    /// Current and maximum HP.
    pub fn hp(&self, name: &str) -> Option<(i32, i32)> {
        self.character(name)
            .map(|c| (c.resources.hp, c.stats.max_hp))
    }

    pub fn events(&self) -> &[TraceEvent] {
        self.referee.journal()
    }

    /// How many recorded events match.
    pub fn count_events(&self, pred: impl Fn(&TraceEvent) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

#[track_caller]
fn expect_character<'h>(harness: &'h TestHarness, name: &str) -> &'h Character {
    match harness.character(name) {
        Some(character) => character,
        None => panic!("Expected a character named '{name}'"),
    }
}

/// Assert a character's HP is at expected values.
#[track_caller]
pub fn assert_hp(harness: &TestHarness, name: &str, current: i32, max: i32) {
    let character = expect_character(harness, name);
    let actual = (character.resources.hp, character.stats.max_hp);
    assert_eq!(
        actual,
        (current, max),
        "Expected {name} at HP {current}/{max}, got {}/{}",
        actual.0,
        actual.1
    );
}

#[track_caller]
pub fn assert_has_condition(harness: &TestHarness, name: &str, condition: Condition) {
    let character = expect_character(harness, name);
    assert!(
        character.has_condition(condition),
        "Expected {name} to have {condition}, has {:?}",
        character.conditions.names()
    );
}

#[track_caller]
pub fn assert_lacks_condition(harness: &TestHarness, name: &str, condition: Condition) {
    let character = expect_character(harness, name);
    assert!(
        !character.has_condition(condition),
        "Expected {name} NOT to have {condition}"
    );
}
