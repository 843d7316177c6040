//! QA tests for dropping to 0 HP, death saves and stabilizing.

use skirmish_core::resources::ResourceError;
use skirmish_core::testing::{assert_has_condition, assert_hp, assert_lacks_condition, TestHarness};
use skirmish_core::{
    ActionArgs, ActionCost, Character, Condition, DamageType, LifeState, StatBlock, Team,
    TraceEvent,
};
use std::collections::BTreeMap;

fn adventurer(name: &str, team: Team) -> Character {
    let mut stats = StatBlock::default();
    stats.max_hp = 12;
    Character::new(name, team, stats)
}

fn slashing(amount: i32) -> BTreeMap<DamageType, i32> {
    BTreeMap::from([(DamageType::Slashing, amount)])
}

/// Put `name` at 0 HP and dying.
fn knock_out(harness: &mut TestHarness, name: &str) {
    let character = harness.roster.by_name_mut(name).unwrap();
    character
        .take_damage(&slashing(12), false, &mut harness.referee)
        .unwrap();
    assert_eq!(character.life_state(), LifeState::Dying);
}

// =============================================================================
// Dropping to 0 HP
// =============================================================================

#[test]
fn test_massive_damage_kills_outright() {
    let mut harness = TestHarness::new();
    harness.add(adventurer("Ana", Team::Pc));

    let hero = harness.roster.by_name_mut("Ana").unwrap();
    let (dealt, hp) = hero
        .take_damage(&slashing(30), false, &mut harness.referee)
        .unwrap();
    assert_eq!((dealt, hp), (30, 0));
    assert_has_condition(&harness, "Ana", Condition::Dead);
    assert_lacks_condition(&harness, "Ana", Condition::Dying);
}

#[test]
fn test_player_at_zero_is_dying() {
    let mut harness = TestHarness::new();
    harness.add(adventurer("Ana", Team::Pc));
    knock_out(&mut harness, "Ana");

    let hero = harness.character("Ana").unwrap();
    assert_eq!(hero.resources.hp, 0);
    assert_eq!(hero.resources.death_saves.successes, 0);
    assert_eq!(hero.resources.death_saves.failures, 0);
    assert_has_condition(&harness, "Ana", Condition::Unconscious);
}

#[test]
fn test_npc_dies_at_zero() {
    let mut harness = TestHarness::new();
    harness.add(adventurer("rat", Team::Enemy));

    let rat = harness.roster.by_name_mut("rat").unwrap();
    rat.take_damage(&slashing(12), false, &mut harness.referee)
        .unwrap();
    assert_eq!(rat.life_state(), LifeState::Dead);
    assert_eq!(
        harness.count_events(|e| matches!(e, TraceEvent::CharacterDied { .. })),
        1
    );
}

#[test]
fn test_important_npc_makes_death_saves() {
    let mut harness = TestHarness::new();
    let mut boss = adventurer("boss", Team::Enemy);
    boss.stats.properties.important = true;
    harness.add(boss);

    knock_out(&mut harness, "boss");
}

#[test]
fn test_zero_hp_has_one_death_state() {
    let mut harness = TestHarness::new();
    harness.add(adventurer("Ana", Team::Pc));
    harness.add(adventurer("rat", Team::Enemy));
    knock_out(&mut harness, "Ana");
    let rat = harness.roster.by_name_mut("rat").unwrap();
    rat.take_damage(&slashing(20), false, &mut harness.referee)
        .unwrap();

    for character in harness.roster.iter() {
        let held = [Condition::Dying, Condition::Dead]
            .into_iter()
            .filter(|c| character.has_condition(*c))
            .count();
        assert_eq!(held, 1, "{} holds {held} death states", character.name);
    }
}

#[test]
fn test_damage_at_zero_adds_failures() {
    let mut harness = TestHarness::new();
    harness.add(adventurer("Ana", Team::Pc));
    knock_out(&mut harness, "Ana");

    let hero = harness.roster.by_name_mut("Ana").unwrap();
    hero.take_damage(&slashing(3), true, &mut harness.referee)
        .unwrap();
    assert_eq!(hero.resources.death_saves.failures, 2);
    hero.take_damage(&slashing(3), false, &mut harness.referee)
        .unwrap();
    assert_eq!(hero.life_state(), LifeState::Dead);
}

// =============================================================================
// Death saves
// =============================================================================

#[test]
fn test_death_save_requires_dying() {
    let mut harness = TestHarness::new();
    harness.add(adventurer("Ana", Team::Pc));

    let hero = harness.roster.by_name_mut("Ana").unwrap();
    let result = hero.death_save(&mut harness.referee);
    assert!(matches!(result, Err(ResourceError::NotDying(_))));
}

#[test]
fn test_natural_twenty_wakes_up() {
    let mut harness = TestHarness::with_rolls([20]);
    harness.add(adventurer("Ana", Team::Pc));
    knock_out(&mut harness, "Ana");

    let hero = harness.roster.by_name_mut("Ana").unwrap();
    hero.death_save(&mut harness.referee).unwrap();
    assert_eq!(hero.life_state(), LifeState::Stable);
    assert_hp(&harness, "Ana", 1, 12);
    assert_lacks_condition(&harness, "Ana", Condition::Unconscious);
}

#[test]
fn test_three_successes_stabilize() {
    let mut harness = TestHarness::with_rolls([12, 3, 15, 10]);
    harness.add(adventurer("Ana", Team::Pc));
    knock_out(&mut harness, "Ana");

    let hero = harness.roster.by_name_mut("Ana").unwrap();
    for _ in 0..4 {
        hero.death_save(&mut harness.referee).unwrap();
    }
    assert_eq!(hero.life_state(), LifeState::Stabilized);
    assert_eq!(hero.resources.death_saves.successes, 3);
    assert_eq!(hero.resources.death_saves.failures, 1);
    assert_lacks_condition(&harness, "Ana", Condition::Dying);
    assert_has_condition(&harness, "Ana", Condition::Unconscious);

    // Stabilized characters roll nothing more.
    let hero = harness.roster.by_name_mut("Ana").unwrap();
    hero.death_save(&mut harness.referee).unwrap();
    assert_eq!(hero.resources.death_saves.successes, 3);
}

/// How many of dying, stabilized and dead `name` holds.
fn death_states(harness: &TestHarness, name: &str) -> usize {
    let character = harness.character(name).unwrap();
    [Condition::Dying, Condition::Stabilized, Condition::Dead]
        .into_iter()
        .filter(|c| character.has_condition(*c))
        .count()
}

#[test]
fn test_one_death_state_through_stabilizing_and_back() {
    let mut harness = TestHarness::with_rolls([10, 11, 12]);
    harness.add(adventurer("Ana", Team::Pc));
    knock_out(&mut harness, "Ana");
    assert_eq!(death_states(&harness, "Ana"), 1);

    for _ in 0..3 {
        let hero = harness.roster.by_name_mut("Ana").unwrap();
        hero.death_save(&mut harness.referee).unwrap();
        assert_eq!(death_states(&harness, "Ana"), 1);
    }
    assert_has_condition(&harness, "Ana", Condition::Stabilized);
    assert_lacks_condition(&harness, "Ana", Condition::Dying);

    // A crit at 0 HP strips stabilized and keeps the tally.
    let hero = harness.roster.by_name_mut("Ana").unwrap();
    hero.take_damage(&slashing(2), true, &mut harness.referee)
        .unwrap();
    assert_eq!(hero.life_state(), LifeState::Dying);
    assert_eq!(hero.resources.death_saves.successes, 3);
    assert_eq!(hero.resources.death_saves.failures, 2);
    assert_eq!(death_states(&harness, "Ana"), 1);
    assert_lacks_condition(&harness, "Ana", Condition::Stabilized);
    assert_has_condition(&harness, "Ana", Condition::Unconscious);

    let hero = harness.roster.by_name_mut("Ana").unwrap();
    hero.take_damage(&slashing(2), false, &mut harness.referee)
        .unwrap();
    assert_eq!(hero.life_state(), LifeState::Dead);
    assert_eq!(death_states(&harness, "Ana"), 1);
}

#[test]
fn test_natural_one_counts_twice() {
    let mut harness = TestHarness::with_rolls([1, 5]);
    harness.add(adventurer("Ana", Team::Pc));
    knock_out(&mut harness, "Ana");

    let hero = harness.roster.by_name_mut("Ana").unwrap();
    hero.death_save(&mut harness.referee).unwrap();
    assert_eq!(hero.resources.death_saves.failures, 2);
    hero.death_save(&mut harness.referee).unwrap();
    assert_eq!(hero.life_state(), LifeState::Dead);
}

#[test]
fn test_dying_character_is_forced_to_save() {
    let mut harness = TestHarness::new();
    let mut hero = adventurer("Ana", Team::Pc);
    let tables = harness.tables().clone();
    for name in ["attack", "dodge", "death_save", "move"] {
        hero.actions.insert(tables.action(name).unwrap().clone());
    }
    harness.add(hero);
    knock_out(&mut harness, "Ana");

    let hero = harness.character("Ana").unwrap();
    let mut referee = skirmish_core::Referee::seeded(3);
    assert_eq!(
        hero.choose_action(ActionCost::Regular, &mut referee).as_deref(),
        Some("death_save")
    );
    assert_eq!(hero.choose_action(ActionCost::Movement, &mut referee), None);
}

// =============================================================================
// Getting back up
// =============================================================================

#[test]
fn test_healing_clears_dying() {
    let mut harness = TestHarness::with_rolls([4]);
    harness.add(adventurer("Ana", Team::Pc));
    knock_out(&mut harness, "Ana");
    harness
        .roster
        .by_name_mut("Ana")
        .unwrap()
        .death_save(&mut harness.referee)
        .unwrap();

    let hero = harness.roster.by_name_mut("Ana").unwrap();
    assert_eq!(hero.heal_hp(5, &mut harness.referee).unwrap(), 5);
    assert_eq!(hero.life_state(), LifeState::Stable);
    assert_eq!(hero.resources.death_saves.failures, 0);
}

#[test]
fn test_dead_cannot_be_healed() {
    let mut harness = TestHarness::new();
    harness.add(adventurer("rat", Team::Enemy));

    let rat = harness.roster.by_name_mut("rat").unwrap();
    rat.take_damage(&slashing(12), false, &mut harness.referee)
        .unwrap();
    assert!(matches!(
        rat.heal_hp(5, &mut harness.referee),
        Err(ResourceError::DeadCharacter(_))
    ));
}

#[test]
fn test_stabilize_action_on_dying_ally() {
    let mut harness = TestHarness::new();
    let mut medic = adventurer("Bo", Team::Pc);
    let stabilize = harness.tables().action("stabilize").unwrap().clone();
    medic.actions.insert(stabilize);
    harness.add(medic);
    harness.add(adventurer("Ana", Team::Pc));
    knock_out(&mut harness, "Ana");

    let resolution = harness
        .resolve("Bo", "stabilize", &["Ana"], &ActionArgs::new())
        .unwrap();
    assert_eq!(resolution.outcomes["Ana"], "now stabilized");
    assert_eq!(
        harness.character("Ana").unwrap().life_state(),
        LifeState::Stabilized
    );
    assert_eq!(death_states(&harness, "Ana"), 1);
}
