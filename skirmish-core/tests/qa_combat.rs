//! QA tests for attacks and spells resolved through the rules engine.
//!
//! Every test scripts its dice, so outcomes are exact.

use skirmish_core::character::Bias;
use skirmish_core::config::CharacterTemplate;
use skirmish_core::stats::{MaxHp, StatPatch};
use skirmish_core::testing::{
    assert_has_condition, assert_hp, sample_cleric, sample_fighter, sample_goblin, sample_rogue,
    TestHarness,
};
use skirmish_core::{
    Ability, ActionArgs, ActionCost, Advantage, Character, CharacterClass, Condition, DamageType,
    StatBlock, Team, TraceEvent,
};
use std::collections::BTreeMap;

/// A target that is easy to hit and hard to kill.
fn dummy(name: &str, ac: i32) -> Character {
    let mut stats = StatBlock::default();
    stats.armor_class = ac;
    stats.max_hp = 50;
    Character::new(name, Team::Enemy, stats)
}

fn with_action(harness: &TestHarness, mut character: Character, action: &str) -> Character {
    let action = harness.tables().action(action).unwrap().clone();
    character.actions.insert(action);
    character
}

// =============================================================================
// Hit rolls
// =============================================================================

#[test]
fn test_proficiency_all_always_applies() {
    let mut harness = TestHarness::with_rolls([10, 10]);
    let mut stats = StatBlock::default();
    stats.proficiency = 2;
    let mut brawler = Character::new("brawler", Team::Pc, stats);
    brawler.attacks.insert("mace".to_string(), Bias::RARE);
    let brawler = with_action(&harness, brawler, "attack");
    harness.add(brawler);
    harness.add(dummy("dummy", 12));

    // Unarmed strikes are open to everyone: 10 + 2 meets AC 12.
    let resolution = harness
        .resolve("brawler", "attack", &["dummy"], &ActionArgs::new().with_attack("unarmed"))
        .unwrap();
    assert_eq!(resolution.outcomes["dummy"], "now has 49 HP");

    // A mace needs a proficiency the brawler lacks: 10 misses AC 12.
    let resolution = harness
        .resolve("brawler", "attack", &["dummy"], &ActionArgs::new().with_attack("mace"))
        .unwrap();
    assert_eq!(resolution.outcomes["dummy"], "now has 49 HP");
}

#[test]
fn test_critical_doubles_dice_only() {
    let mut harness = TestHarness::with_rolls([20, 4, 6]);
    harness.spawn(&sample_fighter("Brom")).unwrap();
    harness.add(dummy("dummy", 30));

    let resolution = harness
        .resolve("Brom", "attack", &["dummy"], &ActionArgs::new().with_attack("longsword"))
        .unwrap();
    // 2d8 rolls 4 + 6, plus str 3 once.
    assert_eq!(resolution.outcomes["dummy"], "now has 37 HP");
    assert_eq!(
        harness.count_events(|e| matches!(e, TraceEvent::AttackRolled { critical: true, hit: true, .. })),
        1
    );
}

#[test]
fn test_natural_one_misses() {
    let mut harness = TestHarness::with_rolls([1]);
    harness.spawn(&sample_fighter("Brom")).unwrap();
    harness.add(dummy("dummy", 1));

    let resolution = harness
        .resolve("Brom", "attack", &["dummy"], &ActionArgs::new().with_attack("longsword"))
        .unwrap();
    assert_eq!(resolution.outcomes["dummy"], "now has 50 HP");
}

// =============================================================================
// Damage
// =============================================================================

#[test]
fn test_resistance_halves_damage() {
    let mut harness = TestHarness::with_rolls([15, 8]);
    harness.spawn(&sample_fighter("Brom")).unwrap();
    let mut skeleton = dummy("skeleton", 10);
    skeleton.stats.resistances.insert(DamageType::Slashing);
    harness.add(skeleton);

    harness
        .resolve("Brom", "attack", &["skeleton"], &ActionArgs::new().with_attack("longsword"))
        .unwrap();
    // 8 + 3 = 11, halved down.
    assert_hp(&harness, "skeleton", 45, 50);
}

#[test]
fn test_offhand_attack_drops_positive_modifier() {
    let mut harness = TestHarness::with_rolls([15, 4]);
    harness.spawn(&sample_rogue("Vex")).unwrap();
    harness.add(dummy("dummy", 10));

    let resolution = harness
        .resolve("Vex", "offhand_attack", &["dummy"], &ActionArgs::new().with_attack("shortsword"))
        .unwrap();
    assert_eq!(resolution.cost, ActionCost::Bonus);
    assert_eq!(resolution.outcomes["dummy"], "now has 46 HP");
    assert_eq!(harness.character("Vex").unwrap().resources.bonus, 0);
}

#[test]
fn test_sneak_attack_once_per_turn() {
    // Every die shows 3, so the order of damage dice does not matter.
    let mut harness = TestHarness::with_rolls([15, 15, 3, 3, 3, 15, 15, 3]);
    harness.spawn(&sample_rogue("Vex")).unwrap();
    harness.add(dummy("dummy", 5));
    let vex = harness.roster.by_name_mut("Vex").unwrap();
    vex.start_turn(&mut harness.referee);
    assert_eq!(harness.character("Vex").unwrap().resources.charges.sneak_attack, 1);

    let args = ActionArgs::new()
        .with_attack("shortsword")
        .with_advantage(Advantage::Advantage);
    harness.resolve("Vex", "attack", &["dummy"], &args).unwrap();
    // 1d6 + 2d6 sneak + dex 3.
    assert_hp(&harness, "dummy", 38, 50);

    harness.resolve("Vex", "attack", &["dummy"], &args).unwrap();
    assert_hp(&harness, "dummy", 32, 50);
}

#[test]
fn test_genie_patron_adds_wrath_once() {
    let mut harness = TestHarness::with_rolls([15, 15]);
    let template = CharacterTemplate::new("Zar", Team::Pc)
        .with_stats(StatPatch {
            class_level: Some(BTreeMap::from([(CharacterClass::Warlock, 1)])),
            prof: Some(2),
            ..StatPatch::default()
        })
        .with_property(serde_json::from_str(r#"{"patron": "efreeti"}"#).unwrap());
    harness.spawn(&template).unwrap();
    harness.add(dummy("dummy", 10));
    assert_eq!(
        harness.character("Zar").unwrap().resources.counter("genies_wrath"),
        1
    );

    let args = ActionArgs::new().with_attack("unarmed");
    harness.resolve("Zar", "attack", &["dummy"], &args).unwrap();
    // 1 bludgeoning + 2 fire from the wrath.
    assert_hp(&harness, "dummy", 47, 50);

    harness.resolve("Zar", "attack", &["dummy"], &args).unwrap();
    assert_hp(&harness, "dummy", 46, 50);
}

// =============================================================================
// Spells
// =============================================================================

#[test]
fn test_guiding_bolt_spends_lowest_slot() {
    // 15 + 2 prof + 3 wis hits AC 15; 4d6 all ones.
    let mut harness = TestHarness::with_rolls([15, 1, 1, 1, 1]);
    harness.spawn(&sample_cleric("Ilsa")).unwrap();
    harness.spawn(&sample_goblin("goblin")).unwrap();

    let resolution = harness
        .resolve("Ilsa", "cast_guiding_bolt", &["goblin"], &ActionArgs::new())
        .unwrap();
    assert_eq!(resolution.outcomes["goblin"], "now has 3 HP");
    let ilsa = harness.character("Ilsa").unwrap();
    assert_eq!(ilsa.resources.slots[0], 3);
    assert_eq!(ilsa.resources.slots[1], 2);
    assert_eq!(ilsa.resources.regular, 0);
}

#[test]
fn test_magic_missile_upcast_adds_darts() {
    let mut harness = TestHarness::with_rolls([1, 1, 1, 1]);
    let mut stats = StatBlock::default();
    stats.spellcasting = Some(Ability::Intelligence);
    stats.slots = [0, 1, 0, 0, 0, 0, 0, 0, 0];
    let wizard = Character::new("Mira", Team::Pc, stats);
    let wizard = with_action(&harness, wizard, "cast_magic_missile");
    harness.add(wizard);
    harness.add(dummy("dummy", 10));

    // The only slot left is 2nd level: four darts of 1d4+1.
    let resolution = harness
        .resolve("Mira", "cast_magic_missile", &["dummy"], &ActionArgs::new())
        .unwrap();
    assert_eq!(resolution.outcomes["dummy"], "now has 42 HP");
    assert_eq!(harness.character("Mira").unwrap().resources.slots[1], 0);
}

#[test]
fn test_no_slot_fizzles_without_spending() {
    let mut harness = TestHarness::new();
    harness.spawn(&sample_cleric("Ilsa")).unwrap();
    harness.character_mut("Ilsa").unwrap().resources.slots = [0; 9];

    let resolution = harness
        .resolve("Ilsa", "cast_cure_wounds", &["Ilsa"], &ActionArgs::new())
        .unwrap();
    assert_eq!(resolution.fizzled.as_deref(), Some("no spell slot"));
    assert_eq!(harness.character("Ilsa").unwrap().resources.regular, 1);
    assert_eq!(
        harness.count_events(|e| matches!(e, TraceEvent::ActionFizzled { .. })),
        1
    );
}

#[test]
fn test_shillelagh_enchants_quarterstaff() {
    let mut harness = TestHarness::with_rolls([15, 5]);
    let druid = CharacterTemplate::new("Fern", Team::Pc)
        .with_stats(StatPatch {
            class_level: Some(BTreeMap::from([(CharacterClass::Druid, 2)])),
            prof: Some(2),
            wisdom: Some(16),
            max_hp: Some(MaxHp::Fixed(15)),
            spellcast: Some(Ability::Wisdom),
            ..StatPatch::default()
        })
        .with_attack("quarterstaff", Bias::HIGHEST)
        .with_category("druid");
    harness.spawn(&druid).unwrap();
    harness.add(dummy("dummy", 10));

    let resolution = harness
        .resolve("Fern", "cast_shillelagh", &["Fern"], &ActionArgs::new())
        .unwrap();
    assert_eq!(resolution.outcomes["Fern"], "has shillelagh on their club/quarterstaff");
    assert_has_condition(&harness, "Fern", Condition::Shillelagh);

    let attack = harness.tables().action("attack").unwrap().clone();
    harness.character_mut("Fern").unwrap().actions.insert(attack);
    harness
        .resolve("Fern", "attack", &["dummy"], &ActionArgs::new().with_attack("quarterstaff"))
        .unwrap();
    // 1d8 + wis 3 instead of 1d6 + str 0.
    assert_hp(&harness, "dummy", 42, 50);
    assert!(harness.count_events(|e| matches!(
        e,
        TraceEvent::AttackRolled { attack, .. } if attack == "quarterstaff_shillelagh"
    )) == 1);
}
