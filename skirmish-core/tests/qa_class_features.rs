//! QA tests for class features: fighter, cleric, druid, monk and the
//! juggernaut's unstoppable.

use skirmish_core::character::Bias;
use skirmish_core::testing::{
    assert_has_condition, assert_hp, assert_lacks_condition, sample_cleric, sample_fighter,
    sample_goblin, TestHarness,
};
use skirmish_core::{
    ActionArgs, Character, CharacterClass, Condition, DiceSpec, StatBlock, Team,
};

fn dummy(name: &str) -> Character {
    let mut stats = StatBlock::default();
    stats.armor_class = 10;
    stats.max_hp = 50;
    Character::new(name, Team::Enemy, stats)
}

// =============================================================================
// FIGHTER
// =============================================================================

#[test]
fn test_second_wind_heals_once() {
    // 1d10 rolls 6, + fighter level 3.
    let mut harness = TestHarness::with_rolls([6]);
    harness.spawn(&sample_fighter("Brom")).unwrap();
    harness.character_mut("Brom").unwrap().resources.hp = 10;

    let resolution = harness
        .resolve("Brom", "second_wind", &["Brom"], &ActionArgs::new())
        .unwrap();
    assert_eq!(resolution.outcomes["Brom"], "now has 19 HP");
    assert_hp(&harness, "Brom", 19, 28);

    let resolution = harness
        .resolve("Brom", "second_wind", &["Brom"], &ActionArgs::new())
        .unwrap();
    assert_eq!(resolution.fizzled.as_deref(), Some("no second wind left"));
}

#[test]
fn test_short_rest_spends_hit_dice_and_restores_second_wind() {
    // Two d10 hit dice roll 4 and 7, each + con 2.
    let mut harness = TestHarness::with_rolls([4, 7]);
    harness.spawn(&sample_fighter("Brom")).unwrap();
    let brom = harness.character_mut("Brom").unwrap();
    brom.resources.hp = 5;
    brom.resources.charges.second_wind = 0;

    let args = ActionArgs::new().with_hit_dice(vec![DiceSpec::new(2, 10, 0)]);
    let resolution = harness
        .resolve("Brom", "short_rest", &["Brom"], &args)
        .unwrap();
    assert_eq!(resolution.outcomes["Brom"], "regained 15 HP");
    assert_hp(&harness, "Brom", 20, 28);

    let brom = harness.character("Brom").unwrap();
    assert_eq!(brom.resources.charges.second_wind, 1);
    assert_eq!(brom.resources.hit_dice.values().sum::<u8>(), 1);
}

#[test]
fn test_short_rest_rejects_non_hit_die() {
    let mut harness = TestHarness::new();
    harness.spawn(&sample_fighter("Brom")).unwrap();

    let args = ActionArgs::new().with_hit_dice(vec![DiceSpec::new(1, 20, 0)]);
    let result = harness.resolve("Brom", "short_rest", &["Brom"], &args);
    assert!(result.is_err());
}

// =============================================================================
// CLERIC
// =============================================================================

#[test]
fn test_channel_divinity_runs_out_until_rest() {
    // Con save rolls 5 against DC 13; 2d10 rolls 5 and 5, + cleric level 3.
    let mut harness = TestHarness::with_rolls([5, 5, 5]);
    harness.spawn(&sample_cleric("Ilsa")).unwrap();
    harness.add(dummy("dummy"));

    let resolution = harness
        .resolve("Ilsa", "cd_radiance_of_the_dawn", &["dummy"], &ActionArgs::new())
        .unwrap();
    assert_eq!(resolution.outcomes["dummy"], "now has 37 hp");

    let resolution = harness
        .resolve("Ilsa", "cd_radiance_of_the_dawn", &["dummy"], &ActionArgs::new())
        .unwrap();
    assert_eq!(resolution.fizzled.as_deref(), Some("no channel divinity left"));

    let ilsa = harness.character_mut("Ilsa").unwrap();
    ilsa.refresh_biases(false);
    assert_eq!(ilsa.actions.bias("cd_radiance_of_the_dawn"), Some(Bias::NEVER));

    let resolution = harness
        .resolve("Ilsa", "short_rest", &["Ilsa"], &ActionArgs::new())
        .unwrap();
    assert_eq!(resolution.outcomes["Ilsa"], "regained 0 HP");
    let ilsa = harness.character_mut("Ilsa").unwrap();
    assert_eq!(ilsa.resources.charges.channel_divinity, 1);
    ilsa.refresh_biases(false);
    assert_eq!(ilsa.actions.bias("cd_radiance_of_the_dawn"), Bias::new(8));
}

#[test]
fn test_healing_word_is_a_bonus_action() {
    // 1d4 rolls 3, + wis 3.
    let mut harness = TestHarness::with_rolls([3]);
    harness.spawn(&sample_cleric("Ilsa")).unwrap();
    harness.spawn(&sample_fighter("Brom")).unwrap();
    harness.character_mut("Brom").unwrap().resources.hp = 1;

    let resolution = harness
        .resolve("Ilsa", "cast_healing_word", &["Brom"], &ActionArgs::new())
        .unwrap();
    assert_eq!(resolution.outcomes["Brom"], "now has 7 HP");
    let ilsa = harness.character("Ilsa").unwrap();
    assert_eq!(ilsa.resources.bonus, 0);
    assert_eq!(ilsa.resources.regular, 1);
}

// =============================================================================
// DRUID
// =============================================================================

fn druid(harness: &mut TestHarness, level: u8) {
    let mut stats = StatBlock::default();
    stats.max_hp = 16;
    stats.class_levels.insert(CharacterClass::Druid, level);
    let mut fern = Character::new("Fern", Team::Pc, stats);
    let tables = harness.tables().clone();
    for name in tables.category("druid").unwrap() {
        fern.actions.insert(tables.action(name).unwrap().clone());
    }
    harness.add(fern);
}

#[test]
fn test_wild_shape_lasts_half_druid_level_in_hours() {
    let mut harness = TestHarness::new();
    druid(&mut harness, 4);

    let args = ActionArgs::new().with_form("wolf");
    let resolution = harness
        .resolve("Fern", "wild_shape", &["Fern"], &args)
        .unwrap();
    assert_eq!(resolution.outcomes["Fern"], "is now a wolf");

    let fern = harness.character("Fern").unwrap();
    let held = fern.conditions.get(Condition::WildShape).unwrap();
    assert_eq!(held.payload.as_deref(), Some("wolf"));
    assert_eq!(held.remaining.to_string(), "2 hour");
    assert_eq!(fern.resources.charges.wild_shape, 1);

    let resolution = harness
        .resolve("Fern", "drop_wild_shape", &["Fern"], &ActionArgs::new())
        .unwrap();
    assert_eq!(resolution.outcomes["Fern"], "returns to their normal form");
    assert_lacks_condition(&harness, "Fern", Condition::WildShape);

    let resolution = harness
        .resolve("Fern", "drop_wild_shape", &["Fern"], &ActionArgs::new())
        .unwrap();
    assert_eq!(resolution.fizzled.as_deref(), Some("not wild shaped"));
}

#[test]
fn test_wild_shape_hours_round_down() {
    let mut harness = TestHarness::new();
    druid(&mut harness, 3);
    let args = ActionArgs::new().with_form("cat");
    harness.resolve("Fern", "wild_shape", &["Fern"], &args).unwrap();
    let fern = harness.character("Fern").unwrap();
    let held = fern.conditions.get(Condition::WildShape).unwrap();
    assert_eq!(held.remaining.to_string(), "1 hour");

    let mut harness = TestHarness::new();
    druid(&mut harness, 1);
    let resolution = harness
        .resolve("Fern", "wild_shape", &["Fern"], &args)
        .unwrap();
    assert_eq!(resolution.fizzled.as_deref(), Some("druid level too low"));
    assert_eq!(harness.character("Fern").unwrap().resources.charges.wild_shape, 2);
}

#[test]
fn test_shillelagh_goes_first_until_cast() {
    let mut harness = TestHarness::new();
    druid(&mut harness, 2);

    let fern = harness.character_mut("Fern").unwrap();
    let order = fern.refresh_biases(false);
    assert_eq!(order.first(), Some(&skirmish_core::ActionCost::Bonus));
    assert_eq!(fern.actions.bias("cast_shillelagh"), Some(Bias::HIGHEST));

    harness
        .resolve("Fern", "cast_shillelagh", &["Fern"], &ActionArgs::new())
        .unwrap();
    let fern = harness.character_mut("Fern").unwrap();
    let order = fern.refresh_biases(false);
    assert_eq!(order.first(), Some(&skirmish_core::ActionCost::Regular));
    assert_eq!(fern.actions.bias("cast_shillelagh"), Some(Bias::NEVER));
}

// =============================================================================
// WIZARD
// =============================================================================

#[test]
fn test_long_rest_restores_wizard_slots() {
    let mut harness = TestHarness::new();
    let mut stats = StatBlock::default();
    stats.max_hp = 18;
    stats.class_levels.insert(CharacterClass::Wizard, 3);
    stats.slots = [2, 0, 0, 0, 0, 0, 0, 0, 0];
    harness.add(Character::new("Mira", Team::Pc, stats));

    let mira = harness.roster.by_name_mut("Mira").unwrap();
    mira.resources.slots[0] = 0;
    assert!(mira.long_rest(&mut harness.referee));
    assert_eq!(mira.resources.slots[0], 2);
}

// =============================================================================
// MONK
// =============================================================================

#[test]
fn test_martial_arts_uses_best_unarmed_strike() {
    // 15 + dex 3 + prof 3 hits; unarmed_6 rolls 4, + dex 3.
    let mut harness = TestHarness::with_rolls([15, 4]);
    let mut stats = StatBlock::default();
    stats.max_hp = 30;
    stats.proficiency = 3;
    stats.scores.dexterity = 16;
    stats.class_levels.insert(CharacterClass::Monk, 5);
    let mut monk = Character::new("Kai", Team::Pc, stats);
    let martial_arts = harness.tables().action("martial_arts").unwrap().clone();
    monk.actions.insert(martial_arts);
    harness.add(monk);
    harness.add(dummy("dummy"));

    let resolution = harness
        .resolve("Kai", "martial_arts", &["dummy"], &ActionArgs::new())
        .unwrap();
    assert_eq!(resolution.outcomes["dummy"], "now has 43 HP");
    assert_eq!(harness.character("Kai").unwrap().resources.bonus, 0);
}

// =============================================================================
// JUGGERNAUT
// =============================================================================

#[test]
fn test_unstoppable_blocks_three_hits() {
    // Four goblin swings of 18; the fourth gets through for 1d6 3 + dex 2.
    let mut harness = TestHarness::with_rolls([18, 18, 18, 18, 3]);
    let mut stats = StatBlock::default();
    stats.max_hp = 20;
    let mut tank = Character::new("Tor", Team::Pc, stats);
    let unstoppable = harness.tables().action("unstoppable").unwrap().clone();
    tank.actions.insert(unstoppable);
    harness.add(tank);
    harness.spawn(&sample_goblin("goblin")).unwrap();

    let resolution = harness
        .resolve("Tor", "unstoppable", &["Tor"], &ActionArgs::new())
        .unwrap();
    assert_eq!(resolution.outcomes["Tor"], "is unstoppable");
    assert_has_condition(&harness, "Tor", Condition::Unstoppable);

    let args = ActionArgs::new().with_attack("scimitar");
    for _ in 0..3 {
        harness.resolve("goblin", "attack", &["Tor"], &args).unwrap();
        assert_hp(&harness, "Tor", 20, 20);
    }
    assert_lacks_condition(&harness, "Tor", Condition::Unstoppable);

    harness.resolve("goblin", "attack", &["Tor"], &args).unwrap();
    assert_hp(&harness, "Tor", 15, 20);
}
