//! Weapon attack math.
//!
//! One strike is a hit roll against the target's armor class followed, on a
//! hit, by a damage roll and the target taking that damage. Advantage comes
//! from the caller and from both characters' conditions; modifiers from the
//! attack definition, proficiency and fighting style.

use crate::character::Character;
use crate::conditions::Condition;
use crate::dice::{Advantage, DiceSpec};
use crate::resources::{counters, ResourceError};
use crate::stats::{Ability, CharacterClass, DamageType, FightingStyle};
use crate::tables::{AttackDef, DamageEntry, WeaponProperty};
use crate::trace::{Referee, TraceEvent};
use serde::Serialize;
use std::collections::BTreeMap;

/// Attacker conditions that impose disadvantage.
const ATTACKER_HINDERED: [Condition; 4] = [
    Condition::Blinded,
    Condition::Frightened,
    Condition::Prone,
    Condition::Restrained,
];

/// Target conditions that grant advantage.
const TARGET_EXPOSED: [Condition; 6] = [
    Condition::Blinded,
    Condition::Paralyzed,
    Condition::Petrified,
    Condition::Restrained,
    Condition::Stunned,
    Condition::Unconscious,
];

const ARCHERY_BONUS: i32 = 2;

/// Situational inputs to one strike.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StrikeOptions {
    /// Advantage from outside the two characters, e.g. a reaction.
    pub advantage: Advantage,
    /// Off-hand strikes never add a positive ability modifier to damage.
    pub offhand: bool,
    /// Another enemy of the target stands next to it.
    pub adjacent_enemy: bool,
    /// Attacker is within 5 ft, which matters against prone targets.
    pub within_5ft: bool,
}

/// Outcome of a hit roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HitRoll {
    pub natural: i32,
    pub total: i32,
    pub advantage: Advantage,
    pub critical: bool,
    /// Natural 1.
    pub fumble: bool,
    /// Ability picked by the finesse rule, carried into damage.
    pub finesse: Option<Ability>,
}

impl HitRoll {
    /// A fumble always misses, a critical always hits, anything else must
    /// meet the armor class.
    pub fn hits(&self, armor_class: i32) -> bool {
        !self.fumble && (self.critical || self.total >= armor_class)
    }
}

/// What one strike did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrikeOutcome {
    pub hit: HitRoll,
    pub landed: bool,
    /// Absorbed by the target's `unstoppable`.
    pub blocked: bool,
    pub damage: BTreeMap<DamageType, i32>,
    /// Damage left after the target's mitigation.
    pub dealt: i32,
    pub target_hp: i32,
}

/// Net advantage tally from both characters' conditions.
pub fn condition_tally(attacker: &Character, target: &Character, within_5ft: bool) -> i32 {
    let mut tally = 0;
    if attacker.conditions.any_of(&ATTACKER_HINDERED) {
        tally -= 1;
    }
    if attacker.has_condition(Condition::Invisible) {
        tally += 1;
    }
    if target.has_condition(Condition::Invisible) {
        tally -= 1;
    }
    if target.has_condition(Condition::Prone) {
        tally += if within_5ft { 1 } else { -1 };
    }
    if target.has_condition(Condition::Dodge) {
        tally -= 1;
    }
    if target.conditions.any_of(&TARGET_EXPOSED) {
        tally += 1;
    }
    tally
}

/// The ability an attack rolls with, and whether the finesse rule chose it.
/// Finesse weapons, and monk weapons in a monk's hands, take the better of
/// strength and dexterity.
pub fn attack_ability(def: &AttackDef, attacker: &Character) -> (Ability, bool) {
    let finesse = def.has(WeaponProperty::Finesse)
        || (def.has(WeaponProperty::MonkWeapon) && attacker.stats.has_class(CharacterClass::Monk));
    if !finesse {
        return (def.ability, false);
    }
    let scores = &attacker.stats.scores;
    let ability = if scores.dexterity > scores.strength {
        Ability::Dexterity
    } else {
        Ability::Strength
    };
    (ability, true)
}

fn proficiency_bonus(def: &AttackDef, attacker: &Character) -> i32 {
    let proficient = def.everyone_proficient()
        || def
            .proficiency
            .iter()
            .any(|tag| attacker.stats.is_proficient_with(tag));
    if proficient {
        attacker.stats.proficiency
    } else {
        0
    }
}

/// Roll to hit. Spends the attacker's bardic inspiration if one is held.
pub fn roll_hit(
    name: &str,
    def: &AttackDef,
    attacker: &mut Character,
    target: &Character,
    options: &StrikeOptions,
    referee: &mut Referee,
) -> HitRoll {
    let tally = options.advantage.tally() + condition_tally(attacker, target, options.within_5ft);
    let advantage = Advantage::from_tally(tally);

    let (ability, finesse) = attack_ability(def, attacker);
    let mut modifier = attacker.stats.modifier(ability);
    modifier += attacker.spend_inspiration(referee);
    if def.is_ranged() && attacker.stats.properties.fighting_style == Some(FightingStyle::Archery) {
        modifier += ARCHERY_BONUS;
    }
    modifier += proficiency_bonus(def, attacker) + def.hitmod;

    let purpose = format!("{name} to hit");
    let natural = referee.d20(advantage, &attacker.name, &purpose);
    let threshold = attacker.stats.properties.crit_threshold() as i32;
    let fumble = natural == 1;
    let critical = !fumble && natural >= threshold;

    HitRoll {
        natural,
        total: natural + modifier,
        advantage,
        critical,
        fumble,
        finesse: finesse.then_some(ability),
    }
}

/// Damage entries added by the attacker's one-shot features.
fn conditional_damage(attacker: &mut Character, referee: &mut Referee) -> Vec<DamageEntry> {
    let mut extra = Vec::new();
    if attacker.resources.counter(counters::GENIES_WRATH) > 0 {
        if let Some(patron) = attacker.stats.properties.patron {
            tracing::debug!(character = %attacker.name, patron = patron.name(), "genie's wrath");
            extra.push(DamageEntry::new(
                DiceSpec::new(0, 0, attacker.stats.proficiency),
                None,
                patron.wrath_type(),
            ));
            attacker.set_counter(counters::GENIES_WRATH, 0, referee);
        }
    }
    extra
}

/// Sneak attack: once per turn, with a finesse or ranged weapon, when the
/// attack had advantage or another enemy is next to the target.
fn sneak_attack(
    def: &AttackDef,
    hit: &HitRoll,
    attacker: &mut Character,
    options: &StrikeOptions,
    referee: &mut Referee,
) -> i32 {
    if attacker.resources.charges.sneak_attack == 0 {
        return 0;
    }
    if !(def.has(WeaponProperty::Finesse) || def.is_ranged()) {
        return 0;
    }
    if hit.advantage != Advantage::Advantage && !options.adjacent_enemy {
        return 0;
    }
    let level = attacker.stats.class_level(CharacterClass::Rogue) as u32;
    attacker.resources.charges.sneak_attack = 0;
    referee.roll(6, level.div_ceil(2), &attacker.name, "sneak attack")
}

/// Roll damage by type. Dice double on a critical; flat modifiers do not.
pub fn roll_damage(
    name: &str,
    def: &AttackDef,
    hit: &HitRoll,
    attacker: &mut Character,
    options: &StrikeOptions,
    referee: &mut Referee,
) -> BTreeMap<DamageType, i32> {
    let mut entries = def.damage.clone();
    entries.extend(conditional_damage(attacker, referee));

    let purpose = format!("{name} damage");
    let mut damage = BTreeMap::new();
    for entry in &entries {
        let dice = if hit.critical {
            entry.dice.doubled_dice()
        } else {
            entry.dice
        };
        let mut amount = referee.roll(dice.faces, dice.count, &attacker.name, &purpose);
        amount += sneak_attack(def, hit, attacker, options, referee);
        amount += dice.modifier;

        let ability = match (entry.ability, hit.finesse) {
            (Some(a), Some(chosen)) if a.is_physical() => Some(chosen),
            (a, _) => a,
        };
        let mut ability_mod = ability.map_or(0, |a| attacker.stats.modifier(a));
        if options.offhand {
            ability_mod = ability_mod.min(0);
        }
        *damage.entry(entry.damage_type).or_insert(0) += (amount + ability_mod).max(0);
    }
    damage
}

/// One full strike: roll, damage, and the target taking it.
pub fn strike(
    name: &str,
    def: &AttackDef,
    attacker: &mut Character,
    target: &mut Character,
    options: &StrikeOptions,
    referee: &mut Referee,
) -> Result<StrikeOutcome, ResourceError> {
    let hit = roll_hit(name, def, attacker, target, options, referee);
    let landed = hit.hits(target.stats.armor_class);
    referee.record(TraceEvent::AttackRolled {
        actor: attacker.name.clone(),
        target: target.name.clone(),
        attack: name.to_string(),
        advantage: hit.advantage,
        natural: hit.natural.max(0) as u32,
        total: hit.total,
        hit: landed,
        critical: hit.critical,
    });

    let mut outcome = StrikeOutcome {
        hit,
        landed,
        blocked: false,
        damage: BTreeMap::new(),
        dealt: 0,
        target_hp: target.resources.hp,
    };
    if !landed {
        tracing::debug!(attacker = %attacker.name, target = %target.name, attack = name, "miss");
        return Ok(outcome);
    }
    if target.has_condition(Condition::Unstoppable) {
        tracing::debug!(target = %target.name, "blocked by unstoppable");
        target.react_on_other_turn(Condition::Unstoppable, referee);
        outcome.blocked = true;
        return Ok(outcome);
    }

    outcome.damage = roll_damage(name, def, &hit, attacker, options, referee);
    let (dealt, hp) = target.take_damage(&outcome.damage, hit.critical, referee)?;
    outcome.dealt = dealt;
    outcome.target_hp = hp;
    Ok(outcome)
}
