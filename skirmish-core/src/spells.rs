//! Spell casting: slot selection and the coded effect routines.

use crate::attacks::HitRoll;
use crate::character::{Character, StatRoll};
use crate::conditions::{Condition, Duration};
use crate::dice::Advantage;
use crate::resources::{ResourceDelta, ResourceError};
use crate::rules::{Outcomes, Roster};
use crate::stats::{Ability, CharacterClass, DamageType};
use crate::tables::{Spell, SpellEffect};
use crate::trace::{Referee, TraceEvent};
use std::collections::BTreeMap;

const UNSTOPPABLE_CHARGES: &str = "3";

/// Which slot a cast uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotChoice {
    /// Level-0 spells and spell-like features use no slot.
    Cantrip,
    Slot(u8),
    /// Nothing left at or above the spell's level, or at the requested
    /// upcast level.
    Unavailable,
}

/// The lowest open slot at or above the spell's level, or `upcast` if that
/// is higher.
pub fn choose_slot(
    spell: &Spell,
    caster: &Character,
    upcast: Option<u8>,
) -> Result<SlotChoice, ResourceError> {
    if spell.level == 0 {
        return Ok(SlotChoice::Cantrip);
    }
    let Some(next) = caster.resources.next_available_slot(spell.level)? else {
        return Ok(SlotChoice::Unavailable);
    };
    let slot = next.max(upcast.unwrap_or(0));
    if caster.resources.slots_at(slot)? == 0 {
        return Ok(SlotChoice::Unavailable);
    }
    Ok(SlotChoice::Slot(slot))
}

/// What the effect routines read from the caster before anyone is touched.
struct Caster {
    index: usize,
    name: String,
    save_dc: i32,
    spell_mod: i32,
    proficiency: i32,
    cleric_level: i32,
    crit_threshold: i32,
}

impl Caster {
    fn new(index: usize, character: &Character) -> Self {
        let stats = &character.stats;
        Self {
            index,
            name: character.name.clone(),
            save_dc: stats.spell_save_dc().unwrap_or(8 + stats.proficiency),
            spell_mod: stats.spellcasting.map_or(0, |a| stats.modifier(a)),
            proficiency: stats.proficiency,
            cleric_level: stats.class_level(CharacterClass::Cleric) as i32,
            crit_threshold: stats.properties.crit_threshold() as i32,
        }
    }
}

/// Cast `spell` from the character at `caster` onto `targets`. Returns
/// `None` when no slot is available; nothing is spent in that case.
pub fn cast(
    spell: &Spell,
    roster: &mut Roster,
    caster: usize,
    targets: &[usize],
    upcast: Option<u8>,
    referee: &mut Referee,
) -> Result<Option<Outcomes>, ResourceError> {
    let Some(character) = roster.get_mut(caster) else {
        return Ok(None);
    };
    let slot = match choose_slot(spell, character, upcast)? {
        SlotChoice::Unavailable => {
            tracing::debug!(caster = %character.name, spell = %spell.name, "no spell slot");
            return Ok(None);
        }
        SlotChoice::Cantrip => None,
        SlotChoice::Slot(level) => {
            character.adjust_resources(&ResourceDelta::new().slot(level, -1), referee);
            Some(level)
        }
    };
    referee.record(TraceEvent::SpellCast {
        actor: character.name.clone(),
        spell: spell.name.clone(),
        slot,
    });

    let caster = Caster::new(caster, character);
    let slot_level = slot.unwrap_or(spell.level).max(1) as u32;
    let upcast_by = slot.map_or(0, |s| s.saturating_sub(spell.level)) as u32;

    let outcomes = match spell.effect {
        SpellEffect::RadianceOfTheDawn => radiance_of_the_dawn(&caster, roster, targets, referee)?,
        SpellEffect::Shillelagh => {
            self_condition(&caster, roster, Condition::Shillelagh, spell.duration, None, referee);
            Outcomes::from([(
                caster.name.clone(),
                "has shillelagh on their club/quarterstaff".to_string(),
            )])
        }
        SpellEffect::Unstoppable => {
            self_condition(
                &caster,
                roster,
                Condition::Unstoppable,
                spell.duration,
                Some(UNSTOPPABLE_CHARGES.to_string()),
                referee,
            );
            Outcomes::from([(caster.name.clone(), "is unstoppable".to_string())])
        }
        SpellEffect::CureWounds => heal(&caster, roster, targets, 8, slot_level, referee)?,
        SpellEffect::HealingWord => heal(&caster, roster, targets, 4, slot_level, referee)?,
        SpellEffect::MagicMissile => magic_missile(roster, targets, 3 + upcast_by, referee)?,
        SpellEffect::GuidingBolt => guiding_bolt(&caster, roster, targets, 4 + upcast_by, referee)?,
    };
    Ok(Some(outcomes))
}

fn self_condition(
    caster: &Caster,
    roster: &mut Roster,
    condition: Condition,
    duration: Duration,
    payload: Option<String>,
    referee: &mut Referee,
) {
    if let Some(character) = roster.get_mut(caster.index) {
        character.add_condition(condition, duration, payload, referee);
    }
}

/// 2d10 + cleric level radiant to every target, halved on a con save.
fn radiance_of_the_dawn(
    caster: &Caster,
    roster: &mut Roster,
    targets: &[usize],
    referee: &mut Referee,
) -> Result<Outcomes, ResourceError> {
    let mut outcomes = Outcomes::new();
    for &index in targets {
        let Some(target) = roster.get_mut(index) else {
            continue;
        };
        let save = target.roll_stat(StatRoll::Save(Ability::Constitution), Advantage::Normal, referee);
        let mut damage = referee.roll(10, 2, &caster.name, "radiance of the dawn") + caster.cleric_level;
        if save >= caster.save_dc {
            damage /= 2;
        }
        tracing::debug!(target = %target.name, save, dc = caster.save_dc, damage, "radiance of the dawn");
        let (_, hp) = target.take_damage(&BTreeMap::from([(DamageType::Radiant, damage)]), false, referee)?;
        outcomes.insert(target.name.clone(), format!("now has {hp} hp"));
    }
    Ok(outcomes)
}

/// `slot_level` dice of `faces` plus the spellcasting modifier, per target.
fn heal(
    caster: &Caster,
    roster: &mut Roster,
    targets: &[usize],
    faces: u32,
    slot_level: u32,
    referee: &mut Referee,
) -> Result<Outcomes, ResourceError> {
    let mut outcomes = Outcomes::new();
    for &index in targets {
        let amount = (referee.roll(faces, slot_level, &caster.name, "healing") + caster.spell_mod).max(0);
        let Some(target) = roster.get_mut(index) else {
            continue;
        };
        let hp = target.heal_hp(amount, referee)?;
        outcomes.insert(target.name.clone(), format!("now has {hp} HP"));
    }
    Ok(outcomes)
}

/// Darts of 1d4+1 force, spread round-robin over the targets.
fn magic_missile(
    roster: &mut Roster,
    targets: &[usize],
    darts: u32,
    referee: &mut Referee,
) -> Result<Outcomes, ResourceError> {
    let mut outcomes = Outcomes::new();
    if targets.is_empty() {
        return Ok(outcomes);
    }
    for dart in 0..darts as usize {
        let Some(target) = roster.get_mut(targets[dart % targets.len()]) else {
            continue;
        };
        let damage = referee.roll(4, 1, &target.name, "magic missile") + 1;
        let (_, hp) = target.take_damage(&BTreeMap::from([(DamageType::Force, damage)]), false, referee)?;
        outcomes.insert(target.name.clone(), format!("now has {hp} HP"));
    }
    Ok(outcomes)
}

/// Ranged spell attack on the first target for `dice`d6 radiant.
fn guiding_bolt(
    caster: &Caster,
    roster: &mut Roster,
    targets: &[usize],
    dice: u32,
    referee: &mut Referee,
) -> Result<Outcomes, ResourceError> {
    let mut outcomes = Outcomes::new();
    let Some(target) = targets.first().and_then(|&i| roster.get_mut(i)) else {
        return Ok(outcomes);
    };
    let natural = referee.d20(Advantage::Normal, &caster.name, "guiding bolt to hit");
    let fumble = natural == 1;
    let hit = HitRoll {
        natural,
        total: natural + caster.proficiency + caster.spell_mod,
        advantage: Advantage::Normal,
        critical: !fumble && natural >= caster.crit_threshold,
        fumble,
        finesse: None,
    };
    let landed = hit.hits(target.stats.armor_class);
    referee.record(TraceEvent::AttackRolled {
        actor: caster.name.clone(),
        target: target.name.clone(),
        attack: "guiding_bolt".to_string(),
        advantage: hit.advantage,
        natural: natural.max(0) as u32,
        total: hit.total,
        hit: landed,
        critical: hit.critical,
    });

    let hp = if landed {
        let count = if hit.critical { dice * 2 } else { dice };
        let damage = referee.roll(6, count, &caster.name, "guiding bolt damage");
        let (_, hp) = target.take_damage(
            &BTreeMap::from([(DamageType::Radiant, damage)]),
            hit.critical,
            referee,
        )?;
        hp
    } else {
        target.resources.hp
    };
    outcomes.insert(target.name.clone(), format!("now has {hp} HP"));
    Ok(outcomes)
}
