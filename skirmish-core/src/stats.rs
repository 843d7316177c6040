//! Static character statistics.
//!
//! A [`StatBlock`] is read-mostly: it is built once from a template and then
//! only changed by [`StatBlock::apply`], a merge that overwrites the keys
//! present in a [`StatPatch`] and leaves everything else alone.

use crate::conditions::Condition;
use crate::dice::{Advantage, DiceSpec, DieType};
use crate::resources::ResourceError;
use crate::trace::Referee;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Ability Scores
// ============================================================================

/// The six ability scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Ability {
    #[serde(rename = "str")]
    Strength,
    #[serde(rename = "dex")]
    Dexterity,
    #[serde(rename = "con")]
    Constitution,
    #[serde(rename = "int")]
    Intelligence,
    #[serde(rename = "wis")]
    Wisdom,
    #[serde(rename = "cha")]
    Charisma,
}

impl Ability {
    pub fn abbreviation(&self) -> &'static str {
        match self {
            Ability::Strength => "str",
            Ability::Dexterity => "dex",
            Ability::Constitution => "con",
            Ability::Intelligence => "int",
            Ability::Wisdom => "wis",
            Ability::Charisma => "cha",
        }
    }

    pub fn all() -> [Ability; 6] {
        [
            Ability::Strength,
            Ability::Dexterity,
            Ability::Constitution,
            Ability::Intelligence,
            Ability::Wisdom,
            Ability::Charisma,
        ]
    }

    /// Strength and dexterity, the abilities weapon damage scales with.
    pub fn is_physical(&self) -> bool {
        matches!(self, Ability::Strength | Ability::Dexterity)
    }
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.abbreviation())
    }
}

impl FromStr for Ability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ability::all()
            .into_iter()
            .find(|a| a.abbreviation() == s)
            .ok_or_else(|| format!("{s} is not an ability"))
    }
}

/// Ability scores container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityScores {
    pub strength: u8,
    pub dexterity: u8,
    pub constitution: u8,
    pub intelligence: u8,
    pub wisdom: u8,
    pub charisma: u8,
}

impl AbilityScores {
    pub fn new(str: u8, dex: u8, con: u8, int: u8, wis: u8, cha: u8) -> Self {
        Self {
            strength: str,
            dexterity: dex,
            constitution: con,
            intelligence: int,
            wisdom: wis,
            charisma: cha,
        }
    }

    pub fn get(&self, ability: Ability) -> u8 {
        match ability {
            Ability::Strength => self.strength,
            Ability::Dexterity => self.dexterity,
            Ability::Constitution => self.constitution,
            Ability::Intelligence => self.intelligence,
            Ability::Wisdom => self.wisdom,
            Ability::Charisma => self.charisma,
        }
    }

    pub fn set(&mut self, ability: Ability, value: u8) {
        match ability {
            Ability::Strength => self.strength = value,
            Ability::Dexterity => self.dexterity = value,
            Ability::Constitution => self.constitution = value,
            Ability::Intelligence => self.intelligence = value,
            Ability::Wisdom => self.wisdom = value,
            Ability::Charisma => self.charisma = value,
        }
    }

    /// Floor of `(score - 10) / 2`: 8-9 is -1, 10-11 is 0, 12-13 is +1.
    pub fn modifier(&self, ability: Ability) -> i32 {
        (self.get(ability) as i32 - 10).div_euclid(2)
    }
}

impl Default for AbilityScores {
    fn default() -> Self {
        Self::new(10, 10, 10, 10, 10, 10)
    }
}

// ============================================================================
// Skills
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Skill {
    Athletics,
    Acrobatics,
    SleightOfHand,
    Stealth,
    Arcana,
    History,
    Investigation,
    Nature,
    Religion,
    AnimalHandling,
    Insight,
    Medicine,
    Perception,
    Survival,
    Deception,
    Intimidation,
    Performance,
    Persuasion,
}

impl Skill {
    pub fn ability(&self) -> Ability {
        match self {
            Skill::Athletics => Ability::Strength,
            Skill::Acrobatics | Skill::SleightOfHand | Skill::Stealth => Ability::Dexterity,
            Skill::Arcana
            | Skill::History
            | Skill::Investigation
            | Skill::Nature
            | Skill::Religion => Ability::Intelligence,
            Skill::AnimalHandling
            | Skill::Insight
            | Skill::Medicine
            | Skill::Perception
            | Skill::Survival => Ability::Wisdom,
            Skill::Deception | Skill::Intimidation | Skill::Performance | Skill::Persuasion => {
                Ability::Charisma
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Skill::Athletics => "athletics",
            Skill::Acrobatics => "acrobatics",
            Skill::SleightOfHand => "sleight_of_hand",
            Skill::Stealth => "stealth",
            Skill::Arcana => "arcana",
            Skill::History => "history",
            Skill::Investigation => "investigation",
            Skill::Nature => "nature",
            Skill::Religion => "religion",
            Skill::AnimalHandling => "animal_handling",
            Skill::Insight => "insight",
            Skill::Medicine => "medicine",
            Skill::Perception => "perception",
            Skill::Survival => "survival",
            Skill::Deception => "deception",
            Skill::Intimidation => "intimidation",
            Skill::Performance => "performance",
            Skill::Persuasion => "persuasion",
        }
    }
}

impl fmt::Display for Skill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Proficiency level for a roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProficiencyLevel {
    #[default]
    None,
    /// Jack of all trades.
    Half,
    Proficient,
    Expertise,
}

impl ProficiencyLevel {
    pub fn bonus(&self, proficiency_bonus: i32) -> i32 {
        match self {
            ProficiencyLevel::None => 0,
            ProficiencyLevel::Half => proficiency_bonus.div_euclid(2),
            ProficiencyLevel::Proficient => proficiency_bonus,
            ProficiencyLevel::Expertise => proficiency_bonus * 2,
        }
    }
}

// ============================================================================
// Classes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CharacterClass {
    Barbarian,
    Bard,
    Cleric,
    Druid,
    Fighter,
    Monk,
    Paladin,
    Ranger,
    Rogue,
    Sorcerer,
    Warlock,
    Wizard,
}

lazy_static::lazy_static! {
    /// Tool, armor and weapon proficiencies granted by taking a class.
    static ref CLASS_PROFICIENCIES: BTreeMap<CharacterClass, Vec<&'static str>> = {
        let mut m = BTreeMap::new();
        m.insert(
            CharacterClass::Bard,
            vec!["light_armor", "simple_weapon", "hand_crossbow", "longsword", "rapier", "shortsword"],
        );
        m.insert(
            CharacterClass::Cleric,
            vec!["light_armor", "medium_armor", "shield", "simple_weapon"],
        );
        m.insert(
            CharacterClass::Druid,
            vec![
                "light_armor", "medium_armor", "shield", "club", "dagger", "dart", "javelin",
                "mace", "quarterstaff", "scimitar", "sickle", "sling", "spear", "herbalism_kit",
            ],
        );
        m.insert(
            CharacterClass::Fighter,
            vec!["light_armor", "medium_armor", "heavy_armor", "shield", "simple_weapon", "martial_weapon"],
        );
        m.insert(CharacterClass::Monk, vec!["simple_weapon", "shortsword"]);
        m.insert(
            CharacterClass::Rogue,
            vec![
                "light_armor", "simple_weapon", "hand_crossbow", "longsword", "rapier",
                "shortsword", "thieves_tools",
            ],
        );
        m.insert(CharacterClass::Warlock, vec!["light_armor", "simple_weapon"]);
        m
    };
}

impl CharacterClass {
    pub fn hit_die(&self) -> DieType {
        match self {
            CharacterClass::Barbarian => DieType::D12,
            CharacterClass::Fighter | CharacterClass::Paladin | CharacterClass::Ranger => {
                DieType::D10
            }
            CharacterClass::Bard
            | CharacterClass::Cleric
            | CharacterClass::Druid
            | CharacterClass::Monk
            | CharacterClass::Rogue
            | CharacterClass::Warlock => DieType::D8,
            CharacterClass::Sorcerer | CharacterClass::Wizard => DieType::D6,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CharacterClass::Barbarian => "barbarian",
            CharacterClass::Bard => "bard",
            CharacterClass::Cleric => "cleric",
            CharacterClass::Druid => "druid",
            CharacterClass::Fighter => "fighter",
            CharacterClass::Monk => "monk",
            CharacterClass::Paladin => "paladin",
            CharacterClass::Ranger => "ranger",
            CharacterClass::Rogue => "rogue",
            CharacterClass::Sorcerer => "sorcerer",
            CharacterClass::Warlock => "warlock",
            CharacterClass::Wizard => "wizard",
        }
    }

    pub fn granted_proficiencies(&self) -> &'static [&'static str] {
        CLASS_PROFICIENCIES
            .get(self)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

impl fmt::Display for CharacterClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// Damage Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DamageType {
    Slashing,
    Piercing,
    Bludgeoning,
    /// Bludgeoning from a magical source, tracked apart from mundane blows.
    #[serde(rename = "m_bludgeoning")]
    MagicBludgeoning,
    Fire,
    Cold,
    Lightning,
    Thunder,
    Acid,
    Poison,
    Necrotic,
    Radiant,
    Force,
    Psychic,
}

impl DamageType {
    pub fn name(&self) -> &'static str {
        match self {
            DamageType::Slashing => "slashing",
            DamageType::Piercing => "piercing",
            DamageType::Bludgeoning => "bludgeoning",
            DamageType::MagicBludgeoning => "m_bludgeoning",
            DamageType::Fire => "fire",
            DamageType::Cold => "cold",
            DamageType::Lightning => "lightning",
            DamageType::Thunder => "thunder",
            DamageType::Acid => "acid",
            DamageType::Poison => "poison",
            DamageType::Necrotic => "necrotic",
            DamageType::Radiant => "radiant",
            DamageType::Force => "force",
            DamageType::Psychic => "psychic",
        }
    }

    pub fn all() -> [DamageType; 14] {
        [
            DamageType::Slashing,
            DamageType::Piercing,
            DamageType::Bludgeoning,
            DamageType::MagicBludgeoning,
            DamageType::Fire,
            DamageType::Cold,
            DamageType::Lightning,
            DamageType::Thunder,
            DamageType::Acid,
            DamageType::Poison,
            DamageType::Necrotic,
            DamageType::Radiant,
            DamageType::Force,
            DamageType::Psychic,
        ]
    }
}

impl fmt::Display for DamageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DamageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DamageType::all()
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| format!("{s} is not a damage type"))
    }
}

// ============================================================================
// Properties
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FightingStyle {
    Archery,
    Defense,
    Dueling,
    GreatWeaponFighting,
    Protection,
    TwoWeaponFighting,
}

/// The genie a warlock has a pact with.
///
/// Written in templates as any string whose last `_`-separated word names
/// the genie, e.g. `"the_genie_efreeti"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum GeniePatron {
    Dao,
    Djinni,
    Efreeti,
    Marid,
}

impl GeniePatron {
    pub fn name(&self) -> &'static str {
        match self {
            GeniePatron::Dao => "dao",
            GeniePatron::Djinni => "djinni",
            GeniePatron::Efreeti => "efreeti",
            GeniePatron::Marid => "marid",
        }
    }

    /// Damage type of the patron's wrath.
    pub fn wrath_type(&self) -> DamageType {
        match self {
            GeniePatron::Dao => DamageType::MagicBludgeoning,
            GeniePatron::Djinni => DamageType::Thunder,
            GeniePatron::Efreeti => DamageType::Fire,
            GeniePatron::Marid => DamageType::Cold,
        }
    }
}

impl TryFrom<String> for GeniePatron {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.rsplit('_').next().unwrap_or_default() {
            "dao" => Ok(GeniePatron::Dao),
            "djinni" => Ok(GeniePatron::Djinni),
            "efreeti" => Ok(GeniePatron::Efreeti),
            "marid" => Ok(GeniePatron::Marid),
            _ => Err(format!("{value} is not a genie patron")),
        }
    }
}

impl From<GeniePatron> for String {
    fn from(patron: GeniePatron) -> Self {
        patron.name().to_string()
    }
}

/// Narrow one-off modifiers.
///
/// The named fields are the keys the rules read. Anything else in a template's
/// `property` object is kept in `extra` and never consulted by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fighting_style: Option<FightingStyle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crit_threshold: Option<u32>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub important: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patron: Option<GeniePatron>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Properties {
    /// Overlay `other` onto `self`, key by key.
    pub fn merge(&mut self, other: &Properties) {
        if other.fighting_style.is_some() {
            self.fighting_style = other.fighting_style;
        }
        if other.crit_threshold.is_some() {
            self.crit_threshold = other.crit_threshold;
        }
        self.important |= other.important;
        if other.patron.is_some() {
            self.patron = other.patron;
        }
        self.extra
            .extend(other.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    pub fn crit_threshold(&self) -> u32 {
        self.crit_threshold.unwrap_or(20)
    }
}

// ============================================================================
// Stat Block
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatBlock {
    /// Character level. `None` for monsters and other stat-block creatures.
    pub level: Option<u8>,
    pub class_levels: BTreeMap<CharacterClass, u8>,
    pub proficiency: i32,
    pub scores: AbilityScores,
    pub skills: BTreeSet<Skill>,
    pub expertise: BTreeSet<Skill>,
    pub saves: BTreeSet<Ability>,
    pub armor_class: i32,
    pub max_hp: i32,
    /// Hit-dice ceiling per die size.
    pub hit_dice: BTreeMap<DieType, u8>,
    pub speed: f64,
    pub spellcasting: Option<Ability>,
    /// Spell-slot ceiling, index 0 is 1st level.
    pub slots: [u8; 9],
    pub tools: Vec<String>,
    pub immunities: BTreeSet<DamageType>,
    pub resistances: BTreeSet<DamageType>,
    pub vulnerabilities: BTreeSet<DamageType>,
    pub condition_immunities: BTreeSet<Condition>,
    pub properties: Properties,
}

impl Default for StatBlock {
    fn default() -> Self {
        Self {
            level: None,
            class_levels: BTreeMap::new(),
            proficiency: 0,
            scores: AbilityScores::default(),
            skills: BTreeSet::new(),
            expertise: BTreeSet::new(),
            saves: BTreeSet::new(),
            armor_class: 10,
            max_hp: 1,
            hit_dice: DieType::hit_dice().into_iter().map(|d| (d, 0)).collect(),
            speed: 30.0,
            spellcasting: None,
            slots: [0; 9],
            tools: Vec::new(),
            immunities: BTreeSet::new(),
            resistances: BTreeSet::new(),
            vulnerabilities: BTreeSet::new(),
            condition_immunities: BTreeSet::new(),
            properties: Properties::default(),
        }
    }
}

impl StatBlock {
    pub fn modifier(&self, ability: Ability) -> i32 {
        self.scores.modifier(ability)
    }

    /// Level in `class`, 0 if the character has none.
    pub fn class_level(&self, class: CharacterClass) -> u8 {
        self.class_levels.get(&class).copied().unwrap_or(0)
    }

    pub fn has_class(&self, class: CharacterClass) -> bool {
        self.class_level(class) > 0
    }

    pub fn total_hit_dice(&self) -> u32 {
        self.hit_dice.values().map(|&n| n as u32).sum()
    }

    pub fn slot_ceiling(&self, level: u8) -> Result<u8, ResourceError> {
        match level {
            1..=9 => Ok(self.slots[level as usize - 1]),
            _ => Err(ResourceError::InvalidSpellLevel(level)),
        }
    }

    pub fn is_proficient_with(&self, tag: &str) -> bool {
        self.tools.iter().any(|t| t == tag)
    }

    fn jack_of_all_trades(&self) -> ProficiencyLevel {
        if self.class_level(CharacterClass::Bard) >= 2 {
            ProficiencyLevel::Half
        } else {
            ProficiencyLevel::None
        }
    }

    pub fn skill_proficiency(&self, skill: Skill) -> ProficiencyLevel {
        if self.expertise.contains(&skill) {
            ProficiencyLevel::Expertise
        } else if self.skills.contains(&skill) {
            ProficiencyLevel::Proficient
        } else {
            self.jack_of_all_trades()
        }
    }

    /// Raw ability check: d20 + modifier, plus half proficiency for a bard
    /// with jack of all trades.
    pub fn roll_ability_check(
        &self,
        ability: Ability,
        advantage: Advantage,
        who: &str,
        referee: &mut Referee,
    ) -> i32 {
        let purpose = format!("{ability} check");
        referee.d20(advantage, who, &purpose)
            + self.modifier(ability)
            + self.jack_of_all_trades().bonus(self.proficiency)
    }

    pub fn roll_skill_check(
        &self,
        skill: Skill,
        advantage: Advantage,
        who: &str,
        referee: &mut Referee,
    ) -> i32 {
        let purpose = format!("{skill} check");
        referee.d20(advantage, who, &purpose)
            + self.modifier(skill.ability())
            + self.skill_proficiency(skill).bonus(self.proficiency)
    }

    /// Saving throw. Jack of all trades never applies here.
    pub fn roll_saving_throw(
        &self,
        ability: Ability,
        advantage: Advantage,
        who: &str,
        referee: &mut Referee,
    ) -> i32 {
        let purpose = format!("{ability} save");
        let proficiency = if self.saves.contains(&ability) {
            self.proficiency
        } else {
            0
        };
        referee.d20(advantage, who, &purpose) + self.modifier(ability) + proficiency
    }

    /// `8 + proficiency + spellcasting modifier`, or `None` for a character
    /// with no spellcasting ability.
    pub fn spell_save_dc(&self) -> Option<i32> {
        self.spellcasting
            .map(|ability| 8 + self.proficiency + self.modifier(ability))
    }

    /// Merge a patch into this block.
    ///
    /// Keys absent from the patch are untouched. `tools` appends; every other
    /// key replaces. Class levels also grant their class proficiencies, and a
    /// dice-string `max_hp` is rolled here.
    pub fn apply(
        &mut self,
        patch: &StatPatch,
        who: &str,
        referee: &mut Referee,
    ) -> Result<(), ResourceError> {
        if let Some(level) = patch.level {
            self.level = Some(level);
        }
        if let Some(class_levels) = &patch.class_level {
            self.class_levels = class_levels.clone();
            for class in class_levels.keys() {
                for &tag in class.granted_proficiencies() {
                    self.grant_tool(tag);
                }
            }
        }
        if let Some(prof) = patch.prof {
            self.proficiency = prof;
        }
        for ability in Ability::all() {
            if let Some(score) = patch.score(ability) {
                self.scores.set(ability, score);
            }
        }
        if let Some(skills) = &patch.skills {
            self.skills = skills.clone();
        }
        if let Some(expert) = &patch.expert {
            self.expertise = expert.clone();
        }
        if let Some(ac) = patch.ac {
            self.armor_class = ac;
        }
        match &patch.max_hp {
            Some(MaxHp::Fixed(hp)) => self.max_hp = *hp,
            Some(MaxHp::Rolled(spec)) => {
                self.max_hp = referee.roll_spec(spec, who, "max hp").max(1);
            }
            None => {}
        }
        if let Some(hit_dice) = &patch.hit_dice {
            self.hit_dice = DieType::hit_dice().into_iter().map(|d| (d, 0)).collect();
            for spec in hit_dice {
                let die = spec
                    .die_type()
                    .filter(DieType::is_hit_die)
                    .ok_or(ResourceError::InvalidHitDie(spec.faces))?;
                self.hit_dice.insert(die, spec.count.min(u8::MAX as u32) as u8);
            }
        }
        if let Some(saves) = &patch.saves {
            self.saves = saves.clone();
        }
        if let Some(speed) = patch.speed {
            self.speed = speed;
        }
        if let Some(spellcast) = patch.spellcast {
            self.spellcasting = Some(spellcast);
        }
        if let Some(slots) = &patch.slots {
            self.slots = [0; 9];
            for (&level, &count) in slots {
                if !(1..=9).contains(&level) {
                    return Err(ResourceError::InvalidSpellLevel(level));
                }
                self.slots[level as usize - 1] = count;
            }
        }
        if let Some(tools) = &patch.tools {
            for tag in tools {
                self.grant_tool(tag);
            }
        }
        if let Some(imm) = &patch.imm {
            self.immunities = imm.clone();
        }
        if let Some(res) = &patch.res {
            self.resistances = res.clone();
        }
        if let Some(vul) = &patch.vul {
            self.vulnerabilities = vul.clone();
        }
        if let Some(condimm) = &patch.condimm {
            self.condition_immunities = condimm.clone();
        }
        tracing::debug!(character = who, "updated stats");
        Ok(())
    }

    fn grant_tool(&mut self, tag: &str) {
        if !self.is_proficient_with(tag) {
            self.tools.push(tag.to_string());
        }
    }
}

/// Maximum HP as written in a template: a number or a dice string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaxHp {
    Fixed(i32),
    Rolled(DiceSpec),
}

/// A partial stat block, keyed the way encounter files write it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatPatch {
    pub level: Option<u8>,
    pub class_level: Option<BTreeMap<CharacterClass, u8>>,
    pub prof: Option<i32>,
    #[serde(rename = "str")]
    pub strength: Option<u8>,
    #[serde(rename = "dex")]
    pub dexterity: Option<u8>,
    #[serde(rename = "con")]
    pub constitution: Option<u8>,
    #[serde(rename = "int")]
    pub intelligence: Option<u8>,
    #[serde(rename = "wis")]
    pub wisdom: Option<u8>,
    #[serde(rename = "cha")]
    pub charisma: Option<u8>,
    pub skills: Option<BTreeSet<Skill>>,
    pub expert: Option<BTreeSet<Skill>>,
    pub ac: Option<i32>,
    pub max_hp: Option<MaxHp>,
    /// Hit dice as `NdF` strings, e.g. `["3d8", "2d10"]`.
    pub hit_dice: Option<Vec<DiceSpec>>,
    pub saves: Option<BTreeSet<Ability>>,
    pub speed: Option<f64>,
    pub spellcast: Option<Ability>,
    pub slots: Option<BTreeMap<u8, u8>>,
    pub tools: Option<Vec<String>>,
    pub imm: Option<BTreeSet<DamageType>>,
    pub res: Option<BTreeSet<DamageType>>,
    pub vul: Option<BTreeSet<DamageType>>,
    pub condimm: Option<BTreeSet<Condition>>,
}

impl StatPatch {
    pub fn score(&self, ability: Ability) -> Option<u8> {
        match ability {
            Ability::Strength => self.strength,
            Ability::Dexterity => self.dexterity,
            Ability::Constitution => self.constitution,
            Ability::Intelligence => self.intelligence,
            Ability::Wisdom => self.wisdom,
            Ability::Charisma => self.charisma,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patch(json: &str) -> StatPatch {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_modifier_floors_negative() {
        let scores = AbilityScores::new(8, 9, 10, 11, 12, 20);
        assert_eq!(scores.modifier(Ability::Strength), -1);
        assert_eq!(scores.modifier(Ability::Dexterity), -1);
        assert_eq!(scores.modifier(Ability::Constitution), 0);
        assert_eq!(scores.modifier(Ability::Intelligence), 0);
        assert_eq!(scores.modifier(Ability::Wisdom), 1);
        assert_eq!(scores.modifier(Ability::Charisma), 5);
        assert_eq!(AbilityScores::new(1, 10, 10, 10, 10, 10).modifier(Ability::Strength), -5);
    }

    #[test]
    fn test_apply_only_overwrites_present_keys() {
        let mut stats = StatBlock::default();
        let mut referee = Referee::scripted([]);
        stats
            .apply(&patch(r#"{"str": 16, "ac": 15}"#), "tester", &mut referee)
            .unwrap();
        stats
            .apply(&patch(r#"{"dex": 14}"#), "tester", &mut referee)
            .unwrap();

        assert_eq!(stats.scores.strength, 16);
        assert_eq!(stats.scores.dexterity, 14);
        assert_eq!(stats.armor_class, 15);
        assert_eq!(stats.max_hp, 1);
        assert_eq!(stats.speed, 30.0);
    }

    #[test]
    fn test_class_grants_are_idempotent() {
        let mut stats = StatBlock::default();
        let mut referee = Referee::scripted([]);
        let p = patch(r#"{"class_level": {"rogue": 3}, "tools": ["shortsword", "shortbow"]}"#);
        stats.apply(&p, "tester", &mut referee).unwrap();
        stats.apply(&p, "tester", &mut referee).unwrap();

        let shortswords = stats.tools.iter().filter(|t| *t == "shortsword").count();
        assert_eq!(shortswords, 1);
        assert!(stats.is_proficient_with("thieves_tools"));
        assert!(stats.is_proficient_with("shortbow"));
        assert_eq!(stats.class_level(CharacterClass::Rogue), 3);
    }

    #[test]
    fn test_max_hp_dice_string_is_rolled() {
        let mut stats = StatBlock::default();
        let mut referee = Referee::scripted([3, 4]);
        stats
            .apply(&patch(r#"{"max_hp": "2d6+1"}"#), "goblin", &mut referee)
            .unwrap();
        assert_eq!(stats.max_hp, 8);
    }

    #[test]
    fn test_hit_dice_and_slots() {
        let mut stats = StatBlock::default();
        let mut referee = Referee::scripted([]);
        stats
            .apply(
                &patch(r#"{"hit_dice": ["3d8", "2d10"], "slots": {"1": 4, "2": 2}}"#),
                "tester",
                &mut referee,
            )
            .unwrap();
        assert_eq!(stats.hit_dice[&DieType::D8], 3);
        assert_eq!(stats.hit_dice[&DieType::D10], 2);
        assert_eq!(stats.total_hit_dice(), 5);
        assert_eq!(stats.slot_ceiling(1).unwrap(), 4);
        assert_eq!(stats.slot_ceiling(3).unwrap(), 0);
        assert!(matches!(
            stats.slot_ceiling(10),
            Err(ResourceError::InvalidSpellLevel(10))
        ));
    }

    #[test]
    fn test_bad_hit_die_is_rejected() {
        let mut stats = StatBlock::default();
        let mut referee = Referee::scripted([]);
        let err = stats
            .apply(&patch(r#"{"hit_dice": ["2d20"]}"#), "tester", &mut referee)
            .unwrap_err();
        assert!(matches!(err, ResourceError::InvalidHitDie(20)));
    }

    #[test]
    fn test_unknown_stat_key_fails() {
        assert!(serde_json::from_str::<StatPatch>(r#"{"strength": 10}"#).is_err());
    }

    #[test]
    fn test_skill_check_bonuses() {
        let mut stats = StatBlock::default();
        let mut referee = Referee::scripted([10, 10, 10, 10]);
        stats
            .apply(
                &patch(
                    r#"{"prof": 3, "dex": 14, "skills": ["stealth"], "expert": ["acrobatics"], "class_level": {"bard": 2}}"#,
                ),
                "bard",
                &mut referee,
            )
            .unwrap();

        let stealth = stats.roll_skill_check(Skill::Stealth, Advantage::Normal, "bard", &mut referee);
        let acro = stats.roll_skill_check(Skill::Acrobatics, Advantage::Normal, "bard", &mut referee);
        let arcana = stats.roll_skill_check(Skill::Arcana, Advantage::Normal, "bard", &mut referee);
        let save = stats.roll_saving_throw(Ability::Dexterity, Advantage::Normal, "bard", &mut referee);

        assert_eq!(stealth, 10 + 2 + 3);
        assert_eq!(acro, 10 + 2 + 6);
        // Jack of all trades: half proficiency, rounded down.
        assert_eq!(arcana, 10 + 1);
        // ...but never on saves.
        assert_eq!(save, 10 + 2);
    }

    #[test]
    fn test_spell_save_dc() {
        let mut stats = StatBlock::default();
        assert_eq!(stats.spell_save_dc(), None);
        stats.spellcasting = Some(Ability::Wisdom);
        stats.scores.wisdom = 16;
        stats.proficiency = 2;
        assert_eq!(stats.spell_save_dc(), Some(13));
    }

    #[test]
    fn test_genie_patron_parses_last_word() {
        let props: Properties =
            serde_json::from_str(r#"{"patron": "the_genie_efreeti", "color": "red"}"#).unwrap();
        assert_eq!(props.patron, Some(GeniePatron::Efreeti));
        assert_eq!(props.extra.get("color"), Some(&serde_json::json!("red")));
        assert_eq!(props.crit_threshold(), 20);
        assert!(serde_json::from_str::<Properties>(r#"{"patron": "genie_ifrit"}"#).is_err());
    }

    #[test]
    fn test_damage_type_names() {
        assert_eq!("m_bludgeoning".parse::<DamageType>(), Ok(DamageType::MagicBludgeoning));
        assert_eq!(
            serde_json::to_string(&DamageType::MagicBludgeoning).unwrap(),
            "\"m_bludgeoning\""
        );
        assert!("laser".parse::<DamageType>().is_err());
    }
}
