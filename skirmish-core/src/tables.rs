//! Content tables: actions, attacks and spells.
//!
//! The three JSON files under `data/` are embedded at compile time and parsed
//! once into [`Tables`]. Every named effect (auto actions, special actions,
//! spell routines) is resolved into a typed variant while loading, so a name
//! without code behind it is a load error rather than a surprise mid-fight.

use crate::character::Bias;
use crate::conditions::{check_cascades, Condition, Duration, CASCADES};
use crate::dice::{DiceError, DiceSpec};
use crate::resources::{ActionCost, ResourceError};
use crate::stats::{Ability, DamageType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use thiserror::Error;

const ACTIONS_JSON: &str = include_str!("../data/actions.json");
const ATTACKS_JSON: &str = include_str!("../data/attacks.json");
const SPELLS_JSON: &str = include_str!("../data/spells.json");

/// Category every character receives.
pub const DEFAULT_CATEGORY: &str = "default";

#[derive(Debug, Error)]
pub enum TableError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid JSON in {file}: {source}")]
    Json {
        file: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    #[error("Unknown action category: {0}")]
    UnknownCategory(String),
    #[error("Unknown attack: {0}")]
    UnknownAttack(String),
    #[error("Unknown spell: {0}")]
    UnknownSpell(String),
    #[error("Invalid value for {field}: {value}")]
    InvalidField { field: String, value: String },
    #[error("No {kind} effect is coded for '{name}'")]
    UnhandledEffect { kind: &'static str, name: String },
    #[error("Condition cascade table has a cycle through {0}")]
    CascadeCycle(Condition),
    #[error("Built-in tables failed to load: {0}")]
    Builtin(String),
    #[error(transparent)]
    Stats(#[from] ResourceError),
    #[error(transparent)]
    Dice(#[from] DiceError),
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(file: &str, text: &str) -> Result<T, TableError> {
    serde_json::from_str(text).map_err(|source| TableError::Json {
        file: file.to_string(),
        source,
    })
}

// ============================================================================
// Actions
// ============================================================================

/// Who an action may be aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    #[serde(rename = "self")]
    Self_,
    Ally,
    Enemy,
}

/// Which resolver routine handles an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Handler {
    Attack,
    Spell,
    Movement,
    Auto,
    Contest,
    Special,
}

/// An action as written in `actions.json` or a template's `unique_actions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionDef {
    #[serde(rename = "type")]
    pub cost: ActionCost,
    #[serde(default)]
    pub targets: BTreeSet<TargetKind>,
    #[serde(rename = "handle")]
    pub handler: Handler,
    #[serde(default)]
    pub bias: Bias,
}

/// Self-targeted utility actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoEffect {
    LongRest,
    ShortRest,
    DeathSave,
    Dodge,
    WildShape,
    DropWildShape,
    SecondWind,
}

impl AutoEffect {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "long_rest" => Some(AutoEffect::LongRest),
            "short_rest" => Some(AutoEffect::ShortRest),
            "death_save" => Some(AutoEffect::DeathSave),
            "dodge" => Some(AutoEffect::Dodge),
            "wild_shape" => Some(AutoEffect::WildShape),
            "drop_wild_shape" => Some(AutoEffect::DropWildShape),
            "second_wind" => Some(AutoEffect::SecondWind),
            _ => None,
        }
    }
}

/// Single-target catch-all actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialEffect {
    Stabilize,
    BardicInspiration,
}

impl SpecialEffect {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "stabilize" => Some(SpecialEffect::Stabilize),
            "bardic_inspiration" => Some(SpecialEffect::BardicInspiration),
            _ => None,
        }
    }
}

/// What the resolver does for an action, decided once at load.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Routine {
    Attack {
        /// Multiplier on the attack's own multiattack count.
        scale: u32,
        offhand: bool,
        /// Always strikes unarmed, without naming an attack.
        martial_arts: bool,
    },
    Spell {
        spell: String,
        /// Spends one channel divinity charge.
        channel_divinity: bool,
    },
    Movement {
        /// Climbing, crawling and swimming cost an extra foot per foot.
        slow: bool,
    },
    Auto(AutoEffect),
    Contest,
    Special(SpecialEffect),
}

/// A loaded action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Action {
    pub name: String,
    pub cost: ActionCost,
    pub targets: BTreeSet<TargetKind>,
    pub routine: Routine,
    pub bias: Bias,
}

impl Action {
    pub fn handler(&self) -> Handler {
        match self.routine {
            Routine::Attack { .. } => Handler::Attack,
            Routine::Spell { .. } => Handler::Spell,
            Routine::Movement { .. } => Handler::Movement,
            Routine::Auto(_) => Handler::Auto,
            Routine::Contest => Handler::Contest,
            Routine::Special(_) => Handler::Special,
        }
    }
}

/// Spell named by an action: `cast_<spell>[ <note>]`, `cd_<spell>`, or the
/// bare spell-like feature name.
fn spell_for_action(name: &str) -> (String, bool) {
    if let Some(rest) = name.strip_prefix("cast_") {
        let spell = rest.split(' ').next().unwrap_or(rest);
        (spell.to_string(), false)
    } else if let Some(rest) = name.strip_prefix("cd_") {
        (rest.to_string(), true)
    } else {
        (name.to_string(), false)
    }
}

// ============================================================================
// Attacks
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeaponProperty {
    Ammunition,
    Finesse,
    Heavy,
    Light,
    Loading,
    MonkWeapon,
    Reach,
    Thrown,
    TwoHanded,
    Versatile,
}

/// One damage component, written `"<dice> [ability] <type>"`, e.g.
/// `"1d8+1 str slashing"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DamageEntry {
    pub dice: DiceSpec,
    pub ability: Option<Ability>,
    pub damage_type: DamageType,
}

impl DamageEntry {
    pub fn new(dice: DiceSpec, ability: Option<Ability>, damage_type: DamageType) -> Self {
        Self {
            dice,
            ability,
            damage_type,
        }
    }

    pub fn parse(s: &str) -> Result<Self, TableError> {
        let invalid = || TableError::InvalidField {
            field: "damage".to_string(),
            value: s.to_string(),
        };
        let parts: Vec<&str> = s.split_whitespace().collect();
        let (dice, ability, kind) = match parts.as_slice() {
            [dice, kind] => (*dice, None, *kind),
            [dice, ability, kind] => (*dice, Some(ability.parse::<Ability>().map_err(|_| invalid())?), *kind),
            _ => return Err(invalid()),
        };
        Ok(Self {
            dice: DiceSpec::parse(dice)?,
            ability,
            damage_type: kind.parse::<DamageType>().map_err(|_| invalid())?,
        })
    }
}

impl TryFrom<String> for DamageEntry {
    type Error = TableError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DamageEntry::parse(&value)
    }
}

impl From<DamageEntry> for String {
    fn from(entry: DamageEntry) -> Self {
        entry.to_string()
    }
}

impl fmt::Display for DamageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ability {
            Some(ability) => write!(f, "{} {} {}", self.dice, ability, self.damage_type),
            None => write!(f, "{} {}", self.dice, self.damage_type),
        }
    }
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttackDef {
    pub ability: Ability,
    pub damage: Vec<DamageEntry>,
    /// Proficiency tags. `["all"]` means everyone is proficient.
    #[serde(rename = "type")]
    pub proficiency: BTreeSet<String>,
    #[serde(default)]
    pub hitmod: i32,
    #[serde(default = "one")]
    pub multi: u32,
    #[serde(default)]
    pub properties: BTreeSet<WeaponProperty>,
}

impl AttackDef {
    pub fn has(&self, property: WeaponProperty) -> bool {
        self.properties.contains(&property)
    }

    pub fn is_ranged(&self) -> bool {
        self.proficiency.contains("simple_ranged_weapon")
            || self.proficiency.contains("martial_ranged_weapon")
    }

    pub fn everyone_proficient(&self) -> bool {
        self.proficiency.len() == 1 && self.proficiency.contains("all")
    }
}

// ============================================================================
// Spells
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpellSchool {
    Abjuration,
    Conjuration,
    Divination,
    Enchantment,
    Evocation,
    Illusion,
    Necromancy,
    Transmutation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpellDef {
    pub level: u8,
    pub school: SpellSchool,
    pub cast: ActionCost,
    #[serde(default)]
    pub target: BTreeSet<TargetKind>,
    #[serde(default)]
    pub concentration: bool,
    pub duration: Duration,
}

/// Spell routines with code behind them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpellEffect {
    RadianceOfTheDawn,
    Shillelagh,
    Unstoppable,
    CureWounds,
    HealingWord,
    MagicMissile,
    GuidingBolt,
}

impl SpellEffect {
    /// The routine for `name`, provided it is coded for `level`.
    pub fn for_spell(name: &str, level: u8) -> Option<Self> {
        let effect = match name {
            "radiance_of_the_dawn" => SpellEffect::RadianceOfTheDawn,
            "shillelagh" => SpellEffect::Shillelagh,
            "unstoppable" => SpellEffect::Unstoppable,
            "cure_wounds" => SpellEffect::CureWounds,
            "healing_word" => SpellEffect::HealingWord,
            "magic_missile" => SpellEffect::MagicMissile,
            "guiding_bolt" => SpellEffect::GuidingBolt,
            _ => return None,
        };
        (effect.level() == level).then_some(effect)
    }

    pub fn level(&self) -> u8 {
        match self {
            SpellEffect::RadianceOfTheDawn | SpellEffect::Shillelagh | SpellEffect::Unstoppable => 0,
            SpellEffect::CureWounds
            | SpellEffect::HealingWord
            | SpellEffect::MagicMissile
            | SpellEffect::GuidingBolt => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Spell {
    pub name: String,
    pub level: u8,
    pub school: SpellSchool,
    pub cast: ActionCost,
    pub target: BTreeSet<TargetKind>,
    pub concentration: bool,
    pub duration: Duration,
    pub effect: SpellEffect,
}

impl Spell {
    fn load(name: &str, def: SpellDef) -> Result<Self, TableError> {
        if def.level > 9 {
            return Err(TableError::InvalidField {
                field: format!("{name}.level"),
                value: def.level.to_string(),
            });
        }
        if !matches!(
            def.cast,
            ActionCost::Regular | ActionCost::Bonus | ActionCost::Reaction
        ) {
            return Err(TableError::InvalidField {
                field: format!("{name}.cast"),
                value: def.cast.to_string(),
            });
        }
        let effect =
            SpellEffect::for_spell(name, def.level).ok_or_else(|| TableError::UnhandledEffect {
                kind: "spell",
                name: format!("{name} (level {})", def.level),
            })?;
        Ok(Self {
            name: name.to_string(),
            level: def.level,
            school: def.school,
            cast: def.cast,
            target: def.target,
            concentration: def.concentration,
            duration: def.duration,
            effect,
        })
    }
}

// ============================================================================
// Tables
// ============================================================================

/// All loaded content.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    actions: BTreeMap<String, Action>,
    categories: BTreeMap<String, Vec<String>>,
    attacks: BTreeMap<String, AttackDef>,
    spells: BTreeMap<String, Spell>,
}

lazy_static::lazy_static! {
    /// The embedded tables, parsed on first use.
    static ref BUILTIN: Result<Tables, String> =
        Tables::from_json(ACTIONS_JSON, ATTACKS_JSON, SPELLS_JSON).map_err(|e| e.to_string());
}

impl Tables {
    /// The tables shipped with the crate.
    pub fn builtin() -> Result<&'static Tables, TableError> {
        BUILTIN.as_ref().map_err(|e| TableError::Builtin(e.clone()))
    }

    /// Load `actions.json`, `attacks.json` and `spells.json` from `dir`.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, TableError> {
        let dir = dir.as_ref();
        let actions = std::fs::read_to_string(dir.join("actions.json"))?;
        let attacks = std::fs::read_to_string(dir.join("attacks.json"))?;
        let spells = std::fs::read_to_string(dir.join("spells.json"))?;
        tracing::info!(dir = %dir.display(), "loading tables from disk");
        Self::from_json(&actions, &attacks, &spells)
    }

    pub fn from_json(actions: &str, attacks: &str, spells: &str) -> Result<Self, TableError> {
        check_cascades(CASCADES).map_err(TableError::CascadeCycle)?;

        let mut tables = Tables::default();

        let spell_defs: BTreeMap<String, SpellDef> = parse_json("spells.json", spells)?;
        for (name, def) in spell_defs {
            let spell = Spell::load(&name, def)?;
            tables.spells.insert(name, spell);
        }

        tables.attacks = parse_json("attacks.json", attacks)?;

        let categories: BTreeMap<String, BTreeMap<String, ActionDef>> =
            parse_json("actions.json", actions)?;
        if !categories.contains_key(DEFAULT_CATEGORY) {
            return Err(TableError::UnknownCategory(DEFAULT_CATEGORY.to_string()));
        }
        for (category, defs) in categories {
            let mut names = Vec::with_capacity(defs.len());
            for (name, def) in defs {
                let action = tables.resolve_action(&name, &def)?;
                names.push(name.clone());
                tables.actions.insert(name, action);
            }
            tables.categories.insert(category, names);
        }

        tracing::debug!(
            actions = tables.actions.len(),
            attacks = tables.attacks.len(),
            spells = tables.spells.len(),
            "tables loaded"
        );
        Ok(tables)
    }

    /// Resolve an action definition into its routine. Used for table entries
    /// and for actions defined inline by a character template.
    pub fn resolve_action(&self, name: &str, def: &ActionDef) -> Result<Action, TableError> {
        let routine = match def.handler {
            Handler::Attack => Routine::Attack {
                scale: match name {
                    "extra_attack" => 2,
                    "extra_attack_3" => 3,
                    "extra_attack_4" => 4,
                    _ => 1,
                },
                offhand: name.contains("offhand"),
                martial_arts: name == "martial_arts",
            },
            Handler::Spell => {
                let (spell, channel_divinity) = spell_for_action(name);
                if !self.spells.contains_key(&spell) {
                    return Err(TableError::UnknownSpell(spell));
                }
                Routine::Spell {
                    spell,
                    channel_divinity,
                }
            }
            Handler::Movement => Routine::Movement {
                slow: matches!(name, "climb" | "crawl" | "swim"),
            },
            Handler::Auto => Routine::Auto(AutoEffect::from_name(name).ok_or_else(|| {
                TableError::UnhandledEffect {
                    kind: "auto",
                    name: name.to_string(),
                }
            })?),
            Handler::Contest => Routine::Contest,
            Handler::Special => {
                Routine::Special(SpecialEffect::from_name(name).ok_or_else(|| {
                    TableError::UnhandledEffect {
                        kind: "special",
                        name: name.to_string(),
                    }
                })?)
            }
        };
        Ok(Action {
            name: name.to_string(),
            cost: def.cost,
            targets: def.targets.clone(),
            routine,
            bias: def.bias,
        })
    }

    pub fn action(&self, name: &str) -> Result<&Action, TableError> {
        self.actions
            .get(name)
            .ok_or_else(|| TableError::UnknownAction(name.to_string()))
    }

    /// Action names in a category.
    pub fn category(&self, name: &str) -> Result<&[String], TableError> {
        self.categories
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| TableError::UnknownCategory(name.to_string()))
    }

    pub fn attack(&self, name: &str) -> Result<&AttackDef, TableError> {
        self.attacks
            .get(name)
            .ok_or_else(|| TableError::UnknownAttack(name.to_string()))
    }

    pub fn has_attack(&self, name: &str) -> bool {
        self.attacks.contains_key(name)
    }

    pub fn spell(&self, name: &str) -> Result<&Spell, TableError> {
        self.spells
            .get(name)
            .ok_or_else(|| TableError::UnknownSpell(name.to_string()))
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.values()
    }
}
