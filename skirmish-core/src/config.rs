//! Encounter files and run settings.

use crate::character::{Bias, Team};
use crate::stats::{Properties, StatPatch};
use crate::tables::{parse_json, ActionDef, TableError, Tables};
use crate::trace::Referee;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default cap on rounds before an encounter is called a draw.
pub const DEFAULT_MAX_ROUNDS: u32 = 100;

/// Which actions a character receives beyond the default category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ActionInclusion {
    pub inc_category: Vec<String>,
    pub inc_action: Vec<String>,
    /// Actions defined only for this character.
    pub unique_actions: BTreeMap<String, ActionDef>,
}

fn one() -> u32 {
    1
}

/// One entry of an encounter file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CharacterTemplate {
    pub name: String,
    #[serde(default)]
    pub team: Team,
    #[serde(default)]
    pub stats: StatPatch,
    /// Known attacks and how often each is picked.
    #[serde(default)]
    pub attacks: BTreeMap<String, Bias>,
    #[serde(default)]
    pub actions: ActionInclusion,
    /// Bias overrides for actions already included.
    #[serde(default)]
    pub bias: BTreeMap<String, Bias>,
    /// Named counters, each starting at 1.
    #[serde(default)]
    pub resource: Vec<String>,
    #[serde(default)]
    pub property: Properties,
    /// Copies to add. More than one names them `name#1`, `name#2`, ...
    #[serde(default = "one")]
    pub instances: u32,
}

impl CharacterTemplate {
    pub fn new(name: impl Into<String>, team: Team) -> Self {
        Self {
            name: name.into(),
            team,
            stats: StatPatch::default(),
            attacks: BTreeMap::new(),
            actions: ActionInclusion::default(),
            bias: BTreeMap::new(),
            resource: Vec::new(),
            property: Properties::default(),
            instances: 1,
        }
    }

    pub fn with_stats(mut self, stats: StatPatch) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_attack(mut self, name: impl Into<String>, bias: Bias) -> Self {
        self.attacks.insert(name.into(), bias);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.actions.inc_category.push(category.into());
        self
    }

    pub fn with_action(mut self, name: impl Into<String>) -> Self {
        self.actions.inc_action.push(name.into());
        self
    }

    pub fn with_bias(mut self, action: impl Into<String>, bias: Bias) -> Self {
        self.bias.insert(action.into(), bias);
        self
    }

    pub fn with_resource(mut self, counter: impl Into<String>) -> Self {
        self.resource.push(counter.into());
        self
    }

    pub fn with_property(mut self, property: Properties) -> Self {
        self.property = property;
        self
    }

    pub fn with_instances(mut self, instances: u32) -> Self {
        self.instances = instances;
        self
    }
}

/// An encounter file: the characters taking part.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EncounterFile {
    #[serde(default)]
    pub name: Option<String>,
    pub characters: Vec<CharacterTemplate>,
}

impl EncounterFile {
    pub fn from_json(text: &str) -> Result<Self, TableError> {
        parse_json("encounter", text)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        parse_json(&path.display().to_string(), &text)
    }
}

/// Settings for one simulation run.
#[derive(Debug, Clone, PartialEq)]
pub struct EncounterConfig {
    pub seed: Option<u64>,
    pub max_rounds: u32,
    pub tables_dir: Option<PathBuf>,
    pub keep_journal: bool,
}

impl Default for EncounterConfig {
    fn default() -> Self {
        Self {
            seed: None,
            max_rounds: DEFAULT_MAX_ROUNDS,
            tables_dir: None,
            keep_journal: false,
        }
    }
}

impl EncounterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_tables_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.tables_dir = Some(dir.into());
        self
    }

    pub fn with_journal(mut self, keep: bool) -> Self {
        self.keep_journal = keep;
        self
    }

    /// A referee seeded from the config, or from entropy without a seed.
    pub fn referee(&self) -> Referee {
        let referee = match self.seed {
            Some(seed) => Referee::seeded(seed),
            None => Referee::from_entropy(),
        };
        if self.keep_journal {
            referee.recording()
        } else {
            referee
        }
    }

    /// The tables directory if one was given, the built-in tables otherwise.
    pub fn load_tables(&self) -> Result<Tables, TableError> {
        match &self.tables_dir {
            Some(dir) => Tables::from_dir(dir),
            None => Tables::builtin().cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::CharacterClass;

    #[test]
    fn test_template_from_json() {
        let file = EncounterFile::from_json(
            r#"{
                "characters": [{
                    "name": "Lia",
                    "team": "pc",
                    "stats": {"level": 3, "class_level": {"rogue": 3}, "dex": 16, "max_hp": 21},
                    "attacks": {"shortsword": 16},
                    "actions": {"inc_category": ["two_weapon_fighting"]},
                    "property": {"important": true}
                }, {
                    "name": "goblin",
                    "team": "monster",
                    "instances": 3
                }]
            }"#,
        )
        .unwrap();

        let lia = &file.characters[0];
        assert_eq!(lia.team, Team::Pc);
        assert_eq!(
            lia.stats.class_level.as_ref().unwrap().get(&CharacterClass::Rogue),
            Some(&3)
        );
        assert_eq!(lia.attacks.get("shortsword").map(|b| b.weight()), Some(16));
        assert!(lia.property.important);
        assert_eq!(lia.instances, 1);

        let goblin = &file.characters[1];
        assert_eq!(goblin.team, Team::Enemy);
        assert_eq!(goblin.instances, 3);
    }

    #[test]
    fn test_unknown_template_key_rejected() {
        let result = EncounterFile::from_json(r#"{"characters": [{"name": "x", "hats": 2}]}"#);
        assert!(matches!(result, Err(TableError::Json { .. })));
    }

    #[test]
    fn test_config_builder() {
        let config = EncounterConfig::new().with_seed(7).with_max_rounds(20).with_journal(true);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.max_rounds, 20);
        assert!(config.tables_dir.is_none());
        assert!(config.load_tables().is_ok());
    }
}
