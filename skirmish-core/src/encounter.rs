//! The encounter loop.
//!
//! An [`Encounter`] owns every character, the tables and the referee. It
//! rolls initiative, then runs turns in initiative order: each character
//! picks actions by bias, aims them at random valid targets, and the
//! [`RulesEngine`] resolves them. Dead characters leave the good and bad
//! rosters, and the fight ends when either roster is empty or the round cap
//! is reached.

use crate::character::{Character, Side, StatRoll, Team};
use crate::conditions::Condition;
use crate::config::{CharacterTemplate, EncounterConfig, EncounterFile};
use crate::dice::Advantage;
use crate::resources::ActionCost;
use crate::rules::{ActionArgs, ActionError, Resolution, Roster, RulesEngine};
use crate::stats::Ability;
use crate::tables::{Handler, Routine, TableError, Tables, TargetKind};
use crate::trace::{Referee, TraceEvent};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncounterError {
    #[error("A character named {0} is already in the encounter")]
    DuplicateCharacter(String),
    #[error("Unknown character: {0}")]
    UnknownCharacter(String),
    #[error("The encounter is not ready: {0}")]
    NotReady(&'static str),
    #[error("{character} does not know the action {action}")]
    ActionNotKnown { character: String, action: String },
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error(transparent)]
    Table(#[from] TableError),
}

/// How an encounter ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncounterSummary {
    pub rounds: u32,
    /// `None` when the round cap was reached with both sides standing.
    pub winner: Option<Side>,
    pub survivors: Vec<String>,
    /// Rough in-world time the fight took.
    pub estimated_seconds: u64,
}

pub struct Encounter {
    tables: Tables,
    roster: Roster,
    referee: Referee,
    max_rounds: u32,
    /// Roster indices in turn order.
    initiative: Vec<usize>,
    good: Vec<usize>,
    bad: Vec<usize>,
    round: u32,
    elapsed: u64,
}

impl Encounter {
    pub fn new(tables: Tables, referee: Referee) -> Self {
        Self {
            tables,
            roster: Roster::new(),
            referee,
            max_rounds: crate::config::DEFAULT_MAX_ROUNDS,
            initiative: Vec::new(),
            good: Vec::new(),
            bad: Vec::new(),
            round: 0,
            elapsed: 0,
        }
    }

    /// An empty encounter with the config's tables, referee and round cap.
    pub fn from_config(config: &EncounterConfig) -> Result<Self, EncounterError> {
        let mut encounter = Self::new(config.load_tables()?, config.referee());
        encounter.max_rounds = config.max_rounds;
        Ok(encounter)
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    // ------------------------------------------------------------------------
    // Setup
    // ------------------------------------------------------------------------

    /// Add a ready-made character. Names must be unique.
    pub fn add_character(&mut self, character: Character) -> Result<usize, EncounterError> {
        if self.roster.index_of(&character.name).is_some() {
            return Err(EncounterError::DuplicateCharacter(character.name));
        }
        tracing::debug!(character = %character.name, team = %character.team, "joined the encounter");
        Ok(self.roster.push(character))
    }

    /// Add every instance of a template. Player characters keep their name
    /// and may appear once; other copies are numbered `name#1`, `name#2`,
    /// ... after the first. Returns the names added.
    pub fn add_template(&mut self, template: &CharacterTemplate) -> Result<Vec<String>, EncounterError> {
        let mut added = Vec::with_capacity(template.instances as usize);
        for _ in 0..template.instances.max(1) {
            let mut character = Character::from_template(template, &self.tables, &mut self.referee)?;
            if template.team != Team::Pc {
                character.name = self.instance_name(&template.name);
            }
            added.push(character.name.clone());
            self.add_character(character)?;
        }
        Ok(added)
    }

    pub fn add_file(&mut self, file: &EncounterFile) -> Result<(), EncounterError> {
        for template in &file.characters {
            self.add_template(template)?;
        }
        Ok(())
    }

    fn instance_name(&self, base: &str) -> String {
        if self.roster.index_of(base).is_none() {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{base}#{n}"))
            .find(|name| self.roster.index_of(name).is_none())
            .unwrap_or_else(|| base.to_string())
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn roster_mut(&mut self) -> &mut Roster {
        &mut self.roster
    }

    pub fn referee_mut(&mut self) -> &mut Referee {
        &mut self.referee
    }

    pub fn tables(&self) -> &Tables {
        &self.tables
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn estimated_seconds(&self) -> u64 {
        self.elapsed
    }

    /// Names in turn order.
    pub fn initiative_order(&self) -> Vec<&str> {
        self.initiative
            .iter()
            .filter_map(|&i| self.roster.get(i))
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Names still standing on `side`.
    pub fn side_roster(&self, side: Side) -> Vec<&str> {
        let members = match side {
            Side::Good => &self.good,
            Side::Bad => &self.bad,
        };
        members
            .iter()
            .filter_map(|&i| self.roster.get(i))
            .map(|c| c.name.as_str())
            .collect()
    }

    // ------------------------------------------------------------------------
    // Battle setup
    // ------------------------------------------------------------------------

    /// Everyone takes a long rest and the clock restarts.
    pub fn reset(&mut self) {
        for character in self.roster.iter_mut() {
            character.long_rest(&mut self.referee);
        }
        self.round = 0;
        self.elapsed = 0;
        self.initiative.clear();
        self.good.clear();
        self.bad.clear();
    }

    /// Roll a dexterity check for every living character and order turns
    /// from highest to lowest. Ties keep roster order.
    pub fn roll_initiative(&mut self) -> Result<(), EncounterError> {
        if self.roster.is_empty() {
            return Err(EncounterError::NotReady("no characters"));
        }
        let mut rolls: Vec<(i32, usize)> = Vec::with_capacity(self.roster.len());
        for (index, character) in self.roster.iter_mut().enumerate() {
            if character.is_dead() {
                continue;
            }
            let roll = character.roll_stat(
                StatRoll::Check(Ability::Dexterity),
                Advantage::Normal,
                &mut self.referee,
            );
            tracing::debug!(character = %character.name, roll, "initiative");
            rolls.push((roll, index));
        }
        rolls.sort_by(|a, b| b.0.cmp(&a.0));
        self.initiative = rolls.into_iter().map(|(_, index)| index).collect();

        self.good.clear();
        self.bad.clear();
        for &index in &self.initiative {
            if let Some(character) = self.roster.get(index) {
                match character.side() {
                    Side::Good => self.good.push(index),
                    Side::Bad => self.bad.push(index),
                }
            }
        }
        tracing::info!(order = ?self.initiative_order(), "initiative rolled");
        Ok(())
    }

    pub fn is_over(&self) -> bool {
        !self.initiative.is_empty() && (self.good.is_empty() || self.bad.is_empty())
    }

    pub fn winner(&self) -> Option<Side> {
        match (self.good.is_empty(), self.bad.is_empty()) {
            (false, true) => Some(Side::Good),
            (true, false) => Some(Side::Bad),
            _ => None,
        }
    }

    // ------------------------------------------------------------------------
    // Simulation
    // ------------------------------------------------------------------------

    /// Reset, roll initiative and fight until one side is gone or
    /// `max_rounds` have passed.
    pub fn simulate_to_end(&mut self) -> Result<EncounterSummary, EncounterError> {
        self.reset();
        self.roll_initiative()?;
        while self.round < self.max_rounds && !self.is_over() {
            self.simulate_round()?;
        }

        let winner = self.winner();
        self.referee.record(TraceEvent::EncounterEnded {
            rounds: self.round,
            winner,
        });
        Ok(EncounterSummary {
            rounds: self.round,
            winner,
            survivors: self
                .roster
                .iter()
                .filter(|c| !c.is_dead())
                .map(|c| c.name.clone())
                .collect(),
            estimated_seconds: self.elapsed,
        })
    }

    /// One turn for everyone in initiative order. Characters that die
    /// during the round lose their turn.
    pub fn simulate_round(&mut self) -> Result<(), EncounterError> {
        if self.initiative.is_empty() {
            return Err(EncounterError::NotReady("initiative has not been rolled"));
        }
        self.round += 1;
        self.referee.record(TraceEvent::RoundStarted { round: self.round });

        for index in self.initiative.clone() {
            if self.is_over() {
                break;
            }
            if !self.initiative.contains(&index) {
                continue;
            }
            self.simulate_turn(index)?;
        }
        Ok(())
    }

    /// Start the turn, spend every regular and bonus action in the order
    /// the character prefers, move once, and end the turn.
    pub fn simulate_turn(&mut self, index: usize) -> Result<(), EncounterError> {
        let ally_dying = self.ally_dying(index);
        let character = self
            .roster
            .get_mut(index)
            .ok_or_else(|| EncounterError::UnknownCharacter(format!("#{index}")))?;
        if character.is_dead() {
            return Ok(());
        }
        character.start_turn(&mut self.referee);
        let order = character.refresh_biases(ally_dying);

        for cost in order {
            let available = match self.roster.get(index) {
                Some(c) => match cost {
                    ActionCost::Regular => c.resources.regular,
                    ActionCost::Bonus => c.resources.bonus,
                    ActionCost::Movement => u32::from(c.resources.movement > 0.0),
                    _ => 0,
                },
                None => 0,
            };
            for _ in 0..available {
                if self.is_over() {
                    break;
                }
                self.take_random_action(index, cost)?;
            }
        }

        if let Some(character) = self.roster.get_mut(index) {
            character.end_turn(&mut self.referee);
        }
        self.remove_dead();
        Ok(())
    }

    fn ally_dying(&self, index: usize) -> bool {
        let Some(me) = self.roster.get(index) else {
            return false;
        };
        self.roster.iter().enumerate().any(|(i, c)| {
            i != index
                && c.side() == me.side()
                && c.has_condition(Condition::Dying)
        })
    }

    /// Choose and resolve one action of `cost` for the character at
    /// `index`. `None` when the character had nothing to do.
    pub fn take_random_action(
        &mut self,
        index: usize,
        cost: ActionCost,
    ) -> Result<Option<Resolution>, EncounterError> {
        let character = self
            .roster
            .get(index)
            .ok_or_else(|| EncounterError::UnknownCharacter(format!("#{index}")))?;
        let Some(action_name) = character.choose_action(cost, &mut self.referee) else {
            return Ok(None);
        };
        let action = character
            .actions
            .get(&action_name)
            .cloned()
            .ok_or_else(|| EncounterError::ActionNotKnown {
                character: character.name.clone(),
                action: action_name.clone(),
            })?;
        let actor = character.name.clone();
        let is_pc = character.team == Team::Pc;

        let mut args = ActionArgs::new();
        if let Routine::Attack { martial_arts: false, .. } = action.routine {
            match character.random_attack(&mut self.referee) {
                Some(attack) => args.attack = Some(attack),
                None => return Ok(None),
            }
        }
        let targets = self.random_targets(index, &action.targets);

        let engine = RulesEngine::new(&self.tables);
        let resolution = engine.resolve(
            &mut self.roster,
            &actor,
            &action_name,
            &targets,
            &args,
            &mut self.referee,
        )?;
        if resolution.had_effect() {
            self.elapsed += action_seconds(is_pc, resolution.handler);
        }
        self.remove_dead();
        Ok(Some(resolution))
    }

    /// One random target for an action aimed at `kinds`, drawn from the
    /// living rosters.
    fn random_targets(&mut self, index: usize, kinds: &std::collections::BTreeSet<TargetKind>) -> Vec<String> {
        let Some(me) = self.roster.get(index) else {
            return Vec::new();
        };
        let (own, other) = match me.side() {
            Side::Good => (&self.good, &self.bad),
            Side::Bad => (&self.bad, &self.good),
        };
        let pool: Vec<usize> = if kinds.contains(&TargetKind::Enemy) {
            other.clone()
        } else if kinds.contains(&TargetKind::Ally) && kinds.contains(&TargetKind::Self_) {
            own.clone()
        } else if kinds.contains(&TargetKind::Ally) {
            own.iter().copied().filter(|&i| i != index).collect()
        } else if kinds.contains(&TargetKind::Self_) {
            vec![index]
        } else if kinds.is_empty() {
            self.initiative.clone()
        } else {
            Vec::new()
        };
        self.referee
            .pick(pool.len())
            .and_then(|i| pool.get(i))
            .and_then(|&i| self.roster.get(i))
            .map(|c| vec![c.name.clone()])
            .unwrap_or_default()
    }

    fn remove_dead(&mut self) {
        let roster = &self.roster;
        let alive = |i: &usize| roster.get(*i).is_some_and(|c| !c.is_dead());
        self.initiative.retain(alive);
        self.good.retain(alive);
        self.bad.retain(alive);
    }
}

/// Seconds one action takes: a player's action is slower than a monster's,
/// and attacks, spells and movement scale it.
fn action_seconds(is_pc: bool, handler: Handler) -> u64 {
    let base = if is_pc { 10.0 } else { 5.0 };
    let factor = match handler {
        Handler::Attack => 1.5,
        Handler::Spell => 2.0,
        Handler::Movement => 1.1,
        _ => 1.0,
    };
    (base * factor) as u64
}

impl std::fmt::Debug for Encounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Encounter")
            .field("characters", &self.roster.len())
            .field("round", &self.round)
            .field("initiative", &self.initiative_order())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::Bias;
    use crate::stats::StatPatch;

    fn encounter(faces: impl IntoIterator<Item = u32>) -> Encounter {
        let tables = Tables::builtin().unwrap().clone();
        Encounter::new(tables, Referee::scripted(faces))
    }

    #[test]
    fn test_instances_are_numbered() {
        let mut encounter = encounter([]);
        let goblins = CharacterTemplate::new("goblin", Team::Enemy).with_instances(3);
        let added = encounter.add_template(&goblins).unwrap();
        assert_eq!(added, vec!["goblin", "goblin#1", "goblin#2"]);

        let more = encounter.add_template(&goblins.clone().with_instances(1)).unwrap();
        assert_eq!(more, vec!["goblin#3"]);
    }

    #[test]
    fn test_duplicate_player_is_rejected() {
        let mut encounter = encounter([]);
        let hero = CharacterTemplate::new("Brom", Team::Pc);
        encounter.add_template(&hero).unwrap();
        let again = encounter.add_template(&hero);
        assert!(matches!(again, Err(EncounterError::DuplicateCharacter(name)) if name == "Brom"));
    }

    #[test]
    fn test_round_needs_initiative() {
        let mut encounter = encounter([]);
        assert!(matches!(encounter.simulate_round(), Err(EncounterError::NotReady(_))));
        assert!(matches!(encounter.roll_initiative(), Err(EncounterError::NotReady(_))));
    }

    #[test]
    fn test_initiative_sorted_descending() {
        let mut encounter = encounter([4, 17, 11]);
        encounter
            .add_template(&CharacterTemplate::new("a", Team::Pc))
            .unwrap();
        encounter
            .add_template(&CharacterTemplate::new("b", Team::Ally))
            .unwrap();
        encounter
            .add_template(&CharacterTemplate::new("c", Team::Enemy))
            .unwrap();
        encounter.roll_initiative().unwrap();
        assert_eq!(encounter.initiative_order(), vec!["b", "c", "a"]);
        assert_eq!(encounter.side_roster(Side::Good), vec!["b", "a"]);
        assert_eq!(encounter.side_roster(Side::Bad), vec!["c"]);
    }

    #[test]
    fn test_action_time_estimates() {
        assert_eq!(action_seconds(true, Handler::Attack), 15);
        assert_eq!(action_seconds(false, Handler::Attack), 7);
        assert_eq!(action_seconds(true, Handler::Spell), 20);
        assert_eq!(action_seconds(false, Handler::Movement), 5);
        assert_eq!(action_seconds(true, Handler::Auto), 10);
    }

    #[test]
    fn test_fight_to_the_end_is_reproducible() {
        let hero = CharacterTemplate::new("hero", Team::Pc)
            .with_stats(StatPatch {
                max_hp: Some(crate::stats::MaxHp::Fixed(30)),
                ..StatPatch::default()
            })
            .with_attack("mace", Bias::HIGHEST);
        let rats = CharacterTemplate::new("rat", Team::Enemy).with_instances(2);

        let run = |seed: u64| {
            let config = EncounterConfig::new().with_seed(seed).with_max_rounds(50);
            let mut encounter = Encounter::from_config(&config).unwrap();
            encounter.add_template(&hero).unwrap();
            encounter.add_template(&rats).unwrap();
            encounter.simulate_to_end().unwrap()
        };

        let first = run(7);
        assert_eq!(first, run(7));
        assert!(first.rounds <= 50);
        if first.winner == Some(Side::Good) {
            assert_eq!(first.survivors, vec!["hero"]);
        }
    }
}
