//! Dice notation and rolling.
//!
//! Content tables use the compact `NdF+M` notation (`2d6+3`, `1d8`,
//! `0d0+2`). Every roll draws faces from an explicit [`RollSource`], so an
//! encounter can be replayed from a seed and tests can script exact faces.

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for dice parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiceError {
    #[error("Invalid dice notation: {0}")]
    InvalidNotation(String),
    #[error("Too many modifiers in dice notation: {0}")]
    TooManyModifiers(String),
    #[error("Invalid die size: {0}")]
    InvalidDieSize(u32),
}

/// Advantage state for d20 rolls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Advantage {
    #[default]
    Normal,
    Advantage,
    Disadvantage,
}

impl Advantage {
    /// Collapse a signed tally of advantage sources.
    ///
    /// Only the sign matters: three sources of advantage against one of
    /// disadvantage is still a single advantage.
    pub fn from_tally(tally: i32) -> Advantage {
        match tally.signum() {
            1 => Advantage::Advantage,
            -1 => Advantage::Disadvantage,
            _ => Advantage::Normal,
        }
    }

    /// The signed contribution of this state to a tally.
    pub fn tally(self) -> i32 {
        match self {
            Advantage::Normal => 0,
            Advantage::Advantage => 1,
            Advantage::Disadvantage => -1,
        }
    }

    /// Combine two advantage states (advantage + disadvantage = normal).
    pub fn combine(self, other: Advantage) -> Advantage {
        match (self, other) {
            (Advantage::Normal, x) | (x, Advantage::Normal) => x,
            (Advantage::Advantage, Advantage::Disadvantage) => Advantage::Normal,
            (Advantage::Disadvantage, Advantage::Advantage) => Advantage::Normal,
            (Advantage::Advantage, Advantage::Advantage) => Advantage::Advantage,
            (Advantage::Disadvantage, Advantage::Disadvantage) => Advantage::Disadvantage,
        }
    }
}

/// Standard die types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DieType {
    D4,
    D6,
    D8,
    D10,
    D12,
    D20,
    D100,
}

impl DieType {
    pub fn sides(&self) -> u32 {
        match self {
            DieType::D4 => 4,
            DieType::D6 => 6,
            DieType::D8 => 8,
            DieType::D10 => 10,
            DieType::D12 => 12,
            DieType::D20 => 20,
            DieType::D100 => 100,
        }
    }

    pub fn from_sides(sides: u32) -> Option<DieType> {
        match sides {
            4 => Some(DieType::D4),
            6 => Some(DieType::D6),
            8 => Some(DieType::D8),
            10 => Some(DieType::D10),
            12 => Some(DieType::D12),
            20 => Some(DieType::D20),
            100 => Some(DieType::D100),
            _ => None,
        }
    }

    /// Die sizes that can make up a hit-dice pool.
    pub fn hit_dice() -> [DieType; 4] {
        [DieType::D6, DieType::D8, DieType::D10, DieType::D12]
    }

    pub fn is_hit_die(&self) -> bool {
        matches!(self, DieType::D6 | DieType::D8 | DieType::D10 | DieType::D12)
    }
}

impl fmt::Display for DieType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.sides())
    }
}

// ============================================================================
// Notation
// ============================================================================

/// A parsed `NdF+M` expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DiceSpec {
    pub count: u32,
    pub faces: u32,
    pub modifier: i32,
}

impl DiceSpec {
    pub fn new(count: u32, faces: u32, modifier: i32) -> Self {
        Self {
            count,
            faces,
            modifier,
        }
    }

    /// Parse `<int>d<int>[+<int>]`.
    pub fn parse(notation: &str) -> Result<Self, DiceError> {
        let notation = notation.trim();
        let invalid = || DiceError::InvalidNotation(notation.to_string());

        let mut plus_split = notation.split('+');
        let dice_part = plus_split.next().ok_or_else(invalid)?;
        let modifier = match (plus_split.next(), plus_split.next()) {
            (None, _) => 0,
            (Some(m), None) => m.trim().parse::<i32>().map_err(|_| invalid())?,
            (Some(_), Some(_)) => return Err(DiceError::TooManyModifiers(notation.to_string())),
        };

        let d_split: Vec<&str> = dice_part.split('d').collect();
        if d_split.len() != 2 {
            return Err(invalid());
        }
        let count = d_split[0].trim().parse::<u32>().map_err(|_| invalid())?;
        let faces = d_split[1].trim().parse::<u32>().map_err(|_| invalid())?;

        Ok(Self::new(count, faces, modifier))
    }

    /// The same expression with its dice count doubled, as on a critical hit.
    pub fn doubled_dice(&self) -> Self {
        Self::new(self.count * 2, self.faces, self.modifier)
    }

    /// Die type for standard face counts.
    pub fn die_type(&self) -> Option<DieType> {
        DieType::from_sides(self.faces)
    }
}

impl FromStr for DiceSpec {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiceSpec::parse(s)
    }
}

impl TryFrom<String> for DiceSpec {
    type Error = DiceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DiceSpec::parse(&value)
    }
}

impl From<DiceSpec> for String {
    fn from(spec: DiceSpec) -> Self {
        spec.to_string()
    }
}

impl fmt::Display for DiceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.modifier {
            0 => write!(f, "{}d{}", self.count, self.faces),
            m if m > 0 => write!(f, "{}d{}+{}", self.count, self.faces, m),
            m => write!(f, "{}d{}-{}", self.count, self.faces, m.abs()),
        }
    }
}

// ============================================================================
// Random sources
// ============================================================================

/// The single source of nondeterminism in a simulation.
pub trait RollSource: Send {
    /// Draw one face in `1..=faces`. Callers only ask for `faces >= 2`.
    fn roll(&mut self, faces: u32) -> u32;
}

/// A [`RollSource`] backed by any `rand` generator.
pub struct RngRolls<R>(pub R);

impl RngRolls<StdRng> {
    pub fn seeded(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self(StdRng::from_entropy())
    }
}

impl<R: RngCore + Send> RollSource for RngRolls<R> {
    fn roll(&mut self, faces: u32) -> u32 {
        self.0.gen_range(1..=faces)
    }
}

/// Pre-chosen faces, handed out in order.
///
/// Each value is clamped to the die being rolled. Once the queue runs dry
/// every roll yields the fallback face (1 unless changed with [`Self::then`]).
#[derive(Debug, Clone, Default)]
pub struct ScriptedRolls {
    queue: VecDeque<u32>,
    fallback: u32,
}

impl ScriptedRolls {
    pub fn new(faces: impl IntoIterator<Item = u32>) -> Self {
        Self {
            queue: faces.into_iter().collect(),
            fallback: 1,
        }
    }

    pub fn then(mut self, fallback: u32) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn push(&mut self, face: u32) {
        self.queue.push_back(face);
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl RollSource for ScriptedRolls {
    fn roll(&mut self, faces: u32) -> u32 {
        self.queue
            .pop_front()
            .unwrap_or(self.fallback)
            .clamp(1, faces)
    }
}

// ============================================================================
// Rolling
// ============================================================================

/// Result of a roll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollResult {
    pub notation: String,
    /// Every face drawn, in order.
    pub rolls: Vec<u32>,
    /// Faces that count toward the total.
    pub kept: Vec<u32>,
    pub modifier: i32,
    pub total: i32,
}

impl RollResult {
    fn fixed(notation: String, total: i32) -> Self {
        Self {
            notation,
            rolls: Vec::new(),
            kept: Vec::new(),
            modifier: 0,
            total,
        }
    }

    /// The kept face of a single-die roll.
    pub fn natural(&self) -> Option<u32> {
        match self.kept.as_slice() {
            [face] => Some(*face),
            _ => None,
        }
    }
}

impl fmt::Display for RollResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={} {:?}", self.notation, self.total, self.rolls)
    }
}

/// Dice roller over a boxed [`RollSource`].
pub struct Dice {
    source: Box<dyn RollSource>,
}

impl Dice {
    pub fn new(source: impl RollSource + 'static) -> Self {
        Self {
            source: Box::new(source),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(RngRolls::seeded(seed))
    }

    pub fn from_entropy() -> Self {
        Self::new(RngRolls::from_entropy())
    }

    pub fn scripted(faces: impl IntoIterator<Item = u32>) -> Self {
        Self::new(ScriptedRolls::new(faces))
    }

    /// Roll `count` dice with `faces` sides and sum them.
    ///
    /// Degenerate dice never touch the random source: no faces or no dice
    /// is 0, a one-sided die is always 1.
    pub fn roll_die(&mut self, faces: u32, count: u32) -> RollResult {
        let notation = format!("{count}d{faces}");
        if faces < 1 || count < 1 {
            return RollResult::fixed(notation, 0);
        }
        if faces == 1 {
            return RollResult::fixed(notation, count as i32);
        }

        let rolls: Vec<u32> = (0..count).map(|_| self.source.roll(faces)).collect();
        let total = rolls.iter().sum::<u32>() as i32;
        RollResult {
            notation,
            kept: rolls.clone(),
            rolls,
            modifier: 0,
            total,
        }
    }

    /// Roll a parsed expression, modifier included.
    pub fn roll_spec(&mut self, spec: &DiceSpec) -> RollResult {
        let mut result = self.roll_die(spec.faces, spec.count);
        result.notation = spec.to_string();
        result.modifier = spec.modifier;
        result.total += spec.modifier;
        result
    }

    /// Roll a d20, twice with advantage or disadvantage.
    pub fn roll_d20(&mut self, advantage: Advantage) -> RollResult {
        let first = self.source.roll(20);
        let (rolls, kept) = match advantage {
            Advantage::Normal => (vec![first], first),
            Advantage::Advantage => {
                let second = self.source.roll(20);
                (vec![first, second], first.max(second))
            }
            Advantage::Disadvantage => {
                let second = self.source.roll(20);
                (vec![first, second], first.min(second))
            }
        };
        let notation = match advantage {
            Advantage::Normal => "d20",
            Advantage::Advantage => "d20(adv)",
            Advantage::Disadvantage => "d20(dis)",
        };
        RollResult {
            notation: notation.to_string(),
            rolls,
            kept: vec![kept],
            modifier: 0,
            total: kept as i32,
        }
    }

    /// Uniform index into a collection of `len` items.
    pub fn pick(&mut self, len: usize) -> Option<usize> {
        match len {
            0 => None,
            1 => Some(0),
            n => Some(self.source.roll(n as u32) as usize - 1),
        }
    }
}

impl fmt::Debug for Dice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dice").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let spec = DiceSpec::parse("1d20").unwrap();
        assert_eq!(spec, DiceSpec::new(1, 20, 0));
    }

    #[test]
    fn test_parse_with_modifier() {
        let spec: DiceSpec = "2d6+3".parse().unwrap();
        assert_eq!(spec.faces, 6);
        assert_eq!(spec.count, 2);
        assert_eq!(spec.modifier, 3);
        assert_eq!(spec.to_string(), "2d6+3");
        assert_eq!(DiceSpec::parse(&spec.to_string()).unwrap(), spec);
    }

    #[test]
    fn test_parse_zero_dice_flat_bonus() {
        let spec = DiceSpec::parse("0d0+2").unwrap();
        assert_eq!(spec, DiceSpec::new(0, 0, 2));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            DiceSpec::parse("2d6+1+1"),
            Err(DiceError::TooManyModifiers(_))
        ));
        assert!(matches!(
            DiceSpec::parse("d6"),
            Err(DiceError::InvalidNotation(_))
        ));
        assert!(matches!(
            DiceSpec::parse("2x6"),
            Err(DiceError::InvalidNotation(_))
        ));
        assert!(matches!(
            DiceSpec::parse("2d6d4"),
            Err(DiceError::InvalidNotation(_))
        ));
        assert!(DiceSpec::parse("2d6-1").is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let spec: DiceSpec = serde_json::from_str("\"1d8+2\"").unwrap();
        assert_eq!(spec, DiceSpec::new(1, 8, 2));
        assert_eq!(serde_json::to_string(&spec).unwrap(), "\"1d8+2\"");
    }

    #[test]
    fn test_degenerate_dice_skip_randomness() {
        // An empty script would yield the fallback face if consulted.
        let mut dice = Dice::new(ScriptedRolls::new([]).then(7));
        assert_eq!(dice.roll_die(0, 1).total, 0);
        assert_eq!(dice.roll_die(6, 0).total, 0);
        assert_eq!(dice.roll_die(1, 5).total, 5);
        assert!(dice.roll_die(1, 5).rolls.is_empty());
    }

    #[test]
    fn test_scripted_faces_are_clamped() {
        let mut dice = Dice::scripted([9, 3]);
        let result = dice.roll_die(6, 2);
        assert_eq!(result.rolls, vec![6, 3]);
        assert_eq!(result.total, 9);
    }

    #[test]
    fn test_roll_spec_adds_modifier() {
        let mut dice = Dice::scripted([4, 5]);
        let result = dice.roll_spec(&DiceSpec::new(2, 6, 3));
        assert_eq!(result.total, 12);
        assert_eq!(result.notation, "2d6+3");
    }

    #[test]
    fn test_d20_advantage_and_disadvantage() {
        let mut dice = Dice::scripted([5, 17, 5, 17]);
        assert_eq!(dice.roll_d20(Advantage::Advantage).natural(), Some(17));
        assert_eq!(dice.roll_d20(Advantage::Disadvantage).natural(), Some(5));
    }

    #[test]
    fn test_advantage_tally_uses_sign_only() {
        assert_eq!(Advantage::from_tally(3), Advantage::Advantage);
        assert_eq!(Advantage::from_tally(-2), Advantage::Disadvantage);
        assert_eq!(Advantage::from_tally(0), Advantage::Normal);
    }

    #[test]
    fn test_seeded_rolls_repeat() {
        let mut a = Dice::seeded(42);
        let mut b = Dice::seeded(42);
        for _ in 0..20 {
            assert_eq!(
                a.roll_die(20, 1).total,
                b.roll_die(20, 1).total
            );
        }
    }

    #[test]
    fn test_roll_range() {
        let mut dice = Dice::from_entropy();
        for _ in 0..100 {
            let result = dice.roll_spec(&DiceSpec::new(1, 20, 5));
            assert!(result.total >= 6 && result.total <= 25);
        }
    }

    #[test]
    fn test_advantage_combine() {
        assert_eq!(
            Advantage::Normal.combine(Advantage::Advantage),
            Advantage::Advantage
        );
        assert_eq!(
            Advantage::Advantage.combine(Advantage::Disadvantage),
            Advantage::Normal
        );
    }
}
