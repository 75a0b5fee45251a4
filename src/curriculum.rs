//! The ordered catalog of levels a learner progresses through.
//!
//! Each [`Level`] owns an exhaustive, deterministic list of fact ids which is
//! computed once at construction. Level order is the progression order, so
//! lookups that walk the catalog ([`Curriculum::level_for_equation`]) are
//! order-dependent where fact sets overlap.

use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::equation::{Equation, FactId, Operation};
use crate::models::MasteryMap;

/// Chance that a generated sum or difference is phrased with a missing operand.
const INVERSE_FORM_PROBABILITY: f64 = 0.25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelKind {
    /// Every `a + b` with `a + b <= max`.
    SumsUpTo(i32),
    /// Every `a + b` whose sum lies in `min..=max`.
    SumsBetween { min: i32, max: i32 },
    Doubles,
    NearDoubles,
    MakingTens,
    /// Single digit sums that cross ten, e.g. `8 + 5`.
    CrossingTen,
    AddingTens,
    /// Every `a - b` with `a` in `min..=max` and `b <= a`.
    SubtractionFrom { min: i32, max: i32 },
    SubtractingTens,
    Table(i32),
    DivisionBy(i32),
    /// Union of the listed levels' facts.
    MixedReview(Vec<String>),
    /// An explicit fact list.
    #[cfg(test)]
    Custom,
}

#[derive(Debug, Clone)]
pub struct Level {
    id: String,
    operation: Operation,
    kind: LevelKind,
    facts: Vec<FactId>,
    index: HashSet<FactId>,
}

impl Level {
    pub fn new(id: impl Into<String>, operation: Operation, kind: LevelKind) -> Self {
        let facts = enumerate_facts(operation, &kind);
        Self::with_facts(id.into(), operation, kind, facts)
    }

    #[cfg(test)]
    pub fn from_facts(id: impl Into<String>, operation: Operation, facts: Vec<FactId>) -> Self {
        Self::with_facts(id.into(), operation, LevelKind::Custom, facts)
    }

    pub fn mixed_review(id: impl Into<String>, operation: Operation, levels: &[&Level]) -> Self {
        let ids = levels.iter().map(|l| l.id.clone()).collect();
        let facts = levels.iter().flat_map(|l| l.facts.iter().copied()).collect();
        Self::with_facts(id.into(), operation, LevelKind::MixedReview(ids), facts)
    }

    fn with_facts(id: String, operation: Operation, kind: LevelKind, facts: Vec<FactId>) -> Self {
        let mut index = HashSet::with_capacity(facts.len());
        let facts: Vec<FactId> = facts.into_iter().filter(|f| index.insert(*f)).collect();
        Self {
            id,
            operation,
            kind,
            facts,
            index,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn fact_ids(&self) -> &[FactId] {
        &self.facts
    }

    pub fn contains(&self, fact: &FactId) -> bool {
        self.index.contains(fact)
    }

    pub fn is_mixed_review(&self) -> bool {
        matches!(self.kind, LevelKind::MixedReview(_))
    }

    /// Largest operand or result appearing in any of the level's facts.
    pub fn max_number(&self) -> i32 {
        self.facts
            .iter()
            .map(|f| f.op1.max(f.op2).max(f.equation().expected_result()))
            .max()
            .unwrap_or(0)
    }

    pub fn description(&self) -> String {
        match &self.kind {
            LevelKind::SumsUpTo(max) => format!("Sums up to {}", max),
            LevelKind::SumsBetween { min, max } => format!("Sums from {} to {}", min, max),
            LevelKind::Doubles => "Doubles".to_string(),
            LevelKind::NearDoubles => "Near doubles".to_string(),
            LevelKind::MakingTens => "Making 10".to_string(),
            LevelKind::CrossingTen => "Sums over 10".to_string(),
            LevelKind::AddingTens => "Adding tens".to_string(),
            LevelKind::SubtractionFrom { min, max } => {
                format!("Subtracting from {} to {}", min, max)
            }
            LevelKind::SubtractingTens => "Subtracting tens".to_string(),
            LevelKind::Table(n) => format!("{} times table", n),
            LevelKind::DivisionBy(d) => format!("Dividing by {}", d),
            LevelKind::MixedReview(ids) => format!("Review of {}", ids.join(", ")),
            #[cfg(test)]
            LevelKind::Custom => self.id.clone(),
        }
    }

    /// Phrases `fact` as a question. Sums and differences sometimes come out
    /// with a missing operand; the fact id is the same either way.
    pub fn present<R: Rng + ?Sized>(&self, fact: FactId, rng: &mut R) -> Equation {
        if self.allows_inverse_form() && rng.gen_bool(INVERSE_FORM_PROBABILITY) {
            fact.inverse_equation().unwrap_or_else(|| fact.equation())
        } else {
            fact.equation()
        }
    }

    /// A random exercise from this level, or `None` for an empty level.
    pub fn generate_exercise<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Equation> {
        let fact = *self.facts.choose(rng)?;
        Some(self.present(fact, rng))
    }

    fn allows_inverse_form(&self) -> bool {
        matches!(
            self.kind,
            LevelKind::SumsUpTo(_)
                | LevelKind::SumsBetween { .. }
                | LevelKind::SubtractionFrom { .. }
        )
    }

    /// Share of facts at or above `mastery_strength`. An empty level counts as done.
    pub fn progress(&self, mastery: &MasteryMap, mastery_strength: u8) -> f64 {
        if self.facts.is_empty() {
            return 1.0;
        }
        let mastered = self
            .facts
            .iter()
            .filter(|f| strength_of(mastery, f) >= mastery_strength)
            .count();
        mastered as f64 / self.facts.len() as f64
    }

    pub fn is_mastered(&self, mastery: &MasteryMap, mastery_strength: u8) -> bool {
        self.progress(mastery, mastery_strength) >= 1.0
    }

    /// Progress that credits partial learning: strength 1-3 counts 0.1, 4 counts 0.5.
    pub fn weighted_progress(&self, mastery: &MasteryMap) -> f64 {
        if self.facts.is_empty() {
            return 1.0;
        }
        let total: f64 = self
            .facts
            .iter()
            .map(|f| match strength_of(mastery, f) {
                0 => 0.0,
                1..=3 => 0.1,
                4 => 0.5,
                _ => 1.0,
            })
            .sum();
        total / self.facts.len() as f64
    }

    pub fn stars(&self, mastery: &MasteryMap) -> u8 {
        (self.weighted_progress(mastery) * 3.0) as u8
    }
}

pub(crate) fn strength_of(mastery: &MasteryMap, fact: &FactId) -> u8 {
    mastery.get(fact).map_or(0, |m| m.strength)
}

fn enumerate_facts(operation: Operation, kind: &LevelKind) -> Vec<FactId> {
    let fact = |a: i32, b: i32| FactId::new(operation, a, b);
    match *kind {
        LevelKind::SumsUpTo(max) => (0..=max)
            .flat_map(|a| (0..=max - a).map(move |b| (a, b)))
            .map(|(a, b)| fact(a, b))
            .collect(),
        LevelKind::SumsBetween { min, max } => (min..=max)
            .flat_map(|sum| (0..=sum).map(move |a| (a, sum - a)))
            .map(|(a, b)| fact(a, b))
            .collect(),
        LevelKind::Doubles => (1..=10).map(|n| fact(n, n)).collect(),
        LevelKind::NearDoubles => (1..=9)
            .flat_map(|n| [fact(n, n + 1), fact(n + 1, n)])
            .collect(),
        LevelKind::MakingTens => (1..=9).map(|n| fact(n, 10 - n)).collect(),
        LevelKind::CrossingTen => (6..=9)
            .flat_map(|a| (11 - a..=9).flat_map(move |b| [(a, b), (b, a)]))
            .map(|(a, b)| fact(a, b))
            .collect(),
        LevelKind::AddingTens => (1..=9)
            .flat_map(|a| (1..=9).map(move |b| (a * 10, b * 10)))
            .map(|(a, b)| fact(a, b))
            .collect(),
        LevelKind::SubtractionFrom { min, max } => (min..=max)
            .flat_map(|a| (0..=a).map(move |b| (a, b)))
            .map(|(a, b)| fact(a, b))
            .collect(),
        LevelKind::SubtractingTens => (2..=9)
            .flat_map(|a| (1..a).map(move |b| (a * 10, b * 10)))
            .map(|(a, b)| fact(a, b))
            .collect(),
        LevelKind::Table(n) => (2..=12)
            .flat_map(|m| [fact(n, m), fact(m, n)])
            .collect(),
        LevelKind::DivisionBy(d) => (2..=10).map(|r| fact(d * r, d)).collect(),
        LevelKind::MixedReview(_) => Vec::new(),
        #[cfg(test)]
        LevelKind::Custom => Vec::new(),
    }
}

/// Immutable, ordered sequence of levels.
#[derive(Debug, Clone, Default)]
pub struct Curriculum {
    levels: Vec<Level>,
}

impl Curriculum {
    pub fn new(levels: Vec<Level>) -> Self {
        Self { levels }
    }

    pub fn standard() -> Self {
        use LevelKind::*;
        use Operation::*;

        let mut levels = vec![
            Level::new("ADD_SUM_5", Addition, SumsUpTo(5)),
            Level::new("ADD_SUM_10", Addition, SumsBetween { min: 6, max: 10 }),
            Level::new("ADD_DOUBLES", Addition, Doubles),
            Level::new("ADD_NEAR_DOUBLES", Addition, NearDoubles),
            Level::new("ADD_MAKING_10S", Addition, MakingTens),
            Level::new("ADD_SUM_OVER_10", Addition, CrossingTen),
            Level::new("ADD_SUM_20", Addition, SumsBetween { min: 11, max: 20 }),
            Level::new("ADD_TENS", Addition, AddingTens),
            Level::new("SUB_FROM_5", Subtraction, SubtractionFrom { min: 0, max: 5 }),
            Level::new("SUB_FROM_10", Subtraction, SubtractionFrom { min: 6, max: 10 }),
            Level::new("SUB_FROM_20", Subtraction, SubtractionFrom { min: 11, max: 20 }),
            Level::new("SUB_TENS", Subtraction, SubtractingTens),
        ];
        levels.extend(
            (2..=12).map(|n| Level::new(format!("MUL_TABLE_{}", n), Multiplication, Table(n))),
        );
        levels.extend(
            (2..=10).map(|d| Level::new(format!("DIV_BY_{}", d), Division, DivisionBy(d))),
        );

        let reviews: [(&str, Operation, &[&str]); 8] = [
            ("ADD_REVIEW_1", Addition, &["ADD_SUM_5", "ADD_SUM_10"]),
            ("SUB_REVIEW_1", Subtraction, &["SUB_FROM_5", "SUB_FROM_10"]),
            ("MUL_REVIEW_2_5_10", Multiplication, &["MUL_TABLE_2", "MUL_TABLE_5", "MUL_TABLE_10"]),
            ("MUL_REVIEW_2_4_8", Multiplication, &["MUL_TABLE_2", "MUL_TABLE_4", "MUL_TABLE_8"]),
            (
                "MUL_REVIEW_2_3_6_9",
                Multiplication,
                &["MUL_TABLE_2", "MUL_TABLE_3", "MUL_TABLE_6", "MUL_TABLE_9"],
            ),
            ("DIV_REVIEW_2_5_10", Division, &["DIV_BY_2", "DIV_BY_5", "DIV_BY_10"]),
            ("DIV_REVIEW_2_4_8", Division, &["DIV_BY_2", "DIV_BY_4", "DIV_BY_8"]),
            (
                "DIV_REVIEW_2_3_6_9",
                Division,
                &["DIV_BY_2", "DIV_BY_3", "DIV_BY_6", "DIV_BY_9"],
            ),
        ];
        let mixed: Vec<Level> = reviews
            .iter()
            .map(|(id, op, parts)| {
                let parts: Vec<&Level> = parts
                    .iter()
                    .filter_map(|p| levels.iter().find(|l| l.id == *p))
                    .collect();
                Level::mixed_review(*id, *op, &parts)
            })
            .collect();
        levels.extend(mixed);

        Self { levels }
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Index of the first level that is not fully mastered, or of the last
    /// level once all are. `None` only for an empty curriculum.
    pub fn current_level_index(&self, mastery: &MasteryMap, mastery_strength: u8) -> Option<usize> {
        if self.is_empty() {
            return None;
        }
        let index = self
            .levels
            .iter()
            .position(|l| !l.is_mastered(mastery, mastery_strength))
            .unwrap_or(self.len() - 1);
        Some(index)
    }

    pub fn current_level(&self, mastery: &MasteryMap, mastery_strength: u8) -> Option<&Level> {
        self.current_level_index(mastery, mastery_strength)
            .map(|i| &self.levels[i])
    }

    pub fn level(&self, id: &str) -> Option<&Level> {
        self.levels.iter().find(|l| l.id == id)
    }

    /// First level, in order, whose fact set contains the equation's fact.
    pub fn level_for_equation(&self, equation: &Equation) -> Option<&Level> {
        let fact = equation.fact_id();
        self.levels.iter().find(|l| l.contains(&fact))
    }

    pub fn levels_for(&self, operation: Operation) -> Curriculum {
        Curriculum::new(
            self.levels
                .iter()
                .filter(|l| l.operation == operation)
                .cloned()
                .collect(),
        )
    }

    /// Levels that never show a number above `max`.
    pub fn within(&self, max: i32) -> Curriculum {
        Curriculum::new(
            self.levels
                .iter()
                .filter(|l| l.max_number() <= max)
                .cloned()
                .collect(),
        )
    }

    pub fn filtered(&self, operation: Option<Operation>) -> Curriculum {
        match operation {
            Some(op) => self.levels_for(op),
            None => self.clone(),
        }
    }
}
