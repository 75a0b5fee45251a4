//! Exercise selection.
//!
//! A provider picks the next fact to practice from a curriculum and the
//! learner's current mastery. Providers own their random source and any
//! per-session state (working sets, already-issued facts); mastery is passed
//! in fresh on every call so a retry after a storage failure is always safe.

mod drill;
mod review;
mod smart;
mod working_set;

use std::fmt;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::curriculum::{strength_of, Curriculum};
use crate::equation::{Equation, FactId, Operation};
use crate::error::{Error, Result};
use crate::models::MasteryMap;

pub use drill::Drill;
pub use review::Review;
pub use smart::SmartPractice;
pub use working_set::WorkingSet;

/// Strength at which a fact counts as mastered.
pub const MASTERY_STRENGTH: u8 = 5;
/// Chance of a learning turn once at least one level is mastered.
pub const LEARNING_EXERCISE_PROBABILITY: f64 = 0.8;
pub const WORKING_SET_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub mastery_strength: u8,
    pub learning_probability: f64,
    pub working_set_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mastery_strength: MASTERY_STRENGTH,
            learning_probability: LEARNING_EXERCISE_PROBABILITY,
            working_set_size: WORKING_SET_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Smart,
    Drill,
    Review,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Smart => "smart",
            Strategy::Drill => "drill",
            Strategy::Review => "review",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "smart" | "smart_practice" | "smart-practice" | "default" => Some(Strategy::Smart),
            "drill" | "d" => Some(Strategy::Drill),
            "review" | "r" => Some(Strategy::Review),
            _ => None,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait ExerciseProvider {
    /// `None` means there is nothing left to practice.
    fn next_exercise(&mut self, mastery: &MasteryMap) -> Option<Equation>;

    fn strategy(&self) -> Strategy;
}

/// Picks the provider for a session.
///
/// A pinned level runs as a drill, or as a review when asked for one or when
/// the level is itself a mixed review. Without a pinned level the curriculum
/// is narrowed to `operation` and practiced smartly or reviewed as a whole.
pub fn build_provider(
    curriculum: &Curriculum,
    operation: Option<Operation>,
    level_id: Option<&str>,
    strategy: Strategy,
    config: SchedulerConfig,
    rng: StdRng,
) -> Result<Box<dyn ExerciseProvider>> {
    if config.working_set_size == 0 {
        return Err(Error::InvalidConfig(
            "working set size must be at least 1".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&config.learning_probability) {
        return Err(Error::InvalidConfig(format!(
            "learning probability {} is outside 0..=1",
            config.learning_probability
        )));
    }

    let provider: Box<dyn ExerciseProvider> = match level_id {
        Some(id) => {
            let level = curriculum
                .level(id)
                .ok_or_else(|| Error::UnknownLevel(id.to_string()))?;
            if let Some(op) = operation {
                if level.operation() != op {
                    return Err(Error::InvalidConfig(format!(
                        "level {} is not a {} level",
                        id,
                        op.as_str().to_lowercase()
                    )));
                }
            }
            if strategy == Strategy::Review || level.is_mixed_review() {
                Box::new(Review::new(level.fact_ids().to_vec(), config, rng))
            } else {
                Box::new(Drill::new(level.clone(), config, rng))
            }
        }
        None => {
            let scoped = curriculum.filtered(operation);
            match strategy {
                Strategy::Review => {
                    let facts = scoped
                        .levels()
                        .iter()
                        .flat_map(|l| l.fact_ids().iter().copied())
                        .collect();
                    Box::new(Review::new(facts, config, rng))
                }
                Strategy::Drill => {
                    return Err(Error::InvalidConfig(
                        "drill needs a level to practice".to_string(),
                    ))
                }
                Strategy::Smart => Box::new(SmartPractice::new(scoped, config, rng)),
            }
        }
    };

    debug!(strategy = %provider.strategy(), level = ?level_id, "built exercise provider");
    Ok(provider)
}

// Sort key for weakest-first selection. Unattempted facts have strength 0 and
// no timestamp, so they sort ahead of everything.
fn weakness_key(mastery: &MasteryMap, fact: &FactId) -> (u8, Option<DateTime<Utc>>, i32, i32) {
    let last_tested = mastery.get(fact).map(|m| m.last_tested);
    (strength_of(mastery, fact), last_tested, fact.op1, fact.op2)
}
