use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::equation::{FactId, Operation, NOT_RECOGNIZED};
use crate::srs::clamp_strength;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Which projection of a fact's mastery a row belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasteryScope {
    Global,
    Level(String),
}

impl MasteryScope {
    /// Value stored in the `level` column. The global projection uses `''`.
    pub fn as_level_column(&self) -> &str {
        match self {
            MasteryScope::Global => "",
            MasteryScope::Level(id) => id,
        }
    }

    pub fn from_level_column(level: String) -> Self {
        if level.is_empty() {
            MasteryScope::Global
        } else {
            MasteryScope::Level(level)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactMastery {
    pub fact_id: FactId,
    pub user_id: i64,
    pub scope: MasteryScope,
    pub strength: u8,
    pub last_tested: DateTime<Utc>,
    pub avg_duration_ms: u64,
}

impl FactMastery {
    pub fn new(
        fact_id: FactId,
        user_id: i64,
        scope: MasteryScope,
        strength: i64,
        last_tested: DateTime<Utc>,
    ) -> Self {
        Self {
            fact_id,
            user_id,
            scope,
            strength: clamp_strength(strength),
            last_tested,
            avg_duration_ms: 0,
        }
    }

    pub fn strength_label(&self) -> &'static str {
        match self.strength {
            1 => "Learning",
            2 => "Familiar",
            3 => "Comfortable",
            4 => "Proficient",
            5 => "Mastered",
            _ => "New",
        }
    }
}

/// Mastery of one user keyed by fact. Absent facts have never been attempted.
pub type MasteryMap = HashMap<FactId, FactMastery>;

/// One logical strength change, written to every listed projection at once.
#[derive(Debug, Clone, PartialEq)]
pub struct MasteryUpdate {
    pub fact_id: FactId,
    pub user_id: i64,
    pub strength: u8,
    pub last_tested: DateTime<Utc>,
    pub avg_duration_ms: u64,
    pub projections: Vec<MasteryScope>,
}

impl MasteryUpdate {
    pub fn records(&self) -> impl Iterator<Item = FactMastery> + '_ {
        self.projections.iter().map(move |scope| FactMastery {
            fact_id: self.fact_id,
            user_id: self.user_id,
            scope: scope.clone(),
            strength: self.strength,
            last_tested: self.last_tested,
            avg_duration_ms: self.avg_duration_ms,
        })
    }
}

/// Every mastery row of a user, split into its projections on demand.
#[derive(Debug, Clone, Default)]
pub struct MasterySnapshot {
    records: Vec<FactMastery>,
}

impl MasterySnapshot {
    pub fn new(records: Vec<FactMastery>) -> Self {
        Self { records }
    }

    pub fn global(&self) -> MasteryMap {
        self.scoped(&MasteryScope::Global)
    }

    pub fn for_level(&self, level_id: &str) -> MasteryMap {
        self.scoped(&MasteryScope::Level(level_id.to_string()))
    }

    fn scoped(&self, scope: &MasteryScope) -> MasteryMap {
        self.records
            .iter()
            .filter(|m| &m.scope == scope)
            .map(|m| (m.fact_id, m.clone()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Correct,
    Incorrect,
    NotRecognized,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Correct => "correct",
            AttemptOutcome::Incorrect => "incorrect",
            AttemptOutcome::NotRecognized => "not_recognized",
        }
    }
}

// Append-only log row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: Option<i64>,
    pub user_id: i64,
    pub timestamp: DateTime<Utc>,
    pub fact_id: FactId,
    pub problem_text: String,
    pub operation: Operation,
    pub correct_answer: i32,
    pub submitted_answer: i32,
    pub was_correct: bool,
    pub duration_ms: u64,
}

impl Attempt {
    pub fn outcome(&self) -> AttemptOutcome {
        if self.submitted_answer == NOT_RECOGNIZED {
            AttemptOutcome::NotRecognized
        } else if self.was_correct {
            AttemptOutcome::Correct
        } else {
            AttemptOutcome::Incorrect
        }
    }
}

// JSON output wrapper for CLI
#[derive(Debug, Serialize)]
pub struct JsonOutput<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> JsonOutput<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
