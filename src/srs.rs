//! Strength update rules for a single fact.

use serde::{Deserialize, Serialize};

use crate::equation::{FactId, Operation};

pub const MIN_STRENGTH: u8 = 1;
pub const MAX_STRENGTH: u8 = 5;

/// Weight of the newest sample in the answer-duration moving average.
const DURATION_EWMA_ALPHA: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedBadge {
    None,
    Bronze,
    Silver,
    Gold,
}

impl SpeedBadge {
    pub fn label(&self) -> &'static str {
        match self {
            SpeedBadge::None => "",
            SpeedBadge::Bronze => "bronze",
            SpeedBadge::Silver => "silver",
            SpeedBadge::Gold => "gold",
        }
    }
}

/// How a correct answer moves strength.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrengthPolicy {
    /// +1 per correct answer.
    #[default]
    Standard,
    /// +2 for a gold-speed correct answer, +1 otherwise.
    FastTrack,
    /// Above strength 2 a correct answer only counts if it was fast enough:
    /// bronze to reach 3, silver to reach 4, gold to reach 5.
    SpeedGated,
}

impl StrengthPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrengthPolicy::Standard => "standard",
            StrengthPolicy::FastTrack => "fast_track",
            StrengthPolicy::SpeedGated => "speed_gated",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "standard" | "default" => Some(StrengthPolicy::Standard),
            "fast_track" | "fast-track" | "fasttrack" | "fast" => Some(StrengthPolicy::FastTrack),
            "speed_gated" | "speed-gated" | "gated" => Some(StrengthPolicy::SpeedGated),
            _ => None,
        }
    }

    /// `current` is 0 for a fact that has never been attempted.
    pub fn next_strength(&self, current: u8, was_correct: bool, badge: SpeedBadge) -> u8 {
        if !was_correct {
            // A miss still counts as one exposure.
            return MIN_STRENGTH;
        }
        let step = match (self, badge) {
            (StrengthPolicy::FastTrack, SpeedBadge::Gold) => 2,
            (StrengthPolicy::SpeedGated, _) => {
                let required = match current {
                    0 | 1 => SpeedBadge::None,
                    2 => SpeedBadge::Bronze,
                    3 => SpeedBadge::Silver,
                    _ => SpeedBadge::Gold,
                };
                u8::from(badge >= required)
            }
            _ => 1,
        };
        current.saturating_add(step).clamp(MIN_STRENGTH, MAX_STRENGTH)
    }
}

pub fn clamp_strength(value: i64) -> u8 {
    value.clamp(MIN_STRENGTH as i64, MAX_STRENGTH as i64) as u8
}

/// Moving average of correct-answer durations. Misses leave it untouched.
pub fn next_avg_duration(current_avg_ms: u64, duration_ms: u64, was_correct: bool) -> u64 {
    if !was_correct {
        return current_avg_ms;
    }
    if current_avg_ms == 0 {
        return duration_ms;
    }
    (DURATION_EWMA_ALPHA * duration_ms as f64 + (1.0 - DURATION_EWMA_ALPHA) * current_avg_ms as f64)
        as u64
}

pub fn speed_badge(fact: FactId, duration_ms: u64) -> SpeedBadge {
    if duration_ms == 0 {
        return SpeedBadge::None;
    }
    let ratio = duration_ms as f64 / speed_threshold_ms(fact) as f64;
    if ratio <= 0.5 {
        SpeedBadge::Gold
    } else if ratio <= 0.7 {
        SpeedBadge::Silver
    } else if ratio <= 1.0 {
        SpeedBadge::Bronze
    } else {
        SpeedBadge::None
    }
}

// Expected answer time for a fluent learner.
fn speed_threshold_ms(fact: FactId) -> u64 {
    let (a, b) = (fact.op1, fact.op2);
    match fact.operation {
        Operation::Addition => {
            if a < 10 && b < 10 && a + b < 10 {
                2_500
            } else if a < 10 && b < 10 {
                4_000
            } else if a < 100 && b < 100 && (a % 10) + (b % 10) < 10 {
                7_000
            } else {
                10_000
            }
        }
        Operation::Subtraction => {
            if a < 10 && b < 10 {
                3_000
            } else if a < 100 && b < 100 && (a % 10) >= (b % 10) {
                7_500
            } else {
                10_500
            }
        }
        Operation::Multiplication => {
            if a <= 10 && b <= 10 {
                3_000
            } else if a <= 12 || b <= 12 {
                5_000
            } else {
                12_000
            }
        }
        Operation::Division => 4_000,
    }
}
