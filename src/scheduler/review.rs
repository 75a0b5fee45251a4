use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::debug;

use super::{ExerciseProvider, SchedulerConfig, Strategy};
use crate::curriculum::strength_of;
use crate::equation::{Equation, FactId};
use crate::models::MasteryMap;

/// Goes through a fixed set of facts once each, in a random order that
/// favours weaker facts.
pub struct Review {
    facts: Vec<FactId>,
    issued: HashSet<FactId>,
    config: SchedulerConfig,
    rng: StdRng,
}

impl Review {
    pub fn new(facts: Vec<FactId>, config: SchedulerConfig, rng: StdRng) -> Self {
        let mut seen = HashSet::with_capacity(facts.len());
        let facts = facts.into_iter().filter(|f| seen.insert(*f)).collect();
        Self {
            facts,
            issued: HashSet::new(),
            config,
            rng,
        }
    }

    pub fn remaining(&self) -> usize {
        self.facts.len() - self.issued.len()
    }

    fn weight(&self, mastery: &MasteryMap, fact: &FactId) -> u32 {
        let strength = strength_of(mastery, fact);
        u32::from((self.config.mastery_strength + 1).saturating_sub(strength)).max(1)
    }
}

impl ExerciseProvider for Review {
    fn next_exercise(&mut self, mastery: &MasteryMap) -> Option<Equation> {
        let remaining: Vec<FactId> = self
            .facts
            .iter()
            .filter(|f| !self.issued.contains(*f))
            .copied()
            .collect();
        let weights: Vec<u32> = remaining.iter().map(|f| self.weight(mastery, f)).collect();
        let indices: Vec<usize> = (0..remaining.len()).collect();
        let pick = *indices.choose_weighted(&mut self.rng, |i| weights[*i]).ok()?;
        let fact = remaining[pick];
        self.issued.insert(fact);
        debug!(fact = %fact, remaining = self.remaining(), "review pick");
        Some(fact.equation())
    }

    fn strategy(&self) -> Strategy {
        Strategy::Review
    }
}
