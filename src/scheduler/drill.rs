use rand::rngs::StdRng;
use tracing::debug;

use super::{ExerciseProvider, SchedulerConfig, Strategy, WorkingSet};
use crate::curriculum::Level;
use crate::equation::Equation;
use crate::models::MasteryMap;

/// Practice confined to one level until every fact in it is mastered.
pub struct Drill {
    level: Level,
    config: SchedulerConfig,
    rng: StdRng,
    working_set: WorkingSet,
}

impl Drill {
    pub fn new(level: Level, config: SchedulerConfig, rng: StdRng) -> Self {
        Self {
            working_set: WorkingSet::new(config.working_set_size),
            level,
            config,
            rng,
        }
    }
}

impl ExerciseProvider for Drill {
    fn next_exercise(&mut self, mastery: &MasteryMap) -> Option<Equation> {
        if self.level.is_mastered(mastery, self.config.mastery_strength) {
            debug!(level = self.level.id(), "drill level mastered");
            return None;
        }
        let fact = self.working_set.next_fact(
            &self.level,
            mastery,
            self.config.mastery_strength,
            &mut self.rng,
        )?;
        Some(self.level.present(fact, &mut self.rng))
    }

    fn strategy(&self) -> Strategy {
        Strategy::Drill
    }
}
