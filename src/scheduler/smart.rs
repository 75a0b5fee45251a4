use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::Rng;
use tracing::debug;

use super::{ExerciseProvider, SchedulerConfig, Strategy, WorkingSet};
use crate::curriculum::{strength_of, Curriculum};
use crate::equation::{Equation, FactId};
use crate::models::MasteryMap;

/// Default practice mode: works through the curriculum in order, mixing in
/// reviews of levels that are already mastered.
pub struct SmartPractice {
    curriculum: Curriculum,
    config: SchedulerConfig,
    rng: StdRng,
    working_sets: HashMap<String, WorkingSet>,
}

impl SmartPractice {
    pub fn new(curriculum: Curriculum, config: SchedulerConfig, rng: StdRng) -> Self {
        Self {
            curriculum,
            config,
            rng,
            working_sets: HashMap::new(),
        }
    }

    fn select(&mut self, mastery: &MasteryMap) -> Option<(usize, FactId, bool)> {
        let current = self
            .curriculum
            .current_level_index(mastery, self.config.mastery_strength)?;

        // Every level before the current one is mastered.
        let learning = current == 0 || self.rng.gen::<f64>() < self.config.learning_probability;
        let index = if learning {
            current
        } else {
            self.rng.gen_range(0..current)
        };

        let level = &self.curriculum.levels()[index];
        let working_set = self
            .working_sets
            .entry(level.id().to_string())
            .or_insert_with(|| WorkingSet::new(self.config.working_set_size));
        let fact = working_set.next_fact(
            level,
            mastery,
            self.config.mastery_strength,
            &mut self.rng,
        )?;

        debug!(
            level = level.id(),
            learning,
            fact = %fact,
            strength = strength_of(mastery, &fact),
            working_set = working_set.members().len(),
            "selected fact"
        );
        Some((index, fact, learning))
    }
}

impl ExerciseProvider for SmartPractice {
    fn next_exercise(&mut self, mastery: &MasteryMap) -> Option<Equation> {
        let (mut index, mut fact, learning) = self.select(mastery)?;
        if learning && strength_of(mastery, &fact) >= self.config.mastery_strength {
            debug!(fact = %fact, "selected fact already mastered, selecting again");
            (index, fact, _) = self.select(mastery)?;
        }
        Some(self.curriculum.levels()[index].present(fact, &mut self.rng))
    }

    fn strategy(&self) -> Strategy {
        Strategy::Smart
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curriculum::Level;
    use crate::equation::Operation;
    use crate::scheduler::tests::{add, record, rng};
    use std::collections::HashSet;

    fn five_levels() -> Curriculum {
        Curriculum::new(
            (1..=5)
                .map(|n| {
                    let facts = (0..6).map(|b| add(n * 10, b)).collect();
                    Level::from_facts(format!("L{}", n), Operation::Addition, facts)
                })
                .collect(),
        )
    }

    fn always_learning() -> SchedulerConfig {
        SchedulerConfig {
            learning_probability: 1.0,
            ..SchedulerConfig::default()
        }
    }

    fn master(curriculum: &Curriculum, level: &str, map: &mut MasteryMap) {
        for f in curriculum.level(level).unwrap().fact_ids() {
            let (k, v) = record(*f, 5, 60);
            map.insert(k, v);
        }
    }

    mod current_level_tests {
        use super::*;

        #[test]
        fn new_user_starts_at_first_level() {
            let c = five_levels();
            let mut p = SmartPractice::new(c.clone(), SchedulerConfig::default(), rng(1));
            assert_eq!(c.current_level(&MasteryMap::new(), 5).unwrap().id(), "L1");
            let eq = p.next_exercise(&MasteryMap::new()).unwrap();
            assert!(c.level("L1").unwrap().contains(&eq.fact_id()));
        }

        #[test]
        fn mastering_a_level_advances() {
            let c = five_levels();
            let mut map = MasteryMap::new();
            master(&c, "L1", &mut map);
            let mut p = SmartPractice::new(c.clone(), always_learning(), rng(2));
            assert_eq!(c.current_level(&map, 5).unwrap().id(), "L2");
            let eq = p.next_exercise(&map).unwrap();
            assert!(c.level("L2").unwrap().contains(&eq.fact_id()));
        }

        #[test]
        fn all_mastered_stays_on_last_level() {
            let c = five_levels();
            let mut map = MasteryMap::new();
            for n in 1..=5 {
                master(&c, &format!("L{}", n), &mut map);
            }
            let mut p = SmartPractice::new(c.clone(), always_learning(), rng(3));
            assert_eq!(c.current_level(&map, 5).unwrap().id(), "L5");
            let eq = p.next_exercise(&map).unwrap();
            assert!(c.level("L5").unwrap().contains(&eq.fact_id()));
        }

        #[test]
        fn progression_never_returns_to_a_mastered_level() {
            let c = five_levels();
            let mut map = MasteryMap::new();
            master(&c, "L1", &mut map);
            master(&c, "L3", &mut map);
            assert_eq!(c.current_level(&map, 5).unwrap().id(), "L2");
            master(&c, "L2", &mut map);
            assert_eq!(c.current_level(&map, 5).unwrap().id(), "L4");
        }

        #[test]
        fn empty_levels_are_skipped() {
            let c = Curriculum::new(vec![
                Level::from_facts("EMPTY", Operation::Addition, vec![]),
                Level::from_facts("REAL", Operation::Addition, vec![add(1, 2)]),
            ]);
            let mut p = SmartPractice::new(c.clone(), always_learning(), rng(5));
            assert_eq!(c.current_level(&MasteryMap::new(), 5).unwrap().id(), "REAL");
            assert_eq!(p.next_exercise(&MasteryMap::new()).unwrap().fact_id(), add(1, 2));
        }

        #[test]
        fn empty_curriculum_yields_nothing() {
            let mut p =
                SmartPractice::new(Curriculum::default(), SchedulerConfig::default(), rng(6));
            assert!(p.next_exercise(&MasteryMap::new()).is_none());
        }

        #[test]
        fn curriculum_of_only_empty_levels_yields_nothing() {
            let c = Curriculum::new(vec![Level::from_facts("EMPTY", Operation::Addition, vec![])]);
            let mut p = SmartPractice::new(c, SchedulerConfig::default(), rng(7));
            assert!(p.next_exercise(&MasteryMap::new()).is_none());
        }
    }

    mod selection_tests {
        use super::*;

        #[test]
        fn weakest_fact_is_selected() {
            let (f1, f2, f3) = (add(1, 1), add(1, 2), add(1, 3));
            let c = Curriculum::new(vec![Level::from_facts(
                "L",
                Operation::Addition,
                vec![f1, f2, f3],
            )]);
            let map: MasteryMap = [record(f1, 4, 5), record(f2, 2, 5), record(f3, 5, 5)]
                .into_iter()
                .collect();
            let mut p = SmartPractice::new(c, SchedulerConfig::default(), rng(8));
            assert_eq!(p.next_exercise(&map).unwrap().fact_id(), f2);
        }

        #[test]
        fn longest_untested_wins_a_strength_tie() {
            let (f1, f2) = (add(1, 1), add(1, 2));
            let c = Curriculum::new(vec![Level::from_facts(
                "L",
                Operation::Addition,
                vec![f1, f2],
            )]);
            let map: MasteryMap = [record(f1, 3, 5), record(f2, 3, 90)].into_iter().collect();
            let mut p = SmartPractice::new(c, SchedulerConfig::default(), rng(9));
            assert_eq!(p.next_exercise(&map).unwrap().fact_id(), f2);
        }

        #[test]
        fn operands_break_remaining_ties() {
            let (f1, f2) = (add(2, 1), add(1, 2));
            let c = Curriculum::new(vec![Level::from_facts(
                "L",
                Operation::Addition,
                vec![f1, f2],
            )]);
            let (_, m1) = record(f1, 3, 0);
            let (_, mut m2) = record(f2, 3, 0);
            m2.last_tested = m1.last_tested;
            let map: MasteryMap = [(f1, m1), (f2, m2)].into_iter().collect();
            let mut p = SmartPractice::new(c, SchedulerConfig::default(), rng(10));
            assert_eq!(p.next_exercise(&map).unwrap().fact_id(), f2);
        }

        #[test]
        fn working_set_bounds_distinct_facts() {
            let facts: Vec<FactId> = (0..8).map(|b| add(5, b)).collect();
            let c = Curriculum::new(vec![Level::from_facts("L", Operation::Addition, facts)]);
            let mut p = SmartPractice::new(c, SchedulerConfig::default(), rng(11));
            let map = MasteryMap::new();
            let seen: HashSet<FactId> = (0..20)
                .filter_map(|_| p.next_exercise(&map))
                .map(|eq| eq.fact_id())
                .collect();
            assert!(seen.len() <= 5, "saw {} distinct facts", seen.len());
        }

        #[test]
        fn review_turns_come_from_mastered_levels() {
            let c = five_levels();
            let mut map = MasteryMap::new();
            master(&c, "L1", &mut map);
            master(&c, "L2", &mut map);
            let config = SchedulerConfig {
                learning_probability: 0.0,
                ..SchedulerConfig::default()
            };
            let mut p = SmartPractice::new(c.clone(), config, rng(12));
            for _ in 0..20 {
                let fact = p.next_exercise(&map).unwrap().fact_id();
                let level = c.level_for_equation(&fact.equation()).unwrap();
                assert!(level.id() == "L1" || level.id() == "L2", "got {}", level.id());
            }
        }

        #[test]
        fn same_seed_same_sequence() {
            let run = |seed| {
                let mut p = SmartPractice::new(
                    Curriculum::standard(),
                    SchedulerConfig::default(),
                    rng(seed),
                );
                (0..10)
                    .filter_map(|_| p.next_exercise(&MasteryMap::new()))
                    .map(|eq| eq.fact_id())
                    .collect::<Vec<_>>()
            };
            assert_eq!(run(42), run(42));
        }
    }
}
