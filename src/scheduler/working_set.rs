use rand::seq::SliceRandom;
use rand::Rng;

use super::weakness_key;
use crate::curriculum::{strength_of, Level};
use crate::equation::FactId;
use crate::models::MasteryMap;

/// The few unmastered facts of one level that are currently being drilled.
///
/// Members stay until they are mastered. Vacancies are filled with the
/// weakest attempted facts first, then with never-attempted facts in a
/// shuffled order fixed the first time one is needed.
#[derive(Debug, Clone)]
pub struct WorkingSet {
    capacity: usize,
    members: Vec<FactId>,
    unseen: Option<Vec<FactId>>,
    last_issued: Option<FactId>,
}

impl WorkingSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            members: Vec::with_capacity(capacity),
            unseen: None,
            last_issued: None,
        }
    }

    pub fn members(&self) -> &[FactId] {
        &self.members
    }

    pub fn refresh<R: Rng + ?Sized>(
        &mut self,
        level: &Level,
        mastery: &MasteryMap,
        mastery_strength: u8,
        rng: &mut R,
    ) {
        let unmastered = |f: &FactId| strength_of(mastery, f) < mastery_strength;
        self.members.retain(|f| level.contains(f) && unmastered(f));

        if self.members.len() < self.capacity {
            let mut attempted: Vec<FactId> = level
                .fact_ids()
                .iter()
                .filter(|f| {
                    mastery.contains_key(*f) && unmastered(*f) && !self.members.contains(*f)
                })
                .copied()
                .collect();
            attempted.sort_by_key(|f| weakness_key(mastery, f));
            let room = self.capacity - self.members.len();
            self.members.extend(attempted.into_iter().take(room));
        }

        if self.members.len() < self.capacity {
            let queue = self.unseen.get_or_insert_with(|| {
                let mut facts: Vec<FactId> = level
                    .fact_ids()
                    .iter()
                    .filter(|f| !mastery.contains_key(*f))
                    .copied()
                    .collect();
                facts.shuffle(rng);
                facts
            });
            while self.members.len() < self.capacity {
                match queue.pop() {
                    Some(f) if !mastery.contains_key(&f) && !self.members.contains(&f) => {
                        self.members.push(f)
                    }
                    Some(_) => continue,
                    None => break,
                }
            }
        }
    }

    /// Refreshes the set and picks from it, or from the whole level when every
    /// fact is already mastered.
    pub fn next_fact<R: Rng + ?Sized>(
        &mut self,
        level: &Level,
        mastery: &MasteryMap,
        mastery_strength: u8,
        rng: &mut R,
    ) -> Option<FactId> {
        self.refresh(level, mastery, mastery_strength, rng);
        let fact = if self.members.is_empty() {
            weakest(level.fact_ids(), mastery, None, rng)?
        } else {
            weakest(&self.members, mastery, self.last_issued, rng)?
        };
        self.last_issued = Some(fact);
        Some(fact)
    }
}

/// Weakest candidate, or a uniform pick when none has been attempted. The
/// fact issued last is only chosen again if it is the sole candidate.
fn weakest<R: Rng + ?Sized>(
    candidates: &[FactId],
    mastery: &MasteryMap,
    last_issued: Option<FactId>,
    rng: &mut R,
) -> Option<FactId> {
    let eligible: Vec<FactId> = if candidates.len() > 1 {
        candidates
            .iter()
            .copied()
            .filter(|f| Some(*f) != last_issued)
            .collect()
    } else {
        candidates.to_vec()
    };

    if eligible.iter().all(|f| !mastery.contains_key(f)) {
        return eligible.choose(rng).copied();
    }
    eligible.into_iter().min_by_key(|f| weakness_key(mastery, f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equation::Operation;
    use crate::scheduler::tests::{add, record, rng};
    use std::collections::HashSet;

    fn level_of(facts: Vec<FactId>) -> Level {
        Level::from_facts("TEST", Operation::Addition, facts)
    }

    fn seven_facts() -> Vec<FactId> {
        (1..=7).map(|n| add(n, 1)).collect()
    }

    mod refresh_tests {
        use super::*;

        #[test]
        fn fills_up_to_capacity() {
            let level = level_of(seven_facts());
            let mut ws = WorkingSet::new(5);
            ws.refresh(&level, &MasteryMap::new(), 5, &mut rng(1));
            assert_eq!(ws.members().len(), 5);
            assert!(ws.members().iter().all(|f| level.contains(f)));
        }

        #[test]
        fn attempted_facts_fill_before_unseen() {
            let level = level_of(seven_facts());
            let map: MasteryMap = [record(add(6, 1), 3, 5), record(add(7, 1), 1, 5)]
                .into_iter()
                .collect();
            let mut ws = WorkingSet::new(5);
            ws.refresh(&level, &map, 5, &mut rng(2));
            assert_eq!(&ws.members()[..2], &[add(7, 1), add(6, 1)]);
        }

        #[test]
        fn mastered_members_are_evicted_and_replaced() {
            let level = level_of(seven_facts());
            let mut ws = WorkingSet::new(5);
            let mut r = rng(3);
            ws.refresh(&level, &MasteryMap::new(), 5, &mut r);
            let promoted = ws.members()[0];
            let map: MasteryMap = [record(promoted, 5, 0)].into_iter().collect();
            ws.refresh(&level, &map, 5, &mut r);
            assert_eq!(ws.members().len(), 5);
            assert!(!ws.members().contains(&promoted));
        }

        #[test]
        fn small_level_fills_what_it_can() {
            let level = level_of(vec![add(1, 1), add(2, 2)]);
            let mut ws = WorkingSet::new(5);
            ws.refresh(&level, &MasteryMap::new(), 5, &mut rng(4));
            assert_eq!(ws.members().len(), 2);
        }

        #[test]
        fn fully_mastered_level_leaves_set_empty() {
            let level = level_of(vec![add(1, 1), add(2, 2)]);
            let map: MasteryMap = [record(add(1, 1), 5, 1), record(add(2, 2), 5, 1)]
                .into_iter()
                .collect();
            let mut ws = WorkingSet::new(5);
            ws.refresh(&level, &map, 5, &mut rng(5));
            assert!(ws.members().is_empty());
        }
    }

    mod next_fact_tests {
        use super::*;

        #[test]
        fn twenty_draws_stay_within_five_facts() {
            let level = level_of(seven_facts());
            let mut ws = WorkingSet::new(5);
            let mut r = rng(11);
            let seen: HashSet<FactId> = (0..20)
                .filter_map(|_| ws.next_fact(&level, &MasteryMap::new(), 5, &mut r))
                .collect();
            assert!(seen.len() <= 5, "saw {} distinct facts", seen.len());
        }

        #[test]
        fn does_not_repeat_back_to_back() {
            let level = level_of(seven_facts());
            let map: MasteryMap = seven_facts()
                .into_iter()
                .map(|f| record(f, 2, 10))
                .collect();
            let mut ws = WorkingSet::new(5);
            let mut r = rng(12);
            let first = ws.next_fact(&level, &map, 5, &mut r).unwrap();
            let second = ws.next_fact(&level, &map, 5, &mut r).unwrap();
            assert_ne!(first, second);
        }

        #[test]
        fn single_fact_repeats() {
            let level = level_of(vec![add(3, 3)]);
            let mut ws = WorkingSet::new(5);
            let mut r = rng(13);
            assert_eq!(ws.next_fact(&level, &MasteryMap::new(), 5, &mut r), Some(add(3, 3)));
            assert_eq!(ws.next_fact(&level, &MasteryMap::new(), 5, &mut r), Some(add(3, 3)));
        }

        #[test]
        fn mastered_level_falls_back_to_weakest_of_all() {
            let level = level_of(vec![add(1, 1), add(2, 2)]);
            let map: MasteryMap = [record(add(1, 1), 5, 1), record(add(2, 2), 5, 30)]
                .into_iter()
                .collect();
            let mut ws = WorkingSet::new(5);
            assert_eq!(ws.next_fact(&level, &map, 5, &mut rng(14)), Some(add(2, 2)));
        }

        #[test]
        fn empty_level_yields_nothing() {
            let level = level_of(vec![]);
            let mut ws = WorkingSet::new(5);
            assert_eq!(ws.next_fact(&level, &MasteryMap::new(), 5, &mut rng(15)), None);
        }
    }
}
