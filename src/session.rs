//! Practice sessions: issue exercises and record the learner's answers.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use tracing::{info, warn};

use crate::curriculum::Curriculum;
use crate::equation::{Exercise, Operation};
use crate::error::{Error, Result};
use crate::models::{
    Attempt, AttemptOutcome, FactMastery, MasteryScope, MasterySnapshot, MasteryUpdate, User,
};
use crate::scheduler::{build_provider, ExerciseProvider, SchedulerConfig, Strategy};
use crate::srs::{next_avg_duration, StrengthPolicy};

/// Persistence used by a session. Every call may block.
pub trait MasteryStore {
    fn load_user(&self, user_id: i64) -> Result<Option<User>>;

    fn load_mastery_for_user(&self, user_id: i64) -> Result<Vec<FactMastery>>;

    /// Writes all projections of the update, or none of them.
    fn upsert_mastery(&self, update: &MasteryUpdate) -> Result<()>;

    fn append_attempt(&self, attempt: &Attempt) -> Result<i64>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExerciseConfig {
    pub operation: Option<Operation>,
    /// Largest number the learner should see. Ignored when a level is pinned.
    pub difficulty: Option<i32>,
    /// Exercises to issue before the session ends; 0 for no limit.
    pub count: usize,
    pub level_id: Option<String>,
    pub strategy: Strategy,
}

struct ActiveSession {
    provider: Box<dyn ExerciseProvider>,
    level_id: Option<String>,
    limit: Option<usize>,
    issued: usize,
}

pub struct PracticeSession<S: MasteryStore> {
    store: S,
    curriculum: Curriculum,
    user_id: i64,
    scheduler: SchedulerConfig,
    policy: StrengthPolicy,
    active: Option<ActiveSession>,
}

impl<S: MasteryStore> PracticeSession<S> {
    pub fn new(store: S, curriculum: Curriculum, user_id: i64) -> Self {
        Self {
            store,
            curriculum,
            user_id,
            scheduler: SchedulerConfig::default(),
            policy: StrengthPolicy::default(),
            active: None,
        }
    }

    pub fn with_scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler = config;
        self
    }

    pub fn with_strength_policy(mut self, policy: StrengthPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn curriculum(&self) -> &Curriculum {
        &self.curriculum
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn initialize(&mut self, config: ExerciseConfig, rng: StdRng) -> Result<()> {
        self.store
            .load_user(self.user_id)?
            .ok_or(Error::UserNotFound(self.user_id))?;

        let curriculum = match (config.difficulty, &config.level_id) {
            (Some(max), None) => self.curriculum.within(max),
            _ => self.curriculum.clone(),
        };
        let provider = build_provider(
            &curriculum,
            config.operation,
            config.level_id.as_deref(),
            config.strategy,
            self.scheduler,
            rng,
        )?;

        info!(
            user = self.user_id,
            strategy = %provider.strategy(),
            level = ?config.level_id,
            operation = ?config.operation,
            count = config.count,
            "practice session started"
        );

        self.active = Some(ActiveSession {
            provider,
            level_id: config.level_id,
            limit: (config.count > 0).then_some(config.count),
            issued: 0,
        });
        Ok(())
    }

    /// Reads fresh mastery and asks the provider for the next exercise.
    /// `Ok(None)` ends the session.
    pub fn next_exercise(&mut self) -> Result<Option<Exercise>> {
        let active = self.active.as_mut().ok_or(Error::NotInitialized)?;
        if active.limit.is_some_and(|limit| active.issued >= limit) {
            return Ok(None);
        }

        let snapshot = MasterySnapshot::new(self.store.load_mastery_for_user(self.user_id)?);
        let Some(equation) = active.provider.next_exercise(&snapshot.global()) else {
            info!(user = self.user_id, issued = active.issued, "no exercise available");
            return Ok(None);
        };
        active.issued += 1;
        Ok(Some(Exercise::new(equation)))
    }

    pub fn record_attempt(
        &mut self,
        exercise: &mut Exercise,
        submitted: i32,
        duration_ms: u64,
    ) -> Result<AttemptOutcome> {
        self.record_attempt_at(exercise, submitted, duration_ms, Utc::now())
    }

    /// Logs the attempt and, unless the answer was unrecognized, moves the
    /// fact's global and level strength together. `exercise` is only marked
    /// solved once the store has accepted every write.
    pub fn record_attempt_at(
        &mut self,
        exercise: &mut Exercise,
        submitted: i32,
        duration_ms: u64,
        now: DateTime<Utc>,
    ) -> Result<AttemptOutcome> {
        let mut solved = exercise.clone();
        let was_correct = solved.solve(submitted, Some(duration_ms));
        let fact = solved.fact_id();

        let attempt = Attempt {
            id: None,
            user_id: self.user_id,
            timestamp: now,
            fact_id: fact,
            problem_text: solved.equation.question(),
            operation: fact.operation,
            correct_answer: solved.equation.expected_result(),
            submitted_answer: submitted,
            was_correct,
            duration_ms,
        };
        self.store.append_attempt(&attempt)?;

        let outcome = attempt.outcome();
        if outcome == AttemptOutcome::NotRecognized {
            warn!(user = self.user_id, fact = %fact, "answer not recognized, mastery unchanged");
            *exercise = solved;
            return Ok(outcome);
        }

        let snapshot = MasterySnapshot::new(self.store.load_mastery_for_user(self.user_id)?);
        let current = snapshot.global().remove(&fact);
        let current_strength = current.as_ref().map_or(0, |m| m.strength);
        let current_avg = current.as_ref().map_or(0, |m| m.avg_duration_ms);

        let strength = self
            .policy
            .next_strength(current_strength, was_correct, solved.speed_badge);

        // The pinned level owns the fact when it contains it.
        let level = self
            .active
            .as_ref()
            .and_then(|a| a.level_id.as_deref())
            .and_then(|id| self.curriculum.level(id))
            .filter(|l| l.contains(&fact))
            .or_else(|| self.curriculum.level_for_equation(&solved.equation));
        let mut projections = vec![MasteryScope::Global];
        projections.extend(level.map(|l| MasteryScope::Level(l.id().to_string())));

        self.store.upsert_mastery(&MasteryUpdate {
            fact_id: fact,
            user_id: self.user_id,
            strength,
            last_tested: now,
            avg_duration_ms: next_avg_duration(current_avg, duration_ms, was_correct),
            projections,
        })?;

        info!(
            user = self.user_id,
            fact = %fact,
            outcome = outcome.as_str(),
            from = current_strength,
            to = strength,
            "recorded attempt"
        );
        *exercise = solved;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::equation::{Equation, FactId, NOT_RECOGNIZED};
    use rand::SeedableRng;

    fn setup() -> PracticeSession<Database> {
        let db = Database::open(":memory:").expect("Failed to create in-memory database");
        db.init().expect("Failed to initialize database");
        let user = db.add_user("learner").unwrap();
        PracticeSession::new(db, Curriculum::standard(), user)
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(99)
    }

    fn pinned(level: &str) -> ExerciseConfig {
        ExerciseConfig {
            level_id: Some(level.to_string()),
            ..ExerciseConfig::default()
        }
    }

    fn snapshot(session: &PracticeSession<Database>) -> MasterySnapshot {
        MasterySnapshot::new(
            session
                .store()
                .load_mastery_for_user(session.user_id())
                .unwrap(),
        )
    }

    fn answer_correctly(session: &mut PracticeSession<Database>, ex: &mut Exercise) {
        let expected = ex.equation.expected_result();
        session.record_attempt(ex, expected, 1000).unwrap();
    }

    struct FailingStore;

    impl MasteryStore for FailingStore {
        fn load_user(&self, user_id: i64) -> Result<Option<User>> {
            Ok(Some(User {
                id: user_id,
                name: "offline".to_string(),
                created_at: Utc::now(),
            }))
        }

        fn load_mastery_for_user(&self, _user_id: i64) -> Result<Vec<FactMastery>> {
            Err(Error::Database(rusqlite::Error::InvalidQuery))
        }

        fn upsert_mastery(&self, _update: &MasteryUpdate) -> Result<()> {
            Err(Error::Database(rusqlite::Error::InvalidQuery))
        }

        fn append_attempt(&self, _attempt: &Attempt) -> Result<i64> {
            Err(Error::Database(rusqlite::Error::InvalidQuery))
        }
    }

    mod lifecycle_tests {
        use super::*;

        #[test]
        fn next_before_initialize_fails() {
            let mut session = setup();
            assert!(matches!(session.next_exercise(), Err(Error::NotInitialized)));
        }

        #[test]
        fn unknown_user_is_rejected() {
            let db = Database::open(":memory:").unwrap();
            db.init().unwrap();
            let mut session = PracticeSession::new(db, Curriculum::standard(), 404);
            let err = session.initialize(ExerciseConfig::default(), rng()).unwrap_err();
            assert!(matches!(err, Error::UserNotFound(404)));
        }

        #[test]
        fn new_user_starts_with_first_level() {
            let mut session = setup();
            session.initialize(ExerciseConfig::default(), rng()).unwrap();
            let ex = session.next_exercise().unwrap().unwrap();
            let first = &session.curriculum().levels()[0];
            assert!(first.contains(&ex.fact_id()));
        }

        #[test]
        fn count_caps_the_session() {
            let mut session = setup();
            let config = ExerciseConfig {
                count: 3,
                ..ExerciseConfig::default()
            };
            session.initialize(config, rng()).unwrap();
            for _ in 0..3 {
                assert!(session.next_exercise().unwrap().is_some());
            }
            assert!(session.next_exercise().unwrap().is_none());
        }

        #[test]
        fn difficulty_limits_numbers() {
            let mut session = setup();
            let config = ExerciseConfig {
                operation: Some(Operation::Multiplication),
                difficulty: Some(50),
                ..ExerciseConfig::default()
            };
            session.initialize(config, rng()).unwrap();
            let ex = session.next_exercise().unwrap().unwrap();
            assert!(ex.equation.expected_result() <= 50);
        }

        #[test]
        fn difficulty_with_nothing_small_enough_ends_immediately() {
            let mut session = setup();
            let config = ExerciseConfig {
                operation: Some(Operation::Multiplication),
                difficulty: Some(5),
                ..ExerciseConfig::default()
            };
            session.initialize(config, rng()).unwrap();
            assert!(session.next_exercise().unwrap().is_none());
        }

        #[test]
        fn drill_runs_until_level_is_mastered() {
            let mut session = setup();
            session.initialize(pinned("ADD_MAKING_10S"), rng()).unwrap();
            let mut issued = 0;
            while let Some(mut ex) = session.next_exercise().unwrap() {
                answer_correctly(&mut session, &mut ex);
                issued += 1;
                assert!(issued <= 9 * 5, "drill did not finish");
            }
            assert_eq!(issued, 9 * 5);

            let level = session.curriculum().level("ADD_MAKING_10S").unwrap();
            let snap = snapshot(&session);
            assert!(level.is_mastered(&snap.global(), 5));
            assert!(level.is_mastered(&snap.for_level("ADD_MAKING_10S"), 5));
        }

        #[test]
        fn review_issues_each_fact_once() {
            let mut session = setup();
            let config = ExerciseConfig {
                level_id: Some("DIV_BY_7".to_string()),
                strategy: Strategy::Review,
                ..ExerciseConfig::default()
            };
            session.initialize(config, rng()).unwrap();
            let mut facts = Vec::new();
            while let Some(ex) = session.next_exercise().unwrap() {
                facts.push(ex.fact_id());
            }
            facts.sort();
            facts.dedup();
            assert_eq!(facts.len(), 9);
        }
    }

    mod recording_tests {
        use super::*;

        #[test]
        fn correct_answer_writes_both_projections() {
            let mut session = setup();
            let mut ex = Exercise::new(Equation::Addition { a: 2, b: 2 });
            let outcome = session.record_attempt(&mut ex, 4, 1500).unwrap();
            assert_eq!(outcome, AttemptOutcome::Correct);

            let snap = snapshot(&session);
            let fact = ex.fact_id();
            assert_eq!(snap.global()[&fact].strength, 1);
            assert_eq!(snap.for_level("ADD_SUM_5")[&fact].strength, 1);
            assert_eq!(snap.global()[&fact].avg_duration_ms, 1500);
            let rows = session.store().load_mastery_for_user(session.user_id()).unwrap();
            assert_eq!(rows.len(), 2);
        }

        #[test]
        fn pinned_level_owns_the_level_projection() {
            let mut session = setup();
            session.initialize(pinned("ADD_DOUBLES"), rng()).unwrap();
            let mut ex = Exercise::new(Equation::Addition { a: 2, b: 2 });
            session.record_attempt(&mut ex, 4, 900).unwrap();

            let snap = snapshot(&session);
            assert!(snap.for_level("ADD_DOUBLES").contains_key(&ex.fact_id()));
            assert!(snap.for_level("ADD_SUM_5").is_empty());
        }

        #[test]
        fn pinned_level_without_the_fact_falls_back_to_lookup() {
            let mut session = setup();
            session.initialize(pinned("MUL_TABLE_3"), rng()).unwrap();
            let mut ex = Exercise::new(Equation::Addition { a: 2, b: 2 });
            session.record_attempt(&mut ex, 4, 900).unwrap();

            let snap = snapshot(&session);
            assert!(snap.for_level("MUL_TABLE_3").is_empty());
            assert!(snap.for_level("ADD_SUM_5").contains_key(&ex.fact_id()));
        }

        #[test]
        fn repeated_correct_answers_cap_at_five() {
            let mut session = setup();
            for _ in 0..8 {
                let mut ex = Exercise::new(Equation::Multiplication { a: 3, b: 4 });
                session.record_attempt(&mut ex, 12, 2000).unwrap();
            }
            let fact = FactId::new(Operation::Multiplication, 3, 4);
            assert_eq!(snapshot(&session).global()[&fact].strength, 5);
        }

        #[test]
        fn miss_resets_strength_to_one() {
            let mut session = setup();
            for _ in 0..4 {
                let mut ex = Exercise::new(Equation::Addition { a: 3, b: 4 });
                session.record_attempt(&mut ex, 7, 2000).unwrap();
            }
            let mut ex = Exercise::new(Equation::Addition { a: 3, b: 4 });
            let outcome = session.record_attempt(&mut ex, 8, 2000).unwrap();
            assert_eq!(outcome, AttemptOutcome::Incorrect);
            assert_eq!(snapshot(&session).global()[&ex.fact_id()].strength, 1);
            let rows = session.store().load_mastery_for_user(session.user_id()).unwrap();
            assert!(rows.iter().all(|r| r.strength == 1));
        }

        #[test]
        fn unrecognized_answer_only_logs_the_attempt() {
            let mut session = setup();
            let mut ex = Exercise::new(Equation::Addition { a: 2, b: 3 });
            let outcome = session.record_attempt(&mut ex, NOT_RECOGNIZED, 3000).unwrap();
            assert_eq!(outcome, AttemptOutcome::NotRecognized);
            assert!(!ex.correct());
            assert!(snapshot(&session).is_empty());

            let attempts = session.store().list_attempts(session.user_id(), 10).unwrap();
            assert_eq!(attempts.len(), 1);
            assert_eq!(attempts[0].outcome(), AttemptOutcome::NotRecognized);
        }

        #[test]
        fn inverse_form_updates_its_standard_fact() {
            let mut session = setup();
            let mut ex = Exercise::new(Equation::MissingAddend { a: 5, result: 8 });
            session.record_attempt(&mut ex, 3, 1000).unwrap();
            let fact = FactId::new(Operation::Addition, 5, 3);
            assert_eq!(snapshot(&session).global()[&fact].strength, 1);
        }

        #[test]
        fn fast_track_policy_rewards_gold_answers() {
            let mut session = setup().with_strength_policy(StrengthPolicy::FastTrack);
            let mut ex = Exercise::new(Equation::Addition { a: 2, b: 3 });
            session.record_attempt(&mut ex, 5, 500).unwrap();
            assert_eq!(snapshot(&session).global()[&ex.fact_id()].strength, 2);
        }

        #[test]
        fn attempt_timestamp_is_recording_time() {
            let mut session = setup();
            let at = Utc::now() - chrono::Duration::days(2);
            let mut ex = Exercise::new(Equation::Addition { a: 1, b: 1 });
            session.record_attempt_at(&mut ex, 2, 800, at).unwrap();
            let attempts = session.store().list_attempts(session.user_id(), 1).unwrap();
            assert_eq!(attempts[0].timestamp.timestamp(), at.timestamp());
            let mastery = snapshot(&session).global()[&ex.fact_id()].clone();
            assert_eq!(mastery.last_tested.timestamp(), at.timestamp());
        }

        #[test]
        fn level_isolation() {
            // 2 + 2 is in both ADD_SUM_5 and ADD_DOUBLES.
            let mut session = setup();
            session.initialize(pinned("ADD_DOUBLES"), rng()).unwrap();
            for _ in 0..5 {
                let mut ex = Exercise::new(Equation::Addition { a: 2, b: 2 });
                session.record_attempt(&mut ex, 4, 1000).unwrap();
            }

            let snap = snapshot(&session);
            let sums = session.curriculum().level("ADD_SUM_5").unwrap();
            let doubles = session.curriculum().level("ADD_DOUBLES").unwrap();
            assert_eq!(sums.progress(&snap.for_level("ADD_SUM_5"), 5), 0.0);
            assert!(doubles.progress(&snap.for_level("ADD_DOUBLES"), 5) > 0.0);
            assert!(sums.progress(&snap.global(), 5) > 0.0);
        }
    }

    mod failure_tests {
        use super::*;

        #[test]
        fn storage_failure_on_next_propagates() {
            let mut session = PracticeSession::new(FailingStore, Curriculum::standard(), 1);
            session.initialize(ExerciseConfig::default(), rng()).unwrap();
            assert!(matches!(session.next_exercise(), Err(Error::Database(_))));
        }

        #[test]
        fn storage_failure_on_record_propagates() {
            let mut session = PracticeSession::new(FailingStore, Curriculum::standard(), 1);
            let mut ex = Exercise::new(Equation::Addition { a: 1, b: 1 });
            let result = session.record_attempt(&mut ex, 2, 500);
            assert!(matches!(result, Err(Error::Database(_))));
            assert_eq!(ex, Exercise::new(Equation::Addition { a: 1, b: 1 }));
        }

        #[test]
        fn failed_mastery_write_leaves_exercise_unanswered() {
            struct NoMasteryWrites(Database);

            impl MasteryStore for NoMasteryWrites {
                fn load_user(&self, user_id: i64) -> Result<Option<User>> {
                    self.0.load_user(user_id)
                }

                fn load_mastery_for_user(&self, user_id: i64) -> Result<Vec<FactMastery>> {
                    self.0.load_mastery_for_user(user_id)
                }

                fn upsert_mastery(&self, _update: &MasteryUpdate) -> Result<()> {
                    Err(Error::Database(rusqlite::Error::InvalidQuery))
                }

                fn append_attempt(&self, attempt: &Attempt) -> Result<i64> {
                    self.0.append_attempt(attempt)
                }
            }

            let db = Database::open(":memory:").unwrap();
            db.init().unwrap();
            let user = db.add_user("learner").unwrap();
            let mut session =
                PracticeSession::new(NoMasteryWrites(db), Curriculum::standard(), user);
            let mut ex = Exercise::new(Equation::Addition { a: 3, b: 4 });

            assert!(session.record_attempt(&mut ex, 7, 800).is_err());
            assert_eq!(ex, Exercise::new(Equation::Addition { a: 3, b: 4 }));
        }
    }
}
