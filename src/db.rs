use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

use crate::equation::{FactId, Operation};
use crate::error::{Error, Result};
use crate::models::{Attempt, FactMastery, MasteryScope, MasteryUpdate, User};
use crate::session::MasteryStore;
use crate::srs::MAX_STRENGTH;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self { conn })
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );

            -- One row per projection; level '' is the global projection
            CREATE TABLE IF NOT EXISTS fact_mastery (
                fact_id TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                level TEXT NOT NULL DEFAULT '',
                strength INTEGER NOT NULL CHECK(strength BETWEEN 1 AND 5),
                last_tested TEXT NOT NULL,
                avg_duration_ms INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (fact_id, user_id, level),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS exercise_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                fact_id TEXT NOT NULL,
                problem_text TEXT NOT NULL,
                operation TEXT NOT NULL CHECK(operation IN ('ADDITION', 'SUBTRACTION', 'MULTIPLICATION', 'DIVISION')),
                correct_answer INTEGER NOT NULL,
                submitted_answer INTEGER NOT NULL,
                was_correct INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_mastery_user ON fact_mastery(user_id, level);
            CREATE INDEX IF NOT EXISTS idx_attempts_user ON exercise_attempts(user_id, timestamp);
            "#,
        )?;

        self.migrate()?;

        Ok(())
    }

    // Handle schema migrations for existing databases
    fn migrate(&self) -> Result<()> {
        let has_avg_duration: bool = self
            .conn
            .prepare("SELECT avg_duration_ms FROM fact_mastery LIMIT 1")
            .is_ok();

        if !has_avg_duration {
            debug!("adding avg_duration_ms to fact_mastery");
            self.conn.execute_batch(
                "ALTER TABLE fact_mastery ADD COLUMN avg_duration_ms INTEGER NOT NULL DEFAULT 0;",
            )?;
        }

        Ok(())
    }

    // User operations
    pub fn add_user(&self, name: &str) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO users (name, created_at) VALUES (?1, ?2)",
            params![name, format_timestamp(Utc::now())],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, created_at FROM users WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, name, created_at)| user_from_row(id, name, &created_at))
            .transpose()
    }

    pub fn find_user_by_name(&self, name: &str) -> Result<Option<User>> {
        let id: Option<i64> = self
            .conn
            .query_row("SELECT id FROM users WHERE name = ?1", params![name], |row| {
                row.get(0)
            })
            .optional()?;

        match id {
            Some(id) => self.get_user(id),
            None => Ok(None),
        }
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, created_at FROM users ORDER BY id")?;

        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;

        let mut users = Vec::new();
        for row in rows {
            let (id, name, created_at) = row?;
            users.push(user_from_row(id, name, &created_at)?);
        }
        Ok(users)
    }

    /// Removes the user together with all of their mastery and attempts.
    pub fn delete_user(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM users WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Mastery operations
    pub fn load_mastery_for_user(&self, user_id: i64) -> Result<Vec<FactMastery>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT fact_id, level, strength, last_tested, avg_duration_ms
            FROM fact_mastery
            WHERE user_id = ?1
            ORDER BY level, fact_id
            "#,
        )?;

        let rows = stmt.query_map(params![user_id], |row| {
            Ok(MasteryRow {
                fact_id: row.get(0)?,
                level: row.get(1)?,
                strength: row.get(2)?,
                last_tested: row.get(3)?,
                avg_duration_ms: row.get(4)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_mastery(user_id)?);
        }
        Ok(records)
    }

    pub fn get_mastery(
        &self,
        user_id: i64,
        fact: FactId,
        scope: &MasteryScope,
    ) -> Result<Option<FactMastery>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT fact_id, level, strength, last_tested, avg_duration_ms
                FROM fact_mastery
                WHERE user_id = ?1 AND fact_id = ?2 AND level = ?3
                "#,
                params![user_id, fact.to_string(), scope.as_level_column()],
                |row| {
                    Ok(MasteryRow {
                        fact_id: row.get(0)?,
                        level: row.get(1)?,
                        strength: row.get(2)?,
                        last_tested: row.get(3)?,
                        avg_duration_ms: row.get(4)?,
                    })
                },
            )
            .optional()?;

        row.map(|r| r.into_mastery(user_id)).transpose()
    }

    /// Writes every projection of the update in one transaction.
    pub fn upsert_mastery(&self, update: &MasteryUpdate) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO fact_mastery (fact_id, user_id, level, strength, last_tested, avg_duration_ms)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(fact_id, user_id, level) DO UPDATE SET
                    strength = excluded.strength,
                    last_tested = excluded.last_tested,
                    avg_duration_ms = excluded.avg_duration_ms
                "#,
            )?;

            for record in update.records() {
                stmt.execute(params![
                    record.fact_id.to_string(),
                    record.user_id,
                    record.scope.as_level_column(),
                    record.strength,
                    format_timestamp(record.last_tested),
                    record.avg_duration_ms as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    // Attempt log
    pub fn append_attempt(&self, attempt: &Attempt) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO exercise_attempts
                (user_id, timestamp, fact_id, problem_text, operation,
                 correct_answer, submitted_answer, was_correct, duration_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                attempt.user_id,
                format_timestamp(attempt.timestamp),
                attempt.fact_id.to_string(),
                attempt.problem_text,
                attempt.operation.as_str(),
                attempt.correct_answer,
                attempt.submitted_answer,
                attempt.was_correct,
                attempt.duration_ms as i64,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent attempts first.
    pub fn list_attempts(&self, user_id: i64, limit: usize) -> Result<Vec<Attempt>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, timestamp, fact_id, problem_text, operation,
                   correct_answer, submitted_answer, was_correct, duration_ms
            FROM exercise_attempts
            WHERE user_id = ?1
            ORDER BY timestamp DESC, id DESC
            LIMIT ?2
            "#,
        )?;

        let rows = stmt.query_map(params![user_id, limit as i64], |row| {
            Ok(AttemptRow {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                fact_id: row.get(2)?,
                problem_text: row.get(3)?,
                operation: row.get(4)?,
                correct_answer: row.get(5)?,
                submitted_answer: row.get(6)?,
                was_correct: row.get(7)?,
                duration_ms: row.get(8)?,
            })
        })?;

        let mut attempts = Vec::new();
        for row in rows {
            attempts.push(row?.into_attempt(user_id)?);
        }
        Ok(attempts)
    }

    pub fn get_stats(&self, user_id: i64) -> Result<Stats> {
        let (total_attempts, correct, not_recognized): (i64, i64, i64) = self.conn.query_row(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(was_correct), 0),
                   COALESCE(SUM(submitted_answer = ?2), 0)
            FROM exercise_attempts
            WHERE user_id = ?1
            "#,
            params![user_id, crate::equation::NOT_RECOGNIZED],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let (facts_attempted, facts_mastered, avg_strength): (i64, i64, f64) = self.conn.query_row(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(strength >= ?2), 0),
                   COALESCE(AVG(strength), 0)
            FROM fact_mastery
            WHERE user_id = ?1 AND level = ''
            "#,
            params![user_id, MAX_STRENGTH],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let answered = total_attempts - not_recognized;
        let accuracy = if answered > 0 {
            correct as f64 / answered as f64 * 100.0
        } else {
            0.0
        };

        Ok(Stats {
            total_attempts,
            correct,
            incorrect: answered - correct,
            not_recognized,
            accuracy,
            facts_attempted,
            facts_mastered,
            avg_strength,
        })
    }
}

impl MasteryStore for Database {
    fn load_user(&self, user_id: i64) -> Result<Option<User>> {
        self.get_user(user_id)
    }

    fn load_mastery_for_user(&self, user_id: i64) -> Result<Vec<FactMastery>> {
        Database::load_mastery_for_user(self, user_id)
    }

    fn upsert_mastery(&self, update: &MasteryUpdate) -> Result<()> {
        Database::upsert_mastery(self, update)
    }

    fn append_attempt(&self, attempt: &Attempt) -> Result<i64> {
        Database::append_attempt(self, attempt)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub total_attempts: i64,
    pub correct: i64,
    pub incorrect: i64,
    pub not_recognized: i64,
    pub accuracy: f64,
    pub facts_attempted: i64,
    pub facts_mastered: i64,
    pub avg_strength: f64,
}

struct MasteryRow {
    fact_id: String,
    level: String,
    strength: i64,
    last_tested: String,
    avg_duration_ms: i64,
}

impl MasteryRow {
    fn into_mastery(self, user_id: i64) -> Result<FactMastery> {
        let mut mastery = FactMastery::new(
            self.fact_id.parse()?,
            user_id,
            MasteryScope::from_level_column(self.level),
            self.strength,
            parse_timestamp(&self.last_tested)?,
        );
        mastery.avg_duration_ms = self.avg_duration_ms.max(0) as u64;
        Ok(mastery)
    }
}

struct AttemptRow {
    id: i64,
    timestamp: String,
    fact_id: String,
    problem_text: String,
    operation: String,
    correct_answer: i32,
    submitted_answer: i32,
    was_correct: bool,
    duration_ms: i64,
}

impl AttemptRow {
    fn into_attempt(self, user_id: i64) -> Result<Attempt> {
        let operation = Operation::from_token(&self.operation)
            .ok_or_else(|| Error::UnknownOperation(self.operation.clone()))?;
        Ok(Attempt {
            id: Some(self.id),
            user_id,
            timestamp: parse_timestamp(&self.timestamp)?,
            fact_id: self.fact_id.parse()?,
            problem_text: self.problem_text,
            operation,
            correct_answer: self.correct_answer,
            submitted_answer: self.submitted_answer,
            was_correct: self.was_correct,
            duration_ms: self.duration_ms.max(0) as u64,
        })
    }
}

fn user_from_row(id: i64, name: String, created_at: &str) -> Result<User> {
    Ok(User {
        id,
        name,
        created_at: parse_timestamp(created_at)?,
    })
}

// Fixed-width so that text order matches time order.
fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::DateParse(format!("{}: {}", s, e)))
}
