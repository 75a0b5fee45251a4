mod config;
mod curriculum;
mod db;
mod equation;
mod error;
mod models;
mod scheduler;
mod session;
mod srs;

use std::io::{self, BufRead, Write};
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::Settings;
use curriculum::Curriculum;
use db::Database;
use equation::{AnswerStatus, Equation, Exercise, FactId, Operation, NOT_RECOGNIZED};
use error::{Error, Result};
use models::{AttemptOutcome, JsonOutput, MasteryScope, MasterySnapshot};
use scheduler::Strategy;
use session::{ExerciseConfig, PracticeSession};

const DEFAULT_USER_NAME: &str = "default";

#[derive(Parser)]
#[command(name = "factdrill")]
#[command(about = "An adaptive arithmetic fact trainer with spaced-repetition scheduling")]
#[command(version)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// User ID to practice as (defaults to the configured or first user)
    #[arg(long, short, global = true)]
    user: Option<i64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Manage users
    #[command(subcommand)]
    User(UserCommands),

    /// List curriculum levels
    Levels {
        /// Filter by operation
        #[arg(long, short)]
        operation: Option<String>,
    },

    /// Show per-level progress
    Progress {
        /// Filter by operation
        #[arg(long, short)]
        operation: Option<String>,
    },

    /// Show the next exercise the scheduler would pick
    Next(SelectionArgs),

    /// Record an answer to an exercise
    Answer {
        /// Fact ID, e.g. ADDITION_5_3
        fact_id: String,

        /// The submitted answer; anything that is not a number counts as unrecognized
        #[arg(allow_hyphen_values = true)]
        answer: String,

        /// The question was shown with a missing operand
        #[arg(long)]
        inverse: bool,

        /// Time taken to answer, in milliseconds
        #[arg(long, short, default_value_t = 0)]
        duration_ms: u64,

        /// Level the exercise was practiced under
        #[arg(long, short)]
        level: Option<String>,
    },

    /// Practice interactively on the terminal
    Practice {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Number of exercises (0 for no limit)
        #[arg(long, short = 'n', default_value_t = 10)]
        count: usize,
    },

    /// Show practice statistics
    Stats,

    /// Show recent attempts
    History {
        /// Number of attempts to show
        #[arg(long, short = 'n', default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    /// Add a user
    Add {
        /// User name
        name: String,
    },

    /// List all users
    List,

    /// Delete a user and all of their history
    Delete {
        /// User ID
        id: i64,
    },
}

#[derive(Args, Debug, Clone)]
struct SelectionArgs {
    /// Only practice one operation: addition, subtraction, multiplication or division
    #[arg(long, short)]
    operation: Option<String>,

    /// Pin practice to a single level
    #[arg(long, short)]
    level: Option<String>,

    /// Scheduling strategy: smart, drill or review
    #[arg(long, short, default_value = "smart")]
    strategy: String,

    /// Largest number to show (ignored with --level)
    #[arg(long, short)]
    difficulty: Option<i32>,
}

impl SelectionArgs {
    fn exercise_config(&self, count: usize) -> Result<ExerciseConfig> {
        let strategy = Strategy::from_str(&self.strategy)
            .ok_or_else(|| Error::UnknownStrategy(self.strategy.clone()))?;
        Ok(ExerciseConfig {
            operation: parse_operation(self.operation.as_deref())?,
            difficulty: self.difficulty,
            count,
            level_id: self.level.clone(),
            strategy,
        })
    }
}

#[derive(Serialize)]
struct LevelInfo<'a> {
    id: &'a str,
    operation: Operation,
    facts: usize,
    max_number: i32,
    description: String,
    example: Option<String>,
}

#[derive(Serialize)]
struct LevelProgress<'a> {
    level: &'a str,
    operation: Operation,
    progress: f64,
    level_progress: f64,
    stars: u8,
    mastered: bool,
}

#[derive(Serialize)]
struct NextExercise {
    user_id: i64,
    level: Option<String>,
    fact_id: FactId,
    question: String,
    inverse: bool,
}

#[derive(Serialize)]
struct AnswerResult {
    fact_id: FactId,
    outcome: AttemptOutcome,
    expected: i32,
    strength: Option<u8>,
    speed_badge: srs::SpeedBadge,
}

#[derive(Debug, Default, Serialize)]
struct PracticeSummary {
    answered: usize,
    correct: usize,
    incorrect: usize,
    not_recognized: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let json = cli.json;

    if let Err(e) = run(cli) {
        if json {
            if let Ok(out) = serde_json::to_string(&JsonOutput::<()>::err(e.to_string())) {
                println!("{}", out);
            }
        } else {
            eprintln!("Error: {}", e);
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load()?;
    let db_path = settings.database_path();
    let db = Database::open(&db_path)?;

    match cli.command {
        Commands::Init => {
            db.init()?;
            let created = if db.list_users()?.is_empty() {
                Some(db.add_user(DEFAULT_USER_NAME)?)
            } else {
                None
            };
            if cli.json {
                print_json(serde_json::json!({
                    "db_path": db_path,
                    "created_user": created,
                }))?;
            } else {
                println!("Database initialized at: {}", db_path.display());
                if let Some(id) = created {
                    println!("Created user '{}' with ID: {}", DEFAULT_USER_NAME, id);
                }
            }
        }

        Commands::User(user_cmd) => match user_cmd {
            UserCommands::Add { name } => {
                if let Some(existing) = db.find_user_by_name(&name)? {
                    return Err(Error::InvalidConfig(format!(
                        "user '{}' already exists with ID {}",
                        name, existing.id
                    )));
                }
                let id = db.add_user(&name)?;
                if cli.json {
                    print_json(serde_json::json!({ "id": id, "name": name }))?;
                } else {
                    println!("Added user '{}' with ID: {}", name, id);
                }
            }

            UserCommands::List => {
                let users = db.list_users()?;
                if cli.json {
                    print_json(&users)?;
                } else if users.is_empty() {
                    println!("No users found. Run `factdrill init` first.");
                } else {
                    println!("{:<5} {:<30} CREATED", "ID", "NAME");
                    println!("{}", "-".repeat(60));
                    for user in users {
                        println!(
                            "{:<5} {:<30} {}",
                            user.id,
                            truncate(&user.name, 28),
                            user.created_at.format("%Y-%m-%d")
                        );
                    }
                }
            }

            UserCommands::Delete { id } => {
                if db.delete_user(id)? {
                    if cli.json {
                        print_json(())?;
                    } else {
                        println!("User {} deleted.", id);
                    }
                } else {
                    return Err(Error::UserNotFound(id));
                }
            }
        },

        Commands::Levels { operation } => {
            let curriculum =
                Curriculum::standard().filtered(parse_operation(operation.as_deref())?);
            let mut rng = StdRng::from_entropy();
            if cli.json {
                let levels: Vec<LevelInfo> = curriculum
                    .levels()
                    .iter()
                    .map(|l| LevelInfo {
                        id: l.id(),
                        operation: l.operation(),
                        facts: l.fact_ids().len(),
                        max_number: l.max_number(),
                        description: l.description(),
                        example: l.generate_exercise(&mut rng).map(|eq| eq.question()),
                    })
                    .collect();
                print_json(&levels)?;
            } else {
                println!(
                    "{:<20} {:<15} {:>5}  {:<40}  EXAMPLE",
                    "LEVEL", "OPERATION", "FACTS", "DESCRIPTION"
                );
                println!("{}", "-".repeat(95));
                for level in curriculum.levels() {
                    let example = level
                        .generate_exercise(&mut rng)
                        .map(|eq| eq.question())
                        .unwrap_or_default();
                    println!(
                        "{:<20} {:<15} {:>5}  {:<40}  {}",
                        level.id(),
                        level.operation().to_string().to_lowercase(),
                        level.fact_ids().len(),
                        truncate(&level.description(), 40),
                        example
                    );
                }
                println!();
                println!("{} levels", curriculum.len());
            }
        }

        Commands::Progress { operation } => {
            let user_id = resolve_user(&db, cli.user, &settings)?;
            let curriculum =
                Curriculum::standard().filtered(parse_operation(operation.as_deref())?);
            let snapshot = MasterySnapshot::new(db.load_mastery_for_user(user_id)?);
            let global = snapshot.global();
            let mastery_strength = settings.mastery_strength;

            let rows: Vec<LevelProgress> = curriculum
                .levels()
                .iter()
                .map(|l| {
                    let scoped = snapshot.for_level(l.id());
                    LevelProgress {
                        level: l.id(),
                        operation: l.operation(),
                        progress: l.progress(&global, mastery_strength),
                        level_progress: l.progress(&scoped, mastery_strength),
                        stars: l.stars(&scoped),
                        mastered: l.is_mastered(&global, mastery_strength),
                    }
                })
                .collect();

            if cli.json {
                print_json(&rows)?;
            } else {
                if snapshot.is_empty() {
                    println!("No practice recorded yet.");
                } else if let Some(level) = curriculum.current_level(&global, mastery_strength) {
                    println!("Current level: {} ({})", level.id(), level.description());
                }
                println!();
                println!("{:<20} {:>8} {:>8}  STARS", "LEVEL", "OVERALL", "HERE");
                println!("{}", "-".repeat(50));
                for row in rows {
                    println!(
                        "{:<20} {:>7.0}% {:>7.0}%  {:<3}{}",
                        row.level,
                        row.progress * 100.0,
                        row.level_progress * 100.0,
                        "*".repeat(usize::from(row.stars)),
                        if row.mastered { "  mastered" } else { "" }
                    );
                }
            }
        }

        Commands::Next(selection) => {
            let user_id = resolve_user(&db, cli.user, &settings)?;
            let mut session = open_session(db, user_id, &settings)?;
            session.initialize(selection.exercise_config(0)?, StdRng::from_entropy())?;

            match session.next_exercise()? {
                Some(ex) => {
                    let next = NextExercise {
                        user_id: session.user_id(),
                        level: session
                            .curriculum()
                            .level_for_equation(&ex.equation)
                            .map(|l| l.id().to_string()),
                        fact_id: ex.fact_id(),
                        question: ex.equation.question(),
                        inverse: is_inverse(&ex.equation),
                    };
                    if cli.json {
                        print_json(&next)?;
                    } else {
                        if let Some(level) = &next.level {
                            println!("[{}]", level);
                        }
                        println!("{}", next.question);
                        println!();
                        println!("Record your answer with:");
                        println!(
                            "  factdrill answer {} <ANSWER>{}",
                            next.fact_id,
                            if next.inverse { " --inverse" } else { "" }
                        );
                    }
                }
                None if cli.json => print_json(())?,
                None => println!("Nothing left to practice here."),
            }
        }

        Commands::Answer {
            fact_id,
            answer,
            inverse,
            duration_ms,
            level,
        } => {
            let user_id = resolve_user(&db, cli.user, &settings)?;
            let fact: FactId = fact_id.parse()?;
            let equation = if inverse {
                fact.inverse_equation().unwrap_or_else(|| fact.equation())
            } else {
                fact.equation()
            };

            let mut session = open_session(db, user_id, &settings)?;
            if level.is_some() {
                let config = ExerciseConfig {
                    level_id: level,
                    ..ExerciseConfig::default()
                };
                session.initialize(config, StdRng::from_entropy())?;
            }

            let mut ex = Exercise::new(equation);
            let outcome = session.record_attempt(&mut ex, parse_answer(&answer), duration_ms)?;
            let mastery = session
                .store()
                .get_mastery(session.user_id(), fact, &MasteryScope::Global)?;

            if cli.json {
                print_json(AnswerResult {
                    fact_id: fact,
                    outcome,
                    expected: ex.equation.expected_result(),
                    strength: mastery.as_ref().map(|m| m.strength),
                    speed_badge: ex.speed_badge,
                })?;
            } else {
                print_outcome(&ex);
                if let Some(m) = mastery {
                    println!(
                        "Strength: {}/{} ({})",
                        m.strength,
                        srs::MAX_STRENGTH,
                        m.strength_label()
                    );
                }
            }
        }

        Commands::Practice { selection, count } => {
            let user_id = resolve_user(&db, cli.user, &settings)?;
            let mut session = open_session(db, user_id, &settings)?;
            session.initialize(selection.exercise_config(count)?, StdRng::from_entropy())?;
            let summary = practice_loop(&mut session, cli.json)?;

            if cli.json {
                print_json(&summary)?;
            } else {
                println!();
                println!(
                    "Answered {}: {} correct, {} incorrect, {} not recognized.",
                    summary.answered, summary.correct, summary.incorrect, summary.not_recognized
                );
            }
        }

        Commands::Stats => {
            let user_id = resolve_user(&db, cli.user, &settings)?;
            let stats = db.get_stats(user_id)?;
            if cli.json {
                print_json(&stats)?;
            } else {
                println!("=== Practice Statistics ===");
                println!("Total attempts: {}", stats.total_attempts);
                println!(
                    "Correct: {}  Incorrect: {}  Not recognized: {}",
                    stats.correct, stats.incorrect, stats.not_recognized
                );
                println!("Accuracy: {:.0}%", stats.accuracy);
                println!("Facts attempted: {}", stats.facts_attempted);
                println!("Facts mastered: {}", stats.facts_mastered);
                println!("Average strength: {:.1}/{}", stats.avg_strength, srs::MAX_STRENGTH);
            }
        }

        Commands::History { limit } => {
            let user_id = resolve_user(&db, cli.user, &settings)?;
            let attempts = db.list_attempts(user_id, limit)?;
            if cli.json {
                print_json(&attempts)?;
            } else if attempts.is_empty() {
                println!("No attempts yet.");
            } else {
                println!(
                    "{:<17} {:<16} {:>8} {:<15} {:>7}",
                    "WHEN", "PROBLEM", "ANSWER", "OUTCOME", "MS"
                );
                println!("{}", "-".repeat(68));
                for attempt in attempts {
                    let submitted = if attempt.submitted_answer == NOT_RECOGNIZED {
                        "?".to_string()
                    } else {
                        attempt.submitted_answer.to_string()
                    };
                    println!(
                        "{:<17} {:<16} {:>8} {:<15} {:>7}",
                        attempt.timestamp.format("%Y-%m-%d %H:%M"),
                        truncate(&attempt.problem_text, 16),
                        submitted,
                        attempt.outcome().as_str(),
                        attempt.duration_ms
                    );
                }
            }
        }
    }

    Ok(())
}

fn practice_loop(session: &mut PracticeSession<Database>, json: bool) -> Result<PracticeSummary> {
    let mut summary = PracticeSummary::default();
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    if !json {
        println!("Type the answer and press enter; q to stop.");
        println!();
    }

    while let Some(mut ex) = session.next_exercise()? {
        // Prompts go to stderr in JSON mode so stdout holds only the summary.
        let mut prompt: Box<dyn Write> = if json {
            Box::new(io::stderr())
        } else {
            Box::new(io::stdout())
        };
        write!(prompt, "{}  ", ex.equation.question())?;
        prompt.flush()?;

        let started = Instant::now();
        let Some(line) = lines.next() else { break };
        let line = line?;
        let input = line.trim();
        if input.eq_ignore_ascii_case("q") || input.eq_ignore_ascii_case("quit") {
            break;
        }
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let outcome = session.record_attempt(&mut ex, parse_answer(input), elapsed)?;
        summary.answered += 1;
        match outcome {
            AttemptOutcome::Correct => summary.correct += 1,
            AttemptOutcome::Incorrect => summary.incorrect += 1,
            AttemptOutcome::NotRecognized => summary.not_recognized += 1,
        }
        if !json {
            print_outcome(&ex);
        }
    }

    Ok(summary)
}

fn print_outcome(ex: &Exercise) {
    match ex.status() {
        AnswerStatus::Correct => {
            let badge = ex.speed_badge.label();
            if badge.is_empty() {
                println!("Correct! {}", ex.display_string());
            } else {
                println!("Correct! {} ({})", ex.display_string(), badge);
            }
        }
        AnswerStatus::Incorrect => println!(
            "Not quite: {}. The answer is {}.",
            ex.display_string(),
            ex.equation.expected_result()
        ),
        AnswerStatus::NotRecognized => println!("Answer not recognized, skipping."),
        AnswerStatus::Unanswered => {}
    }
}

fn open_session(
    db: Database,
    user_id: i64,
    settings: &Settings,
) -> Result<PracticeSession<Database>> {
    Ok(PracticeSession::new(db, Curriculum::standard(), user_id)
        .with_scheduler_config(settings.scheduler_config())
        .with_strength_policy(settings.strength_policy()?))
}

/// Explicit `--user`, then the configured user, then the oldest user.
fn resolve_user(db: &Database, cli_user: Option<i64>, settings: &Settings) -> Result<i64> {
    if let Some(id) = cli_user.or(settings.user_id) {
        return db.get_user(id)?.map(|u| u.id).ok_or(Error::UserNotFound(id));
    }
    db.list_users()?
        .first()
        .map(|u| u.id)
        .ok_or_else(|| Error::InvalidConfig("no users found; run `factdrill init`".to_string()))
}

fn parse_operation(s: Option<&str>) -> Result<Option<Operation>> {
    s.map(|s| Operation::from_str(s).ok_or_else(|| Error::UnknownOperation(s.to_string())))
        .transpose()
}

fn parse_answer(input: &str) -> i32 {
    input.trim().parse().unwrap_or(NOT_RECOGNIZED)
}

fn is_inverse(equation: &Equation) -> bool {
    matches!(
        equation,
        Equation::MissingAddend { .. } | Equation::MissingSubtrahend { .. }
    )
}

fn print_json<T: Serialize>(data: T) -> Result<()> {
    println!("{}", serde_json::to_string(&JsonOutput::ok(data))?);
    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
