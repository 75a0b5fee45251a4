use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::scheduler::{
    SchedulerConfig, LEARNING_EXERCISE_PROBABILITY, MASTERY_STRENGTH, WORKING_SET_SIZE,
};
use crate::srs::{StrengthPolicy, MAX_STRENGTH, MIN_STRENGTH};

const APP_DIR: &str = "factdrill";
const CONFIG_FILE: &str = "config.toml";
const DEFAULT_DB_NAME: &str = "factdrill.db";
const ENV_PREFIX: &str = "FACTDRILL";
const DB_OVERRIDE_VAR: &str = "FACTDRILL_DB";

/// Settings merged from defaults, the user's `config.toml` and
/// `FACTDRILL_*` environment variables, later sources winning.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    pub db_path: Option<PathBuf>,
    pub user_id: Option<i64>,
    pub mastery_strength: u8,
    pub learning_probability: f64,
    pub working_set_size: usize,
    pub strength_policy: String,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let file = app_dir().map(|dir| dir.join(CONFIG_FILE));
        Self::from_sources(file.as_deref(), std::env::vars().collect())
    }

    fn from_sources(file: Option<&Path>, vars: HashMap<String, String>) -> Result<Self> {
        let db_override = vars.get(DB_OVERRIDE_VAR).cloned();

        let mut builder = Config::builder()
            .set_default("mastery_strength", i64::from(MASTERY_STRENGTH))?
            .set_default("learning_probability", LEARNING_EXERCISE_PROBABILITY)?
            .set_default("working_set_size", WORKING_SET_SIZE as i64)?
            .set_default("strength_policy", StrengthPolicy::default().as_str())?;
        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(false));
        }
        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(Some(vars)),
            )
            .set_override_option("db_path", db_override)?
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if !(MIN_STRENGTH..=MAX_STRENGTH).contains(&self.mastery_strength) {
            return Err(Error::InvalidConfig(format!(
                "mastery_strength {} is outside {}..={}",
                self.mastery_strength, MIN_STRENGTH, MAX_STRENGTH
            )));
        }
        self.strength_policy()?;
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            mastery_strength: self.mastery_strength,
            learning_probability: self.learning_probability,
            working_set_size: self.working_set_size,
        }
    }

    pub fn strength_policy(&self) -> Result<StrengthPolicy> {
        StrengthPolicy::from_str(&self.strength_policy).ok_or_else(|| {
            Error::InvalidConfig(format!(
                "unknown strength policy '{}'. Use: standard, fast_track, or speed_gated",
                self.strength_policy
            ))
        })
    }

    /// Configured database path, or `factdrill.db` in the platform config dir.
    pub fn database_path(&self) -> PathBuf {
        if let Some(path) = &self.db_path {
            return path.clone();
        }
        let dir = app_dir().unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir).ok();
        dir.join(DEFAULT_DB_NAME)
    }
}

fn app_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR))
}
