//! Server configuration.
//!
//! Loaded from a TOML file; every value can be overridden by an environment
//! variable named `AL_<SECTION>_<KEY>`, e.g. `AL_THREADPOOL_GENERAL_THREADS=8`.

mod transform;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use transform::{
    BoolTransformer, DurationTransformer, ParseTransformer, PathTransformer, PropertyTransformer,
    TransformationError,
};

use crate::dao::DatabaseInfo;
use crate::error::{Error, Result};
use crate::scheduling::{PoolConfig, ThreadPriority};

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "AL_";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonsConfig {
    pub threadpool: ThreadPoolConfig,
    pub scripting: ScriptingConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadPoolConfig {
    pub general_threads: usize,
    pub scheduled_threads: usize,
    pub long_running_threads: usize,
    pub queue_capacity: usize,
    pub priority: u8,
    /// Runs slower than this are logged; zero disables the warning.
    pub max_execution_time_ms: u64,
    pub collect_stats: bool,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism().map_or(4, |n| n.get());
        Self {
            general_threads: cpus,
            scheduled_threads: cpus,
            long_running_threads: 2,
            queue_capacity: 4096,
            priority: ThreadPriority::NORM,
            max_execution_time_ms: 5_000,
            collect_stats: false,
        }
    }
}

impl ThreadPoolConfig {
    pub fn max_execution_time(&self) -> Duration {
        Duration::from_millis(self.max_execution_time_ms)
    }

    /// Pool settings for a pool named `name` with `threads` workers.
    pub fn pool(&self, name: &str, threads: usize) -> PoolConfig {
        PoolConfig {
            queue_capacity: self.queue_capacity,
            priority: self.priority,
            ..PoolConfig::new(name, threads)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptingConfig {
    /// Descriptor listing the script contexts.
    pub descriptor: PathBuf,
    /// Where script libraries are built; the system temp dir when unset.
    pub build_dir: Option<PathBuf>,
    /// Reload script contexts when their files change.
    pub watch: bool,
    pub opt_level: u8,
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            descriptor: PathBuf::from("data/scripts/scripts.toml"),
            build_dir: None,
            watch: true,
            opt_level: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub name: String,
    pub major: u32,
    pub minor: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: "memory".to_string(),
            major: 1,
            minor: 0,
        }
    }
}

impl From<&DatabaseConfig> for DatabaseInfo {
    fn from(config: &DatabaseConfig) -> Self {
        DatabaseInfo {
            name: config.name.clone(),
            major: config.major,
            minor: config.minor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl CommonsConfig {
    /// Read a config file and apply the environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("can't read {}: {}", path.display(), e)))?;
        let mut config = Self::parse(&content)?;
        config.apply_overrides(std::env::vars())?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Defaults with the environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(std::env::vars())?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Apply `AL_<SECTION>_<KEY>` variables. Unknown keys are logged and
    /// ignored; other variables are skipped.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> std::result::Result<(), TransformationError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in vars {
            let Some(property) = name.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let property = property.to_ascii_lowercase();
            if !self.set(&property, value.as_ref())? {
                tracing::warn!("Unknown configuration property {}{}", ENV_PREFIX, property.to_ascii_uppercase());
            }
        }
        Ok(())
    }

    /// Set a property by `section_key` name. Returns false if the name is
    /// unknown.
    pub fn set(&mut self, property: &str, value: &str) -> std::result::Result<bool, TransformationError> {
        let Some((section, key)) = property.split_once('_') else {
            return Ok(false);
        };
        let pool = &mut self.threadpool;
        let scripting = &mut self.scripting;
        let database = &mut self.database;
        match (section, key) {
            ("threadpool", "general_threads") => {
                pool.general_threads = ParseTransformer::new().transform(property, value)?
            }
            ("threadpool", "scheduled_threads") => {
                pool.scheduled_threads = ParseTransformer::new().transform(property, value)?
            }
            ("threadpool", "long_running_threads") => {
                pool.long_running_threads = ParseTransformer::new().transform(property, value)?
            }
            ("threadpool", "queue_capacity") => {
                pool.queue_capacity = ParseTransformer::new().transform(property, value)?
            }
            ("threadpool", "priority") => {
                pool.priority = ParseTransformer::new().transform(property, value)?
            }
            ("threadpool", "max_execution_time_ms") => {
                pool.max_execution_time_ms =
                    DurationTransformer.transform(property, value)?.as_millis() as u64
            }
            ("threadpool", "collect_stats") => {
                pool.collect_stats = BoolTransformer.transform(property, value)?
            }
            ("scripting", "descriptor") => {
                scripting.descriptor = PathTransformer.transform(property, value)?
            }
            ("scripting", "build_dir") => {
                scripting.build_dir = Some(PathTransformer.transform(property, value)?)
            }
            ("scripting", "watch") => scripting.watch = BoolTransformer.transform(property, value)?,
            ("scripting", "opt_level") => {
                scripting.opt_level = ParseTransformer::new().transform(property, value)?
            }
            ("database", "name") => database.name = value.trim().to_string(),
            ("database", "major") => {
                database.major = ParseTransformer::new().transform(property, value)?
            }
            ("database", "minor") => {
                database.minor = ParseTransformer::new().transform(property, value)?
            }
            ("logging", "filter") => self.logging.filter = value.trim().to_string(),
            _ => return Ok(false),
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_partial_file() {
        let config = CommonsConfig::parse(
            r#"
[threadpool]
general_threads = 3
collect_stats = true

[scripting]
descriptor = "scripts/list.toml"
watch = false
"#,
        )
        .unwrap();

        assert_eq!(config.threadpool.general_threads, 3);
        assert!(config.threadpool.collect_stats);
        assert_eq!(config.threadpool.priority, ThreadPriority::NORM);
        assert_eq!(config.scripting.descriptor, PathBuf::from("scripts/list.toml"));
        assert!(!config.scripting.watch);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_overrides() {
        let mut config = CommonsConfig::default();
        config
            .apply_overrides([
                ("AL_THREADPOOL_SCHEDULED_THREADS", "7"),
                ("AL_THREADPOOL_MAX_EXECUTION_TIME_MS", "2s"),
                ("AL_SCRIPTING_WATCH", "no"),
                ("AL_DATABASE_NAME", "mysql"),
                ("AL_UNKNOWN_THING", "1"),
                ("PATH", "/usr/bin"),
            ])
            .unwrap();

        assert_eq!(config.threadpool.scheduled_threads, 7);
        assert_eq!(config.threadpool.max_execution_time(), Duration::from_secs(2));
        assert!(!config.scripting.watch);
        assert_eq!(config.database.name, "mysql");
    }

    #[test]
    fn test_bad_override_is_transformation_error() {
        let mut config = CommonsConfig::default();
        let err = config
            .apply_overrides([("AL_THREADPOOL_PRIORITY", "high")])
            .unwrap_err();
        assert_eq!(err.property, "threadpool_priority");
        assert_eq!(err.value, "high");

        let err: Error = err.into();
        assert!(matches!(err, Error::Transformation(_)));
    }

    #[test]
    fn test_load_errors() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            CommonsConfig::load(&dir.path().join("missing.toml")),
            Err(Error::Config(_))
        ));

        let path = dir.path().join("bad.toml");
        fs::write(&path, "[threadpool]\ngeneral_threads = \"many\"\n").unwrap();
        assert!(matches!(CommonsConfig::load(&path), Err(Error::Config(_))));
    }
}
