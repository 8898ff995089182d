//! Pipeline configuration, read from a JSON file. Every section has defaults,
//! and the default job list rebuilds the standard Ramsey data set.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::planner::PartitionScheme;
use crate::ramsey::ParameterPair;
use crate::store::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            program: "geng".to_string(),
            args: Vec::new(),
            timeout_secs: None,
        }
    }
}

impl GeneratorConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CounterConfig {
    #[default]
    Builtin,
    Process {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("ramsey_results.db"),
            max_retries: 3,
            retry_backoff_ms: 50,
        }
    }
}

impl StoreConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub static_dir: PathBuf,
    pub default_table: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".to_string(),
            static_dir: PathBuf::from("."),
            default_table: "r34".to_string(),
        }
    }
}

/// One vertex-count run: its shard plan, its artifact and the families counted on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub vertex_count: u32,
    #[serde(default = "one")]
    pub shard_count: u32,
    #[serde(default)]
    pub record_limit: Option<u64>,
    #[serde(default)]
    pub scheme: PartitionScheme,
    pub artifact: PathBuf,
    #[serde(default)]
    pub families: Vec<ParameterPair>,
}

fn one() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub generator: GeneratorConfig,
    pub counter: CounterConfig,
    pub store: StoreConfig,
    pub server: ServerConfig,
    pub jobs: Vec<JobConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            generator: GeneratorConfig::default(),
            counter: CounterConfig::default(),
            store: StoreConfig::default(),
            server: ServerConfig::default(),
            jobs: default_jobs(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path` when given, otherwise use the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generator.program.is_empty() {
            return Err(ConfigError::Invalid("generator.program is empty".into()));
        }
        if let CounterConfig::Process { program, .. } = &self.counter {
            if program.is_empty() {
                return Err(ConfigError::Invalid("counter.program is empty".into()));
            }
        }
        self.default_table()?;
        Ok(())
    }

    pub fn default_table(&self) -> Result<ParameterPair, ConfigError> {
        ParameterPair::from_table_name(&self.server.default_table)
            .map_err(|err| ConfigError::Invalid(format!("server.default_table: {err}")))
    }
}

/// Vertex counts, shard plans and families of the standard data set:
/// small counts are enumerated whole, 14 and 18 vertices per edge count with a
/// per-shard cap.
pub fn default_jobs() -> Vec<JobConfig> {
    let family = |m, n| ParameterPair::new(m, n).into_iter();
    vec![
        JobConfig {
            vertex_count: 6,
            shard_count: 1,
            record_limit: None,
            scheme: PartitionScheme::EdgeCount,
            artifact: PathBuf::from("6-graphs.csv"),
            families: family(3, 3).collect(),
        },
        JobConfig {
            vertex_count: 9,
            shard_count: 1,
            record_limit: None,
            scheme: PartitionScheme::EdgeCount,
            artifact: PathBuf::from("9-graphs.csv"),
            families: family(3, 4).collect(),
        },
        JobConfig {
            vertex_count: 14,
            shard_count: 92,
            record_limit: Some(15_000),
            scheme: PartitionScheme::EdgeCount,
            artifact: PathBuf::from("14-graphs.csv"),
            families: family(3, 5).collect(),
        },
        JobConfig {
            vertex_count: 18,
            shard_count: 154,
            record_limit: Some(10_000),
            scheme: PartitionScheme::EdgeCount,
            artifact: PathBuf::from("18-graphs.csv"),
            families: family(4, 4).chain(family(3, 6)).collect(),
        },
    ]
}
