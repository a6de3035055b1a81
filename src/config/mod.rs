// Required external crates for configuration management and serialization
use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::error::{FormerError, Result};
use crate::llm::inference::MaskPolicy;

fn default_ff_hidden_mult() -> usize {
    4
}

fn default_depth() -> usize {
    1
}

fn default_seq_length() -> usize {
    512
}

/// Shape and regularization parameters of a transformer block (and of a stack of them)
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ModelConfig {
    /// Feature dimension E
    pub embedding_width: usize,
    /// Number of attention heads H, each projecting the full width E
    pub heads: usize,
    /// Attention visibility policy
    #[serde(default)]
    pub mask: MaskPolicy,
    /// Feed-forward hidden layer is `ff_hidden_mult * E` wide
    #[serde(default = "default_ff_hidden_mult")]
    pub ff_hidden_mult: usize,
    /// Dropout probability in [0, 1)
    #[serde(default)]
    pub dropout_p: f32,
    /// Number of stacked blocks
    #[serde(default = "default_depth")]
    pub depth: usize,
    /// Longest sequence the stack accepts
    #[serde(default = "default_seq_length")]
    pub seq_length: usize,
}

impl ModelConfig {
    /// Full attention, feed-forward multiplier 4, no dropout, a single block
    pub fn new(embedding_width: usize, heads: usize) -> Self {
        Self {
            embedding_width,
            heads,
            mask: MaskPolicy::None,
            ff_hidden_mult: default_ff_hidden_mult(),
            dropout_p: 0.0,
            depth: default_depth(),
            seq_length: default_seq_length(),
        }
    }

    pub fn ff_hidden_width(&self) -> usize {
        self.ff_hidden_mult * self.embedding_width
    }

    /// Checks every value; the first violation is reported
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("embedding_width", self.embedding_width),
            ("heads", self.heads),
            ("ff_hidden_mult", self.ff_hidden_mult),
            ("depth", self.depth),
            ("seq_length", self.seq_length),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(FormerError::Config(format!("{} must be greater than 0", name)));
            }
        }

        if !(0.0..1.0).contains(&self.dropout_p) {
            return Err(FormerError::Config(format!(
                "dropout_p must be in [0, 1), got: {}",
                self.dropout_p
            )));
        }

        Ok(())
    }
}

/// Parameters of a `former forward` run
#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    /// Batch dimension B of the generated input
    pub batch_size: usize,
    /// Sequence dimension T of the generated input
    pub seq_len: usize,
    /// Seed for weights, input and dropout
    pub seed: u64,
    /// Optional weight file to load instead of seeded weights
    pub weights: Option<PathBuf>,
}

/// Configuration for application logging
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Optional log directory; logs go to stderr when absent
    pub file: Option<PathBuf>,
}

/// Main settings struct that contains all configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Model-related settings
    pub model: ModelConfig,
    /// Run-related settings
    pub run: RunConfig,
    /// Logging-related settings
    pub logging: LoggingConfig,
}

/// Implementation for loading and parsing configuration
impl Settings {
    /// Loads config from multiple sources
    /// in the following order of precedence (highest to lowest):
    /// 1. Environment variables prefixed with FORMER_ (e.g. FORMER_MODEL__HEADS)
    /// 2. Local config file (local.toml) if present
    /// 3. Default config file (default.toml)
    pub fn load(config_dir: &Path) -> std::result::Result<Self, ConfigError> {
        // Check if config directory exists
        if !config_dir.exists() {
            return Err(ConfigError::Message(format!(
                "Config directory not found at: {}",
                config_dir.display()
            )));
        }

        // Check if default.toml exists
        let default_config = config_dir.join("default.toml");
        if !default_config.exists() {
            return Err(ConfigError::Message(format!(
                "Default configuration file not found at: {}",
                default_config.display()
            )));
        }

        let local_config = config_dir.join("local.toml");

        // Load and validate configuration
        let settings = Config::builder()
            .add_source(File::from(default_config))
            .add_source(File::from(local_config).required(false))
            .add_source(
                Environment::with_prefix("FORMER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Settings>()?;

        // Validate settings after loading
        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration values
    fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.model
            .validate()
            .map_err(|e| ConfigError::Message(e.to_string()))?;

        if self.run.batch_size == 0 {
            return Err(ConfigError::Message("batch_size must be greater than 0".to_string()));
        }

        if self.run.seq_len == 0 || self.run.seq_len > self.model.seq_length {
            return Err(ConfigError::Message(format!(
                "seq_len must be between 1 and {}, got: {}",
                self.model.seq_length, self.run.seq_len
            )));
        }

        // Validate logging level
        match self.logging.level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => Ok(()),
            _ => Err(ConfigError::Message(format!(
                "Invalid logging level: {}. Must be one of: error, warn, info, debug, trace",
                self.logging.level
            ))),
        }?;

        // Create log directory if configured and doesn't exist
        if let Some(log_dir) = &self.logging.file {
            if !log_dir.exists() {
                std::fs::create_dir_all(log_dir).map_err(|e| {
                    ConfigError::Message(format!(
                        "Failed to create log directory at {}: {}",
                        log_dir.display(),
                        e
                    ))
                })?;
            }
        }

        Ok(())
    }
}
