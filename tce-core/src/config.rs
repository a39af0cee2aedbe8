//! Oracle configuration

use crate::attestation::SigningConfig;
use crate::crypto::DEFAULT_KEY_BITS;
use crate::keystore::KeySelectionPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Smallest RSA modulus accepted for signing keys
pub const MIN_KEY_BITS: usize = 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub keys: KeysConfig,
    pub signing: SigningConfig,
    pub sink: SinkConfig,
    pub server: ServerConfig,
    /// Seeds synthesis and key generation; entropy when absent
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeysConfig {
    /// Directory holding `sensor<n>_{private,public}.pem`
    #[serde(default = "default_key_dir")]
    pub dir: PathBuf,

    /// Number of keys the pool is initialized with
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// RSA modulus size for generated keys
    #[serde(default = "default_key_bits")]
    pub bits: usize,

    #[serde(default)]
    pub selection: KeySelectionPolicy,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            dir: default_key_dir(),
            pool_size: default_pool_size(),
            bits: default_key_bits(),
            selection: KeySelectionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// File the mock proofing sink writes bundles to
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            output_path: default_output_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_key_dir() -> PathBuf {
    PathBuf::from("keys")
}
fn default_pool_size() -> u32 {
    5
}
fn default_key_bits() -> usize {
    DEFAULT_KEY_BITS
}
fn default_output_path() -> PathBuf {
    PathBuf::from("activities.json")
}
fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl OracleConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read a TOML config file. Unset fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keys.pool_size == 0 {
            return Err(ConfigError::Invalid("keys.pool_size must be at least 1".into()));
        }
        if self.keys.bits < MIN_KEY_BITS {
            return Err(ConfigError::Invalid(format!(
                "keys.bits must be at least {MIN_KEY_BITS}, got {}",
                self.keys.bits
            )));
        }
        if let KeySelectionPolicy::Id(id) = &self.keys.selection {
            if id.index() > self.keys.pool_size {
                return Err(ConfigError::Invalid(format!(
                    "keys.selection {id} is outside a pool of {}",
                    self.keys.pool_size
                )));
            }
        }
        Ok(())
    }
}
