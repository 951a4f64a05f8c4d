//=====================================================
// File: config.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Toolchain configuration
// Objective: Load `strata.toml` from the working directory or the user
//            config directory and turn it into compile and runtime options
//=====================================================

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strata_core::vm::RuntimeOptions;
use thiserror::Error;
use tracing::debug;

use crate::compiler::{CompileOptions, OptLevel};

pub const CONFIG_FILE: &str = "strata.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("optimization_level must be between 0 and 3, got {0}")]
    OptimizationLevel(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    pub optimization_level: u8,
    /// Call depth at which the VM raises StackOverflowException.
    pub max_frames: usize,
    pub trace: bool,
    pub print_ast: bool,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            optimization_level: 0,
            max_frames: RuntimeOptions::default().max_frames,
            trace: false,
            print_ast: false,
        }
    }
}

impl StrataConfig {
    /// `./strata.toml`, then `<config_dir>/strata/strata.toml`, then defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::search_paths().into_iter().find(|path| path.is_file()) {
            Some(path) => Self::from_path(&path),
            None => {
                debug!("no configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("strata").join(CONFIG_FILE));
        }
        paths
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.opt_level()?;
        debug!(path = %path.display(), ?config, "loaded configuration");
        Ok(config)
    }

    pub fn opt_level(&self) -> Result<OptLevel, ConfigError> {
        OptLevel::try_from(self.optimization_level)
            .map_err(|_| ConfigError::OptimizationLevel(self.optimization_level))
    }

    pub fn compile_options(&self) -> Result<CompileOptions, ConfigError> {
        Ok(CompileOptions::with_level(self.opt_level()?))
    }

    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            max_frames: self.max_frames,
            trace: self.trace,
            ..RuntimeOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_keys_keep_their_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "optimization_level = 2").expect("write");
        let config = StrataConfig::from_path(file.path()).expect("config");
        assert_eq!(config.optimization_level, 2);
        assert_eq!(config.max_frames, 1024);
        assert_eq!(config.opt_level().expect("level"), OptLevel::O2);
    }

    #[test]
    fn runtime_options_follow_the_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "max_frames = 64\ntrace = true\n").expect("write");
        let options = StrataConfig::from_path(&path).expect("config").runtime_options();
        assert_eq!(options.max_frames, 64);
        assert!(options.trace);
    }

    #[test]
    fn rejects_out_of_range_levels() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "optimization_level = 7\n").expect("write");
        assert!(matches!(
            StrataConfig::from_path(&path),
            Err(ConfigError::OptimizationLevel(7))
        ));
    }

    #[test]
    fn malformed_files_name_the_path() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "trace = \"yes\"\n").expect("write");
        let err = StrataConfig::from_path(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(CONFIG_FILE));
    }
}
