use crate::engine::{EngineConfig, ExtractFlags, DEFAULT_MAX_SPAN, DEFAULT_SLICE_SIZE};
use crate::extractor::MinerSpec;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Colon-separated directories searched before the configured ones
pub const MINERS_PATH_ENV: &str = "BYTEMINER_MINERS_PATH";
pub const SYSTEM_MINERS_DIR: &str = "/usr/lib/byteminer/miners";

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineSection,
    pub plugins: PluginsSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// All CPUs when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
    pub batch_size: usize,
    pub slice_size: usize,
    pub max_span: usize,
    pub no_enclosed_occurrences: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            threads: None,
            batch_size: 1000,
            slice_size: DEFAULT_SLICE_SIZE,
            max_span: DEFAULT_MAX_SPAN,
            no_enclosed_occurrences: false,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsSection {
    pub search_paths: Vec<PathBuf>,
    /// Loaded for every scan, before the ones given on the command line
    pub miners: Vec<MinerSpec>,
}

impl EngineSection {
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig {
            slice_size: self.slice_size,
            max_span: self.max_span,
            ..EngineConfig::default()
        };
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if self.no_enclosed_occurrences {
            config.flags = ExtractFlags::NO_ENCLOSED_OCCURRENCES;
        }
        config
    }
}

impl Config {
    /// Load the first config file found, or defaults when there is none
    pub fn load() -> Result<Self> {
        match Self::find_config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn find_config_path() -> Option<PathBuf> {
        if let Some(xdg_config) = dirs::config_dir() {
            let xdg_path = xdg_config.join("byteminer/config.toml");
            if xdg_path.exists() {
                return Some(xdg_path);
            }
        }

        if let Some(home) = dirs::home_dir() {
            let home_path = home.join(".byteminer.toml");
            if home_path.exists() {
                return Some(home_path);
            }
        }

        let current_path = Path::new(".byteminer.toml");
        if current_path.exists() {
            return Some(current_path.to_path_buf());
        }

        None
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Environment directories, then configured ones, then the system directory
    pub fn miner_search_paths(&self) -> Vec<PathBuf> {
        let from_env = env::var_os(MINERS_PATH_ENV)
            .map(|value| env::split_paths(&value).collect::<Vec<_>>())
            .unwrap_or_default();
        search_paths(from_env, &self.plugins.search_paths)
    }
}

fn search_paths(from_env: Vec<PathBuf>, configured: &[PathBuf]) -> Vec<PathBuf> {
    let mut paths = from_env;
    paths.extend(configured.iter().cloned());
    paths.push(PathBuf::from(SYSTEM_MINERS_DIR));
    paths.retain(|p| !p.as_os_str().is_empty());
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.engine.batch_size, 1000);
        assert_eq!(config.engine.slice_size, 64 * 1024);
        assert_eq!(config.engine.max_span, 4 * 1024);
        assert!(config.plugins.miners.is_empty());
    }

    #[test]
    fn test_parse_partial_file() {
        let config: Config = toml::from_str(
            r#"
            [engine]
            threads = 2
            no_enclosed_occurrences = true

            [[plugins.miners]]
            library = "glob_miners"
            symbol = "match_glob"
            config = "c?t"

            [[plugins.miners]]
            library = "glob_miners"
            symbol = "match_literal"
            "#,
        )
        .unwrap();

        assert_eq!(config.engine.threads, Some(2));
        assert_eq!(config.engine.batch_size, 1000);
        assert_eq!(config.plugins.miners.len(), 2);
        assert_eq!(config.plugins.miners[1].config, "");

        let engine = config.engine.engine_config();
        assert_eq!(engine.threads, 2);
        assert!(engine.flags.contains(ExtractFlags::NO_ENCLOSED_OCCURRENCES));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        let mut config = Config::default();
        config.plugins.search_paths.push(PathBuf::from("/opt/miners"));
        config
            .plugins
            .miners
            .push(MinerSpec::new("glob_miners", "match_glob", "*@*"));

        config.save(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[engine]\nbatch_size = \"many\"\n").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{err:#}").contains("bad.toml"));
    }

    #[test]
    fn test_search_path_order() {
        let paths = search_paths(
            vec![PathBuf::from("/env/a"), PathBuf::new()],
            &[PathBuf::from("/conf")],
        );
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/env/a"),
                PathBuf::from("/conf"),
                PathBuf::from(SYSTEM_MINERS_DIR)
            ]
        );
    }
}
