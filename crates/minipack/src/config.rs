//! Configuration for a bundle run.
//!
//! Settings are layered, lowest precedence first: built-in defaults, the user
//! config file (`<config dir>/minipack/minipack.toml`), the project config
//! (`minipack.toml` in the working directory, or an explicit `--config` file),
//! and finally command-line flags.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use etcetera::BaseStrategy;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    code_generator::{CodegenOptions, ModuleCache},
    graph_builder::{BuildOptions, DEFAULT_MAX_UNITS, DedupePolicy},
};

/// File name looked up in the working directory and the user config dir
pub const CONFIG_FILE_NAME: &str = "minipack.toml";

/// Fully resolved settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    pub entry: Option<PathBuf>,
    pub output: Option<PathBuf>,
    /// Reuse one unit per path instead of one per import edge
    pub dedupe: bool,
    /// Cache module instances in the emitted runtime
    pub memoize: bool,
    /// Unit budget per build; 0 disables the cap
    pub max_units: usize,
    /// Loader threads; `None` lets rayon decide
    pub jobs: Option<usize>,
    pub banner: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            entry: None,
            output: None,
            dedupe: false,
            memoize: false,
            max_units: DEFAULT_MAX_UNITS,
            jobs: None,
            banner: None,
        }
    }
}

/// One configuration layer; unset fields leave lower layers untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ConfigLayer {
    pub entry: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub dedupe: Option<bool>,
    pub memoize: Option<bool>,
    pub max_units: Option<usize>,
    pub jobs: Option<usize>,
    pub banner: Option<String>,
}

impl ConfigLayer {
    /// Parse a TOML layer; relative paths are taken relative to `base_dir`
    pub fn from_toml(text: &str, base_dir: &Path) -> Result<Self> {
        let mut layer: Self = toml::from_str(text)?;
        layer.entry = layer.entry.map(|p| base_dir.join(p));
        layer.output = layer.output.map(|p| base_dir.join(p));
        Ok(layer)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new(""));
        Self::from_toml(&text, base_dir)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }
}

impl Config {
    /// Load the user and project layers
    ///
    /// An explicit config file must exist; the implicit ones are skipped when
    /// missing.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let project = match explicit {
            Some(path) => {
                if !path.is_file() {
                    return Err(anyhow!("Config file {} does not exist", path.display()));
                }
                Some(path.to_path_buf())
            }
            None => Some(PathBuf::from(CONFIG_FILE_NAME)).filter(|p| p.is_file()),
        };
        Self::load_layers(user_config_file().as_deref(), project.as_deref())
    }

    /// Apply the given files on top of the defaults, user file first
    pub fn load_layers(user: Option<&Path>, project: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        for path in [user, project].into_iter().flatten() {
            if path.is_file() {
                debug!("Applying config layer {}", path.display());
                config.apply(ConfigLayer::from_file(path)?);
            }
        }
        Ok(config)
    }

    /// Overwrite every setting the layer defines
    pub fn apply(&mut self, layer: ConfigLayer) {
        if layer.entry.is_some() {
            self.entry = layer.entry;
        }
        if layer.output.is_some() {
            self.output = layer.output;
        }
        if let Some(dedupe) = layer.dedupe {
            self.dedupe = dedupe;
        }
        if let Some(memoize) = layer.memoize {
            self.memoize = memoize;
        }
        if let Some(max_units) = layer.max_units {
            self.max_units = max_units;
        }
        if layer.jobs.is_some() {
            self.jobs = layer.jobs;
        }
        if layer.banner.is_some() {
            self.banner = layer.banner;
        }
    }

    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            dedupe: if self.dedupe {
                DedupePolicy::ByPath
            } else {
                DedupePolicy::Off
            },
            max_units: (self.max_units > 0).then_some(self.max_units),
            jobs: self.jobs.filter(|&jobs| jobs > 0),
        }
    }

    pub fn codegen_options(&self) -> CodegenOptions {
        CodegenOptions {
            module_cache: if self.memoize {
                ModuleCache::Singleton
            } else {
                ModuleCache::Off
            },
            banner: self.banner.clone(),
        }
    }
}

/// `<config dir>/minipack/minipack.toml` for the current user, if a home
/// directory can be determined
pub fn user_config_file() -> Option<PathBuf> {
    let strategy = etcetera::choose_base_strategy().ok()?;
    Some(strategy.config_dir().join("minipack").join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.build_options(), BuildOptions::default());
        assert_eq!(config.codegen_options(), CodegenOptions::default());
    }

    #[test]
    fn test_layers_apply_in_order() {
        let dir = TempDir::new().unwrap();
        let user = dir.path().join("user.toml");
        let project = dir.path().join("project/minipack.toml");
        fs::create_dir_all(project.parent().unwrap()).unwrap();
        fs::write(&user, "dedupe = true\nmax-units = 50\nbanner = \"user\"\n").unwrap();
        fs::write(&project, "entry = \"src/index.js\"\nmax-units = 0\n").unwrap();

        let config = Config::load_layers(Some(&user), Some(&project)).unwrap();

        assert_eq!(config.entry, Some(dir.path().join("project/src/index.js")));
        assert!(config.dedupe);
        assert_eq!(config.max_units, 0);
        assert_eq!(config.banner.as_deref(), Some("user"));
        assert_eq!(config.build_options().max_units, None);
        assert_eq!(config.build_options().dedupe, DedupePolicy::ByPath);
    }

    #[test]
    fn test_missing_layers_are_skipped() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_layers(Some(&dir.path().join("absent.toml")), None).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let err = ConfigLayer::from_toml("minify = true\n", Path::new("")).unwrap_err();
        assert!(err.to_string().contains("minify"));
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_cli_layer_overrides_files() {
        let mut config = Config {
            memoize: false,
            jobs: Some(8),
            ..Config::default()
        };
        config.apply(ConfigLayer {
            memoize: Some(true),
            jobs: Some(0),
            ..ConfigLayer::default()
        });
        assert_eq!(config.codegen_options().module_cache, ModuleCache::Singleton);
        assert_eq!(config.build_options().jobs, None);
    }
}
