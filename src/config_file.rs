//! Updater configuration file.
//!
//! Every field is optional in the JSON file; missing fields take the
//! defaults below. Lookup order is `--config <path>`, then
//! `~/.config/cmi-updater/config.json` if it exists, then built-in defaults.
//! `CMI_UPDATER_REPO_URL` overrides the repository URL from any source.
//!
//! The file lives outside `~/.config/cmi` because the update pipeline
//! deletes and recreates that directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::{DEFAULT_REPO_URL, Layout};
use crate::command_runner::default_elevation;

/// Environment variable overriding `repo_url`
pub const REPO_URL_ENV: &str = "CMI_UPDATER_REPO_URL";

const APP_DIR: &str = "cmi-updater";
const CONFIG_FILE: &str = "config.json";
const LOCK_FILE: &str = "update.lock";

/// Runtime settings for the updater
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Git URL of the tool sources
    pub repo_url: String,
    /// Clone target, removed again at the end of a run
    pub checkout_dir: PathBuf,
    /// Tool configuration directory (version marker, build images)
    pub config_dir: PathBuf,
    /// Install directory for the executable
    pub bin_dir: PathBuf,
    /// Per-step wall-clock limit in seconds; `null` disables it
    pub step_timeout_secs: Option<u64>,
    pub progress_interval_ms: u64,
    pub lock_path: PathBuf,
    /// argv prefix for privileged steps; must read the password from stdin
    pub elevation: Vec<String>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self::for_home(&home_dir())
    }
}

impl UpdaterConfig {
    /// Defaults rooted at `home`
    pub fn for_home(home: &Path) -> Self {
        let layout = Layout::for_home(home);
        Self {
            repo_url: DEFAULT_REPO_URL.to_string(),
            checkout_dir: layout.checkout_dir,
            config_dir: layout.config_dir,
            bin_dir: layout.bin_dir,
            step_timeout_secs: Some(3600),
            progress_interval_ms: 50,
            lock_path: app_dir(home).join(LOCK_FILE),
            elevation: default_elevation(),
        }
    }

    /// `~/.config/cmi-updater/config.json`
    pub fn default_path() -> PathBuf {
        app_dir(&home_dir()).join(CONFIG_FILE)
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read configuration from {:?}", path.as_ref()))?;

        let config: Self =
            serde_json::from_str(&content).context("Failed to parse configuration JSON")?;

        Ok(config)
    }

    /// Resolve the effective configuration.
    ///
    /// An explicit path must exist. The default path is optional.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load_from_file(path)?,
            None => {
                let path = Self::default_path();
                if path.is_file() {
                    tracing::debug!(path = %path.display(), "loading default configuration file");
                    Self::load_from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(REPO_URL_ENV).filter(|v| !v.trim().is_empty()) {
            tracing::info!(repo_url = %url, "repository URL overridden from environment");
            self.repo_url = url;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_against(&home_dir())
    }

    fn validate_against(&self, home: &Path) -> Result<()> {
        if self.repo_url.trim().is_empty() {
            anyhow::bail!("Repository URL must be specified");
        }

        for (name, path) in [
            ("checkout_dir", &self.checkout_dir),
            ("config_dir", &self.config_dir),
            ("bin_dir", &self.bin_dir),
            ("lock_path", &self.lock_path),
        ] {
            if path.as_os_str().is_empty() {
                anyhow::bail!("{} must not be empty", name);
            }
            if !path.is_absolute() {
                anyhow::bail!("{} must be an absolute path, got {:?}", name, path);
            }
        }

        // Both directories are removed with `rm -rf` during an update
        for (name, path) in [
            ("checkout_dir", &self.checkout_dir),
            ("config_dir", &self.config_dir),
        ] {
            if path.parent().is_none() {
                anyhow::bail!("{} must not be the filesystem root", name);
            }
            if home.starts_with(path) {
                anyhow::bail!("{} must not be the home directory or one of its parents", name);
            }
        }

        if self.lock_path.starts_with(&self.config_dir) {
            anyhow::bail!(
                "lock_path must live outside config_dir, which the update deletes and recreates"
            );
        }

        if self.progress_interval_ms == 0 {
            anyhow::bail!("progress_interval_ms must be greater than zero");
        }
        if self.step_timeout_secs == Some(0) {
            anyhow::bail!("step_timeout_secs must be greater than zero (use null to disable)");
        }

        Ok(())
    }

    /// Paths and URL consumed by the pipeline catalog
    pub fn to_layout(&self) -> Layout {
        Layout {
            repo_url: self.repo_url.clone(),
            checkout_dir: self.checkout_dir.clone(),
            config_dir: self.config_dir.clone(),
            bin_dir: self.bin_dir.clone(),
        }
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_secs.map(Duration::from_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"))
}

fn app_dir(home: &Path) -> PathBuf {
    home.join(".config").join(APP_DIR)
}
