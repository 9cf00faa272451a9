//! Configuration loading and management
//!
//! Handles parsing of `canopy.toml`: storage roots, worker counts, lock and
//! sync timeouts, the repository registry, id-pattern repo defaults,
//! lifecycle hooks, and workspace templates.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use directories::{BaseDirs, ProjectDirs};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hooks::Hook;
use crate::lock;

/// Config file name, looked up in the user config directory by default.
pub const CONFIG_FILE: &str = "canopy.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory holding workspace directories
    #[serde(default = "default_workspaces_root")]
    pub workspaces_root: PathBuf,

    /// Root directory holding canonical bare clones
    #[serde(default = "default_projects_root")]
    pub projects_root: PathBuf,

    /// Worker bound for parallel fan-out
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Naming template applied to workspace ids to produce directory names
    #[serde(default = "default_dir_template")]
    pub dir_template: String,

    /// Timeout configuration
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Metadata cache configuration
    #[serde(default)]
    pub cache: CacheConfig,

    /// Repository registry: alias -> clone URL
    #[serde(default)]
    pub registry: BTreeMap<String, String>,

    /// Default repo sets selected by workspace-id pattern
    #[serde(default)]
    pub pattern_repos: Vec<PatternRepos>,

    /// Lifecycle hooks
    #[serde(default)]
    pub hooks: HooksConfig,

    /// Workspace templates
    #[serde(default)]
    pub templates: BTreeMap<String, WorkspaceTemplate>,

    /// Where this config was loaded from; not serialized.
    #[serde(skip)]
    pub path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspaces_root: default_workspaces_root(),
            projects_root: default_projects_root(),
            workers: default_workers(),
            dir_template: default_dir_template(),
            timeouts: TimeoutsConfig::default(),
            cache: CacheConfig::default(),
            registry: BTreeMap::new(),
            pattern_repos: Vec::new(),
            hooks: HooksConfig::default(),
            templates: BTreeMap::new(),
            path: None,
        }
    }
}

fn default_workspaces_root() -> PathBuf {
    data_root().join("workspaces")
}

fn default_projects_root() -> PathBuf {
    data_root().join("projects")
}

fn data_root() -> PathBuf {
    ProjectDirs::from("", "", "canopy")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".canopy"))
}

fn default_workers() -> usize {
    4
}

fn default_dir_template() -> String {
    "{{ .ID }}".to_string()
}

/// Timeout configuration (seconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Lock acquisition timeout
    #[serde(default = "default_lock_secs")]
    pub lock_secs: u64,

    /// Age after which a lock file counts as stale; 0 disables reclamation
    #[serde(default = "default_lock_stale_secs")]
    pub lock_stale_secs: u64,

    /// Per-repo sync timeout
    #[serde(default = "default_sync_secs")]
    pub sync_secs: u64,

    /// Default per-hook timeout
    #[serde(default = "default_hook_secs")]
    pub hook_secs: u64,
}

fn default_lock_secs() -> u64 {
    30
}

fn default_lock_stale_secs() -> u64 {
    300
}

fn default_sync_secs() -> u64 {
    60
}

fn default_hook_secs() -> u64 {
    30
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            lock_secs: default_lock_secs(),
            lock_stale_secs: default_lock_stale_secs(),
            sync_secs: default_sync_secs(),
            hook_secs: default_hook_secs(),
        }
    }
}

/// Metadata cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entry time-to-live; 0 falls back to the default
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    30
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Default repo set keyed by a workspace-id regex
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRepos {
    pub pattern: String,
    pub repos: Vec<String>,
}

/// Hooks per lifecycle phase
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HooksConfig {
    #[serde(default)]
    pub post_create: Vec<Hook>,

    #[serde(default)]
    pub pre_close: Vec<Hook>,

    #[serde(default)]
    pub post_sync: Vec<Hook>,
}

/// A reusable workspace template
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceTemplate {
    /// Default branch when the caller supplies none; empty means no default
    #[serde(default)]
    pub branch: String,

    /// Repo tokens resolved at creation time
    #[serde(default)]
    pub repos: Vec<String>,

    /// Setup commands run sequentially in the workspace root after creation
    #[serde(default)]
    pub setup: Vec<String>,
}

impl Config {
    /// Load configuration from an explicit path, or from the user config
    /// directory. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) => p,
                None => return Ok(Config::default()),
            },
        };

        if !path.exists() {
            let mut config = Config::default();
            config.path = Some(path);
            return Ok(config);
        }

        let content = std::fs::read_to_string(&path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.workspaces_root = expand_tilde(&config.workspaces_root);
        config.projects_root = expand_tilde(&config.projects_root);
        config.validate()?;
        config.path = Some(path);
        Ok(config)
    }

    /// Persist the configuration back to the file it was loaded from.
    ///
    /// Used by `canonical add` to save newly registered aliases.
    pub fn save(&self) -> Result<()> {
        let path = self
            .path
            .clone()
            .or_else(default_config_path)
            .ok_or_else(|| Error::InvalidConfig("no config path available".to_string()))?;
        let text = toml::to_string_pretty(self)?;
        lock::write_atomic(&path, text.as_bytes())?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidConfig("workers must be at least 1".into()));
        }
        for entry in &self.pattern_repos {
            Regex::new(&entry.pattern).map_err(|e| {
                Error::InvalidConfig(format!("bad pattern {:?}: {e}", entry.pattern))
            })?;
        }
        for hook in self
            .hooks
            .post_create
            .iter()
            .chain(&self.hooks.pre_close)
            .chain(&self.hooks.post_sync)
        {
            hook.validate()?;
        }
        Ok(())
    }

    /// Compute the workspace directory name for an id via the naming template.
    pub fn compute_workspace_dir(&self, id: &str) -> Result<String> {
        let dir = crate::hooks::render_template(
            &self.dir_template,
            &minijinja::context! { ID => id },
        )?;
        let dir = dir.trim().to_string();
        if dir.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "dir_template {:?} produced an empty name for id {id:?}",
                self.dir_template
            )));
        }
        if dir.contains('/') || dir.contains('\\') {
            return Err(Error::InvalidConfig(format!(
                "dir_template {:?} produced a path separator for id {id:?}",
                self.dir_template
            )));
        }
        Ok(dir)
    }

    /// First pattern-repos entry whose regex matches the id, if any.
    pub fn default_repos_for(&self, id: &str) -> Option<&[String]> {
        for entry in &self.pattern_repos {
            if let Ok(re) = Regex::new(&entry.pattern) {
                if re.is_match(id) {
                    return Some(&entry.repos);
                }
            }
        }
        None
    }

    /// Look up a registry alias.
    pub fn registry_url(&self, alias: &str) -> Option<&str> {
        self.registry.get(alias).map(String::as_str)
    }

    /// Reverse registry lookup: URL -> alias.
    pub fn registry_alias_for_url(&self, url: &str) -> Option<&str> {
        self.registry
            .iter()
            .find(|(_, value)| value.as_str() == url)
            .map(|(alias, _)| alias.as_str())
    }

    pub fn template(&self, name: &str) -> Option<&WorkspaceTemplate> {
        self.templates.get(name)
    }

    /// Effective cache TTL; zero falls back to the default.
    pub fn cache_ttl(&self) -> std::time::Duration {
        let secs = if self.cache.ttl_secs == 0 {
            default_cache_ttl_secs()
        } else {
            self.cache.ttl_secs
        };
        std::time::Duration::from_secs(secs)
    }
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "canopy").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

fn expand_tilde(path: &Path) -> PathBuf {
    let Some(text) = path.to_str() else {
        return path.to_path_buf();
    };
    if let Some(rest) = text.strip_prefix("~/") {
        if let Some(base) = BaseDirs::new() {
            return base.home_dir().join(rest);
        }
    }
    path.to_path_buf()
}
