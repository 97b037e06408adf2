//! Installed module packages.
//!
//! Each package is a directory under the mods directory holding a
//! `module.toml` manifest:
//!
//! ```toml
//! name = "chat-filter"   # defaults to the directory name
//! reloadable = true
//! compat = "normal"      # normal | legacy | compat
//! enabled = true
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{ProxyError, Result};

/// Manifest file name inside a package directory
pub const MANIFEST_FILE: &str = "module.toml";

/// Catalog shared by every connection
pub type SharedCatalog = Arc<RwLock<ModCatalog>>;

/// How a package expects to be loaded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompatTier {
    #[default]
    Normal,
    Legacy,
    #[serde(rename = "compat")]
    CompatShim,
}

impl fmt::Display for CompatTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompatTier::Normal => "normal",
            CompatTier::Legacy => "legacy",
            CompatTier::CompatShim => "compat",
        })
    }
}

/// An installed package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    pub path: PathBuf,
    pub compat: CompatTier,
    pub reloadable: bool,
    pub enabled: bool,
}

impl Package {
    /// Package with default flags and no source directory
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: PathBuf::new(),
            compat: CompatTier::Normal,
            reloadable: true,
            enabled: true,
        }
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn compat(mut self, compat: CompatTier) -> Self {
        self.compat = compat;
        self
    }

    pub fn reloadable(mut self, reloadable: bool) -> Self {
        self.reloadable = reloadable;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    name: Option<String>,
    #[serde(default = "default_true")]
    reloadable: bool,
    #[serde(default)]
    compat: CompatTier,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

fn read_manifest(dir: &Path) -> Result<Package> {
    let content = std::fs::read_to_string(dir.join(MANIFEST_FILE))?;
    let manifest: Manifest = toml::from_str(&content)
        .map_err(|e| ProxyError::ConfigError(format!("{}: {e}", dir.display())))?;
    let name = match manifest.name {
        Some(name) => name,
        None => dir
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                ProxyError::ConfigError(format!("{}: cannot derive module name", dir.display()))
            })?,
    };
    Ok(Package {
        name,
        path: dir.to_path_buf(),
        compat: manifest.compat,
        reloadable: manifest.reloadable,
        enabled: manifest.enabled,
    })
}

/// Installed packages and the modules known to be broken
#[derive(Debug, Default)]
pub struct ModCatalog {
    packages: BTreeMap<String, Package>,
    broken: HashSet<String>,
}

impl ModCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedCatalog {
        Arc::new(RwLock::new(self))
    }

    /// Read every `<dir>/<package>/module.toml`. Unreadable manifests are
    /// skipped with a warning.
    pub fn scan<P: AsRef<Path>>(&mut self, dir: P) -> Result<usize> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            debug!(dir = %dir.display(), "Mods directory missing");
            return Ok(0);
        }

        let mut found = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.join(MANIFEST_FILE).is_file() {
                continue;
            }
            match read_manifest(&path) {
                Ok(package) => {
                    debug!(module = %package.name, compat = %package.compat, "Found module");
                    self.packages.insert(package.name.clone(), package);
                    found += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping module"),
            }
        }
        info!(dir = %dir.display(), modules = found, "Module catalog scanned");
        Ok(found)
    }

    pub fn insert(&mut self, package: Package) {
        self.packages.insert(package.name.clone(), package);
    }

    /// Known, enabled and not broken
    pub fn can_load(&self, name: &str) -> bool {
        self.packages.get(name).is_some_and(|p| p.enabled) && !self.broken.contains(name)
    }

    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    /// Source location of a package
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        self.packages.get(name).map(|p| p.path.clone())
    }

    pub fn mark_broken(&mut self, name: &str) {
        self.broken.insert(name.to_string());
    }

    pub fn is_broken(&self, name: &str) -> bool {
        self.broken.contains(name)
    }

    /// Package names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.packages.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Re-read the manifests of packages under `prefix` so the next load
    /// sees their current state. Returns the number refreshed.
    pub fn evict(&mut self, prefix: &Path) -> usize {
        if prefix.as_os_str().is_empty() {
            return 0;
        }
        let mut refreshed = 0;
        for package in self.packages.values_mut() {
            if !package.path.starts_with(prefix) || !package.path.join(MANIFEST_FILE).is_file() {
                continue;
            }
            match read_manifest(&package.path) {
                Ok(fresh) if fresh.name == package.name => {
                    *package = fresh;
                    refreshed += 1;
                }
                Ok(fresh) => warn!(
                    module = %package.name,
                    renamed = %fresh.name,
                    "Manifest renamed module; keeping old entry"
                ),
                Err(e) => warn!(module = %package.name, error = %e, "Failed to re-read manifest"),
            }
        }
        refreshed
    }
}
