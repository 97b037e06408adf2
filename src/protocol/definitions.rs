//! Process-wide catalog of packet definitions.
//!
//! Definitions are keyed by packet name and version. The catalog also
//! answers "what is the newest version of this packet", which drives the
//! obsolete-definition checks at hook and write time.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use crate::error::{ProxyError, Result};
use crate::protocol::schema::Schema;

/// Definitions shared by every connection in the process
pub type SharedDefinitions = Arc<RwLock<DefinitionCatalog>>;

/// Packet name -> version -> schema
#[derive(Debug, Default)]
pub struct DefinitionCatalog {
    defs: HashMap<String, BTreeMap<u32, Arc<Schema>>>,
}

impl DefinitionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap in the shared handle used by dispatchers
    pub fn shared(self) -> SharedDefinitions {
        Arc::new(RwLock::new(self))
    }

    /// Register a definition. Returns `Ok(false)` if `(name, version)` already exists.
    pub fn add_definition(&mut self, name: &str, version: u32, source: &str) -> Result<bool> {
        if self.has(name, version) {
            return Ok(false);
        }
        let schema = Schema::parse(source)
            .map_err(|e| ProxyError::Schema(format!("{name}.{version}: {e}")))?;
        self.insert(name, version, schema);
        Ok(true)
    }

    /// Register an already parsed schema, replacing any previous one
    pub fn insert(&mut self, name: &str, version: u32, schema: Schema) {
        self.defs
            .entry(name.to_string())
            .or_default()
            .insert(version, Arc::new(schema));
    }

    pub fn has(&self, name: &str, version: u32) -> bool {
        self.defs
            .get(name)
            .is_some_and(|versions| versions.contains_key(&version))
    }

    /// Newest known version of `name`
    pub fn latest(&self, name: &str) -> Option<u32> {
        self.defs
            .get(name)
            .and_then(|versions| versions.keys().next_back().copied())
    }

    pub fn get(&self, name: &str, version: u32) -> Option<Arc<Schema>> {
        self.defs.get(name)?.get(&version).cloned()
    }

    /// Number of `(name, version)` pairs
    pub fn len(&self) -> usize {
        self.defs.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load every `<NAME>.<version>.def` file in `dir`.
    ///
    /// Unparseable files are skipped with a warning so one bad definition
    /// does not take the whole protocol down. Returns the number loaded.
    pub fn load_dir<P: AsRef<Path>>(&mut self, dir: P) -> Result<usize> {
        let dir = dir.as_ref();
        let mut loaded = 0;

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("def") {
                continue;
            }

            let Some((name, version)) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|stem| stem.rsplit_once('.'))
                .and_then(|(name, v)| v.parse::<u32>().ok().map(|v| (name.to_string(), v)))
            else {
                warn!(path = %path.display(), "Skipping definition with malformed file name");
                continue;
            };

            let source = std::fs::read_to_string(&path)?;
            match self.add_definition(&name, version, &source) {
                Ok(true) => loaded += 1,
                Ok(false) => debug!(name, version, "Duplicate definition ignored"),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping invalid definition"),
            }
        }

        info!(dir = %dir.display(), loaded, "Loaded packet definitions");
        Ok(loaded)
    }
}
