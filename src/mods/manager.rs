//! Per-connection module lifecycle.
//!
//! Loading is fail-closed: a module whose constructor errors or panics is
//! logged, stripped of any hooks it managed to register and marked broken
//! in the catalog. Nothing it does escapes to the caller.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::dispatch::pipeline::{Dispatch, Hooks, WeakDispatch};
use crate::error::{constants, ProxyError, Result};
use crate::mods::catalog::{CompatTier, Package, SharedCatalog};
use crate::mods::{ModuleRef, TeardownPass};
use crate::protocol::codec::ProtocolInfo;
use crate::utils::metrics::{global_metrics, Timer};
use crate::utils::stack;

/// Everything a module constructor gets to work with
pub struct ModContext {
    package: Package,
    hooks: Hooks,
}

impl ModContext {
    fn new(package: Package, dispatch: Dispatch) -> Self {
        let hooks = Hooks::new(&package.name, dispatch);
        Self { package, hooks }
    }

    pub fn name(&self) -> &str {
        &self.package.name
    }

    pub fn package(&self) -> &Package {
        &self.package
    }

    pub fn compat(&self) -> CompatTier {
        self.package.compat
    }

    /// Hook registration bound to this module's name
    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn dispatch(&self) -> &Dispatch {
        self.hooks.dispatch()
    }

    /// Load another module (or get it if already loaded)
    pub fn require(&self, name: &str) -> Result<ModuleRef> {
        self.dispatch()
            .mods()
            .load(name, None)
            .ok_or_else(|| ProxyError::ModuleLoad {
                name: name.to_string(),
                reason: format!("required by {}", self.name()),
            })
    }

    /// Run `listener` once a protocol version is known
    pub fn on_initialized<F>(&self, listener: F)
    where
        F: Fn(&ProtocolInfo) + Send + Sync + 'static,
    {
        self.hooks.on_initialized(listener);
    }
}

impl fmt::Debug for ModContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModContext")
            .field("package", &self.package)
            .finish()
    }
}

/// Turns catalog packages into module instances
pub trait ModuleLoader: Send + Sync {
    /// Construct a module. `seed` is the previous instance during a reload.
    fn instantiate(
        &self,
        package: &Package,
        ctx: &mut ModContext,
        seed: Option<ModuleRef>,
    ) -> Result<ModuleRef>;

    /// Drop cached source artifacts under `prefix` so the next instantiate
    /// starts fresh. Returns the number dropped.
    fn evict(&self, prefix: &Path) -> usize;
}

/// Module constructor
pub type ModuleFactory =
    Arc<dyn Fn(&mut ModContext, Option<ModuleRef>) -> Result<ModuleRef> + Send + Sync>;

/// Loader for modules compiled into the binary, keyed by package name
#[derive(Default)]
pub struct FactoryLoader {
    factories: RwLock<HashMap<String, ModuleFactory>>,
}

impl FactoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor, replacing any previous one for `name`
    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn(&mut ModContext, Option<ModuleRef>) -> Result<ModuleRef> + Send + Sync + 'static,
    {
        if let Ok(mut factories) = self.factories.write() {
            factories.insert(name.to_string(), Arc::new(factory));
        }
    }

    pub fn with<F>(self, name: &str, factory: F) -> Self
    where
        F: Fn(&mut ModContext, Option<ModuleRef>) -> Result<ModuleRef> + Send + Sync + 'static,
    {
        self.register(name, factory);
        self
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .read()
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl ModuleLoader for FactoryLoader {
    fn instantiate(
        &self,
        package: &Package,
        ctx: &mut ModContext,
        seed: Option<ModuleRef>,
    ) -> Result<ModuleRef> {
        let factory = self
            .factories
            .read()
            .map_err(|_| ProxyError::Internal(constants::ERR_MODS_LOCK.into()))?
            .get(&package.name)
            .cloned()
            .ok_or_else(|| ProxyError::ModuleLoad {
                name: package.name.clone(),
                reason: "no factory registered".into(),
            })?;
        factory(ctx, seed)
    }

    fn evict(&self, prefix: &Path) -> usize {
        // Compiled-in code has nothing to drop
        debug!(prefix = %prefix.display(), "Nothing to evict for compiled-in modules");
        0
    }
}

/// Outcome of [`ModLifecycleManager::load_all`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSummary {
    pub loaded: usize,
    pub failed: usize,
    pub elapsed: Duration,
}

#[derive(Default)]
struct ModState {
    /// Load order is kept for teardown
    loaded: Vec<(String, ModuleRef)>,
    loading: HashSet<String>,
}

impl ModState {
    fn get(&self, name: &str) -> Option<&ModuleRef> {
        self.loaded.iter().find(|(n, _)| n == name).map(|(_, m)| m)
    }

    fn remove(&mut self, name: &str) -> Option<ModuleRef> {
        let idx = self.loaded.iter().position(|(n, _)| n == name)?;
        Some(self.loaded.remove(idx).1)
    }
}

/// Loads, unloads and hot-reloads modules for one connection
pub struct ModLifecycleManager {
    catalog: SharedCatalog,
    loader: Arc<dyn ModuleLoader>,
    dispatch: WeakDispatch,
    state: Mutex<ModState>,
}

impl ModLifecycleManager {
    pub(crate) fn new(
        catalog: SharedCatalog,
        loader: Arc<dyn ModuleLoader>,
        dispatch: WeakDispatch,
    ) -> Self {
        Self {
            catalog,
            loader,
            dispatch,
            state: Mutex::new(ModState::default()),
        }
    }

    fn state(&self) -> Option<MutexGuard<'_, ModState>> {
        match self.state.lock() {
            Ok(state) => Some(state),
            Err(_) => {
                error!("{}", constants::ERR_MODS_LOCK);
                None
            }
        }
    }

    pub fn catalog(&self) -> &SharedCatalog {
        &self.catalog
    }

    /// Load a module, or return the cached instance if already loaded.
    ///
    /// Returns `None` if the module cannot be loaded or its constructor
    /// failed; the failure is logged and the module marked broken.
    pub fn load(&self, name: &str, seed: Option<ModuleRef>) -> Option<ModuleRef> {
        {
            let state = self.state()?;
            if let Some(instance) = state.get(name) {
                return Some(instance.clone());
            }
            if state.loading.contains(name) {
                warn!(module = name, "Module is already loading (dependency cycle?)");
                return None;
            }
        }

        let package = {
            let catalog = self.catalog.read().ok()?;
            if !catalog.can_load(name) {
                debug!(module = name, broken = catalog.is_broken(name), "Module not loadable");
                return None;
            }
            catalog.package(name)?.clone()
        };
        let dispatch = self.dispatch.upgrade()?;

        match package.compat {
            CompatTier::Normal => info!(module = name, "Loading module"),
            tier => info!(module = name, compat = %tier, "Loading module"),
        }

        self.state()?.loading.insert(name.to_string());
        let mut ctx = ModContext::new(package.clone(), dispatch.clone());
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.loader.instantiate(&package, &mut ctx, seed)
        }));
        if let Some(mut state) = self.state() {
            state.loading.remove(name);
        }

        let failure = match result {
            Ok(Ok(instance)) => {
                self.state()?
                    .loaded
                    .push((name.to_string(), instance.clone()));
                global_metrics().mod_loaded();
                return Some(instance);
            }
            Ok(Err(e)) => e.to_string(),
            Err(payload) => format!("panicked: {}", stack::panic_message(payload.as_ref())),
        };

        let err = ProxyError::ModuleLoad {
            name: name.to_string(),
            reason: failure,
        };
        error!(module = name, error = %err, "Module failed to load");
        global_metrics().mod_failed();
        dispatch.unhook_all(name);
        if let Ok(mut catalog) = self.catalog.write() {
            catalog.mark_broken(name);
        }
        None
    }

    /// Unload a module.
    ///
    /// `None` runs both teardown passes and forgets the module.
    /// `Some(Instance)` runs only the instance pass and keeps the entry.
    /// `Some(Global)` runs only the global pass and forgets the module.
    /// Returns `false` if the module was not loaded.
    pub fn unload(&self, name: &str, pass: Option<TeardownPass>) -> bool {
        let Some(instance) = self.state().and_then(|s| s.get(name).cloned()) else {
            return false;
        };

        if let Some(dispatch) = self.dispatch.upgrade() {
            dispatch.unhook_all(name);
        }

        let passes: &[TeardownPass] = match pass {
            None => &[TeardownPass::Instance, TeardownPass::Global],
            Some(TeardownPass::Instance) => &[TeardownPass::Instance],
            Some(TeardownPass::Global) => &[TeardownPass::Global],
        };
        for &pass in passes {
            match catch_unwind(AssertUnwindSafe(|| instance.destroy(pass))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(module = name, ?pass, error = %e, "Module teardown failed"),
                Err(payload) => error!(
                    module = name,
                    ?pass,
                    error = %stack::panic_message(payload.as_ref()),
                    "Module teardown panicked"
                ),
            }
        }

        if pass != Some(TeardownPass::Instance) {
            if let Some(mut state) = self.state() {
                state.remove(name);
            }
            debug!(module = name, "Module unloaded");
        }
        true
    }

    /// Replace a module's instance, handing the old one to the new
    /// constructor.
    ///
    /// Returns `Ok(false)` for non-reloadable packages. If the new instance
    /// fails to load the module stays unloaded.
    pub fn reload(&self, name: &str) -> Result<bool> {
        let seed = self
            .instance(name)
            .ok_or_else(|| ProxyError::NotLoaded(name.to_string()))?;

        let package = self
            .catalog
            .read()
            .map_err(|_| ProxyError::Internal(constants::ERR_CATALOG_LOCK.into()))?
            .package(name)
            .cloned()
            .ok_or_else(|| ProxyError::ReloadFailed(name.to_string()))?;
        if !package.reloadable {
            debug!(module = name, "Module is not reloadable");
            return Ok(false);
        }

        self.unload(name, Some(TeardownPass::Instance));
        if let Some(mut state) = self.state() {
            state.remove(name);
        }

        let evicted = self.loader.evict(&package.path);
        if let Ok(mut catalog) = self.catalog.write() {
            catalog.evict(&package.path);
        }
        debug!(module = name, evicted, "Evicted module sources");

        match self.load(name, Some(seed)) {
            Some(_) => {
                info!(module = name, "Module reloaded");
                Ok(true)
            }
            None => Err(ProxyError::ReloadFailed(name.to_string())),
        }
    }

    /// Load every enabled catalog entry, tolerating failures
    pub fn load_all(&self) -> LoadSummary {
        let timer = Timer::start("load_all_mods");
        let names: Vec<String> = match self.catalog.read() {
            Ok(catalog) => catalog
                .names()
                .into_iter()
                .filter(|n| catalog.package(n).is_some_and(|p| p.enabled))
                .collect(),
            Err(_) => {
                error!("{}", constants::ERR_CATALOG_LOCK);
                Vec::new()
            }
        };

        let mut loaded = 0;
        let mut failed = 0;
        for name in &names {
            if self.load(name, None).is_some() {
                loaded += 1;
            } else {
                failed += 1;
            }
        }

        let summary = LoadSummary {
            loaded,
            failed,
            elapsed: Duration::from_millis(timer.elapsed_ms() as u64),
        };
        if failed > 0 {
            warn!(loaded, failed, elapsed_ms = timer.elapsed_ms(), "Loaded modules");
        } else {
            info!(loaded, elapsed_ms = timer.elapsed_ms(), "Loaded modules");
        }
        summary
    }

    /// Instance teardown for every module, then global teardown for every
    /// module
    pub fn reset(&self) {
        let names = self.loaded_names();
        for name in &names {
            self.unload(name, Some(TeardownPass::Instance));
        }
        for name in &names {
            self.unload(name, Some(TeardownPass::Global));
        }
    }

    /// Loaded module names in load order
    pub fn loaded_names(&self) -> Vec<String> {
        self.state()
            .map(|s| s.loaded.iter().map(|(n, _)| n.clone()).collect())
            .unwrap_or_default()
    }

    pub fn instance(&self, name: &str) -> Option<ModuleRef> {
        self.state()?.get(name).cloned()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.instance(name).is_some()
    }
}

impl fmt::Debug for ModLifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModLifecycleManager")
            .field("loaded", &self.loaded_names())
            .finish()
    }
}
