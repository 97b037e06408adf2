//! # Modules
//!
//! Extension modules ("mods") observe and rewrite traffic by registering
//! hooks from their constructor.
//!
//! ## Components
//! - **Catalog**: the installed packages, read from `module.toml` manifests
//! - **Manager**: per-connection load, unload, hot reload and teardown
//!
//! The engine never looks inside a module; it only holds a [`ModuleRef`]
//! and calls [`GameModule::destroy`] on teardown.

use std::any::Any;
use std::sync::Arc;

use crate::error::Result;

pub mod catalog;
pub mod manager;

pub use catalog::{CompatTier, ModCatalog, Package, SharedCatalog};
pub use manager::{
    FactoryLoader, LoadSummary, ModContext, ModLifecycleManager, ModuleFactory, ModuleLoader,
};

/// Which teardown a module is asked to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownPass {
    /// Per-connection state
    Instance,
    /// Module-global state
    Global,
}

/// A loaded module instance
pub trait GameModule: Any + Send + Sync {
    /// Release resources for one teardown pass
    fn destroy(&self, pass: TeardownPass) -> Result<()> {
        let _ = pass;
        Ok(())
    }
}

/// Shared handle to a loaded module, also handed to dependents
pub type ModuleRef = Arc<dyn GameModule>;

/// Borrow a module as its concrete type, e.g. a hot-swap seed
pub fn downcast_ref<T: GameModule>(module: &ModuleRef) -> Option<&T> {
    let any: &dyn Any = module.as_ref();
    any.downcast_ref::<T>()
}
