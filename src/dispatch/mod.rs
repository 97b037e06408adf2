//! # Dispatch
//!
//! Hook registration and the per-packet pipeline.
//!
//! ## Components
//! - **Hook**: hook types, filters, callback results and options
//! - **Registry**: ordered storage and the wildcard/opcode merge
//! - **Pipeline**: [`Dispatch`], which runs each packet through its hooks
//!
//! ## Execution order
//! Hooks run ascending by `order`. On equal order, wildcard hooks run
//! before opcode hooks, and hooks of the same kind run in registration
//! order.

pub mod hook;
pub mod pipeline;
pub mod registry;

pub use hook::{
    DefinitionVersion, Hook, HookAction, HookCallback, HookError, HookFilter, HookHandle,
    HookOptions, HookResult, RawPacket, Selector, WILDCARD,
};
pub use pipeline::{Dispatch, DispatchSettings, Hooks, Outbound, PipelineContext};
pub use registry::HookRegistry;
