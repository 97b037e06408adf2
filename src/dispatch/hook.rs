//! Hook types.
//!
//! A hook is a callback bound to one opcode (or every opcode) with an order,
//! a definition version and an optional filter on the packet flags. Its
//! identity is the `Arc` returned at registration.

use std::backtrace::Backtrace;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::packet::PacketFlags;
use crate::error::ProxyError;
use crate::protocol::codec::{CustomDefinition, Event};

/// Name used to register a hook on every opcode
pub const WILDCARD: &str = "*";

/// What a hook is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    Opcode(u16),
    /// Every opcode; always raw
    Wildcard,
}

/// Which definition a hook wants its packets decoded with
#[derive(Clone)]
pub enum DefinitionVersion {
    /// A specific definition version
    Numeric(u32),
    /// Newest known definition at dispatch time
    Any,
    /// Undecoded bytes
    Raw,
    /// Caller-supplied layout
    Custom(Arc<dyn CustomDefinition>),
}

impl DefinitionVersion {
    pub fn is_raw(&self) -> bool {
        matches!(self, DefinitionVersion::Raw)
    }
}

impl From<u32> for DefinitionVersion {
    fn from(version: u32) -> Self {
        DefinitionVersion::Numeric(version)
    }
}

impl fmt::Debug for DefinitionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for DefinitionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefinitionVersion::Numeric(v) => write!(f, "{v}"),
            DefinitionVersion::Any => f.write_str("*"),
            DefinitionVersion::Raw => f.write_str("raw"),
            DefinitionVersion::Custom(_) => f.write_str("custom"),
        }
    }
}

/// Tri-state predicates over the packet flags; `None` ignores the flag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookFilter {
    pub synthetic: Option<bool>,
    pub incoming: Option<bool>,
    pub modified: Option<bool>,
    pub silenced: Option<bool>,
}

impl HookFilter {
    pub fn synthetic(mut self, value: bool) -> Self {
        self.synthetic = Some(value);
        self
    }

    pub fn incoming(mut self, value: bool) -> Self {
        self.incoming = Some(value);
        self
    }

    pub fn modified(mut self, value: bool) -> Self {
        self.modified = Some(value);
        self
    }

    pub fn silenced(mut self, value: bool) -> Self {
        self.silenced = Some(value);
        self
    }

    /// Whether a hook with this filter should run for the current flags
    pub fn matches(&self, flags: &PacketFlags) -> bool {
        fn ok(want: Option<bool>, have: bool) -> bool {
            want.is_none_or(|w| w == have)
        }
        ok(self.synthetic, flags.synthetic)
            && ok(self.incoming, flags.incoming)
            && ok(self.modified, flags.modified)
            && ok(self.silenced, flags.silenced)
    }
}

/// What a hook decided about the packet
#[derive(Debug, Clone, PartialEq)]
pub enum HookAction {
    /// Leave the packet and flags alone
    NoOpinion,
    /// Drop the packet unless a later hook mutates it
    Silence,
    /// Replace the packet with this event, re-encoded (decoded hooks only)
    Mutate(Event),
    /// Replace the packet bytes
    ReplaceRaw(Vec<u8>),
}

/// Error raised by a hook callback.
///
/// Captures a backtrace where the module created it so the pipeline can
/// log the module's own frames.
#[derive(Debug)]
pub struct HookError {
    message: String,
    backtrace: Backtrace,
}

impl HookError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HookError {}

impl From<ProxyError> for HookError {
    fn from(e: ProxyError) -> Self {
        Self::new(e.to_string())
    }
}

impl From<String> for HookError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HookError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

pub type HookResult = std::result::Result<HookAction, HookError>;

/// Undecoded packet handed to raw hooks
#[derive(Debug, Clone, Copy)]
pub struct RawPacket<'a> {
    pub opcode: u16,
    pub data: &'a [u8],
    pub flags: PacketFlags,
}

type RawFn = dyn FnMut(&RawPacket<'_>) -> HookResult + Send;
type EventFn = dyn FnMut(&Event) -> HookResult + Send;

/// Hook callback, raw or decoded
pub enum HookCallback {
    Raw(Box<RawFn>),
    Event(Box<EventFn>),
}

impl HookCallback {
    pub fn raw<F>(f: F) -> Self
    where
        F: FnMut(&RawPacket<'_>) -> HookResult + Send + 'static,
    {
        HookCallback::Raw(Box::new(f))
    }

    pub fn event<F>(f: F) -> Self
    where
        F: FnMut(&Event) -> HookResult + Send + 'static,
    {
        HookCallback::Event(Box::new(f))
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, HookCallback::Raw(_))
    }
}

impl fmt::Debug for HookCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_raw() { "Raw(..)" } else { "Event(..)" })
    }
}

pub(crate) struct HookTimeout {
    pub(crate) duration: Duration,
    pub(crate) on_expire: Box<dyn FnOnce() + Send>,
}

/// Registration options
#[derive(Default)]
pub struct HookOptions {
    pub(crate) order: i32,
    pub(crate) filter: HookFilter,
    pub(crate) label: Option<String>,
    pub(crate) timeout: Option<HookTimeout>,
}

impl HookOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lower runs first; default 0
    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn filter(mut self, filter: HookFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Name shown in logs for this hook
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Remove the hook after `duration` and call `on_expire`, unless it was
    /// unhooked first
    pub fn timeout<F>(mut self, duration: Duration, on_expire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.timeout = Some(HookTimeout {
            duration,
            on_expire: Box::new(on_expire),
        });
        self
    }
}

/// A registered hook
pub struct Hook {
    owner: Arc<str>,
    selector: Selector,
    order: i32,
    version: DefinitionVersion,
    filter: HookFilter,
    packet_name: Option<String>,
    label: Option<String>,
    pub(crate) callback: Mutex<HookCallback>,
    active: AtomicBool,
    pub(crate) expiry: Mutex<Option<tokio::task::AbortHandle>>,
}

/// Handle returned by registration, used to unhook
pub type HookHandle = Arc<Hook>;

impl Hook {
    pub(crate) fn new(
        owner: Arc<str>,
        selector: Selector,
        packet_name: Option<String>,
        version: DefinitionVersion,
        options: &HookOptions,
        callback: HookCallback,
    ) -> Self {
        Self {
            owner,
            selector,
            order: options.order,
            version,
            filter: options.filter,
            packet_name,
            label: options.label.clone(),
            callback: Mutex::new(callback),
            active: AtomicBool::new(true),
            expiry: Mutex::new(None),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn selector(&self) -> Selector {
        self.selector
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn version(&self) -> &DefinitionVersion {
        &self.version
    }

    pub fn filter(&self) -> &HookFilter {
        &self.filter
    }

    pub fn packet_name(&self) -> Option<&str> {
        self.packet_name.as_deref()
    }

    /// Still registered
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Mark removed and cancel any pending timeout. Returns `false` if it
    /// was already inactive.
    pub(crate) fn deactivate(&self) -> bool {
        let was_active = self.active.swap(false, Ordering::AcqRel);
        if let Ok(mut expiry) = self.expiry.lock() {
            if let Some(handle) = expiry.take() {
                handle.abort();
            }
        }
        was_active
    }

    /// `label in owner` for logs
    pub fn describe(&self) -> String {
        format!(
            "{} in {}",
            self.label.as_deref().unwrap_or("(anonymous)"),
            self.owner
        )
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("owner", &self.owner)
            .field("selector", &self.selector)
            .field("order", &self.order)
            .field("version", &self.version)
            .field("filter", &self.filter)
            .field("active", &self.is_active())
            .finish()
    }
}
