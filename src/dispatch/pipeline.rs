//! The per-packet dispatch pipeline.
//!
//! [`Dispatch`] is the per-connection hub: it owns the hook registry, the
//! negotiated protocol session and the loaded modules, and runs every
//! packet through the hooks in order. It is a cheap-clone handle so modules
//! and timers may keep one.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, TryLockError, Weak};

use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ProtocolConfig, VERSION_CHECK_OPCODE};
use crate::core::packet::{self, Direction, PacketFlags, HEADER_SIZE};
use crate::dispatch::hook::{
    DefinitionVersion, Hook, HookAction, HookCallback, HookError, HookHandle, HookOptions,
    HookResult, RawPacket, Selector, WILDCARD,
};
use crate::dispatch::registry::HookRegistry;
use crate::error::{constants, ProxyError, Result};
use crate::mods::{LoadSummary, ModLifecycleManager, ModuleLoader, ModuleRef, SharedCatalog};
use crate::protocol::codec::{CustomDefinition, Event, ProtocolCodec, ProtocolInfo, SysmsgMap};
use crate::protocol::session::{self, ProtocolSession};
use crate::protocol::sysmsg::{self, SystemMessage};
use crate::protocol::ProtocolProvider;
use crate::utils::metrics::global_metrics;
use crate::utils::stack;

/// A packet queued for the connection, written by the relay task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// `Outgoing` goes to the server, `Incoming` to the client
    pub direction: Direction,
    pub data: Vec<u8>,
}

/// Bootstrap behaviour of a dispatch
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Opcode of the version-check packet
    pub bootstrap_opcode: u16,
    /// Commit this version instead of deriving it from the version check
    pub forced_version: Option<u32>,
    /// Negotiate this version at construction
    pub preset_version: Option<u32>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            bootstrap_opcode: VERSION_CHECK_OPCODE,
            forced_version: None,
            preset_version: None,
        }
    }
}

impl From<&ProtocolConfig> for DispatchSettings {
    fn from(config: &ProtocolConfig) -> Self {
        Self {
            bootstrap_opcode: config.bootstrap_opcode,
            forced_version: config.forced_version,
            preset_version: config.version,
        }
    }
}

type InitListener = Arc<dyn Fn(&ProtocolInfo) + Send + Sync>;

pub(crate) struct DispatchInner {
    hooks: Mutex<HookRegistry>,
    session: RwLock<ProtocolSession>,
    provider: Arc<dyn ProtocolProvider>,
    mods: ModLifecycleManager,
    transport: Mutex<Option<UnboundedSender<Outbound>>>,
    init_listeners: Mutex<Vec<(Arc<str>, InitListener)>>,
    settings: DispatchSettings,
}

/// Non-owning reference held by the module manager
#[derive(Clone)]
pub(crate) struct WeakDispatch(Weak<DispatchInner>);

impl WeakDispatch {
    pub(crate) fn upgrade(&self) -> Option<Dispatch> {
        self.0.upgrade().map(|inner| Dispatch { inner })
    }
}

/// Per-connection dispatch handle
#[derive(Clone)]
pub struct Dispatch {
    inner: Arc<DispatchInner>,
}

/// Mutable state threaded through the hooks of one packet
#[derive(Debug)]
pub struct PipelineContext {
    opcode: u16,
    buffer: Vec<u8>,
    flags: PacketFlags,
}

impl PipelineContext {
    fn new(opcode: u16, buffer: Vec<u8>, incoming: bool, synthetic: bool) -> Self {
        Self {
            opcode,
            buffer,
            flags: PacketFlags::entering(incoming, synthetic),
        }
    }

    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    /// Current buffer, including any replacement by earlier hooks
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Live flags; later hooks see what earlier hooks did
    pub fn flags(&self) -> PacketFlags {
        self.flags
    }

    /// Compared against the current buffer rather than the entry buffer, so
    /// `modified` stays set once any hook changed the bytes.
    fn replace(&mut self, bytes: Vec<u8>) {
        self.flags.modified |= bytes != self.buffer;
        self.buffer = bytes;
    }

    fn finish(self) -> Option<Vec<u8>> {
        global_metrics().packet_handled(
            self.flags.synthetic,
            self.flags.modified,
            self.flags.silenced,
        );
        if self.flags.silenced {
            None
        } else {
            Some(self.buffer)
        }
    }
}

/// How a decoded hook's mutation gets re-encoded
enum EncodeTarget {
    Schema { name: String, version: u32 },
    Custom(Arc<dyn CustomDefinition>),
}

impl EncodeTarget {
    fn encode(&self, codec: &dyn ProtocolCodec, opcode: u16, event: &Event) -> Result<Vec<u8>> {
        match self {
            EncodeTarget::Schema { name, version } => codec.write(name, *version, event.data()),
            EncodeTarget::Custom(def) => packet::build(opcode, &def.write(event.data())?),
        }
    }
}

enum HookFailure {
    Error(HookError),
    Panic(String),
}

fn invoke<F: FnOnce() -> HookResult>(f: F) -> std::result::Result<HookAction, HookFailure> {
    global_metrics().hook_invoked();
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(action)) => Ok(action),
        Ok(Err(e)) => Err(HookFailure::Error(e)),
        Err(payload) => Err(HookFailure::Panic(stack::panic_message(payload.as_ref()))),
    }
}

fn report(hook: &Hook, opcode: u16, stage: &'static str, failure: HookFailure) {
    global_metrics().hook_failed();
    let (message, trace) = match failure {
        HookFailure::Error(e) => {
            let trace = stack::filtered(e.backtrace());
            (e.message().to_string(), trace)
        }
        HookFailure::Panic(message) => (format!("panicked: {message}"), None),
    };
    let err = ProxyError::HookExecution(format!("{} ({stage}): {message}", hook.describe()));
    error!(
        error = %err,
        opcode,
        packet = hook.packet_name().unwrap_or(WILDCARD),
        stack = trace.as_deref().unwrap_or(""),
        "Hook failed"
    );
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &'static str) -> Result<MutexGuard<'a, T>> {
    mutex.lock().map_err(|_| ProxyError::Internal(what.into()))
}

impl Dispatch {
    /// Create a dispatch with its own hook registry and module set.
    ///
    /// Definitions (through `provider`) and the module catalog are shared
    /// with every other connection.
    pub fn new(
        provider: Arc<dyn ProtocolProvider>,
        catalog: SharedCatalog,
        loader: Arc<dyn ModuleLoader>,
        settings: DispatchSettings,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak| DispatchInner {
            hooks: Mutex::new(HookRegistry::new()),
            session: RwLock::new(ProtocolSession::new()),
            provider,
            mods: ModLifecycleManager::new(catalog, loader, WeakDispatch(weak.clone())),
            transport: Mutex::new(None),
            init_listeners: Mutex::new(Vec::new()),
            settings,
        });
        let dispatch = Self { inner };
        if let Some(version) = dispatch.inner.settings.preset_version {
            dispatch.set_protocol_version(version);
        }
        dispatch
    }

    /// Negotiated codec, if any
    pub fn codec(&self) -> Option<Arc<dyn ProtocolCodec>> {
        self.inner.session.read().ok()?.codec()
    }

    /// Negotiated protocol version, if any
    pub fn protocol_version(&self) -> Option<u32> {
        self.inner.session.read().ok()?.version()
    }

    pub fn provider(&self) -> &Arc<dyn ProtocolProvider> {
        &self.inner.provider
    }

    /// Run a packet through the hooks.
    ///
    /// Returns the buffer to forward, or `None` when a hook silenced it.
    pub fn handle(&self, buffer: Vec<u8>, incoming: bool, synthetic: bool) -> Option<Vec<u8>> {
        let Some(opcode) = packet::opcode(&buffer) else {
            return Some(buffer);
        };

        let mut codec = self.codec();
        if codec.is_none() && opcode == self.inner.settings.bootstrap_opcode {
            self.bootstrap(&buffer);
            codec = self.codec();
        }
        let Some(codec) = codec else {
            return Some(buffer);
        };

        let hooks: Vec<HookHandle> = match self.inner.hooks.lock() {
            Ok(registry) => {
                if !registry.has_hooks(opcode) {
                    return Some(buffer);
                }
                registry.iterate_ordered(opcode).cloned().collect()
            }
            Err(_) => {
                error!(opcode, "{}", constants::ERR_HOOK_LOCK);
                return Some(buffer);
            }
        };

        let mut ctx = PipelineContext::new(opcode, buffer, incoming, synthetic);
        for hook in &hooks {
            if !hook.is_active() || !hook.filter().matches(&ctx.flags) {
                continue;
            }
            let mut callback = match hook.callback.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    warn!(hook = %hook.describe(), opcode, "Skipping re-entered hook");
                    continue;
                }
            };
            run_hook(&mut ctx, hook, &mut callback, codec.as_ref());
        }
        ctx.finish()
    }

    fn bootstrap(&self, buffer: &[u8]) {
        let version = match self.inner.settings.forced_version {
            Some(forced) => {
                warn!(
                    version = forced,
                    "Using forced protocol version instead of the version check"
                );
                forced
            }
            None => match session::parse_version_check(buffer) {
                Ok(version) => version,
                Err(e) => {
                    warn!(error = %e, "Failed to derive protocol version");
                    return;
                }
            },
        };
        self.set_protocol_version(version);
    }

    /// (Re)configure the connection for a protocol version and notify
    /// initialization listeners. Failure leaves the session unchanged.
    #[instrument(skip(self))]
    pub fn set_protocol_version(&self, version: u32) -> bool {
        let codec = match self.inner.provider.open(version) {
            Ok(codec) => codec,
            Err(e) => {
                error!(version, error = %e, "Failed to set protocol version");
                return false;
            }
        };
        let info = codec.info().clone();

        match self.inner.session.write() {
            Ok(mut session) => session.commit(codec),
            Err(_) => {
                error!("{}", constants::ERR_SESSION_LOCK);
                return false;
            }
        }

        if info.region.is_empty() {
            warn!(version, "Protocol version has no region or patch metadata");
        } else {
            info!(
                version,
                region = %info.region,
                patch = %info.patch(),
                "Protocol version set"
            );
        }

        let listeners: Vec<InitListener> = match self.inner.init_listeners.lock() {
            Ok(listeners) => listeners.iter().map(|(_, l)| l.clone()).collect(),
            Err(_) => Vec::new(),
        };
        for listener in listeners {
            notify(&listener, &info);
        }
        true
    }

    /// Call `listener` whenever a protocol version is committed, and right
    /// away if one already is
    pub fn on_initialized<F>(&self, owner: &str, listener: F)
    where
        F: Fn(&ProtocolInfo) + Send + Sync + 'static,
    {
        let listener: InitListener = Arc::new(listener);
        if let Ok(mut listeners) = self.inner.init_listeners.lock() {
            listeners.push((Arc::from(owner), listener.clone()));
        }
        if let Some(codec) = self.codec() {
            notify(&listener, codec.info());
        }
    }

    /// Register a hook.
    ///
    /// `name` is a packet name or [`WILDCARD`]. Errors here are programming
    /// mistakes in the caller and are returned before anything is registered.
    pub fn hook(
        &self,
        owner: &str,
        name: &str,
        version: impl Into<DefinitionVersion>,
        mut options: HookOptions,
        callback: HookCallback,
    ) -> Result<HookHandle> {
        let (selector, packet_name, version) =
            self.validate_hook(name, version.into(), &callback)?;

        let timeout = options.timeout.take();
        let runtime = match &timeout {
            Some(t) if t.duration.is_zero() => {
                return Err(ProxyError::InvalidArgument(constants::ERR_ZERO_TIMEOUT.into()));
            }
            Some(_) => Some(tokio::runtime::Handle::try_current().map_err(|_| {
                ProxyError::InvalidArgument(constants::ERR_NO_RUNTIME.into())
            })?),
            None => None,
        };

        let hook = Arc::new(Hook::new(
            Arc::from(owner),
            selector,
            packet_name,
            version,
            &options,
            callback,
        ));
        lock(&self.inner.hooks, constants::ERR_HOOK_LOCK)?.register(hook.clone());

        if let (Some(timeout), Some(runtime)) = (timeout, runtime) {
            let dispatch = Arc::downgrade(&self.inner);
            let target = Arc::downgrade(&hook);
            let task = runtime.spawn(async move {
                tokio::time::sleep(timeout.duration).await;
                let (Some(inner), Some(hook)) = (dispatch.upgrade(), target.upgrade()) else {
                    return;
                };
                if let Ok(mut expiry) = hook.expiry.lock() {
                    expiry.take();
                }
                if (Dispatch { inner }).unhook(&hook) {
                    debug!(hook = %hook.describe(), "Hook timed out");
                    (timeout.on_expire)();
                }
            });
            if let Ok(mut expiry) = hook.expiry.lock() {
                *expiry = Some(task.abort_handle());
            }
        }

        debug!(hook = %hook.describe(), packet = name, version = %hook.version(), order = hook.order(), "Hook registered");
        Ok(hook)
    }

    fn validate_hook(
        &self,
        name: &str,
        version: DefinitionVersion,
        callback: &HookCallback,
    ) -> Result<(Selector, Option<String>, DefinitionVersion)> {
        if name == WILDCARD {
            if !matches!(version, DefinitionVersion::Raw | DefinitionVersion::Any) {
                return Err(ProxyError::InvalidArgument(
                    constants::ERR_WILDCARD_VERSION.into(),
                ));
            }
            if !callback.is_raw() {
                return Err(ProxyError::InvalidArgument(constants::ERR_RAW_CALLBACK.into()));
            }
            return Ok((Selector::Wildcard, None, DefinitionVersion::Raw));
        }

        let codec = self.codec().ok_or_else(|| {
            ProxyError::UnknownPacket(format!("{name}: {}", constants::ERR_NOT_NEGOTIATED))
        })?;
        let opcode = codec
            .packets()
            .code(name)
            .ok_or_else(|| ProxyError::UnknownPacket(name.to_string()))?;

        match &version {
            DefinitionVersion::Raw => {
                if !callback.is_raw() {
                    return Err(ProxyError::InvalidArgument(constants::ERR_RAW_CALLBACK.into()));
                }
            }
            DefinitionVersion::Numeric(v) => {
                if let Some(latest) = codec.latest_version(name) {
                    if *v < latest {
                        return Err(ProxyError::ObsoleteDefinition {
                            name: name.to_string(),
                            version: *v,
                            latest,
                        });
                    }
                }
                let known = self
                    .inner
                    .provider
                    .definitions()
                    .read()
                    .map_err(|_| ProxyError::Internal(constants::ERR_DEFINITIONS_LOCK.into()))?
                    .has(name, *v);
                if !known {
                    return Err(ProxyError::DefinitionNotFound {
                        name: name.to_string(),
                        version: *v,
                    });
                }
            }
            DefinitionVersion::Any => {
                if codec.latest_version(name).is_none() {
                    return Err(ProxyError::InvalidArgument(format!(
                        "no definition known for {name}"
                    )));
                }
            }
            DefinitionVersion::Custom(_) => {}
        }

        if !version.is_raw() && callback.is_raw() {
            return Err(ProxyError::InvalidArgument(constants::ERR_EVENT_CALLBACK.into()));
        }
        Ok((Selector::Opcode(opcode), Some(name.to_string()), version))
    }

    /// Remove a hook. No-op if it was already removed.
    pub fn unhook(&self, hook: &Hook) -> bool {
        match self.inner.hooks.lock() {
            Ok(mut registry) => registry.unregister(hook),
            Err(_) => {
                error!("{}", constants::ERR_HOOK_LOCK);
                false
            }
        }
    }

    /// Remove every hook and init listener registered by `owner`
    pub fn unhook_all(&self, owner: &str) -> usize {
        if let Ok(mut listeners) = self.inner.init_listeners.lock() {
            listeners.retain(|(o, _)| &**o != owner);
        }
        match self.inner.hooks.lock() {
            Ok(mut registry) => registry.remove_all(owner),
            Err(_) => {
                error!("{}", constants::ERR_HOOK_LOCK);
                0
            }
        }
    }

    /// Number of registered hooks
    pub fn hook_count(&self) -> usize {
        self.inner.hooks.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Run `f` against the registry, e.g. to inspect execution order
    pub fn with_registry<R>(&self, f: impl FnOnce(&HookRegistry) -> R) -> Result<R> {
        Ok(f(&*lock(&self.inner.hooks, constants::ERR_HOOK_LOCK)?))
    }

    /// Encode and inject a packet.
    ///
    /// `outgoing` sends toward the server. The packet goes through the hooks
    /// as synthetic before it is queued. Returns `false` without a transport
    /// or when a hook silenced it.
    pub fn write(
        &self,
        outgoing: bool,
        name: &str,
        version: impl Into<DefinitionVersion>,
        data: Value,
    ) -> Result<bool> {
        if !self.has_transport() {
            return Ok(false);
        }
        let Value::Object(data) = data else {
            return Err(ProxyError::InvalidArgument(format!(
                "{name}: packet data must be an object"
            )));
        };
        let codec = self.codec().ok_or_else(|| {
            ProxyError::UnknownPacket(format!("{name}: {}", constants::ERR_NOT_NEGOTIATED))
        })?;

        let buffer = match version.into() {
            DefinitionVersion::Numeric(v) => {
                if let Some(latest) = codec.latest_version(name) {
                    if v < latest {
                        warn!(packet = name, version = v, latest, "Writing obsolete definition");
                    }
                }
                codec.write(name, v, &data)?
            }
            DefinitionVersion::Any => {
                let latest = codec.latest_version(name).ok_or_else(|| {
                    ProxyError::InvalidArgument(format!("no definition known for {name}"))
                })?;
                codec.write(name, latest, &data)?
            }
            DefinitionVersion::Custom(def) => {
                let opcode = codec
                    .packets()
                    .code(name)
                    .ok_or_else(|| ProxyError::UnknownPacket(name.to_string()))?;
                packet::build(opcode, &def.write(&data)?)?
            }
            DefinitionVersion::Raw => {
                return Err(ProxyError::InvalidArgument(
                    "raw buffers are written with write_raw".into(),
                ));
            }
        };

        Ok(self.write_raw(outgoing, buffer))
    }

    /// Inject a prebuilt packet
    pub fn write_raw(&self, outgoing: bool, data: Vec<u8>) -> bool {
        let Some(sender) = self.transport() else {
            return false;
        };
        if data.len() < HEADER_SIZE {
            warn!(len = data.len(), "Refusing to write packet shorter than its header");
            return false;
        }
        if let Err(e) = packet::check_size(data.len()) {
            warn!(error = %e, "Refusing to write packet");
            return false;
        }
        match self.handle(data, !outgoing, true) {
            Some(data) => sender
                .send(Outbound {
                    direction: Direction::from_incoming(!outgoing),
                    data,
                })
                .is_ok(),
            None => false,
        }
    }

    /// Register a definition on the shared catalog. `Ok(false)` if that
    /// exact version already existed.
    pub fn add_definition(&self, name: &str, version: u32, source: &str) -> Result<bool> {
        let definitions = self.inner.provider.definitions();
        let added = definitions
            .write()
            .map_err(|_| ProxyError::Internal(constants::ERR_DEFINITIONS_LOCK.into()))?
            .add_definition(name, version, source)?;
        if added {
            info!(packet = name, version, "Definition added");
        }
        Ok(added)
    }

    fn sysmsg_map(&self) -> SysmsgMap {
        self.codec()
            .map(|c| c.sysmsgs().clone())
            .unwrap_or_default()
    }

    pub fn parse_system_message(&self, message: &str) -> Result<SystemMessage> {
        sysmsg::parse(message, &self.sysmsg_map())
    }

    pub fn build_system_message(&self, message: &SystemMessage) -> Result<String> {
        sysmsg::build(message, &self.sysmsg_map())
    }

    /// Bind the connection's outbound channel
    pub fn attach_transport(&self, sender: UnboundedSender<Outbound>) {
        if let Ok(mut transport) = self.inner.transport.lock() {
            *transport = Some(sender);
        }
    }

    pub fn detach_transport(&self) {
        if let Ok(mut transport) = self.inner.transport.lock() {
            transport.take();
        }
    }

    pub fn has_transport(&self) -> bool {
        self.transport().is_some()
    }

    fn transport(&self) -> Option<UnboundedSender<Outbound>> {
        self.inner.transport.lock().ok()?.clone()
    }

    /// The connection's module manager
    pub fn mods(&self) -> &ModLifecycleManager {
        &self.inner.mods
    }

    pub fn load_mod(&self, name: &str) -> Option<ModuleRef> {
        self.inner.mods.load(name, None)
    }

    pub fn unload_mod(&self, name: &str) -> bool {
        self.inner.mods.unload(name, None)
    }

    pub fn reload_mod(&self, name: &str) -> Result<bool> {
        self.inner.mods.reload(name)
    }

    pub fn load_all_mods(&self) -> LoadSummary {
        self.inner.mods.load_all()
    }

    /// Tear down every module (instance pass, then global pass) and drop
    /// any hook left behind
    pub fn reset(&self) {
        self.inner.mods.reset();
        let leftover = self.inner.hooks.lock().map(|mut registry| {
            let n = registry.len();
            registry.clear();
            n
        });
        if let Ok(n) = leftover {
            if n > 0 {
                warn!(hooks = n, "Cleared hooks left after module teardown");
            }
        }
        if let Ok(mut listeners) = self.inner.init_listeners.lock() {
            listeners.clear();
        }
    }
}

fn notify(listener: &InitListener, info: &ProtocolInfo) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(info))) {
        error!(
            error = %stack::panic_message(payload.as_ref()),
            "Initialization listener panicked"
        );
    }
}

fn run_hook(
    ctx: &mut PipelineContext,
    hook: &Hook,
    callback: &mut HookCallback,
    codec: &dyn ProtocolCodec,
) {
    let (outcome, target) = match callback {
        HookCallback::Raw(f) => {
            let raw = RawPacket {
                opcode: ctx.opcode,
                data: &ctx.buffer,
                flags: ctx.flags,
            };
            (invoke(|| f(&raw)), None)
        }
        HookCallback::Event(f) => match decode(ctx, hook, codec) {
            Ok((event, target)) => (invoke(|| f(&event)), Some(target)),
            Err(e) => {
                report(hook, ctx.opcode, "decode", HookFailure::Error(e.into()));
                return;
            }
        },
    };

    let action = match outcome {
        Ok(action) => action,
        Err(failure) => {
            report(hook, ctx.opcode, "callback", failure);
            return;
        }
    };

    match action {
        HookAction::NoOpinion => {}
        HookAction::Silence => ctx.flags.silenced = true,
        HookAction::ReplaceRaw(bytes) => {
            if bytes.len() < HEADER_SIZE {
                let e = HookError::new("replacement buffer is shorter than the packet header");
                report(hook, ctx.opcode, "result", HookFailure::Error(e));
            } else if let Err(e) = packet::check_size(bytes.len()) {
                report(hook, ctx.opcode, "result", HookFailure::Error(e.into()));
            } else {
                ctx.replace(bytes);
            }
        }
        HookAction::Mutate(event) => {
            let Some(target) = target else {
                let e = HookError::new("raw hooks cannot return a decoded event");
                report(hook, ctx.opcode, "result", HookFailure::Error(e));
                return;
            };
            let encoded = target
                .encode(codec, ctx.opcode, &event)
                .and_then(|bytes| packet::check_size(bytes.len()).map(|()| bytes));
            match encoded {
                Ok(bytes) => {
                    ctx.buffer = bytes;
                    ctx.flags.modified = true;
                    ctx.flags.silenced = false;
                }
                Err(e) => report(hook, ctx.opcode, "encode", HookFailure::Error(e.into())),
            }
        }
    }
}

fn decode(
    ctx: &PipelineContext,
    hook: &Hook,
    codec: &dyn ProtocolCodec,
) -> Result<(Event, EncodeTarget)> {
    let name = codec
        .packets()
        .name(ctx.opcode)
        .or(hook.packet_name())
        .ok_or_else(|| ProxyError::UnknownPacket(format!("opcode {}", ctx.opcode)))?
        .to_string();

    let (event, target) = match hook.version() {
        DefinitionVersion::Numeric(v) => (
            codec.read(ctx.opcode, *v, &ctx.buffer)?,
            EncodeTarget::Schema {
                name,
                version: *v,
            },
        ),
        DefinitionVersion::Any => {
            let latest = codec
                .latest_version(&name)
                .ok_or_else(|| ProxyError::DefinitionNotFound {
                    name: name.clone(),
                    version: 0,
                })?;
            (
                codec.read(ctx.opcode, latest, &ctx.buffer)?,
                EncodeTarget::Schema {
                    name,
                    version: latest,
                },
            )
        }
        DefinitionVersion::Custom(def) => (
            Event::new(name, 0, def.read(packet::payload(&ctx.buffer))?),
            EncodeTarget::Custom(def.clone()),
        ),
        DefinitionVersion::Raw => {
            return Err(ProxyError::Internal(constants::ERR_EVENT_CALLBACK.into()));
        }
    };
    Ok((event.with_flags(ctx.flags), target))
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("protocol_version", &self.protocol_version())
            .field("hooks", &self.hook_count())
            .field("transport", &self.has_transport())
            .finish()
    }
}

/// Registration handle bound to one module name
#[derive(Clone, Debug)]
pub struct Hooks {
    owner: Arc<str>,
    dispatch: Dispatch,
}

impl Hooks {
    pub fn new(owner: &str, dispatch: Dispatch) -> Self {
        Self {
            owner: Arc::from(owner),
            dispatch,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn dispatch(&self) -> &Dispatch {
        &self.dispatch
    }

    pub fn hook(
        &self,
        name: &str,
        version: impl Into<DefinitionVersion>,
        options: HookOptions,
        callback: HookCallback,
    ) -> Result<HookHandle> {
        self.dispatch
            .hook(&self.owner, name, version, options, callback)
    }

    /// Decoded hook with default options
    pub fn on<F>(&self, name: &str, version: impl Into<DefinitionVersion>, f: F) -> Result<HookHandle>
    where
        F: FnMut(&Event) -> HookResult + Send + 'static,
    {
        self.hook(name, version, HookOptions::new(), HookCallback::event(f))
    }

    /// Raw hook with default options
    pub fn on_raw<F>(&self, name: &str, f: F) -> Result<HookHandle>
    where
        F: FnMut(&RawPacket<'_>) -> HookResult + Send + 'static,
    {
        self.hook(name, DefinitionVersion::Raw, HookOptions::new(), HookCallback::raw(f))
    }

    pub fn unhook(&self, hook: &Hook) -> bool {
        self.dispatch.unhook(hook)
    }

    pub fn on_initialized<F>(&self, listener: F)
    where
        F: Fn(&ProtocolInfo) + Send + Sync + 'static,
    {
        self.dispatch.on_initialized(&self.owner, listener);
    }
}
