//! Integration tests for module loading, reload and teardown

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::{dispatch_with, PROTOCOL};
use game_proxy::dispatch::HookAction;
use game_proxy::error::{ProxyError, Result};
use game_proxy::mods::{
    downcast_ref, FactoryLoader, GameModule, ModContext, ModuleRef, Package, TeardownPass,
};

type TeardownLog = Arc<Mutex<Vec<(String, TeardownPass)>>>;

struct Counter {
    name: String,
    generation: u32,
    log: TeardownLog,
}

impl GameModule for Counter {
    fn destroy(&self, pass: TeardownPass) -> Result<()> {
        self.log.lock().unwrap().push((self.name.clone(), pass));
        Ok(())
    }
}

/// Factory that registers one raw hook and counts constructions
fn counter_factory(
    constructed: Arc<AtomicUsize>,
    log: TeardownLog,
) -> impl Fn(&mut ModContext, Option<ModuleRef>) -> Result<ModuleRef> + Send + Sync + 'static {
    move |ctx, seed| {
        constructed.fetch_add(1, Ordering::SeqCst);
        ctx.hooks()
            .on_raw("S_CHAT", |_| Ok(HookAction::NoOpinion))?;
        let generation = seed
            .as_ref()
            .and_then(downcast_ref::<Counter>)
            .map_or(1, |previous| previous.generation + 1);
        Ok(Arc::new(Counter {
            name: ctx.name().to_string(),
            generation,
            log: log.clone(),
        }) as ModuleRef)
    }
}

fn hooks_owned_by(dispatch: &game_proxy::Dispatch, owner: &str) -> usize {
    dispatch
        .with_registry(|registry| {
            registry
                .iterate_ordered(common::S_CHAT)
                .filter(|h| h.owner() == owner)
                .count()
        })
        .unwrap()
}

#[test]
fn test_load_is_cached() {
    let constructed = Arc::new(AtomicUsize::new(0));
    let loader = FactoryLoader::new().with(
        "chat",
        counter_factory(constructed.clone(), TeardownLog::default()),
    );
    let dispatch = dispatch_with(loader, &[Package::new("chat")], Some(PROTOCOL));

    let first = dispatch.load_mod("chat").expect("loads");
    let second = dispatch.load_mod("chat").expect("cached");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(constructed.load(Ordering::SeqCst), 1);
    assert_eq!(dispatch.hook_count(), 1);

    assert!(dispatch.load_mod("not-installed").is_none());
}

#[test]
fn test_unload_removes_hooks_and_runs_both_passes() {
    let log = TeardownLog::default();
    let loader = FactoryLoader::new()
        .with("chat", counter_factory(Arc::default(), log.clone()))
        .with("other", counter_factory(Arc::default(), log.clone()));
    let dispatch = dispatch_with(
        loader,
        &[Package::new("chat"), Package::new("other")],
        Some(PROTOCOL),
    );
    dispatch.load_mod("chat").unwrap();
    dispatch.load_mod("other").unwrap();
    assert_eq!(hooks_owned_by(&dispatch, "chat"), 1);

    assert!(dispatch.unload_mod("chat"));
    assert!(!dispatch.unload_mod("chat"));
    assert_eq!(hooks_owned_by(&dispatch, "chat"), 0);
    assert_eq!(hooks_owned_by(&dispatch, "other"), 1);
    assert!(!dispatch.mods().is_loaded("chat"));
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            ("chat".to_string(), TeardownPass::Instance),
            ("chat".to_string(), TeardownPass::Global),
        ]
    );
}

#[test]
fn test_reload_hands_old_instance_to_new() {
    let constructed = Arc::new(AtomicUsize::new(0));
    let log = TeardownLog::default();
    let loader = FactoryLoader::new().with("chat", counter_factory(constructed.clone(), log.clone()));
    let dispatch = dispatch_with(loader, &[Package::new("chat")], Some(PROTOCOL));

    let old = dispatch.load_mod("chat").unwrap();
    assert!(dispatch.reload_mod("chat").unwrap());

    let new = dispatch.mods().instance("chat").expect("reloaded");
    assert!(!Arc::ptr_eq(&old, &new));
    assert_eq!(downcast_ref::<Counter>(&new).unwrap().generation, 2);
    assert_eq!(constructed.load(Ordering::SeqCst), 2);
    assert_eq!(hooks_owned_by(&dispatch, "chat"), 1);
    // The old instance only tears down per-connection state
    assert_eq!(
        *log.lock().unwrap(),
        vec![("chat".to_string(), TeardownPass::Instance)]
    );
}

#[test]
fn test_reload_rules() {
    let loader = FactoryLoader::new()
        .with("pinned", counter_factory(Arc::default(), TeardownLog::default()))
        .with("fragile", |ctx, seed| {
            if seed.is_some() {
                return Err(ProxyError::ModuleLoad {
                    name: ctx.name().to_string(),
                    reason: "cannot migrate state".into(),
                });
            }
            Ok(Arc::new(Counter {
                name: ctx.name().to_string(),
                generation: 1,
                log: TeardownLog::default(),
            }) as ModuleRef)
        });
    let dispatch = dispatch_with(
        loader,
        &[
            Package::new("pinned").reloadable(false),
            Package::new("fragile"),
        ],
        Some(PROTOCOL),
    );

    assert!(matches!(
        dispatch.reload_mod("pinned"),
        Err(ProxyError::NotLoaded(_))
    ));

    let pinned = dispatch.load_mod("pinned").unwrap();
    assert!(!dispatch.reload_mod("pinned").unwrap());
    assert!(Arc::ptr_eq(&pinned, &dispatch.mods().instance("pinned").unwrap()));

    dispatch.load_mod("fragile").unwrap();
    assert!(matches!(
        dispatch.reload_mod("fragile"),
        Err(ProxyError::ReloadFailed(_))
    ));
    assert!(!dispatch.mods().is_loaded("fragile"));
    assert!(dispatch.mods().catalog().read().unwrap().is_broken("fragile"));
}

#[test]
fn test_failed_constructor_is_contained() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();
    let loader = FactoryLoader::new()
        .with("half-done", move |ctx, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            ctx.hooks().on_raw("S_CHAT", |_| Ok(HookAction::NoOpinion))?;
            Err(ProxyError::ModuleLoad {
                name: ctx.name().to_string(),
                reason: "missing config".into(),
            })
        })
        .with("panics", |_, _| panic!("constructor panicked"))
        .with("fine", counter_factory(Arc::default(), TeardownLog::default()));
    let dispatch = dispatch_with(
        loader,
        &[
            Package::new("half-done"),
            Package::new("panics"),
            Package::new("fine"),
            Package::new("off").enabled(false),
        ],
        Some(PROTOCOL),
    );

    let summary = dispatch.load_all_mods();
    assert_eq!((summary.loaded, summary.failed), (1, 2));
    assert_eq!(dispatch.mods().loaded_names(), vec!["fine"]);
    assert_eq!(hooks_owned_by(&dispatch, "half-done"), 0);

    // Broken modules are not retried
    assert!(dispatch.load_mod("half-done").is_none());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[test]
fn test_reset_runs_instance_pass_before_global_pass() {
    let log = TeardownLog::default();
    let loader = FactoryLoader::new()
        .with("a", counter_factory(Arc::default(), log.clone()))
        .with("b", counter_factory(Arc::default(), log.clone()));
    let dispatch = dispatch_with(
        loader,
        &[Package::new("a"), Package::new("b")],
        Some(PROTOCOL),
    );
    assert_eq!(dispatch.load_all_mods().loaded, 2);

    dispatch.reset();
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            ("a".to_string(), TeardownPass::Instance),
            ("b".to_string(), TeardownPass::Instance),
            ("a".to_string(), TeardownPass::Global),
            ("b".to_string(), TeardownPass::Global),
        ]
    );
    assert!(dispatch.mods().loaded_names().is_empty());
    assert_eq!(dispatch.hook_count(), 0);
}

#[test]
fn test_module_hooks_after_negotiation() {
    let loader = FactoryLoader::new().with("late", |ctx, _| {
        let hooks = ctx.hooks().clone();
        ctx.on_initialized(move |_| {
            hooks
                .on_raw("S_CHAT", |_| Ok(HookAction::NoOpinion))
                .expect("protocol is known here");
        });
        Ok(Arc::new(Counter {
            name: ctx.name().to_string(),
            generation: 1,
            log: TeardownLog::default(),
        }) as ModuleRef)
    });
    let dispatch = dispatch_with(loader, &[Package::new("late")], None);

    dispatch.load_mod("late").unwrap();
    assert_eq!(dispatch.hook_count(), 0);
    assert!(dispatch.set_protocol_version(PROTOCOL));
    assert_eq!(dispatch.hook_count(), 1);

    dispatch.unload_mod("late");
    assert!(dispatch.set_protocol_version(PROTOCOL));
    assert_eq!(dispatch.hook_count(), 0);
}

#[test]
fn test_dependencies_resolve_through_context() {
    let loader = FactoryLoader::new()
        .with("core", counter_factory(Arc::default(), TeardownLog::default()))
        .with("ui", |ctx, _| {
            let core = ctx.require("core")?;
            assert!(downcast_ref::<Counter>(&core).is_some());
            Ok(Arc::new(Counter {
                name: ctx.name().to_string(),
                generation: 1,
                log: TeardownLog::default(),
            }) as ModuleRef)
        });
    let dispatch = dispatch_with(
        loader,
        &[Package::new("ui"), Package::new("core")],
        Some(PROTOCOL),
    );

    assert_eq!(dispatch.load_all_mods().loaded, 2);
    assert_eq!(dispatch.mods().loaded_names(), vec!["core", "ui"]);
}
