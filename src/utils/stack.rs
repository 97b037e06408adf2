//! Call-stack helpers for hook and module failures.
//!
//! Frames from the standard library, the async runtime and the dispatch
//! engine itself are dropped so a logged stack points at module code.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};

const INTERNAL_PREFIXES: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "tokio::",
    "futures::",
    "futures_util::",
    "<alloc::",
    "<core::",
    "<std::",
    "game_proxy::dispatch::",
    "game_proxy::mods::manager::",
    "__rust",
    "rust_begin_unwind",
    "_start",
    "__libc",
];

fn is_internal(symbol: &str) -> bool {
    INTERNAL_PREFIXES.iter().any(|p| symbol.starts_with(p))
}

/// Render a backtrace keeping only non-internal frames.
///
/// Returns `None` when no backtrace was captured (e.g. `RUST_BACKTRACE`
/// unset) or every frame was internal.
pub fn filtered(backtrace: &Backtrace) -> Option<String> {
    if backtrace.status() != BacktraceStatus::Captured {
        return None;
    }
    filter_rendered(&backtrace.to_string())
}

/// Filter an already rendered backtrace (`N: symbol` lines followed by
/// optional `at file:line` lines)
pub fn filter_rendered(rendered: &str) -> Option<String> {
    let mut out = String::new();
    let mut keep = false;

    for line in rendered.lines() {
        let trimmed = line.trim_start();
        if let Some((index, symbol)) = trimmed.split_once(": ") {
            if index.chars().all(|c| c.is_ascii_digit()) && !index.is_empty() {
                keep = !is_internal(symbol.trim());
                if keep {
                    out.push_str("    ");
                    out.push_str(symbol.trim());
                    out.push('\n');
                }
                continue;
            }
        }
        if keep && trimmed.starts_with("at ") {
            out.push_str("        ");
            out.push_str(trimmed);
            out.push('\n');
        }
    }

    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Best-effort message from a caught panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RENDERED: &str = "   0: std::backtrace::Backtrace::capture
             at /rustc/abc/library/std/src/backtrace.rs:331:13
   1: my_mod::hooks::on_chat
             at ./mods/my_mod/src/hooks.rs:42:9
   2: game_proxy::dispatch::pipeline::Dispatch::run_hook
             at ./src/dispatch/pipeline.rs:300:5
   3: core::ops::function::FnOnce::call_once
   4: my_mod::load
";

    #[test]
    fn test_filter_drops_internal_frames() {
        let out = filter_rendered(RENDERED).unwrap();
        assert!(out.contains("my_mod::hooks::on_chat"));
        assert!(out.contains("hooks.rs:42:9"));
        assert!(out.contains("my_mod::load"));
        assert!(!out.contains("std::backtrace"));
        assert!(!out.contains("pipeline.rs"));
        assert!(!out.contains("FnOnce"));
    }

    #[test]
    fn test_all_internal_is_none() {
        assert!(filter_rendered("   0: std::rt::lang_start\n").is_none());
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
