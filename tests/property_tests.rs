//! Property-based tests using proptest
//!
//! These tests check hook ordering and filtering across randomly generated
//! registrations and packets.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use common::{negotiated, S_CHAT};
use game_proxy::core::packet;
use game_proxy::dispatch::{
    DefinitionVersion, HookAction, HookCallback, HookFilter, HookOptions, WILDCARD,
};
use proptest::prelude::*;

fn tri_state() -> impl Strategy<Value = Option<bool>> {
    prop_oneof![Just(None), Just(Some(true)), Just(Some(false))]
}

// Property: hooks run ascending by order, wildcard first on ties, then in
// registration order
proptest! {
    #[test]
    fn prop_execution_order(specs in prop::collection::vec((-20i32..20, any::<bool>()), 1..40)) {
        let dispatch = negotiated();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for (seq, &(order, wildcard)) in specs.iter().enumerate() {
            let log = seen.clone();
            dispatch
                .hook(
                    "prop",
                    if wildcard { WILDCARD } else { "S_CHAT" },
                    DefinitionVersion::Raw,
                    HookOptions::new().order(order),
                    HookCallback::raw(move |_| {
                        log.lock().unwrap().push((order, !wildcard, seq));
                        Ok(HookAction::NoOpinion)
                    }),
                )
                .unwrap();
        }

        dispatch.handle(packet::build(S_CHAT, &[0; 8]).unwrap(), true, false);

        let seen = seen.lock().unwrap().clone();
        let mut expected = seen.clone();
        expected.sort();
        prop_assert_eq!(seen.len(), specs.len());
        prop_assert_eq!(seen, expected);
    }
}

// Property: a hook requiring incoming=true never sees outgoing traffic
proptest! {
    #[test]
    fn prop_incoming_filter(
        synthetic in tri_state(),
        modified in tri_state(),
        silenced in tri_state(),
        packet_synthetic in any::<bool>(),
    ) {
        let dispatch = negotiated();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let filter = HookFilter {
            synthetic,
            incoming: Some(true),
            modified,
            silenced,
        };
        dispatch
            .hook(
                "prop",
                "S_CHAT",
                DefinitionVersion::Raw,
                HookOptions::new().filter(filter),
                HookCallback::raw(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(HookAction::NoOpinion)
                }),
            )
            .unwrap();

        dispatch.handle(packet::build(S_CHAT, &[1, 2]).unwrap(), false, packet_synthetic);
        prop_assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}

// Property: once a raw hook silences a packet it stays silenced
proptest! {
    #[test]
    fn prop_silence_persists(actions in prop::collection::vec(0u8..3, 0..12)) {
        let dispatch = negotiated();
        for (i, &action) in actions.iter().enumerate() {
            dispatch
                .hook(
                    "prop",
                    "S_CHAT",
                    DefinitionVersion::Raw,
                    HookOptions::new().order(i as i32),
                    HookCallback::raw(move |raw| {
                        Ok(match action {
                            0 => HookAction::NoOpinion,
                            1 => HookAction::Silence,
                            _ => HookAction::ReplaceRaw(raw.data.to_vec()),
                        })
                    }),
                )
                .unwrap();
        }

        let buf = packet::build(S_CHAT, &[9; 4]).unwrap();
        let result = dispatch.handle(buf.clone(), true, false);
        if actions.contains(&1) {
            prop_assert_eq!(result, None);
        } else {
            prop_assert_eq!(result, Some(buf));
        }
    }
}
