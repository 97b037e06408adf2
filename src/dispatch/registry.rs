//! Ordered hook storage.
//!
//! Hooks live in `OrderGroup`s sorted ascending by order, one sequence per
//! selector. Execution order for an opcode is the merge of the wildcard
//! sequence and the opcode's own sequence, ties going to wildcard.

use std::collections::HashMap;
use std::sync::Arc;

use crate::dispatch::hook::{Hook, HookHandle, Selector};

/// Hooks sharing one order value, in registration order
#[derive(Debug, Default)]
pub struct OrderGroup {
    pub order: i32,
    pub hooks: Vec<HookHandle>,
}

/// Selector -> groups sorted by order
#[derive(Debug, Default)]
pub struct HookRegistry {
    table: HashMap<Selector, Vec<OrderGroup>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a hook into its selector's group sequence
    pub fn register(&mut self, hook: HookHandle) {
        let order = hook.order();
        let groups = self.table.entry(hook.selector()).or_default();
        match groups.binary_search_by_key(&order, |g| g.order) {
            Ok(idx) => groups[idx].hooks.push(hook),
            Err(idx) => groups.insert(
                idx,
                OrderGroup {
                    order,
                    hooks: vec![hook],
                },
            ),
        }
    }

    /// Remove a hook. No-op (returns `false`) if it is not registered.
    pub fn unregister(&mut self, hook: &Hook) -> bool {
        hook.deactivate();

        let Some(groups) = self.table.get_mut(&hook.selector()) else {
            return false;
        };
        let Ok(idx) = groups.binary_search_by_key(&hook.order(), |g| g.order) else {
            return false;
        };

        let group = &mut groups[idx];
        let before = group.hooks.len();
        group.hooks.retain(|h| !std::ptr::eq(Arc::as_ptr(h), hook));
        let removed = group.hooks.len() < before;

        if group.hooks.is_empty() {
            groups.remove(idx);
        }
        if groups.is_empty() {
            self.table.remove(&hook.selector());
        }
        removed
    }

    /// Remove every hook owned by `owner`, across all selectors
    pub fn remove_all(&mut self, owner: &str) -> usize {
        let mut removed = 0;
        for groups in self.table.values_mut() {
            for group in groups.iter_mut() {
                group.hooks.retain(|h| {
                    if h.owner() == owner {
                        h.deactivate();
                        removed += 1;
                        false
                    } else {
                        true
                    }
                });
            }
            groups.retain(|g| !g.hooks.is_empty());
        }
        self.table.retain(|_, groups| !groups.is_empty());
        removed
    }

    /// Remove every hook
    pub fn clear(&mut self) {
        for groups in self.table.values() {
            for hook in groups.iter().flat_map(|g| &g.hooks) {
                hook.deactivate();
            }
        }
        self.table.clear();
    }

    /// Whether any hook (specific or wildcard) would see `opcode`
    pub fn has_hooks(&self, opcode: u16) -> bool {
        self.table.contains_key(&Selector::Wildcard)
            || self.table.contains_key(&Selector::Opcode(opcode))
    }

    /// Total number of registered hooks
    pub fn len(&self) -> usize {
        self.table
            .values()
            .flat_map(|groups| groups.iter())
            .map(|g| g.hooks.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Hooks for `opcode` in execution order
    pub fn iterate_ordered(&self, opcode: u16) -> OrderedHooks<'_> {
        OrderedHooks::new(
            self.groups(Selector::Wildcard),
            self.groups(Selector::Opcode(opcode)),
        )
    }

    fn groups(&self, selector: Selector) -> &[OrderGroup] {
        self.table.get(&selector).map_or(&[], Vec::as_slice)
    }
}

/// Lazy merge of the wildcard and opcode group sequences
pub struct OrderedHooks<'a> {
    wildcard: &'a [OrderGroup],
    specific: &'a [OrderGroup],
    current: std::slice::Iter<'a, HookHandle>,
}

impl<'a> OrderedHooks<'a> {
    fn new(wildcard: &'a [OrderGroup], specific: &'a [OrderGroup]) -> Self {
        Self {
            wildcard,
            specific,
            current: [].iter(),
        }
    }

    fn next_group(&mut self) -> Option<&'a OrderGroup> {
        let take_wildcard = match (self.wildcard.first(), self.specific.first()) {
            (None, None) => return None,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(w), Some(s)) => w.order <= s.order,
        };

        let source = if take_wildcard {
            &mut self.wildcard
        } else {
            &mut self.specific
        };
        let groups: &'a [OrderGroup] = *source;
        let (group, rest) = groups.split_first()?;
        *source = rest;
        Some(group)
    }
}

impl<'a> Iterator for OrderedHooks<'a> {
    type Item = &'a HookHandle;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(hook) = self.current.next() {
                return Some(hook);
            }
            self.current = self.next_group()?.hooks.iter();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::hook::{DefinitionVersion, HookAction, HookCallback, HookOptions};

    fn hook(owner: &str, selector: Selector, order: i32) -> HookHandle {
        Arc::new(Hook::new(
            Arc::from(owner),
            selector,
            None,
            DefinitionVersion::Raw,
            &HookOptions::new().order(order),
            HookCallback::raw(|_| Ok(HookAction::NoOpinion)),
        ))
    }

    fn orders(registry: &HookRegistry, opcode: u16) -> Vec<(i32, Selector)> {
        registry
            .iterate_ordered(opcode)
            .map(|h| (h.order(), h.selector()))
            .collect()
    }

    #[test]
    fn test_groups_stay_sorted() {
        let mut registry = HookRegistry::new();
        for order in [10, -5, 3, 10, 0] {
            registry.register(hook("a", Selector::Opcode(1), order));
        }
        let got: Vec<i32> = orders(&registry, 1).into_iter().map(|(o, _)| o).collect();
        assert_eq!(got, vec![-5, 0, 3, 10, 10]);
    }

    #[test]
    fn test_wildcard_wins_ties() {
        let mut registry = HookRegistry::new();
        registry.register(hook("a", Selector::Opcode(1), 0));
        registry.register(hook("a", Selector::Wildcard, 0));
        registry.register(hook("a", Selector::Wildcard, 5));
        registry.register(hook("a", Selector::Opcode(1), -1));
        assert_eq!(
            orders(&registry, 1),
            vec![
                (-1, Selector::Opcode(1)),
                (0, Selector::Wildcard),
                (0, Selector::Opcode(1)),
                (5, Selector::Wildcard),
            ]
        );
        // Another opcode only sees wildcard hooks
        assert_eq!(orders(&registry, 2).len(), 2);
    }

    #[test]
    fn test_equal_order_keeps_registration_order() {
        let mut registry = HookRegistry::new();
        let first = hook("first", Selector::Opcode(1), 0);
        let second = hook("second", Selector::Opcode(1), 0);
        registry.register(first.clone());
        registry.register(second.clone());
        let got: Vec<&str> = registry.iterate_ordered(1).map(|h| h.owner()).collect();
        assert_eq!(got, vec!["first", "second"]);
    }

    #[test]
    fn test_unregister_by_identity() {
        let mut registry = HookRegistry::new();
        let a = hook("m", Selector::Opcode(1), 0);
        let b = hook("m", Selector::Opcode(1), 0);
        registry.register(a.clone());
        registry.register(b.clone());
        assert!(registry.unregister(&a));
        assert!(!registry.unregister(&a));
        assert!(!a.is_active());
        assert!(b.is_active());
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister(&b));
        assert!(!registry.has_hooks(1));
    }

    #[test]
    fn test_remove_all_only_touches_owner() {
        let mut registry = HookRegistry::new();
        registry.register(hook("modX", Selector::Opcode(1), 0));
        registry.register(hook("modX", Selector::Wildcard, 3));
        registry.register(hook("modY", Selector::Opcode(2), 0));
        assert_eq!(registry.remove_all("modX"), 2);
        assert!(registry.iterate_ordered(1).all(|h| h.owner() != "modX"));
        assert_eq!(registry.len(), 1);
        assert!(registry.has_hooks(2));
        assert!(!registry.has_hooks(1));
    }

    #[test]
    fn test_iteration_is_restartable() {
        let mut registry = HookRegistry::new();
        registry.register(hook("a", Selector::Opcode(1), 0));
        registry.register(hook("a", Selector::Wildcard, 1));
        assert_eq!(registry.iterate_ordered(1).count(), 2);
        assert_eq!(registry.iterate_ordered(1).count(), 2);
    }
}
