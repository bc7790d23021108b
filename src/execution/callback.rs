use std::collections::HashMap;
use std::sync::Arc;

use crate::client::InvocationContext;

pub(crate) type CallbackFn = Arc<dyn Fn(InvocationContext) + Send + Sync>;

/// Method-name keyed registry of server-invocable callbacks.
///
/// Registrations for the same target accumulate and fire in registration
/// order. The registry survives reconnects untouched; only explicit
/// unregistration removes an entry.
pub(crate) struct CallbackRegistry {
    callbacks: HashMap<String, Vec<(u64, CallbackFn)>>,
    next_token: u64,
}

impl CallbackRegistry {
    pub(crate) fn new() -> Self {
        CallbackRegistry { callbacks: HashMap::new(), next_token: 0 }
    }

    /// Adds a callback for `target` and returns the token that identifies this
    /// registration.
    pub(crate) fn add(&mut self, target: String, callback: CallbackFn) -> u64 {
        self.next_token += 1;
        let token = self.next_token;

        self.callbacks.entry(target).or_default().push((token, callback));

        token
    }

    /// Removes exactly the registration identified by `token`.
    pub(crate) fn remove(&mut self, target: &str, token: u64) {
        if let Some(entries) = self.callbacks.get_mut(target) {
            entries.retain(|(entry_token, _)| *entry_token != token);

            if entries.is_empty() {
                self.callbacks.remove(target);
            }
        }
    }

    /// All callbacks registered for `target`, in registration order.
    pub(crate) fn matching(&self, target: &str) -> Vec<CallbackFn> {
        self.callbacks
            .get(target)
            .map(|entries| entries.iter().map(|(_, callback)| callback.clone()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> CallbackFn {
        Arc::new(|_context| {})
    }

    #[test]
    fn registrations_accumulate_with_distinct_tokens() {
        let mut registry = CallbackRegistry::new();

        let first = registry.add("broadcast".to_string(), noop());
        let second = registry.add("broadcast".to_string(), noop());

        assert_ne!(first, second);
        assert_eq!(registry.matching("broadcast").len(), 2);
    }

    #[test]
    fn remove_targets_a_single_registration() {
        let mut registry = CallbackRegistry::new();

        let first = registry.add("chat".to_string(), noop());
        let _second = registry.add("chat".to_string(), noop());

        registry.remove("chat", first);
        assert_eq!(registry.matching("chat").len(), 1);

        registry.remove("chat", 999);
        assert_eq!(registry.matching("chat").len(), 1);
    }

    #[test]
    fn unknown_targets_match_nothing() {
        let registry = CallbackRegistry::new();
        assert!(registry.matching("missing").is_empty());
    }

    #[test]
    fn lookups_are_case_sensitive() {
        let mut registry = CallbackRegistry::new();
        registry.add("Receive".to_string(), noop());

        assert_eq!(registry.matching("Receive").len(), 1);
        assert!(registry.matching("receive").is_empty());
    }
}
