use std::collections::HashSet;

use parking_lot::Mutex;

use crate::protocol::Scope;

/// Local membership state for one logical user key.
///
/// Writers must be serialized per scope: a removal applying concurrently
/// with an in-flight fetch's write must not resurrect a just-removed name.
pub trait MembershipStorage: Send + Sync {
    fn add(&self, scope: Scope, names: &HashSet<String>);
    fn remove(&self, scope: Scope, names: &HashSet<String>);
    /// Overwrites the scope with a fetched snapshot of latest state.
    fn replace(&self, scope: Scope, names: HashSet<String>);
    fn snapshot(&self, scope: Scope) -> HashSet<String>;
}

/// In-memory reference implementation. The per-scope mutex is what
/// enforces the single-writer rule.
#[derive(Debug, Default)]
pub struct InMemoryMembershipStorage {
    segments: Mutex<HashSet<String>>,
    large_segments: Mutex<HashSet<String>>,
}

impl InMemoryMembershipStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, scope: Scope) -> &Mutex<HashSet<String>> {
        match scope {
            Scope::Segment => &self.segments,
            Scope::LargeSegment => &self.large_segments,
        }
    }
}

impl MembershipStorage for InMemoryMembershipStorage {
    fn add(&self, scope: Scope, names: &HashSet<String>) {
        let mut guard = self.cell(scope).lock();
        for name in names {
            guard.insert(name.clone());
        }
    }

    fn remove(&self, scope: Scope, names: &HashSet<String>) {
        let mut guard = self.cell(scope).lock();
        for name in names {
            guard.remove(name);
        }
    }

    fn replace(&self, scope: Scope, names: HashSet<String>) {
        *self.cell(scope).lock() = names;
    }

    fn snapshot(&self, scope: Scope) -> HashSet<String> {
        self.cell(scope).lock().clone()
    }
}
