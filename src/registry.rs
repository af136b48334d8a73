// Copyright 2025 Callflow Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! In-memory, single-process map of active calls.
//!
//! An entry is created exactly once per call-identifier lifetime and removed
//! exactly once by the handler runner on any terminal outcome. No entry
//! survives a process restart by design.

use std::sync::Arc;

use dashmap::DashMap;

use crate::session::CallSession;

#[derive(Debug, Default)]
pub struct CallRegistry {
    calls: DashMap<String, Arc<CallSession>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, call_id: &str) -> Option<Arc<CallSession>> {
        self.calls.get(call_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.calls.contains_key(call_id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn call_ids(&self) -> Vec<String> {
        self.calls.iter().map(|entry| entry.key().clone()).collect()
    }

    pub(crate) fn insert(&self, session: Arc<CallSession>) {
        self.calls.insert(session.call_id().to_string(), session);
    }

    pub(crate) fn remove(&self, call_id: &str) -> Option<Arc<CallSession>> {
        self.calls.remove(call_id).map(|(_, session)| session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouterConfig;

    fn session(id: &str) -> Arc<CallSession> {
        Arc::new(CallSession::new(
            id.to_string(),
            Arc::new(RouterConfig::default()),
        ))
    }

    #[test]
    fn insert_get_remove() {
        let registry = CallRegistry::new();
        assert!(registry.is_empty());

        registry.insert(session("A1"));
        assert!(registry.contains("A1"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("A1").unwrap().call_id(), "A1");

        assert!(registry.remove("A1").is_some());
        assert!(!registry.contains("A1"));
        // Second removal finds nothing.
        assert!(registry.remove("A1").is_none());
    }

    #[test]
    fn distinct_calls_are_independent() {
        let registry = CallRegistry::new();
        registry.insert(session("A1"));
        registry.insert(session("B2"));

        registry.remove("A1");
        assert!(registry.contains("B2"));

        let mut ids = registry.call_ids();
        ids.sort();
        assert_eq!(ids, ["B2"]);
    }
}
