// =============================================================================
// Profile Store — per-client behavioral profiles
// =============================================================================
//
// A single writer per client (per spec's concurrency model) means the lock
// here is only ever briefly held to clone a profile out or splice an updated
// one back in; the actual mutation happens on the caller's owned copy.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use crate::profile::model::ClientProfile;

#[derive(Default)]
pub struct ProfileStore {
    profiles: RwLock<HashMap<String, ClientProfile>>,
}

impl ProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a client's profile, creating an empty one on first contact.
    pub fn get_or_create(&self, client_id: &str, ewma_alpha: f64) -> ClientProfile {
        if let Some(profile) = self.profiles.read().get(client_id) {
            return profile.clone();
        }
        let mut profiles = self.profiles.write();
        profiles
            .entry(client_id.to_string())
            .or_insert_with(|| {
                ClientProfile::new(client_id, ewma_alpha, Utc::now().timestamp_millis())
            })
            .clone()
    }

    pub fn get(&self, client_id: &str) -> Option<ClientProfile> {
        self.profiles.read().get(client_id).cloned()
    }

    /// Splice an updated profile back into the store. Only the evaluation
    /// pipeline for that client should call this, preserving the
    /// single-writer invariant.
    pub fn put(&self, profile: ClientProfile) {
        self.profiles
            .write()
            .insert(profile.client_id.clone(), profile);
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot every known client id, used by background workers that scan
    /// all profiles (silence detector, beneficiary graph refresh).
    pub fn client_ids(&self) -> Vec<String> {
        self.profiles.read().keys().cloned().collect()
    }
}

pub type SharedProfileStore = Arc<ProfileStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_creates_once() {
        let store = ProfileStore::new();
        let p1 = store.get_or_create("C1", 0.01);
        assert_eq!(p1.total_txn_count, 0);
        let mut p1 = p1;
        p1.total_txn_count = 5;
        store.put(p1);
        let p2 = store.get_or_create("C1", 0.01);
        assert_eq!(p2.total_txn_count, 5);
    }

    #[test]
    fn get_returns_none_for_unknown_client() {
        let store = ProfileStore::new();
        assert!(store.get("ghost").is_none());
    }
}
