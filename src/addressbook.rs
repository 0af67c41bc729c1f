// Murmur - peer-to-peer instant messaging engine over an anonymous overlay
//
// Name <-> address bimap with online/last-seen tracking. Adopts the explicit
// `online` boolean plus an explicit expiration sweep rather than inferring
// liveness purely from elapsed time, since the latter left stale peers
// indistinguishable from peers that were never marked online at all.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::EngineError;

#[derive(Debug, Clone)]
struct Entry {
    address: String,
    online: bool,
    last_seen: Option<DateTime<Utc>>,
}

/// Bidirectional name/address map plus per-peer liveness state.
#[derive(Debug, Default)]
pub struct AddressBook {
    by_name: HashMap<String, Entry>,
    name_by_address: HashMap<String, String>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid_address(address: &str) -> bool {
        ADDRESS_RE.is_match(address)
    }

    /// Insert a new name/address pair. Fails if either side is already
    /// present, or the address doesn't match the base32 identity format.
    pub fn insert(&mut self, name: &str, address: &str) -> Result<(), EngineError> {
        if !Self::is_valid_address(address) {
            return Err(EngineError::InvalidAddress(address.to_string()));
        }

        if self.by_name.contains_key(name) || self.name_by_address.contains_key(address) {
            return Err(EngineError::Duplicate);
        }

        self.by_name.insert(
            name.to_string(),
            Entry {
                address: address.to_string(),
                online: false,
                last_seen: None,
            },
        );
        self.name_by_address
            .insert(address.to_string(), name.to_string());

        Ok(())
    }

    /// Remove a contact by name, dropping both indexes.
    pub fn remove(&mut self, name: &str) -> Result<String, EngineError> {
        let entry = self
            .by_name
            .remove(name)
            .ok_or_else(|| EngineError::NoSuchContact(name.to_string()))?;

        self.name_by_address.remove(&entry.address);

        Ok(entry.address)
    }

    pub fn lookup_by_name(&self, name: &str) -> Option<String> {
        self.by_name.get(name).map(|e| e.address.clone())
    }

    pub fn lookup_by_address(&self, address: &str) -> Option<String> {
        self.name_by_address.get(address).cloned()
    }

    pub fn contains_address(&self, address: &str) -> bool {
        self.name_by_address.contains_key(address)
    }

    /// All addresses currently in the book, in insertion-independent order.
    pub fn addresses(&self) -> Vec<String> {
        self.name_by_address.keys().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.by_name.keys().cloned().collect()
    }

    pub fn set_online(&mut self, address: &str) {
        if let Some(name) = self.name_by_address.get(address) {
            if let Some(entry) = self.by_name.get_mut(name) {
                entry.online = true;
                entry.last_seen = Some(Utc::now());
            }
        }
    }

    pub fn set_offline(&mut self, address: &str) {
        if let Some(name) = self.name_by_address.get(address) {
            if let Some(entry) = self.by_name.get_mut(name) {
                entry.online = false;
            }
        }
    }

    pub fn is_online(&self, address: &str) -> bool {
        self.name_by_address
            .get(address)
            .and_then(|name| self.by_name.get(name))
            .map(|e| e.online)
            .unwrap_or(false)
    }

    pub fn online_peers(&self) -> Vec<String> {
        self.by_name
            .values()
            .filter(|e| e.online)
            .map(|e| e.address.clone())
            .collect()
    }

    /// Online peers whose `last_seen` is older than `max_idle`.
    pub fn expired_peers(&self, max_idle: Duration) -> Vec<String> {
        let now = Utc::now();

        self.by_name
            .values()
            .filter(|e| {
                e.online
                    && e.last_seen
                        .map(|ls| {
                            now.signed_duration_since(ls)
                                .to_std()
                                .map(|d| d > max_idle)
                                .unwrap_or(false)
                        })
                        .unwrap_or(false)
            })
            .map(|e| e.address.clone())
            .collect()
    }

    /// Addresses whose nickname does not end in `Bot` or `_bot`.
    pub fn humans(&self) -> Vec<String> {
        self.by_name
            .iter()
            .filter(|(name, _)| !name.ends_with("Bot") && !name.ends_with("_bot"))
            .map(|(_, e)| e.address.clone())
            .collect()
    }

    /// `"<duration> ago"`, or the literal string `"never"`.
    pub fn last_seen_human(&self, address: &str) -> String {
        let last_seen = self
            .name_by_address
            .get(address)
            .and_then(|name| self.by_name.get(name))
            .and_then(|e| e.last_seen);

        match last_seen {
            Some(ls) => {
                let elapsed = Utc::now().signed_duration_since(ls);
                format!("{} ago", format_duration(elapsed))
            }
            None => "never".to_string(),
        }
    }
}

/// Render a `chrono::Duration` as `H:MM:SS` (unpadded hours) with an
/// optional `.ffffff` microsecond suffix.
fn format_duration(d: chrono::Duration) -> String {
    let total_seconds = d.num_seconds().max(0);
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    let micros = (d.num_microseconds().unwrap_or(0) - total_seconds * 1_000_000).max(0);

    if micros > 0 {
        format!("{}:{:02}:{:02}.{:06}", hours, minutes, seconds, micros)
    } else {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    }
}

static ADDRESS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9]{52}$").unwrap());

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_address(seed: char) -> String {
        std::iter::repeat(seed).take(52).collect()
    }

    #[test]
    fn insert_and_lookup_is_bijective() {
        let mut book = AddressBook::new();
        let addr = valid_address('a');
        book.insert("alice", &addr).unwrap();

        assert_eq!(book.lookup_by_name("alice").as_deref(), Some(addr.as_str()));
        assert_eq!(book.lookup_by_address(&addr).as_deref(), Some("alice"));
    }

    #[test]
    fn insert_rejects_invalid_address() {
        let mut book = AddressBook::new();
        assert!(matches!(
            book.insert("alice", "too-short"),
            Err(EngineError::InvalidAddress(_))
        ));
    }

    #[test]
    fn insert_rejects_duplicate_name_or_address() {
        let mut book = AddressBook::new();
        let addr = valid_address('a');
        book.insert("alice", &addr).unwrap();

        assert!(matches!(
            book.insert("alice", &valid_address('b')),
            Err(EngineError::Duplicate)
        ));
        assert!(matches!(
            book.insert("alice2", &addr),
            Err(EngineError::Duplicate)
        ));
    }

    #[test]
    fn remove_drops_both_indexes() {
        let mut book = AddressBook::new();
        let addr = valid_address('a');
        book.insert("alice", &addr).unwrap();
        book.remove("alice").unwrap();

        assert_eq!(book.lookup_by_name("alice"), None);
        assert_eq!(book.lookup_by_address(&addr), None);
    }

    #[test]
    fn online_transition_sets_last_seen() {
        let mut book = AddressBook::new();
        let addr = valid_address('a');
        book.insert("alice", &addr).unwrap();

        assert!(!book.is_online(&addr));
        book.set_online(&addr);
        assert!(book.is_online(&addr));
        assert!(book.last_seen_human(&addr).starts_with("0:00:0"));
    }

    #[test]
    fn offline_preserves_last_seen() {
        let mut book = AddressBook::new();
        let addr = valid_address('a');
        book.insert("alice", &addr).unwrap();
        book.set_online(&addr);
        book.set_offline(&addr);

        assert!(!book.is_online(&addr));
        assert_ne!(book.last_seen_human(&addr), "never");
    }

    #[test]
    fn humans_excludes_bot_suffixes() {
        let mut book = AddressBook::new();
        book.insert("alice", &valid_address('a')).unwrap();
        book.insert("helperBot", &valid_address('b')).unwrap();
        book.insert("helper_bot", &valid_address('c')).unwrap();

        let humans = book.humans();
        assert_eq!(humans.len(), 1);
        assert_eq!(humans[0], valid_address('a'));
    }

    #[test]
    fn is_valid_address_matches_base32_identity_format() {
        assert!(AddressBook::is_valid_address(&valid_address('a')));
        assert!(!AddressBook::is_valid_address("short"));
        assert!(!AddressBook::is_valid_address(&format!(
            "{}!",
            valid_address('a')
        )));
    }
}
