//! Salted-hash credential store with constant-time validation.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::bail;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// One stored credential. Only the salted hash survives initialization;
/// plaintext never leaves this module.
struct CredentialRecord {
    name: String,
    hash: [u8; 32],
    created_at: u64,
    last_used: AtomicU64,
    use_count: AtomicU64,
}

/// Validates client API keys in constant time.
pub struct CredentialStore {
    salt: [u8; 16],
    records: Vec<CredentialRecord>,
}

impl CredentialStore {
    /// Build the store from the configured client keys.
    ///
    /// Placeholder-looking keys are a configuration error: common literal
    /// prefixes and low-entropy values are rejected at startup.
    pub fn new(keys: &[SecretString]) -> anyhow::Result<Self> {
        if keys.is_empty() {
            bail!("no client API keys configured");
        }

        let salt: [u8; 16] = rand::rng().random();
        let now = unix_now();

        let mut records = Vec::with_capacity(keys.len());

        for (index, key) in keys.iter().enumerate() {
            let key = key.expose_secret();

            if let Some(reason) = placeholder_reason(key) {
                bail!(
                    "client key {} ({}) looks like a placeholder: {reason}",
                    index + 1,
                    gateway::scrub::redact_key(key)
                );
            }

            records.push(CredentialRecord {
                name: format!("client-{}", index + 1),
                hash: salted_hash(&salt, key),
                created_at: now,
                last_used: AtomicU64::new(0),
                use_count: AtomicU64::new(0),
            });
        }

        Ok(Self { salt, records })
    }

    /// Whether the presented key matches any stored credential.
    ///
    /// Hashing equalizes lengths, so every comparison inspects the same
    /// number of bytes; a miss costs the same as a hit.
    pub fn validate(&self, presented: &str) -> bool {
        let presented_hash = salted_hash(&self.salt, presented);

        let mut matched = false;

        for record in &self.records {
            if record.hash.ct_eq(&presented_hash).into() {
                record.last_used.store(unix_now(), Ordering::Relaxed);
                record.use_count.fetch_add(1, Ordering::Relaxed);
                matched = true;
            }
        }

        matched
    }

    /// Usage counters per credential name, for the audit surface.
    pub fn usage(&self) -> HashMap<String, u64> {
        self.records
            .iter()
            .map(|record| (record.name.clone(), record.use_count.load(Ordering::Relaxed)))
            .collect()
    }

    /// Creation timestamps per credential name.
    pub fn created_at(&self) -> HashMap<String, u64> {
        self.records
            .iter()
            .map(|record| (record.name.clone(), record.created_at))
            .collect()
    }
}

fn salted_hash(salt: &[u8; 16], key: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(key.as_bytes());
    hasher.finalize().into()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn placeholder_reason(key: &str) -> Option<&'static str> {
    let lowered = key.to_ascii_lowercase();

    if lowered.starts_with("test") {
        return Some("starts with 'test'");
    }

    if lowered.starts_with("example") {
        return Some("starts with 'example'");
    }

    if lowered.starts_with("your-key") {
        return Some("starts with 'your-key'");
    }

    if key.len() >= 16 && shannon_entropy(key) < 3.0 {
        return Some("entropy too low for a real credential");
    }

    None
}

fn shannon_entropy(value: &str) -> f64 {
    if value.is_empty() {
        return 0.0;
    }

    let mut counts: HashMap<char, u32> = HashMap::new();
    for c in value.chars() {
        *counts.entry(c).or_insert(0) += 1;
    }

    let len = value.chars().count() as f64;

    counts
        .values()
        .map(|&count| {
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    #[test]
    fn validates_the_configured_key() {
        let store = CredentialStore::new(&[secret("kJ8mN2pQ9rS4tU7vW1xY3zA6bC0dE5fG")]).unwrap();

        assert!(store.validate("kJ8mN2pQ9rS4tU7vW1xY3zA6bC0dE5fG"));
        assert!(!store.validate("kJ8mN2pQ9rS4tU7vW1xY3zA6bC0dE5fH"));
        assert!(!store.validate(""));
        assert!(!store.validate("short"));
    }

    #[test]
    fn rejects_placeholder_keys_at_startup() {
        for key in [
            "test-key-1234567890",
            "example-key-abcdef",
            "your-key-here-12345",
            "aaaaaaaaaaaaaaaaaaaaaaaa",
        ] {
            assert!(CredentialStore::new(&[secret(key)]).is_err(), "accepted: {key}");
        }
    }

    #[test]
    fn accepts_high_entropy_keys() {
        assert!(CredentialStore::new(&[secret("fR7hT2kM9nP4qS6uV1wX8yZ3aB5cD0eJ")]).is_ok());
    }

    #[test]
    fn counts_successful_validations() {
        let store = CredentialStore::new(&[secret("fR7hT2kM9nP4qS6uV1wX8yZ3aB5cD0eJ")]).unwrap();

        store.validate("fR7hT2kM9nP4qS6uV1wX8yZ3aB5cD0eJ");
        store.validate("fR7hT2kM9nP4qS6uV1wX8yZ3aB5cD0eJ");
        store.validate("wrong");

        assert_eq!(store.usage().get("client-1"), Some(&2));
    }

    #[test]
    fn entropy_distinguishes_repeated_from_random() {
        assert!(shannon_entropy("aaaaaaaaaaaaaaaa") < 1.0);
        assert!(shannon_entropy("fR7hT2kM9nP4qS6u") > 3.0);
    }
}
