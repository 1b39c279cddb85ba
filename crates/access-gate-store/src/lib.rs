#![warn(missing_docs)]
//! # access-gate-store
//!
//! ## Purpose
//! Persists the trusted endpoint across launches.
//!
//! ## Responsibilities
//! - Define the confidential [`CredentialStore`] used for the verification
//!   token, backed by the OS keyring.
//! - Define the plain [`EndpointCache`] used for the redirect URL, backed by a
//!   JSON preferences file.
//! - Provide deterministic in-memory backends for tests and headless runs.
//!
//! ## Data flow
//! Gate validates a control response -> `EndpointCache::save_url` +
//! `CredentialStore::save` -> next launch reads both on the fast path.
//!
//! ## Ownership and lifetimes
//! Values cross the trait boundary as owned `String`s; backends keep no
//! borrowed state.
//!
//! ## Error model
//! [`CredentialError`] distinguishes a missing record from a platform failure.
//! [`CacheError`] covers I/O and encoding. Neither layer validates values.
//!
//! ## Security and privacy notes
//! Only the credential store is confidential. Backend errors are reported
//! without the stored value.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use keyring::credential::{CredentialBuilder, CredentialPersistence};
use thiserror::Error;
use tracing::debug;

/// Confidential key-value storage for small secrets.
pub trait CredentialStore: Send + Sync {
    /// Stores `value` under `key`.
    ///
    /// Implementations insert when no record exists and update in place
    /// otherwise.
    ///
    /// # Errors
    /// Returns [`CredentialError::Write`] when the platform rejects the write.
    fn save(&self, key: &str, value: &str) -> Result<(), CredentialError>;

    /// Fetches the value stored under `key`.
    ///
    /// # Errors
    /// Returns [`CredentialError::NotFound`] for a missing key and
    /// [`CredentialError::Read`] for platform failures.
    fn fetch(&self, key: &str) -> Result<String, CredentialError>;
}

/// Plain (non-confidential) storage for the trusted redirect URL.
pub trait EndpointCache: Send + Sync {
    /// Stores `url` under `key` without validation.
    ///
    /// # Errors
    /// Returns [`CacheError`] when the backing store cannot be written.
    fn save_url(&self, key: &str, url: &str) -> Result<(), CacheError>;

    /// Loads the URL stored under `key`, if any.
    ///
    /// # Errors
    /// Returns [`CacheError`] when the backing store cannot be read.
    fn load_url(&self, key: &str) -> Result<Option<String>, CacheError>;
}

/// Credential store backed by the OS keyring (Keychain, Credential Manager,
/// Secret Service).
///
/// Writes are refused when the selected keyring backend cannot keep a record
/// beyond the entry or process that wrote it.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service: String,
    builder: Arc<CredentialBuilder>,
}

impl KeyringCredentialStore {
    /// Creates a store scoped to `service` on the platform keyring.
    pub fn new(service: impl Into<String>) -> Self {
        Self::with_builder(service, keyring::default::default_credential_builder())
    }

    /// Creates a store scoped to `service` on an explicit keyring backend.
    pub fn with_builder(service: impl Into<String>, builder: Box<CredentialBuilder>) -> Self {
        Self {
            service: service.into(),
            builder: Arc::from(builder),
        }
    }

    /// Returns the keyring service name.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Whether stored records outlive the current process.
    pub fn persists_across_launches(&self) -> bool {
        matches!(
            self.builder.persistence(),
            CredentialPersistence::UntilReboot | CredentialPersistence::UntilDelete
        )
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, keyring::Error> {
        let credential = self.builder.build(None, &self.service, key)?;
        Ok(keyring::Entry::new_with_credential(credential))
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        if !self.persists_across_launches() {
            return Err(CredentialError::Write(format!(
                "keyring backend {:?} does not persist records",
                self.builder
            )));
        }

        let entry = self
            .entry(key)
            .map_err(|error| CredentialError::Write(format!("keyring entry: {error}")))?;

        match entry.get_password() {
            Ok(_) => {
                debug!(key, "updating existing keyring record");
            }
            Err(keyring::Error::NoEntry) => {
                debug!(key, "inserting new keyring record");
            }
            Err(error) => return Err(lookup_error(error)),
        }

        // The keyring backends modify an existing item in place and create
        // one otherwise, so one call covers both branches above.
        entry
            .set_password(value)
            .map_err(|error| CredentialError::Write(format!("keyring write: {error}")))
    }

    fn fetch(&self, key: &str) -> Result<String, CredentialError> {
        let entry = self
            .entry(key)
            .map_err(|error| CredentialError::Read(format!("keyring entry: {error}")))?;

        entry.get_password().map_err(|error| fetch_error(key, error))
    }
}

fn lookup_error(error: keyring::Error) -> CredentialError {
    CredentialError::Write(format!("keyring lookup: {error}"))
}

fn fetch_error(key: &str, error: keyring::Error) -> CredentialError {
    match error {
        keyring::Error::NoEntry => CredentialError::NotFound(key.to_string()),
        error => CredentialError::Read(format!("keyring read: {error}")),
    }
}

/// Deterministic in-memory credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    records: Mutex<HashMap<String, String>>,
    inserts: AtomicU32,
    updates: AtomicU32,
    refuse_writes: AtomicBool,
    refuse_reads: AtomicBool,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with one record.
    pub fn with_record(key: impl Into<String>, value: impl Into<String>) -> Self {
        let store = Self::new();
        if let Ok(mut records) = store.records.lock() {
            records.insert(key.into(), value.into());
        }
        store
    }

    /// Makes subsequent writes fail with [`CredentialError::Write`].
    pub fn refuse_writes(&self, refuse: bool) {
        self.refuse_writes.store(refuse, Ordering::SeqCst);
    }

    /// Makes subsequent reads fail with [`CredentialError::Read`].
    pub fn refuse_reads(&self, refuse: bool) {
        self.refuse_reads.store(refuse, Ordering::SeqCst);
    }

    /// Number of writes that created a new record.
    pub fn insert_count(&self) -> u32 {
        self.inserts.load(Ordering::SeqCst)
    }

    /// Number of writes that replaced an existing record.
    pub fn update_count(&self) -> u32 {
        self.updates.load(Ordering::SeqCst)
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    /// Returns `true` when no record is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn save(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        if self.refuse_writes.load(Ordering::SeqCst) {
            return Err(CredentialError::Write("writes refused".to_string()));
        }

        let mut records = self
            .records
            .lock()
            .map_err(|_| CredentialError::Write("credential lock poisoned".to_string()))?;

        match records.get_mut(key) {
            Some(existing) => {
                *existing = value.to_string();
                self.updates.fetch_add(1, Ordering::SeqCst);
            }
            None => {
                records.insert(key.to_string(), value.to_string());
                self.inserts.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    fn fetch(&self, key: &str) -> Result<String, CredentialError> {
        if self.refuse_reads.load(Ordering::SeqCst) {
            return Err(CredentialError::Read("reads refused".to_string()));
        }

        let records = self
            .records
            .lock()
            .map_err(|_| CredentialError::Read("credential lock poisoned".to_string()))?;
        records
            .get(key)
            .cloned()
            .ok_or_else(|| CredentialError::NotFound(key.to_string()))
    }
}

/// Endpoint cache persisted as a flat JSON object of string values.
#[derive(Debug)]
pub struct JsonFileEndpointCache {
    path: PathBuf,
    guard: Mutex<()>,
}

impl JsonFileEndpointCache {
    /// Creates a cache stored at `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }

    /// Returns the backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, CacheError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(error) => {
                return Err(CacheError::Io(format!(
                    "read {}: {error}",
                    self.path.display()
                )));
            }
        };

        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&raw).map_err(|error| CacheError::Serialization(error.to_string()))
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|error| {
                CacheError::Io(format!("create {}: {error}", parent.display()))
            })?;
        }

        let encoded = serde_json::to_string_pretty(map)
            .map_err(|error| CacheError::Serialization(error.to_string()))?;

        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, encoded)
            .map_err(|error| CacheError::Io(format!("write {}: {error}", staging.display())))?;
        fs::rename(&staging, &self.path)
            .map_err(|error| CacheError::Io(format!("rename {}: {error}", self.path.display())))
    }
}

impl EndpointCache for JsonFileEndpointCache {
    fn save_url(&self, key: &str, url: &str) -> Result<(), CacheError> {
        let _guard = self
            .guard
            .lock()
            .map_err(|_| CacheError::Io("cache lock poisoned".to_string()))?;
        let mut map = self.read_map()?;
        map.insert(key.to_string(), url.to_string());
        self.write_map(&map)
    }

    fn load_url(&self, key: &str) -> Result<Option<String>, CacheError> {
        let _guard = self
            .guard
            .lock()
            .map_err(|_| CacheError::Io("cache lock poisoned".to_string()))?;
        Ok(self.read_map()?.remove(key))
    }
}

/// Deterministic in-memory endpoint cache.
#[derive(Debug, Default)]
pub struct MemoryEndpointCache {
    entries: Mutex<HashMap<String, String>>,
    refuse_writes: AtomicBool,
}

impl MemoryEndpointCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cache pre-seeded with one entry.
    pub fn with_entry(key: impl Into<String>, url: impl Into<String>) -> Self {
        let cache = Self::new();
        if let Ok(mut entries) = cache.entries.lock() {
            entries.insert(key.into(), url.into());
        }
        cache
    }

    /// Makes subsequent writes fail with [`CacheError::Io`].
    pub fn refuse_writes(&self, refuse: bool) {
        self.refuse_writes.store(refuse, Ordering::SeqCst);
    }
}

impl EndpointCache for MemoryEndpointCache {
    fn save_url(&self, key: &str, url: &str) -> Result<(), CacheError> {
        if self.refuse_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Io("writes refused".to_string()));
        }
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::Io("cache lock poisoned".to_string()))?;
        entries.insert(key.to_string(), url.to_string());
        Ok(())
    }

    fn load_url(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| CacheError::Io("cache lock poisoned".to_string()))?;
        Ok(entries.get(key).cloned())
    }
}

/// Credential store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// Platform reported a non-success status on save.
    #[error("credential write failed: {0}")]
    Write(String),
    /// No record exists for the key.
    #[error("credential not found: {0}")]
    NotFound(String),
    /// Platform reported a non-success status on fetch.
    #[error("credential read failed: {0}")]
    Read(String),
}

/// Endpoint cache errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Filesystem failure.
    #[error("cache io failure: {0}")]
    Io(String),
    /// Stored document is not a JSON object of strings.
    #[error("cache encoding failure: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    //! Unit tests for keyring error mapping and in-memory backends.

    use super::*;

    #[test]
    fn keyring_missing_entry_maps_to_not_found() {
        assert_eq!(
            fetch_error("token", keyring::Error::NoEntry),
            CredentialError::NotFound("token".to_string())
        );
        assert!(matches!(
            fetch_error("token", keyring::Error::BadEncoding(vec![0xff])),
            CredentialError::Read(_)
        ));
    }

    #[test]
    fn keyring_lookup_failure_maps_to_write() {
        let error = keyring::Error::Invalid("user".to_string(), "too long".to_string());
        assert!(matches!(lookup_error(error), CredentialError::Write(_)));
    }

    #[test]
    fn entry_scoped_keyring_backend_refuses_writes() {
        let store = KeyringCredentialStore::with_builder(
            "access-gate",
            keyring::mock::default_credential_builder(),
        );
        assert!(!store.persists_across_launches());
        assert!(matches!(
            store.save("token", "value"),
            Err(CredentialError::Write(_))
        ));
        assert_eq!(
            store.fetch("token"),
            Err(CredentialError::NotFound("token".to_string()))
        );
    }

    #[test]
    fn memory_store_inserts_then_updates() {
        let store = MemoryCredentialStore::new();
        store.save("k", "one").expect("insert should work");
        store.save("k", "two").expect("update should work");
        assert_eq!(store.insert_count(), 1);
        assert_eq!(store.update_count(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.fetch("k").expect("value should exist"), "two");
    }

    #[test]
    fn memory_cache_refuses_writes_when_asked() {
        let cache = MemoryEndpointCache::new();
        cache.refuse_writes(true);
        assert!(cache.save_url("k", "https://a.test").is_err());
        assert_eq!(cache.load_url("k").expect("read should work"), None);
    }
}
