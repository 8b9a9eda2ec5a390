use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::certificates::error::{KeyStoresError, KeyStoresResult};
use crate::certificates::key_manager::{ClientIdentity, SingleAliasKeyManager};
use crate::certificates::keystore::{Certificate, KeyStore, KeyStoreType};

static NEXT_CERTIFICATE_ID: AtomicU64 = AtomicU64::new(1);

/// A loaded key store and the certificates of its key entries, in alias order.
pub struct KeyStoreEntry {
    store_type: KeyStoreType,
    name: String,
    store: Arc<dyn KeyStore>,
    password: String,
    key_entries: Vec<(String, Certificate)>,
    certificates: Vec<OnceLock<Arc<CertificateEntry>>>,
    this: Weak<KeyStoreEntry>,
}

impl KeyStoreEntry {
    /// Walks every alias up front; any key store error fails the whole load.
    pub fn new(
        store_type: KeyStoreType,
        name: &str,
        store: Arc<dyn KeyStore>,
        password: &str,
    ) -> KeyStoresResult<Arc<Self>> {
        let mut key_entries = Vec::new();
        for alias in store.aliases()? {
            if !store.is_key_entry(&alias)? {
                continue;
            }
            let certificate = store.certificate(&alias)?.ok_or_else(|| {
                KeyStoresError::KeyStore(format!("no certificate for key entry '{alias}'"))
            })?;
            key_entries.push((alias, certificate));
        }
        debug!(
            "Loaded {store_type} key store '{name}' with {} key entries",
            key_entries.len()
        );

        let certificates = (0..key_entries.len()).map(|_| OnceLock::new()).collect();
        Ok(Arc::new_cyclic(|this| Self {
            store_type,
            name: name.to_string(),
            store,
            password: password.to_string(),
            key_entries,
            certificates,
            this: this.clone(),
        }))
    }

    pub fn store_type(&self) -> KeyStoreType {
        self.store_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn len(&self) -> usize {
        self.key_entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key_entries.is_empty()
    }

    /// Built on first access and then always the same instance.
    pub fn certificate(&self, index: usize) -> Option<Arc<CertificateEntry>> {
        let (alias, certificate) = self.key_entries.get(index)?;
        let slot = self.certificates.get(index)?;
        Some(Arc::clone(slot.get_or_init(|| {
            Arc::new(CertificateEntry::new(
                self.this.clone(),
                Arc::clone(&self.store),
                certificate.clone(),
                alias,
                index,
            ))
        })))
    }

    pub fn certificates(&self) -> Vec<Arc<CertificateEntry>> {
        (0..self.len()).filter_map(|i| self.certificate(i)).collect()
    }
}

impl fmt::Debug for KeyStoreEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStoreEntry")
            .field("type", &self.store_type)
            .field("name", &self.name)
            .field("key_entries", &self.key_entries.len())
            .finish_non_exhaustive()
    }
}

struct Unlocked {
    key_manager: SingleAliasKeyManager,
    chain_pem: Arc<Vec<u8>>,
    key_pem: Arc<Vec<u8>>,
}

/// One key entry of a key store. Unlocking binds its private key and makes the
/// certificate usable as a TLS client identity.
pub struct CertificateEntry {
    id: u64,
    parent: Weak<KeyStoreEntry>,
    store: Arc<dyn KeyStore>,
    certificate: Certificate,
    alias: String,
    index: usize,
    name: String,
    unlocked: Mutex<Option<Unlocked>>,
    session: AtomicU64,
}

impl CertificateEntry {
    fn new(
        parent: Weak<KeyStoreEntry>,
        store: Arc<dyn KeyStore>,
        certificate: Certificate,
        alias: &str,
        index: usize,
    ) -> Self {
        let name = display_name(&certificate, alias);
        Self {
            id: NEXT_CERTIFICATE_ID.fetch_add(1, Ordering::Relaxed),
            parent,
            store,
            certificate,
            alias: alias.to_string(),
            index,
            name,
            unlocked: Mutex::new(None),
            session: AtomicU64::new(0),
        }
    }

    pub fn parent(&self) -> Option<Arc<KeyStoreEntry>> {
        self.parent.upgrade()
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `true` once the private key was retrieved with `password`; a failed
    /// attempt leaves the entry as it was.
    pub fn unlock(&self, password: &str) -> bool {
        match self.store.key(&self.alias, password) {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!("No private key for '{}' with the given password", self.alias);
                return false;
            }
            Err(e) => {
                warn!("Failed to retrieve private key for '{}': {e}", self.alias);
                return false;
            }
        }

        let key_manager = SingleAliasKeyManager::new(Arc::clone(&self.store), &self.alias, password);
        let Some((chain_pem, key_pem)) = key_manager.identity_material() else {
            warn!("Certificate chain for '{}' is not available", self.alias);
            return false;
        };
        *self.unlocked.lock() = Some(Unlocked {
            key_manager,
            chain_pem: Arc::new(chain_pem),
            key_pem: Arc::new(key_pem),
        });
        true
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.lock().is_some()
    }

    pub fn key_manager(&self) -> Option<SingleAliasKeyManager> {
        self.unlocked.lock().as_ref().map(|u| u.key_manager.clone())
    }

    /// Identity for new TLS connections, once unlocked.
    pub fn identity(&self) -> Option<ClientIdentity> {
        let unlocked = self.unlocked.lock();
        let unlocked = unlocked.as_ref()?;
        Some(ClientIdentity::new(
            self.id,
            self.session.load(Ordering::Acquire),
            &self.alias,
            Arc::clone(&unlocked.chain_pem),
            Arc::clone(&unlocked.key_pem),
        ))
    }

    /// Drops established TLS sessions of this certificate; nothing to do while locked.
    pub fn invalidate_session(&self) {
        if self.is_unlocked() {
            self.session.fetch_add(1, Ordering::AcqRel);
            debug!("Invalidated TLS session of '{}'", self.name);
        }
    }

    pub fn session(&self) -> u64 {
        self.session.load(Ordering::Acquire)
    }
}

impl fmt::Display for CertificateEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Debug for CertificateEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateEntry")
            .field("name", &self.name)
            .field("alias", &self.alias)
            .field("index", &self.index)
            .field("unlocked", &self.is_unlocked())
            .finish_non_exhaustive()
    }
}

/// `"<CN> [<alias>]"`, or just the alias when the certificate has no CN.
pub fn display_name(certificate: &Certificate, alias: &str) -> String {
    match certificate.common_name() {
        Some(cn) => format!("{cn} [{alias}]"),
        None => alias.to_string(),
    }
}
