use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::certificates::entry::{CertificateEntry, KeyStoreEntry};
use crate::certificates::error::{KeyStoresError, KeyStoresResult};
use crate::certificates::key_manager::ClientIdentity;
use crate::certificates::keystore::{KeyStoreType, Pkcs12KeyStore};
use crate::certificates::pkcs11::{Pkcs11Configuration, Pkcs11Provider};

pub type ActiveCertificateListener = Arc<dyn Fn(Option<&Arc<CertificateEntry>>) + Send + Sync>;

/// Loaded key stores and the certificate currently used for client authentication.
pub struct KeyStores {
    entries: RwLock<Vec<Arc<KeyStoreEntry>>>,
    active: RwLock<Option<Arc<CertificateEntry>>>,
    listeners: RwLock<Vec<ActiveCertificateListener>>,
    pkcs11: Option<Arc<dyn Pkcs11Provider>>,
}

impl Default for KeyStores {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStores {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            active: RwLock::new(None),
            listeners: RwLock::new(Vec::new()),
            pkcs11: None,
        }
    }

    pub fn with_pkcs11_provider(provider: Arc<dyn Pkcs11Provider>) -> Self {
        Self {
            pkcs11: Some(provider),
            ..Self::new()
        }
    }

    pub fn is_pkcs11_available(&self) -> bool {
        self.pkcs11.is_some()
    }

    /// Loads a PKCS#12 file, named after its file name.
    pub fn add_pkcs12_key_store(&self, path: &Path, password: &str) -> KeyStoresResult<Arc<KeyStoreEntry>> {
        let store = Pkcs12KeyStore::open(path, password)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let entry = KeyStoreEntry::new(KeyStoreType::Pkcs12, &name, Arc::new(store), password)?;
        info!("Loaded PKCS#12 key store '{name}' with {} certificates", entry.len());
        Ok(self.add_key_store(entry))
    }

    pub fn add_pkcs12_key_store_from_der(
        &self,
        name: &str,
        der: Vec<u8>,
        password: &str,
    ) -> KeyStoresResult<Arc<KeyStoreEntry>> {
        let store = Pkcs12KeyStore::from_der(der, password)?;
        let entry = KeyStoreEntry::new(KeyStoreType::Pkcs12, name, Arc::new(store), password)?;
        Ok(self.add_key_store(entry))
    }

    pub fn add_pkcs11_key_store(
        &self,
        configuration: &Pkcs11Configuration,
        pin: &str,
    ) -> KeyStoresResult<Arc<KeyStoreEntry>> {
        let provider = self.pkcs11.as_ref().ok_or(KeyStoresError::Pkcs11Unavailable)?;
        let store = provider.open(configuration, pin)?;
        let entry = KeyStoreEntry::new(KeyStoreType::Pkcs11, configuration.name(), store, pin)?;
        info!(
            "Loaded PKCS#11 key store '{}' with {} certificates",
            configuration.name(),
            entry.len()
        );
        Ok(self.add_key_store(entry))
    }

    pub fn add_key_store(&self, entry: Arc<KeyStoreEntry>) -> Arc<KeyStoreEntry> {
        self.entries.write().push(Arc::clone(&entry));
        entry
    }

    /// Removes the key store at `index`, deactivating its certificate if active.
    pub fn remove_key_store(&self, index: usize) -> Option<Arc<KeyStoreEntry>> {
        let removed = {
            let mut entries = self.entries.write();
            (index < entries.len()).then(|| entries.remove(index))
        }?;

        let active_in_removed = self
            .active_certificate()
            .and_then(|cert| cert.parent())
            .is_some_and(|parent| Arc::ptr_eq(&parent, &removed));
        if active_in_removed {
            self.set_active_certificate(None);
        }
        debug!("Removed key store '{}'", removed.name());
        Some(removed)
    }

    pub fn key_stores(&self) -> Vec<Arc<KeyStoreEntry>> {
        self.entries.read().clone()
    }

    pub fn key_store(&self, index: usize) -> Option<Arc<KeyStoreEntry>> {
        self.entries.read().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn active_certificate(&self) -> Option<Arc<CertificateEntry>> {
        self.active.read().clone()
    }

    /// Identity of the active certificate, if one is set and unlocked.
    pub fn active_identity(&self) -> Option<ClientIdentity> {
        self.active.read().as_ref().and_then(|cert| cert.identity())
    }

    /// Setting the already active entry is a no-op. Any other change invalidates
    /// the previous entry's TLS session and then notifies listeners in order.
    pub fn set_active_certificate(&self, certificate: Option<Arc<CertificateEntry>>) {
        let previous = {
            let mut active = self.active.write();
            let unchanged = match (active.as_ref(), certificate.as_ref()) {
                (Some(current), Some(new)) => Arc::ptr_eq(current, new),
                (None, None) => true,
                _ => false,
            };
            if unchanged {
                return;
            }
            std::mem::replace(&mut *active, certificate.clone())
        };

        if let Some(previous) = previous {
            previous.invalidate_session();
        }
        match certificate.as_ref() {
            Some(cert) => info!("Active client certificate: {cert}"),
            None => info!("Active client certificate cleared"),
        }

        let listeners = self.listeners.read().clone();
        for listener in listeners.iter() {
            listener(certificate.as_ref());
        }
    }

    pub fn add_change_listener(&self, listener: ActiveCertificateListener) {
        self.listeners.write().push(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificates::keystore::fake::MemoryKeyStore;
    use crate::certificates::keystore::KeyStore;
    use parking_lot::Mutex;

    fn key_store(stores: &KeyStores, name: &str, aliases: &[&str]) -> Arc<KeyStoreEntry> {
        let mut memory = MemoryKeyStore::default();
        for alias in aliases {
            memory = memory.with_key(alias, &format!("CN={alias}"), "pw");
        }
        let entry = KeyStoreEntry::new(KeyStoreType::Pkcs12, name, Arc::new(memory), "pw").unwrap();
        stores.add_key_store(entry)
    }

    fn recorder(stores: &KeyStores) -> Arc<Mutex<Vec<Option<String>>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        stores.add_change_listener(Arc::new(move |cert: Option<&Arc<CertificateEntry>>| {
            sink.lock().push(cert.map(|c| c.name().to_string()));
        }));
        events
    }

    #[test]
    fn setting_same_certificate_fires_nothing() {
        let stores = KeyStores::new();
        let store = key_store(&stores, "a.p12", &["one"]);
        let events = recorder(&stores);
        let cert = store.certificate(0).unwrap();

        stores.set_active_certificate(Some(Arc::clone(&cert)));
        stores.set_active_certificate(Some(Arc::clone(&cert)));
        stores.set_active_certificate(None);
        stores.set_active_certificate(None);

        assert_eq!(*events.lock(), vec![Some("one [one]".to_string()), None]);
    }

    #[test]
    fn switching_invalidates_previous_session_before_listeners() {
        let stores = KeyStores::new();
        let store = key_store(&stores, "a.p12", &["one", "two"]);
        let first = store.certificate(0).unwrap();
        let second = store.certificate(1).unwrap();
        assert!(first.unlock("pw"));
        stores.set_active_certificate(Some(Arc::clone(&first)));

        let observed = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&observed);
        let watched = Arc::clone(&first);
        stores.add_change_listener(Arc::new(move |_: Option<&Arc<CertificateEntry>>| {
            *sink.lock() = Some(watched.session());
        }));

        stores.set_active_certificate(Some(second));
        assert_eq!(*observed.lock(), Some(1));
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let stores = KeyStores::new();
        let store = key_store(&stores, "a.p12", &["one"]);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let sink = Arc::clone(&order);
            stores.add_change_listener(Arc::new(move |_: Option<&Arc<CertificateEntry>>| {
                sink.lock().push(i);
            }));
        }
        stores.set_active_certificate(store.certificate(0));
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn active_identity_requires_unlock() {
        let stores = KeyStores::new();
        let store = key_store(&stores, "a.p12", &["one"]);
        let cert = store.certificate(0).unwrap();
        stores.set_active_certificate(Some(Arc::clone(&cert)));
        assert!(stores.active_identity().is_none());
        assert!(cert.unlock("pw"));
        assert_eq!(stores.active_identity().unwrap().alias(), "one");
    }

    #[test]
    fn removing_store_of_active_certificate_clears_it() {
        let stores = KeyStores::new();
        let first = key_store(&stores, "a.p12", &["one"]);
        let second = key_store(&stores, "b.p12", &["two"]);
        stores.set_active_certificate(second.certificate(0));

        let removed = stores.remove_key_store(0).unwrap();
        assert!(Arc::ptr_eq(&removed, &first));
        assert!(stores.active_certificate().is_some());

        stores.remove_key_store(0).unwrap();
        assert!(stores.active_certificate().is_none());
        assert!(stores.is_empty());
        assert!(stores.remove_key_store(0).is_none());
    }

    #[test]
    fn pkcs11_requires_a_provider() {
        let stores = KeyStores::new();
        let config = Pkcs11Configuration::builder()
            .name("Token")
            .library("lib.so")
            .build()
            .unwrap();
        assert!(matches!(
            stores.add_pkcs11_key_store(&config, "1234"),
            Err(KeyStoresError::Pkcs11Unavailable)
        ));
    }

    struct MemoryProvider;

    impl Pkcs11Provider for MemoryProvider {
        fn open(&self, configuration: &Pkcs11Configuration, pin: &str) -> KeyStoresResult<Arc<dyn KeyStore>> {
            if pin != "1234" {
                return Err(KeyStoresError::WrongPassword);
            }
            let store = MemoryKeyStore::default().with_key(configuration.name(), "CN=Token User", pin);
            Ok(Arc::new(store))
        }
    }

    #[test]
    fn pkcs11_store_is_loaded_through_provider() {
        let stores = KeyStores::with_pkcs11_provider(Arc::new(MemoryProvider));
        let config = Pkcs11Configuration::builder()
            .name("card")
            .library("lib.so")
            .slot_list_index(0)
            .build()
            .unwrap();

        assert!(matches!(
            stores.add_pkcs11_key_store(&config, "0000"),
            Err(KeyStoresError::WrongPassword)
        ));
        assert!(stores.is_empty());

        let entry = stores.add_pkcs11_key_store(&config, "1234").unwrap();
        assert_eq!(entry.store_type(), KeyStoreType::Pkcs11);
        assert_eq!(entry.certificate(0).unwrap().name(), "Token User [card]");
        assert_eq!(stores.len(), 1);
    }

    #[test]
    fn pkcs12_files_load_and_unlock() {
        for name in ["client-legacy.p12", "client-modern.p12"] {
            let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
                .join("src/tests/data")
                .join(name);
            let stores = KeyStores::new();

            let entry = stores.add_pkcs12_key_store(&path, "secret").unwrap();

            assert_eq!(entry.name(), name);
            assert_eq!(entry.len(), 1);
            let certificate = entry.certificate(0).unwrap();
            assert_eq!(certificate.name(), "Abc 123 [Alias]");
            assert_eq!(certificate.alias(), "Alias");
            assert!(!certificate.unlock("wrong"));
            assert!(certificate.identity().is_none());
            assert!(certificate.unlock("secret"));
            let identity = certificate.identity().unwrap();
            assert!(identity.to_reqwest().is_ok(), "{name}");
        }
    }

    #[test]
    fn missing_pkcs12_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let stores = KeyStores::new();
        let result = stores.add_pkcs12_key_store(&dir.path().join("absent.p12"), "pw");
        assert!(matches!(result, Err(KeyStoresError::Read { .. })));
        assert!(stores.is_empty());
    }
}
