use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::certificates::entry::KeyStoreEntry;
use crate::certificates::error::KeyStoresResult;
use crate::certificates::key_stores::KeyStores;
use crate::certificates::pkcs11::{Pkcs11Configuration, Pkcs11Driver};

// the ClientCertificatesOptions struct holds which certificate to present
#[derive(Clone, Default)]
pub struct ClientCertificatesOptions {
    pub use_certificate: bool,
    pub pkcs12_file: Option<PathBuf>,
    pub pkcs12_password: String,
    pub pkcs12_index: usize,
    /// Address PKCS#11 tokens by their position in the slot list instead of the slot id.
    pub pkcs11_use_slot_list_index: bool,
}

impl ClientCertificatesOptions {
    /// Loads the configured PKCS#12 file and activates the selected certificate.
    ///
    /// Returns `Ok(false)` when nothing was activated: certificates disabled, no
    /// file, an index out of range, or a password that does not unlock the key.
    pub fn apply(&self, key_stores: &KeyStores) -> KeyStoresResult<bool> {
        if !self.use_certificate {
            return Ok(false);
        }
        let Some(path) = self.pkcs12_file.as_deref() else {
            return Ok(false);
        };

        let entry = key_stores.add_pkcs12_key_store(path, &self.pkcs12_password)?;
        let Some(certificate) = entry.certificate(self.pkcs12_index) else {
            warn!(
                "Key store '{}' has no certificate at index {} ({} available)",
                entry.name(),
                self.pkcs12_index,
                entry.len()
            );
            return Ok(false);
        };
        if !certificate.unlock(&self.pkcs12_password) {
            warn!("Could not unlock certificate {certificate}");
            return Ok(false);
        }
        info!("Using client certificate {certificate}");
        key_stores.set_active_certificate(Some(certificate));
        Ok(true)
    }

    pub fn pkcs11_configuration(&self, driver: &Pkcs11Driver) -> KeyStoresResult<Pkcs11Configuration> {
        driver.configuration(self.pkcs11_use_slot_list_index)
    }

    /// Opens the token behind `driver` with `pin` and adds it to `key_stores`.
    pub fn add_pkcs11_key_store(
        &self,
        key_stores: &KeyStores,
        driver: &Pkcs11Driver,
        pin: &str,
    ) -> KeyStoresResult<Arc<KeyStoreEntry>> {
        key_stores.add_pkcs11_key_store(&self.pkcs11_configuration(driver)?, pin)
    }
}

impl fmt::Debug for ClientCertificatesOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCertificatesOptions")
            .field("use_certificate", &self.use_certificate)
            .field("pkcs12_file", &self.pkcs12_file)
            .field("pkcs12_password", &"***")
            .field("pkcs12_index", &self.pkcs12_index)
            .field("pkcs11_use_slot_list_index", &self.pkcs11_use_slot_list_index)
            .finish()
    }
}
