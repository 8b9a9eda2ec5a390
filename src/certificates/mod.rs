//! Client certificates: key stores, their certificate entries, and the
//! identity the sender presents on TLS connections.

pub mod entry;
pub mod error;
pub mod key_manager;
pub mod key_stores;
pub mod keystore;
pub mod options;
pub mod pkcs11;

pub use entry::{display_name, CertificateEntry, KeyStoreEntry};
pub use error::{DriverCatalogError, KeyStoresError, KeyStoresResult};
pub use key_manager::{ClientIdentity, SingleAliasKeyManager};
pub use key_stores::KeyStores;
pub use keystore::{Certificate, KeyStore, KeyStoreType, Pkcs12KeyStore, PrivateKey};
pub use options::ClientCertificatesOptions;
pub use pkcs11::{Pkcs11Configuration, Pkcs11Driver, Pkcs11Drivers, Pkcs11Provider};
