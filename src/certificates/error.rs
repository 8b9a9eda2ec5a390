//! Error types for key stores and client certificates.

use std::path::PathBuf;

use thiserror::Error;

/// Failure loading or enumerating a key store.
#[derive(Debug, Error)]
pub enum KeyStoresError {
    /// The key store file could not be read.
    #[error("Failed to read key store '{}': {source}", path.display())]
    Read {
        /// Key store file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The key store content is not a valid key store.
    #[error("Invalid key store: {0}")]
    InvalidKeyStore(String),

    /// The key store password does not match its integrity check.
    #[error("Wrong key store password")]
    WrongPassword,

    /// The key store failed while its entries were enumerated or read.
    #[error("Key store error: {0}")]
    KeyStore(String),

    /// A certificate could not be parsed.
    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    /// PKCS#11 was requested but no provider is available.
    #[error("PKCS#11 is not available, no provider configured")]
    Pkcs11Unavailable,

    /// The PKCS#11 configuration is incomplete.
    #[error("Invalid PKCS#11 configuration: {0}")]
    InvalidPkcs11Configuration(String),
}

/// Result type for key store operations.
pub type KeyStoresResult<T> = Result<T, KeyStoresError>;

/// Failure persisting the PKCS#11 driver catalog.
#[derive(Debug, Error)]
pub enum DriverCatalogError {
    #[error("Failed to write driver catalog '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize driver catalog: {0}")]
    Serialize(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_error_names_the_file() {
        let err = KeyStoresError::Read {
            path: PathBuf::from("/tmp/client.p12"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.to_string().contains("/tmp/client.p12"));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn pkcs11_configuration_error_display() {
        let err = KeyStoresError::InvalidPkcs11Configuration("name is empty".to_string());
        assert_eq!(err.to_string(), "Invalid PKCS#11 configuration: name is empty");
    }
}
