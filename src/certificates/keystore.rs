use std::fmt;
use std::path::Path;

use p12_keystore::error::Error as Pkcs12Error;
use p12_keystore::KeyStoreEntry as Pkcs12Content;

use crate::certificates::error::{KeyStoresError, KeyStoresResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyStoreType {
    Pkcs11,
    Pkcs12,
}

impl fmt::Display for KeyStoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStoreType::Pkcs11 => f.write_str("PKCS#11"),
            KeyStoreType::Pkcs12 => f.write_str("PKCS#12"),
        }
    }
}

/// DER certificate plus its printable description (subject, issuer, serial,
/// validity), the form display names are derived from.
#[derive(Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    description: String,
}

impl Certificate {
    pub fn from_der(der: Vec<u8>) -> KeyStoresResult<Self> {
        let description = {
            let (_, cert) = x509_parser::parse_x509_certificate(&der)
                .map_err(|e| KeyStoresError::InvalidCertificate(e.to_string()))?;
            format!(
                "[\n  Subject: {}\n  Issuer: {}\n  Serial: {}\n  Validity: [From: {}, To: {}]\n]",
                cert.subject(),
                cert.issuer(),
                cert.raw_serial_as_string(),
                cert.validity().not_before,
                cert.validity().not_after
            )
        };
        Ok(Self { der, description })
    }

    /// For providers that describe certificates themselves.
    pub fn with_description(der: Vec<u8>, description: &str) -> Self {
        Self {
            der,
            description: description.to_string(),
        }
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Value of the first `CN=` field of the description.
    pub fn common_name(&self) -> Option<&str> {
        let start = self.description.find("CN=")? + 3;
        let rest = &self.description[start..];
        let mut end = rest.len();
        let mut escaped = false;
        for (idx, ch) in rest.char_indices() {
            match ch {
                '\\' if !escaped => {
                    escaped = true;
                    continue;
                }
                ',' | '+' if !escaped => {
                    end = idx;
                    break;
                }
                '\n' | '\r' | ']' => {
                    end = idx;
                    break;
                }
                _ => {}
            }
            escaped = false;
        }
        let cn = rest[..end].trim();
        if cn.is_empty() {
            None
        } else {
            Some(cn)
        }
    }
}

impl fmt::Display for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("description", &self.description)
            .field("der_len", &self.der.len())
            .finish()
    }
}

/// PKCS#8 private key.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    pkcs8_der: Vec<u8>,
}

impl PrivateKey {
    pub fn from_pkcs8_der(pkcs8_der: Vec<u8>) -> Self {
        Self { pkcs8_der }
    }

    pub fn pkcs8_der(&self) -> &[u8] {
        &self.pkcs8_der
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(***)")
    }
}

/// Source of certificates and keys: a PKCS#12 file or a provider-backed token.
pub trait KeyStore: Send + Sync {
    fn aliases(&self) -> KeyStoresResult<Vec<String>>;

    fn is_key_entry(&self, alias: &str) -> KeyStoresResult<bool>;

    fn certificate(&self, alias: &str) -> KeyStoresResult<Option<Certificate>>;

    /// Leaf first.
    fn certificate_chain(&self, alias: &str) -> KeyStoresResult<Vec<Certificate>>;

    /// `Ok(None)` when there is no key for `alias` or `password` does not open it.
    fn key(&self, alias: &str, password: &str) -> KeyStoresResult<Option<PrivateKey>>;
}

struct Pkcs12Entry {
    alias: String,
    has_key: bool,
    chain: Vec<Certificate>,
}

fn parse_pkcs12(der: &[u8], password: &str) -> KeyStoresResult<p12_keystore::KeyStore> {
    p12_keystore::KeyStore::from_pkcs12(der, password).map_err(|e| match e {
        Pkcs12Error::MacError(_) | Pkcs12Error::UnpadError | Pkcs12Error::Pkcs5Error(_) => {
            KeyStoresError::WrongPassword
        }
        Pkcs12Error::DerError(_) | Pkcs12Error::InvalidVersion | Pkcs12Error::UnsupportedContentType => {
            KeyStoresError::InvalidKeyStore(e.to_string())
        }
        other => KeyStoresError::KeyStore(other.to_string()),
    })
}

/// Software key store read from a PKCS#12 (`.p12`/`.pfx`) file.
///
/// Both the legacy (RC2/3DES, SHA-1 MAC) and the PBES2 (AES, SHA-256 MAC)
/// encodings are read.
pub struct Pkcs12KeyStore {
    der: Vec<u8>,
    entries: Vec<Pkcs12Entry>,
}

impl Pkcs12KeyStore {
    pub fn open(path: &Path, password: &str) -> KeyStoresResult<Self> {
        let der = std::fs::read(path).map_err(|source| KeyStoresError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_der(der, password)
    }

    pub fn from_der(der: Vec<u8>, password: &str) -> KeyStoresResult<Self> {
        let store = parse_pkcs12(&der, password)?;

        let mut entries = Vec::new();
        for (alias, content) in store.entries() {
            let (has_key, certificates) = match content {
                Pkcs12Content::PrivateKeyChain(chain) => (true, chain.chain()),
                Pkcs12Content::Certificate(certificate) => (false, std::slice::from_ref(certificate)),
                Pkcs12Content::Secret(_) => continue,
            };
            let chain = certificates
                .iter()
                .map(|certificate| Certificate::from_der(certificate.as_der().to_vec()))
                .collect::<KeyStoresResult<Vec<_>>>()?;
            entries.push(Pkcs12Entry {
                alias: alias.clone(),
                has_key,
                chain,
            });
        }

        Ok(Self { der, entries })
    }

    fn entry(&self, alias: &str) -> Option<&Pkcs12Entry> {
        self.entries.iter().find(|e| e.alias == alias)
    }
}

impl KeyStore for Pkcs12KeyStore {
    fn aliases(&self) -> KeyStoresResult<Vec<String>> {
        Ok(self.entries.iter().map(|e| e.alias.clone()).collect())
    }

    fn is_key_entry(&self, alias: &str) -> KeyStoresResult<bool> {
        Ok(self.entry(alias).is_some_and(|e| e.has_key))
    }

    fn certificate(&self, alias: &str) -> KeyStoresResult<Option<Certificate>> {
        Ok(self.entry(alias).and_then(|e| e.chain.first().cloned()))
    }

    fn certificate_chain(&self, alias: &str) -> KeyStoresResult<Vec<Certificate>> {
        Ok(self.entry(alias).map(|e| e.chain.clone()).unwrap_or_default())
    }

    fn key(&self, alias: &str, password: &str) -> KeyStoresResult<Option<PrivateKey>> {
        if !self.entry(alias).is_some_and(|e| e.has_key) {
            return Ok(None);
        }
        let store = match parse_pkcs12(&self.der, password) {
            Ok(store) => store,
            Err(KeyStoresError::WrongPassword) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(match store.entry(alias) {
            Some(Pkcs12Content::PrivateKeyChain(chain)) => {
                Some(PrivateKey::from_pkcs8_der(chain.key().to_vec()))
            }
            _ => None,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn cert(description: &str) -> Certificate {
        Certificate::with_description(Vec::new(), description)
    }

    #[test]
    fn common_name_stops_at_next_field() {
        assert_eq!(cert("Subject: CN=Abc 123, O=Org").common_name(), Some("Abc 123"));
        assert_eq!(cert("[\n  Subject: CN=Abc 123\n  Issuer: CN=CA\n]").common_name(), Some("Abc 123"));
        assert_eq!(cert("Subject: O=Org, CN=Last]").common_name(), Some("Last"));
    }

    #[test]
    fn common_name_keeps_escaped_separators() {
        assert_eq!(cert("CN=Doe\\, John, O=Org").common_name(), Some("Doe\\, John"));
    }

    #[test]
    fn common_name_absent() {
        assert_eq!(cert("Subject: O=Org").common_name(), None);
        assert_eq!(cert("Subject: CN=, O=Org").common_name(), None);
    }

    #[test]
    fn private_key_debug_is_redacted() {
        let key = PrivateKey::from_pkcs8_der(b"secret".to_vec());
        assert_eq!(format!("{key:?}"), "PrivateKey(***)");
    }

    fn fixture(name: &str) -> Vec<u8> {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("src/tests/data").join(name);
        std::fs::read(path).unwrap()
    }

    #[test]
    fn reads_legacy_and_pbes2_stores() {
        for name in ["client-legacy.p12", "client-modern.p12"] {
            let store = Pkcs12KeyStore::from_der(fixture(name), "secret").unwrap();

            assert_eq!(store.aliases().unwrap(), vec!["Alias".to_string()], "{name}");
            assert!(store.is_key_entry("Alias").unwrap());
            let certificate = store.certificate("Alias").unwrap().unwrap();
            assert_eq!(certificate.common_name(), Some("Abc 123"), "{name}");
            assert_eq!(store.certificate_chain("Alias").unwrap().len(), 1);
            assert!(store.certificate("Missing").unwrap().is_none());
        }
    }

    #[test]
    fn key_opens_only_with_its_password() {
        for name in ["client-legacy.p12", "client-modern.p12"] {
            let store = Pkcs12KeyStore::from_der(fixture(name), "secret").unwrap();

            let key = store.key("Alias", "secret").unwrap().unwrap();
            assert!(!key.pkcs8_der().is_empty(), "{name}");
            assert!(store.key("Alias", "wrong").unwrap().is_none(), "{name}");
            assert!(store.key("Missing", "secret").unwrap().is_none());
        }
    }

    #[test]
    fn wrong_store_password_is_reported() {
        for name in ["client-legacy.p12", "client-modern.p12"] {
            assert!(
                matches!(
                    Pkcs12KeyStore::from_der(fixture(name), "wrong"),
                    Err(KeyStoresError::WrongPassword)
                ),
                "{name}"
            );
        }
    }

    #[test]
    fn invalid_pkcs12_is_rejected() {
        assert!(matches!(
            Pkcs12KeyStore::from_der(b"not a keystore".to_vec(), "pw"),
            Err(KeyStoresError::InvalidKeyStore(_))
        ));
    }

    #[test]
    fn missing_pkcs12_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Pkcs12KeyStore::open(&dir.path().join("missing.p12"), "pw"),
            Err(KeyStoresError::Read { .. })
        ));
    }
}
