//! Certificate loading and SNI selection.
//!
//! # Responsibilities
//! - Read PEM certificate chains, private keys and CA bundles
//! - Index each certificate by the host names it covers
//! - Pick a certificate for a client's server name: exact match, then a
//!   single-label `*.` wildcard, then the endpoint default

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::RootCertStore;

use crate::config::schema::TlsCertConfig;
use crate::tls::identity::subject_names;
use crate::tls::TlsError;

/// Read every certificate from a PEM file.
pub fn read_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

/// Read the first private key from a PEM file.
pub fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

/// Build a root store from a PEM bundle of CA certificates.
pub fn read_root_store(path: &Path) -> Result<RootCertStore, TlsError> {
    let mut roots = RootCertStore::empty();
    for cert in read_certificates(path)? {
        roots.add(cert).map_err(|source| TlsError::ClientCa {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(roots)
}

struct LoadedCertificate {
    names: Vec<String>,
    key: Arc<CertifiedKey>,
    source: PathBuf,
}

/// The certificates of one endpoint, indexed for SNI lookup.
pub struct CertStore {
    entries: Vec<LoadedCertificate>,
    default_index: usize,
}

impl CertStore {
    /// Load every configured certificate. Fails if any of them is unusable.
    pub fn load(configs: &[TlsCertConfig], provider: &CryptoProvider) -> Result<Self, TlsError> {
        if configs.is_empty() {
            return Err(TlsError::NoCertificateConfigured);
        }

        let entries = configs
            .iter()
            .map(|config| load_certificate(config, provider))
            .collect::<Result<Vec<_>, _>>()?;
        let default_index = configs.iter().position(|c| c.is_default).unwrap_or(0);

        Ok(Self {
            entries,
            default_index,
        })
    }

    /// Certificate for a client's server name.
    pub fn select(&self, server_name: Option<&str>) -> Arc<CertifiedKey> {
        if let Some(name) = server_name {
            let name = name.to_ascii_lowercase();
            let exact = self
                .entries
                .iter()
                .find(|e| e.names.iter().any(|n| *n == name));
            let wildcard = || {
                self.entries
                    .iter()
                    .find(|e| e.names.iter().any(|n| wildcard_matches(n, &name)))
            };
            if let Some(entry) = exact.or_else(wildcard) {
                return Arc::clone(&entry.key);
            }
        }
        Arc::clone(&self.entries[self.default_index].key)
    }

    /// The certificate served when no name matches.
    pub fn default_certificate(&self) -> Arc<CertifiedKey> {
        Arc::clone(&self.entries[self.default_index].key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for CertStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertStore")
            .field(
                "certificates",
                &self
                    .entries
                    .iter()
                    .map(|e| (&e.source, &e.names))
                    .collect::<Vec<_>>(),
            )
            .field("default_index", &self.default_index)
            .finish()
    }
}

fn load_certificate(
    config: &TlsCertConfig,
    provider: &CryptoProvider,
) -> Result<LoadedCertificate, TlsError> {
    let chain = read_certificates(&config.cert_path)?;
    let key = read_private_key(&config.key_path)?;
    let signing_key =
        provider
            .key_provider
            .load_private_key(key)
            .map_err(|source| TlsError::InvalidKey {
                path: config.key_path.clone(),
                source,
            })?;

    let names = subject_names(&chain[0]);
    let key = CertifiedKey::new(chain, signing_key);
    // A certificate replaced without its key must not be published.
    key.keys_match().map_err(|source| TlsError::InvalidKey {
        path: config.key_path.clone(),
        source,
    })?;
    tracing::debug!(path = ?config.cert_path, names = ?names, "Certificate loaded");

    Ok(LoadedCertificate {
        names,
        key: Arc::new(key),
        source: config.cert_path.clone(),
    })
}

/// `*.example.com` matches `a.example.com` but neither `example.com` nor
/// `a.b.example.com`.
fn wildcard_matches(pattern: &str, name: &str) -> bool {
    let Some(suffix) = pattern.strip_prefix('*') else {
        return false;
    };
    if !suffix.starts_with('.') {
        return false;
    }
    name.strip_suffix(suffix)
        .is_some_and(|label| !label.is_empty() && !label.contains('.'))
}

/// Resolves the served certificate from the ClientHello server name.
#[derive(Debug)]
pub struct SniResolver {
    store: Arc<CertStore>,
}

impl SniResolver {
    pub fn new(store: Arc<CertStore>) -> Self {
        Self { store }
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.store.select(client_hello.server_name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn certs_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/certs")
    }

    fn provider() -> CryptoProvider {
        rustls::crypto::aws_lc_rs::default_provider()
    }

    fn pair(n: u8) -> TlsCertConfig {
        TlsCertConfig::new(
            certs_dir().join(format!("test_cert{n}.pem")),
            certs_dir().join(format!("test_key{n}.pem")),
        )
    }

    #[test]
    fn test_wildcard_matching() {
        assert!(wildcard_matches("*.example.com", "a.example.com"));
        assert!(!wildcard_matches("*.example.com", "example.com"));
        assert!(!wildcard_matches("*.example.com", "a.b.example.com"));
        assert!(!wildcard_matches("a.example.com", "a.example.com"));
        assert!(!wildcard_matches("*example.com", "aexample.com"));
    }

    #[test]
    fn test_default_certificate_selection() {
        let store = CertStore::load(&[pair(1), pair(2).marked_default()], &provider()).unwrap();
        assert_eq!(store.len(), 2);

        let second = read_certificates(&certs_dir().join("test_cert2.pem")).unwrap();
        let first = read_certificates(&certs_dir().join("test_cert1.pem")).unwrap();

        // Unknown names fall back to the marked default.
        assert_eq!(store.select(Some("unknown.test")).cert[0], second[0]);
        assert_eq!(store.select(None).cert[0], second[0]);
        // Both certificates cover localhost; the first exact match wins.
        assert_eq!(store.select(Some("LOCALHOST")).cert[0], first[0]);
    }

    #[test]
    fn test_first_certificate_is_implicit_default() {
        let store = CertStore::load(&[pair(2), pair(1)], &provider()).unwrap();
        let second = read_certificates(&certs_dir().join("test_cert2.pem")).unwrap();
        assert_eq!(store.default_certificate().cert[0], second[0]);
    }

    #[test]
    fn test_missing_file() {
        let config = TlsCertConfig::new("/nonexistent/cert.pem", "/nonexistent/key.pem");
        let err = CertStore::load(&[config], &provider()).unwrap_err();
        assert!(matches!(err, TlsError::Read { .. }));
    }

    #[test]
    fn test_key_file_without_key() {
        let config = TlsCertConfig::new(
            certs_dir().join("test_cert1.pem"),
            certs_dir().join("test_cert1.pem"),
        );
        let err = CertStore::load(&[config], &provider()).unwrap_err();
        assert!(matches!(err, TlsError::NoPrivateKey(_)));
    }

    #[test]
    fn test_mismatched_key() {
        let config = TlsCertConfig::new(
            certs_dir().join("test_cert1.pem"),
            certs_dir().join("test_key2.pem"),
        );
        let err = CertStore::load(&[config], &provider()).unwrap_err();
        assert!(matches!(err, TlsError::InvalidKey { .. }));
    }

    #[test]
    fn test_no_certificates() {
        let err = CertStore::load(&[], &provider()).unwrap_err();
        assert!(matches!(err, TlsError::NoCertificateConfigured));
    }

    #[test]
    fn test_root_store() {
        let roots = read_root_store(&certs_dir().join("client_ca_cert.pem")).unwrap();
        assert_eq!(roots.len(), 1);
    }
}
