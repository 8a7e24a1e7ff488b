//! Per-endpoint TLS context with lock-free hot swap.
//!
//! # Responsibilities
//! - Build a complete rustls `ServerConfig` from endpoint configuration
//! - Publish it as an immutable [`TlsSnapshot`] through `ArcSwap`
//! - Rebuild on credential reload or ticket seed rotation, keeping the old
//!   snapshot serving when the rebuild fails
//!
//! # Design Decisions
//! - Readers never block: `snapshot()` is a single atomic load
//! - Writers are serialized by a mutex so versions increase without gaps
//! - Seed rotation reuses the loaded certificates; credential reload reuses
//!   the current seeds

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwap;
use rustls::crypto::CryptoProvider;
use rustls::server::danger::ClientCertVerifier;
use rustls::server::WebPkiClientVerifier;
use rustls::ServerConfig;

use crate::config::schema::{ClientVerification, EndpointConfig, TicketSeedSet, TlsCertConfig};
use crate::observability::metrics;
use crate::tls::certs::{read_root_store, CertStore, SniResolver};
use crate::tls::tickets::SeedTicketer;
use crate::tls::TlsError;

/// How session tickets are issued and honoured.
#[derive(Debug, Clone, Copy)]
pub struct TicketPolicy {
    /// Previous seeds still accepted for decryption.
    pub generations: usize,
    /// Lifetime hint sent to clients.
    pub lifetime: Duration,
}

impl Default for TicketPolicy {
    fn default() -> Self {
        Self {
            generations: 1,
            lifetime: Duration::from_secs(86_400),
        }
    }
}

/// One immutable, complete TLS configuration.
pub struct TlsSnapshot {
    /// Increases by one with every successful update.
    pub version: u64,
    pub server_config: Arc<ServerConfig>,
    pub certificates: Arc<CertStore>,
    pub seeds: TicketSeedSet,
    client_verifier: Option<Arc<dyn ClientCertVerifier>>,
}

impl std::fmt::Debug for TlsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSnapshot")
            .field("version", &self.version)
            .field("certificates", &self.certificates)
            .field("seeds", &self.seeds)
            .field("client_verification", &self.client_verifier.is_some())
            .finish()
    }
}

/// Endpoint settings a snapshot is rebuilt from.
struct SnapshotBuilder {
    certificates: Vec<TlsCertConfig>,
    client_verification: ClientVerification,
    client_ca_path: Option<PathBuf>,
    alpn_protocols: Vec<Vec<u8>>,
    policy: TicketPolicy,
    provider: Arc<CryptoProvider>,
}

impl SnapshotBuilder {
    fn load_certificates(&self) -> Result<Arc<CertStore>, TlsError> {
        CertStore::load(&self.certificates, &self.provider).map(Arc::new)
    }

    fn client_verifier(&self) -> Result<Option<Arc<dyn ClientCertVerifier>>, TlsError> {
        if self.client_verification == ClientVerification::None {
            return Ok(None);
        }

        let path = self.client_ca_path.as_ref().ok_or(TlsError::MissingClientCa)?;
        let roots = read_root_store(path)?;

        let builder =
            WebPkiClientVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&self.provider));
        let builder = match self.client_verification {
            ClientVerification::Optional => builder.allow_unauthenticated(),
            _ => builder,
        };

        Ok(Some(builder.build()?))
    }

    fn build(
        &self,
        version: u64,
        certificates: Arc<CertStore>,
        client_verifier: Option<Arc<dyn ClientCertVerifier>>,
        seeds: TicketSeedSet,
    ) -> Result<TlsSnapshot, TlsError> {
        let builder = ServerConfig::builder_with_provider(Arc::clone(&self.provider))
            .with_safe_default_protocol_versions()?;
        let builder = match &client_verifier {
            Some(verifier) => builder.with_client_cert_verifier(Arc::clone(verifier)),
            None => builder.with_no_client_auth(),
        };

        let mut config =
            builder.with_cert_resolver(Arc::new(SniResolver::new(Arc::clone(&certificates))));
        config.alpn_protocols = self.alpn_protocols.clone();
        config.ticketer = Arc::new(SeedTicketer::new(
            &seeds,
            self.policy.generations,
            u32::try_from(self.policy.lifetime.as_secs()).unwrap_or(u32::MAX),
        )?);

        Ok(TlsSnapshot {
            version,
            server_config: Arc::new(config),
            certificates,
            seeds,
            client_verifier,
        })
    }
}

/// Owns the current [`TlsSnapshot`] of one secure endpoint.
pub struct TlsContextManager {
    endpoint: SocketAddr,
    builder: SnapshotBuilder,
    current: ArcSwap<TlsSnapshot>,
    writer: Mutex<()>,
}

impl TlsContextManager {
    /// Load credentials for a secure endpoint and publish snapshot version 1.
    pub fn new(endpoint: &EndpointConfig, policy: TicketPolicy) -> Result<Self, TlsError> {
        let builder = SnapshotBuilder {
            certificates: endpoint.certificates.clone(),
            client_verification: endpoint.client_verification,
            client_ca_path: endpoint.client_ca_path.clone(),
            alpn_protocols: endpoint.protocol.alpn_protocols(),
            policy,
            provider: Arc::new(rustls::crypto::aws_lc_rs::default_provider()),
        };
        let seeds = endpoint
            .ticket_seeds
            .clone()
            .unwrap_or_else(SeedTicketer::ephemeral_seeds);

        let snapshot = builder.build(
            1,
            builder.load_certificates()?,
            builder.client_verifier()?,
            seeds,
        )?;

        tracing::info!(
            endpoint = %endpoint.address,
            certificates = snapshot.certificates.len(),
            client_verification = ?endpoint.client_verification,
            "TLS context initialized"
        );

        Ok(Self {
            endpoint: endpoint.address,
            builder,
            current: ArcSwap::from_pointee(snapshot),
            writer: Mutex::new(()),
        })
    }

    /// The snapshot new handshakes should use.
    pub fn snapshot(&self) -> Arc<TlsSnapshot> {
        self.current.load_full()
    }

    pub fn version(&self) -> u64 {
        self.current.load().version
    }

    /// Re-read certificate, key and client CA files and publish a new
    /// snapshot with the current ticket seeds.
    pub fn update_credentials(&self) -> Result<u64, TlsError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self.current.load_full();

        let rebuilt = self.builder.load_certificates().and_then(|certificates| {
            self.builder.build(
                previous.version + 1,
                certificates,
                self.builder.client_verifier()?,
                previous.seeds.clone(),
            )
        });

        self.publish(previous.version, rebuilt, "credentials")
    }

    /// Publish a new snapshot with different ticket seeds and the current
    /// certificates.
    pub fn update_ticket_seeds(&self, seeds: TicketSeedSet) -> Result<u64, TlsError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = self.current.load_full();

        let rebuilt = self.builder.build(
            previous.version + 1,
            Arc::clone(&previous.certificates),
            previous.client_verifier.clone(),
            seeds,
        );

        self.publish(previous.version, rebuilt, "ticket_seeds")
    }

    fn publish(
        &self,
        previous_version: u64,
        rebuilt: Result<TlsSnapshot, TlsError>,
        reason: &'static str,
    ) -> Result<u64, TlsError> {
        let endpoint = self.endpoint.to_string();
        match rebuilt {
            Ok(snapshot) => {
                let version = snapshot.version;
                self.current.store(Arc::new(snapshot));
                tracing::info!(endpoint = %endpoint, version, reason, "TLS snapshot published");
                metrics::record_tls_snapshot(&endpoint, version, reason);
                Ok(version)
            }
            Err(e) => {
                tracing::error!(
                    endpoint = %endpoint,
                    version = previous_version,
                    reason,
                    error = %e,
                    "TLS update failed, keeping current snapshot"
                );
                metrics::record_tls_update_failure(&endpoint, reason);
                Err(e)
            }
        }
    }
}
