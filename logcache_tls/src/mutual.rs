//! Building a complete mutual TLS configuration from PEM files on disk.
//!
//! [`MutualTlsConfig::build`] does all of the work that can fail: it reads
//! and pairs the certificate and key, applies the [`TlsPolicy`], checks the
//! server name, and assembles the trust pool from the CA bundle. The
//! result is ready to hand to [`crate::TransportCredentials`].

use crate::policy::{PolicyError, TlsPolicy, TlsVersion, default_crypto_provider};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::server::{VerifierBuilderError, WebPkiClientVerifier};
use rustls::sign::CertifiedKey;
use rustls::{CipherSuite, ClientConfig, RootCertStore, ServerConfig};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Why a certificate and private key could not be loaded as a pair.
#[derive(Debug, Error)]
pub enum CertificateLoadError {
    /// Wrapper for std::io::Error
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// The certificate file has no PEM certificate in it.
    #[error("no certificate found in {}", .0.display())]
    NoCertificate(PathBuf),
    /// The key file has no PEM private key in it.
    #[error("no private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),
    /// The key is unusable or does not belong to the certificate.
    #[error("{0}")]
    Rustls(#[from] rustls::Error),
}

/// Error type returned by [`MutualTlsConfig::build`].
///
/// Every failure is a configuration problem: retrying without fixing the
/// files will fail the same way.
#[derive(Debug, Error)]
pub enum MutualTlsError {
    /// The certificate or key is unreadable, malformed, or the two do not
    /// match.
    #[error(
        "cannot load certificate {} and key {}: {source}",
        .cert_path.display(),
        .key_path.display()
    )]
    CertificateLoad {
        /// Certificate chain file.
        cert_path: PathBuf,
        /// Private key file.
        key_path: PathBuf,
        /// What went wrong.
        #[source]
        source: CertificateLoadError,
    },
    /// The CA bundle could not be read.
    #[error("cannot read CA certificate {}: {source}", .path.display())]
    CaRead {
        /// CA bundle file.
        path: PathBuf,
        /// What went wrong.
        #[source]
        source: std::io::Error,
    },
    /// The CA bundle holds no usable certificate.
    #[error("cannot parse CA certificate {}", .path.display())]
    CaParse {
        /// CA bundle file.
        path: PathBuf,
    },
    /// The expected peer name is empty or not a valid DNS name or IP address.
    #[error("invalid TLS server name {0:?}")]
    InvalidServerName(String),
    /// The [`TlsPolicy`] cannot be applied.
    #[error("{0}")]
    Policy(#[from] PolicyError),
    /// Client certificate verification could not be set up.
    #[error("{0}")]
    ClientVerifier(#[from] VerifierBuilderError),
    /// rustls refused the assembled configuration.
    #[error("{0}")]
    Rustls(#[from] rustls::Error),
}

/// A certificate chain together with its private key.
pub struct Certificate {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl Certificate {
    /// The certificate chain, leaf first.
    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }

    /// The leaf certificate.
    pub fn leaf(&self) -> &CertificateDer<'static> {
        &self.chain[0]
    }
}

impl Clone for Certificate {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

fn load_certificate(
    cert_path: &Path,
    key_path: &Path,
    provider: &CryptoProvider,
) -> Result<Certificate, CertificateLoadError> {
    let cert_pem = std::fs::read(cert_path)?;
    let chain =
        rustls_pemfile::certs(&mut Cursor::new(&cert_pem)).collect::<Result<Vec<_>, _>>()?;
    if chain.is_empty() {
        return Err(CertificateLoadError::NoCertificate(cert_path.to_owned()));
    }

    let key_pem = std::fs::read(key_path)?;
    let key = rustls_pemfile::private_key(&mut Cursor::new(&key_pem))?
        .ok_or_else(|| CertificateLoadError::NoPrivateKey(key_path.to_owned()))?;

    let signing_key = provider.key_provider.load_private_key(key.clone_key())?;
    CertifiedKey::new(chain.clone(), signing_key).keys_match()?;
    Ok(Certificate { chain, key })
}

const PEM_END: &[u8] = b"-----END ";

/// Split a PEM bundle after every `-----END` line so that a malformed
/// section is parsed on its own and cannot hide the sections after it.
fn pem_sections(pem: &[u8]) -> impl Iterator<Item = &[u8]> {
    let mut rest = pem;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let split = rest
            .windows(PEM_END.len())
            .position(|w| w == PEM_END)
            .and_then(|start| {
                rest[start..]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map(|eol| start + eol + 1)
            })
            .unwrap_or(rest.len());
        let (section, tail) = rest.split_at(split);
        rest = tail;
        Some(section)
    })
}

fn load_ca_bundle(path: &Path) -> Result<RootCertStore, MutualTlsError> {
    let pem = std::fs::read(path).map_err(|source| MutualTlsError::CaRead {
        path: path.to_owned(),
        source,
    })?;
    let mut certs = Vec::new();
    for section in pem_sections(&pem) {
        let mut cursor = Cursor::new(section);
        certs.extend(rustls_pemfile::certs(&mut cursor).map_while(Result::ok));
    }
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(MutualTlsError::CaParse {
            path: path.to_owned(),
        });
    }
    log::debug!(
        "Loaded {} trust anchor(s) from {} ({} ignored)",
        added,
        path.display(),
        ignored
    );
    Ok(roots)
}

fn parse_server_name(name: &str) -> Result<ServerName<'static>, MutualTlsError> {
    if name.is_empty() {
        return Err(MutualTlsError::InvalidServerName(String::new()));
    }
    ServerName::try_from(name.to_owned())
        .map_err(|_| MutualTlsError::InvalidServerName(name.to_owned()))
}

/// A validated TLS configuration for both ends of a mutually authenticated
/// connection.
///
/// The same material is used whichever way round the connection goes:
/// as a client, this process presents [`MutualTlsConfig::certificates`] and
/// expects the server to present a certificate for
/// [`MutualTlsConfig::server_name`] issued by the CA bundle; as a server, it
/// presents the same certificate and requires clients to present one issued
/// by the CA bundle.
///
/// Peer certificate verification is always on. There is no way to build a
/// `MutualTlsConfig` that skips it.
#[derive(Clone, Debug)]
pub struct MutualTlsConfig {
    policy: TlsPolicy,
    server_name: ServerName<'static>,
    certificates: Vec<Certificate>,
    root_store: Arc<RootCertStore>,
    client_config: Arc<ClientConfig>,
    server_config: Arc<ServerConfig>,
}

impl MutualTlsConfig {
    /// Build with [`TlsPolicy::BASELINE`].
    ///
    /// * `ca_path`: one or more PEM-encoded CA certificates.
    /// * `cert_path`: PEM-encoded certificate (chain) for this process.
    /// * `key_path`: PEM-encoded private key matching the certificate.
    /// * `server_name`: the name servers must present a certificate for.
    pub fn build(
        ca_path: impl AsRef<Path>,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
        server_name: &str,
    ) -> Result<Self, MutualTlsError> {
        Self::build_with_policy(TlsPolicy::BASELINE, ca_path, cert_path, key_path, server_name)
    }

    /// Like [`MutualTlsConfig::build`] but with an explicit policy.
    pub fn build_with_policy(
        policy: TlsPolicy,
        ca_path: impl AsRef<Path>,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
        server_name: &str,
    ) -> Result<Self, MutualTlsError> {
        let (ca_path, cert_path, key_path) =
            (ca_path.as_ref(), cert_path.as_ref(), key_path.as_ref());
        let base = default_crypto_provider();

        let certificate = load_certificate(cert_path, key_path, &base).map_err(|source| {
            MutualTlsError::CertificateLoad {
                cert_path: cert_path.to_owned(),
                key_path: key_path.to_owned(),
                source,
            }
        })?;
        let provider = Arc::new(policy.crypto_provider(&base)?);
        let server_name = parse_server_name(server_name)?;
        let root_store = Arc::new(load_ca_bundle(ca_path)?);

        let mut client_config = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_protocol_versions(policy.protocol_versions())?
            .with_root_certificates(Arc::clone(&root_store))
            .with_client_auth_cert(certificate.chain.clone(), certificate.key.clone_key())?;
        client_config.alpn_protocols = vec![b"h2".to_vec()];

        let verifier =
            WebPkiClientVerifier::builder_with_provider(Arc::clone(&root_store), Arc::clone(&provider))
                .build()?;
        let mut server_config = ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(policy.protocol_versions())?
            .with_client_cert_verifier(verifier)
            .with_single_cert(certificate.chain.clone(), certificate.key.clone_key())?;
        server_config.alpn_protocols = vec![b"h2".to_vec()];

        log::debug!(
            "Built mutual TLS config for {:?} from {}, {}, and {}",
            server_name,
            ca_path.display(),
            cert_path.display(),
            key_path.display()
        );
        Ok(Self {
            policy,
            server_name,
            certificates: vec![certificate],
            root_store,
            client_config: Arc::new(client_config),
            server_config: Arc::new(server_config),
        })
    }

    /// The policy this configuration was built with.
    pub fn policy(&self) -> &TlsPolicy {
        &self.policy
    }

    /// Lowest protocol version that will be negotiated.
    pub fn min_version(&self) -> TlsVersion {
        self.policy.min_version
    }

    /// Cipher suites actually configured, in preference order.
    pub fn cipher_suites(&self) -> Vec<CipherSuite> {
        self.client_config
            .crypto_provider()
            .cipher_suites
            .iter()
            .map(|s| s.suite())
            .collect()
    }

    /// Name that servers are required to present a certificate for.
    pub fn server_name(&self) -> &ServerName<'static> {
        &self.server_name
    }

    /// Certificates presented to peers. There is exactly one.
    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    /// Trust anchors loaded from the CA bundle.
    pub fn root_store(&self) -> &RootCertStore {
        &self.root_store
    }

    /// Configuration for dialling out.
    pub fn client_config(&self) -> &Arc<ClientConfig> {
        &self.client_config
    }

    /// Configuration for accepting connections. Client certificates are
    /// required.
    pub fn server_config(&self) -> &Arc<ServerConfig> {
        &self.server_config
    }
}
