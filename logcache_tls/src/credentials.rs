//! Transport credentials: a [`MutualTlsConfig`] packaged for `tonic`.
//!
//! Dialling:
//!
//! ```no_run
//! # async fn dial(creds: logcache_tls::TransportCredentials) -> Result<(), tonic::transport::Error> {
//! // The scheme is http because the connector does the TLS itself.
//! let endpoint = tonic::transport::Endpoint::from_static("http://10.0.0.7:8080");
//! let channel = creds.connect(endpoint).await?;
//! # let _ = channel;
//! # Ok(())
//! # }
//! ```
//!
//! Serving:
//!
//! ```no_run
//! # async fn serve(
//! #     creds: logcache_tls::TransportCredentials,
//! #     router: tonic::transport::server::Router,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let incoming = creds.incoming("[::]:8080".parse()?)?;
//! router.serve_with_incoming(incoming).await?;
//! # Ok(())
//! # }
//! ```

use crate::incoming::{Incoming, tls_over_listener, tls_over_tcp};
use crate::mutual::{MutualTlsConfig, MutualTlsError};
use http::Uri;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ServerConfig};
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Endpoint};
use tower_service::Service;

/// Immutable, reusable mutual TLS credentials for gRPC channels and
/// servers.
///
/// Cloning is cheap and clones share the same configuration, so one
/// instance can serve any number of concurrent connections.
#[derive(Clone, Debug)]
pub struct TransportCredentials(Arc<MutualTlsConfig>);

impl TransportCredentials {
    /// Build credentials from PEM files on disk. See
    /// [`MutualTlsConfig::build`]; its errors are returned unchanged.
    pub fn new(
        ca_path: impl AsRef<Path>,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
        server_name: &str,
    ) -> Result<Self, MutualTlsError> {
        MutualTlsConfig::build(ca_path, cert_path, key_path, server_name).map(Self::from)
    }

    /// The configuration these credentials wrap.
    pub fn config(&self) -> &MutualTlsConfig {
        &self.0
    }

    /// Name that servers are required to present a certificate for.
    pub fn server_name(&self) -> &ServerName<'static> {
        self.0.server_name()
    }

    /// rustls configuration for dialling out.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(self.0.client_config())
    }

    /// rustls configuration for accepting connections.
    pub fn server_config(&self) -> Arc<ServerConfig> {
        Arc::clone(self.0.server_config())
    }

    /// A [`TlsConnector`] for raw streams.
    pub fn tls_connector(&self) -> TlsConnector {
        TlsConnector::from(self.client_config())
    }

    /// A [`TlsAcceptor`] for raw streams.
    pub fn tls_acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.server_config())
    }

    /// A connector for [`Endpoint::connect_with_connector`].
    pub fn connector(&self) -> TlsChannelConnector {
        TlsChannelConnector {
            connector: self.tls_connector(),
            server_name: self.server_name().clone(),
        }
    }

    /// Connect a channel to `endpoint`, which should use the `http` scheme.
    pub async fn connect(&self, endpoint: Endpoint) -> Result<Channel, tonic::transport::Error> {
        endpoint.connect_with_connector(self.connector()).await
    }

    /// Like [`TransportCredentials::connect`] but the connection is only
    /// established when first used.
    pub fn connect_lazy(&self, endpoint: Endpoint) -> Channel {
        endpoint.connect_with_connector_lazy(self.connector())
    }

    /// Bind `addr` and accept mutual TLS connections on it, for
    /// [`tonic::transport::Server::serve_with_incoming`]. Must be called
    /// from within a tokio runtime.
    pub fn incoming(
        &self,
        addr: SocketAddr,
    ) -> std::io::Result<Incoming<TcpListenerStream, TcpStream>> {
        tls_over_tcp(addr, self.server_config())
    }

    /// Accept mutual TLS connections on an already bound listener.
    pub fn incoming_from_listener(
        &self,
        listener: tokio::net::TcpListener,
    ) -> Incoming<TcpListenerStream, TcpStream> {
        tls_over_listener(listener, self.server_config())
    }
}

impl From<MutualTlsConfig> for TransportCredentials {
    fn from(config: MutualTlsConfig) -> Self {
        Self(Arc::new(config))
    }
}

fn authority(uri: &Uri) -> std::io::Result<(String, u16)> {
    let host = uri.host().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("no host in {}", uri),
        )
    })?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    let port = uri
        .port_u16()
        .unwrap_or(if uri.scheme_str() == Some("http") {
            80
        } else {
            443
        });
    Ok((host.to_owned(), port))
}

/// Dials TCP to the URI's authority and performs a mutual TLS handshake.
///
/// The peer must present a certificate for the configured server name,
/// whatever host the URI names.
#[derive(Clone)]
pub struct TlsChannelConnector {
    connector: TlsConnector,
    server_name: ServerName<'static>,
}

impl Service<Uri> for TlsChannelConnector {
    type Response = TokioIo<tokio_rustls::client::TlsStream<TcpStream>>;
    type Error = std::io::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let connector = self.connector.clone();
        let server_name = self.server_name.clone();
        Box::pin(async move {
            let (host, port) = authority(&uri)?;
            let tcp = TcpStream::connect((host.as_str(), port)).await?;
            tcp.set_nodelay(true)?;
            let tls = connector.connect(server_name, tcp).await?;
            Ok(TokioIo::new(tls))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::BASELINE_CIPHER_SUITES;
    use crate::testdata::{self, Files};
    use rustls::crypto::CryptoProvider;
    use rustls::{CipherSuite, ProtocolVersion, RootCertStore};
    use std::io::Cursor;

    fn roots(pem: &[u8]) -> RootCertStore {
        let mut roots = RootCertStore::empty();
        roots.add_parsable_certificates(
            rustls_pemfile::certs(&mut Cursor::new(pem))
                .collect::<Result<Vec<_>, _>>()
                .unwrap(),
        );
        roots
    }

    fn tls12_client(suites: &[CipherSuite]) -> ClientConfig {
        let mut provider = rustls::crypto::aws_lc_rs::default_provider();
        provider.cipher_suites.retain(|s| suites.contains(&s.suite()));
        ClientConfig::builder_with_provider(Arc::new(provider))
            .with_protocol_versions(&[&rustls::version::TLS12])
            .unwrap()
            .with_root_certificates(roots(testdata::CACERT))
            .with_client_auth_cert(
                rustls_pemfile::certs(&mut Cursor::new(testdata::CERT))
                    .collect::<Result<Vec<_>, _>>()
                    .unwrap(),
                rustls_pemfile::private_key(&mut Cursor::new(testdata::KEY))
                    .unwrap()
                    .unwrap(),
            )
            .unwrap()
    }

    type Handshake = (
        std::io::Result<tokio_rustls::client::TlsStream<tokio::io::DuplexStream>>,
        std::io::Result<tokio_rustls::server::TlsStream<tokio::io::DuplexStream>>,
    );

    async fn handshake(client: Arc<ClientConfig>, server: Arc<ServerConfig>) -> Handshake {
        let (client_io, server_io) = tokio::io::duplex(4096);
        tokio::join!(
            TlsConnector::from(client).connect(
                ServerName::try_from(testdata::SERVER_NAME).unwrap(),
                client_io
            ),
            TlsAcceptor::from(server).accept(server_io),
        )
    }

    fn credentials(files: &Files) -> TransportCredentials {
        TransportCredentials::new(
            files.ca_path(),
            files.cert_path(),
            files.key_path(),
            testdata::SERVER_NAME,
        )
        .expect("credentials")
    }

    #[test]
    fn errors_propagate_unchanged() {
        let files = Files::new().expect("writing test files");
        std::fs::remove_file(files.ca_path()).expect("remove ca");
        assert!(matches!(
            TransportCredentials::new(
                files.ca_path(),
                files.cert_path(),
                files.key_path(),
                testdata::SERVER_NAME,
            ),
            Err(MutualTlsError::CaRead { .. })
        ));
    }

    #[test]
    fn shares_configuration() {
        let files = Files::new().expect("writing test files");
        let creds = credentials(&files);
        let clone = creds.clone();
        assert!(Arc::ptr_eq(&creds.client_config(), &clone.client_config()));
        assert!(Arc::ptr_eq(&creds.server_config(), &clone.server_config()));
        assert_eq!(
            creds.server_name(),
            &ServerName::try_from("logcache.example.com").unwrap()
        );
        assert_eq!(creds.config().certificates().len(), 1);

        fn is_send_sync<T: Send + Sync>(_: &T) {}
        is_send_sync(&creds);
    }

    #[tokio::test]
    async fn mutual_handshake() {
        let files = Files::new().expect("writing test files");
        let creds = credentials(&files);
        let (client, server) = handshake(creds.client_config(), creds.server_config()).await;
        let client = client.expect("client handshake");
        let server = server.expect("server handshake");

        let (_, server_conn) = server.get_ref();
        assert_eq!(server_conn.peer_certificates().map(|c| c.len()), Some(1));
        let suite = server_conn
            .negotiated_cipher_suite()
            .expect("negotiated suite")
            .suite();
        assert!(BASELINE_CIPHER_SUITES.contains(&suite));
        let (_, client_conn) = client.get_ref();
        assert_eq!(client_conn.alpn_protocol(), Some(&b"h2"[..]));
    }

    #[tokio::test]
    async fn untrusted_server_rejected() {
        let files = Files::new().expect("writing test files");
        let server_creds = credentials(&files);
        files
            .write("ca", testdata::ROGUE_CACERT)
            .expect("rewrite ca");
        let client_creds = credentials(&files);
        let (client, _) =
            handshake(client_creds.client_config(), server_creds.server_config()).await;
        assert!(client.is_err());
    }

    #[tokio::test]
    async fn client_without_certificate_rejected() {
        let files = Files::new().expect("writing test files");
        let creds = credentials(&files);
        let anonymous = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::aws_lc_rs::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots(testdata::CACERT))
        .with_no_client_auth();
        let (_, server) = handshake(Arc::new(anonymous), creds.server_config()).await;
        assert!(server.is_err());
    }

    #[tokio::test]
    async fn tls12_within_policy() {
        let files = Files::new().expect("writing test files");
        let creds = credentials(&files);
        let client = tls12_client(&[CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384]);
        let (client, server) = handshake(Arc::new(client), creds.server_config()).await;
        client.expect("client handshake");
        let server = server.expect("server handshake");
        let (_, conn) = server.get_ref();
        assert_eq!(conn.protocol_version(), Some(ProtocolVersion::TLSv1_2));
        assert_eq!(
            conn.negotiated_cipher_suite().map(|s| s.suite()),
            Some(CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384)
        );
    }

    #[tokio::test]
    async fn tls12_outside_policy_rejected() {
        let files = Files::new().expect("writing test files");
        let creds = credentials(&files);
        let client = tls12_client(&[CipherSuite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256]);
        let (client, server) = handshake(Arc::new(client), creds.server_config()).await;
        assert!(client.is_err());
        assert!(server.is_err());
    }

    #[tokio::test]
    async fn negotiated_version_follows_minimum() {
        let files = Files::new().expect("writing test files");
        let baseline = credentials(&files);
        let (_, server) = handshake(baseline.client_config(), baseline.server_config()).await;
        let server = server.expect("server handshake");
        assert_eq!(server.get_ref().1.protocol_version(), Some(ProtocolVersion::TLSv1_3));

        let strict = TransportCredentials::from(
            MutualTlsConfig::build_with_policy(
                crate::TlsPolicy {
                    min_version: crate::TlsVersion::Tls13,
                    ..crate::TlsPolicy::BASELINE
                },
                files.ca_path(),
                files.cert_path(),
                files.key_path(),
                testdata::SERVER_NAME,
            )
            .expect("build"),
        );
        let client = tls12_client(BASELINE_CIPHER_SUITES);
        let (client, server) = handshake(Arc::new(client), strict.server_config()).await;
        assert!(client.is_err());
        assert!(server.is_err());

        // A TLS 1.2-only server is refused by a client built with the strict policy.
        let mut provider = rustls::crypto::aws_lc_rs::default_provider();
        provider
            .cipher_suites
            .retain(|s| BASELINE_CIPHER_SUITES.contains(&s.suite()));
        let tls12_server = ServerConfig::builder_with_provider(Arc::new(provider))
            .with_protocol_versions(&[&rustls::version::TLS12])
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(
                rustls_pemfile::certs(&mut Cursor::new(testdata::CERT))
                    .collect::<Result<Vec<_>, _>>()
                    .unwrap(),
                rustls_pemfile::private_key(&mut Cursor::new(testdata::KEY))
                    .unwrap()
                    .unwrap(),
            )
            .unwrap();
        let (client, _) = handshake(strict.client_config(), Arc::new(tls12_server)).await;
        assert!(client.is_err());
    }

    #[test]
    fn uri_authority() {
        let get = |s: &str| authority(&s.parse::<Uri>().unwrap()).unwrap();
        assert_eq!(get("http://logcache:8080/"), ("logcache".into(), 8080));
        assert_eq!(get("http://[::1]:9/"), ("::1".into(), 9));
        assert_eq!(get("http://logcache"), ("logcache".into(), 80));
        assert_eq!(get("https://logcache"), ("logcache".into(), 443));
        assert!(authority(&Uri::from_static("/just/a/path")).is_err());
    }

    #[test]
    fn crypto_provider_is_restricted() {
        let files = Files::new().expect("writing test files");
        let creds = credentials(&files);
        let client_config = creds.client_config();
        let provider: &CryptoProvider = client_config.crypto_provider();
        assert_eq!(provider.cipher_suites.len(), BASELINE_CIPHER_SUITES.len());
    }
}
