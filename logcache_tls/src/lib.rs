//! Mutual TLS credentials for logcache gRPC clients and servers.
//!
//! Everything here is built once at startup from three PEM files and the
//! name the peer is expected to present:
//!
//! * a CA bundle, used to verify servers (when dialling) and clients (when
//!   serving),
//! * a certificate chain for this process,
//! * the private key matching that certificate.
//!
//! The material is combined with a fixed [`TlsPolicy`] (minimum protocol
//! version and allowed cipher suites) into a [`MutualTlsConfig`], which
//! [`TransportCredentials`] then adapts for use with `tonic` channels and
//! servers.
//!
//! ```no_run
//! use logcache_tls::TransportCredentials;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let creds = TransportCredentials::new(
//!     "/etc/logcache/ca.pem",
//!     "/etc/logcache/cert.pem",
//!     "/etc/logcache/key.pem",
//!     "logcache.example.com",
//! )?;
//! let endpoint = tonic::transport::Endpoint::from_static("http://logcache:8080");
//! let channel = creds.connect(endpoint).await?;
//! # let _ = channel;
//! # Ok(())
//! # }
//! ```
//!
//! Nothing in this crate logs a construction error or terminates the
//! process; callers that cannot run without TLS decide that for themselves.

#![warn(missing_docs)]

pub mod credentials;
pub mod incoming;
pub mod mutual;
pub mod policy;
#[cfg(test)]
mod testdata;

pub use credentials::{TlsChannelConnector, TransportCredentials};
pub use incoming::Incoming;
pub use mutual::{Certificate, CertificateLoadError, MutualTlsConfig, MutualTlsError};
pub use policy::{PolicyError, TlsPolicy, TlsVersion};
pub use rustls;
