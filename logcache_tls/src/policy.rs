//! The security floor every TLS configuration is built on.
//!
//! A [`TlsPolicy`] is a plain immutable value. [`TlsPolicy::BASELINE`] is
//! what production uses; tests and unusual deployments can pass a
//! different one to [`crate::MutualTlsConfig::build_with_policy`].

use rustls::crypto::CryptoProvider;
use rustls::{CipherSuite, ProtocolVersion, SupportedProtocolVersion};
use std::sync::Arc;
use thiserror::Error;

static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

/// Cipher suites permitted by [`TlsPolicy::BASELINE`], in preference order.
///
/// rustls applies the list to TLS 1.3 as well as TLS 1.2, so the TLS 1.3
/// AEAD suites appear explicitly. For TLS 1.2 only ECDHE key exchange with
/// RSA authentication and AES-GCM is allowed.
pub const BASELINE_CIPHER_SUITES: &[CipherSuite] = &[
    CipherSuite::TLS13_AES_128_GCM_SHA256,
    CipherSuite::TLS13_AES_256_GCM_SHA384,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    CipherSuite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
];

/// Lowest protocol version a [`TlsPolicy`] will negotiate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    /// TLS 1.2 and TLS 1.3 are both acceptable.
    Tls12,
    /// Only TLS 1.3 is acceptable.
    Tls13,
}

impl TlsVersion {
    /// The wire protocol version this corresponds to.
    pub fn protocol_version(self) -> ProtocolVersion {
        match self {
            Self::Tls12 => ProtocolVersion::TLSv1_2,
            Self::Tls13 => ProtocolVersion::TLSv1_3,
        }
    }
}

/// Error type returned when a [`TlsPolicy`] cannot be applied.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The policy does not permit any cipher suite at all.
    #[error("TLS policy permits no cipher suites")]
    NoCipherSuites,
    /// The policy names a cipher suite the crypto provider cannot do.
    #[error("cipher suite {0:?} is not supported by the crypto provider")]
    UnsupportedCipherSuite(CipherSuite),
}

/// Minimum protocol version and the ordered set of permitted cipher suites.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TlsPolicy {
    /// No protocol version below this is negotiated.
    pub min_version: TlsVersion,
    /// Permitted cipher suites, most preferred first.
    pub cipher_suites: &'static [CipherSuite],
}

impl TlsPolicy {
    /// The policy used for every logcache connection.
    pub const BASELINE: TlsPolicy = TlsPolicy {
        min_version: TlsVersion::Tls12,
        cipher_suites: BASELINE_CIPHER_SUITES,
    };

    /// All protocol versions rustls supports at or above
    /// [`TlsPolicy::min_version`].
    pub fn protocol_versions(&self) -> &'static [&'static SupportedProtocolVersion] {
        match self.min_version {
            TlsVersion::Tls12 => rustls::ALL_VERSIONS,
            TlsVersion::Tls13 => TLS13_ONLY,
        }
    }

    /// Copy `base`, keeping only the cipher suites this policy permits, in
    /// the policy's order. Everything else about the provider (key exchange
    /// groups, signature algorithms, randomness) is kept as-is.
    pub fn crypto_provider(&self, base: &CryptoProvider) -> Result<CryptoProvider, PolicyError> {
        if self.cipher_suites.is_empty() {
            return Err(PolicyError::NoCipherSuites);
        }
        let cipher_suites = self
            .cipher_suites
            .iter()
            .map(|id| {
                base.cipher_suites
                    .iter()
                    .find(|s| s.suite() == *id)
                    .copied()
                    .ok_or(PolicyError::UnsupportedCipherSuite(*id))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CryptoProvider {
            cipher_suites,
            ..base.clone()
        })
    }
}

impl Default for TlsPolicy {
    fn default() -> Self {
        Self::BASELINE
    }
}

/// The process-global default [`CryptoProvider`] if one has been installed,
/// otherwise the `aws-lc-rs` one.
pub fn default_crypto_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}
