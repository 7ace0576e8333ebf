use crate::config::TlsPaths;
use logcache_tls::{MutualTlsError, TransportCredentials};

impl TlsPaths {
    /// Build mutual TLS credentials from these files, expecting peers to
    /// present a certificate for `server_name`.
    pub fn credentials(&self, server_name: &str) -> Result<TransportCredentials, MutualTlsError> {
        TransportCredentials::new(&self.ca_path, &self.cert_path, &self.key_path, server_name)
    }

    /// Like [`TlsPaths::credentials`], for processes that cannot start
    /// without TLS: the error is logged and the process exits with status 1.
    pub fn credentials_or_exit(&self, server_name: &str) -> TransportCredentials {
        match self.credentials(server_name) {
            Ok(creds) => creds,
            Err(e) => {
                log::error!("failed to load TLS config: {}", e);
                std::process::exit(1);
            }
        }
    }
}
