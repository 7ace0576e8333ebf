use crate::{MutualTlsConfig, MutualTlsError};
use std::path::PathBuf;

/// Issuer of [`CERT`].
pub(crate) const CACERT: &[u8] = include_bytes!("../testdata/ca.pem");
/// 2048-bit RSA leaf for `logcache.example.com`, usable as client or server.
pub(crate) const CERT: &[u8] = include_bytes!("../testdata/cert.pem");
pub(crate) const KEY: &[u8] = include_bytes!("../testdata/key.pem");
/// An RSA key unrelated to [`CERT`].
pub(crate) const OTHER_KEY: &[u8] = include_bytes!("../testdata/other_key.pem");
/// A CA that did not issue [`CERT`].
pub(crate) const ROGUE_CACERT: &[u8] = include_bytes!("../testdata/rogue_ca.pem");

pub(crate) const SERVER_NAME: &str = "logcache.example.com";

pub(crate) struct Files {
    pub(crate) dir: tempfile::TempDir,
}

impl Files {
    /// A directory holding a matching CA bundle, certificate and key.
    pub(crate) fn new() -> std::io::Result<Self> {
        let files = Self {
            dir: tempfile::tempdir()?,
        };
        files.write("ca", CACERT)?;
        files.write("cert", CERT)?;
        files.write("key", KEY)?;
        Ok(files)
    }

    pub(crate) fn write(&self, name: &str, contents: &[u8]) -> std::io::Result<PathBuf> {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    pub(crate) fn ca_path(&self) -> PathBuf {
        self.dir.path().join("ca")
    }

    pub(crate) fn cert_path(&self) -> PathBuf {
        self.dir.path().join("cert")
    }

    pub(crate) fn key_path(&self) -> PathBuf {
        self.dir.path().join("key")
    }

    pub(crate) fn build(&self) -> Result<MutualTlsConfig, MutualTlsError> {
        MutualTlsConfig::build(
            self.ca_path(),
            self.cert_path(),
            self.key_path(),
            SERVER_NAME,
        )
    }
}
