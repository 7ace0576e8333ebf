//! Startup plumbing shared by logcache processes.
//!
//! A process calls [`Config::load`] once, logs it with [`Config::report`],
//! and turns the TLS section into transport credentials:
//!
//! ```no_run
//! let config = match logcache::Config::load() {
//!     Ok(config) => config,
//!     Err(e) => {
//!         eprintln!("{}", e);
//!         std::process::exit(1);
//!     }
//! };
//! config.report();
//! let creds = config.tls.credentials_or_exit("logcache.example.com");
//! # let _ = creds;
//! ```
//!
//! The TLS machinery itself lives in [`logcache_tls`].

#![warn(missing_docs)]

pub mod config;
mod tls;

pub use config::{Config, ConfigError, TlsPaths};
pub use logcache_tls;
