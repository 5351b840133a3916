//! Failures of the in-band TLS upgrade.

use thiserror::Error;

use crate::config::TlsVersion;

/// Why the upgrade after PRELOGIN could not produce an encrypted stream.
///
/// Everything except [`TlsError::Handshake`] is detected before a byte of
/// TLS traffic is written.
#[derive(Debug, Error)]
pub enum TlsError {
    /// The configured version range is empty.
    #[error("no TLS version between {oldest:?} and {newest:?}")]
    NoVersion {
        /// Oldest allowed version.
        oldest: TlsVersion,
        /// Newest allowed version.
        newest: TlsVersion,
    },

    /// A configured root could not be added to the trust store.
    #[error("trusted root rejected")]
    Root(#[source] rustls::Error),

    /// The name to validate against is neither a DNS name nor an IP address.
    #[error("{0:?} cannot be checked against a certificate")]
    HostName(String),

    /// rustls refused the client settings.
    #[error(transparent)]
    Rustls(#[from] rustls::Error),

    /// The handshake carried in PRELOGIN packets failed.
    #[error("TLS handshake with {host} failed")]
    Handshake {
        /// Name the certificate was checked against.
        host: String,
        /// Transport or alert that ended the handshake.
        #[source]
        source: std::io::Error,
    },
}
