//! Certificate trust and protocol versions for the in-band TLS upgrade.

use rustls::SupportedProtocolVersion;
use rustls::pki_types::CertificateDer;

use crate::error::TlsError;

/// How the server certificate is checked during the upgrade.
#[derive(Clone, Debug, Default)]
pub enum ServerTrust {
    /// Validate against the bundled Mozilla roots.
    #[default]
    PublicRoots,
    /// Validate against these roots only, typically a private CA or the
    /// server's own self-signed certificate.
    Roots(Vec<CertificateDer<'static>>),
    /// Accept whatever the server presents. The session is encrypted but the
    /// peer is not authenticated.
    AcceptAny,
}

/// TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    /// TLS 1.2, the newest version most SQL Server builds speak in-band.
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    fn rustls(self) -> &'static SupportedProtocolVersion {
        match self {
            Self::Tls12 => &rustls::version::TLS12,
            Self::Tls13 => &rustls::version::TLS13,
        }
    }
}

/// Client-side TLS settings, used only when PRELOGIN negotiates encryption.
#[derive(Clone, Debug)]
pub struct TlsConfig {
    trust: ServerTrust,
    host_name: Option<String>,
    oldest: TlsVersion,
    newest: TlsVersion,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            trust: ServerTrust::default(),
            host_name: None,
            oldest: TlsVersion::Tls12,
            newest: TlsVersion::Tls13,
        }
    }
}

impl TlsConfig {
    /// Public-root validation, TLS 1.2 or 1.3.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the trust policy.
    #[must_use]
    pub fn trust(mut self, trust: ServerTrust) -> Self {
        self.trust = trust;
        self
    }

    /// Trust `cert` as a root. Switches away from the public roots on first
    /// use and accumulates afterwards.
    #[must_use]
    pub fn trust_root(mut self, cert: CertificateDer<'static>) -> Self {
        match &mut self.trust {
            ServerTrust::Roots(roots) => roots.push(cert),
            _ => self.trust = ServerTrust::Roots(vec![cert]),
        }
        self
    }

    /// Check the certificate against `name` instead of the connection host.
    #[must_use]
    pub fn expect_host_name(mut self, name: impl Into<String>) -> Self {
        self.host_name = Some(name.into());
        self
    }

    /// Allow only versions in `oldest..=newest`.
    #[must_use]
    pub fn versions(mut self, oldest: TlsVersion, newest: TlsVersion) -> Self {
        self.oldest = oldest;
        self.newest = newest;
        self
    }

    /// Current trust policy.
    #[must_use]
    pub fn server_trust(&self) -> &ServerTrust {
        &self.trust
    }

    /// Name the certificate must carry, given the host the caller dialed.
    #[must_use]
    pub fn host_name<'a>(&'a self, dialed: &'a str) -> &'a str {
        self.host_name.as_deref().unwrap_or(dialed)
    }

    pub(crate) fn rustls_versions(&self) -> Result<Vec<&'static SupportedProtocolVersion>, TlsError> {
        let versions: Vec<_> = [TlsVersion::Tls12, TlsVersion::Tls13]
            .into_iter()
            .filter(|v| (self.oldest..=self.newest).contains(v))
            .map(TlsVersion::rustls)
            .collect();
        if versions.is_empty() {
            return Err(TlsError::NoVersion {
                oldest: self.oldest,
                newest: self.newest,
            });
        }
        Ok(versions)
    }
}
