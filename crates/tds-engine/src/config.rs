//! Session configuration.
//!
//! Connection-string parsing and the TCP dial (port, dial timeout) are the
//! caller's job; [`Config`] receives already-split parameters through
//! builder setters and checks them with [`Config::validate`] before any
//! byte is written.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use tds_protocol::{EncryptionLevel, MAX_PACKET_SIZE, MIN_PACKET_SIZE, clamp_packet_size};
use tds_tls::{ServerTrust, TlsConfig};

use crate::error::{Error, Result};

/// Produces SSPI blobs for integrated authentication.
///
/// The engine treats the blobs as opaque. The first one travels in LOGIN7;
/// every SSPI token the server sends is handed to
/// [`SspiProvider::next_token`] and the answer, if any, is sent back in an
/// SSPI message.
pub trait SspiProvider: Send + Sync {
    /// Blob for the LOGIN7 request.
    fn initial_token(&self) -> Result<Vec<u8>>;

    /// Answer a server challenge. `None` ends the exchange.
    fn next_token(&self, challenge: &[u8]) -> Result<Option<Vec<u8>>>;
}

/// Who the session logs in as.
#[derive(Clone)]
pub enum Identity {
    /// SQL Server login.
    SqlServer {
        /// Login name.
        user: String,
        /// Password.
        password: String,
    },
    /// Pre-acquired federated authentication token.
    BearerToken(String),
    /// Integrated authentication through a caller-supplied provider.
    Integrated(Arc<dyn SspiProvider>),
}

impl Identity {
    /// SQL Server login.
    pub fn sql_server(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self::SqlServer {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Bearer token login.
    pub fn bearer_token(token: impl Into<String>) -> Self {
        Self::BearerToken(token.into())
    }

    /// Integrated login.
    pub fn integrated(provider: impl SspiProvider + 'static) -> Self {
        Self::Integrated(Arc::new(provider))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SqlServer { user, .. } => f
                .debug_struct("SqlServer")
                .field("user", user)
                .field("password", &"<redacted>")
                .finish(),
            Self::BearerToken(_) => f.debug_tuple("BearerToken").field(&"<redacted>").finish(),
            Self::Integrated(_) => f.debug_tuple("Integrated").finish(),
        }
    }
}

bitflags! {
    /// Categories of events the engine emits through `tracing`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LogFlags: u32 {
        /// Server errors.
        const ERRORS = 1;
        /// Server informational messages.
        const MESSAGES = 2;
        /// Row counts.
        const ROWS = 4;
        /// SQL text of batches.
        const SQL = 8;
        /// RPC parameters.
        const PARAMS = 16;
        /// Transaction begin, commit and rollback.
        const TRANSACTION = 32;
        /// Handshake and protocol detail.
        const DEBUG = 64;
    }
}

impl Default for LogFlags {
    fn default() -> Self {
        Self::ERRORS | Self::MESSAGES
    }
}

/// Configuration for a TDS session.
///
/// This struct is marked `#[non_exhaustive]`; build it with
/// [`Config::new`] and the setters.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// Server host name, also used for TLS validation and LOGIN7.
    pub host: String,
    /// Named instance, sent in PRELOGIN.
    pub instance: Option<String>,
    /// Initial database.
    pub database: Option<String>,
    /// Application name shown in server tools.
    pub application_name: String,
    /// Client machine name sent in LOGIN7.
    pub hostname: String,
    /// Login identity.
    pub identity: Identity,
    /// Requested encryption.
    pub encryption: EncryptionLevel,
    /// TLS settings used when encryption is negotiated.
    pub tls: TlsConfig,
    /// Requested packet size, clamped into 512..=32767.
    pub packet_size: u32,
    /// Declare read-only application intent.
    pub read_only_intent: bool,
    /// Time allowed from PRELOGIN to a ready session (default: 30s).
    pub login_timeout: Duration,
    /// TCP keep-alive interval the caller should apply to the socket.
    pub keep_alive: Option<Duration>,
    /// Event categories to log.
    pub log: LogFlags,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            instance: None,
            database: None,
            application_name: "tds-engine".to_string(),
            hostname: String::new(),
            identity: Identity::sql_server("", ""),
            encryption: EncryptionLevel::Off,
            tls: TlsConfig::default(),
            packet_size: 4096,
            read_only_intent: false,
            login_timeout: Duration::from_secs(30),
            keep_alive: Some(Duration::from_secs(30)),
            log: LogFlags::default(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the named instance.
    #[must_use]
    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Set the initial database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set the client machine name.
    #[must_use]
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Set the login identity.
    #[must_use]
    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    /// Set the requested encryption.
    #[must_use]
    pub fn encryption(mut self, level: EncryptionLevel) -> Self {
        self.encryption = level;
        self
    }

    /// Set the TLS configuration.
    #[must_use]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Accept the server certificate without validation.
    #[must_use]
    pub fn trust_server_certificate(mut self) -> Self {
        self.tls = self.tls.trust(ServerTrust::AcceptAny);
        self
    }

    /// Request a packet size.
    ///
    /// Values outside 512..=32767 are clamped; 0 becomes 512.
    #[must_use]
    pub fn packet_size(mut self, size: u32) -> Self {
        self.packet_size = size;
        self
    }

    /// Declare read-only application intent.
    #[must_use]
    pub fn read_only_intent(mut self, read_only: bool) -> Self {
        self.read_only_intent = read_only;
        self
    }

    /// Set the login timeout.
    #[must_use]
    pub fn login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = timeout;
        self
    }

    /// Set the keep-alive interval.
    #[must_use]
    pub fn keep_alive(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive = interval;
        self
    }

    /// Set the log categories.
    #[must_use]
    pub fn log(mut self, flags: LogFlags) -> Self {
        self.log = flags;
        self
    }

    /// Packet size that will be requested in LOGIN7.
    #[must_use]
    pub fn effective_packet_size(&self) -> u32 {
        let size = clamp_packet_size(self.packet_size);
        if size != self.packet_size as usize {
            tracing::debug!(
                requested = self.packet_size,
                clamped = size,
                min = MIN_PACKET_SIZE,
                max = MAX_PACKET_SIZE,
                "packet size clamped"
            );
        }
        size as u32
    }

    /// Check the configuration before connecting.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".into()));
        }
        if self.login_timeout.is_zero() {
            return Err(Error::Config("login timeout must be greater than zero".into()));
        }
        check_length("application name", &self.application_name)?;
        check_length("hostname", &self.hostname)?;
        if let Some(database) = &self.database {
            check_length("database", database)?;
        }

        match &self.identity {
            Identity::SqlServer { user, password } => {
                if user.is_empty() {
                    return Err(Error::Config("SQL login requires a user name".into()));
                }
                check_length("user", user)?;
                check_length("password", password)?;
            }
            Identity::BearerToken(token) => {
                if token.is_empty() {
                    return Err(Error::Config("bearer token must not be empty".into()));
                }
                if self.encryption == EncryptionLevel::NotSupported {
                    return Err(Error::Config(
                        "bearer token authentication requires encryption".into(),
                    ));
                }
            }
            Identity::Integrated(_) => {}
        }
        Ok(())
    }
}

fn check_length(field: &str, value: &str) -> Result<()> {
    if value.encode_utf16().count() > 128 {
        return Err(Error::Config(format!("{field} exceeds 128 characters")));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config::new()
            .host("db.example.com")
            .identity(Identity::sql_server("sa", "secret"))
    }

    #[test]
    fn test_builder() {
        let config = valid()
            .database("orders")
            .application_name("reporting")
            .read_only_intent(true)
            .log(LogFlags::ERRORS | LogFlags::SQL);

        assert_eq!(config.database.as_deref(), Some("orders"));
        assert!(config.read_only_intent);
        assert!(config.log.contains(LogFlags::SQL));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_packet_size_clamped() {
        assert_eq!(valid().packet_size(0).effective_packet_size(), 512);
        assert_eq!(valid().packet_size(100).effective_packet_size(), 512);
        assert_eq!(valid().packet_size(8192).effective_packet_size(), 8192);
        assert_eq!(valid().packet_size(65535).effective_packet_size(), 32767);
    }

    #[test]
    fn test_validate_rejects() {
        assert!(matches!(valid().host("").validate(), Err(Error::Config(_))));
        assert!(matches!(
            valid().identity(Identity::sql_server("", "x")).validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            valid()
                .identity(Identity::bearer_token("eyJ0"))
                .encryption(EncryptionLevel::NotSupported)
                .validate(),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            valid().application_name("x".repeat(200)).validate(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let debug = format!("{:?}", Identity::sql_server("sa", "hunter2"));
        assert!(debug.contains("sa"));
        assert!(!debug.contains("hunter2"));

        let debug = format!("{:?}", Identity::bearer_token("token-value"));
        assert!(!debug.contains("token-value"));
    }

    #[test]
    fn test_log_flags_bits() {
        assert_eq!(LogFlags::from_bits(127), Some(LogFlags::all()));
        assert_eq!(LogFlags::default().bits(), 3);
    }
}
