//! Negotiated session parameters.

use std::time::Duration;

use tds_protocol::token::{EnvChange, FeatureAck, LoginAck};
use tds_protocol::{EncryptionMode, ServerVersion, TdsVersion};
use tds_types::Collation;

use crate::config::LogFlags;

/// Redirect target announced by the server during login.
///
/// The engine never follows it; reconnecting is up to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routing {
    /// Alternate server host.
    pub host: String,
    /// Alternate server port.
    pub port: u16,
}

/// Parameters agreed during the handshake and maintained from ENVCHANGE
/// tokens afterwards.
#[derive(Debug, Clone)]
pub struct Session {
    pub(crate) packet_size: usize,
    pub(crate) encryption: EncryptionMode,
    pub(crate) tds_version: Option<TdsVersion>,
    pub(crate) server_name: String,
    pub(crate) server_version: Option<ServerVersion>,
    pub(crate) routing: Option<Routing>,
    pub(crate) collation: Option<Collation>,
    pub(crate) database: Option<String>,
    pub(crate) language: Option<String>,
    pub(crate) spid: u16,
    pub(crate) keep_alive: Option<Duration>,
    pub(crate) transaction: u64,
    pub(crate) features: Vec<FeatureAck>,
}

impl Session {
    pub(crate) fn new(packet_size: usize, keep_alive: Option<Duration>) -> Self {
        Self {
            packet_size,
            encryption: EncryptionMode::None,
            tds_version: None,
            server_name: String::new(),
            server_version: None,
            routing: None,
            collation: None,
            database: None,
            language: None,
            spid: 0,
            keep_alive,
            transaction: 0,
            features: Vec::new(),
        }
    }

    /// Negotiated packet size, header included.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Encryption in effect.
    #[must_use]
    pub fn encryption(&self) -> EncryptionMode {
        self.encryption
    }

    /// TDS version acknowledged by the server.
    #[must_use]
    pub fn tds_version(&self) -> Option<TdsVersion> {
        self.tds_version
    }

    /// Server program name from LOGINACK.
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Server program version from LOGINACK.
    #[must_use]
    pub fn server_version(&self) -> Option<ServerVersion> {
        self.server_version
    }

    /// Redirect target, when the server asked for one.
    #[must_use]
    pub fn routing(&self) -> Option<&Routing> {
        self.routing.as_ref()
    }

    /// Default collation of the current database.
    #[must_use]
    pub fn collation(&self) -> Option<&Collation> {
        self.collation.as_ref()
    }

    /// Current database.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Current language.
    #[must_use]
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    /// Server process id from the reply packet headers.
    #[must_use]
    pub fn spid(&self) -> u16 {
        self.spid
    }

    /// Keep-alive interval to apply to the transport.
    #[must_use]
    pub fn keep_alive(&self) -> Option<Duration> {
        self.keep_alive
    }

    /// Active transaction descriptor; 0 outside a transaction.
    #[must_use]
    pub fn transaction_descriptor(&self) -> u64 {
        self.transaction
    }

    /// Whether a transaction is active.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.transaction != 0
    }

    /// Feature extensions the server acknowledged.
    #[must_use]
    pub fn features(&self) -> &[FeatureAck] {
        &self.features
    }

    pub(crate) fn apply_login_ack(&mut self, ack: &LoginAck) {
        self.tds_version = Some(ack.tds_version);
        self.server_name.clone_from(&ack.prog_name);
        self.server_version = Some(ack.prog_version);
    }

    /// Apply an ENVCHANGE. Returns the new packet size when it changed; the
    /// caller re-frames once the current message is read.
    pub(crate) fn apply_env_change(&mut self, change: &EnvChange, log: LogFlags) -> Option<u32> {
        match change {
            EnvChange::Database { new, .. } => {
                tracing::debug!(database = %new, "database changed");
                self.database = Some(new.clone());
            }
            EnvChange::Language { new, .. } => {
                self.language = Some(new.clone());
            }
            EnvChange::PacketSize { new, old } => {
                tracing::info!(new = *new, old = *old, "server changed packet size");
                return Some(*new);
            }
            EnvChange::Collation { new } => {
                self.collation = *new;
            }
            EnvChange::BeginTransaction { descriptor } => {
                if log.contains(LogFlags::TRANSACTION) {
                    tracing::info!(descriptor, "transaction started");
                }
                self.transaction = *descriptor;
            }
            EnvChange::CommitTransaction { .. } | EnvChange::RollbackTransaction { .. } => {
                if log.contains(LogFlags::TRANSACTION) {
                    let committed = matches!(change, EnvChange::CommitTransaction { .. });
                    tracing::info!(descriptor = self.transaction, committed, "transaction ended");
                }
                self.transaction = 0;
            }
            EnvChange::Routing { port, server, .. } => {
                tracing::info!(host = %server, port = *port, "server requested routing");
                self.routing = Some(Routing {
                    host: server.clone(),
                    port: *port,
                });
            }
            EnvChange::CharacterSet { .. } | EnvChange::Other { .. } => {}
        }
        None
    }
}
