//! PRELOGIN / TLS / LOGIN7 handshake.

use tds_framer::PacketFramer;
use tds_protocol::token::{ServerMessage, Token};
use tds_protocol::{
    EncryptionLevel, EncryptionMode, FeatureExtension, Login7, PacketType, PreLogin,
    ProtocolError, ServerVersion, TraceId,
};
use tds_tls::{MaybeTlsStream, TlsConnector};
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

use crate::config::{Config, Identity, LogFlags};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::reader::TokenReader;
use crate::session::Session;
use crate::state::HandshakeState;

/// Settle the encryption mode from the client request and server answer.
///
/// A party that answers `NotSupported` gets a clear-text session unless the
/// other side insists on encryption; `Off` on both sides encrypts only the
/// login; everything else encrypts the whole session.
pub fn negotiate_encryption(
    client: EncryptionLevel,
    server: EncryptionLevel,
) -> Result<EncryptionMode> {
    use EncryptionLevel::{NotSupported, Off, On, Required};

    match (client, server) {
        (On | Required, Off | NotSupported) => {
            Err(Error::rejected("server does not support encryption"))
        }
        (NotSupported, Required) => Err(Error::rejected(
            "server requires encryption but the client does not support it",
        )),
        (NotSupported, _) | (Off, NotSupported) => Ok(EncryptionMode::None),
        (Off, Off) => Ok(EncryptionMode::LoginOnly),
        _ => Ok(EncryptionMode::Full),
    }
}

/// Driver version as `major.minor.build`, packed the way PRELOGIN and
/// LOGIN7 expect it.
fn driver_version() -> u32 {
    let part = |s: &str| s.parse::<u32>().unwrap_or(0);
    let major = part(env!("CARGO_PKG_VERSION_MAJOR"));
    let minor = part(env!("CARGO_PKG_VERSION_MINOR"));
    let patch = part(env!("CARGO_PKG_VERSION_PATCH"));
    ((major & 0xFF) << 24) | ((minor & 0xFF) << 16) | (patch & 0xFFFF)
}

/// Handshake state machine.
///
/// Owns the framer until the session is ready, then hands it to the
/// [`Connection`].
#[derive(Debug)]
pub struct Handshake<S> {
    config: Config,
    // Taken out while the stream is being wrapped or unwrapped.
    framer: Option<PacketFramer<MaybeTlsStream<S>>>,
    state: HandshakeState,
    session: Session,
}

impl<S> Handshake<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Prepare a handshake over a freshly dialed stream.
    pub fn new(stream: S, config: Config) -> Self {
        let session = Session::new(
            tds_protocol::DEFAULT_PACKET_SIZE,
            config.keep_alive,
        );
        Self {
            framer: Some(PacketFramer::new(MaybeTlsStream::Plain(stream))),
            config,
            state: HandshakeState::Start,
            session,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Parameters negotiated so far.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Drive the handshake to `Ready` or `Failed`.
    pub async fn run(&mut self) -> Result<()> {
        if self.state != HandshakeState::Start {
            return Err(Error::Config(format!(
                "handshake cannot run from state {:?}",
                self.state
            )));
        }
        let result = self.drive().await;
        if let Err(e) = &result {
            tracing::debug!(state = ?self.state, error = %e, "handshake failed");
            self.transition(HandshakeState::Failed);
            if let Some(framer) = self.framer.as_mut() {
                framer.poison();
            }
        }
        result
    }

    /// Turn a ready handshake into a connection.
    pub fn into_connection(self) -> Result<Connection<S>> {
        match (self.state, self.framer) {
            (HandshakeState::Ready, Some(framer)) => Ok(Connection::from_handshake(
                framer,
                self.session,
                self.config.log,
            )),
            (state, _) => Err(Error::rejected(format!(
                "handshake did not complete (state {state:?})"
            ))),
        }
    }

    fn transition(&mut self, next: HandshakeState) {
        tracing::debug!(from = ?self.state, to = ?next, "handshake state");
        self.state = next;
    }

    fn framer(&mut self) -> Result<&mut PacketFramer<MaybeTlsStream<S>>> {
        self.framer.as_mut().ok_or(Error::Poisoned)
    }

    async fn drive(&mut self) -> Result<()> {
        let request = self.prelogin_request();
        self.framer()?
            .send_message(PacketType::PreLogin, &request.encode())
            .await?;
        self.transition(HandshakeState::PreloginSent);

        let (packet_type, payload) = self.framer()?.read_message().await?;
        if packet_type != PacketType::TabularResult {
            return Err(ProtocolError::malformed(
                "PRELOGIN response",
                format!("unexpected packet type {packet_type:?}"),
            )
            .into());
        }
        let response = PreLogin::decode(&payload)?;
        let mode = negotiate_encryption(self.config.encryption, response.encryption)?;
        self.session.encryption = mode;
        if self.config.log.contains(LogFlags::DEBUG) {
            tracing::debug!(
                server_version = %response.version,
                client = ?self.config.encryption,
                server = ?response.encryption,
                mode = ?mode,
                "PRELOGIN response"
            );
        }
        self.transition(HandshakeState::PreloginAckReceived);

        if mode != EncryptionMode::None {
            self.transition(HandshakeState::TlsUpgrade);
            self.upgrade_tls().await?;
        }

        let login = self.login_request(response.fed_auth_required)?.encode()?;
        self.framer()?
            .send_message(PacketType::Tds7Login, &login)
            .await?;
        if mode == EncryptionMode::LoginOnly {
            self.downgrade_tls()?;
        }
        self.transition(HandshakeState::Login7Sent);

        self.read_login_response().await
    }

    fn prelogin_request(&self) -> PreLogin {
        let mut request = PreLogin::new(self.config.encryption)
            .with_trace_id(TraceId {
                connection_id: *Uuid::new_v4().as_bytes(),
                activity_id: *Uuid::new_v4().as_bytes(),
                activity_sequence: 1,
            })
            .with_fed_auth(matches!(self.config.identity, Identity::BearerToken(_)));
        if let Some(instance) = &self.config.instance {
            request = request.with_instance(instance.clone());
        }
        request.version = ServerVersion::from_raw(driver_version(), 0);
        request.thread_id = std::process::id();
        request
    }

    fn login_request(&self, server_wants_fed_auth: bool) -> Result<Login7> {
        let config = &self.config;
        let mut login = Login7::new()
            .with_packet_size(config.effective_packet_size())
            .with_hostname(config.hostname.clone())
            .with_app_name(config.application_name.clone())
            .with_server_name(config.host.clone())
            .with_read_only_intent(config.read_only_intent);
        login.client_prog_version = driver_version();
        if let Some(database) = &config.database {
            login = login.with_database(database.clone());
        }

        login = match &config.identity {
            Identity::SqlServer { user, password } => login.with_sql_auth(user, password),
            Identity::BearerToken(token) => {
                login.with_feature(FeatureExtension::fed_auth_token(token, server_wants_fed_auth))
            }
            Identity::Integrated(provider) => login.with_integrated_auth(provider.initial_token()?),
        };
        Ok(login)
    }

    async fn upgrade_tls(&mut self) -> Result<()> {
        let connector = TlsConnector::new(self.config.tls.clone())?;
        let framer = self.framer.take().ok_or(Error::Poisoned)?;
        let packet_size = framer.packet_size();
        let (stream, state) = framer.into_parts();
        let MaybeTlsStream::Plain(raw) = stream else {
            return Err(Error::rejected("TLS is already active"));
        };

        let tls = connector.upgrade(raw, &self.config.host, packet_size).await?;
        tracing::debug!("TLS established");
        self.framer = Some(PacketFramer::from_parts(
            MaybeTlsStream::Tls(Box::new(tls)),
            state,
        ));
        Ok(())
    }

    fn downgrade_tls(&mut self) -> Result<()> {
        let framer = self.framer.take().ok_or(Error::Poisoned)?;
        let (stream, state) = framer.into_parts();
        self.framer = Some(PacketFramer::from_parts(stream.downgrade(), state));
        tracing::debug!("login sent; continuing without TLS");
        Ok(())
    }

    async fn read_login_response(&mut self) -> Result<()> {
        let log = self.config.log;
        let mut reader = TokenReader::new();
        let mut acknowledged = false;
        let mut rejection: Option<ServerMessage> = None;
        let mut sspi_reply: Option<Vec<u8>> = None;
        let mut new_packet_size = None;

        loop {
            let framer = self.framer.as_mut().ok_or(Error::Poisoned)?;
            let token = reader.next(framer).await?;
            self.session.spid = framer.spid();

            let Some(token) = token else {
                // A message ended: either answer an SSPI challenge and read
                // the next one, or the login response is complete.
                match sspi_reply.take() {
                    Some(reply) => {
                        framer.send_message(PacketType::Sspi, &reply).await?;
                        continue;
                    }
                    None => break,
                }
            };

            match token {
                Token::LoginAck(ack) => {
                    self.session.apply_login_ack(&ack);
                    acknowledged = true;
                    tracing::debug!(
                        server = %ack.prog_name,
                        version = %ack.prog_version,
                        tds = %ack.tds_version,
                        "login acknowledged"
                    );
                    self.transition(HandshakeState::LoginAckReceived);
                }
                Token::EnvChange(change) => {
                    if let Some(size) = self.session.apply_env_change(&change, log) {
                        new_packet_size = Some(size);
                    }
                }
                Token::Error(message) => {
                    if log.contains(LogFlags::ERRORS) {
                        tracing::warn!(
                            number = message.number,
                            class = message.class,
                            message = %message.message,
                            acknowledged,
                            "login error"
                        );
                    }
                    // Errors after LOGINACK belong to the session, not the login.
                    if !acknowledged {
                        rejection.get_or_insert(message);
                    }
                }
                Token::Info(message) if log.contains(LogFlags::MESSAGES) => {
                    tracing::info!(number = message.number, message = %message.message, "server message");
                }
                Token::FeatureExtAck(acks) => self.session.features = acks,
                Token::Sspi(challenge) => {
                    let Identity::Integrated(provider) = &self.config.identity else {
                        return Err(ProtocolError::malformed(
                            "login response",
                            "SSPI challenge without integrated authentication",
                        )
                        .into());
                    };
                    sspi_reply = provider.next_token(&challenge)?;
                }
                Token::FedAuthInfo(info) => {
                    tracing::debug!(sts_url = %info.sts_url, spn = %info.spn, "federated authentication info");
                }
                _ => {}
            }
        }

        if let Some(message) = rejection {
            return Err(Error::HandshakeRejected {
                number: Some(message.number),
                message: message.message,
            });
        }
        if !acknowledged {
            return Err(Error::rejected("login response ended without LOGINACK"));
        }

        if let Some(size) = new_packet_size {
            let framer = self.framer()?;
            self.session.packet_size = framer.set_packet_size(size);
        }
        if let Some(routing) = &self.session.routing {
            tracing::info!(host = %routing.host, port = routing.port, "login returned a redirect");
        }
        self.transition(HandshakeState::Ready);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use EncryptionLevel::{NotSupported, Off, On, Required};

    #[test]
    fn test_encryption_negotiation() {
        let mode = |c, s| negotiate_encryption(c, s).ok();

        assert_eq!(mode(NotSupported, NotSupported), Some(EncryptionMode::None));
        assert_eq!(mode(Off, NotSupported), Some(EncryptionMode::None));
        assert_eq!(mode(NotSupported, Off), Some(EncryptionMode::None));
        assert_eq!(mode(Off, Off), Some(EncryptionMode::LoginOnly));
        assert_eq!(mode(Off, On), Some(EncryptionMode::Full));
        assert_eq!(mode(Off, Required), Some(EncryptionMode::Full));
        assert_eq!(mode(On, On), Some(EncryptionMode::Full));
        assert_eq!(mode(On, Required), Some(EncryptionMode::Full));
    }

    #[test]
    fn test_encryption_rejections() {
        let rejected = [
            (On, Off),
            (On, NotSupported),
            (Required, NotSupported),
            (NotSupported, Required),
        ];
        for (client, server) in rejected {
            let err = negotiate_encryption(client, server).unwrap_err();
            assert!(
                matches!(err, Error::HandshakeRejected { number: None, .. }),
                "{client:?} x {server:?}"
            );
        }
    }

    #[test]
    fn test_driver_version_packing() {
        let version = ServerVersion::from_raw(driver_version(), 0);
        assert_eq!(version.to_string(), env!("CARGO_PKG_VERSION"));
    }
}
