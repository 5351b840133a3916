//! TLS connector for establishing encrypted connections.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::TlsConnector as TokioTlsConnector;
use tokio_rustls::client::TlsStream;

use crate::config::{ServerTrust, TlsConfig};
use crate::error::TlsError;
use crate::prelogin_wrapper::TlsPreloginWrapper;

/// Accepts any server certificate. Only installed for
/// [`ServerTrust::AcceptAny`].
#[derive(Debug)]
struct TrustAllVerifier {
    schemes: Vec<SignatureScheme>,
}

impl ServerCertVerifier for TrustAllVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }
}

/// TLS connector for SQL Server connections.
///
/// The TLS handshake travels inside PRELOGIN packets (see
/// [`TlsPreloginWrapper`]); once it finishes the record layer runs directly
/// over the transport.
pub struct TlsConnector {
    config: TlsConfig,
    inner: TokioTlsConnector,
}

impl TlsConnector {
    /// Build a connector; configuration problems surface here, before any
    /// TLS traffic.
    pub fn new(config: TlsConfig) -> Result<Self, TlsError> {
        let client_config = Self::build_client_config(&config)?;
        let inner = TokioTlsConnector::from(Arc::new(client_config));

        Ok(Self { config, inner })
    }

    fn build_client_config(config: &TlsConfig) -> Result<ClientConfig, TlsError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&config.rustls_versions()?)?;

        let roots = match config.server_trust() {
            ServerTrust::AcceptAny => {
                tracing::warn!("server certificate validation is disabled");
                let schemes = provider
                    .signature_verification_algorithms
                    .supported_schemes();
                return Ok(builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(TrustAllVerifier { schemes }))
                    .with_no_client_auth());
            }
            ServerTrust::PublicRoots => RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            },
            ServerTrust::Roots(certs) => {
                let mut store = RootCertStore::empty();
                for cert in certs {
                    store.add(cert.clone()).map_err(TlsError::Root)?;
                }
                store
            }
        };
        Ok(builder.with_root_certificates(roots).with_no_client_auth())
    }

    /// Perform a TLS handshake directly over `stream`.
    ///
    /// `host` is the dialed host; a configured expected host name wins.
    pub async fn connect<S>(&self, stream: S, host: &str) -> Result<TlsStream<S>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let host = self.config.host_name(host);
        let name = ServerName::try_from(host.to_string())
            .map_err(|_| TlsError::HostName(host.to_string()))?;

        tracing::debug!(host = %host, "performing TLS handshake");
        let tls_stream = self
            .inner
            .connect(name, stream)
            .await
            .map_err(|source| TlsError::Handshake {
                host: host.to_string(),
                source,
            })?;
        tracing::debug!("TLS handshake completed");
        Ok(tls_stream)
    }

    /// Upgrade a connection that has finished the PRELOGIN exchange.
    ///
    /// Handshake records are framed as PRELOGIN packets no larger than
    /// `packet_size`. The returned stream carries raw TLS records.
    pub async fn upgrade<S>(
        &self,
        stream: S,
        host: &str,
        packet_size: usize,
    ) -> Result<TlsStream<TlsPreloginWrapper<S>>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let wrapper = TlsPreloginWrapper::new(stream).with_packet_size(packet_size);
        let mut tls_stream = self.connect(wrapper, host).await?;
        tls_stream.get_mut().0.handshake_complete();
        Ok(tls_stream)
    }

    /// Get the underlying configuration.
    #[must_use]
    pub fn config(&self) -> &TlsConfig {
        &self.config
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::TlsVersion;

    #[test]
    fn test_default_config() {
        assert!(TlsConnector::new(TlsConfig::default()).is_ok());
    }

    #[test]
    fn test_accept_any() {
        let config = TlsConfig::new().trust(ServerTrust::AcceptAny);
        let connector = TlsConnector::new(config).unwrap();
        assert!(matches!(
            connector.config().server_trust(),
            ServerTrust::AcceptAny
        ));
    }

    #[test]
    fn test_bad_root_is_rejected() {
        let config = TlsConfig::new().trust_root(CertificateDer::from(vec![0x30, 0x00]));
        assert!(matches!(TlsConnector::new(config), Err(TlsError::Root(_))));
    }

    #[test]
    fn test_empty_version_range() {
        let config = TlsConfig::new().versions(TlsVersion::Tls13, TlsVersion::Tls12);
        assert!(matches!(
            TlsConnector::new(config),
            Err(TlsError::NoVersion { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_host_name() {
        let connector = TlsConnector::new(TlsConfig::new()).unwrap();
        let (client, _server) = tokio::io::duplex(64);
        let err = connector.connect(client, "bad name!").await.unwrap_err();
        assert!(matches!(err, TlsError::HostName(_)));
    }

    #[tokio::test]
    async fn test_closed_peer_fails_handshake() {
        let connector = TlsConnector::new(TlsConfig::new()).unwrap();
        let (client, server) = tokio::io::duplex(64);
        drop(server);
        let err = connector.connect(client, "db.example.com").await.unwrap_err();
        assert!(matches!(err, TlsError::Handshake { ref host, .. } if host == "db.example.com"));
    }
}
