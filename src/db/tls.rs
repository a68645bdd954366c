//! TLS for batch connections.
//!
//! `sslmode` follows libpq, matching the catalog connection: `prefer` and
//! `require` encrypt without checking the server certificate, `verify-ca`
//! checks the chain against the web PKI roots and `verify-full` also checks
//! the host name. tokio-postgres only knows `disable`, `prefer` and
//! `require`, so the verify modes are handed to it as `require` and enforced
//! by the rustls verifier.

use crate::error::{Result, SqlCmdrError};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{ring, verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
};
use std::sync::Arc;
use tokio_postgres_rustls::MakeRustlsConnect;
use url::Url;

/// Requested transport security.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SslMode {
    Disable,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "disable" => Ok(Self::Disable),
            // Plaintext first is not supported; TLS is attempted and dropped
            // only if the server refuses it.
            "allow" | "prefer" => Ok(Self::Prefer),
            "require" => Ok(Self::Require),
            "verify-ca" => Ok(Self::VerifyCa),
            "verify-full" => Ok(Self::VerifyFull),
            other => Err(SqlCmdrError::connection(format!(
                "invalid sslmode value: \"{other}\""
            ))),
        }
    }

    /// The value tokio-postgres accepts for this mode.
    fn wire_value(self) -> &'static str {
        match self {
            Self::Disable => "disable",
            Self::Prefer => "prefer",
            Self::Require | Self::VerifyCa | Self::VerifyFull => "require",
        }
    }
}

/// Reads `sslmode` from a URL or key-value connection string and rewrites it
/// to a value tokio-postgres parses. Without `sslmode` the mode is `prefer`.
pub fn split_ssl_mode(connection_string: &str) -> Result<(String, SslMode)> {
    let trimmed = connection_string.trim();
    if trimmed.starts_with("postgres://") || trimmed.starts_with("postgresql://") {
        split_url(trimmed)
    } else {
        split_key_value(trimmed)
    }
}

fn split_url(connection_string: &str) -> Result<(String, SslMode)> {
    // Multi-host URLs are not valid for `url`; tokio-postgres reports on them.
    let Ok(mut url) = Url::parse(connection_string) else {
        return Ok((connection_string.to_string(), SslMode::default()));
    };

    let mut mode = SslMode::default();
    let mut pairs = Vec::new();
    for (key, value) in url.query_pairs() {
        if key == "sslmode" {
            mode = SslMode::parse(&value)?;
            pairs.push((key.into_owned(), mode.wire_value().to_string()));
        } else {
            pairs.push((key.into_owned(), value.into_owned()));
        }
    }

    if pairs.is_empty() {
        return Ok((connection_string.to_string(), mode));
    }
    url.query_pairs_mut().clear().extend_pairs(pairs);
    Ok((url.to_string(), mode))
}

fn split_key_value(connection_string: &str) -> Result<(String, SslMode)> {
    let Some(token) = connection_string
        .split_whitespace()
        .find(|token| token.starts_with("sslmode="))
    else {
        return Ok((connection_string.to_string(), SslMode::default()));
    };

    let mode = SslMode::parse(token.trim_start_matches("sslmode=").trim_matches('\''))?;
    let rewritten =
        connection_string.replacen(token, &format!("sslmode={}", mode.wire_value()), 1);
    Ok((rewritten, mode))
}

/// Builds the tokio-postgres TLS connector for `mode`.
///
/// The same connector is used to send cancel requests.
pub fn make_connector(mode: SslMode) -> Result<MakeRustlsConnect> {
    let provider = Arc::new(ring::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(tls_error)?;

    let config = match mode {
        SslMode::VerifyFull => builder
            .with_root_certificates(web_pki_roots())
            .with_no_client_auth(),
        SslMode::VerifyCa => {
            let inner = WebPkiServerVerifier::builder_with_provider(
                Arc::new(web_pki_roots()),
                Arc::clone(&provider),
            )
            .build()
            .map_err(tls_error)?;
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(ChainOnlyVerifier { inner }))
                .with_no_client_auth()
        }
        SslMode::Disable | SslMode::Prefer | SslMode::Require => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(UnverifiedCertificate { provider }))
            .with_no_client_auth(),
    };

    Ok(MakeRustlsConnect::new(config))
}

fn web_pki_roots() -> RootCertStore {
    RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    }
}

fn tls_error(error: impl std::fmt::Display) -> SqlCmdrError {
    SqlCmdrError::connection(format!("TLS configuration error: {error}"))
}

/// Accepts any server certificate while still checking handshake signatures.
#[derive(Debug)]
struct UnverifiedCertificate {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for UnverifiedCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Checks the certificate chain but not the host name.
#[derive(Debug)]
struct ChainOnlyVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for ChainOnlyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Err(rustls::Error::InvalidCertificate(CertificateError::NotValidForName)) => {
                Ok(ServerCertVerified::assertion())
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}
