//! rustls connectors for the source database, keyed by libpq's `sslmode`.

use std::str::FromStr;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, warn};

use crate::error::{ReconcileError, Result};

/// The subset of `sslmode` values the auditor accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    #[default]
    Disable,
    /// Encrypted, but any server certificate is accepted.
    Require,
    VerifyCa,
    VerifyFull,
}

impl FromStr for SslMode {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self> {
        let mode = match s.trim().to_ascii_lowercase().as_str() {
            "" | "disable" => SslMode::Disable,
            "require" => SslMode::Require,
            "verify-ca" => SslMode::VerifyCa,
            "verify-full" => SslMode::VerifyFull,
            other => {
                return Err(ReconcileError::Config(format!(
                    "database.ssl_mode '{}' is not one of disable, require, verify-ca, verify-full",
                    other
                )))
            }
        };
        Ok(mode)
    }
}

impl SslMode {
    /// The mode actually enforced on the wire.
    ///
    /// rustls has no way to check the chain while skipping the hostname, so
    /// `verify-ca` is enforced as `verify-full`. Servers whose certificate
    /// does not name the configured host will be rejected.
    pub fn effective(self) -> SslMode {
        match self {
            SslMode::VerifyCa => {
                warn!(
                    "ssl_mode=verify-ca is enforced as verify-full: the server hostname \
                     must also match its certificate"
                );
                SslMode::VerifyFull
            }
            mode => mode,
        }
    }

    /// Connector for deadpool-postgres; `None` means plain TCP.
    pub fn connector(self) -> Result<Option<MakeRustlsConnect>> {
        let config = match self.effective() {
            SslMode::Disable => return Ok(None),
            SslMode::Require => {
                warn!(
                    "ssl_mode=require does not authenticate the database server; \
                     prefer verify-full outside test environments"
                );
                ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new()))
                    .with_no_client_auth()
            }
            _ => {
                let roots = RootCertStore {
                    roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
                };
                debug!("Verifying database certificate against {} roots", roots.len());
                ClientConfig::builder()
                    .with_root_certificates(roots)
                    .with_no_client_auth()
            }
        };
        Ok(Some(MakeRustlsConnect::new(config)))
    }
}

/// Server certificate verifier for `require`: trusts every chain but still
/// reports the schemes the crypto provider can check.
#[derive(Debug)]
struct AcceptAnyServerCert {
    schemes: Vec<SignatureScheme>,
}

impl AcceptAnyServerCert {
    fn new() -> Self {
        let schemes = rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes();
        Self { schemes }
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _: &CertificateDer<'_>,
        _: &[CertificateDer<'_>],
        _: &ServerName<'_>,
        _: &[u8],
        _: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _: &[u8],
        _: &CertificateDer<'_>,
        _: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _: &[u8],
        _: &CertificateDer<'_>,
        _: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssl_mode_from_str() {
        assert_eq!("".parse::<SslMode>().unwrap(), SslMode::Disable);
        assert_eq!(" Require ".parse::<SslMode>().unwrap(), SslMode::Require);
        assert_eq!("verify-ca".parse::<SslMode>().unwrap(), SslMode::VerifyCa);
        assert_eq!("VERIFY-FULL".parse::<SslMode>().unwrap(), SslMode::VerifyFull);

        let err = "prefer".parse::<SslMode>().unwrap_err();
        assert!(matches!(err, ReconcileError::Config(_)));
        assert!(err.to_string().contains("prefer"));
    }

    #[test]
    fn test_verify_ca_enforced_as_verify_full() {
        assert_eq!(SslMode::VerifyCa.effective(), SslMode::VerifyFull);
        assert_eq!(SslMode::VerifyFull.effective(), SslMode::VerifyFull);
        assert_eq!(SslMode::Require.effective(), SslMode::Require);
        assert_eq!(SslMode::Disable.effective(), SslMode::Disable);
    }

    #[test]
    fn test_connector_per_mode() {
        assert!(SslMode::Disable.connector().unwrap().is_none());
        assert!(SslMode::Require.connector().unwrap().is_some());
        assert!(SslMode::VerifyCa.connector().unwrap().is_some());
        assert!(SslMode::VerifyFull.connector().unwrap().is_some());
    }

    #[test]
    fn test_accept_any_reports_provider_schemes() {
        assert!(!AcceptAnyServerCert::new().supported_verify_schemes().is_empty());
    }
}
