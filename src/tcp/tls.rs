//! rustls client configuration.
//!
//! The verifier never aborts the handshake on a bad certificate. It records
//! the validation outcome so the connection can decide, after the handshake,
//! whether to proceed (`sslValidate` unset) or close (`sslValidate` set).

use std::sync::{Arc, Mutex, PoisonError};

use tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::client::WebPkiServerVerifier;
use tokio_rustls::rustls::crypto::{ring, CryptoProvider};
use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{self, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::config::TlsOptions;
use crate::types::{Result, StompError};

/// Outcome of peer certificate validation for one handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsStatus {
    pub peer_certificate_valid: bool,
    pub authorization_error: Option<String>,
}

/// Shared slot the verifier writes into during the handshake.
#[derive(Debug, Clone, Default)]
pub(crate) struct ValidationRecord {
    error: Arc<Mutex<Option<String>>>,
}

impl ValidationRecord {
    fn record(&self, reason: String) {
        *self.error.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason);
    }

    pub(crate) fn status(&self) -> TlsStatus {
        let error = self
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        TlsStatus {
            peer_certificate_valid: error.is_none(),
            authorization_error: error,
        }
    }
}

#[derive(Debug)]
struct RecordingVerifier {
    inner: Arc<WebPkiServerVerifier>,
    record: ValidationRecord,
}

impl ServerCertVerifier for RecordingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if let Err(e) =
            self.inner
                .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            self.record.record(e.to_string());
        }
        Ok(ServerCertVerified::assertion())
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

fn root_store(options: &TlsOptions) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    if options.webpki_roots {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    if let Some(path) = &options.ca_file {
        let certs = CertificateDer::pem_file_iter(path)
            .map_err(|e| StompError::Tls(format!("{}: {}", path.display(), e)))?;
        for cert in certs {
            let cert = cert.map_err(|e| StompError::Tls(format!("{}: {}", path.display(), e)))?;
            roots
                .add(cert)
                .map_err(|e| StompError::Tls(e.to_string()))?;
        }
    }
    Ok(roots)
}

/// Build a client config whose verifier reports into the returned record.
pub(crate) fn client_config(options: &TlsOptions) -> Result<(Arc<ClientConfig>, ValidationRecord)> {
    let provider: Arc<CryptoProvider> = Arc::new(ring::default_provider());
    let roots = Arc::new(root_store(options)?);

    let inner = WebPkiServerVerifier::builder_with_provider(roots, provider.clone())
        .build()
        .map_err(|e| StompError::Tls(e.to_string()))?;
    let record = ValidationRecord::default();
    let verifier = Arc::new(RecordingVerifier {
        inner,
        record: record.clone(),
    });

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| StompError::Tls(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();

    Ok((Arc::new(config), record))
}

/// Resolve the name the certificate is checked against.
pub(crate) fn server_name(host: &str, options: &TlsOptions) -> Result<ServerName<'static>> {
    let name = options.server_name.as_deref().unwrap_or(host).to_string();
    ServerName::try_from(name.clone()).map_err(|_| StompError::InvalidServerName(name))
}
