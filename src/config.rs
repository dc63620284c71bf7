//! Client configuration.

use std::path::PathBuf;

use serde::Deserialize;

use crate::types::{Result, DEFAULT_HOST, DEFAULT_PORT, SUPPORTED_VERSIONS};

/// Connection settings recognised by [`StompClient`](crate::StompClient).
///
/// Deserializes from the camelCase keys used by broker configuration files
/// (`clientId`, `acceptVersions`, `sslValidate`, ...); missing keys take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub login: Option<String>,
    pub passcode: Option<String>,
    #[serde(alias = "client-id")]
    pub client_id: Option<String>,
    /// Sent as the CONNECT `host` header.
    pub vhost: Option<String>,
    #[serde(alias = "accept-version")]
    pub accept_versions: String,
    pub ssl: bool,
    /// Abort the connection when the peer certificate does not validate.
    #[serde(alias = "ssl_validate")]
    pub ssl_validate: bool,
    #[serde(alias = "ssl_options")]
    pub ssl_options: TlsOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            login: None,
            passcode: None,
            client_id: None,
            vhost: None,
            accept_versions: SUPPORTED_VERSIONS.to_string(),
            ssl: false,
            ssl_validate: false,
            ssl_options: TlsOptions::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Parse a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn credentials(mut self, login: impl Into<String>, passcode: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self.passcode = Some(passcode.into());
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn vhost(mut self, vhost: impl Into<String>) -> Self {
        self.vhost = Some(vhost.into());
        self
    }

    pub fn accept_versions(mut self, versions: impl Into<String>) -> Self {
        self.accept_versions = versions.into();
        self
    }

    /// Enable TLS. With `validate` set, an unverifiable peer certificate is fatal.
    pub fn tls(mut self, validate: bool) -> Self {
        self.ssl = true;
        self.ssl_validate = validate;
        self
    }

    pub fn tls_options(mut self, options: TlsOptions) -> Self {
        self.ssl_options = options;
        self
    }

    /// `host:port` for socket connection.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// TLS settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TlsOptions {
    /// PEM file with additional trusted CA certificates.
    pub ca_file: Option<PathBuf>,
    /// Name to verify the certificate against, if not `host`.
    pub server_name: Option<String>,
    /// Trust the bundled Mozilla root set.
    pub webpki_roots: bool,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            ca_file: None,
            server_name: None,
            webpki_roots: true,
        }
    }
}
