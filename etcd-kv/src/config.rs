//! Connection settings passed to [`Client::connect`](crate::Client::connect).

use std::path::{Path, PathBuf};
use std::time::Duration;

use tonic::transport::{Certificate, ClientTlsConfig, Identity};

use crate::Error;

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Where and how to reach the store.
///
/// `request_timeout` is not applied per call: callers use it as the deadline
/// for a whole batch of requests (see [`Client::request_timeout`]).
///
/// [`Client::request_timeout`]: crate::Client::request_timeout
#[derive(Debug, Clone)]
pub struct Config {
    pub endpoints: Vec<String>,
    pub dial_timeout: Duration,
    pub request_timeout: Duration,
    pub tls: Option<TlsConfig>,
}

impl Config {
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            tls: None,
        }
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }
}

/// Mutual TLS material, read from PEM files when connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub ca_path: PathBuf,
    /// Overrides the server name checked against the certificate.
    pub domain_name: Option<String>,
}

impl TlsConfig {
    pub fn new(
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
        ca_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            ca_path: ca_path.into(),
            domain_name: None,
        }
    }

    pub fn with_domain_name(mut self, domain: impl Into<String>) -> Self {
        self.domain_name = Some(domain.into());
        self
    }

    pub(crate) fn load(&self) -> Result<ClientTlsConfig, Error> {
        let cert = read_pem(&self.cert_path)?;
        let key = read_pem(&self.key_path)?;
        let ca = read_pem(&self.ca_path)?;

        let mut tls = ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(ca))
            .identity(Identity::from_pem(cert, key));
        if let Some(domain) = &self.domain_name {
            tls = tls.domain_name(domain.clone());
        }
        Ok(tls)
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, Error> {
    std::fs::read(path).map_err(|source| Error::TlsMaterial {
        path: path.to_path_buf(),
        source,
    })
}

/// Adds a scheme to bare `host:port` endpoints.
pub(crate) fn endpoint_uri(endpoint: &str, tls: bool) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else if tls {
        format!("https://{}", endpoint)
    } else {
        format!("http://{}", endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_dial_and_request_timeouts() {
        let config = Config::new(["localhost:2379"]);
        assert_eq!(config.endpoints, vec!["localhost:2379".to_string()]);
        assert_eq!(config.dial_timeout, Duration::from_secs(2));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert!(config.tls.is_none());
    }

    #[test]
    fn bare_endpoints_get_a_scheme() {
        assert_eq!(endpoint_uri("etcd:2379", false), "http://etcd:2379");
        assert_eq!(endpoint_uri("etcd:2379", true), "https://etcd:2379");
        assert_eq!(endpoint_uri("https://etcd:2379", false), "https://etcd:2379");
    }

    #[test]
    fn missing_tls_file_is_reported_with_its_path() {
        let tls = TlsConfig::new(
            "/nonexistent/client.pem",
            "/nonexistent/client-key.pem",
            "/nonexistent/ca.pem",
        );
        match tls.load() {
            Err(Error::TlsMaterial { path, .. }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/client.pem"))
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
