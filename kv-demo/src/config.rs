//! Client configuration from the environment.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `ETCD_ENDPOINTS` | `localhost:2379` (comma separated) |
//! | `ETCD_DIAL_TIMEOUT_MS` | `2000` |
//! | `ETCD_REQUEST_TIMEOUT_MS` | `10000` |
//! | `ETCD_CERT`, `ETCD_KEY`, `ETCD_CACERT` | unset: plain TCP; all three: mutual TLS |
//! | `ETCD_TLS_DOMAIN` | host name of the endpoint |

use std::time::Duration;

use etcd_kv::{Config, TlsConfig};

use crate::Error;

pub const DEFAULT_ENDPOINT: &str = "localhost:2379";

pub fn from_env() -> Result<Config, Error> {
    from_lookup(|name| std::env::var(name).ok())
}

pub fn from_lookup<F>(lookup: F) -> Result<Config, Error>
where
    F: Fn(&str) -> Option<String>,
{
    let endpoints: Vec<String> = lookup("ETCD_ENDPOINTS")
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
        .split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(String::from)
        .collect();
    if endpoints.is_empty() {
        return Err(Error::Config("ETCD_ENDPOINTS lists no endpoint".to_string()));
    }

    let mut config = Config::new(endpoints);
    if let Some(timeout) = millis(&lookup, "ETCD_DIAL_TIMEOUT_MS")? {
        config = config.with_dial_timeout(timeout);
    }
    if let Some(timeout) = millis(&lookup, "ETCD_REQUEST_TIMEOUT_MS")? {
        config = config.with_request_timeout(timeout);
    }

    match (lookup("ETCD_CERT"), lookup("ETCD_KEY"), lookup("ETCD_CACERT")) {
        (None, None, None) => {}
        (Some(cert), Some(key), Some(ca)) => {
            let mut tls = TlsConfig::new(cert, key, ca);
            if let Some(domain) = lookup("ETCD_TLS_DOMAIN") {
                tls = tls.with_domain_name(domain);
            }
            config = config.with_tls(tls);
        }
        _ => {
            return Err(Error::Config(
                "ETCD_CERT, ETCD_KEY and ETCD_CACERT must be set together".to_string(),
            ));
        }
    }

    Ok(config)
}

fn millis<F>(lookup: &F, name: &str) -> Result<Option<Duration>, Error>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|e| Error::Config(format!("{}={:?}: {}", name, raw, e))),
    }
}
