//! Connection targets.
//!
//! An [`Address`] is kept as the string the application supplied. Parsing is
//! lazy: [`Address::parts`] resolves it into scheme, credentials, host, port
//! and virtual host, and [`Address::validate`] rejects malformed input.
//!
//! Bare forms are accepted: `broker`, `broker:5673` and `//:5673` are read as
//! `amqp://` URLs, the last one against `localhost`.

use crate::error::ConfigError;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use url::{Host, Url};

const DEFAULT_SCHEME: &str = "amqp";
const AMQP_PORT: u16 = 5672;
const AMQPS_PORT: u16 = 5671;

/// A connection target such as `amqp://user@broker:5672/vhost` or `broker`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Address {
    raw: Arc<str>,
}

impl Address {
    /// Creates an address without validating it.
    ///
    /// Use [`Address::validate`] or [`str::parse`] to reject malformed input.
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: Arc::from(raw.into()),
        }
    }

    /// Returns the address exactly as supplied.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Checks that the address can be resolved into its components.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.url().map(|_| ())
    }

    /// Resolves the address into its components.
    pub fn parts(&self) -> Result<AddressParts, ConfigError> {
        AddressParts::from_url(&self.url()?)
    }

    fn url(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidAddress {
            address: self.raw.to_string(),
            reason,
        };

        if self.raw.is_empty() {
            return Err(invalid("address is empty".to_string()));
        }
        // Url silently strips some whitespace; an address never contains any.
        if self.raw.chars().any(char::is_whitespace) {
            return Err(invalid("address contains whitespace".to_string()));
        }

        let url = Url::parse(&normalize(&self.raw)).map_err(|error| invalid(error.to_string()))?;
        if url.host().is_none() {
            return Err(invalid("missing host".to_string()));
        }
        Ok(url)
    }
}

/// Turns the bare forms into absolute URLs.
fn normalize(raw: &str) -> String {
    if raw.contains("://") {
        return raw.to_string();
    }
    let authority = raw.strip_prefix("//").unwrap_or(raw);
    if authority.starts_with(':') {
        format!("{DEFAULT_SCHEME}://localhost{authority}")
    } else {
        format!("{DEFAULT_SCHEME}://{authority}")
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:?})", self.to_string())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print passwords in errors or logs.
        match self.url() {
            Ok(mut url) if url.password().is_some() => {
                if url.set_password(Some("***")).is_err() {
                    return f.write_str("<address with credentials>");
                }
                f.write_str(url.as_str())
            }
            _ => f.write_str(&self.raw),
        }
    }
}

impl From<&str> for Address {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Address {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&Address> for Address {
    fn from(address: &Address) -> Self {
        address.clone()
    }
}

impl FromStr for Address {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address = Self::new(s);
        address.validate()?;
        Ok(address)
    }
}

/// The components of a resolved [`Address`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressParts {
    scheme: String,
    user: Option<String>,
    password: Option<String>,
    host: String,
    port: Option<u16>,
    virtual_host: Option<String>,
}

impl AddressParts {
    fn from_url(url: &Url) -> Result<Self, ConfigError> {
        let host = match url.host() {
            Some(Host::Domain("")) => "localhost".to_string(),
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => {
                return Err(ConfigError::InvalidAddress {
                    address: url.to_string(),
                    reason: "missing host".to_string(),
                })
            }
        };
        let virtual_host = url.path().trim_start_matches('/');

        Ok(Self {
            scheme: url.scheme().to_string(),
            user: Some(url.username())
                .filter(|user| !user.is_empty())
                .map(str::to_string),
            password: url.password().map(str::to_string),
            host,
            port: url.port(),
            virtual_host: Some(virtual_host)
                .filter(|vhost| !vhost.is_empty())
                .map(str::to_string),
        })
    }

    /// The scheme, `amqp` unless one was given.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The user embedded in the address.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// The password embedded in the address.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// The host to connect to.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port to connect to, defaulting by scheme.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(match self.scheme.as_str() {
            "amqps" => AMQPS_PORT,
            _ => AMQP_PORT,
        })
    }

    /// The virtual host carried in the address path.
    pub fn virtual_host(&self) -> Option<&str> {
        self.virtual_host.as_deref()
    }
}
