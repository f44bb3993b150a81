//! Client records
//!
//! A [`Client`] is a finished, registry-ready description of one peer: its
//! address key, shared secret and policy attributes. Records are built by
//! [`ClientBuilder`](crate::builder::ClientBuilder) or [`Client::new`] and are
//! immutable once inserted into a registry.

use crate::key::{AddressKey, Transport};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

/// Secret substituted for TLS clients that do not configure one (RFC 6614)
pub const RADSEC_DEFAULT_SECRET: &str = "radsec";

/// Stream connection limits for TCP and TLS clients
///
/// Timeouts are in seconds; zero means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionLimits {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default)]
    pub lifetime: u32,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u32,
}

fn default_max_connections() -> u32 {
    16
}

fn default_idle_timeout() -> u32 {
    30
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        ConnectionLimits {
            max_connections: default_max_connections(),
            lifetime: 0,
            idle_timeout: default_idle_timeout(),
        }
    }
}

impl ConnectionLimits {
    /// Smallest non-zero lifetime or idle timeout, in seconds
    pub const MIN_TIMEOUT: u32 = 5;

    /// Apply the timeout floor, and drop an idle timeout longer than the lifetime
    pub fn normalized(mut self) -> Self {
        if self.idle_timeout > 0 && self.idle_timeout < Self::MIN_TIMEOUT {
            self.idle_timeout = Self::MIN_TIMEOUT;
        }
        if self.lifetime > 0 && self.lifetime < Self::MIN_TIMEOUT {
            self.lifetime = Self::MIN_TIMEOUT;
        }
        if self.lifetime > 0 && self.idle_timeout > self.lifetime {
            self.idle_timeout = 0;
        }
        self
    }

    pub fn lifetime(&self) -> Option<Duration> {
        (self.lifetime > 0).then(|| Duration::from_secs(u64::from(self.lifetime)))
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout > 0).then(|| Duration::from_secs(u64::from(self.idle_timeout)))
    }
}

/// A client allowed to exchange RADIUS traffic with the server
#[derive(Clone)]
pub struct Client {
    pub(crate) number: Option<u64>,
    pub(crate) key: AddressKey,
    pub(crate) longname: String,
    pub(crate) shortname: Option<String>,
    pub(crate) secret: String,
    pub(crate) nas_type: Option<String>,
    pub(crate) server: Option<String>,
    pub(crate) require_message_authenticator: bool,
    pub(crate) tls_required: bool,
    pub(crate) limits: Option<ConnectionLimits>,
    pub(crate) src_addr: Option<IpAddr>,
    pub(crate) response_window: Option<Duration>,
}

impl Client {
    /// Create a client for `network`
    ///
    /// The key is finalized here: an all-zero host address becomes the
    /// zero-length prefix of its family. Stream transports get the default
    /// connection limits and `Transport::Tls` marks the client as TLS-only.
    pub fn new(network: IpNetwork, transport: Transport, secret: impl Into<String>) -> Self {
        Self::from_key(AddressKey::from_network(network, transport), secret.into())
    }

    pub(crate) fn from_key(key: AddressKey, secret: String) -> Self {
        let key = key.normalize_wildcard();
        let transport = key.transport();

        Client {
            number: None,
            longname: key.addr().to_string(),
            key,
            shortname: None,
            secret,
            nas_type: None,
            server: None,
            require_message_authenticator: false,
            tls_required: transport == Transport::Tls,
            limits: transport.is_stream().then(ConnectionLimits::default),
            src_addr: None,
            response_window: None,
        }
    }

    pub fn with_shortname(mut self, shortname: impl Into<String>) -> Self {
        self.shortname = Some(shortname.into());
        self
    }

    pub fn with_nas_type(mut self, nas_type: impl Into<String>) -> Self {
        self.nas_type = Some(nas_type.into());
        self
    }

    /// Scope the client to a virtual server
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn with_message_authenticator(mut self, required: bool) -> Self {
        self.require_message_authenticator = required;
        self
    }

    /// Number assigned by a numbering registry, if any
    pub fn number(&self) -> Option<u64> {
        self.number
    }

    pub fn key(&self) -> &AddressKey {
        &self.key
    }

    pub fn network(&self) -> IpNetwork {
        self.key.network()
    }

    pub fn transport(&self) -> Transport {
        self.key.transport()
    }

    pub fn longname(&self) -> &str {
        &self.longname
    }

    pub fn shortname(&self) -> Option<&str> {
        self.shortname.as_deref()
    }

    /// Short name if set, long name otherwise
    pub fn display_name(&self) -> &str {
        self.shortname.as_deref().unwrap_or(&self.longname)
    }

    pub fn secret(&self) -> &[u8] {
        self.secret.as_bytes()
    }

    pub fn nas_type(&self) -> Option<&str> {
        self.nas_type.as_deref()
    }

    /// Virtual server this client is scoped to
    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    pub fn require_message_authenticator(&self) -> bool {
        self.require_message_authenticator
    }

    pub fn tls_required(&self) -> bool {
        self.tls_required
    }

    pub fn limits(&self) -> Option<&ConnectionLimits> {
        self.limits.as_ref()
    }

    /// Source address to reply from instead of the request's destination
    pub fn src_addr(&self) -> Option<IpAddr> {
        self.src_addr
    }

    pub fn response_window(&self) -> Option<Duration> {
        self.response_window
    }

    /// Whether `other` describes exactly the same client
    ///
    /// Re-adding such a client is a harmless duplicate rather than a conflict.
    /// Transport is not compared: callers only ask this of entries already
    /// sharing a storage slot.
    pub fn same_definition(&self, other: &Client) -> bool {
        self.key.addr() == other.key.addr()
            && self.key.prefix() == other.key.prefix()
            && self.longname == other.longname
            && self.secret == other.secret
            && self.shortname == other.shortname
            && self.nas_type == other.nas_type
            && self.server == other.server
            && self.require_message_authenticator == other.require_message_authenticator
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("number", &self.number)
            .field("key", &self.key)
            .field("longname", &self.longname)
            .field("shortname", &self.shortname)
            .field("secret", &"<redacted>")
            .field("nas_type", &self.nas_type)
            .field("server", &self.server)
            .field("require_message_authenticator", &self.require_message_authenticator)
            .field("tls_required", &self.tls_required)
            .field("limits", &self.limits)
            .field("src_addr", &self.src_addr)
            .field("response_window", &self.response_window)
            .finish()
    }
}
