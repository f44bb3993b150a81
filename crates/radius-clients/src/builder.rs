//! Client record construction
//!
//! [`ClientBuilder`] turns configuration sections and database rows into
//! registry-ready [`Client`] records, or explains why it cannot. A record
//! that fails validation is dropped here and never reaches a registry.

use crate::client::{Client, RADSEC_DEFAULT_SECRET};
use crate::config::ClientSection;
use crate::error::{ClientError, ClientResult};
use crate::key::{AddressKey, Transport};
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

/// Shortest non-zero response window
pub const MIN_RESPONSE_WINDOW: Duration = Duration::from_millis(1);

/// Longest response window, whatever the request lifetime
pub const MAX_RESPONSE_WINDOW: Duration = Duration::from_secs(60);

/// Builds validated clients
#[derive(Debug)]
pub struct ClientBuilder {
    max_request_time: Duration,
    pub(crate) dynamic_count: AtomicU64,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_REQUEST_TIME)
    }
}

impl ClientBuilder {
    pub const DEFAULT_MAX_REQUEST_TIME: Duration = Duration::from_secs(30);

    /// Create a builder for a server whose requests live at most `max_request_time`
    pub fn new(max_request_time: Duration) -> Self {
        ClientBuilder {
            max_request_time,
            dynamic_count: AtomicU64::new(0),
        }
    }

    pub fn max_request_time(&self) -> Duration {
        self.max_request_time
    }

    /// Build a client from a `client` section
    ///
    /// `server` names the virtual server the section is declared in, if any.
    /// Such a client cannot point at another server.
    pub fn from_section(&self, section: &ClientSection, server: Option<&str>) -> ClientResult<Client> {
        let name = section.name.as_str();
        if name.is_empty() {
            return Err(ClientError::MissingName);
        }

        let scope = match (&section.virtual_server, server) {
            (Some(_), Some(enclosing)) => {
                return Err(ClientError::ConflictingServerScope {
                    client: name.to_string(),
                    server: enclosing.to_string(),
                })
            }
            (Some(own), None) => Some(own.clone()),
            (None, enclosing) => enclosing.map(str::to_string),
        };

        let network = section_network(section)?;

        let transport = match section.proto.as_deref() {
            None => Transport::Udp,
            Some(proto) => Transport::from_proto(proto).ok_or_else(|| ClientError::UnknownTransport {
                client: name.to_string(),
                proto: proto.to_string(),
            })?,
        };

        let src_addr = section
            .src_ipaddr
            .as_deref()
            .map(|value| parse_src_addr(name, value, &network.ip()))
            .transpose()?;

        let response_window = section
            .response_window
            .map(|window| self.check_response_window(name, window))
            .transpose()?
            .flatten();

        let secret = section.secret.clone().unwrap_or_default();
        let mut client = Client::from_key(AddressKey::from_network(network, transport), secret);

        // DHCP clients never sign packets
        if client.secret.is_empty() && !section.dhcp {
            if client.tls_required {
                client.secret = RADSEC_DEFAULT_SECRET.to_string();
            } else {
                return Err(ClientError::MissingSecret {
                    client: name.to_string(),
                });
            }
        }

        client.shortname = Some(section.shortname.clone().unwrap_or_else(|| name.to_string()));
        client.nas_type = section.nas_type.clone();
        client.server = scope;
        client.require_message_authenticator = section.require_message_authenticator;
        client.src_addr = src_addr;
        client.response_window = response_window;
        if transport.is_stream() {
            client.limits = Some(section.limit.unwrap_or_default().normalized());
        }

        Ok(client)
    }

    /// Build a client from a database row
    ///
    /// `identifier` is an address or address/prefix. No secret validation
    /// is done: the producer owns its data.
    pub fn from_query(
        &self,
        identifier: &str,
        secret: &str,
        shortname: Option<&str>,
        nas_type: Option<&str>,
        server: Option<&str>,
        require_message_authenticator: bool,
    ) -> ClientResult<Client> {
        let network = parse_network(identifier).ok_or_else(|| ClientError::InvalidAddress {
            client: shortname.unwrap_or(identifier).to_string(),
            value: identifier.to_string(),
        })?;

        let mut client = Client::from_key(
            AddressKey::from_network(network, Transport::Udp),
            secret.to_string(),
        );
        client.shortname = shortname.map(str::to_string);
        client.nas_type = nas_type.map(str::to_string);
        client.server = server.map(str::to_string);
        client.require_message_authenticator = require_message_authenticator;

        Ok(client)
    }

    /// Validate a response window in seconds; zero means none
    fn check_response_window(&self, client: &str, window: f64) -> ClientResult<Option<Duration>> {
        if window == 0.0 {
            return Ok(None);
        }

        let max = MAX_RESPONSE_WINDOW.min(self.max_request_time);
        let out_of_bounds = || ClientError::TimingWindowOutOfBounds {
            client: client.to_string(),
            window,
            min: MIN_RESPONSE_WINDOW.as_secs_f64(),
            max: max.as_secs_f64(),
        };

        if !window.is_finite() || window < 0.0 {
            return Err(out_of_bounds());
        }

        let duration = Duration::from_secs_f64(window);
        if duration < MIN_RESPONSE_WINDOW || duration > max {
            warn!(client = %client, window = window, "response_window out of range");
            return Err(out_of_bounds());
        }

        Ok(Some(duration))
    }
}

/// Parse an address with optional prefix; a bare address is a host network
pub(crate) fn parse_network(value: &str) -> Option<IpNetwork> {
    // Try to parse as CIDR notation first
    if let Ok(network) = value.parse::<IpNetwork>() {
        return Some(network);
    }

    value.parse::<IpAddr>().ok().map(IpNetwork::from)
}

/// The address directive of a section, checked against its family
fn section_network(section: &ClientSection) -> ClientResult<IpNetwork> {
    let name = &section.name;
    let (directive, value, v4_only) = if let Some(value) = &section.ipaddr {
        ("ipaddr", value, None)
    } else if let Some(value) = &section.ipv4addr {
        ("ipv4addr", value, Some(true))
    } else if let Some(value) = &section.ipv6addr {
        ("ipv6addr", value, Some(false))
    } else {
        return Err(ClientError::MissingAddress {
            client: name.clone(),
        });
    };

    let network = parse_network(value.trim()).ok_or_else(|| ClientError::InvalidAddress {
        client: name.clone(),
        value: value.clone(),
    })?;

    if let Some(v4) = v4_only {
        if network.is_ipv4() != v4 {
            return Err(ClientError::InvalidAddressFamily(format!(
                "client {}: {} = {} is not an {} address",
                name,
                directive,
                value,
                if v4 { "IPv4" } else { "IPv6" }
            )));
        }
    }

    Ok(network)
}

fn parse_src_addr(client: &str, value: &str, family: &IpAddr) -> ClientResult<IpAddr> {
    match value.trim().parse::<IpAddr>() {
        Ok(addr) if addr.is_ipv4() == family.is_ipv4() => Ok(addr),
        _ => Err(ClientError::InvalidSourceAddress {
            client: client.to_string(),
            value: value.to_string(),
        }),
    }
}
