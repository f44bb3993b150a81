//! Dynamic clients built from in-flight requests
//!
//! A provisioning policy can answer a request from an unknown peer by
//! setting control attributes that describe a new client. The client is
//! built through the normal section path and then checked against the
//! network the request arrived on, so a dynamic client can never claim more
//! address space than its provisioning network.

use crate::builder::ClientBuilder;
use crate::client::Client;
use crate::config::ClientSection;
use crate::error::{ClientError, ClientResult};
use crate::key::mask;
use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::atomic::Ordering;
use tracing::{debug, warn};

/// Control attributes recognised when provisioning a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAttribute {
    ClientIpAddress(Ipv4Addr),
    ClientIpPrefix(Ipv4Network),
    ClientIpv6Address(Ipv6Addr),
    ClientIpv6Prefix(Ipv6Network),
    Secret(String),
    NasType(String),
    ShortName(String),
}

/// The parts of an in-flight request a dynamic client is built from
#[derive(Debug, Clone)]
pub struct ProvisioningRequest {
    /// Network of the client definition that accepted the request
    pub network: IpNetwork,
    /// Virtual server handling the request
    pub server: Option<String>,
    /// Control attributes set by policy
    pub control: Vec<ControlAttribute>,
}

impl ProvisioningRequest {
    pub fn new(network: IpNetwork) -> Self {
        ProvisioningRequest {
            network,
            server: None,
            control: Vec::new(),
        }
    }

    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn with_attribute(mut self, attribute: ControlAttribute) -> Self {
        self.control.push(attribute);
        self
    }

    /// Equivalent `client` section; later attributes override earlier ones
    fn to_section(&self, name: String) -> ClientSection {
        let mut section = ClientSection::new(name);

        for attribute in &self.control {
            let (directive, value) = match attribute {
                ControlAttribute::ClientIpAddress(addr) => {
                    section.ipv4addr = Some(addr.to_string());
                    ("ipv4addr", addr.to_string())
                }
                ControlAttribute::ClientIpPrefix(network) => {
                    section.ipv4addr = Some(network.to_string());
                    ("ipv4addr", network.to_string())
                }
                ControlAttribute::ClientIpv6Address(addr) => {
                    section.ipv6addr = Some(addr.to_string());
                    ("ipv6addr", addr.to_string())
                }
                ControlAttribute::ClientIpv6Prefix(network) => {
                    section.ipv6addr = Some(network.to_string());
                    ("ipv6addr", network.to_string())
                }
                ControlAttribute::Secret(secret) => {
                    section.secret = Some(secret.clone());
                    ("secret", "<redacted>".to_string())
                }
                ControlAttribute::NasType(nas_type) => {
                    section.nas_type = Some(nas_type.clone());
                    ("nas_type", nas_type.clone())
                }
                ControlAttribute::ShortName(shortname) => {
                    section.shortname = Some(shortname.clone());
                    ("shortname", shortname.clone())
                }
            };
            debug!(client = %section.name, "{} = {}", directive, value);
        }

        // A request carries one family of address; keep the last one set
        if section.ipv4addr.is_some() && section.ipv6addr.is_some() {
            let v6_last = self.control.iter().rev().find_map(|attribute| match attribute {
                ControlAttribute::ClientIpAddress(_) | ControlAttribute::ClientIpPrefix(_) => Some(false),
                ControlAttribute::ClientIpv6Address(_) | ControlAttribute::ClientIpv6Prefix(_) => Some(true),
                _ => None,
            });
            if v6_last == Some(true) {
                section.ipv4addr = None;
            } else {
                section.ipv6addr = None;
            }
        }

        section
    }
}

impl ClientBuilder {
    /// Build a client from the control attributes of an in-flight request
    ///
    /// The client must be of the same family as `request.network`, at least
    /// as specific, and inside it.
    pub fn from_request(&self, request: &ProvisioningRequest) -> ClientResult<Client> {
        let name = format!("dynamic{}", self.dynamic_count.fetch_add(1, Ordering::Relaxed));
        debug!(client = %name, "Converting control attributes to client section");

        let section = request.to_section(name);
        let client = self.from_section(&section, request.server.as_deref())?;

        let network = request.network;
        let key = client.key();

        if key.is_ipv4() != network.is_ipv4() {
            warn!(client = %client.network(), network = %network, "Dynamic client IP version does not match source network");
            return Err(ClientError::AddressFamilyMismatch {
                client: client.network(),
                network,
            });
        }

        // Network prefix is more restrictive than the one given by the client
        if network.prefix() > key.prefix() || mask(key.addr(), network.prefix()) != network.network() {
            warn!(client = %client.network(), network = %network, "Dynamic client is not within the source network");
            return Err(ClientError::OutsideAllowedNetwork {
                client: client.network(),
                network,
            });
        }

        Ok(client)
    }
}
