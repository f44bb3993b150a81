//! Client registry error types

use ipnetwork::IpNetwork;
use std::net::IpAddr;
use thiserror::Error;

/// Errors raised while building, scoping or inserting clients
///
/// Lookup misses are not errors: the lookup functions return `None` and the
/// caller decides what to do with an unknown peer.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Client section has no identifier
    #[error("Missing client name")]
    MissingName,

    /// None of `ipaddr`, `ipv4addr` or `ipv6addr` was given
    #[error("No 'ipaddr' or 'ipv4addr' or 'ipv6addr' configuration directive found in client {client}")]
    MissingAddress { client: String },

    /// Address directive present but not an address or address/prefix
    #[error("Client {client}: invalid address '{value}'")]
    InvalidAddress { client: String, value: String },

    /// Address is not of the family the directive (or octet length) requires
    #[error("Invalid address family: {0}")]
    InvalidAddressFamily(String),

    /// Prefix is longer than the address family's bit width
    #[error("Prefix length {prefix} exceeds {max} bits for {addr}")]
    InvalidPrefixLength { addr: IpAddr, prefix: u8, max: u8 },

    /// Secret is empty and the client is not exempt from having one
    #[error("Client {client}: secret must be at least 1 character long")]
    MissingSecret { client: String },

    /// `proto` outside of udp, tcp, tls, radsec, any
    #[error("Client {client}: unknown proto \"{proto}\"")]
    UnknownTransport { client: String, proto: String },

    /// Client names a virtual server while already declared inside one
    #[error("Client {client}: clients inside of server '{server}' cannot point to a server")]
    ConflictingServerScope { client: String, server: String },

    /// `src_ipaddr` unparsable for the client's address family
    #[error("Client {client}: failed parsing src_ipaddr '{value}'")]
    InvalidSourceAddress { client: String, value: String },

    /// `response_window` outside of its allowed bounds
    #[error("Client {client}: response_window {window}s outside of allowed range ({min}s to {max}s)")]
    TimingWindowOutOfBounds {
        client: String,
        window: f64,
        min: f64,
        max: f64,
    },

    /// Client TLS requirement differs from the listener it is loaded for
    #[error("Client {client} does not have the same TLS configuration as the listener")]
    TlsMismatch { client: String },

    /// Named virtual server could not be resolved
    #[error("Failed to find virtual server {name}")]
    UnknownVirtualServer { name: String },

    /// Same address key already registered with a different definition
    #[error("Failed to add duplicate client {client}: conflicts with existing client {existing}")]
    DuplicateClientConflict { client: String, existing: String },

    /// Synthesized client family differs from the network the request arrived on
    #[error("Client IP address {client} IP version does not match the source network {network} of the packet")]
    AddressFamilyMismatch { client: IpNetwork, network: IpNetwork },

    /// Synthesized client is broader than, or outside of, the source network
    #[error("Client IP address {client} is not within the defined network {network}")]
    OutsideAllowedNetwork { client: IpNetwork, network: IpNetwork },
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;
