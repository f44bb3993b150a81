//! RADIUS Client Registry
//!
//! This crate decides which configured client (NAS) a request belongs to,
//! given the request's source address and transport. It supplies the
//! client's shared secret and policy attributes to the rest of the server.
//!
//! # Features
//!
//! - Longest-prefix-match lookup bounded by address width, not client count
//! - Wildcard transports and all-zero wildcard addresses
//! - Idempotent reloads: identical clients merge, differing ones conflict
//! - Stable client numbering for statistics
//! - Per-virtual-server scopes next to the default registry
//! - Dynamic clients built from request control attributes
//! - JSON configuration
//!
//! # Example
//!
//! ```rust
//! use radius_clients::{ClientBuilder, ClientScopes, ClientSection, Transport, VirtualServerTable};
//! use std::sync::Arc;
//!
//! let scopes = ClientScopes::new(Arc::new(VirtualServerTable::new()));
//! let builder = ClientBuilder::default();
//!
//! let section = ClientSection {
//!     ipaddr: Some("10.0.0.0/8".to_string()),
//!     secret: Some("testing123".to_string()),
//!     ..ClientSection::new("campus")
//! };
//! scopes.add(builder.from_section(&section, None).unwrap(), None).unwrap();
//!
//! let client = scopes
//!     .find("10.1.2.3".parse().unwrap(), Transport::Udp, None)
//!     .unwrap();
//! assert_eq!(client.secret(), b"testing123");
//! ```

mod bucket;
pub mod builder;
pub mod client;
pub mod config;
pub mod dynamic;
pub mod error;
pub mod key;
pub mod registry;
pub mod scope;

pub use builder::ClientBuilder;
pub use client::{Client, ConnectionLimits, RADSEC_DEFAULT_SECRET};
pub use config::{ClientSection, ClientsConfig, ConfigError, ServerSection};
pub use dynamic::{ControlAttribute, ProvisioningRequest};
pub use error::{ClientError, ClientResult};
pub use key::{AddressKey, Transport};
pub use registry::{ClientNumbering, ClientRegistry};
pub use scope::{ClientScopes, ServerResolver, VirtualServer, VirtualServerTable, DEFAULT_SCOPE};
