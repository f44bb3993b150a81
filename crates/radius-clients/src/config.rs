use crate::builder::ClientBuilder;
use crate::client::ConnectionLimits;
use crate::error::ClientError;
use crate::scope::{ClientScopes, ServerResolver, VirtualServer, VirtualServerTable};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Client error: {0}")]
    Client(#[from] ClientError),
}

/// One `client` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientSection {
    /// Section identifier; the default short name
    pub name: String,
    /// IPv4 or IPv6 address, optionally with a prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipaddr: Option<String>,
    /// IPv4 address, optionally with a prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4addr: Option<String>,
    /// IPv6 address, optionally with a prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6addr: Option<String>,
    /// Address to send replies from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_ipaddr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nas_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_server: Option<String>,
    /// Seconds to wait for a reply before giving up; 0 disables it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_window: Option<f64>,
    /// udp, tcp, tls, radsec or any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proto: Option<String>,
    #[serde(default)]
    pub require_message_authenticator: bool,
    /// Connection limits for stream transports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<ConnectionLimits>,
    /// DHCP-only client; needs no secret
    #[serde(default)]
    pub dhcp: bool,
}

impl ClientSection {
    pub fn new(name: impl Into<String>) -> Self {
        ClientSection {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// One virtual `server` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    pub name: String,
    /// Server has dedicated listeners
    #[serde(default)]
    pub listen: bool,
    /// Server's listeners require TLS
    #[serde(default)]
    pub tls: bool,
    /// Clients declared inside the server
    #[serde(default)]
    pub clients: Vec<ClientSection>,
}

/// Client configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientsConfig {
    /// Log level: "trace", "debug", "info", "warn", "error" (default: "info")
    #[serde(default)]
    pub log_level: Option<String>,

    /// Longest time a request may live, in seconds (default: 30)
    #[serde(default = "default_max_request_time")]
    pub max_request_time: u64,

    /// Global clients
    #[serde(default)]
    pub clients: Vec<ClientSection>,

    /// Virtual servers
    #[serde(default)]
    pub servers: Vec<ServerSection>,
}

fn default_max_request_time() -> u64 {
    30
}

impl Default for ClientsConfig {
    fn default() -> Self {
        ClientsConfig {
            log_level: None,
            max_request_time: default_max_request_time(),
            clients: vec![],
            servers: vec![],
        }
    }
}

impl ClientsConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: ClientsConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn max_request_time(&self) -> Duration {
        Duration::from_secs(self.max_request_time)
    }

    /// Validate the file-level structure
    ///
    /// Individual client sections are validated when they are built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_request_time == 0 {
            return Err(ConfigError::Invalid(
                "max_request_time cannot be 0".to_string(),
            ));
        }

        if let Some(ref level) = self.log_level {
            if !["trace", "debug", "info", "warn", "error"].contains(&level.as_str()) {
                return Err(ConfigError::Invalid(format!("Invalid log level: {}", level)));
            }
        }

        let mut names = HashSet::new();
        for server in &self.servers {
            if server.name.is_empty() {
                return Err(ConfigError::Invalid("Server has empty name".to_string()));
            }
            if !names.insert(server.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "Duplicate server {}",
                    server.name
                )));
            }
        }

        Ok(())
    }

    /// Virtual server table described by this configuration
    pub fn virtual_servers(&self) -> VirtualServerTable {
        let table = VirtualServerTable::new();
        for server in &self.servers {
            table.insert(VirtualServer::new(server.name.clone(), server.listen));
        }
        table
    }

    /// Build every client into a fresh set of scopes
    ///
    /// Global clients go wherever their `virtual_server` sends them; clients
    /// declared inside a server section go into that server's registry. The
    /// first bad client aborts the load.
    pub fn load(&self) -> Result<ClientScopes, ConfigError> {
        let servers = Arc::new(self.virtual_servers());
        let scopes = ClientScopes::new(Arc::clone(&servers) as Arc<dyn ServerResolver>);
        let builder = ClientBuilder::new(self.max_request_time());

        for section in &self.clients {
            let client = builder.from_section(section, None)?;
            scopes.add(client, None)?;
        }
        // Global clients always have a default registry, even an empty one
        scopes.default_registry();

        for server_section in &self.servers {
            if server_section.clients.is_empty() {
                continue;
            }

            let server = servers
                .find_virtual_server(&server_section.name)
                .ok_or_else(|| ClientError::UnknownVirtualServer {
                    name: server_section.name.clone(),
                })?;
            let registry = server.clients_or_init(|| scopes.new_registry(server.name()));

            for section in &server_section.clients {
                let client = builder.from_section(section, Some(&server_section.name))?;
                if client.tls_required() != server_section.tls {
                    error!(server = %server_section.name, client = %section.name, "Client TLS configuration differs from listener");
                    return Err(ClientError::TlsMismatch {
                        client: section.name.clone(),
                    }
                    .into());
                }
                registry.add(client)?;
            }

            debug!(server = %server_section.name, clients = registry.len(), "Loaded virtual server clients");
        }

        info!(
            clients = scopes.current_default().map(|r| r.len()).unwrap_or(0),
            servers = servers.len(),
            "Loaded client configuration"
        );

        Ok(scopes)
    }

    /// Create an example configuration file
    pub fn example() -> Self {
        ClientsConfig {
            log_level: Some("info".to_string()),
            max_request_time: 30,
            clients: vec![
                ClientSection {
                    ipaddr: Some("192.168.1.0/24".to_string()),
                    secret: Some("client_secret_1".to_string()),
                    shortname: Some("internal".to_string()),
                    ..ClientSection::new("internal-network")
                },
                ClientSection {
                    ipaddr: Some("10.0.0.1".to_string()),
                    secret: Some("client_secret_2".to_string()),
                    nas_type: Some("cisco".to_string()),
                    require_message_authenticator: true,
                    ..ClientSection::new("vpn-gateway")
                },
                ClientSection {
                    ipv6addr: Some("2001:db8::/32".to_string()),
                    proto: Some("tls".to_string()),
                    limit: Some(ConnectionLimits::default()),
                    ..ClientSection::new("radsec-peers")
                },
            ],
            servers: vec![ServerSection {
                name: "guest".to_string(),
                listen: true,
                tls: false,
                clients: vec![ClientSection {
                    ipaddr: Some("172.16.0.0/12".to_string()),
                    secret: Some("guest_secret".to_string()),
                    response_window: Some(5.0),
                    ..ClientSection::new("guest-aps")
                }],
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Transport;
    use std::net::IpAddr;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = ClientsConfig::default();
        assert_eq!(config.max_request_time, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = ClientsConfig::default();
        config.max_request_time = 0;
        assert!(config.validate().is_err());

        let mut config = ClientsConfig::default();
        config.log_level = Some("loud".to_string());
        assert!(config.validate().is_err());

        let mut config = ClientsConfig::example();
        config.servers.push(config.servers[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_example_loads() {
        let config = ClientsConfig::example();
        assert!(config.validate().is_ok());

        let scopes = config.load().unwrap();
        let found = scopes.find(ip("192.168.1.50"), Transport::Udp, None).unwrap();
        assert_eq!(found.secret(), b"client_secret_1");
        assert_eq!(found.shortname(), Some("internal"));

        let found = scopes.find(ip("2001:db8::5"), Transport::Tls, None).unwrap();
        assert_eq!(found.secret(), b"radsec");

        // Guest clients live only in the guest server's registry
        assert!(scopes.find(ip("172.16.1.1"), Transport::Udp, None).is_none());
        let guest = scopes.servers().find_virtual_server("guest").unwrap();
        let found = scopes
            .find(ip("172.16.1.1"), Transport::Udp, guest.clients().map(|r| r.as_ref()))
            .unwrap();
        assert_eq!(found.server(), Some("guest"));
        assert_eq!(found.response_window(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{
            "clients": [
                { "name": "nas1", "ipaddr": "10.0.0.0/8", "secret": "s1",
                  "proto": "tcp", "limit": { "lifetime": 2 } }
            ]
        }"#;
        let config: ClientsConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_request_time, 30);

        let scopes = config.load().unwrap();
        let found = scopes.find(ip("10.9.9.9"), Transport::Tcp, None).unwrap();
        let limits = found.limits().unwrap();
        assert_eq!(limits.max_connections, 16);
        assert_eq!(limits.lifetime, 5);
        assert_eq!(limits.idle_timeout, 0);
    }

    #[test]
    fn test_load_rejects_bad_client() {
        let mut config = ClientsConfig::default();
        config.clients.push(ClientSection {
            ipaddr: Some("10.0.0.1".to_string()),
            ..ClientSection::new("nosecret")
        });

        let err = config.load().unwrap_err();
        assert!(matches!(err, ConfigError::Client(ClientError::MissingSecret { .. })));
    }

    #[test]
    fn test_load_rejects_duplicate() {
        let mut config = ClientsConfig::default();
        for secret in ["a", "b"] {
            config.clients.push(ClientSection {
                ipaddr: Some("10.0.0.1".to_string()),
                secret: Some(secret.to_string()),
                ..ClientSection::new("nas")
            });
        }

        let err = config.load().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Client(ClientError::DuplicateClientConflict { .. })
        ));
    }

    #[test]
    fn test_load_rejects_tls_mismatch() {
        let mut config = ClientsConfig::default();
        config.servers.push(ServerSection {
            name: "secure".to_string(),
            listen: true,
            tls: true,
            clients: vec![ClientSection {
                ipaddr: Some("10.0.0.1".to_string()),
                secret: Some("secret".to_string()),
                ..ClientSection::new("plain")
            }],
        });

        let err = config.load().unwrap_err();
        assert!(matches!(err, ConfigError::Client(ClientError::TlsMismatch { .. })));
    }

    #[test]
    fn test_global_client_routed_to_server() {
        let mut config = ClientsConfig::default();
        config.servers.push(ServerSection {
            name: "inner".to_string(),
            listen: true,
            tls: false,
            clients: vec![],
        });
        config.clients.push(ClientSection {
            ipaddr: Some("10.0.0.1".to_string()),
            secret: Some("secret".to_string()),
            virtual_server: Some("inner".to_string()),
            ..ClientSection::new("nas")
        });

        let scopes = config.load().unwrap();
        assert!(scopes.find(ip("10.0.0.1"), Transport::Udp, None).is_none());
        let inner = scopes.servers().find_virtual_server("inner").unwrap();
        assert_eq!(inner.clients().unwrap().len(), 1);
    }
}
