//! Registry scopes
//!
//! Clients live either in the process-wide default registry or in a
//! registry attached to a virtual server. A virtual server with its own
//! listeners is a separate authorization domain; one without listeners
//! shares the default namespace.
//!
//! [`ClientScopes`] is the handle the server passes around instead of a
//! global: it owns the default registry, the shared numbering, and the
//! resolver used to find virtual servers.

use crate::client::Client;
use crate::error::{ClientError, ClientResult};
use crate::key::Transport;
use crate::registry::{ClientNumbering, ClientRegistry};
use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use ipnetwork::IpNetwork;
use parking_lot::Mutex;
use std::net::IpAddr;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info};

/// Name of the default registry
pub const DEFAULT_SCOPE: &str = "root";

/// A virtual server as seen by the client registry
///
/// The server owns its client registry: it is created on the first client
/// added to the server and dropped together with the server.
#[derive(Debug)]
pub struct VirtualServer {
    name: String,
    listen: bool,
    clients: OnceLock<Arc<ClientRegistry>>,
}

impl VirtualServer {
    /// Create a server; `listen` says whether it has dedicated listeners
    pub fn new(name: impl Into<String>, listen: bool) -> Self {
        VirtualServer {
            name: name.into(),
            listen,
            clients: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_listeners(&self) -> bool {
        self.listen
    }

    /// The server's registry, if one has been created
    pub fn clients(&self) -> Option<&Arc<ClientRegistry>> {
        self.clients.get()
    }

    /// The server's registry, creating it with `init` on first use
    pub fn clients_or_init<F>(&self, init: F) -> &Arc<ClientRegistry>
    where
        F: FnOnce() -> ClientRegistry,
    {
        self.clients.get_or_init(|| Arc::new(init()))
    }
}

/// Lookup of virtual servers by name
pub trait ServerResolver: Send + Sync {
    fn find_virtual_server(&self, name: &str) -> Option<Arc<VirtualServer>>;
}

/// In-memory table of virtual servers
#[derive(Debug, Default)]
pub struct VirtualServerTable {
    servers: DashMap<String, Arc<VirtualServer>>,
}

impl VirtualServerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a server, replacing any server of the same name
    pub fn insert(&self, server: VirtualServer) -> Arc<VirtualServer> {
        let server = Arc::new(server);
        self.servers
            .insert(server.name().to_string(), Arc::clone(&server));
        server
    }

    /// Forget a server; its registry goes away with the last reference
    pub fn remove(&self, name: &str) -> Option<Arc<VirtualServer>> {
        self.servers.remove(name).map(|(_, server)| server)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

impl ServerResolver for VirtualServerTable {
    fn find_virtual_server(&self, name: &str) -> Option<Arc<VirtualServer>> {
        self.servers.get(name).map(|entry| Arc::clone(entry.value()))
    }
}

/// Owner of the default registry and router for scoped insertions
pub struct ClientScopes {
    default: ArcSwapOption<ClientRegistry>,
    init: Mutex<()>,
    numbering: Option<Arc<ClientNumbering>>,
    servers: Arc<dyn ServerResolver>,
}

impl ClientScopes {
    /// Create scopes whose registries number their clients
    pub fn new(servers: Arc<dyn ServerResolver>) -> Self {
        ClientScopes {
            default: ArcSwapOption::empty(),
            init: Mutex::new(()),
            numbering: Some(Arc::new(ClientNumbering::new())),
            servers,
        }
    }

    /// Create scopes without client numbering
    pub fn without_numbering(servers: Arc<dyn ServerResolver>) -> Self {
        ClientScopes {
            numbering: None,
            ..Self::new(servers)
        }
    }

    pub fn servers(&self) -> &Arc<dyn ServerResolver> {
        &self.servers
    }

    pub fn numbering(&self) -> Option<&Arc<ClientNumbering>> {
        self.numbering.as_ref()
    }

    /// A new, empty registry sharing this scope set's numbering
    pub fn new_registry(&self, name: impl Into<String>) -> ClientRegistry {
        match &self.numbering {
            Some(numbering) => ClientRegistry::with_numbering(name, Arc::clone(numbering)),
            None => ClientRegistry::new(name),
        }
    }

    /// The default registry, if it exists
    pub fn current_default(&self) -> Option<Arc<ClientRegistry>> {
        self.default.load_full()
    }

    /// The default registry, created on first use
    pub fn default_registry(&self) -> Arc<ClientRegistry> {
        if let Some(registry) = self.default.load_full() {
            return registry;
        }

        let _guard = self.init.lock();
        if let Some(registry) = self.default.load_full() {
            return registry;
        }

        let registry = Arc::new(self.new_registry(DEFAULT_SCOPE));
        self.default.store(Some(Arc::clone(&registry)));
        registry
    }

    /// Swap in a new default registry, returning the old one
    ///
    /// Lookups already running against the old registry keep using it; it
    /// is freed when the last of them lets go.
    pub fn replace_default(&self, registry: Arc<ClientRegistry>) -> Option<Arc<ClientRegistry>> {
        let _guard = self.init.lock();
        info!(registry = %registry.name(), clients = registry.len(), "Replacing default client registry");
        self.default.swap(Some(registry))
    }

    /// Detach the default registry, releasing its clients once unreferenced
    pub fn teardown(&self) -> Option<Arc<ClientRegistry>> {
        let _guard = self.init.lock();
        self.default.swap(None)
    }

    /// Registry a client belongs in when the caller names none
    ///
    /// A client naming a virtual server with listeners goes into that
    /// server's registry; a server without listeners, or no server at all,
    /// means the default registry.
    pub fn resolve(&self, client: &Client) -> ClientResult<Arc<ClientRegistry>> {
        self.route(client).map(|(registry, _)| registry)
    }

    /// Resolved registry, and whether it is the default one
    fn route(&self, client: &Client) -> ClientResult<(Arc<ClientRegistry>, bool)> {
        let Some(name) = client.server() else {
            return Ok((self.default_registry(), true));
        };

        let server = self.servers.find_virtual_server(name).ok_or_else(|| {
            error!(server = %name, client = %client.display_name(), "Failed to find virtual server");
            ClientError::UnknownVirtualServer {
                name: name.to_string(),
            }
        })?;

        if !server.has_listeners() {
            debug!(server = %name, "Virtual server has no listeners, using default clients");
            return Ok((self.default_registry(), true));
        }

        let registry = Arc::clone(server.clients_or_init(|| self.new_registry(server.name())));
        Ok((registry, false))
    }

    /// Add a client to `target`, or to the registry [`resolve`](Self::resolve) picks
    ///
    /// A client bound for the default registry always ends up in the one
    /// current after the insert, even if [`replace_default`](Self::replace_default)
    /// runs concurrently.
    pub fn add(&self, client: Client, target: Option<&ClientRegistry>) -> ClientResult<Arc<Client>> {
        if let Some(registry) = target {
            return registry.add(client);
        }

        match self.route(&client)? {
            (registry, true) => self.add_to_default(registry, client),
            (registry, false) => registry.add(client),
        }
    }

    /// Insert into `registry`, following the default registry if it was replaced meanwhile
    ///
    /// The copy left in a retired registry goes away with that registry.
    fn add_to_default(&self, mut registry: Arc<ClientRegistry>, client: Client) -> ClientResult<Arc<Client>> {
        loop {
            let stored = registry.add(client.clone())?;
            match self.default.load_full() {
                Some(current) if !Arc::ptr_eq(&current, &registry) => {
                    debug!(
                        client = %client.display_name(),
                        registry = %current.name(),
                        "Default client registry replaced during insert, retrying"
                    );
                    registry = current;
                }
                _ => return Ok(stored),
            }
        }
    }

    /// Longest-prefix-match lookup in `scope`, or in the default registry
    pub fn find(
        &self,
        addr: IpAddr,
        transport: Transport,
        scope: Option<&ClientRegistry>,
    ) -> Option<Arc<Client>> {
        match scope {
            Some(registry) => registry.find(addr, transport),
            None => self.default.load_full()?.find(addr, transport),
        }
    }

    /// Longest-prefix-match lookup that never goes past `network`'s prefix
    pub fn find_network(
        &self,
        network: IpNetwork,
        transport: Transport,
        scope: Option<&ClientRegistry>,
    ) -> Option<Arc<Client>> {
        match scope {
            Some(registry) => registry.find_network(network, transport),
            None => self.default.load_full()?.find_network(network, transport),
        }
    }

    /// Client holding `number` in any registry of this scope set
    pub fn find_by_number(&self, number: u64) -> Option<Arc<Client>> {
        self.numbering.as_ref()?.get(number)
    }

    /// Remove a client from `scope`, or from the default registry
    ///
    /// Returns whether the client was present.
    pub fn delete(&self, client: &Client, scope: Option<&ClientRegistry>) -> bool {
        match scope {
            Some(registry) => registry.delete(client),
            None => self
                .default
                .load_full()
                .map(|registry| registry.delete(client))
                .unwrap_or(false),
        }
    }
}

impl std::fmt::Debug for ClientScopes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientScopes")
            .field("default", &self.default.load_full())
            .field("numbering", &self.numbering)
            .finish()
    }
}
