//! Prefix-indexed client registry
//!
//! A [`ClientRegistry`] keeps one [`PrefixBucket`] per prefix length
//! (0..=128) and answers longest-prefix-match lookups by probing buckets
//! from the most specific length down to the shortest populated one. The
//! cost of a lookup is bounded by the address width, not by the number of
//! clients.
//!
//! # Concurrency
//!
//! Lookups share a read lock and never mutate the tree. Insert and delete
//! hold the write lock for the whole check/number/insert sequence, so a
//! lookup sees either the old or the new state. Records are handed out as
//! `Arc<Client>`, which keeps a deleted record alive for as long as any
//! caller still holds it.

use crate::bucket::PrefixBucket;
use crate::client::Client;
use crate::error::{ClientError, ClientResult};
use crate::key::{mask, max_prefix, Transport, IPV6_MAX_PREFIX};
use ipnetwork::IpNetwork;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, error, warn};

const BUCKET_COUNT: usize = IPV6_MAX_PREFIX as usize + 1;

/// Process-wide client numbering
///
/// Numbers start at 0, increase monotonically and are never reused, even
/// after the numbered client is deleted. Every registry created by one
/// [`ClientScopes`](crate::scope::ClientScopes) shares the same numbering.
#[derive(Debug, Default)]
pub struct ClientNumbering {
    inner: RwLock<NumberIndex>,
}

#[derive(Debug, Default)]
struct NumberIndex {
    next: u64,
    clients: BTreeMap<u64, Arc<Client>>,
}

impl ClientNumbering {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the next number; it is never handed out again
    fn reserve(&self) -> u64 {
        let mut index = self.inner.write();
        let number = index.next;
        index.next += 1;
        number
    }

    /// Make a stored record reachable by its number
    fn index(&self, client: &Arc<Client>) {
        if let Some(number) = client.number {
            self.inner.write().clients.insert(number, Arc::clone(client));
        }
    }

    fn unregister(&self, client: &Client) {
        if let Some(number) = client.number {
            self.inner.write().clients.remove(&number);
        }
    }

    /// Client holding `number`, if it is still registered
    pub fn get(&self, number: u64) -> Option<Arc<Client>> {
        let index = self.inner.read();
        if number >= index.next {
            return None;
        }
        index.clients.get(&number).cloned()
    }

    /// Next number to be assigned
    pub fn next_number(&self) -> u64 {
        self.inner.read().next
    }

    /// Number of clients currently indexed
    pub fn len(&self) -> usize {
        self.inner.read().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct PrefixTree {
    buckets: Vec<Option<PrefixBucket>>,
    /// Shortest populated prefix length. Only ever lowered.
    min_prefix: u8,
    len: usize,
}

impl PrefixTree {
    fn new() -> Self {
        PrefixTree {
            buckets: (0..BUCKET_COUNT).map(|_| None).collect(),
            min_prefix: IPV6_MAX_PREFIX,
            len: 0,
        }
    }

    fn bucket(&self, prefix: u8) -> Option<&PrefixBucket> {
        self.buckets.get(usize::from(prefix))?.as_ref()
    }
}

/// Clients keyed by address prefix and transport
pub struct ClientRegistry {
    name: String,
    tree: RwLock<PrefixTree>,
    numbering: Option<Arc<ClientNumbering>>,
}

impl ClientRegistry {
    /// Create an empty registry without numbering
    pub fn new(name: impl Into<String>) -> Self {
        ClientRegistry {
            name: name.into(),
            tree: RwLock::new(PrefixTree::new()),
            numbering: None,
        }
    }

    /// Create an empty registry that numbers its clients through `numbering`
    pub fn with_numbering(name: impl Into<String>, numbering: Arc<ClientNumbering>) -> Self {
        ClientRegistry {
            name: name.into(),
            tree: RwLock::new(PrefixTree::new()),
            numbering: Some(numbering),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn numbering(&self) -> Option<&Arc<ClientNumbering>> {
        self.numbering.as_ref()
    }

    pub fn len(&self) -> usize {
        self.tree.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shortest prefix length ever populated (128 while empty)
    pub fn min_prefix(&self) -> u8 {
        self.tree.read().min_prefix
    }

    /// Add a client
    ///
    /// Returns the stored record. Adding a client identical to one already
    /// stored is a no-op that returns the existing record; adding a
    /// different client with a colliding key fails with
    /// [`ClientError::DuplicateClientConflict`] and leaves the registry as
    /// it was.
    pub fn add(&self, mut client: Client) -> ClientResult<Arc<Client>> {
        let prefix = client.key().prefix();
        debug!(
            registry = %self.name,
            client = %client.key(),
            name = %client.longname(),
            prefix = prefix,
            "Adding client to prefix tree"
        );

        let mut tree = self.tree.write();

        if let Some(old) = tree
            .bucket(prefix)
            .and_then(|bucket| bucket.find_colliding(client.key()))
        {
            if old.same_definition(&client) {
                warn!(registry = %self.name, client = %client.longname(), "Ignoring duplicate client");
                return Ok(Arc::clone(old));
            }

            error!(
                registry = %self.name,
                client = %client.display_name(),
                existing = %old.display_name(),
                "Failed to add duplicate client"
            );
            return Err(ClientError::DuplicateClientConflict {
                client: client.display_name().to_string(),
                existing: old.display_name().to_string(),
            });
        }

        if let Some(numbering) = &self.numbering {
            client.number = Some(numbering.reserve());
        }
        let client = Arc::new(client);

        tree.buckets[usize::from(prefix)]
            .get_or_insert_with(PrefixBucket::new)
            .insert(Arc::clone(&client));
        tree.len += 1;
        if prefix < tree.min_prefix {
            tree.min_prefix = prefix;
        }

        // Indexed only once the record is visible to lookups
        if let Some(numbering) = &self.numbering {
            numbering.index(&client);
        }

        Ok(client)
    }

    /// Longest-prefix-match lookup for a single source address
    pub fn find(&self, addr: IpAddr, transport: Transport) -> Option<Arc<Client>> {
        self.find_bounded(addr, max_prefix(&addr), transport)
    }

    /// Longest-prefix-match lookup that never goes past `network`'s prefix
    ///
    /// Used when the caller is testing a known prefix rather than one host:
    /// looking up `192.168.0.0/16` starts at /16, not /32.
    pub fn find_network(&self, network: IpNetwork, transport: Transport) -> Option<Arc<Client>> {
        self.find_bounded(network.ip(), network.prefix(), transport)
    }

    fn find_bounded(&self, addr: IpAddr, bound: u8, transport: Transport) -> Option<Arc<Client>> {
        let max = bound.min(max_prefix(&addr));
        let tree = self.tree.read();

        for prefix in (tree.min_prefix..=max).rev() {
            let bucket = match tree.bucket(prefix) {
                Some(bucket) if !bucket.is_empty() => bucket,
                _ => continue,
            };

            if let Some(client) = bucket.find_match(&mask(addr, prefix), transport) {
                return Some(Arc::clone(client));
            }
        }

        None
    }

    /// Client holding `number`, when this registry numbers its clients
    pub fn find_by_number(&self, number: u64) -> Option<Arc<Client>> {
        self.numbering.as_ref()?.get(number)
    }

    /// Remove a previously added client
    ///
    /// Only the exact stored record is removed; returns whether it was
    /// present. The shortest-prefix watermark is left where it is.
    pub fn delete(&self, client: &Client) -> bool {
        let prefix = usize::from(client.key().prefix());
        let mut tree = self.tree.write();

        let removed = match tree.buckets.get_mut(prefix).and_then(Option::as_mut) {
            Some(bucket) => bucket.remove(client),
            None => None,
        };

        match removed {
            Some(removed) => {
                tree.len -= 1;
                if let Some(numbering) = &self.numbering {
                    numbering.unregister(&removed);
                }
                debug!(registry = %self.name, client = %removed.key(), "Deleted client");
                true
            }
            None => false,
        }
    }

    /// Snapshot of every stored client, shortest prefix first
    pub fn clients(&self) -> Vec<Arc<Client>> {
        let tree = self.tree.read();
        tree.buckets
            .iter()
            .flatten()
            .flat_map(|bucket| bucket.iter().cloned())
            .collect()
    }

    /// Release every client this registry owns
    pub fn clear(&self) {
        let mut tree = self.tree.write();
        let drained: Vec<Arc<Client>> = tree
            .buckets
            .iter_mut()
            .flatten()
            .flat_map(PrefixBucket::drain)
            .collect();
        tree.len = 0;
        drop(tree);

        if let Some(numbering) = &self.numbering {
            for client in &drained {
                numbering.unregister(client);
            }
        }
    }
}

impl Drop for ClientRegistry {
    fn drop(&mut self) {
        let Some(numbering) = &self.numbering else {
            return;
        };

        for bucket in self.tree.get_mut().buckets.iter().flatten() {
            for client in bucket.iter() {
                numbering.unregister(client);
            }
        }
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tree = self.tree.read();
        f.debug_struct("ClientRegistry")
            .field("name", &self.name)
            .field("len", &tree.len)
            .field("min_prefix", &tree.min_prefix)
            .field("numbered", &self.numbering.is_some())
            .finish()
    }
}
