//! Per-prefix-length client buckets
//!
//! Each bucket holds the clients of one prefix length, ordered by masked
//! address. Clients at the same address share a slot that holds either a
//! single wildcard-transport client or one client per concrete transport.

use crate::client::Client;
use crate::key::{AddressKey, Transport};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

#[derive(Debug, Default)]
pub(crate) struct PrefixBucket {
    slots: BTreeMap<IpAddr, Vec<Arc<Client>>>,
    len: usize,
}

impl PrefixBucket {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Client occupying the storage slot of `key`
    pub(crate) fn find_colliding(&self, key: &AddressKey) -> Option<&Arc<Client>> {
        self.slots
            .get(&key.addr())?
            .iter()
            .find(|client| client.key().collides(key))
    }

    /// Client answering requests from the already masked `addr` over `transport`
    pub(crate) fn find_match(&self, addr: &IpAddr, transport: Transport) -> Option<&Arc<Client>> {
        self.slots
            .get(addr)?
            .iter()
            .find(|client| client.transport().accepts(transport))
    }

    /// Store `client`; the caller has checked it collides with nothing
    pub(crate) fn insert(&mut self, client: Arc<Client>) {
        let slot = self.slots.entry(client.key().addr()).or_default();
        slot.push(client);
        slot.sort_by_key(|c| c.transport());
        self.len += 1;
    }

    /// Remove this exact record, if stored here
    pub(crate) fn remove(&mut self, client: &Client) -> Option<Arc<Client>> {
        let addr = client.key().addr();
        let slot = self.slots.get_mut(&addr)?;
        let pos = slot
            .iter()
            .position(|stored| std::ptr::eq(Arc::as_ptr(stored), client))?;
        let removed = slot.remove(pos);

        if slot.is_empty() {
            self.slots.remove(&addr);
        }
        self.len -= 1;

        Some(removed)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Client>> {
        self.slots.values().flatten()
    }

    /// Take every client out, leaving the bucket empty
    pub(crate) fn drain(&mut self) -> Vec<Arc<Client>> {
        self.len = 0;
        std::mem::take(&mut self.slots).into_values().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(network: &str, transport: Transport) -> Arc<Client> {
        Arc::new(Client::new(network.parse().unwrap(), transport, "secret"))
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_insert_and_find() {
        let mut bucket = PrefixBucket::new();
        bucket.insert(client("10.0.0.0/8", Transport::Udp));
        bucket.insert(client("11.0.0.0/8", Transport::Udp));

        assert_eq!(bucket.len(), 2);
        assert!(bucket.find_match(&ip("10.0.0.0"), Transport::Udp).is_some());
        assert!(bucket.find_match(&ip("12.0.0.0"), Transport::Udp).is_none());
    }

    #[test]
    fn test_concrete_transports_share_address() {
        let mut bucket = PrefixBucket::new();
        bucket.insert(client("10.0.0.1/32", Transport::Tcp));
        bucket.insert(client("10.0.0.1/32", Transport::Udp));

        let udp = bucket.find_match(&ip("10.0.0.1"), Transport::Udp).unwrap();
        assert_eq!(udp.transport(), Transport::Udp);
        let tcp = bucket.find_match(&ip("10.0.0.1"), Transport::Tcp).unwrap();
        assert_eq!(tcp.transport(), Transport::Tcp);
        assert!(bucket.find_match(&ip("10.0.0.1"), Transport::Tls).is_none());

        // Transport unknown to the caller: lowest transport wins
        let any = bucket.find_match(&ip("10.0.0.1"), Transport::Any).unwrap();
        assert_eq!(any.transport(), Transport::Udp);
    }

    #[test]
    fn test_wildcard_collides_with_concrete() {
        let mut bucket = PrefixBucket::new();
        bucket.insert(client("10.0.0.1/32", Transport::Tcp));

        let key = AddressKey::host(ip("10.0.0.1"), Transport::Any);
        assert!(bucket.find_colliding(&key).is_some());

        let key = AddressKey::host(ip("10.0.0.1"), Transport::Udp);
        assert!(bucket.find_colliding(&key).is_none());
    }

    #[test]
    fn test_remove_exact_record_only() {
        let mut bucket = PrefixBucket::new();
        let stored = client("10.0.0.1/32", Transport::Udp);
        bucket.insert(Arc::clone(&stored));

        // An equal but distinct record is not the stored one
        let lookalike = client("10.0.0.1/32", Transport::Udp);
        assert!(bucket.remove(&lookalike).is_none());
        assert_eq!(bucket.len(), 1);

        assert!(bucket.remove(&stored).is_some());
        assert!(bucket.is_empty());
        assert!(bucket.find_match(&ip("10.0.0.1"), Transport::Udp).is_none());
    }

    #[test]
    fn test_drain() {
        let mut bucket = PrefixBucket::new();
        bucket.insert(client("10.0.0.1/32", Transport::Udp));
        bucket.insert(client("10.0.0.2/32", Transport::Udp));

        assert_eq!(bucket.iter().count(), 2);
        assert_eq!(bucket.drain().len(), 2);
        assert!(bucket.is_empty());
        assert_eq!(bucket.iter().count(), 0);
    }
}
