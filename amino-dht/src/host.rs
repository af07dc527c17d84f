// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Capabilities consumed from the surrounding host.
//!
//! The DHT core never opens sockets or negotiates streams itself; the host
//! hands in these capabilities at construction. Secure channels, stream
//! multiplexing, and peer-identity cryptography all live behind them.

use std::{
    collections::HashMap,
    net::Ipv6Addr,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    error::Result,
    protocol::DhtMessage,
    types::{PeerAddress, PeerId},
};

/// Sends DHT messages to remote peers over the negotiated protocol stream.
#[async_trait]
pub trait MessageSender: Send + Sync + 'static {
    /// Send a request and wait for the peer's response.
    async fn send_request(&self, peer: &PeerId, message: DhtMessage) -> Result<DhtMessage>;

    /// Send a message without expecting a response.
    async fn send_message(&self, peer: &PeerId, message: DhtMessage) -> Result<()>;
}

/// The host's peer-address book.
#[async_trait]
pub trait AddressBook: Send + Sync + 'static {
    /// Record addresses for a peer, valid for `ttl`.
    async fn add_addresses(&self, peer: &PeerId, addresses: Vec<PeerAddress>, ttl: Duration);

    /// Fetch the currently known addresses for a peer, or `None` if the book
    /// has no live entry for it.
    async fn addresses(&self, peer: &PeerId) -> Option<Vec<PeerAddress>>;
}

/// Reports the host's smoothed latency estimate per peer.
pub trait LatencyEstimator: Send + Sync + 'static {
    /// The exponentially-weighted moving average latency to `peer`, or `None`
    /// if the host has no measurement yet.
    fn latency_ewma(&self, peer: &PeerId) -> Option<Duration>;
}

/// Maps an IPv6 address to its autonomous-system number.
pub trait AsnResolver: Send + Sync + 'static {
    /// The ASN announcing `ip`, or `None` if unknown.
    fn asn(&self, ip: &Ipv6Addr) -> Option<u32>;
}

/// A latency estimator with no measurements; admission never rejects on
/// latency with this in place.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoLatencyEstimator;

impl LatencyEstimator for NoLatencyEstimator {
    fn latency_ewma(&self, _peer: &PeerId) -> Option<Duration> {
        None
    }
}

/// An ASN resolver with no database; the diversity filter falls back to its
/// deterministic prefix grouping.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAsnResolver;

impl AsnResolver for NoAsnResolver {
    fn asn(&self, _ip: &Ipv6Addr) -> Option<u32> {
        None
    }
}

/// In-memory address book with per-entry TTLs.
#[derive(Debug, Default)]
pub struct MemoryAddressBook {
    entries: Mutex<HashMap<PeerId, BookEntry>>,
}

#[derive(Debug, Clone)]
struct BookEntry {
    addresses: Vec<PeerAddress>,
    expires_at: Instant,
}

impl MemoryAddressBook {
    /// Create an empty address book.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AddressBook for MemoryAddressBook {
    async fn add_addresses(&self, peer: &PeerId, addresses: Vec<PeerAddress>, ttl: Duration) {
        let mut entries = self.entries.lock().await;
        let expires_at = Instant::now() + ttl;
        match entries.get_mut(peer) {
            Some(entry) => {
                for address in addresses {
                    if !entry.addresses.contains(&address) {
                        entry.addresses.push(address);
                    }
                }
                entry.expires_at = entry.expires_at.max(expires_at);
            }
            None => {
                entries.insert(
                    peer.clone(),
                    BookEntry {
                        addresses,
                        expires_at,
                    },
                );
            }
        }
    }

    async fn addresses(&self, peer: &PeerId) -> Option<Vec<PeerAddress>> {
        let mut entries = self.entries.lock().await;
        match entries.get(peer) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.addresses.clone()),
            Some(_) => {
                entries.remove(peer);
                None
            }
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn address_book_merges_and_expires() {
        let book = MemoryAddressBook::new();
        let peer = PeerId::new(vec![1]);
        let a1 = PeerAddress::new("tcp", "10.0.0.1:4001");
        let a2 = PeerAddress::new("tcp", "10.0.0.2:4001");

        book.add_addresses(&peer, vec![a1.clone()], Duration::from_secs(60))
            .await;
        book.add_addresses(&peer, vec![a1.clone(), a2.clone()], Duration::from_secs(60))
            .await;

        let addrs = book.addresses(&peer).await.unwrap();
        assert_eq!(addrs, vec![a1, a2]);

        let other = PeerId::new(vec![2]);
        book.add_addresses(&other, vec![], Duration::from_millis(0))
            .await;
        assert_eq!(book.addresses(&other).await, None);
    }
}
