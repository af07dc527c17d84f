// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Core data-model types used throughout amino-dht.

use std::{
    fmt::{self, Display},
    net::{IpAddr, SocketAddr},
    time::Instant,
};

use serde::{Deserialize, Serialize};

/// Opaque peer identifier.
///
/// A multihash-encoded byte string in the Amino network; equality is byte
/// equality. All distance math operates on the derived [`crate::keyspace::KadId`],
/// never on these bytes directly.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId {
    bytes: Vec<u8>,
}

impl PeerId {
    /// Create a new peer ID from raw bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Get the raw bytes of this peer ID.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the peer ID, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.bytes[..8.min(self.bytes.len())]))
    }
}

/// A network address for a peer.
///
/// Rendered on the wire as opaque multiaddress bytes; in memory it keeps the
/// transport protocol and a `host:port` endpoint separately.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    /// Transport protocol name, e.g. `tcp` or `quic`.
    pub protocol: String,
    /// Endpoint in `host:port` form.
    pub address: String,
}

impl PeerAddress {
    /// Create a new address.
    pub fn new(protocol: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            address: address.into(),
        }
    }

    /// The IP component of the endpoint, if it parses as one.
    pub fn ip(&self) -> Option<IpAddr> {
        if let Ok(sock) = self.address.parse::<SocketAddr>() {
            return Some(sock.ip());
        }
        self.address.parse::<IpAddr>().ok()
    }

    /// Render this address as the opaque bytes carried on the wire.
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Parse an address back from wire bytes. Unrecognisable bytes yield
    /// `None`; callers skip them rather than failing the whole message.
    pub fn from_wire_bytes(bytes: &[u8]) -> Option<Self> {
        let rendered = std::str::from_utf8(bytes).ok()?;
        let (protocol, address) = rendered.split_once('/')?;
        if protocol.is_empty() || address.is_empty() {
            return None;
        }
        Some(Self::new(protocol, address))
    }
}

impl Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.protocol, self.address)
    }
}

/// How the sender of a message is connected to a peer it refers to.
///
/// The integer values are normative on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ConnectionType {
    /// Sender has not tried to connect to the peer.
    NotConnected = 0,
    /// Sender is currently connected to the peer.
    Connected = 1,
    /// Sender was recently connected to the peer.
    CanConnect = 2,
    /// Sender tried and failed to connect.
    CannotConnect = 3,
}

impl Default for ConnectionType {
    fn default() -> Self {
        ConnectionType::NotConnected
    }
}

/// Information about a peer, as carried in DHT messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// The peer's identifier.
    pub peer_id: PeerId,
    /// Addresses the sender believes can be used to reach the peer.
    pub addresses: Vec<PeerAddress>,
    /// How the sender is connected to that peer.
    pub connection: ConnectionType,
}

impl PeerInfo {
    /// Create peer info with no known connection state.
    pub fn new(peer_id: PeerId, addresses: Vec<PeerAddress>) -> Self {
        Self {
            peer_id,
            addresses,
            connection: ConnectionType::NotConnected,
        }
    }
}

/// A DHT key/value record.
///
/// `author` and `signature` are local bookkeeping only and never cross the
/// wire; decoders leave them empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// The (namespaced) key the record is stored under.
    pub key: Vec<u8>,
    /// The record payload.
    pub value: Vec<u8>,
    /// When the holding node received the record, as an RFC 3339 string,
    /// exactly as the wire carries it. Empty if unset.
    pub time_received: String,
    /// Local-only: the peer that authored the record.
    pub author: Option<PeerId>,
    /// Local-only: signature over the record, if any.
    pub signature: Vec<u8>,
}

impl Record {
    /// Create a record with no local bookkeeping attached.
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            key,
            value,
            time_received: String::new(),
            author: None,
            signature: Vec::new(),
        }
    }
}

/// A time-bounded assertion that a peer can serve content under a key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderRecord {
    /// The providing peer.
    pub peer_id: PeerId,
    /// Addresses the provider announced, if any.
    pub addresses: Vec<PeerAddress>,
    /// When this assertion lapses.
    pub expires_at: Instant,
}

impl ProviderRecord {
    /// True once the record's validity has lapsed.
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}
