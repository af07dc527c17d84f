// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Protobuf schema for the Amino DHT wire protocol.
//!
//! Hand-maintained prost structs mirroring the canonical `dht.proto`; kept in
//! sync by the round-trip tests in [`crate::protocol`]. Field tags are
//! normative and must not change.

/// The single message envelope exchanged on `/ipfs/kad/1.0.0` streams.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Message {
    /// What kind of RPC this is; decides which other fields are meaningful.
    #[prost(enumeration = "message::MessageType", tag = "1")]
    pub r#type: i32,
    /// The key the RPC concerns. Unset for PING.
    #[prost(bytes = "vec", tag = "2")]
    pub key: Vec<u8>,
    /// Record payload for PUT_VALUE / GET_VALUE.
    #[prost(message, optional, tag = "3")]
    pub record: Option<Record>,
    /// Peers closer to `key`, from the responder's routing table.
    #[prost(message, repeated, tag = "8")]
    pub closer_peers: Vec<message::Peer>,
    /// Peers known to provide `key`.
    #[prost(message, repeated, tag = "9")]
    pub provider_peers: Vec<message::Peer>,
    /// Legacy coral cluster level; carried through opaquely.
    #[prost(int32, tag = "10")]
    pub cluster_level_raw: i32,
}

/// Nested types of [`Message`].
pub mod message {
    /// A peer reference carried inside a message.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Peer {
        /// The peer's identifier bytes.
        #[prost(bytes = "vec", tag = "1")]
        pub id: Vec<u8>,
        /// Multiaddresses the sender believes reach the peer.
        #[prost(bytes = "vec", repeated, tag = "2")]
        pub addrs: Vec<Vec<u8>>,
        /// The sender's connection to the peer.
        #[prost(enumeration = "ConnectionType", tag = "3")]
        pub connection: i32,
    }

    /// The six DHT RPCs. Values are normative on the wire.
    #[derive(
        Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
    )]
    #[repr(i32)]
    pub enum MessageType {
        /// Store a record under `key`.
        PutValue = 0,
        /// Retrieve the record for `key`.
        GetValue = 1,
        /// Announce the sender provides `key`.
        AddProvider = 2,
        /// Ask for providers and closer peers for `key`.
        GetProviders = 3,
        /// Ask for peers closer to `key`.
        FindNode = 4,
        /// Liveness check.
        Ping = 5,
    }

    /// How the sender is connected to a referenced peer.
    #[derive(
        Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
    )]
    #[repr(i32)]
    pub enum ConnectionType {
        /// Sender has not tried to connect.
        NotConnected = 0,
        /// Sender is connected right now.
        Connected = 1,
        /// Sender was recently connected.
        CanConnect = 2,
        /// Sender tried to connect and failed.
        CannotConnect = 3,
    }
}

/// A record as it crosses the wire. Author and signature are local-only
/// bookkeeping and have no field here.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Record {
    /// The key the record is stored under.
    #[prost(bytes = "vec", tag = "1")]
    pub key: Vec<u8>,
    /// The record payload.
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
    /// When the sender received the record, RFC 3339.
    #[prost(string, tag = "5")]
    pub time_received: String,
}
