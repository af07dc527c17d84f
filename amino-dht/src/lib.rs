// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! # amino-dht
//!
//! Core of a Kademlia DHT compatible with the Amino (IPFS) deployment:
//! content routing, peer discovery, and key/value storage over a 256-bit XOR
//! keyspace.
//!
//! ## Architecture
//!
//! - **Keyspace** ([`keyspace`]): SHA-256 canonical ids, XOR distance, CPL.
//! - **Routing table** ([`routing_table`], [`kbucket`]): the k-bucket node
//!   directory with split, replacement, and consolidation.
//! - **Diversity filter** ([`diversity`]): IP-group admission policy layered
//!   on the routing table.
//! - **Lookup engine** ([`lookup`]): the alpha-concurrent iterative query
//!   state machine with its event stream.
//! - **Provider records** ([`provider_store`], [`provider_manager`]): cached,
//!   expiring provider index.
//! - **Wire codec** ([`protocol`], [`pb`]): varint-framed protobuf messages
//!   on `/ipfs/kad/1.0.0`.
//! - **Validators** ([`validator`]): namespaced record validation.
//! - **Node facade** ([`node`], [`handlers`]): the operations and the inbound
//!   RPC dispatch.
//!
//! The underlying host (streams, secure channels, address book, latency
//! measurements) is consumed through the capability traits in [`host`].

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]

pub mod config;
pub mod diversity;
pub mod error;
pub mod handlers;
pub mod host;
pub mod kbucket;
pub mod keyspace;
pub mod lookup;
pub mod node;
pub mod pb;
pub mod protocol;
pub mod provider_manager;
pub mod provider_store;
pub mod record_store;
pub mod routing_table;
pub mod types;
pub mod validator;

pub use config::DhtConfig;
pub use diversity::{DiversityConfig, DiversityFilter, GroupFilter, GroupInfo};
pub use error::{DhtError, Result};
pub use host::{
    AddressBook, AsnResolver, LatencyEstimator, MemoryAddressBook, MessageSender,
    NoAsnResolver, NoLatencyEstimator,
};
pub use keyspace::{Distance, KadId};
pub use lookup::{
    Lookup, LookupConfig, LookupEvent, LookupResult, PeerState, QueryPeerSet, TerminationReason,
};
pub use node::{Dht, DhtBuilder};
pub use protocol::{
    Codec, DhtMessage, FrameDecoder, MessageType, MessageValidator, ProtocolError,
    DEFAULT_MAX_PACKET_SIZE, PROTOCOL_ID, PROTOCOL_PREFIX,
};
pub use provider_manager::{ProviderManager, ProviderManagerConfig, ProviderSet};
pub use provider_store::{MemoryProviderStore, ProviderStore, ProviderStoreConfig};
pub use record_store::{MemoryRecordStore, RecordStore, RecordStoreConfig, RecordStoreStats};
pub use routing_table::{RoutingTable, RoutingTableConfig, RoutingTableInfo};
pub use types::{ConnectionType, PeerAddress, PeerId, PeerInfo, ProviderRecord, Record};
pub use validator::{NamespacedValidator, PublicKeyValidator, Validator};
