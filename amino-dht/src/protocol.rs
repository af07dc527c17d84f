// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Wire protocol: framing and interpretation of the six DHT RPCs.
//!
//! Each message on a stream is an unsigned-LEB128 varint length followed by
//! exactly that many bytes of protobuf payload. Both framed and raw entry
//! points are provided; the raw forms serve intra-process use and outer
//! layers that frame for themselves.

use bytes::BytesMut;
use prost::Message as _;
use thiserror::Error;

use crate::{
    error::DhtError,
    pb,
    types::{ConnectionType, PeerAddress, PeerId, PeerInfo, Record},
};

/// The protocol string negotiated for DHT streams.
pub const PROTOCOL_ID: &str = "/ipfs/kad/1.0.0";

/// The Amino protocol prefix.
pub const PROTOCOL_PREFIX: &str = "/ipfs";

/// Default ceiling for a varint length-delimited packet.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 16 * 1024;

/// Wire-layer errors. All of them surface to callers as
/// [`DhtError::Malformed`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The message type value is not one of the six RPCs.
    #[error("unknown message type {0}")]
    UnknownMessageType(i32),

    /// A peer entry carried an out-of-range connection value.
    #[error("unknown connection type {0}")]
    UnknownConnectionType(i32),

    /// Declared or produced frame exceeds the configured ceiling.
    #[error("packet of {size} bytes exceeds maximum {max}")]
    PacketTooLarge {
        /// Observed size.
        size: usize,
        /// Configured ceiling.
        max: usize,
    },

    /// The length prefix does not fit an unsigned 64-bit varint.
    #[error("length prefix overflows varint")]
    VarintOverflow,

    /// Fewer payload bytes than the length prefix declared.
    #[error("payload shorter than declared length")]
    Truncated,

    /// Protobuf decode failure.
    #[error("protobuf decode: {0}")]
    Decode(String),
}

impl From<ProtocolError> for DhtError {
    fn from(err: ProtocolError) -> Self {
        DhtError::Malformed(err.to_string())
    }
}

/// The six DHT RPCs. Integer values are normative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum MessageType {
    /// Store a record under `key`.
    PutValue = 0,
    /// Retrieve the record for `key`.
    GetValue = 1,
    /// Announce that the sender provides `key`.
    AddProvider = 2,
    /// Ask for providers and closer peers for `key`.
    GetProviders = 3,
    /// Ask for peers closer to `key`.
    FindNode = 4,
    /// Liveness check; the response echoes the type.
    Ping = 5,
}

impl MessageType {
    /// The on-wire value.
    pub fn to_i32(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::PutValue),
            1 => Ok(MessageType::GetValue),
            2 => Ok(MessageType::AddProvider),
            3 => Ok(MessageType::GetProviders),
            4 => Ok(MessageType::FindNode),
            5 => Ok(MessageType::Ping),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

fn connection_type_from_i32(value: i32) -> Result<ConnectionType, ProtocolError> {
    match value {
        0 => Ok(ConnectionType::NotConnected),
        1 => Ok(ConnectionType::Connected),
        2 => Ok(ConnectionType::CanConnect),
        3 => Ok(ConnectionType::CannotConnect),
        other => Err(ProtocolError::UnknownConnectionType(other)),
    }
}

/// A DHT message, request or response.
///
/// `msg_type` decides which of the optional fields carry meaning; the rest
/// decode as empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DhtMessage {
    /// Which RPC this is.
    pub msg_type: MessageType,
    /// Legacy cluster level, carried through opaquely.
    pub cluster_level: i32,
    /// The key the RPC concerns.
    pub key: Vec<u8>,
    /// Record payload, PUT_VALUE / GET_VALUE only.
    pub record: Option<Record>,
    /// Peers closer to `key`.
    pub closer_peers: Vec<PeerInfo>,
    /// Peers providing `key`.
    pub provider_peers: Vec<PeerInfo>,
}

impl DhtMessage {
    /// A bare message of the given type and key.
    pub fn new(msg_type: MessageType, key: Vec<u8>) -> Self {
        Self {
            msg_type,
            cluster_level: 0,
            key,
            record: None,
            closer_peers: Vec::new(),
            provider_peers: Vec::new(),
        }
    }

    /// Attach a record.
    pub fn with_record(mut self, record: Record) -> Self {
        self.record = Some(record);
        self
    }

    /// Attach closer peers.
    pub fn with_closer_peers(mut self, peers: Vec<PeerInfo>) -> Self {
        self.closer_peers = peers;
        self
    }

    /// Attach provider peers.
    pub fn with_provider_peers(mut self, peers: Vec<PeerInfo>) -> Self {
        self.provider_peers = peers;
        self
    }

    fn to_proto(&self) -> pb::Message {
        pb::Message {
            r#type: self.msg_type.to_i32(),
            key: self.key.clone(),
            record: self.record.as_ref().map(|record| pb::Record {
                key: record.key.clone(),
                value: record.value.clone(),
                time_received: record.time_received.clone(),
            }),
            closer_peers: self.closer_peers.iter().map(peer_to_proto).collect(),
            provider_peers: self.provider_peers.iter().map(peer_to_proto).collect(),
            cluster_level_raw: self.cluster_level,
        }
    }

    fn from_proto(proto: pb::Message) -> Result<Self, ProtocolError> {
        let msg_type = MessageType::try_from(proto.r#type)?;
        let record = proto.record.map(|record| Record {
            key: record.key,
            value: record.value,
            time_received: record.time_received,
            // Local-only fields never cross the wire.
            author: None,
            signature: Vec::new(),
        });
        let closer_peers = proto
            .closer_peers
            .into_iter()
            .map(peer_from_proto)
            .collect::<Result<Vec<_>, _>>()?;
        let provider_peers = proto
            .provider_peers
            .into_iter()
            .map(peer_from_proto)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            msg_type,
            cluster_level: proto.cluster_level_raw,
            key: proto.key,
            record,
            closer_peers,
            provider_peers,
        })
    }
}

fn peer_to_proto(peer: &PeerInfo) -> pb::message::Peer {
    pb::message::Peer {
        id: peer.peer_id.as_bytes().to_vec(),
        addrs: peer
            .addresses
            .iter()
            .map(PeerAddress::to_wire_bytes)
            .collect(),
        connection: peer.connection as i32,
    }
}

fn peer_from_proto(peer: pb::message::Peer) -> Result<PeerInfo, ProtocolError> {
    let connection = connection_type_from_i32(peer.connection)?;
    // Unparseable address bytes are skipped, not fatal.
    let addresses = peer
        .addrs
        .iter()
        .filter_map(|bytes| PeerAddress::from_wire_bytes(bytes))
        .collect();
    Ok(PeerInfo {
        peer_id: PeerId::new(peer.id),
        addresses,
        connection,
    })
}

/// Encoder/decoder for DHT messages with a configurable frame ceiling.
#[derive(Clone, Copy, Debug)]
pub struct Codec {
    max_packet_size: usize,
}

impl Codec {
    /// A codec enforcing the given maximum frame size.
    pub fn new(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }

    /// Encode a message as a bare protobuf payload, no framing.
    pub fn encode(&self, message: &DhtMessage) -> Result<Vec<u8>, ProtocolError> {
        let proto = message.to_proto();
        let size = proto.encoded_len();
        if size > self.max_packet_size {
            return Err(ProtocolError::PacketTooLarge {
                size,
                max: self.max_packet_size,
            });
        }
        let mut buf = Vec::with_capacity(size);
        proto
            .encode(&mut buf)
            .map_err(|e| ProtocolError::Decode(e.to_string()))?;
        Ok(buf)
    }

    /// Decode a bare protobuf payload.
    pub fn decode(&self, bytes: &[u8]) -> Result<DhtMessage, ProtocolError> {
        if bytes.len() > self.max_packet_size {
            return Err(ProtocolError::PacketTooLarge {
                size: bytes.len(),
                max: self.max_packet_size,
            });
        }
        let proto =
            pb::Message::decode(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))?;
        let message = DhtMessage::from_proto(proto)?;
        MessageValidator::validate(&message)?;
        Ok(message)
    }

    /// Encode a message with its varint length prefix.
    pub fn encode_framed(&self, message: &DhtMessage) -> Result<Vec<u8>, ProtocolError> {
        let payload = self.encode(message)?;
        let mut framed = BytesMut::with_capacity(payload.len() + 5);
        prost::encoding::encode_varint(payload.len() as u64, &mut framed);
        framed.extend_from_slice(&payload);
        Ok(framed.to_vec())
    }

    /// Decode one framed message from the front of `bytes`, returning it and
    /// the number of bytes consumed.
    pub fn decode_framed(&self, bytes: &[u8]) -> Result<(DhtMessage, usize), ProtocolError> {
        let (declared, prefix_len) = match peek_uvarint(bytes)? {
            Some(parsed) => parsed,
            // An incomplete prefix on a complete buffer is a short frame.
            None => return Err(ProtocolError::Truncated),
        };

        let declared = usize::try_from(declared).map_err(|_| ProtocolError::VarintOverflow)?;
        if declared > self.max_packet_size {
            return Err(ProtocolError::PacketTooLarge {
                size: declared,
                max: self.max_packet_size,
            });
        }
        let rest = &bytes[prefix_len..];
        if rest.len() < declared {
            return Err(ProtocolError::Truncated);
        }

        let payload = &rest[..declared];
        let proto =
            pb::Message::decode(payload).map_err(|e| ProtocolError::Decode(e.to_string()))?;
        let message = DhtMessage::from_proto(proto)?;
        MessageValidator::validate(&message)?;
        Ok((message, prefix_len + declared))
    }
}

/// Parse an unsigned LEB128 varint from the front of `buf`.
///
/// `Ok(None)` means the prefix is incomplete and more bytes are needed;
/// an 11-byte (or value-overflowing) prefix is rejected outright.
fn peek_uvarint(buf: &[u8]) -> Result<Option<(u64, usize)>, ProtocolError> {
    let mut value: u64 = 0;
    for (i, byte) in buf.iter().enumerate().take(10) {
        if i == 9 && *byte > 1 {
            return Err(ProtocolError::VarintOverflow);
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    if buf.len() >= 10 {
        return Err(ProtocolError::VarintOverflow);
    }
    Ok(None)
}

/// Incremental decoder for a stream of framed messages.
///
/// Feed raw bytes as they arrive; complete frames come out as messages while
/// partial ones wait for more input. A decode error poisons the stream and
/// the owning connection should be dropped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    codec: Codec,
    buffer: BytesMut,
}

impl FrameDecoder {
    /// A decoder enforcing `codec`'s frame ceiling.
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            buffer: BytesMut::new(),
        }
    }

    /// Append bytes read from the stream.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet decoded.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Decode the next complete message, or `None` when more bytes are
    /// needed.
    pub fn next_message(&mut self) -> Result<Option<DhtMessage>, ProtocolError> {
        let (declared, prefix_len) = match peek_uvarint(&self.buffer)? {
            Some(parsed) => parsed,
            None => return Ok(None),
        };

        let declared = usize::try_from(declared).map_err(|_| ProtocolError::VarintOverflow)?;
        if declared > self.codec.max_packet_size {
            return Err(ProtocolError::PacketTooLarge {
                size: declared,
                max: self.codec.max_packet_size,
            });
        }
        if self.buffer.len() < prefix_len + declared {
            return Ok(None);
        }

        let frame = self.buffer.split_to(prefix_len + declared);
        let payload = &frame[prefix_len..];
        let proto =
            pb::Message::decode(payload).map_err(|e| ProtocolError::Decode(e.to_string()))?;
        let message = DhtMessage::from_proto(proto)?;
        MessageValidator::validate(&message)?;
        Ok(Some(message))
    }
}

/// Structural sanity limits on decoded messages, enforced over and above
/// what protobuf itself guarantees.
pub struct MessageValidator;

impl MessageValidator {
    /// Longest acceptable peer-id byte string.
    pub const MAX_PEER_ID_LEN: usize = 256;
    /// Most addresses accepted per referenced peer.
    pub const MAX_ADDRS_PER_PEER: usize = 64;

    /// Check the structural limits of a decoded message.
    pub fn validate(message: &DhtMessage) -> Result<(), ProtocolError> {
        for peer in message
            .closer_peers
            .iter()
            .chain(message.provider_peers.iter())
        {
            if peer.peer_id.as_bytes().is_empty()
                || peer.peer_id.as_bytes().len() > Self::MAX_PEER_ID_LEN
            {
                return Err(ProtocolError::Decode(
                    "peer entry with invalid id length".to_string(),
                ));
            }
            if peer.addresses.len() > Self::MAX_ADDRS_PER_PEER {
                return Err(ProtocolError::Decode(
                    "peer entry with too many addresses".to_string(),
                ));
            }
        }
        if let Some(record) = &message.record {
            if record.key.is_empty() {
                return Err(ProtocolError::Decode("record with empty key".to_string()));
            }
        }
        Ok(())
    }
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PACKET_SIZE)
    }
}
