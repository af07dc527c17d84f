// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The 256-bit XOR keyspace.
//!
//! Every identifier that takes part in distance math is first canonicalized
//! into a [`KadId`]: the SHA-256 of its byte form. Distances are the XOR of
//! two ids, ordered as 256-bit unsigned integers.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::PeerId;

/// Width of the keyspace in bits.
pub const KEY_BITS: u32 = 256;

/// A key in the Kademlia keyspace.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KadId([u8; 32]);

impl KadId {
    /// Canonicalize arbitrary bytes (a peer id, a content id, a record key)
    /// into the keyspace.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut id = [0u8; 32];
        id.copy_from_slice(&digest);
        Self(id)
    }

    /// The keyspace position of a peer.
    pub fn from_peer_id(peer: &PeerId) -> Self {
        Self::from_bytes(peer.as_bytes())
    }

    /// Wrap an already-canonical 32-byte id.
    pub fn from_raw(raw: [u8; 32]) -> Self {
        Self(raw)
    }

    /// The raw 32 bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// XOR distance to another id.
    pub fn distance(&self, other: &KadId) -> Distance {
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Distance(out)
    }

    /// Number of leading bit positions where the two ids agree. `256` when
    /// the ids are equal.
    pub fn common_prefix_len(&self, other: &KadId) -> u32 {
        self.distance(other).leading_zeros()
    }
}

impl fmt::Debug for KadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KadId({})", hex::encode(&self.0[..8]))
    }
}

/// XOR distance between two [`KadId`]s, ordered as a 256-bit unsigned integer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Distance([u8; 32]);

impl Distance {
    /// Leading zero bits: eight per zero byte plus the leading zeros of the
    /// first non-zero byte.
    pub fn leading_zeros(&self) -> u32 {
        let mut zeros = 0;
        for byte in &self.0 {
            if *byte == 0 {
                zeros += 8;
            } else {
                zeros += byte.leading_zeros();
                break;
            }
        }
        zeros
    }

    /// True for the distance of an id to itself.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// The raw 32 bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Distance({})", hex::encode(&self.0[..8]))
    }
}

/// Byte-wise "less than" over arbitrary-length byte strings. When every
/// compared byte is equal, the shorter slice is the smaller.
pub fn less_bytes(a: &[u8], b: &[u8]) -> bool {
    for (x, y) in a.iter().zip(b.iter()) {
        if x != y {
            return x < y;
        }
    }
    a.len() < b.len()
}

/// Sort peers ascending by XOR distance of their [`KadId`] to `target`.
pub fn sort_by_distance(target: &KadId, peers: Vec<PeerId>) -> Vec<PeerId> {
    let mut keyed: Vec<(Distance, PeerId)> = peers
        .into_iter()
        .map(|peer| (KadId::from_peer_id(&peer).distance(target), peer))
        .collect();
    keyed.sort_by(|(a, _), (b, _)| a.cmp(b));
    keyed.into_iter().map(|(_, peer)| peer).collect()
}

/// Produce a random [`KadId`] whose common prefix length with `local` is
/// exactly `cpl`. Used to aim refresh queries at a specific bucket.
///
/// Requires `cpl < 256`: copies the shared prefix from `local`, inverts the
/// bit at position `cpl`, and randomises everything after it.
pub fn random_id_with_cpl(local: &KadId, cpl: u32) -> KadId {
    debug_assert!(cpl < KEY_BITS);
    let mut out = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut out);

    let local_bytes = local.as_bytes();
    let byte_idx = (cpl / 8) as usize;
    let bit_idx = cpl % 8;

    out[..byte_idx].copy_from_slice(&local_bytes[..byte_idx]);

    let keep_mask: u8 = if bit_idx == 0 {
        0
    } else {
        0xffu8 << (8 - bit_idx)
    };
    let flip_bit: u8 = 0x80u8 >> bit_idx;
    let rand_mask: u8 = !(keep_mask | flip_bit);
    out[byte_idx] = (local_bytes[byte_idx] & keep_mask)
        | ((local_bytes[byte_idx] ^ flip_bit) & flip_bit)
        | (out[byte_idx] & rand_mask);

    KadId::from_raw(out)
}
