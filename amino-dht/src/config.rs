// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Node-level configuration and its Amino validation.

use std::time::Duration;

use crate::{
    error::Result,
    protocol::{DEFAULT_MAX_PACKET_SIZE, PROTOCOL_PREFIX},
    validator::{ensure_amino_validator_shape, NamespacedValidator},
};

/// Configuration for a DHT node. The defaults are the Amino deployment's.
#[derive(Clone, Debug)]
pub struct DhtConfig {
    /// Protocol prefix negotiated on streams; `/ipfs` for Amino.
    pub protocol_prefix: String,
    /// Bucket capacity (`k`).
    pub bucket_size: usize,
    /// Lookup concurrency the node hands its lookups.
    pub concurrency: usize,
    /// How many nearest peers must answer for a query path to be complete.
    pub resiliency: usize,
    /// Validity of provider records from insertion.
    pub provider_validity: Duration,
    /// TTL for provider addresses entered into the address book.
    pub provider_address_ttl: Duration,
    /// TTL for key/value records.
    pub record_ttl: Duration,
    /// Admission ceiling on a peer's latency EWMA.
    pub max_latency: Duration,
    /// Max routing-table residents per IP group.
    pub max_peers_per_ip_group: usize,
    /// Max routing-table residents per IP group within one CPL.
    pub max_peers_per_ip_group_per_cpl: usize,
    /// How often bucket refreshes are due.
    pub refresh_interval: Duration,
    /// Per-query timeout during refreshes.
    pub refresh_query_timeout: Duration,
    /// Highest CPL tracked for refresh.
    pub max_refresh_cpl: u32,
    /// Wall-clock cap on a whole lookup.
    pub lookup_timeout: Duration,
    /// Per-peer network timeout for outbound requests.
    pub network_timeout: Duration,
    /// Frame ceiling for the wire codec.
    pub max_packet_size: usize,
    /// Provider-manager cache entries.
    pub provider_cache_size: usize,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            protocol_prefix: PROTOCOL_PREFIX.to_string(),
            bucket_size: 20,
            concurrency: 10,
            resiliency: 3,
            provider_validity: Duration::from_secs(48 * 60 * 60),
            provider_address_ttl: Duration::from_secs(24 * 60 * 60),
            record_ttl: Duration::from_secs(48 * 60 * 60),
            max_latency: Duration::from_secs(10),
            max_peers_per_ip_group: 3,
            max_peers_per_ip_group_per_cpl: 2,
            refresh_interval: Duration::from_secs(15 * 60),
            refresh_query_timeout: Duration::from_secs(10),
            max_refresh_cpl: 15,
            lookup_timeout: Duration::from_secs(60),
            network_timeout: Duration::from_secs(30),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            provider_cache_size: 256,
        }
    }
}

impl DhtConfig {
    /// Validate this configuration against the validator set it will run
    /// with. Using the Amino prefix pins the validator shape.
    pub fn validate(&self, validator: &NamespacedValidator) -> Result<()> {
        ensure_amino_validator_shape(&self.protocol_prefix, validator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DhtError;
    use crate::validator::{PublicKeyValidator, Validator};
    use std::sync::Arc;

    struct AcceptAll;
    impl Validator for AcceptAll {
        fn validate(&self, _key: &[u8], _value: &[u8]) -> Result<()> {
            Ok(())
        }
        fn select(&self, _key: &[u8], values: &[Vec<u8>]) -> Result<usize> {
            if values.is_empty() {
                return Err(DhtError::NoValues);
            }
            Ok(0)
        }
    }

    #[test]
    fn amino_defaults_are_the_published_ones() {
        let config = DhtConfig::default();
        assert_eq!(config.protocol_prefix, "/ipfs");
        assert_eq!(config.bucket_size, 20);
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.resiliency, 3);
        assert_eq!(config.provider_validity, Duration::from_secs(172_800));
        assert_eq!(config.provider_address_ttl, Duration::from_secs(86_400));
        assert_eq!(config.max_latency, Duration::from_secs(10));
        assert_eq!(config.max_peers_per_ip_group, 3);
        assert_eq!(config.max_peers_per_ip_group_per_cpl, 2);
        assert_eq!(config.refresh_interval, Duration::from_secs(900));
        assert_eq!(config.max_refresh_cpl, 15);
    }

    #[test]
    fn amino_prefix_pins_the_validator_shape() {
        let config = DhtConfig::default();

        let mut correct = NamespacedValidator::new();
        correct.insert("pk", Arc::new(PublicKeyValidator));
        correct.insert("ipns", Arc::new(AcceptAll));
        assert!(config.validate(&correct).is_ok());

        let bare = NamespacedValidator::new();
        assert!(matches!(
            config.validate(&bare),
            Err(DhtError::ConfigInvalid(_))
        ));

        let custom = DhtConfig {
            protocol_prefix: "/custom".to_string(),
            ..DhtConfig::default()
        };
        assert!(custom.validate(&bare).is_ok());
    }
}
