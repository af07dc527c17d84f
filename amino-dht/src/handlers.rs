// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Inbound request handling for the six DHT RPCs.
//!
//! Every inbound message also feeds its sender into the routing-table
//! admission path; admission refusals never fail the request.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::{
    config::DhtConfig,
    error::{DhtError, Result},
    host::AddressBook,
    keyspace::KadId,
    protocol::{DhtMessage, MessageType},
    provider_manager::ProviderManager,
    record_store::RecordStore,
    routing_table::RoutingTable,
    types::{ConnectionType, PeerId, PeerInfo},
    validator::{NamespacedValidator, Validator},
};

/// Routes decoded inbound messages to the subsystems that answer them.
pub struct MessageHandler {
    local_peer: PeerId,
    config: DhtConfig,
    routing_table: Arc<RoutingTable>,
    providers: Arc<ProviderManager>,
    records: Arc<dyn RecordStore>,
    validator: Arc<NamespacedValidator>,
    address_book: Arc<dyn AddressBook>,
}

impl MessageHandler {
    /// Wire a handler over the node's subsystems.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_peer: PeerId,
        config: DhtConfig,
        routing_table: Arc<RoutingTable>,
        providers: Arc<ProviderManager>,
        records: Arc<dyn RecordStore>,
        validator: Arc<NamespacedValidator>,
        address_book: Arc<dyn AddressBook>,
    ) -> Self {
        Self {
            local_peer,
            config,
            routing_table,
            providers,
            records,
            validator,
            address_book,
        }
    }

    /// Handle one inbound message from `sender`. Returns the response to
    /// write back, or `None` for fire-and-forget messages (ADD_PROVIDER).
    pub async fn handle(
        &self,
        sender: &PeerId,
        message: DhtMessage,
    ) -> Result<Option<DhtMessage>> {
        trace!("inbound {:?} from {sender}", message.msg_type);

        // Whoever talks to us is a routing candidate; refusals are not the
        // requester's problem.
        if let Err(err) = self.routing_table.try_add_peer(sender, false, true).await {
            trace!("inbound sender {sender} not admitted: {err}");
        }

        match message.msg_type {
            MessageType::PutValue => self.handle_put_value(sender, message).await.map(Some),
            MessageType::GetValue => self.handle_get_value(sender, message).await.map(Some),
            MessageType::AddProvider => {
                self.handle_add_provider(sender, message).await?;
                Ok(None)
            }
            MessageType::GetProviders => {
                self.handle_get_providers(sender, message).await.map(Some)
            }
            MessageType::FindNode => self.handle_find_node(sender, message).await.map(Some),
            MessageType::Ping => Ok(Some(DhtMessage::new(MessageType::Ping, message.key))),
        }
    }

    async fn handle_put_value(
        &self,
        sender: &PeerId,
        message: DhtMessage,
    ) -> Result<DhtMessage> {
        let record = message
            .record
            .clone()
            .ok_or_else(|| DhtError::Malformed("PUT_VALUE without a record".to_string()))?;
        if record.key != message.key {
            return Err(DhtError::Malformed(
                "record key does not match message key".to_string(),
            ));
        }

        self.validator.validate(&record.key, &record.value)?;

        // Never let an older record displace a strictly better one.
        if let Some(existing) = self.records.get(&record.key).await? {
            if existing.value != record.value {
                let candidates = vec![record.value.clone(), existing.value.clone()];
                if self.validator.select(&record.key, &candidates)? != 0 {
                    debug!("PUT_VALUE from {sender} loses to the stored record");
                    return Err(DhtError::BetterRecord);
                }
            }
        }

        let mut stored = record;
        stored.time_received = chrono::Utc::now().to_rfc3339();
        self.records.put(stored).await?;

        // The response echoes the request.
        Ok(message)
    }

    async fn handle_get_value(
        &self,
        sender: &PeerId,
        message: DhtMessage,
    ) -> Result<DhtMessage> {
        if message.key.is_empty() {
            return Err(DhtError::Malformed("GET_VALUE with empty key".to_string()));
        }

        let mut response = DhtMessage::new(MessageType::GetValue, message.key.clone());
        if let Some(record) = self.records.get(&message.key).await? {
            response = response.with_record(record);
        }
        Ok(response.with_closer_peers(self.closer_peers(&message.key, sender).await))
    }

    async fn handle_add_provider(&self, sender: &PeerId, message: DhtMessage) -> Result<()> {
        if message.key.is_empty() {
            return Err(DhtError::Malformed(
                "ADD_PROVIDER with empty key".to_string(),
            ));
        }

        for provider in &message.provider_peers {
            // Peers may only announce themselves.
            if provider.peer_id != *sender {
                debug!(
                    "ignoring ADD_PROVIDER entry for {} from {sender}",
                    provider.peer_id
                );
                continue;
            }
            self.providers
                .add_provider(&message.key, provider.peer_id.clone(), provider.addresses.clone())
                .await?;
        }
        Ok(())
    }

    async fn handle_get_providers(
        &self,
        sender: &PeerId,
        message: DhtMessage,
    ) -> Result<DhtMessage> {
        if message.key.is_empty() {
            return Err(DhtError::Malformed(
                "GET_PROVIDERS with empty key".to_string(),
            ));
        }

        let provider_peers = self
            .providers
            .get_providers(&message.key)
            .await?
            .into_iter()
            .map(|record| {
                let connection = if record.addresses.is_empty() {
                    ConnectionType::NotConnected
                } else {
                    ConnectionType::CanConnect
                };
                PeerInfo {
                    peer_id: record.peer_id,
                    addresses: record.addresses,
                    connection,
                }
            })
            .collect();

        Ok(
            DhtMessage::new(MessageType::GetProviders, message.key.clone())
                .with_provider_peers(provider_peers)
                .with_closer_peers(self.closer_peers(&message.key, sender).await),
        )
    }

    async fn handle_find_node(&self, sender: &PeerId, message: DhtMessage) -> Result<DhtMessage> {
        if message.key.is_empty() {
            return Err(DhtError::Malformed("FIND_NODE with empty key".to_string()));
        }
        Ok(DhtMessage::new(MessageType::FindNode, message.key.clone())
            .with_closer_peers(self.closer_peers(&message.key, sender).await))
    }

    /// The requester-visible closer peers for `key`: nearest table residents,
    /// minus the requester and ourselves, with live addresses attached.
    async fn closer_peers(&self, key: &[u8], sender: &PeerId) -> Vec<PeerInfo> {
        let target = KadId::from_bytes(key);
        let nearest = self
            .routing_table
            .nearest_peers(&target, self.config.bucket_size)
            .await;

        let mut peers = Vec::new();
        for peer_id in nearest {
            if peer_id == *sender || peer_id == self.local_peer {
                continue;
            }
            let addresses = self
                .address_book
                .addresses(&peer_id)
                .await
                .unwrap_or_default();
            let connection = if addresses.is_empty() {
                ConnectionType::NotConnected
            } else {
                ConnectionType::CanConnect
            };
            peers.push(PeerInfo {
                peer_id,
                addresses,
                connection,
            });
        }
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        host::MemoryAddressBook,
        provider_manager::ProviderManagerConfig,
        provider_store::MemoryProviderStore,
        record_store::MemoryRecordStore,
        routing_table::RoutingTableConfig,
        types::{PeerAddress, Record},
        validator::PublicKeyValidator,
    };
    use std::time::Duration;

    fn peer(id: u8) -> PeerId {
        PeerId::new(vec![id])
    }

    /// Prefers the longest candidate; stands in for a sequence-number check.
    struct LongestWins;
    impl Validator for LongestWins {
        fn validate(&self, _key: &[u8], value: &[u8]) -> Result<()> {
            if value.is_empty() {
                return Err(DhtError::Malformed("empty value".to_string()));
            }
            Ok(())
        }
        fn select(&self, _key: &[u8], values: &[Vec<u8>]) -> Result<usize> {
            if values.is_empty() {
                return Err(DhtError::NoValues);
            }
            let best = values
                .iter()
                .enumerate()
                .max_by_key(|(_, v)| v.len())
                .map(|(i, _)| i)
                .unwrap_or(0);
            Ok(best)
        }
    }

    struct Fixture {
        handler: MessageHandler,
        routing_table: Arc<RoutingTable>,
        book: Arc<MemoryAddressBook>,
    }

    fn fixture() -> Fixture {
        let local = peer(0);
        let config = DhtConfig::default();
        let book = Arc::new(MemoryAddressBook::new());
        let routing_table = Arc::new(RoutingTable::new(
            local.clone(),
            RoutingTableConfig::default(),
        ));
        let providers = Arc::new(ProviderManager::new(
            ProviderManagerConfig::default(),
            local.clone(),
            Arc::new(MemoryProviderStore::default()),
            book.clone(),
        ));
        let mut validator = NamespacedValidator::new();
        validator.insert("pk", Arc::new(PublicKeyValidator));
        validator.insert("ipns", Arc::new(LongestWins));

        let handler = MessageHandler::new(
            local,
            config,
            routing_table.clone(),
            providers,
            Arc::new(MemoryRecordStore::default()),
            Arc::new(validator),
            book.clone(),
        );
        Fixture {
            handler,
            routing_table,
            book,
        }
    }

    #[tokio::test]
    async fn ping_echoes_and_admits_the_sender() {
        let f = fixture();
        let response = f
            .handler
            .handle(&peer(1), DhtMessage::new(MessageType::Ping, Vec::new()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.msg_type, MessageType::Ping);
        assert!(f.routing_table.contains(&peer(1)).await);
    }

    #[tokio::test]
    async fn put_then_get_value_round_trips() {
        let f = fixture();
        let key = b"/ipns/name".to_vec();
        let record = Record::new(key.clone(), b"a value".to_vec());

        let put = DhtMessage::new(MessageType::PutValue, key.clone()).with_record(record);
        let echoed = f.handler.handle(&peer(1), put.clone()).await.unwrap().unwrap();
        assert_eq!(echoed, put);

        let get = DhtMessage::new(MessageType::GetValue, key.clone());
        let response = f.handler.handle(&peer(2), get).await.unwrap().unwrap();
        let stored = response.record.unwrap();
        assert_eq!(stored.value, b"a value".to_vec());
        assert!(!stored.time_received.is_empty());
    }

    #[tokio::test]
    async fn put_value_refuses_older_records() {
        let f = fixture();
        let key = b"/ipns/name".to_vec();

        let long = DhtMessage::new(MessageType::PutValue, key.clone())
            .with_record(Record::new(key.clone(), b"a longer value".to_vec()));
        f.handler.handle(&peer(1), long).await.unwrap();

        let short = DhtMessage::new(MessageType::PutValue, key.clone())
            .with_record(Record::new(key.clone(), b"short".to_vec()));
        assert_eq!(
            f.handler.handle(&peer(1), short).await,
            Err(DhtError::BetterRecord)
        );
    }

    #[tokio::test]
    async fn put_value_requires_record_and_matching_key() {
        let f = fixture();
        let bare = DhtMessage::new(MessageType::PutValue, b"/ipns/name".to_vec());
        assert!(matches!(
            f.handler.handle(&peer(1), bare).await,
            Err(DhtError::Malformed(_))
        ));

        let mismatched = DhtMessage::new(MessageType::PutValue, b"/ipns/name".to_vec())
            .with_record(Record::new(b"/ipns/other".to_vec(), b"v".to_vec()));
        assert!(matches!(
            f.handler.handle(&peer(1), mismatched).await,
            Err(DhtError::Malformed(_))
        ));

        let unknown_ns = DhtMessage::new(MessageType::PutValue, b"/other/name".to_vec())
            .with_record(Record::new(b"/other/name".to_vec(), b"v".to_vec()));
        assert!(matches!(
            f.handler.handle(&peer(1), unknown_ns).await,
            Err(DhtError::InvalidRecordType { .. })
        ));
    }

    #[tokio::test]
    async fn find_node_returns_closer_peers_without_sender() {
        let f = fixture();
        for id in 1u8..=5 {
            f.routing_table
                .try_add_peer(&peer(id), false, false)
                .await
                .unwrap();
            f.book
                .add_addresses(
                    &peer(id),
                    vec![PeerAddress::new("tcp", format!("10.0.0.{id}:4001"))],
                    Duration::from_secs(600),
                )
                .await;
        }

        let request = DhtMessage::new(MessageType::FindNode, peer(9).as_bytes().to_vec());
        let response = f.handler.handle(&peer(3), request).await.unwrap().unwrap();

        assert_eq!(response.msg_type, MessageType::FindNode);
        assert!(!response.closer_peers.is_empty());
        assert!(response
            .closer_peers
            .iter()
            .all(|p| p.peer_id != peer(3) && p.peer_id != peer(0)));
        assert!(response
            .closer_peers
            .iter()
            .all(|p| p.connection == ConnectionType::CanConnect));
    }

    #[tokio::test]
    async fn add_provider_only_accepts_the_sender_itself() {
        let f = fixture();
        let key = b"some-cid".to_vec();

        let announce = DhtMessage::new(MessageType::AddProvider, key.clone())
            .with_provider_peers(vec![
                PeerInfo::new(peer(1), vec![PeerAddress::new("tcp", "10.0.0.1:4001")]),
                PeerInfo::new(peer(2), vec![PeerAddress::new("tcp", "10.0.0.2:4001")]),
            ]);
        let response = f.handler.handle(&peer(1), announce).await.unwrap();
        assert!(response.is_none());

        let request = DhtMessage::new(MessageType::GetProviders, key);
        let response = f.handler.handle(&peer(3), request).await.unwrap().unwrap();
        let ids: Vec<PeerId> = response
            .provider_peers
            .iter()
            .map(|p| p.peer_id.clone())
            .collect();
        assert_eq!(ids, vec![peer(1)]);
    }

    #[tokio::test]
    async fn key_carrying_requests_reject_empty_keys() {
        let f = fixture();
        for msg_type in [
            MessageType::GetValue,
            MessageType::AddProvider,
            MessageType::GetProviders,
            MessageType::FindNode,
        ] {
            let request = DhtMessage::new(msg_type, Vec::new());
            assert!(
                matches!(
                    f.handler.handle(&peer(1), request).await,
                    Err(DhtError::Malformed(_))
                ),
                "{msg_type:?} accepted an empty key"
            );
        }
    }
}
