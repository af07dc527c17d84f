// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The DHT node facade.
//!
//! [`Dht`] owns the routing table, provider manager, record store, validator
//! set, and the host capabilities, and exposes the content-routing operations
//! on top of the lookup engine. Bootstrap orchestration and refresh
//! scheduling stay outside; the refresh-tracking state lives on the routing
//! table for an external scheduler to drive.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Instant,
};

use futures::{future::join_all, FutureExt};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::{
    config::DhtConfig,
    diversity::{DiversityConfig, DiversityFilter},
    error::{DhtError, Result},
    handlers::MessageHandler,
    host::{AddressBook, AsnResolver, LatencyEstimator, MessageSender, NoAsnResolver, NoLatencyEstimator},
    keyspace::KadId,
    lookup::{Lookup, LookupConfig, PeerState, QueryFn, QueryPeerSet, StopFn},
    protocol::{DhtMessage, MessageType},
    provider_manager::{ProviderManager, ProviderManagerConfig},
    provider_store::{MemoryProviderStore, ProviderStore, ProviderStoreConfig},
    record_store::{MemoryRecordStore, RecordStore, RecordStoreConfig},
    routing_table::{RoutingTable, RoutingTableConfig},
    types::{ConnectionType, PeerId, PeerInfo, ProviderRecord, Record},
    validator::{NamespacedValidator, Validator},
};

/// Builder for a [`Dht`] node.
pub struct DhtBuilder {
    config: DhtConfig,
    local_peer: PeerId,
    sender: Arc<dyn MessageSender>,
    address_book: Arc<dyn AddressBook>,
    validator: NamespacedValidator,
    latency: Arc<dyn LatencyEstimator>,
    asn: Arc<dyn AsnResolver>,
    provider_store: Option<Arc<dyn ProviderStore>>,
    record_store: Option<Arc<dyn RecordStore>>,
}

impl DhtBuilder {
    /// Start a builder from the capabilities every node needs.
    pub fn new(
        local_peer: PeerId,
        sender: Arc<dyn MessageSender>,
        address_book: Arc<dyn AddressBook>,
    ) -> Self {
        Self {
            config: DhtConfig::default(),
            local_peer,
            sender,
            address_book,
            validator: NamespacedValidator::new(),
            latency: Arc::new(NoLatencyEstimator),
            asn: Arc::new(NoAsnResolver),
            provider_store: None,
            record_store: None,
        }
    }

    /// Replace the default configuration.
    pub fn with_config(mut self, config: DhtConfig) -> Self {
        self.config = config;
        self
    }

    /// Install the validator set.
    pub fn with_validator(mut self, validator: NamespacedValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Attach the host's latency oracle.
    pub fn with_latency_estimator(mut self, latency: Arc<dyn LatencyEstimator>) -> Self {
        self.latency = latency;
        self
    }

    /// Attach an ASN resolver for IPv6 diversity grouping.
    pub fn with_asn_resolver(mut self, asn: Arc<dyn AsnResolver>) -> Self {
        self.asn = asn;
        self
    }

    /// Use a custom provider store instead of the in-memory default.
    pub fn with_provider_store(mut self, store: Arc<dyn ProviderStore>) -> Self {
        self.provider_store = Some(store);
        self
    }

    /// Use a custom record store instead of the in-memory default.
    pub fn with_record_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.record_store = Some(store);
        self
    }

    /// Validate the configuration and assemble the node.
    pub fn build(self) -> Result<Dht> {
        self.config.validate(&self.validator)?;
        let config = self.config;
        let validator = Arc::new(self.validator);

        let diversity = Arc::new(DiversityFilter::new(
            DiversityConfig {
                max_per_cpl: config.max_peers_per_ip_group_per_cpl,
                max_for_table: config.max_peers_per_ip_group,
            },
            self.address_book.clone(),
            self.asn,
        ));
        let routing_table = Arc::new(
            RoutingTable::new(
                self.local_peer.clone(),
                RoutingTableConfig {
                    bucket_size: config.bucket_size,
                    max_latency: config.max_latency,
                    max_refresh_cpl: config.max_refresh_cpl,
                },
            )
            .with_latency_estimator(self.latency)
            .with_diversity_filter(diversity),
        );

        let provider_store = self.provider_store.unwrap_or_else(|| {
            Arc::new(MemoryProviderStore::new(ProviderStoreConfig {
                provide_validity: config.provider_validity,
            }))
        });
        let providers = Arc::new(ProviderManager::new(
            ProviderManagerConfig {
                cache_size: config.provider_cache_size,
                provider_address_ttl: config.provider_address_ttl,
                provide_validity: config.provider_validity,
                ..ProviderManagerConfig::default()
            },
            self.local_peer.clone(),
            provider_store,
            self.address_book.clone(),
        ));
        let records = self.record_store.unwrap_or_else(|| {
            Arc::new(MemoryRecordStore::new(RecordStoreConfig {
                max_records: 1024,
                record_ttl: config.record_ttl,
            }))
        });

        let handler = MessageHandler::new(
            self.local_peer.clone(),
            config.clone(),
            routing_table.clone(),
            providers.clone(),
            records.clone(),
            validator.clone(),
            self.address_book.clone(),
        );

        info!("dht node up as {}", self.local_peer);
        Ok(Dht {
            config,
            local_peer: self.local_peer,
            routing_table,
            providers,
            records,
            validator,
            sender: self.sender,
            address_book: self.address_book,
            handler,
        })
    }
}

/// An Amino DHT node.
pub struct Dht {
    config: DhtConfig,
    local_peer: PeerId,
    routing_table: Arc<RoutingTable>,
    providers: Arc<ProviderManager>,
    records: Arc<dyn RecordStore>,
    validator: Arc<NamespacedValidator>,
    sender: Arc<dyn MessageSender>,
    address_book: Arc<dyn AddressBook>,
    handler: MessageHandler,
}

impl Dht {
    /// The local peer id.
    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    /// The node's routing table; an external scheduler drives bucket
    /// refreshes through it.
    pub fn routing_table(&self) -> &Arc<RoutingTable> {
        &self.routing_table
    }

    /// The node's configuration.
    pub fn config(&self) -> &DhtConfig {
        &self.config
    }

    /// Handle one decoded inbound message. The caller owns the stream;
    /// a decode failure should terminate that stream, not the node.
    pub async fn handle_message(
        &self,
        sender: &PeerId,
        message: DhtMessage,
    ) -> Result<Option<DhtMessage>> {
        self.handler.handle(sender, message).await
    }

    /// Locate the peers nearest `target`, starting from the local table.
    /// Stops early once the target itself has been heard of.
    pub async fn find_node(&self, target: &PeerId) -> Result<Vec<PeerId>> {
        let target_key = KadId::from_peer_id(target);
        let seed = self
            .routing_table
            .nearest_peers(&target_key, self.config.bucket_size)
            .await;

        let wanted = target.clone();
        let stop: StopFn = Arc::new(move |set: &QueryPeerSet| set.get_state(&wanted).is_ok());
        let lookup = Lookup::new(
            target_key,
            self.lookup_config(),
            self.query_fn(MessageType::FindNode, target.as_bytes().to_vec(), None),
            stop,
        );

        let outcome = lookup.run(seed).await?;
        debug!("find_node({target}) finished: {:?}", outcome.reason);

        Ok(outcome.closest_in_states(
            self.config.bucket_size,
            &[PeerState::Queried, PeerState::Heard],
        ))
    }

    /// Fetch and validate the record under `key`.
    ///
    /// Collects candidates from the network (and the local store), stopping
    /// once `resiliency` validated records have been seen, and returns the
    /// validator's pick. [`DhtError::NotFound`] after exhaustion without one.
    pub async fn get_value(&self, key: &[u8]) -> Result<Record> {
        let target = KadId::from_bytes(key);
        let seed = self
            .routing_table
            .nearest_peers(&target, self.config.bucket_size)
            .await;

        let (found_tx, mut found_rx) = mpsc::unbounded_channel::<Record>();
        let found_count = Arc::new(AtomicUsize::new(0));

        let observe = {
            let validator = self.validator.clone();
            let key = key.to_vec();
            let found_count = found_count.clone();
            Arc::new(move |_peer: &PeerId, response: &DhtMessage| {
                if let Some(record) = &response.record {
                    if record.key == key && validator.validate(&key, &record.value).is_ok() {
                        found_count.fetch_add(1, Ordering::SeqCst);
                        let _ = found_tx.send(record.clone());
                    }
                }
            }) as ObserveFn
        };

        let resiliency = self.config.resiliency;
        let stop: StopFn = {
            let found_count = found_count.clone();
            Arc::new(move |_: &QueryPeerSet| found_count.load(Ordering::SeqCst) >= resiliency)
        };

        let lookup = Lookup::new(
            target,
            self.lookup_config(),
            self.query_fn(MessageType::GetValue, key.to_vec(), Some(observe)),
            stop,
        );
        let outcome = lookup.run(seed).await?;
        debug!("get_value finished: {:?}", outcome.reason);

        let mut candidates = Vec::new();
        while let Ok(record) = found_rx.try_recv() {
            candidates.push(record);
        }
        if let Some(local) = self.records.get(key).await? {
            if self.validator.validate(key, &local.value).is_ok() {
                candidates.push(local);
            }
        }
        if candidates.is_empty() {
            return Err(DhtError::NotFound);
        }

        let values: Vec<Vec<u8>> = candidates.iter().map(|r| r.value.clone()).collect();
        let best = self.validator.select(key, &values)?;
        Ok(candidates.swap_remove(best))
    }

    /// Validate, store locally, and replicate a record to the peers nearest
    /// its key. Fails with [`DhtError::BetterRecord`] when the local store
    /// already holds a strictly better record.
    pub async fn put_value(&self, key: &[u8], value: Vec<u8>) -> Result<()> {
        self.validator.validate(key, &value)?;

        if let Some(existing) = self.records.get(key).await? {
            if existing.value != value {
                let candidates = vec![value.clone(), existing.value.clone()];
                if self.validator.select(key, &candidates)? != 0 {
                    return Err(DhtError::BetterRecord);
                }
            }
        }

        let mut record = Record::new(key.to_vec(), value);
        record.time_received = chrono::Utc::now().to_rfc3339();
        self.records.put(record.clone()).await?;

        let closest = self.closest_queried_peers(key).await?;
        if closest.is_empty() {
            // A lone node stores locally and is done.
            return Ok(());
        }

        let message = DhtMessage::new(MessageType::PutValue, key.to_vec()).with_record(record);
        let sends = closest.iter().map(|peer| {
            let message = message.clone();
            async move { self.request_with_timeout(peer, message).await }
        });
        let outcomes = join_all(sends).await;
        let stored = outcomes.iter().filter(|r| r.is_ok()).count();
        debug!("put_value replicated to {stored}/{} peers", closest.len());

        if stored == 0 {
            return Err(DhtError::Transport(
                "failed to store the record with any peer".to_string(),
            ));
        }
        Ok(())
    }

    /// Announce that this node provides the content under `key`.
    pub async fn provide(&self, key: &[u8]) -> Result<()> {
        let own_addresses = self
            .address_book
            .addresses(&self.local_peer)
            .await
            .unwrap_or_default();
        self.providers
            .add_provider(key, self.local_peer.clone(), own_addresses.clone())
            .await?;

        let closest = self.closest_queried_peers(key).await?;
        let announce = DhtMessage::new(MessageType::AddProvider, key.to_vec())
            .with_provider_peers(vec![PeerInfo {
                peer_id: self.local_peer.clone(),
                addresses: own_addresses,
                connection: ConnectionType::Connected,
            }]);

        let sends = closest.iter().map(|peer| {
            let announce = announce.clone();
            async move {
                let sent = tokio::time::timeout(
                    self.config.network_timeout,
                    self.sender.send_message(peer, announce),
                )
                .await;
                if !matches!(sent, Ok(Ok(()))) {
                    warn!("provider announce to {peer} failed");
                }
            }
        });
        join_all(sends).await;
        Ok(())
    }

    /// Discover providers for `key`, streamed as they surface. The stream
    /// terminates when the underlying lookup terminates; `count > 0` stops
    /// the search once that many distinct providers have been found.
    pub async fn find_providers(
        &self,
        key: &[u8],
        count: usize,
    ) -> mpsc::UnboundedReceiver<ProviderRecord> {
        let (tx, rx) = mpsc::unbounded_channel::<ProviderRecord>();

        let target = KadId::from_bytes(key);
        let seed = self
            .routing_table
            .nearest_peers(&target, self.config.bucket_size)
            .await;

        let seen: Arc<StdMutex<HashSet<PeerId>>> = Arc::new(StdMutex::new(HashSet::new()));
        let found_count = Arc::new(AtomicUsize::new(0));
        let provide_validity = self.config.provider_validity;

        let observe = {
            let tx = tx.clone();
            let seen = seen.clone();
            let found_count = found_count.clone();
            Arc::new(move |_peer: &PeerId, response: &DhtMessage| {
                for provider in &response.provider_peers {
                    let fresh = seen
                        .lock()
                        .map(|mut seen| seen.insert(provider.peer_id.clone()))
                        .unwrap_or(false);
                    if !fresh {
                        continue;
                    }
                    found_count.fetch_add(1, Ordering::SeqCst);
                    let _ = tx.send(ProviderRecord {
                        peer_id: provider.peer_id.clone(),
                        addresses: provider.addresses.clone(),
                        expires_at: Instant::now() + provide_validity,
                    });
                }
            }) as ObserveFn
        };

        let stop: StopFn = {
            let found_count = found_count.clone();
            Arc::new(move |_: &QueryPeerSet| {
                count > 0 && found_count.load(Ordering::SeqCst) >= count
            })
        };
        let lookup = Lookup::new(
            target,
            self.lookup_config(),
            self.query_fn(MessageType::GetProviders, key.to_vec(), Some(observe)),
            stop,
        );

        // Locally known providers surface first, then the lookup runs to
        // termination; dropping `tx` ends the stream.
        let providers = self.providers.clone();
        let key = key.to_vec();
        tokio::spawn(async move {
            if let Ok(local) = providers.get_providers(&key).await {
                for record in local {
                    let fresh = seen
                        .lock()
                        .map(|mut seen| seen.insert(record.peer_id.clone()))
                        .unwrap_or(false);
                    if fresh {
                        found_count.fetch_add(1, Ordering::SeqCst);
                        let _ = tx.send(record);
                    }
                }
            }
            if count > 0 && found_count.load(Ordering::SeqCst) >= count {
                return;
            }
            match lookup.run(seed).await {
                Ok(outcome) => trace!("find_providers finished: {:?}", outcome.reason),
                Err(err) => warn!("find_providers lookup refused: {err}"),
            }
        });

        rx
    }

    /// Liveness-check a peer; the response must echo the PING type.
    pub async fn ping(&self, peer: &PeerId) -> Result<()> {
        let response = self
            .request_with_timeout(peer, DhtMessage::new(MessageType::Ping, Vec::new()))
            .await?;
        if response.msg_type != MessageType::Ping {
            return Err(DhtError::Malformed(
                "unexpected response type to PING".to_string(),
            ));
        }
        self.routing_table
            .update_last_successful_outbound_query(peer, Instant::now())
            .await;
        Ok(())
    }

    /// Shut down the provider manager. The routing table and record store
    /// hold no background work.
    pub async fn close(&self) -> Result<()> {
        self.providers.close().await
    }

    fn lookup_config(&self) -> LookupConfig {
        LookupConfig {
            alpha: self.config.concurrency,
            timeout: self.config.lookup_timeout,
        }
    }

    async fn request_with_timeout(&self, peer: &PeerId, message: DhtMessage) -> Result<DhtMessage> {
        tokio::time::timeout(
            self.config.network_timeout,
            self.sender.send_request(peer, message),
        )
        .await
        .map_err(|_| DhtError::Timeout)?
    }

    /// Run a FIND_NODE-style lookup over `key` to exhaustion and return the
    /// nearest peers that actually answered.
    async fn closest_queried_peers(&self, key: &[u8]) -> Result<Vec<PeerId>> {
        let target = KadId::from_bytes(key);
        let seed = self
            .routing_table
            .nearest_peers(&target, self.config.bucket_size)
            .await;

        let stop: StopFn = Arc::new(|_: &QueryPeerSet| false);
        let lookup = Lookup::new(
            target,
            self.lookup_config(),
            self.query_fn(MessageType::FindNode, key.to_vec(), None),
            stop,
        );
        let outcome = lookup.run(seed).await?;
        Ok(outcome.closest_in_states(self.config.bucket_size, &[PeerState::Queried]))
    }

    /// Build the per-peer query function for a lookup: one outbound request,
    /// fold the referrals into the address book and the routing table, then
    /// hand the response to `observe`.
    fn query_fn(
        &self,
        msg_type: MessageType,
        key: Vec<u8>,
        observe: Option<ObserveFn>,
    ) -> QueryFn {
        let sender = self.sender.clone();
        let routing_table = self.routing_table.clone();
        let address_book = self.address_book.clone();
        let local_peer = self.local_peer.clone();
        let network_timeout = self.config.network_timeout;
        let address_ttl = self.config.provider_address_ttl;

        Arc::new(move |peer: PeerId| {
            let sender = sender.clone();
            let routing_table = routing_table.clone();
            let address_book = address_book.clone();
            let local_peer = local_peer.clone();
            let observe = observe.clone();
            let message = DhtMessage::new(msg_type, key.clone());

            async move {
                let response =
                    tokio::time::timeout(network_timeout, sender.send_request(&peer, message))
                        .await
                        .map_err(|_| DhtError::Timeout)??;

                // The peer answered: it earned its table slot.
                routing_table
                    .update_last_successful_outbound_query(&peer, Instant::now())
                    .await;
                if let Err(err) = routing_table.try_add_peer(&peer, true, false).await {
                    trace!("responding peer {peer} not admitted: {err}");
                }

                let mut referrals = Vec::new();
                for info in response
                    .closer_peers
                    .iter()
                    .chain(response.provider_peers.iter())
                {
                    if info.peer_id == local_peer || info.addresses.is_empty() {
                        continue;
                    }
                    address_book
                        .add_addresses(&info.peer_id, info.addresses.clone(), address_ttl)
                        .await;
                }
                for info in &response.closer_peers {
                    if info.peer_id == local_peer {
                        continue;
                    }
                    if let Err(err) = routing_table.try_add_peer(&info.peer_id, false, true).await
                    {
                        trace!("referred peer {} not admitted: {err}", info.peer_id);
                    }
                    referrals.push(info.clone());
                }

                if let Some(observe) = &observe {
                    observe(&peer, &response);
                }
                Ok(referrals)
            }
            .boxed()
        })
    }
}

/// Per-response hook used by the value and provider lookups.
type ObserveFn = Arc<dyn Fn(&PeerId, &DhtMessage) + Send + Sync>;
