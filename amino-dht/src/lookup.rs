// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The iterative lookup engine.
//!
//! One lookup runs alpha queries per round against the unqueried peers
//! closest to the target, waits for the whole round to settle, folds the
//! responses into its peer set, and asks the caller's stop function whether
//! to finish. Progress is observable through a broadcast event stream which
//! carries exactly one terminal event per run.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::future::{join_all, BoxFuture};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::{
    error::{DhtError, Result},
    keyspace::{Distance, KadId},
    types::{PeerId, PeerInfo},
};

/// Where a peer stands within one lookup.
///
/// The only legal chain is `Heard → Waiting → (Queried | Unreachable)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerState {
    /// Referred to us, not yet queried.
    Heard,
    /// A query to the peer is in flight.
    Waiting,
    /// The peer answered.
    Queried,
    /// The query failed.
    Unreachable,
}

/// One entry of the query peer set.
#[derive(Clone, Debug)]
pub struct QueryPeer {
    /// The peer.
    pub peer_id: PeerId,
    /// Its distance to the lookup target.
    pub distance: Distance,
    /// Current state within this lookup.
    pub state: PeerState,
    /// Who told us about the peer. Immutable; seed peers refer themselves.
    pub referred_by: PeerId,
}

/// The set of peers a lookup has heard of, ordered by distance to the target.
///
/// Sorting is deferred until [`QueryPeerSet::closest_n_in_states`] asks for
/// it, then cached until an insertion invalidates the order.
pub struct QueryPeerSet {
    target: KadId,
    peers: HashMap<PeerId, QueryPeer>,
    sorted: Option<Vec<PeerId>>,
}

impl QueryPeerSet {
    /// An empty set aimed at `target`.
    pub fn new(target: KadId) -> Self {
        Self {
            target,
            peers: HashMap::new(),
            sorted: None,
        }
    }

    /// Add a peer in state `Heard`. Returns false (and changes nothing) if
    /// the peer is already present.
    pub fn try_add(&mut self, peer_id: PeerId, referred_by: PeerId) -> bool {
        if self.peers.contains_key(&peer_id) {
            return false;
        }
        let distance = KadId::from_peer_id(&peer_id).distance(&self.target);
        self.peers.insert(
            peer_id.clone(),
            QueryPeer {
                peer_id,
                distance,
                state: PeerState::Heard,
                referred_by,
            },
        );
        self.sorted = None;
        true
    }

    /// Move a peer to `state`. Fails with [`DhtError::NotFound`] if the peer
    /// was never added.
    pub fn set_state(&mut self, peer_id: &PeerId, state: PeerState) -> Result<()> {
        let peer = self.peers.get_mut(peer_id).ok_or(DhtError::NotFound)?;
        peer.state = state;
        Ok(())
    }

    /// A peer's current state.
    pub fn get_state(&self, peer_id: &PeerId) -> Result<PeerState> {
        self.peers
            .get(peer_id)
            .map(|p| p.state)
            .ok_or(DhtError::NotFound)
    }

    /// Who referred a peer.
    pub fn get_referrer(&self, peer_id: &PeerId) -> Result<PeerId> {
        self.peers
            .get(peer_id)
            .map(|p| p.referred_by.clone())
            .ok_or(DhtError::NotFound)
    }

    /// Up to `n` peers in one of `states`, nearest to the target first.
    pub fn closest_n_in_states(&mut self, n: usize, states: &[PeerState]) -> Vec<PeerId> {
        if self.sorted.is_none() {
            let mut order: Vec<(Distance, PeerId)> = self
                .peers
                .values()
                .map(|p| (p.distance, p.peer_id.clone()))
                .collect();
            order.sort_by(|(a, _), (b, _)| a.cmp(b));
            self.sorted = Some(order.into_iter().map(|(_, p)| p).collect());
        }
        let Some(order) = &self.sorted else {
            return Vec::new();
        };
        order
            .iter()
            .filter(|peer| {
                self.peers
                    .get(*peer)
                    .map(|p| states.contains(&p.state))
                    .unwrap_or(false)
            })
            .take(n)
            .cloned()
            .collect()
    }

    /// How many peers sit in one of `states`.
    pub fn count_in_states(&self, states: &[PeerState]) -> usize {
        self.peers
            .values()
            .filter(|p| states.contains(&p.state))
            .count()
    }

    /// Snapshot of every entry, unordered.
    pub fn peers(&self) -> Vec<QueryPeer> {
        self.peers.values().cloned().collect()
    }

    /// Number of peers known to this lookup.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// True when no peer has been added.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Why a lookup finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminationReason {
    /// The stop function said so.
    Success,
    /// The wall-clock cap elapsed.
    Timeout,
    /// [`Lookup::cancel`] was called.
    Cancelled,
    /// No `Heard` peers remained.
    NoMorePeers,
}

impl TerminationReason {
    /// The error this reason maps to, for callers that need their lookup to
    /// have succeeded. `Success` maps to none.
    pub fn to_error(self) -> Option<DhtError> {
        match self {
            TerminationReason::Success => None,
            TerminationReason::Timeout => Some(DhtError::Timeout),
            TerminationReason::Cancelled => Some(DhtError::Cancelled),
            TerminationReason::NoMorePeers => Some(DhtError::NoMorePeers),
        }
    }
}

/// Events emitted while a lookup runs.
#[derive(Clone, Debug)]
pub enum LookupEvent {
    /// A peer answered; `new_peers` are the referrals not seen before.
    PeerQueried {
        /// The peer that answered.
        peer: PeerId,
        /// Previously unknown peers it referred.
        new_peers: Vec<PeerId>,
    },
    /// A query failed; the peer is now `Unreachable`.
    PeerQueryFailed {
        /// The peer that failed.
        peer: PeerId,
        /// What went wrong.
        error: DhtError,
    },
    /// The lookup finished. Emitted exactly once per run.
    QueryTerminated {
        /// Why it finished.
        reason: TerminationReason,
    },
}

/// Lookup tuning knobs.
#[derive(Clone, Copy, Debug)]
pub struct LookupConfig {
    /// Queries in flight per round.
    pub alpha: usize,
    /// Wall-clock cap for the whole run.
    pub timeout: Duration,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            alpha: 3,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Queries one peer, returning the address infos it refers us to. Supplied by
/// the caller; responsible for its own per-peer timeout.
pub type QueryFn =
    Arc<dyn Fn(PeerId) -> BoxFuture<'static, Result<Vec<PeerInfo>>> + Send + Sync>;

/// Decides after each round whether the lookup is done.
pub type StopFn = Arc<dyn Fn(&QueryPeerSet) -> bool + Send + Sync>;

/// The outcome of one lookup run.
#[derive(Clone, Debug)]
pub struct LookupResult {
    /// Why the run finished.
    pub reason: TerminationReason,
    /// The final peer set, unordered.
    pub peers: Vec<QueryPeer>,
}

impl LookupResult {
    /// The `n` peers in one of `states` nearest the target.
    pub fn closest_in_states(&self, n: usize, states: &[PeerState]) -> Vec<PeerId> {
        let mut hits: Vec<(Distance, PeerId)> = self
            .peers
            .iter()
            .filter(|p| states.contains(&p.state))
            .map(|p| (p.distance, p.peer_id.clone()))
            .collect();
        hits.sort_by(|(a, _), (b, _)| a.cmp(b));
        hits.into_iter().take(n).map(|(_, peer)| peer).collect()
    }
}

/// A re-runnable lookup over one target key.
pub struct Lookup {
    target: KadId,
    config: LookupConfig,
    query_fn: QueryFn,
    stop_fn: StopFn,
    running: AtomicBool,
    cancelled: AtomicBool,
    events: broadcast::Sender<LookupEvent>,
}

impl Lookup {
    /// Build a lookup aimed at `target`.
    pub fn new(target: KadId, config: LookupConfig, query_fn: QueryFn, stop_fn: StopFn) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            target,
            config,
            query_fn,
            stop_fn,
            running: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            events,
        }
    }

    /// The lookup target.
    pub fn target(&self) -> &KadId {
        &self.target
    }

    /// Subscribe to the event stream. The channel closes when the lookup is
    /// dropped.
    pub fn subscribe(&self) -> broadcast::Receiver<LookupEvent> {
        self.events.subscribe()
    }

    /// Cancel the lookup. Idempotent. A running lookup completes with
    /// `Cancelled`; an idle one is marked cancelled for its next run.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Run the lookup from `seed` until a terminal reason is reached.
    ///
    /// Always completes with a [`LookupResult`]; the only error is
    /// [`DhtError::AlreadyRunning`] when a run is in progress.
    pub async fn run(&self, seed: Vec<PeerId>) -> Result<LookupResult> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(DhtError::AlreadyRunning);
        }

        let mut peer_set = QueryPeerSet::new(self.target);
        for peer in seed {
            peer_set.try_add(peer.clone(), peer);
        }

        let reason = match tokio::time::timeout(
            self.config.timeout,
            self.round_loop(&mut peer_set),
        )
        .await
        {
            Ok(reason) => reason,
            Err(_) => TerminationReason::Timeout,
        };
        debug!("lookup finished: {reason:?}, {} peers known", peer_set.len());

        let _ = self.events.send(LookupEvent::QueryTerminated { reason });
        self.running.store(false, Ordering::SeqCst);

        Ok(LookupResult {
            reason,
            peers: peer_set.peers(),
        })
    }

    async fn round_loop(&self, peer_set: &mut QueryPeerSet) -> TerminationReason {
        loop {
            if self.cancelled.swap(false, Ordering::SeqCst) {
                return TerminationReason::Cancelled;
            }

            let batch = peer_set.closest_n_in_states(self.config.alpha, &[PeerState::Heard]);
            if batch.is_empty() {
                return TerminationReason::NoMorePeers;
            }
            for peer in &batch {
                let _ = peer_set.set_state(peer, PeerState::Waiting);
            }
            trace!("lookup round: querying {} peers", batch.len());

            let queries = batch.into_iter().map(|peer| {
                let query = Arc::clone(&self.query_fn);
                async move {
                    let outcome = query(peer.clone()).await;
                    (peer, outcome)
                }
            });
            // The round settles as a whole; there is no early exit.
            let settled = join_all(queries).await;

            if self.cancelled.swap(false, Ordering::SeqCst) {
                // Transitions are skipped once cancelled.
                return TerminationReason::Cancelled;
            }

            for (peer, outcome) in settled {
                match outcome {
                    Ok(referrals) => {
                        let _ = peer_set.set_state(&peer, PeerState::Queried);
                        let mut new_peers = Vec::new();
                        for info in referrals {
                            if peer_set.try_add(info.peer_id.clone(), peer.clone()) {
                                new_peers.push(info.peer_id);
                            }
                        }
                        let _ = self.events.send(LookupEvent::PeerQueried { peer, new_peers });
                    }
                    Err(error) => {
                        let _ = peer_set.set_state(&peer, PeerState::Unreachable);
                        let _ = self
                            .events
                            .send(LookupEvent::PeerQueryFailed { peer, error });
                    }
                }
            }

            if (self.stop_fn)(peer_set) {
                return TerminationReason::Success;
            }
        }
    }
}
