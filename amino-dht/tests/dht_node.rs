// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! End-to-end tests: several real nodes wired through an in-memory network
//! that pushes every message through the wire codec.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::Mutex;

use amino_dht::{
    AddressBook, Codec, Dht, DhtBuilder, DhtError, DhtMessage, MemoryAddressBook, MessageSender,
    NamespacedValidator, PeerAddress, PeerId, PublicKeyValidator, Result, Validator,
};

/// All nodes in the test universe, addressable by peer id.
#[derive(Default)]
struct Network {
    nodes: Mutex<HashMap<PeerId, Arc<Dht>>>,
}

/// Message sender that routes through the network registry, encoding and
/// decoding every message so the codec is exercised on each hop.
struct LoopbackSender {
    from: PeerId,
    network: Arc<Network>,
}

impl LoopbackSender {
    async fn deliver(&self, peer: &PeerId, message: DhtMessage) -> Result<Option<DhtMessage>> {
        let codec = Codec::default();
        let frame = codec.encode_framed(&message)?;
        let (request, _) = codec.decode_framed(&frame)?;

        let target = self
            .network
            .nodes
            .lock()
            .await
            .get(peer)
            .cloned()
            .ok_or_else(|| DhtError::Transport(format!("no route to {peer}")))?;
        match target.handle_message(&self.from, request).await? {
            Some(response) => {
                let frame = codec.encode_framed(&response)?;
                Ok(Some(codec.decode_framed(&frame)?.0))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl MessageSender for LoopbackSender {
    async fn send_request(&self, peer: &PeerId, message: DhtMessage) -> Result<DhtMessage> {
        self.deliver(peer, message)
            .await?
            .ok_or_else(|| DhtError::Transport("peer sent no response".to_string()))
    }

    async fn send_message(&self, peer: &PeerId, message: DhtMessage) -> Result<()> {
        self.deliver(peer, message).await.map(|_| ())
    }
}

/// Accepts everything; stands in for the externally-plugged IPNS validator.
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

fn amino_validator() -> NamespacedValidator {
    let mut validator = NamespacedValidator::new();
    validator.insert("pk", Arc::new(PublicKeyValidator));
    validator.insert("ipns", Arc::new(AcceptAll));
    validator
}

struct TestNode {
    dht: Arc<Dht>,
    book: Arc<MemoryAddressBook>,
    address: PeerAddress,
}

fn node_address(id: u8) -> PeerAddress {
    PeerAddress::new("tcp", format!("10.{id}.0.1:4001"))
}

async fn spawn_node(network: &Arc<Network>, id: u8) -> TestNode {
    let peer = PeerId::new(vec![id]);
    let book = Arc::new(MemoryAddressBook::new());
    let address = node_address(id);

    // Every node knows where it listens.
    book.add_addresses(&peer, vec![address.clone()], Duration::from_secs(3600))
        .await;

    let dht = Arc::new(
        DhtBuilder::new(
            peer.clone(),
            Arc::new(LoopbackSender {
                from: peer.clone(),
                network: network.clone(),
            }),
            book.clone(),
        )
        .with_validator(amino_validator())
        .build()
        .expect("node builds"),
    );
    network.nodes.lock().await.insert(peer, dht.clone());
    TestNode { dht, book, address }
}

/// Teach `node` about `other` and admit it into the routing table.
async fn introduce(node: &TestNode, other: &TestNode) {
    node.book
        .add_addresses(
            other.dht.local_peer(),
            vec![other.address.clone()],
            Duration::from_secs(3600),
        )
        .await;
    node.dht
        .routing_table()
        .try_add_peer(other.dht.local_peer(), false, false)
        .await
        .expect("admission");
}

#[tokio::test]
async fn ping_round_trips_through_the_codec() {
    let network = Arc::new(Network::default());
    let a = spawn_node(&network, 1).await;
    let b = spawn_node(&network, 2).await;

    a.dht.ping(b.dht.local_peer()).await.expect("ping");
}

#[tokio::test]
async fn find_node_traverses_referral_chains() {
    let network = Arc::new(Network::default());
    let a = spawn_node(&network, 1).await;
    let b = spawn_node(&network, 2).await;
    let c = spawn_node(&network, 3).await;

    // A knows only B; B knows C.
    introduce(&a, &b).await;
    introduce(&b, &c).await;

    let found = a.dht.find_node(c.dht.local_peer()).await.expect("lookup");
    assert!(found.contains(c.dht.local_peer()));
    // The chain taught A about C.
    assert!(a.dht.routing_table().contains(c.dht.local_peer()).await);
}

#[tokio::test]
async fn put_value_replicates_and_get_value_fetches_remotely() {
    let network = Arc::new(Network::default());
    let a = spawn_node(&network, 1).await;
    let b = spawn_node(&network, 2).await;
    let c = spawn_node(&network, 3).await;
    let d = spawn_node(&network, 4).await;

    introduce(&a, &b).await;
    introduce(&b, &c).await;
    introduce(&c, &b).await;
    introduce(&d, &b).await;

    let key = b"/ipns/example".to_vec();
    a.dht
        .put_value(&key, b"published value".to_vec())
        .await
        .expect("put");

    // D holds nothing locally; the value must come over the network.
    let record = d.dht.get_value(&key).await.expect("get");
    assert_eq!(record.value, b"published value".to_vec());

    // A missing key surfaces NotFound after exhaustion.
    assert_eq!(
        d.dht.get_value(b"/ipns/missing").await,
        Err(DhtError::NotFound)
    );
}

#[tokio::test]
async fn provide_and_find_providers_across_nodes() {
    let network = Arc::new(Network::default());
    let a = spawn_node(&network, 1).await;
    let b = spawn_node(&network, 2).await;
    let d = spawn_node(&network, 4).await;

    introduce(&a, &b).await;
    introduce(&d, &b).await;

    let key = b"bafy-something".to_vec();
    a.dht.provide(&key).await.expect("provide");

    let mut stream = d.dht.find_providers(&key, 1).await;
    let first = stream.recv().await.expect("a provider");
    assert_eq!(&first.peer_id, a.dht.local_peer());
    assert_eq!(first.addresses, vec![a.address.clone()]);

    // The stream terminates with the lookup.
    assert!(stream.recv().await.is_none());
}

#[tokio::test]
async fn inbound_traffic_populates_routing_tables() {
    let network = Arc::new(Network::default());
    let a = spawn_node(&network, 1).await;
    let b = spawn_node(&network, 2).await;

    introduce(&a, &b).await;
    // B has never heard of A; A's ping makes B try to admit it, but B has no
    // addresses for A, so the diversity filter refuses.
    a.dht.ping(b.dht.local_peer()).await.expect("ping");
    assert!(!b.dht.routing_table().contains(a.dht.local_peer()).await);

    // Once B can resolve A's addresses, inbound traffic admits A.
    b.book
        .add_addresses(
            a.dht.local_peer(),
            vec![node_address(1)],
            Duration::from_secs(3600),
        )
        .await;
    a.dht.ping(b.dht.local_peer()).await.expect("ping");
    assert!(b.dht.routing_table().contains(a.dht.local_peer()).await);
}
