// Cross-component scenarios: two reactors wired back to back, echo
// suppression, and resend after expiry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use libp2p_identity::PeerId;
use tokio::sync::mpsc;

use crate::config::PoolConfig;
use crate::events::EventBus;
use crate::pool::Pool;
use crate::reactor::{Envelope, PeerHandle, Reactor, WireVote};
use crate::testutil::{bls_key, event_hash, make_validator, signed_vote, test_config};
use crate::verifier::Validator;
use crate::vote::EventType;

const EVENT_HASH_A: &str = "eefacfed87736ae1d8e8640f6fd7951862997782e5e79842557923e2779d5d5a";
const EVENT_HASH_B: &str = "7e19be15d0d524a1ca5e39be503d18584c23426920bdc23b159c37a2341913d0";

struct Node {
    id: PeerId,
    pool: Pool,
    reactor: Reactor,
}

fn make_node(validators: &[Validator], config: PoolConfig) -> Node {
    let bus = EventBus::new(config.subscribe_capacity);
    let pool = Pool::new(validators, bus.clone(), config.clone());
    let reactor = Reactor::new(pool.clone(), bus, config);
    assert!(reactor.start());
    Node {
        id: PeerId::random(),
        pool,
        reactor,
    }
}

/// Connects `from`'s reactor to `to`'s: envelopes broadcast by `from` are
/// pumped into `to.receive`, counting each forwarded envelope.
fn connect(from: &Node, to: &Node) -> Arc<AtomicUsize> {
    let (tx, mut rx) = mpsc::channel::<Envelope>(64);
    from.reactor.add_peer(PeerHandle {
        id: to.id,
        sender: tx,
    });

    let forwarded = Arc::new(AtomicUsize::new(0));
    let counter = forwarded.clone();
    let receiver = to.reactor.clone();
    let src = from.id;
    tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let bytes = envelope.to_bytes().expect("encodable envelope");
            receiver.receive(&src, &bytes).expect("well-formed envelope");
        }
    });
    forwarded
}

async fn wait_until<F: Fn() -> bool>(condition: F, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn votes_gossip_between_nodes_without_echo() {
    let key = bls_key();
    let validators = vec![make_validator(&key, 10)];
    let mut config = test_config();
    // Long windows so nothing expires mid-test.
    config.keep_alive = Duration::from_secs(30);
    config.peer_cache_timeout = Duration::from_secs(3);

    let node_a = make_node(&validators, config.clone());
    let node_b = make_node(&validators, config);
    let a_to_b = connect(&node_a, &node_b);
    let b_to_a = connect(&node_b, &node_a);

    let hash1 = event_hash(EVENT_HASH_A);
    node_a
        .pool
        .add(signed_vote(&key, EventType::FromForeignChain, &hash1))
        .unwrap();

    wait_until(
        || {
            node_b
                .pool
                .by_type_and_hash(EventType::FromForeignChain, &hash1)
                .map(|votes| !votes.is_empty())
                .unwrap_or(false)
        },
        "vote to reach node b",
    )
    .await;

    // B admitted the vote it received from A; its broadcast task must not
    // echo it back within the cache timeout.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(a_to_b.load(Ordering::SeqCst), 1);
    assert_eq!(b_to_a.load(Ordering::SeqCst), 0);

    // A second vote flows the same way.
    let hash2 = event_hash(EVENT_HASH_B);
    node_a
        .pool
        .add(signed_vote(&key, EventType::FromForeignChain, &hash2))
        .unwrap();
    wait_until(
        || {
            node_b
                .pool
                .by_type_and_hash(EventType::FromForeignChain, &hash2)
                .map(|votes| !votes.is_empty())
                .unwrap_or(false)
        },
        "second vote to reach node b",
    )
    .await;
    assert_eq!(a_to_b.load(Ordering::SeqCst), 2);
    assert_eq!(b_to_a.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn inbound_vote_is_not_echoed_to_its_sender() {
    let key = bls_key();
    let validators = vec![make_validator(&key, 10)];
    let mut config = test_config();
    config.keep_alive = Duration::from_secs(30);
    config.peer_cache_timeout = Duration::from_secs(3);

    let node = make_node(&validators, config);
    let remote = PeerId::random();
    let (tx, mut rx) = mpsc::channel::<Envelope>(8);
    node.reactor.add_peer(PeerHandle { id: remote, sender: tx });

    let vote = signed_vote(&key, EventType::FromForeignChain, &event_hash(EVENT_HASH_A));
    let bytes = Envelope::Vote(WireVote::from(&vote)).to_bytes().unwrap();
    node.reactor.receive(&remote, &bytes).unwrap();

    assert_eq!(node.pool.by_type(EventType::FromForeignChain).unwrap().len(), 1);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(rx.try_recv().is_err(), "vote was echoed to its sender");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn expired_vote_is_resent_after_cache_timeout() {
    let key = bls_key();
    let validators = vec![make_validator(&key, 10)];
    // Expiry and the peer cache timeout are both shorter than the wait
    // below, so the re-admitted vote is eligible for sending again.
    let config = test_config();

    let node = make_node(&validators, config);
    let remote = PeerId::random();
    let (tx, mut rx) = mpsc::channel::<Envelope>(8);
    node.reactor.add_peer(PeerHandle { id: remote, sender: tx });

    let hash = event_hash(EVENT_HASH_A);
    let vote = signed_vote(&key, EventType::FromForeignChain, &hash);
    let bytes = Envelope::Vote(WireVote::from(&vote)).to_bytes().unwrap();
    node.reactor.receive(&remote, &bytes).unwrap();

    // Wait out the keep-alive window plus prune ticks.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(node.pool.by_type(EventType::FromForeignChain).unwrap().is_empty());

    // The identity left the dedup cache with pruning; re-admission
    // publishes again, and the peer's stale cache entry no longer
    // suppresses the send.
    node.pool.add(vote).unwrap();
    let envelope = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("resend within 1s")
        .expect("channel open");
    match envelope {
        Envelope::Vote(wire) => assert_eq!(wire.event_hash, hash),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reactor_stop_stops_the_pool() {
    let key = bls_key();
    let validators = vec![make_validator(&key, 10)];
    let node = make_node(&validators, test_config());

    assert!(node.pool.is_running());
    node.reactor.stop();
    assert!(!node.pool.is_running());
    assert_eq!(node.reactor.peer_count(), 0);
}
