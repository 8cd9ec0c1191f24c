//! End-to-end scenarios driven entirely through the public `JournalSystem`
//! API against the in-memory `FakeEngine`, covering spec.md §8's numbered
//! walk-throughs as far as a single-process fake can take them.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use replicated_journal::config::JournalConfig;
use replicated_journal::quorum::QuorumAdmin;
use replicated_journal::registry::JournalRegistry;
use replicated_journal::state_machine::JournalStateMachine;
use replicated_journal::system::JournalSystem;
use replicated_journal::testing::{FakeEngine, FakeEngineFactory};

/// Installs a `tracing` fmt subscriber once per test binary, so a failing
/// scenario (or a reintroduced race like the state-machine suspend/resume
/// one) prints its primacy-transition and apply-level spans instead of
/// failing silently. Respects `RUST_LOG`; defaults to this crate at debug.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("replicated_journal=debug"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

async fn boot_single_peer() -> Arc<JournalSystem> {
    init_tracing();
    let registry = JournalRegistry::new();
    let factory = Arc::new(FakeEngineFactory::new(1));
    let system = JournalSystem::start(JournalConfig::default(), registry, factory).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    system
}

#[tokio::test]
async fn single_peer_cluster_boot_serves_appends_in_order() {
    let system = boot_single_peer().await;
    assert!(system.is_primary().await);

    let first = system.append("blocks", Bytes::from_static(b"a")).await.unwrap();
    let second = system.append("blocks", Bytes::from_static(b"b")).await.unwrap();
    assert_eq!(first, 1);
    assert_eq!(second, 2);
    assert_eq!(system.last_applied_sn().await, 2);

    system.close().await;
}

#[tokio::test]
async fn concurrent_appends_to_different_journals_both_commit() {
    let system = boot_single_peer().await;

    let a = system.append("blocks", Bytes::from_static(b"a"));
    let b = system.append("inodes", Bytes::from_static(b"b"));
    let (a, b) = tokio::join!(a, b);

    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(system.last_applied_sn().await, 2);

    system.close().await;
}

#[tokio::test]
async fn remove_unavailable_peer_updates_membership() {
    init_tracing();
    // Exercised directly against QuorumAdmin + FakeEngine rather than
    // through JournalSystem, since marking a peer unavailable is a fake-
    // engine-only test hook with no counterpart on the `ConsensusEngine`
    // trait itself (spec.md §8 scenario 5).
    let sm = JournalStateMachine::new(JournalRegistry::new(), 0);
    let engine = FakeEngine::new(1, sm);
    engine.set_configuration(vec![(1, 1), (2, 1)]).await.unwrap();
    let shared = Arc::new(tokio::sync::Mutex::new(engine.clone() as Arc<dyn replicated_journal::ConsensusEngine>));
    let admin = QuorumAdmin::new(shared, Arc::new(std::sync::atomic::AtomicBool::new(true)), Duration::from_millis(1), Duration::from_millis(50));

    assert!(admin.remove_peer(2).await.is_err(), "peer 2 is still reachable; removal must be refused");

    engine.mark_unavailable(2);
    admin.remove_peer(2).await.unwrap();

    let info = engine.group_info();
    assert!(!info.peers.contains(&2));
}

#[tokio::test]
async fn transfer_leadership_is_refused_before_primacy_is_gained() {
    init_tracing();
    // `transferLeaderAllowed` only flips true once gainPrimacy finishes;
    // racing it immediately at boot should be refused, not panic.
    let registry = JournalRegistry::new();
    let factory = Arc::new(FakeEngineFactory::new(1));
    let system = JournalSystem::start(JournalConfig::default(), registry, factory).await.unwrap();
    // no sleep: gainPrimacy's driver task may not have run yet.
    let id = system.transfer_leadership(2).await;
    let msg = system.admin().transfer_message(id).await;
    // Either it was already allowed (message present) or still pending
    // (None) — both are acceptable outcomes of the race; what must never
    // happen is a panic or a successful transfer to a nonexistent peer.
    if let Some(msg) = msg {
        assert!(!msg.is_empty(), "peer 2 was never added, so a successful transfer would be a bug");
    }
    system.close().await;
}
