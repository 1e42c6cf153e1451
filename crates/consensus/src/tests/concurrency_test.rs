//! Concurrency Integration Tests
//!
//! - Vote pool shared by many signer threads and readers
//! - One height driven from several threads through the controller manager.
//!   Every message reaches the controller under its `Arc<Mutex<_>>` handle,
//!   so transitions are applied one at a time and never interleave.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::{
    chain::MemoryChain,
    clock::ManualClock,
    config::{ElectionConfig, VotePoolConfig},
    controller::{ControllerMsg, StartControllerMsg},
    crypto::{Secp256k1Verifier, SecretKey},
    error::VoteError,
    interval::BroadcastInterval,
    manager::ControllerManagerBuilder,
    notify::LeaderNotifier,
    types::{Address, ConsensusState, Hash, Header, RoleType, ValidatorSet},
    vote_pool::VotePool,
};

const BEGIN: i64 = 1_700_000_000;

#[test]
fn test_concurrent_votes_respect_signer_limit() {
    const SIGNERS: u8 = 6;
    const HASHES: u8 = 8;

    let config = VotePoolConfig::default();
    let limit = config.account_vote_count_limit;
    let clock = ManualClock::from_secs(BEGIN);
    let pool = VotePool::new(
        config,
        Arc::new(Secp256k1Verifier),
        Arc::new(clock),
        "concurrent",
    );
    let keys: Vec<SecretKey> = (1..=SIGNERS)
        .map(|i| SecretKey::from_bytes(&[i; 32]).unwrap())
        .collect();
    let hashes: Vec<Hash> = (0..HASHES).map(|i| Hash([i + 1; 32])).collect();
    let duplicates = AtomicUsize::new(0);

    std::thread::scope(|s| {
        for key in &keys {
            let (pool, hashes, duplicates) = (&pool, &hashes, &duplicates);
            s.spawn(move || {
                for (height, hash) in hashes.iter().enumerate() {
                    let sign = key.sign_with_validate(hash, true).unwrap();
                    pool.add_vote(*hash, sign, key.address(), height as u64, true)
                        .unwrap();
                    match pool.add_vote(*hash, sign, key.address(), height as u64, true) {
                        Err(VoteError::Duplicate { .. }) => {
                            duplicates.fetch_add(1, Ordering::Relaxed);
                        }
                        other => panic!("replayed vote accepted: {:?}", other),
                    }
                }
            });
        }
        // readers run alongside the writers
        for _ in 0..2 {
            let (pool, hashes) = (&pool, &hashes);
            s.spawn(move || {
                for _ in 0..50 {
                    for hash in hashes {
                        let votes = pool.get_votes(hash);
                        let signers: HashSet<Address> = votes.iter().map(|v| v.account).collect();
                        assert_eq!(signers.len(), votes.len());
                    }
                }
            });
        }
    });

    assert_eq!(
        duplicates.load(Ordering::Relaxed),
        SIGNERS as usize * HASHES as usize
    );
    for key in &keys {
        assert_eq!(pool.signer_vote_count(&key.address()), limit);
    }
    assert_eq!(pool.len(), SIGNERS as usize * limit);

    // each signer kept its newest votes, once each
    for (i, hash) in hashes.iter().enumerate() {
        let votes = pool.get_votes(hash);
        let expected = if i < HASHES as usize - limit { 0 } else { SIGNERS as usize };
        assert_eq!(votes.len(), expected, "hash {}", i);
        let signers: HashSet<Address> = votes.iter().map(|v| v.account).collect();
        assert_eq!(signers.len(), votes.len());
    }
}

fn start_msg(number: u64, accs: &[Address]) -> StartControllerMsg {
    StartControllerMsg {
        role: RoleType::Validator,
        validators: ValidatorSet::from_accounts(accs.to_vec()),
        parent_header: Header::new(number - 1, Hash::ZERO, accs[0], BEGIN),
    }
}

#[test]
fn test_ticks_from_many_threads_escalate_once_per_round() {
    let accs: Vec<Address> = (1..=4).map(|i| Address([i; 20])).collect();
    let clock = ManualClock::from_secs(BEGIN);
    let notifier = Arc::new(LeaderNotifier::new());
    let mut rx = notifier.subscribe();
    let manager = ControllerManagerBuilder::new(Arc::new(MemoryChain::new()))
        .config(ElectionConfig {
            broadcast_address: Address([0xbb; 20]),
            interval: BroadcastInterval::new(100, 300),
            ..Default::default()
        })
        .notifier(notifier)
        .clock(Arc::new(clock))
        .build()
        .unwrap();

    manager.start_controller(5, start_msg(5, &accs));
    assert_eq!(rx.try_recv().unwrap().reelect_turn, 0);

    // POS window is 40s, each reelection round 40s: 200s reaches round 4
    std::thread::scope(|s| {
        for _ in 0..4 {
            let manager = &manager;
            s.spawn(move || {
                for t in 0..200 {
                    manager.tick(BEGIN + t);
                    manager
                        .receive_msg(5, ControllerMsg::Tick { now: BEGIN + t })
                        .unwrap();
                }
            });
        }
    });

    let mut turns = Vec::new();
    while let Ok(notify) = rx.try_recv() {
        assert!(!notify.consensus_state);
        turns.push(notify.reelect_turn);
    }
    assert_eq!(turns, vec![1, 2, 3, 4]);

    let ctrl = manager.get_cur_controller().unwrap();
    let ctrl = ctrl.lock();
    assert_eq!(ctrl.state(), ConsensusState::Reelect);
    assert_eq!(ctrl.cdc().reelect_turn(), 4);
    assert_eq!(ctrl.cdc().reelect_master(), accs[1]);
}

#[test]
fn test_height_advance_races_with_messages() {
    let accs: Vec<Address> = (1..=3).map(|i| Address([i; 20])).collect();
    let manager = ControllerManagerBuilder::new(Arc::new(MemoryChain::new()))
        .config(ElectionConfig {
            broadcast_address: Address([0xbb; 20]),
            interval: BroadcastInterval::new(100, 300),
            ..Default::default()
        })
        .clock(Arc::new(ManualClock::from_secs(BEGIN)))
        .build()
        .unwrap();
    manager.start_controller(5, start_msg(5, &accs));
    let old = manager.get_controller(5).unwrap();

    std::thread::scope(|s| {
        let manager = &manager;
        s.spawn(move || {
            for t in 0..100 {
                // fails once height 6 has started
                let _ = manager.receive_msg(5, ControllerMsg::Tick { now: BEGIN + t });
            }
        });
        s.spawn(move || {
            manager.start_controller(6, start_msg(6, &accs));
        });
    });

    assert!(old.lock().is_closed());
    assert_eq!(manager.cur_number(), 6);
    assert_eq!(manager.controller_count(), 1);
    assert_eq!(
        manager.get_cur_controller().unwrap().lock().state(),
        ConsensusState::Pos
    );
}
