// Copyright (c) 2018-2022 The MobileCoin Foundation

//! Cluster convergence tests: full mesh, a knocked-out node, an adversarial
//! counter, and multi-slot chains with catch-up.

mod mock_network;

use fba_consensus::{InfoMsg, Message};
use mock_network::{BlockCluster, ChainCluster};

/// Four nodes with threshold 3, randomized delivery order. Every seed must
/// converge on a single externalized value.
#[test]
fn full_cluster_converges() {
    for seed in 0..20 {
        let mut cluster = BlockCluster::new(4);
        cluster.fuzz(seed);
        cluster.assert_converged();
    }
}

/// With one of four nodes silent, the remaining three still meet the
/// threshold and externalize.
#[test]
fn one_node_knocked_out() {
    for seed in 0..20 {
        let mut cluster = BlockCluster::new(4);
        cluster.blocks.truncate(3);
        cluster.names.truncate(3);
        cluster.stores.truncate(3);
        cluster.fuzz(seed);
        cluster.assert_converged();
    }
}

/// One node announces a prepare with an absurdly high counter. The cluster
/// must shrug it off and converge anyway, without doing work proportional
/// to the attacker's counter.
#[test]
fn big_counter_range_is_harmless() {
    let mut cluster = BlockCluster::new(4);
    cluster.exchange(false);
    let mutated = cluster.exchange(true);
    assert!(mutated, "no prepare message left to sabotage");
    cluster.exchange(false);
    cluster.exchange(false);
    assert!(cluster.all_done(), "cluster did not converge");
    cluster.assert_converged();
}

/// A deterministic full-mesh schedule converges in a handful of rounds.
#[test]
fn round_robin_converges() {
    let mut cluster = BlockCluster::new(4);
    for _ in 0..10 {
        cluster.exchange(false);
        if cluster.all_done() {
            break;
        }
    }
    assert!(cluster.all_done(), "cluster did not converge");
    cluster.assert_converged();
}

/// Chains externalize several slots in order and agree on every one.
#[test]
fn chains_agree_across_slots() {
    for seed in 0..5 {
        let mut cluster = ChainCluster::new(4);
        cluster.fuzz_until_slot(2, seed);
        cluster.assert_slot_agreement(1);
        cluster.assert_slot_agreement(2);

        // The history answers catch-up requests for both slots.
        let asker = cluster.names[1].clone();
        for slot in 1..=2 {
            let reply = cluster.chains[0].handle(&asker, &Message::Info(InfoMsg { I: slot }));
            match reply {
                Some(Message::Externalize(ext)) => assert_eq!(ext.I, slot),
                other => panic!("expected a catch-up reply for slot {slot}, got {other:?}"),
            }
        }
    }
}

/// A node that was cut off while the rest of the cluster finished a slot
/// rejoins and catches up: its stale slot 1 traffic draws catch-up replies
/// and its peers echo their archived externalize messages.
#[test]
fn lagging_chain_catches_up() {
    let mut cluster = ChainCluster::new(4);

    // Three of four nodes finish slot 1 without node 0.
    let active = [1usize, 2, 3];
    for _ in 0..20 {
        cluster.exchange_among(&active);
        if active.iter().all(|&i| cluster.chains[i].slot() > 1) {
            break;
        }
    }
    for &i in &active {
        assert!(cluster.chains[i].slot() > 1, "node {i} did not finish slot 1");
    }
    assert_eq!(cluster.chains[0].slot(), 1);

    // Node 0 rejoins; full-mesh rounds bring it past slot 1.
    let everyone = [0usize, 1, 2, 3];
    for _ in 0..20 {
        cluster.exchange_among(&everyone);
        if cluster.chains[0].slot() > 1 {
            break;
        }
    }
    assert!(cluster.chains[0].slot() > 1, "node 0 did not catch up");
    cluster.assert_slot_agreement(1);

    // And an explicit catch-up request gets the archived message.
    let reply = cluster.chains[1].handle(
        &cluster.names[0].clone(),
        &Message::Info(InfoMsg { I: 1 }),
    );
    assert!(matches!(reply, Some(Message::Externalize(ext)) if ext.I == 1));
}
