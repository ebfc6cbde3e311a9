// Copyright (c) 2018-2022 The MobileCoin Foundation

// Synchronous network simulation for consensus tests. Delivery goes through
// the wire codec, so every hop exercises serialization.

#![allow(dead_code)]

use fba_consensus::{
    test_utils::{test_cluster_slice, TestValueStore},
    Block, Chain, Message,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

pub type TestBlock = Block<String, String>;
pub type TestChain = Chain<String, TestValueStore, String>;

/// A cluster of blocks all working on slot 1, with one shared slice
/// requiring a supermajority. Node 0's store suggests nothing, so it only
/// ever echoes values the others propose.
pub struct BlockCluster {
    pub names: Vec<String>,
    pub blocks: Vec<TestBlock>,
    pub stores: Vec<TestValueStore>,
}

impl BlockCluster {
    pub fn new(size: usize) -> Self {
        let (slice, names) = test_cluster_slice(size);
        let blocks = names
            .iter()
            .map(|name| Block::new(name.clone(), slice.clone(), 1))
            .collect();
        let stores = (0..size).map(|i| TestValueStore::new(i as u32)).collect();
        Self {
            names,
            blocks,
            stores,
        }
    }

    pub fn all_done(&self) -> bool {
        self.blocks.iter().all(|block| block.done())
    }

    /// Every block must have externalized, and all on the same value.
    pub fn assert_converged(&self) {
        let mut external_value: Option<String> = None;
        for (name, block) in self.names.iter().zip(&self.blocks) {
            let ext = block
                .external()
                .unwrap_or_else(|| panic!("{name} did not externalize"));
            match &external_value {
                None => external_value = Some(ext.X.clone()),
                Some(v) => assert_eq!(v, &ext.X, "{name} externalized a different value"),
            }
        }
    }

    /// Deliver the pending messages from block `from` to block `to`,
    /// encoding and decoding each along the way.
    pub fn send(&mut self, from: usize, to: usize) {
        if from == to {
            return;
        }
        let messages = self.blocks[from].outgoing_messages(&self.stores[from]);
        let sender = self.names[from].clone();
        for message in messages {
            let message = encode_then_decode(message);
            self.blocks[to].handle(&sender, &message, &self.stores[to]);
        }
    }

    /// One full round: each block broadcasts its pending messages to every
    /// other block. When `be_evil` is set, the first prepare message of the
    /// round goes out with a ballooned high counter; returns whether such a
    /// message was found.
    pub fn exchange(&mut self, be_evil: bool) -> bool {
        let mut first_evil = !be_evil;
        for from in 0..self.blocks.len() {
            let mut messages = self.blocks[from].outgoing_messages(&self.stores[from]);

            if !first_evil {
                for message in messages.iter_mut() {
                    if let Message::Prepare(m) = message {
                        m.Hn = i32::MAX as u32;
                        first_evil = true;
                        break;
                    }
                }
            }

            let sender = self.names[from].clone();
            for to in 0..self.blocks.len() {
                if to == from {
                    continue;
                }
                for message in &messages {
                    let message = encode_then_decode(message.clone());
                    self.blocks[to].handle(&sender, &message, &self.stores[to]);
                }
            }
        }
        !be_evil || first_evil
    }

    /// Randomized point-to-point delivery until every block externalizes.
    /// Panics if the cluster fails to converge within the delivery cap.
    pub fn fuzz(&mut self, seed: u64) {
        let mut rng: StdRng = SeedableRng::seed_from_u64(seed ^ 1234569);
        for _ in 0..10_000 {
            let from = rng.gen_range(0..self.blocks.len());
            let to = rng.gen_range(0..self.blocks.len());
            self.send(from, to);

            if self.all_done() {
                return;
            }
        }
        panic!("cluster failed to converge with seed {seed}");
    }
}

/// A cluster of chains, for multi-slot runs.
pub struct ChainCluster {
    pub names: Vec<String>,
    pub chains: Vec<TestChain>,
}

impl ChainCluster {
    pub fn new(size: usize) -> Self {
        let (slice, names) = test_cluster_slice(size);
        let chains = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                Chain::new(name.clone(), slice.clone(), TestValueStore::new(i as u32))
            })
            .collect();
        Self { names, chains }
    }

    /// Deliver pending messages from chain `from` to chain `to`, bouncing
    /// any direct response (a catch-up, typically) back to the sender.
    pub fn send(&mut self, from: usize, to: usize) {
        if from == to {
            return;
        }
        let messages = self.chains[from].outgoing_messages();
        let sender = self.names[from].clone();
        let receiver = self.names[to].clone();
        for message in messages {
            let message = encode_then_decode(message);
            if let Some(response) = self.chains[to].handle(&sender, &message) {
                let response = encode_then_decode(response);
                self.chains[from].handle(&receiver, &response);
            }
        }
    }

    /// One full round among `participants` only: each broadcasts its
    /// pending messages to every other participant, with responses bounced
    /// back.
    pub fn exchange_among(&mut self, participants: &[usize]) {
        for &from in participants {
            let messages = self.chains[from].outgoing_messages();
            let sender = self.names[from].clone();
            for &to in participants {
                if to == from {
                    continue;
                }
                let receiver = self.names[to].clone();
                for message in &messages {
                    let message = encode_then_decode(message.clone());
                    if let Some(response) = self.chains[to].handle(&sender, &message) {
                        let response = encode_then_decode(response);
                        self.chains[from].handle(&receiver, &response);
                    }
                }
            }
        }
    }

    /// Randomized delivery until every chain has externalized `slots` slots.
    pub fn fuzz_until_slot(&mut self, slots: u64, seed: u64) {
        let mut rng: StdRng = SeedableRng::seed_from_u64(seed ^ 987654321);
        for _ in 0..50_000 {
            let from = rng.gen_range(0..self.chains.len());
            let to = rng.gen_range(0..self.chains.len());
            self.send(from, to);

            if self.chains.iter().all(|chain| chain.slot() > slots) {
                return;
            }
        }
        panic!("chains failed to reach slot {slots} with seed {seed}");
    }

    /// Every chain must agree on the value externalized for `slot`.
    pub fn assert_slot_agreement(&self, slot: u64) {
        let mut external_value: Option<String> = None;
        for (name, chain) in self.names.iter().zip(&self.chains) {
            let ext = chain
                .externalized(slot)
                .unwrap_or_else(|| panic!("{name} has no history for slot {slot}"));
            assert_eq!(ext.I, slot);
            match &external_value {
                None => external_value = Some(ext.X.clone()),
                Some(v) => {
                    assert_eq!(v, &ext.X, "{name} externalized a different value for {slot}")
                }
            }
        }
    }
}

/// Round-trip a message through the wire codec.
pub fn encode_then_decode(message: Message<String>) -> Message<String> {
    let encoded = serde_json::to_string(&message).expect("message should serialize");
    serde_json::from_str(&encoded).expect("message should deserialize")
}
