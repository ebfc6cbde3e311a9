// Copyright (c) 2018-2022 The MobileCoin Foundation

//! The chain gains consensus on one block at a time.
//!
//! The chain owns the block for the slot in progress and an archive of
//! externalize messages for every finished slot. It routes inbound messages
//! to the right place and answers catch-up requests from lagging peers.
//! Not threadsafe; the caller serializes all entry points.
use crate::{
    block::Block,
    core_types::{GenericNodeId, SlotIndex, Value},
    msg::{ExternalizeMsg, Message},
    quorum_set::QuorumSlice,
    value_store::ValueStore,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// A strictly ordered chain of externalized slots.
pub struct Chain<V: Value, VS: ValueStore<V>, ID: GenericNodeId = String> {
    /// The block we are currently working on.
    current: Block<V, ID>,

    /// The externalize message archived for each finished slot.
    history: BTreeMap<SlotIndex, ExternalizeMsg<V, ID>>,

    /// The quorum logic we use for future blocks.
    D: QuorumSlice<ID>,

    /// Who we are.
    node_id: ID,

    /// The application's value substrate.
    values: VS,
}

impl<V: Value, VS: ValueStore<V>, ID: GenericNodeId> Chain<V, VS, ID> {
    /// A chain with no history, working on slot 1.
    pub fn new(node_id: ID, qs: QuorumSlice<ID>, values: VS) -> Self {
        Self {
            current: Block::new(node_id.clone(), qs.clone(), 1),
            history: BTreeMap::new(),
            D: qs,
            node_id,
            values,
        }
    }

    /// The slot this chain is currently working on.
    pub fn slot(&self) -> SlotIndex {
        self.current.slot()
    }

    /// The block for the slot in progress.
    pub fn current(&self) -> &Block<V, ID> {
        &self.current
    }

    /// The archived externalize message for `slot`, if it has finished.
    pub fn externalized(&self, slot: SlotIndex) -> Option<&ExternalizeMsg<V, ID>> {
        self.history.get(&slot)
    }

    /// The value store.
    pub fn values(&self) -> &VS {
        &self.values
    }

    /// Mutable access to the value store. Call `value_store_updated`
    /// afterwards so the slot in progress can react.
    pub fn values_mut(&mut self) -> &mut VS {
        &mut self.values
    }

    /// The value store changed; let the current block re-derive its state.
    pub fn value_store_updated(&mut self) {
        self.current.value_store_updated(&self.values);
    }

    /// Handle an incoming message. May return a message to send back to the
    /// original sender; returns `None` when there is nothing to say.
    ///
    /// A slot of 0 can only come from a buggy peer or a corrupted channel
    /// and is fatal.
    pub fn handle(&mut self, sender: &ID, message: &Message<V, ID>) -> Option<Message<V, ID>> {
        if sender == &self.node_id {
            // It's one of our own returning to us; ignore it.
            return None;
        }

        let slot = message.slot();
        assert!(slot != 0, "malformed message from {sender}: slot numbers start at 1");

        // Catch-up requests are answered from history, if we can.
        if let Message::Info(_) = message {
            return self
                .history
                .get(&slot)
                .map(|ext| Message::Externalize(ext.clone()));
        }

        if slot == self.current.slot() {
            self.current.handle(sender, message, &self.values);

            // Once the block externalizes and the store can apply the value,
            // archive it and move on to the next slot.
            let finalized = match self.current.external() {
                Some(ext) if self.values.can_finalize(&ext.X) => Some(ext.clone()),
                _ => None,
            };
            if let Some(ext) = finalized {
                info!(node = %self.node_id, slot, "advancing to slot {}", slot + 1);
                self.values.finalize(&ext.X);
                self.history.insert(slot, ext);
                self.current = Block::new(self.node_id.clone(), self.D.clone(), slot + 1);
            }
            return None;
        }

        if slot < self.current.slot() {
            if let Message::Externalize(_) = message {
                // The sender is done with this block and so are we.
                return None;
            }

            // The sender is behind. Send them the data for the old block.
            if let Some(ext) = self.history.get(&slot) {
                debug!(node = %self.node_id, slot, "sending a catchup");
                return Some(Message::Externalize(ext.clone()));
            }
        }

        // A future slot, or an old one we can't help with.
        None
    }

    /// The messages this chain wants to broadcast: the current block's,
    /// plus an echo of the previous slot's externalize message so lagging
    /// peers can catch up.
    pub fn outgoing_messages(&mut self) -> Vec<Message<V, ID>> {
        let mut answer = self.current.outgoing_messages(&self.values);

        if let Some(prev) = self.history.get(&(self.current.slot() - 1)) {
            answer.push(Message::Externalize(prev.clone()));
        }

        answer
    }

    /// Panic if the slot in progress contradicts itself.
    pub fn assert_valid(&mut self) {
        self.current.assert_valid();
    }
}

#[cfg(test)]
mod chain_tests {
    use super::*;
    use crate::{
        msg::InfoMsg,
        test_utils::{test_slice, TestValueStore},
    };

    type TestChain = Chain<String, TestValueStore>;

    fn solo_chain() -> TestChain {
        Chain::new(
            "solo".to_string(),
            test_slice(&["solo"], 1),
            TestValueStore::new(1),
        )
    }

    #[test]
    fn advances_after_externalizing() {
        let mut chain = solo_chain();
        assert_eq!(chain.slot(), 1);

        // The solo node externalizes on its first poll; any inbound message
        // for the slot then triggers the advance.
        let outgoing = chain.outgoing_messages();
        assert_eq!(outgoing.len(), 1);
        let ext = outgoing[0].clone();

        // A peer's externalize for slot 1 arrives (it doesn't matter that
        // the peer is outside our slice; the block is already done).
        chain.handle(&"peer".to_string(), &ext);
        assert_eq!(chain.slot(), 2);
        assert_eq!(chain.values().finalized().len(), 1);
        assert!(chain.externalized(1).is_some());

        // The next poll carries slot 2 messages plus the slot 1 echo.
        let next = chain.outgoing_messages();
        assert!(next.iter().any(|m| m.slot() == 2));
        assert!(next
            .iter()
            .any(|m| matches!(m, Message::Externalize(e) if e.I == 1)));
    }

    #[test]
    fn answers_catch_up_requests() {
        let mut chain = solo_chain();
        let ext = chain.outgoing_messages()[0].clone();
        chain.handle(&"peer".to_string(), &ext);
        assert_eq!(chain.slot(), 2);

        // A lagging peer asks about slot 1.
        let reply = chain.handle(
            &"peer".to_string(),
            &Message::Info(InfoMsg { I: 1 }),
        );
        match reply {
            Some(Message::Externalize(e)) => assert_eq!(e.I, 1),
            other => panic!("expected the archived externalize, got {other:?}"),
        }

        // Asking about a slot we haven't finished gets nothing.
        assert!(chain
            .handle(&"peer".to_string(), &Message::Info(InfoMsg { I: 2 }))
            .is_none());
    }

    #[test]
    fn old_slot_messages_get_a_catchup_response() {
        let mut chain = solo_chain();
        let ext = chain.outgoing_messages()[0].clone();
        chain.handle(&"peer".to_string(), &ext);

        // A lagging peer still nominating for slot 1 gets the externalize.
        let qs = test_slice(&["solo"], 1);
        let lagging = Message::Nominate(crate::msg::NominateMsg {
            I: 1,
            Nom: vec!["old".to_string()],
            Acc: vec![],
            D: qs,
        });
        let reply = chain.handle(&"peer".to_string(), &lagging);
        assert!(matches!(reply, Some(Message::Externalize(e)) if e.I == 1));

        // But an old externalize means the sender needs no help.
        let reply = chain.handle(&"peer".to_string(), &ext);
        assert!(reply.is_none());
    }

    #[test]
    fn messages_from_self_are_ignored() {
        let mut chain = solo_chain();
        let ext = chain.outgoing_messages()[0].clone();
        assert!(chain.handle(&"solo".to_string(), &ext).is_none());
        assert_eq!(chain.slot(), 1);
    }

    #[test]
    #[should_panic(expected = "slot numbers start at 1")]
    fn slot_zero_is_fatal() {
        let mut chain = solo_chain();
        chain.handle(&"peer".to_string(), &Message::Info(InfoMsg { I: 0 }));
    }
}
