// Copyright (c) 2018-2022 The MobileCoin Foundation

//! The convergence machinery for a single slot.
//!
//! Most logic is not in the Block itself; it is delegated to the
//! `NominationState` for the nomination phase and the `BallotState` for the
//! ballot phases. The block just wires them together and remembers the
//! externalize message once one is produced.
use crate::{
    ballot::BallotState,
    core_types::{GenericNodeId, SlotIndex, Value},
    msg::{BallotMsg, ExternalizeMsg, Message, NominateMsg},
    nomination::NominationState,
    quorum_set::QuorumSlice,
    value_store::ValueStore,
};
use tracing::{debug, warn};

/// One slot's worth of consensus state.
pub struct Block<V: Value, ID: GenericNodeId = String> {
    /// Which slot this block is building.
    slot: SlotIndex,

    nState: NominationState<V, ID>,
    bState: BallotState<V, ID>,

    /// `None` until the block is finalized. Once set, this is all we need to
    /// keep around in order to catch up old nodes.
    external: Option<ExternalizeMsg<V, ID>>,

    /// Who we care about.
    D: QuorumSlice<ID>,

    /// Who we are.
    node_id: ID,
}

impl<V: Value, ID: GenericNodeId> Block<V, ID> {
    /// A fresh block at `slot`.
    pub fn new(node_id: ID, qs: QuorumSlice<ID>, slot: SlotIndex) -> Self {
        assert!(slot >= 1, "slot numbers start at 1");
        assert!(
            qs.is_valid() && qs.members.contains(&node_id),
            "a node must appear in its own quorum slice"
        );
        Self {
            slot,
            nState: NominationState::new(node_id.clone(), qs.clone()),
            bState: BallotState::new(node_id.clone(), qs.clone()),
            external: None,
            D: qs,
            node_id,
        }
    }

    /// The slot this block is building.
    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    /// Whether this block has externalized.
    pub fn done(&self) -> bool {
        self.external.is_some()
    }

    /// The externalize message, once this block is done.
    pub fn external(&self) -> Option<&ExternalizeMsg<V, ID>> {
        self.external.as_ref()
    }

    /// The nomination sub-state.
    pub fn nomination(&self) -> &NominationState<V, ID> {
        &self.nState
    }

    /// The ballot sub-state.
    pub fn ballot(&self) -> &BallotState<V, ID> {
        &self.bState
    }

    /// The messages this block currently wants to broadcast: the nomination
    /// state plus the ballot state, or just the externalize message once the
    /// block is done.
    pub fn outgoing_messages<VS: ValueStore<V>>(&mut self, values: &VS) -> Vec<Message<V, ID>> {
        if let Some(external) = &self.external {
            // This block is already externalized.
            return vec![Message::Externalize(external.clone())];
        }

        let mut answer = Vec::new();

        if !self.nState.has_nomination() {
            // There's nothing to nominate. Ask the store for something.
            if let Some(v) = values.suggest_value() {
                debug!(node = %self.node_id, slot = self.slot, value = ?v, "nominates");
                self.nState.set_default(v);
            }
        }

        answer.push(Message::Nominate(NominateMsg {
            I: self.slot,
            Nom: self.nState.voted().to_vec(),
            Acc: self.nState.accepted().to_vec(),
            D: self.D.clone(),
        }));

        // If we aren't working on any ballot, but we do have a nomination,
        // we can optimistically start working on that ballot.
        if self.nState.has_nomination() && !self.bState.has_value() {
            let v = self.nState.predict_value(values);
            self.bState.maybe_initialize_value(&v);
        }

        self.bState.self_investigate();

        if self.bState.has_message() {
            match self.bState.message(self.slot, &self.D) {
                BallotMsg::Externalize(external) => {
                    self.external = Some(external.clone());
                    return vec![Message::Externalize(external)];
                }
                m => answer.push(m.into()),
            }
        }

        answer
    }

    /// Handle an incoming message from a peer node.
    pub fn handle<VS: ValueStore<V>>(
        &mut self,
        sender: &ID,
        message: &Message<V, ID>,
        values: &VS,
    ) {
        if sender == &self.node_id {
            // It's one of our own returning to us; ignore it.
            return;
        }
        match message {
            Message::Nominate(m) => {
                self.nState.handle(sender, m);
                self.bState.maybe_update_value(&self.nState, values);
            }
            Message::Prepare(m) => {
                self.bState.handle(sender, BallotMsg::Prepare(m.clone()));
            }
            Message::Confirm(m) => {
                self.bState.handle(sender, BallotMsg::Confirm(m.clone()));
            }
            Message::Externalize(m) => {
                self.bState.handle(sender, BallotMsg::Externalize(m.clone()));
            }
            Message::Info(_) => {
                warn!(node = %self.node_id, "catch-up request routed to a block");
            }
        }

        self.assert_valid();
    }

    /// The value store changed underneath us; re-derive the next-ballot
    /// value from the nomination if the ballot protocol hasn't taken over.
    pub fn value_store_updated<VS: ValueStore<V>>(&mut self, values: &VS) {
        if self.nState.has_nomination() {
            self.bState.maybe_update_value(&self.nState, values);
        }
    }

    /// Panic if either sub-state contradicts itself.
    pub fn assert_valid(&mut self) {
        self.nState.assert_valid();
        self.bState.assert_valid();
    }
}
