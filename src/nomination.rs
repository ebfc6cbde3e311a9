// Copyright (c) 2018-2022 The MobileCoin Foundation

//! Federated voting to pick a candidate value for one slot.
//!
//! See page 21 of the protocol paper. When there are frustrating
//! single-letter names, it's because they line up with the paper.
use crate::{
    core_types::{GenericNodeId, Value},
    msg::NominateMsg,
    quorum_set::{meets_quorum, QuorumSlice, SliceSource},
    value_store::ValueStore,
};
use std::collections::BTreeMap;
use tracing::debug;

/// The nomination state for one slot.
pub struct NominationState<V: Value, ID: GenericNodeId = String> {
    /// The values we have voted to nominate.
    X: Vec<V>,

    /// The values we have accepted as nominated.
    Y: Vec<V>,

    /// The values whose nomination we have confirmed.
    Z: Vec<V>,

    /// The last nomination message received from each node.
    N: BTreeMap<ID, NominateMsg<V, ID>>,

    /// Who we are.
    node_id: ID,

    /// Who we listen to for quorum.
    D: QuorumSlice<ID>,

    /// The number of non-duplicate messages this state has processed.
    received: usize,
}

impl<V: Value, ID: GenericNodeId> NominationState<V, ID> {
    /// A fresh nomination state with nothing voted.
    pub fn new(node_id: ID, qs: QuorumSlice<ID>) -> Self {
        Self {
            X: Vec::new(),
            Y: Vec::new(),
            Z: Vec::new(),
            N: BTreeMap::new(),
            node_id,
            D: qs,
            received: 0,
        }
    }

    /// Whether this state can currently send out a nomination. False until a
    /// peer nominates something or `set_default` is called.
    pub fn has_nomination(&self) -> bool {
        !self.X.is_empty()
    }

    /// Vote to nominate `v` if we aren't voting for anything yet.
    pub fn set_default(&mut self, v: V) {
        if self.has_nomination() {
            // We already have something to nominate.
            return;
        }
        self.X = vec![v];
    }

    /// The best guess at the value this slot will settle on: the combination
    /// of the confirmed values, or failing that the accepted ones, or
    /// failing that the voted ones.
    ///
    /// Calling this with nothing nominated is a programming error.
    pub fn predict_value<VS: ValueStore<V>>(&self, values: &VS) -> V {
        if !self.Z.is_empty() {
            return values.combine(&self.Z);
        }
        if !self.Y.is_empty() {
            return values.combine(&self.Y);
        }
        if !self.X.is_empty() {
            return values.combine(&self.X);
        }
        panic!("predict_value called with nothing nominated");
    }

    /// Handle an incoming nomination message from a peer node.
    ///
    /// A message whose lists shrank is stale and a message that grew neither
    /// list is a duplicate; both are dropped without effect. Newly seen
    /// values are adopted into our own votes, and every newly seen value
    /// gets a chance to advance.
    pub fn handle(&mut self, sender: &ID, message: &NominateMsg<V, ID>) {
        let (old_nom, old_acc) = match self.N.get(sender) {
            Some(old) => (old.Nom.len(), old.Acc.len()),
            None => (0, 0),
        };
        if message.Nom.len() < old_nom || message.Acc.len() < old_acc {
            debug!(sender = %sender, "dropping stale nomination message");
            return;
        }
        if message.Nom.len() == old_nom && message.Acc.len() == old_acc {
            // It's just a dupe.
            return;
        }
        self.N.insert(sender.clone(), message.clone());
        self.received += 1;

        // The values we have seen new information about.
        let mut touched: Vec<V> = Vec::new();

        for v in &message.Nom[old_nom..] {
            if !touched.contains(v) {
                touched.push(v.clone());
            }
            // If we aren't voting for this value yet, we can support it.
            if !self.X.contains(v) {
                debug!(node = %self.node_id, value = ?v, "supports the nomination");
                self.X.push(v.clone());
            }
        }

        for v in &message.Acc[old_acc..] {
            if !touched.contains(v) {
                touched.push(v.clone());
            }
        }

        for v in &touched {
            self.maybe_advance(v);
        }
    }

    /// Check whether `v` should move up a federated-voting level: accept it
    /// when a quorum has voted-or-accepted it or a blocking set has accepted
    /// it, and confirm it when a quorum has accepted it. Returns whether
    /// anything changed.
    pub fn maybe_advance(&mut self, v: &V) -> bool {
        if self.Z.contains(v) {
            // We already confirmed this, so we can't do anything more.
            return false;
        }

        let mut changed = false;
        let mut voted_or_accepted: Vec<ID> = Vec::new();
        let mut accepted: Vec<ID> = Vec::new();
        if self.X.contains(v) {
            voted_or_accepted.push(self.node_id.clone());
        }
        if self.Y.contains(v) {
            accepted.push(self.node_id.clone());
        }
        for (node, m) in &self.N {
            if m.Acc.contains(v) {
                voted_or_accepted.push(node.clone());
                accepted.push(node.clone());
                continue;
            }
            if m.Nom.contains(v) {
                voted_or_accepted.push(node.clone());
            }
        }

        // The rules for accepting are on page 13, section 5.3.
        // Rule 1: a quorum has either voted for or accepted the nomination.
        // Rule 2: a set that blocks us has accepted it.
        let accept =
            meets_quorum(self, &voted_or_accepted) || self.D.is_blocked_by(&accepted);

        if accept && !self.Y.contains(v) {
            debug!(node = %self.node_id, value = ?v, "accepts the nomination");
            changed = true;
            self.Y.push(v.clone());
            accepted.push(self.node_id.clone());
        }

        // We confirm once a quorum has accepted.
        if meets_quorum(self, &accepted) {
            debug!(node = %self.node_id, value = ?v, "confirms the nomination");
            changed = true;
            self.Z.push(v.clone());
        }
        changed
    }

    /// The values we have voted to nominate.
    pub fn voted(&self) -> &[V] {
        &self.X
    }

    /// The values we have accepted as nominated.
    pub fn accepted(&self) -> &[V] {
        &self.Y
    }

    /// The values whose nomination we have confirmed.
    pub fn confirmed(&self) -> &[V] {
        &self.Z
    }

    /// How many peers we have heard a nomination from.
    pub fn peer_count(&self) -> usize {
        self.N.len()
    }

    /// How many non-duplicate messages this state has processed.
    pub fn received(&self) -> usize {
        self.received
    }

    /// Panic if the duplicate-free invariant of X, Y, and Z is broken.
    pub fn assert_valid(&self) {
        assert_no_dupes(&self.X);
        assert_no_dupes(&self.Y);
        assert_no_dupes(&self.Z);
    }
}

fn assert_no_dupes<V: Value>(list: &[V]) {
    for (i, v) in list.iter().enumerate() {
        assert!(
            !list[..i].contains(v),
            "duplicate nominated value: {v:?}"
        );
    }
}

impl<V: Value, ID: GenericNodeId> SliceSource<ID> for NominationState<V, ID> {
    fn node_id(&self) -> &ID {
        &self.node_id
    }

    fn slice_of(&self, node: &ID) -> Option<&QuorumSlice<ID>> {
        if node == &self.node_id {
            return Some(&self.D);
        }
        self.N.get(node).map(|m| &m.D)
    }
}
