// Copyright (c) 2018-2022 The MobileCoin Foundation

//! The three-phase ballot protocol for one slot.
//!
//! See page 23 of the protocol paper. The state tracks the working ballot
//! `b`, the two highest mutually incompatible ballots accepted as prepared
//! (`p` and `pp`), and a counter range [`cn`, `hn`] whose meaning shifts
//! with the phase: commit votes while preparing, accepted commits while
//! confirming, confirmed commits once externalizing.
use crate::{
    core_types::{Ballot, GenericNodeId, Phase, SlotIndex, Value},
    msg::{BallotMsg, ConfirmMsg, ExternalizeMsg, PrepareMsg},
    nomination::NominationState,
    quorum_set::{meets_quorum, QuorumSlice, SliceSource},
    value_store::ValueStore,
};
use std::collections::BTreeMap;
use tracing::debug;

/// The ballot state for one slot. The null ballot is represented by `None`.
pub struct BallotState<V: Value, ID: GenericNodeId = String> {
    /// What phase of balloting we are in.
    phase: Phase,

    /// The current ballot we are trying to prepare and commit.
    b: Option<Ballot<V>>,

    /// The last value of `b` seen during validation, kept to check that `b`
    /// never moves backwards onto a contradictory vote.
    last: Option<Ballot<V>>,

    /// The highest two incompatible ballots that are accepted as prepared.
    /// `p` is the highest, `pp` the next.
    p: Option<Ballot<V>>,
    pp: Option<Ballot<V>>,

    /// [cn, hn] delimits a range of b-compatible ballot counters. [0, 0] is
    /// the empty range, since 0 is not a valid ballot counter.
    /// In the Prepare phase, this is the range we have voted to commit but
    /// not aborted. In Confirm, the range we have accepted as committed. In
    /// Externalize, the range we have confirmed as committed.
    cn: u32,
    hn: u32,

    /// The value to use in the next ballot, if this one fails. `None` when
    /// we have no idea what value we would use.
    z: Option<V>,

    /// The latest ballot message from each peer.
    M: BTreeMap<ID, BallotMsg<V, ID>>,

    /// Who we are.
    node_id: ID,

    /// Who we listen to for quorum.
    D: QuorumSlice<ID>,

    /// The number of non-duplicate messages this state has processed.
    received: usize,
}

fn covers<V: Value>(ballot: &Option<Ballot<V>>, n: u32, x: &V) -> bool {
    ballot
        .as_ref()
        .map_or(false, |b| b.n >= n && b.x == *x)
}

fn covers_incompatible<V: Value>(ballot: &Option<Ballot<V>>, n: u32, x: &V) -> bool {
    ballot
        .as_ref()
        .map_or(false, |b| b.n >= n && b.x != *x)
}

impl<V: Value, ID: GenericNodeId> BallotState<V, ID> {
    /// A fresh ballot state in the Prepare phase with no working ballot.
    pub fn new(node_id: ID, qs: QuorumSlice<ID>) -> Self {
        Self {
            phase: Phase::Prepare,
            b: None,
            last: None,
            p: None,
            pp: None,
            cn: 0,
            hn: 0,
            z: None,
            M: BTreeMap::new(),
            node_id,
            D: qs,
            received: 0,
        }
    }

    /// The phase we are in.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether a next-ballot value has been chosen yet.
    pub fn has_value(&self) -> bool {
        self.z.is_some()
    }

    /// Whether this state has something to say. True once a working ballot
    /// exists.
    pub fn has_message(&self) -> bool {
        self.b.is_some()
    }

    /// How many non-duplicate messages this state has processed.
    pub fn received(&self) -> usize {
        self.received
    }

    /// Handle an incoming ballot message from a peer node.
    ///
    /// Weaker or equal messages from a sender we have already heard from are
    /// dropped. Otherwise the message is recorded and every ballot it names
    /// is investigated, rechecking after each forced counter bump.
    pub fn handle(&mut self, sender: &ID, message: BallotMsg<V, ID>) {
        if let Some(old) = self.M.get(sender) {
            if !message.supersedes(old) {
                return;
            }
        }
        debug!(node = %self.node_id, sender = %sender, "got ballot message");
        self.received += 1;
        self.M.insert(sender.clone(), message.clone());

        loop {
            // Investigate all ballots whose state might be updated.
            match &message {
                BallotMsg::Prepare(m) => {
                    self.investigate(m.Bn, &m.Bx);
                    if let Some(px) = &m.Px {
                        self.investigate(m.Pn, px);
                    }
                    if let Some(ppx) = &m.Ppx {
                        self.investigate(m.Ppn, ppx);
                    }
                }
                BallotMsg::Confirm(m) => {
                    self.investigate(m.Hn, &m.X);
                }
                BallotMsg::Externalize(m) => {
                    for n in m.Cn..=m.Hn {
                        self.investigate(n, &m.X);
                    }
                }
            }

            if !self.maybe_next_ballot() {
                break;
            }
        }
    }

    /// Walk ballot (n, x) through the federated-voting levels it might have
    /// reached.
    pub fn investigate(&mut self, n: u32, x: &V) {
        self.maybe_accept_as_prepared(n, x);
        self.maybe_confirm_as_prepared(n, x);
        self.maybe_accept_as_committed(n, x);
        self.maybe_confirm_as_committed(n, x);
    }

    /// Recheck the working ballot itself. Lets an isolated node with a
    /// self-satisfying slice make progress without any inbound traffic.
    pub fn self_investigate(&mut self) {
        let Some(b) = self.b.clone() else {
            return;
        };
        self.investigate(b.n, &b.x);
    }

    /// Maybe accept ballot (n, x) as prepared. Returns whether the state
    /// changed.
    pub fn maybe_accept_as_prepared(&mut self, n: u32, x: &V) -> bool {
        if self.phase != Phase::Prepare {
            return false;
        }
        if n == 0 {
            return false;
        }

        // Check if we already accept this as prepared.
        if covers(&self.p, n, x) || covers(&self.pp, n, x) {
            return false;
        }

        if let Some(pp) = &self.pp {
            if pp.n >= n {
                // This is about an old ballot number; even an accept cannot
                // improve our accepted-prepared pair.
                return false;
            }
        }

        // We can accept if a quorum has voted or accepted, or if a set that
        // blocks us has accepted.
        let mut voted_or_accepted: Vec<ID> = Vec::new();
        let mut accepted: Vec<ID> = Vec::new();
        if let Some(b) = &self.b {
            if b.n >= n && b.x == *x {
                // We have voted for this.
                voted_or_accepted.push(self.node_id.clone());
            }
        }
        for (node, m) in &self.M {
            if m.accept_as_prepared(n, x) {
                accepted.push(node.clone());
                voted_or_accepted.push(node.clone());
                continue;
            }
            if m.vote_to_prepare(n, x) {
                voted_or_accepted.push(node.clone());
            }
        }

        if !meets_quorum(self, &voted_or_accepted) && !self.D.is_blocked_by(&accepted) {
            return false;
        }

        debug!(node = %self.node_id, n, x = ?x, "accepts as prepared");
        let ballot = Ballot::new(n, x);

        if let Some(b) = &self.b {
            if b.n <= n && b.x != *x {
                // Accepting this as prepared means accepting the abort of b,
                // even though we may have voted to commit it. Switch over.
                debug!(node = %self.node_id, aborted = ?b, "accepts the abort");
                self.cn = 0;
                self.b = Some(ballot.clone());
            }
        }

        // p and pp are the top two conflicting things we accept as prepared.
        match &self.p {
            None => {
                self.p = Some(ballot);
            }
            Some(p) if p.x == *x => {
                assert!(n > p.n, "should have short circuited already");
                self.p = Some(ballot);
            }
            Some(p) if n >= p.n => {
                self.pp = self.p.take();
                self.p = Some(ballot);
            }
            Some(_) => {
                // We already short circuited if it isn't worth bumping pp.
                self.pp = Some(ballot);
            }
        }

        // Accepting this prepare may force us to give up some of our votes
        // to commit.
        loop {
            if self.cn == 0 {
                break;
            }
            let bx = match &self.b {
                Some(b) => b.x.clone(),
                None => break,
            };
            if !self.accepted_abort(self.cn, &bx) {
                break;
            }
            debug!(node = %self.node_id, cn = self.cn, "accepts the abort of a commit vote");
            self.cn += 1;
            if self.cn > self.hn {
                self.cn = 0;
            }
        }

        true
    }

    /// Whether we have already accepted an abort of ballot (n, x).
    pub fn accepted_abort(&self, n: u32, x: &V) -> bool {
        if self.phase != Phase::Prepare {
            // After the prepare phase, we've accepted an abort for everything
            // incompatible with our committed value.
            return match &self.b {
                Some(b) => b.x != *x,
                None => unreachable!("the working ballot is always set past the prepare phase"),
            };
        }

        // Accepting p or pp as prepared implies accepting this abort.
        covers_incompatible(&self.p, n, x) || covers_incompatible(&self.pp, n, x)
    }

    /// Maybe confirm ballot (n, x) as prepared. Returns whether the state
    /// changed.
    pub fn maybe_confirm_as_prepared(&mut self, n: u32, x: &V) -> bool {
        if self.phase != Phase::Prepare {
            return false;
        }
        if self.hn >= n {
            // We already confirmed a ballot as prepared at least this good.
            return false;
        }

        // We confirm when a quorum accepts as prepared.
        let mut accepted: Vec<ID> = Vec::new();
        if covers(&self.p, n, x) || covers(&self.pp, n, x) {
            accepted.push(self.node_id.clone());
        }
        for (node, m) in &self.M {
            if m.accept_as_prepared(n, x) {
                accepted.push(node.clone());
            }
        }

        if !meets_quorum(self, &accepted) {
            return false;
        }

        debug!(node = %self.node_id, n, x = ?x, "confirms as prepared");

        if self.cn > 0 {
            if let Some(b) = &self.b {
                assert!(
                    b.x == *x,
                    "voting to commit {b:?} but confirmed an incompatible prepared ballot ({n}, {x:?})"
                );
            }
        }

        self.hn = n;
        self.z = Some(x.clone());

        if self.b.is_none() {
            // We weren't working on any ballot, but now we can work on this.
            self.b = Some(Ballot::new(n, x));
        }

        if self.cn == 0 {
            if let Some(b) = &self.b {
                if b.x == *x {
                    // Check if we should start voting to commit.
                    if covers_incompatible(&self.p, b.n, &b.x)
                        || covers_incompatible(&self.pp, b.n, &b.x)
                    {
                        // We have already accepted the abort of this. So no.
                    } else if b.n <= n {
                        self.cn = b.n;
                    }
                }
            }
        }
        true
    }

    /// Maybe accept ballot (n, x) as committed. Returns whether the state
    /// changed.
    pub fn maybe_accept_as_committed(&mut self, n: u32, x: &V) -> bool {
        match self.phase {
            Phase::Externalize => return false,
            Phase::Confirm => {
                if self.cn <= n && n <= self.hn {
                    // We already accept this commit.
                    return false;
                }
            }
            Phase::Prepare => {}
        }

        let mut voted_or_accepted: Vec<ID> = Vec::new();
        let mut accepted: Vec<ID> = Vec::new();

        if self.phase == Phase::Prepare {
            if let Some(b) = &self.b {
                if b.x == *x && self.cn != 0 && self.cn <= n && n <= self.hn {
                    // We vote to commit this.
                    voted_or_accepted.push(self.node_id.clone());
                }
            }
        }

        for (node, m) in &self.M {
            if m.accept_as_committed(n, x) {
                voted_or_accepted.push(node.clone());
                accepted.push(node.clone());
            } else if m.vote_to_commit(n, x) {
                voted_or_accepted.push(node.clone());
            }
        }

        if !meets_quorum(self, &voted_or_accepted) && !self.D.is_blocked_by(&accepted) {
            return false;
        }

        debug!(node = %self.node_id, n, x = ?x, "accepts as committed");

        self.phase = Phase::Confirm;
        let replace = match &self.b {
            Some(b) => b.x != *x,
            None => true,
        };
        if replace {
            // Totally replace our old target value.
            self.b = Some(Ballot::new(n, x));
            self.cn = n;
            self.hn = n;
            self.z = Some(x.clone());
        } else {
            // Just widen our range of acceptance.
            if n < self.cn {
                self.cn = n;
            }
            if n > self.hn {
                self.hn = n;
            }
        }
        true
    }

    /// Maybe confirm ballot (n, x) as committed. Returns whether the state
    /// changed.
    pub fn maybe_confirm_as_committed(&mut self, n: u32, x: &V) -> bool {
        if self.phase == Phase::Prepare {
            return false;
        }
        match &self.b {
            Some(b) if b.x == *x => {}
            _ => return false,
        }

        let mut accepted: Vec<ID> = Vec::new();
        if self.phase == Phase::Confirm {
            if self.cn <= n && n <= self.hn {
                accepted.push(self.node_id.clone());
            }
        } else if self.cn <= n && n <= self.hn {
            // We already did confirm this as committed.
            return false;
        }

        for (node, m) in &self.M {
            if m.accept_as_committed(n, x) {
                accepted.push(node.clone());
            }
        }

        if !meets_quorum(self, &accepted) {
            return false;
        }

        debug!(node = %self.node_id, n, x = ?x, "confirms as committed");

        if self.phase == Phase::Confirm {
            self.phase = Phase::Externalize;
            self.cn = n;
            self.hn = n;
        } else {
            if n < self.cn {
                self.cn = n;
            }
            if n > self.hn {
                self.hn = n;
            }
        }
        true
    }

    /// Bump the ballot counter if the nodes that could never vote for our
    /// current ballot form a blocking set. Returns whether we bumped.
    pub fn maybe_next_ballot(&mut self) -> bool {
        let (Some(z), Some(b)) = (&self.z, &self.b) else {
            return false;
        };

        // Nodes that could never vote for our ballot.
        let mut blockers: Vec<ID> = Vec::new();
        for (node, m) in &self.M {
            if !m.could_ever_vote_for(b.n, &b.x) {
                blockers.push(node.clone());
            }
        }

        if !self.D.is_blocked_by(&blockers) {
            return false;
        }

        let next = Ballot::new(b.n + 1, z);
        debug!(node = %self.node_id, old = ?b, new = ?next, "ballot cannot pass, bumping");
        self.b = Some(next);
        true
    }

    /// Seed the next-ballot value if we have none, starting a first ballot
    /// if necessary. Returns whether the state changed.
    pub fn maybe_initialize_value(&mut self, v: &V) -> bool {
        if self.z.is_some() {
            return false;
        }
        self.z = Some(v.clone());
        if self.b.is_none() {
            self.b = Some(Ballot::new(1, v));
        }
        true
    }

    /// Re-derive the next-ballot value from the nomination's prediction.
    /// Only done before any ballot has been confirmed prepared; after that
    /// the ballot protocol owns the value. Returns whether anything changed.
    pub fn maybe_update_value<VS: ValueStore<V>>(
        &mut self,
        ns: &NominationState<V, ID>,
        values: &VS,
    ) -> bool {
        if self.hn != 0 {
            // While we have a confirmed prepared ballot, we don't override
            // it based on nominations.
            return false;
        }
        if !ns.has_nomination() {
            // No idea how to set the value.
            return false;
        }
        let v = ns.predict_value(values);

        if self.z.as_ref() == Some(&v) {
            // The new value is the same as the old one.
            return false;
        }

        self.z = Some(v.clone());
        let n = match &self.b {
            None => 1,
            Some(b) => b.n + 1,
        };
        self.b = Some(Ballot { n, x: v });
        true
    }

    /// The message describing the current state. Only legal once a working
    /// ballot exists.
    pub fn message(&self, slot: SlotIndex, qs: &QuorumSlice<ID>) -> BallotMsg<V, ID> {
        let b = match &self.b {
            Some(b) => b,
            None => panic!("a ballot message requires a working ballot"),
        };

        match self.phase {
            Phase::Prepare => BallotMsg::Prepare(PrepareMsg {
                I: slot,
                Bn: b.n,
                Bx: b.x.clone(),
                Pn: self.p.as_ref().map_or(0, |p| p.n),
                Px: self.p.as_ref().map(|p| p.x.clone()),
                Ppn: self.pp.as_ref().map_or(0, |pp| pp.n),
                Ppx: self.pp.as_ref().map(|pp| pp.x.clone()),
                Cn: self.cn,
                Hn: self.hn,
                D: qs.clone(),
            }),
            Phase::Confirm => BallotMsg::Confirm(ConfirmMsg {
                I: slot,
                X: b.x.clone(),
                Pn: self.p.as_ref().map_or(0, |p| p.n),
                Cn: self.cn,
                Hn: self.hn,
                D: qs.clone(),
            }),
            Phase::Externalize => BallotMsg::Externalize(ExternalizeMsg {
                I: slot,
                X: b.x.clone(),
                Cn: self.cn,
                Hn: self.hn,
                D: qs.clone(),
            }),
        }
    }

    /// Panic if the state contradicts itself: an inverted commit range,
    /// compatible p and pp, a live commit vote whose abort we accepted, or a
    /// working ballot that moved backwards onto a different value.
    pub fn assert_valid(&mut self) {
        assert!(self.cn <= self.hn, "cn must be <= hn ({} > {})", self.cn, self.hn);

        if let (Some(p), Some(pp)) = (&self.p, &self.pp) {
            assert!(
                p.x != pp.x,
                "p and pPrime must be incompatible: {p:?} vs {pp:?}"
            );
        }

        if self.phase == Phase::Prepare {
            if let Some(b) = &self.b {
                if let Some(p) = &self.p {
                    assert!(
                        !(b.x != p.x && self.cn != 0 && self.cn <= p.n),
                        "the vote to commit should have been aborted: b={b:?} cn={} p={p:?}",
                        self.cn
                    );
                }
                if let Some(pp) = &self.pp {
                    assert!(
                        !(b.x != pp.x && self.cn != 0 && self.cn <= pp.n),
                        "the vote to commit should have been aborted: b={b:?} cn={} pPrime={pp:?}",
                        self.cn
                    );
                }

                if let Some(last) = &self.last {
                    assert!(
                        !(last.x != b.x && last.n > b.n),
                        "ballot monotonicity violation: {last:?} then {b:?}"
                    );
                }
                self.last = Some(b.clone());
            }
        }
    }
}

impl<V: Value, ID: GenericNodeId> SliceSource<ID> for BallotState<V, ID> {
    fn node_id(&self) -> &ID {
        &self.node_id
    }

    fn slice_of(&self, node: &ID) -> Option<&QuorumSlice<ID>> {
        if node == &self.node_id {
            return Some(&self.D);
        }
        self.M.get(node).map(|m| m.quorum_slice())
    }
}
