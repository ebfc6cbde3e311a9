// Copyright (c) 2018-2022 The MobileCoin Foundation

//! Messages used by federated agreement.
//!
//! Five kinds travel between nodes: nomination, the three ballot-phase
//! messages, and the catch-up request. The single-letter wire field names
//! line up with the protocol paper.
use crate::{
    core_types::{GenericNodeId, Phase, SlotIndex, Value},
    quorum_set::QuorumSlice,
};
use core::cmp::Ordering;
use serde::{Deserialize, Serialize};

/// Nomination-phase message: the values the sender has voted to nominate and
/// the values it has accepted as nominated. Both lists only ever grow.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct NominateMsg<V: Value, ID: GenericNodeId = String> {
    /// Slot being nominated for.
    pub I: SlotIndex,

    /// Values the sender has voted to nominate.
    pub Nom: Vec<V>,

    /// Values the sender has accepted as nominated.
    pub Acc: Vec<V>,

    /// The sender's quorum slice.
    pub D: QuorumSlice<ID>,
}

/// Prepare-phase message: the sender's full prepare state.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct PrepareMsg<V: Value, ID: GenericNodeId = String> {
    /// Slot.
    pub I: SlotIndex,

    /// Current ballot counter.
    pub Bn: u32,

    /// Current ballot value.
    pub Bx: V,

    /// Counter of the highest ballot accepted as prepared, or 0.
    pub Pn: u32,

    /// Value of the highest ballot accepted as prepared, if any.
    pub Px: Option<V>,

    /// Counter of the highest accepted-prepared ballot incompatible with
    /// (`Pn`, `Px`), or 0.
    pub Ppn: u32,

    /// Value of that incompatible ballot, if any.
    pub Ppx: Option<V>,

    /// Low end of the counter range the sender votes to commit, or 0 when it
    /// votes to commit nothing.
    pub Cn: u32,

    /// High end of that range; also the highest counter confirmed as
    /// prepared.
    pub Hn: u32,

    /// The sender's quorum slice.
    pub D: QuorumSlice<ID>,
}

impl<V: Value, ID: GenericNodeId> PrepareMsg<V, ID> {
    fn p_key(&self) -> Option<(u32, &V)> {
        self.Px.as_ref().map(|x| (self.Pn, x))
    }

    fn pp_key(&self) -> Option<(u32, &V)> {
        self.Ppx.as_ref().map(|x| (self.Ppn, x))
    }
}

/// Confirm-phase message: the sender has accepted a commit of `X` for every
/// counter in [`Cn`, `Hn`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ConfirmMsg<V: Value, ID: GenericNodeId = String> {
    /// Slot.
    pub I: SlotIndex,

    /// The committed value.
    pub X: V,

    /// Counter of the highest ballot accepted as prepared.
    pub Pn: u32,

    /// Low end of the accepted-committed counter range.
    pub Cn: u32,

    /// High end of the accepted-committed counter range.
    pub Hn: u32,

    /// The sender's quorum slice.
    pub D: QuorumSlice<ID>,
}

/// Externalize message: the terminal state. The sender has confirmed a
/// commit of `X` for every counter in [`Cn`, `Hn`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct ExternalizeMsg<V: Value, ID: GenericNodeId = String> {
    /// Slot.
    pub I: SlotIndex,

    /// The externalized value.
    pub X: V,

    /// Low end of the confirmed-committed counter range.
    pub Cn: u32,

    /// High end of the confirmed-committed counter range.
    pub Hn: u32,

    /// The sender's quorum slice.
    pub D: QuorumSlice<ID>,
}

/// Catch-up request: asks the receiver for the externalize message it
/// archived for slot `I`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct InfoMsg {
    /// Slot the sender wants to catch up on.
    pub I: SlotIndex,
}

/// Everything a node can say, as one exhaustive union. The `T` tag on the
/// wire distinguishes the kinds.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "T")]
#[serde(bound = "")]
pub enum Message<V: Value, ID: GenericNodeId = String> {
    /// Nomination-phase message.
    #[serde(rename = "N")]
    Nominate(NominateMsg<V, ID>),

    /// Prepare-phase ballot message.
    #[serde(rename = "P")]
    Prepare(PrepareMsg<V, ID>),

    /// Confirm-phase ballot message.
    #[serde(rename = "C")]
    Confirm(ConfirmMsg<V, ID>),

    /// Externalize ballot message.
    #[serde(rename = "X")]
    Externalize(ExternalizeMsg<V, ID>),

    /// Catch-up request.
    #[serde(rename = "I")]
    Info(InfoMsg),
}

impl<V: Value, ID: GenericNodeId> Message<V, ID> {
    /// The slot this message concerns.
    pub fn slot(&self) -> SlotIndex {
        match self {
            Message::Nominate(m) => m.I,
            Message::Prepare(m) => m.I,
            Message::Confirm(m) => m.I,
            Message::Externalize(m) => m.I,
            Message::Info(m) => m.I,
        }
    }

    /// The sender's declared quorum slice. Catch-up requests carry none.
    pub fn quorum_slice(&self) -> Option<&QuorumSlice<ID>> {
        match self {
            Message::Nominate(m) => Some(&m.D),
            Message::Prepare(m) => Some(&m.D),
            Message::Confirm(m) => Some(&m.D),
            Message::Externalize(m) => Some(&m.D),
            Message::Info(_) => None,
        }
    }
}

/// The subset of messages the ballot state machine consumes and produces.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BallotMsg<V: Value, ID: GenericNodeId = String> {
    /// Prepare-phase message.
    Prepare(PrepareMsg<V, ID>),

    /// Confirm-phase message.
    Confirm(ConfirmMsg<V, ID>),

    /// Externalize message.
    Externalize(ExternalizeMsg<V, ID>),
}

impl<V: Value, ID: GenericNodeId> From<BallotMsg<V, ID>> for Message<V, ID> {
    fn from(src: BallotMsg<V, ID>) -> Self {
        match src {
            BallotMsg::Prepare(m) => Message::Prepare(m),
            BallotMsg::Confirm(m) => Message::Confirm(m),
            BallotMsg::Externalize(m) => Message::Externalize(m),
        }
    }
}

impl<V: Value, ID: GenericNodeId> BallotMsg<V, ID> {
    /// The phase the sender was in.
    pub fn phase(&self) -> Phase {
        match self {
            BallotMsg::Prepare(_) => Phase::Prepare,
            BallotMsg::Confirm(_) => Phase::Confirm,
            BallotMsg::Externalize(_) => Phase::Externalize,
        }
    }

    /// The slot this message concerns.
    pub fn slot(&self) -> SlotIndex {
        match self {
            BallotMsg::Prepare(m) => m.I,
            BallotMsg::Confirm(m) => m.I,
            BallotMsg::Externalize(m) => m.I,
        }
    }

    /// The sender's declared quorum slice.
    pub fn quorum_slice(&self) -> &QuorumSlice<ID> {
        match self {
            BallotMsg::Prepare(m) => &m.D,
            BallotMsg::Confirm(m) => &m.D,
            BallotMsg::Externalize(m) => &m.D,
        }
    }

    /// Does the sender accept ballot (n, x) as prepared?
    ///
    /// A prepare message accepts as prepared everything covered by its p or
    /// pPrime; a confirm message accepts every compatible ballot up to its
    /// hn; an externalize message accepts every compatible ballot.
    pub fn accept_as_prepared(&self, n: u32, x: &V) -> bool {
        match self {
            BallotMsg::Prepare(m) => {
                if let Some(px) = &m.Px {
                    if m.Pn >= n && px == x {
                        return true;
                    }
                }
                if let Some(ppx) = &m.Ppx {
                    if m.Ppn >= n && ppx == x {
                        return true;
                    }
                }
                false
            }
            BallotMsg::Confirm(m) => m.X == *x && n <= m.Hn,
            BallotMsg::Externalize(m) => m.X == *x,
        }
    }

    /// Does the sender vote to prepare (n, x)?
    ///
    /// A prepare of ballot b is a vote to prepare every compatible ballot
    /// with a counter at most b's. Past the prepare phase the sender is
    /// committed to its value and votes to prepare it at every counter.
    pub fn vote_to_prepare(&self, n: u32, x: &V) -> bool {
        match self {
            BallotMsg::Prepare(m) => m.Bn >= n && m.Bx == *x,
            BallotMsg::Confirm(m) => m.X == *x,
            BallotMsg::Externalize(m) => m.X == *x,
        }
    }

    /// Does the sender accept (n, x) as committed?
    pub fn accept_as_committed(&self, n: u32, x: &V) -> bool {
        match self {
            BallotMsg::Prepare(_) => false,
            BallotMsg::Confirm(m) => m.X == *x && m.Cn <= n && n <= m.Hn,
            BallotMsg::Externalize(m) => m.X == *x && m.Cn <= n && n <= m.Hn,
        }
    }

    /// Does the sender vote to commit (n, x)?
    pub fn vote_to_commit(&self, n: u32, x: &V) -> bool {
        match self {
            BallotMsg::Prepare(m) => {
                m.Cn != 0 && m.Bx == *x && m.Cn <= n && n <= m.Hn
            }
            BallotMsg::Confirm(m) => m.X == *x && n >= m.Cn,
            BallotMsg::Externalize(m) => m.X == *x && n >= m.Cn,
        }
    }

    /// Could the sender, given its current state, ever vote for (n, x)?
    ///
    /// A prepare sender whose counter has reached or passed n while holding
    /// an incompatible value never can: counters only rise, and a later
    /// compatible ballot at a counter >= n would be required. Senders past
    /// the prepare phase are locked to their value.
    pub fn could_ever_vote_for(&self, n: u32, x: &V) -> bool {
        match self {
            BallotMsg::Prepare(m) => !(m.Bn >= n && m.Bx != *x),
            BallotMsg::Confirm(m) => m.X == *x,
            BallotMsg::Externalize(m) => m.X == *x,
        }
    }

    /// Whether this message carries strictly more information than `old`
    /// from the same sender. Anything that does not is dropped as stale or
    /// duplicate.
    pub fn supersedes(&self, old: &Self) -> bool {
        dominance_cmp(self, old) == Ordering::Greater
    }
}

/// Order two ballot messages from one sender by how far along the sender
/// was: by phase first, then by the fields that only move one way within a
/// phase. In prepare, the working ballot and the accepted-prepared pair only
/// rise and hn only rises; in confirm and externalize, hn rises while cn may
/// widen downward, so a wider range ranks higher.
pub fn dominance_cmp<V: Value, ID: GenericNodeId>(
    a: &BallotMsg<V, ID>,
    b: &BallotMsg<V, ID>,
) -> Ordering {
    match (a, b) {
        (BallotMsg::Prepare(a), BallotMsg::Prepare(b)) => (a.Bn, &a.Bx)
            .cmp(&(b.Bn, &b.Bx))
            .then_with(|| a.p_key().cmp(&b.p_key()))
            .then_with(|| a.pp_key().cmp(&b.pp_key()))
            .then(a.Hn.cmp(&b.Hn))
            .then(a.Cn.cmp(&b.Cn)),
        (BallotMsg::Confirm(a), BallotMsg::Confirm(b)) => a
            .Pn
            .cmp(&b.Pn)
            .then(a.Hn.cmp(&b.Hn))
            .then(b.Cn.cmp(&a.Cn))
            .then_with(|| a.X.cmp(&b.X)),
        (BallotMsg::Externalize(a), BallotMsg::Externalize(b)) => a
            .Hn
            .cmp(&b.Hn)
            .then(b.Cn.cmp(&a.Cn))
            .then_with(|| a.X.cmp(&b.X)),
        _ => a.phase().cmp(&b.phase()),
    }
}
