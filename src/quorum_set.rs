// Copyright (c) 2018-2022 The MobileCoin Foundation

//! The quorum slice is the essential unit of trust.
//!
//! A quorum slice declares which peers a node depends on, as a flat member
//! list with a uniform k-of-n threshold. A set of nodes is a quorum when it
//! contains the local node and satisfies the slice of every node in the set.
use crate::core_types::GenericNodeId;
use serde::{Deserialize, Serialize};

/// A node's declaration of whom it trusts: a member list (including the node
/// itself) and how many of those members must agree.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct QuorumSlice<ID: GenericNodeId = String> {
    /// Members, including the declaring node.
    #[serde(rename = "Members")]
    pub members: Vec<ID>,

    /// Threshold (how many members must agree).
    #[serde(rename = "Threshold")]
    pub threshold: u32,
}

impl<ID: GenericNodeId> QuorumSlice<ID> {
    /// Create a new quorum slice.
    pub fn new(members: Vec<ID>, threshold: u32) -> Self {
        let slice = Self { members, threshold };
        assert!(slice.is_valid(), "invalid quorum slice: {slice:?}");
        slice
    }

    /// Check that the threshold is meaningful: 1 <= threshold <= |members|.
    pub fn is_valid(&self) -> bool {
        self.threshold >= 1 && self.threshold as usize <= self.members.len()
    }

    /// Whether enough of this slice's members appear in `nodes` to meet the
    /// threshold.
    pub fn satisfied_by(&self, nodes: &[ID]) -> bool {
        let count = self.members.iter().filter(|m| nodes.contains(m)).count();
        count as u32 >= self.threshold
    }

    /// Whether `nodes` is v-blocking for the declaring node: it overlaps every
    /// subset of the members that could meet the threshold.
    ///
    /// "A message reaches blocking threshold at v when the number of
    /// validators making the statement exceeds n-k." p.9 of the
    /// [IETF draft](https://tools.ietf.org/pdf/draft-mazieres-dinrg-scp-04.pdf).
    pub fn is_blocked_by(&self, nodes: &[ID]) -> bool {
        let count = self.members.iter().filter(|m| nodes.contains(m)).count();
        count as u32 > self.members.len() as u32 - self.threshold
    }
}

/// Both the nomination state and the ballot state answer quorum questions
/// about sets that include the local node, so each exposes its own identity
/// and every slice it has learned through the same interface.
pub trait SliceSource<ID: GenericNodeId> {
    /// The local node id.
    fn node_id(&self) -> &ID;

    /// The slice declared by `node`, if one has been learned. The local
    /// node's own slice is always known.
    fn slice_of(&self, node: &ID) -> Option<&QuorumSlice<ID>>;
}

/// Whether `nodes` is a quorum from the perspective of `state`: it contains
/// the local node and the declared slice of every node in the set is
/// satisfied within the set.
///
/// Nodes with no declared slice sink the check. In practice candidate sets
/// are built from received messages, which always carry the sender's slice,
/// so an unknown node can appear in a vote tally but never survives into a
/// quorum.
pub fn meets_quorum<ID: GenericNodeId, S: SliceSource<ID>>(state: &S, nodes: &[ID]) -> bool {
    if !nodes.contains(state.node_id()) {
        return false;
    }
    nodes.iter().all(|node| {
        state
            .slice_of(node)
            .map_or(false, |slice| slice.satisfied_by(nodes))
    })
}
