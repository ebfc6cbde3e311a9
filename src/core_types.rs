// Copyright (c) 2018-2022 The MobileCoin Foundation

//! Core types for federated Byzantine agreement.
use core::{
    cmp::Ordering,
    fmt::{Debug, Display},
    hash::Hash,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// A generic node identifier.
///
/// In production the identifier is the base64 encoding of the node's public
/// signing key, so that a message envelope can be verified against the sender
/// it claims to come from.
pub trait GenericNodeId:
    Clone + Debug + Display + Eq + PartialEq + Ord + PartialOrd + Hash + Serialize + DeserializeOwned
{
}

impl<T> GenericNodeId for T where
    T: Clone
        + Debug
        + Display
        + Eq
        + PartialEq
        + Ord
        + PartialOrd
        + Hash
        + Serialize
        + DeserializeOwned
{
}

/// Slot index. One value is externalized per slot.
pub type SlotIndex = u64;

/// The value on which to consense.
///
/// Values are opaque to the engine; the total order is only used to break
/// ties deterministically across nodes.
pub trait Value:
    Clone + Debug + Eq + PartialEq + Ord + PartialOrd + Hash + Send + Serialize + DeserializeOwned + 'static
{
}

impl<T> Value for T where
    T: Clone
        + Debug
        + Eq
        + PartialEq
        + Ord
        + PartialOrd
        + Hash
        + Send
        + Serialize
        + DeserializeOwned
        + 'static
{
}

/// The phases of the ballot protocol. A slot only moves forward through them.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Voting to prepare a ballot, i.e. to abort anything incompatible below it.
    Prepare,

    /// A commit has been accepted; voting to confirm it.
    Confirm,

    /// The commit is confirmed. Terminal.
    Externalize,
}

/// The ballot contains the value on which to consense.
///
/// The balloting protocol centers around successively higher ballots
/// which are moving through the phases of the federated voting.
///
/// Ballots are totally ordered, with "counter" more significant than "value."
#[derive(Hash, Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Ballot<V: Value> {
    /// Counter. Ballot counters start at 1; 0 never names a real ballot.
    pub n: u32,

    /// Value.
    pub x: V,
}

impl<V: Value> Ballot<V> {
    /// Create a new Ballot with the given counter and value.
    pub fn new(n: u32, x: &V) -> Self {
        Ballot { n, x: x.clone() }
    }

    /// Two ballots are compatible iff they carry equal values.
    pub fn compatible(&self, other: &Self) -> bool {
        self.x == other.x
    }
}

// Ballots are totally ordered with `n` more significant than `x`.
impl<V: Value> Ord for Ballot<V> {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.n != other.n {
            return self.n.cmp(&other.n);
        }

        self.x.cmp(&other.x)
    }
}

impl<V: Value> PartialOrd for Ballot<V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
