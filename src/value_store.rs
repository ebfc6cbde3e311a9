// Copyright (c) 2018-2022 The MobileCoin Foundation

//! The interface the engine requires from the application's value substrate.
use crate::core_types::Value;

/// Application-specific storage and semantics for slot values.
///
/// The engine treats values as opaque; everything it needs to know about
/// them goes through this trait. The chain owns the store, lends it
/// immutably to the slot in progress, and mutates it only when a slot
/// finalizes.
pub trait ValueStore<V: Value> {
    /// Deterministically merge values from distinct nominators into one
    /// composite. Must behave as an associative, commutative, idempotent
    /// operation given the same input multiset on every node.
    fn combine(&self, values: &[V]) -> V;

    /// Whether this node is willing to vote to nominate `value`.
    fn validate(&self, value: &V) -> bool;

    /// Whether the store has the data it needs to finalize `value`. Until it
    /// does, an externalized slot stays current and the chain does not
    /// advance.
    fn can_finalize(&self, value: &V) -> bool;

    /// Apply an externalized value. Called exactly once per slot, after
    /// `can_finalize` returned true. Finalizing a value the store has no
    /// data for is a programming error and panics.
    fn finalize(&mut self, value: &V);

    /// A value this node would like to nominate, if it has one.
    fn suggest_value(&self) -> Option<V>;
}
