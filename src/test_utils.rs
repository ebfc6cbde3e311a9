// Copyright (c) 2018-2022 The MobileCoin Foundation

//! Utilities for federated agreement tests.

// We allow dead code because not all integration tests use all of the common
// code. https://github.com/rust-lang/rust/issues/46379
#![allow(dead_code)]

use crate::{quorum_set::QuorumSlice, value_store::ValueStore};
use std::collections::BTreeSet;

/// A value store over comma-joined strings.
///
/// Combining splits every input on commas and re-joins the sorted, deduped
/// union, which is associative, commutative, and idempotent. Every value
/// validates and finalizes.
pub struct TestValueStore {
    suggestion: Option<String>,
    finalized: Vec<String>,
}

impl TestValueStore {
    /// A store suggesting `value_<n>`, or nothing when `n` is 0.
    pub fn new(n: u32) -> Self {
        Self {
            suggestion: (n > 0).then(|| format!("value_{n}")),
            finalized: Vec::new(),
        }
    }

    /// Every value finalized so far, in order.
    pub fn finalized(&self) -> &[String] {
        &self.finalized
    }
}

impl ValueStore<String> for TestValueStore {
    fn combine(&self, values: &[String]) -> String {
        assert!(!values.is_empty(), "combining an empty list of values");
        let parts: BTreeSet<&str> = values.iter().flat_map(|v| v.split(',')).collect();
        parts.into_iter().collect::<Vec<_>>().join(",")
    }

    fn validate(&self, _value: &String) -> bool {
        true
    }

    fn can_finalize(&self, _value: &String) -> bool {
        true
    }

    fn finalize(&mut self, value: &String) {
        self.finalized.push(value.clone());
    }

    fn suggest_value(&self) -> Option<String> {
        self.suggestion.clone()
    }
}

/// A quorum slice over string node ids.
pub fn test_slice(names: &[&str], threshold: u32) -> QuorumSlice<String> {
    QuorumSlice::new(names.iter().map(|s| s.to_string()).collect(), threshold)
}

/// A cluster of `size` nodes sharing one slice that requires agreement from
/// more than two thirds of them. Returns the slice and the node names.
pub fn test_cluster_slice(size: usize) -> (QuorumSlice<String>, Vec<String>) {
    let names: Vec<String> = (0..size).map(|i| format!("node_{i}")).collect();
    let threshold = (2 * size / 3 + 1) as u32;
    (
        QuorumSlice::new(names.clone(), threshold),
        names,
    )
}
