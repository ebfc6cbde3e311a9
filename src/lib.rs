// Copyright (c) 2018-2022 The MobileCoin Foundation

#![doc = include_str!("../README.md")]
#![allow(non_snake_case)]
#![deny(missing_docs)]

pub mod ballot;
pub mod block;
pub mod chain;
pub mod core_types;
pub mod keypair;
pub mod msg;
pub mod nomination;
pub mod quorum_set;
pub mod test_utils;
pub mod value_store;

#[doc(inline)]
pub use crate::{
    ballot::BallotState,
    block::Block,
    chain::Chain,
    core_types::{Ballot, GenericNodeId, Phase, SlotIndex, Value},
    keypair::{verify, EnvelopeError, KeyPair, SignedEnvelope},
    msg::{BallotMsg, ConfirmMsg, ExternalizeMsg, InfoMsg, Message, NominateMsg, PrepareMsg},
    nomination::NominationState,
    quorum_set::{meets_quorum, QuorumSlice, SliceSource},
    value_store::ValueStore,
};
