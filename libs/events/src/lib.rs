//! # waggle-events
//!
//! Shared entity types and push-channel event definitions for the waggle
//! coordination hub.
//!
//! Every record that crosses an actor boundary (over HTTP, over the push
//! channel, or into a store's JSON columns) is defined here so the hub, its
//! tests, and any client agree on one wire shape.

mod push;
mod types;

pub use push::{event_types, Push};
pub use types::*;
