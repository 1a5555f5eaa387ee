//! waggle-hub: the coordination hub for waggle agent swarms.
//!
//! A hub hosts three kinds of strictly-serialized, individually-addressed
//! actor instances (one global coordinator, one per agent id, one per
//! lockable resource path), each with its own durable store, reachable over
//! HTTP and a per-instance push channel. The soul/body lifecycle protocol
//! layers token-budget-aware identity migration on top of the same cells.

pub mod actors;
pub mod api;
pub mod config;
pub mod fanout;
pub mod lifecycle;
pub mod registry;
pub mod state;
pub mod store;
