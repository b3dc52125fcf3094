//! Inference sequence orchestration.
//!
//! The module tree follows the flow of a run: a [`facade`] call allocates a
//! run over a [`state`], routes it through [`mapping`] to an agent whose
//! monitored [`tools`] come from the [`registry`], and drives it with the
//! [`runner`] over the [`steps`] set. Everything observable lands on the
//! [`event_bus`] and reaches observers through the [`transport`]; the
//! [`rendezvous`] lets a running step wait for one of them.

pub mod concept;
pub mod config;
pub mod event;
pub mod event_bus;
pub mod facade;
pub mod grouper;
pub mod mapping;
pub mod monitor;
pub mod quantifier;
pub mod reference;
pub mod registry;
pub mod rendezvous;
pub mod runner;
pub mod sanitize;
pub mod state;
pub mod steps;
pub mod tools;
pub mod transport;
