// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Authoritative intent model and realization pipeline for the EVPN gateway.
//!
//! User intent enters through [`db::IntentDb`], is persisted in an
//! [`objstore::Store`] and realized asynchronously: every committed change
//! enqueues a task that the [`taskmanager::TaskManager`] drives through the
//! per-kind stage list, publishing to the subsystem modules registered in the
//! [`subscribe::SubscriberTable`].

/* intent objects and their specs */
pub mod objects;

/* per-stage realization status */
pub mod status;

/* subscriber registry and module-facing contract */
pub mod subscribe;

/* realization work queue */
pub mod taskqueue;

/* authoritative database */
pub mod db;

/* task execution loop */
pub mod taskmanager;

mod errors;
pub use errors::{ApiError, ApiResult};
