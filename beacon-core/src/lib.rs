//! # beacon-core
//!
//! Data model and replication primitives shared by the beacon naming
//! server and client:
//!
//! - the composite datum [`key`] codec,
//! - the [`Instance`]/[`Instances`]/[`ServiceMeta`]/[`ServiceInfo`] model,
//! - the [`Datum`] replication unit and [`RecordListener`] seam,
//! - the [`DistroMapper`] service-to-owner mapping,
//! - the per-key [`DataStore`] and the change [`Notifier`],
//! - configuration and the error hierarchy.
//!
//! Everything here is transport-agnostic; the server and client crates
//! supply networking through their own trait seams.

pub mod config;
pub mod datum;
pub mod errors;
pub mod event;
pub mod key;
pub mod mapper;
pub mod model;
pub mod notifier;
pub mod store;
pub mod utils;

pub use config::*;
pub use datum::*;
pub use errors::*;
pub use event::*;
pub use mapper::*;
pub use model::*;
pub use notifier::*;
pub use store::*;

#[cfg(test)]
mod datum_test;
#[cfg(test)]
mod errors_test;
#[cfg(test)]
mod store_test;
