//! # beacon-server
//!
//! Server runtime of the beacon naming cluster:
//!
//! - [`distro::DistroConsistencyService`] — the sharded, eventually
//!   consistent replication protocol for ephemeral data,
//! - [`registry::ServiceRegistry`] — service containers and the
//!   register/deregister/beat mutation paths,
//! - [`beat::ClientBeatCheckTask`] — the per-service liveness sweep,
//! - [`transport::DistroTransport`] / [`push::ServicePush`] — the seams
//!   the embedding application implements.
//!
//! A node wires these together roughly as:
//!
//! ```ignore
//! let consistency = DistroConsistencyService::new(
//!     config.clone(), mapper.clone(), store, listeners, transport, shutdown.clone(),
//! );
//! let registry = ServiceRegistry::new(
//!     consistency.clone(), config, mapper, events, push, shutdown,
//! );
//! registry.start();
//! consistency.start();
//! ```

pub mod beat;
pub mod distro;
pub mod push;
pub mod registry;
pub mod service;
pub mod transport;

pub use beat::ClientBeatCheckTask;
pub use beat::InstanceDeleteRequest;
pub use beat::InstanceOperator;
pub use distro::DistroConsistencyService;
pub use distro::SyncScheduler;
pub use push::NoopPush;
pub use push::ServicePush;
pub use registry::BeatResponse;
pub use registry::ServiceRegistry;
pub use service::Service;
pub use transport::DistroTransport;
