//! # beacon-client
//!
//! Client library for the beacon naming cluster. The centerpiece is the
//! [`reactor::HostReactor`], which keeps a local view of every
//! subscribed service:
//!
//! - polled through [`api::NamingApi`] with bounded backoff,
//! - patched in place by the UDP [`push_receiver`],
//! - diffed on every answer, firing [`event::InstancesChangeEvent`]s,
//! - persisted through the [`cache`] and served from [`failover`]
//!   snapshots when the upstream is unavailable,
//! - while the [`beat::BeatReactor`] keeps registered instances alive.
//!
//! ```ignore
//! let reactor = HostReactor::new(api, ClientConfig::default()).await?;
//! reactor.subscribe("DEFAULT_GROUP@@orders", "", listener).await?;
//! let info = reactor.get_service_info("DEFAULT_GROUP@@orders", "").await?;
//! ```

pub mod api;
pub mod beat;
pub mod cache;
pub mod config;
pub mod event;
pub mod failover;
pub mod push_receiver;
pub mod reactor;

pub use api::BeatResult;
pub use api::NamingApi;
pub use beat::BeatReactor;
pub use config::ClientConfig;
pub use event::EventListener;
pub use event::InstancesChangeEvent;
pub use event::InstancesChangeNotifier;
pub use failover::FailoverReactor;
pub use push_receiver::PushReceiver;
pub use reactor::HostReactor;

#[cfg(test)]
mod event_test;
#[cfg(test)]
mod failover_test;
#[cfg(test)]
mod push_receiver_test;
