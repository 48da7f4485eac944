//! Data model shared by the server registry and the client view.

mod instance;
mod service;
mod service_info;

pub use instance::*;
pub use service::*;
pub use service_info::*;

#[cfg(test)]
mod service_info_test;
