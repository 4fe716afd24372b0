//! Collective operation descriptors and the registry of their implementations.
//!
//! A [`params::CollectiveParams`] tree describes one collective (group,
//! instance, and this device's role). Implementations are registered by name
//! in a [`registry::CollectiveRegistry`]; each lookup builds a fresh
//! implementation while the param resolver for a name is built once and
//! shared.

pub mod algorithms;
pub mod config;
pub mod params;
pub mod registry;

pub use params::{CollectiveParams, ParamsError};
pub use registry::{CollectiveImplementation, CollectiveRegistry, RegistryError};
