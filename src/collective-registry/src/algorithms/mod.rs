//! Built-in param resolvers.
//!
//! These only plan how a collective is laid out over the group (which ranks
//! form each subdivision and where this device sits in it). Moving data is
//! left to the transports.

use crate::config::CollectivesConfig;
use crate::params::{CollectiveParams, CollectiveType, ParamsError};
use crate::registry::{CollectiveImplementation, CollectiveRegistry, RegistryError};

pub mod broadcast;
pub mod permute;
pub mod ring;

pub use broadcast::HierarchicalTreeBroadcaster;
pub use permute::Permuter;
pub use ring::{RingGatherer, RingReducer};

pub const RING_REDUCE: &str = "RingReduce";
pub const RING_GATHER: &str = "RingGather";
pub const HIERARCHICAL_TREE_BROADCAST: &str = "HierarchicalTreeBroadcast";
pub const PERMUTE: &str = "Permute";

pub const BUILTIN_COLLECTIVES: [&str; 4] = [
    RING_REDUCE,
    RING_GATHER,
    HIERARCHICAL_TREE_BROADCAST,
    PERMUTE,
];

fn check_type(
    resolver: &dyn CollectiveImplementation,
    params: &CollectiveParams,
    expected: CollectiveType,
) -> Result<(), ParamsError> {
    if params.instance.ty != expected {
        return Err(ParamsError::UnexpectedType {
            resolver: resolver.name().to_string(),
            expected,
            found: params.instance.ty,
        });
    }
    Ok(())
}

/// Registers the built-in collectives enabled in `config`, all of them by default.
pub fn register_builtin(
    registry: &CollectiveRegistry,
    config: &CollectivesConfig,
) -> Result<(), RegistryError> {
    let enabled: Vec<&str> = match &config.enabled {
        Some(names) => names.iter().map(String::as_str).collect(),
        None => BUILTIN_COLLECTIVES.to_vec(),
    };
    for name in enabled {
        match name {
            RING_REDUCE => {
                let offsets = config.ring_subdiv_offsets.clone();
                registry.register(name, move || -> Box<dyn CollectiveImplementation> {
                    Box::new(RingReducer::new(offsets.clone()))
                })?
            }
            RING_GATHER => registry.register(name, || -> Box<dyn CollectiveImplementation> {
                Box::new(RingGatherer)
            })?,
            HIERARCHICAL_TREE_BROADCAST => {
                registry.register(name, || -> Box<dyn CollectiveImplementation> {
                    Box::new(HierarchicalTreeBroadcaster)
                })?
            }
            PERMUTE => registry.register(name, || -> Box<dyn CollectiveImplementation> {
                Box::new(Permuter)
            })?,
            other => {
                return Err(RegistryError::NoSuchImplementation {
                    name: other.to_string(),
                })
            }
        }
    }
    log::info!("Registered collectives: {:?}", registry.names());
    Ok(())
}
