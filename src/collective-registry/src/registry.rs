use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

use crate::params::{CollectiveParams, ParamsError};

/// A concrete collective implementation.
///
/// The registry hands out a fresh instance per [`CollectiveRegistry::lookup`],
/// and keeps one shared instance per name as the param resolver for that
/// collective family. Any state a resolver caches across calls should use
/// interior mutability.
pub trait CollectiveImplementation: Send + Sync {
    fn name(&self) -> &str;
    // Fill in the implementation-specific parts of the params
    // (subdivision plan, per-subdivision ranks).
    fn initialize_collective_params(
        &self,
        params: &mut CollectiveParams,
    ) -> Result<(), ParamsError>;
}

pub type Factory = Arc<dyn Fn() -> Box<dyn CollectiveImplementation> + Send + Sync>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Already registered collective {name}")]
    AlreadyRegistered { name: String },
    #[error("No such collective implementation: {name}")]
    NoSuchImplementation { name: String },
    #[error("No param resolver for: {name}")]
    NoParamResolver { name: String },
}

impl RegistryError {
    pub fn name(&self) -> &str {
        match self {
            RegistryError::AlreadyRegistered { name }
            | RegistryError::NoSuchImplementation { name }
            | RegistryError::NoParamResolver { name } => name,
        }
    }
}

pub struct RegistrationInfo {
    pub name: String,
    pub factory: Factory,
    pub param_resolver: Arc<dyn CollectiveImplementation>,
}

impl fmt::Debug for RegistrationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationInfo")
            .field("name", &self.name)
            .field("param_resolver", &self.param_resolver.name())
            .finish()
    }
}

/// Name-keyed directory of collective implementations.
///
/// Created once at start-up and shared by reference (or behind an `Arc`).
/// Registration and both lookups run under the same lock, so every operation
/// observes all registrations that completed before it.
#[derive(Default)]
pub struct CollectiveRegistry {
    registrations: Mutex<Vec<RegistrationInfo>>,
}

impl CollectiveRegistry {
    pub fn new() -> Self {
        CollectiveRegistry {
            registrations: Mutex::new(Vec::new()),
        }
    }

    // a panicking factory never leaves a half-installed entry behind,
    // so the table is still consistent after poisoning
    fn registrations(&self) -> MutexGuard<'_, Vec<RegistrationInfo>> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `factory` under `name`.
    ///
    /// The factory is invoked once right away to build the param resolver for
    /// `name`. It runs under the registry lock and must not call back into
    /// the registry. Registering a name twice fails and keeps the first entry.
    pub fn register<F>(&self, name: impl Into<String>, factory: F) -> Result<(), RegistryError>
    where
        F: Fn() -> Box<dyn CollectiveImplementation> + Send + Sync + 'static,
    {
        let name = name.into();
        let mut registrations = self.registrations();
        if registrations.iter().any(|reg| reg.name == name) {
            log::warn!("Collective {} is already registered", name);
            return Err(RegistryError::AlreadyRegistered { name });
        }
        let factory: Factory = Arc::new(factory);
        let param_resolver = Arc::from(factory());
        log::debug!("Registered collective {}", name);
        registrations.push(RegistrationInfo {
            name,
            factory,
            param_resolver,
        });
        Ok(())
    }

    /// Returns a new implementation instance for `name`.
    pub fn lookup(&self, name: &str) -> Result<Box<dyn CollectiveImplementation>, RegistryError> {
        let registrations = self.registrations();
        match registrations.iter().find(|reg| reg.name == name) {
            Some(reg) => {
                log::trace!("Instantiating collective {}", name);
                Ok((reg.factory)())
            }
            None => Err(RegistryError::NoSuchImplementation {
                name: name.to_string(),
            }),
        }
    }

    /// Returns the param resolver created when `name` was registered.
    pub fn lookup_param_resolver(
        &self,
        name: &str,
    ) -> Result<Arc<dyn CollectiveImplementation>, RegistryError> {
        let registrations = self.registrations();
        registrations
            .iter()
            .find(|reg| reg.name == name)
            .map(|reg| Arc::clone(&reg.param_resolver))
            .ok_or_else(|| RegistryError::NoParamResolver {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registrations().iter().any(|reg| reg.name == name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.registrations()
            .iter()
            .map(|reg| reg.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.registrations().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations().is_empty()
    }
}

impl fmt::Debug for CollectiveRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectiveRegistry")
            .field("registrations", &*self.registrations())
            .finish()
    }
}
