//! Dependency-injection container.
//!
//! Services are stored by name as shared `Arc` handles. The container is the
//! long-lived owner; consumers receive clones of the same `Arc` on lookup.
//!
//! Field injection is declarative: a type implements [`Injectable`] by listing
//! a binding table of `(field, service name, setter)` entries. The table is
//! typed, so [`Container::verify`] can check every binding at startup before
//! any instance exists.
//!
//! ## Registration
//!
//! - **Names are unique**: registering a name twice fails with
//!   `DuplicateRegistration`; the first service stays in place.
//! - **Providers carry their type**: [`Provider::new`] records the concrete
//!   type next to the handle, so a module can declare services before anyone
//!   asks for them.
//! - **No replacement, no removal**: the set of services only grows while the
//!   application is bootstrapping.
//!
//! ## Lookup
//!
//! [`Container::get`] returns the stored `Arc` itself, so two lookups of the
//! same name are pointer-identical. [`Container::resolve`] additionally
//! downcasts to the requested type and reports a `TypeMismatch` when the
//! stored service has a different concrete type.
//!
//! ## Injection
//!
//! ```ignore
//! impl Injectable for UsersController {
//!     fn bindings() -> Vec<Binding<Self>> {
//!         bindings![store: UserStore => "users.store"]
//!     }
//! }
//!
//! let mut controller = UsersController::default();
//! container.inject(&mut controller)?;
//! ```
//!
//! Injection is shallow: the injected services are not themselves injected.
//! The first failing binding aborts the call; fields assigned before it keep
//! their new value.
//!
//! ## Concurrency
//!
//! One `RwLock` around one map. Lookups share the read lock; registration
//! takes the write lock briefly and never runs user code while holding it.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use crate::error::{KernelError, KernelResult};
use crate::value::TypeKey;

/// Type-erased service handle.
pub type Service = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Error)]
pub enum InjectError {
    /// The named service could not be resolved (wraps the lookup error).
    #[error("failed to inject field `{field}`: {source}")]
    Unresolved {
        field: &'static str,
        #[source]
        source: Box<KernelError>,
    },

    #[error("service `{service}` ({actual}) is not assignable to `{target}` ({expected})")]
    TypeMismatch {
        target: String,
        service: String,
        expected: &'static str,
        actual: &'static str,
    },
}

/// A named service together with its concrete type.
#[derive(Clone)]
pub struct Provider {
    name: String,
    instance: Service,
    type_key: TypeKey,
}

impl Provider {
    pub fn new<T: Any + Send + Sync>(name: impl Into<String>, instance: Arc<T>) -> Self {
        Self {
            name: name.into(),
            instance,
            type_key: TypeKey::of::<T>(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> &Service {
        &self.instance
    }

    pub fn type_key(&self) -> TypeKey {
        self.type_key
    }
}

impl core::fmt::Debug for Provider {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("type", &self.type_key.name())
            .finish()
    }
}

type Assign<T> = Box<dyn Fn(&mut T, Service) -> Result<(), Service> + Send + Sync>;

/// One entry of an injection table: "field `field` takes service `service`".
pub struct Binding<T> {
    field: &'static str,
    service: &'static str,
    expected: TypeKey,
    assign: Assign<T>,
}

impl<T: 'static> Binding<T> {
    pub fn new<S: Any + Send + Sync>(
        field: &'static str,
        service: &'static str,
        set: fn(&mut T, Arc<S>),
    ) -> Self {
        Self {
            field,
            service,
            expected: TypeKey::of::<S>(),
            assign: Box::new(move |target: &mut T, instance: Service| {
                let typed = instance.downcast::<S>()?;
                set(target, typed);
                Ok(())
            }),
        }
    }

    pub fn field(&self) -> &'static str {
        self.field
    }

    pub fn service(&self) -> &'static str {
        self.service
    }
}

/// A record whose fields are filled from the container.
pub trait Injectable: Sized + 'static {
    fn bindings() -> Vec<Binding<Self>>;
}

/// Build a binding table for fields of type `Option<Arc<S>>`.
///
/// ```ignore
/// impl Injectable for UsersController {
///     fn bindings() -> Vec<Binding<Self>> {
///         sato_core::bindings![repo: UserRepo => "users.repo"]
///     }
/// }
/// ```
#[macro_export]
macro_rules! bindings {
    ($($field:ident : $svc:ty => $name:expr),* $(,)?) => {
        vec![$(
            $crate::container::Binding::new::<$svc>(
                stringify!($field),
                $name,
                |target: &mut Self, service| target.$field = Some(service),
            )
        ),*]
    };
}

/// Named service store.
#[derive(Default)]
pub struct Container {
    services: RwLock<HashMap<String, Provider>>,
}

impl Container {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Any + Send + Sync>(&self, name: impl Into<String>, service: Arc<T>) -> KernelResult<()> {
        self.register_provider(Provider::new(name, service))
    }

    pub fn register_provider(&self, provider: Provider) -> KernelResult<()> {
        let mut services = self.services.write().unwrap_or_else(PoisonError::into_inner);
        if services.contains_key(provider.name()) {
            return Err(KernelError::duplicate("service", provider.name()));
        }
        tracing::debug!(service = provider.name(), ty = provider.type_key().name(), "service registered");
        services.insert(provider.name.clone(), provider);
        Ok(())
    }

    pub fn get(&self, name: &str) -> KernelResult<Service> {
        self.lookup(name).map(|provider| provider.instance)
    }

    /// Typed lookup.
    pub fn resolve<T: Any + Send + Sync>(&self, name: &str) -> KernelResult<Arc<T>> {
        let provider = self.lookup(name)?;
        provider.instance.downcast::<T>().map_err(|_| {
            InjectError::TypeMismatch {
                target: format!("resolve::<{}>", std::any::type_name::<T>()),
                service: name.to_string(),
                expected: std::any::type_name::<T>(),
                actual: provider.type_key.name(),
            }
            .into()
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Registered service names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Fill every bound field of `target`. Injection is shallow: services'
    /// own bindings are not followed.
    pub fn inject<T: Injectable>(&self, target: &mut T) -> KernelResult<()> {
        for binding in T::bindings() {
            let provider = self.lookup(binding.service).map_err(|source| InjectError::Unresolved {
                field: binding.field,
                source: Box::new(source),
            })?;
            (binding.assign)(target, provider.instance.clone()).map_err(|_| InjectError::TypeMismatch {
                target: binding.field.to_string(),
                service: binding.service.to_string(),
                expected: binding.expected.name(),
                actual: provider.type_key.name(),
            })?;
        }
        Ok(())
    }

    /// Check that every binding of `T` can be satisfied, without a target.
    pub fn verify<T: Injectable>(&self) -> KernelResult<()> {
        let services = self.read();
        for binding in T::bindings() {
            let Some(provider) = services.get(binding.service) else {
                return Err(InjectError::Unresolved {
                    field: binding.field,
                    source: Box::new(KernelError::not_found("service", binding.service)),
                }
                .into());
            };
            if provider.type_key != binding.expected {
                return Err(InjectError::TypeMismatch {
                    target: binding.field.to_string(),
                    service: binding.service.to_string(),
                    expected: binding.expected.name(),
                    actual: provider.type_key.name(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> KernelResult<Provider> {
        self.read()
            .get(name)
            .cloned()
            .ok_or_else(|| KernelError::not_found("service", name))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Provider>> {
        self.services.read().unwrap_or_else(PoisonError::into_inner)
    }
}
