/*!
 * Backend Registry
 *
 * Per-capability holder of the installed factory and the shared instance built
 * from it.
 *
 * # Concurrency
 *
 * - The factory lives in an `ArcSwap`; readers never block on a replacement and
 *   may briefly observe the previous factory
 * - The instance is guarded by a short mutex that is never held while a factory
 *   runs or while an old instance is dropped
 * - Two threads that both find no instance may each build one; the first to
 *   store wins and the loser's instance is dropped. Sequential use builds once.
 *
 * Factories are fallible. A failure during lazy construction is returned to the
 * caller and nothing is cached; a failure while installing a new factory leaves
 * the registry untouched.
 */

use super::ThreadPoolBackend;
use crate::core::ScheduleResult;
use crate::replaceability::{Capability, SystemScheduler};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

type BuildFn<I> = dyn Fn() -> ScheduleResult<Arc<I>> + Send + Sync;

/// Named constructor for instances of capability `I`
pub struct BackendFactory<I: ?Sized> {
    name: String,
    build: Box<BuildFn<I>>,
}

impl<I: ?Sized> BackendFactory<I> {
    pub fn new<F>(name: impl Into<String>, build: F) -> Self
    where
        F: Fn() -> ScheduleResult<Arc<I>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            build: Box::new(build),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Construct a fresh instance
    pub fn build(&self) -> ScheduleResult<Arc<I>> {
        (self.build)()
    }
}

impl<I: ?Sized> fmt::Debug for BackendFactory<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendFactory")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Installed factory plus lazily-built shared instance for one capability
pub struct InstanceRegistry<I: ?Sized> {
    factory: ArcSwap<BackendFactory<I>>,
    instance: Mutex<Option<Arc<I>>>,
}

impl<I: ?Sized> InstanceRegistry<I> {
    /// Registry that will build its first instance from `factory` on demand
    pub fn new(factory: BackendFactory<I>) -> Self {
        Self {
            factory: ArcSwap::from_pointee(factory),
            instance: Mutex::new(None),
        }
    }

    /// The shared instance, building it from the installed factory if needed
    pub fn current(&self) -> ScheduleResult<Arc<I>> {
        if let Some(instance) = self.cached() {
            return Ok(instance);
        }

        let factory = self.factory.load_full();
        debug!(factory = factory.name(), "Constructing backend instance");
        let built = factory.build()?;

        let mut slot = self.instance.lock();
        match slot.as_ref() {
            Some(existing) => {
                let existing = Arc::clone(existing);
                drop(slot);
                debug!(factory = factory.name(), "Lost construction race, discarding instance");
                drop(built);
                Ok(existing)
            }
            None => {
                *slot = Some(Arc::clone(&built));
                Ok(built)
            }
        }
    }

    /// Instance already built, if any
    pub fn cached(&self) -> Option<Arc<I>> {
        self.instance.lock().clone()
    }

    /// Install `factory` and replace the current instance with one it builds
    ///
    /// The new instance is built before anything changes; if that fails the
    /// error is returned and the registry keeps its old factory and instance.
    /// Operations already running on the old instance are unaffected. Returns
    /// the previously installed factory.
    pub fn set_backend_factory(
        &self,
        factory: BackendFactory<I>,
    ) -> ScheduleResult<Arc<BackendFactory<I>>> {
        let instance = match factory.build() {
            Ok(instance) => instance,
            Err(e) => {
                warn!(factory = factory.name(), error = %e, "Backend factory failed, keeping current backend");
                return Err(e);
            }
        };

        let name = factory.name().to_string();
        let previous = self.factory.swap(Arc::new(factory));
        let replaced = self.instance.lock().replace(instance);

        info!(
            factory = %name,
            previous = previous.name(),
            replaced_instance = replaced.is_some(),
            "Backend factory installed"
        );
        drop(replaced);
        Ok(previous)
    }

    /// Install `instance` directly, keeping the factory for later rebuilds
    pub fn set_instance(&self, instance: Arc<I>) -> Option<Arc<I>> {
        let replaced = self.instance.lock().replace(instance);
        info!(replaced_instance = replaced.is_some(), "Backend instance installed");
        replaced
    }

    /// Forget the current instance; the next `current` rebuilds from the factory
    pub fn clear_instance(&self) -> Option<Arc<I>> {
        self.instance.lock().take()
    }

    pub fn factory_name(&self) -> String {
        self.factory.load().name().to_string()
    }
}

impl<I: ?Sized> fmt::Debug for InstanceRegistry<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("factory", &self.factory.load().name())
            .field("has_instance", &self.instance.lock().is_some())
            .finish()
    }
}

/// Capability with a process-wide registry
///
/// The registry is created on first use and lives for the rest of the process.
pub trait RegisteredCapability: Capability + Send + Sync + 'static {
    fn registry() -> &'static InstanceRegistry<Self>;
}

impl RegisteredCapability for dyn SystemScheduler {
    fn registry() -> &'static InstanceRegistry<Self> {
        static REGISTRY: OnceLock<InstanceRegistry<dyn SystemScheduler>> = OnceLock::new();
        REGISTRY.get_or_init(|| InstanceRegistry::new(ThreadPoolBackend::factory()))
    }
}

/// Current process-wide instance of capability `I`
pub fn query_system_context<I>() -> ScheduleResult<Arc<I>>
where
    I: ?Sized + RegisteredCapability,
{
    I::registry().current()
}

/// Replace the process-wide factory for capability `I`, returning the previous one
pub fn set_system_context_backend_factory<I>(
    factory: BackendFactory<I>,
) -> ScheduleResult<Arc<BackendFactory<I>>>
where
    I: ?Sized + RegisteredCapability,
{
    debug!(interface = %I::INTERFACE_ID, factory = factory.name(), "Replacing backend factory");
    I::registry().set_backend_factory(factory)
}

/// Install a process-wide instance of capability `I` directly
pub fn set_system_context_backend<I>(instance: Arc<I>) -> Option<Arc<I>>
where
    I: ?Sized + RegisteredCapability,
{
    debug!(interface = %I::INTERFACE_ID, "Replacing backend instance");
    I::registry().set_instance(instance)
}
