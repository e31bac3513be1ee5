//! The [Vault] drives a [Loader], handing out shared handles to loaded resources and reclaiming them once nothing
//! outside the vault has held them for a while.
//!
//! Typically, the [Loader] decodes something from disk and the output type is a texture, an audio buffer, or some
//! other object with native state that has to be torn down explicitly.
//!
//! Reclamation is driven by [Vault::free_unused], either called directly or on a timer configured with
//! [Vault::set_auto_free].  An entry is only ever reclaimed when the vault is the sole holder of its resource:
//!
//! - The first pass which sees the vault as sole holder starts the entry's idle clock.
//! - A later pass which still sees the vault as sole holder, and finds the idle clock has run for at least the
//!   expiration, disposes the resource and drops the entry.
//! - Anything which hands out a new handle to the entry stops the idle clock.
//!
//! [Vault::purge] skips all of that and disposes everything, whoever still holds it.
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use crate::entry::Entry;
use crate::*;

type EntryMap<T> = std::collections::HashMap<String, Entry<T>, ahash::RandomState>;

/// Name given to the thread which runs automatic reclamation.
pub const AUTO_FREE_THREAD_NAME: &str = "asset-vault-auto-free";

#[derive(Clone, Debug, Default, derive_builder::Builder)]
pub struct VaultConfig {
    /// How long an entry must go without holders outside the vault before it may be freed.
    #[builder(default)]
    pub expiration: Duration,
    /// If set, [Vault::free_unused] runs on a background thread with this period.
    #[builder(default, setter(strip_option))]
    pub auto_free_period: Option<Duration>,
}

#[derive(Debug, thiserror::Error)]
pub enum VaultError<LoadError: std::error::Error + 'static> {
    #[error(transparent)]
    Load(LoadError),
    #[error("key {0:?} is already present in the vault")]
    KeyCollision(String),
    #[error("unable to start the auto-free thread")]
    Timer(#[from] std::io::Error),
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

struct VaultState<T> {
    entries: EntryMap<T>,
    expiration: Duration,
    next_id: u64,
}

impl<T> VaultState<T> {
    fn insert(&mut self, key: String, resource: T) -> (EntryId, Arc<T>) {
        let id = EntryId(self.next_id);
        self.next_id += 1;
        let resource = Arc::new(resource);
        let handle = resource.clone();
        self.entries.insert(key, Entry::new(id, resource));
        (id, handle)
    }

    /// Take the resource for `key` out of the vault, if the vault holds the last strong reference to it.
    ///
    /// Someone may have upgraded a weak handle from `check` since the count was last read.  In that case the entry
    /// stays, with its idle clock stopped.
    fn reclaim(&mut self, key: &str) -> Option<(EntryId, T)> {
        let Entry { id, resource, .. } = self.entries.remove(key)?;
        match Arc::try_unwrap(resource) {
            Ok(resource) => Some((id, resource)),
            Err(resource) => {
                self.entries
                    .insert(key.to_string(), Entry::new(id, resource));
                None
            }
        }
    }

    fn find_by_id(&mut self, id: EntryId) -> Option<&mut Entry<T>> {
        self.entries.values_mut().find(|e| e.id == id)
    }
}

/// Everything the auto-free thread needs to reach.
struct Shared<L: Loader> {
    loader: L,
    clock: Box<dyn Clock>,
    state: Mutex<VaultState<L::Output>>,
}

impl<L: Loader> Shared<L> {
    /// Every mutation leaves the map consistent, so a panic in a loader or disposer doesn't invalidate the state.
    fn lock(&self) -> MutexGuard<'_, VaultState<L::Output>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_get(&self, key: &str) -> Result<Arc<L::Output>, VaultError<L::Error>> {
        let mut state = self.lock();
        if let Some(entry) = state.entries.get_mut(key) {
            return Ok(entry.acquire());
        }

        let resource = self.loader.load(key).map_err(VaultError::Load)?;
        let (id, handle) = state.insert(key.to_string(), resource);
        tracing::debug!(key, %id, "loaded asset");
        Ok(handle)
    }

    fn push_new(
        &self,
        resource: L::Output,
        key: &str,
    ) -> Result<Arc<L::Output>, VaultError<L::Error>> {
        let mut state = self.lock();
        if state.entries.contains_key(key) {
            // The vault owns the resource now, and nothing else will ever see it.
            self.loader.dispose(&resource);
            tracing::warn!(key, "rejected asset pushed under an existing key");
            return Err(VaultError::KeyCollision(key.to_string()));
        }

        let (id, handle) = state.insert(key.to_string(), resource);
        tracing::debug!(key, %id, "pushed asset");
        Ok(handle)
    }

    fn free_unused(&self) -> bool {
        let mut state = self.lock();
        let now = self.clock.now();
        let expiration = state.expiration;

        let mut expired = vec![];
        for (key, entry) in state.entries.iter_mut() {
            if !entry.is_sole_held() {
                entry.idle_since = None;
                continue;
            }

            match entry.idle_for(now) {
                None => {
                    entry.idle_since = Some(now);
                    tracing::trace!(key = %key, id = %entry.id, "idle clock started");
                }
                Some(idle) if idle >= expiration => expired.push(key.clone()),
                Some(_) => {}
            }
        }

        let mut freed = false;
        for key in expired {
            if let Some((id, resource)) = state.reclaim(&key) {
                self.loader.dispose(&resource);
                tracing::debug!(key = %key, %id, "freed idle asset");
                freed = true;
            }
        }

        freed
    }

    fn purge(&self) {
        let mut state = self.lock();
        let count = state.entries.len();
        for (_, entry) in state.entries.drain() {
            self.loader.dispose(&entry.resource);
        }
        if count > 0 {
            tracing::debug!(count, "purged vault");
        }
    }
}

/// A keyed cache of shared resources which frees resources once they have been idle for long enough.
///
/// All operations take `&self`; the vault may be shared between threads behind an `Arc`.
pub struct Vault<L: Loader> {
    shared: Arc<Shared<L>>,
    auto_free: Mutex<Option<PeriodicTask>>,
}

impl<L: Loader> Vault<L> {
    pub fn new(loader: L, config: VaultConfig) -> Result<Vault<L>, VaultError<L::Error>> {
        Vault::with_clock(loader, config, SystemClock)
    }

    /// Build a vault which reads the time from `clock`.
    pub fn with_clock<C: Clock>(
        loader: L,
        config: VaultConfig,
        clock: C,
    ) -> Result<Vault<L>, VaultError<L::Error>> {
        let vault = Vault {
            shared: Arc::new(Shared {
                loader,
                clock: Box::new(clock),
                state: Mutex::new(VaultState {
                    entries: Default::default(),
                    expiration: config.expiration,
                    next_id: 0,
                }),
            }),
            auto_free: Mutex::new(None),
        };

        if let Some(period) = config.auto_free_period {
            vault.set_auto_free(period)?;
        }

        Ok(vault)
    }

    pub fn loader(&self) -> &L {
        &self.shared.loader
    }

    /// Get a handle to the resource for `key`, loading it if it isn't present.
    ///
    /// Failures are logged and turned into `None`; use [Vault::try_get] to see them.
    pub fn get(&self, key: &str) -> Option<Arc<L::Output>> {
        match self.try_get(key) {
            Ok(x) => Some(x),
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to load asset");
                None
            }
        }
    }

    /// Get a handle to the resource for `key`, loading it if it isn't present.
    ///
    /// A hit stops the entry's idle clock.  A failed load leaves the vault as it was.
    pub fn try_get(&self, key: &str) -> Result<Arc<L::Output>, VaultError<L::Error>> {
        self.shared.try_get(key)
    }

    /// Put an already loaded resource into the vault under `key`, without involving the loader.
    ///
    /// If `key` is already present the existing entry is kept, `resource` is released through [Loader::dispose], and
    /// [VaultError::KeyCollision] is returned.
    pub fn push_new(
        &self,
        resource: L::Output,
        key: &str,
    ) -> Result<Arc<L::Output>, VaultError<L::Error>> {
        self.shared.push_new(resource, key)
    }

    /// Look for `key` without loading it or disturbing its idle clock.
    ///
    /// The returned handle doesn't keep the resource cached: once it is freed, upgrading fails.
    pub fn check(&self, key: &str) -> Option<Weak<L::Output>> {
        self.shared
            .lock()
            .entries
            .get(key)
            .map(|e| Arc::downgrade(&e.resource))
    }

    /// The id of the entry cached under `key`.
    pub fn id_of(&self, key: &str) -> Option<EntryId> {
        self.shared.lock().entries.get(key).map(|e| e.id)
    }

    /// Like [Vault::get], but by id.  Never loads, since an id is only known for something already cached.
    pub fn get_by_id(&self, id: EntryId) -> Option<Arc<L::Output>> {
        self.shared.lock().find_by_id(id).map(|e| e.acquire())
    }

    /// Like [Vault::check], but by id.
    pub fn check_by_id(&self, id: EntryId) -> Option<Weak<L::Output>> {
        self.shared
            .lock()
            .find_by_id(id)
            .map(|e| Arc::downgrade(&e.resource))
    }

    /// Run one reclamation pass, returning whether anything was freed.
    pub fn free_unused(&self) -> bool {
        self.shared.free_unused()
    }

    /// Dispose every resource in the vault, whether or not anything else still holds it.
    ///
    /// Handles held elsewhere stay valid as far as memory goes, but whatever [Loader::dispose] tore down is gone.
    pub fn purge(&self) {
        self.shared.purge()
    }

    pub fn expiration(&self) -> Duration {
        self.shared.lock().expiration
    }

    /// Change how long entries must be idle before being freed.  Idle clocks already running are kept.
    pub fn set_expiration(&self, expiration: Duration) {
        self.shared.lock().expiration = expiration;
    }

    /// Run [Vault::free_unused] every `period` on a background thread, replacing any previous schedule.
    ///
    /// A zero period is the same as [Vault::stop_auto_free].
    pub fn set_auto_free(&self, period: Duration) -> Result<(), VaultError<L::Error>> {
        let mut slot = self.lock_auto_free();
        if let Some(old) = slot.take() {
            old.cancel();
        }
        if period == Duration::ZERO {
            tracing::debug!("auto-free stopped");
            return Ok(());
        }

        let weak = Arc::downgrade(&self.shared);
        let task = PeriodicTask::spawn(AUTO_FREE_THREAD_NAME, period, move || {
            match weak.upgrade() {
                Some(shared) => {
                    // A panicking disposer must not end the schedule; the state survives it, see `Shared::lock`.
                    let pass = panic::catch_unwind(AssertUnwindSafe(|| shared.free_unused()));
                    if let Err(payload) = pass {
                        tracing::error!(
                            panic = panic_message(payload.as_ref()),
                            "automatic free_unused panicked"
                        );
                    }
                    true
                }
                None => false,
            }
        })?;
        *slot = Some(task);
        tracing::debug!(?period, "auto-free started");
        Ok(())
    }

    /// Stop automatic reclamation.  Does nothing if it wasn't running.
    ///
    /// Once this returns, no automatic pass is running or will run.
    pub fn stop_auto_free(&self) {
        let task = self.lock_auto_free().take();
        if let Some(task) = task {
            task.cancel();
            tracing::debug!("auto-free stopped");
        }
    }

    pub fn auto_free_period(&self) -> Option<Duration> {
        self.lock_auto_free().as_ref().map(|t| t.period())
    }

    pub fn is_auto_freeing(&self) -> bool {
        self.lock_auto_free()
            .as_ref()
            .map(|t| t.is_running())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.shared.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The keys currently cached, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.shared.lock().entries.keys().cloned().collect()
    }

    fn lock_auto_free(&self) -> MutexGuard<'_, Option<PeriodicTask>> {
        self.auto_free.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<L: Loader> Drop for Vault<L> {
    fn drop(&mut self) {
        // The timer has to be gone before the entries are.
        let task = self
            .auto_free
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.cancel();
        }
        self.shared.purge();
    }
}
