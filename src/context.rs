//! Vaults whose resources are bound to some outside context, such as textures which belong to one renderer.
//!
//! The [ContextVault] only keeps a weak reference to the context.  It won't load anything while no live context is
//! attached, but it also doesn't react to the context going away: resources already cached were created against the
//! old context and stay cached until freed, and it is up to the caller not to use them past the context's lifetime.
//! The same goes for [ContextVault::set_context]; switching contexts doesn't touch what's already loaded.
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use crate::*;

type ContextSlot<C> = Arc<RwLock<Option<Weak<C>>>>;

/// Like [Loader], but loading needs the context.
pub trait ContextLoader: Send + Sync + 'static {
    type Context: Send + Sync + 'static;
    type Output: Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    fn load(&self, context: &Self::Context, key: &str) -> Result<Self::Output, Self::Error>;

    /// See [Loader::dispose].
    fn dispose(&self, item: &Self::Output) {
        let _ = item;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError<LoadError: std::error::Error + 'static> {
    #[error("no context is attached to the vault")]
    Detached,
    #[error(transparent)]
    Load(LoadError),
}

fn current<C>(slot: &RwLock<Option<Weak<C>>>) -> Option<Arc<C>> {
    slot.read()
        .unwrap_or_else(PoisonError::into_inner)
        .as_ref()
        .and_then(|w| w.upgrade())
}

/// Adapts a [ContextLoader] into a [Loader] which loads against whichever context is attached at the time.
pub struct ContextBound<L: ContextLoader> {
    inner: L,
    context: ContextSlot<L::Context>,
}

impl<L: ContextLoader> ContextBound<L> {
    pub fn inner(&self) -> &L {
        &self.inner
    }
}

impl<L: ContextLoader> Loader for ContextBound<L> {
    type Output = L::Output;
    type Error = ContextError<L::Error>;

    fn load(&self, key: &str) -> Result<L::Output, Self::Error> {
        let context = current(&self.context).ok_or(ContextError::Detached)?;
        self.inner.load(&context, key).map_err(ContextError::Load)
    }

    fn dispose(&self, item: &L::Output) {
        self.inner.dispose(item)
    }
}

pub type ContextVaultError<L> = VaultError<ContextError<<L as ContextLoader>::Error>>;

/// A [Vault] whose loads go through an attached context.
pub struct ContextVault<L: ContextLoader> {
    vault: Vault<ContextBound<L>>,
    context: ContextSlot<L::Context>,
}

impl<L: ContextLoader> ContextVault<L> {
    pub fn new(
        loader: L,
        context: Option<&Arc<L::Context>>,
        config: VaultConfig,
    ) -> Result<ContextVault<L>, ContextVaultError<L>> {
        ContextVault::with_clock(loader, context, config, SystemClock)
    }

    pub fn with_clock<C: Clock>(
        loader: L,
        context: Option<&Arc<L::Context>>,
        config: VaultConfig,
        clock: C,
    ) -> Result<ContextVault<L>, ContextVaultError<L>> {
        let context: ContextSlot<L::Context> = Arc::new(RwLock::new(context.map(Arc::downgrade)));
        let bound = ContextBound {
            inner: loader,
            context: context.clone(),
        };
        Ok(ContextVault {
            vault: Vault::with_clock(bound, config, clock)?,
            context,
        })
    }

    /// The attached context, if there is one and it is still alive.
    pub fn context(&self) -> Option<Arc<L::Context>> {
        current(&self.context)
    }

    /// Attach a context.  Resources loaded against the previous one stay cached.
    pub fn set_context(&self, context: &Arc<L::Context>) {
        *self.context.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::downgrade(context));
    }

    pub fn clear_context(&self) {
        *self.context.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Get a handle to the resource for `key`, loading it against the context if it isn't present.
    ///
    /// Without a live context this returns `None` without looking at the cache.
    pub fn get(&self, key: &str) -> Option<Arc<L::Output>> {
        if self.context().is_none() {
            tracing::debug!(key, "no context attached, not looking up asset");
            return None;
        }
        self.vault.get(key)
    }

    pub fn try_get(&self, key: &str) -> Result<Arc<L::Output>, ContextVaultError<L>> {
        if self.context().is_none() {
            return Err(VaultError::Load(ContextError::Detached));
        }
        self.vault.try_get(key)
    }

    /// Load `key` against `context` without caching it anywhere.
    ///
    /// Useful for resources which will be modified, and so shouldn't be shared.
    pub fn load_uncached(&self, context: &L::Context, key: &str) -> Result<L::Output, L::Error> {
        self.vault.loader().inner().load(context, key)
    }

    pub fn check(&self, key: &str) -> Option<Weak<L::Output>> {
        self.vault.check(key)
    }

    pub fn push_new(
        &self,
        resource: L::Output,
        key: &str,
    ) -> Result<Arc<L::Output>, ContextVaultError<L>> {
        self.vault.push_new(resource, key)
    }

    pub fn free_unused(&self) -> bool {
        self.vault.free_unused()
    }

    pub fn purge(&self) {
        self.vault.purge()
    }

    pub fn set_expiration(&self, expiration: Duration) {
        self.vault.set_expiration(expiration)
    }

    pub fn set_auto_free(&self, period: Duration) -> Result<(), ContextVaultError<L>> {
        self.vault.set_auto_free(period)
    }

    pub fn stop_auto_free(&self) {
        self.vault.stop_auto_free()
    }

    /// The underlying vault, for everything else.
    pub fn vault(&self) -> &Vault<ContextBound<L>> {
        &self.vault
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    struct Renderer {
        name: &'static str,
    }

    #[derive(Debug)]
    struct Sprite {
        renderer: &'static str,
        key: String,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("cannot decode {0}")]
    struct BadImage(String);

    #[derive(Default)]
    struct SpriteLoader {
        loads: AtomicUsize,
        destroyed: Mutex<Vec<String>>,
    }

    impl ContextLoader for Arc<SpriteLoader> {
        type Context = Renderer;
        type Output = Sprite;
        type Error = BadImage;

        fn load(&self, context: &Renderer, key: &str) -> Result<Sprite, BadImage> {
            if key.ends_with(".bad") {
                return Err(BadImage(key.to_string()));
            }
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Sprite {
                renderer: context.name,
                key: key.to_string(),
            })
        }

        fn dispose(&self, item: &Sprite) {
            self.destroyed
                .lock()
                .unwrap()
                .push(format!("{}:{}", item.renderer, item.key));
        }
    }

    fn build(
        context: Option<&Arc<Renderer>>,
    ) -> (Arc<SpriteLoader>, Arc<ManualClock>, ContextVault<Arc<SpriteLoader>>) {
        let loader = Arc::new(SpriteLoader::default());
        let clock = Arc::new(ManualClock::new());
        let cfg = VaultConfigBuilder::default()
            .expiration(Duration::from_millis(100))
            .build()
            .unwrap();
        let vault = ContextVault::with_clock(loader.clone(), context, cfg, clock.clone()).unwrap();
        (loader, clock, vault)
    }

    #[test]
    fn no_context_means_no_lookups() {
        let (loader, _, vault) = build(None);

        assert!(vault.get("hero.png").is_none());
        match vault.try_get("hero.png") {
            Err(VaultError::Load(ContextError::Detached)) => {}
            _ => panic!("Should report the missing context"),
        }
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
        assert!(vault.vault().is_empty());
    }

    #[test]
    fn loads_against_the_attached_context() {
        let main = Arc::new(Renderer { name: "main" });
        let (loader, _, vault) = build(Some(&main));

        let sprite = vault.get("hero.png").unwrap();
        assert_eq!(sprite.renderer, "main");
        assert!(Arc::ptr_eq(&sprite, &vault.get("hero.png").unwrap()));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

        match vault.try_get("broken.bad") {
            Err(VaultError::Load(ContextError::Load(BadImage(k)))) => assert_eq!(k, "broken.bad"),
            _ => panic!("Should report the decode failure"),
        }
        assert!(vault.check("broken.bad").is_none());
    }

    #[test]
    fn detaching_hides_cached_entries_from_get() {
        let main = Arc::new(Renderer { name: "main" });
        let (_, _, vault) = build(Some(&main));
        drop(vault.get("hero.png").unwrap());

        vault.clear_context();
        assert!(vault.context().is_none());
        assert!(vault.get("hero.png").is_none());
        // Still cached, just not reachable through get.
        assert!(vault.check("hero.png").is_some());

        vault.set_context(&main);
        assert!(vault.get("hero.png").is_some());
    }

    #[test]
    fn dead_context_counts_as_detached() {
        let main = Arc::new(Renderer { name: "main" });
        let (_, _, vault) = build(Some(&main));
        assert_eq!(vault.context().unwrap().name, "main");

        drop(main);
        assert!(vault.context().is_none());
        assert!(vault.get("hero.png").is_none());
    }

    #[test]
    fn switching_context_keeps_old_resources() {
        let first = Arc::new(Renderer { name: "first" });
        let second = Arc::new(Renderer { name: "second" });
        let (loader, clock, vault) = build(Some(&first));

        drop(vault.get("a.png").unwrap());
        vault.set_context(&second);
        assert_eq!(vault.get("a.png").unwrap().renderer, "first");
        assert_eq!(vault.get("b.png").unwrap().renderer, "second");

        assert!(!vault.free_unused());
        clock.advance(Duration::from_millis(100));
        assert!(vault.free_unused());
        assert!(vault.vault().is_empty());

        let mut destroyed = loader.destroyed.lock().unwrap().clone();
        destroyed.sort();
        assert_eq!(destroyed, vec!["first:a.png", "second:b.png"]);
    }

    #[test]
    fn uncached_loads_bypass_the_vault() {
        let main = Arc::new(Renderer { name: "main" });
        let offscreen = Renderer { name: "offscreen" };
        let (loader, _, vault) = build(Some(&main));

        let sprite = vault.load_uncached(&offscreen, "target.png").unwrap();
        assert_eq!(sprite.renderer, "offscreen");
        assert!(vault.check("target.png").is_none());

        // Pushing it makes it shared from then on.
        let pushed = vault.push_new(sprite, "target.png").unwrap();
        assert!(Arc::ptr_eq(&pushed, &vault.get("target.png").unwrap()));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

        vault.purge();
        assert_eq!(
            *loader.destroyed.lock().unwrap(),
            vec!["offscreen:target.png".to_string()]
        );
    }
}
