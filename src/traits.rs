//! The [Loader] trait is responsible for converting string keys to resources, and for releasing them again.
//!
//! The vault calls [Loader::load] on a miss, and [Loader::dispose] exactly once per resource when it decides the
//! resource is no longer needed.
use std::fmt;
use std::io::Read;

/// Load a resource for a key, and tear it down when the vault is done with it.
pub trait Loader: Send + Sync + 'static {
    type Output: Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the resource named by `key`.
    ///
    /// This runs while the vault holds its lock, so calling back into the same vault from here deadlocks.
    fn load(&self, key: &str) -> Result<Self::Output, Self::Error>;

    /// Release whatever native state the resource holds.
    ///
    /// This is called at most once per loaded resource, while the vault holds its lock; as with [Loader::load], it must
    /// not call back into the vault.  Handles held outside the
    /// vault may still point at the resource afterwards if it was removed by a purge; using the resource after that
    /// point is the concern of whoever consumes it.  Resources which are plain memory don't need to do anything here.
    fn dispose(&self, item: &Self::Output) {
        let _ = item;
    }
}

/// A `Decoder` knows how to get from a reader to a decoded representation in memory.
///
/// The output type must be sync in order to enable the vault to store elements behind `Arc`.
pub trait Decoder: Send + Sync + 'static {
    type Output: Send + Sync + 'static;
    type Error: std::error::Error + Send + Sync + 'static;

    fn decode<R: Read>(&self, reader: R) -> Result<Self::Output, Self::Error>;

    /// Release a decoded item.  See [Loader::dispose].
    fn dispose(&self, item: &Self::Output) {
        let _ = item;
    }
}

/// A [Loader] built from a pair of closures.
pub struct FnLoader<LoadFn, DisposeFn> {
    load: LoadFn,
    dispose: DisposeFn,
}

impl<LoadFn, DisposeFn> FnLoader<LoadFn, DisposeFn> {
    pub fn new(load: LoadFn, dispose: DisposeFn) -> FnLoader<LoadFn, DisposeFn> {
        FnLoader { load, dispose }
    }
}

impl<T, E, LoadFn, DisposeFn> Loader for FnLoader<LoadFn, DisposeFn>
where
    T: Send + Sync + 'static,
    E: std::error::Error + Send + Sync + 'static,
    LoadFn: Fn(&str) -> Result<T, E> + Send + Sync + 'static,
    DisposeFn: Fn(&T) + Send + Sync + 'static,
{
    type Output = T;
    type Error = E;

    fn load(&self, key: &str) -> Result<T, E> {
        (self.load)(key)
    }

    fn dispose(&self, item: &T) {
        (self.dispose)(item)
    }
}

impl<LoadFn, DisposeFn> fmt::Debug for FnLoader<LoadFn, DisposeFn> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnLoader").finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::{Vault, VaultConfig};

    #[test]
    fn closures_make_a_loader() {
        let closed = Arc::new(Mutex::new(vec![]));
        let sink = closed.clone();
        let loader = FnLoader::new(
            |key: &str| key.parse::<u32>(),
            move |n: &u32| sink.lock().unwrap().push(*n),
        );

        let vault = Vault::new(loader, VaultConfig::default()).unwrap();
        assert_eq!(*vault.get("12").unwrap(), 12);
        assert!(vault.get("twelve").is_none());
        assert!(vault.try_get("-1").is_err());
        assert_eq!(vault.expiration(), Duration::ZERO);

        assert!(!vault.free_unused());
        assert!(vault.free_unused());
        assert_eq!(*closed.lock().unwrap(), vec![12]);
    }
}
