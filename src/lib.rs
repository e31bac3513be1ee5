//! A cache for resources which are expensive to load and have to be torn down explicitly, such as textures or
//! decoded audio, which frees each resource once nothing outside the cache has used it for a while.
//!
//! Sometimes, you have a lot of assets which are referenced by path all over a program, and loading the same image
//! twice is both slow and wasteful.  A simple map of keys to loaded values will just grow forever, though, and an Lru
//! doesn't help when the thing that matters isn't how much is loaded but whether anyone is still using it.  This crate
//! provides a solution to that problem via one type and some traits:
//!
//! [Vault] hands out `Arc`s to resources produced by a [Loader].  The first request for a key loads it; later requests
//! get the same `Arc` back.  Every so often, either when you call [Vault::free_unused] or on a background thread set up
//! with [Vault::set_auto_free], the vault looks at which resources it is the only holder of:
//!
//! - The first time it notices, it starts that entry's idle clock.
//! - If it still is the only holder once the clock has run past the configured expiration, the resource goes through
//!   [Loader::dispose] and the entry is dropped.
//! - Handing out a new `Arc` for an entry stops its idle clock.
//!
//! [Vault::purge] disposes everything immediately, no matter who still holds it.
//!
//! For resources which belong to some other object, say textures which belong to a renderer, [ContextVault] keeps a
//! weak reference to that object and loads through a [ContextLoader].  [FileLoader] is a [Loader] which reads assets
//! from below a root directory and hands them to a [Decoder].
//!
//! To use this crate, implement [Loader] (or [Decoder], or [ContextLoader]), then construct a [Vault] with your chosen
//! [VaultConfig].
mod clock;
mod context;
mod entry;
mod filesystem;
mod timer;
mod traits;
mod vault;

pub use clock::*;
pub use context::*;
pub use entry::*;
pub use filesystem::*;
pub use timer::*;
pub use traits::*;
pub use vault::*;
