//! Patch engine for embedding instrumentation SDKs into mobile app packages
//!
//! `mopatch-core` takes a pre-built mobile application package and embeds a
//! visual-testing instrumentation SDK into it, without access to the app's
//! source code or build system. Three package formats are supported:
//!
//! - **`.app`** - unpacked iOS bundle, patched in place
//! - **`.ipa`** - zipped iOS archive, extracted, patched, re-signed and
//!   re-zipped in place
//! - **`.apk`** - Android package, handed to the SDK payload's own
//!   instrumentation module; the result lands in `instrumented-apk/`
//!
//! # Architecture
//!
//! The engine consists of several components:
//!
//! - **Resolver**: Maps an SDK variant to its archive, fetches and extracts
//!   it into a scoped temporary directory
//! - **Archive**: Named-subtree extraction and permission-preserving
//!   repackaging of zip archives
//! - **Patchers**: Format-specific strategies for placing the SDK
//! - **Signer**: Entitlement regeneration and innermost-first re-signing
//!   of `.ipa` bundles
//! - **Instrumenter**: Orchestrates one run and reports the outcome
//!
//! # Example
//!
//! ```ignore
//! use mopatch_core::{Instrumenter, SdkKind, SdkResolver, SigningMaterial};
//!
//! let resolver = SdkResolver::new(fetcher).verbose(true);
//! let sdk = resolver.resolve(SdkKind::IosNmg)?;
//! let instrumenter = Instrumenter::new(
//!     "MyApp.ipa".as_ref(),
//!     &sdk,
//!     SigningMaterial::default(),
//!     true,
//! )?;
//! let ok = instrumenter.instrument()?;
//! // dropping `sdk` removes the extracted payload
//! # Ok::<(), mopatch_core::PatchError>(())
//! ```

// Public modules
pub mod archive;
pub mod instrumenter;
pub mod patchers;
pub mod resolver;
pub mod signing;
pub mod types;

// Re-export key types for convenience
pub use instrumenter::Instrumenter;
pub use patchers::{
    ApkInstrumenter, ApkPatcher, AppBundlePatcher, IpaPatcher, NmgScriptRunner, PackagePatcher,
};
pub use resolver::{ResolvedSdk, SdkFetch, SdkResolver};
pub use signing::Signer;
pub use types::{PackageKind, PatchError, SdkDescriptor, SdkKind, SigningMaterial};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
