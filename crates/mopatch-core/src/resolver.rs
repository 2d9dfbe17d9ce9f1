//! SDK asset resolution.
//!
//! Maps a requested [`SdkKind`] to its catalogue entry, fetches the archive
//! bytes through the [`SdkFetch`] collaborator, and extracts the payload
//! into a scoped temporary directory. The extracted tree lives exactly as
//! long as the returned [`ResolvedSdk`]: dropping it removes the directory
//! recursively, on success and failure paths alike, so repeated runs never
//! leak disk space.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::archive;
use crate::types::{PatchError, SdkDescriptor, SdkKind};

/// Download transport for SDK archives.
///
/// The resolver only needs raw bytes; where they come from (network GET,
/// local file, embedded fixture) is the caller's concern. Implementations
/// report failures as [`PatchError::Fetch`] carrying the locator so the
/// user can retry or supply the payload locally.
pub trait SdkFetch {
    /// Retrieves the raw zip bytes for `descriptor`.
    fn fetch(&self, descriptor: &SdkDescriptor) -> Result<Vec<u8>, PatchError>;
}

impl<F: SdkFetch + ?Sized> SdkFetch for Box<F> {
    fn fetch(&self, descriptor: &SdkDescriptor) -> Result<Vec<u8>, PatchError> {
        (**self).fetch(descriptor)
    }
}

/// An SDK payload extracted on disk, scoped to one instrumentation run.
///
/// The extraction root is a fresh temporary directory owned by this value;
/// the payload itself sits at `<root>/<descriptor.name>`. The directory is
/// deleted when the value drops, so callers must copy the payload into the
/// target package before letting go of it.
#[derive(Debug)]
pub struct ResolvedSdk {
    descriptor: SdkDescriptor,
    location: PathBuf,
    // Owns the extraction root; dropping it removes the tree.
    _root: TempDir,
}

impl ResolvedSdk {
    /// The catalogue entry this payload was resolved from.
    pub fn descriptor(&self) -> &SdkDescriptor {
        &self.descriptor
    }

    /// The payload's folder name, e.g. `UFG_lib.xcframework`.
    pub fn name(&self) -> &'static str {
        self.descriptor.name()
    }

    /// On-disk location of the extracted payload.
    pub fn location(&self) -> &Path {
        &self.location
    }
}

/// Resolves SDK variants into extracted payloads.
///
/// # Example
///
/// ```ignore
/// use mopatch_core::{SdkKind, SdkResolver};
///
/// let resolver = SdkResolver::new(fetcher).verbose(true);
/// let sdk = resolver.resolve(SdkKind::IosNmg)?;
/// // ... copy sdk.location() into the package ...
/// // dropping `sdk` removes the extracted payload
/// # Ok::<(), mopatch_core::PatchError>(())
/// ```
pub struct SdkResolver<F> {
    fetcher: F,
    verbose: bool,
}

impl<F: SdkFetch> SdkResolver<F> {
    /// Creates a resolver backed by the given fetch collaborator.
    pub fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            verbose: false,
        }
    }

    /// Enables verbose output
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Fetches and extracts the payload for `kind`.
    ///
    /// The archive is always fetched fresh; nothing persists between runs.
    /// After extraction the payload location is checked against the
    /// catalogue name; a mismatch means the extractor misbehaved and is
    /// reported as [`PatchError::SdkLocation`], not as a user error.
    pub fn resolve(&self, kind: SdkKind) -> Result<ResolvedSdk, PatchError> {
        let descriptor = kind.descriptor();
        if self.verbose {
            println!(
                "  Downloading `{}` from `{}`",
                descriptor.name(),
                descriptor.locator()
            );
        }
        let bytes = self.fetcher.fetch(&descriptor)?;

        let root = TempDir::new()?;
        let location = archive::extract_named_subtree(&bytes, root.path(), descriptor.name())?;

        let expected = root.path().join(descriptor.name());
        if location != expected {
            return Err(PatchError::SdkLocation {
                expected,
                actual: location,
            });
        }
        if self.verbose {
            println!("  Extracted `{}` to {:?}", descriptor.name(), location);
        }

        Ok(ResolvedSdk {
            descriptor,
            location,
            _root: root,
        })
    }
}
