//! Core types for mopatch-core.
//!
//! This module defines the fundamental types used throughout the patch
//! engine:
//!
//! - [`PatchError`] - Error types for fetch, extraction, patch and signing operations
//! - [`SdkKind`] - The closed set of supported instrumentation SDK variants
//! - [`SdkDescriptor`] - Catalogue entry mapping an SDK variant to its archive
//! - [`PackageKind`] - Package format selection (`.app`, `.ipa`, `.apk`)
//! - [`SigningMaterial`] - Optional code-signing credentials for `.ipa` targets

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Error types for mopatch-core operations.
///
/// This enum covers all error conditions that can occur while fetching an
/// SDK payload, extracting archives, patching a package, or re-signing an
/// `.ipa`.
///
/// Soft failures (a signing or repackaging step that the user can finish by
/// hand) are *not* represented here; patchers report those by returning
/// `Ok(false)` after printing an advisory. Everything in this enum aborts
/// the operation when it propagates.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// An I/O error occurred.
    ///
    /// Common causes include missing files, permission issues, or disk
    /// space problems while extracting or copying SDK payloads.
    #[error("I/O error: {0}. Check file paths and permissions")]
    Io(#[from] std::io::Error),

    /// The archive could not be read or written.
    ///
    /// The SDK payload and `.ipa` packages are zip archives; this wraps
    /// every malformed-archive condition reported by the zip reader or
    /// writer.
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// A property list could not be parsed or serialized.
    ///
    /// Raised while decoding the entitlements section of a provisioning
    /// profile.
    #[error("property list error: {0}")]
    Plist(#[from] plist::Error),

    /// The package path does not use a supported extension.
    ///
    /// Only `.app` bundles, `.ipa` archives and `.apk` files can be
    /// instrumented. This is checked before any SDK download starts.
    #[error("unsupported package `{0}`: only `.app`, `.ipa` or `.apk` can be instrumented")]
    UnsupportedPackage(PathBuf),

    /// The requested SDK identifier is not part of the catalogue.
    ///
    /// The set of SDK variants is fixed; see [`SdkKind`] for the accepted
    /// identifiers.
    #[error("sdk `{0}` is not supported. Available: ios_classic, ios_nmg, android_nmg")]
    UnknownSdk(String),

    /// Downloading the SDK payload failed.
    ///
    /// Reported with the locator that was being fetched so the failure can
    /// be retried or the payload supplied locally.
    #[error("failed to fetch SDK from `{locator}`: {reason}")]
    Fetch {
        /// URL or file path that was being fetched.
        locator: String,
        /// Underlying transport error, already rendered.
        reason: String,
    },

    /// The SDK archive does not contain the expected top-level folder.
    ///
    /// Every SDK payload must carry a directory entry whose path contains
    /// the catalogue name as a path segment; its absence means the archive
    /// is malformed or the catalogue entry is stale.
    #[error("`{0}` not present in archive")]
    MissingSubtree(String),

    /// The `Payload/` directory of an `.ipa` did not contain exactly one app.
    #[error("`{ipa}` is ambiguous: expected exactly one app under Payload/, found {found}")]
    AmbiguousPayload {
        /// The `.ipa` being instrumented.
        ipa: PathBuf,
        /// Number of entries found under `Payload/`.
        found: usize,
    },

    /// The extracted SDK did not land where the catalogue said it would.
    ///
    /// This is an internal-consistency failure in the extraction logic,
    /// not a user error.
    #[error("extracted SDK at `{actual}` does not match expected location `{expected}`")]
    SdkLocation {
        /// Location the resolver computed from the catalogue name.
        expected: PathBuf,
        /// Location the extractor actually produced.
        actual: PathBuf,
    },

    /// Code signing failed.
    ///
    /// Covers failures of the signing-identity tool while decoding the
    /// provisioning profile as well as non-zero exits of the code-signing
    /// tool itself. Callers inside the `.ipa` patcher convert this into an
    /// advisory and a soft failure.
    #[error("signing failed: {0}")]
    Signing(String),

    /// The external Android instrumentation module failed.
    ///
    /// The module is opaque to this tool; its stderr (or the absence of
    /// its entry point) is all we can report.
    #[error("instrumentation module failed: {0}")]
    ExternalTool(String),
}

/// Instrumentation SDK variant.
///
/// The catalogue is closed: exactly these three variants are recognized,
/// and any other identifier is a configuration error.
///
/// # Example
///
/// ```
/// use mopatch_core::SdkKind;
///
/// let kind: SdkKind = "ios_nmg".parse().unwrap();
/// assert_eq!(kind.descriptor().name(), "UFG_lib.xcframework");
///
/// assert!("not_a_real_sdk".parse::<SdkKind>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdkKind {
    /// Classic iOS helper framework.
    IosClassic,
    /// Next-generation iOS framework.
    IosNmg,
    /// Next-generation Android instrumentation module.
    AndroidNmg,
}

impl SdkKind {
    /// All supported variants, in catalogue order.
    pub const ALL: [SdkKind; 3] = [SdkKind::IosClassic, SdkKind::IosNmg, SdkKind::AndroidNmg];

    /// Returns the identifier used on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            SdkKind::IosClassic => "ios_classic",
            SdkKind::IosNmg => "ios_nmg",
            SdkKind::AndroidNmg => "android_nmg",
        }
    }

    /// Returns the catalogue entry for this variant.
    ///
    /// The name matches the top-level folder inside the SDK archive; the
    /// locator is where the archive is fetched from.
    pub fn descriptor(&self) -> SdkDescriptor {
        match self {
            SdkKind::IosClassic => SdkDescriptor::new(
                "EyesiOSHelper.xcframework",
                "https://applitools.jfrog.io/artifactory/iOS/EyesiOSHelper/EyesiOSHelper.zip",
            ),
            SdkKind::IosNmg => SdkDescriptor::new(
                "UFG_lib.xcframework",
                "https://applitools.jfrog.io/artifactory/nmg/ios/instrumentation/UFG_lib.xcframework.zip",
            ),
            SdkKind::AndroidNmg => SdkDescriptor::new(
                "NMG_lib",
                "https://applitools.jfrog.io/artifactory/nmg/android/instrumentation/NMG_lib.zip",
            ),
        }
    }
}

impl FromStr for SdkKind {
    type Err = PatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ios_classic" => Ok(SdkKind::IosClassic),
            "ios_nmg" => Ok(SdkKind::IosNmg),
            "android_nmg" => Ok(SdkKind::AndroidNmg),
            other => Err(PatchError::UnknownSdk(other.to_string())),
        }
    }
}

impl fmt::Display for SdkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Catalogue entry for one SDK variant.
///
/// Immutable once constructed: a human-readable name that matches the
/// top-level folder inside the SDK archive, and the locator (URL or local
/// path) its bytes are fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkDescriptor {
    name: &'static str,
    locator: &'static str,
}

impl SdkDescriptor {
    pub(crate) fn new(name: &'static str, locator: &'static str) -> Self {
        Self { name, locator }
    }

    /// The archive's top-level folder name, e.g. `UFG_lib.xcframework`.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Where the archive is fetched from.
    pub fn locator(&self) -> &'static str {
        self.locator
    }
}

impl fmt::Display for SdkDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SdkDescriptor<{}>", self.name)
    }
}

/// Package format, derived from the target path's extension.
///
/// # Example
///
/// ```
/// use mopatch_core::PackageKind;
/// use std::path::Path;
///
/// let kind = PackageKind::from_path(Path::new("My.ipa")).unwrap();
/// assert_eq!(kind, PackageKind::Ipa);
/// assert!(PackageKind::from_path(Path::new("My.zip")).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    /// An unpacked iOS `.app` bundle directory.
    App,
    /// A zipped, possibly signed iOS `.ipa` archive.
    Ipa,
    /// An Android `.apk` package.
    Apk,
}

impl PackageKind {
    /// Derives the package format from a path's extension.
    ///
    /// Returns [`PatchError::UnsupportedPackage`] for anything that is not
    /// `.app`, `.ipa` or `.apk`. Callers check this before fetching any
    /// SDK payload so unsupported targets fail fast.
    pub fn from_path(path: &Path) -> Result<Self, PatchError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("app") => Ok(PackageKind::App),
            Some("ipa") => Ok(PackageKind::Ipa),
            Some("apk") => Ok(PackageKind::Apk),
            _ => Err(PatchError::UnsupportedPackage(path.to_path_buf())),
        }
    }

    /// Returns the string representation of the format.
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageKind::App => "app",
            PackageKind::Ipa => "ipa",
            PackageKind::Apk => "apk",
        }
    }
}

/// Code-signing credentials for `.ipa` targets.
///
/// Both fields are optional; signing is attempted only when both are
/// present and the host is macOS, otherwise the signing stage is skipped
/// (this is not an error; the patched bundle can be signed manually).
#[derive(Debug, Clone, Default)]
pub struct SigningMaterial {
    /// Name of the signing certificate, as known to the keychain.
    pub certificate: Option<String>,
    /// Path to the provisioning profile to embed.
    pub provisioning_profile: Option<PathBuf>,
}

impl SigningMaterial {
    /// Returns `true` when both credentials are present.
    pub fn is_complete(&self) -> bool {
        self.certificate.is_some() && self.provisioning_profile.is_some()
    }
}
