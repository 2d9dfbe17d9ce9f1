//! Format-specific patch strategies.
//!
//! Each supported package format gets one patcher:
//!
//! | Patcher | Format | Behavior |
//! |---------|--------|----------|
//! | [`AppBundlePatcher`] | `.app` | copy the SDK into `<bundle>/Frameworks` |
//! | [`IpaPatcher`] | `.ipa` | extract, copy, re-sign, re-zip in place |
//! | [`ApkPatcher`] | `.apk` | delegate to the external instrumentation module |
//!
//! The set is closed; new formats mean a new variant here, not open
//! extensibility.

use std::fs;
use std::path::{Path, PathBuf};

use crate::resolver::ResolvedSdk;
use crate::types::PatchError;

pub mod android;
pub mod ios;

pub use android::{ApkInstrumenter, ApkPatcher, NmgScriptRunner};
pub use ios::{AppBundlePatcher, IpaPatcher};

/// Files never copied into a target package.
const COPY_SKIP_LIST: [&str; 1] = [".DS_Store"];

/// One package format's patch strategy.
pub trait PackagePatcher {
    /// Directory inside the package that frameworks are loaded from.
    ///
    /// For Android this exists only to satisfy the interface; no caller
    /// consults it.
    fn frameworks_dir(&self) -> PathBuf;

    /// Where the named SDK lands inside the frameworks directory.
    fn install_dir(&self, sdk_name: &str) -> PathBuf {
        self.frameworks_dir().join(sdk_name)
    }

    /// Copies the SDK into place and runs whatever post-processing the
    /// format needs (signing, repackaging, external instrumentation).
    ///
    /// Returns `Ok(false)` for soft failures that were already reported
    /// with an advisory (the user can finish by hand); hard failures
    /// propagate as errors.
    fn apply(&self, sdk: &ResolvedSdk) -> Result<bool, PatchError>;
}

/// Recursively copies a directory tree, skipping junk files at every depth.
///
/// The destination's top-level directory must not exist yet; callers that
/// want idempotent re-instrumentation remove it first.
pub(crate) fn copy_tree(src: &Path, dest: &Path) -> Result<(), PatchError> {
    fs::create_dir(dest)?;
    copy_tree_contents(src, dest)
}

fn copy_tree_contents(src: &Path, dest: &Path) -> Result<(), PatchError> {
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_name = entry.file_name();
        if let Some(name) = file_name.to_str() {
            if COPY_SKIP_LIST.contains(&name) {
                continue;
            }
        }
        let source = entry.path();
        let target = dest.join(&file_name);
        if entry.file_type()?.is_dir() {
            fs::create_dir(&target)?;
            copy_tree_contents(&source, &target)?;
        } else {
            fs::copy(&source, &target)?;
        }
    }
    Ok(())
}
