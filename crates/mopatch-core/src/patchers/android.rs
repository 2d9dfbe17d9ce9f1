//! Android patch strategy.
//!
//! Android packages are not patched by this tool directly: the NMG SDK
//! payload ships its own opaque instrumentation module, and this strategy
//! only drives it. The contract is narrow - hand the module the apk path,
//! let it run from inside its own payload directory, and collect the
//! finished apk (plus its log) into the artifact directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::patchers::PackagePatcher;
use crate::resolver::ResolvedSdk;
use crate::types::PatchError;

/// Directory the finished apk and module log are collected into,
/// relative to the invocation's working directory.
pub const ARTIFACT_DIR: &str = "instrumented-apk";

/// Log file the instrumentation module writes inside its payload.
const MODULE_LOG: &str = "android-nmg.log";

/// The external instrumentation module's entry point.
///
/// Implementations run the module against an apk and return the directory
/// its outputs were written to; the finished apk sits at
/// `final.apk/out-aligned-signed.apk` inside it. The module is opaque -
/// anything it reports is surfaced as [`PatchError::ExternalTool`].
pub trait ApkInstrumenter {
    /// Runs the module from `sdk_dir` against `apk`, returning its output
    /// directory.
    fn instrument(&self, sdk_dir: &Path, apk: &Path) -> Result<PathBuf, PatchError>;
}

/// Runs the NMG payload's `patchnfill.sh` entry script.
///
/// The module expects to run from inside its own payload root, so the
/// script is launched with the subprocess working directory set there; the
/// working directory of this process never changes. Outputs land in the
/// payload's `out/` directory.
pub struct NmgScriptRunner {
    verbose: bool,
}

impl NmgScriptRunner {
    /// Creates a runner for the packaged entry script.
    pub fn new() -> Self {
        Self { verbose: false }
    }

    /// Enables verbose output
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

impl Default for NmgScriptRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ApkInstrumenter for NmgScriptRunner {
    fn instrument(&self, sdk_dir: &Path, apk: &Path) -> Result<PathBuf, PatchError> {
        let entry_point = sdk_dir.join("patchnfill.sh");
        if !entry_point.exists() {
            return Err(PatchError::ExternalTool(format!(
                "entry point `{}` not found in SDK payload",
                entry_point.display()
            )));
        }

        // The module resolves paths relative to its own root; give it an
        // absolute apk path so that does not matter.
        let apk = apk.canonicalize()?;
        if self.verbose {
            println!("  Running `{}` on {:?}", entry_point.display(), apk);
        }
        let output = Command::new("bash")
            .arg(&entry_point)
            .arg(&apk)
            .current_dir(sdk_dir)
            .output()
            .map_err(|e| {
                PatchError::ExternalTool(format!("failed to run instrumentation module: {e}"))
            })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PatchError::ExternalTool(format!(
                "instrumentation module exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(sdk_dir.join("out"))
    }
}

/// Patches an `.apk` by delegating to the external instrumentation module.
pub struct ApkPatcher<I = NmgScriptRunner> {
    apk_path: PathBuf,
    artifact_dir: PathBuf,
    runner: I,
}

impl ApkPatcher {
    /// Creates a patcher driving the packaged entry script.
    pub fn new(apk_path: impl Into<PathBuf>) -> Self {
        Self::with_runner(apk_path, NmgScriptRunner::new())
    }
}

impl<I: ApkInstrumenter> ApkPatcher<I> {
    /// Creates a patcher with a custom instrumentation entry point.
    pub fn with_runner(apk_path: impl Into<PathBuf>, runner: I) -> Self {
        Self {
            apk_path: apk_path.into(),
            artifact_dir: PathBuf::from(ARTIFACT_DIR),
            runner,
        }
    }

    /// Overrides where artifacts are collected (default: `instrumented-apk/`).
    pub fn artifact_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = dir.into();
        self
    }

    /// Path the finished apk is collected to.
    pub fn ready_apk(&self) -> PathBuf {
        self.artifact_dir.join("ready.apk")
    }

    fn salvage_log(&self, sdk: &ResolvedSdk) -> Option<PathBuf> {
        let source = sdk.location().join(MODULE_LOG);
        if !source.exists() {
            return None;
        }
        let target = self.artifact_dir.join(MODULE_LOG);
        fs::copy(&source, &target).ok().map(|_| target)
    }
}

impl<I: ApkInstrumenter> PackagePatcher for ApkPatcher<I> {
    // Kept only so the common interface is satisfiable; nothing consults
    // this for Android.
    fn frameworks_dir(&self) -> PathBuf {
        self.apk_path.join("Frameworks")
    }

    fn apply(&self, sdk: &ResolvedSdk) -> Result<bool, PatchError> {
        println!("Preparing application...");
        fs::create_dir_all(&self.artifact_dir)?;

        let out_dir = match self.runner.instrument(sdk.location(), &self.apk_path) {
            Ok(dir) => dir,
            Err(err) => {
                match self.salvage_log(sdk) {
                    Some(log) => println!(
                        "Instrumentation failed with error: {err}. Please submit `{}` for diagnosis",
                        log.display()
                    ),
                    None => println!("Instrumentation failed with error: {err}. No log file"),
                }
                return Ok(false);
            }
        };

        let _ = self.salvage_log(sdk);
        println!("Collecting artifacts");
        let finished_apk = out_dir.join("final.apk").join("out-aligned-signed.apk");
        match fs::copy(&finished_apk, self.ready_apk()) {
            Ok(_) => Ok(true),
            Err(err) => {
                println!(
                    "Failed to collect instrumented apk from `{}`: {err}",
                    finished_apk.display()
                );
                Ok(false)
            }
        }
    }
}
