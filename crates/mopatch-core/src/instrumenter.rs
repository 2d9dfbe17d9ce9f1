//! Instrumentation orchestrator.
//!
//! Selects the patch strategy from the package extension, handles
//! re-instrumentation of packages that already carry the SDK, runs the
//! patcher and reports the terminal outcome. Soft failures (signing or
//! repackaging the user can finish by hand) come back as `Ok(false)`;
//! anything unexpected propagates as an error.

use std::fs;
use std::path::{Path, PathBuf};

use crate::patchers::{
    ApkPatcher, AppBundlePatcher, IpaPatcher, NmgScriptRunner, PackagePatcher, android,
};
use crate::resolver::ResolvedSdk;
use crate::types::{PackageKind, PatchError, SigningMaterial};

/// Drives one instrumentation run against a single package.
pub struct Instrumenter<'a> {
    path_to_app: PathBuf,
    kind: PackageKind,
    sdk: &'a ResolvedSdk,
    patcher: Box<dyn PackagePatcher>,
    verbose: bool,
}

impl std::fmt::Debug for Instrumenter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrumenter")
            .field("path_to_app", &self.path_to_app)
            .field("kind", &self.kind)
            .field("sdk", &self.sdk)
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

impl<'a> Instrumenter<'a> {
    /// Prepares an instrumentation run for the package at `path_to_app`.
    ///
    /// The package format is derived from the extension; unsupported
    /// extensions fail here, before anything is touched. For `.ipa`
    /// targets this also extracts the archive and validates its payload,
    /// so an ambiguous `Payload/` is rejected up front.
    pub fn new(
        path_to_app: &Path,
        sdk: &'a ResolvedSdk,
        signing: SigningMaterial,
        verbose: bool,
    ) -> Result<Self, PatchError> {
        let kind = PackageKind::from_path(path_to_app)?;
        let path_to_app = path_to_app.canonicalize()?;
        let patcher: Box<dyn PackagePatcher> = match kind {
            PackageKind::App => Box::new(AppBundlePatcher::new(&path_to_app)),
            PackageKind::Ipa => Box::new(IpaPatcher::new(&path_to_app, signing, verbose)?),
            PackageKind::Apk => Box::new(ApkPatcher::with_runner(
                &path_to_app,
                NmgScriptRunner::new().verbose(verbose),
            )),
        };
        Ok(Self {
            path_to_app,
            kind,
            sdk,
            patcher,
            verbose,
        })
    }

    /// Whether the package already carries this SDK.
    ///
    /// Android is exempt: the external instrumentation module manages its
    /// own idempotence, so every apk run is treated as fresh.
    pub fn was_already_instrumented(&self) -> bool {
        self.kind != PackageKind::Apk && self.patcher.install_dir(self.sdk.name()).exists()
    }

    /// Where the instrumented artifact ends up.
    ///
    /// `.app` and `.ipa` packages are patched in place; `.apk` runs
    /// produce a fresh artifact under the working directory.
    pub fn artifact_location(&self) -> PathBuf {
        match self.kind {
            PackageKind::Apk => Path::new(android::ARTIFACT_DIR).join("ready.apk"),
            _ => self.path_to_app.clone(),
        }
    }

    /// Applies the SDK, replacing any previous installation.
    ///
    /// Returns `Ok(true)` on success, `Ok(false)` when the patcher
    /// reported a soft failure (already printed with guidance), and an
    /// error for anything unexpected.
    pub fn instrument(&self) -> Result<bool, PatchError> {
        if self.was_already_instrumented() {
            if self.verbose {
                println!("App already instrumented. Updating...");
            }
            fs::remove_dir_all(self.patcher.install_dir(self.sdk.name()))?;
        }

        if !self.patcher.apply(self.sdk)? {
            println!("Failed to instrument `{}`", self.path_to_app.display());
            return Ok(false);
        }

        if self.verbose {
            println!(
                "`{}` framework was added to `{}`",
                self.sdk.name(),
                self.patcher.install_dir(self.sdk.name()).display()
            );
        }
        match self.kind {
            PackageKind::Apk => {
                println!("Application is ready at {}", self.artifact_location().display());
            }
            _ => {
                println!(
                    "`{}` is ready for use with the `{}`",
                    self.path_to_app.display(),
                    self.sdk.name()
                );
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{SdkFetch, SdkResolver};
    use crate::types::{SdkDescriptor, SdkKind};
    use std::fs::File;
    use std::io::{Cursor, Write};
    use tempfile::TempDir;
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    struct FixtureFetcher(Vec<u8>);

    impl SdkFetch for FixtureFetcher {
        fn fetch(&self, _descriptor: &SdkDescriptor) -> Result<Vec<u8>, PatchError> {
            Ok(self.0.clone())
        }
    }

    fn resolved_sdk(kind: SdkKind) -> ResolvedSdk {
        let name = kind.descriptor().name();
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        zip.add_directory(format!("{name}/"), options).unwrap();
        zip.start_file(format!("{name}/Info.plist"), options).unwrap();
        zip.write_all(b"<plist/>").unwrap();
        let bytes = zip.finish().unwrap().into_inner();
        SdkResolver::new(FixtureFetcher(bytes)).resolve(kind).unwrap()
    }

    fn write_ipa(path: &Path, bundles: &[&str]) {
        let mut zip = ZipWriter::new(File::create(path).unwrap());
        let options = SimpleFileOptions::default();
        zip.add_directory("Payload/", options).unwrap();
        for bundle in bundles {
            zip.add_directory(format!("Payload/{bundle}/"), options).unwrap();
            zip.start_file(format!("Payload/{bundle}/Info.plist"), options)
                .unwrap();
            zip.write_all(b"<plist/>").unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_unsupported_extension_fails_fast() {
        let workspace = TempDir::new().unwrap();
        let target = workspace.path().join("demo.zip");
        std::fs::write(&target, b"zip").unwrap();
        let sdk = resolved_sdk(SdkKind::IosNmg);

        let err =
            Instrumenter::new(&target, &sdk, SigningMaterial::default(), false).unwrap_err();
        assert!(matches!(err, PatchError::UnsupportedPackage(_)));
    }

    #[test]
    fn test_app_bundle_instrumentation() {
        let workspace = TempDir::new().unwrap();
        let bundle = workspace.path().join("Demo.app");
        fs::create_dir_all(&bundle).unwrap();
        let sdk = resolved_sdk(SdkKind::IosNmg);

        let instrumenter =
            Instrumenter::new(&bundle, &sdk, SigningMaterial::default(), false).unwrap();
        assert!(!instrumenter.was_already_instrumented());
        assert!(instrumenter.instrument().unwrap());

        assert!(bundle
            .join("Frameworks/UFG_lib.xcframework/Info.plist")
            .is_file());
    }

    #[test]
    fn test_reinstrumentation_replaces_sdk_subtree() {
        let workspace = TempDir::new().unwrap();
        let bundle = workspace.path().join("Demo.app");
        fs::create_dir_all(&bundle).unwrap();
        let sdk = resolved_sdk(SdkKind::IosClassic);

        let instrumenter =
            Instrumenter::new(&bundle, &sdk, SigningMaterial::default(), false).unwrap();
        assert!(instrumenter.instrument().unwrap());

        // Leave a marker from the "previous" installation behind.
        let installed = bundle.join("Frameworks/EyesiOSHelper.xcframework");
        fs::write(installed.join("stale-marker"), b"old").unwrap();

        let instrumenter =
            Instrumenter::new(&bundle, &sdk, SigningMaterial::default(), false).unwrap();
        assert!(instrumenter.was_already_instrumented());
        assert!(instrumenter.instrument().unwrap());

        assert!(installed.join("Info.plist").is_file());
        assert!(!installed.join("stale-marker").exists());
        assert!(
            !installed.join("EyesiOSHelper.xcframework").exists(),
            "re-instrumentation must replace, not nest"
        );
    }

    #[test]
    fn test_ipa_instrumentation_round_trip() {
        let workspace = TempDir::new().unwrap();
        let ipa = workspace.path().join("Demo.ipa");
        write_ipa(&ipa, &["Demo.app"]);
        let sdk = resolved_sdk(SdkKind::IosNmg);

        let instrumenter =
            Instrumenter::new(&ipa, &sdk, SigningMaterial::default(), false).unwrap();
        assert!(instrumenter.instrument().unwrap());
        assert_eq!(instrumenter.artifact_location(), ipa.canonicalize().unwrap());

        let mut archive = zip::ZipArchive::new(File::open(&ipa).unwrap()).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(
            &"Payload/Demo.app/Frameworks/UFG_lib.xcframework/Info.plist".to_string()
        ));
    }

    #[test]
    fn test_ambiguous_ipa_payload_propagates() {
        let workspace = TempDir::new().unwrap();
        let ipa = workspace.path().join("Demo.ipa");
        write_ipa(&ipa, &["Foo.app", "Bar.app"]);
        let original_bytes = fs::read(&ipa).unwrap();
        let sdk = resolved_sdk(SdkKind::IosNmg);

        let err =
            Instrumenter::new(&ipa, &sdk, SigningMaterial::default(), false).unwrap_err();
        assert!(matches!(err, PatchError::AmbiguousPayload { found: 2, .. }));
        assert_eq!(fs::read(&ipa).unwrap(), original_bytes);
    }
}
