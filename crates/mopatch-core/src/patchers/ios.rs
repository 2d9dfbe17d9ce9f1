//! iOS patch strategies.
//!
//! `.app` bundles are plain directories, so patching one is a tree copy
//! into `Frameworks/`. An `.ipa` wraps the same bundle in a signed zip:
//! the patcher extracts it into a scoped workspace, copies the SDK in,
//! re-signs the bundle and zips the workspace back over the original
//! archive.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::archive;
use crate::patchers::{PackagePatcher, copy_tree};
use crate::resolver::ResolvedSdk;
use crate::signing::Signer;
use crate::types::{PatchError, SigningMaterial};

/// Copies the SDK payload into a bundle's `Frameworks` directory.
fn install_sdk(frameworks_dir: &Path, sdk: &ResolvedSdk) -> Result<(), PatchError> {
    fs::create_dir_all(frameworks_dir)?;
    copy_tree(sdk.location(), &frameworks_dir.join(sdk.name()))
}

/// Patches an unpacked `.app` bundle in place.
pub struct AppBundlePatcher {
    bundle: PathBuf,
}

impl AppBundlePatcher {
    /// Creates a patcher for the bundle directory at `bundle`.
    pub fn new(bundle: impl Into<PathBuf>) -> Self {
        Self {
            bundle: bundle.into(),
        }
    }
}

impl PackagePatcher for AppBundlePatcher {
    fn frameworks_dir(&self) -> PathBuf {
        self.bundle.join("Frameworks")
    }

    fn apply(&self, sdk: &ResolvedSdk) -> Result<bool, PatchError> {
        install_sdk(&self.frameworks_dir(), sdk)?;
        Ok(true)
    }
}

/// Patches a zipped `.ipa` archive in place, re-signing and re-zipping it.
///
/// Construction extracts the archive into a temporary workspace and
/// locates the single app bundle under `Payload/`; an empty or ambiguous
/// payload is fatal before anything is modified. The workspace is removed
/// when the patcher drops.
#[derive(Debug)]
pub struct IpaPatcher {
    ipa_path: PathBuf,
    extracted_dir: PathBuf,
    app_bundle: PathBuf,
    entitlements_path: PathBuf,
    signing: SigningMaterial,
    verbose: bool,
    // Owns the extraction workspace; dropping it removes the tree.
    _workspace: TempDir,
}

impl IpaPatcher {
    /// Extracts `ipa_path` into a fresh workspace and locates its bundle.
    pub fn new(
        ipa_path: impl Into<PathBuf>,
        signing: SigningMaterial,
        verbose: bool,
    ) -> Result<Self, PatchError> {
        let ipa_path = ipa_path.into();
        let workspace = TempDir::new()?;
        let extracted_dir = workspace.path().join("extracted");
        archive::extract_all(File::open(&ipa_path)?, &extracted_dir)?;
        let app_bundle = locate_payload_bundle(&ipa_path, &extracted_dir)?;

        Ok(Self {
            ipa_path,
            extracted_dir,
            app_bundle,
            entitlements_path: workspace.path().join("entitlements.plist"),
            signing,
            verbose,
            _workspace: workspace,
        })
    }
}

impl PackagePatcher for IpaPatcher {
    fn frameworks_dir(&self) -> PathBuf {
        self.app_bundle.join("Frameworks")
    }

    fn apply(&self, sdk: &ResolvedSdk) -> Result<bool, PatchError> {
        install_sdk(&self.frameworks_dir(), sdk)?;

        let signer = Signer::new(self.signing.clone()).verbose(self.verbose);
        if let Err(err) = signer.sign(&self.extracted_dir, &self.app_bundle, &self.entitlements_path)
        {
            println!(
                "Failed to sign `{}`: {err}. Please sign it manually",
                self.ipa_path.display()
            );
            return Ok(false);
        }

        // Root the archive at the extraction dir so `Payload/` stays the
        // top-level entry wherever the patch ran.
        if let Err(err) = archive::build_archive(&self.extracted_dir, &self.ipa_path) {
            println!(
                "Failed to repackage `{}`: {err}. Please repackage it manually",
                self.ipa_path.display()
            );
            return Ok(false);
        }
        Ok(true)
    }
}

/// Finds the single app bundle under `Payload/`.
fn locate_payload_bundle(ipa: &Path, extracted_dir: &Path) -> Result<PathBuf, PatchError> {
    let payload = extracted_dir.join("Payload");
    let mut entries = Vec::new();
    if payload.is_dir() {
        for entry in fs::read_dir(&payload)? {
            entries.push(entry?.path());
        }
    }
    if entries.len() != 1 {
        return Err(PatchError::AmbiguousPayload {
            ipa: ipa.to_path_buf(),
            found: entries.len(),
        });
    }
    Ok(entries.swap_remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{SdkFetch, SdkResolver};
    use crate::types::{SdkDescriptor, SdkKind};
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
        zip.start_file(format!("{name}/.DS_Store"), options).unwrap();
        zip.write_all(b"junk").unwrap();
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
            zip.start_file(format!("Payload/{bundle}/{}", bundle.trim_end_matches(".app")), options)
                .unwrap();
            zip.write_all(b"macho").unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_app_bundle_patch_copies_sdk() {
        let workspace = TempDir::new().unwrap();
        let bundle = workspace.path().join("Demo.app");
        fs::create_dir_all(&bundle).unwrap();
        let sdk = resolved_sdk(SdkKind::IosNmg);

        let patcher = AppBundlePatcher::new(&bundle);
        assert!(patcher.apply(&sdk).unwrap());

        let installed = bundle.join("Frameworks/UFG_lib.xcframework");
        assert!(installed.join("Info.plist").is_file());
        assert!(!installed.join(".DS_Store").exists());
    }

    #[test]
    fn test_ipa_patch_repackages_in_place() {
        let workspace = TempDir::new().unwrap();
        let ipa = workspace.path().join("Demo.ipa");
        write_ipa(&ipa, &["Demo.app"]);
        let sdk = resolved_sdk(SdkKind::IosClassic);

        let patcher = IpaPatcher::new(&ipa, SigningMaterial::default(), false).unwrap();
        assert!(patcher.apply(&sdk).unwrap());

        let mut archive = zip::ZipArchive::new(File::open(&ipa).unwrap()).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(
            names.contains(
                &"Payload/Demo.app/Frameworks/EyesiOSHelper.xcframework/Info.plist".to_string()
            ),
            "repackaged ipa must carry the SDK, got {names:?}"
        );
        assert!(names.iter().all(|name| name.starts_with("Payload")));
    }

    #[test]
    fn test_ipa_ambiguous_payload_fails_without_modification() {
        let workspace = TempDir::new().unwrap();
        let ipa = workspace.path().join("Demo.ipa");
        write_ipa(&ipa, &["Foo.app", "Bar.app"]);
        let original_bytes = fs::read(&ipa).unwrap();

        let err = IpaPatcher::new(&ipa, SigningMaterial::default(), false).unwrap_err();
        assert!(matches!(err, PatchError::AmbiguousPayload { found: 2, .. }));
        assert_eq!(fs::read(&ipa).unwrap(), original_bytes);
    }

    #[test]
    fn test_ipa_empty_payload_is_fatal() {
        let workspace = TempDir::new().unwrap();
        let ipa = workspace.path().join("Demo.ipa");
        write_ipa(&ipa, &[]);

        let err = IpaPatcher::new(&ipa, SigningMaterial::default(), false).unwrap_err();
        assert!(matches!(err, PatchError::AmbiguousPayload { found: 0, .. }));
    }
}
