//! Re-signing of patched `.ipa` bundles.
//!
//! Adding a framework to a signed bundle invalidates its signature, so the
//! `.ipa` patcher re-signs every signable component after the copy. The
//! entitlements are regenerated from the supplied provisioning profile (a
//! CMS envelope decoded by the platform's signing-identity tool), and the
//! components are processed innermost-first: signing a container seals its
//! contents, so a nested framework signed after its `.app` would invalidate
//! the outer signature and produce a bundle the device refuses to launch.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Command;

use walkdir::WalkDir;

use crate::types::{PatchError, SigningMaterial};

const SECURITY: &str = "/usr/bin/security";
const CODESIGN: &str = "/usr/bin/codesign";

/// Extensions of signable components inside an extracted bundle.
const SIGNABLE_FILE_EXTS: [&str; 1] = ["dylib"];
const SIGNABLE_DIR_EXTS: [&str; 3] = ["app", "appex", "framework"];

/// Signs every signable component of an extracted `.ipa` bundle.
pub struct Signer {
    material: SigningMaterial,
    verbose: bool,
}

impl Signer {
    /// Creates a signer for the given credentials.
    pub fn new(material: SigningMaterial) -> Self {
        Self {
            material,
            verbose: false,
        }
    }

    /// Enables verbose output
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Re-signs the bundle rooted at `app_bundle` inside `extracted_root`.
    ///
    /// Skips silently (this is not an error) when either credential is
    /// missing or the host has no native code-signing tool; only macOS
    /// ships one. Otherwise the provisioning profile is embedded, its
    /// entitlements are written to `entitlements_path`, and every
    /// component under `extracted_root` is signed innermost-first.
    pub fn sign(
        &self,
        extracted_root: &Path,
        app_bundle: &Path,
        entitlements_path: &Path,
    ) -> Result<(), PatchError> {
        let (Some(certificate), Some(profile)) = (
            self.material.certificate.as_deref(),
            self.material.provisioning_profile.as_deref(),
        ) else {
            if self.verbose {
                println!(
                    "  No certificate and provisioning profile provided. Skip signing..."
                );
            }
            return Ok(());
        };
        if !cfg!(target_os = "macos") {
            println!("Signing is available only on macOS. Skip signing...");
            return Ok(());
        }

        let embedded_profile = app_bundle.join("embedded.mobileprovision");
        fs::copy(profile, &embedded_profile)?;
        if self.verbose {
            println!("  Resigning with certificate: {certificate}");
        }

        let components = collect_signable(extracted_root)?;
        extract_entitlements(&embedded_profile, entitlements_path)?;
        for component in &components {
            self.sign_component(component, certificate, entitlements_path)?;
        }
        Ok(())
    }

    fn sign_component(
        &self,
        component: &Path,
        certificate: &str,
        entitlements_path: &Path,
    ) -> Result<(), PatchError> {
        if self.verbose {
            println!("  Signing {}", component.display());
        }
        let output = Command::new(CODESIGN)
            .arg("--continue")
            .arg("-f")
            .arg("-s")
            .arg(certificate)
            .arg("--entitlements")
            .arg(entitlements_path)
            .arg(component)
            .output()
            .map_err(|e| PatchError::Signing(format!("failed to run codesign: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PatchError::Signing(format!(
                "codesign failed for {}: {}",
                component.display(),
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Decodes the provisioning profile and persists its entitlements as an
/// XML property list.
///
/// The profile is a CMS/PKCS7 envelope; the signing-identity tool decrypts
/// it to a plist whose `Entitlements` dictionary is what codesign needs.
fn extract_entitlements(profile: &Path, entitlements_path: &Path) -> Result<(), PatchError> {
    let output = Command::new(SECURITY)
        .arg("cms")
        .arg("-D")
        .arg("-i")
        .arg(profile)
        .output()
        .map_err(|e| PatchError::Signing(format!("failed to run security: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PatchError::Signing(format!(
            "security cms failed for {}: {}",
            profile.display(),
            stderr.trim()
        )));
    }

    let decoded = plist::Value::from_reader(Cursor::new(&output.stdout))?;
    let entitlements = decoded
        .as_dictionary()
        .and_then(|dict| dict.get("Entitlements"))
        .ok_or_else(|| {
            PatchError::Signing(format!(
                "no Entitlements section in provisioning profile {}",
                profile.display()
            ))
        })?;
    entitlements.to_file_xml(entitlements_path)?;
    Ok(())
}

/// Collects every signable component under `root`, innermost-first.
///
/// A contents-first walk yields nested frameworks, extensions and dylibs
/// strictly before the bundles that contain them; that order is what keeps
/// the outer signatures valid.
pub(crate) fn collect_signable(root: &Path) -> Result<Vec<PathBuf>, PatchError> {
    let mut components = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).contents_first(true) {
        let entry = entry.map_err(|e| {
            PatchError::Io(std::io::Error::other(format!(
                "failed to walk bundle: {e}"
            )))
        })?;
        let path = entry.path();
        let Some(ext) = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
        else {
            continue;
        };
        if entry.file_type().is_file() && SIGNABLE_FILE_EXTS.contains(&ext.as_str()) {
            components.push(path.to_path_buf());
        } else if entry.file_type().is_dir() && SIGNABLE_DIR_EXTS.contains(&ext.as_str()) {
            components.push(path.to_path_buf());
        }
    }
    Ok(components)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_signable_order_is_innermost_first() {
        let workspace = TempDir::new().unwrap();
        let root = workspace.path();
        let app = root.join("Payload/Demo.app");
        let nested = app.join("Frameworks/UFG_lib.xcframework/ios-arm64/UFG_lib.framework");
        touch(&nested.join("UFG_lib"));
        touch(&app.join("Frameworks/libswiftCore.dylib"));
        touch(&app.join("Demo"));

        let components = collect_signable(root).unwrap();

        let pos = |suffix: &str| {
            components
                .iter()
                .position(|p| p.ends_with(suffix))
                .unwrap_or_else(|| panic!("{suffix} not collected from {components:?}"))
        };
        assert!(pos("UFG_lib.framework") < pos("Demo.app"));
        assert!(pos("libswiftCore.dylib") < pos("Demo.app"));
    }

    #[test]
    fn test_signable_selection() {
        let workspace = TempDir::new().unwrap();
        let root = workspace.path();
        let app = root.join("Payload/Demo.app");
        touch(&app.join("Demo"));
        touch(&app.join("Info.plist"));
        touch(&app.join("Frameworks/lib.dylib"));
        touch(&app.join("PlugIns/Widget.appex/Widget"));
        touch(&app.join("Assets.car"));

        let components = collect_signable(root).unwrap();
        let names: Vec<String> = components
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert!(names.contains(&"Demo.app".to_string()));
        assert!(names.contains(&"lib.dylib".to_string()));
        assert!(names.contains(&"Widget.appex".to_string()));
        assert!(!names.contains(&"Info.plist".to_string()));
        assert!(!names.contains(&"Assets.car".to_string()));
    }

    #[test]
    #[cfg(not(target_os = "macos"))]
    fn test_sign_skips_off_platform() {
        let workspace = TempDir::new().unwrap();
        let profile = workspace.path().join("dist.mobileprovision");
        fs::write(&profile, b"cms blob").unwrap();
        let bundle = workspace.path().join("Payload/Demo.app");
        fs::create_dir_all(&bundle).unwrap();

        let signer = Signer::new(SigningMaterial {
            certificate: Some("iPhone Distribution".to_string()),
            provisioning_profile: Some(profile),
        });
        // Not an error: the host simply has no codesign tool.
        signer
            .sign(
                workspace.path(),
                &bundle,
                &workspace.path().join("entitlements.plist"),
            )
            .unwrap();
    }

    #[test]
    fn test_sign_skips_without_credentials() {
        let workspace = TempDir::new().unwrap();
        let bundle = workspace.path().join("Payload/Demo.app");
        fs::create_dir_all(&bundle).unwrap();

        let signer = Signer::new(SigningMaterial::default());
        signer
            .sign(
                workspace.path(),
                &bundle,
                &workspace.path().join("entitlements.plist"),
            )
            .unwrap();
        assert!(!bundle.join("embedded.mobileprovision").exists());
    }
}
