//! Zip archive plumbing for SDK payloads and `.ipa` packages.
//!
//! This module provides the three archive operations the patch pipeline is
//! built on:
//!
//! 1. **Named-subtree extraction** - pull one folder out of an SDK archive,
//!    whatever prefix the publisher wrapped it in, preserving POSIX
//!    permission bits
//! 2. **Full extraction** - unpack an `.ipa` into a workspace directory
//! 3. **Archive building** - re-zip a directory tree with source-relative
//!    member paths, so an `.ipa` keeps `Payload/` as its top-level entry
//!    regardless of where on disk the patch ran

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use zip::read::ZipFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::types::PatchError;

/// Decides whether a zip member is a directory.
///
/// The high 16 bits of the external attributes carry the Unix file type;
/// `0x4000` is the directory bit. Archives written without Unix attributes
/// fall back to the trailing-slash convention.
fn is_directory_entry(entry: &ZipFile<'_>) -> bool {
    match entry.unix_mode() {
        Some(mode) => mode & 0x4000 != 0,
        None => entry.is_dir(),
    }
}

#[cfg(unix)]
fn is_symlink_entry(entry: &ZipFile<'_>) -> bool {
    entry
        .unix_mode()
        .is_some_and(|mode| mode & 0o170000 == 0o120000)
}

#[cfg(not(unix))]
fn is_symlink_entry(_entry: &ZipFile<'_>) -> bool {
    false
}

/// Applies the member's stored permission bits to an extracted file.
///
/// Some SDK payloads ship executable shell scripts; default extraction
/// drops the executable bit, which breaks them downstream.
#[cfg(unix)]
fn apply_unix_mode(path: &Path, mode: Option<u32>) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_unix_mode(_path: &Path, _mode: Option<u32>) -> io::Result<()> {
    Ok(())
}

/// Extracts the subtree named `name` from a zip archive into `target_root`.
///
/// SDK archives wrap their payload in varying prefixes (`UFG_lib.xcframework/...`
/// in one release, `wrapper/UFG_lib.xcframework/...` in another). This scans
/// the archive's directory members for the first whose path contains `name`
/// as an exact segment, then re-roots every member by dropping the leading
/// segments so `name` becomes the top-level entry under `target_root`.
/// Members that fall outside the subtree after re-rooting are skipped.
///
/// # Returns
///
/// The path `target_root/<name>` on success.
///
/// # Errors
///
/// * [`PatchError::MissingSubtree`] when no directory member contains `name`
/// * [`PatchError::Zip`] when the archive is malformed
/// * [`PatchError::Io`] on filesystem failures
pub fn extract_named_subtree(
    archive_bytes: &[u8],
    target_root: &Path,
    name: &str,
) -> Result<PathBuf, PatchError> {
    let mut archive = ZipArchive::new(Cursor::new(archive_bytes))?;

    // Index of the `name` segment in the first directory member carrying it.
    let mut prefix_len = None;
    for index in 0..archive.len() {
        let entry = archive.by_index(index)?;
        if !is_directory_entry(&entry) {
            continue;
        }
        if let Some(position) = entry.name().split('/').position(|segment| segment == name) {
            prefix_len = Some(position);
            break;
        }
    }
    let prefix_len = prefix_len.ok_or_else(|| PatchError::MissingSubtree(name.to_string()))?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let segments: Vec<&str> = entry
            .name()
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();

        // Members shallower than the prefix, or siblings sharing the zip
        // without sitting under `name`, are not part of the subtree.
        if segments.len() <= prefix_len || segments[prefix_len] != name {
            continue;
        }

        let mut target = target_root.to_path_buf();
        for segment in &segments[prefix_len..] {
            target.push(segment);
        }

        if is_directory_entry(&entry) {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        if write_entry(&mut entry, &target)? {
            let mode = entry.unix_mode();
            apply_unix_mode(&target, mode)?;
        }
    }

    Ok(target_root.join(name))
}

/// Extracts every member of a zip archive into `dest`, preserving
/// permission bits and symlinks.
///
/// Used to unpack an `.ipa` into its temporary workspace before patching.
pub fn extract_all<R: Read + Seek>(reader: R, dest: &Path) -> Result<(), PatchError> {
    let mut archive = ZipArchive::new(reader)?;
    fs::create_dir_all(dest)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            continue;
        };
        let target = dest.join(relative);

        if is_directory_entry(&entry) {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        if write_entry(&mut entry, &target)? {
            let mode = entry.unix_mode();
            apply_unix_mode(&target, mode)?;
        }
    }

    Ok(())
}

/// Writes a non-directory member to disk. Returns `true` when a regular
/// file was written (symlinks carry no permission bits to restore).
fn write_entry(entry: &mut ZipFile<'_>, target: &Path) -> Result<bool, PatchError> {
    #[cfg(unix)]
    if is_symlink_entry(entry) {
        use std::os::unix::fs::symlink;
        let mut link_target = String::new();
        entry.read_to_string(&mut link_target)?;
        if target.symlink_metadata().is_ok() {
            fs::remove_file(target)?;
        }
        symlink(&link_target, target)?;
        return Ok(false);
    }

    let mut out = File::create(target)?;
    io::copy(entry, &mut out)?;
    Ok(true)
}

/// Builds a deflate-compressed zip archive from a directory tree.
///
/// Member paths are stored relative to `source_dir`, so archiving an
/// `.ipa` workspace keeps `Payload/` as the top-level entry. Hidden
/// directories are pruned whole; `*~` backup files and dot-files are
/// skipped, except the literal name `.htaccess` which is retained for
/// compatibility with the exclusion rules this tool has always used.
///
/// The archive is written to a temporary file next to `destination` and
/// renamed into place only after it closes cleanly, so a failed build
/// never leaves a truncated archive at the destination.
pub fn build_archive(source_dir: &Path, destination: &Path) -> Result<(), PatchError> {
    let parent = destination.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let staging = tempfile::NamedTempFile::new_in(parent)?;
    let mut zip = ZipWriter::new(staging);

    let base_options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let walker = WalkDir::new(source_dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0 || !(entry.file_type().is_dir() && file_name_starts_with(entry.path(), '.'))
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            PatchError::Io(io::Error::other(format!("failed to walk directory: {e}")))
        })?;
        if entry.depth() == 0 {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(source_dir).map_err(|_| {
            PatchError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "failed to compute archive-relative path",
            ))
        })?;
        let member_name = relative.display().to_string();

        let metadata = fs::symlink_metadata(path)?;
        if metadata.is_dir() {
            zip.add_directory(format!("{member_name}/"), base_options)?;
        } else if metadata.file_type().is_symlink() {
            let link_target = fs::read_link(path)?;
            zip.add_symlink(
                member_name.as_str(),
                link_target.display().to_string(),
                base_options,
            )?;
        } else {
            if skip_file(path) {
                continue;
            }
            #[cfg(unix)]
            let options = {
                use std::os::unix::fs::PermissionsExt;
                base_options.unix_permissions(metadata.permissions().mode())
            };
            #[cfg(not(unix))]
            let options = base_options;

            zip.start_file(member_name.as_str(), options)?;
            let mut source = File::open(path)?;
            io::copy(&mut source, &mut zip)?;
        }
    }

    let staging = zip.finish()?;
    staging
        .persist(destination)
        .map_err(|e| PatchError::Io(e.error))?;
    Ok(())
}

fn file_name_starts_with(path: &Path, ch: char) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(ch))
}

/// Editor backups and hidden files have no place in a repackaged bundle.
/// `.htaccess` is the one historical exception.
fn skip_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return true;
    };
    name.ends_with('~') || (name.starts_with('.') && name != ".htaccess")
}
