//! SDK archive transport.
//!
//! The patch engine only asks for raw archive bytes; this module supplies
//! the two transports the CLI wires in: a blocking HTTP client for the
//! catalogue's remote locators, and a local-directory fetcher selected via
//! the `MOPATCH_SDK_DIR` environment variable for offline and debug runs.

use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use mopatch_core::{PatchError, SdkDescriptor, SdkFetch};
use reqwest::blocking::Client;

const USER_AGENT: &str = "mopatch/0.2";

/// Environment variable naming a local directory of `<sdk-name>.zip`
/// archives that replaces network fetches.
pub const SDK_DIR_ENV: &str = "MOPATCH_SDK_DIR";

/// Fetches SDK archives over HTTP.
pub struct HttpFetcher {
    http: Client,
}

impl HttpFetcher {
    /// Builds the blocking HTTP client.
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("building HTTP client")?;
        Ok(Self { http })
    }
}

impl SdkFetch for HttpFetcher {
    fn fetch(&self, descriptor: &SdkDescriptor) -> Result<Vec<u8>, PatchError> {
        let locator = descriptor.locator();
        let fetch_err = |reason: String| PatchError::Fetch {
            locator: locator.to_string(),
            reason,
        };

        let response = self
            .http
            .get(locator)
            .send()
            .map_err(|e| fetch_err(e.to_string()))?
            .error_for_status()
            .map_err(|e| fetch_err(e.to_string()))?;
        let bytes = response.bytes().map_err(|e| fetch_err(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Fetches SDK archives from a local directory, keyed by `<name>.zip`.
pub struct DirFetcher {
    dir: PathBuf,
}

impl DirFetcher {
    /// Creates a fetcher reading archives from `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SdkFetch for DirFetcher {
    fn fetch(&self, descriptor: &SdkDescriptor) -> Result<Vec<u8>, PatchError> {
        let path = self.dir.join(format!("{}.zip", descriptor.name()));
        fs::read(&path).map_err(|e| PatchError::Fetch {
            locator: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

/// Selects the fetch transport from the environment.
pub fn fetcher_from_env(verbose: bool) -> Result<Box<dyn SdkFetch>> {
    if let Ok(dir) = env::var(SDK_DIR_ENV) {
        if verbose {
            println!("  Loading SDK archives from local directory `{dir}`");
        }
        Ok(Box::new(DirFetcher::new(dir)))
    } else {
        Ok(Box::new(HttpFetcher::new()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_dir_fetcher_reads_archive_by_name() {
        let dir = TempDir::new().unwrap();
        let descriptor = mopatch_core::SdkKind::AndroidNmg.descriptor();
        fs::write(dir.path().join("NMG_lib.zip"), b"zip bytes").unwrap();

        let fetcher = DirFetcher::new(dir.path());
        assert_eq!(fetcher.fetch(&descriptor).unwrap(), b"zip bytes");
    }

    #[test]
    fn test_dir_fetcher_reports_missing_archive() {
        let dir = TempDir::new().unwrap();
        let descriptor = mopatch_core::SdkKind::IosNmg.descriptor();

        let fetcher = DirFetcher::new(dir.path());
        let err = fetcher.fetch(&descriptor).unwrap_err();
        match err {
            PatchError::Fetch { locator, .. } => {
                assert!(locator.ends_with("UFG_lib.xcframework.zip"));
            }
            other => panic!("expected Fetch error, got {other:?}"),
        }
    }
}
