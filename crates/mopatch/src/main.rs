use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use mopatch_core::{Instrumenter, PackageKind, SdkKind, SdkResolver, SigningMaterial};

mod fetch;

/// CLI for embedding a visual-testing instrumentation SDK into a prebuilt
/// mobile app package.
#[derive(Parser, Debug)]
#[command(
    name = "mopatch",
    author,
    version = &*Box::leak(version_string().into_boxed_str()),
    about = "Embed a visual-testing instrumentation SDK into a `.app`, `.ipa` or `.apk`",
    long_about = None
)]
struct Cli {
    /// Path to the `.app`, `.ipa` or `.apk` package to instrument
    path_to_app: PathBuf,

    /// SDK variant to embed
    #[arg(value_enum)]
    sdk: SdkArg,

    /// Verbose mode
    #[arg(short, long)]
    verbose: bool,

    /// Name of the signing certificate to re-sign an `.ipa` with
    #[arg(long)]
    certificate: Option<String>,

    /// Provisioning profile to embed when re-signing an `.ipa`
    #[arg(long)]
    provisioning_profile: Option<PathBuf>,

    /// Optional output path for a JSON run summary
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
#[clap(rename_all = "snake_case")]
enum SdkArg {
    /// Classic iOS helper framework
    IosClassic,
    /// Next-generation iOS framework
    IosNmg,
    /// Next-generation Android instrumentation module
    AndroidNmg,
}

impl From<SdkArg> for SdkKind {
    fn from(arg: SdkArg) -> Self {
        match arg {
            SdkArg::IosClassic => SdkKind::IosClassic,
            SdkArg::IosNmg => SdkKind::IosNmg,
            SdkArg::AndroidNmg => SdkKind::AndroidNmg,
        }
    }
}

/// Version line listing the embedded SDK catalogue.
fn version_string() -> String {
    let sdks: Vec<&str> = SdkKind::ALL
        .iter()
        .map(|kind| kind.descriptor().name())
        .collect();
    format!("{} (SDKs: {})", env!("CARGO_PKG_VERSION"), sdks.join(", "))
}

#[derive(Debug, Serialize)]
struct RunSummary {
    package: PathBuf,
    format: String,
    sdk: String,
    artifact: PathBuf,
    instrumented: bool,
}

fn main() -> Result<()> {
    load_dotenv();
    let cli = Cli::parse();
    if !run(&cli)? {
        bail!("failed to instrument `{}`", cli.path_to_app.display());
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<bool> {
    // Fail on bad targets before any SDK download starts.
    let format = validate_path_to_app(&cli.path_to_app)?;
    let sdk_kind = SdkKind::from(cli.sdk);

    println!("Instrumentation start");
    println!("Getting assets...");
    let fetcher = fetch::fetcher_from_env(cli.verbose)?;
    let resolver = SdkResolver::new(fetcher).verbose(cli.verbose);
    let resolved = resolver.resolve(sdk_kind)?;

    let signing = SigningMaterial {
        certificate: cli.certificate.clone(),
        provisioning_profile: cli.provisioning_profile.clone(),
    };
    let instrumenter = Instrumenter::new(&cli.path_to_app, &resolved, signing, cli.verbose)?;
    let instrumented = instrumenter.instrument()?;

    let summary = RunSummary {
        package: cli.path_to_app.clone(),
        format: format.as_str().to_string(),
        sdk: sdk_kind.to_string(),
        artifact: instrumenter.artifact_location(),
        instrumented,
    };
    write_summary(&summary, cli.output.as_deref())?;

    Ok(instrumented)
    // `resolved` drops here, removing the extracted SDK payload.
}

fn validate_path_to_app(path: &Path) -> Result<PackageKind> {
    if !path.exists() {
        bail!("path `{}` does not exist", path.display());
    }
    Ok(PackageKind::from_path(path)?)
}

fn write_summary(summary: &RunSummary, output: Option<&Path>) -> Result<()> {
    let Some(path) = output else {
        return Ok(());
    };
    let json = serde_json::to_string_pretty(summary)?;
    fs::write(path, json).with_context(|| format!("writing run summary to {path:?}"))?;
    println!("Run summary written to {path:?}");
    Ok(())
}

fn load_dotenv() {
    let _ = dotenvy::from_filename(".env.local");
}
