use std::path::{Path, PathBuf};

use log::{info, warn};
use rebundle_core::{BundleInstaller, InstallMode, InstallOutcome, needs_refresh, preferred_bundle};
use rebundle_platform::AppPaths;

use crate::error::CliError;
use crate::settings::AppSettings;
use crate::state::InstalledState;

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Download a bundle and install it in one step
    Fetch {
        /// Bundle URL
        url: String,
        /// Destination file (defaults to the managed bundle path)
        #[arg(long)]
        dest: Option<PathBuf>,
        /// Run the download on a background task and wait for its completion
        #[arg(long)]
        background: bool,
    },
    /// Install a published bundle version if it is not already installed
    Refresh {
        /// Version name to install
        #[arg(long)]
        version: String,
        /// App key used in the bundle URL template
        #[arg(long)]
        app_key: Option<String>,
    },
    /// Show the installed bundle
    Show,
}

pub fn run(command: Command, settings: &AppSettings) -> Result<bool, CliError> {
    let paths = AppPaths::new()?;

    match command {
        Command::Fetch {
            url,
            dest,
            background,
        } => {
            let dest = dest.unwrap_or_else(|| paths.bundle_file(&settings.bundle_file_name));
            let mode = if background {
                InstallMode::Background
            } else {
                InstallMode::Blocking
            };
            install(settings, &url, &dest, mode)
        }
        Command::Refresh { version, app_key } => refresh(settings, &paths, &version, app_key),
        Command::Show => {
            show(settings, &paths);
            Ok(true)
        }
    }
}

fn install(
    settings: &AppSettings,
    url: &str,
    dest: &Path,
    mode: InstallMode,
) -> Result<bool, CliError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;
    let installer = BundleInstaller::new(settings.fetch_timeouts(), runtime.handle().clone())?;

    let pending = installer.fetch_and_install(url, dest, mode);
    let outcome = installer.wait(pending);
    report(&outcome, dest);
    Ok(outcome.is_installed())
}

fn refresh(
    settings: &AppSettings,
    paths: &AppPaths,
    version: &str,
    app_key: Option<String>,
) -> Result<bool, CliError> {
    let settings_file = paths.settings_file().display().to_string();
    let location = settings
        .bundle_location()
        .ok_or_else(|| CliError::MissingTemplate {
            settings: settings_file.clone(),
        })??;
    let app_key = app_key
        .or_else(|| settings.app_key.clone())
        .ok_or(CliError::MissingAppKey {
            settings: settings_file,
        })?;

    let dest = paths.bundle_file(location.file_name());
    let installed = InstalledState::load();
    let installed_version = installed.as_ref().map(|state| state.version_name.as_str());

    if !needs_refresh(installed_version, version, &dest) {
        info!("Bundle {version} is already installed at {}", dest.display());
        println!("Bundle {} is up to date", version.trim());
        return Ok(true);
    }

    let url = location.bundle_url(&app_key, version)?;
    let installed = install(settings, &url, &dest, InstallMode::Blocking)?;

    if installed && let Err(error) = InstalledState::new(version.trim()).save() {
        warn!("Failed to record installed bundle version {version}: {error}");
    }

    Ok(installed)
}

fn show(settings: &AppSettings, paths: &AppPaths) {
    let dest = paths.bundle_file(&settings.bundle_file_name);

    match preferred_bundle(&dest) {
        Some(path) => println!("Bundle: {}", path.display()),
        None => println!("Bundle: none (expected at {})", dest.display()),
    }

    match InstalledState::load() {
        Some(state) => println!(
            "Version: {} (installed {})",
            state.version_name,
            state.installed_at.to_rfc3339()
        ),
        None => println!("Version: unknown"),
    }
}

fn report(outcome: &InstallOutcome, dest: &Path) {
    match outcome {
        InstallOutcome::Installed { bytes, .. } => {
            println!("Installed {bytes} bytes at {}", dest.display());
        }
        InstallOutcome::Superseded { .. } => {
            println!("Skipped: a newer download replaced this one");
        }
        InstallOutcome::Failed(error) => {
            eprintln!("Install failed: {error}");
        }
    }
}
