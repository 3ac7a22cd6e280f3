//! Where the noise meter keeps its files, resolved with the `dirs` crate.
//!
//! ```text
//! <config dir>/noise-meter/settings.toml
//!     Linux  ~/.config   macOS ~/Library/Application Support   Windows %APPDATA%
//! <data dir>/noise-meter/reports/report-<timestamp>.json
//!     Linux  ~/.local/share   macOS ~/Library/Application Support   Windows %LOCALAPPDATA%
//! ```

use std::path::{Path, PathBuf};

const APP_DIR: &str = "noise-meter";

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    /// `settings.toml` inside `config_dir`.
    pub settings_file: PathBuf,
    /// Directory `measure --save-report` writes JSON reports to.
    pub reports_dir: PathBuf,
}

impl AppPaths {
    /// Platform directories; the current directory stands in for any the
    /// platform cannot provide.
    pub fn new() -> Self {
        let here = || PathBuf::from(".");
        Self::under(
            &dirs::config_dir().unwrap_or_else(here),
            &dirs::data_local_dir().unwrap_or_else(here),
        )
    }

    /// Layout rooted at explicit base directories.
    pub fn under(config_base: &Path, data_base: &Path) -> Self {
        let config_dir = config_base.join(APP_DIR);
        Self {
            settings_file: config_dir.join("settings.toml"),
            reports_dir: data_base.join(APP_DIR).join("reports"),
            config_dir,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}
