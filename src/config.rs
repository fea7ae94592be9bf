use clap::{ArgAction, Parser, ValueHint};
use dirs_next::home_dir;
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}};
use thiserror::Error;

use crate::addon::SearchPaths;

/// Error type for config loading/validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

const LOG_LEVELS: &[&str] = &["off", "error", "warn", "info", "debug", "trace"];

/// Top-level host configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub log_level: Option<String>,      // e.g., "info" | "debug"
    pub settings_file: Option<PathBuf>, // addon settings store (YAML)
    pub paths: Option<PathsConfig>,
}

/// Where addons live and where the host may write.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PathsConfig {
    pub addon_root: Option<PathBuf>,        // <root>/<addon-id>/<library>
    pub binary_root: Option<PathBuf>,       // platform install root
    pub alt_binary_root: Option<PathBuf>,   // second install root
    pub extra_library_dir: Option<PathBuf>, // flat <dir>/<library>, searched last
    pub staging_dir: Option<PathBuf>,       // child copies
    pub user_data_root: Option<PathBuf>,    // per-addon profile dirs
}

/// CLI overrides. All fields are Options so we can layer them over YAML.
#[derive(Debug, Parser, Clone, Default)]
#[command(name = "addonhost", about = "Native addon host", disable_help_flag = false)]
pub struct Cli {
    /// Path to a YAML config file (overrides search)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub log_level: Option<String>,
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub settings_file: Option<PathBuf>,
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub addon_root: Option<PathBuf>,
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub binary_root: Option<PathBuf>,
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub alt_binary_root: Option<PathBuf>,
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub extra_library_dir: Option<PathBuf>,
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub staging_dir: Option<PathBuf>,
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub user_data_root: Option<PathBuf>,
    /// addon.yaml describing the addon to run
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub addon: Option<PathBuf>,
    /// instance type to create, e.g. audio_decoder
    #[arg(long, default_value = "global_main")]
    pub instance_type: String,
    #[arg(long, default_value = "cli")]
    pub instance_id: String,
    /// push stored settings into the addon once it is running
    #[arg(long, action = ArgAction::SetTrue)]
    pub transfer_settings: bool,
    /// load a private copy of the library
    #[arg(long, action = ArgAction::SetTrue)]
    pub child: bool,
    /// dump fully merged config (after overrides) and exit
    #[arg(long, action = ArgAction::SetTrue)]
    pub dump_config: bool,
}

/// Public entry point: parse CLI, read YAML, merge, validate.
pub fn load() -> Result<(Cli, Config), ConfigError> {
    let cli = Cli::parse();
    let cfg = load_from(&cli)?;

    if cli.dump_config {
        // Pretty YAML of effective config (nice for debugging)
        let s = serde_yaml::to_string(&cfg)?;
        println!("{s}");
        std::process::exit(0);
    }

    Ok((cli, cfg))
}

/// Layer defaults, YAML and CLI for an already parsed command line.
pub fn load_from(cli: &Cli) -> Result<Config, ConfigError> {
    // 1) defaults (from `Default` impl)
    let mut cfg = Config::default();

    // 2) YAML file (explicit path or search)
    if let Some(p) = cli.config.as_ref() {
        if p.exists() {
            let y = read_yaml(p)?;
            merge(&mut cfg, y);
        } else {
            return Err(ConfigError::Validation(format!(
                "Config file not found: {}",
                p.display()
            )));
        }
    } else if let Some(p) = find_config_file() {
        let y = read_yaml(&p)?;
        merge(&mut cfg, y);
    }

    // 3) CLI overrides (highest precedence)
    apply_cli_overrides(&mut cfg, cli);

    // 4) Validate
    validate(&cfg)?;

    Ok(cfg)
}

impl Config {
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    fn paths(&self) -> PathsConfig {
        self.paths.clone().unwrap_or_default()
    }

    /// Loader search order: addon root, binary root, alternate root, extra dir.
    pub fn search_paths(&self) -> SearchPaths {
        let paths = self.paths();
        let addon_root = paths
            .addon_root
            .or_else(|| home_dir().map(|h| h.join(".addonhost/addons")));
        let binary_root = paths
            .binary_root
            .or_else(|| Some(PathBuf::from("/usr/lib/addonhost/addons")));

        SearchPaths {
            fallback_roots: [addon_root, binary_root, paths.alt_binary_root]
                .into_iter()
                .flatten()
                .collect(),
            extra_library_dir: paths.extra_library_dir,
            staging_dir: paths
                .staging_dir
                .unwrap_or_else(|| std::env::temp_dir().join("addonhost")),
        }
    }

    /// Profile directory for one addon.
    pub fn user_data_dir(&self, addon_id: &str) -> PathBuf {
        let root = self
            .paths()
            .user_data_root
            .or_else(|| home_dir().map(|h| h.join(".addonhost/userdata")))
            .unwrap_or_else(|| PathBuf::from("userdata"));
        root.join(addon_id)
    }
}

/// Try common locations in order (first hit wins).
fn find_config_file() -> Option<PathBuf> {
    // XDG-style: ~/.config/addonhost/config.yaml
    if let Some(home) = home_dir() {
        let p = home.join(".config/addonhost/config.yaml");
        if p.exists() { return Some(p) }
        let p = home.join(".config/addonhost.yaml");
        if p.exists() { return Some(p) }
    }
    // project local
    for candidate in &["addonhost.yaml", "config.yaml", "config/addonhost.yaml"] {
        let p = PathBuf::from(candidate);
        if p.exists() { return Some(p) }
    }
    None
}

fn read_yaml(path: &Path) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&s)?;
    Ok(cfg)
}

/// Shallow merge `src` into `dst`, Option-by-Option.
fn merge(dst: &mut Config, src: Config) {
    // top-level
    if src.log_level.is_some()      { dst.log_level = src.log_level; }
    if src.settings_file.is_some()  { dst.settings_file = src.settings_file; }
    // paths
    match (&mut dst.paths, src.paths) {
        (None, Some(p)) => dst.paths = Some(p),
        (Some(d), Some(s)) => merge_paths(d, s),
        _ => {}
    }
}

fn merge_paths(dst: &mut PathsConfig, src: PathsConfig) {
    if src.addon_root.is_some()         { dst.addon_root = src.addon_root; }
    if src.binary_root.is_some()        { dst.binary_root = src.binary_root; }
    if src.alt_binary_root.is_some()    { dst.alt_binary_root = src.alt_binary_root; }
    if src.extra_library_dir.is_some()  { dst.extra_library_dir = src.extra_library_dir; }
    if src.staging_dir.is_some()        { dst.staging_dir = src.staging_dir; }
    if src.user_data_root.is_some()     { dst.user_data_root = src.user_data_root; }
}

fn apply_cli_overrides(cfg: &mut Config, cli: &Cli) {
    if cli.log_level.is_some()      { cfg.log_level = cli.log_level.clone(); }
    if cli.settings_file.is_some()  { cfg.settings_file = cli.settings_file.clone(); }

    let overrides = PathsConfig {
        addon_root: cli.addon_root.clone(),
        binary_root: cli.binary_root.clone(),
        alt_binary_root: cli.alt_binary_root.clone(),
        extra_library_dir: cli.extra_library_dir.clone(),
        staging_dir: cli.staging_dir.clone(),
        user_data_root: cli.user_data_root.clone(),
    };
    merge(cfg, Config { paths: Some(overrides), ..Config::default() });
}

/// Put any invariants here (required fields, ranges, etc.)
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if let Some(level) = cfg.log_level.as_deref() {
        if !LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "log_level must be one of {}",
                LOG_LEVELS.join("|")
            )));
        }
    }
    if let Some(paths) = cfg.paths.as_ref() {
        let named = [
            ("addon_root", &paths.addon_root),
            ("binary_root", &paths.binary_root),
            ("alt_binary_root", &paths.alt_binary_root),
            ("extra_library_dir", &paths.extra_library_dir),
            ("staging_dir", &paths.staging_dir),
            ("user_data_root", &paths.user_data_root),
        ];
        for (name, path) in named {
            if path.as_ref().is_some_and(|p| p.as_os_str().is_empty()) {
                return Err(ConfigError::Validation(format!("paths.{} must not be empty", name)));
            }
        }
        if let Some(staging) = paths.staging_dir.as_ref() {
            let roots = [&paths.addon_root, &paths.binary_root, &paths.alt_binary_root];
            if roots.iter().any(|r| r.as_ref() == Some(staging)) {
                return Err(ConfigError::Validation(
                    "paths.staging_dir must not be one of the addon roots".into(),
                ));
            }
        }
    }
    Ok(())
}
