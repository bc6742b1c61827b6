use std::{
    env,
    path::{Path, PathBuf},
};

use config::{Config, ConfigError, File};
use log::debug;
use serde::{Deserialize, Deserializer};

use crate::cli::Args;

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct Settings {
    pub token: Option<String>,
    pub path: Option<PathBuf>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub channels: Vec<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub servers: Vec<String>,
    pub divider_image: Option<PathBuf>,
}

const CONFIG_FILE_NAME: &str = env!("CARGO_PKG_NAME");
const LOCAL_CONFIG_FILE: &str = "config.ini";

// Function to get the XDG_CONFIG_HOME path
fn get_xdg_config_path() -> Option<PathBuf> {
    // First check XDG_CONFIG_HOME environment variable
    if let Ok(xdg_config) = env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config));
    }

    // If XDG_CONFIG_HOME is not set, fall back to $HOME/.config
    if let Ok(home) = env::var("HOME") {
        return Some(PathBuf::from(home).join(".config"));
    }

    None
}

/// Lists in ini files can only be written as `a, b, c`.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        String(String),
        List(Vec<String>),
    }

    let items = match Option::<StringOrList>::deserialize(deserializer)? {
        None => vec![],
        Some(StringOrList::String(value)) => value.split(',').map(str::to_string).collect(),
        Some(StringOrList::List(values)) => values,
    };

    Ok(items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect())
}

/// Reads settings from the given files, later files overriding earlier ones.
/// Keys are accepted at the top level or under a `[slack2discord]` section.
pub fn load_settings(files: &[PathBuf]) -> anyhow::Result<Settings> {
    let mut config_builder = Config::builder();
    for file in files.iter().filter(|f| f.exists()) {
        debug!("reading settings from {}", file.display());
        config_builder = config_builder.add_source(File::from(file.as_path()).required(false));
    }

    let config = config_builder.build()?;

    let settings = match config.get::<Settings>(CONFIG_FILE_NAME) {
        Ok(section) => section,
        Err(ConfigError::NotFound(_)) => config.try_deserialize()?,
        Err(e) => return Err(e.into()),
    };

    Ok(settings)
}

fn settings_files(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Some(xdg_config) = get_xdg_config_path() {
        files.push(xdg_config.join(CONFIG_FILE_NAME).join("config.toml"));
    }
    files.push(PathBuf::from(LOCAL_CONFIG_FILE));
    if let Some(path) = explicit {
        files.push(path.to_path_buf());
    }
    files
}

pub fn merge_settings_with_args(args: &Args) -> anyhow::Result<Args> {
    if let Some(path) = &args.config {
        if !path.exists() {
            anyhow::bail!("Config file {} does not exist", path.display());
        }
    }

    let settings = load_settings(&settings_files(args.config.as_deref())).map_err(|e| {
        anyhow::anyhow!("Failed to deserialize settings: {}", e)
    })?;

    Ok(apply_settings(args, settings))
}

/// Values given on the command line or in the environment win over settings.
pub fn apply_settings(args: &Args, settings: Settings) -> Args {
    let mut new_args = args.clone();

    macro_rules! apply_if_none {
        ($args:expr, $field:ident, $config:expr) => {
            if $args.$field.is_none() {
                $args.$field = $config.$field;
            }
        };
    }

    macro_rules! apply_if_empty {
        ($args:expr, $field:ident, $config:expr) => {
            if $args.$field.is_empty() {
                $args.$field = $config.$field;
            }
        };
    }

    apply_if_none!(new_args, token, settings);
    apply_if_none!(new_args, path, settings);
    apply_if_none!(new_args, divider_image, settings);
    apply_if_empty!(new_args, channels, settings);
    apply_if_empty!(new_args, servers, settings);

    debug!(
        "merged config: path={:?} channels={:?} servers={:?} token set={}",
        new_args.path,
        new_args.channels,
        new_args.servers,
        new_args.token.is_some()
    );

    new_args
}
