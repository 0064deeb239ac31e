//! Application settings loaded from a TOML config file
//!
//! The file lives at `~/.config/mic-monitor.toml` and is created with
//! commented defaults on first run.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const FILE_NAME: &str = "mic-monitor.toml";

/// Highest meaningful RMS threshold for s16 samples
pub const MAX_THRESHOLD: u32 = 32768;

const DEFAULT_CONFIG: &str = "\
[colors]
# Mic color when audio is detected above the noise floor
active = \"#50DC50\"
# Mic color when silent or muted
inactive = \"#B4B4B4\"
# Color for the monitoring badge and the mute slash
accent = \"#DC3C3C\"

[audio]
# RMS threshold (0-32768). Lower = more sensitive. Default is ~-38 dB.
threshold = 400
# Loopback latency in milliseconds
latency_ms = 1
";

/// Keys for config file settings
mod keys {
    pub const ACTIVE: &str = "colors.active";
    pub const INACTIVE: &str = "colors.inactive";
    pub const ACCENT: &str = "colors.accent";
    pub const THRESHOLD: &str = "audio.threshold";
    pub const LATENCY_MS: &str = "audio.latency_ms";
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid color {0}, expected \"#RRGGBB\"")]
    Color(String),

    #[error("invalid {key} {value}")]
    Number { key: &'static str, value: String },
}

/// On-disk layout. Values stay untyped so one bad key does not reject the file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    colors: ColorsFile,
    audio: AudioFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ColorsFile {
    active: Option<toml::Value>,
    inactive: Option<toml::Value>,
    accent: Option<toml::Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AudioFile {
    threshold: Option<toml::Value>,
    latency_ms: Option<toml::Value>,
}

/// An RGBA color
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Rgba(pub u8, pub u8, pub u8, pub u8);

impl Rgba {
    /// Parse `#RRGGBB` (the leading `#` is optional); alpha is opaque
    pub fn from_hex(value: &str) -> Result<Self, SettingsError> {
        let hex = value.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SettingsError::Color(format!("{:?}", value)));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| SettingsError::Color(format!("{:?}", value)))
        };
        Ok(Rgba(channel(0)?, channel(2)?, channel(4)?, 255))
    }
}

/// Colors for the three visual states
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Colors {
    pub active: Rgba,
    pub inactive: Rgba,
    pub accent: Rgba,
}

impl Default for Colors {
    fn default() -> Self {
        Self {
            active: Rgba(80, 220, 80, 255),
            inactive: Rgba(180, 180, 180, 255),
            accent: Rgba(220, 60, 60, 255),
        }
    }
}

/// Settings read once at startup
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub colors: Colors,
    /// RMS activity threshold on the 0-32768 scale
    pub threshold: u32,
    pub latency_ms: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            colors: Colors::default(),
            threshold: 400,
            latency_ms: 1,
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(FILE_NAME)
    }

    /// Load the config at `path`, writing the defaults there if it is missing.
    ///
    /// Invalid values are reported and replaced by their defaults; only I/O
    /// failures on an existing file are errors.
    pub fn load_or_create(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            if let Err(e) = write_default(path) {
                warn!("Could not create default config: {}", e);
            } else {
                info!("Created default config at {}", path.display());
            }
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&contents))
    }

    /// Build a config from file contents, falling back per key.
    ///
    /// A file that is not valid TOML yields the defaults.
    pub fn parse(contents: &str) -> Self {
        let mut config = Self::default();
        let file: ConfigFile = match toml::from_str(contents) {
            Ok(file) => file,
            Err(e) => {
                warn!("Config parse error ({}), using defaults", e.message());
                return config;
            }
        };

        apply(&mut config.colors.active, keys::ACTIVE, file.colors.active, color);
        apply(&mut config.colors.inactive, keys::INACTIVE, file.colors.inactive, color);
        apply(&mut config.colors.accent, keys::ACCENT, file.colors.accent, color);
        apply(&mut config.threshold, keys::THRESHOLD, file.audio.threshold, number);
        apply(&mut config.latency_ms, keys::LATENCY_MS, file.audio.latency_ms, number);
        config.threshold = config.threshold.min(MAX_THRESHOLD);

        config
    }
}

fn write_default(path: &Path) -> Result<(), SettingsError> {
    let io_err = |source: std::io::Error| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, DEFAULT_CONFIG).map_err(io_err)
}

/// Store the converted `value` in `slot`, keeping the default on failure
fn apply<T>(
    slot: &mut T,
    key: &'static str,
    value: Option<toml::Value>,
    convert: fn(&'static str, &toml::Value) -> Result<T, SettingsError>,
) {
    let Some(value) = value else {
        return;
    };
    match convert(key, &value) {
        Ok(converted) => *slot = converted,
        Err(e) => warn!("Config parse error ({}), using default for {}", e, key),
    }
}

fn color(_key: &'static str, value: &toml::Value) -> Result<Rgba, SettingsError> {
    match value.as_str() {
        Some(hex) => Rgba::from_hex(hex),
        None => Err(SettingsError::Color(value.to_string())),
    }
}

/// Accepts integers and, for hand-edited files, decimals like `400.0` or quoted numbers
fn number(key: &'static str, value: &toml::Value) -> Result<u32, SettingsError> {
    let err = || SettingsError::Number {
        key,
        value: value.to_string(),
    };
    let number = match value {
        toml::Value::Integer(i) => *i as f64,
        toml::Value::Float(f) => *f,
        toml::Value::String(s) => s.trim().parse::<f64>().map_err(|_| err())?,
        _ => return Err(err()),
    };
    if !number.is_finite() || number < 0.0 {
        return Err(err());
    }
    Ok(number.round().min(u32::MAX as f64) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_file_parses_to_defaults() {
        assert_eq!(Config::parse(DEFAULT_CONFIG), Config::default());
    }

    #[test]
    fn test_parse_overrides() {
        let config = Config::parse(
            "[colors]\nactive = \"#00ff00\"\n\n[audio]\nthreshold = 1200\nlatency_ms = 20\n",
        );
        assert_eq!(config.colors.active, Rgba(0, 255, 0, 255));
        assert_eq!(config.colors.inactive, Colors::default().inactive);
        assert_eq!(config.threshold, 1200);
        assert_eq!(config.latency_ms, 20);
    }

    #[test]
    fn test_bad_values_fall_back_per_key() {
        let config = Config::parse(
            "[colors]\naccent = \"red\"\ninactive = 7\nactive = \"#010203\"\n\
             [audio]\nthreshold = \"loud\"\nlatency_ms = 5\n",
        );
        assert_eq!(config.colors.accent, Colors::default().accent);
        assert_eq!(config.colors.inactive, Colors::default().inactive);
        assert_eq!(config.colors.active, Rgba(1, 2, 3, 255));
        assert_eq!(config.threshold, 400);
        assert_eq!(config.latency_ms, 5);
    }

    #[test]
    fn test_threshold_is_clamped() {
        assert_eq!(Config::parse("[audio]\nthreshold = 99999").threshold, MAX_THRESHOLD);
        assert_eq!(Config::parse("[audio]\nthreshold = 400.0").threshold, 400);
        assert_eq!(Config::parse("[audio]\nthreshold = \"250\"").threshold, 250);
        assert_eq!(Config::parse("[audio]\nthreshold = -3").threshold, 400);
    }

    #[test]
    fn test_keys_outside_their_section_are_ignored() {
        let config = Config::parse("threshold = 10\n[colors]\nthreshold = 10\n");
        assert_eq!(config.threshold, 400);
    }

    #[test]
    fn test_invalid_toml_uses_defaults() {
        let config = Config::parse("[colors]\nactive = #00ff00\n[audio]\nthreshold = 10\n");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_hex_parsing() {
        assert_eq!(Rgba::from_hex("#DC3C3C").unwrap(), Rgba(220, 60, 60, 255));
        assert_eq!(Rgba::from_hex("50dc50").unwrap(), Rgba(80, 220, 80, 255));
        assert!(Rgba::from_hex("#12345").is_err());
        assert!(Rgba::from_hex("#GGGGGG").is_err());
    }

    #[test]
    fn test_missing_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(FILE_NAME);
        let config = Config::load_or_create(&path).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(fs::read_to_string(&path).unwrap(), DEFAULT_CONFIG);
    }

    #[test]
    fn test_existing_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILE_NAME);
        fs::write(&path, "[audio]\nthreshold = 50\n").unwrap();
        assert_eq!(Config::load_or_create(&path).unwrap().threshold, 50);
    }
}
