//! Engine configuration.
//!
//! Defaults can be overridden through `VKFRAME_*` environment variables.

use std::ffi::OsString;
use std::path::PathBuf;
use std::str::FromStr;

use crate::{Error, Result};

const ENV_PREFIX: &str = "VKFRAME_";

/// Startup parameters for the window, the Vulkan instance and the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Enable `VK_LAYER_KHRONOS_validation` and the debug messenger.
    pub validation: bool,
    /// Directory holding the compiled `.spv` shaders.
    pub shader_dir: PathBuf,
    /// RGBA clear color of the single color attachment.
    pub clear_color: [f32; 4],
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "vkframe".to_string(),
            width: 800,
            height: 600,
            validation: cfg!(debug_assertions),
            shader_dir: PathBuf::from("shaders"),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_os_vars(std::env::vars_os())
    }

    /// Defaults overlaid with `VKFRAME_*` entries from raw OS pairs.
    ///
    /// Entries outside the `VKFRAME_` namespace are skipped without being
    /// decoded, so foreign variables holding arbitrary bytes are harmless.
    ///
    /// # Errors
    ///
    /// `Error::Config` when a `VKFRAME_*` value is not valid UTF-8, plus
    /// everything [`EngineConfig::from_vars`] rejects.
    pub fn from_os_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (OsString, OsString)>,
    {
        let mut owned = Vec::new();

        for (key, value) in vars {
            let Some(key) = key.to_str().filter(|k| k.starts_with(ENV_PREFIX)) else {
                continue;
            };
            let value = value.into_string().map_err(|_| Error::Config {
                key: key.to_string(),
                reason: "value is not valid UTF-8".to_string(),
            })?;
            owned.push((key.to_string(), value));
        }

        Self::from_vars(owned)
    }

    /// Defaults overlaid with `VKFRAME_*` entries from `vars`.
    ///
    /// Unknown keys are ignored. Unparsable values are an error.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();

        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();

            match name {
                "TITLE" => config.title = value.to_string(),
                "WIDTH" => config.width = parse_dimension(key.as_ref(), value)?,
                "HEIGHT" => config.height = parse_dimension(key.as_ref(), value)?,
                "VALIDATION" => config.validation = parse_bool(key.as_ref(), value)?,
                "SHADER_DIR" => config.shader_dir = PathBuf::from(value),
                _ => {
                    tracing::warn!("Ignoring unknown setting {}", key.as_ref());
                    continue;
                }
            }

            tracing::debug!("Config override {}={}", key.as_ref(), value);
        }

        Ok(config)
    }
}

fn parse_dimension(key: &str, value: &str) -> Result<u32> {
    let parsed = u32::from_str(value).map_err(|e| Error::Config {
        key: key.to_string(),
        reason: e.to_string(),
    })?;

    if parsed == 0 {
        return Err(Error::Config {
            key: key.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }

    Ok(parsed)
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => Err(Error::Config {
            key: key.to_string(),
            reason: format!("expected a boolean, got {other:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.width, 800);
        assert_eq!(config.height, 600);
        assert_eq!(config.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(config.shader_dir, PathBuf::from("shaders"));
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::from_vars(vars(&[
            ("VKFRAME_TITLE", "Triangle"),
            ("VKFRAME_WIDTH", "1920"),
            ("VKFRAME_HEIGHT", " 1080 "),
            ("VKFRAME_VALIDATION", "off"),
            ("VKFRAME_SHADER_DIR", "/tmp/spv"),
            ("PATH", "/usr/bin"),
        ]))
        .unwrap();

        assert_eq!(config.title, "Triangle");
        assert_eq!(config.width, 1920);
        assert_eq!(config.height, 1080);
        assert!(!config.validation);
        assert_eq!(config.shader_dir, PathBuf::from("/tmp/spv"));
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let config = EngineConfig::from_vars(vars(&[("VKFRAME_COLOR", "red")])).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_invalid_dimension() {
        let err = EngineConfig::from_vars(vars(&[("VKFRAME_WIDTH", "wide")])).unwrap_err();
        assert!(matches!(err, Error::Config { ref key, .. } if key == "VKFRAME_WIDTH"));

        let err = EngineConfig::from_vars(vars(&[("VKFRAME_HEIGHT", "0")])).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_outside_namespace_skipped() {
        use std::os::unix::ffi::OsStringExt;

        let config = EngineConfig::from_os_vars(vec![
            (
                OsString::from("LC_GARBAGE"),
                OsString::from_vec(vec![0xff, 0xfe]),
            ),
            (OsString::from_vec(vec![0xff, 0x41]), OsString::from("x")),
            (OsString::from("VKFRAME_WIDTH"), OsString::from("1024")),
        ])
        .unwrap();

        assert_eq!(config.width, 1024);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_value_in_namespace() {
        use std::os::unix::ffi::OsStringExt;

        let err = EngineConfig::from_os_vars(vec![(
            OsString::from("VKFRAME_TITLE"),
            OsString::from_vec(vec![0xff, 0xfe]),
        )])
        .unwrap_err();

        assert!(matches!(err, Error::Config { ref key, .. } if key == "VKFRAME_TITLE"));
    }

    #[test]
    fn test_invalid_bool() {
        let err = EngineConfig::from_vars(vars(&[("VKFRAME_VALIDATION", "maybe")])).unwrap_err();
        assert!(err.to_string().contains("VKFRAME_VALIDATION"));
    }
}
