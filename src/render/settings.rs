//! Core configuration and the named render settings.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

use crate::{Error, Result};

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV: &str = "WAVEFRONT_CONFIG";

/// Scalar controls adjustable between frames through [`Setting`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Geometric ray-offset bias.
    pub epsilon: f32,
    /// Radiance clamp for indirect contributions.
    #[serde(rename = "clampValue")]
    pub clamp_value: f32,
    #[serde(rename = "clampDirect")]
    pub clamp_direct: f32,
    #[serde(rename = "clampIndirect")]
    pub clamp_indirect: f32,
    /// Denoise pipeline.
    pub filter: bool,
    /// Temporal blending (needs `filter`).
    #[serde(rename = "TAA")]
    pub taa: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            epsilon: 1.0e-4,
            clamp_value: 10.0,
            clamp_direct: 8.0,
            clamp_indirect: 8.0,
            filter: false,
            taa: false,
        }
    }
}

/// Named setting accepted by `RenderCore::setting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    Epsilon,
    ClampValue,
    ClampDirect,
    ClampIndirect,
    Filter,
    Taa,
}

impl FromStr for Setting {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "epsilon" => Setting::Epsilon,
            "clampValue" => Setting::ClampValue,
            "clampDirect" => Setting::ClampDirect,
            "clampIndirect" => Setting::ClampIndirect,
            "filter" => Setting::Filter,
            "TAA" => Setting::Taa,
            other => return Err(Error::UnknownSetting(other.to_string())),
        })
    }
}

impl RenderSettings {
    /// Apply one setting. Returns whether the stored value changed.
    pub fn apply(&mut self, setting: Setting, value: f32) -> bool {
        fn set<T: PartialEq>(slot: &mut T, v: T) -> bool {
            if *slot == v {
                return false;
            }
            *slot = v;
            true
        }
        match setting {
            Setting::Epsilon => set(&mut self.epsilon, value),
            Setting::ClampValue => set(&mut self.clamp_value, value),
            Setting::ClampDirect => set(&mut self.clamp_direct, value),
            Setting::ClampIndirect => set(&mut self.clamp_indirect, value),
            Setting::Filter => set(&mut self.filter, value != 0.0),
            Setting::Taa => set(&mut self.taa, value != 0.0),
        }
    }
}

/// Core configuration fixed at init.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Bounce depth ceiling.
    pub max_path_length: u32,
    /// Shadow queue capacity in multiples of the path capacity.
    pub shadow_rays_per_path: u32,
    /// Reallocation reserves `pixels >> shift` extra pixels.
    pub pixel_slack_shift: u32,
    /// Absolute shadow queue capacity, overriding `shadow_rays_per_path`.
    pub shadow_queue_capacity: Option<usize>,
    /// Allocate the filter feature buffers.
    pub feature_buffers: bool,
    /// Spawn the async render worker at init.
    pub async_worker: bool,
    /// Host accelerator thread count (`None` = rayon default).
    pub threads: Option<usize>,
    pub settings: RenderSettings,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_path_length: 3,
            shadow_rays_per_path: 2,
            pixel_slack_shift: 4,
            shadow_queue_capacity: None,
            feature_buffers: true,
            async_worker: true,
            threads: None,
            settings: RenderSettings::default(),
        }
    }
}

impl CoreConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(json)?;
        config.max_path_length = config.max_path_length.max(1);
        config.shadow_rays_per_path = config.shadow_rays_per_path.max(1);
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json(&text)?;
        info!(path = %path.as_ref().display(), "loaded core config");
        Ok(config)
    }

    /// Config named by `WAVEFRONT_CONFIG`, or defaults.
    pub fn from_env() -> Self {
        let Ok(path) = std::env::var(CONFIG_ENV) else {
            return Self::default();
        };
        Self::load(&path).unwrap_or_else(|e| {
            warn!(%path, error = %e, "config not usable, using defaults");
            Self::default()
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setting_names() {
        assert_eq!("clampValue".parse::<Setting>().unwrap(), Setting::ClampValue);
        assert_eq!("TAA".parse::<Setting>().unwrap(), Setting::Taa);
        let err = "gamma".parse::<Setting>().unwrap_err();
        assert!(matches!(err, Error::UnknownSetting(ref s) if s == "gamma"));
    }

    #[test]
    fn test_apply_reports_change() {
        let mut s = RenderSettings::default();
        assert!(!s.apply(Setting::Filter, 0.0));
        assert!(s.apply(Setting::Filter, 1.0));
        assert!(s.filter);
        assert!(!s.apply(Setting::Filter, 2.0));
        assert!(s.apply(Setting::Epsilon, 1.0e-3));
        assert_eq!(s.epsilon, 1.0e-3);
    }

    #[test]
    fn test_partial_json() {
        let c = CoreConfig::from_json(r#"{ "max_path_length": 5, "settings": { "TAA": true } }"#).unwrap();
        assert_eq!(c.max_path_length, 5);
        assert!(c.settings.taa);
        assert_eq!(c.settings.clamp_value, 10.0);
        assert_eq!(c.shadow_rays_per_path, 2);
    }

    #[test]
    fn test_json_roundtrip_names() {
        let json = CoreConfig::default().to_json().unwrap();
        assert!(json.contains("\"clampDirect\""));
        assert!(json.contains("\"TAA\""));
    }
}
