use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Largest accepted stream resolution (8K UHD). Keeps a runaway patch from
/// asking the capture thread for multi-gigabyte frame buffers.
pub const MAX_WIDTH: u32 = 7680;
pub const MAX_HEIGHT: u32 = 4320;

/// Capture settings shared between the control plane and the capture thread.
/// The control plane mutates them (presenter-only); the capture loop reads
/// them at the top of every tick, so changes take effect within one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    /// JPEG quality (1-100). Higher = sharper, more bandwidth.
    pub quality: u8,
    /// Index into the monitor list.
    pub monitor: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fps: 30,
            width: 1280,
            height: 720,
            quality: 80,
            monitor: 0,
        }
    }
}

/// Settings are read synchronously from the capture thread, so this is a
/// std lock rather than a tokio one. Held only for field copies.
pub type SharedSettings = Arc<RwLock<Settings>>;

/// Partial update sent by the presenter. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsPatch {
    #[serde(default)]
    pub fps: Option<u32>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub quality: Option<u8>,
    #[serde(default)]
    pub monitor: Option<usize>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("fps must be between 1 and 120, got {0}")]
    InvalidFps(u32),
    #[error("quality must be between 1 and 100, got {0}")]
    InvalidQuality(u8),
    #[error("resolution must be between 1x1 and 7680x4320, got {0}x{1}")]
    InvalidResolution(u32, u32),
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.fps == 0 || self.fps > 120 {
            return Err(SettingsError::InvalidFps(self.fps));
        }
        if self.quality == 0 || self.quality > 100 {
            return Err(SettingsError::InvalidQuality(self.quality));
        }
        if self.width == 0
            || self.height == 0
            || self.width > MAX_WIDTH
            || self.height > MAX_HEIGHT
        {
            return Err(SettingsError::InvalidResolution(self.width, self.height));
        }
        Ok(())
    }

    /// Merge a patch, all-or-nothing: the merged result is validated before
    /// anything is written, so a bad patch leaves settings untouched.
    pub fn apply(&mut self, patch: &SettingsPatch) -> Result<(), SettingsError> {
        let mut next = self.clone();
        if let Some(fps) = patch.fps {
            next.fps = fps;
        }
        if let Some(width) = patch.width {
            next.width = width;
        }
        if let Some(height) = patch.height {
            next.height = height;
        }
        if let Some(quality) = patch.quality {
            next.quality = quality;
        }
        if let Some(monitor) = patch.monitor {
            next.monitor = monitor;
        }
        next.validate()?;
        *self = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_merges_only_present_fields() {
        let mut settings = Settings::default();
        let patch = SettingsPatch {
            fps: Some(15),
            quality: Some(60),
            ..Default::default()
        };

        settings.apply(&patch).unwrap();

        assert_eq!(settings.fps, 15);
        assert_eq!(settings.quality, 60);
        assert_eq!(settings.width, 1280);
        assert_eq!(settings.height, 720);
    }

    #[test]
    fn test_invalid_patch_leaves_settings_unchanged() {
        let mut settings = Settings::default();
        let before = settings.clone();
        let patch = SettingsPatch {
            fps: Some(15),
            quality: Some(0),
            ..Default::default()
        };

        let err = settings.apply(&patch).unwrap_err();

        assert_eq!(err, SettingsError::InvalidQuality(0));
        assert_eq!(settings, before);
    }

    #[test]
    fn test_fps_bounds() {
        let mut settings = Settings::default();
        assert!(settings
            .apply(&SettingsPatch {
                fps: Some(0),
                ..Default::default()
            })
            .is_err());
        assert!(settings
            .apply(&SettingsPatch {
                fps: Some(121),
                ..Default::default()
            })
            .is_err());
        assert!(settings
            .apply(&SettingsPatch {
                fps: Some(120),
                ..Default::default()
            })
            .is_ok());
    }

    #[test]
    fn test_zero_resolution_rejected() {
        let mut settings = Settings::default();
        let patch = SettingsPatch {
            width: Some(0),
            ..Default::default()
        };
        assert!(settings.apply(&patch).is_err());
    }

    #[test]
    fn test_oversized_resolution_rejected() {
        // A resolution beyond the cap would mean gigabyte-scale frame
        // buffers per tick; the merge must refuse it and stay unchanged.
        let mut settings = Settings::default();
        let before = settings.clone();
        let patch = SettingsPatch {
            width: Some(40_000),
            height: Some(40_000),
            ..Default::default()
        };

        let err = settings.apply(&patch).unwrap_err();
        assert_eq!(err, SettingsError::InvalidResolution(40_000, 40_000));
        assert_eq!(settings, before);
    }

    #[test]
    fn test_max_resolution_accepted() {
        let mut settings = Settings::default();
        let patch = SettingsPatch {
            width: Some(MAX_WIDTH),
            height: Some(MAX_HEIGHT),
            ..Default::default()
        };
        assert!(settings.apply(&patch).is_ok());
    }
}
