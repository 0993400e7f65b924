use std::time::Duration;

use render_protocol::IntSize;
use renderer::{Rgba, TextureUpdaterConfig, TextureUpdaterConfigError};
use tiles::{DEFAULT_TILE_SIZE, TiledBackingStoreConfig};

/// Upper bound on texture uploads per updater pass during a commit.
pub const DEFAULT_MAX_TEXTURE_UPDATES_PER_PASS: usize = 48;
/// 60 Hz.
pub const DEFAULT_ANIMATION_INTERVAL: Duration = Duration::from_nanos(16_666_667);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("max texture updates per pass must be greater than zero")]
    ZeroTextureUpdatesPerPass,
    #[error("animation interval must be greater than zero")]
    ZeroAnimationInterval,
    #[error("default tile size {0:?} must be non-empty")]
    EmptyTileSize(IntSize),
    #[error(transparent)]
    TextureUpdater(#[from] TextureUpdaterConfigError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositorSettings {
    pub max_texture_updates_per_pass: usize,
    pub animation_interval: Duration,
    pub default_tile_size: IntSize,
    pub texture_updater: TextureUpdaterConfig,
    /// Color of damaged viewport areas no layer covers.
    pub background_color: Rgba,
}

impl Default for CompositorSettings {
    fn default() -> Self {
        Self {
            max_texture_updates_per_pass: DEFAULT_MAX_TEXTURE_UPDATES_PER_PASS,
            animation_interval: DEFAULT_ANIMATION_INTERVAL,
            default_tile_size: DEFAULT_TILE_SIZE,
            texture_updater: TextureUpdaterConfig::default(),
            background_color: [0, 0, 0, 0],
        }
    }
}

impl CompositorSettings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_texture_updates_per_pass == 0 {
            return Err(SettingsError::ZeroTextureUpdatesPerPass);
        }
        if self.animation_interval.is_zero() {
            return Err(SettingsError::ZeroAnimationInterval);
        }
        if self.default_tile_size.is_empty() {
            return Err(SettingsError::EmptyTileSize(self.default_tile_size));
        }
        self.texture_updater.validate()?;
        Ok(())
    }

    /// Backing store config for layers that use the default tile size.
    pub fn tiled_backing_store_config(&self) -> TiledBackingStoreConfig {
        TiledBackingStoreConfig {
            tile_size: self.default_tile_size,
            ..TiledBackingStoreConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = CompositorSettings::default();

        assert_eq!(settings.validate(), Ok(()));
        assert_eq!(settings.max_texture_updates_per_pass, 48);
        assert_eq!(settings.default_tile_size, IntSize::new(512, 512));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let zero_pass = CompositorSettings {
            max_texture_updates_per_pass: 0,
            ..CompositorSettings::default()
        };
        let zero_interval = CompositorSettings {
            animation_interval: Duration::ZERO,
            ..CompositorSettings::default()
        };
        let bad_updater = CompositorSettings {
            texture_updater: TextureUpdaterConfig {
                flush_period_full: 0,
                ..TextureUpdaterConfig::default()
            },
            ..CompositorSettings::default()
        };

        assert_eq!(
            zero_pass.validate(),
            Err(SettingsError::ZeroTextureUpdatesPerPass)
        );
        assert_eq!(
            zero_interval.validate(),
            Err(SettingsError::ZeroAnimationInterval)
        );
        assert!(matches!(
            bad_updater.validate(),
            Err(SettingsError::TextureUpdater(_))
        ));
    }
}
