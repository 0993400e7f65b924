use std::time::Duration;

use render_protocol::IntSize;

pub const DEFAULT_TILE_SIZE: IntSize = IntSize::new(512, 512);
pub const DEFAULT_COVER_AREA_MULTIPLIER: f32 = 2.0;
pub const DEFAULT_TILE_CREATION_DELAY: Duration = Duration::from_millis(10);
pub const DEFAULT_TILE_BUFFER_UPDATE_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum TileStoreConfigError {
    #[error("tile size {0:?} must be non-empty")]
    EmptyTileSize(IntSize),
    #[error("cover area multiplier {0} must be finite and at least 1")]
    InvalidCoverAreaMultiplier(f32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TiledBackingStoreConfig {
    pub tile_size: IntSize,
    /// How much of the visible area, per axis, tiles are kept alive for.
    pub cover_area_multiplier: f32,
    /// Delay between tile creation passes while coverage is incomplete.
    pub tile_creation_delay: Duration,
    /// Delay between an invalidation and the repaint of dirty tiles.
    pub tile_buffer_update_interval: Duration,
}

impl Default for TiledBackingStoreConfig {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            cover_area_multiplier: DEFAULT_COVER_AREA_MULTIPLIER,
            tile_creation_delay: DEFAULT_TILE_CREATION_DELAY,
            tile_buffer_update_interval: DEFAULT_TILE_BUFFER_UPDATE_INTERVAL,
        }
    }
}

impl TiledBackingStoreConfig {
    pub fn validate(&self) -> Result<(), TileStoreConfigError> {
        if self.tile_size.is_empty() {
            return Err(TileStoreConfigError::EmptyTileSize(self.tile_size));
        }
        if !self.cover_area_multiplier.is_finite() || self.cover_area_multiplier < 1.0 {
            return Err(TileStoreConfigError::InvalidCoverAreaMultiplier(
                self.cover_area_multiplier,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(TiledBackingStoreConfig::default().validate(), Ok(()));
    }

    #[test]
    fn shrinking_cover_multiplier_is_rejected() {
        let config = TiledBackingStoreConfig {
            cover_area_multiplier: 0.5,
            ..TiledBackingStoreConfig::default()
        };

        assert_eq!(
            config.validate(),
            Err(TileStoreConfigError::InvalidCoverAreaMultiplier(0.5))
        );
    }
}
