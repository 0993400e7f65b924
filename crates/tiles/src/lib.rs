//! Tiled backing stores for large layer contents.

mod canvas;
mod config;
mod store;
mod tile;

pub use canvas::{
    CHECKER_CELL_SIZE, PaintContext, TileCanvas, checker_color_at, paint_checker_pattern,
};
pub use config::{
    DEFAULT_COVER_AREA_MULTIPLIER, DEFAULT_TILE_BUFFER_UPDATE_INTERVAL,
    DEFAULT_TILE_CREATION_DELAY, DEFAULT_TILE_SIZE, TileStoreConfigError,
    TiledBackingStoreConfig,
};
pub use store::{TileQuad, TiledBackingStore, TiledBackingStoreClient};
pub use tile::{Tile, TileCoordinate};

#[cfg(test)]
mod tests;
