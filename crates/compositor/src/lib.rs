//! Compositor front end: the proxy that commits the content layer tree to
//! the impl side and drives drawing.

mod host;
mod layers;
mod proxy;
mod settings;
mod tiled_layer;

use std::sync::atomic::{AtomicUsize, Ordering};

pub use host::{LayerTreeHost, LayerTreeUpdate};
pub use layers::{FrameData, LayerId, LayerSnapshot, LayerTreeHostImpl};
pub use proxy::{Proxy, ProxyState, SingleThreadProxy};
pub use settings::{
    CompositorSettings, DEFAULT_ANIMATION_INTERVAL, DEFAULT_MAX_TEXTURE_UPDATES_PER_PASS,
    SettingsError,
};
pub use tiled_layer::TiledLayer;

static INITIALIZE_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Enables compositing for the process. Calls nest; each needs a matching
/// [`shutdown`].
pub fn initialize() {
    let previous = INITIALIZE_COUNT.fetch_add(1, Ordering::AcqRel);
    if previous == 0 {
        tracing::info!("compositor enabled");
    }
}

/// Panics without a matching [`initialize`].
pub fn shutdown() {
    let previous = INITIALIZE_COUNT
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
            count.checked_sub(1)
        })
        .unwrap_or_else(|_| panic!("compositor shutdown without matching initialize"));
    if previous == 1 {
        tracing::info!("compositor disabled");
    }
}

pub fn is_initialized() -> bool {
    INITIALIZE_COUNT.load(Ordering::Acquire) > 0
}
