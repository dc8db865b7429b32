//! Host-application integration points for a tileset.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::accessor::AssetAccessor;
use crate::content::{ContentConverterRegistry, TileModel};
use crate::depot::SharedAssetDepot;
use crate::occlusion::OcclusionRendererProxy;
use crate::tile::RenderResourceHandle;

/// Turns decoded tile models into renderer resources.
///
/// Called on the tileset's update thread: `prepare` when a tile's content
/// arrives, `free` when its content unloads. Implementations own the
/// mapping from handles to actual GPU objects.
pub trait PrepareRendererResources: Send + Sync {
    fn prepare(&self, model: &TileModel) -> RenderResourceHandle;
    fn free(&self, handle: RenderResourceHandle);
}

/// A preparer that hands out unique handles and owns nothing, for headless
/// use and tests.
#[derive(Debug, Default)]
pub struct NoopPreparer {
    next: AtomicU64,
}

impl PrepareRendererResources for NoopPreparer {
    fn prepare(&self, _model: &TileModel) -> RenderResourceHandle {
        RenderResourceHandle(self.next.fetch_add(1, Ordering::Relaxed))
    }

    fn free(&self, _handle: RenderResourceHandle) {}
}

/// The external interfaces a tileset runs against.
#[derive(Clone)]
pub struct TilesetExternals {
    pub accessor: Arc<dyn AssetAccessor>,
    pub prepare: Arc<dyn PrepareRendererResources>,
    pub registry: Arc<ContentConverterRegistry>,
    pub depot: Arc<SharedAssetDepot<TileModel>>,
    /// Factory for renderer occlusion proxies, and the pool size to create.
    /// `None` disables occlusion-aware traversal.
    pub occlusion: Option<(Arc<dyn Fn() -> Arc<dyn OcclusionRendererProxy> + Send + Sync>, usize)>,
}

impl TilesetExternals {
    /// Externals with a shared depot and default converters over `accessor`.
    pub fn new(accessor: Arc<dyn AssetAccessor>) -> Self {
        Self {
            accessor,
            prepare: Arc::new(NoopPreparer::default()),
            registry: Arc::new(ContentConverterRegistry::with_defaults()),
            depot: Arc::new(SharedAssetDepot::new(256 * 1024 * 1024)),
            occlusion: None,
        }
    }
}
