//! Renderer-assisted tile occlusion queries.
//!
//! The renderer owns the actual occlusion tests (typically depth-buffer
//! queries a frame or two stale); this module only manages the proxies
//! those tests are attached to. A fixed-size pool hands proxies to tiles
//! while they are being considered for refinement, so the traversal can
//! skip refining tiles that are entirely hidden behind others.
//!
//! Query results are conservative: `NotAvailable` means the renderer has
//! not answered yet and the traversal must assume visible and ask again
//! next frame.

use std::collections::HashMap;
use std::sync::Arc;

use crate::tile::TileKey;

/// Result of an occlusion query for one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileOcclusionState {
    /// The renderer has no result yet; treat as visible and re-check.
    NotAvailable,
    /// At least part of the tile's bounding volume is visible.
    NotOccluded,
    /// The tile's bounding volume is entirely hidden.
    Occluded,
}

/// Renderer-side occlusion test attached to one tile at a time.
pub trait OcclusionRendererProxy: Send + Sync {
    /// The latest query result for the currently attached tile.
    fn occlusion_state(&self) -> TileOcclusionState;

    /// Detaches the proxy from its tile and invalidates pending results.
    fn reset(&self);
}

/// Fixed-size pool mapping tiles to renderer occlusion proxies.
///
/// Proxies are recycled through a free list; when the pool is exhausted,
/// additional tiles simply go untested until proxies are released.
pub struct OcclusionProxyPool {
    proxies: Vec<Arc<dyn OcclusionRendererProxy>>,
    free: Vec<usize>,
    by_tile: HashMap<TileKey, usize>,
    /// Frame stamp of the last fetch per tile, for pruning.
    last_used: HashMap<TileKey, u64>,
}

impl OcclusionProxyPool {
    /// Creates a pool of `size` proxies produced by `create`.
    pub fn new(create: impl Fn() -> Arc<dyn OcclusionRendererProxy>, size: usize) -> Self {
        let proxies: Vec<_> = (0..size).map(|_| create()).collect();
        let free = (0..size).rev().collect();
        Self {
            proxies,
            free,
            by_tile: HashMap::new(),
            last_used: HashMap::new(),
        }
    }

    /// Returns the tile's proxy, attaching a free one on first use.
    /// Returns `None` when the pool is exhausted.
    pub fn fetch_for_tile(
        &mut self,
        tile: TileKey,
        frame: u64,
    ) -> Option<&Arc<dyn OcclusionRendererProxy>> {
        if let Some(&index) = self.by_tile.get(&tile) {
            self.last_used.insert(tile, frame);
            return Some(&self.proxies[index]);
        }
        let index = self.free.pop()?;
        self.by_tile.insert(tile, index);
        self.last_used.insert(tile, frame);
        Some(&self.proxies[index])
    }

    /// The tile's proxy if one is attached, without attaching.
    pub fn get_for_tile(&self, tile: TileKey) -> Option<&Arc<dyn OcclusionRendererProxy>> {
        self.by_tile.get(&tile).map(|&index| &self.proxies[index])
    }

    /// Releases proxies of tiles not fetched since `frame`, returning them
    /// to the free list.
    pub fn prune(&mut self, frame: u64) {
        let stale: Vec<TileKey> = self
            .last_used
            .iter()
            .filter(|(_, &used)| used < frame)
            .map(|(&tile, _)| tile)
            .collect();
        for tile in stale {
            if let Some(index) = self.by_tile.remove(&tile) {
                self.proxies[index].reset();
                self.free.push(index);
            }
            self.last_used.remove(&tile);
        }
    }

    pub fn attached_count(&self) -> usize {
        self.by_tile.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeProxy {
        resets: AtomicU32,
    }

    impl OcclusionRendererProxy for FakeProxy {
        fn occlusion_state(&self) -> TileOcclusionState {
            TileOcclusionState::NotAvailable
        }

        fn reset(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pool(size: usize) -> OcclusionProxyPool {
        OcclusionProxyPool::new(
            || {
                Arc::new(FakeProxy {
                    resets: AtomicU32::new(0),
                })
            },
            size,
        )
    }

    #[test]
    fn test_fetch_is_stable_per_tile() {
        let mut pool = pool(2);
        let first = Arc::as_ptr(pool.fetch_for_tile(TileKey(7), 1).unwrap());
        let again = Arc::as_ptr(pool.fetch_for_tile(TileKey(7), 2).unwrap());
        assert_eq!(first, again);
        assert_eq!(pool.attached_count(), 1);
    }

    #[test]
    fn test_exhausted_pool_returns_none() {
        let mut pool = pool(1);
        assert!(pool.fetch_for_tile(TileKey(1), 1).is_some());
        assert!(pool.fetch_for_tile(TileKey(2), 1).is_none());
    }

    #[test]
    fn test_prune_recycles_stale_proxies() {
        let mut pool = pool(1);
        pool.fetch_for_tile(TileKey(1), 1);
        pool.prune(2);
        assert_eq!(pool.attached_count(), 0);
        // The recycled proxy is attachable to a new tile.
        assert!(pool.fetch_for_tile(TileKey(2), 2).is_some());
        assert!(pool.get_for_tile(TileKey(1)).is_none());
    }
}
