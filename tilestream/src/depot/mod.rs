//! Shared asset depot: fingerprint-keyed cache of decoded assets.
//!
//! Sibling tiles routinely reference identical payloads (the same texture,
//! the same external buffer, the same overlay image). The depot stores each
//! decoded asset once, keyed by a fingerprint (typically the resolved URL),
//! and hands out reference-counted handles.
//!
//! # Design
//!
//! Assets live in an arena of slots; handles are an index/generation pair,
//! not a pointer, so a slot can be reclaimed and reused without dangling
//! references. Reference counts are held in the arena itself — acquiring
//! and releasing a handle is an arena operation guarded by one internal
//! lock, safe from any thread.
//!
//! # Lifecycle
//!
//! - First `get_or_create` for a fingerprint runs the factory; concurrent
//!   callers for the same fingerprint await the same shared future, so the
//!   factory runs at most once per in-flight fingerprint.
//! - When the last handle drops, the entry becomes *inactive*: it stays in
//!   the arena so a quick re-reference is cheap.
//! - Whenever cumulative inactive bytes exceed the configured limit, the
//!   oldest-marked-inactive entries are destroyed until under the limit.
//!   Active entries are never evicted.
//! - A factory error propagates to every concurrent waiter and is not
//!   cached: the next `get_or_create` retries.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use futures::future::Shared;
use futures_util::FutureExt;
use parking_lot::Mutex;
use thiserror::Error;

use crate::accessor::BoxFuture;

/// Errors surfaced by depot factories.
///
/// Clonable because every concurrent waiter on a fingerprint receives the
/// same failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DepotError {
    /// The asset factory failed.
    #[error("Asset factory failed: {0}")]
    Factory(String),
}

/// Point-in-time statistics for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DepotStats {
    /// Entries with at least one live handle.
    pub active_count: usize,
    /// Entries with no live handles, awaiting eviction.
    pub inactive_count: usize,
    /// Total bytes held by inactive entries.
    pub inactive_bytes: u64,
    /// Factory futures currently in flight.
    pub pending_count: usize,
}

type PendingFuture<T> = Shared<BoxFuture<'static, Result<(Arc<T>, u64), DepotError>>>;

struct Entry<T> {
    fingerprint: String,
    asset: Arc<T>,
    size_bytes: u64,
    ref_count: u32,
    inactive: bool,
}

struct Slot<T> {
    generation: u32,
    entry: Option<Entry<T>>,
}

struct DepotState<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    by_fingerprint: HashMap<String, u32>,
    pending: HashMap<String, PendingFuture<T>>,
    /// Slot indices of inactive entries, oldest-marked first.
    inactive_queue: VecDeque<u32>,
    inactive_bytes: u64,
}

struct DepotInner<T> {
    state: Mutex<DepotState<T>>,
    inactive_size_limit_bytes: u64,
}

/// Fingerprint-keyed store of reference-counted shared assets.
pub struct SharedAssetDepot<T: Send + Sync + 'static> {
    inner: Arc<DepotInner<T>>,
}

impl<T: Send + Sync + 'static> Clone for SharedAssetDepot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + Sync + 'static> SharedAssetDepot<T> {
    /// Creates a depot that keeps at most `inactive_size_limit_bytes` of
    /// unreferenced assets around for cheap re-reference.
    pub fn new(inactive_size_limit_bytes: u64) -> Self {
        Self {
            inner: Arc::new(DepotInner {
                state: Mutex::new(DepotState {
                    slots: Vec::new(),
                    free: Vec::new(),
                    by_fingerprint: HashMap::new(),
                    pending: HashMap::new(),
                    inactive_queue: VecDeque::new(),
                    inactive_bytes: 0,
                }),
                inactive_size_limit_bytes,
            }),
        }
    }

    /// Returns a handle to the asset for `fingerprint`, running `factory` to
    /// produce it on a miss.
    ///
    /// The factory returns the asset and its byte-size estimate. Concurrent
    /// calls for the same fingerprint share one factory invocation; each
    /// successful caller holds its own reference.
    pub async fn get_or_create<F, Fut>(
        &self,
        fingerprint: &str,
        factory: F,
    ) -> Result<SharedAssetHandle<T>, DepotError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(T, u64), DepotError>> + Send + 'static,
    {
        let shared = {
            let mut state = self.inner.state.lock();

            // Fast path: asset already resident.
            if let Some(&index) = state.by_fingerprint.get(fingerprint) {
                if let Some(handle) = Self::acquire_locked(&self.inner, &mut state, index) {
                    return Ok(handle);
                }
            }

            // Join an in-flight factory, or start one.
            match state.pending.get(fingerprint) {
                Some(pending) => pending.clone(),
                None => {
                    let inner = Arc::clone(&self.inner);
                    let key = fingerprint.to_string();
                    let fut = factory();
                    let wrapped: BoxFuture<'static, Result<(Arc<T>, u64), DepotError>> =
                        Box::pin(async move {
                            let result = fut.await;
                            inner.state.lock().pending.remove(&key);
                            result.map(|(value, size)| (Arc::new(value), size))
                        });
                    let shared = wrapped.shared();
                    state
                        .pending
                        .insert(fingerprint.to_string(), shared.clone());
                    shared
                }
            }
        };

        let (asset, size_bytes) = shared.await?;

        let mut state = self.inner.state.lock();
        if let Some(&index) = state.by_fingerprint.get(fingerprint) {
            // Another waiter inserted first; join its entry.
            if let Some(handle) = Self::acquire_locked(&self.inner, &mut state, index) {
                return Ok(handle);
            }
        }
        Ok(Self::insert_locked(
            &self.inner,
            &mut state,
            fingerprint,
            asset,
            size_bytes,
        ))
    }

    /// Returns a handle if the fingerprint is resident, without running any
    /// factory.
    pub fn get_existing(&self, fingerprint: &str) -> Option<SharedAssetHandle<T>> {
        let mut state = self.inner.state.lock();
        let index = *state.by_fingerprint.get(fingerprint)?;
        Self::acquire_locked(&self.inner, &mut state, index)
    }

    /// Current statistics.
    pub fn stats(&self) -> DepotStats {
        let state = self.inner.state.lock();
        let active = state
            .slots
            .iter()
            .filter(|slot| matches!(&slot.entry, Some(entry) if !entry.inactive))
            .count();
        DepotStats {
            active_count: active,
            inactive_count: state.inactive_queue.len(),
            inactive_bytes: state.inactive_bytes,
            pending_count: state.pending.len(),
        }
    }

    /// Total resident entries, active and inactive.
    pub fn entry_count(&self) -> usize {
        self.inner.state.lock().by_fingerprint.len()
    }

    fn acquire_locked(
        inner: &Arc<DepotInner<T>>,
        state: &mut DepotState<T>,
        index: u32,
    ) -> Option<SharedAssetHandle<T>> {
        let slot = state.slots.get_mut(index as usize)?;
        let generation = slot.generation;
        let entry = slot.entry.as_mut()?;
        entry.ref_count += 1;
        let asset = Arc::clone(&entry.asset);
        let was_inactive = std::mem::replace(&mut entry.inactive, false);
        let size = entry.size_bytes;
        if was_inactive {
            state.inactive_queue.retain(|&i| i != index);
            state.inactive_bytes -= size;
        }
        Some(SharedAssetHandle {
            inner: Arc::clone(inner),
            index,
            generation,
            asset,
        })
    }

    fn insert_locked(
        inner: &Arc<DepotInner<T>>,
        state: &mut DepotState<T>,
        fingerprint: &str,
        asset: Arc<T>,
        size_bytes: u64,
    ) -> SharedAssetHandle<T> {
        let entry = Entry {
            fingerprint: fingerprint.to_string(),
            asset: Arc::clone(&asset),
            size_bytes,
            ref_count: 1,
            inactive: false,
        };
        let index = match state.free.pop() {
            Some(index) => {
                state.slots[index as usize].entry = Some(entry);
                index
            }
            None => {
                state.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                (state.slots.len() - 1) as u32
            }
        };
        let generation = state.slots[index as usize].generation;
        state.by_fingerprint.insert(fingerprint.to_string(), index);
        SharedAssetHandle {
            inner: Arc::clone(inner),
            index,
            generation,
            asset,
        }
    }

    fn release_locked(inner: &DepotInner<T>, state: &mut DepotState<T>, index: u32, generation: u32) {
        let Some(slot) = state.slots.get_mut(index as usize) else {
            return;
        };
        if slot.generation != generation {
            return;
        }
        let Some(entry) = slot.entry.as_mut() else {
            return;
        };
        entry.ref_count = entry.ref_count.saturating_sub(1);
        if entry.ref_count == 0 && !entry.inactive {
            entry.inactive = true;
            state.inactive_bytes += entry.size_bytes;
            state.inactive_queue.push_back(index);
            Self::evict_locked(inner, state);
        }
    }

    /// Destroys oldest inactive entries until under the configured limit.
    fn evict_locked(inner: &DepotInner<T>, state: &mut DepotState<T>) {
        while state.inactive_bytes > inner.inactive_size_limit_bytes {
            let Some(index) = state.inactive_queue.pop_front() else {
                break;
            };
            let slot = &mut state.slots[index as usize];
            if let Some(entry) = slot.entry.take() {
                state.inactive_bytes -= entry.size_bytes;
                state.by_fingerprint.remove(&entry.fingerprint);
                tracing::debug!(
                    fingerprint = %entry.fingerprint,
                    bytes = entry.size_bytes,
                    "evicted inactive asset"
                );
            }
            slot.generation = slot.generation.wrapping_add(1);
            state.free.push(index);
        }
    }
}

/// A reference-counted handle to a depot asset.
///
/// Cloning acquires an additional reference; dropping releases one. The
/// handle dereferences to the asset.
pub struct SharedAssetHandle<T: Send + Sync + 'static> {
    inner: Arc<DepotInner<T>>,
    index: u32,
    generation: u32,
    asset: Arc<T>,
}

impl<T: Send + Sync + 'static> SharedAssetHandle<T> {
    /// Current reference count of the underlying entry.
    pub fn ref_count(&self) -> u32 {
        let state = self.inner.state.lock();
        state
            .slots
            .get(self.index as usize)
            .filter(|slot| slot.generation == self.generation)
            .and_then(|slot| slot.entry.as_ref())
            .map(|entry| entry.ref_count)
            .unwrap_or(0)
    }

    /// Byte-size estimate supplied by the factory.
    pub fn size_bytes(&self) -> u64 {
        let state = self.inner.state.lock();
        state
            .slots
            .get(self.index as usize)
            .filter(|slot| slot.generation == self.generation)
            .and_then(|slot| slot.entry.as_ref())
            .map(|entry| entry.size_bytes)
            .unwrap_or(0)
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for SharedAssetHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedAssetHandle")
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

impl<T: Send + Sync + 'static> Deref for SharedAssetHandle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.asset
    }
}

impl<T: Send + Sync + 'static> Clone for SharedAssetHandle<T> {
    fn clone(&self) -> Self {
        let mut state = self.inner.state.lock();
        if let Some(slot) = state.slots.get_mut(self.index as usize) {
            if slot.generation == self.generation {
                if let Some(entry) = slot.entry.as_mut() {
                    entry.ref_count += 1;
                }
            }
        }
        Self {
            inner: Arc::clone(&self.inner),
            index: self.index,
            generation: self.generation,
            asset: Arc::clone(&self.asset),
        }
    }
}

impl<T: Send + Sync + 'static> Drop for SharedAssetHandle<T> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        SharedAssetDepot::release_locked(&self.inner, &mut state, self.index, self.generation);
    }
}
