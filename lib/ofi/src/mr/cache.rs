// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The device-scoped registration cache.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};

use super::backend::{MemType, RegistrationBackend};
use super::error::{MrError, MrResult};
use super::region::{Lookup, PageRange, RegEntry, RegionIndex};

/// Slot capacity allotted on the first miss. Same default NCCL uses for its
/// own registration cache.
pub const DEFAULT_INITIAL_CAPACITY: usize = 128;

/// Returns the OS page size.
pub fn system_page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Cache construction parameters.
#[derive(Debug, Clone)]
pub struct MrCacheConfig {
    /// Granularity of all rounding arithmetic. Must be a power of two.
    pub page_size: usize,

    /// Slot capacity allotted on the first miss; capacity doubles from here
    /// as entries accumulate.
    pub initial_capacity: usize,
}

impl Default for MrCacheConfig {
    fn default() -> Self {
        Self {
            page_size: system_page_size(),
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
        }
    }
}

impl MrCacheConfig {
    /// Create config from environment variables.
    ///
    /// Environment variables:
    /// - `DYN_OFI_MR_CACHE_PAGE_SIZE`: rounding granularity in bytes
    ///   (default: system page size)
    /// - `DYN_OFI_MR_CACHE_INIT_CAPACITY`: slot capacity allotted on the
    ///   first miss (default: 128)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            page_size: std::env::var("DYN_OFI_MR_CACHE_PAGE_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.page_size),
            initial_capacity: std::env::var("DYN_OFI_MR_CACHE_INIT_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.initial_capacity),
        }
    }

    fn validate(&self) -> MrResult<()> {
        if !self.page_size.is_power_of_two() {
            return Err(MrError::InvalidConfig {
                reason: "page size must be a nonzero power of two",
            });
        }
        if self.initial_capacity == 0 {
            return Err(MrError::InvalidConfig {
                reason: "initial capacity must be nonzero",
            });
        }
        Ok(())
    }
}

/// Per-device cache of transport memory registrations.
///
/// Maps page-rounded address ranges to backend handles and reference counts
/// them: a request whose pages are already covered by a live entry reuses
/// that entry's handle, and the backend is only invoked on a miss or when
/// the last reference to an entry is released. This is the core efficiency
/// contract — N overlapping requests against the same physical pages cost
/// one backend registration, not N.
///
/// All state sits behind a single mutex and backend calls are made while it
/// is held, so operations on one cache are fully serialized; a slow backend
/// call stalls all users of that device. Caches of different devices are
/// independent.
///
/// The cache lives for the lifetime of its device. When the entry count
/// returns to zero only the slot storage is released, not the cache itself.
pub struct MrCache<B: RegistrationBackend> {
    backend: Arc<B>,
    index: Mutex<RegionIndex<B::Handle>>,
    page_size: usize,
}

impl<B: RegistrationBackend> MrCache<B> {
    /// Create a cache calling into `backend`, with the default config.
    pub fn new(backend: Arc<B>) -> MrResult<Self> {
        Self::with_config(backend, MrCacheConfig::default())
    }

    pub fn with_config(backend: Arc<B>, config: MrCacheConfig) -> MrResult<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            index: Mutex::new(RegionIndex::new(config.initial_capacity)),
            page_size: config.page_size,
        })
    }

    /// Register `[addr, addr + len)` with the device, deduplicating against
    /// live entries.
    ///
    /// The raw buffer is rounded out to whole pages first. If a live entry's
    /// pages contain the rounded range this is a hit: its refcount goes up
    /// and its handle is returned without touching the backend. Otherwise
    /// the backend registers the rounded range and a fresh entry with
    /// refcount 1 is inserted at the sorted position.
    ///
    /// Callers must balance every successful `register` with exactly one
    /// [`deregister`](Self::deregister) of the returned handle.
    ///
    /// # Errors
    ///
    /// - [`MrError::InvalidRegion`]: zero-length or overflowing request.
    /// - [`MrError::OverlapConflict`]: the rounded range straddles a live
    ///   entry's boundary. Neither splitting nor extending entries is
    ///   supported; the cache is unchanged.
    /// - [`MrError::Allocation`]: slot storage growth failed.
    /// - [`MrError::RegistrationFailed`]: the backend rejected the range.
    ///   No entry was inserted.
    pub fn register(&self, addr: usize, len: usize, kind: MemType) -> MrResult<B::Handle> {
        let range = PageRange::containing(addr, len, self.page_size)?;
        let mut index = self.index.lock();
        match index.lookup(&range)? {
            Lookup::Covered(slot) => {
                let entry = index.entry_mut(slot);
                entry.refcnt += 1;
                trace!(addr, len, slot, "registration cache hit");
                Ok(entry.handle.clone())
            }
            Lookup::Vacant(slot) => {
                // Reserve the slot before the backend call; the insert
                // below must not be able to fail once the handle exists.
                index.ensure_capacity()?;
                let handle = self
                    .backend
                    .register(range.base(), range.len(), kind)
                    .map_err(MrError::RegistrationFailed)?;
                index.insert_at(
                    slot,
                    RegEntry {
                        range,
                        refcnt: 1,
                        handle: handle.clone(),
                    },
                );
                Ok(handle)
            }
        }
    }

    /// Release one reference to `handle`.
    ///
    /// While other references remain this only decrements the refcount. On
    /// the last release the backend deregisters the handle and the entry is
    /// excised, compacting the index.
    ///
    /// # Errors
    ///
    /// - [`MrError::HandleNotFound`]: the handle is not held by this cache
    ///   (already fully released, or registered with another device).
    /// - [`MrError::DeregistrationFailed`]: the backend could not release
    ///   the handle. The entry is removed regardless; the caller holds no
    ///   further claim on the handle and the leaked resource is the
    ///   backend's to reclaim.
    pub fn deregister(&self, handle: &B::Handle) -> MrResult<()> {
        let mut index = self.index.lock();
        let slot = index.find_by_handle(handle).ok_or(MrError::HandleNotFound)?;

        let entry = index.entry_mut(slot);
        entry.refcnt -= 1;
        if entry.refcnt > 0 {
            trace!(slot, refcnt = entry.refcnt, "registration still shared");
            return Ok(());
        }

        let entry = index.remove_at(slot);
        self.backend.deregister(&entry.handle).map_err(|err| {
            warn!(handle = ?entry.handle, error = %err, "backend deregistration failed");
            MrError::DeregistrationFailed(err)
        })
    }

    /// Number of live entries (distinct backend registrations).
    pub fn len(&self) -> usize {
        self.index.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Page size all requests are rounded with.
    pub fn page_size(&self) -> usize {
        self.page_size
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    use super::*;

    const PAGE: usize = 4096;

    /// Backend that hands out sequential u64 handles and records every call.
    #[derive(Default)]
    struct CountingBackend {
        next_handle: AtomicU64,
        registered: Mutex<Vec<(u64, usize, usize, MemType)>>,
        deregistered: Mutex<Vec<u64>>,
        fail_register: AtomicBool,
        fail_deregister: AtomicBool,
    }

    impl CountingBackend {
        fn register_calls(&self) -> usize {
            self.registered.lock().len()
        }

        fn deregister_calls(&self) -> usize {
            self.deregistered.lock().len()
        }
    }

    impl RegistrationBackend for CountingBackend {
        type Handle = u64;

        fn register(&self, addr: usize, len: usize, kind: MemType) -> anyhow::Result<u64> {
            if self.fail_register.load(Ordering::Relaxed) {
                anyhow::bail!("fi_mr_reg failed");
            }
            let handle = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
            self.registered.lock().push((handle, addr, len, kind));
            Ok(handle)
        }

        fn deregister(&self, handle: &u64) -> anyhow::Result<()> {
            if self.fail_deregister.load(Ordering::Relaxed) {
                anyhow::bail!("fi_close failed");
            }
            self.deregistered.lock().push(*handle);
            Ok(())
        }
    }

    fn cache_with_capacity(initial_capacity: usize) -> (Arc<CountingBackend>, MrCache<CountingBackend>) {
        let backend = Arc::new(CountingBackend::default());
        let cache = MrCache::with_config(
            backend.clone(),
            MrCacheConfig {
                page_size: PAGE,
                initial_capacity,
            },
        )
        .unwrap();
        (backend, cache)
    }

    #[test]
    fn overlapping_requests_share_one_registration() {
        let (backend, cache) = cache_with_capacity(4);

        // [4096, 12288) after rounding.
        let h1 = cache.register(PAGE, 2 * PAGE, MemType::Host).unwrap();
        assert_eq!(backend.register_calls(), 1);
        {
            let calls = backend.registered.lock();
            assert_eq!(calls[0].1, PAGE);
            assert_eq!(calls[0].2, 2 * PAGE);
        }

        // Contained in the first entry's pages: hit, same handle.
        let h2 = cache.register(5000, 100, MemType::Host).unwrap();
        assert_eq!(h2, h1);
        assert_eq!(backend.register_calls(), 1);
        assert_eq!(cache.len(), 1);

        // First release leaves the entry alive.
        cache.deregister(&h1).unwrap();
        assert_eq!(backend.deregister_calls(), 0);
        assert_eq!(cache.len(), 1);

        // Last release deregisters exactly once and excises the entry.
        cache.deregister(&h1).unwrap();
        assert_eq!(backend.deregister_calls(), 1);
        assert_eq!(*backend.deregistered.lock(), vec![h1]);
        assert!(cache.is_empty());

        // Fully released handle is unknown, never a second deregistration.
        assert!(matches!(cache.deregister(&h1), Err(MrError::HandleNotFound)));
        assert_eq!(backend.deregister_calls(), 1);
    }

    #[test]
    fn disjoint_requests_get_distinct_registrations() {
        let (backend, cache) = cache_with_capacity(4);

        let h1 = cache.register(0, PAGE, MemType::Host).unwrap();
        let h2 = cache.register(2 * PAGE, PAGE, MemType::Host).unwrap();
        assert_ne!(h1, h2);
        assert_eq!(backend.register_calls(), 2);
        assert_eq!(cache.len(), 2);

        cache.deregister(&h1).unwrap();
        cache.deregister(&h2).unwrap();
        assert_eq!(backend.deregister_calls(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn unaligned_hit_does_not_touch_backend() {
        let (backend, cache) = cache_with_capacity(4);

        let h1 = cache.register(100, 3 * PAGE, MemType::Device).unwrap();
        // Raw start/end differ from the entry's but containment holds after
        // rounding.
        let h2 = cache.register(PAGE + 7, PAGE, MemType::Device).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(backend.register_calls(), 1);

        cache.deregister(&h1).unwrap();
        cache.deregister(&h1).unwrap();
        assert_eq!(backend.deregister_calls(), 1);
    }

    #[test]
    fn releases_in_any_order_balance_refcounts() {
        let (backend, cache) = cache_with_capacity(4);

        let base = cache.register(0, 4 * PAGE, MemType::Host).unwrap();
        let nested_a = cache.register(PAGE, PAGE, MemType::Host).unwrap();
        let nested_b = cache.register(2 * PAGE + 9, 100, MemType::Host).unwrap();
        assert_eq!(backend.register_calls(), 1);
        assert_eq!(nested_a, base);
        assert_eq!(nested_b, base);

        // Release in an order unrelated to acquisition.
        cache.deregister(&nested_b).unwrap();
        cache.deregister(&base).unwrap();
        assert_eq!(backend.deregister_calls(), 0);
        cache.deregister(&nested_a).unwrap();
        assert_eq!(backend.deregister_calls(), 1);
    }

    #[test]
    fn partial_overlap_is_rejected_without_side_effects() {
        let (backend, cache) = cache_with_capacity(4);

        let h1 = cache.register(2 * PAGE, 2 * PAGE, MemType::Host).unwrap();
        let before = backend.register_calls();

        // Straddles the entry's lower boundary.
        let err = cache.register(PAGE, 2 * PAGE, MemType::Host).unwrap_err();
        assert!(matches!(err, MrError::OverlapConflict { .. }));
        assert_eq!(backend.register_calls(), before);
        assert_eq!(cache.len(), 1);

        // The existing entry is untouched and still releasable.
        cache.deregister(&h1).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn backend_register_failure_leaves_cache_unchanged() {
        let (backend, cache) = cache_with_capacity(4);

        backend.fail_register.store(true, Ordering::Relaxed);
        let err = cache.register(0, PAGE, MemType::Host).unwrap_err();
        assert!(matches!(err, MrError::RegistrationFailed(_)));
        assert!(cache.is_empty());

        // The cache stays usable after the failure.
        backend.fail_register.store(false, Ordering::Relaxed);
        let h = cache.register(0, PAGE, MemType::Host).unwrap();
        assert_eq!(cache.len(), 1);
        cache.deregister(&h).unwrap();
    }

    #[test]
    fn backend_deregister_failure_still_removes_entry() {
        let (backend, cache) = cache_with_capacity(4);

        let h = cache.register(0, PAGE, MemType::Host).unwrap();
        backend.fail_deregister.store(true, Ordering::Relaxed);

        let err = cache.deregister(&h).unwrap_err();
        assert!(matches!(err, MrError::DeregistrationFailed(_)));
        // Entry is gone despite the failure; a second release is a
        // double free.
        assert!(cache.is_empty());
        assert!(matches!(cache.deregister(&h), Err(MrError::HandleNotFound)));
    }

    #[test]
    fn growth_preserves_live_entries() {
        let (backend, cache) = cache_with_capacity(2);

        let handles: Vec<u64> = (0..7)
            .map(|i| cache.register(i * 2 * PAGE, PAGE, MemType::Host).unwrap())
            .collect();
        assert_eq!(backend.register_calls(), 7);
        assert_eq!(cache.len(), 7);

        // Every pre-growth entry is still reachable by address (hit) and by
        // handle (release).
        for (i, h) in handles.iter().enumerate() {
            let again = cache.register(i * 2 * PAGE, PAGE, MemType::Host).unwrap();
            assert_eq!(again, *h);
        }
        assert_eq!(backend.register_calls(), 7);

        for h in &handles {
            cache.deregister(h).unwrap();
            cache.deregister(h).unwrap();
        }
        assert_eq!(backend.deregister_calls(), 7);
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_length_request_is_invalid() {
        let (backend, cache) = cache_with_capacity(4);
        assert!(matches!(
            cache.register(PAGE, 0, MemType::Host),
            Err(MrError::InvalidRegion { .. })
        ));
        assert_eq!(backend.register_calls(), 0);
    }

    #[test]
    fn config_validation() {
        let backend = Arc::new(CountingBackend::default());
        let bad_page = MrCacheConfig {
            page_size: 3000,
            initial_capacity: 16,
        };
        assert!(matches!(
            MrCache::with_config(backend.clone(), bad_page),
            Err(MrError::InvalidConfig { .. })
        ));

        let bad_capacity = MrCacheConfig {
            page_size: PAGE,
            initial_capacity: 0,
        };
        assert!(matches!(
            MrCache::with_config(backend, bad_capacity),
            Err(MrError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn default_config_uses_system_page_size() {
        let config = MrCacheConfig::default();
        assert_eq!(config.page_size, system_page_size());
        assert!(config.page_size.is_power_of_two());
        assert_eq!(config.initial_capacity, DEFAULT_INITIAL_CAPACITY);
    }
}
