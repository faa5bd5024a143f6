// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Error types for the memory-registration cache.

use std::collections::TryReserveError;

use thiserror::Error;

/// Errors surfaced by [`MrCache`](super::MrCache) operations.
///
/// None of these are fatal to the cache: after any failed operation it
/// remains in a valid state and stays usable.
#[derive(Debug, Error)]
pub enum MrError {
    /// The registration backend rejected a new range. No entry was inserted.
    #[error("backend registration failed: {0}")]
    RegistrationFailed(#[source] anyhow::Error),

    /// The registration backend could not release a handle on last release.
    ///
    /// The entry has already been removed from the cache; reclaiming the
    /// underlying resource is the backend's concern.
    #[error("backend deregistration failed: {0}")]
    DeregistrationFailed(#[source] anyhow::Error),

    /// `deregister` was called with a handle this cache does not hold,
    /// either because it was already fully released or because it belongs
    /// to a different device's cache.
    #[error("handle not found in registration cache")]
    HandleNotFound,

    /// The requested page range partially overlaps an existing registration
    /// without being contained by it. The cache is unchanged.
    #[error("pages [{base:#x}, {end:#x}) partially overlap a cached registration")]
    OverlapConflict { base: usize, end: usize },

    /// Growing the slot storage failed. The cache retains its prior state.
    #[error("failed to grow registration cache storage")]
    Allocation(#[from] TryReserveError),

    /// The request does not describe a registrable region (zero length, or
    /// the address range overflows the address space).
    #[error("invalid memory region: {reason}")]
    InvalidRegion { reason: &'static str },

    /// Rejected cache configuration.
    #[error("invalid cache configuration: {reason}")]
    InvalidConfig { reason: &'static str },
}

/// Result type for cache operations.
pub type MrResult<T> = Result<T, MrError>;
