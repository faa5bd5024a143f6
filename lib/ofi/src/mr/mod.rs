// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-device memory-registration cache.
//!
//! Registering memory with the transport (pinning pages so the NIC can DMA
//! into them) is expensive, and callers routinely submit the same buffer, or
//! overlapping slices of it, many times. The cache maps page-rounded address
//! ranges to previously obtained registration handles and reference counts
//! them, so N overlapping requests against the same pages cost one backend
//! registration instead of N.
//!
//! One [`MrCache`] exists per network device. The transport primitives
//! themselves sit behind the [`RegistrationBackend`] trait, implemented per
//! communicator role by the embedding endpoint layer.

pub mod backend;
pub mod cache;
pub mod error;
mod region;

pub use backend::{MemType, RegistrationBackend};
pub use cache::{DEFAULT_INITIAL_CAPACITY, MrCache, MrCacheConfig, system_page_size};
pub use error::{MrError, MrResult};
