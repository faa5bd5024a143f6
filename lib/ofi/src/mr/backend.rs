// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The seam between the cache and the transport's registration primitives.

use std::fmt::Debug;

use anyhow::Result;

/// Kind of memory being submitted for registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemType {
    /// Host memory (pageable or pinned).
    Host,
    /// Device (GPU) memory.
    Device,
    /// Buffer exported as a dma-buf file descriptor.
    Dmabuf,
}

/// Transport-side registration primitives.
///
/// One implementation exists per communicator role (send side, receive
/// side); the embedding endpoint wires the right one into the cache at
/// construction. The cache calls [`register`](Self::register) on a miss and
/// [`deregister`](Self::deregister) when the last reference to an entry is
/// released, never otherwise.
///
/// Implementations need not provide their own synchronization beyond being
/// `Send + Sync`: the cache serializes all calls under its own lock.
pub trait RegistrationBackend: Send + Sync {
    /// Opaque token representing one active registration.
    ///
    /// The cache owns the handle from registration until the matching
    /// deregistration; callers of the cache receive clones and must treat
    /// them as opaque.
    type Handle: Clone + Eq + Debug + Send + Sync;

    /// Pin `[addr, addr + len)` with the transport and return its handle.
    ///
    /// The cache always passes a page-aligned `addr` and a page-multiple
    /// `len` covering the caller's raw buffer.
    fn register(&self, addr: usize, len: usize, kind: MemType) -> Result<Self::Handle>;

    /// Release a handle previously returned by [`register`](Self::register).
    fn deregister(&self, handle: &Self::Handle) -> Result<()>;
}
