// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Transport-agnostic building blocks for a libfabric (OFI) network plugin.
//!
//! Two independent pieces live here:
//!
//! - [`mr`]: a per-device memory-registration cache that deduplicates
//!   expensive "pin these pages with the NIC" calls by reference counting
//!   page-rounded address ranges.
//! - [`tuner`]: an analytical cost model for collective operations, used to
//!   steer algorithm/protocol selection.
//!
//! Device, endpoint, and communicator plumbing is owned by the embedding
//! plugin; these modules only define the seams they plug into.

pub mod mr;
pub mod tuner;
