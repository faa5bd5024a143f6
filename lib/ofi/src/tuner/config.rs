// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Fabric parameters feeding the cost model.

/// Network coefficients for the cost model.
///
/// Latencies are in microseconds, bandwidths in bytes per microsecond. The
/// defaults describe an EFA-class fabric: PCI gen4 x16 inter-node baseline,
/// NVLink-rail intra-node bandwidth, four rails per GPU.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelParams {
    /// One-way network latency.
    pub net_lat: f32,

    /// Intra-node bandwidth, per rail.
    pub intranode_bw: f32,

    /// Inter-node bandwidth, per rail.
    pub internode_bw: f32,

    /// Network rails available to each GPU.
    pub rails: usize,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            net_lat: 20.0,
            intranode_bw: 12.5 * 1024.0 * 1024.0 * 1024.0 * 1e-6,
            internode_bw: 31.5 * 1024.0 * 1024.0 * 1024.0 * 1e-6,
            rails: 4,
        }
    }
}

impl ModelParams {
    /// Create params from environment variables, falling back to the
    /// defaults for anything unset.
    ///
    /// Environment variables:
    /// - `DYN_OFI_TUNER_NET_LATENCY`: one-way network latency in µs
    /// - `DYN_OFI_TUNER_INTRANODE_BW`: intra-node bandwidth in bytes/µs
    /// - `DYN_OFI_TUNER_INTERNODE_BW`: inter-node bandwidth in bytes/µs
    /// - `DYN_OFI_TUNER_NET_NUM_RAILS`: rails available to each GPU
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            net_lat: std::env::var("DYN_OFI_TUNER_NET_LATENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.net_lat),
            intranode_bw: std::env::var("DYN_OFI_TUNER_INTRANODE_BW")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.intranode_bw),
            internode_bw: std::env::var("DYN_OFI_TUNER_INTERNODE_BW")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.internode_bw),
            rails: std::env::var("DYN_OFI_TUNER_NET_NUM_RAILS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.rails),
        }
    }
}
