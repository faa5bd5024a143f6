// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The cost model itself: latency tables and the Hockney estimate.

use tracing::warn;

use super::config::ModelParams;

/// Collective operations NCCL can ask the tuner about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Collective {
    Broadcast,
    Reduce,
    AllGather,
    ReduceScatter,
    AllReduce,
}

impl Collective {
    pub const COUNT: usize = 5;
    pub const ALL: [Collective; Self::COUNT] = [
        Collective::Broadcast,
        Collective::Reduce,
        Collective::AllGather,
        Collective::ReduceScatter,
        Collective::AllReduce,
    ];
}

/// Candidate algorithms, in NCCL's order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Algorithm {
    Tree,
    Ring,
    CollnetDirect,
    CollnetChain,
    Nvls,
    NvlsTree,
}

impl Algorithm {
    pub const COUNT: usize = 6;
    pub const ALL: [Algorithm; Self::COUNT] = [
        Algorithm::Tree,
        Algorithm::Ring,
        Algorithm::CollnetDirect,
        Algorithm::CollnetChain,
        Algorithm::Nvls,
        Algorithm::NvlsTree,
    ];
}

/// Candidate protocols, in NCCL's order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Protocol {
    Ll,
    Ll128,
    Simple,
}

impl Protocol {
    pub const COUNT: usize = 3;
    pub const ALL: [Protocol; Self::COUNT] = [Protocol::Ll, Protocol::Ll128, Protocol::Simple];
}

/// Channels assumed per operation. The plugin interface lets the channel
/// count be tuned as well; until the tuner optimizes over it, the cost is
/// computed at this fixed count.
pub const NUM_CHANNELS: usize = 8;

/// Completion-processing overhead on top of the wire latency for the Simple
/// protocol: device-side completion cost plus writing it up to the host, in
/// microseconds.
const NET_COMP_OVERHEAD: f32 = 3.0;

const HW_NVLINK: usize = 0;
const HW_PCI: usize = 1;

/// NCCL's algorithm-specific intra-node latencies (`hwLat[]` in NCCL
/// v2.19.4), network coefficients dropped in favor of [`ModelParams`].
/// Values in microseconds, indexed `[hw][algorithm][protocol]`.
const HW_LAT: [[[f32; Protocol::COUNT]; Algorithm::COUNT]; 2] = [
    // NVLink
    [
        [0.6, 1.25, 28.0], // Tree
        [0.6, 1.9, 3.4],   // Ring
        [0.0, 0.0, 3.7],   // Collnet Direct - unused
        [0.0, 0.0, 2.8],   // Collnet Chain - unused
        [0.0, 0.0, 23.0],  // NVLS (Simple only)
        [0.0, 0.0, 23.0],  // NVLS Tree (Simple only)
    ],
    // PCIe
    [
        [1.0, 1.9, 28.0], // Tree
        [1.0, 2.5, 5.7],  // Ring
        [0.0, 0.0, 3.7],  // Collnet Direct - unused
        [0.0, 0.0, 2.8],  // Collnet Chain - unused
        [0.0, 0.0, 0.0],  // NVLS (Simple only)
        [0.0, 0.0, 0.0],  // NVLS Tree (Simple only)
    ],
];

/// NCCL's per-algorithm base latencies (`baseLat[]`), in microseconds,
/// indexed `[algorithm][protocol]`.
const BASE_LAT: [[f32; Protocol::COUNT]; Algorithm::COUNT] = [
    [6.8, 14.0, 0.0], // Tree
    [6.6, 14.0, 8.4], // Ring
    [0.0, 0.0, 0.0],  // Collnet Direct
    [0.0, 0.0, 0.0],  // Collnet Chain
    [0.0, 0.0, 0.0],  // NVLS
    [0.0, 0.0, 0.0],  // NVLS Tree
];

/// Per-communicator tuner state.
///
/// Built once at communicator setup from the communicator's shape and the
/// fabric coefficients; base costs for every (collective, algorithm,
/// protocol) triple are precomputed here so the per-operation path is pure
/// arithmetic.
#[derive(Debug, Clone)]
pub struct TunerContext {
    num_ranks: usize,
    num_nodes: usize,
    params: ModelParams,
    base_costs: [[[f32; Protocol::COUNT]; Algorithm::COUNT]; Collective::COUNT],
}

impl TunerContext {
    pub fn new(num_ranks: usize, num_nodes: usize, params: ModelParams) -> Self {
        let mut base_costs = [[[0.0; Protocol::COUNT]; Algorithm::COUNT]; Collective::COUNT];
        for coll in Collective::ALL {
            for algo in Algorithm::ALL {
                for proto in Protocol::ALL {
                    base_costs[coll as usize][algo as usize][proto as usize] =
                        compute_base_cost(coll, algo, proto);
                }
            }
        }
        Self {
            num_ranks,
            num_nodes,
            params,
            base_costs,
        }
    }

    pub fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    /// Size-independent cost floor for a candidate triple, in microseconds.
    pub fn base_cost(&self, coll: Collective, algo: Algorithm, proto: Protocol) -> f32 {
        self.base_costs[coll as usize][algo as usize][proto as usize]
    }

    /// Estimated cost in microseconds to run `coll` over `size` bytes with
    /// the given algorithm/protocol, or `None` when the combination has no
    /// model (the plugin then falls back to NCCL's own selection).
    pub fn cost(
        &self,
        coll: Collective,
        algo: Algorithm,
        proto: Protocol,
        size: usize,
    ) -> Option<f32> {
        // Intra-node transfers ride NVLink for the NVLS algorithms and PCI
        // for standard trees/rings.
        let hw = match algo {
            Algorithm::Nvls | Algorithm::NvlsTree => HW_NVLINK,
            _ => HW_PCI,
        };
        let p2p_lat = HW_LAT[hw][algo as usize][proto as usize];

        // TODO: the Simple-protocol overhead should also capture libfabric
        // and proxy-thread completion processing, and stalls from
        // out-of-order completions.
        let net_lat = match proto {
            Protocol::Simple => self.params.net_lat + NET_COMP_OVERHEAD,
            _ => self.params.net_lat,
        };

        let channels = NUM_CHANNELS as f32;
        let rails = self.params.rails as f32;

        let (latency, mut bw) = match (coll, algo) {
            (Collective::AllReduce, Algorithm::Ring) => {
                let num_steps = 2 * (self.num_ranks - 1);
                let num_internode_steps = 2 * self.num_nodes;
                let latency = num_internode_steps as f32 * net_lat
                    + (num_steps as f32 - num_internode_steps as f32) * p2p_lat;
                (latency, self.params.internode_bw * rails * channels)
            }
            (Collective::AllReduce, Algorithm::NvlsTree) => {
                let latency =
                    p2p_lat + 2.0 * (self.num_nodes as f32).log2() * net_lat;
                let bw = self
                    .params
                    .intranode_bw
                    .min(self.params.internode_bw * rails / 2.0);
                (latency, bw * channels)
            }
            (Collective::AllReduce, Algorithm::Tree) => {
                // No correction factor like NCCL applies for 68B-256MiB
                // messages.
                let ranks_per_node = self.num_ranks / self.num_nodes;
                let latency = 2.0 * (ranks_per_node as f32 - 1.0) * p2p_lat
                    + 2.0 * (self.num_nodes as f32).log2() * net_lat;
                (latency, self.params.internode_bw * rails * channels / 2.0)
            }
            (Collective::AllReduce, _) => {
                warn!(?algo, ?coll, "algorithm without a cost model");
                return None;
            }
            _ => {
                warn!(?coll, "unmodeled collective, fall back to NCCL's selection");
                return None;
            }
        };

        // Penalize the low-latency protocol bandwidths for their framing
        // overhead: LL moves 4B data per 8B word, LL128 moves 120B per 128B.
        match proto {
            Protocol::Ll => bw *= 0.5,
            Protocol::Ll128 => bw *= 0.9375,
            Protocol::Simple => {}
        }

        if bw <= 0.0 {
            return None;
        }

        // Hockney: t = α + βm.
        Some(latency + size as f32 / bw)
    }
}

/// Base cost of a candidate triple. Currently NCCL's base latency passed
/// straight through; these could be modeled too as a follow-up.
fn compute_base_cost(_coll: Collective, algo: Algorithm, proto: Protocol) -> f32 {
    BASE_LAT[algo as usize][proto as usize]
}
