// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Analytical cost model for collective operations.
//!
//! A [`TunerContext`] is built per communicator from its rank/node counts
//! and a set of [`ModelParams`] describing the fabric. For a candidate
//! (collective, algorithm, protocol) triple it produces a Hockney-style
//! `latency + size / bandwidth` cost estimate in microseconds, which the
//! plugin compares across candidates to steer NCCL's selection.
//!
//! The context is plain owned state: callers construct it at communicator
//! setup and pass it where needed.

pub mod config;
pub mod model;

pub use config::ModelParams;
pub use model::{Algorithm, Collective, Protocol, TunerContext};
