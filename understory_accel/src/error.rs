// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error type shared by all structures.

use alloc::collections::TryReserveError;

use thiserror::Error;

use crate::collection::SpatialIdx;

/// Errors reported by acceleration structures.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AccelError {
    /// The payload has no tracked location in the structure.
    #[error("payload is not tracked by this structure")]
    UnknownPayload,
    /// The payload is already tracked by the structure.
    #[error("payload is already tracked by this structure")]
    DuplicatePayload,
    /// A time-sliced build is still running; finish it before querying or mutating.
    #[error("time-sliced build has not completed")]
    BuildInProgress,
    /// No substructure is registered at the index.
    #[error("no substructure registered at {0:?}")]
    UnknownSubstructure(SpatialIdx),
    /// A substructure is already registered at the index.
    #[error("a substructure is already registered at {0:?}")]
    DuplicateSubstructure(SpatialIdx),
    /// Build storage could not be allocated.
    #[error("failed to reserve build storage")]
    Allocation(#[from] TryReserveError),
}
