// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! An authoritative structure plus a published, read-only snapshot.

use alloc::sync::Arc;
use core::marker::PhantomData;

use understory_accel::{AccelError, Payload, SpatialAcceleration};

/// A structure mutated by its owner and published to readers as snapshots.
///
/// The owner works on the internal copy. [`publish`][Self::publish] finishes
/// any time-sliced build and replaces the external snapshot with a clone of
/// the internal copy. Readers holding an older snapshot keep it until they
/// drop it.
#[derive(Debug)]
pub struct DoubleBuffered<P, S> {
    internal: S,
    external: Arc<S>,
    _payload: PhantomData<fn() -> P>,
}

impl<P: Payload, S: SpatialAcceleration<P> + Clone> DoubleBuffered<P, S> {
    /// Wrap `structure`, publishing it as the first snapshot.
    pub fn new(structure: S) -> Self {
        Self {
            external: Arc::new(structure.clone()),
            internal: structure,
            _payload: PhantomData,
        }
    }

    /// The authoritative copy.
    pub fn internal(&self) -> &S {
        &self.internal
    }

    /// The authoritative copy, for mutation.
    pub fn internal_mut(&mut self) -> &mut S {
        &mut self.internal
    }

    /// The last published snapshot.
    pub fn external(&self) -> Arc<S> {
        Arc::clone(&self.external)
    }

    /// Publish the internal copy.
    pub fn publish(&mut self) -> Result<(), AccelError> {
        self.internal.progress_time_slicing(true)?;
        self.external = Arc::new(self.internal.clone());
        tracing::trace!(len = self.internal.len(), "published snapshot");
        Ok(())
    }
}
