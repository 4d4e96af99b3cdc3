// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

// After you edit the crate's doc comment, run this command, then check README.md for any missing links
// cargo rdme --workspace-project=understory_broadphase --heading-base-level=0

//! Understory Broadphase: candidate pairs for a physics step.
//!
//! This crate sits between a simulation and [`understory_accel`]:
//!
//! - [`BodySet`] keeps bodies under generational [`BodyKey`]s and records
//!   inserts, moves, and removals without touching the index.
//! - [`BodySet::commit`] flushes those changes into a
//!   [`SpatialAccelerationCollection`](understory_accel::SpatialAccelerationCollection)
//!   (removals, then additions, then moves) and reports [`Damage`]. A commit
//!   that fails part way returns a [`CommitError`] holding the damage
//!   already applied.
//! - [`find_pairs`] overlaps every body against the index and returns
//!   candidate pairs for the narrow phase, filtered by [`CollisionGroup`].
//! - [`DoubleBuffered`] publishes read-only snapshots of a structure to other
//!   threads while the owner keeps mutating its own copy.
//!
//! Narrow-phase geometry, constraint solving, and integration are left to the
//! caller.
//!
//! # Example
//!
//! ```rust
//! use glam::Vec3;
//! use understory_accel::{Aabb3D, AabbTree, SpatialAccelerationCollection, SpatialIdx, TreeConfig};
//! use understory_broadphase::{Body, BodyKey, BodySet, find_pairs};
//!
//! let idx = SpatialIdx::new(0, 0);
//! let mut index = SpatialAccelerationCollection::new();
//! index.add_substructure(idx, "bodies", AabbTree::<BodyKey>::new(TreeConfig::default())).unwrap();
//!
//! let mut bodies = BodySet::new();
//! let a = bodies.insert(Body::new(idx, Some(Aabb3D::new(Vec3::ZERO, Vec3::ONE))));
//! let b = bodies.insert(Body::new(idx, Some(Aabb3D::new(Vec3::splat(0.5), Vec3::splat(1.5)))));
//! let damage = bodies.commit(&mut index).unwrap();
//! assert_eq!(damage.added.len(), 2);
//!
//! let keys: Vec<_> = bodies.iter().map(|(k, _)| k).collect();
//! let pairs = find_pairs(&bodies, &index, keys).unwrap();
//! assert_eq!(pairs, vec![(a, b)]);
//! ```

#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

mod bodies;
mod double_buffer;
mod pairs;

pub use bodies::{Body, BodyKey, BodySet, CommitError, Damage};
pub use double_buffer::DoubleBuffered;
pub use pairs::{CollisionGroup, ParticleView, find_pairs};
