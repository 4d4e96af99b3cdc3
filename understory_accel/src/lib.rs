// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

// After you edit the crate's doc comment, run this command, then check README.md for any missing links
// cargo rdme --workspace-project=understory_accel --heading-base-level=0

//! Understory Accel: dynamic 3D AABB acceleration structures.
//!
//! Understory Accel stores axis-aligned bounding boxes keyed by an opaque,
//! copyable payload and answers the queries a physics broad phase needs.
//!
//! - Insert, move, and remove payloads incrementally.
//! - Query by raycast, box sweep, or overlapping box, through visitors that can
//!   stop early or shorten the query as hits arrive.
//! - Rebuild in time slices so that construction never stalls a frame.
//!
//! The main structure is [`AabbTree`], a bounding volume hierarchy whose
//! leaves are either small arrays ([`LeafArray`]) or uniform grids
//! ([`UniformGrid`]). [`GridAccel`] uses a single uniform grid for the whole
//! structure. Every structure implements [`SpatialAcceleration`], and a
//! [`SpatialAccelerationCollection`] combines several of them under
//! [`SpatialIdx`] keys.
//!
//! Payloads without bounds, or larger than
//! [`TreeConfig::max_payload_bounds`], are kept in a global list that every
//! query scans. Payloads moved out of their leaf wait in a dirty list until
//! the next rebuild.
//!
//! # Example
//!
//! ```rust
//! use glam::Vec3;
//! use understory_accel::{AabbTree, Aabb3D, CastHit, QueryLength, SpatialAcceleration, TreeConfig};
//!
//! // Build a tree over three unit boxes along the X axis.
//! let boxes = (0..3_u32).map(|i| {
//!     let min = Vec3::new(i as f32 * 10.0, 0.0, 0.0);
//!     (i, Some(Aabb3D::new(min, min + Vec3::ONE)))
//! });
//! let mut tree: AabbTree<u32> = AabbTree::from_elements(boxes, TreeConfig::default()).unwrap();
//!
//! // Find the closest box hit by a ray.
//! let mut closest = None;
//! tree.raycast(
//!     Vec3::new(-5.0, 0.5, 0.5),
//!     Vec3::X,
//!     100.0,
//!     &mut |hit: &CastHit<u32>, length: &mut QueryLength| {
//!         length.shrink_to(hit.toi);
//!         closest = Some(hit.payload);
//!         true
//!     },
//! )
//! .unwrap();
//! assert_eq!(closest, Some(0));
//!
//! // Move a box and query the space it moved into.
//! tree.update_element(2, Aabb3D::new(Vec3::splat(50.0), Vec3::splat(51.0)), true).unwrap();
//! let hits = tree
//!     .find_all_intersections(&Aabb3D::new(Vec3::splat(49.0), Vec3::splat(52.0)))
//!     .unwrap();
//! assert_eq!(hits, vec![2]);
//! ```
//!
//! Large inputs can be built over several frames:
//!
//! ```rust
//! use glam::Vec3;
//! use understory_accel::{AabbTree, Aabb3D, SpatialAcceleration, TreeConfig};
//!
//! let boxes = (0..1000_u32).map(|i| {
//!     let min = Vec3::new((i % 10) as f32, (i / 10 % 10) as f32, (i / 100) as f32) * 3.0;
//!     (i, Some(Aabb3D::new(min, min + Vec3::ONE)))
//! });
//! let config = TreeConfig::default().with_max_elements_per_time_slice(256);
//! let mut tree: AabbTree<u32> = AabbTree::new_time_sliced(boxes, config).unwrap();
//! while !tree.progress_time_slicing(false).unwrap() {
//!     // Do the rest of the frame's work.
//! }
//! assert_eq!(tree.len(), 1000);
//! ```
//!
//! ## Features
//!
//! - `std` *(default)*: enables `std` in `glam`.
//! - `libm`: float math through `libm` for `no_std` targets.
//!
//! ### Float semantics
//!
//! Bounds are assumed to satisfy `min <= max` on every axis and contain no
//! NaNs. Direction components equal to zero are treated as parallel axes and
//! never divided by.

#![no_std]

extern crate alloc;

mod accel;
mod build;
mod collection;
mod config;
mod error;
mod grid;
mod leaf;
mod pool;
mod query;
mod tree;
mod types;
mod visitor;

pub use accel::SpatialAcceleration;
pub use collection::{SpatialAccelerationCollection, SpatialIdx, Substructure};
pub use config::{GridConfig, TreeConfig};
pub use error::AccelError;
pub use grid::{CELLS_PER_ELEMENT, GridAccel, UniformGrid};
pub use leaf::{LeafArray, LeafStorage};
pub use pool::PoolHandle;
pub use query::{Cast, CastHit, ParallelAxes, QueryLength, QueryRay};
pub use tree::{AabbTree, LeafId, PayloadLocation, TreeState};
pub use types::{Aabb3D, BoundsElement, Payload};
pub use visitor::{CastVisitor, OverlapVisitor};
