// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dynamic AABB tree with time-sliced rebuilds.
//!
//! The tree keeps three homes for a payload, recorded in its location map:
//!
//! - a leaf of the built topology,
//! - the dirty list, for payloads inserted or moved out of their leaf since
//!   the last build,
//! - the global list, for payloads without bounds or too large to be worth
//!   placing in the topology.
//!
//! Dirty and global lists are scanned in full on every query. Once the dirty
//! list grows past [`TreeConfig::dirty_element_ceiling`] the tree rebuilds
//! itself from everything it holds.

use alloc::vec::Vec;
use core::fmt::Debug;

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::accel::SpatialAcceleration;
use crate::build::{BuildOutput, TreeBuilder, TreeNode};
use crate::config::TreeConfig;
use crate::error::AccelError;
use crate::leaf::{LeafArray, LeafStorage};
use crate::pool::{ElementPool, PoolHandle};
use crate::query::{Cast, QueryLength};
use crate::types::{Aabb3D, BoundsElement, Payload};
use crate::visitor::{CastVisitor, OverlapVisitor, cast_element, overlap_element};

/// Index of a leaf in the current topology.
///
/// Leaf ids are only meaningful until the next rebuild.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LeafId(u32);

impl LeafId {
    /// Position of the leaf in the tree's leaf storage.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where a tracked payload currently lives.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PayloadLocation {
    /// In a leaf of the built topology.
    InTopology(LeafId),
    /// In the dirty list, awaiting the next rebuild.
    Dirty(PoolHandle),
    /// In the global list.
    Global(PoolHandle),
}

/// Lifecycle of a tree.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TreeState {
    /// Nothing tracked and no build running.
    Empty,
    /// A time-sliced build is running; queries and mutations are refused.
    Building,
    /// Ready for queries and mutations.
    Queryable,
}

/// A bounding volume hierarchy over 3D AABBs.
///
/// `L` is the storage used at the leaves: a [`LeafArray`] by default, or a
/// [`UniformGrid`][crate::UniformGrid] for large leaves.
///
/// `Clone` produces a deep, independent copy.
#[derive(Clone)]
pub struct AabbTree<P: Payload, L = LeafArray<P>> {
    config: TreeConfig,
    nodes: Vec<TreeNode>,
    root_bounds: Option<Aabb3D>,
    leaves: Vec<L>,
    leaf_bounds: Vec<Aabb3D>,
    dirty: ElementPool<P>,
    global: ElementPool<P>,
    locations: HashMap<P, PayloadLocation>,
    builder: Option<TreeBuilder<P, L>>,
}

impl<P: Payload, L> Debug for AabbTree<P, L> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AabbTree")
            .field("config", &self.config)
            .field("nodes", &self.nodes.len())
            .field("leaves", &self.leaves.len())
            .field("dirty", &self.dirty.len())
            .field("global", &self.global.len())
            .field("tracked", &self.locations.len())
            .field("building", &self.builder.is_some())
            .finish_non_exhaustive()
    }
}

impl<P: Payload, L: LeafStorage<P>> AabbTree<P, L> {
    /// Create an empty, queryable tree.
    pub fn new(config: TreeConfig) -> Self {
        Self {
            config,
            nodes: Vec::new(),
            root_bounds: None,
            leaves: Vec::new(),
            leaf_bounds: Vec::new(),
            dirty: ElementPool::default(),
            global: ElementPool::default(),
            locations: HashMap::new(),
            builder: None,
        }
    }

    /// Build a tree over `elements` in one call.
    ///
    /// A payload with `None` bounds is unbounded and kept in the global list.
    pub fn from_elements(
        elements: impl IntoIterator<Item = (P, Option<Aabb3D>)>,
        config: TreeConfig,
    ) -> Result<Self, AccelError> {
        let mut builder = TreeBuilder::new(elements, config)?;
        builder.progress(true)?;
        let mut tree = Self::new(config);
        tree.install(builder.finish());
        Ok(tree)
    }

    /// Start a build over `elements` that advances only through
    /// [`progress_time_slicing`][SpatialAcceleration::progress_time_slicing].
    ///
    /// Until the build completes, queries and mutations return
    /// [`AccelError::BuildInProgress`].
    pub fn new_time_sliced(
        elements: impl IntoIterator<Item = (P, Option<Aabb3D>)>,
        config: TreeConfig,
    ) -> Result<Self, AccelError> {
        let builder = TreeBuilder::new(elements, config)?;
        let mut tree = Self::new(config);
        if builder.is_complete() {
            tree.install(builder.finish());
        } else {
            tree.builder = Some(builder);
        }
        Ok(tree)
    }

    /// The configuration this tree was created with.
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TreeState {
        if self.builder.is_some() {
            TreeState::Building
        } else if self.locations.is_empty() {
            TreeState::Empty
        } else {
            TreeState::Queryable
        }
    }

    /// Where a payload currently lives, if it is tracked and the tree is built.
    pub fn location(&self, payload: P) -> Option<PayloadLocation> {
        self.locations.get(&payload).copied()
    }

    /// Number of leaves in the current topology.
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Start tracking a payload.
    ///
    /// New payloads go to the dirty list, or the global list when
    /// `has_bounds` is `false` or the bounds are larger than
    /// [`TreeConfig::max_payload_bounds`].
    pub fn insert_element(
        &mut self,
        payload: P,
        bounds: Aabb3D,
        has_bounds: bool,
    ) -> Result<(), AccelError> {
        self.ensure_ready()?;
        if self.locations.contains_key(&payload) {
            return Err(AccelError::DuplicatePayload);
        }
        self.place(payload, bounds, has_bounds);
        self.reoptimize_if_needed()
    }

    /// Rebuild the topology from every tracked payload.
    ///
    /// The new tree is built in full before it replaces the current one, so
    /// an allocation failure leaves the tree unchanged.
    pub fn reoptimize(&mut self) -> Result<(), AccelError> {
        self.ensure_ready()?;
        let mut all: Vec<(P, Option<Aabb3D>)> = Vec::new();
        all.try_reserve(self.locations.len())?;
        for leaf in &self.leaves {
            leaf.for_each_element(|e| all.push((e.payload, Some(e.bounds))));
        }
        all.extend(self.dirty.iter().map(|e| (e.payload, Some(e.bounds))));
        all.extend(self.global.iter().map(|e| (e.payload, Some(e.bounds))));
        let dirty = self.dirty.len();

        let mut builder = TreeBuilder::new(all, self.config)?;
        builder.progress(true)?;
        self.install(builder.finish());
        tracing::debug!(
            dirty,
            leaves = self.leaves.len(),
            global = self.global.len(),
            "reoptimized tree"
        );
        Ok(())
    }

    fn ensure_ready(&self) -> Result<(), AccelError> {
        if self.builder.is_some() {
            Err(AccelError::BuildInProgress)
        } else {
            Ok(())
        }
    }

    fn install(&mut self, out: BuildOutput<P, L>) {
        self.nodes = out.nodes;
        self.root_bounds = out.root_bounds;
        self.leaves = out.leaves;
        self.leaf_bounds = out.leaf_bounds;
        self.dirty.clear();
        self.global.clear();
        self.locations.clear();
        self.locations.reserve(out.leaf_of.len() + out.global.len());
        for (payload, leaf) in out.leaf_of {
            self.locations
                .insert(payload, PayloadLocation::InTopology(LeafId(leaf)));
        }
        for element in out.global {
            let handle = self.global.insert(element);
            self.locations
                .insert(element.payload, PayloadLocation::Global(handle));
        }
    }

    fn place(&mut self, payload: P, bounds: Aabb3D, has_bounds: bool) {
        if has_bounds && self.config.fits_topology(&bounds) {
            let handle = self.dirty.insert(BoundsElement::new(payload, bounds));
            self.locations.insert(payload, PayloadLocation::Dirty(handle));
        } else {
            self.place_global(payload, if has_bounds { bounds } else { Aabb3D::INFINITE });
        }
    }

    fn place_global(&mut self, payload: P, bounds: Aabb3D) {
        tracing::trace!(?payload, "routing element to the global list");
        let handle = self.global.insert(BoundsElement::new(payload, bounds));
        self.locations.insert(payload, PayloadLocation::Global(handle));
    }

    fn detach(&mut self, payload: P, location: PayloadLocation) {
        let removed = match location {
            PayloadLocation::InTopology(leaf) => self.leaves[leaf.index()].remove(payload),
            PayloadLocation::Dirty(handle) => self.dirty.remove(handle),
            PayloadLocation::Global(handle) => self.global.remove(handle),
        };
        debug_assert!(
            removed.is_some(),
            "location map out of sync with storage for {payload:?}"
        );
    }

    fn reoptimize_if_needed(&mut self) -> Result<(), AccelError> {
        if self.dirty.len() > self.config.dirty_element_ceiling {
            self.reoptimize()?;
        }
        Ok(())
    }

    fn scan_lists<V: CastVisitor<P>>(
        &self,
        cast: &Cast,
        length: &mut QueryLength,
        visitor: &mut V,
    ) -> bool {
        self.global
            .iter()
            .chain(self.dirty.iter())
            .all(|e| cast_element(e, cast, length, visitor))
    }
}

impl<P: Payload, L: LeafStorage<P>> SpatialAcceleration<P> for AabbTree<P, L> {
    fn cast_with<V: CastVisitor<P>>(
        &self,
        cast: &Cast,
        length: &mut QueryLength,
        visitor: &mut V,
    ) -> Result<bool, AccelError> {
        self.ensure_ready()?;
        if !self.scan_lists(cast, length, visitor) {
            return Ok(false);
        }
        let Some(root_toi) = self
            .root_bounds
            .and_then(|b| cast.hit(&b, length.get()))
            .map(|(toi, _)| toi)
        else {
            return Ok(true);
        };

        let mut stack: SmallVec<[(u32, f32); 32]> = SmallVec::new();
        stack.push((0, root_toi));
        while let Some((node, entry)) = stack.pop() {
            // The visitor may have shortened the query since this was pushed.
            if entry > length.get() {
                continue;
            }
            match self.nodes[node as usize] {
                TreeNode::Leaf { leaf } => {
                    if !self.leaves[leaf as usize].cast_fast(cast, length, visitor) {
                        return Ok(false);
                    }
                }
                TreeNode::Interior {
                    child_bounds,
                    children,
                } => {
                    let reach = length.get();
                    let near = cast.hit(&child_bounds[0], reach).map(|(t, _)| t);
                    let far = cast.hit(&child_bounds[1], reach).map(|(t, _)| t);
                    match (near, far) {
                        (Some(t0), Some(t1)) if t1 < t0 => {
                            stack.push((children[0], t0));
                            stack.push((children[1], t1));
                        }
                        (Some(t0), Some(t1)) => {
                            stack.push((children[1], t1));
                            stack.push((children[0], t0));
                        }
                        (Some(t0), None) => stack.push((children[0], t0)),
                        (None, Some(t1)) => stack.push((children[1], t1)),
                        (None, None) => {}
                    }
                }
            }
        }
        Ok(true)
    }

    fn overlap_with<V: OverlapVisitor<P>>(
        &self,
        bounds: &Aabb3D,
        visitor: &mut V,
    ) -> Result<bool, AccelError> {
        self.ensure_ready()?;
        let listed = self
            .global
            .iter()
            .chain(self.dirty.iter())
            .all(|e| overlap_element(e, bounds, visitor));
        if !listed {
            return Ok(false);
        }
        if !self.root_bounds.is_some_and(|b| b.intersects(bounds)) {
            return Ok(true);
        }

        let mut stack: SmallVec<[u32; 32]> = SmallVec::new();
        stack.push(0);
        while let Some(node) = stack.pop() {
            match self.nodes[node as usize] {
                TreeNode::Leaf { leaf } => {
                    if !self.leaves[leaf as usize].overlap_fast(bounds, visitor) {
                        return Ok(false);
                    }
                }
                TreeNode::Interior {
                    child_bounds,
                    children,
                } => {
                    for i in [1, 0] {
                        if child_bounds[i].intersects(bounds) {
                            stack.push(children[i]);
                        }
                    }
                }
            }
        }
        Ok(true)
    }

    fn update_element(
        &mut self,
        payload: P,
        bounds: Aabb3D,
        has_bounds: bool,
    ) -> Result<(), AccelError> {
        self.ensure_ready()?;
        let location = *self
            .locations
            .get(&payload)
            .ok_or(AccelError::UnknownPayload)?;
        let fits = has_bounds && self.config.fits_topology(&bounds);
        match location {
            PayloadLocation::InTopology(leaf)
                if fits && self.leaf_bounds[leaf.index()].contains(&bounds) =>
            {
                if !self.leaves[leaf.index()].accepts(&bounds) {
                    self.detach(payload, location);
                    self.place_global(payload, bounds);
                    return Ok(());
                }
                if self.leaves[leaf.index()].update(payload, bounds) {
                    return Ok(());
                }
            }
            PayloadLocation::Dirty(handle) if fits => {
                if let Some(element) = self.dirty.get_mut(handle) {
                    element.bounds = bounds;
                    return Ok(());
                }
            }
            PayloadLocation::Global(handle) if !fits => {
                if let Some(element) = self.global.get_mut(handle) {
                    element.bounds = if has_bounds { bounds } else { Aabb3D::INFINITE };
                    return Ok(());
                }
            }
            _ => {}
        }
        self.detach(payload, location);
        self.place(payload, bounds, has_bounds);
        self.reoptimize_if_needed()
    }

    fn remove_element(&mut self, payload: P) -> Result<(), AccelError> {
        self.ensure_ready()?;
        let location = self
            .locations
            .remove(&payload)
            .ok_or(AccelError::UnknownPayload)?;
        self.detach(payload, location);
        Ok(())
    }

    fn contains_payload(&self, payload: P) -> bool {
        match &self.builder {
            Some(builder) => builder.contains(payload),
            None => self.locations.contains_key(&payload),
        }
    }

    fn len(&self) -> usize {
        match &self.builder {
            Some(builder) => builder.len(),
            None => self.locations.len(),
        }
    }

    fn global_objects(&self) -> Vec<BoundsElement<P>> {
        match &self.builder {
            Some(builder) => builder.global().to_vec(),
            None => self.global.iter().copied().collect(),
        }
    }

    fn num_dirty_elements(&self) -> usize {
        self.dirty.len()
    }

    fn is_build_complete(&self) -> bool {
        self.builder.is_none()
    }

    fn progress_time_slicing(&mut self, force_complete: bool) -> Result<bool, AccelError> {
        let Some(builder) = self.builder.as_mut() else {
            return Ok(true);
        };
        if !builder.progress(force_complete)? {
            return Ok(false);
        }
        if let Some(builder) = self.builder.take() {
            self.install(builder.finish());
        }
        Ok(true)
    }
}
