// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tuning parameters, scoped to one structure instance.

/// Parameters for [`AabbTree`][crate::AabbTree] and the structures built on it.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TreeConfig {
    /// A build job with at most this many elements becomes a leaf.
    pub max_children_in_leaf: usize,
    /// A build job at this depth becomes a leaf regardless of size.
    pub max_tree_depth: usize,
    /// Elements whose largest extent exceeds this go to the global list.
    pub max_payload_bounds: f32,
    /// Element decisions per [`progress_time_slicing`] call; `0` means unbounded.
    ///
    /// An element costs one decision at every tree level it passes through,
    /// and emitting a leaf costs its element count (at least one). A build of
    /// `n` elements therefore finishes within about
    /// `n * (max_tree_depth + 1) / max_elements_per_time_slice` calls.
    ///
    /// [`progress_time_slicing`]: crate::SpatialAcceleration::progress_time_slicing
    pub max_elements_per_time_slice: usize,
    /// A full rebuild runs once the dirty list grows beyond this many elements.
    pub dirty_element_ceiling: usize,
    /// Parameters for grid leaves and standalone grids.
    pub grid: GridConfig,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_children_in_leaf: 12,
            max_tree_depth: 16,
            max_payload_bounds: 100_000.0,
            max_elements_per_time_slice: 0,
            dirty_element_ceiling: 1024,
            grid: GridConfig::default(),
        }
    }
}

impl TreeConfig {
    /// Set the leaf size limit.
    pub fn with_max_children_in_leaf(mut self, n: usize) -> Self {
        self.max_children_in_leaf = n;
        self
    }

    /// Set the depth limit.
    pub fn with_max_tree_depth(mut self, depth: usize) -> Self {
        self.max_tree_depth = depth;
        self
    }

    /// Set the largest extent an element may have and still live in the topology.
    pub fn with_max_payload_bounds(mut self, extent: f32) -> Self {
        self.max_payload_bounds = extent;
        self
    }

    /// Set the per-call time slice budget (`0` for unbounded).
    pub fn with_max_elements_per_time_slice(mut self, n: usize) -> Self {
        self.max_elements_per_time_slice = n;
        self
    }

    /// Set the dirty list size that triggers a rebuild.
    pub fn with_dirty_element_ceiling(mut self, n: usize) -> Self {
        self.dirty_element_ceiling = n;
        self
    }

    /// Set the grid parameters.
    pub fn with_grid(mut self, grid: GridConfig) -> Self {
        self.grid = grid;
        self
    }

    pub(crate) fn leaf_size(&self) -> usize {
        self.max_children_in_leaf.max(1)
    }

    pub(crate) fn time_slice_budget(&self) -> usize {
        match self.max_elements_per_time_slice {
            0 => usize::MAX,
            n => n,
        }
    }

    /// Whether bounds of this size may live in the topology.
    pub(crate) fn fits_topology(&self, bounds: &crate::Aabb3D) -> bool {
        // Infinite extents fail this comparison.
        bounds.max_extent() <= self.max_payload_bounds
    }
}

/// Parameters for [`UniformGrid`][crate::UniformGrid].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GridConfig {
    /// Upper bound on the number of cells along each axis.
    pub max_cells_per_axis: u32,
    /// Elements spanning more than this many cells along an axis are
    /// redirected to the owner's global list.
    pub max_cell_span: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            max_cells_per_axis: 32,
            max_cell_span: 8.0,
        }
    }
}
