// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Uniform grid over 3D AABBs.
//!
//! Elements are bucketed into every cell their bounds touch, and queries
//! touch only the cells overlapping the query primitive, deduplicating
//! elements that span several cells. Cell sizes follow the mean element
//! extent, capped so no axis has more than
//! [`GridConfig::max_cells_per_axis`] cells and the whole grid has at most
//! [`CELLS_PER_ELEMENT`] cells per element it was laid out for. Coordinates
//! outside the grid's domain clamp to the edge cells, so any bounds can be
//! stored.
//!
//! [`UniformGrid`] serves as an [`AabbTree`][crate::AabbTree] leaf, and
//! [`GridAccel`] wraps one as a whole structure with its own global list.

use alloc::vec::Vec;
use core::fmt::Debug;

use glam::Vec3;
use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;

use crate::accel::SpatialAcceleration;
use crate::config::{GridConfig, TreeConfig};
use crate::error::AccelError;
use crate::leaf::LeafStorage;
use crate::pool::{ElementPool, PoolHandle};
use crate::query::{Cast, QueryLength};
use crate::types::{Aabb3D, BoundsElement, Payload, union_all};
use crate::visitor::{CastVisitor, OverlapVisitor, cast_element, overlap_element};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct CellRange {
    lo: [u32; 3],
    hi: [u32; 3],
}

#[derive(Clone, Debug)]
struct GridSlot<P> {
    element: BoundsElement<P>,
    // Cells currently containing this element.
    cells: CellRange,
}

/// Dense uniform grid of cells.
#[derive(Clone)]
pub struct UniformGrid<P> {
    origin: Vec3,
    cell_size: Vec3,
    inv_cell_size: Vec3,
    dims: [u32; 3],
    max_cell_span: f32,
    cells: Vec<SmallVec<[u32; 4]>>,
    slots: Vec<Option<GridSlot<P>>>,
    free_list: Vec<u32>,
    lookup: HashMap<P, u32>,
}

impl<P> Debug for UniformGrid<P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let occupied = self.cells.iter().filter(|c| !c.is_empty()).count();
        f.debug_struct("UniformGrid")
            .field("origin", &self.origin)
            .field("cell_size", &self.cell_size)
            .field("dims", &self.dims)
            .field("live_slots", &self.lookup.len())
            .field("occupied_cells", &occupied)
            .finish_non_exhaustive()
    }
}

/// Most cells a grid allocates per element it is laid out for.
pub const CELLS_PER_ELEMENT: usize = 8;

#[allow(
    clippy::cast_possible_truncation,
    reason = "Cell counts are capped by `max_cells_per_axis`; the float-to-int cast saturates."
)]
fn axis_cells(extent: f32, mean_extent: f32, max_cells: u32) -> u32 {
    let max_cells = max_cells.max(1);
    if !extent.is_finite() || extent <= 0.0 {
        return 1;
    }
    let target = mean_extent.max(extent / max_cells as f32);
    let n = extent / target;
    let mut cells = n as u32;
    if (cells as f32) < n {
        cells = cells.saturating_add(1);
    }
    cells.clamp(1, max_cells)
}

// Halve the longest axis until the grid fits the cell budget.
fn cap_total_cells(dims: &mut [u32; 3], budget: usize) {
    while dims.iter().map(|&d| d as usize).product::<usize>() > budget {
        let axis = if dims[0] >= dims[1] && dims[0] >= dims[2] {
            0
        } else if dims[1] >= dims[2] {
            1
        } else {
            2
        };
        dims[axis] = dims[axis].div_ceil(2);
    }
}

fn cell_indices(dims: [u32; 3], range: CellRange) -> impl Iterator<Item = usize> {
    let [dx, dy, _] = dims;
    (range.lo[2]..=range.hi[2]).flat_map(move |z| {
        (range.lo[1]..=range.hi[1]).flat_map(move |y| {
            (range.lo[0]..=range.hi[0]).map(move |x| ((z * dy + y) * dx + x) as usize)
        })
    })
}

impl<P: Payload> UniformGrid<P> {
    /// Create an empty grid covering `domain` with cells sized from `mean_extent`.
    ///
    /// `capacity` is the number of elements the grid is meant for; the grid
    /// has at most [`CELLS_PER_ELEMENT`] cells for each of them.
    pub fn with_layout(
        domain: Aabb3D,
        mean_extent: Vec3,
        capacity: usize,
        config: &GridConfig,
    ) -> Result<Self, AccelError> {
        let extents = domain.extents();
        let mut dims = [1_u32; 3];
        for axis in 0..3 {
            dims[axis] = axis_cells(extents[axis], mean_extent[axis], config.max_cells_per_axis);
        }
        cap_total_cells(&mut dims, capacity.max(1).saturating_mul(CELLS_PER_ELEMENT));

        let mut cell_size = Vec3::ZERO;
        let mut inv_cell_size = Vec3::ZERO;
        for axis in 0..3 {
            let extent = extents[axis];
            if extent.is_finite() && extent > 0.0 {
                cell_size[axis] = extent / dims[axis] as f32;
                if dims[axis] > 1 {
                    inv_cell_size[axis] = 1.0 / cell_size[axis];
                }
            }
        }
        let total = dims.iter().map(|&d| d as usize).product();
        let mut cells = Vec::new();
        cells.try_reserve_exact(total)?;
        cells.resize_with(total, SmallVec::new);
        Ok(Self {
            origin: domain.min,
            cell_size,
            inv_cell_size,
            dims,
            max_cell_span: config.max_cell_span,
            cells,
            slots: Vec::new(),
            free_list: Vec::new(),
            lookup: HashMap::new(),
        })
    }

    fn single_cell(config: &GridConfig) -> Self {
        let mut cells = Vec::with_capacity(1);
        cells.push(SmallVec::new());
        Self {
            origin: Vec3::ZERO,
            cell_size: Vec3::ZERO,
            inv_cell_size: Vec3::ZERO,
            dims: [1; 3],
            max_cell_span: config.max_cell_span,
            cells,
            slots: Vec::new(),
            free_list: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    /// Build a grid sized for `elements`.
    ///
    /// Elements with non-finite bounds, or spanning more than
    /// [`GridConfig::max_cell_span`] cells along an axis, are pushed to
    /// `overflow` instead of being stored.
    pub fn from_elements(
        elements: Vec<BoundsElement<P>>,
        config: &GridConfig,
        overflow: &mut Vec<BoundsElement<P>>,
    ) -> Result<Self, AccelError> {
        let (finite, infinite): (Vec<_>, Vec<_>) =
            elements.into_iter().partition(|e| e.bounds.is_finite());
        overflow.extend(infinite);

        let domain = union_all(&finite).unwrap_or(Aabb3D::new(Vec3::ZERO, Vec3::ZERO));
        let mean_extent = if finite.is_empty() {
            Vec3::ZERO
        } else {
            let sum = finite.iter().fold(Vec3::ZERO, |acc, e| acc + e.bounds.extents());
            sum / finite.len() as f32
        };
        let mut grid = Self::with_layout(domain, mean_extent, finite.len(), config)?;
        grid.slots.try_reserve(finite.len())?;
        for element in finite {
            if grid.is_extreme(&element.bounds) {
                overflow.push(element);
            } else {
                grid.insert(element);
            }
        }
        Ok(grid)
    }

    /// Number of cells along each axis.
    pub fn dims(&self) -> [u32; 3] {
        self.dims
    }

    /// Size of one cell along each axis (zero on flat or unbounded axes).
    pub fn cell_size(&self) -> Vec3 {
        self.cell_size
    }

    /// Whether the payload is stored.
    pub fn contains_payload(&self, payload: P) -> bool {
        self.lookup.contains_key(&payload)
    }

    /// Whether bounds are too large relative to the cells to be stored well.
    pub fn is_extreme(&self, bounds: &Aabb3D) -> bool {
        let extents = bounds.extents();
        (0..3).any(|axis| {
            self.dims[axis] > 1 && extents[axis] * self.inv_cell_size[axis] > self.max_cell_span
        })
    }

    /// Store an element. The payload must not already be stored.
    pub fn insert(&mut self, element: BoundsElement<P>) {
        debug_assert!(
            !self.lookup.contains_key(&element.payload),
            "payload inserted twice into a grid"
        );
        let range = self.covered(&element.bounds);
        let slot = match self.free_list.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(None);
                self.new_slot_index()
            }
        };
        for c in cell_indices(self.dims, range) {
            self.cells[c].push(slot);
        }
        self.slots[slot as usize] = Some(GridSlot {
            element,
            cells: range,
        });
        self.lookup.insert(element.payload, slot);
    }

    #[allow(
        clippy::cast_possible_truncation,
        reason = "Grid slots are intentionally 32-bit."
    )]
    fn new_slot_index(&self) -> u32 {
        (self.slots.len() - 1) as u32
    }

    #[allow(
        clippy::cast_possible_truncation,
        reason = "The value is clamped to the cell count before the cast."
    )]
    fn cell_coord(&self, axis: usize, value: f32) -> u32 {
        let n = self.dims[axis];
        if n <= 1 {
            return 0;
        }
        let t = (value - self.origin[axis]) * self.inv_cell_size[axis];
        if t.is_nan() || t <= 0.0 {
            0
        } else {
            // Truncation equals flooring for positive values; the cast saturates.
            (t as u32).min(n - 1)
        }
    }

    fn covered(&self, bounds: &Aabb3D) -> CellRange {
        let mut range = CellRange {
            lo: [0; 3],
            hi: [0; 3],
        };
        for axis in 0..3 {
            range.lo[axis] = self.cell_coord(axis, bounds.min[axis]);
            range.hi[axis] = self.cell_coord(axis, bounds.max[axis]);
        }
        range
    }

    fn slot_entry(&self, slot: u32) -> &GridSlot<P> {
        self.slots
            .get(slot as usize)
            .expect("grid invariant violated: cell references out-of-bounds slot")
            .as_ref()
            .expect("grid invariant violated: cell references vacant slot")
    }

    fn remove_from_cells(&mut self, slot: u32, range: CellRange) {
        for c in cell_indices(self.dims, range) {
            let cell = &mut self.cells[c];
            let pos = cell
                .iter()
                .position(|&s| s == slot)
                .expect("grid invariant violated: slot not found in expected cell");
            cell.swap_remove(pos);
        }
    }

    fn visit_range<F: FnMut(&BoundsElement<P>) -> bool>(&self, range: CellRange, mut f: F) -> bool {
        let mut seen: HashSet<u32> = HashSet::new();
        for c in cell_indices(self.dims, range) {
            for &slot in &self.cells[c] {
                if !seen.insert(slot) {
                    continue;
                }
                if !f(&self.slot_entry(slot).element) {
                    return false;
                }
            }
        }
        true
    }
}

impl<P: Payload> LeafStorage<P> for UniformGrid<P> {
    fn build(
        elements: Vec<BoundsElement<P>>,
        config: &TreeConfig,
        overflow: &mut Vec<BoundsElement<P>>,
    ) -> Result<Self, AccelError> {
        Self::from_elements(elements, &config.grid, overflow)
    }

    fn accepts(&self, bounds: &Aabb3D) -> bool {
        !self.is_extreme(bounds)
    }

    fn len(&self) -> usize {
        self.lookup.len()
    }

    fn update(&mut self, payload: P, bounds: Aabb3D) -> bool {
        let Some(&slot) = self.lookup.get(&payload) else {
            return false;
        };
        let old = self.slot_entry(slot).cells;
        let range = self.covered(&bounds);
        if range != old {
            self.remove_from_cells(slot, old);
            for c in cell_indices(self.dims, range) {
                self.cells[c].push(slot);
            }
        }
        self.slots[slot as usize] = Some(GridSlot {
            element: BoundsElement::new(payload, bounds),
            cells: range,
        });
        true
    }

    fn remove(&mut self, payload: P) -> Option<BoundsElement<P>> {
        let slot = self.lookup.remove(&payload)?;
        let entry = self.slots[slot as usize].take()?;
        self.remove_from_cells(slot, entry.cells);
        self.free_list.push(slot);
        Some(entry.element)
    }

    fn for_each_element<F: FnMut(&BoundsElement<P>)>(&self, mut f: F) {
        for entry in self.slots.iter().flatten() {
            f(&entry.element);
        }
    }

    fn overlap_fast<V: OverlapVisitor<P>>(&self, bounds: &Aabb3D, visitor: &mut V) -> bool {
        self.visit_range(self.covered(bounds), |e| overlap_element(e, bounds, visitor))
    }

    fn cast_fast<V: CastVisitor<P>>(
        &self,
        cast: &Cast,
        length: &mut QueryLength,
        visitor: &mut V,
    ) -> bool {
        let range = self.covered(&cast.swept_bounds(length.get()));
        self.visit_range(range, |e| cast_element(e, cast, length, visitor))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum GridLocation {
    Grid,
    Global(PoolHandle),
}

/// A [`UniformGrid`] used as a whole acceleration structure.
///
/// Elements without bounds, larger than
/// [`TreeConfig::max_payload_bounds`], or too large for the grid's cells
/// live in a global list scanned by every query. The grid re-lays itself out
/// from its current contents once more than
/// [`TreeConfig::dirty_element_ceiling`] inserts and moves have happened
/// since the last layout.
#[derive(Clone, Debug)]
pub struct GridAccel<P: Payload> {
    config: TreeConfig,
    grid: UniformGrid<P>,
    global: ElementPool<P>,
    locations: HashMap<P, GridLocation>,
    changes_since_layout: usize,
}

impl<P: Payload> GridAccel<P> {
    /// Create an empty grid structure.
    pub fn new(config: TreeConfig) -> Self {
        Self {
            grid: UniformGrid::single_cell(&config.grid),
            config,
            global: ElementPool::default(),
            locations: HashMap::new(),
            changes_since_layout: 0,
        }
    }

    /// Build a grid structure sized for the given payloads.
    ///
    /// A payload with `None` bounds has no bounding box and is kept in the
    /// global list.
    pub fn from_elements(
        elements: impl IntoIterator<Item = (P, Option<Aabb3D>)>,
        config: TreeConfig,
    ) -> Result<Self, AccelError> {
        let mut locations = HashMap::new();
        let mut gridded = Vec::new();
        let mut global = Vec::new();
        for (payload, bounds) in elements {
            if locations.insert(payload, GridLocation::Grid).is_some() {
                return Err(AccelError::DuplicatePayload);
            }
            match bounds {
                Some(b) if config.fits_topology(&b) => gridded.push(BoundsElement::new(payload, b)),
                _ => global.push(BoundsElement::new(
                    payload,
                    bounds.unwrap_or(Aabb3D::INFINITE),
                )),
            }
        }
        let grid = UniformGrid::from_elements(gridded, &config.grid, &mut global)?;
        let mut pool = ElementPool::default();
        for element in global {
            let handle = pool.insert(element);
            locations.insert(element.payload, GridLocation::Global(handle));
        }
        tracing::debug!(
            dims = ?grid.dims(),
            gridded = grid.len(),
            global = pool.len(),
            "laid out uniform grid"
        );
        Ok(Self {
            config,
            grid,
            global: pool,
            locations,
            changes_since_layout: 0,
        })
    }

    /// The underlying grid.
    pub fn grid(&self) -> &UniformGrid<P> {
        &self.grid
    }

    /// Add a payload that is not yet tracked.
    pub fn insert_element(
        &mut self,
        payload: P,
        bounds: Aabb3D,
        has_bounds: bool,
    ) -> Result<(), AccelError> {
        if self.locations.contains_key(&payload) {
            return Err(AccelError::DuplicatePayload);
        }
        self.place(payload, bounds, has_bounds);
        self.note_change()
    }

    /// Lay the grid out again from its current contents.
    pub fn rebuild(&mut self) -> Result<(), AccelError> {
        let mut all: Vec<(P, Option<Aabb3D>)> = Vec::new();
        all.try_reserve(self.locations.len())?;
        self.grid
            .for_each_element(|e| all.push((e.payload, Some(e.bounds))));
        all.extend(self.global.iter().map(|e| (e.payload, Some(e.bounds))));
        *self = Self::from_elements(all, self.config)?;
        Ok(())
    }

    fn place(&mut self, payload: P, bounds: Aabb3D, has_bounds: bool) {
        let bounds = if has_bounds { bounds } else { Aabb3D::INFINITE };
        let element = BoundsElement::new(payload, bounds);
        if has_bounds && self.config.fits_topology(&bounds) && !self.grid.is_extreme(&bounds) {
            self.grid.insert(element);
            self.locations.insert(payload, GridLocation::Grid);
        } else {
            tracing::trace!(?payload, "routing element to the global list");
            let handle = self.global.insert(element);
            self.locations.insert(payload, GridLocation::Global(handle));
        }
    }

    fn detach(&mut self, payload: P, location: GridLocation) {
        match location {
            GridLocation::Grid => {
                self.grid.remove(payload);
            }
            GridLocation::Global(handle) => {
                self.global.remove(handle);
            }
        }
    }

    fn note_change(&mut self) -> Result<(), AccelError> {
        self.changes_since_layout += 1;
        if self.changes_since_layout > self.config.dirty_element_ceiling {
            self.rebuild()?;
        }
        Ok(())
    }
}

impl<P: Payload> SpatialAcceleration<P> for GridAccel<P> {
    fn cast_with<V: CastVisitor<P>>(
        &self,
        cast: &Cast,
        length: &mut QueryLength,
        visitor: &mut V,
    ) -> Result<bool, AccelError> {
        for element in self.global.iter() {
            if !cast_element(element, cast, length, visitor) {
                return Ok(false);
            }
        }
        Ok(self.grid.cast_fast(cast, length, visitor))
    }

    fn overlap_with<V: OverlapVisitor<P>>(
        &self,
        bounds: &Aabb3D,
        visitor: &mut V,
    ) -> Result<bool, AccelError> {
        for element in self.global.iter() {
            if !overlap_element(element, bounds, visitor) {
                return Ok(false);
            }
        }
        Ok(self.grid.overlap_fast(bounds, visitor))
    }

    fn update_element(
        &mut self,
        payload: P,
        bounds: Aabb3D,
        has_bounds: bool,
    ) -> Result<(), AccelError> {
        let location = *self
            .locations
            .get(&payload)
            .ok_or(AccelError::UnknownPayload)?;
        let stays_in_grid = has_bounds
            && location == GridLocation::Grid
            && self.config.fits_topology(&bounds)
            && !self.grid.is_extreme(&bounds);
        if stays_in_grid {
            self.grid.update(payload, bounds);
        } else {
            self.detach(payload, location);
            self.place(payload, bounds, has_bounds);
        }
        self.note_change()
    }

    fn remove_element(&mut self, payload: P) -> Result<(), AccelError> {
        let location = self
            .locations
            .remove(&payload)
            .ok_or(AccelError::UnknownPayload)?;
        self.detach(payload, location);
        Ok(())
    }

    fn contains_payload(&self, payload: P) -> bool {
        self.locations.contains_key(&payload)
    }

    fn len(&self) -> usize {
        self.locations.len()
    }

    fn global_objects(&self) -> Vec<BoundsElement<P>> {
        self.global.iter().copied().collect()
    }

    fn num_dirty_elements(&self) -> usize {
        0
    }

    fn is_build_complete(&self) -> bool {
        true
    }

    fn progress_time_slicing(&mut self, _force_complete: bool) -> Result<bool, AccelError> {
        Ok(true)
    }
}
