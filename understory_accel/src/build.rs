// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Resumable, time-sliced tree construction.
//!
//! The builder owns a stack of pending jobs, each a subtree still to be
//! split. Every job reserves its node index when it is pushed, so finished
//! nodes never move and a build can stop after any element and resume on the
//! next call.
//!
//! Splitting a job picks the largest axis of its bounds and cuts the box in
//! half at the center. Each element joins whichever half grows less (by
//! squared extent) when enlarged to include it. The decision for one element
//! does not depend on the others, which is what makes the split resumable.

use alloc::vec::Vec;

use hashbrown::{HashMap, HashSet};

use crate::config::TreeConfig;
use crate::error::AccelError;
use crate::leaf::LeafStorage;
use crate::types::{Aabb3D, BoundsElement, Payload, union_all};

/// One node of the tree topology.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum TreeNode {
    /// Two children and the bounds of each.
    Interior {
        child_bounds: [Aabb3D; 2],
        children: [u32; 2],
    },
    /// A leaf, indexing into the tree's leaf storage.
    Leaf { leaf: u32 },
}

// Placeholder for a node whose job has not finished yet.
const PENDING: TreeNode = TreeNode::Leaf { leaf: u32::MAX };

#[derive(Clone, Debug)]
struct SplitState<P> {
    candidates: [Aabb3D; 2],
    base_size: [f32; 2],
    cursor: usize,
    halves: [Vec<BoundsElement<P>>; 2],
}

impl<P: Payload> SplitState<P> {
    fn new(bounds: &Aabb3D, len: usize) -> Result<Self, AccelError> {
        let axis = bounds.largest_axis();
        let center = bounds.center()[axis];
        let mut lower = *bounds;
        lower.max[axis] = center;
        let mut upper = *bounds;
        upper.min[axis] = center;
        let mut halves = [Vec::new(), Vec::new()];
        for half in &mut halves {
            half.try_reserve(len / 2 + 1)?;
        }
        Ok(Self {
            candidates: [lower, upper],
            base_size: [
                lower.extents().length_squared(),
                upper.extents().length_squared(),
            ],
            cursor: 0,
            halves,
        })
    }

    fn assign(&mut self, element: BoundsElement<P>) {
        let growth = |i: usize| {
            self.candidates[i]
                .union(&element.bounds)
                .extents()
                .length_squared()
                - self.base_size[i]
        };
        let side = usize::from(growth(1) < growth(0));
        self.halves[side].push(element);
    }
}

#[derive(Clone, Debug)]
struct BuildJob<P> {
    node: u32,
    depth: usize,
    bounds: Aabb3D,
    elements: Vec<BoundsElement<P>>,
    split: Option<SplitState<P>>,
}

/// Everything a finished build hands to the tree.
#[derive(Clone, Debug)]
pub(crate) struct BuildOutput<P, L> {
    pub(crate) nodes: Vec<TreeNode>,
    pub(crate) root_bounds: Option<Aabb3D>,
    pub(crate) leaves: Vec<L>,
    pub(crate) leaf_bounds: Vec<Aabb3D>,
    pub(crate) leaf_of: HashMap<P, u32>,
    pub(crate) global: Vec<BoundsElement<P>>,
}

/// A tree build in progress.
#[derive(Clone, Debug)]
pub(crate) struct TreeBuilder<P, L> {
    config: TreeConfig,
    payloads: HashSet<P>,
    jobs: Vec<BuildJob<P>>,
    out: BuildOutput<P, L>,
}

impl<P: Payload, L: LeafStorage<P>> TreeBuilder<P, L> {
    /// Classify the input and queue the root job.
    ///
    /// Payloads with `None` bounds, or larger than
    /// [`TreeConfig::max_payload_bounds`], go straight to the global list.
    pub(crate) fn new(
        elements: impl IntoIterator<Item = (P, Option<Aabb3D>)>,
        config: TreeConfig,
    ) -> Result<Self, AccelError> {
        let elements = elements.into_iter();
        let mut payloads = HashSet::new();
        let mut topology = Vec::new();
        topology.try_reserve(elements.size_hint().0)?;
        let mut global = Vec::new();
        for (payload, bounds) in elements {
            if !payloads.insert(payload) {
                return Err(AccelError::DuplicatePayload);
            }
            match bounds {
                Some(b) if config.fits_topology(&b) => topology.push(BoundsElement::new(payload, b)),
                _ => global.push(BoundsElement::new(
                    payload,
                    bounds.unwrap_or(Aabb3D::INFINITE),
                )),
            }
        }

        let mut builder = Self {
            config,
            payloads,
            jobs: Vec::new(),
            out: BuildOutput {
                nodes: Vec::new(),
                root_bounds: None,
                leaves: Vec::new(),
                leaf_bounds: Vec::new(),
                leaf_of: HashMap::with_capacity(topology.len()),
                global,
            },
        };
        if let Some(bounds) = union_all(&topology) {
            builder.out.root_bounds = Some(bounds);
            let node = builder.reserve_node()?;
            builder.jobs.push(BuildJob {
                node,
                depth: 0,
                bounds,
                elements: topology,
                split: None,
            });
        }
        Ok(builder)
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.jobs.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.payloads.len()
    }

    pub(crate) fn contains(&self, payload: P) -> bool {
        self.payloads.contains(&payload)
    }

    /// Elements routed to the global list so far.
    pub(crate) fn global(&self) -> &[BoundsElement<P>] {
        &self.out.global
    }

    /// Process up to one time slice of element decisions.
    ///
    /// With `force_complete` the budget is unbounded. Returns whether the
    /// build is complete.
    pub(crate) fn progress(&mut self, force_complete: bool) -> Result<bool, AccelError> {
        let mut budget = if force_complete {
            usize::MAX
        } else {
            self.config.time_slice_budget()
        };
        while budget > 0 {
            let Some(mut job) = self.jobs.pop() else {
                break;
            };
            let len = job.elements.len();
            if len <= self.config.leaf_size() || job.depth >= self.config.max_tree_depth {
                budget = budget.saturating_sub(len.max(1));
                self.emit_leaf(job)?;
                continue;
            }

            if job.split.is_none() {
                job.split = Some(SplitState::new(&job.bounds, len)?);
            }
            let Some(split) = job.split.as_mut() else {
                continue;
            };
            let end = len.min(split.cursor.saturating_add(budget));
            for element in &job.elements[split.cursor..end] {
                split.assign(*element);
            }
            budget -= end - split.cursor;
            split.cursor = end;
            if end < len {
                // Out of budget mid-split; resume this job on the next call.
                self.jobs.push(job);
                break;
            }
            self.finish_split(job)?;
        }
        if self.jobs.is_empty() {
            tracing::debug!(
                nodes = self.out.nodes.len(),
                leaves = self.out.leaves.len(),
                global = self.out.global.len(),
                "tree build complete"
            );
        } else {
            tracing::trace!(pending_jobs = self.jobs.len(), "time slice exhausted");
        }
        Ok(self.jobs.is_empty())
    }

    /// Hand over the finished topology.
    pub(crate) fn finish(self) -> BuildOutput<P, L> {
        debug_assert!(self.jobs.is_empty(), "finish called on an incomplete build");
        self.out
    }

    #[allow(
        clippy::cast_possible_truncation,
        reason = "Node indices are intentionally 32-bit."
    )]
    fn reserve_node(&mut self) -> Result<u32, AccelError> {
        self.out.nodes.try_reserve(1)?;
        self.out.nodes.push(PENDING);
        Ok((self.out.nodes.len() - 1) as u32)
    }

    fn finish_split(&mut self, mut job: BuildJob<P>) -> Result<(), AccelError> {
        let Some(split) = job.split.take() else {
            return self.emit_leaf(job);
        };
        let [lower, upper] = split.halves;
        let (Some(lower_bounds), Some(upper_bounds)) = (union_all(&lower), union_all(&upper)) else {
            // Everything landed on one side; splitting again would not terminate.
            return self.emit_leaf(job);
        };
        let children = [self.reserve_node()?, self.reserve_node()?];
        self.out.nodes[job.node as usize] = TreeNode::Interior {
            child_bounds: [lower_bounds, upper_bounds],
            children,
        };
        self.jobs.try_reserve(2)?;
        // Upper first so the lower half is built next.
        self.jobs.push(BuildJob {
            node: children[1],
            depth: job.depth + 1,
            bounds: upper_bounds,
            elements: upper,
            split: None,
        });
        self.jobs.push(BuildJob {
            node: children[0],
            depth: job.depth + 1,
            bounds: lower_bounds,
            elements: lower,
            split: None,
        });
        Ok(())
    }

    #[allow(
        clippy::cast_possible_truncation,
        reason = "Leaf indices are intentionally 32-bit."
    )]
    fn emit_leaf(&mut self, job: BuildJob<P>) -> Result<(), AccelError> {
        self.out.leaves.try_reserve(1)?;
        self.out.leaf_bounds.try_reserve(1)?;
        self.out.global.try_reserve(job.elements.len())?;
        let leaf_id = self.out.leaves.len() as u32;
        let leaf = L::build(job.elements, &self.config, &mut self.out.global)?;
        let leaf_of = &mut self.out.leaf_of;
        leaf.for_each_element(|e| {
            leaf_of.insert(e.payload, leaf_id);
        });
        self.out.leaves.push(leaf);
        self.out.leaf_bounds.push(job.bounds);
        self.out.nodes[job.node as usize] = TreeNode::Leaf { leaf: leaf_id };
        Ok(())
    }
}
