// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Generational element pool backing the dirty and global lists.
//!
//! Removing an element leaves a hole instead of moving another element into
//! its place, so no other handle has to be re-pointed. Reusing a slot bumps
//! its generation; handles to the previous occupant stop resolving.

use alloc::vec::Vec;

use crate::types::BoundsElement;

/// Generational handle into a dirty or global list.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PoolHandle(u32, u32);

impl PoolHandle {
    #[allow(
        clippy::cast_possible_truncation,
        reason = "Pool handles are intentionally 32-bit; higher bits are truncated by design."
    )]
    const fn new(idx: usize, generation: u32) -> Self {
        Self(idx as u32, generation)
    }

    const fn idx(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug)]
struct PoolSlot<P> {
    generation: u32,
    element: Option<BoundsElement<P>>,
}

#[derive(Clone, Debug)]
pub(crate) struct ElementPool<P> {
    slots: Vec<PoolSlot<P>>,
    free_list: Vec<usize>,
    len: usize,
}

impl<P> Default for ElementPool<P> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            len: 0,
        }
    }
}

impl<P: Copy> ElementPool<P> {
    pub(crate) fn insert(&mut self, element: BoundsElement<P>) -> PoolHandle {
        self.len += 1;
        if let Some(idx) = self.free_list.pop() {
            let slot = &mut self.slots[idx];
            slot.generation = slot.generation.wrapping_add(1);
            slot.element = Some(element);
            PoolHandle::new(idx, slot.generation)
        } else {
            self.slots.push(PoolSlot {
                generation: 1,
                element: Some(element),
            });
            PoolHandle::new(self.slots.len() - 1, 1)
        }
    }

    pub(crate) fn remove(&mut self, handle: PoolHandle) -> Option<BoundsElement<P>> {
        let slot = self.slots.get_mut(handle.idx())?;
        if slot.generation != handle.1 {
            return None;
        }
        let element = slot.element.take()?;
        self.free_list.push(handle.idx());
        self.len -= 1;
        Some(element)
    }

    pub(crate) fn get(&self, handle: PoolHandle) -> Option<&BoundsElement<P>> {
        let slot = self.slots.get(handle.idx())?;
        if slot.generation != handle.1 {
            return None;
        }
        slot.element.as_ref()
    }

    pub(crate) fn get_mut(&mut self, handle: PoolHandle) -> Option<&mut BoundsElement<P>> {
        let slot = self.slots.get_mut(handle.idx())?;
        if slot.generation != handle.1 {
            return None;
        }
        slot.element.as_mut()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &BoundsElement<P>> + '_ {
        self.slots.iter().filter_map(|s| s.element.as_ref())
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free_list.clear();
        self.len = 0;
    }
}
