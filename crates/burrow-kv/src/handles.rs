//! Grow-only handle tables for resources crossing the bridge.
//!
//! The boundary only carries primitive values, so open stores, cursors,
//! and batches are referenced by integer indices into per-kind tables.
//! Tables only grow; an index is issued once and is never reused for a
//! different live resource, so stale handles fail closed instead of
//! aliasing somebody else's resource.

use burrow_runtime::HostValue;
use thiserror::Error;

/// Ways a handle argument can fail to resolve.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HandleError {
    /// The argument was not an integer-shaped number
    #[error("param-not-a-number")]
    NotANumber,

    /// The index is outside the table
    #[error("idx-out-of-range")]
    OutOfRange,

    /// The slot exists but holds no live resource
    #[error("closed")]
    Closed,
}

/// Decode a boundary value into a table index.
///
/// Only finite, integer-valued, non-negative numbers are accepted;
/// negative integers report out-of-range, everything else is
/// not-a-number.
pub fn decode(value: Option<&HostValue>) -> Result<usize, HandleError> {
    let number = match value {
        Some(HostValue::Number(n)) => *n,
        _ => return Err(HandleError::NotANumber),
    };
    if !number.is_finite() || number.fract() != 0.0 {
        return Err(HandleError::NotANumber);
    }
    if number < 0.0 {
        return Err(HandleError::OutOfRange);
    }
    Ok(number as usize)
}

/// A growable table of owned resources addressed by stable indices.
#[derive(Debug)]
pub struct HandleTable<R> {
    slots: Vec<Option<R>>,
}

impl<R> Default for HandleTable<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> HandleTable<R> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Append a live resource; returns the new highest index.
    pub fn allocate(&mut self, resource: R) -> usize {
        self.slots.push(Some(resource));
        self.slots.len() - 1
    }

    /// Burn an index without a resource. Used so a failed open still
    /// consumes a slot and shares one representation with closed.
    pub fn allocate_vacant(&mut self) -> usize {
        self.slots.push(None);
        self.slots.len() - 1
    }

    pub fn get(&self, idx: usize) -> Result<&R, HandleError> {
        self.slots
            .get(idx)
            .ok_or(HandleError::OutOfRange)?
            .as_ref()
            .ok_or(HandleError::Closed)
    }

    pub fn get_mut(&mut self, idx: usize) -> Result<&mut R, HandleError> {
        self.slots
            .get_mut(idx)
            .ok_or(HandleError::OutOfRange)?
            .as_mut()
            .ok_or(HandleError::Closed)
    }

    /// Drop ownership of the resource at `idx`, leaving the slot closed.
    /// Releasing an already-closed or invalid slot is an error.
    pub fn release(&mut self, idx: usize) -> Result<R, HandleError> {
        self.slots
            .get_mut(idx)
            .ok_or(HandleError::OutOfRange)?
            .take()
            .ok_or(HandleError::Closed)
    }

    /// Release every live slot unconditionally. Indices stay burned so
    /// later allocations keep growing past them. Teardown only.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.take();
        }
    }

    /// Number of slots ever allocated, live or closed.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
