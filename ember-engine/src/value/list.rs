//! # List Values
//!
//! Purpose: Double-ended lists with a compact listpack encoding for small
//! payloads and a quicklist encoding for everything else. The upgrade fires
//! at the end of a write once the list holds more than 128 elements or any
//! element longer than 64 bytes, and never reverts.

use std::collections::VecDeque;

use ember_common::{EmberError, EmberResult};

/// Element count above which a listpack converts to a quicklist.
pub const LIST_MAX_LISTPACK_ENTRIES: usize = 128;
/// Element size above which a listpack converts to a quicklist.
pub const LIST_MAX_LISTPACK_VALUE: usize = 64;

#[derive(Debug, Clone)]
enum ListRepr {
    /// Contiguous small list; cheap to scan, cheap to clone.
    Listpack(Vec<Vec<u8>>),
    /// General deque for long lists and large elements.
    Quick(VecDeque<Vec<u8>>),
}

/// A list value with encoding transitions.
#[derive(Debug, Clone)]
pub struct ListValue {
    repr: ListRepr,
}

impl Default for ListValue {
    fn default() -> Self {
        ListValue::new()
    }
}

impl ListValue {
    /// Creates an empty listpack-encoded list.
    pub fn new() -> ListValue {
        ListValue {
            repr: ListRepr::Listpack(Vec::new()),
        }
    }

    /// Pushes an element to the head and returns the new length.
    pub fn push_head(&mut self, element: Vec<u8>) -> usize {
        match &mut self.repr {
            ListRepr::Listpack(items) => items.insert(0, element),
            ListRepr::Quick(items) => items.push_front(element),
        }
        self.maybe_upgrade();
        self.len()
    }

    /// Pushes an element to the tail and returns the new length.
    pub fn push_tail(&mut self, element: Vec<u8>) -> usize {
        match &mut self.repr {
            ListRepr::Listpack(items) => items.push(element),
            ListRepr::Quick(items) => items.push_back(element),
        }
        self.maybe_upgrade();
        self.len()
    }

    /// Pops the head element.
    pub fn pop_head(&mut self) -> Option<Vec<u8>> {
        match &mut self.repr {
            ListRepr::Listpack(items) => {
                if items.is_empty() {
                    None
                } else {
                    Some(items.remove(0))
                }
            }
            ListRepr::Quick(items) => items.pop_front(),
        }
    }

    /// Pops the tail element.
    pub fn pop_tail(&mut self) -> Option<Vec<u8>> {
        match &mut self.repr {
            ListRepr::Listpack(items) => items.pop(),
            ListRepr::Quick(items) => items.pop_back(),
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        match &self.repr {
            ListRepr::Listpack(items) => items.len(),
            ListRepr::Quick(items) => items.len(),
        }
    }

    /// Returns true when the list holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the element at `index` (negative counts from the tail).
    /// Out-of-range reads return nothing, not an error.
    pub fn get_at(&self, index: i64) -> Option<&[u8]> {
        let idx = self.normalize(index)?;
        match &self.repr {
            ListRepr::Listpack(items) => items.get(idx).map(|e| e.as_slice()),
            ListRepr::Quick(items) => items.get(idx).map(|e| e.as_slice()),
        }
    }

    /// Replaces the element at `index`; out-of-range is an error (LSET).
    pub fn set_at(&mut self, index: i64, element: Vec<u8>) -> EmberResult<()> {
        let idx = self.normalize(index).ok_or(EmberError::IndexOutOfRange)?;
        match &mut self.repr {
            ListRepr::Listpack(items) => items[idx] = element,
            ListRepr::Quick(items) => items[idx] = element,
        }
        self.maybe_upgrade();
        Ok(())
    }

    /// Returns the inclusive range `[left, right]` after normalization;
    /// empty when the normalized range is inverted.
    pub fn range(&self, left: i64, right: i64) -> Vec<Vec<u8>> {
        let len = self.len() as i64;
        if len == 0 {
            return Vec::new();
        }
        let left = clamp_index(left, len).max(0);
        let right = clamp_index(right, len).min(len - 1);
        if left > right {
            return Vec::new();
        }
        (left..=right)
            .filter_map(|i| self.get_at(i).map(|e| e.to_vec()))
            .collect()
    }

    /// Keeps only the inclusive range `[left, right]`, dropping the rest.
    pub fn trim(&mut self, left: i64, right: i64) {
        let kept = self.range(left, right);
        match &mut self.repr {
            ListRepr::Listpack(items) => *items = kept,
            ListRepr::Quick(items) => *items = kept.into(),
        }
    }

    /// OBJECT ENCODING name for the current representation.
    pub fn encoding_name(&self) -> &'static str {
        match &self.repr {
            ListRepr::Listpack(_) => "listpack",
            ListRepr::Quick(_) => "quicklist",
        }
    }

    fn normalize(&self, index: i64) -> Option<usize> {
        let len = self.len() as i64;
        let idx = if index < 0 { len + index } else { index };
        if idx < 0 || idx >= len {
            None
        } else {
            Some(idx as usize)
        }
    }

    /// Checked at the end of every write; the transition is one-way.
    fn maybe_upgrade(&mut self) {
        let ListRepr::Listpack(items) = &mut self.repr else {
            return;
        };
        let oversized = items.len() > LIST_MAX_LISTPACK_ENTRIES
            || items.iter().any(|e| e.len() > LIST_MAX_LISTPACK_VALUE);
        if oversized {
            let drained: VecDeque<Vec<u8>> = std::mem::take(items).into();
            self.repr = ListRepr::Quick(drained);
        }
    }
}

/// Clamps a possibly-negative index into `[-1, len]` space without dropping
/// the inverted-range signal.
fn clamp_index(idx: i64, len: i64) -> i64 {
    if idx < 0 { len + idx } else { idx }
}
