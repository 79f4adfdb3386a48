//! Per-item visibility and highlight state owned by a model.

use crate::sample::ItemId;

/// Highlight id meaning "not highlighted".
pub const NO_HIGHLIGHT: u16 = 0;

/// Dense per-item flags indexed by [`ItemId`].
///
/// Items start visible and unhighlighted. Ids beyond the tracked range read
/// as hidden.
#[derive(Clone, Debug, Default)]
pub struct ItemState {
    visible: Vec<u64>,
    highlights: Vec<u16>,
}

impl ItemState {
    pub fn new(item_count: usize) -> Self {
        let mut state = Self::default();
        state.ensure(item_count);
        state
    }

    /// Track at least `item_count` items; new items are visible.
    pub fn ensure(&mut self, item_count: usize) {
        if item_count <= self.highlights.len() {
            return;
        }
        let old = self.highlights.len();
        self.highlights.resize(item_count, NO_HIGHLIGHT);
        self.visible.resize(item_count.div_ceil(64), 0);
        for index in old..item_count {
            self.visible[index / 64] |= 1 << (index % 64);
        }
    }

    pub fn len(&self) -> usize {
        self.highlights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.highlights.is_empty()
    }

    pub fn is_visible(&self, item: ItemId) -> bool {
        let index = item.0 as usize;
        index < self.highlights.len() && self.visible[index / 64] & (1 << (index % 64)) != 0
    }

    pub fn highlight(&self, item: ItemId) -> u16 {
        self.highlights
            .get(item.0 as usize)
            .copied()
            .unwrap_or(NO_HIGHLIGHT)
    }

    /// Set visibility for `items`. Returns how many items changed.
    pub fn set_visible(&mut self, items: &[ItemId], visible: bool) -> usize {
        let mut changed = 0;
        for item in items {
            let index = item.0 as usize;
            if index >= self.highlights.len() {
                continue;
            }
            let word = &mut self.visible[index / 64];
            let bit = 1u64 << (index % 64);
            if (*word & bit != 0) != visible {
                *word ^= bit;
                changed += 1;
            }
        }
        changed
    }

    /// Assign `highlight` to `items`.
    ///
    /// With `preserve_existing`, items that already carry a highlight keep it.
    /// Returns how many items changed.
    pub fn set_highlight(&mut self, items: &[ItemId], highlight: u16, preserve_existing: bool) -> usize {
        let mut changed = 0;
        for item in items {
            let Some(slot) = self.highlights.get_mut(item.0 as usize) else {
                continue;
            };
            if preserve_existing && *slot != NO_HIGHLIGHT {
                continue;
            }
            if *slot != highlight {
                *slot = highlight;
                changed += 1;
            }
        }
        changed
    }

    /// Clear highlights on `items`, or on every item when `items` is `None`.
    pub fn reset_highlight(&mut self, items: Option<&[ItemId]>) -> usize {
        match items {
            Some(items) => self.set_highlight(items, NO_HIGHLIGHT, false),
            None => {
                let changed = self.highlights.iter().filter(|h| **h != NO_HIGHLIGHT).count();
                self.highlights.fill(NO_HIGHLIGHT);
                changed
            }
        }
    }

    /// All currently visible item ids in ascending order.
    pub fn visible_items(&self) -> Vec<ItemId> {
        (0..self.highlights.len() as u32)
            .map(ItemId)
            .filter(|item| self.is_visible(*item))
            .collect()
    }

    /// Approximate heap usage in bytes.
    pub fn byte_size(&self) -> usize {
        self.visible.len() * size_of::<u64>() + self.highlights.len() * size_of::<u16>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_items_start_visible() {
        let state = ItemState::new(70);
        assert!(state.is_visible(ItemId(0)));
        assert!(state.is_visible(ItemId(69)));
        assert!(!state.is_visible(ItemId(70)));
        assert_eq!(state.visible_items().len(), 70);
    }

    #[test]
    fn test_set_visible_counts_changes() {
        let mut state = ItemState::new(10);
        assert_eq!(state.set_visible(&[ItemId(1), ItemId(2)], false), 2);
        assert_eq!(state.set_visible(&[ItemId(1), ItemId(3)], false), 1);
        assert!(!state.is_visible(ItemId(1)));
        assert_eq!(state.visible_items().len(), 7);
    }

    #[test]
    fn test_highlight_preserve_flag() {
        let mut state = ItemState::new(4);
        state.set_highlight(&[ItemId(0)], 3, false);
        assert_eq!(state.set_highlight(&[ItemId(0), ItemId(1)], 5, true), 1);
        assert_eq!(state.highlight(ItemId(0)), 3);
        assert_eq!(state.highlight(ItemId(1)), 5);
        assert_eq!(state.set_highlight(&[ItemId(0)], 5, false), 1);
        assert_eq!(state.highlight(ItemId(0)), 5);
    }

    #[test]
    fn test_reset_highlight_all() {
        let mut state = ItemState::new(4);
        state.set_highlight(&[ItemId(0), ItemId(2)], 1, false);
        assert_eq!(state.reset_highlight(None), 2);
        assert_eq!(state.highlight(ItemId(2)), NO_HIGHLIGHT);
    }

    #[test]
    fn test_ensure_grows_visible() {
        let mut state = ItemState::new(2);
        state.set_visible(&[ItemId(1)], false);
        state.ensure(130);
        assert!(!state.is_visible(ItemId(1)));
        assert!(state.is_visible(ItemId(129)));
    }
}
