//! The per-session todo list and its state transitions.
//!
//! Items are addressed by position. A negative index is not an error: it
//! selects the bulk variant of an operation (toggle all, append, delete all
//! completed). Out-of-range non-negative indices leave the list untouched.

use serde::{Deserialize, Serialize};

/// Sentinel for "no item is being edited".
pub const NOT_EDITING: i64 = -1;

/// Seed list for a session on first contact and after a reset.
pub const DEFAULT_ITEMS: [(&str, bool); 5] = [
    ("Learn any backend language", true),
    ("Learn Datastar", false),
    ("Create Hypermedia", false),
    ("???", false),
    ("Profit", false),
];

/// A single todo entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Display text. Never empty once persisted.
    pub text: String,
    /// Whether the entry is done.
    pub completed: bool,
}

impl Item {
    /// Build an item.
    pub fn new(text: impl Into<String>, completed: bool) -> Self {
        Self {
            text: text.into(),
            completed,
        }
    }
}

/// Which subset of the list the client is viewing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    /// Every item.
    #[default]
    All,
    /// Only incomplete items.
    Active,
    /// Only completed items.
    Completed,
}

impl ViewMode {
    /// Every mode, in wire order.
    pub const ALL: [ViewMode; 3] = [ViewMode::All, ViewMode::Active, ViewMode::Completed];

    /// Integer code used on the wire and in storage.
    pub fn code(self) -> i64 {
        match self {
            Self::All => 0,
            Self::Active => 1,
            Self::Completed => 2,
        }
    }

    /// Inverse of [`ViewMode::code`].
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::All),
            1 => Some(Self::Active),
            2 => Some(Self::Completed),
            _ => None,
        }
    }

    /// Whether an item is visible under this mode.
    pub fn shows(self, item: &Item) -> bool {
        match self {
            Self::All => true,
            Self::Active => !item.completed,
            Self::Completed => item.completed,
        }
    }

    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

/// Complete persisted state of one session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoState {
    /// Ordered items.
    pub items: Vec<Item>,
    /// Current view filter.
    pub mode: ViewMode,
    /// Index of the item being edited, or [`NOT_EDITING`].
    pub editing_index: i64,
}

impl Default for TodoState {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            mode: ViewMode::All,
            editing_index: NOT_EDITING,
        }
    }
}

impl TodoState {
    /// The state a brand-new session starts with.
    pub fn seeded() -> Self {
        Self {
            items: DEFAULT_ITEMS
                .iter()
                .map(|(text, completed)| Item::new(*text, *completed))
                .collect(),
            mode: ViewMode::All,
            editing_index: NOT_EDITING,
        }
    }

    fn position(&self, index: i64) -> Option<usize> {
        usize::try_from(index).ok().filter(|i| *i < self.items.len())
    }

    /// Whether `index` addresses an existing item.
    pub fn is_valid_index(&self, index: i64) -> bool {
        self.position(index).is_some()
    }

    /// Invert one item, or toggle every item when `index` is negative.
    ///
    /// Toggle-all completes everything if anything is still open, and
    /// reopens everything otherwise.
    pub fn toggle(&mut self, index: i64) {
        if index < 0 {
            let target = self.items.iter().any(|item| !item.completed);
            for item in &mut self.items {
                item.completed = target;
            }
        } else if let Some(pos) = self.position(index) {
            let item = &mut self.items[pos];
            item.completed = !item.completed;
        }
    }

    /// Replace an item's text, or append a new open item when `index` is
    /// negative. Always ends the current edit.
    pub fn edit(&mut self, index: i64, text: &str) {
        if index < 0 {
            self.items.push(Item::new(text, false));
        } else if let Some(pos) = self.position(index) {
            self.items[pos].text = text.to_owned();
        }
        self.editing_index = NOT_EDITING;
    }

    /// Remove one item, or every completed item when `index` is negative.
    pub fn delete(&mut self, index: i64) {
        if index < 0 {
            self.items.retain(|item| !item.completed);
        } else if let Some(pos) = self.position(index) {
            let _ = self.items.remove(pos);
        }
        if !self.is_valid_index(self.editing_index) {
            self.editing_index = NOT_EDITING;
        }
    }

    /// Change the view filter.
    pub fn set_mode(&mut self, mode: ViewMode) {
        self.mode = mode;
    }

    /// Begin editing `index`; an out-of-range index clears the edit.
    pub fn start_editing(&mut self, index: i64) {
        self.editing_index = if self.is_valid_index(index) {
            index
        } else {
            NOT_EDITING
        };
    }

    /// Stop editing.
    pub fn cancel_editing(&mut self) {
        self.editing_index = NOT_EDITING;
    }

    /// Restore the seed list, mode, and editing index.
    pub fn reset(&mut self) {
        *self = Self::seeded();
    }

    /// Items visible under the current mode, with their positions.
    pub fn visible(&self) -> impl Iterator<Item = (usize, &Item)> {
        let mode = self.mode;
        self.items
            .iter()
            .enumerate()
            .filter(move |(_, item)| mode.shows(item))
    }

    /// Number of open items.
    pub fn remaining(&self) -> usize {
        self.items.iter().filter(|item| !item.completed).count()
    }

    /// Number of completed items.
    pub fn completed_count(&self) -> usize {
        self.items.len() - self.remaining()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn state(items: &[(&str, bool)]) -> TodoState {
        TodoState {
            items: items.iter().map(|(t, c)| Item::new(*t, *c)).collect(),
            ..TodoState::default()
        }
    }

    fn flags(state: &TodoState) -> Vec<bool> {
        state.items.iter().map(|i| i.completed).collect()
    }

    #[test]
    fn seeded_has_five_default_items() {
        let s = TodoState::seeded();
        assert_eq!(s.items.len(), 5);
        assert_eq!(s.items[0], Item::new("Learn any backend language", true));
        assert_eq!(s.items[4], Item::new("Profit", false));
        assert_eq!(s.mode, ViewMode::All);
        assert_eq!(s.editing_index, NOT_EDITING);
    }

    #[test]
    fn toggle_single_inverts_only_that_item() {
        let mut s = state(&[("a", false), ("b", true)]);
        s.toggle(0);
        assert_eq!(flags(&s), vec![true, true]);
        s.toggle(1);
        assert_eq!(flags(&s), vec![true, false]);
    }

    #[test]
    fn toggle_all_completes_everything_when_any_open() {
        let mut s = state(&[("a", true), ("b", false), ("c", true)]);
        s.toggle(-1);
        assert_eq!(flags(&s), vec![true, true, true]);
    }

    #[test]
    fn toggle_all_reopens_everything_when_all_done() {
        let mut s = state(&[("a", true), ("b", true)]);
        s.toggle(-1);
        assert_eq!(flags(&s), vec![false, false]);
    }

    #[test]
    fn toggle_all_on_empty_list_is_noop() {
        let mut s = TodoState::default();
        s.toggle(-1);
        assert!(s.items.is_empty());
    }

    #[test]
    fn toggle_out_of_range_is_noop() {
        let mut s = state(&[("a", false)]);
        s.toggle(7);
        assert_eq!(flags(&s), vec![false]);
    }

    #[test]
    fn edit_replaces_text_and_ends_edit() {
        let mut s = state(&[("a", true)]);
        s.editing_index = 0;
        s.edit(0, "renamed");
        assert_eq!(s.items[0], Item::new("renamed", true));
        assert_eq!(s.editing_index, NOT_EDITING);
    }

    #[test]
    fn edit_negative_appends_open_item() {
        let mut s = state(&[("a", true)]);
        s.edit(-1, "new");
        assert_eq!(s.items.len(), 2);
        assert_eq!(s.items[1], Item::new("new", false));
    }

    #[test]
    fn delete_single_removes_item() {
        let mut s = state(&[("a", false), ("b", false), ("c", false)]);
        s.delete(1);
        let texts: Vec<_> = s.items.iter().map(|i| i.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "c"]);
    }

    #[test]
    fn delete_negative_removes_all_completed() {
        let mut s = state(&[("a", true), ("b", false), ("c", true), ("d", false)]);
        s.delete(-1);
        let texts: Vec<_> = s.items.iter().map(|i| i.text.as_str()).collect();
        assert_eq!(texts, vec!["b", "d"]);
        assert!(s.items.iter().all(|i| !i.completed));
    }

    #[test]
    fn delete_clears_dangling_edit() {
        let mut s = state(&[("a", false), ("b", false)]);
        s.editing_index = 1;
        s.delete(0);
        assert_eq!(s.editing_index, NOT_EDITING);
    }

    #[test]
    fn delete_keeps_edit_that_is_still_in_range() {
        let mut s = state(&[("a", false), ("b", false), ("c", false)]);
        s.editing_index = 0;
        s.delete(2);
        assert_eq!(s.editing_index, 0);
    }

    #[test]
    fn start_editing_out_of_range_clears() {
        let mut s = state(&[("a", false)]);
        s.start_editing(0);
        assert_eq!(s.editing_index, 0);
        s.start_editing(3);
        assert_eq!(s.editing_index, NOT_EDITING);
    }

    #[test]
    fn cancel_editing_clears() {
        let mut s = state(&[("a", false)]);
        s.start_editing(0);
        s.cancel_editing();
        assert_eq!(s.editing_index, NOT_EDITING);
    }

    #[test]
    fn reset_restores_seed() {
        let mut s = state(&[("x", true)]);
        s.mode = ViewMode::Completed;
        s.editing_index = 0;
        s.reset();
        assert_eq!(s, TodoState::seeded());
    }

    #[test]
    fn view_mode_codes_round_trip() {
        for mode in ViewMode::ALL {
            assert_eq!(ViewMode::from_code(mode.code()), Some(mode));
        }
        assert_eq!(ViewMode::from_code(3), None);
        assert_eq!(ViewMode::from_code(-1), None);
    }

    #[test]
    fn visible_respects_mode() {
        let mut s = state(&[("a", true), ("b", false), ("c", true)]);
        s.set_mode(ViewMode::Active);
        let positions: Vec<_> = s.visible().map(|(i, _)| i).collect();
        assert_eq!(positions, vec![1]);
        s.set_mode(ViewMode::Completed);
        let positions: Vec<_> = s.visible().map(|(i, _)| i).collect();
        assert_eq!(positions, vec![0, 2]);
    }

    #[test]
    fn counts() {
        let s = TodoState::seeded();
        assert_eq!(s.remaining(), 4);
        assert_eq!(s.completed_count(), 1);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn arb_state() -> impl Strategy<Value = TodoState> {
            proptest::collection::vec(("[a-z]{1,8}", any::<bool>()), 0..12).prop_map(|items| {
                TodoState {
                    items: items.into_iter().map(|(t, c)| Item::new(t, c)).collect(),
                    ..TodoState::default()
                }
            })
        }

        proptest! {
            #[test]
            fn toggle_all_makes_flags_uniform(mut s in arb_state()) {
                let any_open = s.items.iter().any(|i| !i.completed);
                let len = s.items.len();
                s.toggle(-1);
                prop_assert_eq!(s.items.len(), len);
                prop_assert!(s.items.iter().all(|i| i.completed == any_open));
            }

            #[test]
            fn delete_completed_keeps_open_items_in_order(mut s in arb_state()) {
                let expected: Vec<Item> =
                    s.items.iter().filter(|i| !i.completed).cloned().collect();
                s.delete(-1);
                prop_assert_eq!(s.items, expected);
            }
        }
    }
}
