//! Page/location store
//!
//! Maps grid locations to control ids and back. Every control id appears at
//! most once across all pages.

use crate::controls::model::ControlId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

/// Address of a grid slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlLocation {
    pub page_number: u32,
    pub row: i32,
    pub column: i32,
}

impl ControlLocation {
    pub fn new(page_number: u32, row: i32, column: i32) -> Self {
        Self {
            page_number,
            row,
            column,
        }
    }
}

impl fmt::Display for ControlLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.page_number, self.row, self.column)
    }
}

/// One page of the grid
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PageModel {
    pub name: String,
    /// `"row/column"` → control id
    #[serde(default)]
    pub controls: BTreeMap<String, ControlId>,
}

fn slot_key(row: i32, column: i32) -> String {
    format!("{}/{}", row, column)
}

fn parse_slot_key(key: &str) -> Option<(i32, i32)> {
    let (row, column) = key.split_once('/')?;
    Some((row.parse().ok()?, column.parse().ok()?))
}

/// Owned registry of pages and their control placement
#[derive(Debug, Clone)]
pub struct PageStore {
    rows: i32,
    columns: i32,
    pages: BTreeMap<u32, PageModel>,
    locations: HashMap<ControlId, ControlLocation>,
}

impl PageStore {
    /// Create `page_count` empty pages for a `rows` x `columns` grid
    pub fn new(page_count: u32, rows: i32, columns: i32) -> Self {
        let pages = (1..=page_count.max(1))
            .map(|n| {
                (
                    n,
                    PageModel {
                        name: format!("PAGE {}", n),
                        controls: BTreeMap::new(),
                    },
                )
            })
            .collect();
        Self {
            rows,
            columns,
            pages,
            locations: HashMap::new(),
        }
    }

    /// Restore persisted pages. Slots outside the grid are dropped.
    pub fn load(&mut self, stored: BTreeMap<u32, PageModel>) {
        for (number, page) in stored {
            if !self.pages.contains_key(&number) {
                debug!("Skipping stored page {} beyond configured page count", number);
                continue;
            }
            let target = self.pages.entry(number).or_default();
            target.name = page.name;
            for (key, control_id) in page.controls {
                if let Some((row, column)) = parse_slot_key(&key) {
                    let location = ControlLocation::new(number, row, column);
                    if self.is_valid_location(&location) {
                        self.set_control_id_at(location, Some(control_id));
                    }
                }
            }
        }
    }

    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    pub fn grid_size(&self) -> (i32, i32) {
        (self.rows, self.columns)
    }

    pub fn is_valid_location(&self, location: &ControlLocation) -> bool {
        self.pages.contains_key(&location.page_number)
            && (0..self.rows).contains(&location.row)
            && (0..self.columns).contains(&location.column)
    }

    pub fn page(&self, number: u32) -> Option<&PageModel> {
        self.pages.get(&number)
    }

    pub fn pages(&self) -> &BTreeMap<u32, PageModel> {
        &self.pages
    }

    pub fn get_location_of_control_id(&self, control_id: &str) -> Option<ControlLocation> {
        self.locations.get(control_id).copied()
    }

    pub fn get_control_id_at(&self, location: &ControlLocation) -> Option<&ControlId> {
        self.pages
            .get(&location.page_number)?
            .controls
            .get(&slot_key(location.row, location.column))
    }

    /// Place (or clear) a control at a location
    ///
    /// Returns the control id previously at that slot. A control moved here is
    /// removed from its old slot.
    pub fn set_control_id_at(
        &mut self,
        location: ControlLocation,
        control_id: Option<ControlId>,
    ) -> Option<ControlId> {
        let Some(page) = self.pages.get_mut(&location.page_number) else {
            return None;
        };
        let key = slot_key(location.row, location.column);

        let previous = match &control_id {
            Some(id) => page.controls.insert(key, id.clone()),
            None => page.controls.remove(&key),
        };
        if let Some(prev) = &previous {
            self.locations.remove(prev);
        }

        if let Some(id) = control_id {
            if let Some(old) = self.locations.insert(id.clone(), location) {
                if old != location {
                    if let Some(old_page) = self.pages.get_mut(&old.page_number) {
                        old_page.controls.remove(&slot_key(old.row, old.column));
                    }
                }
            }
        }

        previous
    }

    pub fn set_page_name(&mut self, number: u32, name: impl Into<String>) -> bool {
        match self.pages.get_mut(&number) {
            Some(page) => {
                page.name = name.into();
                true
            }
            None => false,
        }
    }

    /// All placed control locations of one page
    pub fn locations_on_page(&self, number: u32) -> Vec<(ControlLocation, ControlId)> {
        let Some(page) = self.pages.get(&number) else {
            return Vec::new();
        };
        page.controls
            .iter()
            .filter_map(|(key, id)| {
                let (row, column) = parse_slot_key(key)?;
                Some((ControlLocation::new(number, row, column), id.clone()))
            })
            .collect()
    }

    /// Page number `delta` pages away, wrapping within the page count
    pub fn offset_page(&self, from: u32, delta: i64) -> u32 {
        let count = self.page_count() as i64;
        let index = (from as i64 - 1 + delta).rem_euclid(count);
        (index + 1) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_lookup_control() {
        let mut pages = PageStore::new(2, 4, 8);
        let loc = ControlLocation::new(1, 0, 3);
        assert!(pages.set_control_id_at(loc, Some("bank:a".into())).is_none());

        assert_eq!(pages.get_control_id_at(&loc), Some(&"bank:a".to_string()));
        assert_eq!(pages.get_location_of_control_id("bank:a"), Some(loc));
    }

    #[test]
    fn test_moving_control_clears_old_slot() {
        let mut pages = PageStore::new(2, 4, 8);
        let first = ControlLocation::new(1, 0, 0);
        let second = ControlLocation::new(2, 1, 1);
        pages.set_control_id_at(first, Some("bank:a".into()));
        pages.set_control_id_at(second, Some("bank:a".into()));

        assert!(pages.get_control_id_at(&first).is_none());
        assert_eq!(pages.get_location_of_control_id("bank:a"), Some(second));
    }

    #[test]
    fn test_clearing_slot_forgets_location() {
        let mut pages = PageStore::new(1, 4, 8);
        let loc = ControlLocation::new(1, 2, 2);
        pages.set_control_id_at(loc, Some("bank:a".into()));
        let prev = pages.set_control_id_at(loc, None);

        assert_eq!(prev.as_deref(), Some("bank:a"));
        assert!(pages.get_location_of_control_id("bank:a").is_none());
    }

    #[test]
    fn test_offset_page_wraps() {
        let pages = PageStore::new(3, 4, 8);
        assert_eq!(pages.offset_page(3, 1), 1);
        assert_eq!(pages.offset_page(1, -1), 3);
        assert_eq!(pages.offset_page(2, 0), 2);
    }

    #[test]
    fn test_validity() {
        let pages = PageStore::new(1, 4, 8);
        assert!(pages.is_valid_location(&ControlLocation::new(1, 3, 7)));
        assert!(!pages.is_valid_location(&ControlLocation::new(1, 4, 0)));
        assert!(!pages.is_valid_location(&ControlLocation::new(2, 0, 0)));
    }
}
