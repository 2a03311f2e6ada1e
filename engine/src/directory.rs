//! The entity directory: handle → (table, row).
//!
//! The main stage uses a paged sparse set: O(1) lookup by handle, dense
//! iteration for whole-world scans, and stable slots. Non-main stages keep
//! their shadow directories in plain hash maps and never cache across calls.
//!
//! A record's `row` field is encoded: positive means a regular entity at row
//! `row - 1`, negative means a *watched* entity at row `-row - 1`, and zero
//! means an empty entity (no table). Watched entities trigger query rematch
//! when they transition.

use crate::entity::Entity;
use crate::storage::Row;
use crate::storage::table;

/// Rows per directory page.
const PAGE_SIZE: usize = 1024;

/// Where an entity lives, if anywhere.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    /// The table holding the entity's row. `None` for empty entities.
    pub table: Option<table::Id>,

    /// Encoded row; see the module docs.
    pub row: i32,
}

impl Record {
    /// A record for a regular entity at `row` of `table`.
    pub fn located(table: table::Id, row: Row, watched: bool) -> Self {
        let encoded = row.index() as i32 + 1;
        Self {
            table: Some(table),
            row: if watched { -encoded } else { encoded },
        }
    }

    /// The real row index, when the entity occupies a table.
    #[inline]
    pub fn row_index(&self) -> Option<Row> {
        self.table?;
        match self.row {
            0 => None,
            r if r > 0 => Some(Row::new(r as usize - 1)),
            r => Some(Row::new((-r) as usize - 1)),
        }
    }

    /// Whether the entity is watched by a query reference.
    #[inline]
    pub fn is_watched(&self) -> bool {
        self.row < 0
    }

    /// Mark the entity watched, preserving its position.
    #[inline]
    pub fn set_watched(&mut self) {
        if self.row > 0 {
            self.row = -self.row;
        } else if self.row == 0 {
            self.row = -1;
        }
    }

    /// Re-point the record at a new position, preserving the watched flag.
    #[inline]
    pub fn relocate(&mut self, table: table::Id, row: Row) {
        let watched = self.is_watched();
        *self = Record::located(table, row, watched);
    }

    /// Clear the position, preserving the watched flag.
    #[inline]
    pub fn clear_location(&mut self) {
        self.table = None;
        self.row = if self.is_watched() { -1 } else { 0 };
    }
}

/// Paged sparse map from entity handles to records.
#[derive(Default)]
pub struct Directory {
    /// Pages allocated on first touch; `None` pages cost one pointer.
    pages: Vec<Option<Box<[Option<Record>]>>>,

    /// Number of live records.
    len: usize,
}

impl Directory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn split(entity: Entity) -> (usize, usize) {
        let index = entity.target().raw() as usize;
        (index / PAGE_SIZE, index % PAGE_SIZE)
    }

    /// Number of live records.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the directory holds no records.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Look up the record for a handle.
    pub fn get(&self, entity: Entity) -> Option<Record> {
        let (page, slot) = Self::split(entity);
        self.pages.get(page)?.as_ref()?.get(slot).copied().flatten()
    }

    /// Whether a handle has a record.
    #[inline]
    pub fn contains(&self, entity: Entity) -> bool {
        self.get(entity).is_some()
    }

    /// Get the record for a handle, inserting a zeroed one if absent.
    /// Returns the record and whether it was newly created.
    pub fn ensure(&mut self, entity: Entity) -> (&mut Record, bool) {
        let (page, slot) = Self::split(entity);
        if self.pages.len() <= page {
            self.pages.resize_with(page + 1, || None);
        }
        let page = self.pages[page]
            .get_or_insert_with(|| vec![None; PAGE_SIZE].into_boxed_slice());
        let is_new = page[slot].is_none();
        if is_new {
            page[slot] = Some(Record::default());
            self.len += 1;
        }
        (page[slot].as_mut().expect("slot filled above"), is_new)
    }

    /// Overwrite the record for a handle.
    pub fn set(&mut self, entity: Entity, record: Record) {
        let (slot, _) = self.ensure(entity);
        *slot = record;
    }

    /// Remove the record for a handle, returning the old value.
    pub fn remove(&mut self, entity: Entity) -> Option<Record> {
        let (page, slot) = Self::split(entity);
        let removed = self.pages.get_mut(page)?.as_mut()?[slot].take();
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    /// Iterate every live record in handle order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, Record)> + '_ {
        self.pages.iter().enumerate().flat_map(|(page_index, page)| {
            page.iter().flat_map(move |page| {
                page.iter().enumerate().filter_map(move |(slot, record)| {
                    record.map(|r| {
                        (Entity::new((page_index * PAGE_SIZE + slot) as u64), r)
                    })
                })
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_row_encoding() {
        // Given
        let record = Record::located(table::Id::new(3), Row::new(5), false);

        // Then
        assert_eq!(record.row, 6);
        assert_eq!(record.row_index(), Some(Row::new(5)));
        assert!(!record.is_watched());
    }

    #[test]
    fn watched_record_negates_row() {
        // Given
        let mut record = Record::located(table::Id::new(3), Row::new(5), false);

        // When
        record.set_watched();

        // Then - magnitude-minus-one is still the real row
        assert_eq!(record.row, -6);
        assert_eq!(record.row_index(), Some(Row::new(5)));
        assert!(record.is_watched());

        // And relocation preserves the flag
        record.relocate(table::Id::new(4), Row::new(0));
        assert!(record.is_watched());
        assert_eq!(record.row_index(), Some(Row::new(0)));
    }

    #[test]
    fn watched_empty_entity() {
        // Given - an empty entity
        let mut record = Record::default();
        assert_eq!(record.row_index(), None);

        // When
        record.set_watched();

        // Then - watched with no position
        assert!(record.is_watched());
        assert_eq!(record.row_index(), None);
    }

    #[test]
    fn ensure_and_lookup() {
        // Given
        let mut directory = Directory::new();
        let entity = Entity::new(4096 + 17);

        // When
        let (record, is_new) = directory.ensure(entity);
        assert!(is_new);
        record.relocate(table::Id::new(2), Row::new(9));

        // Then
        assert!(directory.contains(entity));
        assert_eq!(directory.len(), 1);
        let found = directory.get(entity).unwrap();
        assert_eq!(found.table, Some(table::Id::new(2)));
        assert_eq!(found.row_index(), Some(Row::new(9)));

        // And - ensure again is not new
        let (_, is_new) = directory.ensure(entity);
        assert!(!is_new);
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn remove_clears_the_slot() {
        // Given
        let mut directory = Directory::new();
        let entity = Entity::new(2000);
        directory.set(entity, Record::located(table::Id::new(1), Row::new(0), false));

        // When
        let removed = directory.remove(entity);

        // Then
        assert!(removed.is_some());
        assert!(!directory.contains(entity));
        assert_eq!(directory.len(), 0);
        assert!(directory.remove(entity).is_none());
    }

    #[test]
    fn iterates_across_pages() {
        // Given - handles far enough apart to land on separate pages
        let mut directory = Directory::new();
        let sparse = [Entity::new(10), Entity::new(5_000), Entity::new(50_000)];
        for (i, entity) in sparse.iter().enumerate() {
            directory.set(
                *entity,
                Record::located(table::Id::new(i as u32), Row::new(0), false),
            );
        }

        // When
        let seen: Vec<Entity> = directory.iter().map(|(e, _)| e).collect();

        // Then - handle order, all pages visited
        assert_eq!(seen, sparse);
    }
}
