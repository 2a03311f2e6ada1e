//! The column store: parallel arrays for one table (and one stage).
//!
//! A [`ColumnStore`] holds the entity column plus one [`Column`] per element
//! of the owning table's type, all kept at the same length. The main stage's
//! store lives on the table; shadow stores live on their stage and merge
//! back through [`ColumnStore::merge_from`].

use crate::component::{Registry, Spec};
use crate::entity::Entity;
use crate::storage::column::Column;
use crate::storage::row::Row;

/// Parallel column arrays for the rows of one table.
pub struct ColumnStore {
    /// Entity handles in insertion order, one per row.
    entities: Vec<Entity>,

    /// One column per element of the table's type, in spec order.
    columns: Vec<Column>,
}

impl ColumnStore {
    /// Create an empty store with one column per element of `spec`.
    pub fn new(spec: &Spec, registry: &Registry) -> Self {
        Self {
            entities: Vec::new(),
            columns: spec
                .ids()
                .iter()
                .map(|id| Column::new(registry.cell_layout(*id)))
                .collect(),
        }
    }

    /// Number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether the store holds no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// The entity handles, one per row.
    #[inline]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// The entity at a row.
    #[inline]
    pub fn entity(&self, row: Row) -> Entity {
        self.entities[row.index()]
    }

    /// The column at a spec position.
    #[inline]
    pub fn column(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    /// The mutable column at a spec position.
    #[inline]
    pub fn column_mut(&mut self, index: usize) -> &mut Column {
        &mut self.columns[index]
    }

    /// Append one row for `entity`, zero-filling every component cell.
    ///
    /// Returns the new row and whether any column reallocated its base
    /// pointer.
    pub fn insert(&mut self, entity: Entity) -> (Row, bool) {
        let row = Row::new(self.entities.len());
        self.entities.push(entity);
        let mut resized = false;
        for column in self.columns.iter_mut() {
            resized |= column.push_zeroed();
        }
        self.assert_invariants();
        (row, resized)
    }

    /// Remove a row by swapping the last row into it.
    ///
    /// Returns the entity that was moved into `row`, or `None` when the
    /// removed row was the last one.
    pub fn delete(&mut self, row: Row) -> Option<Entity> {
        let index = row.index();
        debug_assert!(index < self.entities.len(), "row out of bounds");
        let last = self.entities.len() - 1;

        self.entities.swap_remove(index);
        for column in self.columns.iter_mut() {
            column.swap_remove(row);
        }
        self.assert_invariants();

        if index == last {
            None
        } else {
            Some(self.entities[index])
        }
    }

    /// Append `count` rows with consecutive handles starting at `first`.
    /// Component cells are zero-filled; callers overwrite them in bulk.
    ///
    /// Returns the first new row and whether any column reallocated.
    pub fn grow(&mut self, count: usize, first: Entity) -> (Row, bool) {
        let start = Row::new(self.entities.len());
        self.entities
            .extend((0..count as u64).map(|i| Entity::new(first.raw() + i)));
        let mut resized = false;
        for column in self.columns.iter_mut() {
            resized |= column.extend_zeroed(count);
        }
        self.assert_invariants();
        (start, resized)
    }

    /// Swap two rows across every column.
    pub fn swap(&mut self, r1: Row, r2: Row) {
        if r1 == r2 {
            return;
        }
        self.entities.swap(r1.index(), r2.index());
        for column in self.columns.iter_mut() {
            column.swap(r1, r2);
        }
    }

    /// Reserve capacity for `total` rows without changing the length.
    ///
    /// Returns whether any column reallocated.
    pub fn set_size(&mut self, total: usize) -> bool {
        let additional = total.saturating_sub(self.entities.len());
        self.entities.reserve(additional);
        let mut resized = false;
        for column in self.columns.iter_mut() {
            resized |= column.reserve_total(total);
        }
        resized
    }

    /// Rotate the `count` rows starting at `row` one position to the left,
    /// placing the displaced row at `row + count - 1`.
    pub fn move_back_and_swap(&mut self, row: Row, count: usize) {
        if count <= 1 {
            return;
        }
        self.entities[row.index()..row.index() + count].rotate_left(1);
        for column in self.columns.iter_mut() {
            column.rotate_left(row, count);
        }
    }

    /// Copy the cells of one row from another store, for every component
    /// present in both specs. Components present in only one side are
    /// skipped.
    pub fn copy_row_from(
        &mut self,
        dst_row: Row,
        dst_spec: &Spec,
        src: &ColumnStore,
        src_row: Row,
        src_spec: &Spec,
    ) {
        for (i, id) in dst_spec.ids().iter().enumerate() {
            if let Some(j) = src_spec.position(*id) {
                self.columns[i].copy_cell_from(dst_row, &src.columns[j], src_row);
            }
        }
    }

    /// Read every cell of a row as owned byte buffers, in spec order.
    pub fn read_row(&self, row: Row) -> Vec<Vec<u8>> {
        self.columns
            .iter()
            .map(|column| column.read_bytes(row).to_vec())
            .collect()
    }

    /// Write previously extracted cells into a row, for every component
    /// present in both specs.
    pub fn write_row(
        &mut self,
        dst_row: Row,
        dst_spec: &Spec,
        cells: &[Vec<u8>],
        src_spec: &Spec,
    ) {
        debug_assert_eq!(cells.len(), src_spec.len(), "cell count mismatch");
        for (i, id) in dst_spec.ids().iter().enumerate() {
            if let Some(j) = src_spec.position(*id) {
                self.columns[i].write_bytes(dst_row, &cells[j]);
            }
        }
    }

    /// Append every row of `src` onto this store.
    ///
    /// Components common to both specs are moved by pointer adoption when
    /// this store is empty, otherwise appended by one copy per column.
    /// Destination components absent from `src` are zero-filled; source
    /// components absent from this store are discarded. `src` is left empty.
    ///
    /// Returns the row at which the appended rows start.
    pub fn merge_from(&mut self, src: &mut ColumnStore, dst_spec: &Spec, src_spec: &Spec) -> Row {
        let start = Row::new(self.entities.len());
        let count = src.entities.len();
        self.entities.append(&mut src.entities);
        for (i, id) in dst_spec.ids().iter().enumerate() {
            match src_spec.position(*id) {
                Some(j) => self.columns[i].append_from(&mut src.columns[j]),
                None => {
                    self.columns[i].extend_zeroed(count);
                }
            }
        }
        for column in src.columns.iter_mut() {
            column.clear();
        }
        self.assert_invariants();
        start
    }

    /// Free every column vector and drop all rows.
    pub fn clear(&mut self) {
        self.entities.clear();
        self.entities.shrink_to_fit();
        for column in self.columns.iter_mut() {
            column.clear();
        }
    }

    /// Every column must hold exactly one cell per entity.
    #[inline]
    fn assert_invariants(&self) {
        #[cfg(debug_assertions)]
        for (i, column) in self.columns.iter().enumerate() {
            assert_eq!(
                column.len(),
                self.entities.len(),
                "column {i} out of sync with entity column"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(names: &[(&str, usize)]) -> Registry {
        let registry = Registry::new();
        for (name, size) in names {
            registry.register(name, *size).unwrap();
        }
        registry
    }

    fn u64_at(store: &ColumnStore, column: usize, row: usize) -> u64 {
        u64::from_ne_bytes(
            store
                .column(column)
                .read_bytes(Row::new(row))
                .try_into()
                .unwrap(),
        )
    }

    fn put_u64(store: &mut ColumnStore, column: usize, row: usize, value: u64) {
        store
            .column_mut(column)
            .write_bytes(Row::new(row), &value.to_ne_bytes());
    }

    #[test]
    fn insert_and_delete_keep_columns_in_sync() {
        // Given
        let registry = registry_with(&[("Pos", 8), ("Vel", 8)]);
        let pos = registry.lookup("Pos").unwrap();
        let vel = registry.lookup("Vel").unwrap();
        let spec = Spec::new(vec![pos, vel]);
        let mut store = ColumnStore::new(&spec, &registry);

        // When
        let (r0, _) = store.insert(Entity::new(2000));
        let (r1, _) = store.insert(Entity::new(2001));
        let (r2, _) = store.insert(Entity::new(2002));
        for (row, value) in [(0, 10u64), (1, 20), (2, 30)] {
            put_u64(&mut store, 0, row, value);
        }

        // Then
        assert_eq!((r0, r1, r2), (Row::new(0), Row::new(1), Row::new(2)));
        assert_eq!(store.len(), 3);

        // When - delete the middle row
        let moved = store.delete(Row::new(1));

        // Then - the last entity fills the hole
        assert_eq!(moved, Some(Entity::new(2002)));
        assert_eq!(store.entities(), &[Entity::new(2000), Entity::new(2002)]);
        assert_eq!(u64_at(&store, 0, 1), 30);

        // When - delete the last row
        let moved = store.delete(Row::new(1));
        assert_eq!(moved, None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn grow_fills_consecutive_handles() {
        // Given
        let registry = registry_with(&[("Pos", 8)]);
        let spec = Spec::one(registry.lookup("Pos").unwrap());
        let mut store = ColumnStore::new(&spec, &registry);

        // When
        let (start, _) = store.grow(3, Entity::new(5000));

        // Then
        assert_eq!(start, Row::new(0));
        assert_eq!(
            store.entities(),
            &[Entity::new(5000), Entity::new(5001), Entity::new(5002)]
        );
        assert_eq!(store.column(0).len(), 3);
    }

    #[test]
    fn swap_exchanges_rows_across_all_columns() {
        // Given
        let registry = registry_with(&[("Pos", 8)]);
        let spec = Spec::one(registry.lookup("Pos").unwrap());
        let mut store = ColumnStore::new(&spec, &registry);
        store.insert(Entity::new(2000));
        store.insert(Entity::new(2001));
        put_u64(&mut store, 0, 0, 111);
        put_u64(&mut store, 0, 1, 222);

        // When
        store.swap(Row::new(0), Row::new(1));

        // Then
        assert_eq!(store.entities(), &[Entity::new(2001), Entity::new(2000)]);
        assert_eq!(u64_at(&store, 0, 0), 222);
        assert_eq!(u64_at(&store, 0, 1), 111);
    }

    #[test]
    fn move_back_and_swap_rotates_rows() {
        // Given
        let registry = registry_with(&[("Pos", 8)]);
        let spec = Spec::one(registry.lookup("Pos").unwrap());
        let mut store = ColumnStore::new(&spec, &registry);
        for i in 0..4u64 {
            store.insert(Entity::new(2000 + i));
            put_u64(&mut store, 0, i as usize, i * 10);
        }

        // When - rotate rows [0, 3) left by one
        store.move_back_and_swap(Row::new(0), 3);

        // Then - the displaced row landed at index 2
        assert_eq!(
            store.entities(),
            &[
                Entity::new(2001),
                Entity::new(2002),
                Entity::new(2000),
                Entity::new(2003)
            ]
        );
        assert_eq!(u64_at(&store, 0, 0), 10);
        assert_eq!(u64_at(&store, 0, 2), 0);
    }

    #[test]
    fn copy_row_skips_disjoint_components() {
        // Given - source has Pos+Vel, destination has Vel+Mass
        let registry = registry_with(&[("Pos", 8), ("Vel", 8), ("Mass", 8)]);
        let pos = registry.lookup("Pos").unwrap();
        let vel = registry.lookup("Vel").unwrap();
        let mass = registry.lookup("Mass").unwrap();

        let src_spec = Spec::new(vec![pos, vel]);
        let dst_spec = Spec::new(vec![vel, mass]);

        let mut src = ColumnStore::new(&src_spec, &registry);
        src.insert(Entity::new(2000));
        let vel_src = src_spec.position(vel).unwrap();
        put_u64(&mut src, vel_src, 0, 77);

        let mut dst = ColumnStore::new(&dst_spec, &registry);
        dst.insert(Entity::new(2000));

        // When
        dst.copy_row_from(Row::new(0), &dst_spec, &src, Row::new(0), &src_spec);

        // Then - only the shared component moved
        let vel_dst = dst_spec.position(vel).unwrap();
        let mass_dst = dst_spec.position(mass).unwrap();
        assert_eq!(u64_at(&dst, vel_dst, 0), 77);
        assert_eq!(u64_at(&dst, mass_dst, 0), 0);
    }

    #[test]
    fn set_size_reserves_without_adding_rows() {
        // Given
        let registry = registry_with(&[("Pos", 8)]);
        let spec = Spec::one(registry.lookup("Pos").unwrap());
        let mut store = ColumnStore::new(&spec, &registry);

        // When
        store.set_size(16);

        // Then - capacity only; inserts up to the reservation do not move
        // the column base pointer
        assert_eq!(store.len(), 0);
        let mut resized = false;
        for i in 0..16u64 {
            let (_, moved) = store.insert(Entity::new(2000 + i));
            resized |= moved;
        }
        assert!(!resized);
        assert_eq!(store.len(), 16);
    }

    #[test]
    fn merge_from_adopts_into_empty_store() {
        // Given
        let registry = registry_with(&[("Pos", 8)]);
        let spec = Spec::one(registry.lookup("Pos").unwrap());

        let mut src = ColumnStore::new(&spec, &registry);
        src.insert(Entity::new(3000));
        src.insert(Entity::new(3001));
        put_u64(&mut src, 0, 0, 5);
        put_u64(&mut src, 0, 1, 6);

        let mut dst = ColumnStore::new(&spec, &registry);

        // When
        let start = dst.merge_from(&mut src, &spec, &spec);

        // Then
        assert_eq!(start, Row::new(0));
        assert_eq!(dst.len(), 2);
        assert!(src.is_empty());
        assert_eq!(u64_at(&dst, 0, 0), 5);
        assert_eq!(u64_at(&dst, 0, 1), 6);
    }

    #[test]
    fn merge_from_appends_onto_existing_rows() {
        // Given
        let registry = registry_with(&[("Pos", 8)]);
        let spec = Spec::one(registry.lookup("Pos").unwrap());

        let mut dst = ColumnStore::new(&spec, &registry);
        dst.insert(Entity::new(3000));
        put_u64(&mut dst, 0, 0, 1);

        let mut src = ColumnStore::new(&spec, &registry);
        src.insert(Entity::new(3001));
        put_u64(&mut src, 0, 0, 2);

        // When
        let start = dst.merge_from(&mut src, &spec, &spec);

        // Then
        assert_eq!(start, Row::new(1));
        assert_eq!(dst.entities(), &[Entity::new(3000), Entity::new(3001)]);
        assert_eq!(u64_at(&dst, 0, 0), 1);
        assert_eq!(u64_at(&dst, 0, 1), 2);
    }
}
