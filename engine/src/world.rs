//! The world: the façade over the entity directory, the archetype graph,
//! the transition engine and the query matcher.
//!
//! A world is a value; there is no module-level state. All main-stage
//! mutation funnels through [`World::commit`], which computes the
//! destination table for a set of additions/removals, moves the row, and
//! runs the registered reactive actions. Worker threads mutate their own
//! [`Stage`]s and the driver merges them back in stage-id order.

use std::sync::Arc;

use crate::builtin;
use crate::component::{Registry, Spec};
use crate::directory::{Directory, Record};
use crate::entity::{Allocator, Entity};
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::query::{self, Query};
use crate::reactive::{ActionKind, Actions, CopyHook, LifecycleHook, Signal};
use crate::stage::Stage;
use crate::storage::table;
use crate::storage::{ColumnStore, Row};

/// World construction parameters.
#[derive(Debug, Clone)]
pub struct Config {
    /// Handle range `(min, max]` issued by the world's allocator.
    pub entity_range: Option<(u64, u64)>,

    /// Handles reserved per stage, so workers allocate without contending
    /// with the driver.
    pub stage_handle_range: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            entity_range: None,
            stage_handle_range: 1 << 20,
        }
    }
}

/// A homogeneous batch for the bulk-load path.
pub struct BulkData<'a> {
    /// Explicit handles, or `None` to allocate a fresh consecutive range.
    pub entities: Option<&'a [Entity]>,

    /// The component ids of the batch; together they are the target type.
    pub components: &'a [Entity],

    /// Per component, `row_count` cells as one contiguous buffer.
    pub columns: &'a [&'a [u8]],

    /// Number of rows in the batch.
    pub row_count: usize,
}

/// The central container for entities, components, tables and queries.
pub struct World {
    components: Registry,
    allocator: Allocator,
    pub(crate) graph: Graph,
    pub(crate) dir: Directory,
    singleton: Record,
    actions: Actions,
    pub(crate) queries: Vec<Query>,
    stage_counter: u32,
    stage_range: u64,

    /// A main-stage column reallocated; cached query references must be
    /// re-resolved at the next safe point.
    should_resolve: bool,

    /// A watched entity transitioned; queries must rematch at the next safe
    /// point.
    should_match: bool,

    /// A step is in progress; the main stage is read-only.
    in_progress: bool,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Create a world with default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create a world with the given configuration.
    pub fn with_config(config: Config) -> Self {
        let components = Registry::new();
        builtin::register(&components).expect("builtin registration");
        let graph = Graph::new(&components);
        let mut world = Self {
            components,
            allocator: Allocator::new(config.entity_range),
            graph,
            dir: Directory::new(),
            singleton: Record::default(),
            actions: Actions::new(),
            queries: Vec::new(),
            stage_counter: 0,
            stage_range: config.stage_handle_range,
            should_resolve: false,
            should_match: false,
            in_progress: false,
        };
        world.actions.set_lifecycle(
            builtin::NAME,
            Some(Arc::new(|ptr| {
                // SAFETY: the cell is sized and aligned for Name.
                unsafe { ptr.as_ptr().cast::<builtin::Name>().write(builtin::Name::default()) }
            })),
            Some(Arc::new(|ptr| {
                // SAFETY: the cell holds an initialized Name.
                unsafe { std::ptr::drop_in_place(ptr.as_ptr().cast::<builtin::Name>()) }
            })),
            Some(Arc::new(|dst, src| {
                // SAFETY: src holds an initialized Name; dst holds no live
                // value.
                unsafe {
                    let value = (*src.as_ptr().cast::<builtin::Name>()).clone();
                    dst.as_ptr().cast::<builtin::Name>().write(value);
                }
            })),
        );
        log::debug!("world initialized");
        world
    }

    // -- registration ------------------------------------------------------

    /// Register a component by name and byte size. Idempotent by name;
    /// re-registering with a different size is an error.
    pub fn new_component(&self, name: &str, size: usize) -> Result<Entity> {
        self.components.register(name, size)
    }

    /// Register a typed component. The value's default is written into
    /// newly allocated cells, values are dropped when cells are discarded,
    /// and duplication (clones, override-from-base, staging) goes through
    /// `Clone` rather than a byte copy.
    pub fn register_component<T: Default + Clone + Send + Sync + 'static>(
        &mut self,
        name: &str,
    ) -> Result<Entity> {
        let id = self.components.register_aligned(
            name,
            std::mem::size_of::<T>(),
            std::mem::align_of::<T>(),
        )?;
        let init: LifecycleHook = Arc::new(|ptr| {
            // SAFETY: the cell is sized and aligned for T.
            unsafe { ptr.as_ptr().cast::<T>().write(T::default()) }
        });
        let fini: Option<LifecycleHook> = std::mem::needs_drop::<T>().then(|| {
            let hook: LifecycleHook = Arc::new(|ptr| {
                // SAFETY: the cell holds an initialized T.
                unsafe { std::ptr::drop_in_place(ptr.as_ptr().cast::<T>()) }
            });
            hook
        });
        let copy: CopyHook = Arc::new(|dst, src| {
            // SAFETY: src holds an initialized T; dst holds no live value.
            unsafe {
                let value = (*src.as_ptr().cast::<T>()).clone();
                dst.as_ptr().cast::<T>().write(value);
            }
        });
        self.actions.set_lifecycle(id, Some(init), fini, Some(copy));
        Ok(id)
    }

    /// The component registry.
    #[inline]
    pub fn components(&self) -> &Registry {
        &self.components
    }

    /// The last handle issued by the world's allocator.
    #[inline]
    pub fn last_handle(&self) -> Entity {
        self.allocator.last()
    }

    /// Reconfigure the `(min, max]` handle range issued by this world.
    /// Handles already issued stay valid for lookup but new allocations and
    /// transitions are checked against the new bounds.
    pub fn set_entity_range(&mut self, min: u64, max: u64) {
        self.allocator.set_range(min, max);
    }

    #[inline]
    pub(crate) fn graph(&self) -> &Graph {
        &self.graph
    }

    #[inline]
    pub(crate) fn query_ref(&self, id: query::Id) -> &Query {
        &self.queries[id.index()]
    }

    // -- records -----------------------------------------------------------

    fn record(&self, entity: Entity) -> Option<Record> {
        if entity == Entity::SINGLETON {
            // The singleton record always exists.
            return Some(self.singleton);
        }
        self.dir.get(entity)
    }

    fn set_record(&mut self, entity: Entity, record: Record) {
        if entity == Entity::SINGLETON {
            self.singleton = record;
        } else {
            self.dir.set(entity, record);
        }
    }

    fn relocate_record(&mut self, entity: Entity, table: table::Id, row: Row) {
        if entity == Entity::SINGLETON {
            self.singleton.relocate(table, row);
        } else {
            let (record, _) = self.dir.ensure(entity);
            record.relocate(table, row);
        }
    }

    fn remove_record(&mut self, entity: Entity) {
        if entity == Entity::SINGLETON {
            self.singleton = Record::default();
        } else {
            self.dir.remove(entity);
        }
    }

    /// Whether the entity occupies any table or has an empty record.
    pub fn contains(&self, entity: Entity) -> bool {
        if entity == Entity::SINGLETON {
            return true;
        }
        self.dir.contains(entity)
    }

    /// The entity's type: the sorted id sequence of its table.
    pub fn get_type(&self, entity: Entity) -> Spec {
        self.record(entity)
            .and_then(|r| r.table)
            .map(|t| self.graph.table(t).spec().clone())
            .unwrap_or(Spec::EMPTY)
    }

    /// The fini hook of a component, for shadow stores retiring their own
    /// cloned cells.
    pub(crate) fn fini_hook_of(&self, component: Entity) -> Option<LifecycleHook> {
        self.actions.fini_hook(component)
    }

    /// Duplicate the entity's main-stage cells into a shadow-store row, for
    /// every component present in both types. Components with a copy hook
    /// are cloned; the rest are byte-copied. The destination cells must
    /// hold no live values. The main row keeps ownership of its own.
    pub(crate) fn clone_row_into(
        &self,
        entity: Entity,
        dst: &mut ColumnStore,
        dst_row: Row,
        dst_spec: &Spec,
    ) {
        let Some(record) = self.record(entity) else {
            return;
        };
        let (Some(table_id), Some(src_row)) = (record.table, record.row_index()) else {
            return;
        };
        let table = self.graph.table(table_id);
        let src_spec = table.spec();
        for (dst_pos, component) in dst_spec.ids().iter().enumerate() {
            let Some(src_pos) = src_spec.position(*component) else {
                continue;
            };
            let src_column = table.store().column(src_pos);
            match self.actions.copy_hook(*component) {
                Some(copy) => {
                    let dst_ptr = dst.column_mut(dst_pos).cell_ptr_mut(dst_row);
                    copy(dst_ptr, src_column.cell_ptr(src_row));
                }
                None => dst
                    .column_mut(dst_pos)
                    .write_bytes(dst_row, src_column.read_bytes(src_row)),
            }
        }
    }

    fn row_of(&self, entity: Entity) -> Row {
        self.record(entity)
            .and_then(|r| r.row_index())
            .expect("entity occupies a table")
    }

    // -- the transition engine --------------------------------------------

    /// Compute the destination table for a set of additions/removals, move
    /// the entity's row, and run reactive actions. Returns false when the
    /// transition is a no-op.
    fn commit(
        &mut self,
        entity: Entity,
        to_add: Option<&Spec>,
        to_remove: Option<&Spec>,
    ) -> Result<bool> {
        if self.in_progress {
            return Err(Error::InvalidWhileIterating);
        }

        let record = self.record(entity).unwrap_or_default();
        let src_table = record.table;
        let src_row = record.row_index();
        let watched = record.is_watched();

        let mut added = Vec::new();
        let mut removed = Vec::new();
        let dst_table = self.graph.traverse(
            src_table,
            to_add,
            to_remove,
            &self.components,
            &mut added,
            &mut removed,
        )?;
        self.bind_fresh_tables();

        if dst_table == src_table {
            return Ok(false);
        }

        if entity != Entity::SINGLETON {
            if !self.allocator.in_range(entity) {
                let (min, max) = self.allocator.range();
                return Err(Error::OutOfRange {
                    entity: entity.target().raw(),
                    min,
                    max,
                });
            }
            self.allocator.advance_past(entity);
        }

        match (src_table, dst_table) {
            (None, Some(dst)) => self.spawn_row(entity, dst, &added, watched),
            (Some(src), None) => {
                self.despawn_row(entity, src, src_row.expect("occupied source row"), &removed)
            }
            (Some(src), Some(dst)) => self.migrate_row(
                entity,
                src,
                src_row.expect("occupied source row"),
                dst,
                &added,
                &removed,
            ),
            (None, None) => unreachable!("no-op transitions return early"),
        }

        if watched {
            self.should_match = true;
        }
        Ok(true)
    }

    /// First placement of an entity into a table.
    fn spawn_row(&mut self, entity: Entity, dst: table::Id, added: &[Entity], watched: bool) {
        let (row, resized) = self.graph.table_mut(dst).store_mut().insert(entity);
        if resized {
            self.should_resolve = true;
        }
        self.set_record(entity, Record::located(dst, row, watched));
        self.run_init_hooks(entity, added);
        self.notify_batch(ActionKind::Add, entity, added);
        self.apply_overrides(entity, added);
        self.run_on_new(entity, dst);
    }

    /// Move an entity's row between two tables.
    fn migrate_row(
        &mut self,
        entity: Entity,
        src: table::Id,
        _src_row: Row,
        dst: table::Id,
        added: &[Entity],
        removed: &[Entity],
    ) {
        // OnRemove runs on the source table, while the data is still there.
        self.notify_batch(ActionKind::Remove, entity, removed);

        // A handler may have moved or deleted the entity; re-read the row
        // before touching it.
        let Some(row_now) = self.record(entity).and_then(|r| r.row_index()) else {
            return;
        };
        let (cells, src_spec) = {
            let src_table = self.graph.table(src);
            (src_table.store().read_row(row_now), src_table.spec().clone())
        };
        self.run_fini_hooks(src, row_now, removed);

        if let Some(moved) = self.graph.table_mut(src).store_mut().delete(row_now) {
            self.relocate_record(moved, src, row_now);
        }

        let watched = self.record(entity).is_some_and(|r| r.is_watched());
        let (new_row, resized) = self.graph.table_mut(dst).store_mut().insert(entity);
        if resized {
            self.should_resolve = true;
        }
        self.set_record(entity, Record::located(dst, new_row, watched));

        let dst_spec = self.graph.table(dst).spec().clone();
        self.graph
            .table_mut(dst)
            .store_mut()
            .write_row(new_row, &dst_spec, &cells, &src_spec);

        self.run_init_hooks(entity, added);
        self.notify_batch(ActionKind::Add, entity, added);
        self.apply_overrides(entity, added);
    }

    /// Remove an entity's last row and its record.
    fn despawn_row(&mut self, entity: Entity, src: table::Id, _src_row: Row, removed: &[Entity]) {
        self.notify_batch(ActionKind::Remove, entity, removed);

        let Some(row_now) = self.record(entity).and_then(|r| r.row_index()) else {
            self.remove_record(entity);
            return;
        };
        self.run_fini_hooks(src, row_now, removed);

        if let Some(moved) = self.graph.table_mut(src).store_mut().delete(row_now) {
            self.relocate_record(moved, src, row_now);
        }
        self.remove_record(entity);
    }

    fn run_init_hooks(&mut self, entity: Entity, components: &[Entity]) {
        for component in components {
            let Some(hook) = self.actions.init_hook(*component) else {
                continue;
            };
            let Some(record) = self.record(entity) else {
                return;
            };
            let (Some(table_id), Some(row)) = (record.table, record.row_index()) else {
                return;
            };
            let Some(position) = self.graph.table(table_id).spec().position(*component) else {
                continue;
            };
            let ptr = self
                .graph
                .table_mut(table_id)
                .store_mut()
                .column_mut(position)
                .cell_ptr_mut(row);
            hook(ptr);
        }
    }

    fn run_fini_hooks(&mut self, table_id: table::Id, row: Row, components: &[Entity]) {
        for component in components {
            let Some(hook) = self.actions.fini_hook(*component) else {
                continue;
            };
            let Some(position) = self.graph.table(table_id).spec().position(*component) else {
                continue;
            };
            let ptr = self
                .graph
                .table_mut(table_id)
                .store_mut()
                .column_mut(position)
                .cell_ptr_mut(row);
            hook(ptr);
        }
    }

    /// Invoke the handlers of one action kind for a snapshot of component
    /// ids. The entity's row is re-read before every handler call.
    fn notify_batch(&mut self, kind: ActionKind, entity: Entity, components: &[Entity]) {
        for component in components {
            self.notify(kind, entity, *component);
        }
    }

    fn notify(&mut self, kind: ActionKind, entity: Entity, component: Entity) {
        let handlers = self.actions.snapshot(kind, component);
        for handler in handlers {
            let Some(record) = self.record(entity) else {
                return;
            };
            let (Some(table), Some(row)) = (record.table, record.row_index()) else {
                return;
            };
            let signal = Signal {
                entity,
                component,
                table,
                row,
            };
            handler(self, &signal);
        }
    }

    /// Copy each added component's value from an `INSTANCEOF` base into the
    /// entity's own cell the moment the entity begins to own it.
    fn apply_overrides(&mut self, entity: Entity, added: &[Entity]) {
        let has_base = self
            .record(entity)
            .and_then(|r| r.table)
            .is_some_and(|t| self.graph.table(t).flags().has_base);
        if !has_base {
            return;
        }
        for component in added {
            let Some(record) = self.record(entity) else {
                return;
            };
            let (Some(table_id), Some(row)) = (record.table, record.row_index()) else {
                return;
            };
            let table = self.graph.table(table_id);
            let Some(position) = table.spec().position(*component) else {
                continue;
            };
            let Some(owner) = query::base_owner(&self.graph, &self.dir, table, *component, 0)
            else {
                continue;
            };
            if owner == entity {
                continue;
            }
            let Some((owner_table, owner_row, owner_col)) =
                query::resolve_ref(&self.graph, &self.dir, owner, *component, 0)
            else {
                continue;
            };
            match self.actions.copy_hook(*component) {
                Some(copy) => {
                    let src_ptr = self
                        .graph
                        .table(owner_table)
                        .store()
                        .column(owner_col)
                        .cell_ptr(owner_row);
                    let dst_ptr = self
                        .graph
                        .table_mut(table_id)
                        .store_mut()
                        .column_mut(position)
                        .cell_ptr_mut(row);
                    // The just-initialized default is discarded first.
                    if let Some(fini) = self.actions.fini_hook(*component) {
                        fini(dst_ptr);
                    }
                    copy(dst_ptr, src_ptr);
                }
                None => {
                    let bytes = self
                        .graph
                        .table(owner_table)
                        .store()
                        .column(owner_col)
                        .read_bytes(owner_row)
                        .to_vec();
                    if bytes.is_empty() {
                        continue;
                    }
                    self.graph
                        .table_mut(table_id)
                        .store_mut()
                        .column_mut(position)
                        .write_bytes(row, &bytes);
                }
            }
            self.notify(ActionKind::Set, entity, *component);
        }
    }

    fn run_on_new(&mut self, entity: Entity, table_id: table::Id) {
        let handlers = self.graph.table(table_id).on_new.clone();
        for handler in handlers {
            let Some(record) = self.record(entity) else {
                return;
            };
            let (Some(table), Some(row)) = (record.table, record.row_index()) else {
                return;
            };
            let signal = Signal {
                entity,
                component: Entity::NULL,
                table,
                row,
            };
            handler(self, &signal);
        }
    }

    // -- query binding maintenance ----------------------------------------

    /// Bind every query to tables the graph created since the last call.
    fn bind_fresh_tables(&mut self) {
        let fresh = self.graph.drain_fresh();
        if fresh.is_empty() {
            return;
        }
        for table_id in fresh {
            let mut matched = Vec::new();
            {
                let graph = &self.graph;
                let dir = &self.dir;
                let table = graph.table(table_id);
                for (index, query) in self.queries.iter_mut().enumerate() {
                    if query.bind_table(graph, dir, table) {
                        matched.push(query::Id::new(index as u32));
                    }
                }
            }
            self.graph.table_mut(table_id).matched = matched;
        }
        self.watch_referenced();
    }

    /// Entities referenced by query bindings get negative directory rows so
    /// their transitions trigger rematch.
    fn watch_referenced(&mut self) {
        let referenced: Vec<Entity> = self
            .queries
            .iter()
            .flat_map(|q| q.referenced())
            .filter(|e| *e != Entity::SINGLETON)
            .collect();
        for entity in referenced {
            let (record, _) = self.dir.ensure(entity);
            record.set_watched();
        }
    }

    fn rematch_all(&mut self) {
        log::trace!("rematching {} queries", self.queries.len());
        let mut assignments: Vec<(table::Id, query::Id)> = Vec::new();
        {
            let graph = &self.graph;
            let dir = &self.dir;
            for (index, query) in self.queries.iter_mut().enumerate() {
                query.unbind();
                for table in graph.tables() {
                    if query.bind_table(graph, dir, table) {
                        assignments.push((table.id(), query::Id::new(index as u32)));
                    }
                }
            }
        }
        for index in 0..self.graph.len() {
            self.graph
                .table_mut(table::Id::new(index as u32))
                .matched
                .clear();
        }
        for (table_id, query_id) in assignments {
            self.graph.table_mut(table_id).matched.push(query_id);
        }
        self.watch_referenced();
    }

    fn maintain(&mut self) {
        if self.should_match {
            self.rematch_all();
            self.should_match = false;
            self.should_resolve = false;
        }
        if self.should_resolve {
            log::trace!("re-resolving query references");
            let graph = &self.graph;
            let dir = &self.dir;
            for query in self.queries.iter_mut() {
                query.resolve_refs(graph, dir);
            }
            self.should_resolve = false;
        }
    }

    // -- entity primitives -------------------------------------------------

    /// Allocate a handle and place the entity into the table of `spec`.
    /// An empty spec allocates the handle only.
    pub fn spawn(&mut self, spec: &Spec) -> Result<Entity> {
        let entity = self.allocator.alloc()?;
        if !spec.is_empty() {
            self.commit(entity, Some(spec), None)?;
        }
        Ok(entity)
    }

    /// Allocate `count` consecutive handles and place them all into the
    /// table of `spec`. Returns the first handle. A count of zero reserves
    /// nothing and is a no-op.
    pub fn spawn_batch(&mut self, spec: &Spec, count: usize) -> Result<Entity> {
        let first = self.allocator.alloc_range(count as u64)?;
        if count == 0 || spec.is_empty() {
            return Ok(first);
        }
        let table_id = self.graph.find_or_create(spec.ids(), &self.components)?;
        self.bind_fresh_tables();

        let (start, resized) = self.graph.table_mut(table_id).store_mut().grow(count, first);
        if resized {
            self.should_resolve = true;
        }
        let added: Vec<Entity> = spec.ids().iter().copied().filter(|id| id.is_low()).collect();
        for i in 0..count {
            let entity = Entity::new(first.raw() + i as u64);
            self.set_record(
                entity,
                Record::located(table_id, Row::new(start.index() + i), false),
            );
        }
        for i in 0..count {
            let entity = Entity::new(first.raw() + i as u64);
            self.run_init_hooks(entity, &added);
            self.notify_batch(ActionKind::Add, entity, &added);
            self.apply_overrides(entity, &added);
            self.run_on_new(entity, table_id);
        }
        Ok(first)
    }

    /// Spawn an instance sharing the components of `base`.
    pub fn spawn_instance_of(&mut self, base: Entity) -> Result<Entity> {
        self.spawn(&Spec::one(base.as_instance_of()))
    }

    /// Spawn an entity contained by `parent`.
    pub fn spawn_child_of(&mut self, parent: Entity) -> Result<Entity> {
        self.spawn(&Spec::one(parent.as_child_of()))
    }

    /// Spawn an entity with the same type as `entity`, optionally copying
    /// its component values. Components with a copy hook are cloned cell by
    /// cell; the rest are duplicated by byte copy.
    pub fn clone_entity(&mut self, entity: Entity, copy_value: bool) -> Result<Entity> {
        let spec = self.get_type(entity);
        let cloned = self.spawn(&spec)?;
        if copy_value {
            if let (Some(src), Some(dst)) = (self.record(entity), self.record(cloned)) {
                if let (Some(table_id), Some(src_row), Some(dst_row)) =
                    (src.table, src.row_index(), dst.row_index())
                {
                    // Same type, same table.
                    debug_assert_eq!(dst.table, Some(table_id));
                    let spec = self.graph.table(table_id).spec().clone();
                    for (position, component) in spec.ids().iter().enumerate() {
                        let copy = self.actions.copy_hook(*component);
                        let fini = self.actions.fini_hook(*component);
                        let column = self
                            .graph
                            .table_mut(table_id)
                            .store_mut()
                            .column_mut(position);
                        match copy {
                            Some(copy) => {
                                let dst_ptr = column.cell_ptr_mut(dst_row);
                                // Discard the freshly initialized default.
                                if let Some(fini) = fini {
                                    fini(dst_ptr);
                                }
                                copy(dst_ptr, column.cell_ptr(src_row));
                            }
                            None => column.copy_cell(dst_row, src_row),
                        }
                    }
                }
            }
        }
        Ok(cloned)
    }

    /// Delete an entity: remove its row and its record. Handles are never
    /// reused, so the handle stays dead.
    pub fn despawn(&mut self, entity: Entity) -> Result<bool> {
        let Some(record) = self.record(entity) else {
            return Ok(false);
        };
        if record.table.is_none() {
            self.remove_record(entity);
            return Ok(true);
        }
        let spec = self.get_type(entity);
        self.commit(entity, None, Some(&spec))
    }

    /// Add the components of `spec` to an entity. Adding components the
    /// entity already has is a no-op.
    pub fn add(&mut self, entity: Entity, spec: &Spec) -> Result<bool> {
        self.commit(entity, Some(spec), None)
    }

    /// Remove the components of `spec` from an entity. Removing absent
    /// components is a no-op.
    pub fn remove(&mut self, entity: Entity, spec: &Spec) -> Result<bool> {
        self.commit(entity, None, Some(spec))
    }

    /// Apply an addition and a removal as one transition.
    pub fn add_remove(&mut self, entity: Entity, to_add: &Spec, to_remove: &Spec) -> Result<bool> {
        self.commit(entity, Some(to_add), Some(to_remove))
    }

    /// Write a component value, adding the component if absent.
    pub fn set_raw(&mut self, entity: Entity, component: Entity, bytes: &[u8]) -> Result<()> {
        let info = self
            .components
            .get(component)
            .ok_or(Error::NotRegistered(component))?;
        if bytes.len() != info.size() {
            return Err(Error::TypeMismatch {
                component,
                registered: info.size(),
                provided: bytes.len(),
            });
        }
        if !self.get_type(entity).contains(component) {
            self.commit(entity, Some(&Spec::one(component)), None)?;
        }
        let record = self
            .record(entity)
            .ok_or_else(|| Error::InvalidArgument(format!("entity {entity:?} not established")))?;
        let (Some(table_id), Some(row)) = (record.table, record.row_index()) else {
            return Err(Error::InvalidArgument(format!(
                "entity {entity:?} has no row"
            )));
        };
        let position = self
            .graph
            .table(table_id)
            .spec()
            .position(component)
            .expect("component committed above");

        // The old value is finalized before the overwrite.
        if let Some(hook) = self.actions.fini_hook(component) {
            let ptr = self
                .graph
                .table_mut(table_id)
                .store_mut()
                .column_mut(position)
                .cell_ptr_mut(row);
            hook(ptr);
        }
        self.graph
            .table_mut(table_id)
            .store_mut()
            .column_mut(position)
            .write_bytes(row, bytes);
        self.notify(ActionKind::Set, entity, component);
        Ok(())
    }

    /// Typed wrapper over [`World::set_raw`]; ownership of the value moves
    /// into the cell.
    pub fn set_value<T>(&mut self, entity: Entity, component: Entity, value: T) -> Result<()> {
        let value = std::mem::ManuallyDrop::new(value);
        // SAFETY: reading the value as bytes; ownership transfers into the
        // cell on success.
        let bytes = unsafe {
            std::slice::from_raw_parts(
                (&*value as *const T).cast::<u8>(),
                std::mem::size_of::<T>(),
            )
        };
        let result = self.set_raw(entity, component, bytes);
        if result.is_err() {
            // The cell did not take ownership; drop the value here.
            let _ = std::mem::ManuallyDrop::into_inner(value);
        }
        result
    }

    /// Read a component's cell, owned or inherited from a base.
    pub fn get_raw(&self, entity: Entity, component: Entity) -> Option<&[u8]> {
        let record = self.record(entity)?;
        let table_id = record.table?;
        let row = record.row_index()?;
        let table = self.graph.table(table_id);
        if let Some(position) = table.spec().position(component) {
            return Some(table.store().column(position).read_bytes(row));
        }
        let (owner_table, owner_row, owner_col) =
            query::resolve_ref(&self.graph, &self.dir, entity, component, 0)?;
        Some(
            self.graph
                .table(owner_table)
                .store()
                .column(owner_col)
                .read_bytes(owner_row),
        )
    }

    /// Typed read of a component value, owned or inherited.
    ///
    /// # Panics
    /// Panics when the size of `T` disagrees with the registered size.
    pub fn get_value<T>(&self, entity: Entity, component: Entity) -> Option<&T> {
        let bytes = self.get_raw(entity, component)?;
        assert_eq!(
            bytes.len(),
            std::mem::size_of::<T>(),
            "value size does not match registered component size"
        );
        if bytes.is_empty() {
            return None;
        }
        // SAFETY: size validated; cells of typed components are aligned for
        // their registered layout.
        Some(unsafe { &*(bytes.as_ptr() as *const T) })
    }

    /// Typed mutable access to an owned component value. Does not fire
    /// OnSet; use [`World::set_value`] for observed writes.
    pub fn get_value_mut<T>(&mut self, entity: Entity, component: Entity) -> Option<&mut T> {
        let record = self.record(entity)?;
        let table_id = record.table?;
        let row = record.row_index()?;
        let position = self.graph.table(table_id).spec().position(component)?;
        let column = self
            .graph
            .table_mut(table_id)
            .store_mut()
            .column_mut(position);
        assert_eq!(
            column.cell_size(),
            std::mem::size_of::<T>(),
            "value size does not match registered component size"
        );
        // SAFETY: size validated; exclusive access through &mut self.
        Some(unsafe { &mut *(column.cell_ptr(row).as_ptr() as *mut T) })
    }

    /// Whether the entity has every id of `spec`, owned or inherited.
    pub fn has(&self, entity: Entity, spec: &Spec) -> bool {
        let etype = self.get_type(entity);
        let table = self
            .record(entity)
            .and_then(|r| r.table)
            .map(|t| self.graph.table(t));
        spec.ids().iter().all(|id| {
            etype.contains(*id)
                || table
                    .is_some_and(|t| query::base_owner(&self.graph, &self.dir, t, *id, 0).is_some())
        })
    }

    /// Whether the entity owns every id of `spec`; inherited components do
    /// not count.
    pub fn has_owned(&self, entity: Entity, spec: &Spec) -> bool {
        self.get_type(entity).contains_all(spec)
    }

    /// The first `CHILDOF` container of the entity carrying `component`, or
    /// any container when `component` is null.
    pub fn get_parent(&self, entity: Entity, component: Entity) -> Option<Entity> {
        let record = self.record(entity)?;
        let table = self.graph.table(record.table?);
        for parent in table.parents() {
            if component == Entity::NULL {
                return Some(parent);
            }
            let Some(parent_table) = self.dir.get(parent).and_then(|r| r.table) else {
                continue;
            };
            if self.graph.table(parent_table).spec().contains(component) {
                return Some(parent);
            }
        }
        None
    }

    // -- names -------------------------------------------------------------

    /// Set the builtin name of an entity.
    pub fn set_name(&mut self, entity: Entity, name: &str) -> Result<()> {
        self.set_value(entity, builtin::NAME, builtin::Name::new(name))
    }

    /// The builtin name of an entity.
    pub fn name(&self, entity: Entity) -> Option<&str> {
        self.get_value::<builtin::Name>(entity, builtin::NAME)
            .map(|n| n.value.as_str())
    }

    /// Find an entity by its builtin name. Linear scan over named tables.
    pub fn lookup(&self, name: &str) -> Option<Entity> {
        for table in self.graph.tables() {
            let Some(position) = table.spec().position(builtin::NAME) else {
                continue;
            };
            // SAFETY: the Name column is registered with Name's layout.
            let names: &[builtin::Name] = unsafe { table.store().column(position).as_slice() };
            for (row, value) in names.iter().enumerate() {
                if value.value == name {
                    return Some(table.store().entity(Row::new(row)));
                }
            }
        }
        None
    }

    // -- type primitives ----------------------------------------------------

    /// Canonicalise a handle sequence into a type, materializing its table.
    pub fn type_find(&mut self, ids: &[Entity]) -> Result<Spec> {
        let table_id = self.graph.find_or_create(ids, &self.components)?;
        self.bind_fresh_tables();
        Ok(self.graph.table(table_id).spec().clone())
    }

    /// A type with `id` inserted.
    pub fn type_add(&self, spec: &Spec, id: Entity) -> Spec {
        spec.with(id)
    }

    /// The union of `base` and `to_add`, minus `to_remove`.
    pub fn type_merge(&self, base: &Spec, to_add: &Spec, to_remove: &Spec) -> Spec {
        base.merge(to_add).difference(to_remove)
    }

    /// Whether a type contains the exact handle.
    pub fn type_has_entity(&self, spec: &Spec, id: Entity) -> bool {
        spec.contains(id)
    }

    /// Print a type as a comma-separated expression, flagged elements
    /// prefixed with their relation.
    pub fn type_to_expr(&self, spec: &Spec) -> String {
        spec.ids()
            .iter()
            .map(|id| {
                let target = id.target();
                let name = self
                    .components
                    .name_of(target)
                    .or_else(|| self.name(target).map(str::to_string))
                    .unwrap_or_else(|| target.raw().to_string());
                if id.is_instance_of() {
                    format!("INSTANCEOF|{name}")
                } else if id.is_child_of() {
                    format!("CHILDOF|{name}")
                } else {
                    name
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Parse a comma-separated type expression.
    pub fn type_from_expr(&self, expr: &str) -> Result<Spec> {
        if expr.trim().is_empty() {
            return Ok(Spec::EMPTY);
        }
        let mut ids = Vec::new();
        for part in expr.split(',') {
            let part = part.trim();
            let (flags, name) = if let Some(rest) = part.strip_prefix("INSTANCEOF|") {
                (Entity::INSTANCEOF, rest)
            } else if let Some(rest) = part.strip_prefix("CHILDOF|") {
                (Entity::CHILDOF, rest)
            } else {
                (0, part)
            };
            let id = self
                .components
                .lookup(name)
                .or_else(|| self.lookup(name))
                .ok_or_else(|| Error::InvalidArgument(format!("unknown name '{name}'")))?;
            ids.push(Entity::new(id.raw() | flags));
        }
        Ok(Spec::new(ids))
    }

    // -- bulk load ----------------------------------------------------------

    /// Load a homogeneous batch with one atomic transition. Entities end up
    /// in the batch's table in array order; repeating a call with the same
    /// entity array updates values in place with zero row motion.
    pub fn set_w_data(&mut self, data: &BulkData) -> Result<Entity> {
        if data.components.is_empty() {
            return Err(Error::InvalidArgument(
                "bulk load requires at least one component".to_string(),
            ));
        }
        if data.components.len() != data.columns.len() {
            return Err(Error::InvalidArgument(
                "component and column counts differ".to_string(),
            ));
        }
        for (component, column) in data.components.iter().zip(data.columns) {
            let size = self.components.size_of(*component);
            if self.components.get(*component).is_none() {
                return Err(Error::NotRegistered(*component));
            }
            if column.len() != size * data.row_count {
                return Err(Error::TypeMismatch {
                    component: *component,
                    registered: size * data.row_count,
                    provided: column.len(),
                });
            }
        }
        if let Some(entities) = data.entities {
            if entities.len() != data.row_count {
                return Err(Error::InvalidArgument(
                    "entity array length differs from row count".to_string(),
                ));
            }
        }

        let count = data.row_count;
        if count == 0 {
            return Ok(Entity::new(self.allocator.last().raw() + 1));
        }

        let table_id = self
            .graph
            .find_or_create(data.components, &self.components)?;
        self.bind_fresh_tables();
        let target_spec = self.graph.table(table_id).spec().clone();
        let added: Vec<Entity> = target_spec
            .ids()
            .iter()
            .copied()
            .filter(|id| id.is_low())
            .collect();

        let (first, start) = match data.entities {
            None => {
                let first = self.allocator.alloc_range(count as u64)?;
                let (start, resized) =
                    self.graph.table_mut(table_id).store_mut().grow(count, first);
                if resized {
                    self.should_resolve = true;
                }
                for i in 0..count {
                    let entity = Entity::new(first.raw() + i as u64);
                    self.set_record(
                        entity,
                        Record::located(table_id, Row::new(start.index() + i), false),
                    );
                }
                (first, start)
            }
            Some(entities) => {
                // Ensure pass: one atomic transition into the batch table.
                for entity in entities {
                    self.allocator.advance_past(*entity);
                    let current = self.get_type(*entity);
                    if current == target_spec {
                        continue;
                    }
                    let to_add = target_spec.difference(&current);
                    let to_remove = current.difference(&target_spec);
                    self.commit(
                        *entity,
                        (!to_add.is_empty()).then_some(&to_add),
                        (!to_remove.is_empty()).then_some(&to_remove),
                    )?;
                }
                // Ordering pass: make rows follow the entity array so the
                // column data lands with one copy per column. A repeat call
                // with the same array finds every row in place already.
                let mut start = self.row_of(entities[0]);
                for (i, entity) in entities.iter().enumerate().skip(1) {
                    let want = start.index() + i;
                    let current = self.row_of(*entity).index();
                    if current == want {
                        continue;
                    }
                    if want < self.graph.table(table_id).len() {
                        self.table_swap(table_id, Row::new(current), Row::new(want));
                    } else {
                        // The block already touches the top of the table:
                        // bring this entity just before the block, then
                        // rotate the block back one position.
                        let before = start.index() - 1;
                        self.table_swap(table_id, Row::new(current), Row::new(before));
                        self.table_rotate(table_id, Row::new(before), i + 1);
                        start = Row::new(before);
                    }
                }
                (entities[0], start)
            }
        };

        // Rows reached through explicit handles hold live values (committed
        // defaults or earlier data); finalize them before the bulk write.
        if data.entities.is_some() {
            let hooked: Vec<Entity> = data
                .components
                .iter()
                .copied()
                .filter(|c| self.actions.fini_hook(*c).is_some())
                .collect();
            if !hooked.is_empty() {
                for i in 0..count {
                    self.run_fini_hooks(table_id, Row::new(start.index() + i), &hooked);
                }
            }
        }

        for (component, column) in data.components.iter().zip(data.columns) {
            let position = target_spec
                .position(*component)
                .expect("component in batch table type");
            self.graph
                .table_mut(table_id)
                .store_mut()
                .column_mut(position)
                .write_range(start, column);
        }

        // Reactive actions: data-bearing writes are sets; the id of each
        // batch row is taken from the entity column after ordering.
        let row_entities: Vec<Entity> = self.graph.table(table_id).store().entities()
            [start.index()..start.index() + count]
            .to_vec();
        if data.entities.is_none() {
            for entity in &row_entities {
                self.notify_batch(ActionKind::Add, *entity, &added);
                self.run_on_new(*entity, table_id);
            }
        }
        for component in data.components {
            if !self.actions.has(ActionKind::Set, *component) {
                continue;
            }
            for entity in &row_entities {
                self.notify(ActionKind::Set, *entity, *component);
            }
        }
        Ok(first)
    }

    fn table_swap(&mut self, table_id: table::Id, r1: Row, r2: Row) {
        if r1 == r2 {
            return;
        }
        self.graph.table_mut(table_id).store_mut().swap(r1, r2);
        for row in [r1, r2] {
            let entity = self.graph.table(table_id).store().entity(row);
            self.relocate_record(entity, table_id, row);
        }
    }

    fn table_rotate(&mut self, table_id: table::Id, row: Row, count: usize) {
        self.graph
            .table_mut(table_id)
            .store_mut()
            .move_back_and_swap(row, count);
        for i in 0..count {
            let at = Row::new(row.index() + i);
            let entity = self.graph.table(table_id).store().entity(at);
            self.relocate_record(entity, table_id, at);
        }
    }

    // -- filters ------------------------------------------------------------

    /// Count entities whose type contains every id of `filter`. An empty
    /// filter counts every entity in the directory.
    pub fn count(&self, filter: &Spec) -> usize {
        if filter.is_empty() {
            return self.dir.len();
        }
        self.dir
            .iter()
            .filter(|(_, record)| {
                record
                    .table
                    .is_some_and(|t| self.graph.table(t).spec().contains_all(filter))
            })
            .count()
    }

    /// Delete every entity whose type contains every id of `filter`,
    /// clearing whole tables at once. Per-row OnRemove actions do not fire
    /// on this fast path; component fini hooks do. Main stage only.
    pub fn delete_w_filter(&mut self, filter: &Spec) -> Result<usize> {
        if self.in_progress {
            return Err(Error::InvalidWhileIterating);
        }
        let mut deleted = 0;
        for table_id in self.graph.supporting(filter) {
            let spec = self.graph.table(table_id).spec().clone();
            for component in spec.ids() {
                let Some(hook) = self.actions.fini_hook(*component) else {
                    continue;
                };
                let position = spec.position(*component).expect("id from spec");
                let column = self
                    .graph
                    .table_mut(table_id)
                    .store_mut()
                    .column_mut(position);
                for row in 0..column.len() {
                    hook(column.cell_ptr_mut(Row::new(row)));
                }
            }
            let entities: Vec<Entity> = self.graph.table(table_id).store().entities().to_vec();
            self.graph.table_mut(table_id).store_mut().clear();
            for entity in entities {
                self.remove_record(entity);
                deleted += 1;
            }
        }
        if deleted > 0 {
            self.should_resolve = true;
        }
        Ok(deleted)
    }

    // -- reactive registration ----------------------------------------------

    /// Register an OnAdd action for a component.
    pub fn on_add(
        &mut self,
        component: Entity,
        handler: impl Fn(&mut World, &Signal) + Send + Sync + 'static,
    ) {
        self.actions
            .register(ActionKind::Add, component, Arc::new(handler));
    }

    /// Register an OnRemove action for a component.
    pub fn on_remove(
        &mut self,
        component: Entity,
        handler: impl Fn(&mut World, &Signal) + Send + Sync + 'static,
    ) {
        self.actions
            .register(ActionKind::Remove, component, Arc::new(handler));
    }

    /// Register an OnSet action for a component.
    pub fn on_set(
        &mut self,
        component: Entity,
        handler: impl Fn(&mut World, &Signal) + Send + Sync + 'static,
    ) {
        self.actions
            .register(ActionKind::Set, component, Arc::new(handler));
    }

    /// Register an OnNew action on the exact table of `spec`, fired once
    /// per newly created row after its per-component OnAdd actions.
    pub fn on_new(
        &mut self,
        spec: &Spec,
        handler: impl Fn(&mut World, &Signal) + Send + Sync + 'static,
    ) -> Result<()> {
        let table_id = self.graph.find_or_create(spec.ids(), &self.components)?;
        self.bind_fresh_tables();
        self.graph.table_mut(table_id).on_new.push(Arc::new(handler));
        Ok(())
    }

    /// Install component lifecycle hooks. A component holding owned heap
    /// data needs all three: init, fini, and copy.
    pub fn set_component_lifecycle(
        &mut self,
        component: Entity,
        init: Option<LifecycleHook>,
        fini: Option<LifecycleHook>,
        copy: Option<CopyHook>,
    ) {
        self.actions.set_lifecycle(component, init, fini, copy);
    }

    // -- queries -------------------------------------------------------------

    /// Compile a signature expression into a query, pre-bound to every
    /// matching table.
    pub fn new_query(&mut self, expr: &str) -> Result<query::Id> {
        let sig = {
            let resolve = |name: &str| self.components.lookup(name).or_else(|| self.lookup(name));
            query::expr::parse(expr, &resolve)?
        };
        self.create_query(sig, None)
    }

    /// Compile a query whose `SYSTEM.` columns fetch from `system`.
    pub fn new_system_query(&mut self, expr: &str, system: Entity) -> Result<query::Id> {
        let sig = {
            let resolve = |name: &str| self.components.lookup(name).or_else(|| self.lookup(name));
            query::expr::parse(expr, &resolve)?
        };
        self.create_query(sig, Some(system))
    }

    fn create_query(&mut self, sig: query::Signature, system: Option<Entity>) -> Result<query::Id> {
        let id = query::Id::new(self.queries.len() as u32);

        // Entities named by the signature are watched from the start, so a
        // fixed source gaining a component later still triggers rematch.
        let mut named: Vec<Entity> = sig
            .columns
            .iter()
            .filter_map(|column| match column.source {
                query::Source::Entity(entity) => Some(entity),
                _ => None,
            })
            .collect();
        named.extend(system);
        for entity in named {
            if entity != Entity::SINGLETON {
                let (record, _) = self.dir.ensure(entity);
                record.set_watched();
            }
        }

        let mut query = Query::new(sig, system);
        {
            let graph = &self.graph;
            let dir = &self.dir;
            for table in graph.tables() {
                query.bind_table(graph, dir, table);
            }
        }
        let matched: Vec<table::Id> = query.tables.iter().map(|m| m.table).collect();
        log::debug!("query {:?} bound to {} tables", id, matched.len());
        self.queries.push(query);
        for table_id in matched {
            self.graph.table_mut(table_id).matched.push(id);
        }
        self.watch_referenced();
        Ok(id)
    }

    /// A bound query.
    pub fn query(&self, id: query::Id) -> &Query {
        &self.queries[id.index()]
    }

    /// Iterate a query's row slices. `offset` skips rows across tables;
    /// `limit` truncates. Performs deferred rematch/re-resolve first.
    pub fn iter(&mut self, id: query::Id, offset: usize, limit: Option<usize>) -> query::Iter<'_> {
        self.maintain();
        query::Iter::new(&*self, id, offset, limit)
    }

    /// Typed mutable access to one owned column of a table, for processing
    /// loops that write component data.
    pub fn column_mut<T>(&mut self, table_id: table::Id, component: Entity) -> Option<&mut [T]> {
        let position = self.graph.table(table_id).spec().position(component)?;
        let column = self
            .graph
            .table_mut(table_id)
            .store_mut()
            .column_mut(position);
        assert_eq!(
            column.cell_size(),
            std::mem::size_of::<T>(),
            "value size does not match registered component size"
        );
        // SAFETY: size validated; exclusive access through &mut self.
        Some(unsafe { column.as_slice_mut::<T>() })
    }

    // -- stages --------------------------------------------------------------

    /// Create a stage with its own reserved handle range.
    pub fn create_stage(&mut self) -> Result<Stage> {
        let id = self.stage_counter;
        self.stage_counter += 1;
        let first = self.allocator.alloc_range(self.stage_range)?;
        let min = first.raw() - 1;
        Ok(Stage::new(
            id,
            Allocator::new(Some((min, min + self.stage_range))),
        ))
    }

    /// Run one cooperative step: each worker gets the read-only world and
    /// its own stage, then the driver merges the stages serially in
    /// stage-id order.
    pub fn scope_stages<F>(&mut self, writers: usize, f: F) -> Result<()>
    where
        F: Fn(&World, &mut Stage) + Send + Sync,
    {
        let mut stages = Vec::with_capacity(writers);
        for _ in 0..writers {
            stages.push(self.create_stage()?);
        }
        self.in_progress = true;
        {
            let world = &*self;
            crossbeam::thread::scope(|scope| {
                for stage in stages.iter_mut() {
                    let f = &f;
                    scope.spawn(move |_| f(world, stage));
                }
            })
            .expect("stage worker panicked");
        }
        self.in_progress = false;
        for mut stage in stages {
            self.merge_stage(&mut stage)?;
        }
        Ok(())
    }

    /// Merge a stage's buffered mutations into the main stage. Reactive
    /// actions for staged additions fire here, on the main stage.
    pub fn merge_stage(&mut self, stage: &mut Stage) -> Result<()> {
        log::trace!(
            "merging stage {} ({} dirty types)",
            stage.id(),
            stage.dirty_len()
        );
        self.allocator.advance_past(stage.alloc.last());

        for spec in stage.take_dirty() {
            let Some(mut store) = stage.take_store(&spec) else {
                continue;
            };

            // Fast path: every staged row is a brand-new entity with no
            // removals pending, so the whole store merges column-wise.
            let all_new = !spec.is_empty()
                && store.entities().iter().all(|e| {
                    *e != Entity::SINGLETON
                        && self.record(*e).is_none()
                        && !stage.is_deleted(*e)
                        && stage.removed_of(*e).is_none()
                });
            if all_new {
                let table_id = self.graph.find_or_create(spec.ids(), &self.components)?;
                self.bind_fresh_tables();
                let dst_spec = self.graph.table(table_id).spec().clone();
                let start = self
                    .graph
                    .table_mut(table_id)
                    .store_mut()
                    .merge_from(&mut store, &dst_spec, &spec);
                self.should_resolve = true;

                let count = self.graph.table(table_id).len() - start.index();
                let added: Vec<Entity> =
                    dst_spec.ids().iter().copied().filter(|id| id.is_low()).collect();
                for i in 0..count {
                    let row = Row::new(start.index() + i);
                    let entity = self.graph.table(table_id).store().entity(row);
                    self.set_record(entity, Record::located(table_id, row, false));
                }
                for i in 0..count {
                    let row = Row::new(start.index() + i);
                    let entity = self.graph.table(table_id).store().entity(row);
                    self.notify_batch(ActionKind::Add, entity, &added);
                    self.apply_overrides(entity, &added);
                    self.run_on_new(entity, table_id);
                }
                continue;
            }

            // General path: insert-or-update per staged row.
            for row in 0..store.len() {
                let entity = store.entity(Row::new(row));
                if stage.is_deleted(entity) {
                    // Shadow duplicates of a deleted entity are finalized,
                    // never moved into main.
                    for (position, id) in spec.ids().iter().enumerate() {
                        if let Some(hook) = self.actions.fini_hook(*id) {
                            hook(store.column_mut(position).cell_ptr_mut(Row::new(row)));
                        }
                    }
                    continue;
                }
                let removed = stage.removed_of(entity).cloned();
                let current = self.get_type(entity);
                let to_add = spec.difference(&current);
                self.commit(
                    entity,
                    (!to_add.is_empty()).then_some(&to_add),
                    removed.as_ref(),
                )?;

                if let Some(record) = self.record(entity) {
                    if let (Some(table_id), Some(dst_row)) = (record.table, record.row_index()) {
                        let cells = store.read_row(Row::new(row));
                        let dst_spec = self.graph.table(table_id).spec().clone();
                        // The staged bytes move ownership into main; the
                        // values they overwrite are finalized first.
                        let overwritten: Vec<Entity> = spec.intersection(&dst_spec).ids().to_vec();
                        self.run_fini_hooks(table_id, dst_row, &overwritten);
                        self.graph
                            .table_mut(table_id)
                            .store_mut()
                            .write_row(dst_row, &dst_spec, &cells, &spec);
                    }
                }
            }
        }

        // Removals staged for entities whose rows were never otherwise
        // touched; removing an already-absent component is a no-op.
        for (entity, removed) in stage.take_removed() {
            self.commit(entity, None, Some(&removed))?;
        }
        for entity in stage.take_deleted() {
            self.despawn(entity)?;
        }
        stage.clear();
        Ok(())
    }
}

impl Drop for World {
    fn drop(&mut self) {
        // Finalize every remaining cell of components with fini hooks.
        for index in 0..self.graph.len() {
            let table_id = table::Id::new(index as u32);
            let spec = self.graph.table(table_id).spec().clone();
            for component in spec.ids() {
                let Some(hook) = self.actions.fini_hook(*component) else {
                    continue;
                };
                let position = spec.position(*component).expect("id from spec");
                let column = self
                    .graph
                    .table_mut(table_id)
                    .store_mut()
                    .column_mut(position);
                for row in 0..column.len() {
                    hook(column.cell_ptr_mut(Row::new(row)));
                }
            }
        }
    }
}
