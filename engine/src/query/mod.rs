//! The query matcher.
//!
//! A query compiles a [`Signature`] into per-table bindings, eagerly: at
//! creation it scans every table, and the world binds it to new tables the
//! moment they are created. Iteration then walks the pre-bound tables and
//! yields row slices; no per-entity matching happens on the hot path.
//!
//! Per matched table the query stores, for every signature position, either
//! a 1-based index into the table's own columns (owned data), zero (optional
//! and absent, or id-only), or a negative 1-based index into the reference
//! array (data living on another entity: a base, a container, the system
//! entity or a fixed entity). References cache a resolved location and are
//! re-resolved when the world's `should_resolve` flag trips.

pub mod expr;

use fixedbitset::FixedBitSet;

use crate::builtin;
use crate::directory::Directory;
use crate::entity::Entity;
use crate::graph::Graph;
use crate::storage::column::Column as StoreColumn;
use crate::storage::table;
use crate::storage::{Row, Table};
use crate::world::World;

/// Walk depth cap for base/container searches; types are shallow DAGs.
const MAX_WALK_DEPTH: u32 = 16;

/// The identifier of a query within its world.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id(u32);

impl Id {
    /// Create a new Id with the given unique identifier.
    #[inline]
    pub const fn new(id: u32) -> Self {
        Id(id)
    }

    /// Get the index for this Id.
    #[inline]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Where a signature column's data comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// The matched entity itself, owned or inherited.
    This,
    /// The matched entity, owned only.
    Owned,
    /// Inherited from an `INSTANCEOF` base, not owned.
    Shared,
    /// A `CHILDOF` container of the matched entity.
    Container,
    /// The query's own system entity.
    System,
    /// A fixed foreign entity.
    Entity(Entity),
    /// Id only; no data is fetched.
    Empty,
    /// Like a container lookup, plus hierarchical iteration ordering.
    Cascade,
}

/// The operator of a signature column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Oper {
    /// The column must match.
    And,
    /// At least one variant must match.
    Or,
    /// The column must not match.
    Not,
    /// The column matches with or without data.
    Optional,
}

/// One column of a signature.
#[derive(Debug, Clone)]
pub struct Column {
    /// The source kind.
    pub source: Source,
    /// The operator.
    pub oper: Oper,
    /// One component id, or the variants of an OR column.
    pub ids: Vec<Entity>,
}

/// A compiled signature: the column list plus the special-entity matching
/// policy, computed once at creation.
#[derive(Debug, Clone)]
pub struct Signature {
    /// The columns, in declaration order.
    pub columns: Vec<Column>,

    /// Tables containing the `Disabled` tag match only when true.
    pub match_disabled: bool,

    /// Tables containing the `Prefab` tag match only when true.
    pub match_prefab: bool,
}

impl Signature {
    /// Build a signature, deriving the disabled/prefab policy from the
    /// columns that explicitly name those tags.
    pub fn new(columns: Vec<Column>) -> Self {
        let match_disabled = columns.iter().any(|c| c.ids.contains(&builtin::DISABLED));
        let match_prefab = columns.iter().any(|c| c.ids.contains(&builtin::PREFAB));
        Self {
            columns,
            match_disabled,
            match_prefab,
        }
    }

    /// Whether any column asks for hierarchical (cascade) ordering, and for
    /// which component.
    pub fn cascade_component(&self) -> Option<Entity> {
        self.columns
            .iter()
            .find(|c| matches!(c.source, Source::Cascade))
            .map(|c| c.ids[0])
    }
}

/// A cached non-owned data source for one matched table.
#[derive(Debug, Clone)]
pub struct Reference {
    /// The entity the data lives on (possibly resolved to a base owner).
    pub entity: Entity,

    /// The component fetched from it.
    pub component: Entity,

    /// Cached location: table, row and column position of the owning cell.
    /// Re-resolved when the world flags `should_resolve`.
    pub(crate) loc: Option<(table::Id, Row, usize)>,
}

/// One table a query is bound to.
#[derive(Debug, Clone)]
pub struct MatchedTable {
    /// The bound table.
    pub table: table::Id,

    /// Per signature position: positive = 1-based table column index, zero
    /// = optional absent or id-only, negative = 1-based reference index.
    pub columns: Vec<i32>,

    /// The concrete component chosen per position (OR columns pick the
    /// matching variant per table).
    pub components: Vec<Entity>,

    /// Cached foreign data sources.
    pub references: Vec<Reference>,

    /// Container depth for cascade ordering; zero without cascade.
    pub depth: i32,
}

/// A query: a compiled signature plus its table bindings.
pub struct Query {
    /// The compiled signature.
    sig: Signature,

    /// The entity whose components `SYSTEM.` columns fetch.
    system: Option<Entity>,

    /// Bound tables, in cascade-depth order when the signature cascades.
    pub(crate) tables: Vec<MatchedTable>,

    /// Membership bitset over table ids, guarding duplicate binds.
    matched_set: FixedBitSet,
}

impl Query {
    /// Create an unbound query.
    pub(crate) fn new(sig: Signature, system: Option<Entity>) -> Self {
        Self {
            sig,
            system,
            tables: Vec::new(),
            matched_set: FixedBitSet::new(),
        }
    }

    /// The compiled signature.
    pub fn signature(&self) -> &Signature {
        &self.sig
    }

    /// Entities referenced by this query's bindings, i.e. the entities that
    /// must be watched for rematch.
    pub(crate) fn referenced(&self) -> impl Iterator<Item = Entity> + '_ {
        self.tables
            .iter()
            .flat_map(|t| t.references.iter().map(|r| r.entity))
    }

    /// Whether the query is bound to `table`.
    pub(crate) fn is_matched(&self, table: table::Id) -> bool {
        self.matched_set.contains(table.index())
    }

    /// Drop every binding, keeping the signature.
    pub(crate) fn unbind(&mut self) {
        self.tables.clear();
        self.matched_set.clear();
    }

    /// Try to bind this query to a table. Returns whether it matched.
    pub(crate) fn bind_table(&mut self, graph: &Graph, dir: &Directory, table: &Table) -> bool {
        if self.is_matched(table.id()) {
            return true;
        }
        let Some(matched) = self.match_table(graph, dir, table) else {
            return false;
        };
        self.matched_set.grow(table.id().index() + 1);
        self.matched_set.insert(table.id().index());
        self.tables.push(matched);
        if self.sig.cascade_component().is_some() {
            self.tables.sort_by_key(|t| t.depth);
        }
        true
    }

    /// Re-resolve every cached reference location.
    pub(crate) fn resolve_refs(&mut self, graph: &Graph, dir: &Directory) {
        for matched in self.tables.iter_mut() {
            for reference in matched.references.iter_mut() {
                reference.loc = resolve_ref(graph, dir, reference.entity, reference.component, 0);
            }
        }
    }

    /// Match a table against the signature, producing its bindings.
    fn match_table(&self, graph: &Graph, dir: &Directory, table: &Table) -> Option<MatchedTable> {
        if table.id() == table::Id::ROOT {
            return None;
        }
        let flags = table.flags();
        if flags.is_prefab && !self.sig.match_prefab {
            return None;
        }
        if flags.is_disabled && !self.sig.match_disabled {
            return None;
        }

        let mut columns = Vec::with_capacity(self.sig.columns.len());
        let mut components = Vec::with_capacity(self.sig.columns.len());
        let mut references = Vec::new();

        for column in &self.sig.columns {
            let mut bound = None;
            let mut component = column.ids[0];

            match column.oper {
                Oper::And | Oper::Optional => {
                    bound = Some(bind_one(
                        column.source,
                        component,
                        table,
                        graph,
                        dir,
                        self.system,
                    ));
                }
                Oper::Not => {
                    let binding =
                        bind_one(column.source, component, table, graph, dir, self.system);
                    if !matches!(binding, Binding::Absent) {
                        return None;
                    }
                    bound = Some(Binding::IdOnly);
                }
                Oper::Or => {
                    for variant in &column.ids {
                        let binding =
                            bind_one(column.source, *variant, table, graph, dir, self.system);
                        if !matches!(binding, Binding::Absent) {
                            component = *variant;
                            bound = Some(binding);
                            break;
                        }
                    }
                    if bound.is_none() {
                        return None;
                    }
                }
            }

            let value = match bound.expect("binding computed above") {
                Binding::Column(position) => position as i32 + 1,
                Binding::Ref(entity) => {
                    references.push(Reference {
                        entity,
                        component,
                        loc: resolve_ref(graph, dir, entity, component, 0),
                    });
                    -(references.len() as i32)
                }
                Binding::IdOnly => 0,
                Binding::Absent => match column.oper {
                    Oper::Optional => 0,
                    // Cascade columns match without a container.
                    _ if matches!(column.source, Source::Cascade) => 0,
                    _ => return None,
                },
            };

            columns.push(value);
            components.push(component);
        }

        let depth = self
            .sig
            .cascade_component()
            .map(|c| cascade_depth(graph, dir, table, c, 0))
            .unwrap_or(0);

        Some(MatchedTable {
            table: table.id(),
            columns,
            components,
            references,
            depth,
        })
    }
}

/// The outcome of binding one signature position against one table.
enum Binding {
    /// Owned data at this column position of the table.
    Column(usize),
    /// Data on another entity.
    Ref(Entity),
    /// Matches, no data.
    IdOnly,
    /// Does not match.
    Absent,
}

fn bind_one(
    source: Source,
    component: Entity,
    table: &Table,
    graph: &Graph,
    dir: &Directory,
    system: Option<Entity>,
) -> Binding {
    match source {
        Source::This => match table.spec().position(component) {
            Some(position) => Binding::Column(position),
            None => match base_owner(graph, dir, table, component, 0) {
                Some(owner) => Binding::Ref(owner),
                None => Binding::Absent,
            },
        },
        Source::Owned => match table.spec().position(component) {
            Some(position) => Binding::Column(position),
            None => Binding::Absent,
        },
        Source::Shared => {
            if table.spec().contains(component) {
                return Binding::Absent;
            }
            match base_owner(graph, dir, table, component, 0) {
                Some(owner) => Binding::Ref(owner),
                None => Binding::Absent,
            }
        }
        Source::Container | Source::Cascade => {
            match container_owner(graph, dir, table, component, 0) {
                Some(owner) => Binding::Ref(owner),
                None => Binding::Absent,
            }
        }
        Source::System => match system {
            Some(entity) if entity_has(graph, dir, entity, component) => Binding::Ref(entity),
            _ => Binding::Absent,
        },
        Source::Entity(entity) => {
            if entity_has(graph, dir, entity, component) {
                Binding::Ref(entity)
            } else {
                Binding::Absent
            }
        }
        Source::Empty => Binding::IdOnly,
    }
}

/// Find the entity owning `component` among the table's `INSTANCEOF` bases,
/// walking depth-first, last-added base first.
pub(crate) fn base_owner(
    graph: &Graph,
    dir: &Directory,
    table: &Table,
    component: Entity,
    depth: u32,
) -> Option<Entity> {
    if depth >= MAX_WALK_DEPTH {
        return None;
    }
    for id in table.spec().ids().iter().rev() {
        if !id.is_instance_of() {
            continue;
        }
        let base = id.target();
        let Some(base_table) = dir.get(base).and_then(|r| r.table) else {
            continue;
        };
        let base_table = graph.table(base_table);
        if base_table.spec().contains(component) {
            return Some(base);
        }
        if let Some(owner) = base_owner(graph, dir, base_table, component, depth + 1) {
            return Some(owner);
        }
    }
    None
}

/// Find the `CHILDOF` ancestor owning `component`.
fn container_owner(
    graph: &Graph,
    dir: &Directory,
    table: &Table,
    component: Entity,
    depth: u32,
) -> Option<Entity> {
    if depth >= MAX_WALK_DEPTH {
        return None;
    }
    for id in table.spec().ids().iter() {
        if !id.is_child_of() {
            continue;
        }
        let parent = id.target();
        let Some(parent_table) = dir.get(parent).and_then(|r| r.table) else {
            continue;
        };
        let parent_table = graph.table(parent_table);
        if parent_table.spec().contains(component) {
            return Some(parent);
        }
        if let Some(owner) = container_owner(graph, dir, parent_table, component, depth + 1) {
            return Some(owner);
        }
    }
    None
}

/// The container depth of a table with respect to `component`: the longest
/// `CHILDOF` chain above it whose members carry the component.
fn cascade_depth(
    graph: &Graph,
    dir: &Directory,
    table: &Table,
    component: Entity,
    depth: u32,
) -> i32 {
    if depth >= MAX_WALK_DEPTH {
        return depth as i32;
    }
    let mut rank = 0;
    for id in table.spec().ids().iter() {
        if !id.is_child_of() {
            continue;
        }
        let Some(parent_table) = dir.get(id.target()).and_then(|r| r.table) else {
            continue;
        };
        let parent_table = graph.table(parent_table);
        let above = cascade_depth(graph, dir, parent_table, component, depth + 1);
        if parent_table.spec().contains(component) {
            rank = rank.max(above + 1);
        } else {
            rank = rank.max(above);
        }
    }
    rank
}

/// Whether an entity has a component, owned or inherited.
fn entity_has(graph: &Graph, dir: &Directory, entity: Entity, component: Entity) -> bool {
    let Some(table) = dir.get(entity).and_then(|r| r.table) else {
        return false;
    };
    let table = graph.table(table);
    table.spec().contains(component)
        || base_owner(graph, dir, table, component, 0).is_some()
}

/// Resolve the cell location of `component` on `entity`, walking to the
/// owning base when the entity inherits it.
pub(crate) fn resolve_ref(
    graph: &Graph,
    dir: &Directory,
    entity: Entity,
    component: Entity,
    depth: u32,
) -> Option<(table::Id, Row, usize)> {
    if depth >= MAX_WALK_DEPTH {
        return None;
    }
    let record = dir.get(entity)?;
    let table_id = record.table?;
    let row = record.row_index()?;
    let table = graph.table(table_id);
    if let Some(position) = table.spec().position(component) {
        return Some((table_id, row, position));
    }
    let owner = base_owner(graph, dir, table, component, depth)?;
    resolve_ref(graph, dir, owner, component, depth + 1)
}

/// A pull iterator over the row slices of a query.
///
/// `offset` consumes whole tables until exhausted, then yields a partial
/// first slice; `limit` truncates the last slice and ends iteration. A
/// processing loop may stop iteration early with [`Iter::interrupt`].
pub struct Iter<'w> {
    world: &'w World,
    query: Id,
    table_index: usize,
    offset: usize,
    limit: Option<usize>,
    interrupted_by: Option<Entity>,
    done: bool,
}

impl<'w> Iter<'w> {
    pub(crate) fn new(world: &'w World, query: Id, offset: usize, limit: Option<usize>) -> Self {
        Self {
            world,
            query,
            table_index: 0,
            offset,
            limit,
            interrupted_by: None,
            done: false,
        }
    }

    /// Stop iteration; the interrupting entity is reported to the caller.
    pub fn interrupt(&mut self, entity: Entity) {
        self.interrupted_by = Some(entity);
    }

    /// The entity an interrupted iteration stopped at, if any.
    pub fn interrupted_by(&self) -> Option<Entity> {
        self.interrupted_by
    }
}

impl<'w> Iterator for Iter<'w> {
    type Item = Slice<'w>;

    fn next(&mut self) -> Option<Slice<'w>> {
        if self.done || self.interrupted_by.is_some() {
            return None;
        }
        if self.limit == Some(0) {
            self.done = true;
            return None;
        }
        let query = self.world.query_ref(self.query);
        while self.table_index < query.tables.len() {
            let index = self.table_index;
            self.table_index += 1;

            let matched = &query.tables[index];
            let count = self.world.graph().table(matched.table).len();
            if count == 0 {
                continue;
            }
            if self.offset >= count {
                self.offset -= count;
                continue;
            }
            let first = self.offset;
            self.offset = 0;

            let available = count - first;
            let take = match self.limit {
                Some(limit) => available.min(limit),
                None => available,
            };
            if take == 0 {
                self.done = true;
                return None;
            }
            if let Some(limit) = self.limit.as_mut() {
                *limit -= take;
            }

            return Some(Slice {
                world: self.world,
                query: self.query,
                table_index: index,
                first,
                count: take,
            });
        }
        self.done = true;
        None
    }
}

/// A contiguous range of rows in one matched table.
#[derive(Clone, Copy)]
pub struct Slice<'w> {
    world: &'w World,
    query: Id,
    table_index: usize,
    first: usize,
    count: usize,
}

impl<'w> Slice<'w> {
    fn matched(&self) -> &'w MatchedTable {
        &self.world.query_ref(self.query).tables[self.table_index]
    }

    /// The table this slice iterates.
    pub fn table(&self) -> table::Id {
        self.matched().table
    }

    /// Number of rows in the slice.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the slice is empty.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The first row of the slice within its table.
    pub fn first_row(&self) -> Row {
        Row::new(self.first)
    }

    /// The entity handles of the slice's rows.
    pub fn entities(&self) -> &'w [Entity] {
        let store = self.world.graph().table(self.matched().table).store();
        &store.entities()[self.first..self.first + self.count]
    }

    /// The concrete component bound at a signature position.
    pub fn component(&self, position: usize) -> Entity {
        self.matched().components[position]
    }

    /// Whether the data at a signature position lives in the table's own
    /// columns.
    pub fn is_owned(&self, position: usize) -> bool {
        self.matched().columns[position] > 0
    }

    /// The raw column bound at a signature position, when owned.
    pub fn raw_column(&self, position: usize) -> Option<&'w StoreColumn> {
        let value = self.matched().columns[position];
        if value <= 0 {
            return None;
        }
        let store = self.world.graph().table(self.matched().table).store();
        Some(store.column(value as usize - 1))
    }

    /// The owned data at a signature position, as a typed slice over this
    /// slice's rows.
    ///
    /// # Panics
    /// Panics when the size of `T` disagrees with the registered component
    /// size.
    pub fn column<T>(&self, position: usize) -> Option<&'w [T]> {
        let column = self.raw_column(position)?;
        assert_eq!(
            std::mem::size_of::<T>(),
            column.cell_size(),
            "value size does not match registered component size"
        );
        // SAFETY: size validated; cells are initialized plain data.
        let all = unsafe { column.as_slice::<T>() };
        Some(&all[self.first..self.first + self.count])
    }

    /// The entity a reference position reads from, if the position is bound
    /// to a reference.
    pub fn source(&self, position: usize) -> Option<Entity> {
        let value = self.matched().columns[position];
        if value >= 0 {
            return None;
        }
        Some(self.matched().references[(-value) as usize - 1].entity)
    }

    /// The shared (referenced) value at a signature position.
    ///
    /// # Panics
    /// Panics when the size of `T` disagrees with the registered component
    /// size.
    pub fn shared<T>(&self, position: usize) -> Option<&'w T> {
        let value = self.matched().columns[position];
        if value >= 0 {
            return None;
        }
        let reference = &self.matched().references[(-value) as usize - 1];
        let (table, row, column) = reference.loc?;
        let column = self.world.graph().table(table).store().column(column);
        assert_eq!(
            std::mem::size_of::<T>(),
            column.cell_size(),
            "value size does not match registered component size"
        );
        // SAFETY: size validated; the location was resolved against the
        // current directory state.
        Some(unsafe { &*(column.cell_ptr(row).as_ptr() as *const T) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Spec;

    fn world_with(names: &[(&str, usize)]) -> (World, Vec<Entity>) {
        let world = World::new();
        let ids = names
            .iter()
            .map(|(name, size)| world.new_component(name, *size).unwrap())
            .collect();
        (world, ids)
    }

    #[test]
    fn not_excludes_tables_with_the_component() {
        // Given
        let (mut world, ids) = world_with(&[("Pos", 8), ("Vel", 8)]);
        let (pos, vel) = (ids[0], ids[1]);
        let lone = world.spawn(&Spec::one(pos)).unwrap();
        world.spawn(&Spec::new(vec![pos, vel])).unwrap();

        // When
        let query = world.new_query("Pos, !Vel").unwrap();
        let found: Vec<Entity> = world
            .iter(query, 0, None)
            .flat_map(|s| s.entities().to_vec())
            .collect();

        // Then
        assert_eq!(found, vec![lone]);
    }

    #[test]
    fn or_picks_the_matching_variant_per_table() {
        // Given
        let (mut world, ids) = world_with(&[("Pos", 8), ("Vel", 8)]);
        let (pos, vel) = (ids[0], ids[1]);
        world.spawn(&Spec::one(pos)).unwrap();
        world.spawn(&Spec::one(vel)).unwrap();

        // When
        let query = world.new_query("Pos|Vel").unwrap();
        let variants: Vec<Entity> = world
            .iter(query, 0, None)
            .map(|s| s.component(0))
            .collect();

        // Then - one slice per table, each with its own variant
        assert_eq!(variants.len(), 2);
        assert!(variants.contains(&pos));
        assert!(variants.contains(&vel));
    }

    #[test]
    fn optional_matches_with_and_without_data() {
        // Given
        let (mut world, ids) = world_with(&[("Pos", 8), ("Vel", 8)]);
        let (pos, vel) = (ids[0], ids[1]);
        world.spawn(&Spec::one(pos)).unwrap();
        world.spawn(&Spec::new(vec![pos, vel])).unwrap();

        // When
        let query = world.new_query("Pos, ?Vel").unwrap();
        let slices: Vec<_> = world.iter(query, 0, None).collect();

        // Then - both tables matched; the optional column is absent on one
        assert_eq!(slices.len(), 2);
        let absent = slices.iter().filter(|s| s.column::<u64>(1).is_none()).count();
        assert_eq!(absent, 1);
    }

    #[test]
    fn owned_does_not_match_inherited_components() {
        // Given - Vel lives on a base only
        let (mut world, ids) = world_with(&[("Pos", 8), ("Vel", 8)]);
        let (pos, vel) = (ids[0], ids[1]);
        let base = world.spawn(&Spec::one(vel)).unwrap();
        world
            .spawn(&Spec::new(vec![pos, base.as_instance_of()]))
            .unwrap();

        // When
        let owned = world.new_query("Pos, OWNED.Vel").unwrap();
        let this = world.new_query("Pos, Vel").unwrap();

        // Then - OWNED rejects the inherited component, SELF accepts it
        assert_eq!(world.iter(owned, 0, None).count(), 0);
        assert_eq!(world.iter(this, 0, None).count(), 1);
    }

    #[test]
    fn container_matches_through_the_parent() {
        // Given
        let (mut world, ids) = world_with(&[("Pos", 8), ("Vel", 8)]);
        let (pos, vel) = (ids[0], ids[1]);
        let parent = world.spawn(&Spec::one(pos)).unwrap();
        world.set_raw(parent, pos, &31u64.to_ne_bytes()).unwrap();
        let child = world
            .spawn(&Spec::new(vec![vel, parent.as_child_of()]))
            .unwrap();

        // When
        let query = world.new_query("Vel, CONTAINER.Pos").unwrap();
        let slices: Vec<_> = world.iter(query, 0, None).collect();

        // Then - the child matches, reading Pos from its container
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].entities(), &[child]);
        assert_eq!(slices[0].source(1), Some(parent));
        assert_eq!(slices[0].shared::<u64>(1).unwrap(), &31);
    }

    #[test]
    fn empty_source_passes_the_id_without_data() {
        // Given
        let (mut world, ids) = world_with(&[("Pos", 8), ("Vel", 8)]);
        let (pos, vel) = (ids[0], ids[1]);
        world.spawn(&Spec::one(vel)).unwrap();

        // When - the first column is id-only, the second constrains
        let query = world.new_query(".Pos, Vel").unwrap();
        let slices: Vec<_> = world.iter(query, 0, None).collect();

        // Then
        assert_eq!(slices.len(), 1);
        assert!(!slices[0].is_owned(0));
        assert_eq!(slices[0].component(0), pos);
        assert!(slices[0].column::<u64>(0).is_none());
    }

    #[test]
    fn fixed_entity_source_resolves_once() {
        // Given
        let (mut world, ids) = world_with(&[("Pos", 8), ("Conf", 8)]);
        let (pos, conf) = (ids[0], ids[1]);
        let settings = world.spawn(&Spec::one(conf)).unwrap();
        world.set_raw(settings, conf, &11u64.to_ne_bytes()).unwrap();
        world.set_name(settings, "settings").unwrap();
        world.spawn(&Spec::one(pos)).unwrap();

        // When
        let query = world.new_query("Pos, settings.Conf").unwrap();
        let slices: Vec<_> = world.iter(query, 0, None).collect();

        // Then
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].source(1), Some(settings));
        assert_eq!(slices[0].shared::<u64>(1).unwrap(), &11);
    }
}
