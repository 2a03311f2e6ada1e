//! The archetype graph: every table in the world, connected by per-component
//! add/remove edges.
//!
//! The root table has the empty type and is the terminus of every remove
//! chain. Edges are created lazily on first traversal and are append-only:
//! once set, an edge is never rewritten to a different destination. Table
//! identity is a function of the *set* of component ids, which is what lets
//! unordered caller input resolve to canonical tables.

use std::collections::HashMap;

use crate::component::{Registry, Spec};
use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::storage::Table;
use crate::storage::table;

/// The set of tables and their edges.
pub struct Graph {
    /// All tables, indexed by id. Tables are never destroyed.
    tables: Vec<Table>,

    /// Table lookup by type.
    by_spec: HashMap<Spec, table::Id>,

    /// Tables created since the matcher last bound queries to new tables.
    fresh: Vec<table::Id>,
}

impl Graph {
    /// Create a graph holding only the root table.
    pub fn new(registry: &Registry) -> Self {
        let root = Table::new(table::Id::ROOT, Spec::EMPTY, registry);
        let mut by_spec = HashMap::new();
        by_spec.insert(Spec::EMPTY, table::Id::ROOT);
        Self {
            tables: vec![root],
            by_spec,
            fresh: Vec::new(),
        }
    }

    /// Number of tables, the root included.
    #[inline]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Whether only the root exists.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tables.len() == 1
    }

    /// The table with the given id.
    ///
    /// # Panics
    /// Panics when the id is out of bounds.
    #[inline]
    pub fn table(&self, id: table::Id) -> &Table {
        &self.tables[id.index()]
    }

    /// The mutable table with the given id.
    ///
    /// # Panics
    /// Panics when the id is out of bounds.
    #[inline]
    pub fn table_mut(&mut self, id: table::Id) -> &mut Table {
        &mut self.tables[id.index()]
    }

    /// Iterate all tables.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.iter()
    }

    /// Look up a table by its exact type.
    pub fn find(&self, spec: &Spec) -> Option<table::Id> {
        self.by_spec.get(spec).copied()
    }

    /// Tables whose type contains every id of `filter`.
    pub fn supporting(&self, filter: &Spec) -> Vec<table::Id> {
        self.tables
            .iter()
            .filter(|t| t.spec().contains_all(filter))
            .map(|t| t.id())
            .collect()
    }

    /// Tables created since the last drain, for query binding.
    pub fn drain_fresh(&mut self) -> Vec<table::Id> {
        std::mem::take(&mut self.fresh)
    }

    /// Get or create the table for an exact, already-canonical type.
    fn materialize(&mut self, spec: Spec, registry: &Registry) -> table::Id {
        if let Some(id) = self.by_spec.get(&spec) {
            return *id;
        }
        let id = table::Id::new(self.tables.len() as u32);
        log::debug!("created table {:?} for type of {} ids", id, spec.len());
        self.by_spec.insert(spec.clone(), id);
        self.tables.push(Table::new(id, spec, registry));
        self.fresh.push(id);
        id
    }

    /// Follow the add edge for `component` out of `from`, creating the
    /// destination table lazily. Adding an id the table already contains is
    /// a self-loop.
    pub fn edge_add(
        &mut self,
        from: table::Id,
        component: Entity,
        registry: &Registry,
    ) -> Result<table::Id> {
        if component.has_conflicting_flags() {
            return Err(Error::InvalidArgument(format!(
                "handle {:#x} carries both relation flags",
                component.raw()
            )));
        }
        if self.table(from).spec().contains(component) {
            self.table_mut(from).edges.set_add(component, from);
            return Ok(from);
        }
        if let Some(to) = self.table(from).edges.add(component) {
            return Ok(to);
        }

        let spec = self.table(from).spec().with(component);
        let to = self.materialize(spec, registry);
        self.table_mut(from).edges.set_add(component, to);
        self.table_mut(to).edges.set_remove(component, from);
        Ok(to)
    }

    /// Follow the remove edge for `component` out of `from`, creating the
    /// destination table lazily. Removing an absent id leaves the edge null
    /// and stays on `from`.
    pub fn edge_remove(
        &mut self,
        from: table::Id,
        component: Entity,
        registry: &Registry,
    ) -> Result<table::Id> {
        if !self.table(from).spec().contains(component) {
            return Ok(from);
        }
        if let Some(to) = self.table(from).edges.remove(component) {
            return Ok(to);
        }

        let spec = self.table(from).spec().without(component);
        let to = self.materialize(spec, registry);
        self.table_mut(from).edges.set_remove(component, to);
        self.table_mut(to).edges.set_add(component, from);
        Ok(to)
    }

    /// Resolve an arbitrary handle sequence to its canonical table,
    /// creating tables along the walk as needed.
    pub fn find_or_create(&mut self, ids: &[Entity], registry: &Registry) -> Result<table::Id> {
        let sorted = ids.windows(2).all(|pair| pair[0] < pair[1]);
        if sorted {
            return self.walk_add(ids, registry);
        }
        // Canonicalise unordered input and retry.
        let spec = Spec::new(ids.to_vec());
        self.walk_add(spec.ids(), registry)
    }

    fn walk_add(&mut self, ids: &[Entity], registry: &Registry) -> Result<table::Id> {
        let mut current = table::Id::ROOT;
        for id in ids {
            current = self.edge_add(current, *id, registry)?;
        }
        Ok(current)
    }

    /// Compute the destination table for a transition.
    ///
    /// Removals are applied before additions. `added` and `removed` collect
    /// the *effective* low-id changes, the only ones that can trigger
    /// per-component reactive actions. Returns `None` when the destination
    /// is the root.
    pub fn traverse(
        &mut self,
        start: Option<table::Id>,
        to_add: Option<&Spec>,
        to_remove: Option<&Spec>,
        registry: &Registry,
        added: &mut Vec<Entity>,
        removed: &mut Vec<Entity>,
    ) -> Result<Option<table::Id>> {
        let mut current = start.unwrap_or(table::Id::ROOT);

        if let Some(to_remove) = to_remove {
            for id in to_remove.ids() {
                if self.table(current).spec().contains(*id) {
                    if id.is_low() {
                        removed.push(*id);
                    }
                    current = self.edge_remove(current, *id, registry)?;
                }
            }
        }

        if let Some(to_add) = to_add {
            for id in to_add.ids() {
                if !self.table(current).spec().contains(*id) && id.is_low() {
                    added.push(*id);
                }
                current = self.edge_add(current, *id, registry)?;
            }
        }

        Ok((current != table::Id::ROOT).then_some(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Graph, Registry, Entity, Entity, Entity) {
        let registry = Registry::new();
        crate::builtin::register(&registry).unwrap();
        let a = registry.register("A", 4).unwrap();
        let b = registry.register("B", 4).unwrap();
        let c = registry.register("C", 4).unwrap();
        let graph = Graph::new(&registry);
        (graph, registry, a, b, c)
    }

    #[test]
    fn table_identity_is_order_independent() {
        // Given
        let (mut graph, registry, a, b, c) = setup();

        // When - the same set in three different orders
        let t1 = graph.find_or_create(&[a, b, c], &registry).unwrap();
        let t2 = graph.find_or_create(&[c, a, b], &registry).unwrap();
        let t3 = graph.find_or_create(&[b, c, a, a], &registry).unwrap();

        // Then
        assert_eq!(t1, t2);
        assert_eq!(t1, t3);
    }

    #[test]
    fn add_edge_to_contained_component_is_self_loop() {
        // Given
        let (mut graph, registry, a, _, _) = setup();
        let t = graph.find_or_create(&[a], &registry).unwrap();

        // When
        let t2 = graph.edge_add(t, a, &registry).unwrap();

        // Then
        assert_eq!(t, t2);
        assert_eq!(graph.table(t).edges.add(a), Some(t));
    }

    #[test]
    fn edges_link_both_directions() {
        // Given
        let (mut graph, registry, a, b, _) = setup();
        let ta = graph.find_or_create(&[a], &registry).unwrap();

        // When
        let tab = graph.edge_add(ta, b, &registry).unwrap();

        // Then - the new table's remove edge points back
        assert_eq!(graph.table(tab).edges.remove(b), Some(ta));
        assert_eq!(
            graph.table(tab).spec().ids(),
            graph.table(ta).spec().with(b).ids()
        );
    }

    #[test]
    fn remove_chain_terminates_at_root() {
        // Given
        let (mut graph, registry, a, b, _) = setup();
        let tab = graph.find_or_create(&[a, b], &registry).unwrap();

        // When - remove everything
        let ta = graph.edge_remove(tab, b, &registry).unwrap();
        let root = graph.edge_remove(ta, a, &registry).unwrap();

        // Then
        assert_eq!(root, table::Id::ROOT);
        assert!(graph.table(root).spec().is_empty());
    }

    #[test]
    fn removing_absent_component_skips() {
        // Given
        let (mut graph, registry, a, b, _) = setup();
        let ta = graph.find_or_create(&[a], &registry).unwrap();

        // When
        let result = graph.edge_remove(ta, b, &registry).unwrap();

        // Then - destination equals source, no edge hooked
        assert_eq!(result, ta);
        assert_eq!(graph.table(ta).edges.remove(b), None);
    }

    #[test]
    fn traverse_records_effective_low_changes_only() {
        // Given
        let (mut graph, registry, a, b, _) = setup();
        let base = Entity::new(70_000).as_instance_of();
        let start = graph.find_or_create(&[a], &registry).unwrap();

        // When - add an already-present id, a new low id and a relation id
        let mut added = Vec::new();
        let mut removed = Vec::new();
        let dst = graph
            .traverse(
                Some(start),
                Some(&Spec::new(vec![a, b, base])),
                None,
                &registry,
                &mut added,
                &mut removed,
            )
            .unwrap()
            .unwrap();

        // Then - only the genuinely new low id is reported
        assert_eq!(added, vec![b]);
        assert!(removed.is_empty());
        assert!(graph.table(dst).spec().contains(base));
        assert!(graph.table(dst).flags().has_base);
    }

    #[test]
    fn traverse_to_empty_type_returns_none() {
        // Given
        let (mut graph, registry, a, _, _) = setup();
        let ta = graph.find_or_create(&[a], &registry).unwrap();

        // When
        let mut added = Vec::new();
        let mut removed = Vec::new();
        let dst = graph
            .traverse(
                Some(ta),
                None,
                Some(&Spec::one(a)),
                &registry,
                &mut added,
                &mut removed,
            )
            .unwrap();

        // Then
        assert_eq!(dst, None);
        assert_eq!(removed, vec![a]);
    }

    #[test]
    fn conflicting_relation_flags_rejected() {
        // Given
        let (mut graph, registry, a, _, _) = setup();
        let bad = Entity::new(Entity::new(50).raw() | Entity::INSTANCEOF | Entity::CHILDOF);
        let t = graph.find_or_create(&[a], &registry).unwrap();

        // When / Then
        assert!(graph.edge_add(t, bad, &registry).is_err());
    }

    #[test]
    fn fresh_tables_are_reported_once() {
        // Given
        let (mut graph, registry, a, b, _) = setup();
        graph.drain_fresh();

        // When
        let ta = graph.find_or_create(&[a], &registry).unwrap();
        let tab = graph.find_or_create(&[a, b], &registry).unwrap();
        let fresh = graph.drain_fresh();

        // Then
        assert_eq!(fresh, vec![ta, tab]);
        assert!(graph.drain_fresh().is_empty());
    }
}
