//! Tables: one per distinct type, holding the rows of every entity whose
//! component set is exactly that type.
//!
//! A table owns its main-stage [`ColumnStore`], its outgoing archetype-graph
//! edges, and the list of queries that matched it. Tables are created lazily
//! by the graph and never destroyed.

use std::collections::HashMap;

use crate::component::{Registry, Spec};
use crate::entity::Entity;
use crate::query;
use crate::reactive::Handler;
use crate::storage::store::ColumnStore;

/// The identifier for a table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id(u32);

impl Id {
    /// The root table, whose type is empty.
    pub const ROOT: Id = Id(0);

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

/// Boolean properties derived from a table's type at creation.
#[derive(Debug, Default, Clone, Copy)]
pub struct Flags {
    /// The type contains an `INSTANCEOF` element.
    pub has_base: bool,

    /// The type contains a `CHILDOF` element.
    pub has_parent: bool,

    /// The type contains the builtin `Prefab` tag.
    pub is_prefab: bool,

    /// The type contains the builtin `Disabled` tag.
    pub is_disabled: bool,
}

impl Flags {
    fn derive(spec: &Spec) -> Self {
        Self {
            has_base: spec.ids().iter().any(|id| id.is_instance_of()),
            has_parent: spec.ids().iter().any(|id| id.is_child_of()),
            is_prefab: spec.contains(crate::builtin::PREFAB),
            is_disabled: spec.contains(crate::builtin::DISABLED),
        }
    }
}

/// Outgoing add/remove edges, keyed by component id.
///
/// Low ids use dense arrays; high ids (entities, relation-flagged handles)
/// use hash maps. An edge, once set, is never rewritten to a different
/// destination.
#[derive(Default)]
pub struct Edges {
    add_low: Vec<Option<Id>>,
    remove_low: Vec<Option<Id>>,
    add_high: HashMap<Entity, Id>,
    remove_high: HashMap<Entity, Id>,
}

impl Edges {
    /// The add edge for `component`, if traversed before.
    pub fn add(&self, component: Entity) -> Option<Id> {
        if component.is_low() {
            self.add_low.get(component.index()).copied().flatten()
        } else {
            self.add_high.get(&component).copied()
        }
    }

    /// The remove edge for `component`, if traversed before.
    pub fn remove(&self, component: Entity) -> Option<Id> {
        if component.is_low() {
            self.remove_low.get(component.index()).copied().flatten()
        } else {
            self.remove_high.get(&component).copied()
        }
    }

    /// Record the add edge for `component`.
    pub fn set_add(&mut self, component: Entity, to: Id) {
        if component.is_low() {
            let index = component.index();
            if self.add_low.len() <= index {
                self.add_low.resize(index + 1, None);
            }
            debug_assert!(
                self.add_low[index].is_none_or(|existing| existing == to),
                "add edge rewritten to a different table"
            );
            self.add_low[index] = Some(to);
        } else {
            self.add_high.insert(component, to);
        }
    }

    /// Record the remove edge for `component`.
    pub fn set_remove(&mut self, component: Entity, to: Id) {
        if component.is_low() {
            let index = component.index();
            if self.remove_low.len() <= index {
                self.remove_low.resize(index + 1, None);
            }
            debug_assert!(
                self.remove_low[index].is_none_or(|existing| existing == to),
                "remove edge rewritten to a different table"
            );
            self.remove_low[index] = Some(to);
        } else {
            self.remove_high.insert(component, to);
        }
    }
}

/// A table: the storage for all entities of one exact type.
pub struct Table {
    /// The unique identifier for this table.
    id: Id,

    /// The sorted component id sequence identifying this table.
    spec: Spec,

    /// Properties derived from the spec.
    flags: Flags,

    /// Outgoing graph edges.
    pub(crate) edges: Edges,

    /// The main-stage column store.
    pub(crate) store: ColumnStore,

    /// Queries bound to this table.
    pub(crate) matched: Vec<query::Id>,

    /// Actions fired once per newly created row.
    pub(crate) on_new: Vec<Handler>,
}

impl Table {
    /// Create an empty table for the given type.
    pub fn new(id: Id, spec: Spec, registry: &Registry) -> Self {
        let flags = Flags::derive(&spec);
        let store = ColumnStore::new(&spec, registry);
        Self {
            id,
            spec,
            flags,
            edges: Edges::default(),
            store,
            matched: Vec::new(),
            on_new: Vec::new(),
        }
    }

    /// The unique identifier for this table.
    #[inline]
    pub fn id(&self) -> Id {
        self.id
    }

    /// The type identifying this table.
    #[inline]
    pub fn spec(&self) -> &Spec {
        &self.spec
    }

    /// The derived flags of this table.
    #[inline]
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// The main-stage column store.
    #[inline]
    pub fn store(&self) -> &ColumnStore {
        &self.store
    }

    /// The mutable main-stage column store.
    #[inline]
    pub fn store_mut(&mut self) -> &mut ColumnStore {
        &mut self.store
    }

    /// Number of rows in the main stage.
    #[inline]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the main stage holds no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// The inheritance bases named by this table's type, in type order.
    pub fn bases(&self) -> impl Iterator<Item = Entity> + '_ {
        self.spec
            .ids()
            .iter()
            .filter(|id| id.is_instance_of())
            .map(|id| id.target())
    }

    /// The containers named by this table's type, in type order.
    pub fn parents(&self) -> impl Iterator<Item = Entity> + '_ {
        self.spec
            .ids()
            .iter()
            .filter(|id| id.is_child_of())
            .map(|id| id.target())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_derived_from_spec() {
        // Given
        let registry = Registry::new();
        crate::builtin::register(&registry).unwrap();
        let pos = registry.register("Pos", 8).unwrap();

        let base = Entity::new(9000).as_instance_of();
        let parent = Entity::new(9001).as_child_of();

        // When
        let plain = Table::new(Id::new(1), Spec::one(pos), &registry);
        let inherited = Table::new(Id::new(2), Spec::new(vec![pos, base]), &registry);
        let contained = Table::new(Id::new(3), Spec::new(vec![pos, parent]), &registry);
        let prefab = Table::new(
            Id::new(4),
            Spec::new(vec![pos, crate::builtin::PREFAB]),
            &registry,
        );

        // Then
        assert!(!plain.flags().has_base && !plain.flags().has_parent);
        assert!(inherited.flags().has_base);
        assert!(contained.flags().has_parent);
        assert!(prefab.flags().is_prefab);
        assert_eq!(inherited.bases().collect::<Vec<_>>(), vec![Entity::new(9000)]);
        assert_eq!(
            contained.parents().collect::<Vec<_>>(),
            vec![Entity::new(9001)]
        );
    }

    #[test]
    fn edges_low_and_high_ids() {
        // Given
        let mut edges = Edges::default();
        let low = Entity::new(7);
        let high = Entity::new(5000).as_child_of();

        // When
        edges.set_add(low, Id::new(3));
        edges.set_remove(low, Id::new(4));
        edges.set_add(high, Id::new(5));

        // Then
        assert_eq!(edges.add(low), Some(Id::new(3)));
        assert_eq!(edges.remove(low), Some(Id::new(4)));
        assert_eq!(edges.add(high), Some(Id::new(5)));
        assert_eq!(edges.remove(high), None);
        assert_eq!(edges.add(Entity::new(8)), None);
    }
}
