//! Component identity and the type of a table.
//!
//! A component is any entity handle that has been registered with a name and
//! a byte size. Registration is idempotent by name; re-registering a name
//! with a different size is an error. Relation-flagged handles and high ids
//! may appear in a type but never carry data; their columns are zero-sized
//! markers.
//!
//! A [`Spec`] is the *type* of a table: an ordered, deduplicated sequence of
//! handles. Two specs are equal iff they contain the same sequence, which
//! makes the spec usable as a hash key identifying a table.

use std::alloc::Layout;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::entity::{Entity, MAX_COMPONENTS};
use crate::error::{Error, Result};

/// Metadata about a registered component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Info {
    /// The component's handle.
    id: Entity,

    /// Stored size in bytes. Zero-sized components are markers.
    size: usize,

    /// Alignment of a stored cell. Always divides `size` so cells can be
    /// indexed by `row * size`.
    align: usize,
}

impl Info {
    /// The component's handle.
    #[inline]
    pub fn id(&self) -> Entity {
        self.id
    }

    /// The stored size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// The memory layout of one cell.
    #[inline]
    pub fn layout(&self) -> Layout {
        // Size is validated against align at registration.
        Layout::from_size_align(self.size, self.align).expect("invalid component layout")
    }

    /// Whether this component stores no data.
    #[inline]
    pub fn is_zero_sized(&self) -> bool {
        self.size == 0
    }
}

/// Pick the largest power-of-two alignment that divides `size`, capped at 16.
/// Raw registrations only record a size; the cap matches what a general
/// purpose allocator would hand out.
fn align_for(size: usize) -> usize {
    if size == 0 {
        1
    } else {
        1 << size.trailing_zeros().min(4)
    }
}

/// Registry of component ids.
///
/// Reads are lock-free through the name map; the dense info table takes a
/// lock only on registration. Component ids are issued from the low id
/// space `[1, MAX_COMPONENTS)`.
pub struct Registry {
    /// Component name to handle. Lock-free reads via sharded concurrent map.
    by_name: DashMap<String, Entity>,

    /// Dense info slots indexed by low id.
    infos: RwLock<Vec<Option<Info>>>,

    /// Names parallel to `infos`, for expression printing.
    names: RwLock<Vec<Option<String>>>,

    /// Next component id to issue.
    next_id: AtomicU64,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Create an empty registry. Id 0 is reserved as the null handle.
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            infos: RwLock::new(Vec::new()),
            names: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a component by name and size, returning its handle.
    ///
    /// Registering the same name twice with the same size returns the
    /// existing handle. A different size is an error.
    pub fn register(&self, name: &str, size: usize) -> Result<Entity> {
        self.register_aligned(name, size, align_for(size))
    }

    /// Register a component with an explicit alignment. Used by the typed
    /// layer, which knows the real layout of the value.
    pub fn register_aligned(&self, name: &str, size: usize, align: usize) -> Result<Entity> {
        if let Some(existing) = self.by_name.get(name) {
            let info = self.get(*existing).expect("name map entry without info");
            if info.size() != size {
                return Err(Error::AlreadyRegistered {
                    name: name.to_string(),
                    existing: info.size(),
                    requested: size,
                });
            }
            return Ok(*existing);
        }
        if size % align != 0 && size != 0 {
            return Err(Error::InvalidArgument(format!(
                "size {size} not a multiple of alignment {align}"
            )));
        }

        let raw = self.next_id.fetch_add(1, Ordering::Relaxed);
        if raw >= MAX_COMPONENTS {
            return Err(Error::InvalidArgument(format!(
                "component id space exhausted registering '{name}'"
            )));
        }
        let id = Entity::new(raw);

        let mut infos = self.infos.write().expect("component registry poisoned");
        let mut names = self.names.write().expect("component registry poisoned");
        let index = id.index();
        if infos.len() <= index {
            infos.resize(index + 1, None);
            names.resize(index + 1, None);
        }
        infos[index] = Some(Info { id, size, align });
        names[index] = Some(name.to_string());
        drop(names);
        drop(infos);

        self.by_name.insert(name.to_string(), id);
        log::debug!("registered component '{name}' (size {size}) as {raw}");
        Ok(id)
    }

    /// Get the info for a registered component handle.
    pub fn get(&self, id: Entity) -> Option<Info> {
        if !id.is_low() {
            return None;
        }
        let infos = self.infos.read().expect("component registry poisoned");
        infos.get(id.index()).copied().flatten()
    }

    /// The stored size of an id, zero when the id carries no data. Flagged
    /// relation ids and unregistered handles are zero-sized markers.
    #[inline]
    pub fn size_of(&self, id: Entity) -> usize {
        self.get(id).map_or(0, |info| info.size())
    }

    /// Layout of one cell for an arbitrary type element.
    pub fn cell_layout(&self, id: Entity) -> Layout {
        match self.get(id) {
            Some(info) => info.layout(),
            None => Layout::from_size_align(0, 1).expect("zero layout"),
        }
    }

    /// Resolve a component by name.
    pub fn lookup(&self, name: &str) -> Option<Entity> {
        self.by_name.get(name).map(|id| *id)
    }

    /// The registered name for a handle.
    pub fn name_of(&self, id: Entity) -> Option<String> {
        if !id.is_low() {
            return None;
        }
        let names = self.names.read().expect("component registry poisoned");
        names.get(id.index()).cloned().flatten()
    }
}

/// The type of a table: an ordered, deduplicated sequence of handles.
///
/// The sequence is strictly increasing when interpreted as unsigned
/// integers, so equality of specs is equality of sets and the spec can be
/// used directly as a hash key for table identity.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct Spec {
    ids: Vec<Entity>,
}

impl Spec {
    /// The empty type, identifying the root table.
    pub const EMPTY: Self = Spec { ids: Vec::new() };

    /// Construct a spec from arbitrary handles; sorts and deduplicates.
    pub fn new(ids: impl Into<Vec<Entity>>) -> Self {
        let mut ids = ids.into();
        ids.sort_unstable();
        ids.dedup();
        ids.shrink_to_fit();
        Self { ids }
    }

    /// Construct a spec from a single handle.
    #[inline]
    pub fn one(id: Entity) -> Self {
        Self { ids: vec![id] }
    }

    /// The handles in this spec, strictly increasing.
    #[inline]
    pub fn ids(&self) -> &[Entity] {
        &self.ids
    }

    /// Number of handles in the spec.
    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the spec is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether the spec contains the exact handle (flags included).
    #[inline]
    pub fn contains(&self, id: Entity) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    /// The position of a handle within the spec.
    #[inline]
    pub fn position(&self, id: Entity) -> Option<usize> {
        self.ids.binary_search(&id).ok()
    }

    /// Whether this spec contains every handle of `other`.
    pub fn contains_all(&self, other: &Spec) -> bool {
        other.ids.iter().all(|id| self.contains(*id))
    }

    /// A new spec with `id` inserted in order. Inserting a handle that is
    /// already present returns an identical spec.
    pub fn with(&self, id: Entity) -> Spec {
        match self.ids.binary_search(&id) {
            Ok(_) => self.clone(),
            Err(at) => {
                let mut ids = self.ids.clone();
                ids.insert(at, id);
                Spec { ids }
            }
        }
    }

    /// A new spec with `id` removed. Removing an absent handle returns an
    /// identical spec.
    pub fn without(&self, id: Entity) -> Spec {
        match self.ids.binary_search(&id) {
            Ok(at) => {
                let mut ids = self.ids.clone();
                ids.remove(at);
                Spec { ids }
            }
            Err(_) => self.clone(),
        }
    }

    /// The union of two specs.
    pub fn merge(&self, other: &Spec) -> Spec {
        let mut ids = Vec::with_capacity(self.ids.len() + other.ids.len());
        ids.extend_from_slice(&self.ids);
        ids.extend_from_slice(&other.ids);
        Spec::new(ids)
    }

    /// The handles of this spec that are absent from `other`.
    pub fn difference(&self, other: &Spec) -> Spec {
        Spec {
            ids: self
                .ids
                .iter()
                .copied()
                .filter(|id| !other.contains(*id))
                .collect(),
        }
    }

    /// Handles present in both specs, in order.
    pub fn intersection(&self, other: &Spec) -> Spec {
        Spec {
            ids: self
                .ids
                .iter()
                .copied()
                .filter(|id| other.contains(*id))
                .collect(),
        }
    }
}

impl From<Vec<Entity>> for Spec {
    #[inline]
    fn from(value: Vec<Entity>) -> Self {
        Spec::new(value)
    }
}

impl FromIterator<Entity> for Spec {
    fn from_iter<I: IntoIterator<Item = Entity>>(iter: I) -> Self {
        Spec::new(iter.into_iter().collect::<Vec<_>>())
    }
}

#[cfg(test)]
mod tests {
    use std::hash::{DefaultHasher, Hash, Hasher};

    use super::*;

    #[test]
    fn register_is_idempotent_by_name() {
        // Given
        let registry = Registry::new();

        // When
        let a = registry.register("Position", 8).unwrap();
        let b = registry.register("Position", 8).unwrap();

        // Then
        assert_eq!(a, b);
        assert_eq!(registry.size_of(a), 8);
        assert_eq!(registry.lookup("Position"), Some(a));
    }

    #[test]
    fn register_different_size_is_error() {
        // Given
        let registry = Registry::new();
        registry.register("Position", 8).unwrap();

        // When
        let result = registry.register("Position", 16);

        // Then
        assert!(matches!(result, Err(Error::AlreadyRegistered { .. })));
    }

    #[test]
    fn unregistered_ids_are_zero_sized() {
        let registry = Registry::new();
        let id = registry.register("Tag", 0).unwrap();

        assert_eq!(registry.size_of(id), 0);
        assert_eq!(registry.size_of(Entity::new(999)), 0);
        assert_eq!(registry.size_of(Entity::new(40_000).as_instance_of()), 0);
    }

    #[test]
    fn component_names_resolve_both_ways() {
        let registry = Registry::new();
        let id = registry.register("Velocity", 8).unwrap();

        assert_eq!(registry.name_of(id).as_deref(), Some("Velocity"));
        assert_eq!(registry.lookup("Velocity"), Some(id));
        assert_eq!(registry.lookup("Missing"), None);
    }

    #[test]
    fn spec_order_is_canonical() {
        // Given
        let a = Entity::new(3);
        let b = Entity::new(7);
        let c = Entity::new(11);

        // When
        let spec1 = Spec::new(vec![b, a, c]);
        let spec2 = Spec::new(vec![a, b, c, b]);

        // Then - same set, same spec, same hash
        assert_eq!(spec1, spec2);
        let mut h1 = DefaultHasher::new();
        spec1.hash(&mut h1);
        let mut h2 = DefaultHasher::new();
        spec2.hash(&mut h2);
        assert_eq!(h1.finish(), h2.finish());
    }

    #[test]
    fn spec_with_and_without() {
        // Given
        let spec = Spec::new(vec![Entity::new(2), Entity::new(9)]);

        // When / Then
        let grown = spec.with(Entity::new(5));
        assert_eq!(
            grown.ids(),
            &[Entity::new(2), Entity::new(5), Entity::new(9)]
        );
        assert_eq!(grown.with(Entity::new(5)), grown);

        let shrunk = grown.without(Entity::new(2));
        assert_eq!(shrunk.ids(), &[Entity::new(5), Entity::new(9)]);
        assert_eq!(shrunk.without(Entity::new(999)), shrunk);
    }

    #[test]
    fn spec_set_operations() {
        let left = Spec::new(vec![Entity::new(1), Entity::new(2), Entity::new(3)]);
        let right = Spec::new(vec![Entity::new(2), Entity::new(4)]);

        assert_eq!(
            left.merge(&right).ids(),
            &[
                Entity::new(1),
                Entity::new(2),
                Entity::new(3),
                Entity::new(4)
            ]
        );
        assert_eq!(
            left.difference(&right).ids(),
            &[Entity::new(1), Entity::new(3)]
        );
        assert_eq!(left.intersection(&right).ids(), &[Entity::new(2)]);
        assert!(left.contains_all(&Spec::one(Entity::new(3))));
        assert!(!left.contains_all(&right));
    }

    #[test]
    fn flagged_handles_are_distinct_spec_entries() {
        // A base handle and the same handle flagged as INSTANCEOF are
        // different type elements.
        let base = Entity::new(5000);
        let spec = Spec::new(vec![base, base.as_instance_of()]);

        assert_eq!(spec.len(), 2);
        assert!(spec.contains(base));
        assert!(spec.contains(base.as_instance_of()));
    }
}
