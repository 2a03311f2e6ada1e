//! Stages: per-writer shadow stores that buffer mutations for later merge.
//!
//! A stage never touches the shared archetype graph. Its shadow stores are
//! keyed by type (the staged entity's full component set), so a worker can
//! stage a transition whose table does not exist yet; the driver creates the
//! table when the stage merges. Staged mutations are visible only through
//! the stage's own `get`/`has`; the main stage stays read-only for the
//! duration of a step.

use std::collections::{HashMap, HashSet};

use crate::component::Spec;
use crate::entity::{Allocator, Entity};
use crate::error::{Error, Result};
use crate::storage::{ColumnStore, Row};
use crate::world::World;

/// Where a staged entity lives within its stage.
#[derive(Debug, Clone)]
struct StageRecord {
    /// The entity's full staged type; the key of its shadow store.
    spec: Spec,

    /// The row in that store.
    row: usize,
}

/// A per-writer shadow of the world.
pub struct Stage {
    /// Stage identifier; merge order follows it.
    id: u32,

    /// Shadow entity directory. Never pointer-cached across calls.
    dir: HashMap<Entity, StageRecord>,

    /// Shadow stores, keyed by staged type.
    stores: HashMap<Spec, ColumnStore>,

    /// Types touched this step, in first-touch order; drives the merge.
    dirty: Vec<Spec>,

    /// Per-entity remove-on-merge sets, so `get`/`has` see the semantic
    /// delete before merge.
    removed: HashMap<Entity, Spec>,

    /// Entities deleted in this stage.
    deleted: HashSet<Entity>,

    /// Handle allocator over this stage's reserved range.
    pub(crate) alloc: Allocator,
}

impl Stage {
    /// Create a stage over a pre-reserved handle range.
    pub(crate) fn new(id: u32, alloc: Allocator) -> Self {
        Self {
            id,
            dir: HashMap::new(),
            stores: HashMap::new(),
            dirty: Vec::new(),
            removed: HashMap::new(),
            deleted: HashSet::new(),
            alloc,
        }
    }

    /// The stage identifier.
    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Number of types touched this step.
    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    /// The entity's current type as seen by this stage.
    fn current_spec(&self, world: &World, entity: Entity) -> Spec {
        if self.deleted.contains(&entity) {
            return Spec::EMPTY;
        }
        if let Some(staged) = self.dir.get(&entity) {
            return staged.spec.clone();
        }
        let spec = world.get_type(entity);
        match self.removed.get(&entity) {
            Some(removed) => spec.difference(removed),
            None => spec,
        }
    }

    fn store_for(&mut self, world: &World, spec: &Spec) -> &mut ColumnStore {
        if !self.stores.contains_key(spec) {
            self.stores
                .insert(spec.clone(), ColumnStore::new(spec, world.components()));
            self.dirty.push(spec.clone());
        }
        self.stores.get_mut(spec).expect("store inserted above")
    }

    /// Give the entity a shadow row, duplicating its main-stage cells on
    /// first touch (through each component's copy hook, so the main row
    /// keeps ownership of its values). Writes then land in the stage
    /// instead of the main store.
    fn materialize(&mut self, world: &World, entity: Entity) {
        if self.dir.contains_key(&entity) {
            return;
        }
        let spec = self.current_spec(world, entity);
        let store = self.store_for(world, &spec);
        let (row, _) = store.insert(entity);
        world.clone_row_into(entity, store, row, &spec);
        self.dir.insert(
            entity,
            StageRecord {
                spec,
                row: row.index(),
            },
        );
    }

    /// Allocate a handle and stage the entity with the given type.
    pub fn spawn(&mut self, world: &World, spec: &Spec) -> Result<Entity> {
        let entity = self.alloc.alloc()?;
        self.transition(world, entity, Some(spec), None)?;
        Ok(entity)
    }

    /// Stage adding components to an entity.
    pub fn add(&mut self, world: &World, entity: Entity, spec: &Spec) -> Result<bool> {
        self.transition(world, entity, Some(spec), None)
    }

    /// Stage removing components from an entity.
    pub fn remove(&mut self, world: &World, entity: Entity, spec: &Spec) -> Result<bool> {
        self.transition(world, entity, None, Some(spec))
    }

    /// Stage a combined addition/removal as one transition.
    pub fn add_remove(
        &mut self,
        world: &World,
        entity: Entity,
        to_add: &Spec,
        to_remove: &Spec,
    ) -> Result<bool> {
        self.transition(world, entity, Some(to_add), Some(to_remove))
    }

    /// Stage deleting an entity. Visible to this stage immediately; applied
    /// to the main stage at merge. The entity's shadow cells are finalized;
    /// the main-stage cells are finalized by the merge.
    pub fn despawn(&mut self, world: &World, entity: Entity) {
        if let Some(staged) = self.dir.remove(&entity) {
            let store = self.stores.get_mut(&staged.spec).expect("staged store");
            for (position, id) in staged.spec.ids().iter().enumerate() {
                if let Some(hook) = world.fini_hook_of(*id) {
                    hook(store.column_mut(position).cell_ptr_mut(Row::new(staged.row)));
                }
            }
            if let Some(moved) = store.delete(Row::new(staged.row)) {
                if let Some(other) = self.dir.get_mut(&moved) {
                    other.row = staged.row;
                }
            }
        }
        self.removed.remove(&entity);
        self.deleted.insert(entity);
    }

    /// Bulk deletion by filter is a main-stage operation; its staged
    /// semantics are deliberately unspecified.
    pub fn delete_w_filter(&mut self, _filter: &Spec) -> Result<usize> {
        Err(Error::UnsupportedOnStage("delete_w_filter"))
    }

    /// Stage writing a component value, adding the component if absent.
    pub fn set_raw(
        &mut self,
        world: &World,
        entity: Entity,
        component: Entity,
        bytes: &[u8],
    ) -> Result<()> {
        let info = world
            .components()
            .get(component)
            .ok_or(Error::NotRegistered(component))?;
        if bytes.len() != info.size() {
            return Err(Error::TypeMismatch {
                component,
                registered: info.size(),
                provided: bytes.len(),
            });
        }
        self.materialize(world, entity);
        let staged_has = self
            .dir
            .get(&entity)
            .is_some_and(|staged| staged.spec.contains(component));
        if !staged_has {
            self.transition(world, entity, Some(&Spec::one(component)), None)?;
        }
        let staged = self.dir.get(&entity).expect("staged by materialize");
        let position = staged.spec.position(component).expect("component staged");
        let row = Row::new(staged.row);
        self.stores
            .get_mut(&staged.spec)
            .expect("staged store")
            .column_mut(position)
            .write_bytes(row, bytes);
        Ok(())
    }

    /// Read a component as this stage sees it: staged value first, then the
    /// main stage masked by staged removals.
    pub fn get_raw<'a>(
        &'a self,
        world: &'a World,
        entity: Entity,
        component: Entity,
    ) -> Option<&'a [u8]> {
        if self.deleted.contains(&entity) {
            return None;
        }
        if let Some(staged) = self.dir.get(&entity) {
            let position = staged.spec.position(component)?;
            let store = self.stores.get(&staged.spec)?;
            return Some(store.column(position).read_bytes(Row::new(staged.row)));
        }
        if self
            .removed
            .get(&entity)
            .is_some_and(|removed| removed.contains(component))
        {
            return None;
        }
        world.get_raw(entity, component)
    }

    /// Whether the entity has every id of `spec`, as this stage sees it.
    pub fn has(&self, world: &World, entity: Entity, spec: &Spec) -> bool {
        if self.deleted.contains(&entity) {
            return false;
        }
        if let Some(staged) = self.dir.get(&entity) {
            return staged.spec.contains_all(spec);
        }
        if let Some(removed) = self.removed.get(&entity) {
            if spec.ids().iter().any(|id| removed.contains(*id)) {
                return false;
            }
        }
        world.has(entity, spec)
    }

    /// Move a staged entity to its new staged type, materializing the
    /// shadow row on first touch (copying the main row's cells).
    fn transition(
        &mut self,
        world: &World,
        entity: Entity,
        to_add: Option<&Spec>,
        to_remove: Option<&Spec>,
    ) -> Result<bool> {
        if let Some(add) = to_add {
            for id in add.ids() {
                if id.has_conflicting_flags() {
                    return Err(Error::InvalidArgument(format!(
                        "handle {:#x} carries both relation flags",
                        id.raw()
                    )));
                }
            }
        }
        self.deleted.remove(&entity);

        let current = self.current_spec(world, entity);
        let mut next = current.clone();
        if let Some(remove) = to_remove {
            next = next.difference(remove);
        }
        if let Some(add) = to_add {
            next = next.merge(add);
        }

        // Remove-on-merge bookkeeping: removals of components the main
        // stage owns must survive until merge; re-adding cancels them.
        if let Some(remove) = to_remove {
            let main_spec = world.get_type(entity);
            let entry = self.removed.entry(entity).or_default();
            for id in remove.ids() {
                if main_spec.contains(*id) {
                    *entry = entry.with(*id);
                }
            }
        }
        if let Some(add) = to_add {
            if let Some(entry) = self.removed.get_mut(&entity) {
                for id in add.ids() {
                    *entry = entry.without(*id);
                }
                if entry.is_empty() {
                    self.removed.remove(&entity);
                }
            }
        }

        let staged = self.dir.get(&entity).cloned();
        if let Some(staged) = &staged {
            if staged.spec == next {
                return Ok(false);
            }
        } else if next == current && world.contains(entity) {
            return Ok(false);
        }

        // Source cells for a staged-to-staged move. The old shadow row is
        // retired without drops, so its bytes transfer ownership; cells of
        // components the transition drops are finalized here instead.
        let staged_cells = staged.as_ref().map(|staged| {
            let store = self.stores.get(&staged.spec).expect("staged store");
            (store.read_row(Row::new(staged.row)), staged.spec.clone())
        });
        if let Some(staged) = &staged {
            let dropped = staged.spec.difference(&next);
            for id in dropped.ids() {
                let Some(hook) = world.fini_hook_of(*id) else {
                    continue;
                };
                let position = staged.spec.position(*id).expect("id from spec");
                let store = self.stores.get_mut(&staged.spec).expect("staged store");
                hook(store.column_mut(position).cell_ptr_mut(Row::new(staged.row)));
            }
        }

        // Retire the old staged row.
        if let Some(staged) = &staged {
            let store = self.stores.get_mut(&staged.spec).expect("staged store");
            if let Some(moved) = store.delete(Row::new(staged.row)) {
                if let Some(other) = self.dir.get_mut(&moved) {
                    other.row = staged.row;
                }
            }
        }

        // Insert the new staged row and carry the surviving cells over. On
        // first touch the main row is duplicated through the copy hooks and
        // keeps ownership of its own values.
        let store = self.store_for(world, &next);
        let (row, _) = store.insert(entity);
        match staged_cells {
            Some((cells, source_spec)) => store.write_row(row, &next, &cells, &source_spec),
            None => world.clone_row_into(entity, store, row, &next),
        }
        self.dir.insert(
            entity,
            StageRecord {
                spec: next,
                row: row.index(),
            },
        );
        Ok(true)
    }

    // Merge-side accessors, consumed by the driver in stage-id order.

    pub(crate) fn take_dirty(&mut self) -> Vec<Spec> {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn take_store(&mut self, spec: &Spec) -> Option<ColumnStore> {
        self.stores.remove(spec)
    }

    pub(crate) fn is_deleted(&self, entity: Entity) -> bool {
        self.deleted.contains(&entity)
    }

    pub(crate) fn removed_of(&self, entity: Entity) -> Option<&Spec> {
        self.removed.get(&entity)
    }

    pub(crate) fn take_deleted(&mut self) -> Vec<Entity> {
        self.deleted.drain().collect()
    }

    pub(crate) fn take_removed(&mut self) -> Vec<(Entity, Spec)> {
        self.removed.drain().collect()
    }

    /// Drop all shadow state. The stage is ready for the next step.
    pub(crate) fn clear(&mut self) {
        for store in self.stores.values_mut() {
            store.clear();
        }
        self.stores.clear();
        self.dir.clear();
        self.dirty.clear();
        self.removed.clear();
        self.deleted.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world_with_components() -> (World, Entity, Entity) {
        let world = World::new();
        let pos = world.new_component("Pos", 8).unwrap();
        let vel = world.new_component("Vel", 8).unwrap();
        (world, pos, vel)
    }

    fn test_stage(world: &mut World) -> Stage {
        world.create_stage().unwrap()
    }

    #[test]
    fn staged_mutations_are_invisible_to_main() {
        // Given
        let (mut world, pos, _) = world_with_components();
        let entity = world.spawn(&Spec::EMPTY).unwrap();
        let mut stage = test_stage(&mut world);

        // When
        stage
            .set_raw(&world, entity, pos, &7u64.to_ne_bytes())
            .unwrap();

        // Then - the stage sees it, the main stage does not
        assert!(stage.has(&world, entity, &Spec::one(pos)));
        assert!(!world.has(entity, &Spec::one(pos)));
        assert_eq!(
            stage.get_raw(&world, entity, pos),
            Some(&7u64.to_ne_bytes()[..])
        );
        assert_eq!(world.get_raw(entity, pos), None);
    }

    #[test]
    fn staged_removal_masks_main_component() {
        // Given
        let (mut world, pos, _) = world_with_components();
        let entity = world.spawn(&Spec::one(pos)).unwrap();
        world.set_raw(entity, pos, &3u64.to_ne_bytes()).unwrap();
        let mut stage = test_stage(&mut world);

        // When
        stage.remove(&world, entity, &Spec::one(pos)).unwrap();

        // Then - the semantic delete is visible before merge
        assert!(!stage.has(&world, entity, &Spec::one(pos)));
        assert_eq!(stage.get_raw(&world, entity, pos), None);
        assert!(world.has(entity, &Spec::one(pos)));

        // And - re-adding cancels the remove-on-merge entry
        stage.add(&world, entity, &Spec::one(pos)).unwrap();
        assert!(stage.has(&world, entity, &Spec::one(pos)));
        assert!(stage.removed_of(entity).is_none());
    }

    #[test]
    fn first_touch_copies_main_row_cells() {
        // Given
        let (mut world, pos, vel) = world_with_components();
        let entity = world.spawn(&Spec::one(pos)).unwrap();
        world.set_raw(entity, pos, &42u64.to_ne_bytes()).unwrap();
        let mut stage = test_stage(&mut world);

        // When - stage a transition that keeps Pos
        stage.add(&world, entity, &Spec::one(vel)).unwrap();

        // Then - the staged row carries the main value of Pos
        assert_eq!(
            stage.get_raw(&world, entity, pos),
            Some(&42u64.to_ne_bytes()[..])
        );
    }

    #[test]
    fn staged_despawn_hides_the_entity() {
        // Given
        let (mut world, pos, _) = world_with_components();
        let entity = world.spawn(&Spec::one(pos)).unwrap();
        let mut stage = test_stage(&mut world);

        // When
        stage.despawn(&world, entity);

        // Then
        assert!(!stage.has(&world, entity, &Spec::one(pos)));
        assert_eq!(stage.get_raw(&world, entity, pos), None);
        assert!(world.has(entity, &Spec::one(pos)));
    }

    #[test]
    fn stage_spawn_uses_reserved_range() {
        // Given
        let (mut world, pos, _) = world_with_components();
        let before = world.last_handle();
        let mut stage = test_stage(&mut world);

        // When
        let staged_entity = stage.spawn(&world, &Spec::one(pos)).unwrap();

        // Then - the handle exceeds everything the driver issued
        assert!(staged_entity.raw() > before.raw());
        assert!(stage.has(&world, staged_entity, &Spec::one(pos)));
        assert!(!world.contains(staged_entity));
    }

    #[test]
    fn repeated_add_is_single_dirty_type() {
        // Given
        let (mut world, pos, _) = world_with_components();
        let mut stage = test_stage(&mut world);
        let a = stage.spawn(&world, &Spec::one(pos)).unwrap();
        let b = stage.spawn(&world, &Spec::one(pos)).unwrap();

        // When - adding the same component again is a no-op
        let changed = stage.add(&world, a, &Spec::one(pos)).unwrap();

        // Then
        assert!(!changed);
        assert_eq!(stage.dirty_len(), 1);
        assert!(stage.has(&world, b, &Spec::one(pos)));
    }
}
