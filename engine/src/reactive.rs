//! Reactive actions: per-component OnAdd / OnRemove / OnSet lists, optional
//! component lifecycle hooks, and per-table OnNew lists.
//!
//! Handlers receive the world mutably and may themselves add or remove
//! components. The transition engine snapshots the handler list before
//! invoking anything and re-reads the entity's row after every call, so
//! handlers moving the row they are notified about is well defined.

use std::ptr::NonNull;
use std::sync::Arc;

use crate::entity::{Entity, MAX_COMPONENTS};
use crate::storage::Row;
use crate::storage::table;
use crate::world::World;

/// What a handler is notified about.
#[derive(Debug, Clone, Copy)]
pub struct Signal {
    /// The entity that transitioned.
    pub entity: Entity,

    /// The component that triggered the action. Null for table OnNew.
    pub component: Entity,

    /// The table holding the entity at notification time.
    pub table: table::Id,

    /// The entity's row at notification time. Re-read the record if an
    /// earlier handler in the same batch may have moved it.
    pub row: Row,
}

/// A reactive action handler.
pub type Handler = Arc<dyn Fn(&mut World, &Signal) + Send + Sync>;

/// A component lifecycle hook, called with a pointer to one cell.
pub type LifecycleHook = Arc<dyn Fn(NonNull<u8>) + Send + Sync>;

/// A component copy hook, called as `(dst, src)`. Writes a fresh clone of
/// the source value into the destination cell; the destination must hold no
/// live value (uninitialized, zeroed, or already finalized). Components
/// without a copy hook are duplicated by plain byte copy, which is only
/// sound for trivially copyable values.
pub type CopyHook = Arc<dyn Fn(NonNull<u8>, NonNull<u8>) + Send + Sync>;

/// The three per-component action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// The component was added to an entity.
    Add,
    /// The component is about to be removed from an entity.
    Remove,
    /// The component's value was written.
    Set,
}

/// Per-component action lists and lifecycle hooks.
#[derive(Default)]
struct Slot {
    on_add: Vec<Handler>,
    on_remove: Vec<Handler>,
    on_set: Vec<Handler>,
    init: Option<LifecycleHook>,
    fini: Option<LifecycleHook>,
    copy: Option<CopyHook>,
}

/// Registry of reactive actions, keyed by low component id.
#[derive(Default)]
pub struct Actions {
    slots: Vec<Slot>,
}

impl Actions {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_mut(&mut self, component: Entity) -> &mut Slot {
        debug_assert!(
            component.is_low(),
            "reactive actions are limited to low component ids"
        );
        debug_assert!(component.raw() < MAX_COMPONENTS);
        let index = component.index();
        if self.slots.len() <= index {
            self.slots.resize_with(index + 1, Slot::default);
        }
        &mut self.slots[index]
    }

    fn slot(&self, component: Entity) -> Option<&Slot> {
        if !component.is_low() {
            return None;
        }
        self.slots.get(component.index())
    }

    /// Register a handler for an action kind on a component.
    pub fn register(&mut self, kind: ActionKind, component: Entity, handler: Handler) {
        let slot = self.slot_mut(component);
        match kind {
            ActionKind::Add => slot.on_add.push(handler),
            ActionKind::Remove => slot.on_remove.push(handler),
            ActionKind::Set => slot.on_set.push(handler),
        }
    }

    /// Install the lifecycle hooks for a component. `init` runs once for
    /// every newly allocated cell, `fini` once when a cell is discarded,
    /// and `copy` whenever a cell's value is duplicated (entity clones,
    /// override-from-base, shadow-store materialisation).
    pub fn set_lifecycle(
        &mut self,
        component: Entity,
        init: Option<LifecycleHook>,
        fini: Option<LifecycleHook>,
        copy: Option<CopyHook>,
    ) {
        let slot = self.slot_mut(component);
        slot.init = init;
        slot.fini = fini;
        slot.copy = copy;
    }

    /// Snapshot the handlers for an action kind. The returned list is
    /// detached from the registry, so handlers may register or remove
    /// actions while the batch runs.
    pub fn snapshot(&self, kind: ActionKind, component: Entity) -> Vec<Handler> {
        let Some(slot) = self.slot(component) else {
            return Vec::new();
        };
        match kind {
            ActionKind::Add => slot.on_add.clone(),
            ActionKind::Remove => slot.on_remove.clone(),
            ActionKind::Set => slot.on_set.clone(),
        }
    }

    /// Whether any handler is registered for an action kind on a component.
    pub fn has(&self, kind: ActionKind, component: Entity) -> bool {
        let Some(slot) = self.slot(component) else {
            return false;
        };
        match kind {
            ActionKind::Add => !slot.on_add.is_empty(),
            ActionKind::Remove => !slot.on_remove.is_empty(),
            ActionKind::Set => !slot.on_set.is_empty(),
        }
    }

    /// The init hook for a component, if installed.
    pub fn init_hook(&self, component: Entity) -> Option<LifecycleHook> {
        self.slot(component)?.init.clone()
    }

    /// The fini hook for a component, if installed.
    pub fn fini_hook(&self, component: Entity) -> Option<LifecycleHook> {
        self.slot(component)?.fini.clone()
    }

    /// The copy hook for a component, if installed.
    pub fn copy_hook(&self, component: Entity) -> Option<CopyHook> {
        self.slot(component)?.copy.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn snapshot_is_detached_from_registry() {
        // Given
        let mut actions = Actions::new();
        let component = Entity::new(5);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = calls.clone();
        actions.register(
            ActionKind::Add,
            component,
            Arc::new(move |_, _| {
                calls_in.fetch_add(1, Ordering::SeqCst);
            }),
        );

        // When
        let snapshot = actions.snapshot(ActionKind::Add, component);
        actions.register(ActionKind::Add, component, Arc::new(|_, _| {}));

        // Then - the snapshot kept its length
        assert_eq!(snapshot.len(), 1);
        assert_eq!(actions.snapshot(ActionKind::Add, component).len(), 2);
    }

    #[test]
    fn kinds_are_independent() {
        // Given
        let mut actions = Actions::new();
        let component = Entity::new(9);

        // When
        actions.register(ActionKind::Remove, component, Arc::new(|_, _| {}));

        // Then
        assert!(actions.has(ActionKind::Remove, component));
        assert!(!actions.has(ActionKind::Add, component));
        assert!(!actions.has(ActionKind::Set, component));
        assert!(actions.snapshot(ActionKind::Add, component).is_empty());
    }

    #[test]
    fn lifecycle_hooks_are_optional() {
        // Given
        let mut actions = Actions::new();
        let component = Entity::new(3);
        assert!(actions.init_hook(component).is_none());
        assert!(actions.copy_hook(component).is_none());

        // When
        actions.set_lifecycle(
            component,
            Some(Arc::new(|_| {})),
            None,
            Some(Arc::new(|_, _| {})),
        );

        // Then
        assert!(actions.init_hook(component).is_some());
        assert!(actions.fini_hook(component).is_none());
        assert!(actions.copy_hook(component).is_some());
    }

    #[test]
    fn high_ids_never_carry_actions() {
        let actions = Actions::new();
        let relation = Entity::new(12).as_instance_of();

        assert!(!actions.has(ActionKind::Add, relation));
        assert!(actions.snapshot(ActionKind::Add, relation).is_empty());
    }
}
