//! Builtin component ids, registered by every world at init in a fixed
//! order so their handles are compile-time constants.

use crate::component::Registry;
use crate::entity::Entity;
use crate::error::Result;

/// Tag excluding an entity from queries unless the signature names it.
/// Prefab entities serve as shared templates for `INSTANCEOF` instances.
pub const PREFAB: Entity = Entity::new(1);

/// Tag excluding an entity from queries unless the signature names it.
pub const DISABLED: Entity = Entity::new(2);

/// The builtin name component.
pub const NAME: Entity = Entity::new(3);

/// A human-readable entity name, used by expression parsing and lookup.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Name {
    /// The name itself.
    pub value: String,
}

impl Name {
    /// Construct a name from anything string-like.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

/// Register the builtin components. Must run before any other registration
/// so the constant handles above hold.
pub(crate) fn register(registry: &Registry) -> Result<()> {
    let prefab = registry.register("Prefab", 0)?;
    let disabled = registry.register("Disabled", 0)?;
    let name = registry.register_aligned(
        "Name",
        std::mem::size_of::<Name>(),
        std::mem::align_of::<Name>(),
    )?;
    assert_eq!(prefab, PREFAB, "builtin registration order violated");
    assert_eq!(disabled, DISABLED, "builtin registration order violated");
    assert_eq!(name, NAME, "builtin registration order violated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_get_their_reserved_ids() {
        // Given
        let registry = Registry::new();

        // When
        register(&registry).unwrap();

        // Then
        assert_eq!(registry.lookup("Prefab"), Some(PREFAB));
        assert_eq!(registry.lookup("Disabled"), Some(DISABLED));
        assert_eq!(registry.lookup("Name"), Some(NAME));
        assert_eq!(registry.size_of(PREFAB), 0);
        assert_eq!(registry.size_of(NAME), std::mem::size_of::<Name>());
    }
}
