//! Entity handles and handle allocation.
//!
//! An [`Entity`] is an opaque 64-bit handle. The two highest bits are reserved
//! for relation flags that may be encoded directly in a handle when it appears
//! inside a type: [`Entity::INSTANCEOF`] marks an inheritance base and
//! [`Entity::CHILDOF`] marks a container. The remaining low bits are the
//! target handle. At most one flag may be set on a handle.
//!
//! Handles are issued by the [`Allocator`], which hands out monotonically
//! increasing values and never recycles them within a world.

use crate::error::{Error, Result};

/// Component ids below this threshold are "low": they get dense edge arrays
/// in the archetype graph and may carry reactive actions. Ids at or above it
/// (including every flag-bearing relation id) are "high".
pub const MAX_COMPONENTS: u64 = 1024;

/// An opaque 64-bit entity handle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entity(u64);

impl Entity {
    /// Relation flag: the target is an inheritance base of the owner.
    pub const INSTANCEOF: u64 = 1 << 63;

    /// Relation flag: the target is a container of the owner.
    pub const CHILDOF: u64 = 1 << 62;

    /// Mask extracting the target handle from a flagged id.
    pub const ENTITY_MASK: u64 = (1 << 62) - 1;

    /// Mask covering the reserved relation-flag bit range.
    pub const FLAGS_MASK: u64 = Self::INSTANCEOF | Self::CHILDOF;

    /// The null handle. Never issued by an allocator.
    pub const NULL: Entity = Entity(0);

    /// Well-known handle routed to the world's standalone singleton record.
    pub const SINGLETON: Entity = Entity(Self::ENTITY_MASK - 1);

    /// Construct a handle from a raw value.
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Entity(raw)
    }

    /// Get the raw handle value, flags included.
    #[inline]
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// Get the target handle with relation flags stripped.
    #[inline]
    pub const fn target(&self) -> Entity {
        Entity(self.0 & Self::ENTITY_MASK)
    }

    /// Get the relation-flag bits of this handle.
    #[inline]
    pub const fn flags(&self) -> u64 {
        self.0 & Self::FLAGS_MASK
    }

    /// Whether this handle carries the `INSTANCEOF` flag.
    #[inline]
    pub const fn is_instance_of(&self) -> bool {
        self.0 & Self::INSTANCEOF != 0
    }

    /// Whether this handle carries the `CHILDOF` flag.
    #[inline]
    pub const fn is_child_of(&self) -> bool {
        self.0 & Self::CHILDOF != 0
    }

    /// Whether this handle carries more than one relation flag. Such handles
    /// are invalid everywhere and are rejected at edge creation.
    #[inline]
    pub const fn has_conflicting_flags(&self) -> bool {
        self.flags() == Self::FLAGS_MASK
    }

    /// Whether this is a low id, eligible for dense edges and reactive
    /// actions. Flagged relation ids are never low.
    #[inline]
    pub const fn is_low(&self) -> bool {
        self.0 != 0 && self.0 < MAX_COMPONENTS
    }

    /// The index of a low id in dense per-component storage.
    ///
    /// # Panics
    /// Debug builds panic when the handle is not a low id.
    #[inline]
    pub fn index(&self) -> usize {
        debug_assert!(self.is_low(), "only low ids are dense-indexable");
        self.0 as usize
    }

    /// Mark this handle as an inheritance base for use inside a type.
    #[inline]
    pub const fn as_instance_of(&self) -> Entity {
        Entity(self.0 | Self::INSTANCEOF)
    }

    /// Mark this handle as a container for use inside a type.
    #[inline]
    pub const fn as_child_of(&self) -> Entity {
        Entity(self.0 | Self::CHILDOF)
    }
}

impl From<u64> for Entity {
    #[inline]
    fn from(value: u64) -> Self {
        Entity(value)
    }
}

/// Issues monotonically increasing handles within an optional `[min, max]`
/// range. Handles are never recycled; deleting an entity does not return its
/// handle to the allocator.
///
/// Callers may supply externally chosen handles (bulk loads); the allocator
/// is then advanced past them so future allocations do not collide.
#[derive(Debug, Clone)]
pub struct Allocator {
    /// The last handle issued. The high-water mark of the world.
    last: u64,

    /// Lowest handle this allocator may issue.
    min: u64,

    /// Highest handle this allocator may issue.
    max: u64,
}

impl Allocator {
    /// Construct an allocator issuing handles in `(min, max]`, starting just
    /// above the low component id range.
    pub fn new(range: Option<(u64, u64)>) -> Self {
        let (min, max) = range.unwrap_or((MAX_COMPONENTS, Entity::SINGLETON.raw() - 1));
        Self { last: min, min, max }
    }

    /// The last handle issued.
    #[inline]
    pub fn last(&self) -> Entity {
        Entity(self.last)
    }

    /// The configured range of this allocator.
    #[inline]
    pub fn range(&self) -> (u64, u64) {
        (self.min, self.max)
    }

    /// Whether a handle falls inside the configured range.
    #[inline]
    pub fn in_range(&self, entity: Entity) -> bool {
        let raw = entity.target().raw();
        raw > self.min && raw <= self.max || raw < MAX_COMPONENTS
    }

    /// Allocate the next handle.
    pub fn alloc(&mut self) -> Result<Entity> {
        if self.last >= self.max {
            return Err(Error::OutOfRange {
                entity: self.last + 1,
                min: self.min,
                max: self.max,
            });
        }
        self.last += 1;
        Ok(Entity(self.last))
    }

    /// Allocate `count` consecutive handles, returning the first. A count of
    /// zero returns the next handle without advancing.
    pub fn alloc_range(&mut self, count: u64) -> Result<Entity> {
        if self.last + count > self.max {
            return Err(Error::OutOfRange {
                entity: self.last + count,
                min: self.min,
                max: self.max,
            });
        }
        let first = self.last + 1;
        self.last += count;
        Ok(Entity(first))
    }

    /// Advance the high-water mark past an externally supplied handle so
    /// future allocations do not collide with it.
    #[inline]
    pub fn advance_past(&mut self, entity: Entity) {
        let raw = entity.target().raw();
        if raw > self.last {
            self.last = raw;
        }
    }

    /// Reconfigure the issuing range. The high-water mark is pulled up to
    /// the new minimum but never moves backwards.
    pub fn set_range(&mut self, min: u64, max: u64) {
        self.min = min;
        self.max = max;
        if self.last < min {
            self.last = min;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_flags_round_trip() {
        // Given
        let base = Entity::new(4096);

        // When
        let inherited = base.as_instance_of();
        let contained = base.as_child_of();

        // Then
        assert!(inherited.is_instance_of());
        assert!(!inherited.is_child_of());
        assert!(contained.is_child_of());
        assert_eq!(inherited.target(), base);
        assert_eq!(contained.target(), base);
        assert_eq!(base.flags(), 0);
    }

    #[test]
    fn handle_conflicting_flags_detected() {
        let bad = Entity::new(7 | Entity::INSTANCEOF | Entity::CHILDOF);
        assert!(bad.has_conflicting_flags());
        assert!(!Entity::new(7).has_conflicting_flags());
        assert!(!Entity::new(7 | Entity::INSTANCEOF).has_conflicting_flags());
    }

    #[test]
    fn low_ids_are_below_threshold() {
        assert!(Entity::new(1).is_low());
        assert!(Entity::new(MAX_COMPONENTS - 1).is_low());
        assert!(!Entity::new(MAX_COMPONENTS).is_low());
        assert!(!Entity::new(5).as_instance_of().is_low());
        assert!(!Entity::NULL.is_low());
    }

    #[test]
    fn allocator_is_monotonic() {
        // Given
        let mut allocator = Allocator::new(None);

        // When
        let mut handles = Vec::new();
        for _ in 0..100 {
            handles.push(allocator.alloc().unwrap());
        }

        // Then - strictly increasing, no duplicates
        for pair in handles.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(allocator.last(), *handles.last().unwrap());
    }

    #[test]
    fn allocator_respects_range() {
        // Given
        let mut allocator = Allocator::new(Some((5000, 5002)));

        // When / Then
        assert_eq!(allocator.alloc().unwrap(), Entity::new(5001));
        assert_eq!(allocator.alloc().unwrap(), Entity::new(5002));
        assert!(allocator.alloc().is_err());
    }

    #[test]
    fn allocator_advances_past_supplied_handles() {
        // Given
        let mut allocator = Allocator::new(None);

        // When - a caller supplies a handle well ahead of the mark
        allocator.advance_past(Entity::new(90_000));

        // Then - the next allocation does not collide
        assert_eq!(allocator.alloc().unwrap(), Entity::new(90_001));

        // And earlier handles do not move the mark backwards
        allocator.advance_past(Entity::new(10));
        assert_eq!(allocator.alloc().unwrap(), Entity::new(90_002));
    }

    #[test]
    fn allocator_range_allocation() {
        // Given
        let mut allocator = Allocator::new(None);

        // When
        let first = allocator.alloc_range(3).unwrap();

        // Then - the next single allocation follows the range
        assert_eq!(allocator.alloc().unwrap().raw(), first.raw() + 3);

        // And a zero-sized range is a no-op
        let mark = allocator.last();
        let _ = allocator.alloc_range(0).unwrap();
        assert_eq!(allocator.last(), mark);
    }
}
