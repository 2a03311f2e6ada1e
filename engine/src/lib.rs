//! An archetype-based entity–component store.
//!
//! Entities are opaque 64-bit handles; components are plain data registered
//! by name and size. Entities that share the exact same component set live
//! together in a table, with each component stored as a parallel column
//! array for cache-friendly bulk iteration.
//!
//! # Architecture
//!
//! - **[`entity`]**: handles, relation flags and the monotonic allocator.
//! - **[`directory`]**: the sparse handle → (table, row) map.
//! - **[`storage`]**: type-erased columns and per-table column stores.
//! - **[`graph`]**: tables connected by per-component add/remove edges.
//! - **[`world`]**: the transition engine and the public façade.
//! - **[`query`]**: signatures pre-bound to tables, yielding row slices.
//! - **[`stage`]**: per-writer shadow stores merged back by the driver.
//! - **[`reactive`]**: OnAdd/OnRemove/OnSet actions and lifecycle hooks.
//!
//! # Example
//!
//! ```ignore
//! use strata_ecs::{Spec, World};
//!
//! let mut world = World::new();
//! let pos = world.new_component("Position", 16)?;
//! let vel = world.new_component("Velocity", 16)?;
//!
//! let e = world.spawn(&Spec::new(vec![pos, vel]))?;
//! world.set_raw(e, pos, &[0u8; 16])?;
//!
//! let movers = world.new_query("Position, Velocity")?;
//! for slice in world.iter(movers, 0, None) {
//!     for entity in slice.entities() {
//!         // ...
//!     }
//! }
//! ```

pub mod builtin;
pub mod component;
pub mod directory;
pub mod entity;
pub mod error;
pub mod graph;
pub mod query;
pub mod reactive;
pub mod stage;
pub mod storage;
pub mod world;

pub use component::Spec;
pub use entity::Entity;
pub use error::{Error, Result};
pub use stage::Stage;
pub use world::{BulkData, Config, World};
