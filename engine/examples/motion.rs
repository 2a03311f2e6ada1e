//! A minimal simulation: bulk-load some bodies, integrate their motion with
//! a query, and let worker stages spawn debris concurrently.
//!
//! Run with `cargo run --example motion`.

use strata_ecs::{BulkData, Spec, World};

#[derive(Debug, Default, Clone, Copy)]
struct Vec2 {
    x: f32,
    y: f32,
}

fn main() -> strata_ecs::Result<()> {
    let mut world = World::new();

    let position = world.register_component::<Vec2>("Position")?;
    let velocity = world.register_component::<Vec2>("Velocity")?;

    // Watch spawns land in their table.
    world.on_add(position, |_, signal| {
        println!("+ entity {} gained Position", signal.entity.raw());
    });

    // Bulk-load a batch of bodies: one buffer per column.
    let count = 4;
    let positions: Vec<Vec2> = (0..count)
        .map(|i| Vec2 {
            x: i as f32,
            y: 0.0,
        })
        .collect();
    let velocities: Vec<Vec2> = (0..count).map(|_| Vec2 { x: 0.5, y: 1.0 }).collect();
    let first = world.set_w_data(&BulkData {
        entities: None,
        components: &[position, velocity],
        columns: &[as_bytes(&positions), as_bytes(&velocities)],
        row_count: count,
    })?;
    println!("loaded {count} bodies starting at handle {}", first.raw());

    // Integrate: read the matched tables, then write through typed columns.
    let movers = world.new_query("Position, Velocity")?;
    let tables: Vec<_> = world.iter(movers, 0, None).map(|s| s.table()).collect();
    for table in tables {
        let steps: Vec<Vec2> = world
            .column_mut::<Vec2>(table, velocity)
            .expect("velocity column")
            .to_vec();
        let rows = world
            .column_mut::<Vec2>(table, position)
            .expect("position column");
        for (cell, step) in rows.iter_mut().zip(steps) {
            cell.x += step.x;
            cell.y += step.y;
        }
    }

    for slice in world.iter(movers, 0, None) {
        for (entity, cell) in slice.entities().iter().zip(slice.column::<Vec2>(0).unwrap()) {
            println!("entity {} at ({:.1}, {:.1})", entity.raw(), cell.x, cell.y);
        }
    }

    // Two workers spawn debris into their own stages; the driver merges.
    world.scope_stages(2, |world, stage| {
        for _ in 0..3 {
            stage.spawn(world, &Spec::one(position)).expect("stage spawn");
        }
    })?;
    println!("total with Position: {}", world.count(&Spec::one(position)));

    Ok(())
}

fn as_bytes(cells: &[Vec2]) -> &[u8] {
    // Plain-data cells reinterpreted for the untyped bulk loader.
    unsafe {
        std::slice::from_raw_parts(cells.as_ptr().cast::<u8>(), std::mem::size_of_val(cells))
    }
}
