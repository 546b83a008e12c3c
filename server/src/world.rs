//! Default world layout loaded at server start

use crate::mirror::MirrorGroup;
use crate::registry::{ObjectRegistry, PrefabCatalog};
use log::info;
use shared::{PossessableId, PossessionError, PrefabRef, Pose, Quat, Transform, Vec3};

/// Copies appear this far below the mirror they arrive at
const MIRROR_DROP: f32 = 1.5;

const PREFABS: &[(&str, f32)] = &[
    ("lantern", 1.0),
    ("key", 0.5),
    ("candle", 0.75),
    ("music_box", 1.0),
    ("chess_piece", 0.6),
];

/// Every prefab a possessable in this world can be spawned from
pub fn default_catalog() -> PrefabCatalog {
    PREFABS
        .iter()
        .fold(PrefabCatalog::new(), |catalog, (name, scale)| {
            catalog.with_prefab(name, Vec3::new(*scale, *scale, *scale))
        })
}

/// Registers the starting possessables, returning how many were placed.
///
/// Ids are stable across restarts: one row of props along x, then the chess
/// pieces on a second row.
pub fn populate(registry: &ObjectRegistry) -> Result<usize, PossessionError> {
    let mut placed = 0;

    for (index, (name, _)) in PREFABS.iter().enumerate().filter(|(_, (n, _))| *n != "chess_piece") {
        let prefab = PrefabRef::new(*name);
        let scale = registry.catalog().resolve(&prefab)?.scale;
        let position = Vec3::new(index as f32 * 2.0, 1.0, 0.0);
        registry.register(
            PossessableId(index as u64 + 1),
            prefab,
            Transform::new(position, Quat::identity(), scale),
        )?;
        placed += 1;
    }

    let piece = PrefabRef::new("chess_piece");
    let scale = registry.catalog().resolve(&piece)?.scale;
    for file in 0..8u64 {
        let position = Vec3::new(file as f32, 0.8, 4.0);
        registry.register(
            PossessableId(100 + file),
            piece.clone(),
            Transform::new(position, Quat::identity(), scale),
        )?;
        placed += 1;
    }

    info!("World populated with {} possessables", placed);
    Ok(placed)
}

/// Two mirrors facing each other, each relaying into the other
pub fn default_mirror_groups() -> Vec<MirrorGroup> {
    let west = Vec3::new(-6.0, 2.0, 0.0);
    let east = Vec3::new(6.0, 2.0, 0.0);
    vec![
        MirrorGroup::new("west", "east", below_mirror(west)),
        MirrorGroup::new("east", "west", below_mirror(east)),
    ]
}

fn below_mirror(mirror: Vec3) -> Pose {
    Pose::at(mirror - Vec3::new(0.0, MIRROR_DROP, 0.0))
}
