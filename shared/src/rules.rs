//! Placement, purchase and upgrade legality. Every function here is total
//! and pure: rejections are `false`/`None`, never errors, and the caller
//! supplies `now` wherever time matters.

use crate::catalog::{baseline, stats_for};
use crate::model::{Base, Building, BuildingKind, Position, Rect, Resource, Size};

/// Resource balances after paying the cost of `kind` at `level`, or `None`
/// if any balance would go negative. All kinds are evaluated before any is
/// applied; the input pool is never mutated.
pub fn costs_after_purchase(
    resources: &[Resource],
    kind: BuildingKind,
    level: u32,
) -> Option<Vec<Resource>> {
    let costs = stats_for(kind, level, false).costs;
    let mut after = Vec::with_capacity(resources.len());
    for resource in resources {
        let cost = costs.get(&resource.kind).copied().unwrap_or(0);
        let new_amount = resource.amount - cost;
        if new_amount < 0 {
            return None;
        }
        after.push(Resource {
            amount: new_amount,
            ..resource.clone()
        });
    }
    Some(after)
}

/// Whether a building of `kind` may be placed with its footprint origin at
/// `position`. Checks, in order: the per-base count limit for the type, that
/// the footprint lies fully inside the grid, and that it overlaps no
/// existing building (touching edges are fine).
pub fn can_build_at_position(
    position: Position,
    kind: BuildingKind,
    existing: &[Building],
    base_size: Size,
    rotated: bool,
) -> bool {
    if let Some(max) = baseline(kind).max_per_base {
        if existing.iter().filter(|b| b.kind == kind).count() >= max {
            return false;
        }
    }

    let footprint = stats_for(kind, 1, rotated).size;
    if footprint.width > base_size.width || footprint.height > base_size.height {
        return false;
    }
    if position.x > base_size.width - footprint.width
        || position.y > base_size.height - footprint.height
    {
        return false;
    }

    let candidate = Rect::new(position, footprint);
    !existing
        .iter()
        .any(|building| candidate.intersects(&building.footprint()))
}

/// Whether `building` is eligible for a level-up right now.
///
/// A building must have finished its current construction, the base must
/// hold a capital building, and the capital's *effective* level (its level
/// minus one while it is itself still upgrading) must be strictly ahead of
/// the building's; the capital itself is exempt from that gate. Finally
/// the level+1 cost must be affordable.
pub fn can_upgrade_building(building: &Building, base: &Base, now: u64) -> bool {
    if building.is_constructing(now) {
        return false;
    }
    let Some(capital) = base
        .buildings
        .iter()
        .find(|b| b.kind == BuildingKind::CapitalBuilding)
    else {
        return false;
    };
    let capital_level = if capital.is_constructing(now) {
        capital.level.saturating_sub(1)
    } else {
        capital.level
    };
    if building.id != capital.id && building.level >= capital_level {
        return false;
    }
    costs_after_purchase(&base.resources, building.kind, building.level + 1).is_some()
}
