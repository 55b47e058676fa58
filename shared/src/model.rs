use serde::{Deserialize, Serialize};

use crate::catalog::stats_for;

/// The five tradeable resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Food,
    Gold,
    Iron,
    Aluminum,
    Plutonium,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Food,
        ResourceKind::Gold,
        ResourceKind::Iron,
        ResourceKind::Aluminum,
        ResourceKind::Plutonium,
    ];
}

/// Every constructible building type. Military and research buildings exist
/// in the catalog but generate nothing; only the capital, harvestor and
/// extractor produce resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuildingKind {
    CapitalBuilding,
    Dwelling,
    Harvestor,
    Barracks,
    AerospaceDepot,
    ScattergunTurret,
    EnergyShieldWall,
    AntiAircraftTurret,
    Extractor,
    ResearchLab,
    University,
}

impl BuildingKind {
    pub const ALL: [BuildingKind; 11] = [
        BuildingKind::CapitalBuilding,
        BuildingKind::Dwelling,
        BuildingKind::Harvestor,
        BuildingKind::Barracks,
        BuildingKind::AerospaceDepot,
        BuildingKind::ScattergunTurret,
        BuildingKind::EnergyShieldWall,
        BuildingKind::AntiAircraftTurret,
        BuildingKind::Extractor,
        BuildingKind::ResearchLab,
        BuildingKind::University,
    ];
}

/// Grid cell coordinate within a base. Coordinates are unsigned, so the
/// "position must not be negative" invariant holds by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

/// Axis-aligned rectangle of grid cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(position: Position, size: Size) -> Self {
        Self {
            x: position.x,
            y: position.y,
            width: size.width,
            height: size.height,
        }
    }

    /// Half-open interval overlap test on both axes. Rectangles that only
    /// touch along an edge or corner do not intersect.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.x + other.width
            && self.x + self.width > other.x
            && self.y < other.y + other.height
            && self.y + self.height > other.y
    }
}

/// One resource balance row. A base owns exactly one row per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub kind: ResourceKind,
    pub amount: i64,
}

/// A building placed on a base grid.
///
/// `finished_at` is the instant construction (or the current upgrade)
/// completes; while it lies in the future the building is inert.
/// `last_harvest` is absent until the building has been harvested once,
/// in which case `finished_at` serves as the harvest clock origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Building {
    pub id: String,
    pub kind: BuildingKind,
    pub level: u32,
    pub x: u32,
    pub y: u32,
    pub rotated: bool,
    pub hp: i64,
    pub created_at: u64,
    pub finished_at: u64,
    pub last_harvest: Option<u64>,
}

impl Building {
    /// True while construction or the current upgrade has not completed.
    pub fn is_constructing(&self, now: u64) -> bool {
        self.finished_at > now
    }

    pub fn position(&self) -> Position {
        Position {
            x: self.x,
            y: self.y,
        }
    }

    /// The grid rectangle this building occupies at its current rotation.
    pub fn footprint(&self) -> Rect {
        let size = stats_for(self.kind, self.level, self.rotated).size;
        Rect::new(self.position(), size)
    }
}

/// A player's base: one bounded grid, one resource pool, a set of buildings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Base {
    pub id: String,
    pub user_id: String,
    pub level: u32,
    pub buildings: Vec<Building>,
    pub resources: Vec<Resource>,
}

impl Base {
    pub fn size(&self) -> Size {
        base_size(self.level)
    }

    pub fn building(&self, building_id: &str) -> Option<&Building> {
        self.buildings.iter().find(|b| b.id == building_id)
    }

    pub fn resource(&self, kind: ResourceKind) -> Option<&Resource> {
        self.resources.iter().find(|r| r.kind == kind)
    }

    pub fn resource_amount(&self, kind: ResourceKind) -> i64 {
        self.resource(kind).map(|r| r.amount).unwrap_or(0)
    }
}

/// Grid side length grows with base level: 8 + 4 * level cells per side.
pub fn base_size(level: u32) -> Size {
    Size {
        width: 8 + 4 * level,
        height: 8 + 4 * level,
    }
}
