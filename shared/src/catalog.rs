//! Static building catalog: per-type level-1 baselines and the scaling laws
//! that derive every stat at an arbitrary level. Nothing here is persisted;
//! stats are a pure function of (kind, level, rotation).

use std::collections::HashMap;

use crate::model::{BuildingKind, ResourceKind, Size};

use ResourceKind::{Aluminum, Food, Gold, Iron, Plutonium};

/// Level-1 baseline for a building type. Resource-keyed fields only list the
/// kinds the type actually touches; absent kinds mean zero.
#[derive(Debug, Clone, Copy)]
pub struct BuildingBaseline {
    pub max_hp: i64,
    pub build_time_secs: u64,
    pub generated_per_interval: &'static [(ResourceKind, i64)],
    pub max_storage: &'static [(ResourceKind, i64)],
    pub costs: &'static [(ResourceKind, i64)],
    pub size: Size,
    pub max_per_base: Option<usize>,
}

/// Stats for a concrete (kind, level, rotated) triple.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildingStats {
    pub max_hp: i64,
    pub build_time_secs: u64,
    pub generated_per_interval: HashMap<ResourceKind, i64>,
    pub max_storage: HashMap<ResourceKind, i64>,
    pub costs: HashMap<ResourceKind, i64>,
    pub size: Size,
}

const CAPITAL_BUILDING: BuildingBaseline = BuildingBaseline {
    max_hp: 100,
    build_time_secs: 55,
    generated_per_interval: &[
        (Food, 10),
        (Gold, 10),
        (Iron, 2),
        (Plutonium, 2),
        (Aluminum, 2),
    ],
    max_storage: &[
        (Food, 200),
        (Gold, 200),
        (Iron, 50),
        (Plutonium, 20),
        (Aluminum, 50),
    ],
    costs: &[(Food, 150), (Iron, 80), (Gold, 90)],
    size: Size {
        width: 3,
        height: 3,
    },
    // Only one capital; it gates every other building's upgrades.
    max_per_base: Some(1),
};

const DWELLING: BuildingBaseline = BuildingBaseline {
    max_hp: 100,
    build_time_secs: 10,
    generated_per_interval: &[],
    max_storage: &[],
    costs: &[(Food, 10), (Iron, 30), (Gold, 30), (Aluminum, 10)],
    size: Size {
        width: 2,
        height: 2,
    },
    max_per_base: None,
};

const HARVESTOR: BuildingBaseline = BuildingBaseline {
    max_hp: 100,
    build_time_secs: 21,
    generated_per_interval: &[(Food, 15)],
    max_storage: &[(Food, 150)],
    costs: &[(Food, 100), (Gold, 100), (Aluminum, 10)],
    size: Size {
        width: 2,
        height: 2,
    },
    max_per_base: None,
};

const BARRACKS: BuildingBaseline = BuildingBaseline {
    max_hp: 125,
    build_time_secs: 19,
    generated_per_interval: &[],
    max_storage: &[],
    costs: &[(Iron, 150), (Aluminum, 80), (Food, 100), (Plutonium, 5)],
    size: Size {
        width: 2,
        height: 1,
    },
    max_per_base: None,
};

const AEROSPACE_DEPOT: BuildingBaseline = BuildingBaseline {
    max_hp: 125,
    build_time_secs: 23,
    generated_per_interval: &[],
    max_storage: &[],
    costs: &[(Iron, 150), (Aluminum, 80), (Food, 100), (Plutonium, 5)],
    size: Size {
        width: 3,
        height: 1,
    },
    max_per_base: None,
};

const SCATTERGUN_TURRET: BuildingBaseline = BuildingBaseline {
    max_hp: 250,
    build_time_secs: 25,
    generated_per_interval: &[],
    max_storage: &[],
    costs: &[(Gold, 50), (Iron, 150), (Aluminum, 300), (Plutonium, 110)],
    size: Size {
        width: 1,
        height: 1,
    },
    max_per_base: None,
};

const ENERGY_SHIELD_WALL: BuildingBaseline = BuildingBaseline {
    max_hp: 500,
    build_time_secs: 10,
    generated_per_interval: &[],
    max_storage: &[],
    costs: &[(Gold, 50), (Iron, 800), (Aluminum, 50), (Plutonium, 100)],
    size: Size {
        width: 1,
        height: 1,
    },
    max_per_base: None,
};

const ANTI_AIRCRAFT_TURRET: BuildingBaseline = BuildingBaseline {
    max_hp: 250,
    build_time_secs: 25,
    generated_per_interval: &[],
    max_storage: &[],
    costs: &[(Gold, 50), (Iron, 450), (Aluminum, 150), (Plutonium, 55)],
    size: Size {
        width: 1,
        height: 1,
    },
    max_per_base: None,
};

const EXTRACTOR: BuildingBaseline = BuildingBaseline {
    max_hp: 100,
    build_time_secs: 25,
    generated_per_interval: &[(Iron, 50), (Aluminum, 20), (Plutonium, 5)],
    max_storage: &[(Iron, 500), (Aluminum, 200), (Plutonium, 50)],
    costs: &[(Iron, 300)],
    size: Size {
        width: 2,
        height: 2,
    },
    max_per_base: None,
};

const RESEARCH_LAB: BuildingBaseline = BuildingBaseline {
    max_hp: 30,
    build_time_secs: 60,
    generated_per_interval: &[],
    max_storage: &[],
    costs: &[(Iron, 30), (Gold, 150), (Aluminum, 20), (Plutonium, 25)],
    size: Size {
        width: 2,
        height: 2,
    },
    max_per_base: None,
};

const UNIVERSITY: BuildingBaseline = BuildingBaseline {
    max_hp: 20,
    build_time_secs: 45,
    generated_per_interval: &[],
    max_storage: &[],
    costs: &[(Food, 150), (Gold, 150), (Aluminum, 10)],
    size: Size {
        width: 2,
        height: 2,
    },
    max_per_base: None,
};

/// Level-1 baseline for a building type.
pub fn baseline(kind: BuildingKind) -> &'static BuildingBaseline {
    match kind {
        BuildingKind::CapitalBuilding => &CAPITAL_BUILDING,
        BuildingKind::Dwelling => &DWELLING,
        BuildingKind::Harvestor => &HARVESTOR,
        BuildingKind::Barracks => &BARRACKS,
        BuildingKind::AerospaceDepot => &AEROSPACE_DEPOT,
        BuildingKind::ScattergunTurret => &SCATTERGUN_TURRET,
        BuildingKind::EnergyShieldWall => &ENERGY_SHIELD_WALL,
        BuildingKind::AntiAircraftTurret => &ANTI_AIRCRAFT_TURRET,
        BuildingKind::Extractor => &EXTRACTOR,
        BuildingKind::ResearchLab => &RESEARCH_LAB,
        BuildingKind::University => &UNIVERSITY,
    }
}

fn scale_quadratic(entries: &[(ResourceKind, i64)], level: u32) -> HashMap<ResourceKind, i64> {
    let level = level as i64;
    entries
        .iter()
        .map(|&(kind, base)| (kind, base * level * level))
        .collect()
}

/// Derives the stats of a building type at a given level and rotation.
///
/// Scaling laws, applied per-field to the level-1 baseline:
/// - max HP grows linearly (`base * level`)
/// - build time grows steeply (`base * (level-1)^4 + level * base`)
/// - generation, storage and cost all grow quadratically (`base * level^2`)
/// - the footprint does not scale; rotation swaps width and height
pub fn stats_for(kind: BuildingKind, level: u32, rotated: bool) -> BuildingStats {
    let baseline = baseline(kind);
    let size = if rotated {
        Size {
            width: baseline.size.height,
            height: baseline.size.width,
        }
    } else {
        baseline.size
    };
    let lv = level as u64;
    BuildingStats {
        max_hp: baseline.max_hp * level as i64,
        build_time_secs: baseline.build_time_secs * (lv - 1).pow(4) + lv * baseline.build_time_secs,
        generated_per_interval: scale_quadratic(baseline.generated_per_interval, level),
        max_storage: scale_quadratic(baseline.max_storage, level),
        costs: scale_quadratic(baseline.costs, level),
        size,
    }
}

/// Build or upgrade duration in milliseconds for reaching `level`.
pub fn build_time_ms(kind: BuildingKind, level: u32) -> u64 {
    stats_for(kind, level, false).build_time_secs * 1_000
}
