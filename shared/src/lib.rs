//! Shared game core: the data model, the static building catalog, the rules
//! engine, the harvest calculator and the wire protocol.
//!
//! Everything in this crate is pure: no sockets, no clocks, no storage.
//! The server uses it to enforce the rules authoritatively and the client
//! uses the very same functions to predict outcomes optimistically, which is
//! what keeps prediction and authority from drifting apart.

pub mod catalog;
pub mod harvest;
pub mod model;
pub mod protocol;
pub mod rules;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub use catalog::{baseline, build_time_ms, stats_for, BuildingBaseline, BuildingStats};
pub use harvest::{harvest_amount_and_time, next_harvest_time, HarvestOutcome};
pub use model::{
    base_size, Base, Building, BuildingKind, Position, Rect, Resource, ResourceKind, Size,
};
pub use protocol::{
    BaseEvent, BasePatch, BuildingEvent, BuildingPatch, Call, CallResult, ChannelKind,
    HarvestReceipt, Packet, PushEvent,
};
pub use rules::{can_build_at_position, can_upgrade_building, costs_after_purchase};

pub const PROTOCOL_VERSION: u32 = 1;

pub const MS_IN_A_MINUTE: u64 = 60_000;
/// A resource-generating building accrues one unit of production per
/// completed interval.
pub const HARVEST_INTERVAL_MINS: u64 = 20;
pub const HARVEST_INTERVAL_MS: u64 = HARVEST_INTERVAL_MINS * MS_IN_A_MINUTE;

/// Every freshly created base is seeded with this much of each resource.
pub const STARTING_RESOURCE_AMOUNT: i64 = 200;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
