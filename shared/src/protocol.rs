//! Wire protocol between client and server: request/response calls plus
//! server-push events, all carried in one bincode-framed [`Packet`] enum per
//! datagram. Push payloads are tagged unions whose "updated" variants carry
//! only the changed fields; consumers merge, never replace.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::{Base, Building, BuildingKind, Position, Resource, ResourceKind};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Packet {
    // Client -> server
    Connect {
        client_version: u32,
        user_id: String,
    },
    Subscribe {
        channels: Vec<ChannelKind>,
    },
    Request {
        request_id: u32,
        call: Call,
    },
    Ping,
    Disconnect,

    // Server -> client
    Connected {
        session_id: u32,
    },
    Response {
        request_id: u32,
        result: CallResult,
    },
    Event(PushEvent),
    Disconnected {
        reason: String,
    },
}

/// The push channel categories a session may subscribe to. Each expands to a
/// per-user channel on the server side.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    BaseUpdated,
    BuildingUpdated,
    UserResourcesChanged,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [
        ChannelKind::BaseUpdated,
        ChannelKind::BuildingUpdated,
        ChannelKind::UserResourcesChanged,
    ];
}

/// The mutation/query surface. The caller's session identity selects the
/// affected base; only the admin-gated call can address another user.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum Call {
    GetBaseData,
    CreateBaseIfNotExists,
    ConstructBuilding {
        kind: BuildingKind,
        position: Position,
        rotated: bool,
    },
    HarvestBuilding {
        building_id: String,
    },
    HarvestAllBuildings,
    LevelUpBuilding {
        building_id: String,
    },
    ScrapBuilding {
        building_id: String,
    },
    DeleteBase,
    GiveUserResources {
        user_id: Option<String>,
        resources: HashMap<ResourceKind, i64>,
    },
}

/// Call outcome. Validation rejections and unknown ids surface as a `None`
/// payload, never as an error; `Unauthorized` and `Failed` are the two real
/// failure categories.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum CallResult {
    Base(Option<Base>),
    Building(Option<Building>),
    Harvest(Option<HarvestReceipt>),
    Unauthorized,
    Failed(String),
}

/// Rows touched by a single-building harvest.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HarvestReceipt {
    pub resources: Vec<Resource>,
    pub building: Building,
}

/// Partial base update: absent fields are unchanged.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BasePatch {
    pub id: String,
    pub level: Option<u32>,
    pub buildings: Option<Vec<Building>>,
    pub resources: Option<Vec<Resource>>,
}

/// Partial building update: absent fields are unchanged. Identity fields
/// (kind, position, rotation) never change after construction and are not
/// patchable.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BuildingPatch {
    pub id: String,
    pub level: Option<u32>,
    pub hp: Option<i64>,
    pub finished_at: Option<u64>,
    pub last_harvest: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum BaseEvent {
    Created(Base),
    Updated(BasePatch),
    Destroyed { id: String },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum BuildingEvent {
    Created(Building),
    Updated(BuildingPatch),
    Destroyed { id: String },
}

/// A state-change notification pushed over a subscribed channel.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum PushEvent {
    Base(BaseEvent),
    Building(BuildingEvent),
    /// The user's resource rows, replaced wholesale.
    Resources(Vec<Resource>),
}

impl PushEvent {
    /// The channel category this event travels on.
    pub fn channel_kind(&self) -> ChannelKind {
        match self {
            PushEvent::Base(_) => ChannelKind::BaseUpdated,
            PushEvent::Building(_) => ChannelKind::BuildingUpdated,
            PushEvent::Resources(_) => ChannelKind::UserResourcesChanged,
        }
    }
}
