//! Client-side state synchronization.
//!
//! The sync manager keeps the client's believed copy of its base: the last
//! authoritative snapshot plus a map of temporary, optimistically created
//! buildings keyed by client-generated ids. Mutations fire a request and,
//! where the outcome is cheap to predict, apply the prediction locally with
//! the same shared rules the server enforces; the authoritative push events
//! later overwrite whatever was predicted.
//!
//! Each optimistic building moves through a tiny state machine:
//! pending -> confirmed (response arrived, the authoritative push carries
//! the real row) or pending -> rejected (response arrived empty, nothing
//! appears). Both paths remove the temporary row when the response lands,
//! so a terminal state is always reached and the visible state, always
//! authoritative buildings plus the temporary map, never shows a gap between
//! optimistic placement and server confirmation.

use log::{debug, error, warn};
use rand::{distributions::Alphanumeric, Rng};
use shared::{
    build_time_ms, costs_after_purchase, harvest_amount_and_time, now_ms, stats_for, Base,
    BaseEvent, BasePatch, Building, BuildingEvent, BuildingKind, BuildingPatch, Call, CallResult,
    Packet, Position, PushEvent, ResourceKind,
};
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;

/// Default guess for how far ahead of the server's clock a locally predicted
/// `finished_at` should sit. Purely cosmetic (it stops a short build from
/// flashing "finished" before the round trip completes) and tunable, not a
/// protocol guarantee.
pub const DEFAULT_LATENCY_ESTIMATE_MS: u64 = 600;

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingRequest {
    /// A construct carrying an optimistic building to dispose of on arrival.
    Construct { temp_id: String },
    /// Any other in-flight call.
    Plain,
}

fn new_temp_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("tmp-{}", suffix.to_lowercase())
}

/// Maintains the client's believed base state and reconciles it with the
/// authoritative push events. One instance per client session, explicitly
/// constructed and passed to whoever needs it.
pub struct SyncManager {
    user_id: String,
    base: Option<Base>,
    temp_buildings: HashMap<String, Building>,
    pending: HashMap<u32, PendingRequest>,
    next_request_id: u32,
    outbound: UnboundedSender<Packet>,
    latency_estimate_ms: u64,
}

impl SyncManager {
    pub fn new(user_id: &str, outbound: UnboundedSender<Packet>, latency_estimate_ms: u64) -> Self {
        Self {
            user_id: user_id.to_string(),
            base: None,
            temp_buildings: HashMap::new(),
            pending: HashMap::new(),
            next_request_id: 1,
            outbound,
            latency_estimate_ms,
        }
    }

    /// The last authoritative snapshot, if any sync has happened yet.
    pub fn base(&self) -> Option<&Base> {
        self.base.as_ref()
    }

    /// Authoritative buildings plus every optimistic one still pending.
    pub fn visible_buildings(&self) -> Vec<Building> {
        let mut buildings: Vec<Building> = self
            .base
            .as_ref()
            .map(|base| base.buildings.clone())
            .unwrap_or_default();
        buildings.extend(self.temp_buildings.values().cloned());
        buildings
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    pub fn temp_building_count(&self) -> usize {
        self.temp_buildings.len()
    }

    /// Asks the server to create the base if this user has none yet.
    pub fn ensure_base(&mut self) -> u32 {
        self.send_call(Call::CreateBaseIfNotExists, PendingRequest::Plain)
    }

    /// Requests a fresh authoritative snapshot.
    pub fn refresh(&mut self) -> u32 {
        self.send_call(Call::GetBaseData, PendingRequest::Plain)
    }

    /// Fires a construct request and predicts its effect locally: the cost
    /// is deducted from the displayed resources and a temporary building
    /// appears immediately, with `finished_at` pushed out by the latency
    /// estimate so it cannot look finished before the server confirms it.
    /// An unaffordable request skips the prediction but is still sent; the
    /// server's echo of the unchanged base is what corrects the display.
    pub fn construct_building(
        &mut self,
        kind: BuildingKind,
        position: Position,
        rotated: bool,
    ) -> u32 {
        let now = now_ms();
        let call = Call::ConstructBuilding {
            kind,
            position,
            rotated,
        };

        let predicted = self
            .base
            .as_ref()
            .and_then(|base| costs_after_purchase(&base.resources, kind, 1));
        let Some(after) = predicted else {
            return self.send_call(call, PendingRequest::Plain);
        };

        if let Some(base) = &mut self.base {
            base.resources = after;
        }
        let stats = stats_for(kind, 1, rotated);
        let temp_id = new_temp_id();
        let temp = Building {
            id: temp_id.clone(),
            kind,
            level: 1,
            x: position.x,
            y: position.y,
            rotated,
            hp: stats.max_hp,
            created_at: now,
            finished_at: now + self.latency_estimate_ms + build_time_ms(kind, 1),
            last_harvest: None,
        };
        debug!("Placing optimistic building {} ({:?})", temp_id, kind);
        self.temp_buildings.insert(temp_id.clone(), temp);
        self.send_call(call, PendingRequest::Construct { temp_id })
    }

    /// Fires a harvest request and applies the predicted yield immediately,
    /// so the display updates without waiting for the push event. The event
    /// that eventually arrives carries the authoritative values and simply
    /// overwrites the prediction.
    pub fn harvest_building(&mut self, building_id: &str) -> u32 {
        let now = now_ms();
        let prediction = self
            .base
            .as_ref()
            .and_then(|base| base.building(building_id))
            .and_then(|building| harvest_amount_and_time(building, now));

        if let (Some(base), Some(outcome)) = (&mut self.base, prediction) {
            for resource in &mut base.resources {
                if let Some(delta) = outcome.harvest.get(&resource.kind) {
                    resource.amount += delta;
                }
            }
            if let Some(building) = base.buildings.iter_mut().find(|b| b.id == building_id) {
                building.last_harvest = Some(outcome.last_harvested);
            }
        }

        self.send_call(
            Call::HarvestBuilding {
                building_id: building_id.to_string(),
            },
            PendingRequest::Plain,
        )
    }

    /// Harvests everything server-side; no local prediction, the base-update
    /// event carries the result.
    pub fn harvest_all(&mut self) -> u32 {
        self.send_call(Call::HarvestAllBuildings, PendingRequest::Plain)
    }

    /// Fire-and-forget: level-up cost and timing are not predicted locally,
    /// the push event is the only feedback path.
    pub fn level_up_building(&mut self, building_id: &str) -> u32 {
        self.send_call(
            Call::LevelUpBuilding {
                building_id: building_id.to_string(),
            },
            PendingRequest::Plain,
        )
    }

    pub fn scrap_building(&mut self, building_id: &str) -> u32 {
        self.send_call(
            Call::ScrapBuilding {
                building_id: building_id.to_string(),
            },
            PendingRequest::Plain,
        )
    }

    pub fn delete_base(&mut self) -> u32 {
        self.send_call(Call::DeleteBase, PendingRequest::Plain)
    }

    /// Admin-only on the server side; the response tells us if we are not.
    pub fn give_resources(
        &mut self,
        target_user_id: Option<String>,
        resources: HashMap<ResourceKind, i64>,
    ) -> u32 {
        self.send_call(
            Call::GiveUserResources {
                user_id: target_user_id,
                resources,
            },
            PendingRequest::Plain,
        )
    }

    fn send_call(&mut self, call: Call, pending: PendingRequest) -> u32 {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.pending.insert(request_id, pending);

        let packet = Packet::Request { request_id, call };
        if self.outbound.send(packet).is_err() {
            error!("Request {} dropped: network task is gone", request_id);
            // Resolve as rejected on the spot so the optimistic state cannot
            // outlive a dead connection.
            self.handle_response(request_id, &CallResult::Failed("disconnected".to_string()));
        }
        request_id
    }

    /// Resolves an in-flight request. Success or failure, a construct's
    /// temporary building is removed here: on success the authoritative
    /// push (already delivered or about to be) supersedes it, on failure it
    /// must disappear.
    pub fn handle_response(&mut self, request_id: u32, result: &CallResult) {
        match self.pending.remove(&request_id) {
            Some(PendingRequest::Construct { temp_id }) => {
                self.temp_buildings.remove(&temp_id);
            }
            Some(PendingRequest::Plain) => {}
            None => debug!("Response for unknown request {}", request_id),
        }
        match result {
            CallResult::Unauthorized => warn!("Request {} was unauthorized", request_id),
            CallResult::Failed(reason) => warn!("Request {} failed: {}", request_id, reason),
            _ => {}
        }
    }

    /// Reconciles one authoritative push event into the local snapshot.
    pub fn handle_event(&mut self, event: &PushEvent) {
        match event {
            PushEvent::Base(BaseEvent::Created(base)) => {
                self.base = Some(base.clone());
            }
            PushEvent::Base(BaseEvent::Updated(patch)) => self.merge_base_patch(patch),
            PushEvent::Base(BaseEvent::Destroyed { id }) => {
                if self.base.as_ref().is_some_and(|base| &base.id == id) {
                    debug!("Base {} destroyed for user {}", id, self.user_id);
                    self.base = None;
                }
            }
            PushEvent::Building(BuildingEvent::Created(building)) => {
                if let Some(base) = &mut self.base {
                    match base.buildings.iter_mut().find(|b| b.id == building.id) {
                        Some(existing) => *existing = building.clone(),
                        None => base.buildings.push(building.clone()),
                    }
                }
            }
            PushEvent::Building(BuildingEvent::Updated(patch)) => self.merge_building_patch(patch),
            PushEvent::Building(BuildingEvent::Destroyed { id }) => {
                if let Some(base) = &mut self.base {
                    base.buildings.retain(|b| &b.id != id);
                }
            }
            PushEvent::Resources(rows) => {
                if let Some(base) = &mut self.base {
                    base.resources = rows.clone();
                }
            }
        }
    }

    /// Field-by-field merge: present fields replace, absent fields stay.
    fn merge_base_patch(&mut self, patch: &BasePatch) {
        let Some(base) = &mut self.base else {
            return;
        };
        if base.id != patch.id {
            return;
        }
        if let Some(level) = patch.level {
            base.level = level;
        }
        if let Some(buildings) = &patch.buildings {
            base.buildings = buildings.clone();
        }
        if let Some(resources) = &patch.resources {
            base.resources = resources.clone();
        }
    }

    fn merge_building_patch(&mut self, patch: &BuildingPatch) {
        let Some(base) = &mut self.base else {
            return;
        };
        let Some(building) = base.buildings.iter_mut().find(|b| b.id == patch.id) else {
            return;
        };
        if let Some(level) = patch.level {
            building.level = level;
        }
        if let Some(hp) = patch.hp {
            building.hp = hp;
        }
        if let Some(finished_at) = patch.finished_at {
            building.finished_at = finished_at;
        }
        if let Some(last_harvest) = patch.last_harvest {
            building.last_harvest = Some(last_harvest);
        }
    }
}
