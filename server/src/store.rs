//! Authoritative base records and their atomic mutation operations.
//!
//! Every mutation runs under a per-base transaction: the operation works on
//! a cloned record and the clone replaces the stored one only if the whole
//! operation succeeds. Affordability and placement are pre-checked against a
//! snapshot, then re-checked at commit time inside the transaction. The gap
//! between check and commit is where double-clicks and second browser tabs
//! live, so a decrement that would drive a balance negative aborts the whole
//! transaction no matter what the pre-check said.
//!
//! Operations return their call result together with the ordered list of
//! events to publish. Events are handed out only after the commit succeeded
//! (or deliberately echo the unchanged record so a rejected caller's
//! optimistic UI corrects itself); an aborted transaction never leaks a
//! state-change event.

use crate::broadcaster::Channel;
use log::{debug, info};
use rand::{distributions::Alphanumeric, Rng};
use shared::{
    build_time_ms, can_build_at_position, can_upgrade_building, costs_after_purchase,
    harvest_amount_and_time, stats_for, Base, BaseEvent, BasePatch, Building, BuildingEvent,
    BuildingKind, BuildingPatch, CallResult, HarvestReceipt, Position, PushEvent, Resource,
    ResourceKind, STARTING_RESOURCE_AMOUNT,
};
use std::collections::HashMap;
use thiserror::Error;

/// An event bound for a channel, emitted by a committed (or deliberately
/// echoed) store operation.
pub type Outbound = (Channel, PushEvent);

/// Why a transaction rolled back. `NegativeBalance` is the commit-time race
/// guard firing; the others are eligibility re-checks failing on fresh data.
/// None of these are caller errors; the caller just sees a `None` result.
#[derive(Debug, Error)]
pub enum TxAbort {
    #[error("{0:?} balance would go negative")]
    NegativeBalance(ResourceKind),
    #[error("building {0} is not eligible")]
    Ineligible(String),
    #[error("row {0} vanished mid-transaction")]
    MissingRow(String),
}

fn new_row_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect()
}

/// Applies a signed delta per resource kind, aborting if any balance would
/// go negative. This is the single choke point through which every balance
/// change flows, which is what makes the non-negativity invariant hold.
fn apply_delta(base: &mut Base, delta: &HashMap<ResourceKind, i64>) -> Result<(), TxAbort> {
    for resource in &mut base.resources {
        let change = delta.get(&resource.kind).copied().unwrap_or(0);
        if change == 0 {
            continue;
        }
        resource.amount += change;
        if resource.amount < 0 {
            return Err(TxAbort::NegativeBalance(resource.kind));
        }
    }
    Ok(())
}

fn negated(costs: &HashMap<ResourceKind, i64>) -> HashMap<ResourceKind, i64> {
    costs.iter().map(|(&kind, &amount)| (kind, -amount)).collect()
}

fn full_patch(building: &Building) -> BuildingPatch {
    BuildingPatch {
        id: building.id.clone(),
        level: Some(building.level),
        hp: Some(building.hp),
        finished_at: Some(building.finished_at),
        last_harvest: building.last_harvest,
    }
}

/// The authoritative, persisted record of every base, keyed by owning user.
/// At most one base exists per user by construction.
pub struct BaseStore {
    records: HashMap<String, Base>,
}

impl BaseStore {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    pub fn get(&self, user_id: &str) -> Option<&Base> {
        self.records.get(user_id)
    }

    /// Runs `op` against a working copy of the user's base. On `Ok` the copy
    /// atomically replaces the stored record; on `Err` nothing changes.
    fn transaction<T>(
        &mut self,
        user_id: &str,
        op: impl FnOnce(&mut Base) -> Result<T, TxAbort>,
    ) -> Option<T> {
        let record = self.records.get(user_id)?;
        let mut working = record.clone();
        match op(&mut working) {
            Ok(value) => {
                self.records.insert(user_id.to_string(), working);
                Some(value)
            }
            Err(abort) => {
                debug!("Transaction for user {} rolled back: {}", user_id, abort);
                None
            }
        }
    }

    /// Idempotent upsert: seeds a new base with starting resources on first
    /// call, returns the existing one untouched afterwards. Publishes a
    /// "created" snapshot in both cases so late subscribers converge.
    pub fn ensure_base_exists(&mut self, user_id: &str) -> (CallResult, Vec<Outbound>) {
        let base = match self.records.get(user_id) {
            Some(existing) => existing.clone(),
            None => {
                let base = Base {
                    id: new_row_id(),
                    user_id: user_id.to_string(),
                    level: 1,
                    buildings: Vec::new(),
                    resources: ResourceKind::ALL
                        .iter()
                        .map(|&kind| Resource {
                            id: new_row_id(),
                            kind,
                            amount: STARTING_RESOURCE_AMOUNT,
                        })
                        .collect(),
                };
                info!("Seeded base {} for user {}", base.id, user_id);
                self.records.insert(user_id.to_string(), base.clone());
                base
            }
        };
        let events = vec![(
            Channel::base_update(user_id),
            PushEvent::Base(BaseEvent::Created(base.clone())),
        )];
        (CallResult::Base(Some(base)), events)
    }

    /// Snapshot query. Re-publishes the snapshot on the caller's base
    /// channel so every session of the user converges on it.
    pub fn get_base_data(&self, user_id: &str) -> (CallResult, Vec<Outbound>) {
        match self.records.get(user_id) {
            Some(base) => {
                let events = vec![(
                    Channel::base_update(user_id),
                    PushEvent::Base(BaseEvent::Created(base.clone())),
                )];
                (CallResult::Base(Some(base.clone())), events)
            }
            None => (CallResult::Base(None), Vec::new()),
        }
    }

    /// Places a new level-1 building: pre-checks affordability and placement
    /// against the current snapshot, then debits the cost and inserts the
    /// row in one transaction. The debit re-checks every balance at commit
    /// time. On any rejection the *unchanged* base is re-published (tagged
    /// created) so the requester's optimistic building disappears again.
    pub fn construct_building(
        &mut self,
        user_id: &str,
        kind: BuildingKind,
        position: Position,
        rotated: bool,
        now: u64,
    ) -> (CallResult, Vec<Outbound>) {
        let Some(base) = self.records.get(user_id) else {
            return (CallResult::Base(None), Vec::new());
        };

        if costs_after_purchase(&base.resources, kind, 1).is_none() {
            return (CallResult::Base(None), Self::echo_created(user_id, base));
        }
        if !can_build_at_position(position, kind, &base.buildings, base.size(), rotated) {
            return (CallResult::Base(None), Self::echo_created(user_id, base));
        }

        let stats = stats_for(kind, 1, rotated);
        let building = Building {
            id: new_row_id(),
            kind,
            level: 1,
            x: position.x,
            y: position.y,
            rotated,
            hp: stats.max_hp,
            created_at: now,
            finished_at: now + build_time_ms(kind, 1),
            last_harvest: None,
        };
        let debit = negated(&stats.costs);

        let committed = self.transaction(user_id, move |base| {
            apply_delta(base, &debit)?;
            base.buildings.push(building);
            Ok(())
        });

        match (committed, self.records.get(user_id)) {
            (Some(()), Some(snapshot)) => (
                CallResult::Base(Some(snapshot.clone())),
                Self::echo_created(user_id, snapshot),
            ),
            // Commit-time re-check lost a race: echo the stale snapshot so
            // the caller still receives a terminal event.
            (None, Some(stale)) => (CallResult::Base(None), Self::echo_created(user_id, stale)),
            _ => (CallResult::Base(None), Vec::new()),
        }
    }

    /// Collects one building's accrued production: credits the yield and
    /// advances the harvest clock atomically. No full interval elapsed is a
    /// plain no-op, not a failure.
    pub fn harvest_building(
        &mut self,
        user_id: &str,
        building_id: &str,
        now: u64,
    ) -> (CallResult, Vec<Outbound>) {
        let Some(base) = self.records.get(user_id) else {
            return (CallResult::Harvest(None), Vec::new());
        };
        let Some(building) = base.building(building_id) else {
            return (CallResult::Harvest(None), Vec::new());
        };
        let Some(outcome) = harvest_amount_and_time(building, now) else {
            return (CallResult::Harvest(None), Vec::new());
        };

        let receipt = self.transaction(user_id, |base| {
            apply_delta(base, &outcome.harvest)?;
            let Some(row) = base.buildings.iter_mut().find(|b| b.id == building_id) else {
                return Err(TxAbort::MissingRow(building_id.to_string()));
            };
            row.last_harvest = Some(outcome.last_harvested);
            let building = row.clone();
            let resources = base
                .resources
                .iter()
                .filter(|r| outcome.harvest.contains_key(&r.kind))
                .cloned()
                .collect();
            Ok(HarvestReceipt {
                resources,
                building,
            })
        });

        match receipt {
            Some(receipt) => {
                let all_resources = self
                    .records
                    .get(user_id)
                    .map(|b| b.resources.clone())
                    .unwrap_or_default();
                let events = vec![
                    (
                        Channel::user_resource_update(user_id),
                        PushEvent::Resources(all_resources),
                    ),
                    (
                        Channel::building_update(user_id),
                        PushEvent::Building(BuildingEvent::Updated(BuildingPatch {
                            id: receipt.building.id.clone(),
                            level: None,
                            hp: None,
                            finished_at: None,
                            last_harvest: receipt.building.last_harvest,
                        })),
                    ),
                ];
                (CallResult::Harvest(Some(receipt)), events)
            }
            None => (CallResult::Harvest(None), Vec::new()),
        }
    }

    /// Harvests every building of the base in one transaction and publishes
    /// a single base-updated event with the new collections.
    pub fn harvest_all_buildings(&mut self, user_id: &str, now: u64) -> (CallResult, Vec<Outbound>) {
        let snapshot = self.transaction(user_id, |base| {
            for index in 0..base.buildings.len() {
                let Some(outcome) = harvest_amount_and_time(&base.buildings[index], now) else {
                    continue;
                };
                apply_delta(base, &outcome.harvest)?;
                base.buildings[index].last_harvest = Some(outcome.last_harvested);
            }
            Ok(base.clone())
        });

        match snapshot {
            Some(snapshot) => {
                let events = vec![(
                    Channel::base_update(user_id),
                    PushEvent::Base(BaseEvent::Updated(BasePatch {
                        id: snapshot.id.clone(),
                        level: None,
                        buildings: Some(snapshot.buildings.clone()),
                        resources: Some(snapshot.resources.clone()),
                    })),
                )];
                (CallResult::Base(Some(snapshot)), events)
            }
            None => (CallResult::Base(None), Vec::new()),
        }
    }

    /// Levels a building up. Eligibility is validated *inside* the
    /// transaction against fresh data, since the capital's level and the resource
    /// pool can both change between request and commit. Unlike the other
    /// mutations a failed level-up still publishes a terminal event carrying
    /// the building's unchanged fields, so the caller's UI always settles.
    pub fn level_up_building(
        &mut self,
        user_id: &str,
        building_id: &str,
        now: u64,
    ) -> (CallResult, Vec<Outbound>) {
        if !self.records.contains_key(user_id) {
            return (CallResult::Building(None), Vec::new());
        }

        let updated = self.transaction(user_id, |base| {
            let Some(index) = base.buildings.iter().position(|b| b.id == building_id) else {
                return Err(TxAbort::MissingRow(building_id.to_string()));
            };
            let building = base.buildings[index].clone();
            if !can_upgrade_building(&building, base, now) {
                return Err(TxAbort::Ineligible(building.id));
            }

            let next_level = building.level + 1;
            let stats = stats_for(building.kind, next_level, false);
            apply_delta(base, &negated(&stats.costs))?;

            let row = &mut base.buildings[index];
            row.level = next_level;
            row.hp = stats.max_hp;
            row.finished_at = now + build_time_ms(building.kind, next_level);
            row.last_harvest = Some(now);
            Ok(row.clone())
        });

        match updated {
            Some(building) => {
                let patch = full_patch(&building);
                let events = vec![(
                    Channel::building_update(user_id),
                    PushEvent::Building(BuildingEvent::Updated(patch)),
                )];
                (CallResult::Building(Some(building)), events)
            }
            None => {
                let events = self
                    .records
                    .get(user_id)
                    .and_then(|base| base.building(building_id))
                    .map(|building| {
                        vec![(
                            Channel::building_update(user_id),
                            PushEvent::Building(BuildingEvent::Updated(full_patch(building))),
                        )]
                    })
                    .unwrap_or_default();
                (CallResult::Building(None), events)
            }
        }
    }

    /// Deletes a building and refunds its cost: the full cost while it is
    /// still under construction, half (floored per kind) once finished.
    pub fn scrap_building(
        &mut self,
        user_id: &str,
        building_id: &str,
        now: u64,
    ) -> (CallResult, Vec<Outbound>) {
        let Some(base) = self.records.get(user_id) else {
            return (CallResult::Base(None), Vec::new());
        };
        let Some(building) = base.building(building_id).cloned() else {
            return (CallResult::Base(None), Vec::new());
        };

        let mut refund = stats_for(building.kind, building.level, false).costs;
        if !building.is_constructing(now) {
            for amount in refund.values_mut() {
                *amount /= 2;
            }
        }

        let snapshot = self.transaction(user_id, |base| {
            base.buildings.retain(|b| b.id != building.id);
            apply_delta(base, &refund)?;
            Ok(base.clone())
        });

        match snapshot {
            Some(snapshot) => {
                let events = vec![
                    (
                        Channel::building_update(user_id),
                        PushEvent::Building(BuildingEvent::Destroyed {
                            id: building.id.clone(),
                        }),
                    ),
                    (
                        Channel::user_resource_update(user_id),
                        PushEvent::Resources(snapshot.resources.clone()),
                    ),
                ];
                (CallResult::Base(Some(snapshot)), events)
            }
            None => (CallResult::Base(None), Vec::new()),
        }
    }

    /// Removes the user's base entirely; buildings and resources go with it.
    pub fn delete_base(&mut self, user_id: &str) -> (CallResult, Vec<Outbound>) {
        match self.records.remove(user_id) {
            Some(base) => {
                let events = vec![(
                    Channel::base_update(user_id),
                    PushEvent::Base(BaseEvent::Destroyed {
                        id: base.id.clone(),
                    }),
                )];
                (CallResult::Base(Some(base)), events)
            }
            None => (CallResult::Base(None), Vec::new()),
        }
    }

    /// Privileged resource grant (deltas may be negative). Bypasses
    /// ownership (the caller's admin status is checked at the call layer)
    /// but not the non-negativity invariant. Publishes only to the target
    /// user's resource channel.
    pub fn give_user_resources(
        &mut self,
        target_user_id: &str,
        delta: &HashMap<ResourceKind, i64>,
    ) -> (CallResult, Vec<Outbound>) {
        let snapshot = self.transaction(target_user_id, |base| {
            apply_delta(base, delta)?;
            Ok(base.clone())
        });

        match snapshot {
            Some(snapshot) => {
                let events = vec![(
                    Channel::user_resource_update(target_user_id),
                    PushEvent::Resources(snapshot.resources.clone()),
                )];
                (CallResult::Base(Some(snapshot)), events)
            }
            None => (CallResult::Base(None), Vec::new()),
        }
    }

    fn echo_created(user_id: &str, base: &Base) -> Vec<Outbound> {
        vec![(
            Channel::base_update(user_id),
            PushEvent::Base(BaseEvent::Created(base.clone())),
        )]
    }
}

impl Default for BaseStore {
    fn default() -> Self {
        Self::new()
    }
}
