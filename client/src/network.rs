//! Client network task: connects to the server over UDP, keeps the session
//! alive, forwards responses and push events into the sync manager, and
//! drives it from a line-oriented command prompt (the stand-in for a real
//! rendering front end).

use crate::sync::SyncManager;
use bincode::{deserialize, serialize};
use log::{error, info, warn};
use shared::{
    next_harvest_time, now_ms, BuildingKind, CallResult, ChannelKind, Packet, Position,
    ResourceKind, PROTOCOL_VERSION,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::{interval, timeout};

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    session_id: Option<u32>,
    user_id: String,
    sync: SyncManager,
    outbound_rx: UnboundedReceiver<Packet>,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        user_id: &str,
        latency_estimate_ms: u64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let sync = SyncManager::new(user_id, outbound_tx, latency_estimate_ms);

        Ok(Client {
            socket,
            server_addr,
            session_id: None,
            user_id: user_id.to_string(),
            sync,
            outbound_rx,
        })
    }

    async fn send(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Packet, Box<dyn std::error::Error>> {
        let mut buffer = [0u8; 8192];
        loop {
            let (len, addr) = self.socket.recv_from(&mut buffer).await?;
            if addr != self.server_addr {
                continue;
            }
            return Ok(deserialize::<Packet>(&buffer[..len])?);
        }
    }

    /// Handshake: register the session, subscribe to all push channels and
    /// make sure a base exists for this user.
    async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let connect = Packet::Connect {
            client_version: PROTOCOL_VERSION,
            user_id: self.user_id.clone(),
        };

        for attempt in 1..=5 {
            self.send(&connect).await?;
            match timeout(Duration::from_secs(1), self.recv()).await {
                Ok(Ok(Packet::Connected { session_id })) => {
                    info!("Connected as session {}", session_id);
                    self.session_id = Some(session_id);
                    self.send(&Packet::Subscribe {
                        channels: ChannelKind::ALL.to_vec(),
                    })
                    .await?;
                    self.sync.ensure_base();
                    return Ok(());
                }
                Ok(Ok(Packet::Disconnected { reason })) => {
                    return Err(format!("Connection refused: {}", reason).into());
                }
                Ok(Ok(_)) | Ok(Err(_)) | Err(_) => {
                    warn!("Connect attempt {} got no answer, retrying", attempt);
                }
            }
        }
        Err("Could not reach server".into())
    }

    /// Returns true once the server tells us to go away.
    fn handle_packet(&mut self, packet: Packet) -> bool {
        match packet {
            Packet::Response { request_id, result } => {
                if let CallResult::Unauthorized = result {
                    println!("Server refused: admin privileges required");
                }
                self.sync.handle_response(request_id, &result);
            }
            Packet::Event(event) => self.sync.handle_event(&event),
            Packet::Disconnected { reason } => {
                error!("Disconnected by server: {}", reason);
                return true;
            }
            _ => warn!("Unexpected packet type from server"),
        }
        false
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;

        let stdin = BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        let mut ping_interval = interval(Duration::from_secs(5));
        let mut buffer = [0u8; 8192];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => match result {
                    Ok((len, addr)) if addr == self.server_addr => {
                        match deserialize::<Packet>(&buffer[..len]) {
                            Ok(packet) => {
                                if self.handle_packet(packet) {
                                    break;
                                }
                            }
                            Err(e) => warn!("Undecodable packet from server: {}", e),
                        }
                    }
                    Ok(_) => {}
                    Err(e) => error!("Socket error: {}", e),
                },

                Some(packet) = self.outbound_rx.recv() => {
                    self.send(&packet).await?;
                },

                _ = ping_interval.tick() => {
                    self.send(&Packet::Ping).await?;
                },

                line = lines.next_line() => match line? {
                    Some(line) => {
                        if self.handle_command(line.trim()) {
                            self.send(&Packet::Disconnect).await?;
                            break;
                        }
                    }
                    None => {
                        self.send(&Packet::Disconnect).await?;
                        break;
                    }
                },
            }
        }

        Ok(())
    }

    /// Returns true on quit.
    fn handle_command(&mut self, line: &str) -> bool {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            [] => {}
            ["quit"] | ["exit"] => return true,
            ["help"] => print_help(),
            ["state"] => self.print_state(),
            ["refresh"] => {
                self.sync.refresh();
            }
            ["build", kind, x, y, rest @ ..] => {
                let rotated = rest == ["r"];
                match (parse_building_kind(kind), x.parse(), y.parse()) {
                    (Some(kind), Ok(x), Ok(y)) => {
                        self.sync.construct_building(kind, Position { x, y }, rotated);
                    }
                    _ => println!("Usage: build <kind> <x> <y> [r]"),
                }
            }
            ["harvest", "all"] => {
                self.sync.harvest_all();
            }
            ["harvest", building_id] => {
                self.sync.harvest_building(building_id);
            }
            ["levelup", building_id] => {
                self.sync.level_up_building(building_id);
            }
            ["scrap", building_id] => {
                self.sync.scrap_building(building_id);
            }
            ["delete"] => {
                self.sync.delete_base();
            }
            ["give", user, kind, amount] => {
                match (parse_resource_kind(kind), amount.parse::<i64>()) {
                    (Some(kind), Ok(amount)) => {
                        self.sync
                            .give_resources(Some(user.to_string()), HashMap::from([(kind, amount)]));
                    }
                    _ => println!("Usage: give <user> <resource> <amount>"),
                }
            }
            _ => println!("Unknown command '{}' (try 'help')", line),
        }
        false
    }

    fn print_state(&self) {
        if let Some(session_id) = self.session_id {
            println!("Session {} as {}", session_id, self.user_id);
        }
        let Some(base) = self.sync.base() else {
            println!("No base snapshot yet");
            return;
        };
        let size = base.size();
        println!(
            "Base {} (level {}, {}x{} grid)",
            base.id, base.level, size.width, size.height
        );
        for resource in &base.resources {
            println!("  {:?}: {}", resource.kind, resource.amount);
        }
        let now = now_ms();
        for building in self.sync.visible_buildings() {
            let status = if building.id.starts_with("tmp-") {
                "pending".to_string()
            } else if building.is_constructing(now) {
                format!("constructing, {}s left", (building.finished_at - now) / 1_000)
            } else {
                match next_harvest_time(&building, now) {
                    Some(at) if at > now => format!("next harvest in {}s", (at - now) / 1_000),
                    Some(_) => "harvest ready".to_string(),
                    None => "idle".to_string(),
                }
            };
            println!(
                "  [{}] {:?} L{} at ({},{}) hp {}: {}",
                building.id, building.kind, building.level, building.x, building.y, building.hp,
                status
            );
        }
        if self.sync.pending_requests() > 0 {
            println!("  ({} requests in flight)", self.sync.pending_requests());
        }
    }
}

fn print_help() {
    println!("Commands:");
    println!("  state                       show the current base");
    println!("  build <kind> <x> <y> [r]    construct a building (r = rotated)");
    println!("  harvest <id> | harvest all  collect accrued resources");
    println!("  levelup <id>                upgrade a building");
    println!("  scrap <id>                  demolish a building for a refund");
    println!("  give <user> <res> <amount>  admin resource grant");
    println!("  refresh | delete | quit");
    println!(
        "Kinds: capital dwelling harvestor barracks depot scattergun wall aa extractor lab university"
    );
}

fn parse_building_kind(word: &str) -> Option<BuildingKind> {
    match word.to_ascii_lowercase().as_str() {
        "capital" => Some(BuildingKind::CapitalBuilding),
        "dwelling" => Some(BuildingKind::Dwelling),
        "harvestor" => Some(BuildingKind::Harvestor),
        "barracks" => Some(BuildingKind::Barracks),
        "depot" => Some(BuildingKind::AerospaceDepot),
        "scattergun" => Some(BuildingKind::ScattergunTurret),
        "wall" => Some(BuildingKind::EnergyShieldWall),
        "aa" => Some(BuildingKind::AntiAircraftTurret),
        "extractor" => Some(BuildingKind::Extractor),
        "lab" => Some(BuildingKind::ResearchLab),
        "university" => Some(BuildingKind::University),
        _ => None,
    }
}

fn parse_resource_kind(word: &str) -> Option<ResourceKind> {
    match word.to_ascii_lowercase().as_str() {
        "food" => Some(ResourceKind::Food),
        "gold" => Some(ResourceKind::Gold),
        "iron" => Some(ResourceKind::Iron),
        "aluminum" => Some(ResourceKind::Aluminum),
        "plutonium" => Some(ResourceKind::Plutonium),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_building_kinds() {
        assert_eq!(
            parse_building_kind("Extractor"),
            Some(BuildingKind::Extractor)
        );
        assert_eq!(
            parse_building_kind("capital"),
            Some(BuildingKind::CapitalBuilding)
        );
        assert_eq!(parse_building_kind("castle"), None);
    }

    #[test]
    fn test_parse_resource_kinds() {
        assert_eq!(parse_resource_kind("iron"), Some(ResourceKind::Iron));
        assert_eq!(parse_resource_kind("Plutonium"), Some(ResourceKind::Plutonium));
        assert_eq!(parse_resource_kind("wood"), None);
    }
}
