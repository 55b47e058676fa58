//! Server network layer: UDP socket handling and the authoritative main loop.
//!
//! Every inbound datagram is decoded into a [`Packet`] and funneled through
//! one main loop that owns the base store and the event broadcaster. All
//! state-changing calls are therefore serialized per process, and within the
//! store each one is additionally wrapped in a per-base transaction; the
//! publish of a mutation's events happens strictly after its commit.

use crate::broadcaster::{Channel, EventBroadcaster};
use crate::session_manager::SessionManager;
use crate::store::{BaseStore, Outbound};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{now_ms, Call, CallResult, Packet, PROTOCOL_VERSION};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    SessionTimeout {
        session_id: u32,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Messages sent from the main loop to the network sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
}

/// Main server coordinating networking, sessions, store and broadcaster.
pub struct Server {
    socket: Arc<UdpSocket>,
    sessions: Arc<RwLock<SessionManager>>,
    store: BaseStore,
    broadcaster: EventBroadcaster,
    admin_users: HashSet<String>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        max_sessions: usize,
        admin_users: Vec<String>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            sessions: Arc::new(RwLock::new(SessionManager::new(max_sessions))),
            store: BaseStore::new(),
            broadcaster: EventBroadcaster::new(),
            admin_users: admin_users.into_iter().collect(),
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    /// The address the socket actually bound to (port 0 resolves here).
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.socket.local_addr()
    }

    /// Spawns the task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 8192];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns the task that drains the outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(GameMessage::SendPacket { packet, addr }) = game_rx.recv().await {
                if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                }
            }
        });
    }

    /// Spawns the task that watches for silent sessions. Removal happens in
    /// the main loop so subscription cleanup stays in one place.
    fn spawn_timeout_checker(&self) {
        let sessions = Arc::clone(&self.sessions);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5));

            loop {
                interval.tick().await;

                let timed_out = {
                    let sessions_guard = sessions.read().await;
                    sessions_guard.timed_out_sessions()
                };

                for session_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::SessionTimeout { session_id }) {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Removes a session and disposes of all its channel subscriptions.
    async fn drop_session(&mut self, session_id: u32) {
        let removed = {
            let mut sessions = self.sessions.write().await;
            sessions.remove_session(session_id)
        };
        if let Some(session) = removed {
            for handle in &session.subscriptions {
                self.broadcaster.unsubscribe(handle);
            }
        }
    }

    /// Processes one inbound packet against sessions, store and broadcaster.
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect {
                client_version,
                user_id,
            } => {
                info!(
                    "Session connecting from {} as {} (version {})",
                    addr, user_id, client_version
                );
                if client_version != PROTOCOL_VERSION {
                    self.send_packet(
                        Packet::Disconnected {
                            reason: "Protocol version mismatch".to_string(),
                        },
                        addr,
                    );
                    return;
                }

                // Replace a stale session from the same address
                let existing = {
                    let sessions = self.sessions.read().await;
                    sessions.find_by_addr(addr)
                };
                if let Some(existing_id) = existing {
                    info!("Replacing existing session {} from {}", existing_id, addr);
                    self.drop_session(existing_id).await;
                }

                let is_admin = self.admin_users.contains(&user_id);
                let session_id = {
                    let mut sessions = self.sessions.write().await;
                    sessions.add_session(addr, &user_id, is_admin)
                };

                match session_id {
                    Some(session_id) => self.send_packet(Packet::Connected { session_id }, addr),
                    None => self.send_packet(
                        Packet::Disconnected {
                            reason: "Server full".to_string(),
                        },
                        addr,
                    ),
                }
            }

            Packet::Subscribe { channels } => {
                let session = {
                    let sessions = self.sessions.read().await;
                    sessions
                        .find_by_addr(addr)
                        .and_then(|id| sessions.get(id).map(|s| (id, s.user_id.clone())))
                };
                let Some((session_id, user_id)) = session else {
                    warn!("Subscribe from unknown address {}", addr);
                    return;
                };

                for kind in channels {
                    let channel = Channel::new(kind, &user_id);
                    let (handle, mut events) = self.broadcaster.subscribe(channel);
                    {
                        let mut sessions = self.sessions.write().await;
                        if let Some(session) = sessions.get_mut(session_id) {
                            session.subscriptions.push(handle);
                            session.touch();
                        }
                    }

                    // Forward the subscription's event stream to the session's
                    // address until the subscription is disposed of.
                    let game_tx = self.game_tx.clone();
                    tokio::spawn(async move {
                        while let Some(event) = events.recv().await {
                            let message = GameMessage::SendPacket {
                                packet: Packet::Event(event),
                                addr,
                            };
                            if game_tx.send(message).is_err() {
                                break;
                            }
                        }
                    });
                }
                debug!("Session {} subscribed on {}", session_id, addr);
            }

            Packet::Request { request_id, call } => {
                let session = {
                    let sessions = self.sessions.read().await;
                    sessions
                        .find_by_addr(addr)
                        .and_then(|id| sessions.get(id).map(|s| (id, s.user_id.clone(), s.is_admin)))
                };
                let Some((session_id, user_id, is_admin)) = session else {
                    warn!("Request from unknown address {}", addr);
                    return;
                };
                {
                    let mut sessions = self.sessions.write().await;
                    sessions.touch(session_id);
                }

                let (result, outbound) = self.dispatch_call(&user_id, is_admin, call);
                self.publish_all(outbound);
                self.send_packet(Packet::Response { request_id, result }, addr);
            }

            Packet::Ping => {
                let session_id = {
                    let sessions = self.sessions.read().await;
                    sessions.find_by_addr(addr)
                };
                if let Some(session_id) = session_id {
                    let mut sessions = self.sessions.write().await;
                    sessions.touch(session_id);
                }
            }

            Packet::Disconnect => {
                let session_id = {
                    let sessions = self.sessions.read().await;
                    sessions.find_by_addr(addr)
                };
                if let Some(session_id) = session_id {
                    self.drop_session(session_id).await;
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Routes a call to the store. Authorization is decided here, before any
    /// business logic; everything else is the store's job.
    fn dispatch_call(
        &mut self,
        user_id: &str,
        is_admin: bool,
        call: Call,
    ) -> (CallResult, Vec<Outbound>) {
        let now = now_ms();
        match call {
            Call::GetBaseData => self.store.get_base_data(user_id),
            Call::CreateBaseIfNotExists => self.store.ensure_base_exists(user_id),
            Call::ConstructBuilding {
                kind,
                position,
                rotated,
            } => self
                .store
                .construct_building(user_id, kind, position, rotated, now),
            Call::HarvestBuilding { building_id } => {
                self.store.harvest_building(user_id, &building_id, now)
            }
            Call::HarvestAllBuildings => self.store.harvest_all_buildings(user_id, now),
            Call::LevelUpBuilding { building_id } => {
                self.store.level_up_building(user_id, &building_id, now)
            }
            Call::ScrapBuilding { building_id } => {
                self.store.scrap_building(user_id, &building_id, now)
            }
            Call::DeleteBase => self.store.delete_base(user_id),
            Call::GiveUserResources {
                user_id: target,
                resources,
            } => {
                if !is_admin {
                    warn!("User {} attempted an admin-only call", user_id);
                    return (CallResult::Unauthorized, Vec::new());
                }
                let target = target.as_deref().unwrap_or(user_id);
                self.store.give_user_resources(target, &resources)
            }
        }
    }

    fn publish_all(&mut self, outbound: Vec<Outbound>) {
        for (channel, event) in outbound {
            self.broadcaster.publish(&channel, event);
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut stats_interval = interval(Duration::from_secs(60));
        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::SessionTimeout { session_id }) => {
                            info!("Session {} timed out", session_id);
                            self.drop_session(session_id).await;
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = stats_interval.tick() => {
                    let session_count = {
                        let sessions = self.sessions.read().await;
                        sessions.len()
                    };
                    if session_count > 0 {
                        debug!("{} active sessions", session_count);
                    }
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{
        BaseEvent, BuildingKind, ChannelKind, Position, PushEvent, STARTING_RESOURCE_AMOUNT,
    };
    use std::collections::HashMap;

    async fn test_server() -> Server {
        Server::new("127.0.0.1:0", 8, vec!["admin1".to_string()])
            .await
            .expect("Failed to bind test server")
    }

    fn test_addr() -> SocketAddr {
        "127.0.0.1:9999".parse().unwrap()
    }

    #[tokio::test]
    async fn test_connect_registers_session() {
        let mut server = test_server().await;
        server
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                    user_id: "user1".to_string(),
                },
                test_addr(),
            )
            .await;

        let sessions = server.sessions.read().await;
        assert_eq!(sessions.len(), 1);
        let session_id = sessions.find_by_addr(test_addr()).unwrap();
        assert_eq!(sessions.get(session_id).unwrap().user_id, "user1");
        assert!(!sessions.get(session_id).unwrap().is_admin);
    }

    #[tokio::test]
    async fn test_version_mismatch_is_rejected() {
        let mut server = test_server().await;
        server
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION + 1,
                    user_id: "user1".to_string(),
                },
                test_addr(),
            )
            .await;

        assert!(server.sessions.read().await.is_empty());
        match server.game_rx.try_recv() {
            Ok(GameMessage::SendPacket { packet, .. }) => {
                assert!(matches!(packet, Packet::Disconnected { .. }));
            }
            Err(e) => panic!("expected a queued rejection packet: {}", e),
        }
    }

    #[tokio::test]
    async fn test_admin_flag_from_allowlist() {
        let mut server = test_server().await;
        server
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                    user_id: "admin1".to_string(),
                },
                test_addr(),
            )
            .await;

        let sessions = server.sessions.read().await;
        let session_id = sessions.find_by_addr(test_addr()).unwrap();
        assert!(sessions.get(session_id).unwrap().is_admin);
    }

    #[tokio::test]
    async fn test_non_admin_grant_is_unauthorized_before_business_logic() {
        let mut server = test_server().await;
        server.store.ensure_base_exists("user1");

        let (result, outbound) = server.dispatch_call(
            "user1",
            false,
            Call::GiveUserResources {
                user_id: None,
                resources: HashMap::new(),
            },
        );
        assert!(matches!(result, CallResult::Unauthorized));
        assert!(outbound.is_empty());
        assert_eq!(
            server
                .store
                .get("user1")
                .unwrap()
                .resource_amount(shared::ResourceKind::Gold),
            STARTING_RESOURCE_AMOUNT
        );
    }

    #[tokio::test]
    async fn test_mutation_events_reach_subscribed_channel() {
        let mut server = test_server().await;
        let (_handle, mut events) = server
            .broadcaster
            .subscribe(Channel::new(ChannelKind::BaseUpdated, "user1"));

        let (_, outbound) = server.dispatch_call("user1", false, Call::CreateBaseIfNotExists);
        server.publish_all(outbound);

        match events.try_recv() {
            Ok(PushEvent::Base(BaseEvent::Created(base))) => {
                assert_eq!(base.user_id, "user1");
            }
            other => panic!("expected a created event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejected_construct_still_publishes_terminal_event() {
        let mut server = test_server().await;
        server.store.ensure_base_exists("user1");
        let (_handle, mut events) = server
            .broadcaster
            .subscribe(Channel::new(ChannelKind::BaseUpdated, "user1"));

        // 200 starting iron cannot pay the extractor's 300.
        let (result, outbound) = server.dispatch_call(
            "user1",
            false,
            Call::ConstructBuilding {
                kind: BuildingKind::Extractor,
                position: Position { x: 0, y: 0 },
                rotated: false,
            },
        );
        server.publish_all(outbound);

        assert!(matches!(result, CallResult::Base(None)));
        match events.try_recv() {
            Ok(PushEvent::Base(BaseEvent::Created(base))) => {
                assert!(base.buildings.is_empty());
            }
            other => panic!("expected an echo of the unchanged base, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_unsubscribes_session() {
        let mut server = test_server().await;
        server
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                    user_id: "user1".to_string(),
                },
                test_addr(),
            )
            .await;
        server
            .handle_packet(
                Packet::Subscribe {
                    channels: ChannelKind::ALL.to_vec(),
                },
                test_addr(),
            )
            .await;

        let channel = Channel::new(ChannelKind::BaseUpdated, "user1");
        assert_eq!(server.broadcaster.subscriber_count(&channel), 1);

        server.handle_packet(Packet::Disconnect, test_addr()).await;
        assert_eq!(server.broadcaster.subscriber_count(&channel), 0);
        assert!(server.sessions.read().await.is_empty());
    }
}
