//! Integration tests for the base-building server and client
//!
//! These tests validate cross-component interactions: the store -> broadcaster
//! -> sync-manager pipeline that keeps every session of a user convergent, and
//! real UDP round trips against a running server.

use bincode::{deserialize, serialize};
use client::sync::{SyncManager, DEFAULT_LATENCY_ESTIMATE_MS};
use server::broadcaster::{Channel, EventBroadcaster};
use server::network::Server;
use server::store::BaseStore;
use shared::{
    BaseEvent, BuildingKind, Call, CallResult, ChannelKind, Packet, Position, PushEvent,
    ResourceKind, PROTOCOL_VERSION, STARTING_RESOURCE_AMOUNT,
};
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::timeout;

/// STORE -> BROADCASTER -> SYNC MANAGER PIPELINE TESTS
mod pipeline_tests {
    use super::*;

    struct Session {
        sync: SyncManager,
        requests: UnboundedReceiver<Packet>,
        events: Vec<UnboundedReceiver<PushEvent>>,
    }

    /// Wires a sync manager to a user's three channels the way a connected
    /// session would be.
    fn open_session(broadcaster: &mut EventBroadcaster, user_id: &str) -> Session {
        let (tx, requests) = mpsc::unbounded_channel();
        let events = ChannelKind::ALL
            .iter()
            .map(|&kind| broadcaster.subscribe(Channel::new(kind, user_id)).1)
            .collect();
        Session {
            sync: SyncManager::new(user_id, tx, DEFAULT_LATENCY_ESTIMATE_MS),
            requests,
            events,
        }
    }

    fn drain_events(session: &mut Session) {
        for receiver in &mut session.events {
            while let Ok(event) = receiver.try_recv() {
                session.sync.handle_event(&event);
            }
        }
    }

    fn publish(broadcaster: &mut EventBroadcaster, outbound: Vec<(Channel, PushEvent)>) {
        for (channel, event) in outbound {
            broadcaster.publish(&channel, event);
        }
    }

    /// A confirmed construct flows through the full pipeline: optimistic
    /// placement, authoritative event, response, convergence, on the caller
    /// *and* on a second session of the same user.
    #[test]
    fn construct_confirmed_across_two_sessions() {
        let mut store = BaseStore::new();
        let mut broadcaster = EventBroadcaster::new();
        let mut tab1 = open_session(&mut broadcaster, "user1");
        let mut tab2 = open_session(&mut broadcaster, "user1");

        let (_, outbound) = store.ensure_base_exists("user1");
        publish(&mut broadcaster, outbound);
        let delta = HashMap::from([(ResourceKind::Iron, 300)]);
        let (_, outbound) = store.give_user_resources("user1", &delta);
        publish(&mut broadcaster, outbound);
        drain_events(&mut tab1);
        drain_events(&mut tab2);
        assert_eq!(
            tab1.sync.base().unwrap().resource_amount(ResourceKind::Iron),
            500
        );

        // Tab 1 constructs; its optimistic state shows the building at once.
        let request_id =
            tab1.sync
                .construct_building(BuildingKind::Extractor, Position { x: 0, y: 0 }, false);
        assert_eq!(tab1.sync.visible_buildings().len(), 1);
        assert_eq!(tab1.sync.temp_building_count(), 1);

        // The request reaches the server and commits.
        let Some(Packet::Request { call, .. }) = tab1.requests.try_recv().ok() else {
            panic!("expected the construct request to be sent");
        };
        let Call::ConstructBuilding {
            kind,
            position,
            rotated,
        } = call
        else {
            panic!("expected a construct call");
        };
        let (result, outbound) = store.construct_building("user1", kind, position, rotated, 1_000);
        publish(&mut broadcaster, outbound);
        drain_events(&mut tab1);
        drain_events(&mut tab2);
        tab1.sync.handle_response(request_id, &result);

        // Both sessions converge on the same authoritative state.
        for tab in [&tab1, &tab2] {
            let base = tab.sync.base().unwrap();
            assert_eq!(base.buildings.len(), 1);
            assert_eq!(base.buildings[0].kind, BuildingKind::Extractor);
            assert_eq!(base.resource_amount(ResourceKind::Iron), 200);
        }
        assert_eq!(tab1.sync.temp_building_count(), 0);
        assert_eq!(tab1.sync.visible_buildings().len(), 1);
    }

    /// A rejected construct terminates the optimistic entry and the echoed
    /// unchanged snapshot reasserts the real state.
    #[test]
    fn construct_rejected_self_corrects() {
        let mut store = BaseStore::new();
        let mut broadcaster = EventBroadcaster::new();
        let mut tab = open_session(&mut broadcaster, "user1");

        let (_, outbound) = store.ensure_base_exists("user1");
        publish(&mut broadcaster, outbound);
        drain_events(&mut tab);

        // Client predicts from a stale snapshot claiming 500 iron.
        let mut stale = store.get("user1").unwrap().clone();
        for resource in &mut stale.resources {
            if resource.kind == ResourceKind::Iron {
                resource.amount = 500;
            }
        }
        tab.sync
            .handle_event(&PushEvent::Base(BaseEvent::Created(stale)));

        let request_id =
            tab.sync
                .construct_building(BuildingKind::Extractor, Position { x: 0, y: 0 }, false);
        assert_eq!(tab.sync.temp_building_count(), 1);

        // The server rejects (only 200 real iron) and echoes current state.
        let (result, outbound) = store.construct_building(
            "user1",
            BuildingKind::Extractor,
            Position { x: 0, y: 0 },
            false,
            1_000,
        );
        assert!(matches!(result, CallResult::Base(None)));
        publish(&mut broadcaster, outbound);
        drain_events(&mut tab);
        tab.sync.handle_response(request_id, &result);

        assert_eq!(tab.sync.temp_building_count(), 0);
        assert!(tab.sync.visible_buildings().is_empty());
        assert_eq!(
            tab.sync.base().unwrap().resource_amount(ResourceKind::Iron),
            STARTING_RESOURCE_AMOUNT
        );
    }

    /// Level-up events carry partial patches and merge by building id.
    #[test]
    fn level_up_patch_merges_into_snapshot() {
        let mut store = BaseStore::new();
        let mut broadcaster = EventBroadcaster::new();
        let mut tab = open_session(&mut broadcaster, "user1");

        let (_, outbound) = store.ensure_base_exists("user1");
        publish(&mut broadcaster, outbound);
        let grants: HashMap<ResourceKind, i64> =
            ResourceKind::ALL.iter().map(|&k| (k, 100_000)).collect();
        let (_, outbound) = store.give_user_resources("user1", &grants);
        publish(&mut broadcaster, outbound);

        let (result, outbound) = store.construct_building(
            "user1",
            BuildingKind::CapitalBuilding,
            Position { x: 0, y: 0 },
            false,
            0,
        );
        publish(&mut broadcaster, outbound);
        drain_events(&mut tab);
        let CallResult::Base(Some(base)) = result else {
            panic!("expected the capital to be constructed");
        };
        let capital_id = base.buildings[0].id.clone();

        let (result, outbound) = store.level_up_building("user1", &capital_id, 100_000);
        publish(&mut broadcaster, outbound);
        drain_events(&mut tab);
        let CallResult::Building(Some(_)) = result else {
            panic!("expected the capital to level up");
        };

        let synced = tab.sync.base().unwrap().building(&capital_id).unwrap();
        assert_eq!(synced.level, 2);
        assert_eq!(synced.hp, 200);
        assert_eq!(synced.last_harvest, Some(100_000));
    }

    /// Sessions of different users never see each other's events.
    #[test]
    fn events_are_isolated_per_user() {
        let mut store = BaseStore::new();
        let mut broadcaster = EventBroadcaster::new();
        let mut alice = open_session(&mut broadcaster, "alice");
        let mut bob = open_session(&mut broadcaster, "bob");

        let (_, outbound) = store.ensure_base_exists("alice");
        publish(&mut broadcaster, outbound);
        drain_events(&mut alice);
        drain_events(&mut bob);

        assert!(alice.sync.base().is_some());
        assert!(bob.sync.base().is_none());
    }
}

/// NETWORK PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// Tests packet serialization round-trip for network protocol validation
    #[tokio::test]
    async fn packet_serialization_roundtrip() {
        let test_packets = vec![
            Packet::Connect {
                client_version: PROTOCOL_VERSION,
                user_id: "user1".to_string(),
            },
            Packet::Subscribe {
                channels: ChannelKind::ALL.to_vec(),
            },
            Packet::Request {
                request_id: 1,
                call: Call::HarvestAllBuildings,
            },
            Packet::Ping,
            Packet::Connected { session_id: 42 },
            Packet::Disconnected {
                reason: "Test".to_string(),
            },
        ];

        for packet in test_packets {
            let serialized = serialize(&packet).unwrap();
            let deserialized: Packet = deserialize(&serialized).unwrap();

            match (&packet, &deserialized) {
                (Packet::Connect { .. }, Packet::Connect { .. }) => {}
                (Packet::Subscribe { .. }, Packet::Subscribe { .. }) => {}
                (Packet::Request { .. }, Packet::Request { .. }) => {}
                (Packet::Ping, Packet::Ping) => {}
                (Packet::Connected { .. }, Packet::Connected { .. }) => {}
                (Packet::Disconnected { .. }, Packet::Disconnected { .. }) => {}
                _ => panic!("Packet type mismatch after serialization"),
            }
        }
    }
}

/// END-TO-END SERVER TESTS OVER REAL UDP
mod server_tests {
    use super::*;

    async fn start_server() -> std::net::SocketAddr {
        let server = Server::new("127.0.0.1:0", 8, vec![])
            .await
            .expect("Failed to bind test server");
        let addr = server.local_addr().expect("No local address");
        tokio::spawn(async move {
            let mut server = server;
            let _ = server.run().await;
        });
        addr
    }

    async fn send(socket: &UdpSocket, addr: std::net::SocketAddr, packet: &Packet) {
        let data = serialize(packet).unwrap();
        socket.send_to(&data, addr).await.unwrap();
    }

    async fn recv(socket: &UdpSocket) -> Option<Packet> {
        let mut buffer = [0u8; 8192];
        match timeout(Duration::from_secs(2), socket.recv_from(&mut buffer)).await {
            Ok(Ok((len, _))) => deserialize(&buffer[..len]).ok(),
            _ => None,
        }
    }

    /// Collects packets until `want` of them arrived or the line goes quiet.
    async fn collect(socket: &UdpSocket, want: usize) -> Vec<Packet> {
        let mut packets = Vec::new();
        while packets.len() < want {
            match recv(socket).await {
                Some(packet) => packets.push(packet),
                None => break,
            }
        }
        packets
    }

    #[tokio::test]
    async fn connect_subscribe_and_create_base() {
        let server_addr = start_server().await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        send(
            &socket,
            server_addr,
            &Packet::Connect {
                client_version: PROTOCOL_VERSION,
                user_id: "user1".to_string(),
            },
        )
        .await;
        match recv(&socket).await {
            Some(Packet::Connected { .. }) => {}
            other => panic!("expected Connected, got {:?}", other),
        }

        send(
            &socket,
            server_addr,
            &Packet::Subscribe {
                channels: ChannelKind::ALL.to_vec(),
            },
        )
        .await;
        send(
            &socket,
            server_addr,
            &Packet::Request {
                request_id: 1,
                call: Call::CreateBaseIfNotExists,
            },
        )
        .await;

        // One push event on the base channel plus the response, in either
        // order (the event takes an extra async hop through the forwarder).
        let packets = collect(&socket, 2).await;
        let mut saw_event = false;
        let mut saw_response = false;
        for packet in packets {
            match packet {
                Packet::Event(PushEvent::Base(BaseEvent::Created(base))) => {
                    assert_eq!(base.user_id, "user1");
                    assert_eq!(
                        base.resource_amount(ResourceKind::Food),
                        STARTING_RESOURCE_AMOUNT
                    );
                    saw_event = true;
                }
                Packet::Response { request_id, result } => {
                    assert_eq!(request_id, 1);
                    assert!(matches!(result, CallResult::Base(Some(_))));
                    saw_response = true;
                }
                other => panic!("unexpected packet {:?}", other),
            }
        }
        assert!(saw_event, "push event never arrived");
        assert!(saw_response, "response never arrived");
    }

    #[tokio::test]
    async fn version_mismatch_is_refused() {
        let server_addr = start_server().await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        send(
            &socket,
            server_addr,
            &Packet::Connect {
                client_version: PROTOCOL_VERSION + 7,
                user_id: "user1".to_string(),
            },
        )
        .await;
        match recv(&socket).await {
            Some(Packet::Disconnected { .. }) => {}
            other => panic!("expected Disconnected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn admin_call_from_regular_user_is_unauthorized() {
        let server_addr = start_server().await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        send(
            &socket,
            server_addr,
            &Packet::Connect {
                client_version: PROTOCOL_VERSION,
                user_id: "user1".to_string(),
            },
        )
        .await;
        assert!(matches!(recv(&socket).await, Some(Packet::Connected { .. })));

        send(
            &socket,
            server_addr,
            &Packet::Request {
                request_id: 9,
                call: Call::GiveUserResources {
                    user_id: Some("victim".to_string()),
                    resources: HashMap::from([(ResourceKind::Gold, 1_000)]),
                },
            },
        )
        .await;
        match recv(&socket).await {
            Some(Packet::Response { request_id, result }) => {
                assert_eq!(request_id, 9);
                assert!(matches!(result, CallResult::Unauthorized));
            }
            other => panic!("expected a response, got {:?}", other),
        }
    }
}
