//! Per-user event fan-out.
//!
//! Every user has three logical channels (base, building and resource
//! updates); any number of sessions may subscribe to each. Publishing
//! delivers to the subscribers present at that instant; there is no replay
//! or buffering, so a fresh subscriber must separately request current state
//! to converge. Unsubscribing is idempotent and happens automatically for
//! every channel a session held when it disconnects or times out.

use log::debug;
use shared::{ChannelKind, PushEvent};
use std::collections::HashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// A per-user logical channel: one event category scoped to one user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Channel {
    pub kind: ChannelKind,
    pub user_id: String,
}

impl Channel {
    pub fn new(kind: ChannelKind, user_id: &str) -> Self {
        Self {
            kind,
            user_id: user_id.to_string(),
        }
    }

    pub fn base_update(user_id: &str) -> Self {
        Self::new(ChannelKind::BaseUpdated, user_id)
    }

    pub fn building_update(user_id: &str) -> Self {
        Self::new(ChannelKind::BuildingUpdated, user_id)
    }

    pub fn user_resource_update(user_id: &str) -> Self {
        Self::new(ChannelKind::UserResourcesChanged, user_id)
    }
}

/// Names a live subscription so it can be disposed of later. Dropping the
/// handle alone does not unsubscribe; call
/// [`EventBroadcaster::unsubscribe`] (safe to call more than once).
#[derive(Debug)]
pub struct SubscriptionHandle {
    pub token: u64,
    pub channel: Channel,
}

/// Fans state-change notifications out to all sessions subscribed to a
/// user's channels.
pub struct EventBroadcaster {
    subscribers: HashMap<Channel, HashMap<u64, UnboundedSender<PushEvent>>>,
    next_token: u64,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
            next_token: 1,
        }
    }

    /// Registers a new subscriber on `channel` and returns the stream of
    /// events published from this point on, plus the handle needed to
    /// unsubscribe.
    pub fn subscribe(&mut self, channel: Channel) -> (SubscriptionHandle, UnboundedReceiver<PushEvent>) {
        let token = self.next_token;
        self.next_token += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .entry(channel.clone())
            .or_default()
            .insert(token, tx);

        (SubscriptionHandle { token, channel }, rx)
    }

    /// Removes one subscriber. Unknown handles are ignored, so calling this
    /// twice (or racing a disconnect sweep) is harmless.
    pub fn unsubscribe(&mut self, handle: &SubscriptionHandle) {
        if let Some(entries) = self.subscribers.get_mut(&handle.channel) {
            entries.remove(&handle.token);
            if entries.is_empty() {
                self.subscribers.remove(&handle.channel);
            }
        }
    }

    /// Delivers `event` to every current subscriber of `channel`, pruning
    /// subscribers whose receiving side has gone away. Returns how many
    /// subscribers were reached.
    pub fn publish(&mut self, channel: &Channel, event: PushEvent) -> usize {
        let Some(entries) = self.subscribers.get_mut(channel) else {
            return 0;
        };

        let mut delivered = 0;
        entries.retain(|token, tx| match tx.send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                debug!("pruning dead subscriber {} on {:?}", token, channel);
                false
            }
        });
        if entries.is_empty() {
            self.subscribers.remove(channel);
        }
        delivered
    }

    pub fn subscriber_count(&self, channel: &Channel) -> usize {
        self.subscribers.get(channel).map(|e| e.len()).unwrap_or(0)
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{BaseEvent, Resource, ResourceKind};

    fn resource_event(amount: i64) -> PushEvent {
        PushEvent::Resources(vec![Resource {
            id: "r1".to_string(),
            kind: ResourceKind::Iron,
            amount,
        }])
    }

    #[test]
    fn test_publish_reaches_all_subscribers() {
        let mut broadcaster = EventBroadcaster::new();
        let channel = Channel::user_resource_update("user1");
        let (_h1, mut rx1) = broadcaster.subscribe(channel.clone());
        let (_h2, mut rx2) = broadcaster.subscribe(channel.clone());

        let delivered = broadcaster.publish(&channel, resource_event(5));
        assert_eq!(delivered, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_channels_are_per_user() {
        let mut broadcaster = EventBroadcaster::new();
        let (_handle, mut rx) = broadcaster.subscribe(Channel::user_resource_update("user1"));

        broadcaster.publish(&Channel::user_resource_update("user2"), resource_event(5));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_no_replay_for_late_subscribers() {
        let mut broadcaster = EventBroadcaster::new();
        let channel = Channel::user_resource_update("user1");
        broadcaster.publish(&channel, resource_event(5));

        let (_handle, mut rx) = broadcaster.subscribe(channel.clone());
        assert!(rx.try_recv().is_err());

        broadcaster.publish(&channel, resource_event(6));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let mut broadcaster = EventBroadcaster::new();
        let channel = Channel::base_update("user1");
        let (handle, mut rx) = broadcaster.subscribe(channel.clone());

        broadcaster.unsubscribe(&handle);
        broadcaster.unsubscribe(&handle);

        broadcaster.publish(
            &channel,
            PushEvent::Base(BaseEvent::Destroyed {
                id: "base1".to_string(),
            }),
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(broadcaster.subscriber_count(&channel), 0);
    }

    #[test]
    fn test_dropped_receivers_are_pruned_on_publish() {
        let mut broadcaster = EventBroadcaster::new();
        let channel = Channel::user_resource_update("user1");
        let (_handle, rx) = broadcaster.subscribe(channel.clone());
        drop(rx);

        assert_eq!(broadcaster.publish(&channel, resource_event(5)), 0);
        assert_eq!(broadcaster.subscriber_count(&channel), 0);
    }
}
