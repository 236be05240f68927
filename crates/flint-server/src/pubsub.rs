//! Pub/sub hub: channel → subscriber routing.
//!
//! Connections register a push sender at accept time; subscriptions
//! map channel names to connection ids. Delivery goes through the
//! registered sender, so published messages ride the same socket as
//! command replies without the hub ever touching a socket.
//!
//! DashMap guards are never nested: lookups copy what they need out
//! of one map before touching the other.

use std::collections::HashSet;

use bytes::Bytes;
use dashmap::DashMap;
use flint_core::engine::Hub;
use flint_protocol::Frame;
use tokio::sync::mpsc::UnboundedSender;

struct ConnEntry {
    sender: UnboundedSender<Frame>,
    channels: HashSet<String>,
}

/// The hub. One per server, shared as `Arc<PubSub>`.
#[derive(Default)]
pub struct PubSub {
    channels: DashMap<String, HashSet<u64>>,
    conns: DashMap<u64, ConnEntry>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection's push channel. Must be called before
    /// the connection can subscribe.
    pub fn register(&self, conn_id: u64, sender: UnboundedSender<Frame>) {
        self.conns.insert(
            conn_id,
            ConnEntry {
                sender,
                channels: HashSet::new(),
            },
        );
    }

    /// Removes a connection entirely: subscriptions and push channel.
    pub fn unregister(&self, conn_id: u64) {
        self.unsubscribe_all(conn_id);
        self.conns.remove(&conn_id);
    }

    /// Number of live subscriptions across all channels (for tests
    /// and introspection).
    pub fn subscription_count(&self) -> usize {
        self.channels.iter().map(|entry| entry.len()).sum()
    }
}

/// Builds the push frame subscribers receive.
fn message_frame(channel: &str, message: &Bytes) -> Frame {
    Frame::array(vec![
        Frame::bulk("message"),
        Frame::bulk(channel.to_owned()),
        Frame::Bulk(Some(message.clone())),
    ])
}

impl Hub for PubSub {
    fn subscribe(&self, conn_id: u64, channel: &str) -> usize {
        {
            let mut subscribers = self.channels.entry(channel.to_owned()).or_default();
            subscribers.insert(conn_id);
        }
        match self.conns.get_mut(&conn_id) {
            Some(mut entry) => {
                entry.channels.insert(channel.to_owned());
                entry.channels.len()
            }
            None => 0,
        }
    }

    fn unsubscribe(&self, conn_id: u64, channel: &str) -> usize {
        {
            if let Some(mut subscribers) = self.channels.get_mut(channel) {
                subscribers.remove(&conn_id);
                if subscribers.is_empty() {
                    drop(subscribers);
                    self.channels.remove_if(channel, |_, subs| subs.is_empty());
                }
            }
        }
        match self.conns.get_mut(&conn_id) {
            Some(mut entry) => {
                entry.channels.remove(channel);
                entry.channels.len()
            }
            None => 0,
        }
    }

    fn publish(&self, channel: &str, message: &Bytes) -> usize {
        let subscribers: Vec<u64> = match self.channels.get(channel) {
            Some(subscribers) => subscribers.iter().copied().collect(),
            None => return 0,
        };

        let frame = message_frame(channel, message);
        let mut delivered = 0;
        for conn_id in subscribers {
            if let Some(entry) = self.conns.get(&conn_id) {
                if entry.sender.send(frame.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    fn unsubscribe_all(&self, conn_id: u64) {
        let channels: Vec<String> = match self.conns.get_mut(&conn_id) {
            Some(mut entry) => entry.channels.drain().collect(),
            None => return,
        };
        for channel in channels {
            if let Some(mut subscribers) = self.channels.get_mut(&channel) {
                subscribers.remove(&conn_id);
            }
            self.channels.remove_if(&channel, |_, subs| subs.is_empty());
        }
    }

    fn channels_of(&self, conn_id: u64) -> Vec<String> {
        match self.conns.get(&conn_id) {
            Some(entry) => entry.channels.iter().cloned().collect(),
            None => Vec::new(),
        }
    }
}
