//! Broadcast registry for live WebSocket connections.
//!
//! Each registered connection owns a channel; its frame loop drains the
//! receiver and writes to the socket. `broadcast` only ever touches the
//! registry's map while holding the lock — the actual send happens
//! after the lock is released, and any connection whose send fails is
//! dropped from the registry rather than treated as fatal to the
//! broadcast itself.

use super::Frame;
use crate::sync::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub type ConnId = u64;

#[derive(Default)]
pub struct Registry {
    conns: Mutex<HashMap<ConnId, UnboundedSender<Frame>>>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection and returns its id plus the receiving
    /// end of its outbound-frame channel.
    pub fn register(&self) -> (ConnId, UnboundedReceiver<Frame>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.conns.lock().insert(id, tx);
        (id, rx)
    }

    pub fn unregister(&self, id: ConnId) {
        self.conns.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.conns.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Best-effort send of `frame` to every registered connection.
    /// Connections whose channel is closed are pruned from the registry.
    pub fn broadcast(&self, frame: Frame) {
        let senders: Vec<(ConnId, UnboundedSender<Frame>)> =
            self.conns.lock().iter().map(|(id, tx)| (*id, tx.clone())).collect();

        let mut dead = Vec::new();
        for (id, tx) in senders {
            if tx.send(frame.clone()).is_err() {
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            let mut conns = self.conns.lock();
            for id in dead {
                conns.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::Opcode;

    #[tokio::test]
    async fn broadcast_reaches_every_registered_connection() {
        let registry = Registry::new();
        let (_id1, mut rx1) = registry.register();
        let (_id2, mut rx2) = registry.register();

        registry.broadcast(Frame::text("hello"));

        assert_eq!(rx1.recv().await.unwrap().payload, b"hello");
        assert_eq!(rx2.recv().await.unwrap().payload, b"hello");
    }

    #[tokio::test]
    async fn dropped_receiver_is_pruned_on_next_broadcast() {
        let registry = Registry::new();
        let (_id1, rx1) = registry.register();
        drop(rx1);

        registry.broadcast(Frame::text("ping"));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn unregister_removes_the_connection() {
        let registry = Registry::new();
        let (id, _rx) = registry.register();
        assert_eq!(registry.len(), 1);
        registry.unregister(id);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn broadcast_preserves_opcode() {
        let registry = Registry::new();
        let (_id, mut rx) = registry.register();
        registry.broadcast(Frame::pong(b"p".to_vec()));
        assert_eq!(rx.recv().await.unwrap().opcode, Opcode::Pong);
    }
}
