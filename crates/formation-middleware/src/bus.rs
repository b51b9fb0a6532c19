//! Lossy broadcast medium between a leader and its followers.
//!
//! Uses [`tokio::sync::broadcast`] so every listener sees every frame
//! without any listener blocking the others.  Delivery is best effort:
//! frames sent with nobody listening are gone, slow listeners lose the
//! oldest frames, and the medium can be told to drop frames on purpose to
//! exercise dead reckoning.
//!
//! Listeners are typed.  A [`Listener<T>`] only yields frames broadcast
//! under its [`ChannelKey`] whose payload decodes as `T`; anything else is
//! dropped at the boundary.
//!
//! # Example
//!
//! ```rust
//! use formation_middleware::bus::BroadcastMedium;
//! use formation_middleware::wire::{ChannelKey, CommandMessage};
//!
//! let medium = BroadcastMedium::default();
//! let mut commands = medium.listen::<CommandMessage>(ChannelKey::command("System1"));
//!
//! medium.transmit(&ChannelKey::command("System1"), &CommandMessage::broadcast("stop"));
//! assert_eq!(commands.drain(), vec![CommandMessage::broadcast("stop")]);
//! ```

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use formation_types::FormationError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::wire::ChannelKey;

/// Default channel capacity (frames buffered before slow listeners lag).
const DEFAULT_CAPACITY: usize = 256;

/// One frame on the air.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub tag: String,
    pub data: serde_json::Value,
}

/// Shared broadcast medium.  Clone it cheaply; all clones share the same
/// channel.
#[derive(Clone, Debug)]
pub struct BroadcastMedium {
    sender: broadcast::Sender<Frame>,
    drop_every: Option<u64>,
    sent: Arc<AtomicU64>,
}

impl BroadcastMedium {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            drop_every: None,
            sent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Silently lose every `n`th transmitted frame.  `0` and `1` are treated
    /// as no loss and total loss respectively.
    pub fn with_loss(mut self, n: u64) -> Self {
        self.drop_every = (n > 0).then_some(n);
        self
    }

    /// Serialize `payload` and broadcast it under `key`.
    ///
    /// Returns the number of listeners handed the frame; `0` when nobody is
    /// listening or the frame was lost, which is not an error.
    pub fn transmit<T: Serialize>(&self, key: &ChannelKey, payload: &T) -> usize {
        match self.try_transmit(key, payload) {
            Ok(n) => n,
            Err(e) => {
                warn!(channel = %key, error = %e, "transmit failed");
                0
            }
        }
    }

    /// Like [`transmit`](Self::transmit) but reports serialization failures.
    pub fn try_transmit<T: Serialize>(
        &self,
        key: &ChannelKey,
        payload: &T,
    ) -> Result<usize, FormationError> {
        let data = serde_json::to_value(payload)
            .map_err(|e| FormationError::Channel(format!("encode for {key}: {e}")))?;
        let count = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        if self.drop_every.is_some_and(|n| count % n == 0) {
            trace!(channel = %key, "frame lost");
            return Ok(0);
        }
        let frame = Frame {
            tag: key.tag(),
            data,
        };
        Ok(self.sender.send(frame).unwrap_or(0))
    }

    /// Start listening on `key`.  Only frames sent after this call are seen.
    pub fn listen<T: DeserializeOwned>(&self, key: ChannelKey) -> Listener<T> {
        Listener {
            tag: key.tag(),
            key,
            receiver: self.sender.subscribe(),
            _payload: PhantomData,
        }
    }
}

impl Default for BroadcastMedium {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Typed receiving end of one channel.
pub struct Listener<T> {
    key: ChannelKey,
    tag: String,
    receiver: broadcast::Receiver<Frame>,
    _payload: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Listener<T> {
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    /// Next pending payload, without waiting.
    pub fn try_next(&mut self) -> Option<T> {
        loop {
            match self.receiver.try_recv() {
                Ok(frame) => {
                    if let Some(payload) = self.accept(frame) {
                        return Some(payload);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(channel = %self.key, lagged_by = n, "listener lagged");
                }
                Err(broadcast::error::TryRecvError::Empty)
                | Err(broadcast::error::TryRecvError::Closed) => return None,
            }
        }
    }

    /// Every pending payload, oldest first.
    pub fn drain(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    fn accept(&self, frame: Frame) -> Option<T> {
        if frame.tag != self.tag {
            return None;
        }
        match decode(&self.key, frame.data) {
            Ok(payload) => Some(payload),
            Err(e) => {
                debug!(error = %e, "dropping frame");
                None
            }
        }
    }
}

fn decode<T: DeserializeOwned>(key: &ChannelKey, data: serde_json::Value) -> Result<T, FormationError> {
    serde_json::from_value(data).map_err(|e| {
        FormationError::ProtocolMismatch(format!("unexpected payload on {key}: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{CommandMessage, PoseMessage};
    use formation_types::{EntityId, RigidTransform, Vec3};

    #[test]
    fn listener_filters_by_channel_and_system() {
        let medium = BroadcastMedium::default();
        let mut poses = medium.listen::<PoseMessage>(ChannelKey::pose("A"));
        let pose = PoseMessage::new(&RigidTransform::identity(), Vec3::ZERO, EntityId(1));

        medium.transmit(&ChannelKey::pose("B"), &pose);
        medium.transmit(&ChannelKey::command("A"), &CommandMessage::broadcast("stop"));
        medium.transmit(&ChannelKey::pose("A"), &pose);

        assert_eq!(poses.drain(), vec![pose]);
        assert!(poses.try_next().is_none());
    }

    #[test]
    fn foreign_payload_is_dropped_at_the_boundary() {
        let medium = BroadcastMedium::default();
        let key = ChannelKey::command("A");
        let mut commands = medium.listen::<CommandMessage>(key.clone());

        medium.transmit(&key, &serde_json::json!({"hello": 1}));
        medium.transmit(&key, &42);
        medium.transmit(&key, &CommandMessage::broadcast("start"));

        assert_eq!(commands.drain(), vec![CommandMessage::broadcast("start")]);
    }

    #[test]
    fn nobody_listening_is_not_an_error() {
        let medium = BroadcastMedium::default();
        assert_eq!(medium.transmit(&ChannelKey::pose("A"), &CommandMessage::broadcast("x")), 0);
    }

    #[test]
    fn every_listener_sees_every_frame() {
        let medium = BroadcastMedium::default();
        let key = ChannelKey::command("A");
        let mut a = medium.listen::<CommandMessage>(key.clone());
        let mut b = medium.listen::<CommandMessage>(key.clone());
        assert_eq!(medium.transmit(&key, &CommandMessage::broadcast("stop")), 2);
        assert_eq!(a.drain().len(), 1);
        assert_eq!(b.drain().len(), 1);
    }

    #[test]
    fn configured_loss_drops_every_nth_frame() {
        let medium = BroadcastMedium::default().with_loss(3);
        let key = ChannelKey::command("A");
        let mut rx = medium.listen::<CommandMessage>(key.clone());
        for i in 0..9 {
            medium.transmit(&key, &CommandMessage::broadcast(i.to_string()));
        }
        let got: Vec<String> = rx.drain().into_iter().map(|c| c.1).collect();
        assert_eq!(got, vec!["0", "1", "3", "4", "6", "7"]);
    }

    #[test]
    fn slow_listener_lags_but_keeps_receiving() {
        let medium = BroadcastMedium::new(4);
        let key = ChannelKey::command("A");
        let mut rx = medium.listen::<CommandMessage>(key.clone());
        for i in 0..10 {
            medium.transmit(&key, &CommandMessage::broadcast(i.to_string()));
        }
        let got: Vec<String> = rx.drain().into_iter().map(|c| c.1).collect();
        assert_eq!(got, vec!["6", "7", "8", "9"]);
    }
}
