//! Delivery ticks for direct messages.
//!
//! A direct message moves `Sent -> Delivered -> Read` and never backwards.
//! Reading implies delivery: marking a sent message read stamps both
//! `delivered_at` and `read_at` with the same instant. Re-marking is a no-op,
//! so the same receipt is never emitted twice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Sent,
    Delivered,
    Read,
}

impl DeliveryState {
    pub fn from_flags(is_delivered: bool, is_read: bool) -> Self {
        if is_read {
            DeliveryState::Read
        } else if is_delivered {
            DeliveryState::Delivered
        } else {
            DeliveryState::Sent
        }
    }

    /// Returns the new state if `target` moves forward, `None` otherwise.
    pub fn advance(self, target: DeliveryState) -> Option<DeliveryState> {
        (target > self).then_some(target)
    }

    pub fn is_delivered(self) -> bool {
        self >= DeliveryState::Delivered
    }

    pub fn is_read(self) -> bool {
        self == DeliveryState::Read
    }
}

/// The stored delivery columns of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeliveryStamps {
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

impl DeliveryStamps {
    pub fn state(&self) -> DeliveryState {
        DeliveryState::from_flags(self.delivered_at.is_some(), self.read_at.is_some())
    }

    /// Moves the stamps towards `target`. Returns false when nothing changed.
    pub fn apply(&mut self, target: DeliveryState, now: DateTime<Utc>) -> bool {
        let Some(next) = self.state().advance(target) else {
            return false;
        };
        if next.is_delivered() && self.delivered_at.is_none() {
            self.delivered_at = Some(now);
        }
        if next.is_read() {
            self.read_at = Some(now);
        }
        true
    }
}

/// Emitted to the sender whenever a direct message changes state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: i64,
    pub sender_id: i64,
    pub recipient_id: i64,
    pub state: DeliveryState,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn states_only_move_forward() {
        assert_eq!(
            DeliveryState::Sent.advance(DeliveryState::Delivered),
            Some(DeliveryState::Delivered)
        );
        assert_eq!(DeliveryState::Read.advance(DeliveryState::Delivered), None);
        assert_eq!(DeliveryState::Delivered.advance(DeliveryState::Delivered), None);
    }

    #[test]
    fn reading_a_sent_message_stamps_delivery_too() {
        let now = Utc::now();
        let mut stamps = DeliveryStamps::default();
        assert!(stamps.apply(DeliveryState::Read, now));
        assert_eq!(stamps.delivered_at, Some(now));
        assert_eq!(stamps.read_at, Some(now));
        assert_eq!(stamps.state(), DeliveryState::Read);
    }

    #[test]
    fn delivery_time_is_kept_when_read_later() {
        let delivered = Utc::now();
        let read = delivered + Duration::seconds(30);
        let mut stamps = DeliveryStamps::default();
        assert!(stamps.apply(DeliveryState::Delivered, delivered));
        assert!(stamps.apply(DeliveryState::Read, read));
        assert_eq!(stamps.delivered_at, Some(delivered));
        assert!(stamps.delivered_at <= stamps.read_at);
    }

    #[test]
    fn repeated_marks_are_no_ops() {
        let now = Utc::now();
        let mut stamps = DeliveryStamps::default();
        stamps.apply(DeliveryState::Read, now);
        let before = stamps;
        assert!(!stamps.apply(DeliveryState::Read, now + Duration::seconds(5)));
        assert!(!stamps.apply(DeliveryState::Delivered, now + Duration::seconds(5)));
        assert_eq!(stamps, before);
    }
}
