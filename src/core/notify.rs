//! Post-commit order events and the branch-room broadcaster.
//!
//! The core only talks to [`NotificationPort`]. Events are published after the
//! owning transaction committed; delivery is best-effort and at-most-once, and
//! a failing or stalled publisher never affects the committed order.

use crate::{
    entities::{order, order_item},
    errors::Result,
};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    time::timeout,
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Longest a caller waits on a publisher after its transaction committed.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(2);

/// An order together with its lines, as created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlacedOrder {
    /// The order row
    #[serde(flatten)]
    pub order: order::Model,
    /// Its lines
    pub items: Vec<order_item::Model>,
}

/// Events fanned out to the subscribers of a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum OrderEvent {
    /// Emitted once per committed order.
    NewOrder {
        /// Room the event is delivered to
        branch_id: Uuid,
        /// The created order
        order: PlacedOrder,
    },
    /// Emitted once per order whose status changed, promotions included.
    OrderStatusUpdated {
        /// Room the event is delivered to
        branch_id: Uuid,
        /// The order after the change
        order: order::Model,
    },
}

impl OrderEvent {
    /// Branch whose subscribers receive the event.
    #[must_use]
    pub const fn branch_id(&self) -> Uuid {
        match self {
            Self::NewOrder { branch_id, .. } | Self::OrderStatusUpdated { branch_id, .. } => {
                *branch_id
            }
        }
    }

    /// Event name on the wire.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NewOrder { .. } => "newOrder",
            Self::OrderStatusUpdated { .. } => "orderStatusUpdated",
        }
    }
}

/// Outbound port for order events.
#[async_trait]
pub trait NotificationPort: Send + Sync {
    /// Hands one event to the delivery transport.
    async fn publish(&self, event: OrderEvent) -> Result<()>;
}

/// Publishes `event`, logging and dropping any failure. A publisher that has
/// not finished within `limit` is abandoned.
pub(crate) async fn deliver(port: &dyn NotificationPort, event: OrderEvent, limit: Duration) {
    let name = event.name();
    let branch_id = event.branch_id();
    match timeout(limit, port.publish(event)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            warn!(event = name, %branch_id, error = %err, "Dropped order notification");
        }
        Err(_) => {
            warn!(event = name, %branch_id, ?limit, "Order notification timed out");
        }
    }
}

/// In-process fan-out over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BranchBroadcaster {
    sender: broadcast::Sender<OrderEvent>,
}

impl Default for BranchBroadcaster {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl BranchBroadcaster {
    /// Creates a broadcaster buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Joins the room of `branch_id`.
    #[must_use]
    pub fn subscribe(&self, branch_id: Uuid) -> BranchSubscription {
        BranchSubscription {
            branch_id,
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of live subscriptions across all branches.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl NotificationPort for BranchBroadcaster {
    async fn publish(&self, event: OrderEvent) -> Result<()> {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => debug!(event = name, receivers, "Published order event"),
            Err(_) => debug!(event = name, "No subscribers for order event"),
        }
        Ok(())
    }
}

/// Receiving end of one branch room.
#[derive(Debug)]
pub struct BranchSubscription {
    branch_id: Uuid,
    receiver: broadcast::Receiver<OrderEvent>,
}

impl BranchSubscription {
    /// Branch this subscription listens to.
    #[must_use]
    pub const fn branch_id(&self) -> Uuid {
        self.branch_id
    }

    /// Next event for this branch, or `None` once the broadcaster is gone.
    ///
    /// Events of other branches are skipped. A slow subscriber that fell
    /// behind loses the overwritten events and continues with the oldest
    /// retained one.
    pub async fn recv(&mut self) -> Option<OrderEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.branch_id() == self.branch_id => return Some(event),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(branch_id = %self.branch_id, skipped, "Subscriber lagged behind");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use crate::test_utils::*;

    fn status_event(branch_id: Uuid, order_number: i64) -> OrderEvent {
        OrderEvent::OrderStatusUpdated {
            branch_id,
            order: sample_order(branch_id, order_number),
        }
    }

    #[tokio::test]
    async fn test_subscribers_only_see_their_branch() {
        let bus = BranchBroadcaster::new(16);
        let branch_a = Uuid::new_v4();
        let branch_b = Uuid::new_v4();
        let mut room_a = bus.subscribe(branch_a);
        let mut room_b = bus.subscribe(branch_b);
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(status_event(branch_b, 1)).await.unwrap();
        bus.publish(status_event(branch_a, 2)).await.unwrap();

        let got_a = room_a.recv().await.unwrap();
        assert_eq!(got_a.branch_id(), branch_a);
        let got_b = room_b.recv().await.unwrap();
        assert_eq!(got_b.branch_id(), branch_b);

        // Nothing else is pending for A
        let pending = tokio::time::timeout(Duration::from_millis(20), room_a.recv()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = BranchBroadcaster::default();
        assert!(bus.publish(status_event(Uuid::new_v4(), 1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_lagged_subscriber_skips_ahead() {
        let bus = BranchBroadcaster::new(2);
        let branch = Uuid::new_v4();
        let mut room = bus.subscribe(branch);

        for number in 1..=5 {
            bus.publish(status_event(branch, number)).await.unwrap();
        }

        let Some(OrderEvent::OrderStatusUpdated { order, .. }) = room.recv().await else {
            panic!("expected a status event");
        };
        assert_eq!(order.order_number, 4);
    }

    #[tokio::test]
    async fn test_closed_broadcaster_ends_subscription() {
        let bus = BranchBroadcaster::new(4);
        let mut room = bus.subscribe(Uuid::new_v4());
        drop(bus);
        assert!(room.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_deliver_swallows_failures() {
        let failing = FailingNotifier;
        deliver(&failing, status_event(Uuid::new_v4(), 1), PUBLISH_TIMEOUT).await;

        let recording = RecordingNotifier::default();
        deliver(&recording, status_event(Uuid::new_v4(), 7), PUBLISH_TIMEOUT).await;
        assert_eq!(recording.events().len(), 1);
    }

    #[tokio::test]
    async fn test_deliver_abandons_stalled_publisher() {
        let limit = Duration::from_millis(20);
        let delivered = tokio::time::timeout(
            Duration::from_secs(1),
            deliver(&StalledNotifier, status_event(Uuid::new_v4(), 1), limit),
        )
        .await;
        assert!(delivered.is_ok());
    }

    #[test]
    fn test_event_wire_names() {
        let branch = Uuid::new_v4();
        let event = status_event(branch, 3);
        assert_eq!(event.name(), "orderStatusUpdated");

        let placed = OrderEvent::NewOrder {
            branch_id: branch,
            order: PlacedOrder {
                order: sample_order(branch, 1),
                items: Vec::new(),
            },
        };
        assert_eq!(placed.name(), "newOrder");
        assert_eq!(placed.branch_id(), branch);
    }
}
