use chrono::NaiveDate;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

const CHANNEL_CAPACITY: usize = 256;

/// Lifecycle events an owner can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    ReservationCreated,
    ReservationUpdated,
    ReservationCancelled,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ReservationCreated => "reservationCreated",
            EventKind::ReservationUpdated => "reservationUpdated",
            EventKind::ReservationCancelled => "reservationCancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationEvent {
    pub kind: EventKind,
    pub reservation_id: Ulid,
    pub restaurant_id: Ulid,
    pub date: NaiveDate,
    pub time: String,
}

/// Broadcast hub for LISTEN/NOTIFY per restaurant.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<ReservationEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a restaurant's events. Creates the channel if needed.
    pub fn subscribe(&self, restaurant_id: Ulid) -> broadcast::Receiver<ReservationEvent> {
        let sender = self
            .channels
            .entry(restaurant_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Returns how many receivers got the event. Zero if nobody listens.
    pub fn publish(&self, restaurant_id: Ulid, event: &ReservationEvent) -> usize {
        match self.channels.get(&restaurant_id) {
            Some(sender) => sender.send(event.clone()).unwrap_or(0),
            None => 0,
        }
    }

    pub fn subscriber_count(&self, restaurant_id: &Ulid) -> usize {
        self.channels
            .get(restaurant_id)
            .map_or(0, |s| s.receiver_count())
    }

    /// Drop channels whose receivers are all gone.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(restaurant_id: Ulid) -> ReservationEvent {
        ReservationEvent {
            kind: EventKind::ReservationCreated,
            reservation_id: Ulid::new(),
            restaurant_id,
            date: NaiveDate::from_ymd_opt(2030, 1, 2).unwrap(),
            time: "19:00".into(),
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        let mut rx = hub.subscribe(rid);

        let ev = event(rid);
        assert_eq!(hub.publish(rid, &ev), 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, ev);
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        assert_eq!(hub.publish(rid, &event(rid)), 0);
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn other_restaurants_are_not_notified() {
        let hub = NotifyHub::new();
        let a = Ulid::new();
        let b = Ulid::new();
        let mut rx = hub.subscribe(a);
        hub.publish(b, &event(b));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn prune_drops_abandoned_channels() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        let rx = hub.subscribe(rid);
        assert_eq!(hub.subscriber_count(&rid), 1);
        hub.prune();
        assert_eq!(hub.channel_count(), 1);
        drop(rx);
        hub.prune();
        assert_eq!(hub.channel_count(), 0);
    }

    #[test]
    fn payload_uses_camel_case_wire_names() {
        let rid = Ulid::new();
        let json = serde_json::to_value(event(rid)).unwrap();
        assert_eq!(json["kind"], "reservationCreated");
        assert_eq!(json["restaurantId"], rid.to_string());
        assert_eq!(json["date"], "2030-01-02");
        assert_eq!(json["time"], "19:00");
        assert_eq!(EventKind::ReservationCancelled.as_str(), "reservationCancelled");
    }
}
