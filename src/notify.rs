use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::info;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed events: one channel per unit plus a feed of
/// everything.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
    all: broadcast::Sender<Event>,
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
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to notifications for a unit. Creates the channel if needed.
    pub fn subscribe(&self, unit_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(unit_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Drop unit channels nobody is listening on any more.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.all.subscribe()
    }

    /// Send a unit's event to its channel and the global feed. No-op if nobody is listening.
    pub fn send(&self, unit_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&unit_id) {
            let _ = sender.send(event.clone());
        }
        self.publish(event);
    }

    /// Global feed only, for events that belong to no single unit.
    pub fn publish(&self, event: &Event) {
        let _ = self.all.send(event.clone());
    }
}

/// Guest-facing line for an event, if guests would hear about it.
pub fn guest_notice(event: &Event) -> Option<String> {
    match event {
        Event::ReservationCreated { reservation } => Some(format!(
            "booking {} received for {} ({}), {} night(s) from {}",
            reservation.id,
            reservation.guest.name,
            reservation
                .guest
                .email
                .as_deref()
                .or(reservation.guest.phone.as_deref())
                .unwrap_or("no contact"),
            reservation.range.nights(),
            reservation.range.check_in,
        )),
        Event::ReservationConfirmed { id, .. } => Some(format!("booking {id} confirmed")),
        Event::ReservationCancelled { id, .. } => Some(format!("booking {id} cancelled")),
        Event::GuestArrived { id, .. } => Some(format!("welcome, booking {id} checked in")),
        Event::GuestDeparted { id, .. } => Some(format!("thank you, booking {id} checked out")),
        Event::InvoiceIssued { id, .. } => Some(format!("invoice {id} issued")),
        Event::InvoiceCreated { invoice } if invoice.status != crate::model::InvoiceStatus::Draft => {
            Some(format!("invoice {} issued, total {}", invoice.id, invoice.total))
        }
        Event::PaymentRecorded {
            invoice_id, amount, ..
        } => Some(format!("payment of {amount} received on invoice {invoice_id}")),
        _ => None,
    }
}

/// Notification sink: logs every guest-facing event until the hub goes away.
pub async fn run_notification_log(mut rx: broadcast::Receiver<Event>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Some(notice) = guest_notice(&event) {
                    info!(target: "innkeep::guest", "{notice}");
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("notification log lagged, {n} event(s) dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Money;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let uid = Ulid::new();
        let mut rx = hub.subscribe(uid);
        let mut all = hub.subscribe_all();

        let event = Event::UnitPriceSet {
            unit_id: uid,
            price: Money::from_major(420),
        };
        hub.send(uid, &event);

        assert_eq!(rx.recv().await.unwrap(), event);
        assert_eq!(all.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn other_units_are_not_delivered() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe(Ulid::new());
        hub.send(
            Ulid::new(),
            &Event::OfferReverted {
                id: Ulid::new(),
                unit_id: Ulid::new(),
            },
        );
        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }

    #[test]
    fn prune_drops_channels_without_receivers() {
        let hub = NotifyHub::new();
        let kept = hub.subscribe(Ulid::new());
        let gone = hub.subscribe(Ulid::new());
        assert_eq!(hub.channels.len(), 2);

        drop(gone);
        hub.prune();
        assert_eq!(hub.channels.len(), 1);

        drop(kept);
        hub.prune();
        assert!(hub.channels.is_empty());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.publish(&Event::RateModifierRemoved { id: Ulid::new() });
    }

    #[test]
    fn only_guest_facing_events_produce_notices() {
        let id = Ulid::new();
        let unit_id = Ulid::new();
        assert!(guest_notice(&Event::GuestArrived { id, unit_id, at: 0 }).is_some());
        assert!(guest_notice(&Event::UnitPriceSet {
            unit_id,
            price: Money::from_major(1)
        })
        .is_none());
    }
}
