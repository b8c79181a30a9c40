use std::sync::Arc;

use crate::mailer::Mailer;
use crate::model::{Reservation, Restaurant, TableSize};
use crate::notify::{EventKind, NotifyHub, ReservationEvent};
use crate::time::minutes_to_time;

/// Fans reservation lifecycle events out to LISTEN sessions and the diner's
/// inbox. Nothing here can fail the mutation that triggered it.
pub struct Dispatcher {
    hub: Arc<NotifyHub>,
    mailer: Arc<dyn Mailer>,
}

impl Dispatcher {
    pub fn new(hub: Arc<NotifyHub>, mailer: Arc<dyn Mailer>) -> Self {
        Self { hub, mailer }
    }

    pub fn hub(&self) -> &Arc<NotifyHub> {
        &self.hub
    }

    pub fn reservation_created(&self, restaurant: &Restaurant, r: &Reservation, email: &str) {
        let subject = format!("Reservation confirmed at {}", restaurant.name);
        let html = format!(
            "<h1>Your table is booked</h1>\
             <p>{} on {} at {}.</p>\
             <p>Tables: {}</p>\
             <p>Entry code: <strong>{}</strong></p>",
            escape(&restaurant.name),
            r.date,
            minutes_to_time(r.time),
            describe_tables(r),
            r.entry_code,
        );
        self.dispatch(EventKind::ReservationCreated, r, email, subject, html);
    }

    pub fn reservation_updated(&self, restaurant: &Restaurant, r: &Reservation, email: &str) {
        let subject = format!("Reservation updated at {}", restaurant.name);
        let html = format!(
            "<h1>Your reservation has changed</h1>\
             <p>{} on {} at {}.</p>\
             <p>Tables: {}</p>\
             <p>Entry code: <strong>{}</strong></p>",
            escape(&restaurant.name),
            r.date,
            minutes_to_time(r.time),
            describe_tables(r),
            r.entry_code,
        );
        self.dispatch(EventKind::ReservationUpdated, r, email, subject, html);
    }

    pub fn reservation_cancelled(&self, restaurant: &Restaurant, r: &Reservation, email: &str) {
        let subject = format!("Reservation cancelled at {}", restaurant.name);
        let html = format!(
            "<h1>Your reservation was cancelled</h1>\
             <p>{} on {} at {} will not be held for you.</p>",
            escape(&restaurant.name),
            r.date,
            minutes_to_time(r.time),
        );
        self.dispatch(EventKind::ReservationCancelled, r, email, subject, html);
    }

    fn dispatch(&self, kind: EventKind, r: &Reservation, email: &str, subject: String, html: String) {
        let event = ReservationEvent {
            kind,
            reservation_id: r.id,
            restaurant_id: r.restaurant_id,
            date: r.date,
            time: minutes_to_time(r.time),
        };
        let delivered = self.hub.publish(r.restaurant_id, &event);
        metrics::counter!(crate::observability::NOTIFICATIONS_PUBLISHED_TOTAL, "kind" => kind.as_str())
            .increment(1);
        tracing::debug!("{} for {} delivered to {delivered} listeners", kind.as_str(), r.id);

        if email.is_empty() {
            tracing::debug!("no email on session, skipping {} mail for {}", kind.as_str(), r.id);
            return;
        }
        let mailer = self.mailer.clone();
        let to = email.to_string();
        let reservation_id = r.id;
        tokio::spawn(async move {
            match mailer.send(&to, &subject, &html).await {
                Ok(()) => {
                    metrics::counter!(crate::observability::MAIL_SENT_TOTAL).increment(1);
                }
                Err(e) => {
                    metrics::counter!(crate::observability::MAIL_FAILED_TOTAL).increment(1);
                    tracing::warn!("{} mail for reservation {reservation_id} failed: {e}", kind.as_str());
                }
            }
        });
    }
}

fn describe_tables(r: &Reservation) -> String {
    let parts: Vec<String> = TableSize::ALL
        .into_iter()
        .filter(|&s| r.tables.get(s) > 0)
        .map(|s| format!("{} x {}-person", r.tables.get(s), s.seats()))
        .collect();
    parts.join(", ")
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
