use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::time::{now_local, time_to_minutes};

use super::availability::{remaining_tables, slot_availability};
use super::conflict::{
    check_lead_time, check_open, check_tables_fit, validate_capacity, validate_hours,
    validate_restaurant_text, validate_tables,
};
use super::{Engine, EngineError};

const RESERVATION_NOT_FOUND: &str = "Reservation not found";
const NOT_FOUND_OR_UNAUTHORIZED: &str = "Reservation not found or unauthorized";

pub(super) fn require_owner_of(restaurant: &Restaurant, owner: &Principal) -> Result<(), EngineError> {
    if !owner.is_owner || restaurant.owner_id != owner.id {
        return Err(EngineError::Unauthorized(
            "Unauthorized access to restaurant".into(),
        ));
    }
    Ok(())
}

impl Engine {
    // ── Restaurants ──────────────────────────────────────────

    pub async fn create_restaurant(
        &self,
        owner: &Principal,
        new: NewRestaurant,
    ) -> Result<Restaurant, EngineError> {
        if !owner.is_owner {
            return Err(EngineError::Unauthorized(
                "Only restaurant owners can list restaurants".into(),
            ));
        }
        if self.state.len() >= MAX_RESTAURANTS {
            return Err(EngineError::LimitExceeded("too many restaurants"));
        }
        validate_restaurant_text(
            &new.name,
            new.location.as_deref(),
            new.contact.as_deref(),
            &new.cuisines,
        )?;
        validate_capacity(&new.capacity)?;
        let (opening, closing) = validate_hours(&new.opening, &new.closing)?;

        let _commit = self.commit_gate.read().await;
        let restaurant = Restaurant {
            id: new.id,
            owner_id: owner.id,
            name: new.name.trim().to_string(),
            location: new.location,
            contact: new.contact,
            cuisines: new.cuisines,
            opening,
            closing,
            capacity: new.capacity,
        };
        let event = Event::RestaurantCreated {
            restaurant: restaurant.clone(),
        };

        // Claim the id before the append; readers block on the write guard
        // until the event is durable.
        let shared = Arc::new(RwLock::new(RestaurantState::new(restaurant.clone())));
        let pending = shared.clone().write_owned().await;
        match self.state.entry(restaurant.id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(restaurant.id)),
            Entry::Vacant(slot) => {
                slot.insert(shared);
            }
        }
        if let Err(e) = self.wal_append(&event).await {
            self.state.remove(&restaurant.id);
            drop(pending);
            return Err(e);
        }
        drop(pending);
        metrics::gauge!(crate::observability::RESTAURANTS_ACTIVE).set(self.state.len() as f64);
        tracing::info!("restaurant {} created by {}", restaurant.id, owner.id);
        Ok(restaurant)
    }

    /// Existing reservations are kept even if they no longer fit the new
    /// hours or capacity.
    pub async fn update_restaurant(
        &self,
        owner: &Principal,
        id: Ulid,
        patch: RestaurantPatch,
    ) -> Result<Restaurant, EngineError> {
        let _commit = self.commit_gate.read().await;
        let rs = self
            .get_restaurant_state(&id)
            .ok_or_else(EngineError::restaurant_not_found)?;
        let mut guard = rs.write().await;
        require_owner_of(&guard.restaurant, owner)?;

        let current = &guard.restaurant;
        let mut updated = current.clone();
        if let Some(name) = patch.name {
            updated.name = name.trim().to_string();
        }
        if patch.location.is_some() {
            updated.location = patch.location;
        }
        if patch.contact.is_some() {
            updated.contact = patch.contact;
        }
        if let Some(cuisines) = patch.cuisines {
            updated.cuisines = cuisines;
        }
        let opening = patch
            .opening
            .unwrap_or_else(|| crate::time::minutes_to_time(current.opening));
        let closing = patch
            .closing
            .unwrap_or_else(|| crate::time::minutes_to_time(current.closing));
        (updated.opening, updated.closing) = validate_hours(&opening, &closing)?;
        updated.capacity = patch.capacity.apply(&current.capacity);

        validate_restaurant_text(
            &updated.name,
            updated.location.as_deref(),
            updated.contact.as_deref(),
            &updated.cuisines,
        )?;
        validate_capacity(&updated.capacity)?;

        if updated == guard.restaurant {
            return Ok(updated);
        }
        let event = Event::RestaurantUpdated {
            restaurant: updated.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(updated)
    }

    // ── Reservations ─────────────────────────────────────────

    pub async fn create_reservation(
        &self,
        diner: &Principal,
        id: Ulid,
        restaurant_id: Ulid,
        date: NaiveDate,
        time: &str,
        tables: TableCounts,
    ) -> Result<Reservation, EngineError> {
        let minutes = time_to_minutes(time)?;
        let now = now_local();
        check_lead_time(date, minutes, now)?;
        validate_tables(&tables)?;

        let _commit = self.commit_gate.read().await;
        if self.index.contains(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let rs = self
            .get_restaurant_state(&restaurant_id)
            .ok_or_else(EngineError::restaurant_not_found)?;
        // Held until the reservation is applied: the availability read and
        // the write cannot interleave with another booking here.
        let mut guard = rs.write().await;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_RESTAURANT {
            return Err(EngineError::LimitExceeded("too many reservations for restaurant"));
        }

        let availability = slot_availability(&guard, date, minutes, None, now)?;
        check_tables_fit(&tables, &availability.current_slot.tables)?;

        let entry_code = self.index.claim_entry_code(id);
        let reservation = Reservation {
            id,
            restaurant_id,
            user_id: diner.id,
            date,
            time: minutes,
            tables,
            entry_code,
            status: ReservationStatus::Confirmed,
            viewed: false,
        };
        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
        };
        if let Err(e) = self.persist_and_apply(&mut guard, &event).await {
            self.index.release_entry_code(&reservation.entry_code, id);
            return Err(e);
        }

        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        tracing::info!(
            "reservation {id} confirmed at {restaurant_id} for {date} {time} ({} seats)",
            tables.seats()
        );
        self.dispatch
            .reservation_created(&guard.restaurant, &reservation, &diner.email);
        Ok(reservation)
    }

    /// Partial update. A reservation owned by someone else is reported as
    /// not found.
    pub async fn update_reservation(
        &self,
        diner: &Principal,
        id: Ulid,
        patch: ReservationPatch,
    ) -> Result<Reservation, EngineError> {
        let _commit = self.commit_gate.read().await;
        let mut guard = self
            .resolve_reservation_write(&id, NOT_FOUND_OR_UNAUTHORIZED)
            .await?;
        let current = guard
            .reservation(id)
            .filter(|r| r.user_id == diner.id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(NOT_FOUND_OR_UNAUTHORIZED.into()))?;

        if !current.is_confirmed() {
            return Err(EngineError::Conflict("Reservation is cancelled".into()));
        }
        let now = now_local();
        if current.starts_at() < now {
            return Err(EngineError::Unauthorized(
                "Cannot modify past reservations".into(),
            ));
        }
        if patch.is_empty() {
            return Ok(current);
        }

        let date = patch.date.unwrap_or(current.date);
        let time = match &patch.time {
            Some(t) => time_to_minutes(t)?,
            None => current.time,
        };
        let tables = patch
            .tables
            .map_or(current.tables, |p| p.apply(&current.tables));

        if patch.date.is_some() || patch.time.is_some() {
            check_lead_time(date, time, now)?;
        }
        validate_tables(&tables)?;
        check_open(&guard.restaurant, time)?;
        let available = remaining_tables(
            &guard.restaurant.capacity,
            guard.on_date(date),
            time,
            Some(id),
        );
        check_tables_fit(&tables, &available)?;

        let event = Event::ReservationUpdated {
            id,
            restaurant_id: current.restaurant_id,
            date,
            time,
            tables,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let updated = guard
            .reservation(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(RESERVATION_NOT_FOUND.into()))?;

        metrics::counter!(crate::observability::RESERVATIONS_UPDATED_TOTAL).increment(1);
        tracing::info!("reservation {id} updated");
        self.dispatch
            .reservation_updated(&guard.restaurant, &updated, &diner.email);
        Ok(updated)
    }

    /// Soft delete: the record stays with status `cancelled`.
    pub async fn cancel_reservation(
        &self,
        diner: &Principal,
        id: Ulid,
    ) -> Result<Reservation, EngineError> {
        let _commit = self.commit_gate.read().await;
        let mut guard = self
            .resolve_reservation_write(&id, RESERVATION_NOT_FOUND)
            .await?;
        let current = guard
            .reservation(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(RESERVATION_NOT_FOUND.into()))?;

        if current.user_id != diner.id {
            return Err(EngineError::Unauthorized(
                "Unauthorized access to reservation".into(),
            ));
        }
        if current.starts_at() < now_local() {
            return Err(EngineError::Unauthorized(
                "Cannot delete past reservations".into(),
            ));
        }
        if !current.is_confirmed() {
            return Err(EngineError::Conflict("Reservation is already cancelled".into()));
        }

        let event = Event::ReservationCancelled {
            id,
            restaurant_id: current.restaurant_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let cancelled = Reservation {
            status: ReservationStatus::Cancelled,
            ..current
        };

        metrics::counter!(crate::observability::RESERVATIONS_CANCELLED_TOTAL).increment(1);
        tracing::info!("reservation {id} cancelled");
        self.dispatch
            .reservation_cancelled(&guard.restaurant, &cancelled, &diner.email);
        Ok(cancelled)
    }

    /// Mark every reservation of the restaurant as seen by its owner.
    /// Returns how many confirmed reservations were unseen, matching
    /// `count_unviewed`; cancelled ones are flipped silently.
    pub async fn mark_viewed(&self, owner: &Principal, restaurant_id: Ulid) -> Result<usize, EngineError> {
        let _commit = self.commit_gate.read().await;
        let rs = self
            .get_restaurant_state(&restaurant_id)
            .ok_or_else(EngineError::restaurant_not_found)?;
        let mut guard = rs.write().await;
        require_owner_of(&guard.restaurant, owner)?;

        let unseen = guard
            .reservations
            .iter()
            .filter(|r| r.is_confirmed() && !r.viewed)
            .count();
        if unseen == 0 {
            return Ok(0);
        }
        let event = Event::ReservationsViewed { restaurant_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(unseen)
    }
}
