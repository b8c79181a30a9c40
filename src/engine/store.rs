use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rand::Rng;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

/// Secondary indexes over every restaurant's reservations.
pub struct ReservationIndex {
    /// Reservation id → restaurant id.
    restaurant_of: DashMap<Ulid, Ulid>,
    /// Entry code → reservation id. Codes are never released once used.
    entry_codes: DashMap<String, Ulid>,
    /// Diner id → reservation ids.
    by_diner: DashMap<Ulid, Vec<Ulid>>,
}

impl Default for ReservationIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ReservationIndex {
    pub fn new() -> Self {
        Self {
            restaurant_of: DashMap::new(),
            entry_codes: DashMap::new(),
            by_diner: DashMap::new(),
        }
    }

    pub fn restaurant_of(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.restaurant_of.get(reservation_id).map(|e| *e.value())
    }

    pub fn contains(&self, reservation_id: &Ulid) -> bool {
        self.restaurant_of.contains_key(reservation_id)
    }

    pub fn reservations_of(&self, diner_id: &Ulid) -> Vec<Ulid> {
        self.by_diner
            .get(diner_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn code_in_use(&self, code: &str) -> bool {
        self.entry_codes.contains_key(code)
    }

    // ── Entry codes ──────────────────────────────────────────

    /// Draw random codes until one is free and claim it for `reservation_id`.
    pub fn claim_entry_code(&self, reservation_id: Ulid) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let code: String = (0..ENTRY_CODE_LEN)
                .map(|_| ENTRY_CODE_ALPHABET[rng.gen_range(0..ENTRY_CODE_ALPHABET.len())] as char)
                .collect();
            match self.entry_codes.entry(code) {
                Entry::Vacant(slot) => {
                    let code = slot.key().clone();
                    slot.insert(reservation_id);
                    return code;
                }
                Entry::Occupied(_) => {
                    tracing::debug!("entry code collision, retrying");
                    continue;
                }
            }
        }
    }

    /// Undo a claim whose reservation never got persisted.
    pub fn release_entry_code(&self, code: &str, reservation_id: Ulid) {
        self.entry_codes.remove_if(code, |_, owner| *owner == reservation_id);
    }

    // ── Event application ────────────────────────────────────

    /// Apply a reservation-level event. Restaurant-level events are handled by
    /// the caller at the map level.
    pub fn apply_event(&self, rs: &mut RestaurantState, event: &Event) {
        match event {
            Event::RestaurantUpdated { restaurant } => {
                rs.restaurant = restaurant.clone();
            }
            Event::ReservationCreated { reservation } => {
                self.restaurant_of
                    .insert(reservation.id, reservation.restaurant_id);
                self.entry_codes
                    .insert(reservation.entry_code.clone(), reservation.id);
                self.by_diner
                    .entry(reservation.user_id)
                    .or_default()
                    .push(reservation.id);
                rs.insert_reservation(reservation.clone());
            }
            Event::ReservationUpdated { id, date, time, tables, .. } => {
                // Re-insert to keep the (date, time) ordering.
                if let Some(mut r) = rs.remove_reservation(*id) {
                    r.date = *date;
                    r.time = *time;
                    r.tables = *tables;
                    rs.insert_reservation(r);
                }
            }
            Event::ReservationCancelled { id, .. } => {
                if let Some(r) = rs.reservation_mut(*id) {
                    r.status = ReservationStatus::Cancelled;
                }
            }
            Event::ReservationsViewed { .. } => {
                for r in rs.reservations.iter_mut() {
                    r.viewed = true;
                }
            }
            Event::RestaurantCreated { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claimed_codes_are_unique_and_well_formed() {
        let index = ReservationIndex::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..2000 {
            let code = index.claim_entry_code(Ulid::new());
            assert_eq!(code.len(), ENTRY_CODE_LEN);
            assert!(code.bytes().all(|b| ENTRY_CODE_ALPHABET.contains(&b)));
            assert!(seen.insert(code));
        }
    }

    #[test]
    fn release_only_drops_own_claim() {
        let index = ReservationIndex::new();
        let owner = Ulid::new();
        let code = index.claim_entry_code(owner);
        index.release_entry_code(&code, Ulid::new());
        assert!(index.code_in_use(&code));
        index.release_entry_code(&code, owner);
        assert!(!index.code_in_use(&code));
    }
}
