use std::cmp::Reverse;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::mutations::require_owner_of;
use super::{Engine, EngineError, SharedRestaurantState};

impl Engine {
    fn snapshot_states(&self) -> Vec<SharedRestaurantState> {
        self.state.iter().map(|e| e.value().clone()).collect()
    }

    pub async fn get_restaurant(&self, id: Ulid) -> Result<Restaurant, EngineError> {
        let rs = self
            .get_restaurant_state(&id)
            .ok_or_else(EngineError::restaurant_not_found)?;
        let guard = rs.read().await;
        Ok(guard.restaurant.clone())
    }

    /// All restaurants, sorted by name.
    pub async fn list_restaurants(&self) -> Vec<Restaurant> {
        let mut out = Vec::with_capacity(self.state.len());
        for rs in self.snapshot_states() {
            out.push(rs.read().await.restaurant.clone());
        }
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    /// Readable by the diner who booked it and by the restaurant's owner.
    pub async fn get_reservation(&self, principal: &Principal, id: Ulid) -> Result<Reservation, EngineError> {
        let not_found = || EngineError::NotFound("Reservation not found".into());
        let restaurant_id = self.index.restaurant_of(&id).ok_or_else(not_found)?;
        let rs = self.get_restaurant_state(&restaurant_id).ok_or_else(not_found)?;
        let guard = rs.read().await;
        let owner_view = principal.is_owner && guard.restaurant.owner_id == principal.id;
        guard
            .reservation(id)
            .filter(|r| owner_view || r.user_id == principal.id)
            .cloned()
            .ok_or_else(not_found)
    }

    /// Confirmed reservations on or after `from`, by date then time.
    pub async fn list_restaurant_reservations(
        &self,
        owner: &Principal,
        restaurant_id: Ulid,
        from: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError> {
        let rs = self
            .get_restaurant_state(&restaurant_id)
            .ok_or_else(EngineError::restaurant_not_found)?;
        let guard = rs.read().await;
        require_owner_of(&guard.restaurant, owner)?;
        Ok(guard
            .from_date(from)
            .iter()
            .filter(|r| r.is_confirmed())
            .cloned()
            .collect())
    }

    /// Every reservation the diner ever made, most recent first.
    pub async fn list_diner_reservations(&self, diner: &Principal) -> Vec<Reservation> {
        let mut out = Vec::new();
        for id in self.index.reservations_of(&diner.id) {
            let Some(restaurant_id) = self.index.restaurant_of(&id) else {
                continue;
            };
            let Some(rs) = self.get_restaurant_state(&restaurant_id) else {
                continue;
            };
            if let Some(r) = rs.read().await.reservation(id) {
                out.push(r.clone());
            }
        }
        out.sort_by_key(|r| Reverse((r.date, r.time)));
        out
    }

    pub async fn count_unviewed(&self, owner: &Principal, restaurant_id: Ulid) -> Result<usize, EngineError> {
        let rs = self
            .get_restaurant_state(&restaurant_id)
            .ok_or_else(EngineError::restaurant_not_found)?;
        let guard = rs.read().await;
        require_owner_of(&guard.restaurant, owner)?;
        Ok(guard
            .reservations
            .iter()
            .filter(|r| r.is_confirmed() && !r.viewed)
            .count())
    }
}
