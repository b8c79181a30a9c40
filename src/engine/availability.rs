use chrono::{NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::time::{clock_label, is_valid_lead_time, is_within_business_hours, now_local, time_to_minutes};

use super::conflict::{check_lead_time, check_open};
use super::{Engine, EngineError};

// ── Occupancy ─────────────────────────────────────────────────────

/// Sum the tables held by confirmed reservations strictly closer than the
/// occupancy window to `time`. `day` must hold a single calendar date.
pub fn occupied_tables(day: &[Reservation], time: Minutes, exclude: Option<Ulid>) -> TableCounts {
    let mut occupied = TableCounts::ZERO;
    for r in day {
        if !r.is_confirmed() || exclude == Some(r.id) {
            continue;
        }
        if (r.time - time).abs() < OCCUPANCY_WINDOW_MINUTES {
            occupied.add(&r.tables);
        }
    }
    occupied
}

/// `max(0, capacity - occupied)` per table size.
pub fn remaining_tables(
    capacity: &TableCounts,
    day: &[Reservation],
    time: Minutes,
    exclude: Option<Ulid>,
) -> TableCounts {
    capacity.saturating_sub(&occupied_tables(day, time, exclude))
}

/// Availability for `time` and its two neighbors.
///
/// The requested slot itself must be inside business hours and far enough
/// ahead, otherwise this fails. Neighbors failing either predicate are
/// reported with zero tables instead.
pub fn slot_availability(
    state: &RestaurantState,
    date: NaiveDate,
    time: Minutes,
    exclude: Option<Ulid>,
    now: NaiveDateTime,
) -> Result<Availability, EngineError> {
    let restaurant = &state.restaurant;
    check_open(restaurant, time)?;
    check_lead_time(date, time, now)?;

    let day = state.on_date(date);
    let neighbor = |t: Minutes| {
        let bookable = is_within_business_hours(t, restaurant.opening, restaurant.closing)
            && is_valid_lead_time(date, t, now, MIN_NOTICE_MINUTES);
        Slot {
            time: clock_label(t),
            tables: if bookable {
                remaining_tables(&restaurant.capacity, day, t, exclude)
            } else {
                TableCounts::ZERO
            },
        }
    };

    Ok(Availability {
        before_slot: neighbor(time - NEIGHBOR_SLOT_MINUTES),
        current_slot: Slot {
            time: clock_label(time),
            tables: remaining_tables(&restaurant.capacity, day, time, exclude),
        },
        after_slot: neighbor(time + NEIGHBOR_SLOT_MINUTES),
    })
}

impl Engine {
    pub async fn check_availability(
        &self,
        restaurant_id: Ulid,
        date: NaiveDate,
        time: &str,
        exclude: Option<Ulid>,
    ) -> Result<Availability, EngineError> {
        let rs = self
            .get_restaurant_state(&restaurant_id)
            .ok_or_else(EngineError::restaurant_not_found)?;
        let minutes = time_to_minutes(time)?;
        let guard = rs.read().await;
        metrics::counter!(crate::observability::AVAILABILITY_CHECKS_TOTAL).increment(1);
        slot_availability(&guard, date, minutes, exclude, now_local())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 6, 14).unwrap()
    }

    fn morning_before() -> NaiveDateTime {
        day().and_hms_opt(8, 0, 0).unwrap()
    }

    fn make_state(capacity: TableCounts, reservations: Vec<Reservation>) -> RestaurantState {
        let mut rs = RestaurantState::new(Restaurant {
            id: Ulid::new(),
            owner_id: Ulid::new(),
            name: "Chez Test".into(),
            location: None,
            contact: None,
            cuisines: vec![],
            opening: 10 * 60,
            closing: 22 * 60,
            capacity,
        });
        for r in reservations {
            rs.insert_reservation(r);
        }
        rs
    }

    fn booking(date: NaiveDate, time: Minutes, tables: TableCounts) -> Reservation {
        Reservation {
            id: Ulid::new(),
            restaurant_id: Ulid::new(),
            user_id: Ulid::new(),
            date,
            time,
            tables,
            entry_code: "ABC123".into(),
            status: ReservationStatus::Confirmed,
            viewed: false,
        }
    }

    #[test]
    fn empty_restaurant_has_full_capacity() {
        let cap = TableCounts::new(5, 3, 2);
        let rs = make_state(cap, vec![]);
        let a = slot_availability(&rs, day(), 19 * 60, None, morning_before()).unwrap();
        assert_eq!(a.current_slot.tables, cap);
        assert_eq!(a.current_slot.time, "19:00");
        assert_eq!(a.before_slot.time, "18:00");
        assert_eq!(a.after_slot.time, "20:00");
        assert_eq!(a.before_slot.tables, cap);
        assert_eq!(a.after_slot.tables, cap);
    }

    #[test]
    fn window_is_strictly_less_than_an_hour() {
        let cap = TableCounts::new(5, 3, 2);
        let rs = make_state(cap, vec![booking(day(), 19 * 60, TableCounts::new(2, 0, 0))]);

        let at_1930 = slot_availability(&rs, day(), 19 * 60 + 30, None, morning_before()).unwrap();
        assert_eq!(at_1930.current_slot.tables.two, 3);

        let at_2000 = slot_availability(&rs, day(), 20 * 60, None, morning_before()).unwrap();
        assert_eq!(at_2000.current_slot.tables.two, 5);

        let at_2100 = slot_availability(&rs, day(), 21 * 60, None, morning_before()).unwrap();
        assert_eq!(at_2100.current_slot.tables.two, 5);
        // 20:00 neighbor of 21:00 is exactly an hour from 19:00.
        assert_eq!(at_2100.before_slot.tables.two, 5);
    }

    #[test]
    fn other_dates_and_cancelled_ignored() {
        let cap = TableCounts::new(2, 0, 0);
        let mut cancelled = booking(day(), 19 * 60, TableCounts::new(1, 0, 0));
        cancelled.status = ReservationStatus::Cancelled;
        let tomorrow = day().succ_opt().unwrap();
        let rs = make_state(
            cap,
            vec![cancelled, booking(tomorrow, 19 * 60, TableCounts::new(2, 0, 0))],
        );
        let a = slot_availability(&rs, day(), 19 * 60, None, morning_before()).unwrap();
        assert_eq!(a.current_slot.tables, cap);
    }

    #[test]
    fn excluded_reservation_does_not_count() {
        let cap = TableCounts::new(1, 0, 0);
        let own = booking(day(), 19 * 60, TableCounts::new(1, 0, 0));
        let own_id = own.id;
        let rs = make_state(cap, vec![own]);
        let without = slot_availability(&rs, day(), 19 * 60, None, morning_before()).unwrap();
        assert_eq!(without.current_slot.tables.two, 0);
        let with = slot_availability(&rs, day(), 19 * 60, Some(own_id), morning_before()).unwrap();
        assert_eq!(with.current_slot.tables.two, 1);
    }

    #[test]
    fn overbooked_clamps_to_zero() {
        let rs = make_state(
            TableCounts::new(1, 1, 0),
            vec![
                booking(day(), 19 * 60, TableCounts::new(1, 1, 0)),
                booking(day(), 19 * 60 + 15, TableCounts::new(1, 0, 0)),
            ],
        );
        let a = slot_availability(&rs, day(), 19 * 60, None, morning_before()).unwrap();
        assert_eq!(a.current_slot.tables, TableCounts::ZERO);
    }

    #[test]
    fn closed_slot_is_an_error_but_closed_neighbor_is_zero() {
        let rs = make_state(TableCounts::new(4, 4, 4), vec![]);
        assert!(matches!(
            slot_availability(&rs, day(), 9 * 60, None, morning_before()),
            Err(EngineError::Validation(_))
        ));

        let opening = slot_availability(&rs, day(), 10 * 60, None, morning_before()).unwrap();
        assert_eq!(opening.before_slot.tables, TableCounts::ZERO);
        assert_eq!(opening.current_slot.tables, TableCounts::new(4, 4, 4));

        let closing = slot_availability(&rs, day(), 22 * 60, None, morning_before()).unwrap();
        assert_eq!(closing.after_slot.tables, TableCounts::ZERO);
        assert_eq!(closing.after_slot.time, "23:00");
    }

    #[test]
    fn short_notice_slot_is_an_error_and_neighbor_is_zero() {
        let rs = make_state(TableCounts::new(4, 0, 0), vec![]);
        let now = day().and_hms_opt(17, 30, 0).unwrap();
        assert!(slot_availability(&rs, day(), 18 * 60, None, now).is_err());
        let a = slot_availability(&rs, day(), 19 * 60, None, now).unwrap();
        assert_eq!(a.before_slot.tables, TableCounts::ZERO);
        assert_eq!(a.current_slot.tables.two, 4);
    }

    #[test]
    fn neighbor_before_midnight_wraps_label() {
        let mut rs = make_state(TableCounts::new(1, 0, 0), vec![]);
        rs.restaurant.opening = 0;
        let a = slot_availability(&rs, day(), 30, None, day().pred_opt().unwrap().and_hms_opt(12, 0, 0).unwrap()).unwrap();
        assert_eq!(a.before_slot.time, "23:30");
        assert_eq!(a.before_slot.tables, TableCounts::ZERO);
        assert_eq!(a.current_slot.time, "00:30");
    }
}
