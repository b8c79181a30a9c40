use crate::model::Minutes;

/// Minimum notice between now and a reservation's start.
pub const MIN_NOTICE_MINUTES: Minutes = 60;

/// Reservations closer than this to a slot count against it.
pub const OCCUPANCY_WINDOW_MINUTES: Minutes = 60;

/// Distance between a slot and its before/after neighbors.
pub const NEIGHBOR_SLOT_MINUTES: Minutes = 60;

pub const ENTRY_CODE_LEN: usize = 6;
pub const ENTRY_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub const MAX_TABLES_PER_SIZE: u32 = 50;
pub const MAX_CAPACITY_PER_SIZE: u32 = 1000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_TEXT_LEN: usize = 1024;
pub const MAX_CUISINES: usize = 16;
pub const MAX_RESTAURANTS: usize = 100_000;
pub const MAX_RESERVATIONS_PER_RESTAURANT: usize = 1_000_000;
