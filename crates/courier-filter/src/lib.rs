//! Probabilistic uniqueness filter for reserved usernames.
//!
//! A [`bloom::BloomFilter`] answers "definitely absent" in O(1) without
//! touching the database; [`usernames::UsernameFilter`] wraps it with the
//! on-disk cache and the startup resync.

pub mod bloom;
pub mod usernames;

pub use bloom::BloomFilter;
pub use usernames::{FilterConfig, Reservation, UsernameFilter};
