//! Core of guichet-sync.
//!
//! Authenticates against the student portal (NTLM transport plus an
//! anti-forgery token), fetches the class schedule and reconciles it into an
//! external calendar by clearing future events and re-inserting fresh ones.
//!
//! The calendar itself is reached through the [`calendar::CalendarService`]
//! trait so providers live in their own crates.

pub mod calendar;
pub mod config;
pub mod courses;
pub mod date_range;
pub mod error;
pub mod ntlm;
pub mod portal;
pub mod reconcile;
pub mod schedule;
pub mod sync;
pub mod token;

#[cfg(test)]
mod testing;

pub use error::{SyncError, SyncResult};
