//! Google Calendar backend for guichet-sync.
//!
//! OAuth tokens, listings and event types come from the `google-calendar`
//! client. Batched mutations go to the multipart batch endpoint directly.

pub mod api;
pub mod app_config;
pub mod auth;
pub mod batch;
pub mod session;
pub mod to_google;

pub use api::GoogleCalendar;
