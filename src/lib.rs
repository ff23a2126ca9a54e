pub mod auth;
pub mod baseline;
pub mod browser;
pub mod calendar;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod debug;
pub mod duration;
pub mod extract;
pub mod format;
pub mod notes;
pub mod notify;
pub mod portal;
pub mod readiness;
pub mod reconcile;
pub mod runner;
pub mod session;
