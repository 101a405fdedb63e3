//! # nearlock-daemon
//!
//! Runs the nearlock presence monitor and exposes it over a local REST API.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod observer;
pub mod radio;
pub mod state;
