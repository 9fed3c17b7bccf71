//! genwatch: generator run-time and fuel monitor.
//!
//! Probes a generator's network endpoint on a fixed interval, infers
//! start/stop transitions, estimates the fuel left from run-time and a
//! configured consumption rate, and raises one-shot alerts over Telegram.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod access;
pub mod config;
pub mod credentials;
pub mod engine;
pub mod fuel;
pub mod logging;
pub mod monitor;
pub mod notify;
pub mod probe;
pub mod reports;
pub mod store;
pub mod telegram;
pub mod timefmt;
