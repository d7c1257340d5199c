//! deckhub - control-surface automation hub
//!
//! Surfaces show pages of a button grid. Each slot holds a control whose
//! actions run against connections and whose look follows feedbacks and
//! variables. Triggers run actions on events instead of presses.
//!
//! Everything mutable lives in the [`hub::Hub`] actor; the rest of the crate
//! provides the controllers it owns.

pub mod api;
pub mod cli;
pub mod config;
pub mod connections;
pub mod controls;
pub mod error;
pub mod graphics;
pub mod hub;
pub mod internal;
pub mod logging;
pub mod page;
pub mod paths;
pub mod references;
pub mod store;
pub mod surface;
pub mod variables;
