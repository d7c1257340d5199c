//! Surfaces: panels that show a page of the grid and report input
//!
//! A `SurfacePanel` is the driver side (draw, brightness). A `SurfaceHandler`
//! wraps one panel with its runtime state, and every handler belongs to a
//! `SurfaceGroup` that owns the current page and the lockout. Surfaces
//! without a configured group get an implicit group of their own.

mod controller;
mod emulator;
mod group;
mod handler;

pub use controller::{SurfaceController, SurfaceInput};
pub use emulator::{DrawEvent, EmulatorPanel};
pub use group::SurfaceGroup;
pub use handler::SurfaceHandler;

use crate::graphics::ImageResult;
use serde::{Deserialize, Serialize};

/// Raw input reported by a panel, in panel coordinates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SurfaceInputEvent {
    Press { x: i32, y: i32, pressed: bool },
    Rotate { x: i32, y: i32, right: bool },
}

/// Configuration field a panel exposes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigField {
    pub id: &'static str,
    pub label: &'static str,
}

/// Driver side of a surface
pub trait SurfacePanel: Send + Sync {
    fn id(&self) -> &str;

    /// Columns and rows of keys
    fn grid_size(&self) -> (i32, i32);

    fn draw(&self, x: i32, y: i32, image: &ImageResult);

    fn set_brightness(&self, percent: u8);

    fn clear(&self);

    fn config_fields(&self) -> Vec<ConfigField> {
        vec![ConfigField {
            id: "brightness",
            label: "Brightness",
        }]
    }
}
