use crate::config::GroupConfig;
use serde::Serialize;
use std::time::Duration;

/// Surfaces that share a page and a lock
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceGroup {
    pub id: String,
    pub name: String,
    pub current_page: u32,
    pub startup_page: u32,
    /// Implicit groups wrap a single ungrouped surface
    pub implicit: bool,
    #[serde(skip_serializing)]
    pub pin: Option<String>,
    #[serde(skip)]
    pub pin_timeout: Option<Duration>,
    pub locked: bool,
}

impl SurfaceGroup {
    pub fn from_config(config: &GroupConfig) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            current_page: config.startup_page,
            startup_page: config.startup_page,
            implicit: false,
            pin: config.pin.clone().filter(|p| !p.is_empty()),
            pin_timeout: config.pin_timeout_secs.filter(|s| *s > 0).map(Duration::from_secs),
            locked: false,
        }
    }

    pub fn implicit(surface_id: &str, name: &str, startup_page: u32) -> Self {
        Self {
            id: surface_id.to_string(),
            name: name.to_string(),
            current_page: startup_page,
            startup_page,
            implicit: true,
            pin: None,
            pin_timeout: None,
            locked: false,
        }
    }

    /// Whether a PIN unlocks it; groups without PIN never lock on inactivity
    pub fn has_pin(&self) -> bool {
        self.pin.is_some()
    }

    /// Unlock with a PIN; groups without a PIN unlock with anything
    pub fn try_unlock(&mut self, pin: Option<&str>) -> bool {
        let accepted = match (&self.pin, pin) {
            (None, _) => true,
            (Some(expected), Some(given)) => expected == given,
            (Some(_), None) => false,
        };
        if accepted {
            self.locked = false;
        }
        accepted
    }
}
