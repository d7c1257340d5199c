//! SurfaceController - surface topology, pages per group, lockout

use super::{SurfaceGroup, SurfaceHandler, SurfaceInputEvent, SurfacePanel};
use crate::config::{GroupConfig, SurfaceConfig};
use crate::graphics::ImageResult;
use crate::page::{ControlLocation, PageStore};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Input translated to a grid location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceInput {
    Press { location: ControlLocation, pressed: bool },
    Rotate { location: ControlLocation, right: bool },
}

pub struct SurfaceController {
    handlers: BTreeMap<String, SurfaceHandler>,
    groups: BTreeMap<String, SurfaceGroup>,
    default_startup_page: u32,
}

impl SurfaceController {
    pub fn new(groups: &[GroupConfig], default_startup_page: u32) -> Self {
        let groups = groups
            .iter()
            .map(|g| (g.id.clone(), SurfaceGroup::from_config(g)))
            .collect();
        Self {
            handlers: BTreeMap::new(),
            groups,
            default_startup_page: default_startup_page.max(1),
        }
    }

    /// Attach a panel; unknown or missing groups give it an implicit group
    pub fn add_surface(&mut self, panel: Arc<dyn SurfacePanel>, config: Option<&SurfaceConfig>) -> String {
        let surface_id = panel.id().to_string();
        let name = config
            .and_then(|c| c.name.clone())
            .unwrap_or_else(|| surface_id.clone());
        let brightness = config.map(|c| c.brightness).unwrap_or(100);

        let group_id = match config.and_then(|c| c.group.as_deref()) {
            Some(group) if self.groups.contains_key(group) => group.to_string(),
            Some(group) => {
                warn!("Surface '{}' refers to unknown group '{}', using its own", surface_id, group);
                self.ensure_implicit_group(&surface_id, &name)
            }
            None => self.ensure_implicit_group(&surface_id, &name),
        };

        info!("🎛️ Surface '{}' attached (group '{}')", surface_id, group_id);
        self.handlers.insert(
            surface_id.clone(),
            SurfaceHandler::new(panel, name, group_id, brightness),
        );
        surface_id
    }

    fn ensure_implicit_group(&mut self, surface_id: &str, name: &str) -> String {
        let startup = self.default_startup_page;
        self.groups
            .entry(surface_id.to_string())
            .or_insert_with(|| SurfaceGroup::implicit(surface_id, name, startup));
        surface_id.to_string()
    }

    pub fn remove_surface(&mut self, surface_id: &str) -> bool {
        let Some(handler) = self.handlers.remove(surface_id) else {
            return false;
        };
        if self
            .groups
            .get(handler.group_id())
            .map(|g| g.implicit)
            .unwrap_or(false)
        {
            self.groups.remove(handler.group_id());
        }
        info!("Surface '{}' detached", surface_id);
        true
    }

    pub fn surface(&self, surface_id: &str) -> Option<&SurfaceHandler> {
        self.handlers.get(surface_id)
    }

    pub fn surfaces(&self) -> impl Iterator<Item = &SurfaceHandler> {
        self.handlers.values()
    }

    pub fn groups(&self) -> impl Iterator<Item = &SurfaceGroup> {
        self.groups.values()
    }

    pub fn group_for(&self, surface_id: &str) -> Option<&SurfaceGroup> {
        let handler = self.handlers.get(surface_id)?;
        self.groups.get(handler.group_id())
    }

    fn group_for_mut(&mut self, surface_id: &str) -> Option<&mut SurfaceGroup> {
        let group_id = self.handlers.get(surface_id)?.group_id().to_string();
        self.groups.get_mut(&group_id)
    }

    /// Surfaces sharing a surface's group (including itself)
    pub fn surfaces_in_group_of(&self, surface_id: &str) -> Vec<String> {
        let Some(group_id) = self.handlers.get(surface_id).map(|h| h.group_id().to_string()) else {
            return Vec::new();
        };
        self.handlers
            .values()
            .filter(|h| h.group_id() == group_id)
            .map(|h| h.surface_id().to_string())
            .collect()
    }

    // =========================================================================
    // Pages
    // =========================================================================

    pub fn page_of(&self, surface_id: &str) -> Option<u32> {
        self.group_for(surface_id).map(|g| g.current_page)
    }

    /// Show a page on the surface's group; returns whether it changed
    pub fn set_page(&mut self, surface_id: &str, page: u32) -> bool {
        let Some(group) = self.group_for_mut(surface_id) else {
            return false;
        };
        if group.current_page == page {
            return false;
        }
        debug!(group_id = %group.id, "Page {} -> {}", group.current_page, page);
        group.current_page = page;
        true
    }

    pub fn startup_page_of(&self, surface_id: &str) -> Option<u32> {
        self.group_for(surface_id).map(|g| g.startup_page)
    }

    /// Move `delta` pages, wrapping within the page count
    pub fn offset_page(&mut self, surface_id: &str, delta: i64, pages: &PageStore) -> bool {
        let Some(current) = self.page_of(surface_id) else {
            return false;
        };
        self.set_page(surface_id, pages.offset_page(current, delta))
    }

    /// Back to the group's startup page
    pub fn home(&mut self, surface_id: &str) -> bool {
        match self.startup_page_of(surface_id) {
            Some(page) => self.set_page(surface_id, page),
            None => false,
        }
    }

    /// Surfaces currently showing a page, lock state ignored
    pub fn surfaces_on_page(&self, page: u32) -> Vec<&SurfaceHandler> {
        self.handlers
            .values()
            .filter(|h| self.groups.get(h.group_id()).map(|g| g.current_page) == Some(page))
            .collect()
    }

    // =========================================================================
    // Input and drawing
    // =========================================================================

    /// Translate panel input to a grid location; locked surfaces swallow input
    pub fn translate_input(&mut self, surface_id: &str, event: &SurfaceInputEvent) -> Option<SurfaceInput> {
        let handler = self.handlers.get_mut(surface_id)?;
        let group = self.groups.get(handler.group_id())?;
        if group.locked {
            trace!(surface_id, "Input ignored while locked");
            return None;
        }
        handler.touch();
        let page = group.current_page;
        match *event {
            SurfaceInputEvent::Press { x, y, pressed } => handler.contains(x, y).then(|| SurfaceInput::Press {
                location: ControlLocation::new(page, y, x),
                pressed,
            }),
            SurfaceInputEvent::Rotate { x, y, right } => handler.contains(x, y).then(|| SurfaceInput::Rotate {
                location: ControlLocation::new(page, y, x),
                right,
            }),
        }
    }

    /// Draw an image on every unlocked surface showing its page
    pub fn draw(&self, location: &ControlLocation, image: &ImageResult) {
        for handler in self.surfaces_on_page(location.page_number) {
            if !self.is_locked(handler.surface_id()) {
                handler.draw(location.column, location.row, image);
            }
        }
    }

    // =========================================================================
    // Lockout and brightness
    // =========================================================================

    pub fn is_locked(&self, surface_id: &str) -> bool {
        self.group_for(surface_id).map(|g| g.locked).unwrap_or(false)
    }

    /// Lock a surface's group; returns the surfaces that went dark
    pub fn lock(&mut self, surface_id: &str) -> Vec<String> {
        match self.group_for_mut(surface_id) {
            Some(group) if !group.locked => group.locked = true,
            _ => return Vec::new(),
        }
        let affected = self.surfaces_in_group_of(surface_id);
        for id in &affected {
            if let Some(handler) = self.handlers.get(id) {
                handler.clear();
            }
        }
        info!("🔒 Surface '{}' locked", surface_id);
        affected
    }

    /// Unlock a surface's group; returns the surfaces to redraw (empty on a wrong PIN)
    pub fn unlock(&mut self, surface_id: &str, pin: Option<&str>) -> Vec<String> {
        let Some(group) = self.group_for_mut(surface_id) else {
            return Vec::new();
        };
        if !group.locked {
            return Vec::new();
        }
        if !group.try_unlock(pin) {
            warn!("Wrong PIN for surface '{}'", surface_id);
            return Vec::new();
        }
        if let Some(handler) = self.handlers.get_mut(surface_id) {
            handler.touch();
        }
        info!("🔓 Surface '{}' unlocked", surface_id);
        self.surfaces_in_group_of(surface_id)
    }

    /// Unlock without a PIN (internal action)
    pub fn force_unlock(&mut self, surface_id: &str) -> Vec<String> {
        match self.group_for_mut(surface_id) {
            Some(group) if group.locked => group.locked = false,
            _ => return Vec::new(),
        }
        if let Some(handler) = self.handlers.get_mut(surface_id) {
            handler.touch();
        }
        self.surfaces_in_group_of(surface_id)
    }

    pub fn lock_all(&mut self) -> Vec<String> {
        let ids: Vec<String> = self.handlers.keys().cloned().collect();
        ids.iter().flat_map(|id| self.lock(id)).collect()
    }

    /// Unlock everything regardless of PIN (internal action)
    pub fn unlock_all(&mut self) -> Vec<String> {
        let mut affected = Vec::new();
        for group in self.groups.values_mut() {
            group.locked = false;
        }
        for handler in self.handlers.values_mut() {
            handler.touch();
            affected.push(handler.surface_id().to_string());
        }
        affected
    }

    /// Lock groups whose surfaces were idle past their PIN timeout
    pub fn check_lockouts(&mut self) -> Vec<String> {
        let due: Vec<String> = self
            .handlers
            .values()
            .filter(|h| {
                self.groups
                    .get(h.group_id())
                    .map(|g| !g.locked && g.has_pin() && g.pin_timeout.map(|t| h.idle_for() >= t).unwrap_or(false))
                    .unwrap_or(false)
            })
            .map(|h| h.surface_id().to_string())
            .collect();
        due.iter().flat_map(|id| self.lock(id)).collect()
    }

    pub fn set_brightness(&mut self, surface_id: &str, percent: u8) -> bool {
        match self.handlers.get_mut(surface_id) {
            Some(handler) => {
                handler.set_brightness(percent);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::EmulatorPanel;
    use std::time::Duration;

    fn groups() -> Vec<GroupConfig> {
        vec![GroupConfig {
            id: "desk".to_string(),
            name: "Desk".to_string(),
            startup_page: 2,
            pin: Some("42".to_string()),
            pin_timeout_secs: Some(30),
        }]
    }

    fn grouped(id: &str) -> SurfaceConfig {
        SurfaceConfig {
            id: id.to_string(),
            name: None,
            group: Some("desk".to_string()),
            brightness: 80,
            columns: 8,
            rows: 4,
        }
    }

    #[test]
    fn test_grouped_surfaces_share_page() {
        let mut surfaces = SurfaceController::new(&groups(), 1);
        surfaces.add_surface(Arc::new(EmulatorPanel::new("a", 8, 4)), Some(&grouped("a")));
        surfaces.add_surface(Arc::new(EmulatorPanel::new("b", 8, 4)), Some(&grouped("b")));
        surfaces.add_surface(Arc::new(EmulatorPanel::new("solo", 8, 4)), None);

        assert_eq!(surfaces.page_of("a"), Some(2));
        assert!(surfaces.set_page("a", 5));
        assert_eq!(surfaces.page_of("b"), Some(5));
        assert_eq!(surfaces.page_of("solo"), Some(1));
        assert!(!surfaces.set_page("a", 5));
    }

    #[test]
    fn test_implicit_group_removed_with_surface() {
        let mut surfaces = SurfaceController::new(&[], 1);
        surfaces.add_surface(Arc::new(EmulatorPanel::new("solo", 8, 4)), None);
        assert_eq!(surfaces.groups().count(), 1);
        assert!(surfaces.remove_surface("solo"));
        assert_eq!(surfaces.groups().count(), 0);
    }

    #[test]
    fn test_input_translation_and_lockout() {
        let mut surfaces = SurfaceController::new(&groups(), 1);
        surfaces.add_surface(Arc::new(EmulatorPanel::new("a", 8, 4)), Some(&grouped("a")));

        let press = SurfaceInputEvent::Press { x: 3, y: 1, pressed: true };
        assert_eq!(
            surfaces.translate_input("a", &press),
            Some(SurfaceInput::Press {
                location: ControlLocation::new(2, 1, 3),
                pressed: true
            })
        );
        let outside = SurfaceInputEvent::Press { x: 9, y: 0, pressed: true };
        assert_eq!(surfaces.translate_input("a", &outside), None);

        assert_eq!(surfaces.lock("a"), vec!["a".to_string()]);
        assert_eq!(surfaces.translate_input("a", &press), None);
        assert!(surfaces.unlock("a", Some("0")).is_empty());
        assert_eq!(surfaces.unlock("a", Some("42")), vec!["a".to_string()]);
        assert!(surfaces.translate_input("a", &press).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactivity_locks_pin_groups_only() {
        let mut surfaces = SurfaceController::new(&groups(), 1);
        surfaces.add_surface(Arc::new(EmulatorPanel::new("a", 8, 4)), Some(&grouped("a")));
        surfaces.add_surface(Arc::new(EmulatorPanel::new("solo", 8, 4)), None);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(surfaces.check_lockouts().is_empty());

        tokio::time::advance(Duration::from_secs(25)).await;
        assert_eq!(surfaces.check_lockouts(), vec!["a".to_string()]);
        assert!(surfaces.is_locked("a"));
        assert!(!surfaces.is_locked("solo"));
    }
}
