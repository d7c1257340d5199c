use super::SurfacePanel;
use crate::graphics::ImageResult;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

/// One connected surface
pub struct SurfaceHandler {
    surface_id: String,
    name: String,
    group_id: String,
    panel: Arc<dyn SurfacePanel>,
    brightness: u8,
    last_interaction: Instant,
}

impl SurfaceHandler {
    pub fn new(panel: Arc<dyn SurfacePanel>, name: impl Into<String>, group_id: impl Into<String>, brightness: u8) -> Self {
        let handler = Self {
            surface_id: panel.id().to_string(),
            name: name.into(),
            group_id: group_id.into(),
            panel,
            brightness: brightness.min(100),
            last_interaction: Instant::now(),
        };
        handler.panel.set_brightness(handler.brightness);
        handler
    }

    pub fn surface_id(&self) -> &str {
        &self.surface_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn set_group_id(&mut self, group_id: impl Into<String>) {
        self.group_id = group_id.into();
    }

    pub fn panel(&self) -> &Arc<dyn SurfacePanel> {
        &self.panel
    }

    pub fn grid_size(&self) -> (i32, i32) {
        self.panel.grid_size()
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    pub fn set_brightness(&mut self, percent: u8) {
        self.brightness = percent.min(100);
        self.panel.set_brightness(self.brightness);
        debug!(surface_id = %self.surface_id, brightness = self.brightness, "Brightness set");
    }

    pub fn touch(&mut self) {
        self.last_interaction = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_interaction.elapsed()
    }

    /// Whether panel coordinates are on the panel
    pub fn contains(&self, x: i32, y: i32) -> bool {
        let (columns, rows) = self.panel.grid_size();
        x >= 0 && y >= 0 && x < columns && y < rows
    }

    pub fn draw(&self, x: i32, y: i32, image: &ImageResult) {
        if self.contains(x, y) {
            self.panel.draw(x, y, image);
        }
    }

    pub fn clear(&self) {
        self.panel.clear();
    }
}
