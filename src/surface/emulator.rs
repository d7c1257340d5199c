//! EmulatorPanel - in-memory surface driven by the HTTP API
//!
//! Draws are kept per key and broadcast to WebSocket subscribers. Input comes
//! back through the API as `SurfaceInputEvent`s.

use super::SurfacePanel;
use crate::graphics::ImageResult;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::broadcast;
use tracing::trace;

const DRAW_CHANNEL_CAPACITY: usize = 256;

/// One draw as streamed to emulator clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawEvent {
    pub surface_id: String,
    pub x: i32,
    pub y: i32,
    pub image: ImageResult,
}

pub struct EmulatorPanel {
    id: String,
    columns: i32,
    rows: i32,
    brightness: AtomicU8,
    keys: Mutex<HashMap<(i32, i32), ImageResult>>,
    draws: broadcast::Sender<DrawEvent>,
}

impl EmulatorPanel {
    pub fn new(id: impl Into<String>, columns: i32, rows: i32) -> Self {
        let (draws, _) = broadcast::channel(DRAW_CHANNEL_CAPACITY);
        Self {
            id: id.into(),
            columns,
            rows,
            brightness: AtomicU8::new(100),
            keys: Mutex::new(HashMap::new()),
            draws,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DrawEvent> {
        self.draws.subscribe()
    }

    /// Last image drawn at a key
    pub fn key(&self, x: i32, y: i32) -> Option<ImageResult> {
        self.keys.lock().get(&(x, y)).cloned()
    }

    pub fn snapshot(&self) -> Vec<DrawEvent> {
        let mut draws: Vec<DrawEvent> = self
            .keys
            .lock()
            .iter()
            .map(|((x, y), image)| DrawEvent {
                surface_id: self.id.clone(),
                x: *x,
                y: *y,
                image: image.clone(),
            })
            .collect();
        draws.sort_by_key(|d| (d.y, d.x));
        draws
    }

    pub fn brightness(&self) -> u8 {
        self.brightness.load(Ordering::Relaxed)
    }
}

impl SurfacePanel for EmulatorPanel {
    fn id(&self) -> &str {
        &self.id
    }

    fn grid_size(&self) -> (i32, i32) {
        (self.columns, self.rows)
    }

    fn draw(&self, x: i32, y: i32, image: &ImageResult) {
        self.keys.lock().insert((x, y), image.clone());
        // No subscribers is fine
        let _ = self.draws.send(DrawEvent {
            surface_id: self.id.clone(),
            x,
            y,
            image: image.clone(),
        });
        trace!(surface_id = %self.id, x, y, "Emulator draw");
    }

    fn set_brightness(&self, percent: u8) {
        self.brightness.store(percent, Ordering::Relaxed);
    }

    fn clear(&self) {
        let blank = ImageResult::blank();
        let mut keys = self.keys.lock();
        for y in 0..self.rows {
            for x in 0..self.columns {
                keys.insert((x, y), blank.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::DrawStyle;

    #[tokio::test]
    async fn test_draws_are_recorded_and_broadcast() {
        let panel = EmulatorPanel::new("emu", 8, 4);
        let mut rx = panel.subscribe();
        let image = ImageResult::new(Some(DrawStyle::PageUp), None);
        panel.draw(2, 1, &image);

        assert_eq!(panel.key(2, 1), Some(image.clone()));
        let event = rx.recv().await.unwrap();
        assert_eq!((event.x, event.y), (2, 1));
        assert_eq!(event.image.key, image.key);
    }

    #[test]
    fn test_clear_blanks_every_key() {
        let panel = EmulatorPanel::new("emu", 2, 2);
        panel.draw(0, 0, &ImageResult::new(Some(DrawStyle::PageUp), None));
        panel.clear();
        assert_eq!(panel.snapshot().len(), 4);
        assert!(panel.snapshot().iter().all(|d| d.image.is_blank()));
    }
}
