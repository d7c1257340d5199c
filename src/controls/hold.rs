//! Per-surface hold state of a pressed button
//!
//! One entry per surface currently holding the button. Dropping an entry
//! aborts its pending run-while-held timers, so removing it from the map is
//! the whole cancellation.

use super::model::{ActionSetId, ControlId, SurfaceId};
use crate::hub::HubHandle;
use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

/// Hold state captured when a press begins
pub struct SurfaceHoldState {
    pub pressed_at: Instant,
    pub step_id: String,
    token: u64,
    timers: Vec<JoinHandle<()>>,
}

impl SurfaceHoldState {
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.iter().filter(|t| !t.is_finished()).count()
    }

    /// Milliseconds since the press began
    pub fn held_ms(&self) -> u64 {
        self.pressed_at.elapsed().as_millis() as u64
    }
}

impl Drop for SurfaceHoldState {
    fn drop(&mut self) {
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }
}

#[derive(Default)]
pub struct HoldTracker {
    states: HashMap<SurfaceId, SurfaceHoldState>,
    next_token: u64,
}

impl HoldTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a hold for a surface, replacing any previous one; returns its token
    pub fn begin(&mut self, surface_id: &str, step_id: &str) -> u64 {
        self.next_token += 1;
        let token = self.next_token;
        if self.states.remove(surface_id).is_some() {
            trace!(surface_id, "Replaced existing hold state");
        }
        self.states.insert(
            surface_id.to_string(),
            SurfaceHoldState {
                pressed_at: Instant::now(),
                step_id: step_id.to_string(),
                token,
                timers: Vec::new(),
            },
        );
        token
    }

    /// Schedule one timer per duration; each reports back to the hub when it fires
    pub fn schedule_timers(
        &mut self,
        surface_id: &str,
        durations: &[u64],
        control_id: &ControlId,
        hub: &HubHandle,
    ) {
        let Some(state) = self.states.get_mut(surface_id) else {
            return;
        };
        if !state.timers.is_empty() || durations.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        for ms in durations {
            let ms = *ms;
            let hub = hub.clone();
            let control_id = control_id.clone();
            let surface_id = surface_id.to_string();
            let token = state.token;
            state.timers.push(runtime.spawn(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                hub.hold_timer_elapsed(control_id, surface_id, token, ActionSetId::Duration(ms));
            }));
        }
    }

    /// End the hold for a surface, returning what was captured at press time
    pub fn take(&mut self, surface_id: &str) -> Option<SurfaceHoldState> {
        self.states.remove(surface_id)
    }

    /// Hold state if it still matches the token a timer was scheduled with
    pub fn current(&self, surface_id: &str, token: u64) -> Option<&SurfaceHoldState> {
        self.states.get(surface_id).filter(|s| s.token == token)
    }

    /// Cancel one surface's hold, or all of them
    pub fn abort(&mut self, surface_id: Option<&str>) {
        match surface_id {
            Some(id) => {
                self.states.remove(id);
            }
            None => self.states.clear(),
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubCommand;

    #[tokio::test(start_paused = true)]
    async fn test_timer_reports_with_token() {
        let (hub, mut rx) = HubHandle::channel();
        let mut tracker = HoldTracker::new();
        let token = tracker.begin("s1", "0");
        tracker.schedule_timers("s1", &[500], &"bank:a".to_string(), &hub);

        tokio::time::sleep(Duration::from_millis(600)).await;
        match rx.try_recv() {
            Ok(HubCommand::HoldTimerElapsed { token: t, set_id, .. }) => {
                assert_eq!(t, token);
                assert_eq!(set_id, ActionSetId::Duration(500));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_cancels_timers() {
        let (hub, mut rx) = HubHandle::channel();
        let mut tracker = HoldTracker::new();
        tracker.begin("s1", "0");
        tracker.schedule_timers("s1", &[500, 1000], &"bank:a".to_string(), &hub);
        assert_eq!(tracker.take("s1").map(|s| s.step_id.clone()).as_deref(), Some("0"));

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert!(rx.try_recv().is_err());
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_press_replaces_state() {
        let (hub, _rx) = HubHandle::channel();
        let mut tracker = HoldTracker::new();
        let first = tracker.begin("s1", "0");
        tracker.schedule_timers("s1", &[500], &"bank:a".to_string(), &hub);
        let second = tracker.begin("s1", "1");

        assert_ne!(first, second);
        assert_eq!(tracker.len(), 1);
        assert!(tracker.current("s1", first).is_none());
        let state = tracker.current("s1", second).unwrap();
        assert_eq!(state.step_id, "1");
        assert_eq!(state.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_duration() {
        let mut tracker = HoldTracker::new();
        tracker.begin("s1", "0");
        tokio::time::advance(Duration::from_millis(1600)).await;
        let state = tracker.take("s1").unwrap();
        assert_eq!(state.held_ms(), 1600);
    }
}
