//! Hub actor - owns every controller and processes commands sequentially
//!
//! All controller state lives here and is only touched while one command is
//! handled. Timers, connection RPCs and delayed actions run as detached tasks
//! and report back by sending commands through a [`HubHandle`].
//!
//! A turn handles one command plus whatever is already queued behind it, then
//! settles: internal feedbacks are recomputed, dirty controls are rendered and
//! changed controls are queued for persistence.
//!
//! ```text
//! surface / connection / timer ──► HubHandle ──► command queue
//!                                                    │
//!                       ┌────────────────────────────▼───────────────────┐
//!                       │ Hub: controls, internal, variables, pages,     │
//!                       │      surfaces, graphics                        │
//!                       └───────┬─────────────────────────────┬──────────┘
//!                               ▼                             ▼
//!                         surface draws              PersistenceActor
//! ```

mod commands;
mod handle;

#[cfg(test)]
mod tests;

pub use commands::{HubCommand, HubInvoke, PageNavKind};
pub use handle::HubHandle;

use crate::config::SurfaceConfig;
use crate::connections::{ConnectionRegistry, FeedbackValueUpdate};
use crate::controls::model::{ControlId, ControlModel, EntityOptions, INTERNAL_CONNECTION};
use crate::controls::{
    new_bank_id, new_trigger_id, Control, ControlDeps, ControlsController, DrawStyle, PRESET_PREFIX,
};
use crate::error::ControlError;
use crate::graphics::GraphicsController;
use crate::internal::{FeedbackContext, InternalContext, InternalController, InternalEffects};
use crate::page::{ControlLocation, PageStore};
use crate::store::{PersistenceActorHandle, StoredCustomVariable, StoredState};
use crate::surface::{SurfaceController, SurfaceInput, SurfacePanel};
use crate::variables::{VariablesController, CUSTOM_LABEL, INTERNAL_LABEL};
use chrono::{DateTime, Local};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Clock driving time variables, lockouts and timed triggers
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Commands drained into one turn before settling
const MAX_COMMANDS_PER_TURN: usize = 256;

/// Render passes per settle; button text feeding other buttons needs more than one
const MAX_SETTLE_PASSES: usize = 4;

/// Work collected during a turn
#[derive(Debug, Default)]
struct Dirty {
    redraw: BTreeSet<ControlId>,
    persist: BTreeSet<ControlId>,
    runtime: BTreeSet<ControlId>,
    /// Controls whose internal feedbacks must be re-read
    resync: BTreeSet<ControlId>,
    recheck: HashSet<&'static str>,
    pages: BTreeSet<u32>,
    custom_variables: BTreeSet<String>,
}

impl Dirty {
    fn needs_render(&self) -> bool {
        !self.redraw.is_empty() || !self.resync.is_empty() || !self.recheck.is_empty()
    }
}

/// `internal:` variable holding the rendered text of a slot
fn button_text_variable(location: &ControlLocation) -> String {
    format!("b_text_{}_{}_{}", location.page_number, location.row, location.column)
}

pub struct Hub {
    controls: ControlsController,
    internal: InternalController,
    variables: VariablesController,
    pages: PageStore,
    surfaces: SurfaceController,
    graphics: GraphicsController,
    connections: Arc<ConnectionRegistry>,
    store: Option<PersistenceActorHandle>,
    handle: HubHandle,
    dirty: Dirty,
}

impl Hub {
    pub fn new(
        handle: HubHandle,
        connections: Arc<ConnectionRegistry>,
        pages: PageStore,
        surfaces: SurfaceController,
        store: Option<PersistenceActorHandle>,
    ) -> Self {
        let deps = ControlDeps::new(handle.clone(), connections.clone());
        Self {
            controls: ControlsController::new(deps),
            internal: InternalController::new(),
            variables: VariablesController::new(),
            pages,
            surfaces,
            graphics: GraphicsController::new(),
            connections,
            store,
            handle,
            dirty: Dirty::default(),
        }
    }

    /// Restore stored pages, custom variables and controls
    pub fn load(&mut self, state: StoredState) {
        self.pages.load(state.pages);
        let changed = self
            .variables
            .load_custom_variables(state.custom_variables, state.custom_values);
        self.controls.load(state.controls);
        let upgraded = self.controls.upgrade_internal_entities(&self.internal);
        if !upgraded.is_empty() {
            info!("Upgraded internal entities in {} control(s)", upgraded.len());
        }
        self.dirty.persist.extend(upgraded);

        let known = self.connections.ids();
        let cleaned = self.controls.verify_connection_ids(&known);
        if !cleaned.is_empty() {
            warn!("Removed entities of unknown connections from {} control(s)", cleaned.len());
        }
        self.dirty.persist.extend(cleaned);
        self.dirty.resync.extend(self.controls.ids());
        self.on_variables_changed(changed);
        // Values just came from the store
        self.dirty.custom_variables.clear();
    }

    /// Arm startup triggers and paint every surface
    pub fn start(&mut self) {
        self.publish_internal_variables(Local::now());
        self.controls.on_startup();
        self.settle();
        let surface_ids: Vec<String> = self.surfaces.surfaces().map(|s| s.surface_id().to_string()).collect();
        for surface_id in surface_ids {
            self.redraw_surface(&surface_id);
        }
    }

    /// Spawn the run loop on the current runtime
    pub fn spawn(self, cmd_rx: mpsc::UnboundedReceiver<HubCommand>) -> JoinHandle<()> {
        tokio::spawn(self.run(cmd_rx))
    }

    pub async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<HubCommand>) {
        info!("Hub started ({} control(s))", self.controls.len());
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let running = tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_turn(cmd, &mut cmd_rx),
                    None => false,
                },
                _ = ticker.tick() => {
                    self.on_tick(Local::now());
                    self.settle();
                    true
                }
            };
            if !running {
                break;
            }
        }
        self.shutdown().await;
    }

    /// Handle `first` and everything already queued, then settle
    pub(crate) fn handle_turn(&mut self, first: HubCommand, cmd_rx: &mut mpsc::UnboundedReceiver<HubCommand>) -> bool {
        let mut running = self.handle_command(first);
        let mut handled = 1;
        while running && handled < MAX_COMMANDS_PER_TURN {
            match cmd_rx.try_recv() {
                Ok(cmd) => {
                    running = self.handle_command(cmd);
                    handled += 1;
                }
                Err(_) => break,
            }
        }
        self.settle();
        running
    }

    async fn shutdown(&mut self) {
        info!("Hub shutting down");
        self.controls.abort_all();
        self.settle();
        if let Some(store) = &self.store {
            if let Err(e) = store.flush().await {
                warn!("Final store flush failed: {:#}", e);
            }
            store.shutdown();
        }
    }

    // =========================================================================
    // Command dispatch
    // =========================================================================

    /// Handle one command; returns `false` on shutdown
    fn handle_command(&mut self, cmd: HubCommand) -> bool {
        trace!("Hub command: {:?}", cmd);
        match cmd {
            HubCommand::ControlChanged { control_id, redraw } => {
                self.dirty.persist.insert(control_id.clone());
                self.dirty.resync.insert(control_id.clone());
                if redraw {
                    self.dirty.redraw.insert(control_id);
                }
            }
            HubCommand::Redraw { control_id } => {
                self.dirty.redraw.insert(control_id);
            }
            HubCommand::RuntimePropsChanged { control_id } => {
                self.dirty.runtime.insert(control_id.clone());
                self.dirty.redraw.insert(control_id);
                self.dirty.recheck.insert("bank_current_step");
                self.dirty.recheck.insert("bank_pushed");
            }
            HubCommand::PressControl {
                control_id,
                pressed,
                surface_id,
                force,
            } => {
                let location = self.pages.get_location_of_control_id(&control_id);
                if self
                    .controls
                    .press_control(&control_id, pressed, surface_id.as_deref(), force, location)
                {
                    self.dirty.recheck.insert("bank_pushed");
                }
            }
            HubCommand::RotateControl {
                control_id,
                right,
                surface_id,
            } => {
                let location = self.pages.get_location_of_control_id(&control_id);
                self.controls
                    .rotate_control(&control_id, right, surface_id.as_deref(), location);
            }
            HubCommand::HoldTimerElapsed {
                control_id,
                surface_id,
                token,
                set_id,
            } => {
                let location = self.pages.get_location_of_control_id(&control_id);
                self.controls
                    .on_hold_timer(&control_id, &surface_id, token, &set_id, location);
            }
            HubCommand::PageNav { surface_id, kind } => {
                self.page_nav(surface_id.as_deref(), kind);
            }
            HubCommand::ExecuteInternalAction { action, extras } => {
                let effects = {
                    let mut ctx = InternalContext {
                        controls: &mut self.controls,
                        variables: &mut self.variables,
                        pages: &self.pages,
                        surfaces: &mut self.surfaces,
                        connections: &self.connections,
                        effects: InternalEffects::default(),
                    };
                    self.internal.execute_action(&action, &extras, &mut ctx);
                    ctx.effects
                };
                self.apply_effects(effects);
            }
            HubCommand::ExecuteTrigger { control_id, source } => {
                self.controls.execute_trigger(&control_id, source);
            }
            HubCommand::UpdateFeedbackValues {
                connection_id,
                updates,
            } => {
                let redraw = self.controls.update_feedback_values(&connection_id, &updates);
                self.dirty.redraw.extend(redraw);
            }
            HubCommand::SetVariableValues {
                connection_id,
                values,
            } => {
                let label = self
                    .connections
                    .label_of(&connection_id)
                    .unwrap_or(connection_id);
                let changed = self.variables.set_variable_values(&label, values);
                self.on_variables_changed(changed);
            }
            HubCommand::ConnectionStatusChanged {
                connection_id,
                status,
            } => {
                debug!(connection_id = %connection_id, "Connection status: {:?}", status);
                self.dirty.recheck.insert("instance_status");
                self.publish_internal_variables(Local::now());
            }
            HubCommand::ApplyLearnedOptions {
                control_id,
                action_id,
                options,
            } => {
                if !self.controls.apply_learned_options(&control_id, &action_id, options) {
                    debug!(control_id = %control_id, "Learned options for vanished action '{}'", action_id);
                }
            }
            HubCommand::SurfaceInput { surface_id, event } => {
                self.surface_input(&surface_id, &event);
            }
            HubCommand::Tick => self.on_tick(Local::now()),
            HubCommand::Invoke(f) => {
                self.settle();
                f(self);
            }
            HubCommand::Shutdown => return false,
        }
        true
    }

    fn surface_input(&mut self, surface_id: &str, event: &crate::surface::SurfaceInputEvent) {
        let Some(input) = self.surfaces.translate_input(surface_id, event) else {
            return;
        };
        match input {
            SurfaceInput::Press { location, pressed } => {
                self.press_location(location, pressed, Some(surface_id));
            }
            SurfaceInput::Rotate { location, right } => {
                self.rotate_location(location, right, Some(surface_id));
            }
        }
    }

    fn page_nav(&mut self, surface_id: Option<&str>, kind: PageNavKind) {
        let Some(surface_id) = surface_id else {
            debug!("Page navigation without a surface ignored");
            return;
        };
        let changed = match kind {
            PageNavKind::Home => self.surfaces.home(surface_id),
            PageNavKind::Up => self.surfaces.offset_page(surface_id, 1, &self.pages),
            PageNavKind::Down => self.surfaces.offset_page(surface_id, -1, &self.pages),
        };
        if changed {
            for id in self.surfaces.surfaces_in_group_of(surface_id) {
                self.redraw_surface(&id);
            }
        }
    }

    fn on_tick(&mut self, now: DateTime<Local>) {
        self.publish_internal_variables(now);
        let locked = self.surfaces.check_lockouts();
        if !locked.is_empty() {
            self.dirty.recheck.insert("surface_locked");
        }
        self.controls.on_tick(now);
    }

    // =========================================================================
    // Fan-out
    // =========================================================================

    /// Internal controller plus a read-only view of everything else
    fn split(&mut self, now: DateTime<Local>) -> (&mut InternalController, FeedbackContext<'_>) {
        let ctx = FeedbackContext {
            controls: &self.controls,
            variables: &self.variables,
            pages: &self.pages,
            surfaces: &self.surfaces,
            connections: &self.connections,
            now,
        };
        (&mut self.internal, ctx)
    }

    fn apply_effects(&mut self, effects: InternalEffects) {
        self.on_variables_changed(effects.changed_variables);
        self.dirty.recheck.extend(effects.recheck);
        for surface_id in effects.redraw_surfaces {
            self.redraw_surface(&surface_id);
        }
    }

    fn on_variables_changed(&mut self, changed: HashSet<String>) {
        if changed.is_empty() {
            return;
        }
        let custom_prefix = format!("{}:", CUSTOM_LABEL);
        for id in &changed {
            if let Some(name) = id.strip_prefix(&custom_prefix) {
                self.dirty.custom_variables.insert(name.to_string());
            }
        }

        let redraw = self.controls.on_variables_changed(&changed);
        self.dirty.redraw.extend(redraw);
        let updates = {
            let (internal, ctx) = self.split(Local::now());
            internal.on_variables_changed(&changed, &ctx)
        };
        self.apply_internal_updates(updates);
    }

    /// Internal feedback values take the same route as connection values
    fn apply_internal_updates(&mut self, updates: Vec<FeedbackValueUpdate>) {
        if updates.is_empty() {
            return;
        }
        let redraw = self.controls.update_feedback_values(INTERNAL_CONNECTION, &updates);
        self.dirty.redraw.extend(redraw);
    }

    fn publish_internal_variables(&mut self, now: DateTime<Local>) {
        let values = {
            let (internal, ctx) = self.split(now);
            internal.variable_values(&ctx)
        };
        let changed = self.variables.set_variable_values(INTERNAL_LABEL, values);
        self.on_variables_changed(changed);
    }

    // =========================================================================
    // Settling: internal feedbacks, rendering, persistence
    // =========================================================================

    /// Bring faces and the store up to date with this turn's changes
    pub fn settle(&mut self) {
        for _ in 0..MAX_SETTLE_PASSES {
            if !self.dirty.needs_render() {
                break;
            }
            self.sync_internal_feedbacks();
            self.render_dirty();
        }
        if self.dirty.needs_render() {
            trace!("Redraws carried over to the next turn");
        }
        self.persist_dirty();
    }

    fn sync_internal_feedbacks(&mut self) {
        let resync = std::mem::take(&mut self.dirty.resync);
        let recheck: Vec<&'static str> = self.dirty.recheck.drain().collect();
        if resync.is_empty() && recheck.is_empty() {
            return;
        }
        let updates = {
            let (internal, ctx) = self.split(Local::now());
            let mut updates = Vec::new();
            for control_id in &resync {
                match ctx.controls.get(control_id) {
                    Some(control) => {
                        updates.extend(internal.sync_control_feedbacks(control_id, control.internal_feedbacks(), &ctx));
                    }
                    None => internal.forget_control(control_id),
                }
            }
            if !recheck.is_empty() {
                updates.extend(internal.check_feedbacks(&recheck, &ctx));
            }
            updates
        };
        self.apply_internal_updates(updates);
    }

    fn render_dirty(&mut self) {
        let ids = std::mem::take(&mut self.dirty.redraw);
        let mut texts = Vec::new();
        let mut drawn = false;
        for control_id in ids {
            let Some(location) = self.pages.get_location_of_control_id(&control_id) else {
                continue;
            };
            let Some(control) = self.controls.get_mut(&control_id) else {
                continue;
            };
            let style = control.get_draw_style(&self.variables, Some(&location));
            if let Some(DrawStyle::Button(face)) = &style {
                texts.push((button_text_variable(&location), Value::from(face.style.text.clone())));
            }
            let (image, changed) = self.graphics.render(&location, style);
            if changed {
                self.surfaces.draw(&location, &image);
                drawn = true;
            }
        }
        if drawn {
            self.dirty.recheck.insert("bank_style");
        }
        let changed = self.variables.set_variable_values(INTERNAL_LABEL, texts);
        self.on_variables_changed(changed);
    }

    /// Paint every slot of the page a surface shows
    fn redraw_surface(&mut self, surface_id: &str) {
        if self.surfaces.is_locked(surface_id) {
            return;
        }
        let (Some(page), Some((columns, rows))) = (
            self.surfaces.page_of(surface_id),
            self.surfaces.surface(surface_id).map(|s| s.grid_size()),
        ) else {
            return;
        };
        debug!(surface_id, page, "Redrawing surface");
        for row in 0..rows {
            for column in 0..columns {
                let location = ControlLocation::new(page, row, column);
                let style = match self.pages.get_control_id_at(&location).cloned() {
                    Some(control_id) => self
                        .controls
                        .get_mut(&control_id)
                        .and_then(|c| c.get_draw_style(&self.variables, Some(&location))),
                    None => None,
                };
                let (image, _) = self.graphics.render(&location, style);
                if let Some(surface) = self.surfaces.surface(surface_id) {
                    surface.draw(column, row, &image);
                }
            }
        }
    }

    fn persist_dirty(&mut self) {
        let persist = std::mem::take(&mut self.dirty.persist);
        let runtime = std::mem::take(&mut self.dirty.runtime);
        let pages = std::mem::take(&mut self.dirty.pages);
        let custom = std::mem::take(&mut self.dirty.custom_variables);
        let Some(store) = &self.store else {
            return;
        };

        // Preset controls are previews, rebuilt from the connection on demand
        for control_id in persist.iter().filter(|id| !id.starts_with(PRESET_PREFIX)) {
            match self.controls.get(control_id) {
                Some(control) => store.save_control(control_id, &control.to_json()),
                None => store.delete_control(control_id),
            }
        }
        for control_id in runtime.iter().filter(|id| !id.starts_with(PRESET_PREFIX)) {
            if let Some(rt) = self.controls.get(control_id).and_then(Control::to_runtime_json) {
                store.save_runtime(control_id, &rt);
            }
        }
        for number in pages {
            if let Some(page) = self.pages.page(number) {
                store.save_page(number, page);
            }
        }
        for name in custom {
            match self.variables.custom_variables().get(&name) {
                Some(definition) => {
                    let current_value = if definition.persist_current_value {
                        self.variables
                            .get_value(&format!("{}:{}", CUSTOM_LABEL, name))
                            .cloned()
                    } else {
                        None
                    };
                    store.save_custom_variable(
                        &name,
                        &StoredCustomVariable {
                            definition: definition.clone(),
                            current_value,
                        },
                    );
                }
                None => store.delete_custom_variable(&name),
            }
        }
    }

    // =========================================================================
    // Queries and mutations (reached through `HubHandle::invoke`)
    // =========================================================================

    pub fn handle(&self) -> &HubHandle {
        &self.handle
    }

    pub fn controls(&self) -> &ControlsController {
        &self.controls
    }

    pub fn controls_mut(&mut self) -> &mut ControlsController {
        &mut self.controls
    }

    pub fn variables(&self) -> &VariablesController {
        &self.variables
    }

    pub fn pages(&self) -> &PageStore {
        &self.pages
    }

    pub fn surfaces(&self) -> &SurfaceController {
        &self.surfaces
    }

    pub fn internal(&self) -> &InternalController {
        &self.internal
    }

    pub fn press_location(&mut self, location: ControlLocation, pressed: bool, surface_id: Option<&str>) -> bool {
        let Some(control_id) = self.pages.get_control_id_at(&location).cloned() else {
            trace!(%location, "Press on empty slot");
            return false;
        };
        let handled = self
            .controls
            .press_control(&control_id, pressed, surface_id, false, Some(location));
        if handled {
            self.dirty.recheck.insert("bank_pushed");
        }
        handled
    }

    pub fn rotate_location(&mut self, location: ControlLocation, right: bool, surface_id: Option<&str>) -> bool {
        match self.pages.get_control_id_at(&location).cloned() {
            Some(control_id) => self
                .controls
                .rotate_control(&control_id, right, surface_id, Some(location)),
            None => false,
        }
    }

    /// Face of the control at a location, `None` for an empty slot
    pub fn draw_style_at(&mut self, location: ControlLocation) -> Option<DrawStyle> {
        let control_id = self.pages.get_control_id_at(&location).cloned()?;
        self.controls
            .get_mut(&control_id)?
            .get_draw_style(&self.variables, Some(&location))
    }

    pub fn control_model(&self, control_id: &str) -> Option<ControlModel> {
        self.controls.get(control_id).map(Control::to_json)
    }

    fn check_location(&self, location: &ControlLocation) -> Result<(), ControlError> {
        if self.pages.is_valid_location(location) {
            Ok(())
        } else {
            Err(ControlError::InvalidLocation(location.to_string()))
        }
    }

    /// Put a freshly registered control on the grid, replacing the slot's occupant
    fn place(&mut self, location: ControlLocation, control_id: ControlId) {
        if let Some(previous) = self.pages.get_control_id_at(&location).cloned() {
            if previous != control_id {
                self.delete_control(&previous);
            }
        }
        if let Some(old) = self.pages.get_location_of_control_id(&control_id) {
            self.dirty.pages.insert(old.page_number);
            self.graphics.forget(&old);
        }
        self.pages.set_control_id_at(location, Some(control_id.clone()));
        self.dirty.pages.insert(location.page_number);
        self.dirty.persist.insert(control_id.clone());
        self.dirty.resync.insert(control_id.clone());
        self.dirty.redraw.insert(control_id);
    }

    /// Create a control at a location; any control already there is deleted
    pub fn create_control_at(&mut self, location: ControlLocation, model: ControlModel) -> Result<ControlId, ControlError> {
        self.check_location(&location)?;
        let control_id = new_bank_id();
        self.controls.create_control(&control_id, model, None)?;
        self.place(location, control_id.clone());
        info!("➕ Created control {} at {}", control_id, location);
        Ok(control_id)
    }

    /// Create a trigger (triggers have no location)
    pub fn create_trigger(&mut self, model: ControlModel) -> Result<ControlId, ControlError> {
        let control_id = new_trigger_id();
        self.controls.create_control(&control_id, model, None)?;
        self.dirty.persist.insert(control_id.clone());
        self.dirty.resync.insert(control_id.clone());
        Ok(control_id)
    }

    /// Import a control model, rewriting connection ids through `remap`
    pub fn import_control_at(
        &mut self,
        location: ControlLocation,
        model: ControlModel,
        remap: HashMap<String, String>,
    ) -> Result<ControlId, ControlError> {
        self.check_location(&location)?;
        let control_id = new_bank_id();
        self.controls
            .import_control(&control_id, model, remap, &self.internal)?;
        self.place(location, control_id.clone());
        Ok(control_id)
    }

    /// Materialise a connection preset as a preview control
    pub fn create_preset_control(&mut self, connection_id: &str, preset_id: &str) -> Result<ControlId, ControlError> {
        let control_id = self.controls.create_preset_control(connection_id, preset_id)?;
        self.dirty.resync.insert(control_id.clone());
        Ok(control_id)
    }

    /// Delete a control and clear its slot
    pub fn delete_control(&mut self, control_id: &str) -> bool {
        if !self.controls.delete_control(control_id) {
            return false;
        }
        self.internal.forget_control(control_id);
        if let Some(location) = self.pages.get_location_of_control_id(control_id) {
            self.pages.set_control_id_at(location, None);
            self.dirty.pages.insert(location.page_number);
            let (image, changed) = self.graphics.render(&location, None);
            if changed {
                self.surfaces.draw(&location, &image);
            }
        }
        self.dirty.persist.insert(control_id.to_string());
        self.dirty.recheck.insert("bank_style");
        info!("➖ Deleted control {}", control_id);
        true
    }

    pub fn create_custom_variable(&mut self, name: &str, default_value: Value) -> bool {
        if !self.variables.create_custom_variable(name, default_value) {
            return false;
        }
        self.dirty.custom_variables.insert(name.to_string());
        let changed = HashSet::from([format!("{}:{}", CUSTOM_LABEL, name)]);
        self.on_variables_changed(changed);
        true
    }

    /// Set a custom variable's current value; `false` when it does not exist
    pub fn set_custom_variable_value(&mut self, name: &str, value: Value) -> bool {
        match self.variables.set_custom_variable_value(name, value) {
            Some(changed) => {
                self.on_variables_changed(changed);
                true
            }
            None => false,
        }
    }

    pub fn set_custom_variable_persistence(&mut self, name: &str, persist: bool) -> bool {
        let found = self.variables.set_custom_variable_persistence(name, persist);
        if found {
            self.dirty.custom_variables.insert(name.to_string());
        }
        found
    }

    pub fn lock_surface(&mut self, surface_id: &str) -> bool {
        let affected = self.surfaces.lock(surface_id);
        if affected.is_empty() {
            return false;
        }
        self.dirty.recheck.insert("surface_locked");
        true
    }

    /// Unlock with a PIN; `false` on a wrong PIN or an unlocked surface
    pub fn unlock_surface(&mut self, surface_id: &str, pin: Option<&str>) -> bool {
        let affected = self.surfaces.unlock(surface_id, pin);
        if affected.is_empty() {
            return false;
        }
        self.dirty.recheck.insert("surface_locked");
        for id in affected {
            self.redraw_surface(&id);
        }
        true
    }

    pub fn add_surface(&mut self, panel: Arc<dyn SurfacePanel>, config: Option<&SurfaceConfig>) -> String {
        let surface_id = self.surfaces.add_surface(panel, config);
        self.redraw_surface(&surface_id);
        surface_id
    }

    /// Apply reloaded surface settings (brightness)
    pub fn apply_surface_configs(&mut self, configs: &[SurfaceConfig]) {
        for config in configs {
            if self.surfaces.set_brightness(&config.id, config.brightness) {
                debug!(surface_id = %config.id, "Brightness reloaded");
            }
        }
    }

    /// Forget a connection and everything that refers to it
    pub fn remove_connection(&mut self, connection_id: &str) -> bool {
        let label = self.connections.label_of(connection_id);
        if !self.connections.unregister(connection_id) {
            return false;
        }
        let changed_controls = self.controls.forget_connection(connection_id);
        self.dirty.redraw.extend(changed_controls.iter().cloned());
        self.dirty.resync.extend(changed_controls.iter().cloned());
        self.dirty.persist.extend(changed_controls);
        if let Some(label) = label {
            let changed = self.variables.forget_label(&label);
            self.on_variables_changed(changed);
        }
        self.dirty.recheck.insert("instance_status");
        true
    }

    /// Rename a connection label and rewrite every reference to it
    pub fn rename_connection_label(&mut self, connection_id: &str, new_label: &str) -> bool {
        let Some(old_label) = self.connections.set_label(connection_id, new_label) else {
            return false;
        };
        if old_label == new_label {
            return true;
        }
        let renamed = self.controls.rename_connection_label(&old_label, new_label);
        self.dirty.redraw.extend(renamed.controls.iter().cloned());
        self.dirty.resync.extend(renamed.internal);
        self.dirty.persist.extend(renamed.controls);
        let changed = self.variables.rename_label(&old_label, new_label);
        self.on_variables_changed(changed);
        true
    }

    /// Apply learned option values to an action right away
    pub fn learn_options(&mut self, control_id: &str, action_id: &str, options: EntityOptions) -> bool {
        self.controls.apply_learned_options(control_id, action_id, options)
    }
}
