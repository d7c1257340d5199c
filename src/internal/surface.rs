//! Surface brightness and lockout

use super::{
    def, option_f64, option_str, target_surface, FeedbackContext, FeedbackOutcome, InternalContext,
    InternalDefinition, InternalFragment,
};
use crate::controls::model::{ActionEntity, FeedbackEntity};
use crate::controls::RunActionExtras;

const ACTIONS: &[InternalDefinition] = &[
    def("set_brightness", "Surface: Set brightness"),
    def("lockout_device", "Surface: Lock"),
    def("unlockout_device", "Surface: Unlock"),
    def("lockout_all", "Surface: Lock all"),
    def("unlockout_all", "Surface: Unlock all"),
];

const FEEDBACKS: &[InternalDefinition] = &[def("surface_locked", "Surface: When locked")];

pub struct Surface;

impl InternalFragment for Surface {
    fn name(&self) -> &'static str {
        "surface"
    }

    fn action_definitions(&self) -> &'static [InternalDefinition] {
        ACTIONS
    }

    fn feedback_definitions(&self) -> &'static [InternalDefinition] {
        FEEDBACKS
    }

    fn execute_action(&mut self, action: &ActionEntity, extras: &RunActionExtras, ctx: &mut InternalContext<'_>) -> bool {
        let affected = match action.definition_id.as_str() {
            "set_brightness" => {
                if let (Some(surface_id), Some(level)) = (
                    target_surface(&action.options, extras),
                    option_f64(&action.options, "brightness"),
                ) {
                    ctx.surfaces.set_brightness(&surface_id, level.clamp(0.0, 100.0) as u8);
                }
                return true;
            }
            "lockout_device" => target_surface(&action.options, extras)
                .map(|id| ctx.surfaces.lock(&id))
                .unwrap_or_default(),
            "unlockout_device" => target_surface(&action.options, extras)
                .map(|id| ctx.surfaces.force_unlock(&id))
                .unwrap_or_default(),
            "lockout_all" => ctx.surfaces.lock_all(),
            "unlockout_all" => ctx.surfaces.unlock_all(),
            _ => return false,
        };
        if !affected.is_empty() {
            ctx.effects.recheck.insert("surface_locked");
            ctx.effects.redraw_surfaces.extend(affected);
        }
        true
    }

    fn execute_feedback(&self, feedback: &FeedbackEntity, control_id: &str, ctx: &FeedbackContext<'_>) -> Option<FeedbackOutcome> {
        if feedback.definition_id != "surface_locked" {
            return None;
        }
        let locked = match option_str(&feedback.options, "surface").map(str::trim) {
            Some(id) if !id.is_empty() && id != "self" => ctx.surfaces.is_locked(id),
            // Any surface showing this control's page
            _ => ctx
                .pages
                .get_location_of_control_id(control_id)
                .map(|loc| {
                    ctx.surfaces
                        .surfaces_on_page(loc.page_number)
                        .iter()
                        .any(|h| ctx.surfaces.is_locked(h.surface_id()))
                })
                .unwrap_or(false),
        };
        Some(FeedbackOutcome::Bool(locked))
    }
}
