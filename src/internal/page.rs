use super::{def, option_f64, option_str, target_surface, InternalContext, InternalDefinition, InternalFragment};
use crate::controls::model::ActionEntity;
use crate::controls::RunActionExtras;
use crate::variables::VariableOverrides;
use tracing::debug;

const ACTIONS: &[InternalDefinition] = &[
    def("set_page", "Surface: Set page"),
    def("inc_page", "Surface: Increment page number"),
    def("dec_page", "Surface: Decrement page number"),
];

/// Page changes for the surface that ran the action, or a named one
pub struct Page;

impl InternalFragment for Page {
    fn name(&self) -> &'static str {
        "page"
    }

    fn action_definitions(&self) -> &'static [InternalDefinition] {
        ACTIONS
    }

    fn execute_action(&mut self, action: &ActionEntity, extras: &RunActionExtras, ctx: &mut InternalContext<'_>) -> bool {
        let id = action.definition_id.as_str();
        if !ACTIONS.iter().any(|d| d.id == id) {
            return false;
        }
        let Some(surface_id) = target_surface(&action.options, extras) else {
            debug!(control_id = %extras.control_id, "'{}' has no surface to act on", id);
            return true;
        };

        let changed = match id {
            "set_page" => {
                let page = match option_str(&action.options, "page") {
                    Some(text) => ctx
                        .variables
                        .parse_variables(text, &VariableOverrides::new())
                        .text
                        .trim()
                        .parse::<u32>()
                        .ok(),
                    None => option_f64(&action.options, "page").map(|p| p as u32),
                };
                match page {
                    Some(0) => ctx.surfaces.home(&surface_id),
                    Some(p) if ctx.pages.page(p).is_some() => ctx.surfaces.set_page(&surface_id, p),
                    _ => {
                        debug!("Page {:?} does not exist", page);
                        false
                    }
                }
            }
            "inc_page" => ctx.surfaces.offset_page(&surface_id, 1, ctx.pages),
            _ => ctx.surfaces.offset_page(&surface_id, -1, ctx.pages),
        };

        if changed {
            ctx.effects
                .redraw_surfaces
                .extend(ctx.surfaces.surfaces_in_group_of(&surface_id));
        }
        true
    }
}
