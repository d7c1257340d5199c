//! Materialising connection presets as preset buttons

use super::model::{ButtonModel, ControlModel, PresetDefinition};

/// Button model for a preset; entities get fresh ids so the copy is independent
pub fn preset_to_model(preset: &PresetDefinition) -> ControlModel {
    let mut steps = preset.steps.clone();
    for step in steps.values_mut() {
        for actions in step.action_sets.values_mut() {
            for action in actions.iter_mut() {
                action.id = super::model::new_id();
            }
        }
    }
    ControlModel::PresetButton(ButtonModel {
        style: preset.style.clone(),
        options: preset.options.clone(),
        feedbacks: preset.feedbacks.iter().map(|f| f.clone_with_new_ids()).collect(),
        steps,
        local_variables: Vec::new(),
    })
}

/// Editable button copied from a preset (placing a preset on a page)
pub fn preset_to_button_model(preset: &PresetDefinition) -> ControlModel {
    match preset_to_model(preset) {
        ControlModel::PresetButton(model) => ControlModel::Button(model),
        other => other,
    }
}
