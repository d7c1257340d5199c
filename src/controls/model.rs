//! Persisted control models
//!
//! These are the serde shapes stored in the control table and exchanged with
//! the API. Runtime controls are built from them and serialize back into them
//! through `to_json()`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Opaque control identifier (`bank:<uuid>`, `trigger:<uuid>`, `preset:<conn>:<preset>`)
pub type ControlId = String;

/// Surface identifier as reported by the surface layer
pub type SurfaceId = String;

/// Raw option values of an action or feedback
pub type EntityOptions = Map<String, Value>;

/// Partial style applied on top of a button's base style
pub type StylePatch = Map<String, Value>;

/// Connection id of the internal pseudo-connection
pub const INTERNAL_CONNECTION: &str = "internal";

/// Persisted `type` strings
pub const TYPE_BUTTON: &str = "button";
pub const TYPE_PRESET_BUTTON: &str = "preset:button";
pub const TYPE_PAGE_NUMBER: &str = "pagenum";
pub const TYPE_PAGE_UP: &str = "pageup";
pub const TYPE_PAGE_DOWN: &str = "pagedown";
pub const TYPE_TRIGGER: &str = "trigger";

/// Generate a fresh entity/control id
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

/// Key of an action set within a step
///
/// Named sets fire on press/release/rotate, numeric sets fire when a press
/// was held for at least that many milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ActionSetId {
    Down,
    Up,
    RotateLeft,
    RotateRight,
    Duration(u64),
}

impl ActionSetId {
    /// Numeric hold duration, if this is a duration set
    pub fn duration(&self) -> Option<u64> {
        match self {
            ActionSetId::Duration(ms) => Some(*ms),
            _ => None,
        }
    }

    pub fn is_rotate(&self) -> bool {
        matches!(self, ActionSetId::RotateLeft | ActionSetId::RotateRight)
    }
}

impl fmt::Display for ActionSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionSetId::Down => write!(f, "down"),
            ActionSetId::Up => write!(f, "up"),
            ActionSetId::RotateLeft => write!(f, "rotate_left"),
            ActionSetId::RotateRight => write!(f, "rotate_right"),
            ActionSetId::Duration(ms) => write!(f, "{}", ms),
        }
    }
}

impl FromStr for ActionSetId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "down" => Ok(ActionSetId::Down),
            "up" => Ok(ActionSetId::Up),
            "rotate_left" => Ok(ActionSetId::RotateLeft),
            "rotate_right" => Ok(ActionSetId::RotateRight),
            other => other
                .parse::<u64>()
                .map(ActionSetId::Duration)
                .map_err(|_| format!("invalid action set id '{}'", other)),
        }
    }
}

impl TryFrom<String> for ActionSetId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ActionSetId> for String {
    fn from(value: ActionSetId) -> Self {
        value.to_string()
    }
}

/// One configured action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionEntity {
    pub id: String,
    #[serde(alias = "instance")]
    pub connection_id: String,
    #[serde(alias = "action")]
    pub definition_id: String,
    #[serde(default)]
    pub options: EntityOptions,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub delay: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_index: Option<u32>,
}

impl ActionEntity {
    /// Create a new action with a fresh id
    pub fn new(
        connection_id: impl Into<String>,
        definition_id: impl Into<String>,
        options: EntityOptions,
    ) -> Self {
        Self {
            id: new_id(),
            connection_id: connection_id.into(),
            definition_id: definition_id.into(),
            options,
            disabled: false,
            delay: 0,
            headline: None,
            upgrade_index: None,
        }
    }

    pub fn is_internal(&self) -> bool {
        self.connection_id == INTERNAL_CONNECTION
    }
}

/// One configured feedback, possibly with children (internal logic feedbacks only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackEntity {
    pub id: String,
    #[serde(alias = "instance_id")]
    pub connection_id: String,
    #[serde(alias = "type")]
    pub definition_id: String,
    #[serde(default)]
    pub options: EntityOptions,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_inverted: bool,
    /// Style applied while a boolean feedback is true
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<StylePatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FeedbackEntity>,
}

impl FeedbackEntity {
    /// Create a new feedback with a fresh id
    pub fn new(
        connection_id: impl Into<String>,
        definition_id: impl Into<String>,
        options: EntityOptions,
    ) -> Self {
        Self {
            id: new_id(),
            connection_id: connection_id.into(),
            definition_id: definition_id.into(),
            options,
            disabled: false,
            is_inverted: false,
            style: None,
            headline: None,
            upgrade_index: None,
            children: Vec::new(),
        }
    }

    pub fn is_internal(&self) -> bool {
        self.connection_id == INTERNAL_CONNECTION
    }

    /// Deep clone with fresh ids for this node and all descendants
    pub fn clone_with_new_ids(&self) -> Self {
        let mut copy = self.clone();
        copy.id = new_id();
        copy.children = self.children.iter().map(|c| c.clone_with_new_ids()).collect();
        copy
    }
}

/// Text size: automatic or a fixed point size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextSize {
    Fixed(u32),
    Named(String),
}

impl Default for TextSize {
    fn default() -> Self {
        TextSize::Named("auto".to_string())
    }
}

/// Style configured directly by the user on a button
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ButtonStyle {
    pub text: String,
    pub text_expression: bool,
    pub size: TextSize,
    pub color: u32,
    pub bgcolor: u32,
    pub alignment: String,
    pub pngalignment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub png64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_topbar: Option<bool>,
}

impl Default for ButtonStyle {
    fn default() -> Self {
        Self {
            text: String::new(),
            text_expression: false,
            size: TextSize::default(),
            color: 0xffffff,
            bgcolor: 0x000000,
            alignment: "center:center".to_string(),
            pngalignment: "center:center".to_string(),
            png64: None,
            show_topbar: None,
        }
    }
}

impl ButtonStyle {
    /// Apply a partial style. Unknown keys and mistyped values are ignored.
    pub fn apply_patch(&mut self, patch: &StylePatch) {
        for (key, value) in patch {
            match key.as_str() {
                "text" => {
                    if let Some(s) = value.as_str() {
                        self.text = s.to_string();
                    }
                }
                "textExpression" => {
                    if let Some(b) = value.as_bool() {
                        self.text_expression = b;
                    }
                }
                "size" => {
                    if let Some(n) = value.as_u64() {
                        self.size = TextSize::Fixed(n as u32);
                    } else if let Some(s) = value.as_str() {
                        self.size = TextSize::Named(s.to_string());
                    }
                }
                "color" => {
                    if let Some(n) = value.as_u64() {
                        self.color = n as u32;
                    }
                }
                "bgcolor" => {
                    if let Some(n) = value.as_u64() {
                        self.bgcolor = n as u32;
                    }
                }
                "alignment" => {
                    if let Some(s) = value.as_str() {
                        self.alignment = s.to_string();
                    }
                }
                "pngalignment" => {
                    if let Some(s) = value.as_str() {
                        self.pngalignment = s.to_string();
                    }
                }
                "png64" => {
                    self.png64 = value.as_str().map(|s| s.to_string());
                }
                "show_topbar" | "showTopbar" => {
                    self.show_topbar = value.as_bool();
                }
                _ => {}
            }
        }
    }

    /// Value of one style field as JSON, used to seed feedback style selections
    pub fn field_value(&self, key: &str) -> Option<Value> {
        match key {
            "text" => Some(Value::from(self.text.clone())),
            "textExpression" => Some(Value::from(self.text_expression)),
            "size" => serde_json::to_value(&self.size).ok(),
            "color" => Some(Value::from(self.color)),
            "bgcolor" => Some(Value::from(self.bgcolor)),
            "alignment" => Some(Value::from(self.alignment.clone())),
            "pngalignment" => Some(Value::from(self.pngalignment.clone())),
            "png64" => Some(self.png64.clone().map(Value::from).unwrap_or(Value::Null)),
            "show_topbar" => Some(self.show_topbar.map(Value::from).unwrap_or(Value::Null)),
            _ => None,
        }
    }
}

/// Button-level options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ButtonOptions {
    pub rotary_actions: bool,
    pub step_auto_progress: bool,
}

impl Default for ButtonOptions {
    fn default() -> Self {
        Self {
            rotary_actions: false,
            step_auto_progress: true,
        }
    }
}

/// Per-step options
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StepOptions {
    pub run_while_held: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// One step: its action sets and options
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepModel {
    #[serde(default)]
    pub action_sets: BTreeMap<ActionSetId, Vec<ActionEntity>>,
    #[serde(default)]
    pub options: StepOptions,
}

impl StepModel {
    /// New step with empty `down`/`up` sets (and rotate sets when requested)
    pub fn empty(rotary: bool) -> Self {
        let mut action_sets = BTreeMap::new();
        action_sets.insert(ActionSetId::Down, Vec::new());
        action_sets.insert(ActionSetId::Up, Vec::new());
        if rotary {
            action_sets.insert(ActionSetId::RotateLeft, Vec::new());
            action_sets.insert(ActionSetId::RotateRight, Vec::new());
        }
        Self {
            action_sets,
            options: StepOptions::default(),
        }
    }
}

/// Button local variable, evaluated as an expression and exposed as `$(local:<name>)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalVariableModel {
    pub name: String,
    pub expression: String,
}

/// Stepped button (also the body of a preset button)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonModel {
    #[serde(default)]
    pub style: ButtonStyle,
    #[serde(default)]
    pub options: ButtonOptions,
    #[serde(default)]
    pub feedbacks: Vec<FeedbackEntity>,
    pub steps: BTreeMap<String, StepModel>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub local_variables: Vec<LocalVariableModel>,
}

impl Default for ButtonModel {
    fn default() -> Self {
        let mut steps = BTreeMap::new();
        steps.insert("0".to_string(), StepModel::empty(false));
        Self {
            style: ButtonStyle::default(),
            options: ButtonOptions::default(),
            feedbacks: Vec::new(),
            steps,
            local_variables: Vec::new(),
        }
    }
}

/// Trigger options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TriggerOptions {
    pub name: String,
    pub enabled: bool,
    pub sort_order: i64,
}

impl Default for TriggerOptions {
    fn default() -> Self {
        Self {
            name: "New trigger".to_string(),
            enabled: false,
            sort_order: 0,
        }
    }
}

/// One trigger event source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEventModel {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub options: EntityOptions,
}

fn default_true() -> bool {
    true
}

impl TriggerEventModel {
    pub fn new(event_type: impl Into<String>, options: EntityOptions) -> Self {
        Self {
            id: new_id(),
            event_type: event_type.into(),
            enabled: true,
            options,
        }
    }
}

/// Event-driven trigger
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerModel {
    #[serde(default)]
    pub options: TriggerOptions,
    #[serde(default)]
    pub actions: Vec<ActionEntity>,
    #[serde(default)]
    pub condition: Vec<FeedbackEntity>,
    #[serde(default)]
    pub events: Vec<TriggerEventModel>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub local_variables: Vec<LocalVariableModel>,
}

/// Every persisted control, tagged by its `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlModel {
    #[serde(rename = "button")]
    Button(ButtonModel),
    #[serde(rename = "preset:button")]
    PresetButton(ButtonModel),
    #[serde(rename = "pagenum")]
    PageNumber,
    #[serde(rename = "pageup")]
    PageUp,
    #[serde(rename = "pagedown")]
    PageDown,
    #[serde(rename = "trigger")]
    Trigger(TriggerModel),
}

impl ControlModel {
    /// Persisted `type` string
    pub fn type_name(&self) -> &'static str {
        match self {
            ControlModel::Button(_) => TYPE_BUTTON,
            ControlModel::PresetButton(_) => TYPE_PRESET_BUTTON,
            ControlModel::PageNumber => TYPE_PAGE_NUMBER,
            ControlModel::PageUp => TYPE_PAGE_UP,
            ControlModel::PageDown => TYPE_PAGE_DOWN,
            ControlModel::Trigger(_) => TYPE_TRIGGER,
        }
    }
}

/// Volatile control state persisted separately from the configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuntimeModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_id: Option<String>,
    #[serde(rename = "lastExecuted", default, skip_serializing_if = "Option::is_none")]
    pub last_executed: Option<i64>,
}

/// Button preset published by a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresetDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub style: ButtonStyle,
    #[serde(default)]
    pub options: ButtonOptions,
    #[serde(default)]
    pub feedbacks: Vec<FeedbackEntity>,
    pub steps: BTreeMap<String, StepModel>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_set_id_parsing() {
        assert_eq!("down".parse::<ActionSetId>().unwrap(), ActionSetId::Down);
        assert_eq!(
            "rotate_right".parse::<ActionSetId>().unwrap(),
            ActionSetId::RotateRight
        );
        assert_eq!(
            "1500".parse::<ActionSetId>().unwrap(),
            ActionSetId::Duration(1500)
        );
        assert!("sideways".parse::<ActionSetId>().is_err());
        assert_eq!(ActionSetId::Duration(500).to_string(), "500");
    }

    #[test]
    fn test_control_model_tagged_by_type() {
        let model: ControlModel = serde_json::from_value(json!({
            "type": "button",
            "style": { "text": "Hello" },
            "steps": {
                "0": {
                    "action_sets": { "down": [], "up": [], "1500": [] },
                    "options": { "runWhileHeld": [1500] }
                }
            }
        }))
        .unwrap();

        match &model {
            ControlModel::Button(button) => {
                assert_eq!(button.style.text, "Hello");
                let step = &button.steps["0"];
                assert!(step.action_sets.contains_key(&ActionSetId::Duration(1500)));
                assert_eq!(step.options.run_while_held, vec![1500]);
            }
            other => panic!("unexpected model {:?}", other),
        }

        let value = serde_json::to_value(&model).unwrap();
        assert_eq!(value["type"], "button");
        assert!(value["steps"]["0"]["action_sets"]["1500"].is_array());
    }

    #[test]
    fn test_page_nav_models() {
        let model: ControlModel = serde_json::from_value(json!({ "type": "pageup" })).unwrap();
        assert_eq!(model, ControlModel::PageUp);
        assert_eq!(model.type_name(), "pageup");
    }

    #[test]
    fn test_style_patch_ignores_mistyped_fields() {
        let mut style = ButtonStyle::default();
        let patch = json!({ "bgcolor": 255, "color": "red", "text": "On" });
        style.apply_patch(patch.as_object().unwrap());
        assert_eq!(style.bgcolor, 255);
        assert_eq!(style.color, 0xffffff);
        assert_eq!(style.text, "On");
    }

    #[test]
    fn test_feedback_clone_with_new_ids() {
        let mut parent = FeedbackEntity::new(INTERNAL_CONNECTION, "logic_and", EntityOptions::new());
        parent
            .children
            .push(FeedbackEntity::new("conn1", "flag", EntityOptions::new()));
        let copy = parent.clone_with_new_ids();
        assert_ne!(copy.id, parent.id);
        assert_ne!(copy.children[0].id, parent.children[0].id);
        assert_eq!(copy.children[0].definition_id, "flag");
    }
}
