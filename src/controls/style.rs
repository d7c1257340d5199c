//! Draw styles handed to the graphics pipeline

use super::model::ButtonStyle;
use serde::{Deserialize, Serialize};

/// Bitmap size of a button face in pixels
pub const BUTTON_BITMAP_SIZE: (u32, u32) = (72, 72);

/// Fully resolved button face: feedbacks merged, text substituted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonDrawStyle {
    #[serde(flatten)]
    pub style: ButtonStyle,
    pub pushed: bool,
    /// 1-based index of the current step
    pub step_current: usize,
    pub step_count: usize,
}

/// What a control looks like
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "style", rename_all = "lowercase")]
pub enum DrawStyle {
    Button(ButtonDrawStyle),
    #[serde(rename = "pagenum")]
    PageNumber,
    #[serde(rename = "pageup")]
    PageUp,
    #[serde(rename = "pagedown")]
    PageDown,
}
