//! Page number / page up / page down buttons

use super::model::{ControlId, ControlModel, TYPE_PAGE_DOWN, TYPE_PAGE_NUMBER, TYPE_PAGE_UP};
use super::style::DrawStyle;
use super::ControlDeps;
use crate::error::ControlError;
use crate::hub::{HubHandle, PageNavKind};

pub struct PageNavControl {
    control_id: ControlId,
    kind: PageNavKind,
    hub: HubHandle,
}

impl PageNavControl {
    pub fn from_model(control_id: &str, model: ControlModel, deps: &ControlDeps) -> Result<Self, ControlError> {
        let kind = match model {
            ControlModel::PageNumber => PageNavKind::Home,
            ControlModel::PageUp => PageNavKind::Up,
            ControlModel::PageDown => PageNavKind::Down,
            other => {
                return Err(ControlError::TypeMismatch {
                    control_id: control_id.to_string(),
                    expected: TYPE_PAGE_NUMBER,
                    actual: other.type_name().to_string(),
                })
            }
        };
        Ok(Self {
            control_id: control_id.to_string(),
            kind,
            hub: deps.hub.clone(),
        })
    }

    pub fn control_id(&self) -> &str {
        &self.control_id
    }

    pub fn kind(&self) -> PageNavKind {
        self.kind
    }

    pub fn type_name(&self) -> &'static str {
        match self.kind {
            PageNavKind::Home => TYPE_PAGE_NUMBER,
            PageNavKind::Up => TYPE_PAGE_UP,
            PageNavKind::Down => TYPE_PAGE_DOWN,
        }
    }

    pub fn to_json(&self) -> ControlModel {
        match self.kind {
            PageNavKind::Home => ControlModel::PageNumber,
            PageNavKind::Up => ControlModel::PageUp,
            PageNavKind::Down => ControlModel::PageDown,
        }
    }

    /// Navigation happens on press; release does nothing
    pub fn press_control(&mut self, pressed: bool, surface_id: Option<&str>) {
        if pressed {
            self.hub.page_nav(surface_id.map(str::to_string), self.kind);
        }
    }

    pub fn get_draw_style(&self) -> DrawStyle {
        match self.kind {
            PageNavKind::Home => DrawStyle::PageNumber,
            PageNavKind::Up => DrawStyle::PageUp,
            PageNavKind::Down => DrawStyle::PageDown,
        }
    }
}
