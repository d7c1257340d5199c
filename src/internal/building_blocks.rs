//! Building blocks: `wait` and the boolean logic feedbacks
//!
//! Logic feedbacks are the only feedbacks with children. Their value is
//! computed by the owning `FeedbackTree` from the children's results, so this
//! fragment never returns a value for them.

use super::{def, InternalContext, InternalDefinition, InternalFragment};
use crate::controls::model::ActionEntity;
use crate::controls::RunActionExtras;

pub const LOGIC_AND: &str = "logic_and";
pub const LOGIC_OR: &str = "logic_or";
pub const LOGIC_XOR: &str = "logic_xor";

pub fn is_logic_feedback(definition_id: &str) -> bool {
    matches!(definition_id, LOGIC_AND | LOGIC_OR | LOGIC_XOR)
}

/// Combine child results. `inverted` flips AND and XOR; OR ignores it.
pub fn evaluate_logic(definition_id: &str, children: &[bool], inverted: bool) -> Option<bool> {
    match definition_id {
        LOGIC_AND => Some(children.iter().all(|v| *v) != inverted),
        LOGIC_OR => Some(children.iter().any(|v| *v)),
        LOGIC_XOR => Some((children.iter().filter(|v| **v).count() == 1) != inverted),
        _ => None,
    }
}

const ACTIONS: &[InternalDefinition] = &[def("wait", "Wait")];

const FEEDBACKS: &[InternalDefinition] = &[
    def(LOGIC_AND, "Logic: AND"),
    def(LOGIC_OR, "Logic: OR"),
    def(LOGIC_XOR, "Logic: XOR"),
];

pub struct BuildingBlocks;

impl InternalFragment for BuildingBlocks {
    fn name(&self) -> &'static str {
        "building_blocks"
    }

    fn action_definitions(&self) -> &'static [InternalDefinition] {
        ACTIONS
    }

    fn feedback_definitions(&self) -> &'static [InternalDefinition] {
        FEEDBACKS
    }

    // The runner applies the delay; nothing is left to do here
    fn execute_action(&mut self, action: &ActionEntity, _extras: &RunActionExtras, _ctx: &mut InternalContext<'_>) -> bool {
        action.definition_id == "wait"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_vacuous_results() {
        assert_eq!(evaluate_logic(LOGIC_AND, &[], false), Some(true));
        assert_eq!(evaluate_logic(LOGIC_OR, &[], false), Some(false));
        assert_eq!(evaluate_logic(LOGIC_XOR, &[], false), Some(false));
        assert_eq!(evaluate_logic("bank_pushed", &[true], false), None);
    }

    #[test]
    fn test_or_ignores_invert() {
        assert_eq!(evaluate_logic(LOGIC_OR, &[true, false], true), Some(true));
        assert_eq!(evaluate_logic(LOGIC_OR, &[false], true), Some(false));
    }

    proptest! {
        #[test]
        fn prop_and_matches_all(children in proptest::collection::vec(any::<bool>(), 0..8), inverted in any::<bool>()) {
            let expected = children.iter().all(|v| *v) != inverted;
            prop_assert_eq!(evaluate_logic(LOGIC_AND, &children, inverted), Some(expected));
        }

        #[test]
        fn prop_xor_is_exactly_one(children in proptest::collection::vec(any::<bool>(), 0..8), inverted in any::<bool>()) {
            let ones = children.iter().filter(|v| **v).count();
            prop_assert_eq!(evaluate_logic(LOGIC_XOR, &children, inverted), Some((ones == 1) != inverted));
        }

        #[test]
        fn prop_or_is_any(children in proptest::collection::vec(any::<bool>(), 0..8), inverted in any::<bool>()) {
            prop_assert_eq!(evaluate_logic(LOGIC_OR, &children, inverted), Some(children.contains(&true)));
        }
    }
}
