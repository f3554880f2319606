//! Model lifecycle state machine
//!
//! ```text
//!   (new) ──► Training ──► Ready ──┐
//!               │  ▲               │
//!               │  └─ checkpoint   ├──► Deleted
//!               └────► Failed ─────┘
//! ```
//!
//! A `Training` record without context is the implicit "pending" state.
//! `Deleted` is terminal: nothing leaves it.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::{CoreError, Result};

/// Lifecycle state of a model record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum ModelState {
    /// Accepted and being trained (possibly still queued)
    Training,
    /// Trained and artifact persisted
    Ready,
    /// Training failed, artifact persistence failed, or the remote job failed
    Failed,
    /// Removed by an explicit delete request
    Deleted,
}

impl ModelState {
    /// State assigned to a freshly accepted train request
    pub const INITIAL: ModelState = ModelState::Training;

    /// Whether `self -> next` is an edge of the lifecycle graph.
    ///
    /// `Training -> Training` is allowed so that long-running jobs can
    /// checkpoint progress (e.g. a refreshed remote context).
    pub fn can_transition_to(self, next: ModelState) -> bool {
        use ModelState::*;
        matches!(
            (self, next),
            (Training, Training)
                | (Training, Ready)
                | (Training, Failed)
                | (Training, Deleted)
                | (Ready, Deleted)
                | (Failed, Deleted)
        )
    }

    /// Validate a transition, returning the new state
    pub fn transition(self, next: ModelState) -> Result<ModelState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }

    /// Ready, Failed and Deleted have no outgoing edge other than delete
    pub fn is_terminal(self) -> bool {
        !matches!(self, ModelState::Training)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const ALL: [ModelState; 4] = [
        ModelState::Training,
        ModelState::Ready,
        ModelState::Failed,
        ModelState::Deleted,
    ];

    #[test]
    fn test_training_edges() {
        assert!(ModelState::Training.can_transition_to(ModelState::Ready));
        assert!(ModelState::Training.can_transition_to(ModelState::Failed));
        assert!(ModelState::Training.can_transition_to(ModelState::Training));
        assert!(ModelState::Training.can_transition_to(ModelState::Deleted));
    }

    #[test]
    fn test_ready_is_only_reachable_from_training() {
        for from in ALL {
            let allowed = from.can_transition_to(ModelState::Ready);
            assert_eq!(allowed, from == ModelState::Training, "{from} -> Ready");
        }
    }

    #[test]
    fn test_deleted_is_terminal() {
        for next in ALL {
            let err = ModelState::Deleted.transition(next).unwrap_err();
            assert_eq!(
                err,
                CoreError::InvalidTransition {
                    from: ModelState::Deleted,
                    to: next
                }
            );
        }
    }

    #[test]
    fn test_terminal_states_only_delete() {
        for from in [ModelState::Ready, ModelState::Failed] {
            assert!(from.is_terminal());
            for next in ALL {
                assert_eq!(from.can_transition_to(next), next == ModelState::Deleted);
            }
        }
    }

    #[test]
    fn test_display_uses_variant_name() {
        assert_eq!(ModelState::Training.to_string(), "Training");
        assert_eq!(ModelState::from_str("Ready").unwrap(), ModelState::Ready);
        assert_eq!(
            serde_json::to_string(&ModelState::Failed).unwrap(),
            "\"Failed\""
        );
    }
}
