//! Upload state machine: initial -> has-file -> uploading -> success | error | ocr-failed.
//! Each state maps to exactly one view configuration.

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::UploadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UploadState {
    Initial,
    HasFile,
    Uploading,
    OcrFailed,
    Success,
    Error,
}

impl std::fmt::Display for UploadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadState::Initial => write!(f, "initial"),
            UploadState::HasFile => write!(f, "has-file"),
            UploadState::Uploading => write!(f, "uploading"),
            UploadState::OcrFailed => write!(f, "ocr-failed"),
            UploadState::Success => write!(f, "success"),
            UploadState::Error => write!(f, "error"),
        }
    }
}

impl UploadState {
    pub const ALL: [UploadState; 6] = [
        UploadState::Initial,
        UploadState::HasFile,
        UploadState::Uploading,
        UploadState::OcrFailed,
        UploadState::Success,
        UploadState::Error,
    ];

    pub fn can_transition_to(self, next: UploadState) -> bool {
        use UploadState::*;
        matches!(
            (self, next),
            (Initial, HasFile)
                | (HasFile, HasFile) // replace file
                | (HasFile, Uploading)
                | (HasFile, Initial)
                | (Uploading, Success)
                | (Uploading, Error)
                | (Uploading, OcrFailed)
                | (Uploading, Initial) // cancel
                | (OcrFailed, Uploading) // retry
                | (OcrFailed, HasFile)
                | (OcrFailed, Initial)
                | (Success, Initial) // next
                | (Error, Initial) // next
        )
    }

    /// A sequence can only be started from these states.
    pub fn accepts_submit(self) -> bool {
        matches!(self, UploadState::HasFile | UploadState::OcrFailed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, UploadState::Success | UploadState::Error)
    }

    pub fn view(self) -> ViewConfig {
        use Control::*;
        match self {
            UploadState::Initial => ViewConfig {
                panel: Panel::Prompt,
                preview: false,
                submit: Disabled,
                submit_label: SubmitLabel::Recognize,
                cancel: Hidden,
                next: Hidden,
            },
            UploadState::HasFile => ViewConfig {
                panel: Panel::SelectedFile,
                preview: true,
                submit: Enabled,
                submit_label: SubmitLabel::Recognize,
                cancel: Enabled,
                next: Hidden,
            },
            UploadState::Uploading => ViewConfig {
                panel: Panel::Progress,
                preview: true,
                submit: Hidden,
                submit_label: SubmitLabel::Recognize,
                cancel: Enabled,
                next: Hidden,
            },
            UploadState::OcrFailed => ViewConfig {
                panel: Panel::OcrFailure,
                preview: true,
                submit: Enabled,
                submit_label: SubmitLabel::Retry,
                cancel: Enabled,
                next: Hidden,
            },
            UploadState::Success => ViewConfig {
                panel: Panel::Success,
                preview: false,
                submit: Hidden,
                submit_label: SubmitLabel::Recognize,
                cancel: Hidden,
                next: Enabled,
            },
            UploadState::Error => ViewConfig {
                panel: Panel::Error,
                preview: false,
                submit: Hidden,
                submit_label: SubmitLabel::Recognize,
                cancel: Hidden,
                next: Enabled,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Control {
    Hidden,
    Disabled,
    Enabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitLabel {
    Recognize,
    Retry,
}

/// The one panel shown for a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Panel {
    Prompt,
    SelectedFile,
    Progress,
    OcrFailure,
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViewConfig {
    pub panel: Panel,
    /// Image preview visibility.
    pub preview: bool,
    pub submit: Control,
    pub submit_label: SubmitLabel,
    pub cancel: Control,
    pub next: Control,
}

impl ViewConfig {
    pub fn is_visible(&self, panel: Panel) -> bool {
        self.panel == panel
    }
}

/// What subscribers observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateSnapshot {
    pub state: UploadState,
    /// 0-100.
    pub progress: u8,
}

/// Thread-safe state machine publishing snapshots over a watch channel.
pub struct UploadStateMachine {
    state: RwLock<StateSnapshot>,
    state_tx: watch::Sender<StateSnapshot>,
    state_rx: watch::Receiver<StateSnapshot>,
}

impl Default for UploadStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadStateMachine {
    pub fn new() -> Self {
        let initial = StateSnapshot {
            state: UploadState::Initial,
            progress: 0,
        };
        let (state_tx, state_rx) = watch::channel(initial);
        Self {
            state: RwLock::new(initial),
            state_tx,
            state_rx,
        }
    }

    pub fn current(&self) -> UploadState {
        self.state.read().state
    }

    pub fn snapshot(&self) -> StateSnapshot {
        *self.state.read()
    }

    pub fn transition(&self, next: UploadState) -> Result<UploadState, UploadError> {
        let mut snapshot = self.state.write();
        let current = snapshot.state;
        if !current.can_transition_to(next) {
            warn!(from = %current, to = %next, "invalid_transition");
            return Err(UploadError::InvalidTransition { from: current, to: next });
        }
        snapshot.state = next;
        snapshot.progress = match next {
            UploadState::Success => 100,
            UploadState::Uploading | UploadState::Initial | UploadState::HasFile => 0,
            _ => snapshot.progress,
        };
        let _ = self.state_tx.send(*snapshot);
        info!(from = %current, to = %next, "state_transition");
        Ok(next)
    }

    /// Back to `initial` from anywhere (cancel, reset).
    pub fn force_initial(&self) {
        let mut snapshot = self.state.write();
        let prev = snapshot.state;
        *snapshot = StateSnapshot {
            state: UploadState::Initial,
            progress: 0,
        };
        let _ = self.state_tx.send(*snapshot);
        info!(from = %prev, "force_initial");
    }

    /// Progress only moves while uploading.
    pub fn set_progress(&self, percent: u8) {
        let mut snapshot = self.state.write();
        if snapshot.state != UploadState::Uploading {
            return;
        }
        snapshot.progress = percent.min(100);
        let _ = self.state_tx.send(*snapshot);
    }

    pub fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
        self.state_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_state_has_one_panel_and_never_submit_with_next() {
        for state in UploadState::ALL {
            let view = state.view();
            let both = view.submit == Control::Enabled && view.next == Control::Enabled;
            assert!(!both, "{state} enables submit and next");
            let visible = [
                Panel::Prompt,
                Panel::SelectedFile,
                Panel::Progress,
                Panel::OcrFailure,
                Panel::Success,
                Panel::Error,
            ]
            .into_iter()
            .filter(|p| view.is_visible(*p))
            .count();
            assert_eq!(visible, 1, "{state}");
        }
    }

    #[test]
    fn retry_label_only_after_ocr_failure() {
        assert_eq!(UploadState::OcrFailed.view().submit_label, SubmitLabel::Retry);
        assert_eq!(UploadState::HasFile.view().submit_label, SubmitLabel::Recognize);
        assert_eq!(UploadState::Initial.view().submit, Control::Disabled);
    }

    #[test]
    fn terminal_states_only_go_back_to_initial() {
        for from in [UploadState::Success, UploadState::Error] {
            for to in UploadState::ALL {
                assert_eq!(from.can_transition_to(to), to == UploadState::Initial, "{from} -> {to}");
            }
        }
    }

    #[test]
    fn invalid_transition_leaves_state_untouched() {
        let sm = UploadStateMachine::new();
        let err = sm.transition(UploadState::Uploading).unwrap_err();
        assert!(matches!(
            err,
            UploadError::InvalidTransition {
                from: UploadState::Initial,
                to: UploadState::Uploading
            }
        ));
        assert_eq!(sm.current(), UploadState::Initial);
    }

    #[test]
    fn subscribers_see_transitions_and_progress() {
        let sm = UploadStateMachine::new();
        let rx = sm.subscribe();
        sm.transition(UploadState::HasFile).unwrap();
        sm.set_progress(40);
        assert_eq!(rx.borrow().progress, 0);

        sm.transition(UploadState::Uploading).unwrap();
        sm.set_progress(50);
        assert_eq!(
            *rx.borrow(),
            StateSnapshot {
                state: UploadState::Uploading,
                progress: 50
            }
        );

        sm.force_initial();
        assert_eq!(rx.borrow().state, UploadState::Initial);
    }

    #[test]
    fn states_display_in_kebab_case() {
        assert_eq!(UploadState::OcrFailed.to_string(), "ocr-failed");
        assert_eq!(serde_json::to_value(UploadState::HasFile).unwrap(), "has-file");
    }
}
