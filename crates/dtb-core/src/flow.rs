//! Conversation flow table.
//!
//! The multi-step compose/browse interaction is expressed as a pure, total
//! transition function over (state, event) so every pair, including the
//! invalid ones, can be tested exhaustively. Effects (store calls, replies)
//! are described by [`FlowAction`] and executed by the conversation engine,
//! which commits the next state only after fallible effects succeed.

use crate::domain::EntryId;

/// Per-user conversation state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlowState {
    /// No active flow.
    Idle,
    /// Accumulating entry text; chunks keep transport arrival order.
    Composing { parts: Vec<String> },
    /// Entry list displayed, awaiting a selection.
    Browsing,
    /// Single entry displayed, awaiting back/close.
    Viewing { entry_id: EntryId },
}

impl FlowState {
    pub fn is_idle(&self) -> bool {
        matches!(self, FlowState::Idle)
    }
}

/// An inbound event, already stripped of transport detail.
#[derive(Clone, Debug)]
pub enum FlowEvent {
    StartCompose,
    StartBrowse,
    Chunk(String),
    Done,
    Cancel,
    Select(EntryId),
    Back,
    Close,
}

/// What the engine must do after a transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlowAction {
    /// Prompt the user for entry text.
    PromptCompose,
    /// Chunk appended; no terminal reply required.
    ChunkBuffered,
    /// Join `parts` with the paragraph separator and persist.
    SaveEntry { parts: Vec<String> },
    /// Finish signal with nothing buffered; never persist an empty entry.
    NothingToSave,
    /// Flow aborted, pending input discarded.
    Cancelled,
    /// Cancel signal with no flow active.
    NothingActive,
    /// Render the entry list.
    OpenList,
    /// Render one entry.
    ShowEntry(EntryId),
    /// Back from an entry to the list.
    ReopenList,
    /// Browse flow closed.
    Closed,
    /// Flow entry point while another flow is in progress; pending input
    /// must not be silently discarded.
    RejectBusy,
    /// Free text outside the compose flow.
    UnexpectedText,
    /// Button press that does not match the current state.
    StaleControl,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Step {
    pub next: FlowState,
    pub action: FlowAction,
}

fn stay(state: FlowState, action: FlowAction) -> Step {
    Step { next: state, action }
}

/// The transition table. Total over (state, event).
pub fn step(state: FlowState, event: FlowEvent) -> Step {
    use FlowAction as A;
    use FlowEvent as E;
    use FlowState as S;

    match (state, event) {
        // Flow entry points.
        (S::Idle, E::StartCompose) => Step {
            next: S::Composing { parts: Vec::new() },
            action: A::PromptCompose,
        },
        (S::Idle, E::StartBrowse) => Step {
            next: S::Browsing,
            action: A::OpenList,
        },
        (state, E::StartCompose) | (state, E::StartBrowse) => stay(state, A::RejectBusy),

        // Cancel works from anywhere.
        (S::Idle, E::Cancel) => stay(S::Idle, A::NothingActive),
        (_, E::Cancel) => Step {
            next: S::Idle,
            action: A::Cancelled,
        },

        // Compose flow.
        (S::Composing { mut parts }, E::Chunk(text)) => {
            parts.push(text);
            stay(S::Composing { parts }, A::ChunkBuffered)
        }
        (S::Composing { parts }, E::Done) if parts.is_empty() => {
            stay(S::Composing { parts }, A::NothingToSave)
        }
        (S::Composing { parts }, E::Done) => Step {
            next: S::Idle,
            action: A::SaveEntry { parts },
        },

        // Browse flow. Selecting while already viewing navigates directly,
        // the list keyboard may still be on screen.
        (S::Browsing, E::Select(id)) | (S::Viewing { .. }, E::Select(id)) => Step {
            next: S::Viewing { entry_id: id },
            action: A::ShowEntry(id),
        },
        (S::Viewing { .. }, E::Back) => Step {
            next: S::Browsing,
            action: A::ReopenList,
        },
        (S::Browsing, E::Close) | (S::Viewing { .. }, E::Close) => Step {
            next: S::Idle,
            action: A::Closed,
        },

        // Free text outside the compose flow.
        (state, E::Chunk(_)) => stay(state, A::UnexpectedText),

        // Everything else is a control that no longer matches the state.
        (state, _) => stay(state, A::StaleControl),
    }
}
