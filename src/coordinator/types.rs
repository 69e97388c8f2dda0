// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Run state types.
//!
//! Defines the state machine of a replication run.
//!
//! # State Transitions
//!
//! ```text
//!                run()
//! Created ─────────────────→ Locked ──────→ Connecting ──────→ Replicating
//!    │                         │                │                  │
//!    │ (lock held elsewhere)   │ (log setup)    │ (connect failed) │ (index failed)
//!    ↓                         ↓                ↓                  ↓
//!  Failed ←────────────────────┴────────────────┴──────────────────┤
//!                                                                  │ (pass done)
//!                                                                  ↓
//!                                                              Completed
//! ```
//!
//! `Completed` and `Failed` are terminal for a pass; the coordinator may be
//! run again from either.

/// State of a replication run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Coordinator created, no pass started yet.
    Created,

    /// Run lock held; logging being set up.
    Locked,

    /// Opening the source and destination stores.
    Connecting,

    /// Enumerating and replicating keys.
    Replicating,

    /// Pass finished. Per-key failures do not prevent this state.
    Completed,

    /// Pass aborted by a fatal error.
    Failed,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Created => "Created",
            RunState::Locked => "Locked",
            RunState::Connecting => "Connecting",
            RunState::Replicating => "Replicating",
            RunState::Completed => "Completed",
            RunState::Failed => "Failed",
        }
    }

    /// Numeric code for the run state gauge.
    pub fn code(self) -> u8 {
        match self {
            RunState::Created => 0,
            RunState::Locked => 1,
            RunState::Connecting => 2,
            RunState::Replicating => 3,
            RunState::Completed => 4,
            RunState::Failed => 5,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
