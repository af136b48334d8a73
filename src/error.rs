// Copyright 2025 Callflow Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Outcome classification for call handlers.
//!
//! `Hangup`, `Timeout` and `Exit` are normal ends of a call and are absorbed
//! by the handler runner. `Contract` and `Uncaught` are programming errors
//! and surface on the transport's error channel.

use std::time::Duration;

/// Terminal outcomes and failures of a call handler invocation.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The caller hung up while the handler was suspended.
    #[error("call was hung up by the caller")]
    Hangup,

    /// No continuation turn arrived before the suspend deadline.
    #[error("no continuation turn within {0:?}")]
    Timeout(Duration),

    /// Deliberate termination via a navigation operation. Not a failure;
    /// carries the target and the originating operation for diagnostics.
    #[error("call exited the flow to '{target}' (by {origin})")]
    Exit {
        target: String,
        origin: &'static str,
    },

    /// Handler misuse: second concurrent suspend, deprecated option, reply
    /// produced twice for one turn. Always fatal to the invocation.
    #[error("handler contract violation: {0}")]
    Contract(String),

    /// Anything else the handler raised. Escalatable via the recovery hook.
    #[error(transparent)]
    Uncaught(#[from] anyhow::Error),
}

impl CallError {
    pub fn contract(msg: impl Into<String>) -> Self {
        CallError::Contract(msg.into())
    }
}

pub type CallResult<T> = Result<T, CallError>;
