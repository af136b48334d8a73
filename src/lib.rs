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

//! Session-continuation engine for multi-turn IVR calls over a stateless
//! transport.
//!
//! The PBX delivers each turn of a call as an independent HTTP request with
//! no continuation token, only a stable call identifier. Callflow lets the
//! call handler stay linear anyway:
//!
//! ```no_run
//! use callflow::{CallRouter, IvrService, Playable, ReadMode, ReadOptions, RouterConfig};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let router = CallRouter::new(RouterConfig::default())?;
//! let service = IvrService::new(router).handle("/ivr", |call| async move {
//!     let order = call
//!         .read(
//!             &[Playable::Text("enter your order number".into())],
//!             ReadMode::Tap,
//!             ReadOptions { timeout_secs: Some(30), ..Default::default() },
//!         )
//!         .await?;
//!     call.menu(&[Playable::Text(format!("order {order} confirmed"))], &Default::default())?;
//!     call.hangup()
//! });
//! service.serve("0.0.0.0:3000".parse()?).await
//! # }
//! ```
//!
//! Between the `read` and the line after it, the process handled an entirely
//! separate HTTP request; the session registry and the suspend/resume
//! channels stitched the two turns back into one control flow.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod http;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod turn;

pub use config::{
    DialOptions, IpDialOptions, MenuOptions, ReadDefaults, ReadOptions, RecordOptions,
    RouterConfig, SttOptions, TapOptions,
};
pub use dispatcher::{call_handler, recovery_hook, CallHandler, CallRouter, RecoveryHook};
pub use error::{CallError, CallResult};
pub use events::{CallEvent, CallEventKind, EventBus};
pub use http::IvrService;
pub use protocol::{Module, PlayItem, Playable};
pub use registry::CallRegistry;
pub use session::{CallSession, ReadMode};
pub use turn::{Turn, TurnReply, UNKNOWN_CALL_ID};
