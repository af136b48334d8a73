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

//! Turn dispatch and the handler runner.
//!
//! [`CallRouter::handle_turn`] is the single entry point for every inbound
//! turn: it decides "new call" vs "continuation", short-circuits calls that
//! hung up before the handler ever ran, and otherwise either spawns the
//! handler runner or wakes the suspended session. The runner drives the user
//! handler to completion inside a failure boundary, classifies the outcome,
//! and guarantees exactly-once registry eviction and reply completion.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::config::RouterConfig;
use crate::error::{CallError, CallResult};
use crate::events::{CallEvent, CallEventKind, EventBus};
use crate::registry::CallRegistry;
use crate::session::CallSession;
use crate::turn::{Turn, TurnReply};

pub type HandlerFuture = BoxFuture<'static, CallResult<()>>;

/// A user call handler: linear async code driving one call.
pub type CallHandler = Arc<dyn Fn(Arc<CallSession>) -> HandlerFuture + Send + Sync>;

/// Hook invoked with an uncaught handler error. Returning `Ok` or
/// `Err(CallError::Exit)` absorbs the error; anything else escalates.
pub type RecoveryHook =
    Arc<dyn Fn(anyhow::Error, Arc<CallSession>) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure as a [`CallHandler`].
pub fn call_handler<F, Fut>(f: F) -> CallHandler
where
    F: Fn(Arc<CallSession>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallResult<()>> + Send + 'static,
{
    Arc::new(move |call| f(call).boxed())
}

/// Wrap an async closure as a [`RecoveryHook`].
pub fn recovery_hook<F, Fut>(f: F) -> RecoveryHook
where
    F: Fn(anyhow::Error, Arc<CallSession>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CallResult<()>> + Send + 'static,
{
    Arc::new(move |error, call| f(error, call).boxed())
}

/// Dispatcher owning one registry of active calls. Multiple independent
/// routers may coexist in one process.
#[derive(Clone)]
pub struct CallRouter {
    config: Arc<RouterConfig>,
    registry: Arc<CallRegistry>,
    events: EventBus,
    recovery: Option<RecoveryHook>,
}

impl CallRouter {
    pub fn new(config: RouterConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(CallRouter {
            config: Arc::new(config),
            registry: Arc::new(CallRegistry::new()),
            events: EventBus::new(64),
            recovery: None,
        })
    }

    pub fn with_recovery_hook(mut self, hook: RecoveryHook) -> Self {
        self.recovery = Some(hook);
        self
    }

    pub fn registry(&self) -> &CallRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Route one inbound turn and produce its reply. The reply is always
    /// complete when this returns: acknowledgement, module payload, the
    /// handler's final payload, or an error.
    pub async fn handle_turn(&self, turn: Turn, handler: CallHandler) -> TurnReply {
        match self.registry.get(&turn.call_id) {
            Some(session) => self.continue_call(session, turn).await,
            None if turn.hangup => {
                // The caller aborted before any interaction; never register
                // a session or invoke the handler.
                info!(call_id = %turn.call_id, "call hung up before the handler ran");
                self.events.publish(CallEvent {
                    kind: CallEventKind::Hangup,
                    call_id: turn.call_id,
                    phone: turn.phone,
                });
                TurnReply::hangup_ack()
            }
            None => self.start_call(turn, handler).await,
        }
    }

    async fn start_call(&self, turn: Turn, handler: CallHandler) -> TurnReply {
        let session = Arc::new(CallSession::new(turn.call_id.clone(), self.config.clone()));
        session.apply_turn(&turn);
        let Some(rx) = session.install_responder() else {
            // Fresh sessions are never terminal.
            return TurnReply::Error("session unavailable".to_string());
        };
        self.registry.insert(session.clone());

        let phone = if turn.phone.is_empty() {
            "AnonymousPhone"
        } else {
            turn.phone.as_str()
        };
        info!(call_id = %turn.call_id, phone, "new call");
        self.events.publish(CallEvent {
            kind: CallEventKind::NewCall,
            call_id: turn.call_id.clone(),
            phone: turn.phone.clone(),
        });

        let router = self.clone();
        let runner_session = session.clone();
        tokio::spawn(async move {
            router.run_handler(runner_session, handler).await;
        });

        match rx.await {
            Ok(reply) => reply,
            Err(_) => TurnReply::Error("handler ended without producing a reply".to_string()),
        }
    }

    async fn continue_call(&self, session: Arc<CallSession>, turn: Turn) -> TurnReply {
        session.apply_turn(&turn);
        let Some(rx) = session.install_responder() else {
            warn!(call_id = %turn.call_id, "turn for a call that already finished");
            return TurnReply::empty();
        };

        if !session.settle_wait(turn.hangup) {
            // Duplicate/retry, or the turn beat the handler to its next
            // suspend. The signal is lost; the reply below still comes from
            // the handler's next send or the runner's fallback.
            debug!(call_id = %turn.call_id, "no suspend outstanding, signal dropped");
        }

        self.events.publish(CallEvent {
            kind: if turn.hangup {
                CallEventKind::Hangup
            } else {
                CallEventKind::Continue
            },
            call_id: turn.call_id.clone(),
            phone: turn.phone.clone(),
        });

        match rx.await {
            Ok(reply) => reply,
            Err(_) => {
                // A newer turn replaced this one's reply slot.
                warn!(call_id = %turn.call_id, "reply slot superseded by a later turn");
                TurnReply::empty()
            }
        }
    }

    /// Failure boundary around one handler invocation. Eviction from the
    /// registry and completion of any outstanding reply both happen exactly
    /// once here, whichever branch classifies the outcome.
    async fn run_handler(self, session: Arc<CallSession>, handler: CallHandler) {
        let call_id = session.call_id().to_string();

        let outcome = match AssertUnwindSafe(handler(session.clone())).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => Err(CallError::Uncaught(anyhow::anyhow!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };

        let outcome = match outcome {
            Err(CallError::Uncaught(error)) => self.try_recover(error, &session).await,
            other => other,
        };

        self.registry.remove(&call_id);

        match outcome {
            Ok(()) => {
                session.finish(None);
                info!(call_id = %call_id, "handler finished");
            }
            Err(CallError::Exit { target, origin }) => {
                session.finish(None);
                info!(call_id = %call_id, %target, origin, "call exited the flow");
            }
            Err(CallError::Hangup) => {
                session.finish(Some(TurnReply::hangup_ack()));
                info!(call_id = %call_id, "call hung up by the caller");
            }
            Err(CallError::Timeout(after)) => {
                session.finish(Some(TurnReply::empty()));
                info!(call_id = %call_id, ?after, "no continuation from the caller in time");
            }
            Err(CallError::Contract(msg)) => {
                error!(call_id = %call_id, %msg, "handler contract violation");
                session.finish(Some(TurnReply::Error(msg)));
            }
            Err(CallError::Uncaught(err)) => {
                error!(call_id = %call_id, error = format!("{err:#}"), "uncaught handler error");
                session.finish(Some(TurnReply::Error(err.to_string())));
            }
        }
    }

    async fn try_recover(
        &self,
        error: anyhow::Error,
        session: &Arc<CallSession>,
    ) -> CallResult<()> {
        let Some(hook) = &self.recovery else {
            return Err(CallError::Uncaught(error));
        };
        warn!(
            call_id = %session.call_id(),
            error = format!("{error:#}"),
            "uncaught error, invoking recovery hook"
        );
        match AssertUnwindSafe(hook(error, session.clone())).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(exit @ CallError::Exit { .. })) => Err(exit),
            Ok(Err(other)) => Err(CallError::Uncaught(anyhow::anyhow!(
                "recovery hook failed: {other}"
            ))),
            Err(panic) => Err(CallError::Uncaught(anyhow::anyhow!(
                "recovery hook panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
