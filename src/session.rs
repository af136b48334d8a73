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

//! Per-call continuation state and the suspend/resume primitive.
//!
//! A [`CallSession`] spans every turn of one call. The handler runs in its
//! own task and talks to the transport through two one-shot channels held in
//! the session:
//!
//! - the *responder*: installed by the dispatcher for each inbound turn,
//!   consumed by the handler's next [`send`](CallSession::send) (or by the
//!   runner's fallback), completing that turn's HTTP response;
//! - the *pending wait*: created by [`suspend`](CallSession::suspend),
//!   settled exactly once by the next turn or by the deadline.
//!
//! Handler code and turn handling never run user logic for the same call in
//! parallel; they synchronize on the session mutex and the channels.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::{DialOptions, IpDialOptions, MenuOptions, ReadOptions, RouterConfig};
use crate::error::{CallError, CallResult};
use crate::protocol::{self, Module, Playable};
use crate::turn::{Turn, TurnReply};

/// Which collection module a [`read`](CallSession::read) emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Keypad digits (getDTMF).
    Tap,
    /// Speech to text.
    Stt,
    /// Audio recording.
    Record,
}

pub struct CallSession {
    call_id: String,
    config: Arc<RouterConfig>,
    state: Mutex<SessionState>,
}

#[derive(Default)]
struct SessionState {
    values: HashMap<String, String>,
    phone: String,
    did: String,
    extension: String,
    pending: Option<oneshot::Sender<bool>>,
    responder: Option<oneshot::Sender<TurnReply>>,
    last_sent: Option<Module>,
    val_seq: u32,
    terminal: bool,
}

impl CallSession {
    pub(crate) fn new(call_id: String, config: Arc<RouterConfig>) -> Self {
        CallSession {
            call_id,
            config,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn phone(&self) -> String {
        self.state.lock().phone.clone()
    }

    pub fn did(&self) -> String {
        self.state.lock().did.clone()
    }

    /// Current position (extension) the call is at, as reported by the PBX.
    pub fn extension(&self) -> String {
        self.state.lock().extension.clone()
    }

    /// Snapshot of the field mapping decoded from the most recent turn.
    pub fn values(&self) -> HashMap<String, String> {
        self.state.lock().values.clone()
    }

    pub fn value(&self, key: &str) -> Option<String> {
        self.state.lock().values.get(key).cloned()
    }

    /// Overwrite the stored mapping with a freshly decoded turn. Full
    /// replacement, not a merge.
    pub(crate) fn apply_turn(&self, turn: &Turn) {
        let mut st = self.state.lock();
        st.values = turn.values.clone();
        st.phone = turn.phone.clone();
        st.did = turn.did.clone();
        st.extension = turn.extension.clone();
    }

    /// Install the reply channel for a newly arrived turn. Returns `None`
    /// once the session reached a terminal outcome.
    pub(crate) fn install_responder(&self) -> Option<oneshot::Receiver<TurnReply>> {
        let mut st = self.state.lock();
        if st.terminal {
            return None;
        }
        if st.responder.is_some() {
            warn!(
                call_id = %self.call_id,
                "dropping unconsumed reply slot from a previous turn"
            );
        }
        let (tx, rx) = oneshot::channel();
        st.responder = Some(tx);
        Some(rx)
    }

    /// Settle the outstanding wait, if any, with the hangup flag. Returns
    /// whether a wait existed; a `false` here is the documented lost-signal
    /// race, not an error.
    pub(crate) fn settle_wait(&self, hangup: bool) -> bool {
        let tx = self.state.lock().pending.take();
        match tx {
            // The receiver may have just timed out; the failed send is the
            // cancelled path's cleanup and settles nothing.
            Some(tx) => {
                let _ = tx.send(hangup);
                true
            }
            None => false,
        }
    }

    /// Mark the session terminal and complete any turn still awaiting a
    /// reply. `None` falls back to the last payload the handler sent, or an
    /// empty acknowledgement. Called exactly once by the handler runner.
    pub(crate) fn finish(&self, reply: Option<TurnReply>) {
        let mut st = self.state.lock();
        st.terminal = true;
        st.pending.take();
        let tx = st.responder.take();
        let reply = reply.unwrap_or_else(|| match st.last_sent.clone() {
            Some(module) => TurnReply::Module(module),
            None => TurnReply::empty(),
        });
        drop(st);
        if let Some(tx) = tx {
            let _ = tx.send(reply);
        }
    }

    /// Produce this turn's outbound module. At most once per turn.
    pub fn send(&self, module: Module) -> CallResult<()> {
        let tx = {
            let mut st = self.state.lock();
            let Some(tx) = st.responder.take() else {
                return Err(CallError::contract(
                    "send: the current turn's reply was already produced",
                ));
            };
            st.last_sent = Some(module.clone());
            tx
        };
        let _ = tx.send(TurnReply::Module(module));
        Ok(())
    }

    /// Pause until the next turn for this call arrives, the caller hangs up,
    /// or `timeout` elapses. A zero timeout returns immediately. At most one
    /// suspend may be outstanding; a second concurrent attempt fails with a
    /// contract violation instead of queuing.
    pub async fn suspend(&self, timeout: Duration) -> CallResult<()> {
        if timeout.is_zero() {
            return Ok(());
        }
        let rx = {
            let mut st = self.state.lock();
            if st.pending.is_some() {
                return Err(CallError::contract(
                    "suspend: a wait is already outstanding for this call",
                ));
            }
            let (tx, rx) = oneshot::channel();
            st.pending = Some(tx);
            rx
        };
        debug!(call_id = %self.call_id, ?timeout, "suspended until the next turn");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(true)) => Err(CallError::Hangup),
            Ok(Ok(false)) => Ok(()),
            // Sender dropped without settling: the session is being torn down.
            Ok(Err(_)) => Err(CallError::Hangup),
            Err(_) => {
                // The receiver is already dropped, so a racing settle from a
                // late turn cannot re-resolve this wait.
                self.state.lock().pending.take();
                Err(CallError::Timeout(timeout))
            }
        }
    }

    /// Play `messages`, collect one answer, and return it.
    ///
    /// Emits the collection module for `mode`, suspends until the answer
    /// turn arrives, then reads the module's answer field from the refreshed
    /// mapping.
    pub async fn read(
        &self,
        messages: &[Playable],
        mode: ReadMode,
        ops: ReadOptions,
    ) -> CallResult<String> {
        let reject = ops
            .remove_invalid_chars
            .unwrap_or(self.config.remove_invalid_chars);
        let files = protocol::encode_playables(messages, reject)?;
        let name = ops
            .val_name
            .clone()
            .unwrap_or_else(|| self.next_val_name());

        let module = match mode {
            ReadMode::Tap => protocol::build_get_dtmf(
                name.clone(),
                files,
                &ops.tap.layered_over(&self.config.read.tap),
            ),
            ReadMode::Stt => protocol::build_stt(
                name.clone(),
                files,
                &ops.stt.layered_over(&self.config.read.stt),
            ),
            ReadMode::Record => protocol::build_record(
                name.clone(),
                files,
                &ops.record.layered_over(&self.config.read.record),
            ),
        };

        self.send(module)?;
        self.suspend(self.read_timeout(&ops)).await?;

        let value = self.value(&name).unwrap_or_default();
        if value.is_empty() && ops.allow_empty {
            return Ok(ops.empty_val.clone().unwrap_or_else(|| "None".to_string()));
        }
        Ok(value)
    }

    fn read_timeout(&self, ops: &ReadOptions) -> Duration {
        let secs = ops
            .timeout_secs
            .or(self.config.timeout_secs)
            .or(self.config.read.timeout_secs)
            .unwrap_or(0);
        Duration::from_secs(secs)
    }

    fn next_val_name(&self) -> String {
        let mut st = self.state.lock();
        st.val_seq += 1;
        format!("val_{}", st.val_seq)
    }

    /// Play a one-key menu. If the merged options carry an automatic
    /// extension change, the menu terminates the handler like a navigation
    /// operation.
    pub fn menu(&self, messages: &[Playable], ops: &MenuOptions) -> CallResult<()> {
        let merged = ops.layered_over(&self.config.menu);
        let reject = merged
            .remove_invalid_chars
            .unwrap_or(self.config.remove_invalid_chars);
        let files = protocol::encode_playables(messages, reject)?;
        let target = merged.extension_change.clone().unwrap_or_default();

        self.send(protocol::build_simple_menu(files, &merged))?;

        if !target.is_empty() {
            return Err(CallError::Exit {
                target,
                origin: "menu",
            });
        }
        Ok(())
    }

    /// Bridge the call to a phone number.
    pub fn dial(&self, ops: &DialOptions) -> CallResult<()> {
        self.send(protocol::build_simple_routing(ops)?)
    }

    /// Bridge the call to a SIP destination.
    pub fn dial_ip(&self, ops: &IpDialOptions) -> CallResult<()> {
        self.send(protocol::build_ip_routing(ops)?)
    }

    /// Move the call to another extension and stop the handler. Always
    /// returns `Err(CallError::Exit)`, so `?` guarantees nothing after the
    /// call executes.
    pub fn goto_extension(&self, target: &str) -> CallResult<()> {
        self.send(protocol::build_extension_change(target))?;
        Err(CallError::Exit {
            target: target.to_string(),
            origin: "goto_extension",
        })
    }

    /// Re-enter the current extension from the top.
    pub fn restart_extension(&self) -> CallResult<()> {
        let target = format!("/{}", self.extension());
        self.send(protocol::build_extension_change(&target))?;
        Err(CallError::Exit {
            target,
            origin: "restart_extension",
        })
    }

    /// Terminate the call.
    pub fn hangup(&self) -> CallResult<()> {
        self.send(protocol::build_extension_change("hangup"))?;
        Err(CallError::Exit {
            target: "hangup".to_string(),
            origin: "hangup",
        })
    }

    #[cfg(test)]
    pub(crate) fn has_pending_wait(&self) -> bool {
        self.state.lock().pending.is_some()
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("call_id", &self.call_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turn::Turn;

    fn session() -> CallSession {
        CallSession::new("T1".to_string(), Arc::new(RouterConfig::default()))
    }

    #[tokio::test]
    async fn suspend_resolves_when_next_turn_settles() {
        let session = Arc::new(session());
        let waiter = session.clone();
        let task = tokio::spawn(async move { waiter.suspend(Duration::from_secs(5)).await });

        // Let the task reach its suspend before settling.
        tokio::task::yield_now().await;
        while !session.has_pending_wait() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        assert!(session.settle_wait(false));
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn suspend_fails_with_hangup_when_settled_as_hangup() {
        let session = Arc::new(session());
        let waiter = session.clone();
        let task = tokio::spawn(async move { waiter.suspend(Duration::from_secs(5)).await });

        while !session.has_pending_wait() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        session.settle_wait(true);

        assert!(matches!(task.await.unwrap(), Err(CallError::Hangup)));
    }

    #[tokio::test]
    async fn suspend_times_out_and_clears_the_wait() {
        let session = session();
        let result = session.suspend(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(CallError::Timeout(_))));

        // The settled wait is gone; a late turn finds nothing to resolve.
        assert!(!session.settle_wait(false));
    }

    #[tokio::test]
    async fn second_concurrent_suspend_is_a_contract_violation() {
        let session = Arc::new(session());
        let waiter = session.clone();
        let task = tokio::spawn(async move { waiter.suspend(Duration::from_secs(5)).await });

        while !session.has_pending_wait() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let second = session.suspend(Duration::from_secs(5)).await;
        assert!(matches!(second, Err(CallError::Contract(_))));

        // The original wait is untouched and still resolvable.
        assert!(session.settle_wait(false));
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn zero_timeout_suspend_returns_immediately() {
        let session = session();
        session.suspend(Duration::ZERO).await.unwrap();
        assert!(!session.has_pending_wait());
    }

    #[test]
    fn apply_turn_replaces_values_wholesale() {
        let session = session();
        session.apply_turn(&Turn::from_pairs(vec![
            ("PBXcallId", "T1"),
            ("PBXphone", "0501111111"),
            ("stale_key", "stale"),
        ]));
        session.apply_turn(&Turn::from_pairs(vec![
            ("PBXcallId", "T1"),
            ("val_1", "4077"),
        ]));

        assert_eq!(session.value("val_1").unwrap(), "4077");
        // Replaced, not merged: keys from the earlier turn are gone.
        assert!(session.value("stale_key").is_none());
        assert_eq!(session.phone(), "");
    }

    #[tokio::test]
    async fn read_with_allow_empty_maps_an_empty_answer_to_empty_val() {
        let session = Arc::new(session());
        let rx = session.install_responder().unwrap();
        let reader = session.clone();
        let task = tokio::spawn(async move {
            reader
                .read(
                    &[Playable::Text("anything to add?".into())],
                    ReadMode::Tap,
                    ReadOptions {
                        timeout_secs: Some(5),
                        val_name: Some("extra".into()),
                        allow_empty: true,
                        empty_val: Some("None".into()),
                        ..Default::default()
                    },
                )
                .await
        });

        // The module goes out; the continuation carries no answer field.
        rx.await.unwrap();
        while !session.has_pending_wait() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        session.apply_turn(&Turn::from_pairs(vec![("PBXcallId", "T1")]));
        session.settle_wait(false);

        assert_eq!(task.await.unwrap().unwrap(), "None");
    }

    #[tokio::test]
    async fn read_without_allow_empty_returns_the_empty_answer_as_is() {
        let session = Arc::new(session());
        let rx = session.install_responder().unwrap();
        let reader = session.clone();
        let task = tokio::spawn(async move {
            reader
                .read(
                    &[Playable::Text("anything to add?".into())],
                    ReadMode::Tap,
                    ReadOptions {
                        timeout_secs: Some(5),
                        val_name: Some("extra".into()),
                        empty_val: Some("None".into()),
                        ..Default::default()
                    },
                )
                .await
        });

        rx.await.unwrap();
        while !session.has_pending_wait() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        session.apply_turn(&Turn::from_pairs(vec![("PBXcallId", "T1")]));
        session.settle_wait(false);

        // empty_val only applies together with allow_empty.
        assert_eq!(task.await.unwrap().unwrap(), "");
    }

    #[tokio::test]
    async fn send_without_a_turn_awaiting_reply_is_a_contract_violation() {
        let session = session();
        let module = protocol::build_extension_change("hangup");
        assert!(matches!(
            session.send(module),
            Err(CallError::Contract(_))
        ));
    }

    #[tokio::test]
    async fn send_resolves_the_installed_responder_once() {
        let session = session();
        let rx = session.install_responder().unwrap();

        session
            .send(protocol::build_extension_change("hangup"))
            .unwrap();
        assert!(matches!(rx.await.unwrap(), TurnReply::Module(_)));

        // Second send for the same turn fails.
        let err = session
            .send(protocol::build_extension_change("hangup"))
            .unwrap_err();
        assert!(matches!(err, CallError::Contract(_)));
    }

    #[tokio::test]
    async fn finish_falls_back_to_the_last_sent_payload() {
        let session = session();

        // Turn 1: handler sends a module.
        let rx = session.install_responder().unwrap();
        session
            .send(protocol::build_extension_change("9"))
            .unwrap();
        rx.await.unwrap();

        // Turn 2 arrives, handler completes without sending again.
        let rx = session.install_responder().unwrap();
        session.finish(None);
        assert!(matches!(rx.await.unwrap(), TurnReply::Module(_)));

        // Terminal sessions accept no further turns.
        assert!(session.install_responder().is_none());
    }

    #[tokio::test]
    async fn finish_with_no_payload_sends_empty_ack() {
        let session = session();
        let rx = session.install_responder().unwrap();
        session.finish(None);
        assert_eq!(rx.await.unwrap(), TurnReply::empty());
    }
}
