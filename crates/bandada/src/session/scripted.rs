//! Scripted sessions for browser-free runs and tests.
//!
//! A [`ScriptedSession`] replays a fixed timeline of events after `open` is
//! called and records every call made against it, so fleet behavior can be
//! asserted without a browser.

use crate::event::{InternalFault, SessionEvent};
use crate::result::{HarnessError, HarnessResult};
use crate::session::{ClientSession, SessionProvider};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// Record of the calls made against one scripted session
#[derive(Debug, Clone, Default)]
pub struct SessionLog {
    /// URLs passed to `open`, in call order
    pub opened: Vec<String>,
    /// Number of screenshots taken
    pub screenshots: usize,
    /// Expressions passed to `evaluate`, in call order
    pub evaluated: Vec<String>,
    /// Whether `close` was called
    pub closed: bool,
}

/// One scripted event: emitted `at` after the session is opened
#[derive(Debug, Clone)]
struct ScriptedEvent {
    at: Duration,
    event: SessionEvent,
}

/// A client session that replays a scripted timeline of events
#[derive(Debug)]
pub struct ScriptedSession {
    script: Vec<ScriptedEvent>,
    tx: Option<UnboundedSender<SessionEvent>>,
    events: Option<UnboundedReceiver<SessionEvent>>,
    replay: Option<JoinHandle<()>>,
    log: Arc<Mutex<SessionLog>>,
    state: Value,
    hangs_up: bool,
}

impl Default for ScriptedSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSession {
    /// Create a session with an empty script
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            script: Vec::new(),
            tx: Some(tx),
            events: Some(rx),
            replay: None,
            log: Arc::new(Mutex::new(SessionLog::default())),
            state: Value::Null,
            hangs_up: false,
        }
    }

    /// Emit a console message `at` after open
    #[must_use]
    pub fn console_at(mut self, at: Duration, message: impl Into<String>) -> Self {
        self.script.push(ScriptedEvent {
            at,
            event: SessionEvent::Console(message.into()),
        });
        self
    }

    /// Emit an internal fault `at` after open
    #[must_use]
    pub fn fault_at(mut self, at: Duration, fault: InternalFault) -> Self {
        self.script.push(ScriptedEvent {
            at,
            event: SessionEvent::Fault(fault),
        });
        self
    }

    /// Set the value returned by every `evaluate` call
    #[must_use]
    pub fn with_state(mut self, state: Value) -> Self {
        self.state = state;
        self
    }

    /// Drop the session's event channel once the script has been replayed,
    /// simulating a session whose event source tears down mid-run
    #[must_use]
    pub const fn hangs_up(mut self) -> Self {
        self.hangs_up = true;
        self
    }

    /// Shared handle to this session's call log
    #[must_use]
    pub fn log(&self) -> Arc<Mutex<SessionLog>> {
        Arc::clone(&self.log)
    }
}

#[async_trait]
impl ClientSession for ScriptedSession {
    async fn open(&mut self, url: &str) -> HarnessResult<()> {
        self.log.lock().expect("session log poisoned").opened.push(url.to_string());

        let mut script = std::mem::take(&mut self.script);
        script.sort_by_key(|event| event.at);

        if let Some(tx) = self.tx.clone() {
            self.replay = Some(tokio::spawn(async move {
                let mut elapsed = Duration::ZERO;
                for ScriptedEvent { at, event } in script {
                    if at > elapsed {
                        tokio::time::sleep(at - elapsed).await;
                        elapsed = at;
                    }
                    if tx.send(event).is_err() {
                        break;
                    }
                }
            }));
        }
        if self.hangs_up {
            // Only the replay task keeps the channel alive now.
            self.tx = None;
        }
        Ok(())
    }

    fn take_events(&mut self) -> HarnessResult<UnboundedReceiver<SessionEvent>> {
        self.events
            .take()
            .ok_or_else(|| HarnessError::session("event stream already taken"))
    }

    async fn screenshot(&mut self) -> HarnessResult<Vec<u8>> {
        self.log.lock().expect("session log poisoned").screenshots += 1;
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn evaluate(&mut self, expression: &str) -> HarnessResult<Value> {
        self.log
            .lock()
            .expect("session log poisoned")
            .evaluated
            .push(expression.to_string());
        Ok(self.state.clone())
    }

    async fn close(&mut self) -> HarnessResult<()> {
        self.log.lock().expect("session log poisoned").closed = true;
        if let Some(replay) = self.replay.take() {
            replay.abort();
        }
        Ok(())
    }
}

/// Hands out pre-built scripted sessions, one per `create` call
#[derive(Debug, Default)]
pub struct ScriptedSessionProvider {
    sessions: VecDeque<ScriptedSession>,
}

impl ScriptedSessionProvider {
    /// Build a provider from sessions in ordinal order
    #[must_use]
    pub fn new(sessions: Vec<ScriptedSession>) -> Self {
        Self {
            sessions: sessions.into(),
        }
    }
}

#[async_trait]
impl SessionProvider for ScriptedSessionProvider {
    type Session = ScriptedSession;

    async fn create(&mut self) -> HarnessResult<ScriptedSession> {
        self.sessions
            .pop_front()
            .ok_or_else(|| HarnessError::session("no scripted session left for this ordinal"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_replays_events_in_order() {
        let mut session = ScriptedSession::new()
            .console_at(Duration::from_millis(20), "second")
            .console_at(Duration::from_millis(10), "first");

        let mut events = session.take_events().unwrap();
        session.open("http://localhost/").await.unwrap();

        assert_eq!(
            events.recv().await,
            Some(SessionEvent::Console("first".to_string()))
        );
        assert_eq!(
            events.recv().await,
            Some(SessionEvent::Console("second".to_string()))
        );
    }

    #[tokio::test]
    async fn test_events_taken_once() {
        let mut session = ScriptedSession::new();
        assert!(session.take_events().is_ok());
        assert!(session.take_events().is_err());
    }

    #[tokio::test]
    async fn test_log_records_calls() {
        let mut session = ScriptedSession::new().with_state(serde_json::json!({"ok": true}));
        let log = session.log();

        session.open("http://localhost/").await.unwrap();
        session.screenshot().await.unwrap();
        let state = session.evaluate("window.state").await.unwrap();
        session.close().await.unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.opened, vec!["http://localhost/".to_string()]);
        assert_eq!(log.screenshots, 1);
        assert_eq!(log.evaluated, vec!["window.state".to_string()]);
        assert!(log.closed);
        assert_eq!(state, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_provider_runs_out() {
        let mut provider = ScriptedSessionProvider::new(vec![ScriptedSession::new()]);
        assert!(provider.create().await.is_ok());
        assert!(provider.create().await.is_err());
    }
}
