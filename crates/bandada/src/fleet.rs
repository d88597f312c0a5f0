//! Fleet orchestration: the harness core.
//!
//! A [`Fleet`] owns N client sessions, opens them against the target URL,
//! watches each client's console stream for the completion signal, fires the
//! optional per-client capture timer, and returns once every client has
//! finished.
//!
//! All client events funnel through one mpsc channel into a single
//! event-at-a-time loop, so the completion counter lives in one place and
//! needs no lock. Session-side tasks only ever talk to the loop through that
//! channel.

use crate::capture;
use crate::config::FleetConfig;
use crate::event::SessionEvent;
use crate::result::{HarnessError, HarnessResult};
use crate::session::{ClientSession, SessionProvider};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Literal console text a client emits to signal completion
pub const COMPLETION_SIGNAL: &str = "Game over";

/// Exact-match completion check.
///
/// `"Game over!"` does not count; only literal equality does.
#[must_use]
pub fn is_completion(message: &str) -> bool {
    message == COMPLETION_SIGNAL
}

/// Case-insensitive substring check for error-like console text.
///
/// Matching messages are logged distinctly; they have no effect on
/// completion accounting.
#[must_use]
pub fn is_error_text(message: &str) -> bool {
    message.to_lowercase().contains("error")
}

/// Outcome of one fleet run
#[derive(Debug, Clone)]
pub struct FleetSummary {
    /// Fleet size requested
    pub clients: usize,
    /// Clients that signaled completion
    pub finished: usize,
    /// Ordinals in completion-arrival order
    pub completion_order: Vec<usize>,
    /// Time from fleet start to each completion, aligned with
    /// `completion_order`
    pub runtimes: Vec<Duration>,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

/// Event delivered to the run loop
enum FleetEvent {
    /// An event forwarded from one client session
    Session {
        ordinal: usize,
        event: SessionEvent,
    },
    /// A client's capture timer fired
    CaptureDue { ordinal: usize },
}

/// Per-client state owned by the run loop
struct Client<S> {
    session: Arc<Mutex<S>>,
    finished: bool,
    closed: bool,
    capture: Option<JoinHandle<()>>,
    forwarder: JoinHandle<()>,
    opener: JoinHandle<()>,
}

/// A configured fleet, ready to run
#[derive(Debug, Clone)]
pub struct Fleet {
    config: FleetConfig,
}

impl Fleet {
    /// Create a fleet from a configuration
    #[must_use]
    pub const fn new(config: FleetConfig) -> Self {
        Self { config }
    }

    /// The fleet's configuration
    #[must_use]
    pub const fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Run the fleet to completion.
    ///
    /// Opens one session per ordinal (1-based), observes their event
    /// streams, and returns once the completion counter reaches the fleet
    /// size. A zero fleet size returns immediately without creating any
    /// session. Outstanding capture timers are cancelled and still-open
    /// sessions closed before returning.
    pub async fn run<P>(self, provider: &mut P) -> HarnessResult<FleetSummary>
    where
        P: SessionProvider,
    {
        self.config.validate()?;
        let started = Instant::now();
        let clients = self.config.clients;

        if clients == 0 {
            info!("No clients requested. Exiting...");
            return Ok(FleetSummary {
                clients: 0,
                finished: 0,
                completion_order: Vec::new(),
                runtimes: Vec::new(),
                elapsed: started.elapsed(),
            });
        }

        info!("Opening {clients} connections to \"{}\"...", self.config.url);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut fleet = Vec::with_capacity(clients);

        for ordinal in 1..=clients {
            let mut session = provider.create().await?;
            let mut events = session.take_events()?;
            let session = Arc::new(Mutex::new(session));

            let forwarder = tokio::spawn({
                let tx = tx.clone();
                async move {
                    while let Some(event) = events.recv().await {
                        if tx.send(FleetEvent::Session { ordinal, event }).is_err() {
                            break;
                        }
                    }
                }
            });

            // Fire-and-forget: a failed open only leaves the client
            // unfinished, it is not escalated.
            let opener = tokio::spawn({
                let session = Arc::clone(&session);
                let url = self.config.url.clone();
                async move {
                    match session.lock().await.open(&url).await {
                        Ok(()) => {
                            info!("Opened client {ordinal} at {}.", Utc::now().timestamp_millis());
                        }
                        Err(e) => warn!("Opening client {ordinal} failed: {e}"),
                    }
                }
            });

            // Capture timers are scheduled up front, relative to fleet
            // start, not to each client's own open time.
            let capture = self.config.capture_after.map(|delay| {
                tokio::spawn({
                    let tx = tx.clone();
                    async move {
                        sleep(delay).await;
                        let _ = tx.send(FleetEvent::CaptureDue { ordinal });
                    }
                })
            });

            fleet.push(Client {
                session,
                finished: false,
                closed: false,
                capture,
                forwarder,
                opener,
            });
        }
        drop(tx);

        let outcome = self.observe(started, &mut rx, &mut fleet).await;

        for client in &mut fleet {
            if let Some(timer) = client.capture.take() {
                timer.abort();
            }
            client.forwarder.abort();
            client.opener.abort();
        }
        for client in &fleet {
            if !client.closed {
                if let Err(e) = client.session.lock().await.close().await {
                    debug!("Closing session failed: {e}");
                }
            }
        }

        let (finished, completion_order, runtimes) = outcome?;
        Ok(FleetSummary {
            clients,
            finished,
            completion_order,
            runtimes,
            elapsed: started.elapsed(),
        })
    }

    /// The single event-delivery path; owns the completion counter.
    async fn observe<S: ClientSession>(
        &self,
        started: Instant,
        rx: &mut mpsc::UnboundedReceiver<FleetEvent>,
        fleet: &mut [Client<S>],
    ) -> HarnessResult<(usize, Vec<usize>, Vec<Duration>)> {
        let clients = fleet.len();
        let mut finished = 0usize;
        let mut completion_order = Vec::new();
        let mut runtimes = Vec::new();

        loop {
            let Some(event) = rx.recv().await else {
                return Err(HarnessError::EventChannelClosed { finished, clients });
            };

            match event {
                FleetEvent::Session {
                    ordinal,
                    event: SessionEvent::Console(message),
                } => {
                    if is_completion(&message) {
                        let session = {
                            let Some(client) = client_mut(fleet, ordinal) else {
                                continue;
                            };
                            // A finished client contributes exactly one
                            // increment, later signals are ignored.
                            if client.finished {
                                continue;
                            }
                            client.finished = true;
                            client.closed = self.config.close_on_finish;
                            if let Some(timer) = client.capture.take() {
                                timer.abort();
                            }
                            Arc::clone(&client.session)
                        };

                        let player_id = if self.config.extract_player_id {
                            capture::extract_player_id(&session).await
                        } else {
                            None
                        };
                        match player_id {
                            Some(id) => info!("Client {ordinal} finished (player {id})."),
                            None => info!("Client {ordinal} finished."),
                        }

                        if self.config.close_on_finish {
                            if let Err(e) = session.lock().await.close().await {
                                warn!("Closing client {ordinal} failed: {e}");
                            }
                        }

                        finished += 1;
                        completion_order.push(ordinal);
                        runtimes.push(started.elapsed());
                        if finished >= clients {
                            info!("All clients finished. Exiting...");
                            return Ok((finished, completion_order, runtimes));
                        }
                        info!("Still waiting for {} clients to finish.", clients - finished);
                    } else if is_error_text(&message) {
                        warn!("Client {ordinal} error message: {message}");
                    }
                }
                FleetEvent::Session {
                    ordinal,
                    event: SessionEvent::Fault(fault),
                } => {
                    error!("Client {ordinal}:\n{}", fault.format());
                }
                FleetEvent::CaptureDue { ordinal } => {
                    let session = {
                        let Some(client) = client_mut(fleet, ordinal) else {
                            continue;
                        };
                        if client.finished {
                            continue;
                        }
                        client.capture = None;
                        Arc::clone(&client.session)
                    };
                    if let Err(e) =
                        capture::capture_client(&session, ordinal, &self.config.capture_dir).await
                    {
                        warn!("Capture of client {ordinal} failed: {e}");
                    }
                }
            }
        }
    }
}

fn client_mut<S>(fleet: &mut [Client<S>], ordinal: usize) -> Option<&mut Client<S>> {
    ordinal.checked_sub(1).and_then(|index| fleet.get_mut(index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{PLAYER_ID_EXPR, STATE_SNAPSHOT_EXPR};
    use crate::config::DEFAULT_URL;
    use crate::event::{InternalFault, StackFrame};
    use crate::session::scripted::{ScriptedSession, ScriptedSessionProvider};
    use serde_json::json;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_completion_is_exact_match() {
        assert!(is_completion("Game over"));
        assert!(!is_completion("Game over!"));
        assert!(!is_completion("game over"));
        assert!(!is_completion("The Game over signal"));
    }

    #[test]
    fn test_error_text_is_case_insensitive_substring() {
        assert!(is_error_text("ERROR: socket closed"));
        assert!(is_error_text("minor error occurred"));
        assert!(is_error_text("ErRoR"));
        assert!(!is_error_text("Game over"));
        assert!(!is_error_text("all good"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_clients_finishing_ends_the_run() {
        let sessions = vec![
            ScriptedSession::new().console_at(ms(20), COMPLETION_SIGNAL),
            ScriptedSession::new().console_at(ms(10), COMPLETION_SIGNAL),
            ScriptedSession::new().console_at(ms(30), COMPLETION_SIGNAL),
        ];
        let logs: Vec<_> = sessions.iter().map(ScriptedSession::log).collect();
        let mut provider = ScriptedSessionProvider::new(sessions);

        let summary = Fleet::new(FleetConfig::new().with_clients(3))
            .run(&mut provider)
            .await
            .unwrap();

        assert_eq!(summary.clients, 3);
        assert_eq!(summary.finished, 3);
        assert_eq!(summary.completion_order, vec![2, 1, 3]);
        // Exactly one open per client, against the configured URL.
        for log in logs {
            assert_eq!(log.lock().unwrap().opened, vec![DEFAULT_URL.to_string()]);
        }
    }

    #[tokio::test]
    async fn test_zero_clients_exits_immediately() {
        // An empty provider errors on create, so success proves no session
        // was requested.
        let mut provider = ScriptedSessionProvider::new(Vec::new());

        let summary = Fleet::new(FleetConfig::new().with_clients(0))
            .run(&mut provider)
            .await
            .unwrap();

        assert_eq!(summary.clients, 0);
        assert_eq!(summary.finished, 0);
        assert!(summary.completion_order.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_completion_signal_is_ignored() {
        let sessions = vec![
            ScriptedSession::new()
                .console_at(ms(5), COMPLETION_SIGNAL)
                .console_at(ms(6), COMPLETION_SIGNAL),
            ScriptedSession::new().console_at(ms(50), COMPLETION_SIGNAL),
        ];
        let mut provider = ScriptedSessionProvider::new(sessions);

        let summary = Fleet::new(FleetConfig::new().with_clients(2))
            .run(&mut provider)
            .await
            .unwrap();

        // Had the duplicate counted, the run would have ended at 6ms with
        // order [1, 1].
        assert_eq!(summary.finished, 2);
        assert_eq!(summary.completion_order, vec![1, 2]);
        assert!(summary.elapsed >= ms(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_records_per_client_runtimes() {
        let sessions = vec![
            ScriptedSession::new().console_at(ms(40), COMPLETION_SIGNAL),
            ScriptedSession::new().console_at(ms(10), COMPLETION_SIGNAL),
        ];
        let mut provider = ScriptedSessionProvider::new(sessions);

        let summary = Fleet::new(FleetConfig::new().with_clients(2))
            .run(&mut provider)
            .await
            .unwrap();

        assert_eq!(summary.completion_order, vec![2, 1]);
        assert_eq!(summary.runtimes.len(), 2);
        // Runtimes are recorded in arrival order, so they never decrease.
        assert!(summary.runtimes[0] >= ms(10));
        assert!(summary.runtimes[1] >= ms(40));
        assert!(summary.runtimes[0] <= summary.runtimes[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_punctuation_is_not_completion() {
        let sessions = vec![ScriptedSession::new()
            .console_at(ms(5), "Game over!")
            .console_at(ms(30), COMPLETION_SIGNAL)];
        let mut provider = ScriptedSessionProvider::new(sessions);

        let summary = Fleet::new(FleetConfig::new().with_clients(1))
            .run(&mut provider)
            .await
            .unwrap();

        assert_eq!(summary.finished, 1);
        assert!(summary.elapsed >= ms(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_messages_do_not_advance_completion() {
        let sessions = vec![ScriptedSession::new()
            .console_at(ms(5), "ERROR: socket closed")
            .console_at(ms(10), "minor error occurred")
            .console_at(ms(20), COMPLETION_SIGNAL)];
        let mut provider = ScriptedSessionProvider::new(sessions);

        let summary = Fleet::new(FleetConfig::new().with_clients(1))
            .run(&mut provider)
            .await
            .unwrap();

        assert_eq!(summary.finished, 1);
        assert!(summary.elapsed >= ms(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_fires_only_for_unfinished_clients() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = vec![
            ScriptedSession::new().console_at(ms(10), COMPLETION_SIGNAL),
            ScriptedSession::new()
                .console_at(ms(15), "still playing")
                .console_at(ms(200), COMPLETION_SIGNAL),
        ];
        let logs: Vec<_> = sessions.iter().map(ScriptedSession::log).collect();
        let mut provider = ScriptedSessionProvider::new(sessions);

        let config = FleetConfig::new()
            .with_clients(2)
            .with_capture_after(ms(100))
            .with_capture_dir(dir.path());
        let summary = Fleet::new(config).run(&mut provider).await.unwrap();

        assert_eq!(summary.finished, 2);
        assert_eq!(summary.completion_order, vec![1, 2]);

        // Client 1 finished before the delay elapsed: its timer was
        // cancelled and it was never captured.
        assert_eq!(logs[0].lock().unwrap().screenshots, 0);
        assert!(!dir.path().join("screenshot_1.png").exists());

        // Client 2 was still running when the timer fired: one screenshot,
        // one state snapshot.
        {
            let second = logs[1].lock().unwrap();
            assert_eq!(second.screenshots, 1);
            assert_eq!(second.evaluated, vec![STATE_SNAPSHOT_EXPR.to_string()]);
        }
        assert!(dir.path().join("screenshot_2.png").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_waits_indefinitely_for_unfinished_clients() {
        let sessions = vec![
            ScriptedSession::new().console_at(ms(10), COMPLETION_SIGNAL),
            ScriptedSession::new().console_at(ms(15), "still playing"),
        ];
        let mut provider = ScriptedSessionProvider::new(sessions);

        let run = Fleet::new(FleetConfig::new().with_clients(2)).run(&mut provider);
        let outcome = tokio::time::timeout(Duration::from_secs(3600), run).await;

        assert!(outcome.is_err(), "run must still be waiting on client 2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_is_observability_only() {
        let fault = InternalFault::new("node is not defined")
            .with_frame(StackFrame::new("game.js", 12).in_function("init"))
            .with_frame(StackFrame::new("game.js", 3));
        let sessions = vec![ScriptedSession::new()
            .fault_at(ms(5), fault)
            .console_at(ms(20), COMPLETION_SIGNAL)];
        let mut provider = ScriptedSessionProvider::new(sessions);

        let summary = Fleet::new(FleetConfig::new().with_clients(1))
            .run(&mut provider)
            .await
            .unwrap();

        assert_eq!(summary.finished, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_on_finish_closes_the_session_immediately() {
        let sessions = vec![
            ScriptedSession::new().console_at(ms(10), COMPLETION_SIGNAL),
            ScriptedSession::new().console_at(ms(15), "still playing"),
        ];
        let logs: Vec<_> = sessions.iter().map(ScriptedSession::log).collect();
        let mut provider = ScriptedSessionProvider::new(sessions);

        let config = FleetConfig::new().with_clients(2).with_close_on_finish(true);
        let run = Fleet::new(config).run(&mut provider);
        let outcome = tokio::time::timeout(Duration::from_secs(3600), run).await;

        // The run is still waiting on client 2, yet client 1 is closed.
        assert!(outcome.is_err());
        assert!(logs[0].lock().unwrap().closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_id_extraction_queries_the_page() {
        let sessions = vec![ScriptedSession::new()
            .with_state(json!("player-7"))
            .console_at(ms(5), COMPLETION_SIGNAL)];
        let logs: Vec<_> = sessions.iter().map(ScriptedSession::log).collect();
        let mut provider = ScriptedSessionProvider::new(sessions);

        let config = FleetConfig::new()
            .with_clients(1)
            .with_extract_player_id(true);
        let summary = Fleet::new(config).run(&mut provider).await.unwrap();

        assert_eq!(summary.finished, 1);
        assert_eq!(
            logs[0].lock().unwrap().evaluated,
            vec![PLAYER_ID_EXPR.to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_torn_down_event_sources_surface_an_error() {
        let sessions = vec![ScriptedSession::new()
            .console_at(ms(5), "hello")
            .hangs_up()];
        let mut provider = ScriptedSessionProvider::new(sessions);

        let err = Fleet::new(FleetConfig::new().with_clients(1))
            .run(&mut provider)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            HarnessError::EventChannelClosed {
                finished: 0,
                clients: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_opening() {
        let mut provider = ScriptedSessionProvider::new(Vec::new());
        let err = Fleet::new(FleetConfig::new().with_clients(2).with_url(""))
            .run(&mut provider)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Config { .. }));
    }
}
