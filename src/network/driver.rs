//! Async driver for a [`SessionManager`]
//!
//! The driver task owns the manager and is the only thing that touches it.
//! It waits on three sources at once: transport events, commands from
//! [`SessionHandle`]s, and the manager's next deadline. After each step the
//! latest [`SessionSnapshot`] is published on a watch channel.

use std::time::Instant;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::protocol::GameState;

use super::code::SessionCode;
use super::context::SessionSnapshot;
use super::error::SessionError;
use super::session::{SessionManager, SuggestionResponse};
use super::transport::{PeerFactory, TransportEvent};

/// Requests sent from a [`SessionHandle`] to the driver
#[derive(Debug)]
pub enum SessionCommand {
    Host {
        pin: Option<String>,
        reply: oneshot::Sender<Result<SessionCode, SessionError>>,
    },
    Join {
        code: String,
        pin: Option<String>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Leave,
    SendGameState {
        state: GameState,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Suggest {
        word: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    ClearSuggestion {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    AcceptSuggestion {
        reply: oneshot::Sender<Option<String>>,
    },
    RejectSuggestion,
    Shutdown,
}

/// Messages delivered to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotification {
    GameState(GameState),
    SuggestionResponse(SuggestionResponse),
}

/// Cloneable handle to a running driver
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(command(reply)).ok()?;
        rx.await.ok()
    }

    pub async fn host_game(&self, pin: Option<&str>) -> Result<SessionCode, SessionError> {
        let pin = pin.map(str::to_string);
        self.request(|reply| SessionCommand::Host { pin, reply })
            .await
            .unwrap_or(Err(SessionError::NotConnected))
    }

    pub async fn join_game(&self, code: &str, pin: Option<&str>) -> Result<(), SessionError> {
        let code = code.to_string();
        let pin = pin.map(str::to_string);
        self.request(|reply| SessionCommand::Join { code, pin, reply })
            .await
            .unwrap_or(Err(SessionError::NotConnected))
    }

    pub fn leave_session(&self) {
        let _ = self.commands.send(SessionCommand::Leave);
    }

    pub async fn send_game_state(&self, state: GameState) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::SendGameState { state, reply })
            .await
            .unwrap_or(Err(SessionError::NotConnected))
    }

    pub async fn send_suggestion(&self, word: &str) -> Result<(), SessionError> {
        let word = word.to_string();
        self.request(|reply| SessionCommand::Suggest { word, reply })
            .await
            .unwrap_or(Err(SessionError::NotConnected))
    }

    pub async fn clear_suggestion(&self) -> Result<(), SessionError> {
        self.request(|reply| SessionCommand::ClearSuggestion { reply })
            .await
            .unwrap_or(Err(SessionError::NotConnected))
    }

    pub async fn accept_suggestion(&self) -> Option<String> {
        self.request(|reply| SessionCommand::AcceptSuggestion { reply })
            .await
            .flatten()
    }

    pub fn reject_suggestion(&self) {
        let _ = self.commands.send(SessionCommand::RejectSuggestion);
    }

    /// Stop the driver; the session is left first
    pub fn shutdown(&self) {
        let _ = self.commands.send(SessionCommand::Shutdown);
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch snapshots as they change
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until a snapshot satisfies `predicate`
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> Option<SessionSnapshot> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx.wait_for(predicate).await.ok()?;
        Some((*snapshot).clone())
    }
}

/// Owns a [`SessionManager`] and runs it on the tokio runtime
pub struct SessionDriver<F: PeerFactory> {
    manager: SessionManager<F>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl<F> SessionDriver<F>
where
    F: PeerFactory + 'static,
{
    /// Wire callbacks and channels around `manager`
    ///
    /// `events` must be the receiving end of the sink the manager's factory
    /// was built with.
    pub fn new(
        mut manager: SessionManager<F>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> (
        Self,
        SessionHandle,
        mpsc::UnboundedReceiver<SessionNotification>,
    ) {
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let state_tx = notify_tx.clone();
        manager.on_game_state_received(move |state| {
            let _ = state_tx.send(SessionNotification::GameState(state.clone()));
        });
        manager.on_suggestion_response(move |response| {
            let _ = notify_tx.send(SessionNotification::SuggestionResponse(response.clone()));
        });

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(manager.snapshot());

        let driver = Self {
            manager,
            events,
            commands: command_rx,
            snapshot: snapshot_tx,
        };
        let handle = SessionHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
        };
        (driver, handle, notify_rx)
    }

    /// Run on a new task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run until shut down or every handle is dropped
    pub async fn run(mut self) {
        loop {
            let deadline = self.manager.next_deadline();
            let timer = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                Some(event) = self.events.recv() => {
                    self.manager.handle_transport_event(event, Instant::now());
                }

                command = self.commands.recv() => {
                    match command {
                        Some(SessionCommand::Shutdown) | None => break,
                        Some(command) => self.apply(command),
                    }
                }

                _ = timer => {
                    self.manager.handle_timeout(Instant::now());
                }
            }

            self.publish();
        }

        debug!("Session driver stopping");
        self.manager.leave_session();
        self.publish();
    }

    fn apply(&mut self, command: SessionCommand) {
        let now = Instant::now();
        match command {
            SessionCommand::Host { pin, reply } => {
                let _ = reply.send(self.manager.host_game(pin.as_deref(), now));
            }
            SessionCommand::Join { code, pin, reply } => {
                let _ = reply.send(self.manager.join_game(&code, pin.as_deref(), now));
            }
            SessionCommand::Leave => self.manager.leave_session(),
            SessionCommand::SendGameState { state, reply } => {
                let _ = reply.send(self.manager.send_game_state(state, now));
            }
            SessionCommand::Suggest { word, reply } => {
                let _ = reply.send(self.manager.send_suggestion(&word, now));
            }
            SessionCommand::ClearSuggestion { reply } => {
                let _ = reply.send(self.manager.clear_suggestion(now));
            }
            SessionCommand::AcceptSuggestion { reply } => {
                let _ = reply.send(self.manager.accept_suggestion(now));
            }
            SessionCommand::RejectSuggestion => self.manager.reject_suggestion(now),
            SessionCommand::Shutdown => {}
        }
    }

    fn publish(&self) {
        let latest = self.manager.snapshot();
        self.snapshot.send_if_modified(|current| {
            if *current == latest {
                false
            } else {
                *current = latest;
                true
            }
        });
    }
}
