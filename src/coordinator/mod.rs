//! Session coordinator.
//!
//! Binds a [`NegotiationMachine`] to one [`MediaTransport`] and one host.
//!
//! # Architecture
//!
//! ```text
//!   host                      driver task                    transport
//!    |  initiate_offer()  ┌──────────────────┐
//!    |  message_received()│  FIFO command    │  create_local_offer()
//!    |  close()  ───────> │  queue           │ ───────────────────────>
//!    |                    │        │         │
//!    |                    │  NegotiationMachine  <── result as command ─
//!    |  <── CoordinatorEvent (OutboundMessage / NegotiationFailed)
//! ```
//!
//! Every command is processed to completion before the next is taken
//! from the queue. Transport calls run in their own tasks and post their
//! result back onto the same queue, so the machine only ever sees one
//! event at a time.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use roap::coordinator::{CoordinatorEvent, LoopbackTransport, SessionCoordinator};
//!
//! let (session, mut events) =
//!     SessionCoordinator::new(Arc::new(LoopbackTransport::new("me")), &Default::default());
//!
//! tokio::spawn(async move {
//!     while let Some(CoordinatorEvent::OutboundMessage(msg)) = events.recv().await {
//!         signaling.send(msg.to_json()?).await?;
//!     }
//! });
//!
//! session.initiate_offer().await?;
//! ```

mod loopback;
mod transport;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

pub use loopback::LoopbackTransport;
pub use transport::{LocalDescription, MediaTransport, TransportFuture};

use crate::config::NegotiationConfig;
use crate::error::{Result, RoapError};
use crate::protocol::{
    Action, Event, Failure, NegotiationMachine, NegotiationMessage, NegotiationState,
};

/// Notifications delivered to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    /// Send this message to the peer
    OutboundMessage(NegotiationMessage),
    /// Negotiation reached a terminal failure state
    NegotiationFailed(Failure),
}

/// Receiving half of the host event stream
pub type EventReceiver = mpsc::UnboundedReceiver<CoordinatorEvent>;

/// Point-in-time view of the negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Current state
    pub state: NegotiationState,
    /// Current sequence number
    pub sequence_number: u64,
    /// Retries consumed since the last accepted answer
    pub retry_count: u32,
    /// A local offer is queued behind the current negotiation
    pub local_offer_queued: bool,
}

impl SessionSnapshot {
    fn of(machine: &NegotiationMachine) -> Self {
        Self {
            state: machine.state(),
            sequence_number: machine.session().sequence_number(),
            retry_count: machine.session().retry_count(),
            local_offer_queued: machine.session().pending_local_offer_requested(),
        }
    }
}

type CallerHandle = oneshot::Sender<Result<()>>;

enum Command {
    InitiateOffer(CallerHandle),
    Message(NegotiationMessage),
    Transport(Event),
    Close,
}

/// ROAP session bound to a media transport
pub struct SessionCoordinator {
    /// Session ID (matches the log field)
    id: String,
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    closed: AtomicBool,
}

impl SessionCoordinator {
    /// Start a new negotiation session.
    ///
    /// Spawns the driver task, so this must be called within a Tokio
    /// runtime.
    pub fn new(
        transport: Arc<dyn MediaTransport>,
        config: &NegotiationConfig,
    ) -> (Self, EventReceiver) {
        let machine = NegotiationMachine::new(config);
        let id = machine.session().id().to_string();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::of(&machine));

        tracing::info!(
            session = %id,
            transport = transport.name(),
            seq = machine.session().sequence_number(),
            tie_breaker = machine.tie_breaker(),
            "negotiation session started"
        );

        let driver = Driver {
            machine,
            transport: Some(transport),
            commands: commands_tx.clone(),
            events: events_tx,
            snapshot: snapshot_tx,
            awaiting_offer: Vec::new(),
            awaiting_answer: Vec::new(),
        };
        tokio::spawn(driver.run(commands_rx));

        let coordinator = Self {
            id,
            commands: commands_tx,
            snapshot: snapshot_rx,
            closed: AtomicBool::new(false),
        };
        (coordinator, events_rx)
    }

    /// Start a fresh session that continues from a previous sequence number.
    ///
    /// Used on reconnect so the peer keeps seeing increasing sequence
    /// numbers. Nothing else carries over.
    pub fn resume(
        transport: Arc<dyn MediaTransport>,
        config: &NegotiationConfig,
        last_sequence: u64,
    ) -> (Self, EventReceiver) {
        let config = config.clone().with_initial_sequence(last_sequence);
        Self::new(transport, &config)
    }

    /// Get session ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Request a new local offer and wait for its round trip to settle.
    ///
    /// Resolves once the peer's answer is applied and OK is sent. Fails
    /// with [`RoapError::NegotiationInProgress`] if an earlier call is
    /// still pending before any offer round trip has completed.
    pub async fn initiate_offer(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::InitiateOffer(tx))?;
        rx.await.map_err(|_| RoapError::SessionClosed)?
    }

    /// Feed a message from the signaling channel into the session.
    pub fn message_received(&self, message: NegotiationMessage) -> Result<()> {
        message.validate()?;
        self.send(Command::Message(message))
    }

    /// Decode a JSON message and feed it into the session.
    pub fn message_received_json(&self, json: &str) -> Result<()> {
        self.message_received(NegotiationMessage::from_json(json)?)
    }

    /// Stop negotiating and release the transport. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.commands.send(Command::Close);
        }
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        *self.snapshot.borrow()
    }

    /// Current state
    pub fn state(&self) -> NegotiationState {
        self.snapshot().state
    }

    /// Current sequence number
    pub fn sequence_number(&self) -> u64 {
        self.snapshot().sequence_number
    }

    /// Wait until the session reaches `state`.
    pub async fn wait_for_state(&self, state: NegotiationState) -> Result<SessionSnapshot> {
        self.wait_for(|s| s.state == state).await
    }

    /// Wait until a published snapshot satisfies `f`.
    ///
    /// Returns immediately if the current snapshot already does. Fails
    /// with [`RoapError::SessionClosed`] once the driver has stopped.
    pub async fn wait_for(
        &self,
        mut f: impl FnMut(&SessionSnapshot) -> bool,
    ) -> Result<SessionSnapshot> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(|s| f(s))
            .await
            .map_err(|_| RoapError::SessionClosed)?;
        Ok(*snapshot)
    }

    fn send(&self, command: Command) -> Result<()> {
        if self.is_closed() {
            return Err(RoapError::SessionClosed);
        }
        self.commands
            .send(command)
            .map_err(|_| RoapError::SessionClosed)
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("id", &self.id)
            .field("snapshot", &self.snapshot())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Owns the machine and executes its actions.
struct Driver {
    machine: NegotiationMachine,
    /// Dropped on close
    transport: Option<Arc<dyn MediaTransport>>,
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedSender<CoordinatorEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
    /// Callers whose offer has not been sent yet
    awaiting_offer: Vec<CallerHandle>,
    /// Callers whose offer is on the wire
    awaiting_answer: Vec<CallerHandle>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::InitiateOffer(caller) => self.initiate_offer(caller),
                Command::Message(message) => self.dispatch(Event::MessageReceived(message)),
                Command::Transport(event) => self.dispatch(event),
                Command::Close => {
                    self.shutdown();
                    break;
                },
            }
            self.snapshot.send_replace(SessionSnapshot::of(&self.machine));
        }
        self.snapshot.send_replace(SessionSnapshot::of(&self.machine));
    }

    fn initiate_offer(&mut self, caller: CallerHandle) {
        let outstanding = !self.awaiting_offer.is_empty() || !self.awaiting_answer.is_empty();
        if outstanding && !self.machine.initialized_as_offerer() {
            let _ = caller.send(Err(RoapError::NegotiationInProgress));
            return;
        }
        self.awaiting_offer.push(caller);
        self.dispatch(Event::LocalOfferRequested);
    }

    fn dispatch(&mut self, event: Event) {
        for action in self.machine.handle(event) {
            self.execute(action);
        }
    }

    fn execute(&mut self, action: Action) {
        match action {
            Action::Send(message) => {
                tracing::debug!(session = %self.machine.session().id(), "sending {}", message);
                let _ = self.events.send(CoordinatorEvent::OutboundMessage(message));
            },
            Action::CreateLocalOffer => self.spawn_transport_call(|transport| {
                Box::pin(async move {
                    match transport.create_local_offer().await {
                        Ok(desc) => Event::LocalOfferCreated { sdp: desc.sdp },
                        Err(e) => Event::LocalOfferFailed { cause: cause(e) },
                    }
                })
            }),
            Action::ApplyRemoteOffer(sdp) => self.spawn_transport_call(move |transport| {
                Box::pin(async move {
                    match transport.apply_remote_offer(sdp).await {
                        Ok(desc) => Event::RemoteOfferApplied { sdp: desc.sdp },
                        Err(e) => Event::RemoteOfferFailed { cause: cause(e) },
                    }
                })
            }),
            Action::ApplyRemoteAnswer(sdp) => self.spawn_transport_call(move |transport| {
                Box::pin(async move {
                    match transport.apply_remote_answer(sdp).await {
                        Ok(()) => Event::RemoteAnswerApplied,
                        Err(e) => Event::RemoteAnswerFailed { cause: cause(e) },
                    }
                })
            }),
            Action::PromoteCallers => {
                self.awaiting_answer.append(&mut self.awaiting_offer);
            },
            Action::ResolveCallers => {
                for caller in self.awaiting_answer.drain(..) {
                    let _ = caller.send(Ok(()));
                }
            },
            Action::RejectCallers(failure) => {
                for caller in self.awaiting_answer.drain(..).chain(self.awaiting_offer.drain(..)) {
                    let _ = caller.send(Err(failure.clone().into()));
                }
            },
            Action::NegotiationFailed(failure) => {
                let _ = self.events.send(CoordinatorEvent::NegotiationFailed(failure));
            },
        }
    }

    fn spawn_transport_call<F>(&self, call: F)
    where
        F: FnOnce(Arc<dyn MediaTransport>) -> futures::future::BoxFuture<'static, Event>,
    {
        let Some(transport) = self.transport.clone() else {
            return;
        };
        let commands = self.commands.clone();
        let pending = call(transport);
        tokio::spawn(async move {
            let event = pending.await;
            // The session may have closed while the call was running.
            let _ = commands.send(Command::Transport(event));
        });
    }

    fn shutdown(&mut self) {
        tracing::info!(
            session = %self.machine.session().id(),
            state = %self.machine.state(),
            seq = self.machine.session().sequence_number(),
            "negotiation session closed"
        );
        for caller in self.awaiting_answer.drain(..).chain(self.awaiting_offer.drain(..)) {
            let _ = caller.send(Err(RoapError::SessionClosed));
        }
        self.transport = None;
    }
}

fn cause(err: RoapError) -> String {
    match err {
        RoapError::Transport(cause) => cause,
        other => other.to_string(),
    }
}
