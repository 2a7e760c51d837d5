//! One chat session: startup, the coordination loop, and shutdown.
//!
//! The session task is the only code that touches the command connection
//! or writes chat output. Two background tasks feed it through their own
//! queues: the broadcast listener (incoming messages) and the input reader
//! (typed lines). A renewal interval provides the third event source.
//!
//! ```text
//!  subscription ──► listener task ──► incoming queue ──┐
//!                                                      ├──► session loop ──► store / output
//!  input lines ──► reader task ──────► input queue ────┤
//!                                   renewal interval ──┘
//! ```

use std::{future::Future, io, time::Duration};

use thiserror::Error;
use tokio::{
    io::{AsyncBufRead, AsyncWrite, AsyncWriteExt},
    select,
    sync::mpsc,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    channel::BroadcastChannel,
    input,
    presence::{AcquireOutcome, PresenceLease, RenewOutcome},
    registry::Registry,
    store::{Store, StoreError},
};

pub const EXIT_COMMAND: &str = "/exit";
pub const WHO_COMMAND: &str = "/who";

pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(120);
pub const DEFAULT_RENEW_INTERVAL: Duration = Duration::from_secs(60);

/// Events are handed over one at a time; a small buffer absorbs bursts.
const QUEUE_DEPTH: usize = 16;

/// How long startup waits for the subscription before announcing the join.
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(2);

/// The unified event type consumed by the coordination loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    IncomingMessage(String),
    RenewTick,
    UserLine(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("User already online")]
    AlreadyOnline { username: String },

    #[error("failed to acquire presence lease")]
    Lease(#[source] StoreError),

    #[error("failed to join the online users registry")]
    Registry(#[source] StoreError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to write chat output")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    username: String,
    lease_ttl: Duration,
    renew_interval: Duration,
    prompt: bool,
}

impl SessionConfig {
    pub fn new(username: &str) -> Result<Self, SessionError> {
        if username.trim().is_empty() {
            return Err(SessionError::Config("username cannot be empty".to_string()));
        }
        Ok(Self {
            username: username.to_string(),
            lease_ttl: DEFAULT_LEASE_TTL,
            renew_interval: DEFAULT_RENEW_INTERVAL,
            prompt: false,
        })
    }

    /// Overrides lease timing. The renewal interval must be shorter than the
    /// TTL, or the lease would lapse between renewals.
    pub fn with_timing(
        mut self,
        lease_ttl: Duration,
        renew_interval: Duration,
    ) -> Result<Self, SessionError> {
        if renew_interval.is_zero() {
            return Err(SessionError::Config(
                "renew interval must be positive".to_string(),
            ));
        }
        if renew_interval >= lease_ttl {
            return Err(SessionError::Config(format!(
                "renew interval ({renew_interval:?}) must be shorter than the lease TTL ({lease_ttl:?})"
            )));
        }
        self.lease_ttl = lease_ttl;
        self.renew_interval = renew_interval;
        Ok(self)
    }

    /// Prints `<username>>` before each line of input.
    pub fn with_prompt(mut self, prompt: bool) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    pub fn renew_interval(&self) -> Duration {
        self.renew_interval
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Running,
    Exiting,
}

enum Command<'a> {
    Exit,
    Who,
    Say(&'a str),
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Self {
        match line {
            EXIT_COMMAND => Command::Exit,
            WHO_COMMAND => Command::Who,
            text => Command::Say(text),
        }
    }
}

pub struct Session<S, W> {
    config: SessionConfig,
    store: S,
    out: W,
    lease: PresenceLease,
    registry: Registry,
    channel: BroadcastChannel,
}

impl<S, W> Session<S, W>
where
    S: Store,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(config: SessionConfig, store: S, out: W) -> Self {
        let lease = PresenceLease::new(&config.username, config.lease_ttl);
        Self {
            config,
            store,
            out,
            lease,
            registry: Registry::default(),
            channel: BroadcastChannel::default(),
        }
    }

    pub async fn run<R>(self, lines: R) -> Result<(), SessionError>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        self.run_until(lines, std::future::pending()).await
    }

    /// Runs the whole session. `shutdown` resolving is treated like `/exit`.
    ///
    /// Fails before any background task starts if the name is taken or the
    /// registry join fails. Once running, store failures only produce
    /// diagnostics.
    pub async fn run_until<R, F>(mut self, lines: R, shutdown: F) -> Result<(), SessionError>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        F: Future<Output = ()> + Send,
    {
        self.claim_presence().await?;

        let (incoming_tx, incoming_rx) = mpsc::channel(QUEUE_DEPTH);
        let (input_tx, input_rx) = mpsc::channel(QUEUE_DEPTH);
        self.start_listener(incoming_tx).await;
        input::spawn_reader(lines, input_tx);

        self.announce("has joined").await;
        let outcome = self.coordinate(incoming_rx, input_rx, shutdown).await;
        self.leave().await;

        outcome.map_err(SessionError::from)
    }

    async fn claim_presence(&mut self) -> Result<(), SessionError> {
        let outcome = self
            .lease
            .acquire(&mut self.store)
            .await
            .map_err(SessionError::Lease)?;
        if outcome == AcquireOutcome::Conflict {
            return Err(SessionError::AlreadyOnline {
                username: self.config.username.clone(),
            });
        }

        if let Err(err) = self
            .registry
            .join(&mut self.store, &self.config.username)
            .await
        {
            self.lease.release(&mut self.store).await;
            return Err(SessionError::Registry(err));
        }

        info!(username = %self.config.username, "session started");
        Ok(())
    }

    async fn start_listener(&mut self, actions: mpsc::Sender<Action>) {
        match self.channel.spawn_listener(&self.store, actions).await {
            Ok(mut listener) => {
                if !listener.wait_ready(SUBSCRIBE_TIMEOUT).await {
                    debug!(
                        stopped = listener.is_finished(),
                        "subscription not acknowledged; continuing"
                    );
                }
            }
            Err(err) => {
                debug!(error = %err, "failed to subscribe; incoming messages unavailable");
            }
        }
    }

    async fn coordinate<F>(
        &mut self,
        mut incoming: mpsc::Receiver<Action>,
        mut input: mpsc::Receiver<Action>,
        shutdown: F,
    ) -> io::Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);

        let period = self.config.renew_interval;
        let mut renewals = time::interval_at(Instant::now() + period, period);
        renewals.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut listening = true;

        self.prompt().await?;
        loop {
            let action = select! {
                message = incoming.recv(), if listening => match message {
                    Some(action) => action,
                    None => {
                        debug!("listener stopped; no further incoming messages");
                        listening = false;
                        continue;
                    }
                },
                _ = renewals.tick() => Action::RenewTick,
                line = input.recv() => {
                    line.unwrap_or_else(|| Action::UserLine(EXIT_COMMAND.to_string()))
                }
                () = &mut shutdown => {
                    info!("interrupted; leaving chat");
                    Action::UserLine(EXIT_COMMAND.to_string())
                }
            };

            if self.apply(action).await? == LoopState::Exiting {
                return Ok(());
            }
        }
    }

    async fn apply(&mut self, action: Action) -> io::Result<LoopState> {
        match action {
            Action::IncomingMessage(text) => self.print(&text).await?,
            Action::RenewTick => self.renew().await?,
            Action::UserLine(line) => {
                match Command::parse(&line) {
                    Command::Exit => return Ok(LoopState::Exiting),
                    Command::Who => self.who().await?,
                    Command::Say(text) => self.say(text).await?,
                }
                self.prompt().await?;
            }
        }
        Ok(LoopState::Running)
    }

    async fn renew(&mut self) -> io::Result<()> {
        match self.lease.renew(&mut self.store).await {
            Ok(RenewOutcome::Renewed) => Ok(()),
            Ok(RenewOutcome::Missing) => {
                let message = format!(
                    "presence lease for {} expired; still chatting",
                    self.config.username
                );
                self.diagnostic(&message).await
            }
            Err(err) => self.diagnostic(&format!("Set failed: {err}")).await,
        }
    }

    async fn who(&mut self) -> io::Result<()> {
        match self.registry.list(&mut self.store).await {
            Ok(names) => {
                for name in names {
                    self.print(&name).await?;
                }
                Ok(())
            }
            Err(err) => {
                self.diagnostic(&format!("failed to list online users: {err}"))
                    .await
            }
        }
    }

    async fn say(&mut self, text: &str) -> io::Result<()> {
        let message = format!("{}:{text}", self.config.username);
        match self.channel.publish(&mut self.store, &message).await {
            Ok(_) => Ok(()),
            Err(err) => {
                self.diagnostic(&format!("failed to send message: {err}"))
                    .await
            }
        }
    }

    async fn announce(&mut self, event: &str) {
        let notice = format!("{} {event}", self.config.username);
        if let Err(err) = self.channel.publish(&mut self.store, &notice).await {
            warn!(error = %err, notice, "failed to publish notice");
        }
    }

    /// Best-effort teardown; each step runs even if an earlier one failed.
    async fn leave(&mut self) {
        self.lease.release(&mut self.store).await;

        if let Err(err) = self
            .registry
            .leave(&mut self.store, &self.config.username)
            .await
        {
            let message = format!("failed to leave the online users registry: {err}");
            if let Err(write_err) = self.diagnostic(&message).await {
                debug!(error = %write_err, "could not report registry failure");
            }
        }

        self.announce("has left").await;
        info!(username = %self.config.username, "session ended");
    }

    async fn prompt(&mut self) -> io::Result<()> {
        if !self.config.prompt {
            return Ok(());
        }
        let prompt = format!("{}>", self.config.username);
        self.out.write_all(prompt.as_bytes()).await?;
        self.out.flush().await
    }

    async fn print(&mut self, line: &str) -> io::Result<()> {
        self.out.write_all(line.as_bytes()).await?;
        self.out.write_all(b"\n").await?;
        self.out.flush().await
    }

    async fn diagnostic(&mut self, message: &str) -> io::Result<()> {
        debug!("{message}");
        self.print(&format!("!!! {message}")).await
    }
}
