//! The IRC bot session.
//!
//! [`Session`] is a pure state machine: it consumes [`Input`]s (connection
//! outcomes, client events, timer fires, join requests) and returns the
//! [`Action`]s the [`runner`] must perform. It never touches the network,
//! which keeps every transition testable without a socket.

pub mod runner;

use std::fmt;
use std::time::Duration;

use cobe_irc::irc::is_channel;
use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::IrcConfig;
use crate::engine::Engine;
use crate::normalize::normalize_live;
use crate::policy;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Disconnected,
    /// A connect attempt is in flight. `reconnect` is false only for the
    /// first attempt, whose failure is fatal.
    Connecting { reconnect: bool },
    /// Connected, waiting for the end of the MOTD.
    AwaitingHandshake,
    Ready,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Disconnected => write!(f, "disconnected"),
            State::Connecting { reconnect: false } => write!(f, "connecting"),
            State::Connecting { reconnect: true } => write!(f, "reconnecting"),
            State::AwaitingHandshake => write!(f, "awaiting handshake"),
            State::Ready => write!(f, "ready"),
        }
    }
}

/// A channel to join, with an optional key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PendingJoin {
    pub channel: String,
    pub key: Option<String>,
}

impl PendingJoin {
    pub fn new(channel: &str, key: Option<&str>) -> Self {
        Self {
            channel: channel.to_string(),
            key: key.map(str::to_string),
        }
    }

    /// Parse `"#chan"` or `"#chan key"`.
    pub fn parse(spec: &str) -> Option<Self> {
        let mut parts = spec.split_whitespace();
        let channel = parts.next()?;
        let key = parts.next();
        if parts.next().is_some() || !is_channel(channel) {
            return None;
        }
        Some(Self::new(channel, key))
    }
}

impl fmt::Display for PendingJoin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{} {key}", self.channel),
            None => write!(f, "{}", self.channel),
        }
    }
}

/// Everything that can happen to a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    /// The transport is up and registration has been sent.
    Connected,
    ConnectFailed { reason: String },
    /// The server accepted our nick (001).
    Registered { nick: String },
    /// End of MOTD (376 or 422).
    HandshakeComplete,
    NickChanged { old_nick: String, new_nick: String },
    Disconnected { reason: String },
    /// The health-check timer fired; `live` is the connection's own report.
    HealthCheck { live: bool },
    Join(PendingJoin),
    Message {
        from: String,
        target: String,
        text: Vec<u8>,
    },
}

/// Side effects requested by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Open a new connection, dropping any existing one.
    Connect,
    Join(PendingJoin),
    /// Send already-encoded text to a channel.
    Say { target: String, text: Vec<u8> },
    /// Arm the single health-check timer, replacing any pending deadline.
    ScheduleHealthCheck(Duration),
    /// Give up; the first connection attempt failed.
    Fail(String),
}

pub struct Session<E, R = StdRng> {
    config: IrcConfig,
    engine: E,
    rng: R,
    state: State,
    /// Nick the server confirmed; starts as the configured one.
    nick: String,
    /// Every join ever requested, in request order.
    joins: Vec<PendingJoin>,
}

impl<E: Engine> Session<E> {
    pub fn new(config: IrcConfig, engine: E) -> Self {
        Self::with_rng(config, engine, StdRng::from_entropy())
    }
}

impl<E: Engine, R: Rng> Session<E, R> {
    /// Build a session with a caller-supplied reply-draw source.
    pub fn with_rng(config: IrcConfig, engine: E, rng: R) -> Self {
        let mut session = Self {
            nick: config.nick.clone(),
            joins: Vec::new(),
            state: State::Disconnected,
            config,
            engine,
            rng,
        };
        for join in session.config.channels.clone() {
            session.add_join(join);
        }
        session
    }

    pub fn config(&self) -> &IrcConfig {
        &self.config
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn joins(&self) -> &[PendingJoin] {
        &self.joins
    }

    /// Begin the first connection attempt.
    pub fn start(&mut self) -> Vec<Action> {
        self.state = State::Connecting { reconnect: false };
        vec![Action::Connect]
    }

    pub fn handle(&mut self, input: Input) -> Vec<Action> {
        match input {
            Input::Connected => {
                tracing::info!(server = %self.config.server, port = self.config.port, "Connected");
                self.state = State::AwaitingHandshake;
                vec![self.schedule_health_check()]
            }
            Input::ConnectFailed { reason } => match self.state {
                State::Connecting { reconnect: false } => {
                    self.state = State::Disconnected;
                    vec![Action::Fail(reason)]
                }
                _ => {
                    tracing::warn!(%reason, "Reconnect failed");
                    self.state = State::Disconnected;
                    vec![self.schedule_health_check()]
                }
            },
            Input::Registered { nick } => {
                if nick != self.nick {
                    tracing::info!(configured = %self.nick, confirmed = %nick, "Registered under a different nick");
                }
                self.nick = nick;
                Vec::new()
            }
            Input::HandshakeComplete => self.on_handshake(),
            Input::NickChanged { old_nick, new_nick } => {
                if old_nick.eq_ignore_ascii_case(&self.nick) {
                    tracing::info!(%old_nick, %new_nick, "Our nick changed");
                    self.nick = new_nick;
                }
                Vec::new()
            }
            Input::Disconnected { reason } => {
                if matches!(self.state, State::Connecting { .. }) {
                    tracing::debug!(%reason, "Disconnect while connecting, ignored");
                    return Vec::new();
                }
                tracing::warn!(%reason, "Disconnected");
                self.reconnect()
            }
            Input::HealthCheck { live } => self.on_health_check(live),
            Input::Join(join) => {
                if !self.add_join(join.clone()) {
                    return Vec::new();
                }
                if self.state == State::Ready {
                    vec![Action::Join(join)]
                } else {
                    tracing::debug!(channel = %join.channel, state = %self.state, "Join queued");
                    Vec::new()
                }
            }
            Input::Message { from, target, text } => self.on_message(&from, &target, &text),
        }
    }

    /// Record a join. Returns false for a duplicate.
    fn add_join(&mut self, join: PendingJoin) -> bool {
        if self.joins.contains(&join) {
            return false;
        }
        self.joins.push(join);
        true
    }

    fn schedule_health_check(&self) -> Action {
        Action::ScheduleHealthCheck(self.config.health_check_interval)
    }

    fn on_handshake(&mut self) -> Vec<Action> {
        if !matches!(self.state, State::AwaitingHandshake) {
            return Vec::new();
        }
        tracing::info!(nick = %self.nick, channels = self.joins.len(), "Handshake complete");
        self.state = State::Ready;
        let mut actions: Vec<Action> = self.joins.iter().cloned().map(Action::Join).collect();
        actions.push(self.schedule_health_check());
        actions
    }

    fn on_health_check(&mut self, live: bool) -> Vec<Action> {
        match self.state {
            // An attempt is already running; its outcome drives the next step.
            State::Connecting { .. } => vec![self.schedule_health_check()],
            State::AwaitingHandshake | State::Ready if live => {
                tracing::debug!("Health check ok");
                vec![self.schedule_health_check()]
            }
            _ => {
                tracing::warn!(state = %self.state, "Health check failed");
                self.reconnect()
            }
        }
    }

    fn reconnect(&mut self) -> Vec<Action> {
        tracing::info!(server = %self.config.server, "Reconnecting");
        self.state = State::Connecting { reconnect: true };
        self.nick = self.config.nick.clone();
        vec![Action::Connect]
    }

    fn on_message(&mut self, from: &str, target: &str, text: &[u8]) -> Vec<Action> {
        if self.state != State::Ready || !is_channel(target) {
            return Vec::new();
        }

        let decoder = self.config.decoder;
        let msg = match normalize_live(text, from, &self.nick, &self.config.filter, &decoder) {
            Ok(Some(msg)) => msg,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::info!(%from, %target, reason = %e, "Undecodable message");
                return vec![self.say(target, from, &e.reason)];
            }
        };

        if msg.trainable
            && let Err(e) = self.engine.train(&msg.payload)
        {
            tracing::error!(error = %e, "Training failed");
        }

        let draw = policy::draw(&mut self.rng);
        if !policy::should_reply(&msg.raw_text, &self.nick, self.config.random_reply_percent, draw) {
            return Vec::new();
        }

        match self.engine.reply(&msg.payload) {
            Ok(reply) => vec![self.say(target, from, &reply)],
            Err(e) => {
                tracing::error!(error = %e, "Reply failed");
                Vec::new()
            }
        }
    }

    fn say(&self, target: &str, to: &str, text: &str) -> Action {
        Action::Say {
            target: target.to_string(),
            text: self.config.decoder.encode(&format!("{to}: {text}")),
        }
    }
}
