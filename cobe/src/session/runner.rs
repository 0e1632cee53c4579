//! Drives a [`Session`] against a real IRC connection.
//!
//! One task owns the session. It waits on the client's event channel, the
//! single health-check deadline and the shutdown signal, feeds whatever
//! arrives into [`Session::handle`], and performs the returned actions in
//! order.

use std::collections::VecDeque;
use std::future::{self, Future};
use std::time::Duration;

use anyhow::{Result, anyhow};
use cobe_irc::client::{self, ClientHandle, ConnectConfig};
use cobe_irc::event::Event;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{Action, Input, Session};
use crate::engine::Engine;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// How long to wait for the server to see our QUIT.
const QUIT_GRACE: Duration = Duration::from_secs(2);
const QUIT_MESSAGE: &str = "Bye";

enum Wake {
    Shutdown,
    Event(Option<Event>),
    HealthCheck,
}

/// Run until `shutdown` resolves or the first connection attempt fails.
pub async fn run<E, R, S>(mut session: Session<E, R>, shutdown: S) -> Result<()>
where
    E: Engine,
    R: Rng,
    S: Future<Output = ()>,
{
    let connect_config = session.config().connect_config();
    let mut handle: Option<ClientHandle> = None;
    let mut events: Option<mpsc::Receiver<Event>> = None;
    let mut deadline: Option<Instant> = None;
    let mut actions: VecDeque<Action> = session.start().into();
    tokio::pin!(shutdown);

    loop {
        while let Some(action) = actions.pop_front() {
            match action {
                Action::Connect => {
                    if let Some(old) = handle.take() {
                        let _ = old.quit(None).await;
                    }
                    events = None;
                    tracing::info!(
                        server = %connect_config.server_addr,
                        nick = %connect_config.nick,
                        "Connecting"
                    );
                    let attempt = tokio::select! {
                        biased;
                        _ = &mut shutdown => None,
                        result = connect(&connect_config) => Some(result),
                    };
                    let Some(result) = attempt else {
                        return shut_down(None, None).await;
                    };
                    let input = match result {
                        Ok((h, rx)) => {
                            handle = Some(h);
                            events = Some(rx);
                            Input::Connected
                        }
                        Err(e) => Input::ConnectFailed {
                            reason: format!("{e:#}"),
                        },
                    };
                    actions.extend(session.handle(input));
                }
                Action::Join(join) => {
                    let Some(h) = &handle else { continue };
                    tracing::info!(channel = %join.channel, "Joining");
                    if let Err(e) = h.join(&join.channel, join.key.as_deref()).await {
                        tracing::warn!(channel = %join.channel, error = %e, "Join failed");
                    }
                }
                Action::Say { target, text } => {
                    let Some(h) = &handle else { continue };
                    if let Err(e) = h.privmsg(&target, &text).await {
                        tracing::warn!(%target, error = %e, "Send failed");
                    }
                }
                Action::ScheduleHealthCheck(after) => {
                    deadline = Some(Instant::now() + after);
                }
                Action::Fail(reason) => {
                    return Err(anyhow!(
                        "can't connect to {}: {reason}",
                        connect_config.server_addr
                    ));
                }
            }
        }

        let wake = tokio::select! {
            _ = &mut shutdown => Wake::Shutdown,
            event = next_event(&mut events) => Wake::Event(event),
            _ = expire(deadline) => Wake::HealthCheck,
        };

        let input = match wake {
            Wake::Shutdown => return shut_down(handle, events).await,
            Wake::HealthCheck => {
                deadline = None;
                Input::HealthCheck {
                    live: handle.as_ref().is_some_and(ClientHandle::is_connected),
                }
            }
            // The client task ended without saying why.
            Wake::Event(None) => {
                events = None;
                Input::Disconnected {
                    reason: "connection closed".to_string(),
                }
            }
            Wake::Event(Some(event)) => match to_input(event, session.nick()) {
                Some(input) => input,
                None => continue,
            },
        };
        actions.extend(session.handle(input));
    }
}

/// Send QUIT and give the server a moment to close the connection.
async fn shut_down(
    handle: Option<ClientHandle>,
    events: Option<mpsc::Receiver<Event>>,
) -> Result<()> {
    tracing::info!("Shutting down");
    if let Some(h) = handle {
        let _ = h.quit(Some(QUIT_MESSAGE)).await;
    }
    if let Some(mut rx) = events {
        let _ = tokio::time::timeout(QUIT_GRACE, async {
            while rx.recv().await.is_some() {}
        })
        .await;
    }
    Ok(())
}

async fn connect(config: &ConnectConfig) -> Result<(ClientHandle, mpsc::Receiver<Event>)> {
    let conn = tokio::time::timeout(CONNECT_TIMEOUT, client::establish_connection(config))
        .await
        .map_err(|_| anyhow!("timed out after {}s", CONNECT_TIMEOUT.as_secs()))??;
    Ok(client::connect_with_stream(conn, config.clone()))
}

async fn next_event(events: &mut Option<mpsc::Receiver<Event>>) -> Option<Event> {
    match events {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => future::pending().await,
    }
}

/// Map a client event to a session input. Events the session does not act
/// on are logged here and dropped.
fn to_input(event: Event, our_nick: &str) -> Option<Input> {
    match event {
        // Fed by the runner as soon as the transport is up.
        Event::Connected => None,
        Event::Registered { nick } => Some(Input::Registered { nick }),
        Event::MotdEnd => Some(Input::HandshakeComplete),
        Event::Joined { channel, nick } => {
            if nick.eq_ignore_ascii_case(our_nick) {
                tracing::info!(%channel, "Joined");
            }
            None
        }
        Event::Message { from, target, text } => Some(Input::Message { from, target, text }),
        Event::NickChanged { old_nick, new_nick } => Some(Input::NickChanged { old_nick, new_nick }),
        Event::ServerNotice { text } => {
            tracing::info!(%text, "Server notice");
            None
        }
        Event::Disconnected { reason } => Some(Input::Disconnected { reason }),
    }
}
