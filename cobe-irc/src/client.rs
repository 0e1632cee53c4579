//! IRC client connection.
//!
//! Manages the TCP (optionally TLS) connection, IRC registration and the
//! PING keepalive, and emits [`Event`]s. Commands sent through a
//! [`ClientHandle`] before registration completes are queued and flushed
//! once the server accepts us (001).
//!
//! ## Reconnection
//!
//! The client does not reconnect on its own. Consumers watch for
//! [`Event::Disconnected`] or poll [`ClientHandle::is_connected`] and call
//! [`establish_connection`] again when they want a fresh connection.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls;

use crate::event::Event;
use crate::irc::Message;

/// How many alternate nicks to try on ERR_NICKNAMEINUSE before giving up.
const MAX_NICK_TRIES: u32 = 5;

/// Idle time before we PING the server.
const PING_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);
/// Silence after which the connection is considered dead.
const PING_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(120);

/// Configuration for connecting to an IRC server.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Server address (host:port).
    pub server_addr: String,
    /// Desired nickname.
    pub nick: String,
    /// Username (ident).
    pub user: String,
    /// Real name.
    pub realname: String,
    /// Server password, sent as PASS before registration.
    pub password: Option<String>,
    /// Use TLS.
    pub tls: bool,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:6667".to_string(),
            nick: "cobe".to_string(),
            user: "cobe".to_string(),
            realname: "cobe".to_string(),
            password: None,
            tls: false,
        }
    }
}

/// Commands the consumer can send to the client.
#[derive(Debug)]
pub enum Command {
    Join { channel: String, key: Option<String> },
    Privmsg { target: String, text: Vec<u8> },
    Quit(Option<String>),
}

/// A handle to a running IRC client connection.
#[derive(Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl ClientHandle {
    pub async fn join(&self, channel: &str, key: Option<&str>) -> Result<()> {
        self.cmd_tx
            .send(Command::Join {
                channel: channel.to_string(),
                key: key.map(|k| k.to_string()),
            })
            .await?;
        Ok(())
    }

    /// Send a PRIVMSG. `text` is already encoded for the wire.
    pub async fn privmsg(&self, target: &str, text: &[u8]) -> Result<()> {
        self.cmd_tx
            .send(Command::Privmsg {
                target: target.to_string(),
                text: text.to_vec(),
            })
            .await?;
        Ok(())
    }

    pub async fn quit(&self, message: Option<&str>) -> Result<()> {
        self.cmd_tx
            .send(Command::Quit(message.map(|s| s.to_string())))
            .await?;
        Ok(())
    }

    /// Whether the protocol task is still running.
    ///
    /// The task owns the command receiver and drops it when the connection
    /// ends for any reason (EOF, ping timeout, I/O error, QUIT).
    pub fn is_connected(&self) -> bool {
        !self.cmd_tx.is_closed()
    }
}

/// A connection that has completed TCP (and optionally TLS) but hasn't
/// started IRC registration yet.
pub enum EstablishedConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

/// Establish TCP (and optionally TLS) connection to the server.
///
/// Kept separate from [`connect_with_stream`] so connection errors surface
/// to the caller directly instead of as a later `Disconnected` event.
pub async fn establish_connection(config: &ConnectConfig) -> Result<EstablishedConnection> {
    // Auto-detect TLS from port if not explicitly set
    let use_tls = config.tls || config.server_addr.ends_with(":6697");
    let mode = if use_tls { "TLS" } else { "plain" };

    tracing::debug!("Resolving {}...", config.server_addr);
    let tcp = TcpStream::connect(&config.server_addr)
        .await
        .map_err(|e| anyhow::anyhow!("TCP connect to {} failed: {e}", config.server_addr))?;
    tracing::debug!("TCP connected to {} ({mode})", config.server_addr);

    if !use_tls {
        return Ok(EstablishedConnection::Plain(tcp));
    }

    let connector = TlsConnector::from(Arc::new(rustls_default_config()));
    let host = config.server_addr.split(':').next().unwrap_or("localhost");
    let dns_name = rustls::pki_types::ServerName::try_from(host.to_string())?;
    let tls_stream = connector
        .connect(dns_name, tcp)
        .await
        .map_err(|e| anyhow::anyhow!("TLS handshake with {} failed: {e}", config.server_addr))?;
    tracing::debug!("TLS handshake complete");
    Ok(EstablishedConnection::Tls(Box::new(tls_stream)))
}

/// Run the IRC protocol over an already-established connection.
///
/// Returns a handle for sending commands and a receiver for events.
/// The protocol runs in a spawned task.
pub fn connect_with_stream(
    conn: EstablishedConnection,
    config: ConnectConfig,
) -> (ClientHandle, mpsc::Receiver<Event>) {
    let (event_tx, event_rx) = mpsc::channel(4096);
    let (cmd_tx, cmd_rx) = mpsc::channel(256);

    let handle = ClientHandle { cmd_tx };

    tokio::spawn(async move {
        let _ = event_tx.send(Event::Connected).await;
        let result = match conn {
            EstablishedConnection::Plain(tcp) => {
                let (reader, writer) = tokio::io::split(tcp);
                run_irc(BufReader::new(reader), writer, &config, event_tx.clone(), cmd_rx).await
            }
            EstablishedConnection::Tls(tls) => {
                let (reader, writer) = tokio::io::split(*tls);
                run_irc(BufReader::new(reader), writer, &config, event_tx.clone(), cmd_rx).await
            }
        };
        if let Err(e) = result {
            let _ = event_tx
                .send(Event::Disconnected {
                    reason: e.to_string(),
                })
                .await;
        }
    });

    (handle, event_rx)
}

fn install_crypto_provider() {
    #[cfg(feature = "ring")]
    {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }
    #[cfg(all(feature = "aws-lc-rs", not(feature = "ring")))]
    {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }
}

fn rustls_default_config() -> rustls::ClientConfig {
    install_crypto_provider();

    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

async fn run_irc<R, W>(
    mut reader: R,
    mut writer: W,
    config: &ConnectConfig,
    event_tx: mpsc::Sender<Event>,
    mut cmd_rx: mpsc::Receiver<Command>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if let Some(password) = &config.password {
        send(&mut writer, &Message::new("PASS", vec![password.as_bytes().to_vec()])).await?;
    }
    send(&mut writer, &Message::new("NICK", vec![config.nick.as_bytes().to_vec()])).await?;
    send(
        &mut writer,
        &Message::new(
            "USER",
            vec![
                config.user.as_bytes().to_vec(),
                b"0".to_vec(),
                b"*".to_vec(),
                config.realname.as_bytes().to_vec(),
            ],
        ),
    )
    .await?;

    let mut registered = false;
    let mut nick_tries: u32 = 0;
    let mut pending_commands: Vec<Command> = Vec::new();
    let mut line_buf: Vec<u8> = Vec::new();
    let mut last_activity = tokio::time::Instant::now();
    let mut next_ping = last_activity + PING_INTERVAL;

    loop {
        tokio::select! {
            result = reader.read_until(b'\n', &mut line_buf) => {
                let n = result?;
                if n == 0 {
                    let _ = event_tx.send(Event::Disconnected { reason: "EOF".to_string() }).await;
                    break;
                }

                last_activity = tokio::time::Instant::now();
                next_ping = last_activity + PING_INTERVAL;
                tracing::trace!(line = %String::from_utf8_lossy(&line_buf).trim_end(), "<<");

                if let Some(msg) = Message::parse(&line_buf) {
                    match msg.command.as_str() {
                        // ERR_NICKNAMEINUSE
                        "433" if !registered => {
                            nick_tries += 1;
                            if nick_tries > MAX_NICK_TRIES {
                                let _ = event_tx.send(Event::Disconnected { reason: "Nick in use".to_string() }).await;
                                break;
                            }
                            let alt = format!("{}{}", config.nick, nick_tries);
                            tracing::info!(nick = %alt, "Nick in use, trying alternate");
                            send(&mut writer, &Message::new("NICK", vec![alt.into_bytes()])).await?;
                        }
                        "001" => {
                            let nick = msg.param(0).unwrap_or_default().into_owned();
                            let _ = event_tx.send(Event::Registered { nick }).await;
                            registered = true;
                            // Flush any commands that were queued before registration
                            for cmd in pending_commands.drain(..) {
                                execute_command(&mut writer, cmd).await?;
                            }
                        }
                        // RPL_ENDOFMOTD / ERR_NOMOTD
                        "376" | "422" => {
                            let _ = event_tx.send(Event::MotdEnd).await;
                        }
                        "PING" => {
                            let token = msg.param_bytes(0).unwrap_or_default().to_vec();
                            send(&mut writer, &Message::new("PONG", vec![token])).await?;
                        }
                        "JOIN" => {
                            let channel = msg.param(0).unwrap_or_default().into_owned();
                            let nick = msg.source_nick().unwrap_or_default().to_string();
                            let _ = event_tx.send(Event::Joined { channel, nick }).await;
                        }
                        "NICK" => {
                            let old_nick = msg.source_nick().unwrap_or_default().to_string();
                            let new_nick = msg.param(0).unwrap_or_default().into_owned();
                            if !old_nick.is_empty() && !new_nick.is_empty() {
                                let _ = event_tx.send(Event::NickChanged { old_nick, new_nick }).await;
                            }
                        }
                        "PRIVMSG" => {
                            if let (Some(from), Some(target), Some(text)) =
                                (msg.source_nick(), msg.param(0), msg.param_bytes(1))
                            {
                                let _ = event_tx.send(Event::Message {
                                    from: from.to_string(),
                                    target: target.into_owned(),
                                    text: text.to_vec(),
                                }).await;
                            }
                        }
                        // Server NOTICE (no hostmask in prefix). User notices are
                        // never answered by bots, so they are not surfaced.
                        "NOTICE" => {
                            let from_server = msg.prefix.as_deref().is_none_or(|p| !p.contains('!'));
                            if from_server {
                                let text = msg.param(1).unwrap_or_default().into_owned();
                                let _ = event_tx.send(Event::ServerNotice { text }).await;
                            }
                        }
                        "ERROR" => {
                            let text = msg.param(0).unwrap_or_default().into_owned();
                            let _ = event_tx.send(Event::ServerNotice { text }).await;
                        }
                        other => {
                            if let Ok(num) = other.parse::<u16>()
                                && (400..600).contains(&num)
                            {
                                // Skip our nick (param[0]) and join the rest
                                let text = msg.params.iter().skip(1)
                                    .map(|p| String::from_utf8_lossy(p).into_owned())
                                    .collect::<Vec<_>>()
                                    .join(" ");
                                let _ = event_tx.send(Event::ServerNotice { text: format!("{num} {text}") }).await;
                            }
                        }
                    }
                }

                line_buf.clear();
            }
            Some(cmd) = cmd_rx.recv() => {
                let quitting = matches!(cmd, Command::Quit(_));
                if registered || quitting {
                    execute_command(&mut writer, cmd).await?;
                    if quitting {
                        break;
                    }
                } else {
                    // Queue until registered
                    pending_commands.push(cmd);
                }
            }
            // Periodic client-to-server PING and timeout detection
            _ = tokio::time::sleep_until(next_ping) => {
                if last_activity.elapsed() > PING_TIMEOUT {
                    let _ = event_tx.send(Event::Disconnected { reason: "Ping timeout".to_string() }).await;
                    break;
                }
                send(&mut writer, &Message::new("PING", vec![b"keepalive".to_vec()])).await?;
                next_ping = tokio::time::Instant::now() + PING_INTERVAL;
            }
        }
    }

    Ok(())
}

/// Execute a single IRC command on the wire.
async fn execute_command<W: AsyncWrite + Unpin>(writer: &mut W, cmd: Command) -> Result<()> {
    let msg = match cmd {
        Command::Join { channel, key } => {
            let mut params = vec![channel.into_bytes()];
            if let Some(key) = key.filter(|k| !k.is_empty()) {
                params.push(key.into_bytes());
            }
            Message::new("JOIN", params)
        }
        Command::Privmsg { target, text } => Message::new("PRIVMSG", vec![target.into_bytes(), text]),
        Command::Quit(reason) => Message::new("QUIT", reason.map(String::into_bytes).into_iter().collect()),
    };
    send(writer, &msg).await
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, msg: &Message) -> Result<()> {
    let mut line = msg.to_bytes();
    tracing::trace!(line = %String::from_utf8_lossy(&line), ">>");
    line.extend_from_slice(b"\r\n");
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
