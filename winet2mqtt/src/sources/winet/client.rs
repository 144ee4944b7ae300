//! Async driver around [`Session`]: owns the websocket, the scan and watchdog
//! timers and the reconnect backoff. Everything runs on one task, so the
//! session is never touched concurrently.

use super::config::WinetConfig;
use super::properties::Properties;
use super::session::{Command, Session, SessionError};
use super::tls::relaxed_client_config;
use crate::diagnostics::{ReconnectReason, Reporter};
use crate::targets::metric_publisher::MetricPublisher;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{interval_at, sleep, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

/// Reconnect backoff in poll periods.
const BACKOFF_PERIODS: u32 = 3;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
}

pub struct WinetClient {
    config: WinetConfig,
    ssl: bool,
    session: Session,
    publishers: Vec<Box<dyn MetricPublisher>>,
}

impl WinetClient {
    pub fn new(
        config: WinetConfig,
        properties: Properties,
        ssl: bool,
        reporter: Box<dyn Reporter>,
        publishers: Vec<Box<dyn MetricPublisher>>,
    ) -> Self {
        let session = Session::new(&config, properties, reporter);
        Self {
            config,
            ssl,
            session,
            publishers,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Polls forever. Only returns when the login is rejected and
    /// `exit_on_auth_failure` is set.
    pub async fn run(&mut self) -> Result<(), ClientError> {
        let backoff = self.config.frequency() * BACKOFF_PERIODS;
        loop {
            let reason = match self.connect_and_poll().await {
                Ok(reason) => reason,
                Err(ClientError::Session(e)) => {
                    if self.config.exit_on_auth_failure {
                        return Err(e.into());
                    }
                    error!("{e}");
                    ReconnectReason::AuthRejected
                }
                Err(e) => {
                    error!("Winet connection failed: {e}");
                    self.session.report_error("connection", &e.to_string());
                    ReconnectReason::Transport
                }
            };

            warn!("Reconnecting to Winet ({reason}) in {}s", backoff.as_secs());
            self.session.report_reconnect(reason);
            self.session.reset();
            sleep(backoff).await;
        }
    }

    /// One connection lifetime. Returns why it ended.
    async fn connect_and_poll(&mut self) -> Result<ReconnectReason, ClientError> {
        let url = self.config.endpoint(self.ssl);
        let connector = if self.ssl {
            Some(Connector::Rustls(relaxed_client_config()?))
        } else {
            None
        };

        self.session.on_connecting();
        info!("Connecting to {url}");
        let (stream, _) = connect_async_tls_with_config(url.as_str(), None, false, connector).await?;
        let (mut sink, mut stream) = stream.split();

        let commands = self.session.on_open(Instant::now());
        if let Some(reason) = self.execute(commands, &mut sink).await? {
            return Ok(reason);
        }

        // both timers die with this connection
        let period = self.config.frequency();
        let start = tokio::time::Instant::now() + period;
        let mut scan_timer = interval_at(start, period);
        let mut watchdog_timer = interval_at(start, period);
        scan_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        watchdog_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let commands = tokio::select! {
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => self.session.on_frame(&text, Instant::now())?,
                    Some(Ok(Message::Close(frame))) => {
                        warn!("Winet closed the connection: {frame:?}");
                        return Ok(ReconnectReason::Transport);
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        error!("Websocket error: {e}");
                        self.session.report_error("websocket", &e.to_string());
                        return Ok(ReconnectReason::Transport);
                    }
                    None => return Ok(ReconnectReason::Transport),
                },
                _ = scan_timer.tick() => self.session.on_scan_timer(),
                _ = watchdog_timer.tick() => self.session.on_watchdog_timer(Instant::now()),
            };

            if let Some(reason) = self.execute(commands, &mut sink).await? {
                if let Err(e) = sink.close().await {
                    debug!("error while closing websocket: {e}");
                }
                return Ok(reason);
            }
        }
    }

    async fn execute(
        &mut self,
        commands: Vec<Command>,
        sink: &mut WsSink,
    ) -> Result<Option<ReconnectReason>, ClientError> {
        for command in commands {
            match command {
                Command::Send(request) => {
                    let packet = self.session.packet(&request);
                    debug!("sending {packet}");
                    sink.send(Message::Text(packet.to_string())).await?;
                }
                Command::RoundComplete => self.publish(),
                Command::Reconnect(reason) => return Ok(Some(reason)),
            }
        }
        Ok(None)
    }

    fn publish(&mut self) {
        let devices = self.session.devices();
        let status = self.session.status();
        debug!(
            "Round complete: {} devices, {} updated readings",
            devices.len(),
            status.dirty_count()
        );
        for publisher in self.publishers.iter_mut() {
            publisher.publish(devices, status);
        }
        self.session.mark_delivered();
    }
}
