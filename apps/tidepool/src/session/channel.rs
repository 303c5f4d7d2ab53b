/// Websocket channel to the runner server.
///
/// Owns the connection lifecycle: connect, pump frames both ways, and on
/// loss emit a disconnect notice, wait the configured delay, reconnect. The
/// consumer re-issues its steady-state subscriptions on every `Connected`
/// notice; in-flight sessions are not resumed. Command senders are cheap
/// clones handed to consumers; only the owning `ServerChannel` can close.
use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use crate::protocol::codec;
use crate::protocol::messages::{ClientCommand, ServerEvent};

/// What the consumer sees: decoded events bracketed by connectivity notices.
#[derive(Debug)]
pub enum ChannelNotice {
    Connected,
    Event(ServerEvent),
    Disconnected,
}

/// Cloneable outbound handle. Consumers send through this and cannot close
/// the underlying connection.
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<ClientCommand>,
}

impl CommandSender {
    pub fn send(&self, command: ClientCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| anyhow::anyhow!("server channel is closed"))
    }
}

pub struct ServerChannel {
    tx: mpsc::UnboundedSender<ClientCommand>,
    notices: mpsc::UnboundedReceiver<ChannelNotice>,
    supervisor: JoinHandle<()>,
}

impl ServerChannel {
    /// Connect to the server. The first connection is awaited so startup
    /// failures surface to the caller; later drops are handled by the
    /// reconnect loop.
    pub async fn connect(url: Url, reconnect_delay: Duration) -> Result<Self> {
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        let (tx, rx_out) = mpsc::unbounded_channel::<ClientCommand>();
        let (tx_notice, notices) = mpsc::unbounded_channel::<ChannelNotice>();
        let supervisor = tokio::spawn(supervise(
            url,
            ws_stream,
            rx_out,
            tx_notice,
            reconnect_delay,
        ));
        Ok(Self {
            tx,
            notices,
            supervisor,
        })
    }

    pub fn sender(&self) -> CommandSender {
        CommandSender {
            tx: self.tx.clone(),
        }
    }

    pub fn send(&self, command: ClientCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| anyhow::anyhow!("server channel is closed"))
    }

    /// Next notice, in arrival order. `None` after `close`.
    pub async fn recv(&mut self) -> Option<ChannelNotice> {
        self.notices.recv().await
    }

    /// Tear the channel down. Consumes the handle: clones of the command
    /// sender cannot do this.
    pub async fn close(self) {
        let Self {
            tx, supervisor, ..
        } = self;
        supervisor.abort();
        drop(tx);
        let _ = supervisor.await;
    }
}

async fn supervise(
    url: Url,
    first: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut rx_out: mpsc::UnboundedReceiver<ClientCommand>,
    tx_notice: mpsc::UnboundedSender<ChannelNotice>,
    reconnect_delay: Duration,
) {
    let mut stream = Some(first);
    loop {
        let ws_stream = match stream.take() {
            Some(ready) => ready,
            None => match connect_async(url.as_str()).await {
                Ok((connected, _)) => connected,
                Err(err) => {
                    warn!(
                        target: "tidepool::channel",
                        error = %err,
                        "reconnect attempt failed; retrying"
                    );
                    tokio::time::sleep(reconnect_delay).await;
                    continue;
                }
            },
        };
        if tx_notice.send(ChannelNotice::Connected).is_err() {
            return;
        }
        pump(ws_stream, &mut rx_out, &tx_notice).await;
        if tx_notice.send(ChannelNotice::Disconnected).is_err() {
            return;
        }
        tokio::time::sleep(reconnect_delay).await;
    }
}

/// Forward outbound commands and decode inbound frames until the socket
/// drops. Malformed or unclassifiable frames are logged and dropped; they
/// never take the channel down.
async fn pump(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    rx_out: &mut mpsc::UnboundedReceiver<ClientCommand>,
    tx_notice: &mpsc::UnboundedSender<ChannelNotice>,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    loop {
        tokio::select! {
            command = rx_out.recv() => {
                let Some(command) = command else { return };
                match codec::encode_command(&command) {
                    Ok(json) => {
                        if ws_sender.send(Message::Text(json)).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        warn!(target: "tidepool::channel", error = %err, "dropping unencodable command");
                    }
                }
            }
            frame = ws_receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match codec::decode_event(&text) {
                        Ok(event) => {
                            if tx_notice.send(ChannelNotice::Event(event)).is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            warn!(target: "tidepool::channel", error = %err, "dropping bad frame");
                        }
                    },
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                    Some(Ok(other)) => {
                        debug!(target: "tidepool::channel", frame = ?other, "ignoring non-text frame");
                    }
                }
            }
        }
    }
}
