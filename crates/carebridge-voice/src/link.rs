use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Frames buffered in each direction before senders wait.
pub const LINK_CAPACITY: usize = 256;

/// A duplex text channel to one upstream.
///
/// Sending on `tx` writes a frame; `rx` yields frames received from the
/// peer and returns `None` once the peer has gone away. Dropping the link
/// closes the connection.
#[derive(Debug)]
pub struct Link {
    pub tx: mpsc::Sender<String>,
    pub rx: mpsc::Receiver<String>,
}

impl Link {
    /// Two links wired back to back, for in-process peers.
    pub fn pair(capacity: usize) -> (Link, Link) {
        let (near_tx, far_rx) = mpsc::channel(capacity);
        let (far_tx, near_rx) = mpsc::channel(capacity);
        (
            Link {
                tx: near_tx,
                rx: near_rx,
            },
            Link {
                tx: far_tx,
                rx: far_rx,
            },
        )
    }
}

/// Pumps a websocket through a [`Link`].
///
/// Two tasks are spawned: one writes frames queued on the link, one
/// forwards received text frames. Binary frames are ignored. The link's
/// receiver ends when the peer closes or the socket errors.
pub fn spawn_ws_link<S>(ws: WebSocketStream<S>, upstream: &'static str) -> Link
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(LINK_CAPACITY);
    let (in_tx, in_rx) = mpsc::channel::<String>(LINK_CAPACITY);

    tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                tracing::warn!(upstream, error = %e, "upstream write failed");
                break;
            }
        }
        let _ = sink.close().await;
    });

    tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if in_tx.send(text.as_str().to_owned()).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(reason)) => {
                    tracing::debug!(upstream, ?reason, "upstream closed");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(upstream, error = %e, "upstream read failed");
                    break;
                }
            }
        }
    });

    Link {
        tx: out_tx,
        rx: in_rx,
    }
}
