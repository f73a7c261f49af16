//! Streaming transport abstraction.
//!
//! Mirrors the split between [`crate::http_client::HttpClient`] and its noop
//! double: streaming adapters talk to a [`StreamTransport`] so the websocket
//! machinery stays out of provider parsing code and tests can script inbound
//! frames deterministically.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::rate_source::SourceError;

/// Persistent-connection transport yielding raw text frames.
///
/// `connect` establishes the connection, sends the subscribe payload, and
/// returns the inbound frame channel. The channel closing means the
/// connection dropped; the caller owns reconnection.
pub trait StreamTransport: Send + Sync {
    fn connect<'a>(
        &'a self,
        url: &'a str,
        subscribe_payload: String,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<String>, SourceError>> + Send + 'a>>;

    /// `true` for offline test doubles.
    fn is_mock(&self) -> bool {
        false
    }
}

const FRAME_CHANNEL_CAPACITY: usize = 256;

/// Production websocket transport.
#[derive(Debug, Default)]
pub struct WebSocketTransport;

impl StreamTransport for WebSocketTransport {
    fn connect<'a>(
        &'a self,
        url: &'a str,
        subscribe_payload: String,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<String>, SourceError>> + Send + 'a>>
    {
        Box::pin(async move {
            let (socket, _response) = tokio_tungstenite::connect_async(url)
                .await
                .map_err(|error| {
                    SourceError::unavailable(format!("websocket connect failed: {error}"))
                })?;

            let (mut sink, mut source) = socket.split();
            sink.send(Message::Text(subscribe_payload))
                .await
                .map_err(|error| {
                    SourceError::unavailable(format!("websocket subscribe failed: {error}"))
                })?;

            let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
            tokio::spawn(async move {
                while let Some(frame) = source.next().await {
                    match frame {
                        Ok(Message::Text(text)) => {
                            if tx.send(text).await.is_err() {
                                break;
                            }
                        }
                        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_))
                        | Ok(Message::Frame(_)) => {}
                        Ok(Message::Close(_)) | Err(_) => break,
                    }
                }
                // Dropping tx closes the frame channel and signals disconnect.
            });

            Ok(rx)
        })
    }
}

/// Offline transport that plays back a fixed frame script, then disconnects.
#[derive(Debug, Clone)]
pub struct ScriptedTransport {
    frames: Vec<String>,
    frame_interval: Duration,
}

impl ScriptedTransport {
    pub fn new(frames: Vec<String>) -> Self {
        Self {
            frames,
            frame_interval: Duration::from_millis(5),
        }
    }

    pub fn with_frame_interval(mut self, frame_interval: Duration) -> Self {
        self.frame_interval = frame_interval;
        self
    }
}

impl StreamTransport for ScriptedTransport {
    fn connect<'a>(
        &'a self,
        _url: &'a str,
        _subscribe_payload: String,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<String>, SourceError>> + Send + 'a>>
    {
        let frames = self.frames.clone();
        let frame_interval = self.frame_interval;
        Box::pin(async move {
            let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
            tokio::spawn(async move {
                for frame in frames {
                    tokio::time::sleep(frame_interval).await;
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                }
            });
            Ok(rx)
        })
    }

    fn is_mock(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_transport_plays_frames_then_closes() {
        let transport = ScriptedTransport::new(vec![
            String::from("frame-1"),
            String::from("frame-2"),
        ])
        .with_frame_interval(Duration::ZERO);

        let mut rx = transport
            .connect("wss://example.test/stream", String::from("{}"))
            .await
            .expect("scripted connect never fails");

        assert_eq!(rx.recv().await.as_deref(), Some("frame-1"));
        assert_eq!(rx.recv().await.as_deref(), Some("frame-2"));
        assert!(rx.recv().await.is_none());
    }
}
