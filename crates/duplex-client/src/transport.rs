//! WebSocket client for one voice session.
//!
//! The connection is full duplex: [`VoiceClient::split`] yields a sender and
//! a receiver that can live in different tasks, so microphone frames keep
//! flowing while the reply streams back.

use crate::error::ClientError;
use crate::pcm::EncodedFrame;
use duplex_types::{ClientMessage, ServerMessage};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::error::{Error as WsError, ProtocolError};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outbound half of a session.
pub struct VoiceSender {
    sink: SplitSink<Socket, Message>,
    uplink_open: bool,
}

/// Inbound half of a session.
pub struct VoiceReceiver {
    stream: SplitStream<Socket>,
    session_id: Option<String>,
}

pub struct VoiceClient {
    sender: VoiceSender,
    receiver: VoiceReceiver,
}

impl VoiceClient {
    /// Opens a session at `url` (for example `ws://127.0.0.1:8080/ws`).
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (socket, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ClientError::Connect(e.to_string()))?;
        tracing::debug!(url, "voice session connected");
        let (sink, stream) = socket.split();
        Ok(Self {
            sender: VoiceSender {
                sink,
                uplink_open: true,
            },
            receiver: VoiceReceiver {
                stream,
                session_id: None,
            },
        })
    }

    pub fn split(self) -> (VoiceSender, VoiceReceiver) {
        (self.sender, self.receiver)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.receiver.session_id()
    }

    pub async fn send_audio(&mut self, audio: impl Into<String>) -> Result<(), ClientError> {
        self.sender.send_audio(audio).await
    }

    pub async fn send_frame(&mut self, frame: &EncodedFrame) -> Result<(), ClientError> {
        self.sender.send_frame(frame).await
    }

    pub async fn interrupt(&mut self) -> Result<(), ClientError> {
        self.sender.interrupt().await
    }

    pub async fn end_session(&mut self) -> Result<(), ClientError> {
        self.sender.end_session().await
    }

    pub fn finish_audio(&mut self) {
        self.sender.finish_audio();
    }

    pub async fn next_event(&mut self) -> Result<Option<ServerMessage>, ClientError> {
        self.receiver.next_event().await
    }
}

impl VoiceSender {
    /// Sends one base64 PCM frame.
    pub async fn send_audio(&mut self, audio: impl Into<String>) -> Result<(), ClientError> {
        if !self.uplink_open {
            return Err(ClientError::UplinkClosed);
        }
        self.send(&ClientMessage::AudioChunk {
            audio: audio.into(),
        })
        .await
    }

    pub async fn send_frame(&mut self, frame: &EncodedFrame) -> Result<(), ClientError> {
        self.send_audio(frame.audio.clone()).await
    }

    /// Asks the server to abandon the reply in progress.
    pub async fn interrupt(&mut self) -> Result<(), ClientError> {
        self.send(&ClientMessage::Interrupt).await
    }

    /// Ends the session; the server closes the connection afterwards.
    pub async fn end_session(&mut self) -> Result<(), ClientError> {
        self.uplink_open = false;
        self.send(&ClientMessage::SessionEnd).await
    }

    /// Stops the audio uplink while the reply keeps streaming.
    ///
    /// Control messages are still accepted; further audio is rejected with
    /// [`ClientError::UplinkClosed`].
    pub fn finish_audio(&mut self) {
        self.uplink_open = false;
    }

    pub fn uplink_open(&self) -> bool {
        self.uplink_open
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        let text = serde_json::to_string(message)?;
        self.sink.send(Message::Text(text.into())).await?;
        Ok(())
    }

    pub async fn close(&mut self) -> Result<(), ClientError> {
        self.sink.close().await?;
        Ok(())
    }
}

impl VoiceReceiver {
    /// Id announced by `connection.established`, once received.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Waits for the next server message.
    ///
    /// Returns `Ok(None)` once the server closes the session. Frames that do
    /// not parse are logged and skipped.
    pub async fn next_event(&mut self) -> Result<Option<ServerMessage>, ClientError> {
        while let Some(frame) = self.stream.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(WsError::ConnectionClosed)
                | Err(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)) => {
                    return Ok(None)
                }
                Err(e) => return Err(e.into()),
            };
            match frame {
                Message::Text(text) => match serde_json::from_str::<ServerMessage>(text.as_str()) {
                    Ok(message) => {
                        if let ServerMessage::ConnectionEstablished { session_id, .. } = &message {
                            self.session_id = Some(session_id.clone());
                        }
                        return Ok(Some(message));
                    }
                    Err(e) => {
                        tracing::warn!("skipping unparseable server frame: {}", e);
                    }
                },
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }
}
