//! Websocket connection to the relay.

use std::time::Duration;

use frames::{FRAME_CODE, Frame, Status};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use control::protocol::{Command, syscall};

use crate::CliError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct Connection {
    stream: Stream,
    welcome: Frame,
}

impl Connection {
    /// Connect and wait for `session:connected`.
    pub async fn open(base_url: &str) -> Result<Self, CliError> {
        let url = ws_url(base_url)?;
        let (mut stream, _) = connect_async(url).await.map_err(|error| CliError::WsConnect(Box::new(error)))?;
        let welcome = loop {
            let frame = recv_next(&mut stream, Some(CONNECT_TIMEOUT)).await?;
            if frame.syscall == syscall::SESSION_CONNECTED {
                break frame;
            }
        };
        Ok(Self { stream, welcome })
    }

    /// The `session:connected` frame this connection opened with.
    pub fn welcome(&self) -> &Frame {
        &self.welcome
    }

    pub async fn send(&mut self, frame: &Frame) -> Result<(), CliError> {
        self.stream
            .send(Message::Binary(frames::encode_frame(frame).into()))
            .await
            .map_err(|error| CliError::WsConnect(Box::new(error)))
    }

    /// Next frame, waiting indefinitely.
    pub async fn recv(&mut self) -> Result<Frame, CliError> {
        recv_next(&mut self.stream, None).await
    }

    /// Send `command` and wait for its reply. Broadcasts that arrive in
    /// between are skipped.
    pub async fn request(&mut self, command: &Command) -> Result<Frame, CliError> {
        let req = command.to_frame();
        self.send(&req).await?;
        wait_for_reply(&mut self.stream, &req.id).await
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}

/// Relay websocket URL for an HTTP base URL.
pub fn ws_url(base_url: &str) -> Result<String, CliError> {
    let base = base_url.trim_end_matches('/');
    if let Some(rest) = base.strip_prefix("http://") {
        return Ok(format!("ws://{rest}/ws"));
    }
    if let Some(rest) = base.strip_prefix("https://") {
        return Ok(format!("wss://{rest}/ws"));
    }

    Err(CliError::InvalidBaseUrl(base_url.to_owned()))
}

async fn wait_for_reply(stream: &mut Stream, request_id: &str) -> Result<Frame, CliError> {
    loop {
        let frame = recv_next(stream, Some(REPLY_TIMEOUT)).await?;
        if frame.parent_id.as_deref() != Some(request_id) {
            continue;
        }
        if frame.status == Status::Error {
            return Err(CliError::ServerError {
                syscall: frame.syscall.clone(),
                code: frame.get_str(FRAME_CODE).unwrap_or("-").to_owned(),
                message: frame.error_message().unwrap_or("unknown websocket error").to_owned(),
            });
        }
        return Ok(frame);
    }
}

async fn recv_next(stream: &mut Stream, timeout: Option<Duration>) -> Result<Frame, CliError> {
    let fut = async {
        loop {
            let Some(message) = stream.next().await else {
                return Err(CliError::WsClosed);
            };
            match message.map_err(|error| CliError::WsConnect(Box::new(error)))? {
                Message::Binary(bytes) => {
                    return frames::decode_frame(&bytes).map_err(CliError::from);
                }
                Message::Close(_) => return Err(CliError::WsClosed),
                _ => {}
            }
        }
    };

    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| CliError::Timeout)?,
        None => fut.await,
    }
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
