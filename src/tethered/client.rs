//! Holder side of the tethered protocol
//!
//! Registers nothing by itself: the relying party hands the holder a
//! sessionId (out of band), the holder answers the challenge in the upgrade
//! URL and then signs every binary frame the server sends until the
//! connection closes.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::handshake::{answer_challenge, handshake_url};
use crate::crypto::HolderKey;
use crate::types::{CustodyError, Result};

type HolderStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects a [`HolderKey`] to a tethered signer server
#[derive(Debug, Clone)]
pub struct TetheredSignerClient {
    key: HolderKey,
}

impl TetheredSignerClient {
    pub fn new(key: HolderKey) -> Self {
        Self { key }
    }

    pub fn key(&self) -> &HolderKey {
        &self.key
    }

    /// Answer the challenge for `session_id` and open the connection.
    ///
    /// A rejected handshake surfaces as `Authentication`.
    pub async fn connect(&self, ws_url: &str, session_id: &str) -> Result<HolderConnection> {
        let params = answer_challenge(&self.key, session_id)?;
        let url = handshake_url(ws_url, &params)?;

        let (ws, _) = connect_async(url.as_str()).await.map_err(|e| match e {
            tokio_tungstenite::tungstenite::Error::Http(response)
                if response.status().as_u16() == 401 =>
            {
                CustodyError::Authentication(format!("server rejected session {session_id}"))
            }
            other => CustodyError::from(other),
        })?;

        info!(session_id = %session_id, curve = %self.key.curve(), "Connected to tethered signer server");
        let (sink, stream) = ws.split();
        Ok(HolderConnection {
            key: self.key.clone(),
            session_id: session_id.to_string(),
            sink,
            stream,
        })
    }
}

/// An authenticated holder connection
pub struct HolderConnection {
    key: HolderKey,
    session_id: String,
    sink: SplitSink<HolderStream, Message>,
    stream: SplitStream<HolderStream>,
}

impl HolderConnection {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Sign every digest frame until the server closes; returns how many
    /// digests were signed.
    pub async fn serve(mut self) -> Result<u64> {
        let mut signed = 0u64;

        while let Some(message) = self.stream.next().await {
            match message? {
                Message::Binary(digest) => {
                    let signature = self.key.sign_prehash(&digest)?;
                    self.sink.send(Message::Binary(signature)).await?;
                    signed += 1;
                    debug!(session_id = %self.session_id, signed, "Answered digest");
                }
                Message::Ping(payload) => self.sink.send(Message::Pong(payload)).await?,
                Message::Close(_) => break,
                Message::Text(_) => {
                    warn!(session_id = %self.session_id, "Ignoring text frame from server");
                }
                _ => {}
            }
        }

        info!(session_id = %self.session_id, signed, "Tethered connection closed");
        Ok(signed)
    }

    /// Hang up
    pub async fn close(mut self) -> Result<()> {
        self.sink.send(Message::Close(None)).await?;
        Ok(())
    }
}
