//! Streaming text-to-speech over the `ElevenLabs` `stream-input` websocket
//!
//! One session carries one reply. Text chunks go out while audio comes
//! back on the same connection, so the first words play before the reply
//! has finished generating.

use std::pin::{Pin, pin};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::{Sink, SinkExt, Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::interrupt::InterruptFlag;
use crate::config::SynthesisConfig;
use crate::{Error, Result};

/// Outbound half of a synthesis connection, one JSON document per item
pub type OutgoingMessages = Pin<Box<dyn Sink<String, Error = Error> + Send>>;

/// Inbound half of a synthesis connection, one JSON document per item
pub type IncomingMessages = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Both halves of a synthesis connection
pub struct SynthesisTransport {
    /// Messages to the service
    pub outgoing: OutgoingMessages,
    /// Messages from the service
    pub incoming: IncomingMessages,
}

/// What a finished session did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SynthesisSummary {
    /// Text chunks sent to the service
    pub chunks_sent: usize,
    /// Audio chunks forwarded to playback
    pub audio_chunks: usize,
    /// Whether the session was cut short by an interrupt
    pub interrupted: bool,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

#[derive(Serialize)]
struct GenerationConfig<'a> {
    chunk_length_schedule: &'a [u32],
}

#[derive(Serialize)]
struct Handshake<'a> {
    text: &'a str,
    voice_settings: VoiceSettings,
    generation_config: GenerationConfig<'a>,
    xi_api_key: &'a str,
    model_id: &'a str,
}

#[derive(Serialize)]
struct TextMessage<'a> {
    text: &'a str,
    try_trigger_generation: bool,
}

#[derive(Deserialize)]
struct AudioMessage {
    #[serde(default)]
    audio: Option<String>,
    #[serde(default, rename = "isFinal")]
    is_final: Option<bool>,
    #[serde(default)]
    error: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

/// Streaming synthesis client
pub struct SpeechSynthesizer {
    api_key: SecretString,
    voice_id: String,
    model_id: String,
    output_format: String,
    stability: f32,
    similarity_boost: f32,
    chunk_length_schedule: Vec<u32>,
    base_url: String,
}

impl SpeechSynthesizer {
    /// Create a client from synthesis settings
    ///
    /// # Errors
    ///
    /// Returns `Config` if no API key is configured
    pub fn new(config: &SynthesisConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_ref()
            .filter(|key| !key.expose_secret().is_empty())
            .ok_or_else(|| Error::Config("ElevenLabs API key required for synthesis".to_string()))?;

        Ok(Self {
            api_key: SecretString::from(api_key.expose_secret().to_string()),
            voice_id: config.voice_id.clone(),
            model_id: config.model_id.clone(),
            output_format: config.output_format.clone(),
            stability: config.stability,
            similarity_boost: config.similarity_boost,
            chunk_length_schedule: config.chunk_length_schedule.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Websocket endpoint for this voice and model
    ///
    /// # Errors
    ///
    /// Returns `Config` if the base URL is invalid
    pub fn endpoint(&self) -> Result<url::Url> {
        let mut url = url::Url::parse(&format!(
            "{}/v1/text-to-speech/{}/stream-input",
            self.base_url, self.voice_id
        ))
        .map_err(|e| Error::Config(format!("invalid synthesis URL: {e}")))?;

        url.query_pairs_mut()
            .append_pair("model_id", &self.model_id)
            .append_pair("output_format", &self.output_format);
        Ok(url)
    }

    /// Open a websocket connection to the service
    ///
    /// # Errors
    ///
    /// Returns `SynthesisFailed` if the connection cannot be established
    pub async fn connect(&self) -> Result<SynthesisTransport> {
        let url = self.endpoint()?;
        tracing::debug!(
            voice_id = %self.voice_id,
            model_id = %self.model_id,
            "connecting to synthesis service"
        );

        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::SynthesisFailed(format!("connect failed: {e}")))?;
        let (sender, receiver) = socket.split();

        let outgoing = sender
            .with(|text: String| futures::future::ready(Ok::<_, Error>(Message::Text(text))));
        let incoming = receiver.filter_map(|message| {
            futures::future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => Some(
                    String::from_utf8(bytes)
                        .map_err(|e| Error::SynthesisFailed(format!("binary frame is not UTF-8: {e}"))),
                ),
                Ok(Message::Close(_)) => {
                    tracing::debug!("synthesis service closed the connection");
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(Error::from(e))),
            })
        });

        Ok(SynthesisTransport {
            outgoing: Box::pin(outgoing),
            incoming: Box::pin(incoming),
        })
    }

    /// First message of every session
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn handshake(&self) -> Result<String> {
        let handshake = Handshake {
            text: " ",
            voice_settings: VoiceSettings {
                stability: self.stability,
                similarity_boost: self.similarity_boost,
            },
            generation_config: GenerationConfig {
                chunk_length_schedule: &self.chunk_length_schedule,
            },
            xi_api_key: self.api_key.expose_secret(),
            model_id: &self.model_id,
        };
        Ok(serde_json::to_string(&handshake)?)
    }

    /// Stream `chunks` through `transport`, forwarding decoded PCM to `audio`
    ///
    /// Sending stops early once `interrupt` is raised, but the close signal
    /// is always sent. Receiving carries on after an interrupt so playback
    /// can finish its grace window, and stops at the final message or when
    /// the playback side drops its receiver. `audio` is dropped on return
    /// so playback sees the end of the stream.
    ///
    /// # Errors
    ///
    /// Returns `SynthesisFailed` if the connection drops before the final
    /// message or the service sends something undecodable
    pub async fn run<S>(
        &self,
        transport: SynthesisTransport,
        chunks: S,
        audio: mpsc::Sender<Vec<u8>>,
        interrupt: &InterruptFlag,
    ) -> Result<SynthesisSummary>
    where
        S: Stream<Item = String>,
    {
        let SynthesisTransport {
            mut outgoing,
            mut incoming,
        } = transport;
        let handshake = self.handshake()?;
        let stop = CancellationToken::new();

        let send = async {
            let mut chunks = pin!(chunks);
            let mut sent = 0usize;

            let streamed: Result<()> = async {
                outgoing.send(handshake).await?;
                loop {
                    let next = tokio::select! {
                        biased;
                        () = interrupt.raised() => break,
                        () = stop.cancelled() => break,
                        next = chunks.next() => next,
                    };
                    let Some(chunk) = next else { break };

                    let message = serde_json::to_string(&TextMessage {
                        text: &chunk,
                        try_trigger_generation: true,
                    })?;
                    outgoing.send(message).await?;
                    sent += 1;
                    tracing::trace!(chunk = %chunk, "text chunk sent");
                }
                Ok(())
            }
            .await;

            let closed = outgoing.send(r#"{"text":""}"#.to_string()).await;
            streamed?;
            if let Err(e) = closed {
                if !stop.is_cancelled() {
                    return Err(e);
                }
            }
            Ok::<usize, Error>(sent)
        };

        let receive = async {
            let received = receive_audio(&mut incoming, &audio).await;
            stop.cancel();
            received
        };

        let (sent, received) = tokio::join!(send, receive);
        drop(audio);

        if let Err(e) = outgoing.close().await {
            tracing::debug!(error = %e, "synthesis connection close failed");
        }

        let audio_chunks = received.map_err(|e| {
            tracing::error!(error = %e, "synthesis stream failed");
            e
        })?;

        let interrupted = interrupt.is_raised();
        let chunks_sent = match sent {
            Ok(sent) => sent,
            Err(e) if !interrupted => {
                tracing::error!(error = %e, "failed to send text to synthesis service");
                return Err(Error::SynthesisFailed(e.to_string()));
            }
            Err(_) => 0,
        };

        tracing::info!(chunks_sent, audio_chunks, interrupted, "synthesis session finished");
        Ok(SynthesisSummary {
            chunks_sent,
            audio_chunks,
            interrupted,
        })
    }
}

async fn receive_audio(
    incoming: &mut IncomingMessages,
    audio: &mpsc::Sender<Vec<u8>>,
) -> Result<usize> {
    let mut received = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            () = audio.closed() => {
                tracing::debug!(received, "playback stopped accepting audio");
                return Ok(received);
            }
            next = incoming.next() => next,
        };

        let text = match next {
            Some(Ok(text)) => text,
            Some(Err(e)) => return Err(Error::SynthesisFailed(e.to_string())),
            None => {
                return Err(Error::SynthesisFailed(
                    "connection closed before the final message".to_string(),
                ));
            }
        };

        let message: AudioMessage = serde_json::from_str(&text)
            .map_err(|e| Error::SynthesisFailed(format!("malformed message: {e}")))?;

        if let Some(error) = message.error {
            let detail = message.message.unwrap_or_else(|| error.to_string());
            return Err(Error::SynthesisFailed(format!("service error: {detail}")));
        }

        if let Some(encoded) = message.audio.filter(|a| !a.is_empty()) {
            let pcm = STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| Error::SynthesisFailed(format!("bad audio payload: {e}")))?;

            if audio.send(pcm).await.is_err() {
                tracing::debug!(received, "playback stopped accepting audio");
                return Ok(received);
            }
            received += 1;
        }

        if message.is_final == Some(true) {
            return Ok(received);
        }
    }
}
