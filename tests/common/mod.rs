//! Shared test utilities
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::{SinkExt, StreamExt};

use animatronic_voice::actuator::{ActuatorBus, ActuatorId};
use animatronic_voice::voice::{
    AudioDevices, AudioFrame, FrameFormat, FrameSource, PcmSink, SynthesisTransport,
    VoiceClassifier,
};
use animatronic_voice::{Error, Result};

/// Level used for frames that should count as speech
pub const LOUD: i16 = 3_000;

/// A frame of alternating `±level` samples, so its RMS equals `level`
pub fn frame(format: FrameFormat, level: i16) -> AudioFrame {
    let samples = (0..format.samples_per_frame())
        .map(|i| if i % 2 == 0 { level } else { -level })
        .collect();
    AudioFrame::new(samples, format.sample_rate)
}

/// `count` silent frames
pub fn silence(format: FrameFormat, count: usize) -> Vec<Result<AudioFrame>> {
    (0..count).map(|_| Ok(frame(format, 0))).collect()
}

/// `count` loud frames
pub fn speech(format: FrameFormat, count: usize) -> Vec<Result<AudioFrame>> {
    (0..count).map(|_| Ok(frame(format, LOUD))).collect()
}

/// Classifier that calls everything voice, leaving the decision to the RMS gate
pub struct AlwaysVoice;

impl VoiceClassifier for AlwaysVoice {
    fn is_voice(&mut self, _samples: &[i16]) -> Result<bool> {
        Ok(true)
    }
}

/// Counters shared between a fake input and the test
#[derive(Clone, Default)]
pub struct InputLog {
    pub reads: Arc<AtomicUsize>,
    pub reopens: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
}

impl InputLog {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn reopens(&self) -> usize {
        self.reopens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Frame source that plays back a script, one frame per frame duration
pub struct ScriptedSource {
    format: FrameFormat,
    script: VecDeque<Result<AudioFrame>>,
    tail_level: i16,
    fail_reopen: bool,
    log: InputLog,
}

impl ScriptedSource {
    pub fn new(format: FrameFormat, script: Vec<Result<AudioFrame>>) -> Self {
        Self {
            format,
            script: script.into(),
            tail_level: 0,
            fail_reopen: false,
            log: InputLog::default(),
        }
    }

    /// Level of the frames produced once the script runs out
    pub fn then_level(mut self, level: i16) -> Self {
        self.tail_level = level;
        self
    }

    pub fn failing_reopen(mut self) -> Self {
        self.fail_reopen = true;
        self
    }

    pub fn log(&self) -> InputLog {
        self.log.clone()
    }
}

#[async_trait(?Send)]
impl FrameSource for ScriptedSource {
    fn format(&self) -> FrameFormat {
        self.format
    }

    async fn read_frame(&mut self) -> Result<AudioFrame> {
        tokio::time::sleep(self.format.frame_duration()).await;
        self.log.reads.fetch_add(1, Ordering::SeqCst);
        self.script
            .pop_front()
            .unwrap_or_else(|| Ok(frame(self.format, self.tail_level)))
    }

    async fn reopen(&mut self) -> Result<()> {
        self.log.reopens.fetch_add(1, Ordering::SeqCst);
        if self.fail_reopen {
            return Err(Error::DeviceUnavailable("device is gone".to_string()));
        }
        Ok(())
    }

    fn close(&mut self) {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// What a recording sink saw
#[derive(Default)]
pub struct SinkState {
    pub chunks: Vec<Vec<u8>>,
    pub drained: usize,
    pub closes: usize,
}

/// Speaker that records writes and takes `write_delay` per chunk
pub struct RecordingSink {
    state: Arc<Mutex<SinkState>>,
    write_delay: Duration,
    fail_at: Option<usize>,
}

#[async_trait(?Send)]
impl PcmSink for RecordingSink {
    async fn write(&mut self, pcm: &[u8]) -> Result<()> {
        let written = self.state.lock().unwrap().chunks.len();
        if self.fail_at == Some(written) {
            return Err(Error::DeviceUnavailable("speaker unplugged".to_string()));
        }
        tokio::time::sleep(self.write_delay).await;
        self.state.lock().unwrap().chunks.push(pcm.to_vec());
        Ok(())
    }

    async fn drain(&mut self) -> Result<()> {
        self.state.lock().unwrap().drained += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().unwrap().closes += 1;
    }
}

/// Fake audio hardware
pub struct FakeDevices {
    inputs: Mutex<VecDeque<ScriptedSource>>,
    pub input_log: InputLog,
    pub inputs_opened: AtomicUsize,
    pub sink: Arc<Mutex<SinkState>>,
    write_delay: Duration,
    fail_write_at: Option<usize>,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self {
            inputs: Mutex::new(VecDeque::new()),
            input_log: InputLog::default(),
            inputs_opened: AtomicUsize::new(0),
            sink: Arc::new(Mutex::new(SinkState::default())),
            write_delay: Duration::from_millis(10),
            fail_write_at: None,
        }
    }

    /// Queue an input handed out by the next `open_input`
    pub fn with_input(self, source: ScriptedSource) -> Self {
        self.inputs.lock().unwrap().push_back(source);
        self
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn failing_write_at(mut self, index: usize) -> Self {
        self.fail_write_at = Some(index);
        self
    }

    pub fn played(&self) -> usize {
        self.sink.lock().unwrap().chunks.len()
    }

    pub fn sink_closes(&self) -> usize {
        self.sink.lock().unwrap().closes
    }

    pub fn sink(&self) -> RecordingSink {
        RecordingSink {
            state: Arc::clone(&self.sink),
            write_delay: self.write_delay,
            fail_at: self.fail_write_at,
        }
    }
}

impl AudioDevices for FakeDevices {
    fn open_input(&self, format: FrameFormat) -> Result<Box<dyn FrameSource>> {
        self.inputs_opened.fetch_add(1, Ordering::SeqCst);
        let mut source = self
            .inputs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedSource::new(format, Vec::new()));
        source.log = self.input_log.clone();
        Ok(Box::new(source))
    }

    fn open_output(&self, _sample_rate: u32) -> Result<Box<dyn PcmSink>> {
        Ok(Box::new(self.sink()))
    }
}

/// Actuators that record every state change
#[derive(Default)]
pub struct RecordingActuators {
    events: Mutex<Vec<(ActuatorId, bool)>>,
}

impl RecordingActuators {
    pub fn events(&self) -> Vec<(ActuatorId, bool)> {
        self.events.lock().unwrap().clone()
    }

    pub fn last(&self, id: ActuatorId) -> Option<bool> {
        self.events()
            .into_iter()
            .rev()
            .find(|(i, _)| *i == id)
            .map(|(_, on)| on)
    }

    /// Every actuator was last set to off
    pub fn all_off(&self) -> bool {
        ActuatorId::ALL
            .iter()
            .all(|id| self.last(*id) != Some(true))
    }
}

impl ActuatorBus for RecordingActuators {
    fn set_state(&self, id: ActuatorId, on: bool) -> Result<()> {
        self.events.lock().unwrap().push((id, on));
        Ok(())
    }
}

/// How the fake synthesis service behaves
#[derive(Clone, Copy)]
pub enum ServiceBehavior {
    /// One audio message per text message, final message after the close signal
    Normal { audio_per_chunk: usize },
    /// Close the connection after this many audio messages
    DropAfter(usize),
    /// Reply to the first text message with invalid JSON
    Malformed,
    /// Reply to the first text message with audio that is not base64
    BadAudio,
    /// One audio message per text message, each after `interval`
    Trickle { interval: Duration },
}

/// Messages the fake synthesis service received
#[derive(Clone, Default)]
pub struct ServiceLog {
    received: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl ServiceLog {
    pub fn received(&self) -> Vec<serde_json::Value> {
        self.received.lock().unwrap().clone()
    }

    /// Text of every message after the handshake
    pub fn texts(&self) -> Vec<String> {
        self.received()
            .iter()
            .skip(1)
            .filter_map(|m| m["text"].as_str().map(ToString::to_string))
            .collect()
    }
}

/// PCM payload the fake service sends for audio message `index`
pub fn audio_payload(index: usize) -> Vec<u8> {
    let sample = i16::try_from(index % 1_000).unwrap() * 10;
    sample.to_le_bytes().repeat(64)
}

/// In-memory synthesis connection backed by a spawned fake service
pub fn fake_service(behavior: ServiceBehavior) -> (SynthesisTransport, ServiceLog) {
    let (client_tx, mut service_rx) = futures::channel::mpsc::unbounded::<String>();
    let (mut service_tx, client_rx) = futures::channel::mpsc::unbounded::<Result<String>>();
    let log = ServiceLog::default();
    let received = Arc::clone(&log.received);

    tokio::spawn(async move {
        let mut sent_audio = 0usize;

        while let Some(raw) = service_rx.next().await {
            let message: serde_json::Value = serde_json::from_str(&raw).unwrap();
            let text = message["text"].as_str().unwrap_or_default().to_string();
            let is_handshake = received.lock().unwrap().is_empty();
            received.lock().unwrap().push(message);

            if is_handshake {
                continue;
            }

            if text.is_empty() {
                let _ = service_tx
                    .send(Ok(serde_json::json!({"audio": null, "isFinal": true}).to_string()))
                    .await;
                continue;
            }

            match behavior {
                ServiceBehavior::Normal { audio_per_chunk } => {
                    for _ in 0..audio_per_chunk {
                        let audio = STANDARD.encode(audio_payload(sent_audio));
                        sent_audio += 1;
                        let reply = serde_json::json!({"audio": audio, "isFinal": false});
                        if service_tx.send(Ok(reply.to_string())).await.is_err() {
                            return;
                        }
                    }
                }
                ServiceBehavior::DropAfter(limit) => {
                    if sent_audio >= limit {
                        return;
                    }
                    let audio = STANDARD.encode(audio_payload(sent_audio));
                    sent_audio += 1;
                    let reply = serde_json::json!({"audio": audio, "isFinal": false});
                    let _ = service_tx.send(Ok(reply.to_string())).await;
                }
                ServiceBehavior::Malformed => {
                    let _ = service_tx.send(Ok("{not json".to_string())).await;
                }
                ServiceBehavior::Trickle { interval } => {
                    tokio::time::sleep(interval).await;
                    let audio = STANDARD.encode(audio_payload(sent_audio));
                    sent_audio += 1;
                    let reply = serde_json::json!({"audio": audio, "isFinal": false});
                    if service_tx.send(Ok(reply.to_string())).await.is_err() {
                        return;
                    }
                }
                ServiceBehavior::BadAudio => {
                    let reply = serde_json::json!({"audio": "***", "isFinal": false});
                    let _ = service_tx.send(Ok(reply.to_string())).await;
                }
            }
        }
    });

    let outgoing = client_tx.sink_map_err(|e| Error::SynthesisFailed(e.to_string()));
    let transport = SynthesisTransport {
        outgoing: Box::pin(outgoing),
        incoming: Box::pin(client_rx),
    };
    (transport, log)
}
