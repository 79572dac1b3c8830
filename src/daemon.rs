//! Daemon - the conversation loop
//!
//! Each turn listens for one utterance, transcribes it, streams a generated
//! reply through synthesis, and plays it back while watching for the user
//! to talk over it.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use rand::seq::SliceRandom;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::actuator::{ActuatorBus, LogActuators};
use crate::llm::{ChatCompletionClient, TextGenerator};
use crate::voice::{
    ActivityDetector, AudioDevices, CpalDevices, FrameFormat, InterruptFlag, InterruptMonitor,
    PlaybackEngine, PlaybackReport, SegmentOutcome, SpeechSegmenter, SpeechSynthesizer,
    SynthesisSummary, SynthesisTransport, Transcriber, WhisperTranscriber, chunk_text,
};
use crate::{Config, Error, Result};

/// Prompt used to open a conversation
const GREETING_PROMPT: &str = "Greet the user in a fun, energetic, and playful way. \
Keep it short, under 15 words.";

/// Spoken when a transcription fails
const NOT_UNDERSTOOD: &str = "Sorry, I didn't catch that.";

/// Spoken when nobody talks before the listen timeout
const FAREWELLS: &[&str] = &[
    "I'll be back!",
    "Time to get to da choppa, good bye!",
    "Hasta la vista, baby!",
    "Come with me if you want to live!",
    "It's not a tumor, it's just goodbye!",
    "I need a vacation!",
    "No problemo!",
];

/// What the voice loop is doing right now
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    /// Between turns
    #[default]
    Idle,
    /// Listening for an utterance
    Capturing,
    /// Waiting on the transcription service
    Transcribing,
    /// Streaming a reply to the synthesis service
    Synthesizing,
    /// Playing the reply
    Playing,
    /// The user talked over the reply
    Interrupted,
    /// Nobody spoke before the listen timeout
    TimedOut,
}

/// Publishes the current [`SessionState`]
#[derive(Clone)]
pub struct SessionStates {
    tx: Arc<watch::Sender<SessionState>>,
}

impl Default for SessionStates {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStates {
    /// Start in [`SessionState::Idle`]
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SessionState::Idle);
        Self { tx: Arc::new(tx) }
    }

    /// Move to `state`
    pub fn set(&self, state: SessionState) {
        let previous = self.tx.send_replace(state);
        if previous != state {
            tracing::debug!(from = ?previous, to = ?state, "session state changed");
        }
    }

    /// Current state
    #[must_use]
    pub fn current(&self) -> SessionState {
        *self.tx.borrow()
    }

    /// Watch state changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }
}

/// Builds the detector used to hear barge-in
pub type DetectorFactory = Box<dyn Fn() -> Result<ActivityDetector>>;

/// What speaking one reply did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpeechOutcome {
    /// Synthesis side
    pub synthesis: SynthesisSummary,
    /// Playback side
    pub playback: PlaybackReport,
}

/// Speaks replies: synthesis, playback and interrupt monitoring together
pub struct Speaker {
    devices: Arc<dyn AudioDevices>,
    synthesizer: SpeechSynthesizer,
    engine: PlaybackEngine,
    playback_rate: u32,
    channel_capacity: usize,
    settle_delay: std::time::Duration,
    interrupt_detector: DetectorFactory,
    states: SessionStates,
}

impl Speaker {
    /// Create a speaker from configuration
    ///
    /// # Errors
    ///
    /// Returns `Config` if synthesis is not configured
    pub fn new(
        config: &Config,
        devices: Arc<dyn AudioDevices>,
        actuators: Arc<dyn ActuatorBus>,
    ) -> Result<Self> {
        let format = config.audio.frame_format();
        let vad_mode = config.audio.vad_mode;
        let threshold = config.interrupt.threshold;

        Ok(Self {
            devices,
            synthesizer: SpeechSynthesizer::new(&config.synthesis)?,
            engine: PlaybackEngine::new(actuators, config),
            playback_rate: config.playback.sample_rate,
            channel_capacity: config.playback.channel_capacity,
            settle_delay: config.interrupt.settle_delay,
            interrupt_detector: Box::new(move || {
                ActivityDetector::new(format, vad_mode, threshold)
            }),
            states: SessionStates::new(),
        })
    }

    /// Replace how the barge-in detector is built
    #[must_use]
    pub fn with_interrupt_detector(mut self, factory: DetectorFactory) -> Self {
        self.interrupt_detector = factory;
        self
    }

    /// Publish states through `states`
    #[must_use]
    pub fn with_states(mut self, states: SessionStates) -> Self {
        self.states = states;
        self
    }

    /// Speak a fixed line
    ///
    /// # Errors
    ///
    /// Returns `SynthesisFailed` or `DeviceUnavailable` if speaking failed
    pub async fn say(&self, text: &str, cancel: &CancellationToken) -> Result<SpeechOutcome> {
        let fragments = futures::stream::iter(std::iter::once(text.to_string()));
        self.speak(fragments, cancel).await
    }

    /// Speak a reply arriving as text fragments
    ///
    /// # Errors
    ///
    /// Returns `SynthesisFailed` or `DeviceUnavailable` if speaking failed
    pub async fn speak<S>(&self, fragments: S, cancel: &CancellationToken) -> Result<SpeechOutcome>
    where
        S: Stream<Item = String>,
    {
        self.states.set(SessionState::Synthesizing);
        let transport = self.synthesizer.connect().await?;
        self.speak_over(transport, chunk_text(fragments), cancel).await
    }

    /// Speak `chunks` over an open synthesis connection
    ///
    /// Synthesis, playback and the interrupt monitor run together; a fresh
    /// interrupt flag is used for every call.
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if the speaker fails, otherwise
    /// `SynthesisFailed` if the synthesis stream failed
    pub async fn speak_over<S>(
        &self,
        transport: SynthesisTransport,
        chunks: S,
        cancel: &CancellationToken,
    ) -> Result<SpeechOutcome>
    where
        S: Stream<Item = String>,
    {
        let interrupt = InterruptFlag::new();
        let done = CancellationToken::new();
        let (audio_tx, audio_rx) = mpsc::channel(self.channel_capacity);

        let sink = self.devices.open_output(self.playback_rate)?;
        let mut monitor = InterruptMonitor::new((self.interrupt_detector)()?, self.settle_delay);

        self.states.set(SessionState::Playing);

        let synthesis = async {
            tokio::select! {
                biased;
                () = cancel.cancelled() => Ok(SynthesisSummary::default()),
                summary = self.synthesizer.run(transport, chunks, audio_tx, &interrupt) => summary,
            }
        };
        let playback = self
            .engine
            .play(sink, audio_rx, &interrupt, cancel, &done);
        let watch = monitor.watch(self.devices.as_ref(), &interrupt, &done);

        let (synthesis, playback, exit) = tokio::join!(synthesis, playback, watch);
        tracing::debug!(?exit, "speech finished");

        let playback = playback?;
        if playback.interrupted {
            self.states.set(SessionState::Interrupted);
        }
        let synthesis = synthesis?;

        Ok(SpeechOutcome {
            synthesis,
            playback,
        })
    }
}

/// The animatronic's conversation loop
pub struct Daemon {
    config: Config,
    devices: Arc<dyn AudioDevices>,
    speaker: Speaker,
    segmenter: SpeechSegmenter,
    transcriber: Box<dyn Transcriber>,
    generator: Box<dyn TextGenerator>,
    states: SessionStates,
}

impl Daemon {
    /// Create a daemon using the default audio devices and remote services
    ///
    /// # Errors
    ///
    /// Returns error if a service is not configured or the VAD cannot be built
    pub fn new(config: Config) -> Result<Self> {
        let transcriber = Box::new(WhisperTranscriber::new(&config.transcription)?);
        let generator = Box::new(ChatCompletionClient::new(&config.llm)?);
        Self::with_parts(
            config,
            Arc::new(CpalDevices),
            Arc::new(LogActuators::new()),
            transcriber,
            generator,
        )
    }

    /// Create a daemon from explicit collaborators
    ///
    /// # Errors
    ///
    /// Returns error if synthesis is not configured or the VAD cannot be built
    pub fn with_parts(
        config: Config,
        devices: Arc<dyn AudioDevices>,
        actuators: Arc<dyn ActuatorBus>,
        transcriber: Box<dyn Transcriber>,
        generator: Box<dyn TextGenerator>,
    ) -> Result<Self> {
        let states = SessionStates::new();
        let speaker = Speaker::new(&config, Arc::clone(&devices), actuators)?
            .with_states(states.clone());
        let detector = ActivityDetector::new(
            config.audio.frame_format(),
            config.audio.vad_mode,
            config.audio.threshold,
        )?;
        let segmenter = SpeechSegmenter::new(detector, &config.audio);

        Ok(Self {
            config,
            devices,
            speaker,
            segmenter,
            transcriber,
            generator,
            states,
        })
    }

    /// Watch the loop's state
    #[must_use]
    pub fn states(&self) -> watch::Receiver<SessionState> {
        self.states.subscribe()
    }

    /// Run conversations until `shutdown` fires
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` if the microphone cannot be recovered
    #[allow(clippy::future_not_send)]
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(
            sample_rate = self.config.audio.sample_rate,
            frame_ms = self.config.audio.chunk_duration_ms,
            "conversation loop running"
        );

        self.greet(&shutdown).await;

        while !shutdown.is_cancelled() {
            let turn_id = uuid::Uuid::new_v4();
            let span = tracing::info_span!("turn", id = %turn_id);

            self.turn(&shutdown).instrument(span).await?;
            self.states.set(SessionState::Idle);

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(self.config.turn_settle) => {}
            }
        }

        tracing::info!("conversation loop stopped");
        Ok(())
    }

    async fn greet(&self, shutdown: &CancellationToken) {
        match self.generator.generate(GREETING_PROMPT).await {
            Ok(fragments) => self.speak_reply(fragments, shutdown).await,
            Err(e) => tracing::warn!(error = %e, "greeting generation failed"),
        }
    }

    async fn turn(&mut self, shutdown: &CancellationToken) -> Result<()> {
        self.states.set(SessionState::Capturing);

        let format: FrameFormat = self.config.audio.frame_format();
        let mut source = self.devices.open_input(format)?;
        let outcome = tokio::select! {
            biased;
            () = shutdown.cancelled() => None,
            outcome = self.segmenter.capture(source.as_mut()) => Some(outcome),
        };
        source.close();
        drop(source);

        let Some(outcome) = outcome else {
            return Ok(());
        };

        let utterance = match outcome? {
            SegmentOutcome::Finished(utterance) => utterance,
            SegmentOutcome::TimedOut => {
                self.states.set(SessionState::TimedOut);
                let farewell = FAREWELLS
                    .choose(&mut rand::thread_rng())
                    .copied()
                    .unwrap_or("Goodbye!");
                self.say(farewell, shutdown).await;
                return Ok(());
            }
        };

        self.states.set(SessionState::Transcribing);
        let wav = utterance.to_wav()?;
        drop(utterance);

        let transcript = match self.transcriber.transcribe(&wav).await {
            Ok(transcript) => transcript,
            Err(e) => {
                tracing::warn!(error = %e, "transcription failed");
                self.say(NOT_UNDERSTOOD, shutdown).await;
                return Ok(());
            }
        };

        if transcript.trim().is_empty() {
            tracing::debug!("empty transcript, listening again");
            return Ok(());
        }
        tracing::info!(transcript = %transcript, "heard");

        match self.generator.generate(&transcript).await {
            Ok(fragments) => self.speak_reply(fragments, shutdown).await,
            Err(e) => tracing::error!(error = %e, "reply generation failed"),
        }
        Ok(())
    }

    async fn speak_reply<S>(&self, fragments: S, shutdown: &CancellationToken)
    where
        S: Stream<Item = Result<String>>,
    {
        let text = fragments
            .take_while(|fragment| {
                if let Err(e) = fragment {
                    tracing::warn!(error = %e, "reply stream failed, speaking what arrived");
                }
                futures::future::ready(fragment.is_ok())
            })
            .filter_map(|fragment| futures::future::ready(fragment.ok()));

        report(self.speaker.speak(text, shutdown).await);
    }

    async fn say(&self, text: &str, shutdown: &CancellationToken) {
        report(self.speaker.say(text, shutdown).await);
    }
}

fn report(outcome: Result<SpeechOutcome>) {
    match outcome {
        Ok(outcome) => tracing::debug!(
            chunks_sent = outcome.synthesis.chunks_sent,
            played = outcome.playback.played,
            interrupted = outcome.playback.interrupted,
            "reply spoken"
        ),
        Err(e @ Error::SynthesisFailed(_)) => {
            tracing::error!(error = %e, "synthesis failed, ending turn");
        }
        Err(e @ Error::DeviceUnavailable(_)) => {
            tracing::error!(error = %e, "speaker unavailable, ending turn");
        }
        Err(e) => tracing::error!(error = %e, "could not speak reply"),
    }
}
