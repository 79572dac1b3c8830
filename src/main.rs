use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use animatronic_voice::voice::{AudioDevices, CpalDevices, FrameSource, PcmSink, tone};
use animatronic_voice::{Config, Daemon, LogActuators, Speaker, actuator};

/// Animatronic - a talking animatronic that listens, answers, and can be interrupted
#[derive(Parser)]
#[command(name = "animatronic", version, about)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(short, long, env = "ANIMATRONIC_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Speak text through synthesis, playback and barge-in detection
    Say {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Flap the mouth and wag the tail
    TestMotors,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,animatronic_voice=info",
        1 => "info,animatronic_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(cli.config.as_deref(), duration).await,
            Command::TestSpeaker => test_speaker(cli.config.as_deref()).await,
            Command::Say { text } => say(cli.config.as_deref(), &text).await,
            Command::TestMotors => test_motors().await,
        };
    }

    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "loaded configuration");

    let mut daemon = Daemon::new(config)?;
    let shutdown = shutdown_on_ctrl_c();

    tracing::info!("animatronic ready - start talking");
    daemon.run(shutdown).await?;

    Ok(())
}

/// Cancel the returned token on Ctrl-C
fn shutdown_on_ctrl_c() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            token.cancel();
        }
    });
    shutdown
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(config: Option<&std::path::Path>, duration: u64) -> anyhow::Result<()> {
    let config = Config::load(config)?;
    let format = config.audio.frame_format();

    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut input = CpalDevices.open_input(format)?;
    println!("Sample rate: {} Hz", format.sample_rate);
    println!("Speech threshold: {:.0}", config.audio.threshold);
    println!("---");

    let frames_per_second = (1000 / format.chunk_duration_ms).max(1);
    for second in 1..=duration {
        let mut samples = Vec::new();
        for _ in 0..frames_per_second {
            let frame = input.read_frame().await?;
            samples.extend_from_slice(frame.samples());
        }

        let level = animatronic_voice::voice::rms(&samples);
        let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (level / 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);
        let marker = if level > config.audio.threshold { "speech" } else { "" };

        println!("[{second:2}s] RMS: {level:7.1} | Peak: {peak:5} | [{meter}] {marker}");
    }

    input.close();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: arecord -l (to list devices)");
    println!("  3. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Test speaker output with a sine wave
#[allow(clippy::future_not_send)]
async fn test_speaker(config: Option<&std::path::Path>) -> anyhow::Result<()> {
    let config = Config::load(config)?;
    let sample_rate = config.playback.sample_rate;

    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let mut output = CpalDevices.open_output(sample_rate)?;
    let pcm = tone(440.0, Duration::from_secs(2), sample_rate, 0.3);

    println!("Playing {} samples at {sample_rate} Hz...", pcm.len() / 2);
    for chunk in pcm.chunks(4096) {
        output.write(chunk).await?;
    }
    output.drain().await?;
    output.close();

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: aplay -l (to list devices)");
    println!("  2. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Speak text through the full reply pipeline
#[allow(clippy::future_not_send)]
async fn say(config: Option<&std::path::Path>, text: &str) -> anyhow::Result<()> {
    let config = Config::load(config)?;
    let speaker = Speaker::new(
        &config,
        Arc::new(CpalDevices),
        Arc::new(LogActuators::new()),
    )?;

    println!("Speaking: \"{text}\"");
    let outcome = speaker.say(text, &shutdown_on_ctrl_c()).await?;

    println!(
        "Sent {} chunks, played {} audio chunks{}",
        outcome.synthesis.chunks_sent,
        outcome.playback.played,
        if outcome.playback.interrupted {
            " (interrupted)"
        } else {
            ""
        }
    );

    Ok(())
}

/// Exercise the motors
async fn test_motors() -> anyhow::Result<()> {
    println!("Testing motors: mouth, then tail");
    actuator::exercise(Arc::new(LogActuators::new())).await?;
    println!("Done");
    Ok(())
}
