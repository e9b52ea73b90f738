use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use peepers::hardware::{CHANNEL_COUNT, I2cBus, ServoDriver};
use peepers::voice::{
    AudioSink, Clip, CpalMicrophone, CpalSpeaker, OpenAiSpeech, Synthesizer, calculate_energy,
};
use peepers::{Config, Daemon};

/// Peepers - voice-controlled animatronic eyes
#[derive(Parser)]
#[command(name = "peepers", version, about)]
struct Cli {
    /// Path to the config file
    #[arg(short, long, env = "PEEPERS_CONFIG")]
    config: Option<PathBuf>,

    /// More log output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Show microphone levels against the speech threshold
    TestMic {
        /// Seconds to listen
        #[arg(short, long, default_value = "10")]
        duration: u64,
    },
    /// Play a test sound
    TestSpeaker,
    /// Speak a sentence through the TTS service
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hey hey. I can see you.")]
        text: String,
    },
    /// Run the idle eye animation without voice
    Eyes {
        /// How long to animate
        #[arg(short, long, default_value = "30")]
        seconds: u64,
    },
    /// Move one servo straight to an angle
    Servo {
        /// PWM channel (0-15)
        #[arg(short, long)]
        channel: u8,
        /// Angle in degrees (0-180)
        #[arg(short, long)]
        angle: f64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,peepers=info",
        1 => "info,peepers=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(&config, duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(&config, &text).await,
            Command::Eyes { seconds } => run_eyes(&config, seconds).await,
            Command::Servo { channel, angle } => set_servo(&config, channel, angle),
        };
    }

    tracing::info!("starting peepers");
    Daemon::new(config).run().await?;
    Ok(())
}

/// Print a level meter so the speech threshold can be tuned
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    const WIDTH: usize = 50;

    let microphone = CpalMicrophone::open(&config.audio)?;
    println!(
        "Listening on {} at {} Hz for {duration}s",
        microphone.device_name(),
        microphone.sample_rate()
    );

    let threshold = config.audio.energy_threshold;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let scale = |level: f32| ((level * 500.0) as usize).min(WIDTH);
    let marker = scale(threshold);

    for second in 1..=duration {
        let audio = microphone.record(Duration::from_secs(1)).await?;
        let level = calculate_energy(&audio.samples);
        let filled = scale(level);

        let bar: String = (0..WIDTH)
            .map(|i| match (i < filled, i == marker) {
                (_, true) => '|',
                (true, false) => '=',
                (false, false) => ' ',
            })
            .collect();
        let label = if level > threshold { "speech" } else { "quiet" };
        println!("{second:>3}s {level:.4} [{bar}] {label}");
    }

    println!("'|' marks audio.energy_threshold ({threshold})");
    Ok(())
}

/// Play two short chirps through the default output
async fn test_speaker() -> anyhow::Result<()> {
    const SAMPLE_RATE: u32 = 24_000;

    let mut speaker = CpalSpeaker::new()?;

    let chirp = |hz: f32| {
        (0..SAMPLE_RATE / 4).map(move |n| {
            #[allow(clippy::cast_precision_loss)]
            let t = n as f32 / SAMPLE_RATE as f32;
            (std::f32::consts::TAU * hz * t).sin() * 0.25
        })
    };
    let gap = std::iter::repeat_n(0.0, (SAMPLE_RATE / 8) as usize);
    let samples: Vec<f32> = chirp(880.0).chain(gap).chain(chirp(1_320.0)).collect();

    println!("Playing two chirps");
    speaker.load_clip(Clip {
        samples,
        sample_rate: SAMPLE_RATE,
    });
    speaker.play()?;
    speaker.wait().await;
    Ok(())
}

/// Synthesize `text` and play it
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    let tts = OpenAiSpeech::new(&config.voice)?;
    let audio = tts.synthesize(text).await?;
    println!("Synthesized {} bytes with voice {}", audio.len(), config.voice.tts_voice);

    let file = tempfile::Builder::new()
        .prefix("peepers-")
        .suffix(".mp3")
        .tempfile()?;
    std::fs::write(file.path(), &audio)?;

    let mut speaker = CpalSpeaker::new()?;
    speaker.load(file.path())?;
    speaker.play()?;
    speaker.wait().await;
    Ok(())
}

/// Animate the eyes for `seconds`, then put them to sleep
async fn run_eyes(config: &Config, seconds: u64) -> anyhow::Result<()> {
    let mut eyes = Daemon::open_eyes(config)?;

    println!("Animating eyes for {seconds} seconds (Ctrl-C to stop early)...");
    eyes.rest().await?;
    eyes.open().await?;
    eyes.start_animation();

    tokio::select! {
        () = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        _ = tokio::signal::ctrl_c() => println!("Interrupted"),
    }

    eyes.stop_animation().await?;
    eyes.sleep().await?;
    println!("Done");
    Ok(())
}

/// Move one servo for calibration
fn set_servo(config: &Config, channel: u8, angle: f64) -> anyhow::Result<()> {
    anyhow::ensure!(
        channel < CHANNEL_COUNT,
        "channel must be below {CHANNEL_COUNT}"
    );

    let hw = &config.hardware;
    let bus = I2cBus::open(hw.i2c_bus, hw.address)?;
    let driver = ServoDriver::new(Box::new(bus), hw.pwm_frequency)?;
    driver.set_angle_instant(channel, angle)?;

    println!(
        "Channel {channel} set to {:.1} degrees",
        driver.angle(channel).unwrap_or(angle)
    );
    Ok(())
}
