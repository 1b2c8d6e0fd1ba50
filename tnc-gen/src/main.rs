use std::fs::File;
use std::io::BufWriter;

use clap::Parser;
use rand::Rng;
use rand::rngs::StdRng;
use rand::SeedableRng;

use ax25::packet::Packet;
use tnc_lib::audio::{SampleFormat, WavWriter};
use tnc_lib::config::ModemConfig;
use tnc_lib::transmit::{ChannelAccess, Modulator, build_transmission};

/// Generate a WAV file of modem audio from AX.25 test frames.
#[derive(Parser)]
#[command(name = "tnc-gen")]
struct Args {
    /// Signal amplitude in percent (0..200)
    #[arg(short = 'a', default_value_t = 50)]
    amplitude: u32,

    /// Baud rate with standard settings: 300, 1200, or 9600
    #[arg(short = 'B', default_value_t = 1200)]
    baud: u32,

    /// Raw bits per second, keeping the tone pair from -m/-s
    #[arg(short = 'b')]
    bits_per_sec: Option<u32>,

    /// Scrambled baseband regardless of baud rate
    #[arg(short = 'g')]
    scrambled: bool,

    /// Mark tone frequency in Hz
    #[arg(short = 'm')]
    mark_freq: Option<u32>,

    /// Space tone frequency in Hz
    #[arg(short = 's')]
    space_freq: Option<u32>,

    /// Audio sample rate
    #[arg(short = 'r', default_value_t = 44100)]
    sample_rate: u32,

    /// Generate this many frames with steadily increasing noise
    #[arg(short = 'n')]
    noise_sweep: Option<u32>,

    /// Output .wav file
    #[arg(short = 'o')]
    output: String,

    /// Write 8-bit samples instead of 16
    #[arg(short = '8')]
    eight_bit: bool,

    /// Write stereo (same signal in both channels)
    #[arg(short = '2')]
    stereo: bool,

    /// Leading zero bits for clock training
    #[arg(short = 'z', default_value_t = 0)]
    zero_bits: usize,

    /// Morse code speed in WPM (not supported in this build)
    #[arg(short = 'M')]
    morse_wpm: Option<u32>,

    /// Display version and quit
    #[arg(long)]
    version: bool,

    /// Monitor-format frame to send; default is a numbered test frame
    frame: Option<String>,
}

fn main() {
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    if let Err(e) = run(&args) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    if args.version {
        print_version();
        return Ok(());
    }
    if args.morse_wpm.is_some() {
        return Err("Morse output is not supported in this build".into());
    }
    if args.amplitude > 200 {
        return Err(format!("amplitude {}% not in 0..200", args.amplitude).into());
    }

    let mut cfg = ModemConfig::for_baud(args.baud, args.sample_rate);
    if let Some(b) = args.bits_per_sec {
        cfg.baud = b;
    }
    if let Some(m) = args.mark_freq {
        cfg.mark_freq = m;
    }
    if let Some(s) = args.space_freq {
        cfg.space_freq = s;
    }
    if args.scrambled {
        cfg.scrambled = true;
    }
    if !cfg.scrambled && cfg.space_freq == cfg.mark_freq {
        return Err("mark and space tones must differ".into());
    }

    let count = args.noise_sweep.unwrap_or(1);
    let frames = build_frames(args.frame.as_deref(), count)?;

    log::info!(
        "{} frame(s) at {} bd, {} Hz sample rate -> {}",
        frames.len(),
        cfg.baud,
        cfg.sample_rate,
        args.output,
    );

    let mut audio: Vec<i16> = Vec::new();
    let mut rng = StdRng::seed_from_u64(1);
    for (i, frame) in frames.iter().enumerate() {
        let line = build_transmission(&cfg, &ChannelAccess::default(), args.zero_bits, &[frame]);
        let mut modulator = Modulator::new(&cfg, args.amplitude);
        let start = audio.len();
        modulator.modulate(&line, &mut audio);

        // Noise sweep: frame k of n gets noise proportional to k/n, so a
        // decode run shows where the modem gives up.
        if args.noise_sweep.is_some() && count > 1 {
            let noise = 16384.0 * i as f64 / count as f64;
            for s in audio[start..].iter_mut() {
                let n = rng.random_range(-1.0..1.0) * noise;
                *s = (*s as f64 + n).clamp(i16::MIN as f64, i16::MAX as f64) as i16;
            }
        }
        // Short gap between transmissions.
        audio.extend(std::iter::repeat_n(0i16, (cfg.sample_rate / 10) as usize));
    }

    let format = SampleFormat {
        sample_rate: cfg.sample_rate,
        channels: if args.stereo { 2 } else { 1 },
        bits_per_sample: if args.eight_bit { 8 } else { 16 },
    };
    let file = File::create(&args.output)
        .map_err(|e| format!("cannot create {}: {e}", args.output))?;
    let mut wav = WavWriter::create(BufWriter::new(file), format)?;
    for &s in &audio {
        wav.write_sample(s)?;
        if args.stereo {
            wav.write_sample(s)?;
        }
    }
    wav.finish()?;

    log::info!("wrote {} samples", audio.len());
    Ok(())
}

fn build_frames(monitor: Option<&str>, count: u32) -> Result<Vec<Packet>, Box<dyn std::error::Error>> {
    if let Some(text) = monitor {
        let pkt = Packet::from_text(text, false).map_err(|e| format!("bad frame text: {e}"))?;
        return Ok(vec![pkt]);
    }
    (1..=count)
        .map(|i| {
            let text = format!(
                "WB2OSZ-15>TEST:,The quick brown fox jumps over the lazy dog!  {i} of {count}"
            );
            Packet::from_text(&text, false)
                .map_err(|e| format!("bad frame text: {e}").into())
        })
        .collect()
}

fn print_version() {
    println!("TNC audio generator");
    println!();
    let release = env!("RELEASE_VERSION");
    let commit = env!("GIT_COMMIT");
    println!("\tVersion:     {}", env!("CARGO_PKG_VERSION"));
    if !release.is_empty() {
        println!("\tGit tag:     {release}");
    }
    if !commit.is_empty() {
        println!("\tGit commit:  {commit}");
    }
}
