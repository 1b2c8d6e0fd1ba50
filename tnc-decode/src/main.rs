use std::fs::File;
use std::io::{BufReader, Read};

use clap::Parser;

use ax25::Modulo;
use ax25::packet::AudioLevel;
use tnc_lib::audio::WavReader;
use tnc_lib::config::{ModemConfig, Profile};
use tnc_lib::fixbits::{RetryLevel, SanityMode};
use tnc_lib::pipeline::{DecodedFrame, RxConfig, RxPipeline};

/// Decode AX.25 frames from a WAV recording of modem audio.
#[derive(Parser)]
#[command(name = "tnc-decode")]
struct Args {
    /// Baud rate: 300 (1600/1800 AFSK), 1200 (1200/2200 AFSK),
    /// 9600 (scrambled baseband)
    #[arg(short = 'B', default_value_t = 1200)]
    baud: u32,

    /// Demodulator profile letters A..F, '+' for extra slicers
    #[arg(short = 'P', default_value = "A")]
    profiles: String,

    /// Process every Nth sample (1..8)
    #[arg(short = 'D', default_value_t = 1)]
    decimate: u32,

    /// Fix-bits effort 0..4: none, single, double-adjacent,
    /// triple-adjacent, two-separated
    #[arg(short = 'F', default_value_t = 0)]
    fix_bits: u32,

    /// Fail (exit 1) when fewer frames than this decode
    #[arg(short = 'L')]
    min_frames: Option<usize>,

    /// Fail (exit 1) when more frames than this decode
    #[arg(short = 'G')]
    max_frames: Option<usize>,

    /// Decode only the left channel of stereo input
    #[arg(short = '0', group = "stereo")]
    left: bool,

    /// Decode only the right channel of stereo input
    #[arg(short = '1', group = "stereo")]
    right: bool,

    /// Decode both stereo channels as two separate channels
    #[arg(short = '2', group = "stereo")]
    both: bool,

    /// Emit one JSON object per decoded frame instead of monitor text
    #[arg(long)]
    json: bool,

    /// Display version and quit
    #[arg(long)]
    version: bool,

    /// Input .wav file, or '-' for standard input
    input: Option<String>,
}

#[derive(serde::Serialize)]
struct JsonFrame {
    chan: usize,
    subchan: usize,
    slice: usize,
    flips: usize,
    suspect: bool,
    audio_level: Option<AudioLevel>,
    frame_type: String,
    addrs: String,
    info: String,
}

fn main() {
    // Reset SIGPIPE to default so piped output (e.g. head/tail) exits cleanly
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
            // Argument problems are an exit status of 1, like every other
            // failure of this tool.
            let _ = e.print();
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    match run(&args) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    }
}

fn run(args: &Args) -> Result<bool, Box<dyn std::error::Error>> {
    if args.version {
        print_version();
        return Ok(true);
    }

    let profiles = Profile::parse(&args.profiles)
        .ok_or_else(|| format!("bad profile string '{}'", args.profiles))?;
    if !(1..=8).contains(&args.decimate) {
        return Err(format!("decimate {} not in 1..8", args.decimate).into());
    }
    let retry = RetryLevel::from_cli(args.fix_bits)
        .ok_or_else(|| format!("fix-bits level {} not in 0..4", args.fix_bits))?;

    let input = args.input.as_deref().ok_or("expected a .wav file or '-'")?;
    let reader: Box<dyn Read> = if input == "-" {
        Box::new(std::io::stdin().lock())
    } else {
        Box::new(BufReader::new(
            File::open(input).map_err(|e| format!("cannot open {input}: {e}"))?,
        ))
    };
    let mut wav = WavReader::open(reader)?;
    let format = wav.format();
    log::info!(
        "{} Hz, {} bit, {} channel(s); {} bd, profile {}",
        format.sample_rate,
        format.bits_per_sample,
        format.channels,
        args.baud,
        args.profiles,
    );

    // Which stereo channels feed which modem channel.
    let taps: Vec<usize> = if format.channels == 2 {
        if args.right {
            vec![1]
        } else if args.both {
            vec![0, 1]
        } else {
            vec![0]
        }
    } else {
        vec![0]
    };

    let mut cfg = ModemConfig::for_baud(args.baud, format.sample_rate);
    cfg.profiles = profiles;
    cfg.decimate = args.decimate;
    let configs: Vec<ModemConfig> = taps.iter().map(|_| cfg.clone()).collect();

    let rx_config = RxConfig {
        retry,
        sanity: SanityMode::Aprs,
        passall: false,
    };
    let (mut pipeline, frames_rx) = RxPipeline::new(&configs, rx_config);

    // Application worker: print frames as they decode, count them.
    let json = args.json;
    let printer = std::thread::spawn(move || {
        let mut count = 0usize;
        for frame in frames_rx {
            print_frame(&frame, json);
            count += 1;
        }
        count
    });

    while let Some(frame) = wav.read_frame() {
        for (modem_chan, &tap) in taps.iter().enumerate() {
            pipeline.process_sample(modem_chan, frame[tap] as f32 / 32768.0);
        }
    }
    pipeline.finish();
    let count = printer.join().expect("printer thread panicked");

    log::info!("{} frame(s) decoded", count);
    if let Some(min) = args.min_frames
        && count < min
    {
        log::error!("decoded {count} frame(s), wanted at least {min}");
        return Ok(false);
    }
    if let Some(max) = args.max_frames
        && count > max
    {
        log::error!("decoded {count} frame(s), wanted at most {max}");
        return Ok(false);
    }
    Ok(true)
}

fn print_frame(frame: &DecodedFrame, json: bool) {
    let packet = &frame.packet;
    let frame_type = packet.frame_type(Modulo::Eight);
    if json {
        let j = JsonFrame {
            chan: frame.chan,
            subchan: frame.subchan,
            slice: frame.slice,
            flips: frame.flips,
            suspect: frame.suspect,
            audio_level: packet.alevel(),
            frame_type: frame_type.to_string(),
            addrs: packet.format_addrs(),
            info: escape_info(packet.info()),
        };
        match serde_json::to_string(&j) {
            Ok(line) => println!("{line}"),
            Err(e) => log::error!("cannot serialise frame: {e}"),
        }
        return;
    }

    let level = packet
        .alevel()
        .map(|a| format!(" ({a})"))
        .unwrap_or_default();
    // APRS UI frames speak for themselves; anything else gets its control
    // field spelled out.
    let kind = if packet.is_aprs() {
        String::new()
    } else {
        format!(" <{frame_type}>")
    };
    let mark = if frame.suspect { " [bad fcs]" } else { "" };
    println!(
        "[{}.{}]{} {}{}{}{}",
        frame.chan,
        frame.subchan,
        level,
        packet.format_addrs(),
        escape_info(packet.info()),
        kind,
        mark,
    );
}

/// Printable info text with non-ASCII bytes as `<0xNN>`, the same escape
/// the monitor-text parser accepts.
fn escape_info(info: &[u8]) -> String {
    let mut out = String::with_capacity(info.len());
    for &b in info {
        if (0x20..0x7f).contains(&b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("<0x{b:02x}>"));
        }
    }
    out
}

fn print_version() {
    println!("TNC audio decoder");
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
