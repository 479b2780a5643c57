//! Capture a few seconds from an input device into a WAV file.
//!
//! Exercises the full path — device, handoff, ring, consuming reader — and
//! prints the worker counters when done.
//!
//! ```text
//! record [--device NAME] [--seconds N] [--output PATH] [--list]
//! ```

#[cfg(not(feature = "audio-cpal"))]
fn main() {
    eprintln!("record requires the 'audio-cpal' feature");
    std::process::exit(1);
}

#[cfg(feature = "audio-cpal")]
fn main() {
    if let Err(e) = run() {
        eprintln!("record failed: {e}");
        std::process::exit(1);
    }
}

#[cfg(feature = "audio-cpal")]
fn run() -> Result<(), String> {
    use micstream::source::device::list_input_devices;
    use micstream::{CaptureConfig, CaptureEngine};
    use std::path::PathBuf;

    struct Args {
        device: Option<String>,
        seconds: u64,
        output: PathBuf,
        list: bool,
    }

    fn parse_args() -> Result<Args, String> {
        let mut device: Option<String> = None;
        let mut seconds: u64 = 5;
        let mut output = PathBuf::from("capture.wav");
        let mut list = false;

        let mut it = std::env::args().skip(1);
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "--device" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --device".into());
                    };
                    device = Some(v);
                }
                "--seconds" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --seconds".into());
                    };
                    seconds = v
                        .parse::<u64>()
                        .map_err(|_| "invalid value for --seconds".to_string())?
                        .clamp(1, 600);
                }
                "--output" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --output".into());
                    };
                    output = PathBuf::from(v);
                }
                "--list" => list = true,
                other => return Err(format!("unknown argument: {other}")),
            }
        }

        Ok(Args {
            device,
            seconds,
            output,
            list,
        })
    }

    let args = parse_args()?;

    if args.list {
        for info in list_input_devices() {
            let marker = if info.is_default { " (default)" } else { "" };
            println!("{}{}", info.name, marker);
        }
        return Ok(());
    }

    let engine = CaptureEngine::new(CaptureConfig {
        preferred_device: args.device.clone(),
        ..Default::default()
    });

    let ring = engine.start().map_err(|e| e.to_string())?;
    let spec = ring.frame_spec();
    println!(
        "capturing {} s at {} Hz, {} channel(s) → {}",
        args.seconds,
        spec.sample_rate,
        spec.channels,
        args.output.display()
    );

    let mut writer = hound::WavWriter::create(
        &args.output,
        hound::WavSpec {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        },
    )
    .map_err(|e| e.to_string())?;

    let chunk_bytes = CaptureConfig::default().chunk_frames * spec.frame_size();
    let target_bytes = spec.bytes_per_second() * args.seconds as usize;
    let mut written = 0usize;

    let reader = ring.stream_reader();
    for chunk in reader.chunks(chunk_bytes).map_err(|e| e.to_string())? {
        for sample in chunk.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([sample[0], sample[1]]))
                .map_err(|e| e.to_string())?;
        }
        written += chunk.len();
        if written >= target_bytes {
            break;
        }
    }

    engine.stop().map_err(|e| e.to_string())?;
    writer.finalize().map_err(|e| e.to_string())?;

    let snapshot = engine.diagnostics_snapshot();
    println!(
        "{}",
        serde_json::to_string_pretty(&snapshot).map_err(|e| e.to_string())?
    );
    println!("wrote {written} bytes to {}", args.output.display());
    Ok(())
}
