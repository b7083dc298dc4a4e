//! irfx - real-time impulse response convolution
//!
//! Streams the default input device through a convolution engine to the
//! default output device. The engine is controlled with commands typed on
//! stdin; `help` lists them.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::RecvTimeoutError;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::HeapRb;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use irfx_analysis::KernelSpectrum;
use irfx_audio::{ConvolutionEngine, ConvolverHandle, EffectChain, LoaderPool, NodeEvent, NodeHandle};
use irfx_library::{
    combine_kernels, save_kernel, AutoGain, Config, IrLoader, Kernel, KernelDirectory,
    IRS_EXTENSION,
};

/// Largest chunk handed to the chain per pass of the output callback
const MAX_FRAMES: usize = 8192;

/// Capacity of the input-to-output sample ring (interleaved stereo)
const RING_CAPACITY: usize = 48000 * 2;

/// Points per curve printed by `spectrum`
const SPECTRUM_POINTS: usize = 16;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = Config::load();
    let directory = config
        .ir_directory
        .clone()
        .map(KernelDirectory::new)
        .unwrap_or_default();

    // An IR given on the command line overrides the saved one
    if let Some(name) = std::env::args().nth(1) {
        let path = directory
            .resolve(&name)
            .ok_or_else(|| anyhow!("Impulse response '{}' not found", name))?;
        config.convolver.kernel_path = Some(path);
    }

    let pool = LoaderPool::default();
    let engine = ConvolutionEngine::new(&pool, config.convolver.clone());
    let handle = engine.handle();

    let mut chain = EffectChain::new();
    chain.push(Box::new(engine))?;

    let streams = start_audio(chain, config.block_size)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let monitor = {
        let node = handle.node().clone();
        let shutdown = shutdown.clone();
        thread::spawn(move || log_events(node, shutdown))
    };

    let result = run_commands(&handle, &directory, &mut config);

    shutdown.store(true, Ordering::SeqCst);
    drop(streams);
    let _ = monitor.join();

    result
}

/// Open the default devices and start streaming through `chain`
fn start_audio(
    mut chain: EffectChain,
    block_size: usize,
) -> anyhow::Result<(Option<cpal::Stream>, cpal::Stream)> {
    let host = cpal::default_host();

    let output = host
        .default_output_device()
        .ok_or_else(|| anyhow!("No audio output device found"))?;
    let output_config = output
        .default_output_config()
        .context("Failed to get output config")?;

    let sample_rate = output_config.sample_rate().0;
    let out_channels = output_config.channels() as usize;

    chain.configure(sample_rate, block_size)?;

    let (mut producer, mut consumer) = HeapRb::<f32>::new(RING_CAPACITY).split();

    let input_stream = match host.default_input_device() {
        Some(device) => {
            let input_config = device
                .default_input_config()
                .context("Failed to get input config")?;

            if input_config.sample_rate().0 != sample_rate {
                warn!(
                    "Input runs at {} Hz but output at {} Hz, input disabled",
                    input_config.sample_rate().0,
                    sample_rate
                );
                None
            } else {
                let in_channels = (input_config.channels() as usize).max(1);
                let stream = device.build_input_stream(
                    &input_config.into(),
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        for frame in data.chunks(in_channels) {
                            let left = frame[0];
                            let right = frame.get(1).copied().unwrap_or(left);
                            let _ = producer.try_push(left);
                            let _ = producer.try_push(right);
                        }
                    },
                    |err| warn!("Input stream error: {}", err),
                    None,
                )?;
                stream.play()?;
                Some(stream)
            }
        }
        None => {
            warn!("No audio input device found, processing silence");
            None
        }
    };

    // Pre-allocated planar buffers (no allocation in the audio callback)
    let mut left = vec![0.0f32; MAX_FRAMES];
    let mut right = vec![0.0f32; MAX_FRAMES];

    let output_stream = output.build_output_stream(
        &output_config.into(),
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            for chunk in data.chunks_mut(MAX_FRAMES * out_channels) {
                let frames = chunk.len() / out_channels;

                for i in 0..frames {
                    left[i] = consumer.try_pop().unwrap_or(0.0);
                    right[i] = consumer.try_pop().unwrap_or(0.0);
                }

                chain.process(&mut left[..frames], &mut right[..frames]);

                for (i, frame) in chunk.chunks_mut(out_channels).enumerate() {
                    if out_channels == 1 {
                        frame[0] = (left[i] + right[i]) * 0.5;
                    } else {
                        frame[0] = left[i];
                        frame[1] = right[i];
                        frame[2..].fill(0.0);
                    }
                }
            }
        },
        |err| warn!("Output stream error: {}", err),
        None,
    )?;
    output_stream.play()?;

    info!(
        "Streaming at {} Hz, {} output channels, nominal block {}",
        sample_rate, out_channels, block_size
    );

    Ok((input_stream, output_stream))
}

/// Log node events until shutdown
fn log_events(node: NodeHandle, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        match node.events().recv_timeout(Duration::from_millis(100)) {
            Ok(NodeEvent::Levels(levels)) => {
                let (in_l, in_r) = levels.input_db();
                let (out_l, out_r) = levels.output_db();
                debug!(
                    "Levels in {:.1}/{:.1} dB, out {:.1}/{:.1} dB",
                    in_l, in_r, out_l, out_r
                );
            }
            Ok(NodeEvent::Latency(seconds)) => {
                info!("Latency {:.2} ms", seconds * 1000.0);
            }
            Ok(NodeEvent::KernelLoaded(info)) => {
                info!(
                    "Kernel active: {} samples, {:.2} s, {} Hz (file {} Hz), width {}%",
                    info.samples,
                    info.duration_secs,
                    info.rate,
                    info.native_rate,
                    info.width_percent
                );
            }
            Ok(NodeEvent::LoadFailed(message)) => warn!("Kernel load failed: {}", message),
            Ok(NodeEvent::ProcessingFault) => {
                warn!("Convolution fault, passing audio through until reconfigured")
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

const HELP: &str = "\
commands:
  load <name|path>        load an impulse response
  clear                   remove the impulse response (pass-through)
  reload                  rebuild the current impulse response
  width <0-200>           stereo width in percent
  autogain <off|peak|rms> kernel normalization
  in <dB> | out <dB>      input / output gain
  bypass [on|off]         bypass the convolver
  list                    list impulse responses
  combine <a> <b> <name>  convolve two impulse responses into a new one
  spectrum                print the kernel frequency response
  status                  show engine state
  save                    store settings
  quit";

fn run_commands(
    handle: &ConvolverHandle,
    directory: &KernelDirectory,
    config: &mut Config,
) -> anyhow::Result<()> {
    let stdin = io::stdin();
    println!("{}", HELP);
    prompt()?;

    for line in stdin.lock().lines() {
        let line = line?;
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            prompt()?;
            continue;
        };
        let args: Vec<&str> = words.collect();

        match (command, args.as_slice()) {
            ("quit" | "exit" | "q", _) => break,
            ("help" | "?", _) => println!("{}", HELP),
            ("load", [name]) => match directory.resolve(name) {
                Some(path) => handle.set_kernel_path(Some(path)),
                None => println!("not found: {}", name),
            },
            ("clear", _) => handle.set_kernel_path(None),
            ("reload", _) => handle.reload(),
            ("width", [value]) => match value.parse::<u32>() {
                Ok(width) => handle.set_ir_width(width),
                Err(_) => println!("width must be a whole number"),
            },
            ("autogain", [value]) => match AutoGain::parse(value) {
                Some(mode) => handle.set_autogain(mode),
                None => println!("autogain must be off, peak or rms"),
            },
            ("in", [value]) => match value.parse::<f32>() {
                Ok(db) => {
                    handle.node().set_input_gain_db(db);
                    config.convolver.input_gain_db = db;
                }
                Err(_) => println!("gain must be a number in dB"),
            },
            ("out", [value]) => match value.parse::<f32>() {
                Ok(db) => {
                    handle.node().set_output_gain_db(db);
                    config.convolver.output_gain_db = db;
                }
                Err(_) => println!("gain must be a number in dB"),
            },
            ("bypass", rest) => {
                let bypass = match rest.first() {
                    Some(&"on") => true,
                    Some(&"off") => false,
                    _ => !handle.node().is_bypassed(),
                };
                handle.node().set_bypass(bypass);
                config.convolver.bypass = bypass;
                println!("bypass {}", if bypass { "on" } else { "off" });
            }
            ("list", _) => {
                for path in directory.list() {
                    println!("  {}", path.display());
                }
            }
            ("combine", [a, b, name]) => match combine(directory, a, b, name) {
                Ok(path) => println!("saved {}", path.display()),
                Err(e) => println!("combine failed: {:#}", e),
            },
            ("spectrum", _) => print_spectrum(handle),
            ("status", _) => print_status(handle),
            ("save", _) => {
                let gains = (config.convolver.input_gain_db, config.convolver.output_gain_db);
                config.convolver = handle.settings();
                (config.convolver.input_gain_db, config.convolver.output_gain_db) = gains;
                config.convolver.bypass = handle.node().is_bypassed();
                match config.save() {
                    Ok(()) => println!("saved {}", Config::config_path().display()),
                    Err(e) => println!("could not save settings: {}", e),
                }
            }
            _ => println!("unknown command, type 'help'"),
        }

        prompt()?;
    }

    Ok(())
}

fn prompt() -> io::Result<()> {
    print!("irfx> ");
    io::stdout().flush()
}

fn print_status(handle: &ConvolverHandle) {
    let node = handle.node();
    println!("  status:  {}", handle.status().as_str());
    println!("  bypass:  {}", node.is_bypassed());
    println!("  latency: {:.2} ms", node.latency_seconds() * 1000.0);
    println!(
        "  gain:    in {:.2}x, out {:.2}x",
        node.input_gain(),
        node.output_gain()
    );

    let settings = handle.settings();
    if let Some(path) = settings.kernel_path {
        println!("  kernel:  {}", path.display());
    }
    println!(
        "  width:   {}%, autogain {}",
        settings.ir_width,
        settings.autogain.as_str()
    );

    if let Some(info) = handle.kernel_info() {
        println!(
            "  loaded:  {} samples, {:.3} s at {} Hz",
            info.samples, info.duration_secs, info.rate
        );
    }
    if let Some(error) = handle.last_error() {
        println!("  error:   {}", error);
    }
}

fn print_spectrum(handle: &ConvolverHandle) {
    let Some(kernel) = handle.kernel() else {
        println!("no kernel loaded");
        return;
    };

    let spectrum = KernelSpectrum::compute(
        kernel.left(),
        kernel.right(),
        kernel.rate(),
        SPECTRUM_POINTS,
    );
    if spectrum.is_empty() {
        println!("kernel too short for a spectrum");
        return;
    }

    for (l, r) in spectrum.log_left.iter().zip(&spectrum.log_right) {
        let bar = |m: f32| "#".repeat((m * 40.0).round() as usize);
        println!("{:>8.0} Hz  L {:<40} R {}", l.freq, bar(l.magnitude), bar(r.magnitude));
    }
}

/// Convolve two kernel files and save the result next to the others
fn combine(directory: &KernelDirectory, a: &str, b: &str, name: &str) -> anyhow::Result<PathBuf> {
    let first = read_kernel(directory, a)?;
    let second = read_kernel(directory, b)?;
    let combined = combine_kernels(&first, &second)?;

    let mut path = if Path::new(name).is_absolute() {
        PathBuf::from(name)
    } else {
        directory.root().join(name)
    };
    if path.extension().is_none() {
        path.set_extension(IRS_EXTENSION);
    }

    save_kernel(&combined, &path)?;
    Ok(path)
}

/// Load a kernel file as-is, at its own rate
fn read_kernel(directory: &KernelDirectory, name: &str) -> anyhow::Result<Kernel> {
    let path = directory
        .resolve(name)
        .ok_or_else(|| anyhow!("Impulse response '{}' not found", name))?;
    let decoded = IrLoader::decode(&path)?;
    let rate = decoded.rate;
    let (left, right) = decoded.into_stereo()?;
    Ok(Kernel::new(left, right, rate)?)
}
