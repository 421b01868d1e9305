//! Device bridges
//!
//! Two shapes of host integration drive the master mixer:
//!
//! - [`AudioOutput`]: callback form over cpal. The device invokes the
//!   callback whenever it wants frames; the bridge pulls the mixer and
//!   converts to the device sample type.
//! - [`BlockingWriter`]: a writer thread that repeatedly pulls one buffer of
//!   encoded PCM and hands it to a host [`BlockingSink`], letting the sink's
//!   blocking write pace the loop.
//!
//! Neither bridge holds mixer locks for longer than one chunk.

use crate::config::AudioConfig;
use crate::error::{Error, Result};
use crate::playback::mixer::Mixer;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat as CpalFormat, Stream, StreamConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Callback-driven audio output over cpal.
///
/// The stream is not `Send`; the bridge lives with whoever created it,
/// typically alongside the mixer handle on the host's main thread.
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    sample_format: CpalFormat,
    stream: Option<Stream>,
}

impl AudioOutput {
    /// List available output device names.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| Error::Output(format!("failed to enumerate devices: {e}")))?
            .filter_map(|device| device.name().ok())
            .collect::<Vec<_>>();
        debug!("found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open an output device able to play the engine format.
    ///
    /// `device_name` of `None` selects the default device. Fails when no
    /// device config matches the engine rate and channel count.
    pub fn new(device_name: Option<&str>, config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(name) = device_name {
            host.output_devices()
                .map_err(|e| Error::Output(format!("failed to enumerate devices: {e}")))?
                .find(|d| d.name().ok().as_deref() == Some(name))
                .ok_or_else(|| Error::Output(format!("device '{name}' not found")))?
        } else {
            host.default_output_device()
                .ok_or_else(|| Error::Output("no default output device".to_string()))?
        };

        info!(
            "using audio device: {}",
            device.name().unwrap_or_else(|_| "unknown".to_string())
        );

        let (stream_config, sample_format) = Self::pick_config(&device, config)?;
        debug!(
            "device config: {} Hz, {} ch, {:?}",
            stream_config.sample_rate.0, stream_config.channels, sample_format
        );

        Ok(Self {
            device,
            config: stream_config,
            sample_format,
            stream: None,
        })
    }

    /// Find a supported device config matching the engine format, preferring
    /// f32 samples, then i16, then u16.
    fn pick_config(device: &Device, config: &AudioConfig) -> Result<(StreamConfig, CpalFormat)> {
        let rate = cpal::SampleRate(config.sample_rate());
        let supported: Vec<_> = device
            .supported_output_configs()
            .map_err(|e| Error::Output(format!("failed to query device configs: {e}")))?
            .filter(|c| {
                c.channels() == config.channels()
                    && c.min_sample_rate() <= rate
                    && c.max_sample_rate() >= rate
            })
            .collect();

        for wanted in [CpalFormat::F32, CpalFormat::I16, CpalFormat::U16] {
            if let Some(found) = supported.iter().find(|c| c.sample_format() == wanted) {
                let stream_config = found.clone().with_sample_rate(rate).config();
                return Ok((stream_config, wanted));
            }
        }

        Err(Error::Output(format!(
            "no device config supports {} Hz / {} ch",
            config.sample_rate(),
            config.channels()
        )))
    }

    /// Begin pulling the mixer from the device callback.
    ///
    /// The callback runs on the real-time audio thread; it pulls one chunk
    /// per invocation and performs no blocking work of its own.
    pub fn start(&mut self, mixer: Mixer) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        info!("starting audio stream");

        let channels = self.config.channels as usize;
        let err_fn = |e| warn!("audio stream error: {e}");

        let stream = match self.sample_format {
            CpalFormat::F32 => {
                let mut scratch: Vec<f32> = Vec::new();
                self.device
                    .build_output_stream(
                        &self.config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            let frames = data.len() / channels;
                            scratch.resize(frames * channels, 0.0);
                            mixer.next_chunk(frames, &mut scratch);
                            data.copy_from_slice(&scratch[..data.len()]);
                        },
                        err_fn,
                        None,
                    )
                    .map_err(|e| Error::Output(format!("failed to build stream: {e}")))?
            }
            CpalFormat::I16 => {
                let mut scratch: Vec<f32> = Vec::new();
                self.device
                    .build_output_stream(
                        &self.config,
                        move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                            let frames = data.len() / channels;
                            scratch.resize(frames * channels, 0.0);
                            mixer.next_chunk(frames, &mut scratch);
                            for (dst, src) in data.iter_mut().zip(scratch.iter()) {
                                *dst = (src * i16::MAX as f32) as i16;
                            }
                        },
                        err_fn,
                        None,
                    )
                    .map_err(|e| Error::Output(format!("failed to build stream: {e}")))?
            }
            CpalFormat::U16 => {
                let mut scratch: Vec<f32> = Vec::new();
                self.device
                    .build_output_stream(
                        &self.config,
                        move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                            let frames = data.len() / channels;
                            scratch.resize(frames * channels, 0.0);
                            mixer.next_chunk(frames, &mut scratch);
                            for (dst, src) in data.iter_mut().zip(scratch.iter()) {
                                *dst = ((src + 1.0) * 32767.5) as u16;
                            }
                        },
                        err_fn,
                        None,
                    )
                    .map_err(|e| Error::Output(format!("failed to build stream: {e}")))?
            }
            other => {
                return Err(Error::Output(format!(
                    "unsupported device sample format: {other:?}"
                )));
            }
        };

        stream
            .play()
            .map_err(|e| Error::Output(format!("failed to start stream: {e}")))?;
        self.stream = Some(stream);
        Ok(())
    }

    /// Stop and close the device stream.
    pub fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            info!("stopping audio stream");
            stream
                .pause()
                .map_err(|e| Error::Output(format!("failed to pause stream: {e}")))?;
        }
        Ok(())
    }

    pub fn device_name(&self) -> String {
        self.device.name().unwrap_or_else(|_| "unknown".to_string())
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Host-provided blocking PCM sink, e.g. a platform audio track handle.
///
/// `write` consumes interleaved little-endian PCM in the engine's configured
/// sample format and returns how many bytes it accepted; it may block until
/// the device drains, which paces the writer loop.
pub trait BlockingSink: Send {
    fn write(&mut self, bytes: &[u8]) -> Result<usize>;
}

/// Bridge that feeds a [`BlockingSink`] from a dedicated writer thread.
pub struct BlockingWriter {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl BlockingWriter {
    /// Spawn the writer loop, pulling `buffer_frames` per iteration.
    pub fn spawn(mixer: Mixer, mut sink: Box<dyn BlockingSink>) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let frames = mixer.config().buffer_frames();

        let thread = thread::Builder::new()
            .name("ambimix-writer".to_string())
            .spawn(move || {
                let mut buffer = Vec::new();
                'outer: while !stop_flag.load(Ordering::Relaxed) {
                    mixer.next_chunk_bytes(frames, &mut buffer);
                    let mut written = 0;
                    while written < buffer.len() {
                        match sink.write(&buffer[written..]) {
                            Ok(0) => {
                                warn!("sink accepted no bytes, stopping writer");
                                break 'outer;
                            }
                            Ok(n) => written += n,
                            Err(e) => {
                                warn!("sink write failed: {e}");
                                break 'outer;
                            }
                        }
                    }
                }
                debug!("writer thread exiting");
            })
            .map_err(Error::Io)?;

        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Stop the writer loop and join the thread.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BlockingWriter {
    fn drop(&mut self) {
        self.stop();
    }
}
