//! Shared fixtures and drivers for the integration suite
//!
//! Tests synthesize small WAV files instead of shipping audio assets, and
//! drive layers with a paced pull thread standing in for the audio device.

#![allow(dead_code)]

use ambimix::{AudioLayer, Sound};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Write a WAV of `seconds` of a sine tone.
pub fn write_sine_wav(
    path: &Path,
    seconds: f64,
    frequency: f32,
    sample_rate: u32,
    channels: u16,
) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let frames = (seconds * sample_rate as f64) as u32;
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let sample = ((2.0 * std::f32::consts::PI * frequency * t).sin() * 16384.0) as i16;
        for _ in 0..channels {
            writer.write_sample(sample).unwrap();
        }
    }
    writer.finalize().unwrap();
}

/// Write a WAV where every sample has the same value, which makes gain and
/// loop-boundary assertions exact.
pub fn write_constant_wav(
    path: &Path,
    frames: u32,
    value: i16,
    sample_rate: u32,
    channels: u16,
) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for _ in 0..frames {
        for _ in 0..channels {
            writer.write_sample(value).unwrap();
        }
    }
    writer.finalize().unwrap();
}

/// Write a WAV whose first `frames_a` frames hold `value_a` and the rest
/// `value_b`, for seek assertions.
pub fn write_two_level_wav(
    path: &Path,
    frames_a: u32,
    value_a: i16,
    frames_b: u32,
    value_b: i16,
    sample_rate: u32,
    channels: u16,
) {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for _ in 0..frames_a {
        for _ in 0..channels {
            writer.write_sample(value_a).unwrap();
        }
    }
    for _ in 0..frames_b {
        for _ in 0..channels {
            writer.write_sample(value_b).unwrap();
        }
    }
    writer.finalize().unwrap();
}

/// Temp directory plus convenience constructors for fixture files.
pub struct Fixtures {
    dir: tempfile::TempDir,
}

impl Fixtures {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn constant(&self, name: &str, frames: u32, value: i16, rate: u32, channels: u16) -> PathBuf {
        let path = self.dir.path().join(name);
        write_constant_wav(&path, frames, value, rate, channels);
        path
    }

    pub fn sine(&self, name: &str, seconds: f64, rate: u32, channels: u16) -> PathBuf {
        let path = self.dir.path().join(name);
        write_sine_wav(&path, seconds, 440.0, rate, channels);
        path
    }

    #[allow(clippy::too_many_arguments)]
    pub fn two_level(
        &self,
        name: &str,
        frames_a: u32,
        value_a: i16,
        frames_b: u32,
        value_b: i16,
        rate: u32,
        channels: u16,
    ) -> PathBuf {
        let path = self.dir.path().join(name);
        write_two_level_wav(&path, frames_a, value_a, frames_b, value_b, rate, channels);
        path
    }
}

/// Pull a voice to completion, concatenating everything it returns.
pub fn pull_until_stopped(sound: &Sound, chunk_frames: usize, max_pulls: usize) -> Vec<f32> {
    let mut all = Vec::new();
    for _ in 0..max_pulls {
        match sound.next_chunk(chunk_frames) {
            Some(data) => all.extend(data),
            None => break,
        }
    }
    all
}

/// Poll `condition` until it holds or the timeout elapses.
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    loop {
        if condition() {
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// Background thread pulling a layer at roughly real-time cadence, standing
/// in for the device callback.
pub struct LayerPuller {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LayerPuller {
    pub fn start(layer: AudioLayer, chunk_frames: usize) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let period =
            Duration::from_secs_f64(chunk_frames as f64 / layer.config().sample_rate() as f64);
        let handle = thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                let _ = layer.next_chunk(chunk_frames);
                thread::sleep(period);
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LayerPuller {
    fn drop(&mut self) {
        self.stop();
    }
}
