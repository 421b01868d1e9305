//! Master mixer: layer registry and final bus summation
//!
//! The [`Mixer`] owns the named layers, sums their output with the master
//! gain and envelope, clips, and hands the device bridge a finished chunk —
//! either as normalized f32 for callback devices or as little-endian PCM
//! bytes in the configured sample format for blocking sinks.

use crate::config::{AudioConfig, SampleFormat};
use crate::error::{PlaybackError, Result};
use crate::playback::fade::FadeEnvelope;
use crate::playback::layer::{AudioLayer, LayerParams};
use crate::playback::state::{Gain, Playback, PlaybackStatus};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

struct MixerState {
    status: PlaybackStatus,
    volume: f32,
    envelope: FadeEnvelope,
    layers: BTreeMap<String, AudioLayer>,
}

struct MixerShared {
    config: AudioConfig,
    inner: Mutex<MixerState>,
}

/// Registry of named layers and the final summation bus.
///
/// Cheap to clone; all clones share one mixer. The audio thread drives
/// [`Mixer::next_chunk`] through a device bridge while callers manipulate
/// layers and voices from any thread.
#[derive(Clone)]
pub struct Mixer {
    shared: Arc<MixerShared>,
}

impl Mixer {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            shared: Arc::new(MixerShared {
                config,
                inner: Mutex::new(MixerState {
                    status: PlaybackStatus::Stopped,
                    volume: 1.0,
                    envelope: FadeEnvelope::new(config.sample_rate()),
                    layers: BTreeMap::new(),
                }),
            }),
        }
    }

    pub fn config(&self) -> &AudioConfig {
        &self.shared.config
    }

    /// Create a named layer. Fails on a name collision.
    ///
    /// The new layer inherits the mixer's lifecycle: creating a layer on a
    /// playing mixer starts it immediately.
    pub fn create_layer(&self, name: &str, params: LayerParams) -> Result<AudioLayer> {
        let mut inner = self.shared.inner.lock().unwrap();
        if inner.layers.contains_key(name) {
            return Err(PlaybackError::LayerExists {
                name: name.to_string(),
            }
            .into());
        }
        let layer = AudioLayer::new(name, self.shared.config, params)?;
        if inner.status == PlaybackStatus::Playing {
            layer.play()?;
        }
        info!("created layer '{name}'");
        inner.layers.insert(name.to_string(), layer.clone());
        Ok(layer)
    }

    /// Create a named layer, stopping and replacing any existing one.
    pub fn create_or_replace_layer(&self, name: &str, params: LayerParams) -> Result<AudioLayer> {
        let replaced = {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.layers.remove(name)
        };
        if let Some(old) = replaced {
            debug!("replacing layer '{name}'");
            let _ = old.stop();
        }
        self.create_layer(name, params)
    }

    pub fn layer(&self, name: &str) -> Option<AudioLayer> {
        self.shared.inner.lock().unwrap().layers.get(name).cloned()
    }

    pub fn layer_names(&self) -> Vec<String> {
        self.shared
            .inner
            .lock()
            .unwrap()
            .layers
            .keys()
            .cloned()
            .collect()
    }

    /// Stop and remove a layer.
    pub fn delete_layer(&self, name: &str) -> Result<()> {
        let removed = self.shared.inner.lock().unwrap().layers.remove(name);
        match removed {
            Some(layer) => {
                let _ = layer.stop();
                info!("deleted layer '{name}'");
                Ok(())
            }
            None => Err(PlaybackError::LayerNotFound {
                name: name.to_string(),
            }
            .into()),
        }
    }

    /// Sample-accurate fade of the whole mix up to unity gain.
    pub fn fade_in(&self, duration_s: f64) {
        self.shared
            .inner
            .lock()
            .unwrap()
            .envelope
            .start_fade_in(duration_s, 1.0);
    }

    /// Sample-accurate fade of the whole mix to silence; all layers stop
    /// when the fade completes.
    pub fn fade_out(&self, duration_s: f64) {
        self.shared
            .inner
            .lock()
            .unwrap()
            .envelope
            .start_fade_out(duration_s, 0.0);
    }

    /// Mix the next `frames` frames into `out` (interleaved f32, clipped to
    /// [-1, 1]). `out` must hold `frames × channels` samples. Zero-fills
    /// when nothing is playing.
    pub fn next_chunk(&self, frames: usize, out: &mut [f32]) {
        let samples = self.shared.config.samples_for(frames).min(out.len());
        let out = &mut out[..samples];
        out.fill(0.0);

        let layers: Vec<AudioLayer> = {
            let inner = self.shared.inner.lock().unwrap();
            if inner.status != PlaybackStatus::Playing {
                return;
            }
            inner.layers.values().cloned().collect()
        };

        for layer in layers {
            if let Some(chunk) = layer.next_chunk(frames) {
                for (acc, sample) in out.iter_mut().zip(chunk.iter()) {
                    *acc += sample;
                }
            }
        }

        let channels = self.shared.config.channels() as usize;
        let mut faded_out = false;
        {
            let mut inner = self.shared.inner.lock().unwrap();
            let mut gains = vec![0.0f32; frames];
            let completed = inner.envelope.multipliers(&mut gains);
            let volume = inner.volume;
            for (frame_idx, g) in gains.iter().enumerate() {
                let scale = g * volume;
                let start = frame_idx * channels;
                if start >= out.len() {
                    break;
                }
                let end = (start + channels).min(out.len());
                for sample in &mut out[start..end] {
                    *sample = (*sample * scale).clamp(-1.0, 1.0);
                }
            }
            if completed && inner.envelope.target_gain() <= 1e-6 {
                faded_out = true;
            }
        }
        if faded_out {
            debug!("master faded out, stopping all layers");
            let _ = self.stop();
        }
    }

    /// Mix the next `frames` frames and encode them as interleaved
    /// little-endian PCM in the configured sample format.
    pub fn next_chunk_bytes(&self, frames: usize, out: &mut Vec<u8>) {
        let mut samples = vec![0.0f32; self.shared.config.samples_for(frames)];
        self.next_chunk(frames, &mut samples);

        out.clear();
        out.reserve(samples.len() * self.shared.config.sample_format().bytes_per_sample());
        match self.shared.config.sample_format() {
            SampleFormat::Int16 => {
                for s in samples {
                    out.extend_from_slice(&((s * i16::MAX as f32) as i16).to_le_bytes());
                }
            }
            SampleFormat::Int32 => {
                for s in samples {
                    out.extend_from_slice(&((s as f64 * i32::MAX as f64) as i32).to_le_bytes());
                }
            }
            SampleFormat::Float32 => {
                for s in samples {
                    out.extend_from_slice(&s.to_le_bytes());
                }
            }
        }
    }
}

impl Playback for Mixer {
    fn status(&self) -> PlaybackStatus {
        self.shared.inner.lock().unwrap().status
    }

    /// Broadcast play to every layer.
    fn play(&self) -> Result<()> {
        let layers: Vec<AudioLayer> = {
            let mut inner = self.shared.inner.lock().unwrap();
            if !inner.status.check_play()? {
                return Ok(());
            }
            inner.status = PlaybackStatus::Playing;
            info!("mixer playing");
            inner.layers.values().cloned().collect()
        };
        for layer in layers {
            if let Err(e) = layer.play() {
                warn!("layer '{}' failed to start: {}", layer.name(), e);
            }
        }
        Ok(())
    }

    /// Broadcast pause to every playing layer.
    fn pause(&self) -> Result<()> {
        let layers: Vec<AudioLayer> = {
            let mut inner = self.shared.inner.lock().unwrap();
            if !inner.status.check_pause()? {
                return Ok(());
            }
            inner.status = PlaybackStatus::Paused;
            info!("mixer paused");
            inner.layers.values().cloned().collect()
        };
        for layer in layers {
            if let Err(e) = layer.pause() {
                debug!("layer '{}' not pausable: {}", layer.name(), e);
            }
        }
        Ok(())
    }

    /// Broadcast stop to every layer, clearing their queues.
    fn stop(&self) -> Result<()> {
        let layers: Vec<AudioLayer> = {
            let mut inner = self.shared.inner.lock().unwrap();
            if !inner.status.check_stop()? {
                return Ok(());
            }
            inner.status = PlaybackStatus::Stopped;
            info!("mixer stopped");
            inner.layers.values().cloned().collect()
        };
        for layer in layers {
            if let Err(e) = layer.stop() {
                debug!("layer '{}' not stoppable: {}", layer.name(), e);
            }
        }
        Ok(())
    }
}

impl Gain for Mixer {
    fn volume(&self) -> f32 {
        self.shared.inner.lock().unwrap().volume
    }

    fn set_volume(&self, volume: f32) {
        self.shared.inner.lock().unwrap().volume = volume.clamp(0.0, 1.0);
    }
}
