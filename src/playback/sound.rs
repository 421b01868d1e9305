//! Single playable voice
//!
//! A [`Sound`] wraps one decoder and one fade envelope behind a lock and
//! exposes the pull interface its layer mixes from. Format conversion to the
//! engine's canonical rate and channel layout happens here, as do loop
//! restarts, the automatic end-of-file fade-out, and the lifecycle
//! callbacks.
//!
//! The decoder is opened lazily on the first pull, so file errors surface as
//! a terminal `Error` status rather than from the constructor.

use crate::audio::convert::{convert_channels, LinearResampler};
use crate::audio::decoder::{Decoder, FileDecoder};
use crate::audio::streaming::StreamingDecoder;
use crate::config::AudioConfig;
use crate::error::{Error, Result};
use crate::playback::fade::{FadeCurve, FadeEnvelope};
use crate::playback::state::{Gain, Playback, PlaybackStatus};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Poll interval for [`Sound::wait`].
const WAIT_POLL: Duration = Duration::from_millis(100);

/// How many times the file plays in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    /// Play the file once
    Once,
    /// Play the file `n` times in total (`Times(1)` equals `Once`)
    Times(u32),
    /// Loop until stopped or evicted
    Infinite,
}

type Callback = Box<dyn FnMut() + Send>;

#[derive(Default)]
struct Callbacks {
    on_start: Option<Callback>,
    on_end: Option<Callback>,
}

/// Decode-and-convert state, present only while the sound is open.
struct Pipeline {
    decoder: Box<dyn Decoder>,
    native_channels: u16,
    resampler: Option<LinearResampler>,
    /// Converted frames waiting to be consumed, engine layout
    carry: Vec<f32>,
}

struct SoundState {
    status: PlaybackStatus,
    volume: f32,
    loop_mode: Option<LoopMode>,
    loop_count: u32,
    auto_fadeout_frames: Option<u64>,
    envelope: FadeEnvelope,
    pipeline: Option<Pipeline>,
    pending_seek: Option<f64>,
    /// Guards `on_end` so it fires at most once per play episode
    end_fired: bool,
}

/// A single playable voice: one file, one envelope, one decoder.
///
/// Shared as `Arc<Sound>` between the caller and the owning layer; all
/// mutation goes through the internal lock. Callbacks run synchronously on
/// the thread that caused the transition, after the lock is released, and
/// must stay cheap.
pub struct Sound {
    id: Uuid,
    path: PathBuf,
    config: AudioConfig,
    streaming: bool,
    inner: Mutex<SoundState>,
    callbacks: Mutex<Callbacks>,
}

impl Sound {
    /// Create a voice using the file-backed synchronous decoder.
    pub fn new(path: impl Into<PathBuf>, config: AudioConfig) -> Self {
        Self::build(path.into(), config, false)
    }

    /// Create a voice using the streaming decoder variant, which decodes
    /// ahead on a worker thread into a bounded ring.
    pub fn streaming(path: impl Into<PathBuf>, config: AudioConfig) -> Self {
        Self::build(path.into(), config, true)
    }

    fn build(path: PathBuf, config: AudioConfig, streaming: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            path,
            config,
            streaming,
            inner: Mutex::new(SoundState {
                status: PlaybackStatus::Stopped,
                volume: 1.0,
                loop_mode: None,
                loop_count: 0,
                auto_fadeout_frames: None,
                envelope: FadeEnvelope::new(config.sample_rate()),
                pipeline: None,
                pending_seek: None,
                end_fired: false,
            }),
            callbacks: Mutex::new(Callbacks::default()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// Set how many times the file plays. `Times(0)` is rejected.
    pub fn set_loop(&self, mode: LoopMode) -> Result<()> {
        if mode == LoopMode::Times(0) {
            return Err(Error::InvalidInput(
                "loop count of zero; use LoopMode::Once for a single play".to_string(),
            ));
        }
        self.inner.lock().unwrap().loop_mode = Some(mode);
        Ok(())
    }

    /// Explicitly requested loop mode, if any. When unset the layer default
    /// applies at enqueue, falling back to a single play.
    pub fn loop_mode(&self) -> Option<LoopMode> {
        self.inner.lock().unwrap().loop_mode
    }

    /// Completed passes of the file in the current episode.
    pub fn loop_count(&self) -> u32 {
        self.inner.lock().unwrap().loop_count
    }

    /// Arm an automatic fade-out covering the last `frames` output frames of
    /// the final pass. Silently inactive when the decoder cannot estimate
    /// its remaining length.
    pub fn set_auto_fadeout(&self, frames: Option<u64>) {
        self.inner.lock().unwrap().auto_fadeout_frames = frames;
    }

    pub fn set_fade_curve(&self, curve: FadeCurve) {
        self.inner.lock().unwrap().envelope.set_curve(curve);
    }

    /// Begin a fade from silence to full gain over `duration_s` seconds.
    ///
    /// The envelope advances only while frames are pulled, so arming a
    /// fade-in before playback (or before an enqueue delay elapses) still
    /// opens from silence.
    pub fn fade_in(&self, duration_s: f64) {
        self.inner
            .lock()
            .unwrap()
            .envelope
            .start_fade_in(duration_s, 1.0);
    }

    /// Begin a fade from the current gain to silence; the sound stops itself
    /// when the fade completes.
    pub fn fade_out(&self, duration_s: f64) {
        self.inner
            .lock()
            .unwrap()
            .envelope
            .start_fade_out(duration_s, 0.0);
    }

    pub(crate) fn is_fading_out(&self) -> bool {
        self.inner.lock().unwrap().envelope.is_fading_out()
    }

    /// Install a callback fired when a play episode starts.
    pub fn set_on_start<F: FnMut() + Send + 'static>(&self, f: F) {
        self.callbacks.lock().unwrap().on_start = Some(Box::new(f));
    }

    /// Install a callback fired when the voice stops, once per episode.
    pub fn set_on_end<F: FnMut() + Send + 'static>(&self, f: F) {
        self.callbacks.lock().unwrap().on_end = Some(Box::new(f));
    }

    /// Best-effort seek; applied immediately when open, otherwise deferred
    /// to the lazy open.
    pub fn seek(&self, position_s: f64) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        match state.pipeline.as_mut() {
            Some(pipeline) => {
                pipeline.decoder.seek(position_s)?;
                pipeline.carry.clear();
                if let Some(rs) = pipeline.resampler.as_mut() {
                    rs.reset();
                }
            }
            None => state.pending_seek = Some(position_s),
        }
        Ok(())
    }

    /// Block until the voice stops (or errors), polling at the supervisor
    /// cadence. Returns false on timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let start = Instant::now();
        loop {
            match self.status() {
                PlaybackStatus::Stopped | PlaybackStatus::Error => return true,
                _ => {}
            }
            if let Some(limit) = timeout {
                if start.elapsed() >= limit {
                    return false;
                }
            }
            std::thread::sleep(WAIT_POLL);
        }
    }

    // Lifecycle transitions split from callback dispatch so a layer can
    // transition sounds under its own lock and fire callbacks afterwards.

    /// Returns whether `on_start` should fire (episode start from Stopped).
    pub(crate) fn begin_play(&self) -> Result<bool> {
        let mut state = self.inner.lock().unwrap();
        if !state.status.check_play()? {
            return Ok(false);
        }
        let episode_start = state.status == PlaybackStatus::Stopped;
        if episode_start {
            state.loop_count = 0;
            state.end_fired = false;
            debug!("sound {} starting: {}", self.id, self.path.display());
        }
        state.status = PlaybackStatus::Playing;
        Ok(episode_start)
    }

    pub(crate) fn begin_pause(&self) -> Result<()> {
        let mut state = self.inner.lock().unwrap();
        if state.status.check_pause()? {
            state.status = PlaybackStatus::Paused;
        }
        Ok(())
    }

    /// Returns whether `on_end` should fire.
    pub(crate) fn begin_stop(&self) -> Result<bool> {
        let mut state = self.inner.lock().unwrap();
        if !state.status.check_stop()? {
            return Ok(false);
        }
        debug!("sound {} stopped", self.id);
        state.status = PlaybackStatus::Stopped;
        state.pipeline = None;
        let fire = !state.end_fired;
        state.end_fired = true;
        Ok(fire)
    }

    pub(crate) fn fire_start(&self) {
        let taken = self.callbacks.lock().unwrap().on_start.take();
        if let Some(mut cb) = taken {
            cb();
            let mut callbacks = self.callbacks.lock().unwrap();
            if callbacks.on_start.is_none() {
                callbacks.on_start = Some(cb);
            }
        }
    }

    pub(crate) fn fire_end(&self) {
        let taken = self.callbacks.lock().unwrap().on_end.take();
        if let Some(mut cb) = taken {
            cb();
            let mut callbacks = self.callbacks.lock().unwrap();
            if callbacks.on_end.is_none() {
                callbacks.on_end = Some(cb);
            }
        }
    }

    /// Pull the next `frames` frames of interleaved PCM in the engine
    /// format, or `None` while the voice is not producing audio.
    ///
    /// Called by the owning layer on the audio thread. A natural end of
    /// stream pads the final pull with silence and stops the voice; later
    /// pulls return `None`.
    pub fn next_chunk(&self, frames: usize) -> Option<Vec<f32>> {
        let mut fire_end = false;
        let result = self.next_chunk_inner(frames, &mut fire_end);
        if fire_end {
            self.fire_end();
        }
        result
    }

    fn next_chunk_inner(&self, frames: usize, fire_end: &mut bool) -> Option<Vec<f32>> {
        let mut state = self.inner.lock().unwrap();
        if state.status != PlaybackStatus::Playing {
            return None;
        }

        if state.pipeline.is_none() {
            match self.open_pipeline(&mut state) {
                Ok(pipeline) => state.pipeline = Some(pipeline),
                Err(e) => {
                    warn!("sound {} failed to open {}: {}", self.id, self.path.display(), e);
                    state.status = PlaybackStatus::Error;
                    *fire_end = !state.end_fired;
                    state.end_fired = true;
                    return None;
                }
            }
        }

        self.maybe_arm_auto_fadeout(&mut state);

        let channels = self.config.channels() as usize;
        let wanted = frames * channels;
        let mut data: Vec<f32> = Vec::with_capacity(wanted);
        let mut ended = false;
        let mut failed = false;

        loop {
            if data.len() >= wanted {
                break;
            }

            let SoundState {
                pipeline,
                loop_mode,
                loop_count,
                ..
            } = &mut *state;
            let pipeline = pipeline.as_mut().expect("pipeline opened above");

            if !pipeline.carry.is_empty() {
                let take = (wanted - data.len()).min(pipeline.carry.len());
                data.extend(pipeline.carry.drain(..take));
                continue;
            }

            let out_frames_needed = (wanted - data.len()) / channels;
            let native_needed = match &pipeline.resampler {
                Some(rs) => rs.input_frames_for(out_frames_needed),
                None => out_frames_needed,
            };

            let chunk = match pipeline.decoder.read(native_needed) {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("sound {} decode error: {}", self.id, e);
                    failed = true;
                    break;
                }
            };
            let end_of_stream = chunk.end_of_stream;

            let mut produced = if pipeline.native_channels != channels as u16 {
                convert_channels(&chunk.samples, pipeline.native_channels, channels as u16)
            } else {
                chunk.samples
            };
            if let Some(rs) = pipeline.resampler.as_mut() {
                produced = rs.process(&produced);
            }
            let made_progress = !produced.is_empty();
            pipeline.carry.extend(produced);

            if end_of_stream {
                let effective = (*loop_mode).unwrap_or(LoopMode::Once);
                let another_pass = match effective {
                    LoopMode::Infinite => true,
                    LoopMode::Once => false,
                    LoopMode::Times(n) => *loop_count + 1 < n,
                };
                if another_pass {
                    if let Err(e) = pipeline.decoder.seek(0.0) {
                        warn!("sound {} loop restart failed: {}", self.id, e);
                        failed = true;
                        break;
                    }
                    *loop_count += 1;
                    if let Some(rs) = pipeline.resampler.as_mut() {
                        rs.reset();
                    }
                    continue;
                }
                if pipeline.carry.is_empty() {
                    ended = true;
                    break;
                }
                continue;
            }

            if !made_progress {
                // Streaming underrun: the ring is empty but more audio is
                // coming. Pad this pull with silence and return.
                break;
            }
        }

        if failed {
            state.status = PlaybackStatus::Error;
            state.pipeline = None;
            *fire_end = !state.end_fired;
            state.end_fired = true;
            return None;
        }

        data.resize(wanted, 0.0);

        // Per-frame gain, broadcast across channels.
        let mut gains = vec![0.0f32; frames];
        let fade_completed = state.envelope.multipliers(&mut gains);
        let volume = state.volume;
        for (frame_idx, g) in gains.iter().enumerate() {
            let scale = g * volume;
            for sample in &mut data[frame_idx * channels..(frame_idx + 1) * channels] {
                *sample *= scale;
            }
        }

        let faded_to_silence = fade_completed && state.envelope.target_gain() <= 1e-6;
        if ended || faded_to_silence {
            if ended {
                debug!("sound {} reached end of stream", self.id);
            } else {
                debug!("sound {} faded out to silence", self.id);
            }
            state.status = PlaybackStatus::Stopped;
            state.pipeline = None;
            *fire_end = !state.end_fired;
            state.end_fired = true;
        }

        Some(data)
    }

    fn open_pipeline(&self, state: &mut SoundState) -> Result<Pipeline> {
        let mut decoder: Box<dyn Decoder> = if self.streaming {
            Box::new(StreamingDecoder::open(&self.path)?)
        } else {
            Box::new(FileDecoder::open(&self.path)?)
        };

        if let Some(position_s) = state.pending_seek.take() {
            decoder.seek(position_s)?;
        }

        let spec = decoder.spec();
        let resampler = (spec.sample_rate != self.config.sample_rate()).then(|| {
            LinearResampler::new(
                spec.sample_rate,
                self.config.sample_rate(),
                self.config.channels(),
            )
        });

        Ok(Pipeline {
            decoder,
            native_channels: spec.channels,
            resampler,
            carry: Vec::new(),
        })
    }

    /// Arm the end-of-file fade-out once the final pass gets close enough.
    fn maybe_arm_auto_fadeout(&self, state: &mut SoundState) {
        let Some(limit) = state.auto_fadeout_frames else {
            return;
        };
        if state.envelope.is_fading() {
            return;
        }
        let final_pass = match state.loop_mode.unwrap_or(LoopMode::Once) {
            LoopMode::Infinite => false,
            LoopMode::Once => true,
            LoopMode::Times(n) => state.loop_count + 1 >= n,
        };
        if !final_pass {
            return;
        }
        let Some(remaining) = state
            .pipeline
            .as_ref()
            .and_then(|p| p.decoder.remaining_frames(self.config.sample_rate()))
        else {
            return;
        };
        if remaining > 0 && remaining <= limit {
            let duration_s = remaining as f64 / self.config.sample_rate() as f64;
            debug!(
                "sound {} auto fade-out over final {} frames",
                self.id, remaining
            );
            state.envelope.start_fade_out(duration_s, 0.0);
        }
    }
}

impl Playback for Sound {
    fn status(&self) -> PlaybackStatus {
        self.inner.lock().unwrap().status
    }

    fn play(&self) -> Result<()> {
        if self.begin_play()? {
            self.fire_start();
        }
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.begin_pause()
    }

    fn stop(&self) -> Result<()> {
        if self.begin_stop()? {
            self.fire_end();
        }
        Ok(())
    }
}

impl Gain for Sound {
    fn volume(&self) -> f32 {
        self.inner.lock().unwrap().volume
    }

    fn set_volume(&self, volume: f32) {
        self.inner.lock().unwrap().volume = volume.clamp(0.0, 1.0);
    }
}
