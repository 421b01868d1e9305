//! Concurrency-bounded voice pool with a background supervisor
//!
//! An [`AudioLayer`] owns a FIFO wait queue, an active set capped at its
//! concurrency, and a fading-out set holding crossfade tails that keep
//! producing audio without occupying a slot. A supervisor thread ticks at
//! ~10 Hz: it reaps finished voices, frees the slots of fading voices,
//! evicts under replace mode, and promotes ready waiters.
//!
//! The handle is cheap to clone; all clones share one layer.

use crate::config::AudioConfig;
use crate::error::{Error, Result};
use crate::playback::fade::{FadeCurve, FadeEnvelope};
use crate::playback::sound::{LoopMode, Sound};
use crate::playback::state::{Gain, Playback, PlaybackStatus};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Supervisor tick period; also the polling cadence of `wait`.
pub(crate) const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Construction parameters for a layer.
#[derive(Debug, Clone)]
pub struct LayerParams {
    /// Maximum simultaneously active voices
    pub concurrency: usize,
    /// Evict the oldest active voices when new ones arrive at capacity
    pub replace: bool,
    /// Loop mode applied at enqueue to voices without their own
    pub default_loop: Option<LoopMode>,
    /// Fade-in seconds armed at enqueue unless overridden
    pub default_fade_in: Option<f64>,
    /// Fade-out seconds used when a voice is evicted (crossfade length)
    pub default_fade_out: Option<f64>,
    /// Fade curve applied to enqueued voices
    pub default_curve: Option<FadeCurve>,
}

impl Default for LayerParams {
    fn default() -> Self {
        Self {
            concurrency: 1,
            replace: false,
            default_loop: None,
            default_fade_in: None,
            default_fade_out: None,
            default_curve: None,
        }
    }
}

impl LayerParams {
    fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::InvalidInput(
                "layer concurrency must be positive".to_string(),
            ));
        }
        if !self.replace && self.default_loop == Some(LoopMode::Infinite) {
            return Err(Error::InvalidInput(
                "infinite default loop without replace would hold a slot forever".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-enqueue overrides.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Hold the voice in the wait queue for this long before it becomes
    /// eligible for a slot
    pub delay: Option<Duration>,
    /// Fade-in seconds, overriding the layer default
    pub fade_in: Option<f64>,
    /// Eviction fade-out seconds, overriding the layer default
    pub fade_out: Option<f64>,
}

/// Snapshot of the three voice collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerCounts {
    pub waiting: usize,
    pub active: usize,
    pub fading_out: usize,
}

struct WaitingEntry {
    sound: Arc<Sound>,
    ready_at: Instant,
    fade_out_s: Option<f64>,
}

struct ActiveEntry {
    sound: Arc<Sound>,
    /// Fade length to use if this voice is evicted under replace mode
    fade_out_s: Option<f64>,
}

struct LayerState {
    status: PlaybackStatus,
    volume: f32,
    envelope: FadeEnvelope,
    concurrency: usize,
    replace: bool,
    default_loop: Option<LoopMode>,
    default_fade_in: Option<f64>,
    default_fade_out: Option<f64>,
    default_curve: Option<FadeCurve>,
    waiting: VecDeque<WaitingEntry>,
    active: Vec<ActiveEntry>,
    fading_out: Vec<Arc<Sound>>,
    supervisor_running: bool,
}

struct LayerShared {
    name: String,
    config: AudioConfig,
    inner: Mutex<LayerState>,
}

/// Voice transitions computed by a supervisor tick, applied after the layer
/// lock is released so user callbacks can re-enter the layer.
#[derive(Default)]
struct TickActions {
    play: Vec<Arc<Sound>>,
    stop: Vec<Arc<Sound>>,
    fade_out: Vec<(Arc<Sound>, f64)>,
}

impl TickActions {
    fn is_empty(&self) -> bool {
        self.play.is_empty() && self.stop.is_empty() && self.fade_out.is_empty()
    }
}

/// Named mixing bus for a bounded pool of voices.
#[derive(Clone)]
pub struct AudioLayer {
    shared: Arc<LayerShared>,
}

impl AudioLayer {
    pub fn new(name: impl Into<String>, config: AudioConfig, params: LayerParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            shared: Arc::new(LayerShared {
                name: name.into(),
                config,
                inner: Mutex::new(LayerState {
                    status: PlaybackStatus::Stopped,
                    volume: 1.0,
                    envelope: FadeEnvelope::new(config.sample_rate()),
                    concurrency: params.concurrency,
                    replace: params.replace,
                    default_loop: params.default_loop,
                    default_fade_in: params.default_fade_in,
                    default_fade_out: params.default_fade_out,
                    default_curve: params.default_curve,
                    waiting: VecDeque::new(),
                    active: Vec::new(),
                    fading_out: Vec::new(),
                    supervisor_running: false,
                }),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> &AudioConfig {
        &self.shared.config
    }

    /// Push a voice onto the wait queue with default options.
    pub fn enqueue(&self, sound: Arc<Sound>) -> Result<()> {
        self.enqueue_with(sound, EnqueueOptions::default())
    }

    /// Push a voice onto the wait queue.
    ///
    /// Layer defaults for loop, curve, and fades apply only where the layer
    /// has one and the voice (or the options) has no explicit setting. An
    /// effective fade-in is armed immediately, so the voice still opens from
    /// silence after its delay elapses.
    pub fn enqueue_with(&self, sound: Arc<Sound>, opts: EnqueueOptions) -> Result<()> {
        let mut inner = self.shared.inner.lock().unwrap();

        if sound.loop_mode().is_none() {
            if let Some(mode) = inner.default_loop {
                sound.set_loop(mode)?;
            }
        }
        let effective_loop = sound.loop_mode().unwrap_or(LoopMode::Once);
        if effective_loop == LoopMode::Infinite && !inner.replace {
            return Err(Error::InvalidInput(
                "infinite loop on a non-replace layer would hold its slot forever".to_string(),
            ));
        }

        if let Some(curve) = inner.default_curve {
            sound.set_fade_curve(curve);
        }
        if let Some(duration_s) = opts.fade_in.or(inner.default_fade_in) {
            if duration_s > 0.0 {
                sound.fade_in(duration_s);
            }
        }
        let fade_out_s = opts.fade_out.or(inner.default_fade_out);
        let ready_at = Instant::now() + opts.delay.unwrap_or(Duration::ZERO);

        debug!("layer '{}' enqueued sound {}", self.shared.name, sound.id());
        inner.waiting.push_back(WaitingEntry {
            sound,
            ready_at,
            fade_out_s,
        });
        Ok(())
    }

    /// Stop and drop every voice in all three collections.
    pub fn clear(&self) {
        let drained: Vec<Arc<Sound>> = {
            let mut inner = self.shared.inner.lock().unwrap();
            let waiting: Vec<Arc<Sound>> = inner.waiting.drain(..).map(|w| w.sound).collect();
            let active: Vec<Arc<Sound>> = inner.active.drain(..).map(|a| a.sound).collect();
            let fading_out: Vec<Arc<Sound>> = inner.fading_out.drain(..).collect();
            waiting
                .into_iter()
                .chain(active)
                .chain(fading_out)
                .collect()
        };
        for sound in drained {
            if let Err(e) = sound.stop() {
                debug!("clearing layer '{}': {}", self.shared.name, e);
            }
        }
    }

    /// Block until all three collections are empty, polling at the
    /// supervisor cadence. Returns false on timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let start = Instant::now();
        loop {
            let counts = self.counts();
            if counts.waiting == 0 && counts.active == 0 && counts.fading_out == 0 {
                return true;
            }
            if let Some(limit) = timeout {
                if start.elapsed() >= limit {
                    return false;
                }
            }
            thread::sleep(TICK_INTERVAL);
        }
    }

    pub fn counts(&self) -> LayerCounts {
        let inner = self.shared.inner.lock().unwrap();
        LayerCounts {
            waiting: inner.waiting.len(),
            active: inner.active.len(),
            fading_out: inner.fading_out.len(),
        }
    }

    pub fn set_concurrency(&self, concurrency: usize) -> Result<()> {
        if concurrency == 0 {
            return Err(Error::InvalidInput(
                "layer concurrency must be positive".to_string(),
            ));
        }
        self.shared.inner.lock().unwrap().concurrency = concurrency;
        Ok(())
    }

    pub fn set_replace(&self, replace: bool) -> Result<()> {
        let mut inner = self.shared.inner.lock().unwrap();
        if !replace && inner.default_loop == Some(LoopMode::Infinite) {
            return Err(Error::InvalidInput(
                "cannot disable replace while the default loop is infinite".to_string(),
            ));
        }
        inner.replace = replace;
        Ok(())
    }

    pub fn set_default_loop(&self, mode: Option<LoopMode>) -> Result<()> {
        let mut inner = self.shared.inner.lock().unwrap();
        if mode == Some(LoopMode::Infinite) && !inner.replace {
            return Err(Error::InvalidInput(
                "infinite default loop without replace would hold a slot forever".to_string(),
            ));
        }
        if mode == Some(LoopMode::Times(0)) {
            return Err(Error::InvalidInput(
                "loop count of zero; use LoopMode::Once for a single play".to_string(),
            ));
        }
        inner.default_loop = mode;
        Ok(())
    }

    pub fn set_default_fade_in(&self, duration_s: Option<f64>) {
        self.shared.inner.lock().unwrap().default_fade_in = duration_s;
    }

    pub fn set_default_fade_out(&self, duration_s: Option<f64>) {
        self.shared.inner.lock().unwrap().default_fade_out = duration_s;
    }

    pub fn set_default_curve(&self, curve: Option<FadeCurve>) {
        self.shared.inner.lock().unwrap().default_curve = curve;
    }

    /// Sample-accurate fade of the whole layer output up to unity gain.
    pub fn fade_in(&self, duration_s: f64) {
        self.shared
            .inner
            .lock()
            .unwrap()
            .envelope
            .start_fade_in(duration_s, 1.0);
    }

    /// Sample-accurate fade of the whole layer output to silence; the layer
    /// stops itself when the fade completes.
    pub fn fade_out(&self, duration_s: f64) {
        self.shared
            .inner
            .lock()
            .unwrap()
            .envelope
            .start_fade_out(duration_s, 0.0);
    }

    /// Mix the next `frames` frames from all active and fading voices,
    /// scaled by the layer gain. `None` while the layer is not playing.
    pub fn next_chunk(&self, frames: usize) -> Option<Vec<f32>> {
        let sounds: Vec<Arc<Sound>> = {
            let inner = self.shared.inner.lock().unwrap();
            if inner.status != PlaybackStatus::Playing {
                return None;
            }
            inner
                .active
                .iter()
                .map(|e| Arc::clone(&e.sound))
                .chain(inner.fading_out.iter().cloned())
                .collect()
        };

        let channels = self.shared.config.channels() as usize;
        let mut mix = vec![0.0f32; frames * channels];
        for sound in sounds {
            if let Some(chunk) = sound.next_chunk(frames) {
                for (acc, sample) in mix.iter_mut().zip(chunk.iter()) {
                    *acc += sample;
                }
            }
        }

        let mut stop_layer = false;
        {
            let mut inner = self.shared.inner.lock().unwrap();
            let mut gains = vec![0.0f32; frames];
            let completed = inner.envelope.multipliers(&mut gains);
            let volume = inner.volume;
            for (frame_idx, g) in gains.iter().enumerate() {
                let scale = g * volume;
                for sample in &mut mix[frame_idx * channels..(frame_idx + 1) * channels] {
                    *sample *= scale;
                }
            }
            if completed && inner.envelope.target_gain() <= 1e-6 {
                stop_layer = true;
            }
        }
        if stop_layer {
            debug!("layer '{}' faded out, stopping", self.shared.name);
            let _ = self.stop();
        }

        Some(mix)
    }

    fn spawn_supervisor(&self) -> Result<()> {
        let weak = Arc::downgrade(&self.shared);
        thread::Builder::new()
            .name(format!("ambimix-layer-{}", self.shared.name))
            .spawn(move || Self::supervisor_loop(weak))
            .map_err(Error::Io)?;
        Ok(())
    }

    fn supervisor_loop(weak: Weak<LayerShared>) {
        debug!("layer supervisor started");
        loop {
            let Some(shared) = weak.upgrade() else {
                break;
            };

            let actions = {
                let mut inner = shared.inner.lock().unwrap();
                if inner.status == PlaybackStatus::Stopped {
                    inner.supervisor_running = false;
                    debug!("layer '{}' supervisor exiting", shared.name);
                    break;
                }
                if inner.status == PlaybackStatus::Playing {
                    Self::tick(&mut inner, &shared.name)
                } else {
                    TickActions::default()
                }
            };

            if !actions.is_empty() {
                Self::apply(actions);
            }

            drop(shared);
            thread::sleep(TICK_INTERVAL);
        }
    }

    /// One supervisor pass over the three collections. Holds the layer lock;
    /// voice transitions are returned for the caller to apply outside it.
    fn tick(inner: &mut LayerState, name: &str) -> TickActions {
        let mut actions = TickActions::default();
        let now = Instant::now();

        // Reap voices that stopped or failed since the last tick.
        inner.active.retain(|entry| {
            let status = entry.sound.status();
            let done = matches!(status, PlaybackStatus::Stopped | PlaybackStatus::Error);
            if done {
                debug!("layer '{name}' reaping sound {}", entry.sound.id());
            }
            !done
        });
        inner.fading_out.retain(|sound| {
            !matches!(
                sound.status(),
                PlaybackStatus::Stopped | PlaybackStatus::Error
            )
        });

        // Crossfade tails keep mixing but stop occupying a slot.
        let mut i = 0;
        while i < inner.active.len() {
            if inner.active[i].sound.is_fading_out() {
                let entry = inner.active.remove(i);
                debug!(
                    "layer '{name}' moving fading sound {} out of the slot budget",
                    entry.sound.id()
                );
                inner.fading_out.push(entry.sound);
            } else {
                i += 1;
            }
        }

        // Replace mode: evict the oldest actives to make room for arrivals.
        if inner.replace {
            let ready = inner
                .waiting
                .iter()
                .filter(|w| w.ready_at <= now)
                .count();
            let overflow = (inner.active.len() + ready).saturating_sub(inner.concurrency);
            for _ in 0..overflow.min(inner.active.len()) {
                let entry = inner.active.remove(0);
                match entry.fade_out_s {
                    Some(duration_s) if duration_s > 0.0 => {
                        debug!(
                            "layer '{name}' crossfading out sound {}",
                            entry.sound.id()
                        );
                        actions
                            .fade_out
                            .push((Arc::clone(&entry.sound), duration_s));
                        inner.fading_out.push(entry.sound);
                    }
                    _ => {
                        debug!("layer '{name}' evicting sound {}", entry.sound.id());
                        actions.stop.push(entry.sound);
                    }
                }
            }
        }

        // Promote ready waiters in FIFO order; unelapsed delays are skipped
        // in place, so later arrivals may overtake them.
        let mut idx = 0;
        while inner.active.len() < inner.concurrency && idx < inner.waiting.len() {
            if inner.waiting[idx].ready_at <= now {
                let entry = inner.waiting.remove(idx).expect("index checked");
                debug!("layer '{name}' promoting sound {}", entry.sound.id());
                actions.play.push(Arc::clone(&entry.sound));
                inner.active.push(ActiveEntry {
                    sound: entry.sound,
                    fade_out_s: entry.fade_out_s,
                });
            } else {
                idx += 1;
            }
        }

        actions
    }

    fn apply(actions: TickActions) {
        for (sound, duration_s) in actions.fade_out {
            sound.fade_out(duration_s);
        }

        let mut fire = Vec::new();
        for sound in actions.play {
            match sound.begin_play() {
                Ok(true) => fire.push(sound),
                Ok(false) => {}
                Err(e) => warn!("promoted sound failed to start: {e}"),
            }
        }
        for sound in actions.stop {
            if let Err(e) = sound.stop() {
                debug!("evicted sound refused stop: {e}");
            }
        }
        for sound in fire {
            sound.fire_start();
        }
    }
}

impl Playback for AudioLayer {
    fn status(&self) -> PlaybackStatus {
        self.shared.inner.lock().unwrap().status
    }

    /// Start the layer, lazily spawning its supervisor, and resume any
    /// paused voices.
    fn play(&self) -> Result<()> {
        let to_resume: Vec<Arc<Sound>> = {
            let mut inner = self.shared.inner.lock().unwrap();
            if !inner.status.check_play()? {
                return Ok(());
            }
            inner.status = PlaybackStatus::Playing;
            if !inner.supervisor_running {
                inner.supervisor_running = true;
                if let Err(e) = self.spawn_supervisor() {
                    inner.supervisor_running = false;
                    inner.status = PlaybackStatus::Stopped;
                    return Err(e);
                }
                debug!("layer '{}' playing", self.shared.name);
            }
            inner
                .active
                .iter()
                .map(|e| Arc::clone(&e.sound))
                .chain(inner.fading_out.iter().cloned())
                .collect()
        };

        let mut fire = Vec::new();
        for sound in to_resume {
            match sound.begin_play() {
                Ok(true) => fire.push(sound),
                Ok(false) => {}
                Err(e) => debug!("voice not resumable: {e}"),
            }
        }
        for sound in fire {
            sound.fire_start();
        }
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        let to_pause: Vec<Arc<Sound>> = {
            let mut inner = self.shared.inner.lock().unwrap();
            if !inner.status.check_pause()? {
                return Ok(());
            }
            inner.status = PlaybackStatus::Paused;
            debug!("layer '{}' paused", self.shared.name);
            inner
                .active
                .iter()
                .map(|e| Arc::clone(&e.sound))
                .chain(inner.fading_out.iter().cloned())
                .collect()
        };
        for sound in to_pause {
            if let Err(e) = sound.begin_pause() {
                debug!("voice not pausable: {e}");
            }
        }
        Ok(())
    }

    /// Stop the layer and every queued voice. The supervisor observes the
    /// status change and exits on its next tick.
    fn stop(&self) -> Result<()> {
        {
            let mut inner = self.shared.inner.lock().unwrap();
            if !inner.status.check_stop()? {
                return Ok(());
            }
            inner.status = PlaybackStatus::Stopped;
            debug!("layer '{}' stopped", self.shared.name);
        }
        self.clear();
        Ok(())
    }
}

impl Gain for AudioLayer {
    fn volume(&self) -> f32 {
        self.shared.inner.lock().unwrap().volume
    }

    fn set_volume(&self, volume: f32) {
        self.shared.inner.lock().unwrap().volume = volume.clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_layer(params: LayerParams) -> AudioLayer {
        AudioLayer::new("test", AudioConfig::default(), params).unwrap()
    }

    #[test]
    fn test_params_validation() {
        assert!(AudioLayer::new(
            "bad",
            AudioConfig::default(),
            LayerParams {
                concurrency: 0,
                ..Default::default()
            }
        )
        .is_err());

        // Infinite default loop needs replace mode.
        assert!(AudioLayer::new(
            "bad",
            AudioConfig::default(),
            LayerParams {
                default_loop: Some(LoopMode::Infinite),
                replace: false,
                ..Default::default()
            }
        )
        .is_err());
        assert!(AudioLayer::new(
            "ok",
            AudioConfig::default(),
            LayerParams {
                default_loop: Some(LoopMode::Infinite),
                replace: true,
                ..Default::default()
            }
        )
        .is_ok());
    }

    #[test]
    fn test_setter_invariants() {
        let layer = test_layer(LayerParams {
            replace: true,
            default_loop: Some(LoopMode::Infinite),
            ..Default::default()
        });
        assert!(layer.set_replace(false).is_err());
        assert!(layer.set_default_loop(Some(LoopMode::Times(0))).is_err());
        layer.set_default_loop(None).unwrap();
        layer.set_replace(false).unwrap();
        assert!(layer.set_default_loop(Some(LoopMode::Infinite)).is_err());
        assert!(layer.set_concurrency(0).is_err());
        layer.set_concurrency(4).unwrap();
    }

    #[test]
    fn test_enqueue_rejects_infinite_without_replace() {
        let layer = test_layer(LayerParams::default());
        let sound = Arc::new(Sound::new("/tmp/a.wav", AudioConfig::default()));
        sound.set_loop(LoopMode::Infinite).unwrap();
        assert!(layer.enqueue(sound).is_err());
    }

    #[test]
    fn test_enqueue_applies_layer_default_loop() {
        let layer = test_layer(LayerParams {
            default_loop: Some(LoopMode::Times(3)),
            ..Default::default()
        });
        let sound = Arc::new(Sound::new("/tmp/a.wav", AudioConfig::default()));
        layer.enqueue(Arc::clone(&sound)).unwrap();
        assert_eq!(sound.loop_mode(), Some(LoopMode::Times(3)));

        // An explicit voice setting wins over the default.
        let sound = Arc::new(Sound::new("/tmp/b.wav", AudioConfig::default()));
        sound.set_loop(LoopMode::Once).unwrap();
        layer.enqueue(Arc::clone(&sound)).unwrap();
        assert_eq!(sound.loop_mode(), Some(LoopMode::Once));
    }

    #[test]
    fn test_counts_track_queues() {
        let layer = test_layer(LayerParams::default());
        assert_eq!(
            layer.counts(),
            LayerCounts {
                waiting: 0,
                active: 0,
                fading_out: 0
            }
        );
        let sound = Arc::new(Sound::new("/tmp/a.wav", AudioConfig::default()));
        layer.enqueue(sound).unwrap();
        assert_eq!(layer.counts().waiting, 1);
        layer.clear();
        assert_eq!(layer.counts().waiting, 0);
    }

    #[test]
    fn test_next_chunk_none_when_stopped() {
        let layer = test_layer(LayerParams::default());
        assert!(layer.next_chunk(64).is_none());
    }
}
