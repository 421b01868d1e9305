//! Sample-accurate fade envelopes
//!
//! A [`FadeEnvelope`] is a sample-counter state machine: gain at any point is
//! a pure function of how many frames have been produced since the fade
//! started, so the transition is bit-identical regardless of wall-clock
//! jitter or how the pull is chunked.

use tracing::debug;

/// Direction of an active fade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeKind {
    /// No fade active; the envelope holds its target gain.
    None,
    FadingIn,
    FadingOut,
}

/// Shape of the gain ramp over normalized progress `p` in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeCurve {
    /// `p` — constant rate of change
    Linear,
    /// `p²` — slow start, fast finish
    Exponential,
    /// `sin(p·π/2)` — fast start, slow finish
    Logarithmic,
    /// `p²(3 − 2p)` — smooth at both ends
    SCurve,
}

impl FadeCurve {
    /// Map normalized progress through the curve.
    pub fn apply(&self, p: f32) -> f32 {
        let p = p.clamp(0.0, 1.0);
        match self {
            FadeCurve::Linear => p,
            FadeCurve::Exponential => p * p,
            FadeCurve::Logarithmic => (p * std::f32::consts::FRAC_PI_2).sin(),
            FadeCurve::SCurve => p * p * (3.0 - 2.0 * p),
        }
    }
}

impl Default for FadeCurve {
    fn default() -> Self {
        FadeCurve::SCurve
    }
}

/// Sample-counter-driven gain envelope.
///
/// While idle the envelope yields its target gain as a constant. An active
/// fade interpolates from `start_gain` to `target_gain` over a fixed number
/// of frames; the final frame of the fade is pinned to exactly the target to
/// prevent float drift. Concatenation is exact: pulling the multipliers in
/// any chunking produces the same sequence.
#[derive(Debug, Clone)]
pub struct FadeEnvelope {
    kind: FadeKind,
    curve: FadeCurve,
    start_gain: f32,
    target_gain: f32,
    samples_processed: u64,
    total_samples: u64,
    sample_rate: u32,
}

impl FadeEnvelope {
    /// Create an idle envelope at unity gain.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            kind: FadeKind::None,
            curve: FadeCurve::default(),
            start_gain: 1.0,
            target_gain: 1.0,
            samples_processed: 0,
            total_samples: 0,
            sample_rate,
        }
    }

    pub fn kind(&self) -> FadeKind {
        self.kind
    }

    pub fn curve(&self) -> FadeCurve {
        self.curve
    }

    pub fn set_curve(&mut self, curve: FadeCurve) {
        self.curve = curve;
    }

    pub fn is_fading(&self) -> bool {
        self.kind != FadeKind::None
    }

    pub fn is_fading_out(&self) -> bool {
        self.kind == FadeKind::FadingOut
    }

    /// Gain the envelope would apply to the next frame.
    pub fn current_gain(&self) -> f32 {
        if self.kind == FadeKind::None {
            return self.target_gain;
        }
        let shaped = self.curve.apply(self.progress_at(self.samples_processed));
        self.start_gain + (self.target_gain - self.start_gain) * shaped
    }

    /// Begin a fade from silence up to `target_gain`.
    ///
    /// A non-positive duration is a no-op, as is one that rounds to zero
    /// frames.
    pub fn start_fade_in(&mut self, duration_s: f64, target_gain: f32) {
        self.start_fade(FadeKind::FadingIn, duration_s, 0.0, target_gain);
    }

    /// Begin a fade from the current effective gain down to `target_gain`.
    pub fn start_fade_out(&mut self, duration_s: f64, target_gain: f32) {
        let from = self.current_gain();
        self.start_fade(FadeKind::FadingOut, duration_s, from, target_gain);
    }

    fn start_fade(&mut self, kind: FadeKind, duration_s: f64, from: f32, to: f32) {
        if duration_s <= 0.0 {
            debug!("fade duration <= 0, ignoring");
            return;
        }
        let total = (duration_s * self.sample_rate as f64).round() as u64;
        if total == 0 {
            return;
        }
        self.kind = kind;
        self.start_gain = from.clamp(0.0, 1.0);
        self.target_gain = to.clamp(0.0, 1.0);
        self.samples_processed = 0;
        self.total_samples = total;
    }

    /// Fill `out` with the next per-frame gain values, advancing the counter
    /// by `out.len()` frames.
    ///
    /// Returns `true` if the active fade completed within this chunk. On
    /// completion the kind resets to `None` and every frame from the fade
    /// boundary onward is exactly `target_gain`.
    pub fn multipliers(&mut self, out: &mut [f32]) -> bool {
        if self.kind == FadeKind::None {
            out.fill(self.target_gain);
            return false;
        }

        let total = self.total_samples;
        for (i, slot) in out.iter_mut().enumerate() {
            let idx = self.samples_processed + i as u64;
            if idx + 1 >= total {
                *slot = self.target_gain;
            } else {
                let shaped = self.curve.apply(self.progress_at(idx));
                *slot = self.start_gain + (self.target_gain - self.start_gain) * shaped;
            }
        }

        self.samples_processed = (self.samples_processed + out.len() as u64).min(total);
        if self.samples_processed >= total {
            self.kind = FadeKind::None;
            self.samples_processed = 0;
            self.total_samples = 0;
            return true;
        }
        false
    }

    /// Normalized progress of the frame at absolute fade index `idx`.
    ///
    /// The ramp spans frame 0 at progress 0 to frame `total − 1` at
    /// progress 1, so the last frame of the fade lands exactly on the
    /// target and concatenated pulls reproduce a single pull.
    fn progress_at(&self, idx: u64) -> f32 {
        if self.total_samples <= 1 {
            return 1.0;
        }
        let denom = (self.total_samples - 1) as f64;
        ((idx as f64 / denom).min(1.0)) as f32
    }

    /// Target gain the envelope settles on when the fade ends.
    pub fn target_gain(&self) -> f32 {
        self.target_gain
    }
}
