//! # ambimix
//!
//! Multi-layer audio mixing engine with sample-accurate fades.
//!
//! **Purpose:** decode compressed audio files, mix many concurrent voices
//! across named layers, run sample-counter fade envelopes (fade-in,
//! fade-out, crossfade), and deliver a continuous PCM stream to a device
//! callback or a blocking sink.
//!
//! **Architecture:** a tree of mixing nodes. Audio flows bottom-up
//! ([`Sound`] → [`AudioLayer`] → [`Mixer`]); control flows top-down. Each
//! layer runs a small supervisor thread that promotes queued voices into a
//! bounded active set, evicts under replace mode, and orchestrates
//! crossfades. Decoding uses symphonia, device output uses cpal.
//!
//! ```no_run
//! use ambimix::{AudioConfig, AudioOutput, LayerParams, Mixer, Playback, Sound};
//! use std::sync::Arc;
//!
//! # fn main() -> ambimix::Result<()> {
//! let config = AudioConfig::default();
//! let mixer = Mixer::new(config);
//! let ambience = mixer.create_layer("ambience", LayerParams::default())?;
//!
//! let mut output = AudioOutput::new(None, &config)?;
//! output.start(mixer.clone())?;
//!
//! ambience.enqueue(Arc::new(Sound::new("forest.ogg", config)))?;
//! mixer.play()?;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod playback;

pub use audio::convert::LinearResampler;
pub use audio::decoder::{Decoder, DecoderSpec, FileDecoder, ReadChunk};
pub use audio::output::{AudioOutput, BlockingSink, BlockingWriter};
pub use audio::streaming::StreamingDecoder;
pub use config::{AudioConfig, SampleFormat};
pub use error::{DecodeError, Error, PlaybackError, Result};
pub use playback::fade::{FadeCurve, FadeEnvelope, FadeKind};
pub use playback::layer::{AudioLayer, EnqueueOptions, LayerCounts, LayerParams};
pub use playback::mixer::Mixer;
pub use playback::sound::{LoopMode, Sound};
pub use playback::state::{Gain, Playback, PlaybackStatus};
