//! Streaming decoder with backpressure
//!
//! A dedicated worker thread decodes ahead into a bounded lock-free ring
//! (about two seconds of audio) and sleeps while the ring is full. The pull
//! side drains whatever is available without ever blocking; an empty ring
//! simply yields a short chunk and the voice pads that pull with silence.
//!
//! This variant suits platforms where decoding is expensive enough that
//! doing it inside the audio pull would risk underruns.

use crate::audio::decoder::{Decoder, DecoderSpec, FileDecoder, ReadChunk};
use crate::error::{Error, Result};
use ringbuf::{traits::*, HeapRb};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Ring capacity, in seconds of native-rate audio.
const RING_SECONDS: usize = 2;

/// Frames decoded per worker iteration.
const WORKER_CHUNK_FRAMES: usize = 1024;

/// Worker backoff while the ring is full.
const FULL_BACKOFF: Duration = Duration::from_millis(10);

/// Flags shared between the worker and the pull side.
struct WorkerShared {
    stop: AtomicBool,
    finished: AtomicBool,
    failed: AtomicBool,
}

/// Decoder variant that fills a bounded PCM ring from a worker thread.
pub struct StreamingDecoder {
    path: PathBuf,
    spec: DecoderSpec,
    consumer: ringbuf::HeapCons<f32>,
    shared: Arc<WorkerShared>,
    worker: Option<JoinHandle<()>>,
    /// Native frames handed to the caller since open or the last seek
    frames_delivered: u64,
}

impl StreamingDecoder {
    /// Probe the file and start the decode worker.
    pub fn open(path: &Path) -> Result<Self> {
        let inner = FileDecoder::open(path)?;
        let spec = inner.spec();
        let (consumer, shared, worker) = Self::start_worker(inner)?;

        Ok(Self {
            path: path.to_path_buf(),
            spec,
            consumer,
            shared,
            worker: Some(worker),
            frames_delivered: 0,
        })
    }

    fn start_worker(
        mut decoder: FileDecoder,
    ) -> Result<(ringbuf::HeapCons<f32>, Arc<WorkerShared>, JoinHandle<()>)> {
        let spec = decoder.spec();
        let channels = spec.channels as usize;
        let capacity = spec.sample_rate as usize * channels * RING_SECONDS;
        let (mut producer, consumer) = HeapRb::<f32>::new(capacity).split();

        let shared = Arc::new(WorkerShared {
            stop: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            failed: AtomicBool::new(false),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("ambimix-decode".to_string())
            .spawn(move || {
                loop {
                    if worker_shared.stop.load(Ordering::Relaxed) {
                        break;
                    }
                    if producer.vacant_len() < WORKER_CHUNK_FRAMES * channels {
                        thread::sleep(FULL_BACKOFF);
                        continue;
                    }

                    match decoder.read(WORKER_CHUNK_FRAMES) {
                        Ok(chunk) => {
                            if !chunk.samples.is_empty() {
                                producer.push_slice(&chunk.samples);
                            }
                            if chunk.end_of_stream {
                                worker_shared.finished.store(true, Ordering::Release);
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("streaming decode failed: {}", e);
                            worker_shared.failed.store(true, Ordering::Release);
                            worker_shared.finished.store(true, Ordering::Release);
                            break;
                        }
                    }
                }
                debug!("decode worker exiting");
            })
            .map_err(Error::Io)?;

        Ok((consumer, shared, handle))
    }

    fn shutdown_worker(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Decoder for StreamingDecoder {
    fn spec(&self) -> DecoderSpec {
        self.spec
    }

    fn read(&mut self, frames: usize) -> Result<ReadChunk> {
        if self.shared.failed.load(Ordering::Acquire) && self.consumer.occupied_len() == 0 {
            return Ok(ReadChunk {
                samples: Vec::new(),
                end_of_stream: true,
            });
        }

        let channels = self.spec.channels as usize;
        let mut samples = vec![0.0; frames * channels];
        let got = self.consumer.pop_slice(&mut samples);
        samples.truncate(got);
        self.frames_delivered += (got / channels) as u64;

        let end_of_stream =
            self.shared.finished.load(Ordering::Acquire) && self.consumer.occupied_len() == 0;

        Ok(ReadChunk {
            samples,
            end_of_stream,
        })
    }

    /// Restarts the worker from the target position; buffered audio from the
    /// old position is discarded.
    fn seek(&mut self, position_s: f64) -> Result<()> {
        self.shutdown_worker();

        let mut inner = FileDecoder::open(&self.path)?;
        if position_s > 0.0 {
            inner.seek(position_s)?;
        }
        let (consumer, shared, worker) = Self::start_worker(inner)?;
        self.consumer = consumer;
        self.shared = shared;
        self.worker = Some(worker);
        self.frames_delivered = (position_s.max(0.0) * self.spec.sample_rate as f64) as u64;
        Ok(())
    }

    fn remaining_frames(&self, output_rate: u32) -> Option<u64> {
        let total = self.spec.total_frames?;
        let native = total.saturating_sub(self.frames_delivered);
        Some(native * output_rate as u64 / self.spec.sample_rate as u64)
    }
}

impl Drop for StreamingDecoder {
    fn drop(&mut self) {
        self.shutdown_worker();
    }
}
