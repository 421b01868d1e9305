//! Layer queue and supervisor integration tests
//!
//! Exercises the wait/active/fading-out collections end to end with a paced
//! pull thread standing in for the audio device: concurrency bounds, direct
//! replacement, enqueue delays, and lifecycle broadcast.

mod helpers;

use ambimix::{
    AudioConfig, AudioLayer, EnqueueOptions, LayerParams, Playback, PlaybackStatus, SampleFormat,
    Sound,
};
use helpers::{eventually, Fixtures, LayerPuller};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const RATE: u32 = 44100;

fn config() -> AudioConfig {
    AudioConfig::new(RATE, 2, SampleFormat::Int16, 1024).unwrap()
}

fn layer(params: LayerParams) -> AudioLayer {
    AudioLayer::new("test", config(), params).unwrap()
}

fn tone(fixtures: &Fixtures, name: &str, frames: u32) -> Arc<Sound> {
    Arc::new(Sound::new(fixtures.constant(name, frames, 16384, RATE, 2), config()))
}

#[test]
fn test_single_shot_drains_the_layer() {
    let fixtures = Fixtures::new();
    let layer = layer(LayerParams::default());
    let sound = tone(&fixtures, "a.wav", 22050); // 0.5 s

    let ends = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ends);
    sound.set_on_end(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    layer.enqueue(Arc::clone(&sound)).unwrap();
    layer.play().unwrap();
    let _puller = LayerPuller::start(layer.clone(), 1024);

    assert!(eventually(Duration::from_secs(1), || {
        layer.counts().active == 1
    }));
    assert!(eventually(Duration::from_secs(3), || {
        sound.status() == PlaybackStatus::Stopped
    }));
    assert!(eventually(Duration::from_secs(1), || {
        let counts = layer.counts();
        counts.active == 0 && counts.waiting == 0
    }));
    assert_eq!(ends.load(Ordering::SeqCst), 1);

    layer.stop().unwrap();
}

#[test]
fn test_concurrency_bound_holds() {
    let fixtures = Fixtures::new();
    let layer = layer(LayerParams {
        concurrency: 2,
        ..Default::default()
    });

    let sounds: Vec<Arc<Sound>> = (0..4)
        .map(|i| tone(&fixtures, &format!("s{i}.wav"), 22050))
        .collect();
    for sound in &sounds {
        layer.enqueue(Arc::clone(sound)).unwrap();
    }
    layer.play().unwrap();
    let _puller = LayerPuller::start(layer.clone(), 1024);

    // First pair takes the slots while the rest wait.
    assert!(eventually(Duration::from_secs(1), || {
        let counts = layer.counts();
        counts.active == 2 && counts.waiting == 2
    }));

    // Second pair follows once the first drains.
    assert!(eventually(Duration::from_secs(3), || {
        let counts = layer.counts();
        counts.active == 2 && counts.waiting == 0
    }));

    // Everything finishes, and the cap held the whole way through.
    assert!(eventually(Duration::from_secs(3), || {
        let counts = layer.counts();
        counts.active == 0 && counts.waiting == 0 && counts.fading_out == 0
    }));

    layer.stop().unwrap();
}

#[test]
fn test_active_never_exceeds_concurrency() {
    let fixtures = Fixtures::new();
    let layer = layer(LayerParams {
        concurrency: 2,
        ..Default::default()
    });

    for i in 0..5 {
        layer
            .enqueue(tone(&fixtures, &format!("s{i}.wav"), 8820))
            .unwrap();
    }
    layer.play().unwrap();
    let _puller = LayerPuller::start(layer.clone(), 1024);

    let drained = eventually(Duration::from_secs(5), || {
        assert!(layer.counts().active <= 2);
        let counts = layer.counts();
        counts.active == 0 && counts.waiting == 0
    });
    assert!(drained);

    layer.stop().unwrap();
}

#[test]
fn test_replace_without_fade_stops_directly() {
    let fixtures = Fixtures::new();
    let layer = layer(LayerParams {
        concurrency: 1,
        replace: true,
        ..Default::default()
    });

    let a = tone(&fixtures, "a.wav", 88200); // 2 s
    let b = tone(&fixtures, "b.wav", 88200);

    layer.enqueue(Arc::clone(&a)).unwrap();
    layer.play().unwrap();
    let _puller = LayerPuller::start(layer.clone(), 1024);

    assert!(eventually(Duration::from_secs(1), || {
        a.status() == PlaybackStatus::Playing
    }));

    layer.enqueue(Arc::clone(&b)).unwrap();

    // With no eviction fade configured the old voice stops outright.
    assert!(eventually(Duration::from_secs(1), || {
        a.status() == PlaybackStatus::Stopped && b.status() == PlaybackStatus::Playing
    }));
    let counts = layer.counts();
    assert_eq!(counts.active, 1);
    assert_eq!(counts.fading_out, 0);

    layer.stop().unwrap();
}

#[test]
fn test_delayed_enqueue_is_overtaken() {
    let fixtures = Fixtures::new();
    let layer = layer(LayerParams {
        concurrency: 2,
        ..Default::default()
    });

    let a = tone(&fixtures, "a.wav", 88200);
    let b = tone(&fixtures, "b.wav", 88200);

    layer
        .enqueue_with(
            Arc::clone(&a),
            EnqueueOptions {
                delay: Some(Duration::from_millis(1000)),
                ..Default::default()
            },
        )
        .unwrap();
    layer.enqueue(Arc::clone(&b)).unwrap();
    layer.play().unwrap();
    let _puller = LayerPuller::start(layer.clone(), 1024);

    // B overtakes A, whose delay has not elapsed.
    assert!(eventually(Duration::from_millis(500), || {
        b.status() == PlaybackStatus::Playing
    }));
    assert_eq!(a.status(), PlaybackStatus::Stopped);
    assert_eq!(layer.counts().waiting, 1);

    // Once the delay elapses A joins the free slot.
    assert!(eventually(Duration::from_secs(3), || {
        a.status() == PlaybackStatus::Playing
    }));
    assert_eq!(layer.counts().active, 2);

    layer.stop().unwrap();
}

#[test]
fn test_fade_in_armed_at_enqueue_survives_delay() {
    let fixtures = Fixtures::new();
    let layer = layer(LayerParams {
        default_fade_in: Some(0.1),
        ..Default::default()
    });

    let sound = tone(&fixtures, "a.wav", 44100);
    layer
        .enqueue_with(
            Arc::clone(&sound),
            EnqueueOptions {
                delay: Some(Duration::from_millis(300)),
                ..Default::default()
            },
        )
        .unwrap();
    layer.play().unwrap();

    // No pull thread: the supervisor promotes on wall clock, the fade only
    // advances once frames are pulled.
    assert!(eventually(Duration::from_secs(1), || {
        sound.status() == PlaybackStatus::Playing
    }));

    let chunk = layer.next_chunk(1024).unwrap();
    assert_eq!(chunk[0], 0.0, "voice must still open from silence");
    assert!(chunk[1023 * 2] > 0.0);

    layer.stop().unwrap();
}

#[test]
fn test_on_start_fires_on_promotion() {
    let fixtures = Fixtures::new();
    let layer = layer(LayerParams::default());
    let sound = tone(&fixtures, "a.wav", 44100);

    let starts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&starts);
    sound.set_on_start(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    layer.enqueue(sound).unwrap();
    layer.play().unwrap();

    assert!(eventually(Duration::from_secs(1), || {
        starts.load(Ordering::SeqCst) == 1
    }));

    layer.stop().unwrap();
}

#[test]
fn test_pause_silences_and_resumes() {
    let fixtures = Fixtures::new();
    let layer = layer(LayerParams::default());
    let sound = tone(&fixtures, "a.wav", 88200);

    layer.enqueue(Arc::clone(&sound)).unwrap();
    layer.play().unwrap();
    assert!(eventually(Duration::from_secs(1), || {
        sound.status() == PlaybackStatus::Playing
    }));
    assert!(layer.next_chunk(1024).is_some());

    layer.pause().unwrap();
    assert_eq!(sound.status(), PlaybackStatus::Paused);
    assert!(layer.next_chunk(1024).is_none());

    layer.play().unwrap();
    assert_eq!(sound.status(), PlaybackStatus::Playing);
    let chunk = layer.next_chunk(1024).unwrap();
    assert_eq!(chunk[0], 0.5);

    layer.stop().unwrap();
}

#[test]
fn test_stop_clears_both_queues() {
    let fixtures = Fixtures::new();
    let layer = layer(LayerParams::default());

    let a = tone(&fixtures, "a.wav", 88200);
    let b = tone(&fixtures, "b.wav", 88200);
    layer.enqueue(Arc::clone(&a)).unwrap();
    layer.enqueue(Arc::clone(&b)).unwrap();
    layer.play().unwrap();

    assert!(eventually(Duration::from_secs(1), || {
        a.status() == PlaybackStatus::Playing
    }));

    layer.stop().unwrap();
    assert_eq!(layer.status(), PlaybackStatus::Stopped);
    assert_eq!(a.status(), PlaybackStatus::Stopped);
    assert_eq!(b.status(), PlaybackStatus::Stopped);
    let counts = layer.counts();
    assert_eq!((counts.waiting, counts.active, counts.fading_out), (0, 0, 0));
}

#[test]
fn test_wait_drains_with_timeout() {
    let fixtures = Fixtures::new();
    let layer = layer(LayerParams {
        concurrency: 2,
        ..Default::default()
    });

    layer.enqueue(tone(&fixtures, "a.wav", 11025)).unwrap();
    layer.enqueue(tone(&fixtures, "b.wav", 11025)).unwrap();
    layer.play().unwrap();
    let _puller = LayerPuller::start(layer.clone(), 1024);

    assert!(layer.wait(Some(Duration::from_secs(5))));

    // An immediate wait on an empty layer returns at once.
    assert!(layer.wait(Some(Duration::from_millis(10))));
    layer.stop().unwrap();
}

#[test]
fn test_layer_fade_out_stops_the_layer() {
    let fixtures = Fixtures::new();
    let layer = layer(LayerParams::default());
    let sound = tone(&fixtures, "a.wav", 88200);

    layer.enqueue(Arc::clone(&sound)).unwrap();
    layer.play().unwrap();
    assert!(eventually(Duration::from_secs(1), || {
        sound.status() == PlaybackStatus::Playing
    }));

    layer.fade_out(0.05); // 2205 frames
    let chunk = layer.next_chunk(2205).unwrap();
    assert_eq!(chunk[2204 * 2], 0.0);
    assert_eq!(layer.status(), PlaybackStatus::Stopped);
    assert_eq!(sound.status(), PlaybackStatus::Stopped);
}
