use alarm_tracker::{CameraId, DebounceConfig, DebounceTracker, Scenario, SourceKey};
use chrono::{DateTime, Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
}

fn bench_steady_state(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracker_update");

    for cameras in [1i64, 64, 512] {
        let tracker = DebounceTracker::new(DebounceConfig::default());
        let keys: Vec<SourceKey> = (0..cameras)
            .flat_map(|cam| Scenario::ALL.map(|s| SourceKey::new(CameraId(cam), s)))
            .collect();
        let mut now = start();

        group.bench_with_input(BenchmarkId::new("clear_frame", cameras), &keys, |b, keys| {
            b.iter(|| {
                now += Duration::milliseconds(40);
                for key in keys {
                    black_box(tracker.update(*key, false, now));
                }
            })
        });
    }
    group.finish();
}

fn bench_flapping(c: &mut Criterion) {
    let tracker = DebounceTracker::new(DebounceConfig::default());
    let key = SourceKey::new(CameraId(1), Scenario::SafetyCompliance);
    let mut now = start();
    let mut detected = false;

    c.bench_function("tracker_update/flapping", |b| {
        b.iter(|| {
            now += Duration::milliseconds(40);
            detected = !detected;
            black_box(tracker.update(key, detected, now))
        })
    });
}

criterion_group!(benches, bench_steady_state, bench_flapping);
criterion_main!(benches);
