use criterion::{black_box, criterion_group, criterion_main, Criterion};

use fidtrack::render::{draw_marker_upright, Frame, MarkerArt};
use fidtrack::{
    Camera, Distortion, Intrinsics, MarkerMode, PatternGrid, TrackerOptions, TrackingEngine,
};

fn camera() -> Camera {
    Camera {
        intrinsics: Intrinsics {
            fx: 500.0,
            fy: 500.0,
            cx: 320.0,
            cy: 240.0,
        },
        distortion: Distortion::default(),
        width: 640,
        height: 480,
        near: 1.0,
        far: 1000.0,
    }
}

fn bench_binary_pipeline(c: &mut Criterion) {
    let mut frame = Frame::filled(640, 480, 255);
    let art = MarkerArt::from_binary_id(37, 0.25).unwrap();
    draw_marker_upright(&mut frame, &art, 240, 160, 120);

    let mut engine = TrackingEngine::new(TrackerOptions {
        marker_mode: MarkerMode::BinaryId { threshold: 128 },
        ..TrackerOptions::default()
    })
    .unwrap();
    engine.set_camera(camera()).unwrap();

    c.bench_function("binary_id_640x480", |b| {
        b.iter(|| {
            let result = engine.calc(black_box(frame.data())).unwrap();
            black_box(result.markers.len())
        })
    });
}

fn bench_template_pipeline(c: &mut Criterion) {
    let mut cells = [0u8; 256];
    for (i, c) in cells.iter_mut().enumerate() {
        *c = (i as u8).wrapping_mul(53);
    }
    let mut frame = Frame::filled(640, 480, 255);
    let art = MarkerArt::from_pattern(&PatternGrid::from_cells(cells), 0.25).unwrap();
    draw_marker_upright(&mut frame, &art, 240, 160, 128);

    let mut engine = TrackingEngine::new(TrackerOptions::default()).unwrap();
    engine.set_camera(camera()).unwrap();
    engine.add_pattern(&cells, 16).unwrap();

    c.bench_function("template_640x480", |b| {
        b.iter(|| {
            let result = engine.calc(black_box(frame.data())).unwrap();
            black_box(result.markers.len())
        })
    });
}

criterion_group!(benches, bench_binary_pipeline, bench_template_pipeline);
criterion_main!(benches);
