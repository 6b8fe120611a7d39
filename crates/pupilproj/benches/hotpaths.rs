use criterion::{black_box, criterion_group, criterion_main, Criterion};

use pupilproj::{
    fit_transparent, project, solve, CameraIntrinsics, EyePose, InverseConfig, PoseBounds,
    RayTraceTables, SceneGeometry,
};

fn scene() -> SceneGeometry {
    SceneGeometry::pinhole(
        CameraIntrinsics::new(772.55, 320.0, 240.0),
        [0.0, 0.0, 120.0],
        11.29,
    )
}

fn bench_project(c: &mut Criterion) {
    let s = scene();
    let pose = EyePose::new(-14.0, 9.0, 2.2);
    let tables = RayTraceTables::default();

    c.bench_function("project_pupil", |b| {
        b.iter(|| project(black_box(&pose), black_box(&s), None, false))
    });
    c.bench_function("project_pupil_refracted", |b| {
        b.iter(|| project(black_box(&pose), black_box(&s), Some(&tables), false))
    });
    c.bench_function("project_full_model", |b| {
        b.iter(|| project(black_box(&pose), black_box(&s), None, true))
    });
}

fn bench_fit(c: &mut Criterion) {
    let s = scene();
    let points = project(&EyePose::new(20.0, -10.0, 2.5), &s, None, false)
        .map(|p| p.image_points)
        .unwrap_or_default();
    c.bench_function("fit_transparent_5pt", |b| {
        b.iter(|| fit_transparent(black_box(&points)))
    });
}

fn bench_solve(c: &mut Criterion) {
    let s = scene();
    let target = project(&EyePose::new(20.0, -10.0, 2.5), &s, None, false)
        .map(|p| p.ellipse)
        .unwrap_or_else(|_| pupilproj::TransparentEllipse::nan());
    let bounds = PoseBounds::default();
    let config = InverseConfig::default();

    c.bench_function("solve_grid_seed", |b| {
        b.iter(|| solve(black_box(&target), &s, &bounds, None, &config, None))
    });
    c.bench_function("solve_warm_start", |b| {
        b.iter(|| {
            solve(
                black_box(&target),
                &s,
                &bounds,
                Some(EyePose::new(18.0, -8.0, 2.0)),
                &config,
                None,
            )
        })
    });
}

criterion_group!(benches, bench_project, bench_fit, bench_solve);
criterion_main!(benches);
