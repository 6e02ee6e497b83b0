use criterion::{criterion_group, criterion_main, Criterion};
use std::fs;
use std::sync::Arc;
use tdx_attest_core::identity::KeyTool;
use tdx_attest_core::measure::{hash_directory, MeasurementRegister, VolumeHasher};
use tdx_attest_core::tee::SimulatedTdx;

const COMPOSE: &str = r#"
services:
  app:
    image: nginx:latest
    volumes:
      - ./web:/usr/share/nginx/html
      - ./config:/etc/nginx/conf.d
"#;

fn bench_measurement(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    for sub in ["web", "config"] {
        fs::create_dir_all(dir.path().join(sub)).unwrap();
        for i in 0..64 {
            fs::write(dir.path().join(sub).join(format!("f{}.txt", i)), vec![i as u8; 4096]).unwrap();
        }
    }

    c.bench_function("hash_directory_64x4k", |b| {
        b.iter(|| hash_directory(dir.path().join("web")).unwrap())
    });

    let hasher = VolumeHasher::new(dir.path());
    c.bench_function("hash_compose_volumes_2x64x4k", |b| {
        b.iter(|| hasher.hash_compose_volumes(COMPOSE).unwrap())
    });

    let device = Arc::new(SimulatedTdx::new([7u8; 32]));
    let register = MeasurementRegister::open(device.clone(), 3).unwrap();
    c.bench_function("rtmr_extend_simulated", |b| {
        b.iter(|| register.extend(b"event").unwrap())
    });

    let keytool = KeyTool::new(device);
    c.bench_function("derive_full_identity_simulated", |b| {
        b.iter(|| keytool.derive_full_identity().unwrap())
    });
}

criterion_group!(benches, bench_measurement);
criterion_main!(benches);
