use cask_log::{Cask, Config};
use criterion::{criterion_group, criterion_main, Criterion};
use rand::{Rng, RngCore};

fn random_value(len: usize) -> Vec<u8> {
    let mut value = vec![0; len];
    rand::thread_rng().fill_bytes(&mut value);
    value
}

fn load_value(c: &mut Criterion) {
    let mut group = c.benchmark_group("load value");

    for value_size in [128, 1_024, 16_384] {
        let folder = tempfile::tempdir().unwrap();
        let cask = Cask::open(folder.path(), Config::default()).unwrap();

        for i in 0..1_000u32 {
            cask.put(format!("key-{i:04}").as_bytes(), &random_value(value_size))
                .unwrap();
        }

        let mut rng = rand::thread_rng();

        group.bench_function(format!("get {value_size}B"), |b| {
            b.iter(|| {
                let i = rng.gen_range(0..1_000u32);
                cask.get(format!("key-{i:04}").as_bytes()).unwrap()
            });
        });
    }

    group.finish();
}

fn store_value(c: &mut Criterion) {
    let mut group = c.benchmark_group("store value");

    for value_size in [128, 1_024, 16_384] {
        let folder = tempfile::tempdir().unwrap();
        let cask = Cask::open(folder.path(), Config::default()).unwrap();
        let value = random_value(value_size);

        let mut i = 0u64;

        group.bench_function(format!("put {value_size}B"), |b| {
            b.iter(|| {
                i += 1;
                cask.put(format!("key-{i:08}").as_bytes(), &value).unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, load_value, store_value);
criterion_main!(benches);
