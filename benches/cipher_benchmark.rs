use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use locktree::crypto::DEFAULT_ITERATIONS;
use locktree::Cipher;

fn benchmark_cipher(c: &mut Criterion) {
    let mut group = c.benchmark_group("cipher");
    // PBKDF2 dominates; keep the sample count low at the real iteration count.
    group.sample_size(10);

    let sizes = [("16B", 16), ("256B", 256), ("4KB", 4 * 1024)];

    for iterations in [1_000, DEFAULT_ITERATIONS] {
        let cipher = Cipher::new(iterations);
        for (name, size) in sizes {
            let plaintext = "x".repeat(size);
            let envelope = cipher.encrypt(&plaintext, "bench-secret");

            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("encrypt/{iterations}"), name),
                &plaintext,
                |b, plaintext| {
                    b.iter(|| cipher.encrypt(black_box(plaintext), black_box("bench-secret")));
                },
            );
            group.bench_with_input(
                BenchmarkId::new(format!("decrypt/{iterations}"), name),
                &envelope,
                |b, envelope| {
                    b.iter(|| cipher.decrypt(black_box(envelope), black_box("bench-secret")));
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, benchmark_cipher);
criterion_main!(benches);
