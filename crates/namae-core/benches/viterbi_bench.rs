use criterion::{Criterion, black_box, criterion_group, criterion_main};
use namae_core::ViterbiDecoder;

fn synthetic_scores(seq_len: usize, n_tags: usize) -> (Vec<Vec<f32>>, Vec<Vec<f32>>) {
    let emissions = (0..seq_len)
        .map(|t| {
            (0..n_tags)
                .map(|j| ((t * 31 + j * 17) % 13) as f32 / 13.0)
                .collect()
        })
        .collect();
    let transitions = (0..n_tags)
        .map(|i| {
            (0..n_tags)
                .map(|j| ((i * 7 + j * 3) % 11) as f32 / 11.0 - 0.5)
                .collect()
        })
        .collect();
    (emissions, transitions)
}

fn bench_viterbi_decode(c: &mut Criterion) {
    let decoder = ViterbiDecoder::new(17);
    let (emissions, transitions) = synthetic_scores(64, 17);

    c.bench_function("viterbi_decode_len64_tags17", |b| {
        b.iter(|| {
            decoder
                .decode(black_box(&emissions), black_box(&transitions))
                .unwrap()
        });
    });

    let (short, _) = synthetic_scores(8, 17);
    c.bench_function("viterbi_decode_len8_tags17", |b| {
        b.iter(|| {
            decoder
                .decode(black_box(&short), black_box(&transitions))
                .unwrap()
        });
    });
}

criterion_group!(benches, bench_viterbi_decode);
criterion_main!(benches);
