//! Benchmarks for batch collation and example preprocessing.
//!
//! Run with: cargo bench -p vigogne-data

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use vigogne_core::IGNORE_INDEX;
use vigogne_data::{
    preprocess_corpus, DataCollator, PromptTemplate, RawExample, TokenizedExample,
    WhitespaceTokenizer,
};

/// Deterministic examples with varied lengths.
fn generate_examples(batch_size: usize, max_len: usize) -> Vec<TokenizedExample> {
    (0..batch_size)
        .map(|i| {
            let len = 1 + (i * 7919) % max_len;
            let input_ids: Vec<u32> = (0..len as u32).map(|j| j + 1).collect();
            let labels = input_ids
                .iter()
                .enumerate()
                .map(|(j, &id)| if j < len / 2 { IGNORE_INDEX } else { i64::from(id) })
                .collect();
            TokenizedExample { input_ids, labels }
        })
        .collect()
}

fn bench_collate(c: &mut Criterion) {
    let mut group = c.benchmark_group("collate");
    let collator = DataCollator::new(0).with_pad_to_multiple_of(Some(8));

    for batch_size in [8, 32, 128].iter() {
        let examples = generate_examples(*batch_size, 512);
        group.throughput(Throughput::Elements(*batch_size as u64));

        group.bench_with_input(
            BenchmarkId::new("pad_to_multiple_of_8", batch_size),
            batch_size,
            |b, _| {
                b.iter(|| collator.collate(black_box(&examples)).unwrap());
            },
        );
    }

    group.finish();
}

fn bench_preprocess(c: &mut Criterion) {
    let mut group = c.benchmark_group("preprocess");
    let tokenizer = WhitespaceTokenizer::default();
    let template = PromptTemplate::french();

    for num_examples in [100, 1000].iter() {
        let examples: Vec<RawExample> = (0..*num_examples)
            .map(|i| {
                RawExample::new(
                    format!("Traduis la phrase numéro {i} en anglais"),
                    if i % 2 == 0 { "le chat dort" } else { "" },
                    "the cat sleeps",
                )
            })
            .collect();
        group.throughput(Throughput::Elements(*num_examples as u64));

        group.bench_with_input(
            BenchmarkId::new("corpus", num_examples),
            num_examples,
            |b, _| {
                b.iter(|| preprocess_corpus(black_box(&examples), &template, 256, &tokenizer).unwrap());
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_collate, bench_preprocess);
criterion_main!(benches);
