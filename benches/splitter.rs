use criterion::{black_box, criterion_group, criterion_main, Criterion};

use olm_gateway::backend::mock::tokenize;
use olm_gateway::protocol::canonical::RawChunk;
use olm_gateway::stream::{ReasoningMarkers, ReasoningSplitter, StreamTranslator};

fn sample_text(words: usize) -> String {
    let mut text = String::from("<think>");
    for idx in 0..words / 4 {
        text.push_str("consider option ");
        text.push_str(&idx.to_string());
        text.push(' ');
    }
    text.push_str("</think>");
    for idx in 0..words {
        text.push_str("token");
        text.push_str(&(idx % 10).to_string());
        text.push_str(if idx % 7 == 0 { ", " } else { " " });
    }
    text
}

fn bench_splitter_feed(c: &mut Criterion) {
    let markers = ReasoningMarkers::default();
    let tokens = tokenize(&sample_text(512));

    c.bench_function("splitter_feed_tokenized_512", |b| {
        b.iter(|| {
            let mut splitter = ReasoningSplitter::new(markers.clone());
            for token in &tokens {
                black_box(splitter.feed(black_box(token)));
            }
            black_box(splitter.finish())
        });
    });

    let text = sample_text(512);
    c.bench_function("splitter_feed_single_chunk_512", |b| {
        b.iter(|| {
            let mut splitter = ReasoningSplitter::new(markers.clone());
            black_box(splitter.feed(black_box(&text)));
            black_box(splitter.finish())
        });
    });

    let plain = "no markers here at all ".repeat(64);
    c.bench_function("splitter_feed_plain_1k", |b| {
        b.iter(|| {
            let mut splitter = ReasoningSplitter::new(markers.clone());
            black_box(splitter.feed(black_box(&plain)));
            black_box(splitter.finish())
        });
    });
}

fn bench_translator(c: &mut Criterion) {
    let markers = ReasoningMarkers::default();
    let tokens = tokenize(&sample_text(256));

    c.bench_function("translator_tokenized_256", |b| {
        b.iter(|| {
            let mut translator = StreamTranslator::new(markers.clone());
            for token in &tokens {
                black_box(translator.translate(RawChunk::text(token.as_str())));
            }
            black_box(translator.translate(RawChunk::done()))
        });
    });
}

criterion_group!(benches, bench_splitter_feed, bench_translator);
criterion_main!(benches);
