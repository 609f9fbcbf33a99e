use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use gadget_agent::{BlockParser, CompactionConfig, CompactionManager, CompactionStrategy, ConversationManager, SentinelConfig, estimate_tokens_chars};

fn build_conversation(turns: usize, text_size: usize) -> ConversationManager {
    let text = "a ".repeat(text_size / 2);
    let mut conversation = ConversationManager::new(vec![gadget_agent::Message::system("You are a helpful assistant")]);
    for i in 0..turns {
        conversation.add_user_message(format!("turn {i}: {text}"));
        conversation.add_assistant_message(format!("response {i}: {text}"));
    }
    conversation
}

fn gadget_call_block(n: usize) -> String {
    let mut out = String::new();
    for i in 0..n {
        out.push_str(&format!(
            "!!!GADGET_START:Search:gc_{i}\n!!!ARG:query\nquery number {i}\n!!!GADGET_END\n"
        ));
    }
    out
}

// Benchmark: token estimation over conversations of varying length.
fn bench_estimate_tokens_by_turn_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate_tokens_by_turn_count");
    for turns in [0, 1, 5, 10, 20, 50].iter() {
        let conversation = build_conversation(*turns, 100);
        let messages = conversation.messages();
        group.bench_with_input(BenchmarkId::from_parameter(turns), &messages, |b, msgs| {
            b.iter(|| estimate_tokens_chars(black_box(msgs)));
        });
    }
    group.finish();
}

// Benchmark: token estimation with varying message sizes.
fn bench_estimate_tokens_by_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("estimate_tokens_by_size");
    for size in [10, 100, 1000, 10000].iter() {
        let conversation = build_conversation(10, *size);
        let messages = conversation.messages();
        group.bench_with_input(BenchmarkId::from_parameter(size), &messages, |b, msgs| {
            b.iter(|| estimate_tokens_chars(black_box(msgs)));
        });
    }
    group.finish();
}

// Benchmark: compaction decision + sliding-window compaction over large histories.
fn bench_compaction(c: &mut Criterion) {
    let mut group = c.benchmark_group("compaction");
    let rt = tokio::runtime::Runtime::new().unwrap();

    for turns in [20, 50, 100].iter() {
        let manager = CompactionManager::new(
            CompactionConfig {
                enabled: true,
                strategy: CompactionStrategy::SlidingWindow,
                trigger_threshold_percent: 0.01, // force triggering on small context windows
                target_percent: 0.005,
                preserve_recent_turns: 2,
                ..Default::default()
            },
            1000,
        );

        group.bench_with_input(BenchmarkId::from_parameter(turns), turns, |b, &turns| {
            b.iter_batched(
                || build_conversation(turns, 100),
                |mut conversation| {
                    rt.block_on(manager.maybe_compact(black_box(&mut conversation), 1, None))
                        .unwrap()
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

// Benchmark: streaming block parser over varying numbers of gadget calls.
fn bench_block_parser(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_parser_feed");
    for count in [1, 10, 50, 200].iter() {
        let text = gadget_call_block(*count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &text, |b, text| {
            b.iter(|| {
                let mut parser = BlockParser::new(SentinelConfig::default());
                let events = parser.feed(black_box(text));
                black_box(events);
                parser.finish()
            });
        });
    }
    group.finish();
}

// Benchmark: block parser fed in small chunks, simulating real SSE streaming.
fn bench_block_parser_chunked(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_parser_chunked");
    let text = gadget_call_block(50);

    for chunk_size in [4, 16, 64].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(chunk_size), chunk_size, |b, &chunk_size| {
            b.iter(|| {
                let mut parser = BlockParser::new(SentinelConfig::default());
                for chunk in text.as_bytes().chunks(chunk_size) {
                    let piece = std::str::from_utf8(chunk).unwrap_or("");
                    black_box(parser.feed(piece));
                }
                parser.finish()
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_estimate_tokens_by_turn_count,
    bench_estimate_tokens_by_size,
    bench_compaction,
    bench_block_parser,
    bench_block_parser_chunked,
);
criterion_main!(benches);
