//! Benchmarks for the content encoders and message serialization.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use integrations_smtp_session::codec::{
    encode_base64_folded, encode_header_value, encode_quoted_printable, Base64Folder,
    HeaderEncoding, MAX_LINE_LENGTH,
};
use integrations_smtp_session::{EmailAddress, Message, MimePart};

fn sample_text(len: usize) -> Vec<u8> {
    "Grüße aus Köln. The quick brown fox jumps over the lazy dog.\r\n"
        .bytes()
        .cycle()
        .take(len)
        .collect()
}

fn sample_binary(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn bench_base64(c: &mut Criterion) {
    let mut group = c.benchmark_group("base64");
    for size in [1024usize, 64 * 1024, 1024 * 1024] {
        let data = sample_binary(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("folded", size), &data, |b, data| {
            b.iter(|| encode_base64_folded(black_box(data), MAX_LINE_LENGTH))
        });
        group.bench_with_input(BenchmarkId::new("streamed_4k", size), &data, |b, data| {
            b.iter(|| {
                let mut folder = Base64Folder::new(MAX_LINE_LENGTH);
                let mut out = String::with_capacity(data.len() * 4 / 3 + data.len() / 38);
                for chunk in data.chunks(4096) {
                    folder.push(black_box(chunk), &mut out);
                }
                folder.finish(&mut out);
                out
            })
        });
    }
    group.finish();
}

fn bench_quoted_printable(c: &mut Criterion) {
    let mut group = c.benchmark_group("quoted_printable");
    for size in [1024usize, 64 * 1024] {
        let data = sample_text(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("body", size), &data, |b, data| {
            b.iter(|| encode_quoted_printable(black_box(data), false))
        });
    }
    group.finish();
}

fn bench_header_words(c: &mut Criterion) {
    let subject = "Zusammenfassung der Änderungen für das nächste Release – bitte prüfen";
    c.bench_function("header_auto", |b| {
        b.iter(|| encode_header_value(HeaderEncoding::Auto, black_box(subject)))
    });
    c.bench_function("header_base64", |b| {
        b.iter(|| encode_header_value(HeaderEncoding::Base64, black_box(subject)))
    });
}

fn bench_message(c: &mut Criterion) {
    let message = Message::builder()
        .from(EmailAddress::with_name("sender@example.com", "Sender").unwrap())
        .to(EmailAddress::new("recipient@example.com").unwrap())
        .subject("Quarterly report")
        .part(MimePart::text(String::from_utf8_lossy(&sample_text(16 * 1024)).into_owned()))
        .part(MimePart::attachment_bytes("report.pdf", sample_binary(256 * 1024)))
        .build()
        .unwrap();

    c.bench_function("message_to_bytes", |b| {
        b.iter(|| black_box(&message).to_bytes().unwrap())
    });
}

criterion_group!(
    benches,
    bench_base64,
    bench_quoted_printable,
    bench_header_words,
    bench_message
);
criterion_main!(benches);
