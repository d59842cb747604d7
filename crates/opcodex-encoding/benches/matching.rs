//! Benchmarks for encoding parsing and table matching.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use opcodex_encoding::nasm::{compile_encoding, parse_encoding, CompileContext};
use opcodex_encoding::{CodeSegmentType, OpcodeTable, VexEncoding};

const SAMPLE_TABLE: &str = include_str!("../tests/fixtures/insns_sample.dat");

/// 32-bit code covered by the sample table.
const IA32_CODE: &[u8] = &[
    0x37, // aaa
    0x04, 0x7f, // add al, 0x7f
    0x05, 0x78, 0x56, 0x34, 0x12, // add eax, 0x12345678
    0x00, 0x04, 0x85, 0x00, 0x10, 0x00, 0x00, // add [0x1000+eax*4], al
    0xf6, 0xd8, // neg al
    0xd8, 0xc1, // fadd st0, st1
    0x0f, 0xa2, // cpuid
    0x0f, 0x84, 0x10, 0x00, 0x00, 0x00, // je +0x10
    0xf3, 0x0f, 0x10, 0xc1, // movss xmm0, xmm1
    0xc5, 0xf8, 0x10, 0xc1, // vmovups xmm0, xmm1
    0x90, // nop
];

fn generate_large_block(size: usize) -> Vec<u8> {
    IA32_CODE.iter().copied().cycle().take(size).collect()
}

fn bench_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("parsing");
    let ctx = CompileContext::default();

    group.bench_function("tokenize", |b| {
        b.iter(|| parse_encoding(black_box("hle o32 81 /0 id")))
    });
    group.bench_function("compile", |b| {
        b.iter(|| compile_encoding(black_box("66 0f 3a cc /r ib"), &ctx))
    });
    group.bench_function("vex", |b| {
        b.iter(|| VexEncoding::parse(black_box("vex.dds.256.66.0f38.w1")))
    });
    group.bench_function("insns_table", |b| {
        b.iter(|| OpcodeTable::from_insns(black_box(SAMPLE_TABLE)))
    });

    group.finish();
}

fn bench_matching(c: &mut Criterion) {
    let (table, _) = OpcodeTable::from_insns(SAMPLE_TABLE);
    let mut group = c.benchmark_group("matching");

    group.bench_function("single_instruction", |b| {
        b.iter(|| table.decode(black_box(&IA32_CODE[8..15]), CodeSegmentType::Ia32))
    });

    for size in [1024, 4096, 16384] {
        let code = generate_large_block(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("throughput", size), &code, |b, code| {
            b.iter(|| table.decode_all(black_box(code), CodeSegmentType::Ia32))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_parsing, bench_matching);
criterion_main!(benches);
