// Benchmark for compiling and caching large G-code programs.
// Run with: cargo bench

use criterion::{criterion_group, criterion_main, Criterion};
use printer_core::cache::store::SECTOR_RECORDS_START;
use printer_core::cache::writer::CacheWriter;
use printer_core::config::{AxisConfig, MotionConfig};
use printer_core::gcode::Compiler;
use printer_core::ports::sim::MemoryBlockStore;

fn axis() -> AxisConfig {
    AxisConfig {
        x_steps_per_mm: 100,
        y_steps_per_mm: 100,
        z_steps_per_mm: 400,
        e_steps_per_mm: 104,
    }
}

fn bench_compile_10k_moves(c: &mut Criterion) {
    let mut gcode = String::new();
    for i in 0..10_000 {
        gcode.push_str(&format!("G1 F1800 X{} Y{}\n", i, i));
    }

    c.bench_function("compile 10k G1 lines", |b| {
        b.iter(|| {
            let mut compiler = Compiler::new(axis(), MotionConfig::default());
            let mut writer = CacheWriter::new(axis(), SECTOR_RECORDS_START);
            let mut store = MemoryBlockStore::new();
            for line in gcode.lines() {
                for record in compiler.compile_line(line).unwrap() {
                    writer.append(&mut store, record).unwrap();
                }
            }
            writer.close(&mut store).unwrap();
        });
    });
}

fn bench_region_annotation_many_long_regions(c: &mut Criterion) {
    // Each burst of 20 collinear moves shares direction/fetch, so the
    // writer keeps growing one region's `sequence_time` in place across
    // the burst (well under the 32-record double-page cap) before a
    // direction change opens the next one.
    let mut gcode = String::new();
    for burst in 0..500 {
        let y = if burst % 2 == 0 { 0 } else { 10 };
        for i in 0..20 {
            gcode.push_str(&format!("G1 F1800 X{} Y{}\n", (i + 1) * 10, y));
        }
    }

    c.bench_function("compile 10k collinear moves (many regions)", |b| {
        b.iter(|| {
            let mut compiler = Compiler::new(axis(), MotionConfig::default());
            let mut writer = CacheWriter::new(axis(), SECTOR_RECORDS_START);
            let mut store = MemoryBlockStore::new();
            for line in gcode.lines() {
                for record in compiler.compile_line(line).unwrap() {
                    writer.append(&mut store, record).unwrap();
                }
            }
            writer.close(&mut store).unwrap();
        });
    });
}

criterion_group!(benches, bench_compile_10k_moves, bench_region_annotation_many_long_regions);
criterion_main!(benches);
