use std::fmt::Write as _;
use std::hint::black_box;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use gompc_ingest::csv_ingest::parse_bytes;
use gompc_ingest::filename::FilenameMetadataExtractor;
use gompc_ingest::normalize::{normalize_label, normalize_numeric};

const NUMERIC_CELLS: &[&str] = &[
    "12,050",
    "-0.100",
    "1.234.567,89",
    "1,234,567.89",
    "1.5E-03",
    "90,0°",
    "±0,05",
    "#N/A",
    "¿¿¿???",
    "",
];

const LABELS: &[&str] = &["Circle 1", "Plane Δ", "Ø Bore", "Àngle 90°", "Slot_3 / Width"];

const FILE_NAMES: &[&str] = &[
    "L42_2024_03_01_08_00_00.csv",
    "PZ-7_03_01_08_00_00.csv",
    "OF123 24-03-01 08-00-00.csv",
    "nodate.csv",
];

fn generate_export(rows: usize) -> Vec<u8> {
    let mut csv = String::from("Element;Property;Nominal;Actual;Tol -;Tol +;Dev;Check;Out;Alignment\n");
    for i in 0..rows {
        let actual = 12.0 + (i % 100) as f64 / 1000.0;
        let line = format!("Circle {i};Diameter;12,000;{actual:.3};-0,100;0,100;0,050;OK;;A1");
        writeln!(csv, "{}", line.replace('.', ",")).expect("write to string");
    }
    csv.into_bytes()
}

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");

    group.bench_function("numeric_cells", |b| {
        b.iter(|| {
            for cell in NUMERIC_CELLS {
                black_box(normalize_numeric(black_box(cell), 0.0));
            }
        });
    });

    group.bench_function("labels", |b| {
        b.iter(|| {
            for label in LABELS {
                black_box(normalize_label(black_box(label)));
            }
        });
    });

    let extractor = FilenameMetadataExtractor::with_reference_year(2024);
    group.bench_function("filename_metadata", |b| {
        b.iter(|| {
            for name in FILE_NAMES {
                black_box(extractor.extract(black_box(name)));
            }
        });
    });

    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let bytes = generate_export(5_000);
    let mut group = c.benchmark_group("csv_ingest");
    group.bench_function("parse_5000_rows", |b| {
        b.iter_batched(
            || bytes.clone(),
            |input| {
                parse_bytes(&input).expect("parse export");
            },
            BatchSize::LargeInput,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_normalize, bench_parse);
criterion_main!(benches);
