//! Performance benchmarks for search operations

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rusqlite::Connection;

use leara::search::{search_memories, SearchOptions};
use leara::storage::queries::create_memory;
use leara::storage::{configure_connection, run_migrations};
use leara::types::*;

fn setup_with_data(count: usize) -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    configure_connection(&conn, JournalMode::Wal, Duration::from_secs(5), true).unwrap();
    run_migrations(&conn).unwrap();

    let sample_values = [
        "Prefers dark roast coffee in the morning",
        "Sister's birthday is on the 14th of March",
        "Working on the Rust rewrite of the billing service",
        "Allergic to peanuts",
        "Favourite city is Zürich",
        "Uses Helix as the main editor",
        "Gym on Mondays and Thursdays",
        "Wants reminders 30 minutes before meetings",
    ];

    for i in 0..count {
        create_memory(
            &conn,
            &CreateMemoryInput::new(
                format!("fact_{}", i),
                format!("{} (note {})", sample_values[i % sample_values.len()], i),
            )
            .category(if i % 4 == 0 { "personal" } else { "general" }),
        )
        .unwrap();
    }

    conn
}

fn bench_substring_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("substring_search");

    for count in [100, 1000, 10000] {
        let conn = setup_with_data(count);

        group.bench_with_input(BenchmarkId::new("common_term", count), &count, |b, _| {
            let options = SearchOptions::new("coffee");
            b.iter(|| search_memories(&conn, black_box(&options)).unwrap())
        });

        group.bench_with_input(BenchmarkId::new("no_match", count), &count, |b, _| {
            let options = SearchOptions::new("giraffe");
            b.iter(|| search_memories(&conn, black_box(&options)).unwrap())
        });

        group.bench_with_input(BenchmarkId::new("case_folded", count), &count, |b, _| {
            let options = SearchOptions::new("ZÜRICH").category("personal");
            b.iter(|| search_memories(&conn, black_box(&options)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_substring_search);
criterion_main!(benches);
