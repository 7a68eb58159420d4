use std::sync::atomic::{AtomicBool, Ordering};

use memdb::{
    comparator::prelude::*,
    iterator::Iter,
    memtable::MemTable,
    options::MemTableOpenOptions,
};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "debug".into()))
        .init();

    let opts = MemTableOpenOptions::new().arena_block_size(8192).build()?;
    let table = MemTable::with_options(InternalKeyComparator::new(BytewiseComparator), &opts);

    let done = AtomicBool::new(false);
    crossbeam::scope(|s| {
        s.spawn(|_| {
            let mut seen = 0;
            while !done.load(Ordering::Acquire) {
                seen = table.scan_prefix(b"user:").count();
            }
            tracing::info!(seen, "reader finished");
        });

        for i in 0..10_000u64 {
            let key = format!("user:{:05}", i % 5000);
            table.put(i + 1, key.as_bytes(), format!("v{i}").as_bytes());
        }
        done.store(true, Ordering::Release);
    })
    .map_err(|_| anyhow::anyhow!("reader thread panicked"))?;

    println!("{:?}", table.get(u64::MAX, b"user:00042").map(String::from_utf8_lossy));
    println!("{:?}", table.get(43, b"user:00042").map(String::from_utf8_lossy));

    let mut iter = table.iter();
    iter.rewind(true);
    if let (Some(k), Some(v)) = (iter.key(), iter.value()) {
        println!("last: {:?} => {:?}", String::from_utf8_lossy(k), String::from_utf8_lossy(v));
    }

    println!(
        "entries: {}, memory: {} bytes",
        table.len(),
        table.approximate_memory_usage()
    );
    Ok(())
}
