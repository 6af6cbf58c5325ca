//! Drives a `Monitor` against a scratch directory from a plain `loop {}`,
//! standing in for whatever cooperative scheduler the embedding
//! application actually owns (a GTK idle handler, a game-engine tick,
//! ...). Run with a path argument, or none to watch a temp directory.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use fsearch_monitor::{Monitor, MemoryIndex};

fn main() {
    tracing_subscriber::fmt::init();

    let root = match env::args().nth(1) {
        Some(path) => path.into(),
        None => env::temp_dir().join("fsearch-monitor-demo"),
    };
    std::fs::create_dir_all(&root).expect("create watch root");

    let index = Arc::new(MemoryIndex::new());
    let mut monitor = Monitor::new(index.clone(), vec![root.clone()]);

    monitor.set_callback(|| {
        tracing::info!("batch applied");
    });
    monitor.set_error_callback(|kind| {
        tracing::warn!(?kind, "monitor reported an error");
    });

    monitor.start().expect("start monitor");
    println!(
        "watching {} ({} watches) — ctrl-c to exit",
        root.display(),
        monitor.get_num_watches()
    );

    loop {
        if monitor.pump() == fsearch_monitor::PumpResult::Applied {
            for entry in index.entries() {
                println!("{}\t{}", if entry.is_folder { "dir " } else { "file" }, entry.path.display());
            }
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}
