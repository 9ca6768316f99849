//! Simple CLI for exercising a BBB-tree index on disk.
//!
//! Usage:
//!   bbbtree_cli <dir> put <key> <value>
//!   bbbtree_cli <dir> get <key>
//!   bbbtree_cli <dir> delete <key>
//!   bbbtree_cli <dir> scan [start] [end]
//!   bbbtree_cli <dir> stats
//!   bbbtree_cli <dir> bulk_insert <count>
//!
//! `<dir>` holds one file per segment: `seg_0.db` is the primary tree,
//! `seg_1.db` is its delta tree.

use std::env;
use std::process::exit;
use std::sync::Arc;

use bbbtree_storage::types::SegmentId;
use bbbtree_storage::{BbbTree, Config, Stats};

const PRIMARY_SEGMENT: SegmentId = SegmentId(0);
const DELTA_SEGMENT: SegmentId = SegmentId(1);

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: bbbtree_cli <dir> <command> [args...]");
        eprintln!("Commands:");
        eprintln!("  put <key> <value>   - Insert or update a key-value pair");
        eprintln!("  get <key>           - Get value for a key");
        eprintln!("  delete <key>        - Tombstone a key");
        eprintln!("  scan [start] [end]  - Scan keys in range");
        eprintln!("  stats               - Show counters (spec §6)");
        eprintln!("  bulk_insert <count> - Insert count test records");
        exit(1);
    }

    let dir = &args[1];
    let command = &args[2];

    let wa_threshold: f64 = env::var("BBBTREE_WA_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(bbbtree_storage::types::DEFAULT_WA_THRESHOLD);

    let config = Config::new(dir).wa_threshold(wa_threshold);
    let stats = Stats::shared();
    let pool = match config.open_pool(stats.clone()) {
        Ok(pool) => Arc::new(pool),
        Err(e) => {
            eprintln!("ERROR: failed to open buffer pool: {}", e);
            exit(1);
        }
    };
    let tree = match BbbTree::new(PRIMARY_SEGMENT, DELTA_SEGMENT, pool, stats.clone(), wa_threshold)
    {
        Ok(tree) => tree,
        Err(e) => {
            eprintln!("ERROR: failed to open tree: {}", e);
            exit(1);
        }
    };

    match command.as_str() {
        "put" => {
            if args.len() < 5 {
                eprintln!("Usage: bbbtree_cli <dir> put <key> <value>");
                exit(1);
            }
            let key = &args[3];
            let value = &args[4];

            match tree.insert(key.as_bytes(), value.as_bytes()) {
                Ok(true) => println!("OK"),
                Ok(false) => println!("ALREADY_PRESENT"),
                Err(e) => {
                    eprintln!("ERROR: {}", e);
                    exit(1);
                }
            }
        }

        "get" => {
            if args.len() < 4 {
                eprintln!("Usage: bbbtree_cli <dir> get <key>");
                exit(1);
            }
            let key = &args[3];

            match tree.lookup(key.as_bytes()) {
                Ok(Some(value)) => match String::from_utf8(value) {
                    Ok(s) => println!("{}", s),
                    Err(_) => println!("<binary data>"),
                },
                Ok(None) => println!("NOT_FOUND"),
                Err(e) => {
                    eprintln!("ERROR: {}", e);
                    exit(1);
                }
            }
        }

        "delete" => {
            if args.len() < 4 {
                eprintln!("Usage: bbbtree_cli <dir> delete <key>");
                exit(1);
            }
            let key = &args[3];

            match tree.erase(key.as_bytes()) {
                Ok(true) => println!("DELETED"),
                Ok(false) => println!("NOT_FOUND"),
                Err(e) => {
                    eprintln!("ERROR: {}", e);
                    exit(1);
                }
            }
        }

        "scan" => {
            let start = args.get(3).map(|s| s.as_bytes());
            let end = args.get(4).map(|s| s.as_bytes());

            match tree.scan(start, end) {
                Ok(results) => {
                    println!("COUNT: {}", results.len());
                    for (key, value) in results {
                        let key_str = String::from_utf8_lossy(&key);
                        let value_str = String::from_utf8_lossy(&value);
                        println!("{} -> {}", key_str, value_str);
                    }
                }
                Err(e) => {
                    eprintln!("ERROR: {}", e);
                    exit(1);
                }
            }
        }

        "stats" => {
            let snap = stats.snapshot();
            let deferred_pages = tree.deferred_page_count().unwrap_or(0);
            println!("b_tree_height: {}", snap.b_tree_height);
            println!("delta_tree_height: {}", snap.delta_tree_height);
            println!("leaf_node_splits: {}", snap.leaf_node_splits);
            println!("inner_node_splits: {}", snap.inner_node_splits);
            println!("pages_created: {}", snap.pages_created);
            println!("pages_evicted: {}", snap.pages_evicted);
            println!("pages_written: {}", snap.pages_written);
            println!("pages_write_deferred: {}", snap.pages_write_deferred);
            println!("bytes_written_logically: {}", snap.bytes_written_logically);
            println!("bytes_written_physically: {}", snap.bytes_written_physically);
            println!("deferred_pages_in_delta_tree: {}", deferred_pages);
        }

        "bulk_insert" => {
            if args.len() < 4 {
                eprintln!("Usage: bbbtree_cli <dir> bulk_insert <count>");
                exit(1);
            }
            let count: usize = match args[3].parse() {
                Ok(n) => n,
                Err(_) => {
                    eprintln!("ERROR: invalid count");
                    exit(1);
                }
            };

            let start = std::time::Instant::now();
            for i in 0..count {
                let key = format!("key_{:08}", i);
                let value = format!("value_{}", i);
                if let Err(e) = tree.insert(key.as_bytes(), value.as_bytes()) {
                    eprintln!("ERROR at {}: {}", i, e);
                    exit(1);
                }
            }
            let elapsed = start.elapsed();
            let ops_per_sec = count as f64 / elapsed.as_secs_f64();
            println!("INSERTED: {}", count);
            println!("TIME_MS: {}", elapsed.as_millis());
            println!("OPS_PER_SEC: {:.0}", ops_per_sec);
        }

        _ => {
            eprintln!("Unknown command: {}", command);
            exit(1);
        }
    }

    // Ensure data is persisted: the buffer pool has no flush-on-drop, so a
    // mutating command's dirty frames would otherwise be lost on exit.
    if let Err(e) = tree.close() {
        eprintln!("Warning: Failed to flush: {}", e);
    }
}
