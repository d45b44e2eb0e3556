use std::sync::Arc;

use karst::buffer::BufferPoolManager;
use karst::index::{BPlusTree, DefaultKeyComparator, Transaction};
use karst::storage::disk::DiskManager;
use karst::{PageId, RecordId, SlotId};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("Karst - buffer pool + B+ tree storage core");
    println!("===========================================\n");

    let db_path = "demo.db";

    let disk_manager = Arc::new(DiskManager::new(db_path).expect("Failed to create disk manager"));
    println!("Opened database file: {}", db_path);

    let bpm = Arc::new(BufferPoolManager::new(16, 2, disk_manager));
    println!("Created buffer pool with 16 frames\n");

    let tree = BPlusTree::new("demo_index", bpm.clone(), DefaultKeyComparator, 8, 8);
    let mut txn = Transaction::new();

    for key in [42u64, 7, 19, 3, 88, 54, 21, 63, 11, 95] {
        let rid = RecordId::new(PageId::new(key as u32), SlotId::new(0));
        tree.insert(key, rid, &mut txn).expect("insert failed");
        println!("Inserted key {}", key);
    }

    println!("\nRoot page: {}", tree.root_page_id());

    match tree.get_value(54).expect("lookup failed") {
        Some(rid) => println!("Found key 54 -> {:?}", rid),
        None => println!("Key 54 missing"),
    }

    println!("\nRange scan [10, 60]:");
    for (key, rid) in tree.range_scan(10, 60).expect("scan failed") {
        println!("  {} -> page {}", key, rid.page_id);
    }

    tree.remove(19, &mut txn).expect("remove failed");
    println!("\nRemoved key 19; lookup now: {:?}", tree.get_value(19).unwrap());

    println!("\nFull contents in key order:");
    let mut iter = tree.iter().expect("iterator failed");
    while let Some((key, _)) = iter.next().expect("iteration failed") {
        print!("{} ", key);
    }
    println!();

    bpm.flush_all_pages().expect("flush failed");
    println!("\nFlushed all pages; pinned frames: {}", bpm.pinned_frame_count());

    std::fs::remove_file(db_path).ok();
    println!("Demo completed successfully!");
}
