//! Demo: a live to-do list
//!
//! Subscribes to `todolist`, appends and removes items, and shows how the view
//! follows snapshots. A second subscription in optimistic mode sees its own
//! writes at once.
//!
//! Run with: cargo run --example todo_list

use eyre::Result;
use lifetrack::trackers::{TODO_PATH, TodoItem, newest_first};
use lifetrack::{CollectionSync, LiveCollection, MemoryStore, SyncMode};
use std::sync::Arc;

fn print(label: &str, list: &LiveCollection<TodoItem>) {
    println!("{} ({} items)", label, list.len());
    for record in newest_first(list.records()) {
        println!("  {}  {:<20} {}", record.id, record.fields.name, record.fields.category);
    }
    println!();
}

fn main() -> Result<()> {
    println!("lifetrack To-do Demo");
    println!("====================\n");

    let sync = CollectionSync::new(Arc::new(MemoryStore::new()));

    // Subscribe before anything exists: the first snapshot is an empty list
    let mut list: LiveCollection<TodoItem> = sync.subscribe(TODO_PATH)?;
    list.poll();
    print("1. Fresh subscription", &list);

    // Writes go through the store; the view changes when the snapshot arrives
    let milk = sync.append(TODO_PATH, &TodoItem::new("Buy milk", "Groceries"))?;
    sync.append(TODO_PATH, &TodoItem::new("Renew passport", "Documents"))?;
    sync.append(TODO_PATH, &TodoItem::new("Buy milk", "Groceries"))?;
    println!("2. Appended three items, view before poll: {} items", list.len());
    list.poll();
    print("   After poll", &list);

    // Identical fields, distinct ids: removing one leaves the other
    sync.remove_at(&format!("{}/{}", TODO_PATH, milk))?;
    list.poll();
    print("3. Removed one 'Buy milk'", &list);

    // Optimistic subscription shows its own writes immediately
    let mut eager: LiveCollection<TodoItem> = sync.subscribe_with_mode(TODO_PATH, SyncMode::Optimistic)?;
    eager.poll();
    eager.append(&TodoItem::new("Swim", "Sport"))?;
    println!("4. Optimistic append, view before poll: {} items", eager.len());
    eager.poll();
    list.poll();
    println!("   Both views agree after poll: {}\n", eager.records() == list.records());

    // Cancelled views stay frozen
    list.cancel();
    sync.append(TODO_PATH, &TodoItem::new("Stretch", "Health"))?;
    list.poll();
    eager.poll();
    println!("5. After cancel: cancelled view {} items, live view {} items", list.len(), eager.len());

    Ok(())
}
