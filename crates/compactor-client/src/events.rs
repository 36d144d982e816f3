//! Placement event files.
//!
//! An events file drives add/remove cycles of topology workloads for
//! experiments: CSV lines of `<workload_index>,<addClient|delClient>`.
//! Without one, every workload is added once, in topology order.

use std::path::Path;

/// One add or remove of a topology workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Index into the topology's client list.
    pub index: usize,
    /// Add when true, remove when false.
    pub add: bool,
}

/// Parses an events file; lines that do not parse are skipped.
pub fn parse_events(path: impl AsRef<Path>) -> std::io::Result<Vec<Event>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text.lines().filter_map(parse_line).collect())
}

/// The default schedule: add every workload once, in order.
pub fn default_events(count: usize) -> Vec<Event> {
    (0..count).map(|index| Event { index, add: true }).collect()
}

fn parse_line(line: &str) -> Option<Event> {
    let (index, action) = line.split_once(',')?;
    let index = index.trim().parse().ok()?;
    let add = match action.trim() {
        "addClient" => true,
        "delClient" => false,
        _ => return None,
    };
    Some(Event { index, add })
}
