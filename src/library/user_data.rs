//! Per-user reading state: last-read positions and annotations

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::BookId;

/// Identity used when a request carries no user
pub const ANONYMOUS_USER: &str = "*";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadPosition {
    pub device: String,
    pub cfi: Option<String>,
    pub epoch: f64,
    pub pos_frac: f64,
    pub user: String,
}

#[derive(Debug, Default)]
struct BookState {
    positions: Vec<ReadPosition>,
    annotations: HashMap<String, Vec<Value>>,
}

#[derive(Debug, Default)]
pub struct UserData {
    books: Mutex<HashMap<(BookId, String), BookState>>,
}

impl UserData {
    pub fn new() -> Self {
        Self::default()
    }

    fn books(&self) -> MutexGuard<'_, HashMap<(BookId, String), BookState>> {
        self.books.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Positions for one user, most recent first
    pub fn last_read_positions(&self, book_id: BookId, format: &str, user: &str) -> Vec<ReadPosition> {
        let books = self.books();
        let mut positions: Vec<ReadPosition> = books
            .get(&(book_id, format.to_uppercase()))
            .map(|state| {
                state
                    .positions
                    .iter()
                    .filter(|p| p.user == user)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        positions.sort_by(|a, b| b.epoch.partial_cmp(&a.epoch).unwrap_or(Ordering::Equal));
        positions
    }

    /// Record a position; a later one from the same device replaces it
    pub fn set_last_read_position(&self, book_id: BookId, format: &str, position: ReadPosition) {
        let mut books = self.books();
        let state = books.entry((book_id, format.to_uppercase())).or_default();
        state
            .positions
            .retain(|p| !(p.user == position.user && p.device == position.device));
        debug!(book_id, format, user = %position.user, device = %position.device, "Last read position stored");
        state.positions.push(position);
    }

    /// Annotations grouped by their `type` field
    pub fn annotations_map(&self, book_id: BookId, format: &str, user: &str) -> Map<String, Value> {
        let books = self.books();
        let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        if let Some(list) = books
            .get(&(book_id, format.to_uppercase()))
            .and_then(|state| state.annotations.get(user))
        {
            for annotation in list {
                let kind = annotation
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                grouped.entry(kind).or_default().push(annotation.clone());
            }
        }
        grouped
            .into_iter()
            .map(|(kind, list)| (kind, Value::Array(list)))
            .collect()
    }

    /// Merge `incoming` into the stored annotations.
    ///
    /// Annotations are matched by `uuid`; the one with the later `timestamp`
    /// wins. Annotations without a `uuid` are appended.
    pub fn merge_annotations(&self, book_id: BookId, format: &str, user: &str, incoming: Vec<Value>) {
        let mut books = self.books();
        let stored = books
            .entry((book_id, format.to_uppercase()))
            .or_default()
            .annotations
            .entry(user.to_string())
            .or_default();

        let count = incoming.len();
        for annotation in incoming {
            let Some(uuid) = annotation.get("uuid").and_then(Value::as_str).map(str::to_owned) else {
                stored.push(annotation);
                continue;
            };
            match stored
                .iter_mut()
                .find(|existing| existing.get("uuid").and_then(Value::as_str) == Some(uuid.as_str()))
            {
                Some(existing) => {
                    if is_newer(&annotation, existing) {
                        *existing = annotation;
                    }
                }
                None => stored.push(annotation),
            }
        }
        debug!(book_id, format, user, count, "Annotations merged");
    }
}

fn is_newer(candidate: &Value, existing: &Value) -> bool {
    match (candidate.get("timestamp"), existing.get("timestamp")) {
        (Some(a), Some(b)) => compare_timestamps(a, b) == Ordering::Greater,
        (Some(_), None) => true,
        _ => false,
    }
}

/// Numbers compare numerically, RFC 3339 strings by instant, anything else as text
fn compare_timestamps(a: &Value, b: &Value) -> Ordering {
    if let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) {
        return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
    }
    match (a.as_str(), b.as_str()) {
        (Some(a), Some(b)) => match (DateTime::parse_from_rfc3339(a), DateTime::parse_from_rfc3339(b)) {
            (Ok(a), Ok(b)) => a.cmp(&b),
            _ => a.cmp(b),
        },
        _ => Ordering::Equal,
    }
}
