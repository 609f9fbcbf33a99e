//! Content-addressed stash for gadget results too large to hand back to
//! the model inline (§4.3).
//!
//! When a result's estimated size exceeds the configured fraction of the
//! context window, the scheduler stores the full content here and gives
//! the model a short ID plus a preview instead. Later gadget calls can
//! reference the ID (e.g. to read a slice of a stored file listing)
//! without the full content ever round-tripping through the model twice.

use rand::Rng;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::SystemTime;

use crate::types::StoredOutput;

/// 4 characters per token is the same estimate `CompactionManager` uses
/// for context-window accounting (§4.5), kept consistent here so the
/// truncation policy and the compaction trigger agree on what "tokens"
/// means.
const CHARS_PER_TOKEN: usize = 4;

fn random_hex_suffix() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 4] = rng.r#gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Given the output-limit percent and the context window size, the
/// maximum number of characters a single gadget result may occupy before
/// it must be stashed (§4.3: `limitPercent * contextWindow * 4 chars/token`).
pub fn max_inline_chars(limit_percent: f32, context_window: usize) -> usize {
    ((limit_percent as f64) * (context_window as f64) * (CHARS_PER_TOKEN as f64)) as usize
}

/// In-memory store, keyed by generated ID. `RwLock` rather than
/// `tokio::sync::Mutex` since stores/gets are synchronous, non-blocking
/// work done inline in the scheduler's result-assembly path.
#[derive(Default)]
pub struct OutputStore {
    entries: RwLock<HashMap<String, StoredOutput>>,
}

impl OutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `content` under a new ID of the form `<GadgetName>_<8-hex>`,
    /// retrying on the vanishingly unlikely collision.
    pub fn store(&self, gadget_name: &str, content: String) -> String {
        let byte_size = content.len();
        let line_count = content.lines().count();
        let timestamp = SystemTime::now();

        let mut entries = self.entries.write().expect("output store lock poisoned");
        loop {
            let id = format!("{}_{}", gadget_name, random_hex_suffix());
            if !entries.contains_key(&id) {
                entries.insert(
                    id.clone(),
                    StoredOutput {
                        id: id.clone(),
                        gadget_name: gadget_name.to_string(),
                        content: content.clone(),
                        byte_size,
                        line_count,
                        timestamp,
                    },
                );
                return id;
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<StoredOutput> {
        self.entries
            .read()
            .expect("output store lock poisoned")
            .get(id)
            .cloned()
    }

    pub fn has(&self, id: &str) -> bool {
        self.entries
            .read()
            .expect("output store lock poisoned")
            .contains_key(id)
    }

    pub fn get_ids(&self) -> Vec<String> {
        self.entries
            .read()
            .expect("output store lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries.write().expect("output store lock poisoned").clear();
    }

    pub fn size(&self) -> usize {
        self.entries.read().expect("output store lock poisoned").len()
    }
}

impl Clone for StoredOutput {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            gadget_name: self.gadget_name.clone(),
            content: self.content.clone(),
            byte_size: self.byte_size,
            line_count: self.line_count,
            timestamp: self.timestamp,
        }
    }
}

/// Fraction of `max_chars` given to the head; the remainder goes to the
/// tail. A short head preserves a result's leading summary/status line, a
/// short tail preserves whatever ran last (often the interesting part of
/// a log or command output).
const HEAD_SHARE: f64 = 0.6;

/// If `content` exceeds `max_chars`, stashes it whole in `store` and
/// returns a short head + tail with a marker carrying the stored ID and
/// total byte/line counts (§4.3); otherwise returns `content` unchanged.
pub fn truncate_for_inline(store: &OutputStore, gadget_name: &str, content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }

    let byte_size = content.len();
    let line_count = content.lines().count();
    let id = store.store(gadget_name, content.to_string());

    let head_chars = ((max_chars as f64) * HEAD_SHARE) as usize;
    let tail_chars = max_chars.saturating_sub(head_chars);

    let chars: Vec<char> = content.chars().collect();
    let head: String = chars.iter().take(head_chars).collect();
    let tail: String = chars
        .iter()
        .skip(chars.len().saturating_sub(tail_chars))
        .collect();

    format!(
        "{head}\n[... truncated, full output stored as {id} ({byte_size} bytes, {line_count} lines)] ...\n{tail}"
    )
}
