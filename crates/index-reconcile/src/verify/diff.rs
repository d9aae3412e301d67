//! Structural diff of normalized records.
//!
//! Produces `path: db != index` lines. A key present on only one side is
//! expanded to its leaves, so a missing sub-object yields one line per leaf.

use crate::record::Value;

const MISSING: &str = "<missing>";

/// Collects differences up to a fixed number of entries.
#[derive(Debug)]
pub struct Differ {
    max: usize,
    out: Vec<String>,
}

impl Differ {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            out: Vec::new(),
        }
    }

    /// Whether the entry budget is used up.
    pub fn is_full(&self) -> bool {
        self.out.len() >= self.max
    }

    /// Compare two values rooted at `path`; returns the new entries.
    pub fn diff(&mut self, path: &str, db: &Value, index: &Value) -> Vec<String> {
        let before = self.out.len();
        self.walk(path, db, index);
        self.out[before..].to_vec()
    }

    /// Record that one side has no record at all.
    pub fn missing(
        &mut self,
        path: &str,
        db: Option<&Value>,
        index: Option<&Value>,
    ) -> Vec<String> {
        let before = self.out.len();
        let side = |v: Option<&Value>| if v.is_some() { "<present>" } else { MISSING };
        self.push(format!("{}: {} != {}", path, side(db), side(index)));
        self.out[before..].to_vec()
    }

    fn push(&mut self, line: String) {
        if !self.is_full() {
            self.out.push(line);
        }
    }

    fn walk(&mut self, path: &str, db: &Value, index: &Value) {
        if self.is_full() {
            return;
        }
        match (db, index) {
            (Value::Map(a), Value::Map(b)) => {
                let mut keys: Vec<&String> = a.keys().chain(b.keys()).collect();
                keys.sort();
                keys.dedup();
                for key in keys {
                    let child = join(path, key);
                    match (a.get(key), b.get(key)) {
                        (Some(x), Some(y)) => self.walk(&child, x, y),
                        (Some(x), None) => self.one_sided(&child, x, true),
                        (None, Some(y)) => self.one_sided(&child, y, false),
                        (None, None) => {}
                    }
                }
            }
            (Value::List(a), Value::List(b)) => {
                for i in 0..a.len().max(b.len()) {
                    let child = format!("{}[{}]", path, i);
                    match (a.get(i), b.get(i)) {
                        (Some(x), Some(y)) => self.walk(&child, x, y),
                        (Some(x), None) => self.one_sided(&child, x, true),
                        (None, Some(y)) => self.one_sided(&child, y, false),
                        (None, None) => {}
                    }
                }
            }
            (a, b) if a != b => self.push(format!("{}: {} != {}", path, a, b)),
            _ => {}
        }
    }

    /// A value present on one side only, expanded to its leaves.
    fn one_sided(&mut self, path: &str, value: &Value, on_db_side: bool) {
        match value {
            Value::Map(m) if !m.is_empty() => {
                for (key, v) in m {
                    self.one_sided(&join(path, key), v, on_db_side);
                }
            }
            leaf if on_db_side => self.push(format!("{}: {} != {}", path, leaf, MISSING)),
            leaf => self.push(format!("{}: {} != {}", path, MISSING, leaf)),
        }
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}
