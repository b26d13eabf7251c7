//! Filtering and sorting of collection snapshots.
//!
//! Both steps are pure: they read a snapshot and build a new vector, never
//! touching the entries held by the store.

use std::cmp::Ordering;

use serde_json::Value;

use crate::entry::Entry;
use crate::error::SortError;

/// Direction of a keyed sort
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// Parses an `order` parameter. Anything other than `desc` means ascending.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some(s) if s.trim().eq_ignore_ascii_case("desc") => SortOrder::Desc,
            _ => SortOrder::Asc,
        }
    }
}

/// A list request: optional presence filter, then optional keyed sort
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub filter: Option<String>,
    pub sort: Option<String>,
    pub order: SortOrder,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only entries that have `key` as a field
    pub fn with_filter(mut self, key: impl Into<String>) -> Self {
        self.filter = Some(key.into());
        self
    }

    /// Sort by the value at `key`
    pub fn with_sort(mut self, key: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some(key.into());
        self.order = order;
        self
    }

    /// Runs filter then sort over a snapshot
    ///
    /// A failed sort is not an error: the filtered entries come back in their
    /// original order and the reason is reported in [`QueryOutcome::sort_skipped`].
    pub fn apply(&self, snapshot: &[Entry]) -> QueryOutcome {
        let mut entries = filter_entries(snapshot, non_empty(self.filter.as_deref()));

        let sort_skipped = match non_empty(self.sort.as_deref()) {
            Some(key) => sort_entries(&mut entries, key, self.order).err(),
            None => None,
        };

        QueryOutcome {
            entries,
            sort_skipped,
        }
    }
}

/// Result of running a [`ListQuery`]
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub entries: Vec<Entry>,
    /// Set when sorting was requested but the values could not be ordered
    pub sort_skipped: Option<SortError>,
}

fn non_empty(key: Option<&str>) -> Option<&str> {
    key.filter(|k| !k.is_empty())
}

/// Returns the entries containing `key`, in their original order.
/// `None` keeps every entry.
pub fn filter_entries(entries: &[Entry], key: Option<&str>) -> Vec<Entry> {
    match key {
        Some(key) => entries
            .iter()
            .filter(|entry| entry.contains_key(key))
            .cloned()
            .collect(),
        None => entries.to_vec(),
    }
}

/// Stable sort by the value at `key`. Missing values sort as `""`.
///
/// Fails when two values are not mutually comparable, for example a number
/// and a string, or two arrays whose first differing elements are of
/// different kinds. On error the entries are left exactly as they were.
pub fn sort_entries(entries: &mut Vec<Entry>, key: &str, order: SortOrder) -> Result<(), SortError> {
    // Nothing is compared, so nothing can be incomparable.
    if entries.len() < 2 {
        return Ok(());
    }

    let mut keyed: Vec<(SortKey, usize)> = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| match entry.get(key) {
            Some(value) => (SortKey::from_value(&value), i),
            None => (SortKey::Str(String::new()), i),
        })
        .collect();

    // Total order over every key; incomparable pairs are recorded, not refused.
    // Neighbours in the final order are always compared, so none is missed.
    let mut mismatch: Option<(&'static str, &'static str)> = None;
    keyed.sort_by(|a, b| {
        let (x, y) = match order {
            SortOrder::Asc => (&a.0, &b.0),
            SortOrder::Desc => (&b.0, &a.0),
        };
        let decided = x.compare(y, true);
        if mismatch.is_none() {
            mismatch = decided.mismatch;
        }
        decided.ordering
    });

    if let Some((left, right)) = mismatch {
        return Err(SortError::Incomparable {
            key: key.to_string(),
            found: format!("{} compared with {}", left, right),
        });
    }

    let mut slots: Vec<Option<Entry>> = entries.drain(..).map(Some).collect();
    entries.extend(keyed.iter().filter_map(|(_, i)| slots[*i].take()));
    Ok(())
}

/// Orderable projection of a JSON value
#[derive(Debug, Clone)]
enum SortKey {
    /// Integers and booleans, kept exact
    Int(i128),
    Float(f64),
    Str(String),
    List(Vec<SortKey>),
    /// Null or object, carried with its serialized form
    Opaque { kind: &'static str, repr: String },
}

/// Outcome of comparing two keys
struct Decided {
    ordering: Ordering,
    /// Kinds of the pair that decided the comparison, if they were not comparable
    mismatch: Option<(&'static str, &'static str)>,
}

impl Decided {
    fn ok(ordering: Ordering) -> Self {
        Self { ordering, mismatch: None }
    }
}

impl SortKey {
    /// Booleans count as numbers.
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Bool(b) => SortKey::Int(i128::from(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SortKey::Int(i128::from(i))
                } else if let Some(u) = n.as_u64() {
                    SortKey::Int(i128::from(u))
                } else {
                    match n.as_f64() {
                        Some(f) => SortKey::Float(f),
                        None => SortKey::Opaque {
                            kind: "number",
                            repr: n.to_string(),
                        },
                    }
                }
            }
            Value::String(s) => SortKey::Str(s.clone()),
            Value::Array(items) => SortKey::List(items.iter().map(SortKey::from_value).collect()),
            Value::Null => SortKey::Opaque {
                kind: "null",
                repr: String::new(),
            },
            Value::Object(_) => SortKey::Opaque {
                kind: "object",
                repr: value.to_string(),
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            SortKey::Int(_) | SortKey::Float(_) => "number",
            SortKey::Str(_) => "string",
            SortKey::List(_) => "array",
            SortKey::Opaque { kind, .. } => *kind,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SortKey::Int(_) | SortKey::Float(_) => 0,
            SortKey::Str(_) => 1,
            SortKey::List(_) => 2,
            SortKey::Opaque { .. } => 3,
        }
    }

    /// Total order over all keys, noting when the deciding pair was not comparable
    ///
    /// Arrays skip over equal leading elements, so an equal null or object
    /// inside an array is fine; at the top level they never compare.
    fn compare(&self, other: &Self, top: bool) -> Decided {
        match (self, other) {
            (SortKey::Int(a), SortKey::Int(b)) => Decided::ok(a.cmp(b)),
            (SortKey::Float(a), SortKey::Float(b)) => {
                Decided::ok(a.partial_cmp(b).unwrap_or_else(|| a.total_cmp(b)))
            }
            (SortKey::Int(a), SortKey::Float(b)) => Decided::ok(cmp_int_float(*a, *b)),
            (SortKey::Float(a), SortKey::Int(b)) => Decided::ok(cmp_int_float(*b, *a).reverse()),
            (SortKey::Str(a), SortKey::Str(b)) => Decided::ok(a.cmp(b)),
            (SortKey::List(a), SortKey::List(b)) => {
                for (x, y) in a.iter().zip(b) {
                    let decided = x.compare(y, false);
                    if decided.mismatch.is_some() || decided.ordering != Ordering::Equal {
                        return decided;
                    }
                }
                Decided::ok(a.len().cmp(&b.len()))
            }
            (SortKey::Opaque { kind: ka, repr: a }, SortKey::Opaque { kind: kb, repr: b }) => {
                let ordering = ka.cmp(kb).then_with(|| a.cmp(b));
                Decided {
                    ordering,
                    mismatch: (top || ordering != Ordering::Equal).then_some((*ka, *kb)),
                }
            }
            _ => Decided {
                ordering: self.rank().cmp(&other.rank()),
                mismatch: Some((self.kind(), other.kind())),
            },
        }
    }
}

/// Exact comparison of an integer with a float
fn cmp_int_float(i: i128, f: f64) -> Ordering {
    let limit = 2f64.powi(127);

    if f.is_nan() || f >= limit {
        return Ordering::Less;
    }
    if f < -limit {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    // whole is integral and within i128, so the cast is exact
    match i.cmp(&(whole as i128)) {
        Ordering::Equal => 0.0_f64.partial_cmp(&(f - whole)).unwrap_or(Ordering::Equal),
        other => other,
    }
}
