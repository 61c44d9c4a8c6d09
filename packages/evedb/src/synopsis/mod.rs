//! Lossy per-column prefilters.
//!
//! A synopsis answers `lookup(op, rhs)` with three values: `Some(false)`
//! guarantees no row in the column satisfies the predicate, `Some(true)`
//! guarantees every row does, and `None` defers to the exact value
//! index. Adding values only ever expands the accepted set.
//!
//! Framed binary format:
//! ```text
//! [tag: u8]      // 0 = bool, 1 = minmax, 2 = bloom
//! [body]         // variant-specific
//! ```

mod bloom;

pub use bloom::BloomFilter;

use crate::config::StoreConfig;
use crate::data::{Data, TypeKind};
use crate::error::{Error, Result};
use crate::expr::RelOp;

const TAG_BOOL: u8 = 0;
const TAG_MINMAX: u8 = 1;
const TAG_BLOOM: u8 = 2;

// ── Bool synopsis ──────────────────────────────────────────────────

/// Two flags: whether any row is true, whether any row is false.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoolSynopsis {
    any_true: bool,
    any_false: bool,
    /// Nil rows never match, so they forbid an "all rows match" claim.
    saw_nil: bool,
}

impl BoolSynopsis {
    pub fn add(&mut self, value: bool) {
        if value {
            self.any_true = true;
        } else {
            self.any_false = true;
        }
    }

    pub fn lookup(&self, op: RelOp, rhs: &Data) -> Option<bool> {
        let Data::Bool(rhs) = rhs else {
            return None;
        };
        let (matches_some, matches_all) = if *rhs {
            (self.any_true, self.any_true && !self.any_false && !self.saw_nil)
        } else {
            (self.any_false, self.any_false && !self.any_true && !self.saw_nil)
        };
        match op {
            RelOp::Equal => {
                if !matches_some {
                    Some(false)
                } else if matches_all {
                    Some(true)
                } else {
                    None
                }
            }
            RelOp::NotEqual => {
                if matches_all {
                    Some(false)
                } else if !matches_some && !self.saw_nil {
                    Some(true)
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

// ── Min/max synopsis ───────────────────────────────────────────────

/// Value range for ordered scalar columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MinMaxSynopsis {
    bounds: Option<(Data, Data)>,
    saw_nil: bool,
}

impl MinMaxSynopsis {
    pub fn add(&mut self, value: &Data) {
        match &mut self.bounds {
            None => self.bounds = Some((value.clone(), value.clone())),
            Some((min, max)) => {
                if value < min {
                    *min = value.clone();
                }
                if value > max {
                    *max = value.clone();
                }
            }
        }
    }

    pub fn lookup(&self, op: RelOp, rhs: &Data) -> Option<bool> {
        let Some((min, max)) = &self.bounds else {
            // Nothing added: no row can match anything.
            return Some(false);
        };
        if rhs.tag() != min.tag() {
            return None;
        }
        let verdict = match op {
            RelOp::Equal => {
                if rhs < min || rhs > max {
                    Some(false)
                } else if min == max && min == rhs {
                    Some(true)
                } else {
                    None
                }
            }
            RelOp::NotEqual => {
                if rhs < min || rhs > max {
                    Some(true)
                } else if min == max && min == rhs {
                    Some(false)
                } else {
                    None
                }
            }
            RelOp::Less => {
                if max < rhs {
                    Some(true)
                } else if min >= rhs {
                    Some(false)
                } else {
                    None
                }
            }
            RelOp::LessEqual => {
                if max <= rhs {
                    Some(true)
                } else if min > rhs {
                    Some(false)
                } else {
                    None
                }
            }
            RelOp::Greater => {
                if min > rhs {
                    Some(true)
                } else if max <= rhs {
                    Some(false)
                } else {
                    None
                }
            }
            RelOp::GreaterEqual => {
                if min >= rhs {
                    Some(true)
                } else if max < rhs {
                    Some(false)
                } else {
                    None
                }
            }
            RelOp::In | RelOp::NotIn => None,
        };
        // "All rows match" is off the table once a nil row exists.
        match verdict {
            Some(true) if self.saw_nil => None,
            v => v,
        }
    }
}

// ── Bloom synopsis ─────────────────────────────────────────────────

/// Membership prefilter for strings, patterns, addresses, and subnets.
/// Only equality and membership predicates are pushable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomSynopsis {
    filter: BloomFilter,
}

impl BloomSynopsis {
    pub fn new(capacity: usize, fpr: f64) -> Self {
        Self { filter: BloomFilter::new(capacity, fpr) }
    }

    pub fn add(&mut self, value: &Data) {
        self.filter
            .insert(BloomFilter::key_of(&value.canonical_bytes()));
    }

    fn definitely_absent(&self, value: &Data) -> bool {
        !self
            .filter
            .maybe_contains(BloomFilter::key_of(&value.canonical_bytes()))
    }

    pub fn lookup(&self, op: RelOp, rhs: &Data) -> Option<bool> {
        match (op, rhs) {
            (RelOp::Equal, rhs) if !matches!(rhs, Data::List(_)) => {
                if self.definitely_absent(rhs) {
                    Some(false)
                } else {
                    None
                }
            }
            // Membership in an explicit value list: absent when every
            // candidate is absent.
            (RelOp::In, Data::List(xs)) => {
                if xs.iter().all(|x| self.definitely_absent(x)) {
                    Some(false)
                } else {
                    None
                }
            }
            // Subnet membership cannot be decided from hashes.
            _ => None,
        }
    }
}

// ── Dispatch ───────────────────────────────────────────────────────

/// A per-column synopsis, chosen by the column's scalar type.
#[derive(Debug, Clone, PartialEq)]
pub enum Synopsis {
    Bool(BoolSynopsis),
    MinMax(MinMaxSynopsis),
    Bloom(BloomSynopsis),
}

impl Synopsis {
    /// Choose a synopsis for a column type, if one applies. Container
    /// columns use the synopsis of their element type.
    pub fn for_type(kind: &TypeKind, config: &StoreConfig) -> Option<Synopsis> {
        match kind {
            TypeKind::Bool => Some(Synopsis::Bool(BoolSynopsis::default())),
            k if k.is_ordered_scalar() => Some(Synopsis::MinMax(MinMaxSynopsis::default())),
            TypeKind::String | TypeKind::Pattern | TypeKind::Address | TypeKind::Subnet => {
                Some(Synopsis::Bloom(BloomSynopsis::new(
                    config.bloom_capacity,
                    config.bloom_fpr,
                )))
            }
            TypeKind::List(elem) => Synopsis::for_type(&elem.kind, config),
            _ => None,
        }
    }

    /// Add one cell. Nil cells only mark the column as nullable; list
    /// cells add every element.
    pub fn add(&mut self, value: &Data) {
        match value {
            Data::Nil => match self {
                Synopsis::Bool(s) => s.saw_nil = true,
                Synopsis::MinMax(s) => s.saw_nil = true,
                Synopsis::Bloom(_) => {}
            },
            Data::List(xs) => {
                for x in xs {
                    self.add(x);
                }
            }
            _ => match self {
                Synopsis::Bool(s) => {
                    if let Data::Bool(b) = value {
                        s.add(*b);
                    }
                }
                Synopsis::MinMax(s) => s.add(value),
                Synopsis::Bloom(s) => s.add(value),
            },
        }
    }

    pub fn lookup(&self, op: RelOp, rhs: &Data) -> Option<bool> {
        if rhs.is_nil() {
            // Nil handling is the value index's business.
            return None;
        }
        match self {
            Synopsis::Bool(s) => s.lookup(op, rhs),
            Synopsis::MinMax(s) => s.lookup(op, rhs),
            Synopsis::Bloom(s) => s.lookup(op, rhs),
        }
    }

    pub fn mem_usage(&self) -> usize {
        match self {
            Synopsis::Bool(_) => std::mem::size_of::<BoolSynopsis>(),
            Synopsis::MinMax(_) => std::mem::size_of::<MinMaxSynopsis>(),
            Synopsis::Bloom(s) => s.filter.mem_usage(),
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Synopsis::Bool(s) => {
                buf.push(TAG_BOOL);
                buf.push(s.any_true as u8);
                buf.push(s.any_false as u8);
                buf.push(s.saw_nil as u8);
            }
            Synopsis::MinMax(s) => {
                buf.push(TAG_MINMAX);
                buf.push(s.saw_nil as u8);
                match &s.bounds {
                    None => buf.push(0),
                    Some((min, max)) => {
                        buf.push(1);
                        min.encode(buf);
                        max.encode(buf);
                    }
                }
            }
            Synopsis::Bloom(s) => {
                buf.push(TAG_BLOOM);
                s.filter.encode(buf);
            }
        }
    }

    pub fn decode(bytes: &[u8], pos: &mut usize) -> Result<Synopsis> {
        let tag = *bytes
            .get(*pos)
            .ok_or_else(|| Error::Format("synopsis truncated".into()))?;
        *pos += 1;
        match tag {
            TAG_BOOL => {
                if *pos + 3 > bytes.len() {
                    return Err(Error::Format("bool synopsis truncated".into()));
                }
                let s = BoolSynopsis {
                    any_true: bytes[*pos] != 0,
                    any_false: bytes[*pos + 1] != 0,
                    saw_nil: bytes[*pos + 2] != 0,
                };
                *pos += 3;
                Ok(Synopsis::Bool(s))
            }
            TAG_MINMAX => {
                if *pos + 2 > bytes.len() {
                    return Err(Error::Format("minmax synopsis truncated".into()));
                }
                let saw_nil = bytes[*pos] != 0;
                let some = bytes[*pos + 1];
                *pos += 2;
                let bounds = if some != 0 {
                    let min = Data::decode(bytes, pos)?;
                    let max = Data::decode(bytes, pos)?;
                    Some((min, max))
                } else {
                    None
                };
                Ok(Synopsis::MinMax(MinMaxSynopsis { bounds, saw_nil }))
            }
            TAG_BLOOM => Ok(Synopsis::Bloom(BloomSynopsis {
                filter: BloomFilter::decode(bytes, pos)?,
            })),
            other => Err(Error::Format(format!("unknown synopsis tag: {}", other))),
        }
    }
}
