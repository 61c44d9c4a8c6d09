//! Bit-sliced numeric indexes.
//!
//! Each of the 64 bit levels keeps a bitmap of the rows whose mapped
//! value has that bit set. Range predicates then cost a constant number
//! of bitmap operations in the bit width instead of one lookup per
//! distinct value.
//!
//! Values map to u64 so that unsigned comparison agrees with the value
//! order: signed integers flip the sign bit, reals use the usual
//! monotone bit trick, enumerations use the ordinal.

use crate::bitmap::Bitmap;
use crate::data::Data;
use crate::error::{Error, Result};
use crate::expr::RelOp;

/// The value domain a numeric index covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NumericKind {
    Integer,
    Count,
    Real,
    Time,
    Duration,
    /// Symbol names in ordinal order, for text lookups.
    Enumeration(Vec<String>),
}

impl NumericKind {
    fn tag(&self) -> u8 {
        match self {
            NumericKind::Integer => 0,
            NumericKind::Count => 1,
            NumericKind::Real => 2,
            NumericKind::Time => 3,
            NumericKind::Duration => 4,
            NumericKind::Enumeration(_) => 5,
        }
    }
}

/// Order-preserving u64 image of an i64.
fn map_i64(v: i64) -> u64 {
    (v as u64) ^ (1 << 63)
}

/// Order-preserving u64 image of an f64 (total order).
fn map_f64(v: f64) -> u64 {
    let bits = v.to_bits();
    if bits >> 63 == 1 {
        !bits
    } else {
        bits | (1 << 63)
    }
}

/// Outcome of coercing a query value into the index domain.
enum Coerced {
    Value(u64),
    /// Below every representable value of the domain.
    BelowAll,
    /// Above every representable value of the domain.
    AboveAll,
}

/// Exact index over one numeric column.
#[derive(Debug, Clone, PartialEq)]
pub struct BitSliceIndex {
    kind: NumericKind,
    /// `bits[b]`: rows whose mapped value has bit `b` set (LSB first).
    bits: Vec<Bitmap>,
    /// Rows with a non-null value.
    mask: Bitmap,
    rows: u64,
}

impl BitSliceIndex {
    pub fn new(kind: NumericKind) -> Self {
        Self {
            kind,
            bits: vec![Bitmap::new(); 64],
            mask: Bitmap::new(),
            rows: 0,
        }
    }

    pub fn kind(&self) -> &NumericKind {
        &self.kind
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn mask(&self) -> &Bitmap {
        &self.mask
    }

    /// Map a cell of this column into the index domain.
    fn map_cell(&self, value: &Data) -> Result<u64> {
        match (&self.kind, value) {
            (NumericKind::Integer, Data::Integer(v)) => Ok(map_i64(*v)),
            (NumericKind::Count, Data::Count(v)) => Ok(*v),
            (NumericKind::Real, Data::Real(v)) => Ok(map_f64(*v)),
            (NumericKind::Time, Data::Time(t)) => Ok(map_i64(t.0)),
            (NumericKind::Duration, Data::Duration(d)) => Ok(map_i64(d.0)),
            (NumericKind::Enumeration(_), Data::Enumeration(e)) => Ok(*e as u64),
            (kind, value) => Err(Error::TypeClash(format!(
                "value {} does not fit {:?} index",
                value, kind
            ))),
        }
    }

    /// Coerce a query value, allowing cross-domain numeric comparisons.
    fn coerce(&self, rhs: &Data) -> Result<Coerced> {
        match (&self.kind, rhs) {
            (NumericKind::Count, Data::Integer(v)) => {
                if *v < 0 {
                    Ok(Coerced::BelowAll)
                } else {
                    Ok(Coerced::Value(*v as u64))
                }
            }
            (NumericKind::Integer, Data::Count(v)) => {
                if *v > i64::MAX as u64 {
                    Ok(Coerced::AboveAll)
                } else {
                    Ok(Coerced::Value(map_i64(*v as i64)))
                }
            }
            (NumericKind::Real, Data::Count(v)) => Ok(Coerced::Value(map_f64(*v as f64))),
            (NumericKind::Real, Data::Integer(v)) => Ok(Coerced::Value(map_f64(*v as f64))),
            (NumericKind::Enumeration(symbols), Data::String(s)) => {
                match symbols.iter().position(|f| f == s) {
                    Some(ord) => Ok(Coerced::Value(ord as u64)),
                    None => Ok(Coerced::BelowAll),
                }
            }
            (NumericKind::Enumeration(_), Data::Count(v)) => Ok(Coerced::Value(*v)),
            _ => self.map_cell(rhs).map(Coerced::Value),
        }
    }

    /// Record a value for row `id`. Also usable for multiple container
    /// elements at the same id.
    pub fn insert(&mut self, id: u64, value: &Data) -> Result<()> {
        let mapped = self.map_cell(value)?;
        for b in 0..64 {
            if mapped & (1u64 << b) != 0 {
                self.bits[b].set(id);
            }
        }
        self.mask.set(id);
        Ok(())
    }

    /// Append one row. Nil skips the id.
    pub fn append(&mut self, value: &Data) -> Result<()> {
        let id = self.rows;
        self.rows += 1;
        if value.is_nil() {
            self.mask.append_bit(false);
            return Ok(());
        }
        self.insert(id, value)
    }

    /// Bump the row counter without a value (container bookkeeping).
    pub fn skip(&mut self) {
        self.rows += 1;
    }

    fn eq_bitmap(&self, key: u64) -> Bitmap {
        let mut acc = self.mask.clone();
        for b in 0..64 {
            let level = if key & (1u64 << b) != 0 {
                self.bits[b].clone()
            } else {
                self.bits[b].complement_to(self.rows)
            };
            acc = acc.intersect(&level);
            if acc.count_ones() == 0 {
                break;
            }
        }
        acc
    }

    /// Rows with value strictly below `key`, by bit-sliced comparison.
    fn lt_bitmap(&self, key: u64) -> Bitmap {
        let mut lt = Bitmap::new();
        let mut eq = self.mask.clone();
        for b in (0..64).rev() {
            if key & (1u64 << b) != 0 {
                let zero_here = self.bits[b].complement_to(self.rows);
                lt = lt.union(&eq.intersect(&zero_here));
                eq = eq.intersect(&self.bits[b]);
            } else {
                eq = eq.intersect(&self.bits[b].complement_to(self.rows));
            }
            if eq.count_ones() == 0 {
                break;
            }
        }
        lt
    }

    pub fn lookup(&self, op: RelOp, rhs: &Data) -> Result<Bitmap> {
        if let Data::List(xs) = rhs {
            return match op {
                RelOp::In | RelOp::NotIn => {
                    let mut acc = Bitmap::new();
                    for x in xs {
                        acc = acc.union(&self.lookup(RelOp::Equal, x)?);
                    }
                    if op == RelOp::NotIn {
                        acc = self.mask.difference(&acc);
                    }
                    Ok(acc)
                }
                _ => Err(Error::InvalidArgument(format!(
                    "operator {} does not take a list on a numeric column",
                    op
                ))),
            };
        }
        if matches!(op, RelOp::In | RelOp::NotIn) {
            return Err(Error::InvalidArgument(
                "membership on a numeric column requires a list".into(),
            ));
        }
        let coerced = self.coerce(rhs)?;
        let key = match coerced {
            Coerced::Value(k) => k,
            Coerced::BelowAll => {
                return Ok(match op {
                    RelOp::Equal | RelOp::In | RelOp::Less | RelOp::LessEqual => Bitmap::new(),
                    RelOp::NotEqual
                    | RelOp::NotIn
                    | RelOp::Greater
                    | RelOp::GreaterEqual => self.mask.clone(),
                })
            }
            Coerced::AboveAll => {
                return Ok(match op {
                    RelOp::Equal | RelOp::In | RelOp::Greater | RelOp::GreaterEqual => {
                        Bitmap::new()
                    }
                    RelOp::NotEqual | RelOp::NotIn | RelOp::Less | RelOp::LessEqual => {
                        self.mask.clone()
                    }
                })
            }
        };
        Ok(match op {
            RelOp::Equal | RelOp::In => self.eq_bitmap(key),
            RelOp::NotEqual | RelOp::NotIn => self.mask.difference(&self.eq_bitmap(key)),
            RelOp::Less => self.lt_bitmap(key),
            RelOp::LessEqual => self.lt_bitmap(key).union(&self.eq_bitmap(key)),
            RelOp::Greater => {
                let le = self.lt_bitmap(key).union(&self.eq_bitmap(key));
                self.mask.difference(&le)
            }
            RelOp::GreaterEqual => self.mask.difference(&self.lt_bitmap(key)),
        })
    }

    // ── Serialization ──────────────────────────────────────────────

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.kind.tag());
        if let NumericKind::Enumeration(symbols) = &self.kind {
            buf.extend_from_slice(&(symbols.len() as u32).to_le_bytes());
            for s in symbols {
                buf.extend_from_slice(&(s.len() as u16).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
        }
        buf.extend_from_slice(&self.rows.to_le_bytes());
        self.mask.encode(buf);
        for bm in &self.bits {
            bm.encode(buf);
        }
    }

    pub fn decode(bytes: &[u8], pos: &mut usize) -> Result<Self> {
        let tag = *bytes
            .get(*pos)
            .ok_or_else(|| Error::Format("numeric index truncated".into()))?;
        *pos += 1;
        let kind = match tag {
            0 => NumericKind::Integer,
            1 => NumericKind::Count,
            2 => NumericKind::Real,
            3 => NumericKind::Time,
            4 => NumericKind::Duration,
            5 => {
                if *pos + 4 > bytes.len() {
                    return Err(Error::Format("enumeration symbols truncated".into()));
                }
                let n = u32::from_le_bytes(bytes[*pos..*pos + 4].try_into().unwrap()) as usize;
                *pos += 4;
                let mut symbols = Vec::with_capacity(n.min(4096));
                for _ in 0..n {
                    if *pos + 2 > bytes.len() {
                        return Err(Error::Format("enumeration symbols truncated".into()));
                    }
                    let len =
                        u16::from_le_bytes(bytes[*pos..*pos + 2].try_into().unwrap()) as usize;
                    *pos += 2;
                    let end = *pos + len;
                    if end > bytes.len() {
                        return Err(Error::Format("enumeration symbols truncated".into()));
                    }
                    let s = std::str::from_utf8(&bytes[*pos..end])
                        .map_err(|_| Error::Format("enumeration symbol not UTF-8".into()))?;
                    symbols.push(s.to_string());
                    *pos = end;
                }
                NumericKind::Enumeration(symbols)
            }
            other => {
                return Err(Error::Format(format!("unknown numeric index kind: {}", other)))
            }
        };
        if *pos + 8 > bytes.len() {
            return Err(Error::Format("numeric index truncated".into()));
        }
        let rows = u64::from_le_bytes(bytes[*pos..*pos + 8].try_into().unwrap());
        *pos += 8;
        let mask = Bitmap::decode(bytes, pos)?;
        let mut bits = Vec::with_capacity(64);
        for _ in 0..64 {
            bits.push(Bitmap::decode(bytes, pos)?);
        }
        Ok(Self { kind, bits, mask, rows })
    }
}
