//! Exact per-column value indexes.
//!
//! A value index maps a column to bitmaps of matching row ids. Appending
//! `Nil` skips the id: a skipped row never matches any predicate except
//! `== nil`. Container columns index their elements at the row's id, so
//! a row matches when any element does.
//!
//! Framed binary format:
//! ```text
//! [tag: u8]    // 0 bool, 1 numeric, 2 string, 3 address, 4 subnet, 5 list
//! [rows: u64 LE] [mask: bitmap]      // except numeric, which embeds both
//! [body]
//! ```

mod bitslice;

pub use bitslice::{BitSliceIndex, NumericKind};

use std::collections::BTreeMap;
use std::net::Ipv6Addr;

use crate::bitmap::Bitmap;
use crate::data::{Address, Data, Subnet, TypeKind};
use crate::error::{Error, Result};
use crate::expr::RelOp;

const TAG_BOOL: u8 = 0;
const TAG_NUMERIC: u8 = 1;
const TAG_STRING: u8 = 2;
const TAG_ADDRESS: u8 = 3;
const TAG_SUBNET: u8 = 4;
const TAG_LIST: u8 = 5;

// ── Bool index ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolIndex {
    truth: Bitmap,
    mask: Bitmap,
    rows: u64,
}

impl BoolIndex {
    fn insert(&mut self, id: u64, value: &Data) -> Result<()> {
        let Data::Bool(b) = value else {
            return Err(Error::TypeClash(format!("value {} is not a bool", value)));
        };
        if *b {
            self.truth.set(id);
        }
        self.mask.set(id);
        Ok(())
    }

    fn lookup(&self, op: RelOp, rhs: &Data) -> Result<Bitmap> {
        let Data::Bool(b) = rhs else {
            return Err(Error::TypeClash(format!("value {} is not a bool", rhs)));
        };
        let truthy = self.truth.intersect(&self.mask);
        let falsy = self.mask.difference(&self.truth);
        Ok(match (op, b) {
            (RelOp::Equal, true) | (RelOp::NotEqual, false) => truthy,
            (RelOp::Equal, false) | (RelOp::NotEqual, true) => falsy,
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "operator {} is not valid on a bool column",
                    op
                )))
            }
        })
    }
}

// ── String index ───────────────────────────────────────────────────

/// One bitmap per distinct string. Pattern columns index the pattern
/// source text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringIndex {
    map: BTreeMap<String, Bitmap>,
    mask: Bitmap,
    rows: u64,
}

impl StringIndex {
    fn insert(&mut self, id: u64, value: &Data) -> Result<()> {
        let key = match value {
            Data::String(s) => s.clone(),
            Data::Pattern(p) => p.source().to_string(),
            other => {
                return Err(Error::TypeClash(format!("value {} is not a string", other)))
            }
        };
        self.map.entry(key).or_default().set(id);
        self.mask.set(id);
        Ok(())
    }

    fn equal(&self, rhs: &Data) -> Result<Bitmap> {
        Ok(match rhs {
            Data::String(s) => self.map.get(s).cloned().unwrap_or_default(),
            // Pattern queries scan the distinct values, not the rows.
            Data::Pattern(p) => self
                .map
                .iter()
                .filter(|(k, _)| p.is_match(k))
                .fold(Bitmap::new(), |acc, (_, bm)| acc.union(bm)),
            other => {
                return Err(Error::TypeClash(format!(
                    "value {} is not a string or pattern",
                    other
                )))
            }
        })
    }

    fn lookup(&self, op: RelOp, rhs: &Data) -> Result<Bitmap> {
        Ok(match (op, rhs) {
            (RelOp::Equal, _) => self.equal(rhs)?,
            (RelOp::NotEqual, _) => self.mask.difference(&self.equal(rhs)?),
            (RelOp::In, Data::List(xs)) | (RelOp::NotIn, Data::List(xs)) => {
                let mut acc = Bitmap::new();
                for x in xs {
                    acc = acc.union(&self.equal(x)?);
                }
                if op == RelOp::NotIn {
                    acc = self.mask.difference(&acc);
                }
                acc
            }
            // Substring containment: column values occurring in rhs.
            (RelOp::In, Data::String(s)) | (RelOp::NotIn, Data::String(s)) => {
                let mut acc = Bitmap::new();
                for (k, bm) in &self.map {
                    if s.contains(k.as_str()) {
                        acc = acc.union(bm);
                    }
                }
                if op == RelOp::NotIn {
                    acc = self.mask.difference(&acc);
                }
                acc
            }
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "operator {} is not valid on a string column",
                    op
                )))
            }
        })
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.map.len() as u32).to_le_bytes());
        for (k, bm) in &self.map {
            buf.extend_from_slice(&(k.len() as u16).to_le_bytes());
            buf.extend_from_slice(k.as_bytes());
            bm.encode(buf);
        }
    }

    fn decode(bytes: &[u8], pos: &mut usize, rows: u64, mask: Bitmap) -> Result<Self> {
        if *pos + 4 > bytes.len() {
            return Err(Error::Format("string index truncated".into()));
        }
        let n = u32::from_le_bytes(bytes[*pos..*pos + 4].try_into().unwrap()) as usize;
        *pos += 4;
        let mut map = BTreeMap::new();
        for _ in 0..n {
            if *pos + 2 > bytes.len() {
                return Err(Error::Format("string index truncated".into()));
            }
            let len = u16::from_le_bytes(bytes[*pos..*pos + 2].try_into().unwrap()) as usize;
            *pos += 2;
            let end = *pos + len;
            if end > bytes.len() {
                return Err(Error::Format("string index truncated".into()));
            }
            let key = std::str::from_utf8(&bytes[*pos..end])
                .map_err(|_| Error::Format("string index key not UTF-8".into()))?
                .to_string();
            *pos = end;
            let bm = Bitmap::decode(bytes, pos)?;
            map.insert(key, bm);
        }
        Ok(Self { map, mask, rows })
    }
}

// ── Address index ──────────────────────────────────────────────────

/// One bitmap per address bit, MSB first. Prefix predicates intersect
/// the first `length` levels, so `in subnet` needs no key enumeration.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressIndex {
    bits: Vec<Bitmap>,
    mask: Bitmap,
    rows: u64,
}

impl Default for AddressIndex {
    fn default() -> Self {
        Self { bits: vec![Bitmap::new(); 128], mask: Bitmap::new(), rows: 0 }
    }
}

impl AddressIndex {
    fn insert(&mut self, id: u64, value: &Data) -> Result<()> {
        let Data::Address(addr) = value else {
            return Err(Error::TypeClash(format!("value {} is not an address", value)));
        };
        for i in 0..128 {
            if addr.bit(i) {
                self.bits[i].set(id);
            }
        }
        self.mask.set(id);
        Ok(())
    }

    /// Rows whose first `length` bits equal those of `addr`.
    fn prefix(&self, addr: &Address, length: u8) -> Bitmap {
        let mut acc = self.mask.clone();
        for i in 0..length as usize {
            let level = if addr.bit(i) {
                self.bits[i].clone()
            } else {
                self.bits[i].complement_to(self.rows)
            };
            acc = acc.intersect(&level);
            if acc.count_ones() == 0 {
                break;
            }
        }
        acc
    }

    fn lookup(&self, op: RelOp, rhs: &Data) -> Result<Bitmap> {
        Ok(match (op, rhs) {
            (RelOp::Equal, Data::Address(a)) => self.prefix(a, 128),
            (RelOp::NotEqual, Data::Address(a)) => self.mask.difference(&self.prefix(a, 128)),
            (RelOp::In, Data::Subnet(s)) => self.prefix(&s.network(), s.length()),
            (RelOp::NotIn, Data::Subnet(s)) => {
                self.mask.difference(&self.prefix(&s.network(), s.length()))
            }
            (RelOp::In, Data::List(xs)) | (RelOp::NotIn, Data::List(xs)) => {
                let mut acc = Bitmap::new();
                for x in xs {
                    acc = acc.union(&self.lookup(RelOp::Equal, x)?);
                }
                if op == RelOp::NotIn {
                    acc = self.mask.difference(&acc);
                }
                acc
            }
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "operator {} with {} is not valid on an address column",
                    op, rhs
                )))
            }
        })
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        for bm in &self.bits {
            bm.encode(buf);
        }
    }

    fn decode(bytes: &[u8], pos: &mut usize, rows: u64, mask: Bitmap) -> Result<Self> {
        let mut bits = Vec::with_capacity(128);
        for _ in 0..128 {
            bits.push(Bitmap::decode(bytes, pos)?);
        }
        Ok(Self { bits, mask, rows })
    }
}

// ── Subnet index ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubnetIndex {
    map: BTreeMap<(Address, u8), Bitmap>,
    mask: Bitmap,
    rows: u64,
}

impl SubnetIndex {
    fn insert(&mut self, id: u64, value: &Data) -> Result<()> {
        let Data::Subnet(s) = value else {
            return Err(Error::TypeClash(format!("value {} is not a subnet", value)));
        };
        self.map
            .entry((s.network(), s.length()))
            .or_default()
            .set(id);
        self.mask.set(id);
        Ok(())
    }

    fn lookup(&self, op: RelOp, rhs: &Data) -> Result<Bitmap> {
        Ok(match (op, rhs) {
            (RelOp::Equal, Data::Subnet(s)) => self
                .map
                .get(&(s.network(), s.length()))
                .cloned()
                .unwrap_or_default(),
            (RelOp::NotEqual, Data::Subnet(_)) => {
                self.mask.difference(&self.lookup(RelOp::Equal, rhs)?)
            }
            // Column subnets fully inside the queried subnet.
            (RelOp::In, Data::Subnet(s)) | (RelOp::NotIn, Data::Subnet(s)) => {
                let mut acc = Bitmap::new();
                for ((network, length), bm) in &self.map {
                    let key = Subnet::new(*network, *length)?;
                    if s.contains_subnet(&key) {
                        acc = acc.union(bm);
                    }
                }
                if op == RelOp::NotIn {
                    acc = self.mask.difference(&acc);
                }
                acc
            }
            (RelOp::In, Data::List(xs)) | (RelOp::NotIn, Data::List(xs)) => {
                let mut acc = Bitmap::new();
                for x in xs {
                    acc = acc.union(&self.lookup(RelOp::Equal, x)?);
                }
                if op == RelOp::NotIn {
                    acc = self.mask.difference(&acc);
                }
                acc
            }
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "operator {} with {} is not valid on a subnet column",
                    op, rhs
                )))
            }
        })
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.map.len() as u32).to_le_bytes());
        for ((network, length), bm) in &self.map {
            buf.extend_from_slice(&network.octets());
            buf.push(*length);
            bm.encode(buf);
        }
    }

    fn decode(bytes: &[u8], pos: &mut usize, rows: u64, mask: Bitmap) -> Result<Self> {
        if *pos + 4 > bytes.len() {
            return Err(Error::Format("subnet index truncated".into()));
        }
        let n = u32::from_le_bytes(bytes[*pos..*pos + 4].try_into().unwrap()) as usize;
        *pos += 4;
        let mut map = BTreeMap::new();
        for _ in 0..n {
            if *pos + 17 > bytes.len() {
                return Err(Error::Format("subnet index truncated".into()));
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&bytes[*pos..*pos + 16]);
            let length = bytes[*pos + 16];
            *pos += 17;
            let bm = Bitmap::decode(bytes, pos)?;
            map.insert((Address::from_v6(Ipv6Addr::from(octets)), length), bm);
        }
        Ok(Self { map, mask, rows })
    }
}

// ── Dispatch ───────────────────────────────────────────────────────

/// An exact index over one column, chosen by the column's type.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueIndex {
    Bool(BoolIndex),
    Numeric(BitSliceIndex),
    Str(StringIndex),
    Addr(AddressIndex),
    Subnet(SubnetIndex),
    /// Element index plus container bookkeeping; the row matches when
    /// any element does. Element positions are folded into the row id.
    List {
        elem: Box<ValueIndex>,
        mask: Bitmap,
        rows: u64,
    },
}

impl ValueIndex {
    /// Choose an index for a column type. Map columns index their
    /// values; record columns never appear (layouts are flattened).
    pub fn for_type(kind: &TypeKind) -> Option<ValueIndex> {
        Some(match kind {
            TypeKind::Bool => ValueIndex::Bool(BoolIndex::default()),
            TypeKind::Integer => ValueIndex::Numeric(BitSliceIndex::new(NumericKind::Integer)),
            TypeKind::Count => ValueIndex::Numeric(BitSliceIndex::new(NumericKind::Count)),
            TypeKind::Real => ValueIndex::Numeric(BitSliceIndex::new(NumericKind::Real)),
            TypeKind::Time => ValueIndex::Numeric(BitSliceIndex::new(NumericKind::Time)),
            TypeKind::Duration => {
                ValueIndex::Numeric(BitSliceIndex::new(NumericKind::Duration))
            }
            TypeKind::Enumeration(symbols) => ValueIndex::Numeric(BitSliceIndex::new(
                NumericKind::Enumeration(symbols.clone()),
            )),
            TypeKind::String | TypeKind::Pattern => ValueIndex::Str(StringIndex::default()),
            TypeKind::Address => ValueIndex::Addr(AddressIndex::default()),
            TypeKind::Subnet => ValueIndex::Subnet(SubnetIndex::default()),
            TypeKind::List(elem) => ValueIndex::List {
                elem: Box::new(ValueIndex::for_type(&elem.kind)?),
                mask: Bitmap::new(),
                rows: 0,
            },
            TypeKind::Map(_, value) => ValueIndex::List {
                elem: Box::new(ValueIndex::for_type(&value.kind)?),
                mask: Bitmap::new(),
                rows: 0,
            },
            TypeKind::Record(_) | TypeKind::Alias(_) => return None,
        })
    }

    /// Rows appended so far, including skipped ids.
    pub fn rows(&self) -> u64 {
        match self {
            ValueIndex::Bool(i) => i.rows,
            ValueIndex::Numeric(i) => i.rows(),
            ValueIndex::Str(i) => i.rows,
            ValueIndex::Addr(i) => i.rows,
            ValueIndex::Subnet(i) => i.rows,
            ValueIndex::List { rows, .. } => *rows,
        }
    }

    /// Rows carrying a non-null value.
    pub fn mask(&self) -> &Bitmap {
        match self {
            ValueIndex::Bool(i) => &i.mask,
            ValueIndex::Numeric(i) => i.mask(),
            ValueIndex::Str(i) => &i.mask,
            ValueIndex::Addr(i) => &i.mask,
            ValueIndex::Subnet(i) => &i.mask,
            ValueIndex::List { mask, .. } => mask,
        }
    }

    fn insert(&mut self, id: u64, value: &Data) -> Result<()> {
        match self {
            ValueIndex::Bool(i) => i.insert(id, value),
            ValueIndex::Numeric(i) => i.insert(id, value),
            ValueIndex::Str(i) => i.insert(id, value),
            ValueIndex::Addr(i) => i.insert(id, value),
            ValueIndex::Subnet(i) => i.insert(id, value),
            ValueIndex::List { elem, mask, .. } => {
                let elems: Vec<&Data> = match value {
                    Data::List(xs) => xs.iter().collect(),
                    Data::Map(xs) => xs.iter().map(|(_, v)| v).collect(),
                    other => vec![other],
                };
                for e in elems {
                    if !e.is_nil() {
                        elem.insert(id, e)?;
                    }
                }
                mask.set(id);
                Ok(())
            }
        }
    }

    /// Append one row. A nil cell skips the id.
    pub fn append(&mut self, value: &Data) -> Result<()> {
        let id = self.rows();
        self.bump_rows();
        if value.is_nil() {
            return Ok(());
        }
        self.insert(id, value)
    }

    fn bump_rows(&mut self) {
        match self {
            ValueIndex::Bool(i) => i.rows += 1,
            ValueIndex::Numeric(i) => i.skip(),
            ValueIndex::Str(i) => i.rows += 1,
            ValueIndex::Addr(i) => i.rows += 1,
            ValueIndex::Subnet(i) => i.rows += 1,
            ValueIndex::List { elem, rows, .. } => {
                *rows += 1;
                elem.bump_rows();
            }
        }
    }

    /// The set of ids whose value satisfies `lhs op rhs`. Nil on the
    /// right-hand side is only meaningful under (in)equality.
    pub fn lookup(&self, op: RelOp, rhs: &Data) -> Result<Bitmap> {
        if rhs.is_nil() {
            return match op {
                RelOp::Equal => Ok(self.mask().complement_to(self.rows())),
                RelOp::NotEqual => Ok(self.mask().clone()),
                _ => Err(Error::InvalidArgument(format!(
                    "operator {} is not valid with nil",
                    op
                ))),
            };
        }
        match self {
            ValueIndex::Bool(i) => i.lookup(op, rhs),
            ValueIndex::Numeric(i) => i.lookup(op, rhs),
            ValueIndex::Str(i) => i.lookup(op, rhs),
            ValueIndex::Addr(i) => i.lookup(op, rhs),
            ValueIndex::Subnet(i) => i.lookup(op, rhs),
            ValueIndex::List { elem, mask, .. } => {
                // Negative operators complement the positive element
                // match within the non-null rows.
                let (positive, complement) = match op {
                    RelOp::NotEqual => (RelOp::Equal, true),
                    RelOp::NotIn => (RelOp::In, true),
                    other => (other, false),
                };
                let hit = elem.lookup(positive, rhs)?.intersect(mask);
                Ok(if complement {
                    mask.difference(&hit)
                } else {
                    hit
                })
            }
        }
    }

    pub fn mem_usage(&self) -> usize {
        // Serialized size is a fair estimate for run-length structures.
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf.len()
    }

    // ── Serialization ──────────────────────────────────────────────

    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            ValueIndex::Bool(i) => {
                buf.push(TAG_BOOL);
                buf.extend_from_slice(&i.rows.to_le_bytes());
                i.mask.encode(buf);
                i.truth.encode(buf);
            }
            ValueIndex::Numeric(i) => {
                buf.push(TAG_NUMERIC);
                i.encode(buf);
            }
            ValueIndex::Str(i) => {
                buf.push(TAG_STRING);
                buf.extend_from_slice(&i.rows.to_le_bytes());
                i.mask.encode(buf);
                i.encode(buf);
            }
            ValueIndex::Addr(i) => {
                buf.push(TAG_ADDRESS);
                buf.extend_from_slice(&i.rows.to_le_bytes());
                i.mask.encode(buf);
                i.encode(buf);
            }
            ValueIndex::Subnet(i) => {
                buf.push(TAG_SUBNET);
                buf.extend_from_slice(&i.rows.to_le_bytes());
                i.mask.encode(buf);
                i.encode(buf);
            }
            ValueIndex::List { elem, mask, rows } => {
                buf.push(TAG_LIST);
                buf.extend_from_slice(&rows.to_le_bytes());
                mask.encode(buf);
                elem.encode(buf);
            }
        }
    }

    pub fn decode(bytes: &[u8], pos: &mut usize) -> Result<ValueIndex> {
        let tag = *bytes
            .get(*pos)
            .ok_or_else(|| Error::Format("value index truncated".into()))?;
        *pos += 1;
        if tag == TAG_NUMERIC {
            return Ok(ValueIndex::Numeric(BitSliceIndex::decode(bytes, pos)?));
        }
        if *pos + 8 > bytes.len() {
            return Err(Error::Format("value index truncated".into()));
        }
        let rows = u64::from_le_bytes(bytes[*pos..*pos + 8].try_into().unwrap());
        *pos += 8;
        let mask = Bitmap::decode(bytes, pos)?;
        Ok(match tag {
            TAG_BOOL => {
                let truth = Bitmap::decode(bytes, pos)?;
                ValueIndex::Bool(BoolIndex { truth, mask, rows })
            }
            TAG_STRING => ValueIndex::Str(StringIndex::decode(bytes, pos, rows, mask)?),
            TAG_ADDRESS => ValueIndex::Addr(AddressIndex::decode(bytes, pos, rows, mask)?),
            TAG_SUBNET => ValueIndex::Subnet(SubnetIndex::decode(bytes, pos, rows, mask)?),
            TAG_LIST => ValueIndex::List {
                elem: Box::new(ValueIndex::decode(bytes, pos)?),
                mask,
                rows,
            },
            other => return Err(Error::Format(format!("unknown value index tag: {}", other))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Type;

    fn ids(bm: &Bitmap) -> Vec<u64> {
        bm.ones().collect()
    }

    fn string_index(values: &[Option<&str>]) -> ValueIndex {
        let mut idx = ValueIndex::for_type(&TypeKind::String).unwrap();
        for v in values {
            let cell = v
                .map(|s| Data::String(s.to_string()))
                .unwrap_or(Data::Nil);
            idx.append(&cell).unwrap();
        }
        idx
    }

    #[test]
    fn test_string_equality_and_membership() {
        let idx = string_index(&[Some("A"), Some("B"), Some("A"), None]);
        assert_eq!(
            ids(&idx.lookup(RelOp::Equal, &Data::String("A".into())).unwrap()),
            vec![0, 2]
        );
        assert_eq!(
            ids(&idx.lookup(RelOp::NotEqual, &Data::String("A".into())).unwrap()),
            vec![1]
        );
        let list = Data::List(vec![Data::String("A".into()), Data::String("B".into())]);
        assert_eq!(ids(&idx.lookup(RelOp::In, &list).unwrap()), vec![0, 1, 2]);
    }

    #[test]
    fn test_string_pattern_lookup() {
        let idx = string_index(&[Some("alpha"), Some("beta"), Some("gamma")]);
        let pat = Data::Pattern(crate::data::Pattern::new("^.a").unwrap());
        assert_eq!(ids(&idx.lookup(RelOp::Equal, &pat).unwrap()), vec![2]);
    }

    #[test]
    fn test_string_substring_containment() {
        let idx = string_index(&[Some("GET"), Some("POST"), Some("PUT")]);
        assert_eq!(
            ids(&idx
                .lookup(RelOp::In, &Data::String("GET /index.html".into()))
                .unwrap()),
            vec![0]
        );
    }

    #[test]
    fn test_string_range_is_error() {
        let idx = string_index(&[Some("x")]);
        assert!(idx.lookup(RelOp::Less, &Data::String("y".into())).is_err());
    }

    #[test]
    fn test_nil_lookup() {
        let idx = string_index(&[Some("A"), None, Some("B")]);
        assert_eq!(ids(&idx.lookup(RelOp::Equal, &Data::Nil).unwrap()), vec![1]);
        assert_eq!(ids(&idx.lookup(RelOp::NotEqual, &Data::Nil).unwrap()), vec![0, 2]);
        assert!(idx.lookup(RelOp::Less, &Data::Nil).is_err());
    }

    #[test]
    fn test_bool_index() {
        let mut idx = ValueIndex::for_type(&TypeKind::Bool).unwrap();
        for cell in [Data::Bool(true), Data::Bool(false), Data::Nil, Data::Bool(true)] {
            idx.append(&cell).unwrap();
        }
        assert_eq!(ids(&idx.lookup(RelOp::Equal, &Data::Bool(true)).unwrap()), vec![0, 3]);
        assert_eq!(ids(&idx.lookup(RelOp::Equal, &Data::Bool(false)).unwrap()), vec![1]);
        assert_eq!(ids(&idx.lookup(RelOp::NotEqual, &Data::Bool(true)).unwrap()), vec![1]);
    }

    #[test]
    fn test_address_equality_v4_mapped() {
        let mut idx = ValueIndex::for_type(&TypeKind::Address).unwrap();
        idx.append(&Data::Address("127.0.0.1".parse().unwrap())).unwrap();
        idx.append(&Data::Address("10.0.0.1".parse().unwrap())).unwrap();
        let mapped = Data::Address("::ffff:127.0.0.1".parse().unwrap());
        assert_eq!(ids(&idx.lookup(RelOp::Equal, &mapped).unwrap()), vec![0]);
    }

    #[test]
    fn test_address_subnet_membership() {
        let mut idx = ValueIndex::for_type(&TypeKind::Address).unwrap();
        for a in ["127.0.0.1", "127.9.9.9", "128.0.0.1", "2001:db8::1"] {
            idx.append(&Data::Address(a.parse().unwrap())).unwrap();
        }
        let net = Data::Subnet("127.0.0.0/8".parse().unwrap());
        assert_eq!(ids(&idx.lookup(RelOp::In, &net).unwrap()), vec![0, 1]);
        assert_eq!(ids(&idx.lookup(RelOp::NotIn, &net).unwrap()), vec![2, 3]);
    }

    #[test]
    fn test_subnet_index() {
        let mut idx = ValueIndex::for_type(&TypeKind::Subnet).unwrap();
        idx.append(&Data::Subnet("10.0.0.0/8".parse().unwrap())).unwrap();
        idx.append(&Data::Subnet("10.1.0.0/16".parse().unwrap())).unwrap();
        idx.append(&Data::Subnet("192.168.0.0/16".parse().unwrap())).unwrap();
        let exact = Data::Subnet("10.1.0.0/16".parse().unwrap());
        assert_eq!(ids(&idx.lookup(RelOp::Equal, &exact).unwrap()), vec![1]);
        let wide = Data::Subnet("10.0.0.0/8".parse().unwrap());
        assert_eq!(ids(&idx.lookup(RelOp::In, &wide).unwrap()), vec![0, 1]);
    }

    #[test]
    fn test_subnet_index_membership_list() {
        let mut idx = ValueIndex::for_type(&TypeKind::Subnet).unwrap();
        idx.append(&Data::Subnet("10.0.0.0/8".parse().unwrap())).unwrap();
        idx.append(&Data::Subnet("192.168.0.0/16".parse().unwrap())).unwrap();
        idx.append(&Data::Nil).unwrap();
        idx.append(&Data::Subnet("172.16.0.0/12".parse().unwrap())).unwrap();
        let list = Data::List(vec![
            Data::Subnet("10.0.0.0/8".parse().unwrap()),
            Data::Subnet("172.16.0.0/12".parse().unwrap()),
        ]);
        assert_eq!(ids(&idx.lookup(RelOp::In, &list).unwrap()), vec![0, 3]);
        // The null row at id 2 stays excluded from the complement.
        assert_eq!(ids(&idx.lookup(RelOp::NotIn, &list).unwrap()), vec![1]);
    }

    #[test]
    fn test_list_index_any_element() {
        let elem = Type::new(TypeKind::String);
        let kind = TypeKind::List(Box::new(elem));
        let mut idx = ValueIndex::for_type(&kind).unwrap();
        idx.append(&Data::List(vec![
            Data::String("A".into()),
            Data::String("B".into()),
        ]))
        .unwrap();
        idx.append(&Data::List(vec![Data::String("C".into())])).unwrap();
        idx.append(&Data::Nil).unwrap();
        assert_eq!(
            ids(&idx.lookup(RelOp::Equal, &Data::String("B".into())).unwrap()),
            vec![0]
        );
        // No element equals "A" only in row 1; row 2 is null.
        assert_eq!(
            ids(&idx.lookup(RelOp::NotEqual, &Data::String("A".into())).unwrap()),
            vec![1]
        );
        assert_eq!(ids(&idx.lookup(RelOp::Equal, &Data::Nil).unwrap()), vec![2]);
    }

    #[test]
    fn test_roundtrip_all_variants() {
        let mut variants: Vec<ValueIndex> = Vec::new();

        let mut b = ValueIndex::for_type(&TypeKind::Bool).unwrap();
        b.append(&Data::Bool(true)).unwrap();
        b.append(&Data::Nil).unwrap();
        variants.push(b);

        let mut n = ValueIndex::for_type(&TypeKind::Count).unwrap();
        n.append(&Data::Count(99)).unwrap();
        variants.push(n);

        let mut s = ValueIndex::for_type(&TypeKind::String).unwrap();
        s.append(&Data::String("x".into())).unwrap();
        variants.push(s);

        let mut a = ValueIndex::for_type(&TypeKind::Address).unwrap();
        a.append(&Data::Address("10.0.0.1".parse().unwrap())).unwrap();
        variants.push(a);

        let mut sn = ValueIndex::for_type(&TypeKind::Subnet).unwrap();
        sn.append(&Data::Subnet("10.0.0.0/8".parse().unwrap())).unwrap();
        variants.push(sn);

        let kind = TypeKind::List(Box::new(Type::new(TypeKind::Count)));
        let mut l = ValueIndex::for_type(&kind).unwrap();
        l.append(&Data::List(vec![Data::Count(1), Data::Count(2)])).unwrap();
        variants.push(l);

        for idx in &variants {
            let mut buf = Vec::new();
            idx.encode(&mut buf);
            let mut pos = 0;
            let back = ValueIndex::decode(&buf, &mut pos).unwrap();
            assert_eq!(pos, buf.len(), "trailing bytes for {:?}", idx);
            assert_eq!(&back, idx);
        }
    }

    #[test]
    fn test_decode_unknown_tag() {
        let mut pos = 0;
        assert!(ValueIndex::decode(&[99], &mut pos).is_err());
    }

    #[test]
    fn test_append_type_clash() {
        let mut idx = ValueIndex::for_type(&TypeKind::Address).unwrap();
        assert!(idx.append(&Data::Count(1)).is_err());
    }
}
