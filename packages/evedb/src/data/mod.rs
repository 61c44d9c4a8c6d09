//! The typed data universe.
//!
//! [`Data`] is the tagged variant every cell of a table slice carries:
//! scalars (bool, integer, count, real, string, pattern, address, subnet,
//! time, duration, enumeration) and containers (list, map, record).
//!
//! Three representations round-trip losslessly:
//! - text (`Display` / [`Data::parse`]), used by readers and diagnostics,
//! - binary (`encode` / `decode`), a tag byte plus little-endian payload,
//!   used inside slice and index serialization,
//! - the in-memory variant itself.
//!
//! Equality ignores declared types but respects the tag; ordering within
//! one tag is total and deterministic (reals order by `total_cmp`).

mod schema;
mod types;

pub use schema::Schema;
pub use types::{type_check, Attribute, Layout, RecordField, Type, TypeKind};

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{Error, Result};

// ── Scalar wrappers ────────────────────────────────────────────────

/// A compiled regular expression, compared by its source text.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: regex::Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self> {
        let regex = regex::Regex::new(source)
            .map_err(|e| Error::Parse(format!("bad pattern /{}/: {}", source, e)))?;
        Ok(Self { source: source.to_string(), regex })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.regex.is_match(haystack)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}

impl PartialOrd for Pattern {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pattern {
    fn cmp(&self, other: &Self) -> Ordering {
        self.source.cmp(&other.source)
    }
}

impl Hash for Pattern {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
    }
}

/// A 16-byte IP address. IPv4 addresses are stored v4-mapped, so a v4
/// address and its `::ffff:`-mapped v6 form compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(Ipv6Addr);

impl Address {
    pub fn from_v4(addr: Ipv4Addr) -> Self {
        Self(addr.to_ipv6_mapped())
    }

    pub fn from_v6(addr: Ipv6Addr) -> Self {
        // Normalize a mapped v6 through its v4 form.
        match addr.to_ipv4_mapped() {
            Some(v4) => Self(v4.to_ipv6_mapped()),
            None => Self(addr),
        }
    }

    pub fn from_ip(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => Self::from_v4(v4),
            IpAddr::V6(v6) => Self::from_v6(v6),
        }
    }

    pub fn octets(&self) -> [u8; 16] {
        self.0.octets()
    }

    pub fn is_v4(&self) -> bool {
        self.0.to_ipv4_mapped().is_some()
    }

    /// Bit `i` of the address, counting from the most significant bit.
    pub fn bit(&self, i: usize) -> bool {
        debug_assert!(i < 128);
        let octets = self.0.octets();
        octets[i / 8] & (0x80 >> (i % 8)) != 0
    }
}

impl std::str::FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<IpAddr>()
            .map(Address::from_ip)
            .map_err(|_| Error::Parse(format!("not an address: {}", s)))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.to_ipv4_mapped() {
            Some(v4) => write!(f, "{}", v4),
            None => write!(f, "{}", self.0),
        }
    }
}

/// An address plus prefix length. IPv4 prefixes are stored with the
/// mapped offset of 96, so `10.0.0.0/8` has an internal length of 104.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Subnet {
    network: Address,
    length: u8,
}

impl Subnet {
    /// Create a subnet, masking host bits of `network`. `length` is the
    /// internal (v6) prefix length, at most 128.
    pub fn new(network: Address, length: u8) -> Result<Self> {
        if length > 128 {
            return Err(Error::InvalidArgument(format!(
                "prefix length {} exceeds 128",
                length
            )));
        }
        let mut octets = network.octets();
        for i in (length as usize)..128 {
            octets[i / 8] &= !(0x80 >> (i % 8));
        }
        Ok(Self { network: Address(Ipv6Addr::from(octets)), length })
    }

    pub fn network(&self) -> Address {
        self.network
    }

    pub fn length(&self) -> u8 {
        self.length
    }

    pub fn contains(&self, addr: &Address) -> bool {
        (0..self.length as usize).all(|i| addr.bit(i) == self.network.bit(i))
    }

    pub fn contains_subnet(&self, other: &Subnet) -> bool {
        other.length >= self.length && self.contains(&other.network)
    }
}

impl std::str::FromStr for Subnet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, len) = s
            .split_once('/')
            .ok_or_else(|| Error::Parse(format!("not a subnet: {}", s)))?;
        let network: Address = addr.parse()?;
        let mut length: u8 = len
            .parse()
            .map_err(|_| Error::Parse(format!("bad prefix length: {}", len)))?;
        if network.is_v4() {
            if length > 32 {
                return Err(Error::Parse(format!("v4 prefix length {} exceeds 32", length)));
            }
            length += 96;
        }
        Subnet::new(network, length)
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = if self.network.is_v4() {
            self.length.saturating_sub(96)
        } else {
            self.length
        };
        write!(f, "{}/{}", self.network, shown)
    }
}

/// A nanosecond UTC instant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp_nanos_opt().unwrap_or(0))
    }

    pub fn nanos(&self) -> i64 {
        self.0
    }
}

impl std::str::FromStr for Timestamp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|e| Error::Parse(format!("not a timestamp: {}: {}", s, e)))?;
        dt.timestamp_nanos_opt()
            .map(Timestamp)
            .ok_or_else(|| Error::Parse(format!("timestamp out of range: {}", s)))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.div_euclid(1_000_000_000);
        let nanos = self.0.rem_euclid(1_000_000_000) as u32;
        match DateTime::<Utc>::from_timestamp(secs, nanos) {
            Some(dt) => write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::Nanos, true)),
            None => write!(f, "@{}ns", self.0),
        }
    }
}

/// A signed nanosecond duration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct Span(pub i64);

/// Duration units, largest first, as (suffix, nanoseconds) pairs.
const SPAN_UNITS: [(&str, i64); 7] = [
    ("d", 86_400_000_000_000),
    ("h", 3_600_000_000_000),
    ("min", 60_000_000_000),
    ("s", 1_000_000_000),
    ("ms", 1_000_000),
    ("us", 1_000),
    ("ns", 1),
];

impl Span {
    pub fn nanos(&self) -> i64 {
        self.0
    }
}

impl std::str::FromStr for Span {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        // Multi-character suffixes first so "ms" is not read as "m"+"s".
        for (suffix, scale) in [
            ("min", 60_000_000_000i64),
            ("ms", 1_000_000),
            ("us", 1_000),
            ("ns", 1),
            ("d", 86_400_000_000_000),
            ("h", 3_600_000_000_000),
            ("s", 1_000_000_000),
        ] {
            if let Some(num) = s.strip_suffix(suffix) {
                let num = num.trim_end();
                if let Ok(n) = num.parse::<i64>() {
                    return Ok(Span(n.saturating_mul(scale)));
                }
                if let Ok(x) = num.parse::<f64>() {
                    return Ok(Span((x * scale as f64).round() as i64));
                }
                return Err(Error::Parse(format!("not a duration: {}", s)));
            }
        }
        Err(Error::Parse(format!("not a duration: {}", s)))
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "0s");
        }
        for (suffix, scale) in SPAN_UNITS {
            if self.0 % scale == 0 {
                return write!(f, "{}{}", self.0 / scale, suffix);
            }
        }
        unreachable!("ns unit divides everything")
    }
}

// ── Data ───────────────────────────────────────────────────────────

/// One cell of the data universe.
#[derive(Debug, Clone)]
pub enum Data {
    Nil,
    Bool(bool),
    Integer(i64),
    Count(u64),
    Real(f64),
    String(String),
    Pattern(Pattern),
    Address(Address),
    Subnet(Subnet),
    Time(Timestamp),
    Duration(Span),
    Enumeration(u32),
    List(Vec<Data>),
    /// Ordered key/value pairs; keys unique by construction.
    Map(Vec<(Data, Data)>),
    /// Ordered named fields; names unique within the record.
    Record(Vec<(String, Data)>),
}

/// Binary tag bytes, also used as the ordering rank across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum DataTag {
    Nil = 0,
    Bool = 1,
    Integer = 2,
    Count = 3,
    Real = 4,
    String = 5,
    Pattern = 6,
    Address = 7,
    Subnet = 8,
    Time = 9,
    Duration = 10,
    Enumeration = 11,
    List = 12,
    Map = 13,
    Record = 14,
}

impl DataTag {
    pub fn from_u8(v: u8) -> Option<Self> {
        use DataTag::*;
        Some(match v {
            0 => Nil,
            1 => Bool,
            2 => Integer,
            3 => Count,
            4 => Real,
            5 => String,
            6 => Pattern,
            7 => Address,
            8 => Subnet,
            9 => Time,
            10 => Duration,
            11 => Enumeration,
            12 => List,
            13 => Map,
            14 => Record,
            _ => return None,
        })
    }
}

impl Data {
    pub fn tag(&self) -> DataTag {
        match self {
            Data::Nil => DataTag::Nil,
            Data::Bool(_) => DataTag::Bool,
            Data::Integer(_) => DataTag::Integer,
            Data::Count(_) => DataTag::Count,
            Data::Real(_) => DataTag::Real,
            Data::String(_) => DataTag::String,
            Data::Pattern(_) => DataTag::Pattern,
            Data::Address(_) => DataTag::Address,
            Data::Subnet(_) => DataTag::Subnet,
            Data::Time(_) => DataTag::Time,
            Data::Duration(_) => DataTag::Duration,
            Data::Enumeration(_) => DataTag::Enumeration,
            Data::List(_) => DataTag::List,
            Data::Map(_) => DataTag::Map,
            Data::Record(_) => DataTag::Record,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Data::Nil)
    }
}

impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Data {}

impl PartialOrd for Data {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Data {
    fn cmp(&self, other: &Self) -> Ordering {
        use Data::*;
        match (self, other) {
            (Nil, Nil) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Count(a), Count(b)) => a.cmp(b),
            (Real(a), Real(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Pattern(a), Pattern(b)) => a.cmp(b),
            (Address(a), Address(b)) => a.cmp(b),
            (Subnet(a), Subnet(b)) => a.cmp(b),
            (Time(a), Time(b)) => a.cmp(b),
            (Duration(a), Duration(b)) => a.cmp(b),
            (Enumeration(a), Enumeration(b)) => a.cmp(b),
            (List(a), List(b)) => a.cmp(b),
            (Map(a), Map(b)) => a.cmp(b),
            (Record(a), Record(b)) => a.cmp(b),
            _ => self.tag().cmp(&other.tag()),
        }
    }
}

impl Hash for Data {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (self.tag() as u8).hash(state);
        match self {
            Data::Nil => {}
            Data::Bool(b) => b.hash(state),
            Data::Integer(i) => i.hash(state),
            Data::Count(c) => c.hash(state),
            Data::Real(r) => r.to_bits().hash(state),
            Data::String(s) => s.hash(state),
            Data::Pattern(p) => p.hash(state),
            Data::Address(a) => a.hash(state),
            Data::Subnet(s) => s.hash(state),
            Data::Time(t) => t.hash(state),
            Data::Duration(d) => d.hash(state),
            Data::Enumeration(e) => e.hash(state),
            Data::List(xs) => xs.hash(state),
            Data::Map(xs) => xs.hash(state),
            Data::Record(xs) => xs.hash(state),
        }
    }
}

// ── Text form ──────────────────────────────────────────────────────

fn write_escaped(f: &mut fmt::Formatter<'_>, s: &str, quote: char) -> fmt::Result {
    for c in s.chars() {
        match c {
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            '\t' => write!(f, "\\t")?,
            '\r' => write!(f, "\\r")?,
            c if c == quote => write!(f, "\\{}", quote)?,
            c => write!(f, "{}", c)?,
        }
    }
    Ok(())
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Data::Nil => write!(f, "nil"),
            Data::Bool(b) => write!(f, "{}", b),
            // The explicit sign separates integers from counts.
            Data::Integer(i) => write!(f, "{:+}", i),
            Data::Count(c) => write!(f, "{}", c),
            Data::Real(r) => {
                // Keep a decimal point so the value never reads as a count.
                if r.fract() == 0.0 && r.is_finite() {
                    write!(f, "{:.1}", r)
                } else {
                    write!(f, "{}", r)
                }
            }
            Data::String(s) => {
                write!(f, "\"")?;
                write_escaped(f, s, '"')?;
                write!(f, "\"")
            }
            Data::Pattern(p) => {
                write!(f, "/")?;
                write_escaped(f, p.source(), '/')?;
                write!(f, "/")
            }
            Data::Address(a) => write!(f, "{}", a),
            Data::Subnet(s) => write!(f, "{}", s),
            Data::Time(t) => write!(f, "{}", t),
            Data::Duration(d) => write!(f, "{}", d),
            Data::Enumeration(e) => write!(f, "#{}", e),
            Data::List(xs) => {
                write!(f, "[")?;
                for (i, x) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", x)?;
                }
                write!(f, "]")
            }
            Data::Map(xs) => {
                write!(f, "{{")?;
                for (i, (k, v)) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} -> {}", k, v)?;
                }
                write!(f, "}}")
            }
            Data::Record(xs) => {
                write!(f, "<")?;
                for (i, (name, v)) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", name, v)?;
                }
                write!(f, ">")
            }
        }
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.bump();
            Ok(())
        } else {
            Err(Error::Parse(format!(
                "expected '{}' at offset {} in {:?}",
                c, self.pos, self.input
            )))
        }
    }

    fn eat(&mut self, c: char) -> bool {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, s: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn quoted(&mut self, quote: char) -> Result<String> {
        // Opening quote already consumed.
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(Error::Parse(format!("unterminated {} in {:?}", quote, self.input))),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(c) => out.push(c),
                    None => return Err(Error::Parse("dangling escape".into())),
                },
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
            }
        }
    }

    fn value(&mut self) -> Result<Data> {
        self.skip_ws();
        if self.eat_str("nil") {
            return Ok(Data::Nil);
        }
        if self.eat_str("true") {
            return Ok(Data::Bool(true));
        }
        if self.eat_str("false") {
            return Ok(Data::Bool(false));
        }
        match self.peek() {
            Some('"') => {
                self.bump();
                Ok(Data::String(self.quoted('"')?))
            }
            Some('/') => {
                self.bump();
                let source = self.quoted('/')?;
                Ok(Data::Pattern(Pattern::new(&source)?))
            }
            Some('#') => {
                self.bump();
                let tok = self.scalar_token();
                tok.parse::<u32>()
                    .map(Data::Enumeration)
                    .map_err(|_| Error::Parse(format!("bad enumeration ordinal: {}", tok)))
            }
            Some('[') => {
                self.bump();
                let mut xs = Vec::new();
                if !self.eat(']') {
                    loop {
                        xs.push(self.value()?);
                        if self.eat(']') {
                            break;
                        }
                        self.expect(',')?;
                    }
                }
                Ok(Data::List(xs))
            }
            Some('{') => {
                self.bump();
                let mut xs = Vec::new();
                if !self.eat('}') {
                    loop {
                        let k = self.value()?;
                        self.skip_ws();
                        if !self.eat_str("->") {
                            return Err(Error::Parse(format!(
                                "expected '->' at offset {} in {:?}",
                                self.pos, self.input
                            )));
                        }
                        let v = self.value()?;
                        if xs.iter().any(|(key, _)| *key == k) {
                            return Err(Error::Parse(format!("duplicate map key: {}", k)));
                        }
                        xs.push((k, v));
                        if self.eat('}') {
                            break;
                        }
                        self.expect(',')?;
                    }
                }
                Ok(Data::Map(xs))
            }
            Some('<') => {
                self.bump();
                let mut xs: Vec<(String, Data)> = Vec::new();
                if !self.eat('>') {
                    loop {
                        self.skip_ws();
                        let name = self.ident()?;
                        self.expect(':')?;
                        let v = self.value()?;
                        if xs.iter().any(|(n, _)| *n == name) {
                            return Err(Error::Parse(format!("duplicate field name: {}", name)));
                        }
                        xs.push((name, v));
                        if self.eat('>') {
                            break;
                        }
                        self.expect(',')?;
                    }
                }
                Ok(Data::Record(xs))
            }
            Some(_) => {
                let tok = self.scalar_token();
                parse_scalar(tok)
            }
            None => Err(Error::Parse("empty input".into())),
        }
    }

    fn ident(&mut self) -> Result<String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_' || c == '.') {
            self.bump();
        }
        if self.pos == start {
            return Err(Error::Parse(format!(
                "expected field name at offset {} in {:?}",
                self.pos, self.input
            )));
        }
        Ok(self.input[start..self.pos].to_string())
    }

    fn scalar_token(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, ',' | ']' | '}' | '>') || c.is_whitespace() {
                break;
            }
            self.bump();
        }
        &self.input[start..self.pos]
    }
}

/// Classify and parse an unquoted scalar token.
fn parse_scalar(tok: &str) -> Result<Data> {
    if tok.is_empty() {
        return Err(Error::Parse("empty scalar".into()));
    }
    if let Ok(t) = tok.parse::<Timestamp>() {
        return Ok(Data::Time(t));
    }
    if tok.contains('/') {
        return tok.parse::<Subnet>().map(Data::Subnet);
    }
    if let Ok(a) = tok.parse::<Address>() {
        return Ok(Data::Address(a));
    }
    if let Ok(span) = tok.parse::<Span>() {
        return Ok(Data::Duration(span));
    }
    let signed = tok.starts_with('+') || tok.starts_with('-');
    let fractional = tok.contains('.') || tok.contains('e') || tok.contains('E');
    let lower = tok.to_ascii_lowercase();
    if fractional || lower.contains("inf") || lower.contains("nan") {
        return tok
            .parse::<f64>()
            .map(Data::Real)
            .map_err(|_| Error::Parse(format!("not a real: {}", tok)));
    }
    if signed {
        return tok
            .parse::<i64>()
            .map(Data::Integer)
            .map_err(|_| Error::Parse(format!("not an integer: {}", tok)));
    }
    tok.parse::<u64>()
        .map(Data::Count)
        .map_err(|_| Error::Parse(format!("not a count: {}", tok)))
}

impl Data {
    /// Parse the canonical text form produced by `Display`.
    pub fn parse(input: &str) -> Result<Data> {
        let mut p = Parser::new(input);
        let v = p.value()?;
        p.skip_ws();
        if p.pos != p.input.len() {
            return Err(Error::Parse(format!(
                "trailing input at offset {} in {:?}",
                p.pos, p.input
            )));
        }
        Ok(v)
    }

    /// Parse a bare token as a value of the given type. Readers use this
    /// for cells whose type the layout already fixes; strings arrive
    /// unquoted.
    pub fn parse_as(kind: &TypeKind, s: &str) -> Result<Data> {
        match kind {
            TypeKind::Bool => match s {
                "true" | "T" => Ok(Data::Bool(true)),
                "false" | "F" => Ok(Data::Bool(false)),
                _ => Err(Error::Parse(format!("not a bool: {}", s))),
            },
            TypeKind::Integer => s
                .parse::<i64>()
                .map(Data::Integer)
                .map_err(|_| Error::Parse(format!("not an integer: {}", s))),
            TypeKind::Count => s
                .parse::<u64>()
                .map(Data::Count)
                .map_err(|_| Error::Parse(format!("not a count: {}", s))),
            TypeKind::Real => s
                .parse::<f64>()
                .map(Data::Real)
                .map_err(|_| Error::Parse(format!("not a real: {}", s))),
            TypeKind::String => Ok(Data::String(s.to_string())),
            TypeKind::Pattern => Pattern::new(s).map(Data::Pattern),
            TypeKind::Address => s.parse::<Address>().map(Data::Address),
            TypeKind::Subnet => s.parse::<Subnet>().map(Data::Subnet),
            TypeKind::Time => s.parse::<Timestamp>().map(Data::Time),
            TypeKind::Duration => s.parse::<Span>().map(Data::Duration),
            TypeKind::Enumeration(fields) => {
                if let Some(ord) = fields.iter().position(|f| f == s) {
                    return Ok(Data::Enumeration(ord as u32));
                }
                s.parse::<u32>()
                    .map(Data::Enumeration)
                    .map_err(|_| Error::Convert(format!("not an enumeration value: {}", s)))
            }
            TypeKind::List(elem) => {
                let parsed = Data::parse(s)?;
                match parsed {
                    Data::List(_) => Ok(parsed),
                    // Readers may deliver bare single elements.
                    _ => Ok(Data::List(vec![Data::parse_as(&elem.kind, s)?])),
                }
            }
            TypeKind::Map(_, _) => Err(Error::Format(format!(
                "map values are not supported here: {}",
                s
            ))),
            TypeKind::Record(_) => Data::parse(s),
            TypeKind::Alias(name) => Err(Error::TypeClash(format!(
                "cannot parse through alias type {}",
                name
            ))),
        }
    }
}

// ── Binary form ────────────────────────────────────────────────────

fn encode_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn decode_u8(bytes: &[u8], pos: &mut usize) -> Result<u8> {
    let b = bytes
        .get(*pos)
        .copied()
        .ok_or_else(|| Error::Format("truncated data value".into()))?;
    *pos += 1;
    Ok(b)
}

fn decode_array<const N: usize>(bytes: &[u8], pos: &mut usize) -> Result<[u8; N]> {
    let end = *pos + N;
    if end > bytes.len() {
        return Err(Error::Format("truncated data value".into()));
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[*pos..end]);
    *pos = end;
    Ok(out)
}

fn decode_u32(bytes: &[u8], pos: &mut usize) -> Result<u32> {
    decode_array::<4>(bytes, pos).map(u32::from_le_bytes)
}

fn decode_str(bytes: &[u8], pos: &mut usize) -> Result<String> {
    let len = decode_u32(bytes, pos)? as usize;
    let end = *pos + len;
    if end > bytes.len() {
        return Err(Error::Format("truncated string value".into()));
    }
    let s = std::str::from_utf8(&bytes[*pos..end])
        .map_err(|_| Error::Format("data value contains invalid UTF-8".into()))?
        .to_string();
    *pos = end;
    Ok(s)
}

impl Data {
    /// Append the binary form: a tag byte followed by a little-endian
    /// payload. Containers carry a u32 element count.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.push(self.tag() as u8);
        match self {
            Data::Nil => {}
            Data::Bool(b) => buf.push(*b as u8),
            Data::Integer(i) => buf.extend_from_slice(&i.to_le_bytes()),
            Data::Count(c) => buf.extend_from_slice(&c.to_le_bytes()),
            Data::Real(r) => buf.extend_from_slice(&r.to_bits().to_le_bytes()),
            Data::String(s) => encode_bytes(buf, s.as_bytes()),
            Data::Pattern(p) => encode_bytes(buf, p.source().as_bytes()),
            Data::Address(a) => buf.extend_from_slice(&a.octets()),
            Data::Subnet(s) => {
                buf.extend_from_slice(&s.network().octets());
                buf.push(s.length());
            }
            Data::Time(t) => buf.extend_from_slice(&t.0.to_le_bytes()),
            Data::Duration(d) => buf.extend_from_slice(&d.0.to_le_bytes()),
            Data::Enumeration(e) => buf.extend_from_slice(&e.to_le_bytes()),
            Data::List(xs) => {
                buf.extend_from_slice(&(xs.len() as u32).to_le_bytes());
                for x in xs {
                    x.encode(buf);
                }
            }
            Data::Map(xs) => {
                buf.extend_from_slice(&(xs.len() as u32).to_le_bytes());
                for (k, v) in xs {
                    k.encode(buf);
                    v.encode(buf);
                }
            }
            Data::Record(xs) => {
                buf.extend_from_slice(&(xs.len() as u32).to_le_bytes());
                for (name, v) in xs {
                    encode_bytes(buf, name.as_bytes());
                    v.encode(buf);
                }
            }
        }
    }

    /// Decode one value starting at `*pos`, advancing it past the value.
    pub fn decode(bytes: &[u8], pos: &mut usize) -> Result<Data> {
        let tag = decode_u8(bytes, pos)?;
        let tag = DataTag::from_u8(tag)
            .ok_or_else(|| Error::Format(format!("unknown data tag: {}", tag)))?;
        Ok(match tag {
            DataTag::Nil => Data::Nil,
            DataTag::Bool => Data::Bool(decode_u8(bytes, pos)? != 0),
            DataTag::Integer => Data::Integer(i64::from_le_bytes(decode_array(bytes, pos)?)),
            DataTag::Count => Data::Count(u64::from_le_bytes(decode_array(bytes, pos)?)),
            DataTag::Real => Data::Real(f64::from_bits(u64::from_le_bytes(decode_array(
                bytes, pos,
            )?))),
            DataTag::String => Data::String(decode_str(bytes, pos)?),
            DataTag::Pattern => Data::Pattern(Pattern::new(&decode_str(bytes, pos)?)?),
            DataTag::Address => {
                Data::Address(Address::from_v6(Ipv6Addr::from(decode_array::<16>(bytes, pos)?)))
            }
            DataTag::Subnet => {
                let octets = decode_array::<16>(bytes, pos)?;
                let length = decode_u8(bytes, pos)?;
                Data::Subnet(Subnet::new(
                    Address::from_v6(Ipv6Addr::from(octets)),
                    length,
                )?)
            }
            DataTag::Time => Data::Time(Timestamp(i64::from_le_bytes(decode_array(bytes, pos)?))),
            DataTag::Duration => {
                Data::Duration(Span(i64::from_le_bytes(decode_array(bytes, pos)?)))
            }
            DataTag::Enumeration => {
                Data::Enumeration(u32::from_le_bytes(decode_array(bytes, pos)?))
            }
            DataTag::List => {
                let n = decode_u32(bytes, pos)? as usize;
                let mut xs = Vec::with_capacity(n.min(4096));
                for _ in 0..n {
                    xs.push(Data::decode(bytes, pos)?);
                }
                Data::List(xs)
            }
            DataTag::Map => {
                let n = decode_u32(bytes, pos)? as usize;
                let mut xs = Vec::with_capacity(n.min(4096));
                for _ in 0..n {
                    let k = Data::decode(bytes, pos)?;
                    let v = Data::decode(bytes, pos)?;
                    xs.push((k, v));
                }
                Data::Map(xs)
            }
            DataTag::Record => {
                let n = decode_u32(bytes, pos)? as usize;
                let mut xs = Vec::with_capacity(n.min(4096));
                for _ in 0..n {
                    let name = decode_str(bytes, pos)?;
                    let v = Data::decode(bytes, pos)?;
                    xs.push((name, v));
                }
                Data::Record(xs)
            }
        })
    }

    /// Canonical bytes for hashing (Bloom keys). Same as `encode`.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }
}

/// Convert a list of records into a map, keyed by the record field
/// carrying the `"key"` attribute in `record_type`. The full record
/// stays as the map value. Duplicate keys are a conversion error.
pub fn list_to_map(list: &[Data], record_type: &Type) -> Result<Data> {
    let TypeKind::Record(fields) = &record_type.kind else {
        return Err(Error::InvalidArgument(
            "list_to_map requires a record element type".into(),
        ));
    };
    let key_pos = fields
        .iter()
        .position(|f| f.ty.has_attr("key"))
        .ok_or_else(|| {
            Error::InvalidArgument("record type has no field with a \"key\" attribute".into())
        })?;
    let mut out: Vec<(Data, Data)> = Vec::with_capacity(list.len());
    for (i, item) in list.iter().enumerate() {
        let Data::Record(xs) = item else {
            return Err(Error::TypeClash(format!("list element {} is not a record", i)));
        };
        let Some((_, key)) = xs.get(key_pos) else {
            return Err(Error::Convert(format!("list element {} lacks the key field", i)));
        };
        if out.iter().any(|(k, _)| k == key) {
            return Err(Error::Convert(format!("duplicate map key: {}", key)));
        }
        out.push((key.clone(), item.clone()));
    }
    Ok(Data::Map(out))
}
