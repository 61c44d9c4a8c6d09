//! Run-length encoded id sets.
//!
//! A [`Bitmap`] represents an ordered set of event ids as a sequence of
//! homogeneous runs. Set algebra walks two run sequences in lockstep, so
//! union/intersection/difference cost O(runs), not O(ids). Shorter
//! operands are padded with zero bits.
//!
//! Binary format:
//! ```text
//! [len_bits: u64 LE]            // total length in bits
//! [run_count: u32 LE]
//! [runs: u64 LE x run_count]    // MSB = bit value, low 63 bits = length
//! ```

use std::fmt;

use crate::error::{Error, Result};

#[derive(Clone, Copy, PartialEq, Eq)]
struct Run {
    value: bool,
    length: u64,
}

/// A compressed set of u64 ids.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Bitmap {
    runs: Vec<Run>,
    len: u64,
}

impl Bitmap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bitmap of `len` zero bits.
    pub fn zeroes(len: u64) -> Self {
        let mut bm = Self::new();
        bm.append_bits(false, len);
        bm
    }

    /// A bitmap of `len` one bits.
    pub fn ones_run(len: u64) -> Self {
        let mut bm = Self::new();
        bm.append_bits(true, len);
        bm
    }

    /// Total length in bits (set and unset).
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append `count` copies of `value`, coalescing with the last run.
    pub fn append_bits(&mut self, value: bool, count: u64) {
        if count == 0 {
            return;
        }
        self.len += count;
        if let Some(last) = self.runs.last_mut() {
            if last.value == value {
                last.length += count;
                return;
            }
        }
        self.runs.push(Run { value, length: count });
    }

    pub fn append_bit(&mut self, value: bool) {
        self.append_bits(value, 1);
    }

    /// Set bit `id`, extending with zero bits if `id >= len`.
    pub fn set(&mut self, id: u64) {
        if id >= self.len {
            let gap = id - self.len;
            self.append_bits(false, gap);
            self.append_bit(true);
            return;
        }
        if self.get(id) {
            return;
        }
        // Splice: rebuild the run sequence with bit `id` flipped on.
        let mut out = Bitmap::new();
        let mut start = 0u64;
        for run in &self.runs {
            let end = start + run.length;
            if run.value || id < start || id >= end {
                out.append_bits(run.value, run.length);
            } else {
                out.append_bits(false, id - start);
                out.append_bit(true);
                out.append_bits(false, end - id - 1);
            }
            start = end;
        }
        *self = out;
    }

    /// Bit at position `id`; positions past the end read as zero.
    pub fn get(&self, id: u64) -> bool {
        let mut start = 0u64;
        for run in &self.runs {
            let end = start + run.length;
            if id < end {
                return run.value;
            }
            start = end;
        }
        false
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> u64 {
        self.runs
            .iter()
            .filter(|r| r.value)
            .map(|r| r.length)
            .sum()
    }

    /// Number of set bits in `[0, pos)`.
    pub fn rank(&self, pos: u64) -> u64 {
        let mut start = 0u64;
        let mut ones = 0u64;
        for run in &self.runs {
            let end = start + run.length;
            if pos <= start {
                break;
            }
            if run.value {
                ones += pos.min(end) - start;
            }
            start = end;
        }
        ones
    }

    /// Position of the `n`-th set bit (0-based), if it exists.
    pub fn select(&self, n: u64) -> Option<u64> {
        let mut start = 0u64;
        let mut remaining = n;
        for run in &self.runs {
            if run.value {
                if remaining < run.length {
                    return Some(start + remaining);
                }
                remaining -= run.length;
            }
            start += run.length;
        }
        None
    }

    /// Largest set bit position.
    pub fn max_id(&self) -> Option<u64> {
        let mut start = 0u64;
        let mut max = None;
        for run in &self.runs {
            if run.value {
                max = Some(start + run.length - 1);
            }
            start += run.length;
        }
        max
    }

    /// Whether any bit in `[begin, end)` is set.
    pub fn any_in_range(&self, begin: u64, end: u64) -> bool {
        let mut start = 0u64;
        for run in &self.runs {
            let run_end = start + run.length;
            if run.value && start < end && run_end > begin {
                return true;
            }
            if start >= end {
                break;
            }
            start = run_end;
        }
        false
    }

    /// Iterate over set-bit positions.
    pub fn ones(&self) -> impl Iterator<Item = u64> + '_ {
        self.set_runs()
            .flat_map(|(start, len)| start..start + len)
    }

    /// Iterate over maximal set runs as (start, length).
    pub fn set_runs(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        let mut start = 0u64;
        self.runs.iter().filter_map(move |run| {
            let s = start;
            start += run.length;
            run.value.then_some((s, run.length))
        })
    }

    fn binary_op(&self, other: &Bitmap, f: impl Fn(bool, bool) -> bool) -> Bitmap {
        let mut out = Bitmap::new();
        let len = self.len.max(other.len);
        let mut a = RunCursor::new(&self.runs, self.len, len);
        let mut b = RunCursor::new(&other.runs, other.len, len);
        while let (Some((av, alen)), Some((bv, blen))) = (a.peek(), b.peek()) {
            let step = alen.min(blen);
            out.append_bits(f(av, bv), step);
            a.advance(step);
            b.advance(step);
        }
        out
    }

    pub fn union(&self, other: &Bitmap) -> Bitmap {
        self.binary_op(other, |a, b| a | b)
    }

    pub fn intersect(&self, other: &Bitmap) -> Bitmap {
        self.binary_op(other, |a, b| a & b)
    }

    pub fn difference(&self, other: &Bitmap) -> Bitmap {
        self.binary_op(other, |a, b| a & !b)
    }

    /// Flip every bit, padding or truncating to `len` bits.
    pub fn complement_to(&self, len: u64) -> Bitmap {
        let mut out = Bitmap::new();
        let mut start = 0u64;
        for run in &self.runs {
            if start >= len {
                break;
            }
            let take = run.length.min(len - start);
            out.append_bits(!run.value, take);
            start += take;
        }
        if start < len {
            out.append_bits(true, len - start);
        }
        out
    }

    // ── Serialization ──────────────────────────────────────────────

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.len.to_le_bytes());
        buf.extend_from_slice(&(self.runs.len() as u32).to_le_bytes());
        for run in &self.runs {
            debug_assert!(run.length < 1 << 63);
            let word = run.length | ((run.value as u64) << 63);
            buf.extend_from_slice(&word.to_le_bytes());
        }
    }

    pub fn decode(bytes: &[u8], pos: &mut usize) -> Result<Bitmap> {
        if *pos + 12 > bytes.len() {
            return Err(Error::Format("bitmap header truncated".into()));
        }
        let len = u64::from_le_bytes(bytes[*pos..*pos + 8].try_into().unwrap());
        let run_count = u32::from_le_bytes(bytes[*pos + 8..*pos + 12].try_into().unwrap()) as usize;
        *pos += 12;
        if *pos + run_count * 8 > bytes.len() {
            return Err(Error::Format("bitmap runs truncated".into()));
        }
        let mut out = Bitmap::new();
        for _ in 0..run_count {
            let word = u64::from_le_bytes(bytes[*pos..*pos + 8].try_into().unwrap());
            *pos += 8;
            out.append_bits(word >> 63 == 1, word & !(1 << 63));
        }
        if out.len != len {
            return Err(Error::Format(format!(
                "bitmap length mismatch: header {} vs runs {}",
                len, out.len
            )));
        }
        Ok(out)
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bitmap(len={}, ones={})", self.len, self.count_ones())
    }
}

impl FromIterator<u64> for Bitmap {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        let mut bm = Bitmap::new();
        for id in iter {
            bm.set(id);
        }
        bm
    }
}

/// Cursor over a run sequence, padded with zero bits up to `padded_len`.
struct RunCursor<'a> {
    runs: &'a [Run],
    index: usize,
    consumed_in_run: u64,
    consumed_total: u64,
    own_len: u64,
    padded_len: u64,
}

impl<'a> RunCursor<'a> {
    fn new(runs: &'a [Run], own_len: u64, padded_len: u64) -> Self {
        Self { runs, index: 0, consumed_in_run: 0, consumed_total: 0, own_len, padded_len }
    }

    fn peek(&self) -> Option<(bool, u64)> {
        if self.consumed_total >= self.padded_len {
            return None;
        }
        if self.consumed_total >= self.own_len {
            return Some((false, self.padded_len - self.consumed_total));
        }
        let run = &self.runs[self.index];
        Some((run.value, run.length - self.consumed_in_run))
    }

    fn advance(&mut self, count: u64) {
        self.consumed_total += count;
        if self.consumed_total > self.own_len {
            return;
        }
        self.consumed_in_run += count;
        while self.index < self.runs.len() && self.consumed_in_run >= self.runs[self.index].length {
            self.consumed_in_run -= self.runs[self.index].length;
            self.index += 1;
        }
    }
}
