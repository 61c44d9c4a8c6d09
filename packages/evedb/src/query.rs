//! Expression evaluation against passive partitions.
//!
//! Evaluation normalizes the expression, resolves extractors against
//! the partition's schema, and answers each predicate from the cheapest
//! sufficient source: the column synopsis first, the exact value index
//! second, and a segment scan only for columns that have neither. The
//! per-predicate bitmaps combine per the boolean tree; the final bitmap
//! drives the segment lookup.
//!
//! Cancellation follows the actor model: a caller that loses interest
//! drops its reply channel, in-flight partition work runs to completion
//! and the reply send fails silently.

use std::collections::BTreeSet;

use crate::bitmap::Bitmap;
use crate::data::{Data, Layout, TypeKind};
use crate::error::{Error, Result, ResultExt};
use crate::expr::{eval_op, Expression, Extractor, MetaExtractor, Predicate, RelOp};
use crate::partition::PassivePartition;
use crate::slice::TableSlice;

/// A layout plus the absolute ids of every row carrying it.
struct ResolvedLayout {
    layout: Layout,
    cover: Bitmap,
}

fn resolved_layouts(part: &PassivePartition) -> Result<Vec<ResolvedLayout>> {
    let mut out: Vec<ResolvedLayout> = Vec::new();
    for (layout, range) in part.layout_ranges()? {
        let mut cover = Bitmap::zeroes(range.offset);
        cover.append_bits(true, range.rows);
        match out.iter_mut().find(|rl| rl.layout.name == layout.name) {
            Some(existing) => existing.cover = existing.cover.union(&cover),
            None => out.push(ResolvedLayout { layout, cover }),
        }
    }
    Ok(out)
}

/// Prepend `by` zero bits, turning a partition-relative bitmap into an
/// absolute one.
fn shift(bm: &Bitmap, by: u64) -> Bitmap {
    let mut out = Bitmap::new();
    for (start, len) in bm.set_runs() {
        out.append_bits(false, by + start - out.len());
        out.append_bits(true, len);
    }
    out
}

/// Evaluate an expression to the bitmap of matching ids.
pub fn evaluate_bitmap(part: &PassivePartition, expr: &Expression) -> Result<Bitmap> {
    let normalized = expr.clone().normalize();
    let layouts = resolved_layouts(part)?;
    eval(part, &layouts, &normalized)
}

fn eval(part: &PassivePartition, layouts: &[ResolvedLayout], expr: &Expression) -> Result<Bitmap> {
    match expr {
        Expression::Conjunction(xs) => {
            let mut acc = part.ids();
            for x in xs {
                if acc.count_ones() == 0 {
                    break;
                }
                acc = acc.intersect(&eval(part, layouts, x)?);
            }
            Ok(acc)
        }
        Expression::Disjunction(xs) => {
            let mut acc = Bitmap::new();
            for x in xs {
                acc = acc.union(&eval(part, layouts, x)?);
            }
            Ok(acc)
        }
        // Normalization removes negations; handle residuals anyway.
        Expression::Negation(x) => Ok(part.ids().difference(&eval(part, layouts, x)?)),
        Expression::Predicate(p) => eval_predicate(part, layouts, p),
    }
}

fn eval_predicate(
    part: &PassivePartition,
    layouts: &[ResolvedLayout],
    pred: &Predicate,
) -> Result<Bitmap> {
    match &pred.lhs {
        Extractor::Meta(MetaExtractor::Type) => {
            let mut acc = Bitmap::new();
            for rl in layouts {
                if eval_op(pred.op, &Data::String(rl.layout.name.clone()), &pred.rhs) {
                    acc = acc.union(&rl.cover);
                }
            }
            Ok(acc)
        }
        Extractor::Meta(MetaExtractor::ImportTime) => {
            let import_time = Data::Time(part.meta().import_time);
            if eval_op(pred.op, &import_time, &pred.rhs) {
                Ok(part.ids())
            } else {
                Ok(Bitmap::new())
            }
        }
        Extractor::Meta(MetaExtractor::Time) => {
            let mut acc = Bitmap::new();
            for rl in layouts {
                for col in time_columns(&rl.layout) {
                    acc = acc.union(&eval_column(part, rl, col, pred.op, &pred.rhs)?);
                }
            }
            Ok(acc)
        }
        Extractor::Type(kind) => {
            let mut acc = Bitmap::new();
            for rl in layouts {
                for (col, (_, ty)) in rl.layout.columns.iter().enumerate() {
                    if std::mem::discriminant(&ty.kind) == std::mem::discriminant(kind) {
                        acc = acc.union(&eval_column(part, rl, col, pred.op, &pred.rhs)?);
                    }
                }
            }
            Ok(acc)
        }
        Extractor::Field(name) => {
            // An extractor with no match in the schema evaluates to the
            // empty set.
            let mut acc = Bitmap::new();
            for rl in layouts {
                for col in rl.layout.resolve(name) {
                    acc = acc.union(&eval_column(part, rl, col, pred.op, &pred.rhs)?);
                }
            }
            Ok(acc)
        }
    }
}

/// Time-typed columns, preferring those with a `timestamp` attribute.
fn time_columns(layout: &Layout) -> Vec<usize> {
    let time_cols: Vec<usize> = layout
        .columns
        .iter()
        .enumerate()
        .filter(|(_, (_, ty))| ty.kind == TypeKind::Time)
        .map(|(i, _)| i)
        .collect();
    let stamped: Vec<usize> = time_cols
        .iter()
        .copied()
        .filter(|&i| layout.columns[i].1.has_attr("timestamp"))
        .collect();
    if stamped.is_empty() {
        time_cols
    } else {
        stamped
    }
}

fn eval_column(
    part: &PassivePartition,
    rl: &ResolvedLayout,
    col: usize,
    op: RelOp,
    rhs: &Data,
) -> Result<Bitmap> {
    let (path, _) = &rl.layout.columns[col];
    let qualified = format!("{}.{}", rl.layout.name, path);

    // 1. Synopsis: a definite answer skips the index entirely.
    if let Some(synopsis) = part.synopsis(&qualified) {
        match synopsis.lookup(op, rhs) {
            Some(false) => return Ok(Bitmap::new()),
            Some(true) => return Ok(rl.cover.clone()),
            None => {}
        }
    }

    // 2. Value index: exact. Bitmaps are partition-relative and padded
    // with nulls across foreign layouts, so shift and clamp to the
    // layout's rows.
    if let Some(index) = part.index(&qualified) {
        let relative = index.lookup(op, rhs).ctx(&qualified)?;
        return Ok(shift(&relative, part.id_begin()).intersect(&rl.cover));
    }

    // 3. Fallback scan for columns without an index.
    scan_column(part, rl, col, op, rhs)
}

fn scan_column(
    part: &PassivePartition,
    rl: &ResolvedLayout,
    col: usize,
    op: RelOp,
    rhs: &Data,
) -> Result<Bitmap> {
    let mut acc = Bitmap::new();
    for slice in part.segment().lookup(&rl.cover)? {
        if slice.layout().name != rl.layout.name {
            continue;
        }
        for row in 0..slice.rows() {
            if eval_op(op, slice.at(row, col, None), rhs) {
                acc.set(slice.offset() + row);
            }
        }
    }
    Ok(acc)
}

/// Row indexes of `slice` whose absolute ids are set in `ids`.
pub fn matching_rows(slice: &TableSlice, ids: &Bitmap) -> Vec<u64> {
    (0..slice.rows())
        .filter(|row| ids.get(slice.offset() + row))
        .collect()
}

// ── Pivot ──────────────────────────────────────────────────────────

/// The field used to correlate events of a target type.
///
/// Interim policy: Zeek types correlate on `uid`, everything else on
/// `community_id`. A runtime type registry should eventually replace
/// this.
pub fn pivot_field_for(type_name: &str) -> &'static str {
    if type_name.starts_with("zeek") {
        "uid"
    } else {
        "community_id"
    }
}

/// Derive the follow-up query for a pivot from `source` matches to the
/// `target_type` record type: `#type == target && field in {values}`.
pub fn pivot(
    part: &PassivePartition,
    target_type: &str,
    source: &Expression,
) -> Result<Expression> {
    let field = pivot_field_for(target_type);
    let ids = evaluate_bitmap(part, source)?;
    let slices = part.segment().lookup(&ids)?;
    let mut values: BTreeSet<Data> = BTreeSet::new();
    for slice in &slices {
        let Some((_, cells)) = slice.column_by_name(field) else {
            continue;
        };
        for row in matching_rows(slice, &ids) {
            let cell = &cells[row as usize];
            if !cell.is_nil() {
                values.insert(cell.clone());
            }
        }
    }
    if values.is_empty() {
        return Err(Error::InvalidArgument(format!(
            "no {} values to pivot on",
            field
        )));
    }
    Ok(Expression::and(vec![
        Expression::pred(
            Extractor::Meta(MetaExtractor::Type),
            RelOp::Equal,
            Data::String(target_type.to_string()),
        ),
        Expression::pred(
            Extractor::Field(field.to_string()),
            RelOp::In,
            Data::List(values.into_iter().collect()),
        ),
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shift() {
        let bm: Bitmap = [0u64, 2, 3].into_iter().collect();
        let shifted = shift(&bm, 10);
        assert_eq!(shifted.ones().collect::<Vec<_>>(), vec![10, 12, 13]);
        let empty = shift(&Bitmap::new(), 5);
        assert_eq!(empty.count_ones(), 0);
    }

    #[test]
    fn test_pivot_field_heuristic() {
        assert_eq!(pivot_field_for("zeek.conn"), "uid");
        assert_eq!(pivot_field_for("zeek.dns"), "uid");
        assert_eq!(pivot_field_for("suricata.flow"), "community_id");
    }
}
