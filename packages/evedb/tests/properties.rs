//! Property tests for the storage and query core.

use std::collections::BTreeSet;
use std::net::Ipv6Addr;

use proptest::prelude::*;
use uuid::Uuid;

use evedb::data::{Address, Pattern, RecordField, Span, Subnet, Timestamp};
use evedb::expr::eval_op;
use evedb::index::ValueIndex;
use evedb::partition::{ActivePartition, PassivePartition};
use evedb::synopsis::Synopsis;
use evedb::{
    Bitmap, Data, Expression, Extractor, FsHandle, RelOp, SliceBuilder, StoreConfig, Type,
    TypeKind,
};

// ── Strategies ─────────────────────────────────────────────────────

fn real_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![
        -1e15..1e15f64,
        Just(0.0),
        Just(-0.0),
        Just(f64::INFINITY),
        Just(f64::NEG_INFINITY),
        (-1_000_000i64..1_000_000).prop_map(|n| n as f64),
    ]
}

fn address_strategy() -> impl Strategy<Value = Address> {
    any::<[u8; 16]>().prop_map(|octets| Address::from_v6(Ipv6Addr::from(octets)))
}

fn subnet_strategy() -> impl Strategy<Value = Subnet> {
    (address_strategy(), 0u8..=128)
        .prop_map(|(addr, len)| Subnet::new(addr, len).expect("length in range"))
}

fn pattern_strategy() -> impl Strategy<Value = Data> {
    prop_oneof![
        Just("[a-z]+"),
        Just("foo.*bar"),
        Just("^\\d{2}$"),
        Just("GET|POST"),
    ]
    .prop_map(|src| Data::Pattern(Pattern::new(src).expect("valid pattern")))
}

fn string_strategy() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[\\x20-\\x7E]{0,10}").expect("valid regex")
}

fn scalar_strategy() -> impl Strategy<Value = Data> {
    prop_oneof![
        Just(Data::Nil),
        any::<bool>().prop_map(Data::Bool),
        any::<i64>().prop_map(Data::Integer),
        any::<u64>().prop_map(Data::Count),
        real_strategy().prop_map(Data::Real),
        string_strategy().prop_map(Data::String),
        pattern_strategy(),
        address_strategy().prop_map(Data::Address),
        subnet_strategy().prop_map(Data::Subnet),
        any::<i64>().prop_map(|n| Data::Time(Timestamp(n))),
        any::<i64>().prop_map(|n| Data::Duration(Span(n))),
        (0u32..16).prop_map(Data::Enumeration),
    ]
}

fn data_strategy() -> impl Strategy<Value = Data> {
    scalar_strategy().prop_recursive(2, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Data::List),
            prop::collection::vec((inner.clone(), inner.clone()), 0..3).prop_map(|pairs| {
                let mut seen = BTreeSet::new();
                let unique = pairs
                    .into_iter()
                    .filter(|(k, _)| seen.insert(k.clone()))
                    .collect();
                Data::Map(unique)
            }),
            prop::collection::vec(inner, 0..4).prop_map(|values| {
                Data::Record(
                    values
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| (format!("f{}", i), v))
                        .collect(),
                )
            }),
        ]
    })
}

fn bitmap_strategy() -> impl Strategy<Value = Bitmap> {
    prop::collection::vec(any::<bool>(), 0..64).prop_map(|bits| {
        let mut bm = Bitmap::new();
        for b in bits {
            bm.append_bit(b);
        }
        bm
    })
}

fn order_op_strategy() -> impl Strategy<Value = RelOp> {
    prop_oneof![
        Just(RelOp::Equal),
        Just(RelOp::NotEqual),
        Just(RelOp::Less),
        Just(RelOp::LessEqual),
        Just(RelOp::Greater),
        Just(RelOp::GreaterEqual),
    ]
}

// ── P1: data round-trips ───────────────────────────────────────────

proptest! {
    #[test]
    fn p1_text_roundtrip(value in data_strategy()) {
        let printed = value.to_string();
        let parsed = Data::parse(&printed)
            .unwrap_or_else(|e| panic!("cannot parse {:?}: {}", printed, e));
        prop_assert_eq!(parsed, value);
    }

    #[test]
    fn p1_binary_roundtrip(value in data_strategy()) {
        let mut buf = Vec::new();
        value.encode(&mut buf);
        let mut pos = 0;
        let decoded = Data::decode(&buf, &mut pos).expect("decode");
        prop_assert_eq!(pos, buf.len());
        prop_assert_eq!(decoded, value);
    }
}

#[test]
fn p1_nan_binary_roundtrip() {
    let value = Data::Real(f64::NAN);
    let mut buf = Vec::new();
    value.encode(&mut buf);
    let mut pos = 0;
    assert_eq!(Data::decode(&buf, &mut pos).unwrap(), value);
}

// ── P2: bitmap algebra ─────────────────────────────────────────────

proptest! {
    #[test]
    fn p2_union_commutes(a in bitmap_strategy(), b in bitmap_strategy()) {
        prop_assert_eq!(a.union(&b), b.union(&a));
    }

    #[test]
    fn p2_intersection_distributes(
        a in bitmap_strategy(),
        b in bitmap_strategy(),
        c in bitmap_strategy(),
    ) {
        let left = a.intersect(&b.union(&c));
        let right = a.intersect(&b).union(&a.intersect(&c));
        prop_assert_eq!(left, right);
    }

    #[test]
    fn p2_rank_counts_all(a in bitmap_strategy()) {
        match a.max_id() {
            Some(max) => prop_assert_eq!(a.count_ones(), a.rank(max + 1)),
            None => prop_assert_eq!(a.count_ones(), 0),
        }
    }

    #[test]
    fn p2_select_inverts_rank(a in bitmap_strategy()) {
        for n in 0..a.count_ones() {
            let pos = a.select(n).expect("nth set bit exists");
            prop_assert!(a.get(pos));
            prop_assert_eq!(a.rank(pos), n);
        }
    }
}

// ── P3: synopsis soundness ─────────────────────────────────────────

proptest! {
    #[test]
    fn p3_minmax_never_denies_a_match(
        values in prop::collection::vec(0u64..100, 1..32),
        probe in 0u64..100,
        op in order_op_strategy(),
    ) {
        let mut synopsis = Synopsis::for_type(&TypeKind::Count, &StoreConfig::default()).unwrap();
        for &v in &values {
            synopsis.add(&Data::Count(v));
        }
        let rhs = Data::Count(probe);
        let verdict = synopsis.lookup(op, &rhs);
        let matches = values.iter().filter(|&&v| eval_op(op, &Data::Count(v), &rhs)).count();
        if matches > 0 {
            prop_assert_ne!(verdict, Some(false), "denied {} matches", matches);
        }
        if verdict == Some(true) {
            prop_assert_eq!(matches, values.len(), "claimed all rows match");
        }
    }

    #[test]
    fn p3_bloom_never_denies_a_match(
        values in prop::collection::vec(string_strategy(), 1..32),
        probe in string_strategy(),
    ) {
        let mut synopsis = Synopsis::Bloom(
            evedb::synopsis::BloomSynopsis::new(64, 0.01),
        );
        for v in &values {
            synopsis.add(&Data::String(v.clone()));
        }
        let rhs = Data::String(probe.clone());
        if values.contains(&probe) {
            prop_assert_ne!(synopsis.lookup(RelOp::Equal, &rhs), Some(false));
        }
    }
}

// ── P4: index exactness ────────────────────────────────────────────

proptest! {
    #[test]
    fn p4_count_index_matches_scan(
        values in prop::collection::vec(prop::option::of(0u64..50), 0..48),
        probe in 0u64..50,
        op in order_op_strategy(),
    ) {
        let mut index = ValueIndex::for_type(&TypeKind::Count).unwrap();
        for v in &values {
            let cell = v.map(Data::Count).unwrap_or(Data::Nil);
            index.append(&cell).unwrap();
        }
        let rhs = Data::Count(probe);
        let got: Vec<u64> = index.lookup(op, &rhs).unwrap().ones().collect();
        let want: Vec<u64> = values
            .iter()
            .enumerate()
            .filter(|(_, v)| {
                let cell = v.map(Data::Count).unwrap_or(Data::Nil);
                eval_op(op, &cell, &rhs)
            })
            .map(|(i, _)| i as u64)
            .collect();
        prop_assert_eq!(got, want);
    }

    #[test]
    fn p4_string_index_matches_scan(
        values in prop::collection::vec(prop::option::of("[ab]{0,3}"), 0..32),
        probe in "[ab]{0,3}",
        negate in any::<bool>(),
    ) {
        let mut index = ValueIndex::for_type(&TypeKind::String).unwrap();
        for v in &values {
            let cell = v.clone().map(Data::String).unwrap_or(Data::Nil);
            index.append(&cell).unwrap();
        }
        let op = if negate { RelOp::NotEqual } else { RelOp::Equal };
        let rhs = Data::String(probe.clone());
        let got: Vec<u64> = index.lookup(op, &rhs).unwrap().ones().collect();
        let want: Vec<u64> = values
            .iter()
            .enumerate()
            .filter(|(_, v)| {
                let cell = (*v).clone().map(Data::String).unwrap_or(Data::Nil);
                eval_op(op, &cell, &rhs)
            })
            .map(|(i, _)| i as u64)
            .collect();
        prop_assert_eq!(got, want);
    }

    #[test]
    fn p4_address_index_subnet_matches_scan(
        values in prop::collection::vec(address_strategy(), 0..24),
        net in subnet_strategy(),
    ) {
        let mut index = ValueIndex::for_type(&TypeKind::Address).unwrap();
        for v in &values {
            index.append(&Data::Address(*v)).unwrap();
        }
        let rhs = Data::Subnet(net);
        let got: Vec<u64> = index.lookup(RelOp::In, &rhs).unwrap().ones().collect();
        let want: Vec<u64> = values
            .iter()
            .enumerate()
            .filter(|(_, v)| eval_op(RelOp::In, &Data::Address(**v), &rhs))
            .map(|(i, _)| i as u64)
            .collect();
        prop_assert_eq!(got, want);
    }
}

// ── P5: segment linearity ──────────────────────────────────────────

proptest! {
    #[test]
    fn p5_segment_offsets_partition_ids(
        row_counts in prop::collection::vec(1u64..5, 1..8),
        gaps in prop::collection::vec(0u64..3, 1..8),
    ) {
        let layout = Type::record(
            "p5.event",
            vec![RecordField::new("n", Type::new(TypeKind::Count))],
        )
        .flatten()
        .unwrap();
        let mut builder = evedb::SegmentBuilder::new(Uuid::from_u128(5));
        let mut offset = 0u64;
        let mut ranges = Vec::new();
        for (rows, gap) in row_counts.iter().zip(gaps.iter().cycle()) {
            offset += gap;
            let mut sb = SliceBuilder::new(layout.clone());
            for i in 0..*rows {
                sb.add(Data::Count(i)).unwrap();
            }
            let mut slice = sb.finish().unwrap();
            slice.set_offset(offset);
            builder.add(&slice).unwrap();
            ranges.push((offset, offset + rows));
            offset += rows;
        }
        let segment = evedb::Segment::from_chunk(builder.finish()).unwrap();

        // Strictly increasing, non-overlapping coverage.
        for window in ranges.windows(2) {
            prop_assert!(window[0].1 <= window[1].0);
        }
        // Every covered id selects exactly the slice that owns it.
        for (i, (begin, end)) in ranges.iter().enumerate() {
            for id in *begin..*end {
                let ids: Bitmap = [id].into_iter().collect();
                let hits = segment.lookup(&ids).unwrap();
                prop_assert_eq!(hits.len(), 1);
                prop_assert_eq!(hits[0].offset(), ranges[i].0);
            }
        }
    }
}

// ── P6 & P7: partition consistency and pipeline equivalence ────────

fn count_partition(fs: &FsHandle, values: &[u64]) -> PassivePartition {
    let layout = Type::record(
        "prop.event",
        vec![RecordField::new("n", Type::new(TypeKind::Count))],
    )
    .flatten()
    .unwrap();
    let uuid = Uuid::new_v4();
    let mut active = ActivePartition::new(uuid, 0, StoreConfig::default());
    let mut builder = SliceBuilder::new(layout);
    for &v in values {
        builder.add(Data::Count(v)).unwrap();
    }
    active.add(builder.finish().unwrap()).unwrap();
    active.seal(fs).unwrap();
    PassivePartition::load(fs, uuid).unwrap()
}

fn expression_strategy() -> impl Strategy<Value = Expression> {
    let leaf = (order_op_strategy(), 0u64..20).prop_map(|(op, probe)| {
        Expression::pred(Extractor::Field("n".into()), op, Data::Count(probe))
    });
    leaf.prop_recursive(3, 12, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 1..3).prop_map(Expression::and),
            prop::collection::vec(inner.clone(), 1..3).prop_map(Expression::or),
            inner.prop_map(Expression::not),
        ]
    })
}

/// Reference semantics: evaluate the expression row by row.
fn reference_eval(expr: &Expression, values: &[u64]) -> Vec<u64> {
    fn holds(expr: &Expression, value: &Data) -> bool {
        match expr {
            Expression::Predicate(p) => match &p.lhs {
                Extractor::Field(name) if name == "n" => eval_op(p.op, value, &p.rhs),
                _ => false,
            },
            Expression::Conjunction(xs) => xs.iter().all(|x| holds(x, value)),
            Expression::Disjunction(xs) => xs.iter().any(|x| holds(x, value)),
            Expression::Negation(x) => !holds(x, value),
        }
    }
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| holds(expr, &Data::Count(**v)))
        .map(|(i, _)| i as u64)
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn p6_lookup_stable_across_reload(
        values in prop::collection::vec(0u64..20, 1..32),
        probe in 0u64..20,
        op in order_op_strategy(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let fs = FsHandle::spawn(dir.path().to_path_buf());
        let part = count_partition(&fs, &values);
        let expr = Expression::pred(Extractor::Field("n".into()), op, Data::Count(probe));

        let first = part.lookup(&expr).unwrap();
        let reloaded = PassivePartition::load(&fs, part.uuid()).unwrap();
        let second = reloaded.lookup(&expr).unwrap();
        prop_assert_eq!(
            first.ones().collect::<Vec<_>>(),
            second.ones().collect::<Vec<_>>()
        );

        let want: Vec<u64> = values
            .iter()
            .enumerate()
            .filter(|(_, &v)| eval_op(op, &Data::Count(v), &Data::Count(probe)))
            .map(|(i, _)| i as u64)
            .collect();
        prop_assert_eq!(first.ones().collect::<Vec<_>>(), want);
    }

    #[test]
    fn p7_normalization_preserves_meaning(
        values in prop::collection::vec(0u64..20, 1..24),
        expr in expression_strategy(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let fs = FsHandle::spawn(dir.path().to_path_buf());
        let part = count_partition(&fs, &values);

        let raw = part.lookup(&expr).unwrap();
        let normalized = part.lookup(&expr.clone().normalize()).unwrap();
        prop_assert_eq!(
            raw.ones().collect::<Vec<_>>(),
            normalized.ones().collect::<Vec<_>>()
        );
        prop_assert_eq!(raw.ones().collect::<Vec<_>>(), reference_eval(&expr, &values));
    }
}
