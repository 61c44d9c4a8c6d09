//! End-to-end scenarios: ingest, seal, query, pivot, erase, crash
//! safety, and predicate pushdown.

use std::io::Cursor;

use uuid::Uuid;

use evedb::data::{Attribute, RecordField, Timestamp};
use evedb::partition::{self, ActivePartition, PartitionState, PassivePartition};
use evedb::query;
use evedb::reader::csv::CsvReader;
use evedb::reader::Reader;
use evedb::{
    Chunk, Data, Error, Expression, Extractor, FsHandle, MetaExtractor, RelOp, Schema,
    SliceBuilder, StoreConfig, TableSlice, Type, TypeKind, Verbosity,
};

fn event_schema() -> Schema {
    let mut schema = Schema::new();
    schema
        .add(Type::record(
            "csv.event",
            vec![
                RecordField::new(
                    "ts",
                    Type::new(TypeKind::Time).with_attr(Attribute::new("timestamp")),
                ),
                RecordField::new("addr", Type::new(TypeKind::Address)),
                RecordField::new("port", Type::new(TypeKind::Count)),
            ],
        ))
        .unwrap();
    schema
}

fn csv_slices(input: &str) -> Vec<TableSlice> {
    let mut reader = CsvReader::new(Cursor::new(input.to_string()));
    reader.set_schema(event_schema()).unwrap();
    let mut slices = Vec::new();
    let (err, _) = reader.read(usize::MAX, 1024, &mut |slice| slices.push(slice));
    assert!(
        matches!(&err, Some(Error::EndOfInput(_))),
        "unexpected: {:?}",
        err.map(|e| e.to_string())
    );
    slices
}

/// Ingest the S1 CSV fixture into a sealed partition and load it back.
fn sealed_fixture(fs: &FsHandle) -> PassivePartition {
    let input = "ts,addr,port\n\
                 2011-08-12T13:00:36.349948Z,147.32.84.165,1027\n\
                 2011-08-13T13:04:24.640406Z,147.32.84.165,1089\n";
    let uuid = Uuid::new_v4();
    let mut active = ActivePartition::new(uuid, 0, StoreConfig::default());
    for slice in csv_slices(input) {
        active.add(slice).unwrap();
    }
    let meta = active.seal(fs).unwrap();
    assert_eq!(meta.rows, 2);
    PassivePartition::load(fs, uuid).unwrap()
}

fn field_pred(name: &str, op: RelOp, rhs: Data) -> Expression {
    Expression::pred(Extractor::Field(name.into()), op, rhs)
}

#[test]
fn s1_csv_ingest_then_query() {
    let dir = tempfile::tempdir().unwrap();
    let fs = FsHandle::spawn(dir.path().to_path_buf());
    let part = sealed_fixture(&fs);

    let expr = field_pred("port", RelOp::Greater, Data::Count(1028));
    let ids = part.lookup(&expr).unwrap();
    assert_eq!(ids.ones().collect::<Vec<_>>(), vec![1]);

    let slices = part.evaluate(&expr).unwrap();
    assert_eq!(slices.len(), 1);
    let rows = query::matching_rows(&slices[0], &ids);
    assert_eq!(rows, vec![1]);
    assert_eq!(*slices[0].at(1, 2, None), Data::Count(1089));
}

#[test]
fn s2_address_equivalence() {
    let dir = tempfile::tempdir().unwrap();
    let fs = FsHandle::spawn(dir.path().to_path_buf());

    let uuid = Uuid::new_v4();
    let mut active = ActivePartition::new(uuid, 0, StoreConfig::default());
    let layout = Type::record(
        "net.host",
        vec![RecordField::new("addr", Type::new(TypeKind::Address))],
    )
    .flatten()
    .unwrap();
    let mut builder = SliceBuilder::new(layout);
    builder
        .add(Data::Address("127.0.0.1".parse().unwrap()))
        .unwrap();
    active.add(builder.finish().unwrap()).unwrap();
    active.seal(&fs).unwrap();
    let part = PassivePartition::load(&fs, uuid).unwrap();

    // v4-mapped form matches the stored v4 address.
    let eq = field_pred(
        "addr",
        RelOp::Equal,
        Data::Address("::ffff:127.0.0.1".parse().unwrap()),
    );
    assert_eq!(part.lookup(&eq).unwrap().ones().collect::<Vec<_>>(), vec![0]);

    let within = field_pred(
        "addr",
        RelOp::In,
        Data::Subnet("127.0.0.0/8".parse().unwrap()),
    );
    assert_eq!(
        part.lookup(&within).unwrap().ones().collect::<Vec<_>>(),
        vec![0]
    );

    let outside = field_pred(
        "addr",
        RelOp::In,
        Data::Subnet("10.0.0.0/8".parse().unwrap()),
    );
    assert!(part.lookup(&outside).unwrap().ones().next().is_none());
}

#[test]
fn s3_pivot_heuristic() {
    let dir = tempfile::tempdir().unwrap();
    let fs = FsHandle::spawn(dir.path().to_path_buf());

    let uuid = Uuid::new_v4();
    let mut active = ActivePartition::new(uuid, 0, StoreConfig::default());
    let layout = Type::record(
        "zeek.http",
        vec![
            RecordField::new("uid", Type::new(TypeKind::String)),
            RecordField::new("status_code", Type::new(TypeKind::Count)),
        ],
    )
    .flatten()
    .unwrap();
    let mut builder = SliceBuilder::new(layout);
    for (uid, status) in [("A", 200u64), ("B", 404), ("A", 500)] {
        builder.add(Data::String(uid.into())).unwrap();
        builder.add(Data::Count(status)).unwrap();
    }
    active.add(builder.finish().unwrap()).unwrap();
    active.seal(&fs).unwrap();
    let part = PassivePartition::load(&fs, uuid).unwrap();

    let source = Expression::pred(
        Extractor::Meta(MetaExtractor::Type),
        RelOp::Equal,
        Data::String("zeek.http".into()),
    );
    let follow_up = query::pivot(&part, "zeek.conn", &source).unwrap();

    let want = Expression::and(vec![
        Expression::pred(
            Extractor::Meta(MetaExtractor::Type),
            RelOp::Equal,
            Data::String("zeek.conn".into()),
        ),
        field_pred(
            "uid",
            RelOp::In,
            Data::List(vec![Data::String("A".into()), Data::String("B".into())]),
        ),
    ]);
    assert_eq!(follow_up, want);
}

#[test]
fn s4_passive_partition_erase() {
    let dir = tempfile::tempdir().unwrap();
    let fs = FsHandle::spawn(dir.path().to_path_buf());
    let mut part = sealed_fixture(&fs);
    let uuid = part.uuid();

    part.erase(&fs).unwrap();
    assert_eq!(part.state(), PartitionState::Erased);

    for file in ["segment.bin", "indexes.bin", "synopses.bin", "meta.json"] {
        let path = format!("partitions/{}/{}", uuid, file);
        match fs.read(path).unwrap_err() {
            Error::NoSuchFile(_) => {}
            other => panic!("unexpected error: {}", other),
        }
    }

    let status = part.status(Verbosity::Debug);
    match &status {
        Data::Record(fields) => {
            let state = fields.iter().find(|(n, _)| n == "state").unwrap();
            assert_eq!(state.1, Data::String("erased".into()));
        }
        other => panic!("unexpected status: {}", other),
    }

    // Terminal state: every subsequent operation errors.
    let expr = field_pred("port", RelOp::Equal, Data::Count(1027));
    assert!(part.lookup(&expr).is_err());
    assert!(part.evaluate(&expr).is_err());
    assert!(part.erase(&fs).is_err());
}

#[test]
fn s5_failed_seal_leaves_no_partition() {
    let dir = tempfile::tempdir().unwrap();
    let fs = FsHandle::spawn(dir.path().to_path_buf());

    let uuid = Uuid::new_v4();
    let mut active = ActivePartition::new(uuid, 0, StoreConfig::default());
    for slice in csv_slices(
        "ts,addr,port\n2011-08-12T13:00:36.349948Z,147.32.84.165,1027\n",
    ) {
        active.add(slice).unwrap();
    }
    // Make the final meta.json write fail: a directory squats on its
    // path.
    let meta_path = dir
        .path()
        .join("partitions")
        .join(uuid.to_string())
        .join("meta.json");
    std::fs::create_dir_all(&meta_path).unwrap();

    assert!(active.seal(&fs).is_err());

    // The failed seal cleaned up; nothing is scanned, nothing loads.
    assert!(partition::scan(dir.path()).unwrap().is_empty());
    assert!(PassivePartition::load(&fs, uuid).is_err());
}

#[test]
fn s5_orphan_directories_skipped_and_collected() {
    let dir = tempfile::tempdir().unwrap();
    let fs = FsHandle::spawn(dir.path().to_path_buf());
    let part = sealed_fixture(&fs);

    // A partial directory without meta.json, as an interrupted seal
    // would leave it.
    let orphan = Uuid::new_v4();
    fs.write(
        format!("partitions/{}/segment.bin", orphan),
        Chunk::from_vec(vec![0u8; 8]),
    )
    .unwrap();

    let seen = partition::scan(dir.path()).unwrap();
    assert_eq!(seen, vec![part.uuid()].into_iter().collect::<Vec<_>>());

    let removed = partition::gc_orphans(dir.path()).unwrap();
    assert_eq!(removed.len(), 1);
    assert!(!fs.check(format!("partitions/{}", orphan)).unwrap());
    // The sealed partition survives collection.
    assert_eq!(partition::scan(dir.path()).unwrap(), vec![part.uuid()]);
}

#[test]
fn s6_synopsis_short_circuits_index() {
    let dir = tempfile::tempdir().unwrap();
    let fs = FsHandle::spawn(dir.path().to_path_buf());
    let part = sealed_fixture(&fs);
    assert_eq!(part.index_lookups(), 0);

    // Ports range over [1027, 1089]; 5 is outside, so the min/max
    // synopsis answers and the value index must stay cold.
    let miss = field_pred("port", RelOp::Equal, Data::Count(5));
    assert!(part.lookup(&miss).unwrap().ones().next().is_none());
    assert_eq!(part.index_lookups(), 0);

    // An in-range probe falls through to the index.
    let hit = field_pred("port", RelOp::Equal, Data::Count(1089));
    assert_eq!(part.lookup(&hit).unwrap().ones().collect::<Vec<_>>(), vec![1]);
    assert!(part.index_lookups() > 0);
}

#[test]
fn meta_extractors() {
    let dir = tempfile::tempdir().unwrap();
    let fs = FsHandle::spawn(dir.path().to_path_buf());
    let part = sealed_fixture(&fs);

    // #type selects by layout name.
    let by_type = Expression::pred(
        Extractor::Meta(MetaExtractor::Type),
        RelOp::Equal,
        Data::String("csv.event".into()),
    );
    assert_eq!(part.lookup(&by_type).unwrap().count_ones(), 2);

    let wrong_type = Expression::pred(
        Extractor::Meta(MetaExtractor::Type),
        RelOp::Equal,
        Data::String("zeek.conn".into()),
    );
    assert_eq!(part.lookup(&wrong_type).unwrap().count_ones(), 0);

    // #time resolves to the timestamp column.
    let after = Expression::pred(
        Extractor::Meta(MetaExtractor::Time),
        RelOp::Greater,
        Data::Time("2011-08-13T00:00:00Z".parse().unwrap()),
    );
    assert_eq!(part.lookup(&after).unwrap().ones().collect::<Vec<_>>(), vec![1]);

    // #import_time is partition-level: all or nothing.
    let old = Expression::pred(
        Extractor::Meta(MetaExtractor::ImportTime),
        RelOp::Greater,
        Data::Time(Timestamp(0)),
    );
    assert_eq!(part.lookup(&old).unwrap().count_ones(), 2);

    // A type extractor matches all columns of the kind.
    let any_address = Expression::pred(
        Extractor::Type(TypeKind::Address),
        RelOp::Equal,
        Data::Address("147.32.84.165".parse().unwrap()),
    );
    assert_eq!(part.lookup(&any_address).unwrap().count_ones(), 2);

    // Unresolvable fields evaluate to the empty set.
    let ghost = field_pred("no_such_field", RelOp::Equal, Data::Count(1));
    assert_eq!(part.lookup(&ghost).unwrap().count_ones(), 0);
}

#[test]
fn boolean_combinations() {
    let dir = tempfile::tempdir().unwrap();
    let fs = FsHandle::spawn(dir.path().to_path_buf());
    let part = sealed_fixture(&fs);

    let both = Expression::and(vec![
        field_pred("port", RelOp::GreaterEqual, Data::Count(1027)),
        field_pred("port", RelOp::LessEqual, Data::Count(1089)),
    ]);
    assert_eq!(part.lookup(&both).unwrap().count_ones(), 2);

    let either = Expression::or(vec![
        field_pred("port", RelOp::Equal, Data::Count(1027)),
        field_pred("port", RelOp::Equal, Data::Count(1089)),
    ]);
    assert_eq!(part.lookup(&either).unwrap().count_ones(), 2);

    let negated = Expression::not(field_pred("port", RelOp::Equal, Data::Count(1027)));
    assert_eq!(
        part.lookup(&negated).unwrap().ones().collect::<Vec<_>>(),
        vec![1]
    );
}
