//! Immutable units of persisted, indexed data.
//!
//! An [`ActivePartition`] accepts table slices, streaming their cells
//! into per-column synopses and value indexes while the segment builder
//! accumulates the row data. `seal` persists everything as one
//! directory:
//!
//! ```text
//! partitions/<uuid>/
//!   segment.bin    segment bytes (VSEG)
//!   indexes.bin    framed { path, len, value index } sequence
//!   synopses.bin   framed { path, len, synopsis } sequence
//!   meta.json      uuid, schema, id range, row count, layout ranges
//! ```
//!
//! `meta.json` is written last; its absence marks a directory as not a
//! partition, which is what makes partial writes crash-safe. A
//! [`PassivePartition`] loads the directory by uuid and answers typed
//! lookups until erased.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::actor::Verbosity;
use crate::bitmap::Bitmap;
use crate::chunk::Chunk;
use crate::config::StoreConfig;
use crate::data::{Data, Layout, Schema, Timestamp};
use crate::error::{Error, Result, ResultExt};
use crate::expr::Expression;
use crate::filesystem::FsHandle;
use crate::index::ValueIndex;
use crate::query;
use crate::segment::{Segment, SegmentBuilder};
use crate::slice::{TableSlice, ENCODING_COLUMNAR};
use crate::synopsis::Synopsis;

/// Directory under the filesystem root holding sealed partitions.
pub const PARTITION_DIR: &str = "partitions";

const SEGMENT_FILE: &str = "segment.bin";
const INDEXES_FILE: &str = "indexes.bin";
const SYNOPSES_FILE: &str = "synopses.bin";
const META_FILE: &str = "meta.json";

/// The id span one layout occupies within a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutRange {
    pub layout: String,
    pub offset: u64,
    pub rows: u64,
}

/// Sidecar metadata persisted as `meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionMeta {
    pub uuid: Uuid,
    pub schema: Schema,
    pub id_begin: u64,
    pub id_end: u64,
    pub rows: u64,
    pub encoding: String,
    pub import_time: Timestamp,
    pub layouts: Vec<LayoutRange>,
}

fn partition_dir(uuid: Uuid) -> PathBuf {
    Path::new(PARTITION_DIR).join(uuid.to_string())
}

/// Qualified column path: layout name plus flattened column path.
fn qualify(layout: &str, column: &str) -> String {
    format!("{}.{}", layout, column)
}

// ── Active partition ───────────────────────────────────────────────

/// A partition still accepting slices.
pub struct ActivePartition {
    uuid: Uuid,
    config: StoreConfig,
    schema: Schema,
    builder: SegmentBuilder,
    synopses: BTreeMap<String, Synopsis>,
    indexes: BTreeMap<String, ValueIndex>,
    layouts: Vec<LayoutRange>,
    first_id: u64,
    next_id: u64,
}

impl ActivePartition {
    /// Create an empty active partition whose first event gets
    /// `first_id`.
    pub fn new(uuid: Uuid, first_id: u64, config: StoreConfig) -> Self {
        Self {
            uuid,
            config,
            schema: Schema::new(),
            builder: SegmentBuilder::new(uuid),
            synopses: BTreeMap::new(),
            indexes: BTreeMap::new(),
            layouts: Vec::new(),
            first_id,
            next_id: first_id,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn rows(&self) -> u64 {
        self.next_id - self.first_id
    }

    /// Whether the configured row capacity is reached.
    pub fn full(&self) -> bool {
        self.rows() >= self.config.partition_capacity
    }

    /// Ingest one slice: assign its offset, feed the segment builder,
    /// and stream every cell into the column synopses and indexes.
    ///
    /// The slice stream must come from a single upstream; interleaving
    /// writers on one active partition is a programmer error.
    pub fn add(&mut self, mut slice: TableSlice) -> Result<()> {
        slice.set_offset(self.next_id);
        let layout = slice.layout().clone();
        self.schema.merge(&schema_of(&layout)?)?;
        let relative = self.next_id - self.first_id;

        self.builder.add(&slice)?;

        for (col, (path, ty)) in layout.columns.iter().enumerate() {
            let qualified = qualify(&layout.name, path);
            if !self.synopses.contains_key(&qualified) {
                if let Some(fresh) = Synopsis::for_type(&ty.kind, &self.config) {
                    self.synopses.insert(qualified.clone(), fresh);
                }
            }
            if !self.indexes.contains_key(&qualified) {
                if let Some(fresh) = ValueIndex::for_type(&ty.kind) {
                    self.indexes.insert(qualified.clone(), fresh);
                }
            }
            if let Some(synopsis) = self.synopses.get_mut(&qualified) {
                for row in 0..slice.rows() {
                    synopsis.add(slice.at(row, col, None));
                }
            }
            if let Some(index) = self.indexes.get_mut(&qualified) {
                // Late-created indexes pad up to the slice start so
                // bitmaps stay aligned with partition-relative row ids.
                while index.rows() < relative {
                    index.append(&Data::Nil)?;
                }
                for row in 0..slice.rows() {
                    index.append(slice.at(row, col, None)).ctx(&qualified)?;
                }
            }
        }

        self.layouts.push(LayoutRange {
            layout: layout.name.clone(),
            offset: self.next_id,
            rows: slice.rows(),
        });
        self.next_id += slice.rows();
        Ok(())
    }

    /// Build the partition directory through the filesystem actor.
    /// `meta.json` goes last; on failure the partial directory is
    /// removed best-effort and the error surfaces.
    pub fn seal(mut self, fs: &FsHandle) -> Result<PartitionMeta> {
        let meta = PartitionMeta {
            uuid: self.uuid,
            schema: self.schema.clone(),
            id_begin: self.first_id,
            id_end: self.next_id,
            rows: self.rows(),
            encoding: String::from_utf8_lossy(&ENCODING_COLUMNAR).into_owned(),
            import_time: Timestamp::now(),
            layouts: self.layouts.clone(),
        };
        let dir = partition_dir(self.uuid);
        let result = (|| -> Result<()> {
            let segment = self.builder.finish();
            fs.write(dir.join(SEGMENT_FILE), segment).ctx("segment")?;

            let mut buf = Vec::new();
            encode_framed(&mut buf, &self.indexes, |buf, index| index.encode(buf));
            fs.write(dir.join(INDEXES_FILE), Chunk::from_vec(buf)).ctx("indexes")?;

            let mut buf = Vec::new();
            encode_framed(&mut buf, &self.synopses, |buf, synopsis| synopsis.encode(buf));
            fs.write(dir.join(SYNOPSES_FILE), Chunk::from_vec(buf)).ctx("synopses")?;

            let json = serde_json::to_vec_pretty(&meta)
                .map_err(|e| Error::Format(format!("cannot serialize meta: {}", e)))?;
            fs.write(dir.join(META_FILE), Chunk::from_vec(json)).ctx("meta")?;
            Ok(())
        })();
        match result {
            Ok(()) => {
                tracing::debug!(uuid = %self.uuid, rows = meta.rows, "sealed partition");
                Ok(meta)
            }
            Err(e) => {
                // Leave no partial directory behind if we can help it.
                let _ = fs.erase(dir);
                Err(e.with_context(&format!("seal {}", self.uuid)))
            }
        }
    }
}

/// Reconstruct a record type from a flattened layout. Leaf paths keep
/// their dots as field names; flattening the result is the identity.
fn schema_of(layout: &Layout) -> Result<Schema> {
    let fields = layout
        .columns
        .iter()
        .map(|(path, ty)| crate::data::RecordField::new(path, ty.clone()))
        .collect();
    let mut schema = Schema::new();
    schema.add(crate::data::Type::record(&layout.name, fields))?;
    Ok(schema)
}

fn encode_framed<T>(
    buf: &mut Vec<u8>,
    entries: &BTreeMap<String, T>,
    encode: impl Fn(&mut Vec<u8>, &T),
) {
    buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for (path, entry) in entries {
        buf.extend_from_slice(&(path.len() as u16).to_le_bytes());
        buf.extend_from_slice(path.as_bytes());
        let mut body = Vec::new();
        encode(&mut body, entry);
        buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        buf.extend_from_slice(&body);
    }
}

fn decode_framed<T>(
    bytes: &[u8],
    decode: impl Fn(&[u8], &mut usize) -> Result<T>,
) -> Result<BTreeMap<String, T>> {
    let mut pos = 0usize;
    if bytes.len() < 4 {
        return Err(Error::Format("framed file too small".into()));
    }
    let n = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    pos += 4;
    let mut out = BTreeMap::new();
    for _ in 0..n {
        if pos + 2 > bytes.len() {
            return Err(Error::Format("framed entry truncated".into()));
        }
        let path_len = u16::from_le_bytes(bytes[pos..pos + 2].try_into().unwrap()) as usize;
        pos += 2;
        if pos + path_len + 4 > bytes.len() {
            return Err(Error::Format("framed entry truncated".into()));
        }
        let path = std::str::from_utf8(&bytes[pos..pos + path_len])
            .map_err(|_| Error::Format("framed path not UTF-8".into()))?
            .to_string();
        pos += path_len;
        let body_len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        if pos + body_len > bytes.len() {
            return Err(Error::Format("framed body truncated".into()));
        }
        let mut body_pos = pos;
        let entry = decode(&bytes[..pos + body_len], &mut body_pos).ctx(&path)?;
        if body_pos != pos + body_len {
            return Err(Error::Format(format!("framed body length mismatch for {}", path)));
        }
        pos += body_len;
        out.insert(path, entry);
    }
    if pos != bytes.len() {
        return Err(Error::Format("trailing bytes in framed file".into()));
    }
    Ok(out)
}

// ── Passive partition ──────────────────────────────────────────────

/// Load state of a passive partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    WaitingForChunk,
    Loading,
    Ready,
    Erased,
}

impl PartitionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionState::WaitingForChunk => "waiting for chunk",
            PartitionState::Loading => "loading",
            PartitionState::Ready => "ready",
            PartitionState::Erased => "erased",
        }
    }
}

/// A sealed partition loaded for querying.
pub struct PassivePartition {
    meta: PartitionMeta,
    segment: Segment,
    synopses: BTreeMap<String, Synopsis>,
    indexes: BTreeMap<String, ValueIndex>,
    state: PartitionState,
    index_lookups: AtomicU64,
}

impl PassivePartition {
    /// Load a partition by uuid through the filesystem actor. The
    /// segment is memory-mapped; indexes and synopses deserialize
    /// eagerly.
    pub fn load(fs: &FsHandle, uuid: Uuid) -> Result<Self> {
        let dir = partition_dir(uuid);

        let meta_chunk = fs
            .read(dir.join(META_FILE))
            .ctx(&format!("partition {}", uuid))?;
        let meta: PartitionMeta = serde_json::from_slice(meta_chunk.as_bytes())
            .map_err(|e| Error::Format(format!("partition {}: bad meta.json: {}", uuid, e)))?;
        if meta.uuid != uuid {
            return Err(Error::Format(format!(
                "partition {}: meta.json claims uuid {}",
                uuid, meta.uuid
            )));
        }

        let segment_chunk = fs.mmap(dir.join(SEGMENT_FILE)).ctx(&format!("partition {}", uuid))?;
        let segment = Segment::from_chunk(segment_chunk).ctx(&format!("partition {}", uuid))?;
        if segment.uuid() != uuid {
            return Err(Error::Format(format!(
                "partition {}: segment claims uuid {}",
                uuid,
                segment.uuid()
            )));
        }

        let index_chunk = fs.read(dir.join(INDEXES_FILE)).ctx(&format!("partition {}", uuid))?;
        let indexes = decode_framed(index_chunk.as_bytes(), ValueIndex::decode)
            .ctx(&format!("partition {} indexes", uuid))?;

        let synopsis_chunk =
            fs.read(dir.join(SYNOPSES_FILE)).ctx(&format!("partition {}", uuid))?;
        let synopses = decode_framed(synopsis_chunk.as_bytes(), Synopsis::decode)
            .ctx(&format!("partition {} synopses", uuid))?;

        Ok(Self {
            meta,
            segment,
            synopses,
            indexes,
            state: PartitionState::Ready,
            index_lookups: AtomicU64::new(0),
        })
    }

    pub fn uuid(&self) -> Uuid {
        self.meta.uuid
    }

    pub fn meta(&self) -> &PartitionMeta {
        &self.meta
    }

    pub fn schema(&self) -> &Schema {
        &self.meta.schema
    }

    pub fn state(&self) -> PartitionState {
        self.state
    }

    pub fn rows(&self) -> u64 {
        self.meta.rows
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Flattened layouts with their id ranges.
    pub fn layout_ranges(&self) -> Result<Vec<(Layout, LayoutRange)>> {
        self.meta
            .layouts
            .iter()
            .map(|range| {
                let ty = self.meta.schema.find(&range.layout).ok_or_else(|| {
                    Error::Format(format!(
                        "partition {}: layout {} missing from schema",
                        self.meta.uuid, range.layout
                    ))
                })?;
                Ok((ty.flatten()?, range.clone()))
            })
            .collect()
    }

    /// All ids this partition covers, as an absolute bitmap.
    pub fn ids(&self) -> Bitmap {
        let mut bm = Bitmap::zeroes(self.meta.id_begin);
        bm.append_bits(true, self.meta.id_end - self.meta.id_begin);
        bm
    }

    pub fn synopsis(&self, qualified: &str) -> Option<&Synopsis> {
        self.synopses.get(qualified)
    }

    /// Value index for a qualified column path. Each call counts toward
    /// the partition's index-lookup telemetry.
    pub fn index(&self, qualified: &str) -> Option<&ValueIndex> {
        let index = self.indexes.get(qualified);
        if index.is_some() {
            self.index_lookups.fetch_add(1, Ordering::Relaxed);
        }
        index
    }

    /// Cumulative count of value-index consultations.
    pub fn index_lookups(&self) -> u64 {
        self.index_lookups.load(Ordering::Relaxed)
    }

    /// First id of the partition; index bitmaps are relative to it.
    pub fn id_begin(&self) -> u64 {
        self.meta.id_begin
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.state != PartitionState::Ready {
            return Err(Error::InvalidArgument(format!(
                "partition {} is {}",
                self.meta.uuid,
                self.state.as_str()
            )));
        }
        Ok(())
    }

    /// Ids matching an expression.
    pub fn lookup(&self, expr: &Expression) -> Result<Bitmap> {
        self.ensure_ready()?;
        query::evaluate_bitmap(self, expr)
    }

    /// Slices containing rows that match an expression.
    pub fn evaluate(&self, expr: &Expression) -> Result<Vec<TableSlice>> {
        self.ensure_ready()?;
        let ids = query::evaluate_bitmap(self, expr)?;
        self.segment.lookup(&ids)
    }

    /// Delete the backing directory and enter the terminal state.
    pub fn erase(&mut self, fs: &FsHandle) -> Result<()> {
        self.ensure_ready()?;
        fs.erase(partition_dir(self.meta.uuid))?;
        self.state = PartitionState::Erased;
        Ok(())
    }

    pub fn status(&self, verbosity: Verbosity) -> Data {
        let mut fields: Vec<(String, Data)> = vec![
            ("type".into(), Data::String("partition".into())),
            ("state".into(), Data::String(self.state.as_str().into())),
        ];
        if verbosity >= Verbosity::Info {
            fields.push(("uuid".into(), Data::String(self.meta.uuid.to_string())));
            fields.push(("rows".into(), Data::Count(self.meta.rows)));
        }
        if verbosity >= Verbosity::Detailed {
            fields.push(("id_begin".into(), Data::Count(self.meta.id_begin)));
            fields.push(("id_end".into(), Data::Count(self.meta.id_end)));
            fields.push((
                "layouts".into(),
                Data::List(
                    self.meta
                        .layouts
                        .iter()
                        .map(|r| Data::String(r.layout.clone()))
                        .collect(),
                ),
            ));
        }
        if verbosity >= Verbosity::Debug {
            fields.push(("import_time".into(), Data::Time(self.meta.import_time)));
            fields.push(("index_lookups".into(), Data::Count(self.index_lookups())));
            fields.push((
                "synopsis_bytes".into(),
                Data::Count(self.synopses.values().map(|s| s.mem_usage() as u64).sum()),
            ));
        }
        Data::Record(fields)
    }
}

// ── Scan & GC ──────────────────────────────────────────────────────

/// Enumerate valid partition uuids under `root`. Directories without a
/// `meta.json` or with unparsable names are skipped.
pub fn scan(root: &Path) -> Result<Vec<Uuid>> {
    let dir = root.join(PARTITION_DIR);
    let mut out = Vec::new();
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(Error::Io(e)),
    };
    for entry in entries {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        let Ok(uuid) = entry.file_name().to_string_lossy().parse::<Uuid>() else {
            tracing::warn!(path = %entry.path().display(), "skipping non-uuid partition dir");
            continue;
        };
        if entry.path().join(META_FILE).is_file() {
            out.push(uuid);
        }
    }
    out.sort();
    Ok(out)
}

/// Remove partition directories without a `meta.json` (interrupted
/// seals). Returns the removed paths. Run once on startup.
pub fn gc_orphans(root: &Path) -> Result<Vec<PathBuf>> {
    let dir = root.join(PARTITION_DIR);
    let mut removed = Vec::new();
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
        Err(e) => return Err(Error::Io(e)),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() && !path.join(META_FILE).is_file() {
            tracing::warn!(path = %path.display(), "removing orphaned partition dir");
            std::fs::remove_dir_all(&path)?;
            removed.push(path);
        }
    }
    Ok(removed)
}
