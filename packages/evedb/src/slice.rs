//! Columnar event batches.
//!
//! A [`TableSlice`] is an immutable batch of events sharing one flattened
//! record layout. A [`SliceBuilder`] accepts cells in row-major column
//! order and produces finished slices.
//!
//! Binary format (encoding `"col0"`):
//! ```text
//! [encoding: 4 bytes]
//! [layout_json_len: u32 LE] [layout: json bytes]
//! [offset: u64 LE] [rows: u64 LE]
//! [cells: column-major, rows x Data binary form per column]
//! ```
//!
//! The encoding tag leads the payload so deserializers can dispatch
//! without knowing the slice type in advance. New encodings register at
//! process start by extending the dispatch in [`TableSlice::decode`];
//! there is no per-slice runtime extensibility.

use crate::data::{type_check, Data, Layout, TypeKind};
use crate::error::{Error, Result, ResultExt};

/// The native columnar encoding tag.
pub const ENCODING_COLUMNAR: [u8; 4] = *b"col0";

/// An immutable columnar batch of events of one layout.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSlice {
    layout: Layout,
    encoding: [u8; 4],
    offset: u64,
    rows: u64,
    /// `columns[col][row]`; `Data::Nil` marks an absent cell.
    columns: Vec<Vec<Data>>,
}

impl TableSlice {
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns.len()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Id of the first row. Assigned by the owning partition before the
    /// slice is shared.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    /// Typed cell access. Out-of-range coordinates are a programmer
    /// error, as is reading through an incompatible expected type.
    pub fn at(&self, row: u64, col: usize, expected: Option<&TypeKind>) -> &Data {
        debug_assert!(row < self.rows, "row {} out of range", row);
        debug_assert!(col < self.columns.len(), "column {} out of range", col);
        let cell = &self.columns[col][row as usize];
        if let Some(kind) = expected {
            debug_assert!(
                type_check(kind, cell),
                "cell ({}, {}) is not a {:?}",
                row,
                col,
                kind
            );
        }
        cell
    }

    /// Full column by index.
    pub fn column(&self, col: usize) -> &[Data] {
        &self.columns[col]
    }

    /// Column index and cells for a field reference (dot-boundary suffix
    /// match against the layout).
    pub fn column_by_name(&self, name: &str) -> Option<(usize, &[Data])> {
        let hits = self.layout.resolve(name);
        let col = *hits.first()?;
        Some((col, &self.columns[col]))
    }

    pub fn encoding(&self) -> [u8; 4] {
        self.encoding
    }

    // ── Serialization ──────────────────────────────────────────────

    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&self.encoding);
        let layout_json = serde_json::to_vec(&self.layout)
            .map_err(|e| Error::Format(format!("cannot serialize layout: {}", e)))?;
        buf.extend_from_slice(&(layout_json.len() as u32).to_le_bytes());
        buf.extend_from_slice(&layout_json);
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.rows.to_le_bytes());
        for column in &self.columns {
            for cell in column {
                cell.encode(buf);
            }
        }
        Ok(())
    }

    /// Decode a slice, dispatching on the leading encoding tag.
    pub fn decode(bytes: &[u8]) -> Result<TableSlice> {
        if bytes.len() < 4 {
            return Err(Error::Format("table slice too small".into()));
        }
        let mut encoding = [0u8; 4];
        encoding.copy_from_slice(&bytes[0..4]);
        match encoding {
            ENCODING_COLUMNAR => Self::decode_columnar(&bytes[4..]),
            other => Err(Error::VersionMismatch(format!(
                "unknown slice encoding: {:?}",
                other
            ))),
        }
    }

    fn decode_columnar(bytes: &[u8]) -> Result<TableSlice> {
        let mut pos = 0usize;
        let need = |pos: usize, n: usize| {
            if pos + n > bytes.len() {
                Err(Error::Format("table slice truncated".into()))
            } else {
                Ok(())
            }
        };
        need(pos, 4)?;
        let layout_len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        pos += 4;
        need(pos, layout_len)?;
        let layout: Layout = serde_json::from_slice(&bytes[pos..pos + layout_len])
            .map_err(|e| Error::Format(format!("bad slice layout: {}", e)))?;
        pos += layout_len;
        need(pos, 16)?;
        let offset = u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap());
        let rows = u64::from_le_bytes(bytes[pos + 8..pos + 16].try_into().unwrap());
        pos += 16;
        let mut columns = Vec::with_capacity(layout.column_count());
        for (path, ty) in &layout.columns {
            let mut column = Vec::with_capacity(rows as usize);
            for row in 0..rows {
                let cell = Data::decode(bytes, &mut pos)
                    .ctx(&format!("{}[{}]", path, row))?;
                if !type_check(&ty.kind, &cell) {
                    return Err(Error::TypeClash(format!(
                        "cell {}[{}] does not match column type",
                        path, row
                    )));
                }
                column.push(cell);
            }
            columns.push(column);
        }
        if pos != bytes.len() {
            return Err(Error::Format("trailing bytes after table slice".into()));
        }
        Ok(TableSlice {
            layout,
            encoding: ENCODING_COLUMNAR,
            offset,
            rows,
            columns,
        })
    }
}

// ── Builder ────────────────────────────────────────────────────────

/// Accumulates cells in row-major column order and emits immutable
/// slices. Reusable: `finish` resets the builder.
#[derive(Debug)]
pub struct SliceBuilder {
    layout: Layout,
    columns: Vec<Vec<Data>>,
    cursor: usize,
}

impl SliceBuilder {
    pub fn new(layout: Layout) -> Self {
        let columns = vec![Vec::new(); layout.column_count()];
        Self { layout, columns, cursor: 0 }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Append one cell to the current row. Fails with a type clash when
    /// the value's tag is incompatible with the column's type after
    /// permitted widening (nil anywhere, enumeration text to ordinal).
    pub fn add(&mut self, value: Data) -> Result<()> {
        let (path, ty) = &self.layout.columns[self.cursor];
        let value = widen(&ty.kind, value)
            .map_err(|e| e.with_context(path))?;
        self.columns[self.cursor].push(value);
        self.cursor = (self.cursor + 1) % self.columns.len();
        Ok(())
    }

    /// Append a full row of cells.
    pub fn add_row(&mut self, row: Vec<Data>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::InvalidArgument(format!(
                "row has {} cells, layout {} has {} columns",
                row.len(),
                self.layout.name,
                self.columns.len()
            )));
        }
        for cell in row {
            self.add(cell)?;
        }
        Ok(())
    }

    /// Complete rows so far.
    pub fn rows(&self) -> u64 {
        self.columns.first().map_or(0, |c| c.len() as u64)
    }

    /// Finish the slice and reset the builder. Fails mid-row.
    pub fn finish(&mut self) -> Result<TableSlice> {
        if self.cursor != 0 {
            return Err(Error::InvalidArgument(format!(
                "incomplete row: {} of {} cells",
                self.cursor,
                self.columns.len()
            )));
        }
        let rows = self.rows();
        let columns = std::mem::replace(&mut self.columns, vec![Vec::new(); self.layout.column_count()]);
        Ok(TableSlice {
            layout: self.layout.clone(),
            encoding: ENCODING_COLUMNAR,
            offset: 0,
            rows,
            columns,
        })
    }
}

/// Apply permitted widening, then type-check.
fn widen(kind: &TypeKind, value: Data) -> Result<Data> {
    let value = match (kind, value) {
        // Enumeration columns accept symbol text.
        (TypeKind::Enumeration(fields), Data::String(s)) => {
            match fields.iter().position(|f| *f == s) {
                Some(ord) => Data::Enumeration(ord as u32),
                None => {
                    return Err(Error::Convert(format!("not an enumeration value: {}", s)))
                }
            }
        }
        (_, v) => v,
    };
    if !type_check(kind, &value) {
        return Err(Error::TypeClash(format!(
            "value {} does not fit column type",
            value
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{RecordField, Type};

    fn test_layout() -> Layout {
        Type::record(
            "test.event",
            vec![
                RecordField::new("ts", Type::new(TypeKind::Time)),
                RecordField::new("addr", Type::new(TypeKind::Address)),
                RecordField::new("port", Type::new(TypeKind::Count)),
            ],
        )
        .flatten()
        .unwrap()
    }

    fn sample_slice() -> TableSlice {
        let mut builder = SliceBuilder::new(test_layout());
        builder
            .add_row(vec![
                Data::Time("2011-08-12T13:00:36.349948Z".parse().unwrap()),
                Data::Address("147.32.84.165".parse().unwrap()),
                Data::Count(1027),
            ])
            .unwrap();
        builder
            .add_row(vec![
                Data::Time("2011-08-13T13:04:24.640406Z".parse().unwrap()),
                Data::Address("147.32.84.165".parse().unwrap()),
                Data::Count(1089),
            ])
            .unwrap();
        builder.finish().unwrap()
    }

    #[test]
    fn test_build_and_access() {
        let slice = sample_slice();
        assert_eq!(slice.rows(), 2);
        assert_eq!(slice.columns(), 3);
        assert_eq!(slice.layout().name, "test.event");
        assert_eq!(*slice.at(1, 2, Some(&TypeKind::Count)), Data::Count(1089));
    }

    #[test]
    fn test_builder_resets_after_finish() {
        let mut builder = SliceBuilder::new(test_layout());
        builder
            .add_row(vec![Data::Nil, Data::Nil, Data::Count(1)])
            .unwrap();
        let first = builder.finish().unwrap();
        assert_eq!(first.rows(), 1);
        assert_eq!(builder.rows(), 0);
        builder
            .add_row(vec![Data::Nil, Data::Nil, Data::Count(2)])
            .unwrap();
        let second = builder.finish().unwrap();
        assert_eq!(second.rows(), 1);
        assert_eq!(*second.at(0, 2, None), Data::Count(2));
    }

    #[test]
    fn test_type_clash_on_add() {
        let mut builder = SliceBuilder::new(test_layout());
        let err = builder.add(Data::Bool(true)).unwrap_err();
        match err {
            Error::TypeClash(msg) => assert!(msg.contains("ts")),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_nil_widening() {
        let mut builder = SliceBuilder::new(test_layout());
        builder
            .add_row(vec![Data::Nil, Data::Nil, Data::Nil])
            .unwrap();
        let slice = builder.finish().unwrap();
        assert!(slice.at(0, 0, None).is_nil());
    }

    #[test]
    fn test_enumeration_text_widening() {
        let layout = Type::record(
            "t",
            vec![RecordField::new(
                "proto",
                Type::new(TypeKind::Enumeration(vec!["tcp".into(), "udp".into()])),
            )],
        )
        .flatten()
        .unwrap();
        let mut builder = SliceBuilder::new(layout);
        builder.add(Data::String("udp".into())).unwrap();
        let slice = builder.finish().unwrap();
        assert_eq!(*slice.at(0, 0, None), Data::Enumeration(1));
    }

    #[test]
    fn test_finish_mid_row_fails() {
        let mut builder = SliceBuilder::new(test_layout());
        builder.add(Data::Nil).unwrap();
        assert!(builder.finish().is_err());
    }

    #[test]
    fn test_binary_roundtrip() {
        let mut slice = sample_slice();
        slice.set_offset(42);
        let mut buf = Vec::new();
        slice.encode(&mut buf).unwrap();
        let decoded = TableSlice::decode(&buf).unwrap();
        assert_eq!(decoded, slice);
        assert_eq!(decoded.offset(), 42);
    }

    #[test]
    fn test_decode_unknown_encoding() {
        let mut buf = Vec::new();
        sample_slice().encode(&mut buf).unwrap();
        buf[0..4].copy_from_slice(b"xxx0");
        match TableSlice::decode(&buf).unwrap_err() {
            Error::VersionMismatch(_) => {}
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_decode_truncated() {
        let mut buf = Vec::new();
        sample_slice().encode(&mut buf).unwrap();
        assert!(TableSlice::decode(&buf[..buf.len() - 3]).is_err());
    }

    #[test]
    fn test_column_by_name() {
        let slice = sample_slice();
        let (col, cells) = slice.column_by_name("port").unwrap();
        assert_eq!(col, 2);
        assert_eq!(cells[0], Data::Count(1027));
        assert!(slice.column_by_name("nope").is_none());
    }
}
