//! CSV reader.
//!
//! The first line is a header naming the columns. The header picks the
//! layout: the first schema record type whose flattened columns cover
//! every header name. Without a schema match, all columns degrade to
//! strings under a synthetic `csv.unknown` layout.
//!
//! Per-record parse failures are skipped with a log entry; stream-level
//! failures surface to the caller. Map-typed columns are rejected with
//! a format error.

use std::io::BufRead;

use crate::data::{Data, Layout, RecordField, Schema, Type, TypeKind};
use crate::error::{Error, Result, ResultExt};
use crate::reader::Reader;
use crate::slice::{SliceBuilder, TableSlice};

/// Layout name used when no schema type matches the header.
const FALLBACK_LAYOUT: &str = "csv.unknown";

/// CSV over any buffered input.
pub struct CsvReader<R: BufRead> {
    input: R,
    schema: Schema,
    separator: char,
    /// Selected layout plus header-position to column mapping, set up
    /// after the header line arrives.
    plan: Option<Plan>,
    exhausted: bool,
}

struct Plan {
    layout: Layout,
    /// `columns[i]` is the layout column fed by header position `i`.
    columns: Vec<usize>,
}

impl<R: BufRead> CsvReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            schema: Schema::new(),
            separator: ',',
            plan: None,
            exhausted: false,
        }
    }

    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    fn next_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.input.read_line(&mut line)?;
            if n == 0 {
                return Ok(None);
            }
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
    }

    /// Split one line on the separator, honoring double quotes with
    /// `""` escapes.
    fn split(&self, line: &str) -> Vec<String> {
        let mut fields = Vec::new();
        let mut current = String::new();
        let mut quoted = false;
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            if quoted {
                if c == '"' {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        current.push('"');
                    } else {
                        quoted = false;
                    }
                } else {
                    current.push(c);
                }
            } else if c == '"' && current.is_empty() {
                quoted = true;
            } else if c == self.separator {
                fields.push(std::mem::take(&mut current));
            } else {
                current.push(c);
            }
        }
        fields.push(current);
        fields
    }

    /// Pick the layout for a header: the first schema type resolving
    /// every header name, else the all-strings fallback.
    fn plan_for(&self, header: &[String]) -> Result<Plan> {
        for layout in self.schema.layouts()? {
            let mut columns = Vec::with_capacity(header.len());
            let mut all = true;
            for name in header {
                let hits = layout.resolve(name);
                match hits.as_slice() {
                    [col] => columns.push(*col),
                    _ => {
                        all = false;
                        break;
                    }
                }
            }
            if all {
                for &col in &columns {
                    if matches!(layout.columns[col].1.kind, TypeKind::Map(_, _)) {
                        return Err(Error::Format(format!(
                            "column {} has a map type, which the CSV reader does not support",
                            layout.columns[col].0
                        )));
                    }
                }
                return Ok(Plan { layout, columns });
            }
        }
        let fields = header
            .iter()
            .map(|name| RecordField::new(name, Type::new(TypeKind::String)))
            .collect();
        let layout = Type::record(FALLBACK_LAYOUT, fields).flatten()?;
        let columns = (0..header.len()).collect();
        Ok(Plan { layout, columns })
    }

    /// Parse one data line into a full row of the planned layout.
    /// Unmapped layout columns read as nil; empty or `-` cells are nil.
    fn parse_row(&self, plan: &Plan, line: &str) -> Result<Vec<Data>> {
        let cells = self.split(line);
        if cells.len() != plan.columns.len() {
            return Err(Error::Parse(format!(
                "expected {} fields, got {}",
                plan.columns.len(),
                cells.len()
            )));
        }
        let mut row = vec![Data::Nil; plan.layout.column_count()];
        for (cell, &col) in cells.iter().zip(&plan.columns) {
            if cell.is_empty() || cell == "-" {
                continue;
            }
            let (path, ty) = &plan.layout.columns[col];
            row[col] = Data::parse_as(&ty.kind, cell).ctx(path)?;
        }
        Ok(row)
    }
}

impl<R: BufRead> Reader for CsvReader<R> {
    fn set_schema(&mut self, schema: Schema) -> Result<()> {
        if self.plan.is_some() {
            return Err(Error::InvalidArgument(
                "cannot change the schema mid-stream".into(),
            ));
        }
        self.schema = schema;
        Ok(())
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn read(
        &mut self,
        max_events: usize,
        max_slice_size: usize,
        consumer: &mut dyn FnMut(TableSlice),
    ) -> (Option<Error>, u64) {
        if self.exhausted {
            return (Some(Error::EndOfInput("input drained".into())), 0);
        }
        if self.plan.is_none() {
            let header = match self.next_line() {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.exhausted = true;
                    return (Some(Error::EndOfInput("no header line".into())), 0);
                }
                Err(e) => return (Some(e), 0),
            };
            let header: Vec<String> = self.split(&header);
            match self.plan_for(&header) {
                Ok(plan) => self.plan = Some(plan),
                Err(e) => return (Some(e), 0),
            }
        }
        let layout = self.plan.as_ref().expect("plan set above").layout.clone();
        let mut builder = SliceBuilder::new(layout);
        let mut produced = 0u64;
        let mut stop = None;

        while (produced as usize) < max_events {
            match self.next_line() {
                Ok(Some(line)) => {
                    let plan = self.plan.as_ref().expect("plan set above");
                    match self.parse_row(plan, &line) {
                        Ok(row) => {
                            if let Err(e) = builder.add_row(row) {
                                stop = Some(e);
                                break;
                            }
                            produced += 1;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, line = line.as_str(), "skipping bad record");
                            continue;
                        }
                    }
                    if builder.rows() as usize >= max_slice_size {
                        match builder.finish() {
                            Ok(slice) => consumer(slice),
                            Err(e) => {
                                stop = Some(e);
                                break;
                            }
                        }
                    }
                }
                Ok(None) => {
                    self.exhausted = true;
                    stop = Some(Error::EndOfInput("input drained".into()));
                    break;
                }
                Err(e) => {
                    stop = Some(e);
                    break;
                }
            }
        }
        if builder.rows() > 0 {
            match builder.finish() {
                Ok(slice) => consumer(slice),
                Err(e) => stop = stop.or(Some(e)),
            }
        }
        (stop, produced)
    }
}
