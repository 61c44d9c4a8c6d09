//! Ingest readers.
//!
//! A reader turns a byte stream into table slices of a schema-defined
//! layout. The core specifies only this contract; concrete wire formats
//! live in submodules ([`csv`]) or outside the crate.

pub mod csv;

use crate::data::Schema;
use crate::error::Error;
use crate::slice::TableSlice;

/// Producer of table slices from an input stream.
///
/// `read` drives parsing until `max_events` rows were produced or the
/// input drains, handing finished slices of at most `max_slice_size`
/// rows to `consumer`. The returned error, when present, describes why
/// reading stopped (`end_of_input` for a clean drain); the count is the
/// number of rows produced in this call.
pub trait Reader {
    /// Supply the schema used to type produced slices.
    fn set_schema(&mut self, schema: Schema) -> crate::error::Result<()>;

    /// The schema currently in use.
    fn schema(&self) -> &Schema;

    fn read(
        &mut self,
        max_events: usize,
        max_slice_size: usize,
        consumer: &mut dyn FnMut(TableSlice),
    ) -> (Option<Error>, u64);
}
