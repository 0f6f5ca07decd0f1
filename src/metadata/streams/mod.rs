//! Metadata stream accessors: `#Strings`, `#Blob`, and the `#~` tables stream.

mod blob;
mod strings;
mod tablesheader;

pub use blob::Blob;
pub use strings::Strings;
pub use tablesheader::{CodedIndex, CodedIndexType, HeapSizes, TableId, TablesStream};
