//! Record storage.
//!
//! [`RecordStore`] is the seam every stage writes through;
//! [`InMemoryRecordStore`] is the batch pipeline's backend.

mod memory;
mod traits;

pub use memory::InMemoryRecordStore;
pub use traits::{RecordStore, StorageError};
