//! File interfaces: source tables, the ledger, the published table, the
//! override table, and atomic publication.

mod dataset;
mod ledger_csv;
mod overrides_csv;
mod publish;
mod sources;

pub use dataset::{dataset_columns, read_dataset, write_dataset, Dataset};
pub use ledger_csv::{read_ledger, write_ledger};
pub use overrides_csv::read_overrides;
pub use publish::Publisher;
pub use sources::{read_source_table, SourceTable, NAME_COLUMN, RECORD_ID_COLUMN};
