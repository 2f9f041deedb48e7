pub mod collection;
pub mod engine;
pub mod record;

pub use collection::{CollectionSpec, IndexSpec, KeyPolicy};
pub use engine::{Applied, RecordStore};
pub use record::{extract_field_value, Record, RecordId, WriteOp};
