//! Types shared by every courier crate: entity ids, raw server records,
//! the error taxonomy, protocol constants and the local-cache-source seam.

pub mod constants;
pub mod error;
pub mod record;
pub mod source;
pub mod types;

pub use error::{CourierError, Result};
pub use record::Record;
pub use source::{LocalSource, PageRequest};
pub use types::{EntityId, EntityKind, SortField};
