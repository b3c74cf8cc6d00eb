//! [`LocalSource`] implementation over the SQLite cache.
//!
//! SQLite calls are synchronous, so each future is already resolved when it
//! is returned; the query engine still treats it as an asynchronous source.

use futures::future::{self, FutureExt, LocalBoxFuture};

use courier_shared::{CourierError, EntityId, EntityKind, LocalSource, PageRequest, Record};

use crate::database::Database;

impl LocalSource for Database {
    fn load_page(
        &self,
        request: PageRequest,
    ) -> LocalBoxFuture<'static, courier_shared::Result<Vec<Record>>> {
        let result = Database::load_page(self, &request).map_err(CourierError::from);
        future::ready(result).boxed_local()
    }

    fn load_record(
        &self,
        id: &EntityId,
    ) -> LocalBoxFuture<'static, courier_shared::Result<Option<Record>>> {
        let result = self.find_record(id).map_err(CourierError::from);
        future::ready(result).boxed_local()
    }

    fn store_records(&self, kind: EntityKind, records: &[Record]) -> courier_shared::Result<()> {
        for record in records {
            self.upsert_record(kind, record)?;
        }
        tracing::debug!(kind = %kind, count = records.len(), "cached records");
        Ok(())
    }

    fn remove_record(&self, id: &EntityId) -> courier_shared::Result<()> {
        self.delete_record(id)?;
        Ok(())
    }
}
