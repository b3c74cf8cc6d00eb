//! # courier-client
//!
//! A client-side mirror of a messaging service's object graph:
//! conversations, channels, messages, announcements, identities and
//! memberships, kept consistent with the server and exposed through live
//! queries that update themselves as objects change.
//!
//! Everything runs on one thread. Build a [`Client`] inside a
//! [`tokio::task::LocalSet`], call [`Client::mark_ready`] once the session is
//! authenticated, and create queries with [`Client::create_query`].

pub mod client;
pub mod config;
pub mod entity;
pub mod events;
pub mod loader;
pub mod push;
pub mod query;
pub mod registry;
pub mod scheduler;
pub mod schema;
pub mod sync;
pub mod typing;

#[cfg(test)]
mod testing;

use tracing_subscriber::{fmt, EnvFilter};

pub use client::Client;
pub use config::ClientConfig;
pub use entity::{Entity, Snapshot};
pub use events::{Event, EventPayload, Evented, InternalId, PropertyChange, SaveOutcome, SubscriptionId};
pub use push::{PatchOp, PatchOperation, PushEvent, PushObject};
pub use query::{DataType, Query, QueryChange, QueryItem, QueryOptions, QueryPatch, SortBy, SortDirection};
pub use registry::{EvictionPolicy, SyncedOnly};
pub use schema::EntityAction;
pub use sync::SyncState;
pub use typing::{TypingChange, TypingState};

pub use courier_shared::{CourierError, EntityId, EntityKind, Record, Result};

/// Install a `tracing` subscriber honouring `RUST_LOG`. Safe to call more
/// than once; later calls are ignored.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("courier_client=debug,courier_net=info,courier_store=info,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
