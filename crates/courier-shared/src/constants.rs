use crate::types::EntityKind;

/// Scheme used when generating ids for locally created entities.
pub const DEFAULT_ID_SCHEME: &str = "layer";

/// Separator between the scheme and the resource path of an id.
pub const ID_SCHEME_SEPARATOR: &str = "://";

/// Response header carrying the server-side total of a paged collection.
pub const TOTAL_COUNT_HEADER: &str = "Total-Count";

/// Response header set while the server is still syncing a container.
pub const IS_SYNCING_HEADER: &str = "Is-Syncing";

/// Largest page a single remote request may ask for.
pub const MAX_PAGE_SIZE: usize = 100;

/// Identities and memberships are served in larger pages.
pub const MAX_DIRECTORY_PAGE_SIZE: usize = 500;

/// Hard upper bound for a query's pagination window.
pub const MAX_PAGINATION_WINDOW: usize = 10_000;

/// Window used when a query does not ask for one.
pub const DEFAULT_PAGINATION_WINDOW: usize = 100;

/// Delay before re-requesting a page the server reported as still syncing.
pub const DEFAULT_SYNCING_RETRY_MS: u64 = 2_500;

/// Delay between a `loaded-error` event and destruction of the placeholder.
pub const DEFAULT_LOAD_ERROR_GRACE_MS: u64 = 100;

/// A typing indicator older than this is considered stale.
pub const DEFAULT_TYPING_STALE_MS: u64 = 6_000;

/// How often typing indicators are checked for staleness.
pub const DEFAULT_TYPING_POLL_MS: u64 = 5_000;

/// Per-request page size limit for a model.
pub fn max_page_size(kind: EntityKind) -> usize {
    match kind {
        EntityKind::Identity | EntityKind::Membership => MAX_DIRECTORY_PAGE_SIZE,
        _ => MAX_PAGE_SIZE,
    }
}
