//! Query construction and update options, and their validation.

use courier_shared::constants::{max_page_size, DEFAULT_PAGINATION_WINDOW, MAX_PAGINATION_WINDOW};
use courier_shared::{CourierError, EntityKind, Result, SortField};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortBy {
    pub field: String,
    pub direction: SortDirection,
}

impl SortBy {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Desc)
    }
}

/// What `Query::data` hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataType {
    /// Shared live objects.
    #[default]
    Instance,
    /// Immutable copies; a changed item gets a new copy in its slot.
    Snapshot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    pub model: EntityKind,
    pub predicate: Option<String>,
    /// At most one entry.
    pub sort_by: Vec<SortBy>,
    pub pagination_window: usize,
    pub data_type: DataType,
}

impl QueryOptions {
    pub fn new(model: EntityKind) -> Self {
        Self {
            model,
            predicate: None,
            sort_by: Vec::new(),
            pagination_window: DEFAULT_PAGINATION_WINDOW,
            data_type: DataType::default(),
        }
    }

    pub fn predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }

    pub fn sort_by(mut self, sort: SortBy) -> Self {
        self.sort_by.push(sort);
        self
    }

    pub fn pagination_window(mut self, window: usize) -> Self {
        self.pagination_window = window;
        self
    }

    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }
}

/// Fields to change on a live query. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryPatch {
    pub model: Option<EntityKind>,
    pub predicate: Option<String>,
    pub sort_by: Option<Vec<SortBy>>,
    pub pagination_window: Option<usize>,
}

impl QueryPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model: EntityKind) -> Self {
        self.model = Some(model);
        self
    }

    pub fn predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }

    pub fn sort_by(mut self, sort: SortBy) -> Self {
        self.sort_by = Some(vec![sort]);
        self
    }

    pub fn pagination_window(mut self, window: usize) -> Self {
        self.pagination_window = Some(window);
        self
    }
}

/// Resolve the requested sort into the single field a model supports.
pub fn resolve_sort(model: EntityKind, sort_by: &[SortBy]) -> Result<Option<SortField>> {
    if sort_by.len() > 1 {
        return Err(CourierError::InvalidSort("only one sort field is supported".into()));
    }
    let requested = sort_by.first();
    if let Some(sort) = requested {
        if sort.direction != SortDirection::Desc {
            return Err(CourierError::InvalidSort(format!(
                "{} only supports descending order",
                sort.field
            )));
        }
    }

    match model {
        EntityKind::Conversation | EntityKind::Channel => match requested.map(|s| s.field.as_str()) {
            None | Some("created_at" | "createdAt") => Ok(Some(SortField::CreatedAt)),
            Some("last_message" | "last_message.sent_at" | "lastMessage.sentAt") => {
                Ok(Some(SortField::LastMessage))
            }
            Some(other) => Err(CourierError::InvalidSort(format!("{model} cannot sort by {other}"))),
        },
        EntityKind::Message | EntityKind::Announcement => match requested.map(|s| s.field.as_str()) {
            None | Some("position") => Ok(Some(SortField::Position)),
            Some(other) => Err(CourierError::InvalidSort(format!("{model} cannot sort by {other}"))),
        },
        EntityKind::Identity | EntityKind::Membership => match requested {
            None => Ok(None),
            Some(sort) => Err(CourierError::InvalidSort(format!(
                "{model} cannot sort by {}",
                sort.field
            ))),
        },
    }
}

pub fn validate_window(window: usize) -> Result<usize> {
    if window > MAX_PAGINATION_WINDOW {
        return Err(CourierError::PaginationTooLarge {
            requested: window,
            max: MAX_PAGINATION_WINDOW,
        });
    }
    Ok(window)
}

/// Size of the next page for a query holding `held` of `window` items.
pub fn page_size(model: EntityKind, window: usize, held: usize) -> usize {
    window.saturating_sub(held).min(max_page_size(model))
}
