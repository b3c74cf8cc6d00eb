//! Load-by-id: resolve an id to its kind, hand back a placeholder at once,
//! and fill it from the local cache or the server.

use std::rc::Rc;

use courier_net::{Request, Response, TransportError};
use courier_shared::{CourierError, EntityId, EntityKind, Record, Result};

use crate::client::Client;
use crate::entity::Entity;
use crate::events::EventPayload;
use crate::schema::EntityAction;
use crate::sync::SyncState;

/// Recognizes ids of one kind by the shape of their path.
#[derive(Clone, Copy)]
pub struct IdMatcher {
    pub kind: EntityKind,
    matches: fn(&str) -> bool,
}

impl IdMatcher {
    pub fn matches(&self, id: &EntityId) -> bool {
        id.path().is_some_and(|path| (self.matches)(path))
    }
}

fn single_segment(path: &str, plural: &str) -> bool {
    path.strip_prefix('/')
        .and_then(|p| p.strip_prefix(plural))
        .and_then(|p| p.strip_prefix('/'))
        .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
}

fn is_membership(path: &str) -> bool {
    let mut parts = path.trim_start_matches('/').split('/');
    matches!(
        (parts.next(), parts.next(), parts.next(), parts.next(), parts.next()),
        (Some("channels"), Some(channel), Some("members"), Some(user), None)
            if !channel.is_empty() && !user.is_empty()
    )
}

/// Evaluated in order; the first match wins, so nested id shapes come first.
pub static ID_MATCHERS: &[IdMatcher] = &[
    IdMatcher { kind: EntityKind::Membership, matches: is_membership },
    IdMatcher { kind: EntityKind::Message, matches: |p| single_segment(p, "messages") },
    IdMatcher { kind: EntityKind::Announcement, matches: |p| single_segment(p, "announcements") },
    IdMatcher { kind: EntityKind::Conversation, matches: |p| single_segment(p, "conversations") },
    IdMatcher { kind: EntityKind::Channel, matches: |p| single_segment(p, "channels") },
    IdMatcher { kind: EntityKind::Identity, matches: |p| single_segment(p, "identities") },
];

pub fn resolve_kind(id: &EntityId) -> Option<EntityKind> {
    ID_MATCHERS.iter().find(|m| m.matches(id)).map(|m| m.kind)
}

impl Client {
    /// Return the object for `id`, loading it if it is not registered yet.
    ///
    /// A new placeholder is in the `LOADING` state; completion is announced
    /// with `<plural>:loaded`, failure with `<plural>:loaded-error` after
    /// which the placeholder is destroyed once the grace delay has passed.
    pub fn load(&self, id: impl Into<EntityId>) -> Result<Rc<Entity>> {
        let id = id.into();
        if let Some(existing) = self.get(&id) {
            return Ok(existing);
        }
        let kind = resolve_kind(&id).ok_or_else(|| CourierError::InvalidId(id.to_string()))?;
        let path = id
            .path()
            .map(str::to_string)
            .ok_or_else(|| CourierError::InvalidId(id.to_string()))?;

        let entity = Entity::construct(self, kind, id.clone(), SyncState::New);
        entity.begin_load();
        self.track(&entity);
        tracing::debug!(%id, kind = %kind, "loading");

        let source = self.local_source();
        let transport = self.transport();
        let weak = Rc::downgrade(&entity);
        let client = self.downgrade();
        self.scheduler().spawn(async move {
            if let Some(source) = source {
                match source.load_record(&id).await {
                    Ok(Some(record)) => {
                        if let (Some(client), Some(entity)) = (client.upgrade(), weak.upgrade()) {
                            client.finish_load(&entity, record, false);
                        }
                        return;
                    }
                    Ok(None) => {}
                    Err(err) => tracing::warn!(%id, error = %err, "cache lookup failed"),
                }
            }
            let result = transport.request(Request::get(path)).await;
            if let (Some(client), Some(entity)) = (client.upgrade(), weak.upgrade()) {
                client.handle_load_response(&entity, result);
            }
        });
        Ok(entity)
    }

    fn handle_load_response(&self, entity: &Rc<Entity>, result: std::result::Result<Response, TransportError>) {
        let error = match result {
            Ok(response) if response.success => match Record::from_value(response.data) {
                Ok(record) => return self.finish_load(entity, record, true),
                Err(err) => err,
            },
            Ok(response) => CourierError::Remote {
                status: response.status,
                message: response.message(),
            },
            Err(err) => CourierError::Remote {
                status: 0,
                message: err.to_string(),
            },
        };
        self.fail_load(entity, error);
    }

    fn finish_load(&self, entity: &Rc<Entity>, record: Record, from_server: bool) {
        if entity.is_destroyed() {
            return;
        }
        if let Err(err) = entity.populate(&record, false) {
            return self.fail_load(entity, err);
        }
        if from_server {
            self.cache_records(entity.kind(), std::slice::from_ref(&record));
        }
        entity.load_succeeded();
        entity.finish_construction();
        tracing::debug!(id = %entity.id(), from_server, "loaded");

        entity.trigger_action(EntityAction::Loaded, EventPayload::None);
        self.announce(entity, EntityAction::Add);
    }

    fn fail_load(&self, entity: &Rc<Entity>, error: CourierError) {
        if entity.is_destroyed() {
            return;
        }
        tracing::warn!(id = %entity.id(), error = %error, "load failed");
        entity.load_failed();
        entity.trigger_action(EntityAction::LoadedError, EventPayload::Error(error));

        let weak = Rc::downgrade(entity);
        self.scheduler().after(self.config().load_error_grace, move || {
            if let Some(entity) = weak.upgrade() {
                if let Err(err) = entity.destroy() {
                    tracing::debug!(id = %entity.id(), error = %err, "failed placeholder already destroyed");
                }
            }
        });
    }
}
