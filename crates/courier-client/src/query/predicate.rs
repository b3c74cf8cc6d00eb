//! `<container>.id = '<id>'` predicates for messages and members.
//!
//! Bare uuids are expanded into fully qualified ids, and the output is always
//! written with single quotes, so normalizing twice yields the same string.

use courier_shared::{CourierError, EntityId, EntityKind, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub container: EntityKind,
    pub container_id: EntityId,
}

impl Predicate {
    pub fn new(container: EntityKind, container_id: EntityId) -> Self {
        Self {
            container,
            container_id,
        }
    }

    pub fn parse(model: EntityKind, input: &str, scheme: &str) -> Result<Self> {
        let invalid = || CourierError::InvalidPredicate(input.to_string());

        let (lhs, rhs) = input.split_once('=').ok_or_else(invalid)?;
        let container_name = lhs.trim().strip_suffix(".id").ok_or_else(invalid)?;
        let container = EntityKind::from_singular(container_name.trim()).ok_or_else(invalid)?;
        if !allowed_containers(model).contains(&container) {
            return Err(CourierError::InvalidPredicate(format!(
                "{model} cannot be filtered by {container_name}: {input}"
            )));
        }

        let value = unquote(rhs.trim()).ok_or_else(invalid)?;
        let id = EntityId::qualify(scheme, container, value);
        let expected_prefix = format!("/{}/", container.plural());
        if !id.path().is_some_and(|p| p.starts_with(&expected_prefix)) {
            return Err(CourierError::InvalidPredicate(format!(
                "{id} is not one of {container}"
            )));
        }

        Ok(Self::new(container, id))
    }

    pub fn render(&self) -> String {
        format!("{}.id = '{}'", self.container.singular(), self.container_id)
    }
}

/// Containers a query model may be scoped by.
pub fn allowed_containers(model: EntityKind) -> &'static [EntityKind] {
    match model {
        EntityKind::Message => &[EntityKind::Conversation, EntityKind::Channel],
        EntityKind::Membership => &[EntityKind::Channel],
        _ => &[],
    }
}

pub fn requires_predicate(model: EntityKind) -> bool {
    !allowed_containers(model).is_empty()
}

/// Strip matching single or double quotes around a non-empty value.
fn unquote(s: &str) -> Option<&str> {
    let quote = s.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let inner = s.strip_prefix(quote)?.strip_suffix(quote)?;
    (!inner.is_empty() && !inner.contains(|c: char| c == '\'' || c == '"')).then_some(inner)
}

/// Validate and canonicalize a predicate for `model`.
pub fn normalize(model: EntityKind, predicate: Option<&str>, scheme: &str) -> Result<Option<Predicate>> {
    let predicate = predicate.map(str::trim).filter(|p| !p.is_empty());
    match (requires_predicate(model), predicate) {
        (false, None) => Ok(None),
        (false, Some(_)) => Err(CourierError::PredicateNotAllowed(model.to_string())),
        (true, None) => Err(CourierError::PredicateRequired(model.to_string())),
        (true, Some(p)) => Predicate::parse(model, p, scheme).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_uuid_is_qualified() {
        let p = Predicate::parse(EntityKind::Message, "conversation.id = 'c1'", "layer").unwrap();
        assert_eq!(p.container, EntityKind::Conversation);
        assert_eq!(p.container_id.as_str(), "layer:///conversations/c1");
        assert_eq!(p.render(), "conversation.id = 'layer:///conversations/c1'");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = Predicate::parse(EntityKind::Message, "channel.id = \"abc\"", "layer")
            .unwrap()
            .render();
        let twice = Predicate::parse(EntityKind::Message, &once, "layer").unwrap().render();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_full_id_is_kept() {
        let p = Predicate::parse(
            EntityKind::Membership,
            "channel.id='acme:///channels/x'",
            "layer",
        )
        .unwrap();
        assert_eq!(p.container_id.as_str(), "acme:///channels/x");
    }

    #[test]
    fn test_malformed_predicates() {
        for bad in [
            "conversation.id == 'c1'x",
            "conversation = 'c1'",
            "conversation.id = c1",
            "conversation.id = 'c1\"",
            "conversation.id = ''",
            "participants.id = 'c1'",
        ] {
            assert!(
                matches!(
                    Predicate::parse(EntityKind::Message, bad, "layer"),
                    Err(CourierError::InvalidPredicate(_))
                ),
                "accepted {bad}"
            );
        }
    }

    #[test]
    fn test_members_cannot_use_conversation() {
        let err = Predicate::parse(EntityKind::Membership, "conversation.id = 'c1'", "layer").unwrap_err();
        assert!(matches!(err, CourierError::InvalidPredicate(_)));
    }

    #[test]
    fn test_id_of_wrong_kind_is_rejected() {
        let err = Predicate::parse(
            EntityKind::Message,
            "conversation.id = 'layer:///channels/x'",
            "layer",
        )
        .unwrap_err();
        assert!(matches!(err, CourierError::InvalidPredicate(_)));
    }

    #[test]
    fn test_presence_rules() {
        assert!(normalize(EntityKind::Conversation, None, "layer").unwrap().is_none());
        assert!(matches!(
            normalize(EntityKind::Conversation, Some("conversation.id = 'x'"), "layer"),
            Err(CourierError::PredicateNotAllowed(_))
        ));
        assert!(matches!(
            normalize(EntityKind::Message, None, "layer"),
            Err(CourierError::PredicateRequired(_))
        ));
        assert!(matches!(
            normalize(EntityKind::Membership, Some("  "), "layer"),
            Err(CourierError::PredicateRequired(_))
        ));
    }
}
