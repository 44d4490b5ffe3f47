//! Query filters for stored events.

use chrono::{DateTime, Utc};
use ripple_types::{ChangeEvent, ChangeSource, ChangeStatus, ChangeType, Initiator};

/// Filter for [`crate::EventStore::query`]. All filters are optional and
/// AND-combined; `services` matches the primary service or any additional
/// service.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub services: Vec<String>,
    pub change_types: Vec<ChangeType>,
    pub sources: Vec<ChangeSource>,
    pub environment: Option<String>,
    /// Inclusive lower timestamp bound.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper timestamp bound.
    pub until: Option<DateTime<Utc>>,
    pub initiator: Option<Initiator>,
    pub status: Option<ChangeStatus>,
    pub limit: Option<usize>,
}

impl EventQuery {
    pub const DEFAULT_LIMIT: usize = 50;

    pub fn builder() -> EventQueryBuilder {
        EventQueryBuilder::default()
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }

    /// Check one event against every filter except `limit`.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if !self.services.is_empty() {
            let touches = self.services.iter().any(|s| {
                event.service == *s || event.additional_services.iter().any(|a| a == s)
            });
            if !touches {
                return false;
            }
        }

        if !self.change_types.is_empty() && !self.change_types.contains(&event.change_type) {
            return false;
        }

        if !self.sources.is_empty() && !self.sources.contains(&event.source) {
            return false;
        }

        if let Some(ref environment) = self.environment {
            if &event.environment != environment {
                return false;
            }
        }

        if let Some(since) = self.since {
            if event.timestamp < since {
                return false;
            }
        }

        if let Some(until) = self.until {
            if event.timestamp > until {
                return false;
            }
        }

        if let Some(initiator) = self.initiator {
            if event.initiator != initiator {
                return false;
            }
        }

        if let Some(status) = self.status {
            if event.status != status {
                return false;
            }
        }

        true
    }
}

/// Builder for [`EventQuery`].
#[derive(Debug, Default)]
pub struct EventQueryBuilder {
    query: EventQuery,
}

impl EventQueryBuilder {
    pub fn service(mut self, service: impl Into<String>) -> Self {
        self.query.services.push(service.into());
        self
    }

    pub fn services(mut self, services: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.query
            .services
            .extend(services.into_iter().map(Into::into));
        self
    }

    pub fn change_type(mut self, change_type: ChangeType) -> Self {
        self.query.change_types.push(change_type);
        self
    }

    pub fn source(mut self, source: ChangeSource) -> Self {
        self.query.sources.push(source);
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.query.environment = Some(environment.into());
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.query.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.query.until = Some(until);
        self
    }

    pub fn initiator(mut self, initiator: Initiator) -> Self {
        self.query.initiator = Some(initiator);
        self
    }

    pub fn status(mut self, status: ChangeStatus) -> Self {
        self.query.status = Some(status);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    pub fn build(self) -> EventQuery {
        self.query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::materialize;
    use ripple_types::NewChangeEvent;

    fn event(service: &str, additional: &[&str]) -> ChangeEvent {
        let mut new = NewChangeEvent::new(service, ChangeType::Deployment, "deploy");
        for a in additional {
            new = new.also_affects(*a);
        }
        materialize(new, Utc::now()).unwrap()
    }

    #[test]
    fn test_service_filter_covers_additional_services() {
        let e = event("api", &["worker"]);
        let q = EventQuery::builder().service("worker").build();
        assert!(q.matches(&e));
        let q = EventQuery::builder().service("db").build();
        assert!(!q.matches(&e));
    }

    #[test]
    fn test_time_bounds_are_inclusive() {
        let e = event("api", &[]);
        let q = EventQuery::builder()
            .since(e.timestamp)
            .until(e.timestamp)
            .build();
        assert!(q.matches(&e));
    }

    #[test]
    fn test_filters_and_combine() {
        let e = event("api", &[]);
        let q = EventQuery::builder()
            .service("api")
            .change_type(ChangeType::ConfigChange)
            .build();
        assert!(!q.matches(&e), "type filter must also hold");
    }

    #[test]
    fn test_default_limit() {
        assert_eq!(EventQuery::default().effective_limit(), 50);
        assert_eq!(
            EventQuery::builder().limit(7).build().effective_limit(),
            7
        );
    }
}
