use std::collections::{
  BTreeSet,
  HashMap
};

use serde::{
  Deserialize,
  Serialize
};
use tracing::{
  debug,
  trace
};

use crate::event::{
  Event,
  EventKind,
  EventSource
};

/// Join tables linking event sources to
/// their owning entity (a brand). Every
/// map is child id -> parent id, keyed by
/// the table name used in `scope.json`.
#[derive(
  Debug,
  Clone,
  Default,
  PartialEq,
  Serialize,
  Deserialize,
)]
#[serde(default)]
pub struct ScopeDirectory {
  #[serde(rename = "tasks")]
  pub task_boards:      HashMap<String, String>,
  #[serde(rename = "boards")]
  pub board_projects:   HashMap<String, String>,
  #[serde(rename = "projects")]
  pub project_brands:   HashMap<String, String>,
  #[serde(rename = "invoices")]
  pub invoice_clients:  HashMap<String, String>,
  #[serde(rename = "estimates")]
  pub estimate_clients: HashMap<String, String>,
  #[serde(rename = "clients")]
  pub client_brands:    HashMap<String, String>,
  #[serde(rename = "roadmap_items")]
  pub roadmap_projects: HashMap<String, String>
}

impl ScopeDirectory {
  /// Owning brand of `event`, or `None`
  /// when any link in its chain is
  /// missing.
  pub fn resolve_owner<'a>(
    &'a self,
    event: &'a Event
  ) -> Option<&'a str> {
    match &event.source {
      | EventSource::Task {
        source_id
      } => {
        let board = self
          .task_boards
          .get(source_id.as_deref()?)?;
        let project = self
          .board_projects
          .get(board)?;
        self.project_brand(project)
      }
      | EventSource::Invoice {
        source_id
      } => {
        let client = self
          .invoice_clients
          .get(source_id.as_deref()?)?;
        self.client_brand(client)
      }
      | EventSource::Estimate {
        source_id
      } => {
        let client = self
          .estimate_clients
          .get(source_id.as_deref()?)?;
        self.client_brand(client)
      }
      | EventSource::RoadmapItem {
        source_id,
        project_id
      } => {
        let project = project_id
          .as_deref()
          .or_else(|| {
            self
              .roadmap_projects
              .get(source_id.as_deref()?)
              .map(String::as_str)
          })?;
        self.project_brand(project)
      }
      | EventSource::Manual {
        brand_id,
        project_id
      }
      | EventSource::Comment {
        project_id,
        brand_id
      } => {
        brand_id.as_deref().or_else(
          || {
            self.project_brand(
              project_id.as_deref()?
            )
          }
        )
      }
    }
  }

  fn project_brand(
    &self,
    project: &str
  ) -> Option<&str> {
    self
      .project_brands
      .get(project)
      .map(String::as_str)
  }

  fn client_brand(
    &self,
    client: &str
  ) -> Option<&str> {
    self
      .client_brands
      .get(client)
      .map(String::as_str)
  }
}

/// Type toggles plus an optional owner
/// scope.
#[derive(
  Debug, Clone, PartialEq, Eq,
)]
pub struct EventFilter {
  pub enabled: BTreeSet<EventKind>,
  pub scope:   Option<String>
}

impl Default for EventFilter {
  fn default() -> Self {
    Self {
      enabled: EventKind::ALL
        .into_iter()
        .collect(),
      scope:   None
    }
  }
}

impl EventFilter {
  /// Builds a filter from a comma list
  /// of kinds. An empty list enables
  /// every kind.
  #[tracing::instrument]
  pub fn parse(
    types: Option<&str>,
    scope: Option<&str>
  ) -> anyhow::Result<Self> {
    let enabled = match types
      .map(str::trim)
      .filter(|raw| !raw.is_empty())
    {
      | Some(raw) => {
        raw
          .split(',')
          .map(str::trim)
          .filter(|tok| !tok.is_empty())
          .map(str::parse::<EventKind>)
          .collect::<anyhow::Result<
            BTreeSet<_>
          >>()?
      }
      | None => {
        EventKind::ALL
          .into_iter()
          .collect()
      }
    };

    let scope = scope
      .map(str::trim)
      .filter(|raw| !raw.is_empty())
      .map(str::to_string);

    Ok(Self {
      enabled,
      scope
    })
  }

  #[tracing::instrument(skip(
    self, events, directory
  ))]
  pub fn apply<'a>(
    &self,
    events: &'a [Event],
    directory: &ScopeDirectory
  ) -> Vec<&'a Event> {
    let typed = filter_by_type(
      events.iter(),
      &self.enabled
    );
    let scoped = filter_by_scope(
      typed,
      self.scope.as_deref(),
      directory
    );
    debug!(
      total = events.len(),
      kept = scoped.len(),
      scope = ?self.scope,
      "events filtered"
    );
    scoped
  }
}

pub fn filter_by_type<'a, I>(
  events: I,
  enabled: &BTreeSet<EventKind>
) -> Vec<&'a Event>
where
  I: IntoIterator<Item = &'a Event>
{
  events
    .into_iter()
    .filter(|event| {
      enabled.contains(&event.kind())
    })
    .collect()
}

/// Keeps events owned by `scope`.
/// Events whose owner cannot be
/// resolved are kept.
pub fn filter_by_scope<'a, I>(
  events: I,
  scope: Option<&str>,
  directory: &ScopeDirectory
) -> Vec<&'a Event>
where
  I: IntoIterator<Item = &'a Event>
{
  let Some(scope) = scope else {
    return events
      .into_iter()
      .collect();
  };

  events
    .into_iter()
    .filter(|event| {
      match directory
        .resolve_owner(event)
      {
        | Some(owner) => owner == scope,
        | None => {
          trace!(
            id = %event.id,
            kind = %event.kind(),
            "owner unresolved; keeping event"
          );
          true
        }
      }
    })
    .collect()
}
