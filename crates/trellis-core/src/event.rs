use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::datetime::{DayKey, Timestamp, local_day};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Task,
    Invoice,
    Estimate,
    RoadmapItem,
    Manual,
    Comment,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Task,
        EventKind::Invoice,
        EventKind::Estimate,
        EventKind::RoadmapItem,
        EventKind::Manual,
        EventKind::Comment,
    ];

    pub fn as_key(self) -> &'static str {
        match self {
            EventKind::Task => "task",
            EventKind::Invoice => "invoice",
            EventKind::Estimate => "estimate",
            EventKind::RoadmapItem => "roadmap_item",
            EventKind::Manual => "manual",
            EventKind::Comment => "comment",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_key())
    }
}

impl FromStr for EventKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "task" | "tasks" => Ok(EventKind::Task),
            "invoice" | "invoices" => Ok(EventKind::Invoice),
            "estimate" | "estimates" => Ok(EventKind::Estimate),
            "roadmap_item" | "roadmap" | "roadmap_items" => Ok(EventKind::RoadmapItem),
            "manual" => Ok(EventKind::Manual),
            "comment" | "comments" => Ok(EventKind::Comment),
            other => Err(anyhow!("unknown event type: {other}")),
        }
    }
}

/// Where an event came from, tagged by its type. Each variant carries the
/// relationship ids its scope join chain starts from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EventSource {
    Task {
        #[serde(default)]
        source_id: Option<String>,
    },
    Invoice {
        #[serde(default)]
        source_id: Option<String>,
    },
    Estimate {
        #[serde(default)]
        source_id: Option<String>,
    },
    RoadmapItem {
        #[serde(default)]
        source_id: Option<String>,
        #[serde(default)]
        project_id: Option<String>,
    },
    Manual {
        #[serde(default)]
        brand_id: Option<String>,
        #[serde(default)]
        project_id: Option<String>,
    },
    Comment {
        #[serde(default)]
        project_id: Option<String>,
        #[serde(default)]
        brand_id: Option<String>,
    },
}

impl EventSource {
    pub fn kind(&self) -> EventKind {
        match self {
            EventSource::Task { .. } => EventKind::Task,
            EventSource::Invoice { .. } => EventKind::Invoice,
            EventSource::Estimate { .. } => EventKind::Estimate,
            EventSource::RoadmapItem { .. } => EventKind::RoadmapItem,
            EventSource::Manual { .. } => EventKind::Manual,
            EventSource::Comment { .. } => EventKind::Comment,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub start_date: Timestamp,

    #[serde(default)]
    pub end_date: Timestamp,

    #[serde(default)]
    pub all_day: bool,

    #[serde(flatten)]
    pub source: EventSource,
}

impl Event {
    pub fn new(
        id: impl Into<String>,
        source: EventSource,
        start_date: impl Into<Timestamp>,
        end_date: impl Into<Timestamp>,
    ) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            start_date: start_date.into(),
            end_date: end_date.into(),
            all_day: false,
            source,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_all_day(mut self, all_day: bool) -> Self {
        self.all_day = all_day;
        self
    }

    pub fn kind(&self) -> EventKind {
        self.source.kind()
    }

    /// Resolves both endpoints in `tz`, degrading unparseable ones to the
    /// epoch.
    pub fn span(&self, tz: &Tz) -> EventSpan {
        let start = self.start_date.instant_or_epoch(tz);
        let end = self.end_date.instant_or_epoch(tz);
        EventSpan {
            start,
            end,
            start_key: DayKey::from(local_day(start, tz)),
            end_key: DayKey::from(local_day(end, tz)),
        }
    }
}

/// The resolved time range of one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventSpan {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub start_key: DayKey,
    pub end_key: DayKey,
}

impl EventSpan {
    pub fn is_inverted(&self) -> bool {
        self.end < self.start
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn start_day(&self) -> NaiveDate {
        self.start_key.date()
    }

    pub fn end_day(&self) -> NaiveDate {
        self.end_key.date()
    }

    /// Inclusive on both ends; inverted spans cover nothing.
    pub fn covers_day(&self, day: NaiveDate) -> bool {
        let key = DayKey::from(day);
        !self.is_inverted() && self.start_key <= key && key <= self.end_key
    }

    pub fn is_multi_day(&self) -> bool {
        self.start_key != self.end_key
    }
}

/// An event paired with its resolved span. Layout passes resolve once and
/// share these across rows.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedEvent<'a> {
    pub event: &'a Event,
    pub span: EventSpan,
}

pub fn resolve_events<'a, I>(events: I, tz: &Tz) -> Vec<ResolvedEvent<'a>>
where
    I: IntoIterator<Item = &'a Event>,
{
    events
        .into_iter()
        .map(|event| ResolvedEvent {
            event,
            span: event.span(tz),
        })
        .collect()
}

/// An event placed on a row of day columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaidOutEvent {
    #[serde(flatten)]
    pub event: Event,
    pub start_col: usize,
    pub span: usize,
    pub track: usize,
}

impl LaidOutEvent {
    /// Exclusive end column.
    pub fn end_col(&self) -> usize {
        self.start_col + self.span
    }

    pub fn covers_col(&self, col: usize) -> bool {
        self.start_col <= col && col < self.end_col()
    }
}
