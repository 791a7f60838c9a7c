use serde::Serialize;

use crate::config::LayoutConfig;
use crate::event::{
  LaidOutEvent,
  ResolvedEvent
};
use crate::tracks::{
  DayWindow,
  TrackOrder,
  lay_out_tracks,
  track_count
};

/// Header lane of a week or day view.
/// It has no overflow; `rows` grows to
/// fit every track.
#[derive(
  Debug, Clone, PartialEq, Serialize,
)]
#[serde(rename_all = "camelCase")]
pub struct AllDayLane {
  pub events: Vec<LaidOutEvent>,
  pub rows:   usize
}

/// Whether an event belongs in the
/// header lane rather than on the hour
/// grid.
pub fn belongs_in_all_day_lane(
  entry: &ResolvedEvent<'_>
) -> bool {
  entry.event.all_day
    || entry.span.is_multi_day()
}

#[tracing::instrument(skip(entries, config), fields(count = entries.len()))]
pub fn lay_out_all_day_lane(
  entries: &[ResolvedEvent<'_>],
  window: DayWindow,
  config: &LayoutConfig
) -> AllDayLane {
  let selected = entries
    .iter()
    .filter(|entry| {
      belongs_in_all_day_lane(entry)
        && window.intersects(
          entry.span.start_key,
          entry.span.end_key
        )
    })
    .copied()
    .collect::<Vec<_>>();

  let events = lay_out_tracks(
    &selected,
    window,
    TrackOrder::LongestFirst,
    config.initial_tracks
  );
  let rows = track_count(&events);

  AllDayLane {
    events,
    rows
  }
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::*;
  use crate::event::{
    Event,
    EventSource,
    resolve_events
  };

  fn date(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  fn roadmap(
    id: &str,
    start: &str,
    end: &str
  ) -> Event {
    Event::new(
      id,
      EventSource::RoadmapItem {
        source_id:  None,
        project_id: None
      },
      start,
      end
    )
  }

  #[test]
  fn only_all_day_and_multi_day_events() {
    let events = vec![
      roadmap(
        "timed",
        "2026-02-17T09:00:00",
        "2026-02-17T10:00:00"
      ),
      roadmap(
        "flagged",
        "2026-02-17T00:00:00",
        "2026-02-17T00:00:00"
      )
      .with_all_day(true),
      roadmap(
        "multi",
        "2026-02-16T09:00:00",
        "2026-02-19T10:00:00"
      ),
    ];
    let resolved = resolve_events(
      &events,
      &chrono_tz::UTC
    );
    let lane = lay_out_all_day_lane(
      &resolved,
      DayWindow::week(date(2026, 2, 15)),
      &LayoutConfig::default()
    );

    let ids = lane
      .events
      .iter()
      .map(|event| event.event.id.as_str())
      .collect::<Vec<_>>();
    assert_eq!(ids, vec!["multi", "flagged"]);
    assert_eq!(lane.rows, 2);
    assert_eq!(lane.events[0].track, 0);
    assert_eq!(lane.events[0].span, 4);
  }

  #[test]
  fn longer_bars_win_ties_on_start_day() {
    let events = vec![
      roadmap(
        "short",
        "2026-02-16T00:00:00",
        "2026-02-17T00:00:00"
      ),
      roadmap(
        "long",
        "2026-02-16T08:00:00",
        "2026-02-20T00:00:00"
      ),
      roadmap(
        "later",
        "2026-02-18T00:00:00",
        "2026-02-19T00:00:00"
      ),
    ];
    let resolved = resolve_events(
      &events,
      &chrono_tz::UTC
    );
    let lane = lay_out_all_day_lane(
      &resolved,
      DayWindow::week(date(2026, 2, 15)),
      &LayoutConfig::default()
    );

    let track_of = |id: &str| {
      lane
        .events
        .iter()
        .find(|event| event.event.id == id)
        .map(|event| event.track)
        .expect("event laid out")
    };
    assert_eq!(track_of("long"), 0);
    assert_eq!(track_of("short"), 1);
    // Short ends Tuesday so Wednesday is
    // free again on track 1.
    assert_eq!(track_of("later"), 1);
    assert_eq!(lane.rows, 2);
  }

  #[test]
  fn day_view_lane_is_one_column() {
    let events = vec![roadmap(
      "multi",
      "2026-02-16T09:00:00",
      "2026-02-19T10:00:00"
    )];
    let resolved = resolve_events(
      &events,
      &chrono_tz::UTC
    );
    let lane = lay_out_all_day_lane(
      &resolved,
      DayWindow::single(date(2026, 2, 18)),
      &LayoutConfig::default()
    );

    assert_eq!(lane.events.len(), 1);
    assert_eq!(lane.events[0].start_col, 0);
    assert_eq!(lane.events[0].span, 1);
  }
}
