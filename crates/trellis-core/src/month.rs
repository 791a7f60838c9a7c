use std::collections::BTreeMap;

use chrono::{
  Datelike,
  NaiveDate
};
use serde::Serialize;
use tracing::debug;

use crate::config::LayoutConfig;
use crate::datetime::{
  DayKey,
  add_days,
  first_day_of_month,
  last_day_of_month,
  start_of_week
};
use crate::event::{
  LaidOutEvent,
  ResolvedEvent
};
use crate::tracks::{
  DayWindow,
  TrackOrder,
  lay_out_tracks
};

pub const MAX_WEEK_ROWS: usize = 6;

/// One day cell of a week row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayCell {
  pub day:      DayKey,
  /// Every laid-out event touching the
  /// day, by track.
  pub events:   Vec<LaidOutEvent>,
  pub overflow: usize
}

impl DayCell {
  /// Events drawn in the cell; the rest
  /// sit behind the "+N more"
  /// affordance.
  pub fn visible(
    &self,
    max_visible_tracks: usize
  ) -> impl Iterator<Item = &LaidOutEvent>
  {
    self.events.iter().filter(
      move |event| {
        event.track < max_visible_tracks
      }
    )
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekRow {
  pub days:            Vec<NaiveDate>,
  pub laid_out_events: Vec<LaidOutEvent>,
  pub cells:           Vec<DayCell>
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthLayout {
  pub month:    NaiveDate,
  pub rows:     Vec<WeekRow>,
  /// Days whose cell overflows, with the
  /// hidden count.
  pub overflow: BTreeMap<DayKey, usize>
}

impl MonthLayout {
  pub fn overflow_for(
    &self,
    day: NaiveDate
  ) -> usize {
    self
      .overflow
      .get(&DayKey::from(day))
      .copied()
      .unwrap_or(0)
  }

  pub fn cell(
    &self,
    day: NaiveDate
  ) -> Option<&DayCell> {
    let key = DayKey::from(day);
    self
      .rows
      .iter()
      .flat_map(|row| row.cells.iter())
      .find(|cell| cell.day == key)
  }
}

/// Start days of the week rows covering
/// the month of `reference`.
pub fn month_row_starts(
  reference: NaiveDate,
  config: &LayoutConfig
) -> Vec<NaiveDate> {
  let first = first_day_of_month(
    reference.year(),
    reference.month()
  );
  let last = last_day_of_month(
    reference.year(),
    reference.month()
  );

  let mut starts = Vec::new();
  let mut cursor =
    start_of_week(first, config.week_start);
  while cursor <= last
    && starts.len() < MAX_WEEK_ROWS
  {
    starts.push(cursor);
    cursor = add_days(cursor, 7);
  }
  starts
}

#[tracing::instrument(skip(entries, config), fields(count = entries.len()))]
pub fn lay_out_month(
  entries: &[ResolvedEvent<'_>],
  reference: NaiveDate,
  config: &LayoutConfig
) -> MonthLayout {
  let rows = month_row_starts(
    reference, config
  )
  .into_iter()
  .map(|start| {
    lay_out_week_row(
      entries,
      DayWindow::week(start),
      config
    )
  })
  .collect::<Vec<_>>();

  let overflow = rows
    .iter()
    .flat_map(|row| row.cells.iter())
    .filter(|cell| cell.overflow > 0)
    .map(|cell| (cell.day, cell.overflow))
    .collect::<BTreeMap<_, _>>();

  debug!(
    rows = rows.len(),
    overflowing_days = overflow.len(),
    "month laid out"
  );

  MonthLayout {
    month: first_day_of_month(
      reference.year(),
      reference.month()
    ),
    rows,
    overflow
  }
}

pub fn lay_out_week_row(
  entries: &[ResolvedEvent<'_>],
  window: DayWindow,
  config: &LayoutConfig
) -> WeekRow {
  let selected = entries
    .iter()
    .filter(|entry| {
      window.intersects(
        entry.span.start_key,
        entry.span.end_key
      )
    })
    .copied()
    .collect::<Vec<_>>();

  let laid_out_events = lay_out_tracks(
    &selected,
    window,
    TrackOrder::ByStart,
    config.initial_tracks
  );

  let days = window.days();
  let cells = days
    .iter()
    .enumerate()
    .map(|(col, day)| {
      let mut events = laid_out_events
        .iter()
        .filter(|event| {
          event.covers_col(col)
        })
        .cloned()
        .collect::<Vec<_>>();
      events.sort_by_key(|event| {
        event.track
      });
      let overflow = events
        .len()
        .saturating_sub(
          config.max_visible_tracks
        );
      DayCell {
        day: DayKey::from(*day),
        events,
        overflow
      }
    })
    .collect();

  WeekRow {
    days,
    laid_out_events,
    cells
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

  fn task(
    id: &str,
    start: &str,
    end: &str
  ) -> Event {
    Event::new(
      id,
      EventSource::Task {
        source_id: None
      },
      start,
      end
    )
  }

  #[test]
  fn february_2026_has_four_rows() {
    // Feb 1 2026 is a Sunday and the
    // month has 28 days.
    let starts = month_row_starts(
      date(2026, 2, 10),
      &LayoutConfig::default()
    );
    assert_eq!(starts.len(), 4);
    assert_eq!(starts[0], date(2026, 2, 1));
  }

  #[test]
  fn long_months_use_six_rows() {
    // Aug 2026 starts on a Saturday.
    let starts = month_row_starts(
      date(2026, 8, 1),
      &LayoutConfig::default()
    );
    assert_eq!(starts.len(), 6);
    assert_eq!(starts[0], date(2026, 7, 26));
  }

  #[test]
  fn five_events_on_one_day_overflow_by_two()
  {
    let events = (0..5)
      .map(|idx| {
        task(
          &format!("t{idx}"),
          "2026-02-11T09:00:00",
          "2026-02-11T10:00:00"
        )
      })
      .collect::<Vec<_>>();
    let resolved = resolve_events(
      &events,
      &chrono_tz::UTC
    );
    let layout = lay_out_month(
      &resolved,
      date(2026, 2, 1),
      &LayoutConfig::default()
    );

    let day = date(2026, 2, 11);
    assert_eq!(layout.overflow_for(day), 2);
    assert_eq!(layout.overflow.len(), 1);

    let cell =
      layout.cell(day).expect("cell");
    assert_eq!(cell.events.len(), 5);
    assert_eq!(cell.visible(3).count(), 3);
    assert_eq!(
      layout.overflow_for(date(2026, 2, 12)),
      0
    );
  }

  #[test]
  fn events_are_clipped_per_row() {
    // Thu Feb 5 through Tue Feb 10.
    let events = vec![task(
      "span",
      "2026-02-05T09:00:00",
      "2026-02-10T17:00:00"
    )];
    let resolved = resolve_events(
      &events,
      &chrono_tz::UTC
    );
    let layout = lay_out_month(
      &resolved,
      date(2026, 2, 1),
      &LayoutConfig::default()
    );

    let first = &layout.rows[0]
      .laid_out_events[0];
    assert_eq!(
      (first.start_col, first.span),
      (4, 3)
    );
    let second = &layout.rows[1]
      .laid_out_events[0];
    assert_eq!(
      (second.start_col, second.span),
      (0, 3)
    );
    assert!(
      layout.rows[2]
        .laid_out_events
        .is_empty()
    );
  }

  #[test]
  fn row_membership_uses_local_days() {
    // 23:30 local in Mexico City is
    // already the next day in UTC.
    let events = vec![task(
      "late",
      "2026-02-07T23:30:00-06:00",
      "2026-02-07T23:50:00-06:00"
    )];
    let resolved = resolve_events(
      &events,
      &chrono_tz::America::Mexico_City
    );
    let config = LayoutConfig {
      timezone:
        chrono_tz::America::Mexico_City,
      ..LayoutConfig::default()
    };
    let layout = lay_out_month(
      &resolved,
      date(2026, 2, 1),
      &config
    );

    assert_eq!(
      layout.rows[0].laid_out_events.len(),
      1
    );
    assert_eq!(
      layout.rows[0].laid_out_events[0]
        .start_col,
      6
    );
    assert!(
      layout.rows[1]
        .laid_out_events
        .is_empty()
    );
  }

  #[test]
  fn layout_is_idempotent() {
    let events = vec![
      task(
        "a",
        "2026-02-02T09:00:00",
        "2026-02-04T09:00:00"
      ),
      task(
        "b",
        "2026-02-03T09:00:00",
        "2026-02-03T11:00:00"
      ),
      task("broken", "garbage", "")
    ];
    let config = LayoutConfig::default();
    let first = lay_out_month(
      &resolve_events(
        &events,
        &config.timezone
      ),
      date(2026, 2, 14),
      &config
    );
    let second = lay_out_month(
      &resolve_events(
        &events,
        &config.timezone
      ),
      date(2026, 2, 14),
      &config
    );
    assert_eq!(first, second);
    assert_eq!(
      serde_json::to_string(&first)
        .expect("serialize"),
      serde_json::to_string(&second)
        .expect("serialize")
    );
  }
}
