use std::collections::BTreeMap;

use chrono::{
  Datelike,
  NaiveDate
};
use serde::Serialize;
use tracing::{
  debug,
  warn
};

use crate::config::LayoutConfig;
use crate::datetime::{
  DayKey,
  add_days,
  first_day_of_month,
  last_day_of_month,
  shift_months,
  start_of_week
};
use crate::event::{
  EventKind,
  EventSpan,
  ResolvedEvent
};

/// Coarse view of one month: which
/// event kinds touch each day.
#[derive(
  Debug, Clone, PartialEq, Serialize,
)]
#[serde(rename_all = "camelCase")]
pub struct MonthSummary {
  pub month_date:    NaiveDate,
  pub days:          Vec<NaiveDate>,
  /// Distinct kinds per day, in the
  /// order first seen.
  pub events_by_day:
    BTreeMap<DayKey, Vec<EventKind>>
}

/// Day-by-day walk over an event span
/// that stops after `cap` steps.
#[derive(Debug, Clone)]
pub struct DayWalk {
  next:      NaiveDate,
  last:      NaiveDate,
  remaining: usize,
  done:      bool
}

impl DayWalk {
  pub fn new(
    span: &EventSpan,
    cap: usize
  ) -> Self {
    Self {
      next:      span.start_day(),
      last:      span.end_day(),
      remaining: cap,
      done:      span.is_inverted()
    }
  }

  /// True when the cap cut the walk
  /// short.
  pub fn was_capped(&self) -> bool {
    !self.done && self.remaining == 0
  }
}

impl Iterator for DayWalk {
  type Item = NaiveDate;

  fn next(&mut self) -> Option<Self::Item> {
    if self.done || self.remaining == 0 {
      return None;
    }

    let day = self.next;
    self.remaining -= 1;
    if day >= self.last {
      self.done = true;
    } else {
      self.next = add_days(day, 1);
    }
    Some(day)
  }
}

/// Week-aligned grid of days shown for
/// the month starting at `month`.
pub fn month_grid_days(
  month: NaiveDate,
  config: &LayoutConfig
) -> Vec<NaiveDate> {
  let first = first_day_of_month(
    month.year(),
    month.month()
  );
  let last = last_day_of_month(
    month.year(),
    month.month()
  );

  let mut days = Vec::new();
  let mut cursor =
    start_of_week(first, config.week_start);
  loop {
    for _ in 0..7 {
      days.push(cursor);
      cursor = add_days(cursor, 1);
    }
    if cursor > last {
      break;
    }
  }
  days
}

#[tracing::instrument(skip(entries, config), fields(count = entries.len()))]
pub fn summarize_months(
  entries: &[ResolvedEvent<'_>],
  reference: NaiveDate,
  months: usize,
  config: &LayoutConfig
) -> Vec<MonthSummary> {
  let first_month = first_day_of_month(
    reference.year(),
    reference.month()
  );
  let grids = (0..months)
    .map(|offset| {
      let month = shift_months(
        first_month,
        offset as i32
      );
      let days =
        month_grid_days(month, config);
      (month, days)
    })
    .collect::<Vec<_>>();

  let (Some(window_start), Some(window_end)) = (
    grids
      .first()
      .and_then(|(_, days)| days.first())
      .copied(),
    grids
      .last()
      .and_then(|(_, days)| days.last())
      .copied()
  ) else {
    return Vec::new();
  };

  let kinds_by_day = collect_kinds_by_day(
    entries,
    DayKey::from(window_start),
    DayKey::from(window_end),
    config.day_walk_cap
  );

  grids
    .into_iter()
    .map(|(month_date, days)| {
      let events_by_day = days
        .iter()
        .filter_map(|day| {
          let key = DayKey::from(*day);
          kinds_by_day
            .get(&key)
            .map(|kinds| (key, kinds.clone()))
        })
        .collect();
      MonthSummary {
        month_date,
        days,
        events_by_day
      }
    })
    .collect()
}

/// Walks every event day by day and
/// records its kind on each visited day
/// inside `[from, to]`.
pub fn collect_kinds_by_day(
  entries: &[ResolvedEvent<'_>],
  from: DayKey,
  to: DayKey,
  cap: usize
) -> BTreeMap<DayKey, Vec<EventKind>> {
  let mut by_day: BTreeMap<
    DayKey,
    Vec<EventKind>
  > = BTreeMap::new();
  let mut capped = 0_usize;

  for entry in entries {
    let kind = entry.event.kind();
    let mut walk =
      DayWalk::new(&entry.span, cap);
    for day in walk.by_ref() {
      let key = DayKey::from(day);
      if key < from || key > to {
        continue;
      }
      let kinds =
        by_day.entry(key).or_default();
      if !kinds.contains(&kind) {
        kinds.push(kind);
      }
    }
    if walk.was_capped() {
      capped += 1;
      warn!(
        id = %entry.event.id,
        start = %entry.span.start_key,
        end = %entry.span.end_key,
        cap,
        "day walk capped"
      );
    }
  }

  debug!(
    days = by_day.len(),
    capped,
    "kinds collected by day"
  );
  by_day
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

  fn invoice(
    id: &str,
    start: &str,
    end: &str
  ) -> Event {
    Event::new(
      id,
      EventSource::Invoice {
        source_id: None
      },
      start,
      end
    )
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
  fn walk_stops_at_cap() {
    let event = task(
      "decade",
      "2026-01-01T09:00:00",
      "2036-01-01T09:00:00"
    );
    let span = event.span(&chrono_tz::UTC);
    let mut walk = DayWalk::new(&span, 730);
    let steps = walk.by_ref().count();

    assert_eq!(steps, 730);
    assert!(walk.was_capped());
  }

  #[test]
  fn walk_covers_inclusive_range() {
    let event = task(
      "three",
      "2026-02-16T09:00:00",
      "2026-02-18T01:00:00"
    );
    let span = event.span(&chrono_tz::UTC);
    let mut walk = DayWalk::new(&span, 730);
    let days = walk.by_ref().collect::<Vec<_>>();

    assert_eq!(
      days,
      vec![
        date(2026, 2, 16),
        date(2026, 2, 17),
        date(2026, 2, 18)
      ]
    );
    assert!(!walk.was_capped());
  }

  #[test]
  fn inverted_walk_is_empty() {
    let event = task(
      "inverted",
      "2026-02-18T09:00:00",
      "2026-02-16T09:00:00"
    );
    let span = event.span(&chrono_tz::UTC);
    assert_eq!(
      DayWalk::new(&span, 730).count(),
      0
    );

    let same_day = task(
      "inverted-same-day",
      "2026-02-17T12:00:00",
      "2026-02-17T11:00:00"
    )
    .span(&chrono_tz::UTC);
    let mut walk =
      DayWalk::new(&same_day, 730);
    assert_eq!(walk.next(), None);
    assert!(!walk.was_capped());
  }

  #[test]
  fn kinds_are_deduplicated_in_first_seen_order()
  {
    let events = vec![
      invoice(
        "i1",
        "2026-02-17T09:00:00",
        "2026-02-17T09:00:00"
      ),
      task(
        "t1",
        "2026-02-16T09:00:00",
        "2026-02-18T09:00:00"
      ),
      invoice(
        "i2",
        "2026-02-17T12:00:00",
        "2026-02-17T12:00:00"
      ),
    ];
    let resolved = resolve_events(
      &events,
      &chrono_tz::UTC
    );
    let summaries = summarize_months(
      &resolved,
      date(2026, 2, 10),
      3,
      &LayoutConfig::default()
    );

    assert_eq!(summaries.len(), 3);
    assert_eq!(
      summaries[0].month_date,
      date(2026, 2, 1)
    );
    assert_eq!(
      summaries[2].month_date,
      date(2026, 4, 1)
    );

    let by_day = &summaries[0].events_by_day;
    assert_eq!(
      by_day.get(&DayKey::from(date(
        2026, 2, 17
      ))),
      Some(&vec![
        EventKind::Invoice,
        EventKind::Task
      ])
    );
    assert_eq!(
      by_day.get(&DayKey::from(date(
        2026, 2, 16
      ))),
      Some(&vec![EventKind::Task])
    );
    assert!(
      summaries[1]
        .events_by_day
        .is_empty()
    );
  }

  #[test]
  fn six_month_grids_are_week_aligned() {
    let config = LayoutConfig::default();
    let summaries = summarize_months(
      &[],
      date(2026, 7, 4),
      6,
      &config
    );

    assert_eq!(summaries.len(), 6);
    for summary in &summaries {
      assert_eq!(summary.days.len() % 7, 0);
      assert_eq!(
        summary.days[0],
        start_of_week(
          summary.month_date,
          config.week_start
        )
      );
    }
    assert_eq!(
      summaries[5].month_date,
      date(2026, 12, 1)
    );
  }

  #[test]
  fn long_events_outside_cap_do_not_reach_window()
  {
    // Starts three years before the
    // window; the 730-day walk ends long
    // before February 2026.
    let events = vec![task(
      "ancient",
      "2023-01-01T09:00:00",
      "2030-01-01T09:00:00"
    )];
    let resolved = resolve_events(
      &events,
      &chrono_tz::UTC
    );
    let summaries = summarize_months(
      &resolved,
      date(2026, 2, 1),
      3,
      &LayoutConfig::default()
    );
    assert!(
      summaries
        .iter()
        .all(|summary| summary
          .events_by_day
          .is_empty())
    );
  }
}
