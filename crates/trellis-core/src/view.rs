use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{
  DateTime,
  Datelike,
  NaiveDate,
  Utc
};
use serde::Serialize;
use tracing::debug;

use crate::all_day::{
  belongs_in_all_day_lane,
  lay_out_all_day_lane
};
use crate::config::LayoutConfig;
use crate::datetime::{
  add_days,
  checked_add_days,
  checked_shift_months,
  first_day_of_month,
  last_day_of_month,
  shift_months,
  start_of_week
};
use crate::event::{
  Event,
  LaidOutEvent,
  ResolvedEvent,
  resolve_events
};
use crate::filter::{
  EventFilter,
  ScopeDirectory
};
use crate::month::{
  MonthLayout,
  lay_out_month,
  month_row_starts
};
use crate::summary::{
  MonthSummary,
  month_grid_days,
  summarize_months
};
use crate::timed::{
  NowLine,
  StyleLookup,
  now_indicator,
  style_lookup
};
use crate::tracks::DayWindow;

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
  Day,
  Week,
  Month,
  ThreeMonth,
  SixMonth
}

impl ViewMode {
  pub const ALL: [Self; 5] = [
    Self::Day,
    Self::Week,
    Self::Month,
    Self::ThreeMonth,
    Self::SixMonth
  ];

  pub fn as_key(self) -> &'static str {
    match self {
      | Self::Day => "day",
      | Self::Week => "week",
      | Self::Month => "month",
      | Self::ThreeMonth => "3month",
      | Self::SixMonth => "6month"
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      | Self::Day => "Day",
      | Self::Week => "Week",
      | Self::Month => "Month",
      | Self::ThreeMonth => "3 Month",
      | Self::SixMonth => "6 Month"
    }
  }

  pub fn from_key(
    key: &str
  ) -> Option<Self> {
    match key
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "day" => Some(Self::Day),
      | "week" => Some(Self::Week),
      | "month" => Some(Self::Month),
      | "3month" | "three_month"
      | "quarter" => {
        Some(Self::ThreeMonth)
      }
      | "6month" | "six_month"
      | "half" => Some(Self::SixMonth),
      | _ => None
    }
  }

  /// Months shown by the coarse views.
  pub fn month_count(
    self
  ) -> Option<usize> {
    match self {
      | Self::ThreeMonth => Some(3),
      | Self::SixMonth => Some(6),
      | Self::Day
      | Self::Week
      | Self::Month => None
    }
  }
}

impl fmt::Display for ViewMode {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_key())
  }
}

impl FromStr for ViewMode {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    Self::from_key(s).ok_or_else(|| {
      anyhow!(
        "unknown view '{s}' (expected \
         day, week, month, 3month or \
         6month)"
      )
    })
  }
}

/// Moves the reference date by `step`
/// view units. Month steps clamp the
/// day of month.
pub fn shift_focus(
  current: NaiveDate,
  view: ViewMode,
  step: i64
) -> anyhow::Result<NaiveDate> {
  let shifted = match view {
    | ViewMode::Day => {
      checked_add_days(current, step)
    }
    | ViewMode::Week => step
      .checked_mul(7)
      .and_then(|days| {
        checked_add_days(current, days)
      }),
    | ViewMode::Month => {
      checked_shift_months(current, step)
    }
    | ViewMode::ThreeMonth
    | ViewMode::SixMonth => {
      let per_step = view
        .month_count()
        .and_then(|count| {
          i64::try_from(count).ok()
        })
        .unwrap_or(1);
      step.checked_mul(per_step).and_then(
        |months| {
          checked_shift_months(
            current, months
          )
        }
      )
    }
  };

  shifted.ok_or_else(|| {
    anyhow!(
      "cannot move {view} view {step} \
       steps from {current}"
    )
  })
}

/// First and last day drawn by `view`.
pub fn visible_range(
  view: ViewMode,
  reference: NaiveDate,
  config: &LayoutConfig
) -> (NaiveDate, NaiveDate) {
  match view {
    | ViewMode::Day => {
      (reference, reference)
    }
    | ViewMode::Week => {
      let start = start_of_week(
        reference,
        config.week_start
      );
      (start, add_days(start, 6))
    }
    | ViewMode::Month => {
      let starts = month_row_starts(
        reference, config
      );
      let start = starts
        .first()
        .copied()
        .unwrap_or(reference);
      let end = starts
        .last()
        .map(|row| add_days(*row, 6))
        .unwrap_or(reference);
      (start, end)
    }
    | ViewMode::ThreeMonth
    | ViewMode::SixMonth => {
      let months =
        view.month_count().unwrap_or(1);
      let first = first_day_of_month(
        reference.year(),
        reference.month()
      );
      let last_month = shift_months(
        first,
        months as i32 - 1
      );
      let start = month_grid_days(
        first, config
      )
      .first()
      .copied()
      .unwrap_or(first);
      let end = month_grid_days(
        last_month, config
      )
      .last()
      .copied()
      .unwrap_or(last_month);
      (start, end)
    }
  }
}

pub fn view_title(
  view: ViewMode,
  reference: NaiveDate,
  config: &LayoutConfig
) -> String {
  match view {
    | ViewMode::Day => {
      format!(
        "Day View {}",
        reference.format("%A, %Y-%m-%d")
      )
    }
    | ViewMode::Week => {
      let (start, end) = visible_range(
        view, reference, config
      );
      format!(
        "Week View {} - {}",
        start.format("%Y-%m-%d"),
        end.format("%Y-%m-%d")
      )
    }
    | ViewMode::Month => {
      format!(
        "Month View {}",
        reference.format("%B %Y")
      )
    }
    | ViewMode::ThreeMonth
    | ViewMode::SixMonth => {
      let months =
        view.month_count().unwrap_or(1);
      let first = first_day_of_month(
        reference.year(),
        reference.month()
      );
      let last_month = shift_months(
        first,
        months as i32 - 1
      );
      let last = last_day_of_month(
        last_month.year(),
        last_month.month()
      );
      format!(
        "{} View {} - {}",
        view.label(),
        first.format("%b %Y"),
        last.format("%b %Y")
      )
    }
  }
}

/// Day or week view: the all-day header
/// lane above an hour grid.
#[derive(
  Debug, Clone, PartialEq, Serialize,
)]
#[serde(rename_all = "camelCase")]
pub struct TimeGridLayout {
  pub days:           Vec<NaiveDate>,
  pub all_day_events: Vec<LaidOutEvent>,
  pub all_day_rows:   usize,
  pub timed_events:   Vec<Event>,
  /// Event id -> day -> placement, for
  /// every day each timed event touches.
  pub styles:         StyleLookup,
  pub now_line:       Option<NowLine>
}

#[derive(
  Debug, Clone, PartialEq, Serialize,
)]
#[serde(
  tag = "view",
  rename_all = "snake_case"
)]
pub enum ViewLayout {
  Day(TimeGridLayout),
  Week(TimeGridLayout),
  Month(MonthLayout),
  MultiMonth {
    months: Vec<MonthSummary>
  }
}

/// Filters `events` and lays them out
/// for `view` around `reference`.
#[tracing::instrument(
  skip(events, now, config, filter, directory),
  fields(count = events.len())
)]
pub fn layout_view(
  events: &[Event],
  view: ViewMode,
  reference: NaiveDate,
  now: DateTime<Utc>,
  config: &LayoutConfig,
  filter: &EventFilter,
  directory: &ScopeDirectory
) -> ViewLayout {
  let kept = filter.apply(events, directory);
  let entries = resolve_events(
    kept,
    &config.timezone
  );

  let layout = match view {
    | ViewMode::Day => {
      ViewLayout::Day(lay_out_time_grid(
        &entries,
        DayWindow::single(reference),
        now,
        config
      ))
    }
    | ViewMode::Week => {
      let start = start_of_week(
        reference,
        config.week_start
      );
      ViewLayout::Week(lay_out_time_grid(
        &entries,
        DayWindow::week(start),
        now,
        config
      ))
    }
    | ViewMode::Month => {
      ViewLayout::Month(lay_out_month(
        &entries, reference, config
      ))
    }
    | ViewMode::ThreeMonth
    | ViewMode::SixMonth => {
      ViewLayout::MultiMonth {
        months: summarize_months(
          &entries,
          reference,
          view.month_count().unwrap_or(1),
          config
        )
      }
    }
  };

  debug!(
    view = %view,
    reference = %reference,
    "view laid out"
  );
  layout
}

fn lay_out_time_grid(
  entries: &[ResolvedEvent<'_>],
  window: DayWindow,
  now: DateTime<Utc>,
  config: &LayoutConfig
) -> TimeGridLayout {
  let days = window.days();
  let lane = lay_out_all_day_lane(
    entries, window, config
  );

  let timed = entries
    .iter()
    .filter(|entry| {
      !belongs_in_all_day_lane(entry)
        && !entry.span.is_inverted()
        && window.intersects(
          entry.span.start_key,
          entry.span.end_key
        )
    })
    .copied()
    .collect::<Vec<_>>();
  let styles =
    style_lookup(&timed, &days, config);
  let timed_events = timed
    .iter()
    .map(|entry| entry.event.clone())
    .collect();

  let now_line =
    days.iter().find_map(|day| {
      now_indicator(*day, now, config)
    });

  TimeGridLayout {
    days,
    all_day_events: lane.events,
    all_day_rows: lane.rows,
    timed_events,
    styles,
    now_line
  }
}
