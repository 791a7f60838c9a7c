use std::collections::BTreeMap;

use chrono::{
  DateTime,
  NaiveDate,
  Timelike,
  Utc
};
use chrono_tz::Tz;
use serde::ser::SerializeStruct;
use serde::{
  Serialize,
  Serializer
};

use crate::config::LayoutConfig;
use crate::datetime::{
  DayKey,
  local_day
};
use crate::event::{
  EventSpan,
  ResolvedEvent
};

const MINUTES_PER_DAY: i64 = 24 * 60;

/// Vertical placement of a timed event
/// within one day column, in minutes
/// from the top of the visible window.
/// Serializes as `{ top, height }` or
/// `{ hidden: true }`.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum TimedStyle {
  Visible { top: i64, height: i64 },
  Hidden
}

impl TimedStyle {
  pub fn is_hidden(&self) -> bool {
    matches!(self, Self::Hidden)
  }
}

impl Serialize for TimedStyle {
  fn serialize<S>(
    &self,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    match self {
      | Self::Visible {
        top,
        height
      } => {
        let mut state = serializer
          .serialize_struct(
            "TimedStyle",
            2
          )?;
        state.serialize_field("top", top)?;
        state.serialize_field(
          "height", height
        )?;
        state.end()
      }
      | Self::Hidden => {
        let mut state = serializer
          .serialize_struct(
            "TimedStyle",
            1
          )?;
        state
          .serialize_field("hidden", &true)?;
        state.end()
      }
    }
  }
}

/// Event id -> day -> style.
pub type StyleLookup = BTreeMap<
  String,
  BTreeMap<DayKey, TimedStyle>
>;

/// Position of the current-time line on
/// today's column.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize,
)]
#[serde(rename_all = "camelCase")]
pub struct NowLine {
  pub day:    DayKey,
  pub offset: i64
}

/// Wall-clock minutes of `instant`
/// measured from local midnight of
/// `day`. Earlier days give negative
/// values, later days values past 1440.
pub fn minutes_from_day_start(
  instant: DateTime<Utc>,
  day: NaiveDate,
  tz: &Tz
) -> i64 {
  let local = instant.with_timezone(tz);
  let day_offset =
    (local.date_naive() - day).num_days();
  day_offset * MINUTES_PER_DAY
    + i64::from(local.hour()) * 60
    + i64::from(local.minute())
}

/// Style of an event on `day`, clamped
/// to the configured hour window.
pub fn timed_style(
  span: &EventSpan,
  day: NaiveDate,
  config: &LayoutConfig
) -> TimedStyle {
  if span.is_inverted() {
    return TimedStyle::Hidden;
  }

  let tz = &config.timezone;
  let start = minutes_from_day_start(
    span.start, day, tz
  );
  let end =
    minutes_from_day_start(span.end, day, tz);
  let window_start =
    config.window_start_minute();
  let window_end =
    config.window_end_minute();

  let outside = if start == end {
    start < window_start
      || start >= window_end
  } else {
    start >= window_end
      || end <= window_start
  };
  if outside {
    return TimedStyle::Hidden;
  }

  let window_height =
    window_end - window_start;
  let top =
    start.max(window_start) - window_start;
  let bottom =
    end.min(window_end) - window_start;
  let height = (bottom - top)
    .max(config.min_event_height)
    .min(window_height);
  // Short events near the window end are
  // lifted so the block stays inside.
  TimedStyle::Visible {
    top: top.min(window_height - height),
    height
  }
}

/// Styles for every (event, day) pair
/// where the event touches the day.
pub fn style_lookup(
  entries: &[ResolvedEvent<'_>],
  days: &[NaiveDate],
  config: &LayoutConfig
) -> StyleLookup {
  let mut lookup = StyleLookup::new();
  for entry in entries {
    for day in days {
      if !entry.span.covers_day(*day) {
        continue;
      }
      lookup
        .entry(entry.event.id.clone())
        .or_default()
        .insert(
          DayKey::from(*day),
          timed_style(
            &entry.span,
            *day,
            config
          )
        );
    }
  }

  let hidden = lookup
    .values()
    .flat_map(|days| days.values())
    .filter(|style| style.is_hidden())
    .count();
  tracing::debug!(
    events = lookup.len(),
    hidden,
    "timed styles computed"
  );
  lookup
}

/// Current-time offset for `day`, only
/// when it is today and `now` lies in
/// the visible window.
pub fn now_indicator(
  day: NaiveDate,
  now: DateTime<Utc>,
  config: &LayoutConfig
) -> Option<NowLine> {
  let tz = &config.timezone;
  if local_day(now, tz) != day {
    return None;
  }

  let minutes =
    minutes_from_day_start(now, day, tz);
  let window_start =
    config.window_start_minute();
  if minutes < window_start
    || minutes >= config.window_end_minute()
  {
    return None;
  }

  Some(NowLine {
    day:    DayKey::from(day),
    offset: minutes - window_start
  })
}

#[cfg(test)]
mod tests {
  use chrono::{
    NaiveDate,
    TimeZone
  };

  use super::*;
  use crate::event::{
    Event,
    EventSource
  };

  fn date(
    y: i32,
    m: u32,
    d: u32
  ) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d)
      .expect("valid date")
  }

  fn span(start: &str, end: &str) -> EventSpan {
    Event::new(
      "e",
      EventSource::Comment {
        project_id: None,
        brand_id:   None
      },
      start,
      end
    )
    .span(&chrono_tz::UTC)
  }

  #[test]
  fn late_event_is_hidden() {
    let style = timed_style(
      &span(
        "2026-02-17T22:00:00",
        "2026-02-17T23:30:00"
      ),
      date(2026, 2, 17),
      &LayoutConfig::default()
    );
    assert_eq!(style, TimedStyle::Hidden);
  }

  #[test]
  fn clamps_to_window_end() {
    let style = timed_style(
      &span(
        "2026-02-17T20:30:00",
        "2026-02-17T22:00:00"
      ),
      date(2026, 2, 17),
      &LayoutConfig::default()
    );
    // Top at 20:30 (870 after 06:00),
    // bottom at the 22:00 boundary.
    assert_eq!(
      style,
      TimedStyle::Visible {
        top:    870,
        height: 90
      }
    );
  }

  #[test]
  fn clamps_to_window_start() {
    let style = timed_style(
      &span(
        "2026-02-17T05:00:00",
        "2026-02-17T07:00:00"
      ),
      date(2026, 2, 17),
      &LayoutConfig::default()
    );
    assert_eq!(
      style,
      TimedStyle::Visible {
        top:    0,
        height: 60
      }
    );
  }

  #[test]
  fn short_events_get_min_height() {
    let style = timed_style(
      &span(
        "2026-02-17T09:00:00",
        "2026-02-17T09:05:00"
      ),
      date(2026, 2, 17),
      &LayoutConfig::default()
    );
    assert_eq!(
      style,
      TimedStyle::Visible {
        top:    180,
        height: 20
      }
    );

    let point = timed_style(
      &span(
        "2026-02-17T06:00:00",
        "2026-02-17T06:00:00"
      ),
      date(2026, 2, 17),
      &LayoutConfig::default()
    );
    assert_eq!(
      point,
      TimedStyle::Visible {
        top:    0,
        height: 20
      }
    );
  }

  #[test]
  fn min_height_stays_inside_window() {
    let config = LayoutConfig::default();
    let style = timed_style(
      &span(
        "2026-02-17T21:55:00",
        "2026-02-17T22:00:00"
      ),
      date(2026, 2, 17),
      &config
    );
    let window = config.window_end_minute()
      - config.window_start_minute();
    assert_eq!(window, 960);
    assert_eq!(
      style,
      TimedStyle::Visible {
        top:    940,
        height: 20
      }
    );
  }

  #[test]
  fn inverted_and_early_events_are_hidden()
  {
    let config = LayoutConfig::default();
    let day = date(2026, 2, 17);
    assert!(
      timed_style(
        &span(
          "2026-02-17T12:00:00",
          "2026-02-17T11:00:00"
        ),
        day,
        &config
      )
      .is_hidden()
    );
    assert!(
      timed_style(
        &span(
          "2026-02-17T04:00:00",
          "2026-02-17T06:00:00"
        ),
        day,
        &config
      )
      .is_hidden()
    );
  }

  #[test]
  fn hidden_style_serializes_as_flag() {
    let json =
      serde_json::to_string(&TimedStyle::Hidden)
        .expect("serialize");
    assert_eq!(json, r#"{"hidden":true}"#);

    let visible = serde_json::to_string(
      &TimedStyle::Visible {
        top:    30,
        height: 45
      }
    )
    .expect("serialize");
    assert_eq!(
      visible,
      r#"{"top":30,"height":45}"#
    );
  }

  #[test]
  fn now_line_only_on_today() {
    let config = LayoutConfig::default();
    let now = Utc
      .with_ymd_and_hms(
        2026, 2, 17, 9, 30, 0
      )
      .single()
      .expect("valid now");

    assert_eq!(
      now_indicator(
        date(2026, 2, 17),
        now,
        &config
      ),
      Some(NowLine {
        day:    DayKey::from(date(
          2026, 2, 17
        )),
        offset: 210
      })
    );
    assert_eq!(
      now_indicator(
        date(2026, 2, 18),
        now,
        &config
      ),
      None
    );

    let night = Utc
      .with_ymd_and_hms(
        2026, 2, 17, 23, 0, 0
      )
      .single()
      .expect("valid now");
    assert_eq!(
      now_indicator(
        date(2026, 2, 17),
        night,
        &config
      ),
      None
    );
  }

  #[test]
  fn minutes_follow_wall_clock_across_dst()
  {
    // New York springs forward on
    // 2026-03-08 at 02:00.
    let tz = chrono_tz::America::New_York;
    let instant = tz
      .with_ymd_and_hms(
        2026, 3, 8, 10, 0, 0
      )
      .single()
      .expect("valid local time")
      .with_timezone(&Utc);
    assert_eq!(
      minutes_from_day_start(
        instant,
        date(2026, 3, 8),
        &tz
      ),
      600
    );
    assert_eq!(
      minutes_from_day_start(
        instant,
        date(2026, 3, 9),
        &tz
      ),
      600 - 1440
    );
  }
}
