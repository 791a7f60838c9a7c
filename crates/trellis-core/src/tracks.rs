use std::cmp::Ordering;

use chrono::NaiveDate;
use tracing::{
  debug,
  warn
};

use crate::datetime::{
  DayKey,
  add_days
};
use crate::event::{
  LaidOutEvent,
  ResolvedEvent
};

/// A run of `width` consecutive day
/// columns starting at `start`.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct DayWindow {
  pub start: NaiveDate,
  pub width: usize
}

impl DayWindow {
  pub fn new(
    start: NaiveDate,
    width: usize
  ) -> Self {
    Self {
      start,
      width: width.max(1)
    }
  }

  pub fn week(start: NaiveDate) -> Self {
    Self::new(start, 7)
  }

  pub fn single(day: NaiveDate) -> Self {
    Self::new(day, 1)
  }

  /// Last day inside the window.
  pub fn end(&self) -> NaiveDate {
    add_days(
      self.start,
      self.width as i64 - 1
    )
  }

  pub fn days(&self) -> Vec<NaiveDate> {
    (0..self.width)
      .map(|offset| {
        add_days(
          self.start,
          offset as i64
        )
      })
      .collect()
  }

  /// Column offset of `day`; negative or
  /// `>= width` when outside.
  pub fn index_of(
    &self,
    day: NaiveDate
  ) -> i64 {
    (day - self.start).num_days()
  }

  /// Inclusive day-key overlap test.
  pub fn intersects(
    &self,
    start_key: DayKey,
    end_key: DayKey
  ) -> bool {
    start_key <= DayKey::from(self.end())
      && end_key
        >= DayKey::from(self.start)
  }
}

/// Inclusive range of day indices
/// relative to a window start. May
/// extend past either edge.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct DayInterval {
  pub start_idx: i64,
  pub end_idx:   i64
}

impl DayInterval {
  /// Intersection with `[0, width)`, or
  /// `None` when empty or inverted.
  fn clip(
    self,
    width: usize
  ) -> Option<(usize, usize)> {
    if self.end_idx < self.start_idx {
      return None;
    }
    let first = self.start_idx.max(0);
    let last =
      self.end_idx.min(width as i64 - 1);
    if first > last {
      return None;
    }
    Some((first as usize, last as usize))
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct Placement {
  pub start_col: usize,
  pub span:      usize,
  pub track:     usize
}

/// Order in which events claim lanes.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum TrackOrder {
  /// Start day ascending, input order
  /// on ties.
  ByStart,
  /// Start day ascending, then longest
  /// first, then earliest start time.
  /// Used for the all-day lane.
  LongestFirst
}

/// `tracks[track][col]` occupancy,
/// allocated per call.
struct OccupancyGrid {
  width:      usize,
  soft_limit: usize,
  tracks:     Vec<Vec<bool>>
}

impl OccupancyGrid {
  fn new(
    width: usize,
    soft_limit: usize
  ) -> Self {
    Self {
      width,
      soft_limit,
      tracks: vec![
        vec![false; width];
        soft_limit
      ]
    }
  }

  fn is_free(
    &self,
    track: usize,
    first: usize,
    last: usize
  ) -> bool {
    self.tracks[track][first..=last]
      .iter()
      .all(|taken| !taken)
  }

  fn claim(
    &mut self,
    first: usize,
    last: usize
  ) -> usize {
    let track = (0..self.tracks.len())
      .find(|&track| {
        self.is_free(track, first, last)
      })
      .unwrap_or_else(|| {
        if self.tracks.len()
          == self.soft_limit
        {
          warn!(
            soft_limit = self.soft_limit,
            "lane grid exhausted; growing"
          );
        }
        self
          .tracks
          .push(vec![false; self.width]);
        self.tracks.len() - 1
      });

    for cell in
      &mut self.tracks[track][first..=last]
    {
      *cell = true;
    }
    track
  }
}

/// Greedy first-fit lane assignment
/// over a fixed number of day columns.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct TrackAllocator {
  width:          usize,
  initial_tracks: usize
}

impl TrackAllocator {
  pub fn new(
    width: usize,
    initial_tracks: usize
  ) -> Self {
    Self {
      width:          width.max(1),
      initial_tracks: initial_tracks
        .max(1)
    }
  }

  /// Places `intervals` in the order
  /// given. Entries that are inverted or
  /// miss the window get `None`.
  pub fn allocate(
    &self,
    intervals: &[DayInterval]
  ) -> Vec<Option<Placement>> {
    let mut grid = OccupancyGrid::new(
      self.width,
      self.initial_tracks
    );

    intervals
      .iter()
      .map(|interval| {
        let (first, last) =
          interval.clip(self.width)?;
        let track =
          grid.claim(first, last);
        Some(Placement {
          start_col: first,
          span: last - first + 1,
          track
        })
      })
      .collect()
  }
}

/// Lays out `entries` on `window`,
/// returning events in placement order.
/// Entries outside the window or with
/// inverted ranges are dropped.
#[tracing::instrument(skip(entries), fields(count = entries.len()))]
pub fn lay_out_tracks(
  entries: &[ResolvedEvent<'_>],
  window: DayWindow,
  order: TrackOrder,
  initial_tracks: usize
) -> Vec<LaidOutEvent> {
  let mut ordered: Vec<(
    &ResolvedEvent<'_>,
    DayInterval
  )> = entries
    .iter()
    .filter(|entry| {
      !entry.span.is_inverted()
    })
    .map(|entry| {
      (
        entry,
        DayInterval {
          start_idx: window.index_of(
            entry.span.start_day()
          ),
          end_idx:   window.index_of(
            entry.span.end_day()
          )
        }
      )
    })
    .collect();

  ordered.sort_by(|a, b| {
    compare_entries(a, b, order)
  });

  let intervals = ordered
    .iter()
    .map(|(_, interval)| *interval)
    .collect::<Vec<_>>();
  let placements = TrackAllocator::new(
    window.width,
    initial_tracks
  )
  .allocate(&intervals);

  let mut dropped =
    entries.len() - ordered.len();
  let laid_out = ordered
    .iter()
    .zip(placements)
    .filter_map(
      |((entry, _), placement)| {
        let Some(placement) = placement
        else {
          dropped += 1;
          return None;
        };
        Some(LaidOutEvent {
          event:     entry.event.clone(),
          start_col: placement.start_col,
          span:      placement.span,
          track:     placement.track
        })
      }
    )
    .collect::<Vec<_>>();

  debug!(
    window_start = %window.start,
    width = window.width,
    placed = laid_out.len(),
    dropped,
    tracks = track_count(&laid_out),
    "tracks allocated"
  );
  laid_out
}

/// Number of lanes in use,
/// `max(track) + 1`.
pub fn track_count(
  events: &[LaidOutEvent]
) -> usize {
  events
    .iter()
    .map(|event| event.track + 1)
    .max()
    .unwrap_or(0)
}

fn compare_entries(
  a: &(&ResolvedEvent<'_>, DayInterval),
  b: &(&ResolvedEvent<'_>, DayInterval),
  order: TrackOrder
) -> Ordering {
  let by_start =
    a.1.start_idx.cmp(&b.1.start_idx);
  match order {
    | TrackOrder::ByStart => by_start,
    | TrackOrder::LongestFirst => {
      by_start
        .then_with(|| {
          b.0
            .span
            .duration()
            .cmp(&a.0.span.duration())
        })
        .then_with(|| {
          a.0.span.start.cmp(&b.0.span.start)
        })
    }
  }
}
