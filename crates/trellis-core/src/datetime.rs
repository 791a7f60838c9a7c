use std::fmt;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  TimeZone,
  Utc,
  Weekday
};
use chrono_tz::Tz;
use regex::Regex;
use serde::{
  Deserialize,
  Deserializer,
  Serialize,
  Serializer
};

const TIMEZONE_CONFIG_FILE: &str =
  "trellis-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "TRELLIS_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "TRELLIS_TIME_CONFIG";
const DEFAULT_PROJECT_TIMEZONE: &str =
  "UTC";

const NAIVE_DATETIME_FORMATS: [&str;
  4] = [
  "%Y-%m-%dT%H:%M:%S%.f",
  "%Y-%m-%dT%H:%M",
  "%Y-%m-%d %H:%M:%S",
  "%Y-%m-%d %H:%M"
];

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

/// A point in time as handed over by the
/// event-aggregation layer.
///
/// Upstream records mix several shapes:
/// ISO strings, epoch milliseconds and
/// `{ seconds, nanoseconds }` objects.
/// Anything else is kept as
/// `Unrecognized` and resolves to the
/// epoch, so one broken record never
/// fails a whole payload.
#[derive(
  Debug,
  Clone,
  Default,
  PartialEq,
  Serialize,
  Deserialize,
)]
#[serde(untagged)]
pub enum Timestamp {
  Wrapped {
    #[serde(alias = "_seconds")]
    seconds:     i64,
    #[serde(
      default,
      alias = "_nanoseconds"
    )]
    nanoseconds: u32
  },
  Millis(i64),
  Text(String),
  #[default]
  Missing,
  Unrecognized(serde_json::Value)
}

impl<T: TimeZone> From<DateTime<T>>
  for Timestamp
{
  fn from(dt: DateTime<T>) -> Self {
    Self::Wrapped {
      seconds:     dt.timestamp(),
      nanoseconds: dt
        .timestamp_subsec_nanos()
    }
  }
}

impl From<&str> for Timestamp {
  fn from(raw: &str) -> Self {
    Self::Text(raw.to_string())
  }
}

impl Timestamp {
  /// Resolves to an absolute instant.
  /// Naive strings are read as wall
  /// clock time in `tz`.
  pub fn resolve(
    &self,
    tz: &Tz
  ) -> Option<DateTime<Utc>> {
    match self {
      | Self::Wrapped {
        seconds,
        nanoseconds
      } => {
        DateTime::from_timestamp(
          *seconds,
          *nanoseconds
        )
      }
      | Self::Millis(millis) => {
        DateTime::from_timestamp_millis(
          *millis
        )
      }
      | Self::Text(raw) => {
        parse_timestamp_text(raw, tz)
      }
      | Self::Missing
      | Self::Unrecognized(_) => None
    }
  }

  /// Like [`Timestamp::resolve`] but
  /// degrades to the epoch.
  pub fn instant_or_epoch(
    &self,
    tz: &Tz
  ) -> DateTime<Utc> {
    match self.resolve(tz) {
      | Some(instant) => instant,
      | None => {
        if matches!(self, Self::Missing)
        {
          tracing::debug!(
            "missing timestamp; \
             using epoch"
          );
        } else {
          tracing::warn!(
            timestamp = ?self,
            "unparseable timestamp; \
             using epoch"
          );
        }
        DateTime::<Utc>::UNIX_EPOCH
      }
    }
  }
}

fn parse_timestamp_text(
  raw: &str,
  tz: &Tz
) -> Option<DateTime<Utc>> {
  let token = raw.trim();
  if token.is_empty() {
    return None;
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Some(dt.with_timezone(&Utc));
  }

  for fmt in NAIVE_DATETIME_FORMATS {
    if let Ok(naive) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return Some(
        local_to_utc(naive, tz)
      );
    }
  }

  NaiveDate::parse_from_str(
    token, "%Y-%m-%d"
  )
  .ok()
  .map(|day| {
    local_midnight(day, tz)
      .with_timezone(&Utc)
  })
}

/// Canonical identifier of one local
/// calendar day. Displays and
/// serializes as `YYYY-MM-DD`, and
/// orders the same way those strings
/// do.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
)]
pub struct DayKey(NaiveDate);

impl DayKey {
  pub fn date(self) -> NaiveDate {
    self.0
  }
}

impl From<NaiveDate> for DayKey {
  fn from(day: NaiveDate) -> Self {
    Self(day)
  }
}

impl fmt::Display for DayKey {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    write!(
      f,
      "{}",
      self.0.format("%Y-%m-%d")
    )
  }
}

impl Serialize for DayKey {
  fn serialize<S>(
    &self,
    serializer: S
  ) -> Result<S::Ok, S::Error>
  where
    S: Serializer
  {
    serializer.collect_str(self)
  }
}

impl<'de> Deserialize<'de> for DayKey {
  fn deserialize<D>(
    deserializer: D
  ) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>
  {
    let raw = String::deserialize(
      deserializer
    )?;
    NaiveDate::parse_from_str(
      &raw, "%Y-%m-%d"
    )
    .map(Self)
    .map_err(serde::de::Error::custom)
  }
}

pub fn epoch_day() -> NaiveDate {
  DateTime::<Utc>::UNIX_EPOCH.date_naive()
}

/// Local calendar day of an instant.
#[must_use]
pub fn local_day(
  instant: DateTime<Utc>,
  tz: &Tz
) -> NaiveDate {
  instant.with_timezone(tz).date_naive()
}

/// Day key of a timestamp, computed
/// from local year/month/day fields.
/// Unparseable input maps to the epoch
/// key.
#[must_use]
pub fn day_key(
  ts: &Timestamp,
  tz: &Tz
) -> DayKey {
  match ts.resolve(tz) {
    | Some(instant) => {
      DayKey(local_day(instant, tz))
    }
    | None => DayKey(epoch_day())
  }
}

/// Local midnight of the day `ts` falls
/// on. Unparseable input yields local
/// midnight of the epoch day.
#[must_use]
pub fn start_of_day(
  ts: &Timestamp,
  tz: &Tz
) -> DateTime<Tz> {
  local_midnight(
    day_key(ts, tz).date(),
    tz
  )
}

/// First instant of `day` in `tz`. When
/// midnight falls in a DST gap the
/// first valid wall clock hour is used.
#[must_use]
pub fn local_midnight(
  day: NaiveDate,
  tz: &Tz
) -> DateTime<Tz> {
  let naive = day.and_time(NaiveTime::MIN);
  match tz.from_local_datetime(&naive) {
    | LocalResult::Single(dt) => dt,
    | LocalResult::Ambiguous(
      first,
      second
    ) => first.min(second),
    | LocalResult::None => {
      tz.from_local_datetime(
        &(naive + Duration::hours(1))
      )
      .earliest()
      .unwrap_or_else(|| {
        tz.from_utc_datetime(&naive)
      })
    }
  }
}

fn local_to_utc(
  naive: NaiveDateTime,
  tz: &Tz
) -> DateTime<Utc> {
  match tz.from_local_datetime(&naive) {
    | LocalResult::Single(local_dt) => {
      local_dt.with_timezone(&Utc)
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::debug!(
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      first.min(second).with_timezone(&Utc)
    }
    | LocalResult::None => {
      tracing::debug!(
        local = %naive,
        "local datetime falls in a DST gap; shifting forward"
      );
      tz.from_local_datetime(
        &(naive + Duration::hours(1))
      )
      .earliest()
      .map(|dt| dt.with_timezone(&Utc))
      .unwrap_or_else(|| naive.and_utc())
    }
  }
}

/// `date` moved by `days`, or `None`
/// past the representable range.
#[must_use]
pub fn checked_add_days(
  date: NaiveDate,
  days: i64
) -> Option<NaiveDate> {
  Duration::try_days(days).and_then(
    |delta| date.checked_add_signed(delta)
  )
}

#[must_use]
pub fn add_days(
  date: NaiveDate,
  days: i64
) -> NaiveDate {
  checked_add_days(date, days)
    .unwrap_or(date)
}

#[must_use]
pub fn start_of_week(
  day: NaiveDate,
  week_start: Weekday
) -> NaiveDate {
  let day_idx = day
    .weekday()
    .num_days_from_monday()
    as i64;
  let start_idx = week_start
    .num_days_from_monday()
    as i64;
  let diff =
    (7 + day_idx - start_idx) % 7;
  add_days(day, -diff)
}

pub fn first_day_of_month(
  year: i32,
  month: u32
) -> NaiveDate {
  NaiveDate::from_ymd_opt(
    year, month, 1
  )
  .unwrap_or(NaiveDate::MIN)
}

pub fn last_day_of_month(
  year: i32,
  month: u32
) -> NaiveDate {
  let (next_year, next_month) =
    if month >= 12 {
      (year.saturating_add(1), 1_u32)
    } else {
      (year, month + 1)
    };
  add_days(
    first_day_of_month(
      next_year, next_month
    ),
    -1
  )
}

/// `date` moved by whole months with the
/// day of month clamped, or `None` past
/// the representable range.
#[must_use]
pub fn checked_shift_months(
  date: NaiveDate,
  months: i64
) -> Option<NaiveDate> {
  let index = i64::from(date.year())
    .checked_mul(12)?
    .checked_add(i64::from(date.month0()))?
    .checked_add(months)?;
  let year =
    i32::try_from(index.div_euclid(12))
      .ok()?;
  let month =
    u32::try_from(index.rem_euclid(12))
      .ok()?
      + 1;

  (1..=date.day()).rev().find_map(|day| {
    NaiveDate::from_ymd_opt(
      year, month, day
    )
  })
}

pub fn shift_months(
  date: NaiveDate,
  months: i32
) -> NaiveDate {
  checked_shift_months(
    date,
    i64::from(months)
  )
  .unwrap_or(date)
}

pub fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token
    .trim()
    .to_ascii_lowercase()
    .as_str()
  {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

pub fn project_timezone() -> &'static Tz
{
  static PROJECT_TZ: OnceLock<Tz> =
    OnceLock::new();
  PROJECT_TZ.get_or_init(
    resolve_project_timezone
  )
}

fn resolve_project_timezone() -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) =
      parse_timezone(&raw, TIMEZONE_ENV_VAR)
  {
    return tz;
  }

  if let Some(path) =
    timezone_config_path()
    && let Some(tz) =
      load_timezone_from_file(&path)
  {
    return tz;
  }

  parse_timezone(
    DEFAULT_PROJECT_TIMEZONE,
    "DEFAULT_PROJECT_TIMEZONE"
  )
  .unwrap_or(chrono_tz::UTC)
}

fn timezone_config_path()
-> Option<PathBuf> {
  if let Ok(raw) = std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
      return Some(PathBuf::from(
        trimmed
      ));
    }
  }

  std::env::current_dir().ok().map(
    |dir| {
      dir.join(TIMEZONE_CONFIG_FILE)
    }
  )
}

fn load_timezone_from_file(
  path: &Path
) -> Option<Tz> {
  if !path.exists() {
    tracing::info!(
      file = %path.display(),
      "timezone config file not found"
    );
    return None;
  }

  let raw = match fs::read_to_string(
    path
  ) {
    | Ok(raw) => raw,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed reading timezone config file"
      );
      return None;
    }
  };

  let parsed = match toml::from_str::<
    TimezoneConfig
  >(&raw)
  {
    | Ok(parsed) => parsed,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %err,
        "failed parsing timezone config file"
      );
      return None;
    }
  };

  let timezone =
    parsed.timezone.or_else(|| {
      parsed.time.and_then(|section| {
        section.timezone
      })
    });
  let Some(timezone) = timezone else {
    tracing::warn!(
      file = %path.display(),
      "timezone config had no timezone field"
    );
    return None;
  };

  parse_timezone(
    timezone.as_str(),
    &format!("file:{}", path.display())
  )
}

pub(crate) fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::info!(
        source,
        timezone = %trimmed,
        "configured project timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

/// Parses the reference day a calendar
/// view is anchored on.
#[tracing::instrument(skip(today), fields(input = input))]
pub fn parse_day_expr(
  input: &str,
  today: NaiveDate,
  tz: &Tz
) -> anyhow::Result<NaiveDate> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();

  match lower.as_str() {
    | "today" | "now" => {
      return Ok(today);
    }
    | "tomorrow" => {
      return Ok(add_days(today, 1));
    }
    | "yesterday" => {
      return Ok(add_days(today, -1));
    }
    | _ => {}
  }

  if token.len() == 4
    && token
      .chars()
      .all(|c| c.is_ascii_digit())
  {
    let year: i32 =
      token.parse().context(
        "invalid 4-digit year"
      )?;
    return NaiveDate::from_ymd_opt(
      year, 1, 1
    )
    .ok_or_else(|| {
      anyhow!(
        "invalid year value: {year}"
      )
    });
  }

  if let Some(target_weekday) =
    parse_weekday_name(&lower)
  {
    return Ok(next_weekday_date(
      today,
      target_weekday
    ));
  }

  if let Some(target_month) =
    parse_month_name(&lower)
  {
    return NaiveDate::from_ymd_opt(
      today.year(),
      target_month,
      1
    )
    .ok_or_else(|| {
      anyhow!(
        "invalid month value: \
         {target_month}"
      )
    });
  }

  let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[dwm])$")
        .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;

  if let Some(caps) =
    rel_re.captures(&lower)
  {
    let negative = caps
      .name("sign")
      .map(|m| m.as_str() == "-")
      .unwrap_or(false);
    let num: i64 = caps
      .name("num")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!(
          "missing relative amount"
        )
      })?
      .parse()
      .context(
        "invalid relative number"
      )?;
    let num =
      if negative { -num } else { num };
    let unit = caps
      .name("unit")
      .map(|m| m.as_str())
      .ok_or_else(|| {
        anyhow!("missing relative unit")
      })?;

    let shifted = match unit {
      | "d" => checked_add_days(today, num),
      | "w" => num
        .checked_mul(7)
        .and_then(|days| {
          checked_add_days(today, days)
        }),
      | "m" => {
        checked_shift_months(today, num)
      }
      | _ => {
        return Err(anyhow!(
          "unknown relative unit: \
           {unit}"
        ));
      }
    };
    return shifted.ok_or_else(|| {
      anyhow!(
        "relative offset out of range: \
         {token}"
      )
    });
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return Ok(date);
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(local_day(
      dt.with_timezone(&Utc),
      tz
    ));
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     today/tomorrow/yesterday, \
     4-digit year, weekday names (e.g. \
     monday), month names (e.g. \
     march), +Nd/+Nw/+Nm, YYYY-MM-DD, \
     RFC3339"
  })
}

/// Parses the "current time" used for
/// the now-indicator.
pub fn parse_now_expr(
  input: &str,
  now: DateTime<Utc>,
  tz: &Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  if token.eq_ignore_ascii_case("now")
  {
    return Ok(now);
  }

  Timestamp::Text(token.to_string())
    .resolve(tz)
    .ok_or_else(|| {
      anyhow!(
        "unrecognized time expression: \
         {input}"
      )
    })
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = from
    .weekday()
    .num_days_from_monday()
    as i64;
  let target_idx = target
    .num_days_from_monday()
    as i64;
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  add_days(from, delta)
}

fn parse_month_name(
  token: &str
) -> Option<u32> {
  match token.trim() {
    | "january" | "jan" => Some(1),
    | "february" | "feb" => Some(2),
    | "march" | "mar" => Some(3),
    | "april" | "apr" => Some(4),
    | "may" => Some(5),
    | "june" | "jun" => Some(6),
    | "july" | "jul" => Some(7),
    | "august" | "aug" => Some(8),
    | "september" | "sep" | "sept" => {
      Some(9)
    }
    | "october" | "oct" => Some(10),
    | "november" | "nov" => Some(11),
    | "december" | "dec" => Some(12),
    | _ => None
  }
}
