use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::str::FromStr;

use anyhow::{
  Context,
  anyhow
};
use chrono::Weekday;
use chrono_tz::Tz;
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::datetime::{
  parse_timezone,
  parse_weekday_name,
  project_timezone
};

pub const DEFAULT_START_HOUR: u32 = 6;
pub const DEFAULT_END_HOUR: u32 = 21;
pub const DEFAULT_MAX_VISIBLE_TRACKS:
  usize = 3;
pub const DEFAULT_DAY_WALK_CAP: usize =
  730;
pub const DEFAULT_MIN_EVENT_HEIGHT: i64 =
  20;
pub const DEFAULT_INITIAL_TRACKS: usize =
  12;

#[derive(Debug, Clone)]
pub struct Config {
  map:              HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::with_defaults();

    let rc = resolve_rc_path(
      rc_override
    )?;
    if let Some(path) = rc {
      info!(trellisrc = %path.display(), "loading trellisrc");
      cfg.load_file(&path)?;
    } else {
      warn!(
        "no trellisrc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  pub fn with_defaults() -> Self {
    let mut cfg = Config {
      map:          HashMap::new(),
      loaded_files: vec![]
    };

    for (key, value) in [
      ("data.location", "~/.trellis"),
      ("color", "on"),
      ("default.view", "month"),
      ("calendar.week_start", "sunday")
    ] {
      cfg
        .map
        .insert(key.to_string(), value.to_string());
    }

    cfg
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  /// Parses `key` with `FromStr`. Absent
  /// keys are `Ok(None)`; malformed ones
  /// are errors.
  pub fn get_parsed<T>(
    &self,
    key: &str
  ) -> anyhow::Result<Option<T>>
  where
    T: FromStr,
    T::Err: std::fmt::Display
  {
    let Some(raw) = self.map.get(key)
    else {
      return Ok(None);
    };

    raw
      .trim()
      .parse::<T>()
      .map(Some)
      .map_err(|err| {
        anyhow!(
          "invalid value for {key}: \
           {raw} ({err})"
        )
      })
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if line.is_empty()
        || line.starts_with('#')
      {
        continue;
      }

      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

/// Tunables of the layout engine.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutConfig {
  /// First visible hour of the timed
  /// grid.
  pub start_hour:         u32,
  /// Last visible hour; the window runs
  /// to the end of this hour.
  pub end_hour:           u32,
  pub max_visible_tracks: usize,
  pub week_start:         Weekday,
  /// Upper bound on days walked per
  /// event by the multi-month summary.
  pub day_walk_cap:       usize,
  pub min_event_height:   i64,
  /// Lanes preallocated per row. The
  /// grid grows past this on demand.
  pub initial_tracks:     usize,
  pub timezone:           Tz
}

impl Default for LayoutConfig {
  fn default() -> Self {
    Self {
      start_hour:         DEFAULT_START_HOUR,
      end_hour:           DEFAULT_END_HOUR,
      max_visible_tracks:
        DEFAULT_MAX_VISIBLE_TRACKS,
      week_start:         Weekday::Sun,
      day_walk_cap:
        DEFAULT_DAY_WALK_CAP,
      min_event_height:
        DEFAULT_MIN_EVENT_HEIGHT,
      initial_tracks:
        DEFAULT_INITIAL_TRACKS,
      timezone:           chrono_tz::UTC
    }
  }
}

impl LayoutConfig {
  #[tracing::instrument(skip(cfg))]
  pub fn from_config(
    cfg: &Config
  ) -> anyhow::Result<Self> {
    let defaults = Self::default();

    let week_start = match cfg
      .get("calendar.week_start")
    {
      | Some(raw) => {
        parse_weekday_name(&raw)
          .ok_or_else(|| {
            anyhow!(
              "invalid value for \
               calendar.week_start: \
               {raw}"
            )
          })?
      }
      | None => defaults.week_start
    };

    let timezone = match cfg
      .get("calendar.timezone")
    {
      | Some(raw) => {
        parse_timezone(
          &raw,
          "calendar.timezone"
        )
        .ok_or_else(|| {
          anyhow!(
            "invalid value for \
             calendar.timezone: {raw}"
          )
        })?
      }
      | None => *project_timezone()
    };

    let mut layout = Self {
      start_hour: cfg
        .get_parsed(
          "calendar.start_hour"
        )?
        .unwrap_or(defaults.start_hour),
      end_hour: cfg
        .get_parsed("calendar.end_hour")?
        .unwrap_or(defaults.end_hour),
      max_visible_tracks: cfg
        .get_parsed(
          "calendar.max_visible_tracks"
        )?
        .unwrap_or(
          defaults.max_visible_tracks
        ),
      week_start,
      day_walk_cap: cfg
        .get_parsed(
          "calendar.day_walk_cap"
        )?
        .unwrap_or(
          defaults.day_walk_cap
        ),
      min_event_height: cfg
        .get_parsed(
          "calendar.min_event_height"
        )?
        .unwrap_or(
          defaults.min_event_height
        ),
      initial_tracks: cfg
        .get_parsed(
          "calendar.initial_tracks"
        )?
        .unwrap_or(
          defaults.initial_tracks
        ),
      timezone
    };

    layout.sanitize();
    info!(
      start_hour = layout.start_hour,
      end_hour = layout.end_hour,
      max_visible_tracks =
        layout.max_visible_tracks,
      week_start = %layout.week_start,
      timezone = %layout.timezone,
      "resolved layout config"
    );
    Ok(layout)
  }

  pub fn sanitize(&mut self) {
    if self.start_hour > 23 {
      self.start_hour = 23;
    }
    if self.end_hour > 23 {
      self.end_hour = 23;
    }
    if self.end_hour < self.start_hour
    {
      self.end_hour = self.start_hour;
    }

    if self.max_visible_tracks == 0 {
      self.max_visible_tracks =
        DEFAULT_MAX_VISIBLE_TRACKS;
    }
    if self.day_walk_cap == 0 {
      self.day_walk_cap =
        DEFAULT_DAY_WALK_CAP;
    }
    if self.initial_tracks == 0 {
      self.initial_tracks =
        DEFAULT_INITIAL_TRACKS;
    }
    if self.min_event_height < 1 {
      self.min_event_height = 1;
    }
  }

  /// Window start in minutes after
  /// local midnight.
  pub fn window_start_minute(
    &self
  ) -> i64 {
    i64::from(self.start_hour) * 60
  }

  /// Exclusive window end in minutes
  /// after local midnight.
  pub fn window_end_minute(&self) -> i64 {
    (i64::from(self.end_hour) + 1) * 60
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var("TRELLISRC")
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping \
       ~/.trellisrc"
    );
    return Ok(None);
  };
  let candidate =
    home.join(".trellisrc");
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(".trellis"))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use std::fs;

  use chrono::Weekday;
  use tempfile::tempdir;

  use super::*;

  #[test]
  fn loads_rc_file_with_include() {
    let dir = tempdir().expect("tempdir");
    let extra = dir.path().join("hours.rc");
    fs::write(
      &extra,
      "calendar.start_hour = 8\n\
       calendar.end_hour = 18 # office\n"
    )
    .expect("write include");
    let main = dir.path().join("trellisrc");
    fs::write(
      &main,
      "# calendar tunables\n\
       include hours.rc\n\
       calendar.week_start = monday\n\
       calendar.timezone = Europe/Berlin\n"
    )
    .expect("write rc");

    let cfg = Config::load(Some(&main))
      .expect("load config");
    assert_eq!(cfg.loaded_files.len(), 2);

    let layout =
      LayoutConfig::from_config(&cfg)
        .expect("layout config");
    assert_eq!(layout.start_hour, 8);
    assert_eq!(layout.end_hour, 18);
    assert_eq!(
      layout.week_start,
      Weekday::Mon
    );
    assert_eq!(
      layout.timezone,
      chrono_tz::Europe::Berlin
    );
    assert_eq!(
      layout.max_visible_tracks,
      DEFAULT_MAX_VISIBLE_TRACKS
    );
  }

  #[test]
  fn overrides_win_and_are_sanitized() {
    let mut cfg = Config::with_defaults();
    cfg.apply_overrides([
      (
        "rc.calendar.start_hour"
          .to_string(),
        "30".to_string()
      ),
      (
        "calendar.end_hour".to_string(),
        "4".to_string()
      ),
      (
        "calendar.max_visible_tracks"
          .to_string(),
        "0".to_string()
      ),
      (
        "calendar.timezone".to_string(),
        "UTC".to_string()
      )
    ]);

    let layout =
      LayoutConfig::from_config(&cfg)
        .expect("layout config");
    assert_eq!(layout.start_hour, 23);
    assert_eq!(layout.end_hour, 23);
    assert_eq!(
      layout.max_visible_tracks,
      DEFAULT_MAX_VISIBLE_TRACKS
    );
  }

  #[test]
  fn malformed_numbers_are_errors() {
    let mut cfg = Config::with_defaults();
    cfg.apply_overrides([(
      "calendar.day_walk_cap".to_string(),
      "lots".to_string()
    )]);

    let err =
      LayoutConfig::from_config(&cfg)
        .expect_err("should fail");
    assert!(
      err
        .to_string()
        .contains("calendar.day_walk_cap")
    );
  }

  #[test]
  fn window_minutes_cover_end_hour() {
    let layout = LayoutConfig::default();
    assert_eq!(
      layout.window_start_minute(),
      360
    );
    assert_eq!(
      layout.window_end_minute(),
      1320
    );
  }
}
