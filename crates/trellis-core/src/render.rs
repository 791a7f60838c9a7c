use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{NaiveDate, Timelike};
use unicode_width::UnicodeWidthStr;

use crate::config::{Config, LayoutConfig};
use crate::datetime::DayKey;
use crate::event::{Event, EventKind, LaidOutEvent};
use crate::month::{MonthLayout, WeekRow};
use crate::summary::MonthSummary;
use crate::timed::TimedStyle;
use crate::view::{TimeGridLayout, ViewLayout};

/// Kinds drawn per day in the coarse views before truncating.
const MAX_SUMMARY_MARKERS: usize = 4;

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color })
    }

    #[tracing::instrument(skip(self, layout, config))]
    pub fn print_view(
        &mut self,
        title: &str,
        layout: &ViewLayout,
        config: &LayoutConfig,
    ) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_view(&mut out, title, layout, config)
    }

    #[tracing::instrument(skip(self, layout))]
    pub fn print_json(&mut self, layout: &ViewLayout) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        serde_json::to_writer_pretty(&mut out, layout)?;
        writeln!(out)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, cfg))]
    pub fn print_config(&mut self, cfg: &Config) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();

        let mut entries = cfg.iter().collect::<Vec<_>>();
        entries.sort();
        let rows = entries
            .into_iter()
            .map(|(key, value)| vec![key.clone(), value.clone()])
            .collect();
        write_table(&mut out, vec!["Key".to_string(), "Value".to_string()], rows)?;

        for file in &cfg.loaded_files {
            writeln!(out, "loaded {}", file.display())?;
        }
        Ok(())
    }

    pub fn write_view<W: Write>(
        &self,
        out: &mut W,
        title: &str,
        layout: &ViewLayout,
        config: &LayoutConfig,
    ) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(title, "1"))?;
        writeln!(out)?;
        match layout {
            ViewLayout::Day(grid) | ViewLayout::Week(grid) => {
                self.write_time_grid(out, grid, config)
            }
            ViewLayout::Month(month) => self.write_month(out, month, config),
            ViewLayout::MultiMonth { months } => self.write_multi_month(out, months),
        }
    }

    fn write_month<W: Write>(
        &self,
        out: &mut W,
        month: &MonthLayout,
        config: &LayoutConfig,
    ) -> anyhow::Result<()> {
        for row in &month.rows {
            self.write_week_row(out, row, month.month, config)?;
            writeln!(out)?;
        }
        Ok(())
    }

    fn write_week_row<W: Write>(
        &self,
        out: &mut W,
        row: &WeekRow,
        month: NaiveDate,
        config: &LayoutConfig,
    ) -> anyhow::Result<()> {
        let headers = row
            .days
            .iter()
            .map(|day| {
                let label = day.format("%a %d").to_string();
                if day.format("%Y-%m").to_string() == month.format("%Y-%m").to_string() {
                    label
                } else {
                    self.paint(&label, "2")
                }
            })
            .collect::<Vec<_>>();

        let mut lines = Vec::new();
        for track in 0..config.max_visible_tracks {
            let line = row
                .cells
                .iter()
                .enumerate()
                .map(|(col, cell)| {
                    cell.visible(config.max_visible_tracks)
                        .find(|event| event.track == track)
                        .map(|event| self.bar_label(event, col))
                        .unwrap_or_default()
                })
                .collect::<Vec<_>>();
            if line.iter().any(|cell| !cell.is_empty()) {
                lines.push(line);
            }
        }

        if row.cells.iter().any(|cell| cell.overflow > 0) {
            lines.push(
                row.cells
                    .iter()
                    .map(|cell| {
                        if cell.overflow > 0 {
                            self.paint(&format!("+{} more", cell.overflow), "2")
                        } else {
                            String::new()
                        }
                    })
                    .collect(),
            );
        }

        write_table(out, headers, lines)
    }

    fn write_time_grid<W: Write>(
        &self,
        out: &mut W,
        grid: &TimeGridLayout,
        config: &LayoutConfig,
    ) -> anyhow::Result<()> {
        if !grid.all_day_events.is_empty() {
            writeln!(out, "All day ({} rows)", grid.all_day_rows)?;
            let rows = grid
                .all_day_events
                .iter()
                .map(|laid_out| {
                    let first = grid.days.get(laid_out.start_col);
                    let last = grid.days.get(laid_out.end_col().saturating_sub(1));
                    let days = match (first, last) {
                        (Some(first), Some(last)) if first == last => {
                            first.format("%a %d").to_string()
                        }
                        (Some(first), Some(last)) => {
                            format!("{} - {}", first.format("%a %d"), last.format("%a %d"))
                        }
                        _ => String::new(),
                    };
                    vec![
                        laid_out.track.to_string(),
                        days,
                        self.paint_kind(laid_out.event.kind()),
                        event_label(&laid_out.event).to_string(),
                    ]
                })
                .collect();
            write_table(
                &mut *out,
                vec![
                    "Row".to_string(),
                    "Days".to_string(),
                    "Type".to_string(),
                    "Title".to_string(),
                ],
                rows,
            )?;
            writeln!(out)?;
        }

        let mut rows = Vec::new();
        for day in &grid.days {
            let key = DayKey::from(*day);
            for event in &grid.timed_events {
                let Some(style) = grid.styles.get(&event.id).and_then(|days| days.get(&key))
                else {
                    continue;
                };
                rows.push(vec![
                    day.format("%a %d").to_string(),
                    time_range(event, config),
                    self.paint_kind(event.kind()),
                    event_label(event).to_string(),
                    self.style_label(style),
                ]);
            }
        }

        if rows.is_empty() {
            writeln!(out, "No timed events.")?;
        } else {
            write_table(
                &mut *out,
                vec![
                    "Day".to_string(),
                    "Time".to_string(),
                    "Type".to_string(),
                    "Title".to_string(),
                    "Grid".to_string(),
                ],
                rows,
            )?;
        }

        if let Some(line) = grid.now_line {
            let minutes = config.window_start_minute() + line.offset;
            writeln!(
                out,
                "{}",
                self.paint(
                    &format!(
                        "now {} {:02}:{:02} (+{} from {:02}:00)",
                        line.day,
                        minutes / 60,
                        minutes % 60,
                        line.offset,
                        config.start_hour
                    ),
                    "31"
                )
            )?;
        }
        Ok(())
    }

    fn write_multi_month<W: Write>(
        &self,
        out: &mut W,
        months: &[MonthSummary],
    ) -> anyhow::Result<()> {
        for summary in months {
            writeln!(out, "{}", self.paint(&summary.month_date.format("%B %Y").to_string(), "1"))?;

            let headers = summary
                .days
                .iter()
                .take(7)
                .map(|day| day.format("%a").to_string())
                .collect::<Vec<_>>();
            let rows = summary
                .days
                .chunks(7)
                .map(|week| {
                    week.iter()
                        .map(|day| {
                            let kinds = summary
                                .events_by_day
                                .get(&DayKey::from(*day))
                                .map(Vec::as_slice)
                                .unwrap_or_default();
                            self.summary_cell(*day, summary.month_date, kinds)
                        })
                        .collect()
                })
                .collect();
            write_table(&mut *out, headers, rows)?;
            writeln!(out)?;
        }
        Ok(())
    }

    fn summary_cell(&self, day: NaiveDate, month: NaiveDate, kinds: &[EventKind]) -> String {
        let number = day.format("%d").to_string();
        let number = if day.format("%Y-%m").to_string() == month.format("%Y-%m").to_string() {
            number
        } else {
            self.paint(&number, "2")
        };

        let markers = kinds
            .iter()
            .take(MAX_SUMMARY_MARKERS)
            .map(|kind| self.paint(&kind_marker(*kind).to_string(), kind_color(*kind)))
            .collect::<String>();
        if markers.is_empty() {
            number
        } else {
            format!("{number} {markers}")
        }
    }

    fn bar_label(&self, event: &LaidOutEvent, col: usize) -> String {
        let kind = event.event.kind();
        let text = if col == event.start_col {
            format!("{} {}", kind_marker(kind), event_label(&event.event))
        } else {
            "...".to_string()
        };
        self.paint(&text, kind_color(kind))
    }

    fn style_label(&self, style: &TimedStyle) -> String {
        match style {
            TimedStyle::Visible { top, height } => format!("top {top} h {height}"),
            TimedStyle::Hidden => self.paint("hidden", "2"),
        }
    }

    fn paint_kind(&self, kind: EventKind) -> String {
        self.paint(kind.as_key(), kind_color(kind))
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn kind_color(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Task => "33",
        EventKind::Invoice => "32",
        EventKind::Estimate => "36",
        EventKind::RoadmapItem => "35",
        EventKind::Manual => "34",
        EventKind::Comment => "37",
    }
}

fn kind_marker(kind: EventKind) -> char {
    match kind {
        EventKind::Task => 'T',
        EventKind::Invoice => 'I',
        EventKind::Estimate => 'E',
        EventKind::RoadmapItem => 'R',
        EventKind::Manual => 'M',
        EventKind::Comment => 'C',
    }
}

fn event_label(event: &Event) -> &str {
    if event.title.trim().is_empty() {
        &event.id
    } else {
        &event.title
    }
}

fn time_range(event: &Event, config: &LayoutConfig) -> String {
    let span = event.span(&config.timezone);
    let start = span.start.with_timezone(&config.timezone);
    let end = span.end.with_timezone(&config.timezone);
    format!(
        "{:02}:{:02}-{:02}:{:02}",
        start.hour(),
        start.minute(),
        end.hour(),
        end.minute()
    )
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(header).as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (idx, header) in headers.iter().enumerate() {
        let visible_width = UnicodeWidthStr::width(strip_ansi(header).as_str());
        let padding = widths[idx].saturating_sub(visible_width);
        write!(writer, "{}{} ", header, " ".repeat(padding))?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, width) in widths.iter().enumerate() {
            let cell = row.get(idx).map(String::as_str).unwrap_or_default();
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::*;
    use crate::event::EventSource;
    use crate::filter::{EventFilter, ScopeDirectory};
    use crate::view::{ViewMode, layout_view};

    fn plain() -> Renderer {
        let mut cfg = Config::with_defaults();
        cfg.apply_overrides([("color".to_string(), "off".to_string())]);
        Renderer::new(&cfg).expect("renderer")
    }

    fn render(view: ViewMode, events: &[Event]) -> String {
        let config = LayoutConfig::default();
        let reference = NaiveDate::from_ymd_opt(2026, 2, 17).expect("valid date");
        let now = Utc
            .with_ymd_and_hms(2026, 2, 17, 9, 30, 0)
            .single()
            .expect("valid now");
        let layout = layout_view(
            events,
            view,
            reference,
            now,
            &config,
            &EventFilter::default(),
            &ScopeDirectory::default(),
        );
        let mut buf = Vec::new();
        plain()
            .write_view(&mut buf, "Title", &layout, &config)
            .expect("render");
        String::from_utf8(buf).expect("utf8")
    }

    fn task(id: &str, start: &str, end: &str) -> Event {
        Event::new(id, EventSource::Task { source_id: None }, start, end)
    }

    #[test]
    fn rejects_bad_color_setting() {
        let mut cfg = Config::with_defaults();
        cfg.apply_overrides([("color".to_string(), "sometimes".to_string())]);
        assert!(Renderer::new(&cfg).is_err());
    }

    #[test]
    fn month_shows_overflow_affordance() {
        let events = (0..5)
            .map(|idx| {
                task(&format!("t{idx}"), "2026-02-11T09:00:00", "2026-02-11T10:00:00")
                    .with_title(format!("Task {idx}"))
            })
            .collect::<Vec<_>>();
        let text = render(ViewMode::Month, &events);

        assert!(text.contains("T Task 0"));
        assert!(text.contains("T Task 2"));
        assert!(!text.contains("T Task 3"));
        assert!(text.contains("+2 more"));
    }

    #[test]
    fn week_lists_timed_events_with_grid_position() {
        let events = vec![
            task("standup", "2026-02-17T09:00:00", "2026-02-17T09:15:00").with_title("Standup"),
            task("late", "2026-02-17T22:00:00", "2026-02-17T23:30:00").with_title("Late call"),
        ];
        let text = render(ViewMode::Week, &events);

        assert!(text.contains("09:00-09:15"));
        assert!(text.contains("top 180 h 20"));
        assert!(text.contains("Late call"));
        assert!(text.contains("hidden"));
        assert!(text.contains("now 2026-02-17 09:30"));
    }

    #[test]
    fn multi_month_marks_kinds() {
        let events = vec![task("due", "2026-02-19", "2026-02-19")];
        let text = render(ViewMode::ThreeMonth, &events);

        assert!(text.contains("February 2026"));
        assert!(text.contains("April 2026"));
        assert!(text.contains("19 T"));
    }

    #[test]
    fn table_pads_by_display_width() {
        let mut buf = Vec::new();
        write_table(
            &mut buf,
            vec!["A".to_string(), "B".to_string()],
            vec![vec!["日本".to_string(), "x".to_string()]],
        )
        .expect("write table");
        let text = String::from_utf8(buf).expect("utf8");
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines[0], "A    B ");
        assert_eq!(lines[2], "日本 x ");
    }

    #[test]
    fn strips_ansi_sequences() {
        assert_eq!(strip_ansi("\x1b[33mtask\x1b[0m"), "task");
    }
}
