use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, instrument};

use crate::cli::{Invocation, ViewOptions};
use crate::config::{Config, LayoutConfig};
use crate::datastore::{DataStore, load_events_file};
use crate::datetime::{local_day, parse_day_expr, parse_now_expr};
use crate::event::Event;
use crate::filter::EventFilter;
use crate::render::Renderer;
use crate::view::{ViewMode, layout_view, shift_focus, view_title};

pub fn known_command_names() -> Vec<&'static str> {
    vec![
        "day", "week", "month", "3month", "6month", "quarter", "half", "show", "help", "version",
    ]
}

pub fn expand_command_abbrev<'a>(token: &'a str, known: &[&'a str]) -> Option<&'a str> {
    if known.contains(&token) {
        return Some(token);
    }

    let mut matches = known.iter().copied().filter(|name| name.starts_with(token));
    let first = matches.next()?;
    if matches.next().is_some() {
        None
    } else {
        Some(first)
    }
}

#[instrument(skip(store, cfg, renderer, inv, opts))]
pub fn dispatch(
    store: &DataStore,
    cfg: &Config,
    renderer: &mut Renderer,
    inv: Invocation,
    opts: &ViewOptions,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let command = inv.command.as_str();

    debug!(
        command,
        args = ?inv.command_args,
        "dispatching command"
    );

    match command {
        "show" => renderer.print_config(cfg),
        "help" => cmd_help(),
        "version" => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        other => {
            let view = other.parse::<ViewMode>()?;
            cmd_view(store, cfg, renderer, view, &inv.command_args, opts, now)
        }
    }
}

#[instrument(skip(store, cfg, renderer, args, opts, clock))]
fn cmd_view(
    store: &DataStore,
    cfg: &Config,
    renderer: &mut Renderer,
    view: ViewMode,
    args: &[String],
    opts: &ViewOptions,
    clock: DateTime<Utc>,
) -> anyhow::Result<()> {
    info!(view = %view, "command view");

    let layout_config = LayoutConfig::from_config(cfg)?;
    let tz = layout_config.timezone;

    let now = match opts.now.as_deref() {
        Some(raw) => parse_now_expr(raw, clock, &tz)?,
        None => clock,
    };
    let reference = resolve_reference(
        opts.date.as_deref(),
        view,
        parse_step(args)?,
        now,
        &layout_config,
    )?;

    let events = load_events(store, opts)?;
    let directory = store.load_directory()?;
    let filter = EventFilter::parse(opts.types.as_deref(), opts.scope.as_deref())?;

    let layout = layout_view(
        &events,
        view,
        reference,
        now,
        &layout_config,
        &filter,
        &directory,
    );

    if opts.json {
        renderer.print_json(&layout)
    } else {
        let title = view_title(view, reference, &layout_config);
        renderer.print_view(&title, &layout, &layout_config)
    }
}

fn load_events(store: &DataStore, opts: &ViewOptions) -> anyhow::Result<Vec<Event>> {
    match opts.events.as_deref() {
        Some(path) => load_events_file(path)
            .with_context(|| format!("failed to load events from {}", path.display())),
        None => store.load_events(),
    }
}

/// Navigation argument after the view name: `next`, `prev`, or a signed
/// number of view units.
pub fn parse_step(args: &[String]) -> anyhow::Result<i64> {
    let Some(token) = args.first() else {
        return Ok(0);
    };
    if args.len() > 1 {
        return Err(anyhow!("unexpected arguments: {}", args[1..].join(" ")));
    }

    match token.to_ascii_lowercase().as_str() {
        "next" => Ok(1),
        "prev" | "previous" => Ok(-1),
        "this" | "current" => Ok(0),
        other => other
            .trim_start_matches('+')
            .parse::<i64>()
            .map_err(|_| anyhow!("invalid navigation step: {token}")),
    }
}

/// Reference day for a view, exposed for callers that build layouts
/// without going through the CLI.
pub fn resolve_reference(
    date_expr: Option<&str>,
    view: ViewMode,
    step: i64,
    now: DateTime<Utc>,
    config: &LayoutConfig,
) -> anyhow::Result<NaiveDate> {
    let today = local_day(now, &config.timezone);
    let reference = match date_expr {
        Some(raw) => parse_day_expr(raw, today, &config.timezone)?,
        None => today,
    };
    shift_focus(reference, view, step)
}

fn cmd_help() -> anyhow::Result<()> {
    println!(
        "trellis [-v|-q] [--rc k=v]... [--trellisrc PATH] [--data DIR] [--events FILE]\n\
         \x20       [--date EXPR] [--now RFC3339|now] [--types LIST] [--scope ID] [--json]\n\
         \x20       <day|week|month|3month|6month> [next|prev|N]\n\
         trellis show\n\n\
         Positional rc.key=value overrides are accepted anywhere."
    );
    Ok(())
}
