// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use camlview::{view::smart::get_all_smart_filters, Filter, View, ViewEdit};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::{
    fs::read_to_string,
    io::{read_to_string as read_all, stdin},
    path::{Path, PathBuf},
    process::exit,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  camlview [options] <camlview-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        match self.command {
            Command::Arrange(opts) => run_arrange(opts),
            Command::Query(opts) => run_query(opts),
            Command::SmartFilters(opts) => run_smart_filters(opts),
            Command::Edit(opts) => run_edit(opts),
            Command::Strip(opts) => run_strip(opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Show arrangement of a view as TOML.
    #[command(override_usage = "camlview arrange <view>")]
    Arrange(ViewOptions),

    /// Show query markup of a view.
    #[command(override_usage = "camlview query [options] <view>")]
    Query(QueryOptions),

    /// Show smart filters of a view as TOML.
    #[command(override_usage = "camlview smart-filters <view>")]
    SmartFilters(ViewOptions),

    /// Apply an edit plan to a view.
    #[command(override_usage = "camlview edit [options] <view> <plan>")]
    Edit(EditOptions),

    /// Strip smart filter ids from a view.
    #[command(override_usage = "camlview strip <view>")]
    Strip(ViewOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ViewOptions {
    /// View markup file, or "-" for standard input.
    #[arg(value_name = "view")]
    pub view: PathBuf,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct QueryOptions {
    /// View markup file, or "-" for standard input.
    #[arg(value_name = "view")]
    pub view: PathBuf,

    /// Keep the enclosing <Query> element.
    #[arg(short, long)]
    pub with_tag: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct EditOptions {
    /// View markup file, or "-" for standard input.
    #[arg(value_name = "view")]
    pub view: PathBuf,

    /// TOML edit plan.
    #[arg(value_name = "plan")]
    pub plan: PathBuf,

    /// Strip smart filter ids after editing.
    #[arg(short, long)]
    pub strip_ids: bool,
}

#[derive(Debug, Serialize)]
struct SmartFilters {
    filter: Vec<Filter>,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time()
        .with_writer(std::io::stderr);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run() -> Result<()> {
    Cli::parse().run()
}

fn run_arrange(opts: ViewOptions) -> Result<()> {
    let view = load_view(&opts.view)?;
    let arrangement = view.effective_arrangement()?;
    print!("{}", toml::ser::to_string_pretty(&arrangement)?);

    Ok(())
}

fn run_query(opts: QueryOptions) -> Result<()> {
    let view = load_view(&opts.view)?;
    if view.has_parse_error() {
        warn!("{:?} does not parse, no query to show", opts.view);
    }
    println!("{}", view.effective_query_xml(opts.with_tag));

    Ok(())
}

fn run_smart_filters(opts: ViewOptions) -> Result<()> {
    let view = load_view(&opts.view)?;
    let Some(filter) = get_all_smart_filters(&view)? else {
        info!("{:?} has no filters", opts.view);
        return Ok(());
    };
    print!("{}", toml::ser::to_string_pretty(&SmartFilters { filter })?);

    Ok(())
}

fn run_edit(opts: EditOptions) -> Result<()> {
    let mut view = load_view(&opts.view)?;
    let plan: ViewEdit = read_to_string(&opts.plan)
        .with_context(|| format!("failed to read edit plan {:?}", opts.plan))?
        .parse()
        .with_context(|| format!("invalid edit plan {:?}", opts.plan))?;

    if plan.is_empty() {
        warn!("edit plan {:?} does not change anything", opts.plan);
    }
    view.apply_edit(&plan)?;
    if opts.strip_ids {
        view.prepare_for_saving();
    }
    println!("{}", view.effective_view_xml());

    Ok(())
}

fn run_strip(opts: ViewOptions) -> Result<()> {
    let mut view = load_view(&opts.view)?;
    view.prepare_for_saving();
    println!("{}", view.effective_view_xml());

    Ok(())
}

fn load_view(path: &Path) -> Result<View> {
    let xml = if path == Path::new("-") {
        read_all(stdin()).context("failed to read view from standard input")?
    } else {
        read_to_string(path).with_context(|| format!("failed to read view {path:?}"))?
    };

    Ok(View::new(xml))
}
