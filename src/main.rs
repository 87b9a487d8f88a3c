//! # MeetRec: unattended meeting recorder
//!
//! Schedules a recording task for every occurrence of a meeting and
//! supervises each one until it completes or fails.
//!
//! Usage:
//!   meetrec serve                                   # Run the scheduler daemon
//!   meetrec meeting create --name Standup ...       # Define a meeting
//!   meetrec task list --status upcoming             # Inspect tasks
//!   meetrec jobs                                    # Live triggers

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use meetrec_core::config::{MeetRecConfig, expand_path};
use meetrec_core::types::{Layout, Meeting, MeetingDraft, MeetingPatch, Platform, TaskStatus, TaskView};
use meetrec_db::{MeetingQuery, MeetingSort, SortOrder, TaskQuery, TaskSort};
use meetrec_runtime::{RuntimeContext, build_engine};
use meetrec_scheduler::{Notification, NotifyPriority};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "meetrec",
    version,
    about = "🎥 MeetRec: schedules and supervises unattended meeting recordings"
)]
struct Cli {
    /// Config file (default: ~/.meetrec/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until Ctrl-C
    Serve,
    /// Manage meetings
    #[command(subcommand)]
    Meeting(MeetingCommand),
    /// Inspect and edit recording tasks
    #[command(subcommand)]
    Task(TaskCommand),
    /// List live triggers
    Jobs,
    /// Alert transport checks
    #[command(subcommand)]
    Alerts(AlertsCommand),
}

#[derive(Subcommand)]
enum MeetingCommand {
    /// Create a meeting and schedule its tasks
    Create(MeetingCreateArgs),
    List(MeetingListArgs),
    Get { id: i64 },
    /// Patch a meeting; window changes reschedule upcoming tasks
    Update(MeetingUpdateArgs),
    /// Delete a meeting with all its tasks
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum TaskCommand {
    List(TaskListArgs),
    Get { id: i64 },
    /// Move an upcoming task's window
    Update {
        id: i64,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum AlertsCommand {
    /// Send a test alert through every configured transport
    Test {
        #[arg(long, default_value = "MeetRec test alert")]
        title: String,
    },
}

/// Times accept RFC 3339 or "YYYY-MM-DD HH:MM" in the configured UTC offset.
#[derive(Args)]
struct MeetingCreateArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    platform: Platform,
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    room_id: Option<String>,
    #[arg(long)]
    password: Option<String>,
    /// Defaults to the platform's usual layout
    #[arg(long)]
    layout: Option<Layout>,
    #[arg(long)]
    creator_name: String,
    #[arg(long)]
    creator_email: String,
    #[arg(long)]
    start: String,
    #[arg(long)]
    end: String,
    /// Repeat every N days
    #[arg(long, requires = "repeat_until")]
    repeat_every: Option<i64>,
    /// Last day a repetition may start on
    #[arg(long, requires = "repeat_every")]
    repeat_until: Option<String>,
}

#[derive(Args)]
struct MeetingUpdateArgs {
    id: i64,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    platform: Option<Platform>,
    #[arg(long)]
    url: Option<String>,
    #[arg(long)]
    room_id: Option<String>,
    #[arg(long)]
    password: Option<String>,
    #[arg(long)]
    layout: Option<Layout>,
    #[arg(long)]
    creator_name: Option<String>,
    #[arg(long)]
    creator_email: Option<String>,
    #[arg(long)]
    start: Option<String>,
    #[arg(long)]
    end: Option<String>,
    #[arg(long)]
    repeat: Option<bool>,
    #[arg(long)]
    repeat_every: Option<i64>,
    #[arg(long)]
    repeat_until: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum MeetingSortArg {
    Start,
    Name,
}

#[derive(Clone, Copy, ValueEnum)]
enum TaskSortArg {
    Start,
    Status,
}

#[derive(Args)]
struct MeetingListArgs {
    /// Name substring
    #[arg(long)]
    name: Option<String>,
    /// Only meetings starting at or after
    #[arg(long)]
    from: Option<String>,
    #[arg(long)]
    sort: Option<MeetingSortArg>,
    #[arg(long)]
    desc: bool,
    #[arg(long, default_value_t = 0)]
    skip: usize,
    #[arg(long, default_value_t = 100)]
    limit: usize,
}

#[derive(Args)]
struct TaskListArgs {
    #[arg(long)]
    status: Option<TaskStatus>,
    #[arg(long)]
    meeting_id: Option<i64>,
    /// Meeting name substring
    #[arg(long)]
    meeting_name: Option<String>,
    /// Only tasks starting at or after
    #[arg(long)]
    from: Option<String>,
    /// Only tasks ending at or before
    #[arg(long)]
    until: Option<String>,
    #[arg(long, value_enum, default_value = "start")]
    sort: TaskSortArg,
    #[arg(long)]
    desc: bool,
    #[arg(long, default_value_t = 0)]
    skip: usize,
    #[arg(long, default_value_t = 100)]
    limit: usize,
}

fn init_logging(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "info" };
    let default = ["meetrec", "meetrec_core", "meetrec_db", "meetrec_scheduler", "meetrec_recorder", "meetrec_runtime"]
        .iter()
        .map(|krate| format!("{krate}={level}"))
        .collect::<Vec<_>>()
        .join(",");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn load_config(path: Option<&str>) -> Result<MeetRecConfig> {
    let config = match path {
        Some(p) => {
            let path: PathBuf = expand_path(p);
            MeetRecConfig::load_from(&path)
                .with_context(|| format!("loading {}", path.display()))?
        }
        None => MeetRecConfig::load()?,
    };
    Ok(config)
}

fn parse_time(raw: &str, offset: FixedOffset) -> Result<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M")
        .with_context(|| format!("'{raw}' is neither RFC 3339 nor 'YYYY-MM-DD HH:MM'"))?;
    match offset.from_local_datetime(&naive).single() {
        Some(t) => Ok(t.with_timezone(&Utc)),
        None => bail!("'{raw}' is not a valid local time"),
    }
}

fn parse_opt(raw: Option<&str>, offset: FixedOffset) -> Result<Option<DateTime<Utc>>> {
    raw.map(|r| parse_time(r, offset)).transpose()
}

fn local(t: DateTime<Utc>, offset: FixedOffset) -> String {
    t.with_timezone(&offset).format("%Y-%m-%d %H:%M").to_string()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_meeting_row(m: &Meeting, offset: FixedOffset) {
    let repeat = match (m.repeat, m.repeat_unit) {
        (true, Some(days)) => format!("every {days}d"),
        _ => "once".to_string(),
    };
    println!(
        "{:>5}  {:<6} {} → {}  {:<9} {}",
        m.id,
        m.platform.as_str(),
        local(m.start_time, offset),
        local(m.end_time, offset),
        repeat,
        m.name
    );
}

fn print_task_row(t: &TaskView, offset: FixedOffset) {
    println!(
        "{:>5}  {:<9} {} → {}  {}",
        t.task.id,
        t.task.status.as_str(),
        local(t.task.start_time, offset),
        local(t.task.end_time, offset),
        t.meeting_name
    );
}

async fn serve(ctx: RuntimeContext) -> Result<()> {
    println!("🎥 MeetRec v{}", env!("CARGO_PKG_VERSION"));
    println!("   🌍 Environment: {:?}", ctx.config.recorder.environment);
    println!("   🔌 Recorder:    {}", ctx.config.recorder.websocket_url());
    println!();

    let pending = ctx.triggers.list();
    tracing::info!("📂 {} pending trigger(s)", pending.len());
    for info in &pending {
        tracing::debug!("   {} ({}) next={:?}", info.trigger_id, info.display_name, info.next_fire_time);
    }

    let engine = build_engine(&ctx);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn(engine.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("🛑 Ctrl-C received, stopping scheduler");
    let _ = shutdown_tx.send(true);
    runner.await?;
    Ok(())
}

async fn run_meeting(ctx: &RuntimeContext, cmd: MeetingCommand) -> Result<()> {
    let offset = ctx.config.utc_offset();
    let meetings = ctx.meetings();
    let now = Utc::now();

    match cmd {
        MeetingCommand::Create(args) => {
            let draft = MeetingDraft {
                name: args.name,
                platform: args.platform,
                meeting_url: args.url,
                room_id: args.room_id,
                password: args.password,
                layout: args.layout.unwrap_or_else(|| Layout::default_for(args.platform)),
                creator_name: args.creator_name,
                creator_email: args.creator_email,
                start_time: parse_time(&args.start, offset)?,
                end_time: parse_time(&args.end, offset)?,
                repeat: args.repeat_every.is_some(),
                repeat_unit: args.repeat_every,
                repeat_end_date: parse_opt(args.repeat_until.as_deref(), offset)?,
            };
            let meeting = meetings.create(draft, now)?;
            let tasks = ctx.db.tasks_for_meeting(meeting.id, None)?;
            println!("✅ Meeting {} created with {} task(s)", meeting.id, tasks.len());
            print_meeting_row(&meeting, offset);
        }
        MeetingCommand::List(args) => {
            let query = MeetingQuery {
                name: args.name,
                start_time_ge: parse_opt(args.from.as_deref(), offset)?,
                sort: args.sort.map(|s| match s {
                    MeetingSortArg::Start => MeetingSort::StartTime,
                    MeetingSortArg::Name => MeetingSort::Name,
                }),
                order: if args.desc { SortOrder::Desc } else { SortOrder::Asc },
                skip: args.skip,
                limit: args.limit,
            };
            for m in meetings.list(&query, now)? {
                print_meeting_row(&m, offset);
            }
        }
        MeetingCommand::Get { id } => print_json(&meetings.get(id)?)?,
        MeetingCommand::Update(args) => {
            let patch = MeetingPatch {
                name: args.name,
                platform: args.platform,
                meeting_url: args.url,
                room_id: args.room_id,
                password: args.password,
                layout: args.layout,
                creator_name: args.creator_name,
                creator_email: args.creator_email,
                start_time: parse_opt(args.start.as_deref(), offset)?,
                end_time: parse_opt(args.end.as_deref(), offset)?,
                repeat: args.repeat,
                repeat_unit: args.repeat_every,
                repeat_end_date: parse_opt(args.repeat_until.as_deref(), offset)?,
            };
            let meeting = meetings.update(args.id, &patch, now).await?;
            println!("✅ Meeting {} updated", meeting.id);
            print_meeting_row(&meeting, offset);
        }
        MeetingCommand::Delete { id } => {
            let removed = meetings.delete(id)?;
            println!("🗑️ Meeting {id} deleted ({removed} task(s))");
        }
    }
    Ok(())
}

fn run_task(ctx: &RuntimeContext, cmd: TaskCommand) -> Result<()> {
    let offset = ctx.config.utc_offset();
    let tasks = ctx.tasks();

    match cmd {
        TaskCommand::List(args) => {
            let query = TaskQuery {
                status: args.status,
                meeting_id: args.meeting_id,
                meeting_name: args.meeting_name,
                start_time_ge: parse_opt(args.from.as_deref(), offset)?,
                end_time_le: parse_opt(args.until.as_deref(), offset)?,
                sort: match args.sort {
                    TaskSortArg::Start => TaskSort::StartTime,
                    TaskSortArg::Status => TaskSort::Status,
                },
                order: if args.desc { SortOrder::Desc } else { SortOrder::Asc },
                skip: args.skip,
                limit: args.limit,
            };
            for t in tasks.list_tasks(&query)? {
                print_task_row(&t, offset);
            }
        }
        TaskCommand::Get { id } => print_json(&tasks.get_task(id)?)?,
        TaskCommand::Update { id, start, end } => {
            let start = parse_opt(start.as_deref(), offset)?;
            let end = parse_opt(end.as_deref(), offset)?;
            if start.is_none() && end.is_none() {
                bail!("nothing to update: pass --start and/or --end");
            }
            let view = tasks.update_task(id, start, end, Utc::now())?;
            println!("✅ Task {id} updated");
            print_task_row(&view, offset);
        }
        TaskCommand::Delete { id } => {
            tasks.delete_task(id)?;
            println!("🗑️ Task {id} deleted");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let config = load_config(cli.config.as_deref())?;
    let ctx = RuntimeContext::open(config)?;

    match cli.command {
        Command::Serve => serve(ctx).await?,
        Command::Meeting(cmd) => run_meeting(&ctx, cmd).await?,
        Command::Task(cmd) => run_task(&ctx, cmd)?,
        Command::Jobs => {
            let offset = ctx.config.utc_offset();
            let jobs = ctx.tasks().jobs();
            if jobs.is_empty() {
                println!("No live triggers");
            }
            for job in jobs {
                let next = job
                    .next_fire_time
                    .map(|t| local(t, offset))
                    .unwrap_or_else(|| "-".into());
                println!("{:<22} {:<16} {}", job.trigger_id, next, job.display_name);
            }
        }
        Command::Alerts(AlertsCommand::Test { title }) => {
            let router = ctx.alerts.router();
            router
                .notify(Notification::new(
                    &title,
                    "If you can read this, alert delivery works.",
                    "cli",
                    NotifyPriority::Normal,
                ))
                .await;
            println!("📮 Test alert sent via {}", router.sink_name());
        }
    }

    Ok(())
}
