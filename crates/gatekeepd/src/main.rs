//! gatekeepd - The gatekeep session service
//!
//! This is the composition root. It wires together:
//! - Configuration loading
//! - Store initialization
//! - The session coordinator and background reconciler
//! - Desktop collaborators
//!
//! Every invocation is a process start: state is restored from the store
//! first, and the background mark is written on the way out.

mod host;

use anyhow::{Context, Result, bail};
use clap::{Args as ClapArgs, Parser, Subcommand};
use gatekeep_api::{LivePhase, RestrictionSet, SessionKind, SessionVariant, WakeupKind};
use gatekeep_config::{Settings, load_config_or_default};
use gatekeep_core::{
    BackgroundReconciler, CoreEvent, RestoreReport, SessionCoordinator, StartRequest, live_state,
};
use gatekeep_host_api::{EventReceiver, event_channel};
use gatekeep_store::{SqliteStore, Store};
use gatekeep_util::{DaysOfWeek, ItemId, WallClock, default_config_path, format_duration};
use host::DesktopHost;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const DB_FILENAME: &str = "gatekeep.db";

/// How often the run loop ticks the coordinator
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// gatekeepd - Restriction sessions for the desktop
#[derive(Parser, Debug)]
#[command(name = "gatekeepd")]
#[command(about = "Restriction sessions that survive restarts", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/gatekeep/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set GATEKEEP_DATA_DIR env var)
    #[arg(short, long, env = "GATEKEEP_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Enforce sessions in the foreground until signalled
    Run,
    /// Start a session from a preset or a kind
    Start(StartArgs),
    /// End the session of one kind
    End {
        kind: SessionKind,
    },
    /// End every session
    EndAll,
    /// Show active sessions and what is enforced
    Status,
    /// Show completed sessions, most recent first
    History {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
    /// Commit the selection a kind uses, or the legacy selection
    Select(SelectArgs),
    /// Mark a checklist item done
    ItemDone {
        item: String,

        /// Mark the item as not done instead
        #[arg(long)]
        undo: bool,
    },
    /// Run background reconciliation; without a kind, every due wake-up runs
    Wake {
        kind: Option<WakeupKind>,
    },
}

#[derive(ClapArgs, Debug)]
struct TargetsArgs {
    /// Named selection from the config file
    #[arg(long)]
    selection: Option<String>,

    #[arg(long, value_delimiter = ',')]
    apps: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    categories: Vec<String>,

    #[arg(long, value_delimiter = ',')]
    domains: Vec<String>,
}

impl TargetsArgs {
    fn is_empty(&self) -> bool {
        self.selection.is_none()
            && self.apps.is_empty()
            && self.categories.is_empty()
            && self.domains.is_empty()
    }

    /// Named selection plus inline targets; `None` when nothing was given
    fn resolve(&self, settings: &Settings) -> Result<Option<RestrictionSet>> {
        if self.is_empty() {
            return Ok(None);
        }

        let mut set = match &self.selection {
            Some(name) => settings
                .selections
                .get(name)
                .cloned()
                .with_context(|| format!("No selection named '{name}' in the config"))?,
            None => RestrictionSet::new(),
        };
        set.extend(
            &RestrictionSet::new()
                .with_applications(self.apps.iter().cloned())
                .with_categories(self.categories.iter().cloned())
                .with_domains(self.domains.iter().cloned()),
        );
        Ok(Some(set))
    }
}

#[derive(ClapArgs, Debug)]
struct StartArgs {
    /// Preset name, or a session kind (timed, scheduled, checklist, step_goal, sleep_window)
    target: String,

    /// Display name
    #[arg(long)]
    name: Option<String>,

    /// Timed: duration in minutes
    #[arg(long)]
    minutes: Option<u64>,

    /// Checklist: item identifiers
    #[arg(long, value_delimiter = ',')]
    items: Vec<String>,

    /// Scheduled start or bedtime (HH:MM)
    #[arg(long)]
    from: Option<WallClock>,

    /// Scheduled end or wake time (HH:MM)
    #[arg(long)]
    until: Option<WallClock>,

    /// Step goal: daily target
    #[arg(long)]
    steps: Option<u64>,

    /// Step goal: lift for the day once reached instead of ending
    #[arg(long)]
    daily: bool,

    #[command(flatten)]
    targets: TargetsArgs,
}

impl StartArgs {
    fn request(&self, settings: &Settings) -> Result<StartRequest> {
        let mut request = match settings.preset(&self.target) {
            Some(preset) => StartRequest::from_preset(preset, settings),
            None => {
                let kind: SessionKind = self
                    .target
                    .parse()
                    .map_err(anyhow::Error::msg)
                    .context("Not a preset name either")?;
                StartRequest::new(kind.as_str(), self.variant(kind)?)
            }
        };

        if let Some(name) = &self.name {
            request.name = name.clone();
        }
        if let Some(set) = self.targets.resolve(settings)? {
            request.selection = Some(set);
        }
        Ok(request)
    }

    fn variant(&self, kind: SessionKind) -> Result<SessionVariant> {
        let window = || -> Result<(WallClock, WallClock)> {
            match (self.from, self.until) {
                (Some(from), Some(until)) => Ok((from, until)),
                _ => bail!("{kind} sessions need --from and --until"),
            }
        };

        Ok(match kind {
            SessionKind::Timed => {
                let minutes = self.minutes.context("Timed sessions need --minutes")?;
                let secs = minutes.checked_mul(60).context("--minutes is too large")?;
                SessionVariant::timed(Duration::from_secs(secs))
            }
            SessionKind::Scheduled => {
                let (start, end) = window()?;
                SessionVariant::scheduled(gatekeep_api::Recurrence::Daily, start, end)
            }
            SessionKind::Checklist => {
                SessionVariant::checklist(self.items.iter().map(|i| ItemId::new(i.as_str())))
            }
            SessionKind::StepGoal => {
                let target = self.steps.context("Step goals need --steps")?;
                SessionVariant::step_goal(target, self.daily)
            }
            SessionKind::SleepWindow => {
                let (bedtime, wake) = window()?;
                SessionVariant::sleep_window(bedtime, wake, DaysOfWeek::ALL_DAYS)
            }
            SessionKind::Geofenced => bail!("Geofenced sessions can only be started from a preset"),
        })
    }
}

#[derive(ClapArgs, Debug)]
struct SelectArgs {
    /// Session kind, or "legacy"
    target: String,

    /// Remove the selection instead
    #[arg(long)]
    clear: bool,

    #[command(flatten)]
    targets: TargetsArgs,
}

/// Main service state
struct Service {
    settings: Settings,
    host: DesktopHost,
    coordinator: SessionCoordinator,
    events: EventReceiver,
}

impl Service {
    fn open(args: &Args) -> Result<Self> {
        let mut settings = load_config_or_default(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;
        if let Some(data_dir) = &args.data_dir {
            settings.service = settings.service.with_data_dir(data_dir.clone());
        }

        info!(
            config_path = %args.config.display(),
            presets = settings.presets.len(),
            "Configuration loaded"
        );

        let data_dir = settings.service.data_dir.clone();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join(DB_FILENAME);
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );
        if !store.is_healthy() {
            bail!("Database {:?} is not usable", db_path);
        }
        info!(db_path = %db_path.display(), "Store initialized");

        let host = DesktopHost::new(store.clone(), settings.service.enforcement_file.clone());
        let (tx, events) = event_channel();
        let coordinator =
            SessionCoordinator::new(settings.sessions.clone(), host.services(), store, tx);

        Ok(Self {
            settings,
            host,
            coordinator,
            events,
        })
    }

    fn reconciler(&self) -> BackgroundReconciler {
        BackgroundReconciler::new(
            self.settings.background.clone(),
            self.coordinator.persistence().clone(),
            self.host.services(),
        )
    }

    /// Bring sessions back and mark the foreground transition
    fn restore(&mut self) -> RestoreReport {
        let now = gatekeep_util::now();
        let report = self.coordinator.restore_all(now);
        self.coordinator.record_foreground(now);

        for record in &report.ended {
            info!(kind = %record.kind, reason = ?record.reason, "Ended while not running");
        }
        for failure in &report.failures {
            warn!(error = %failure, "Restore failure");
        }
        self.publish();
        report
    }

    /// Snapshot, mark the background transition and ask for wake-ups
    fn finish(&mut self) {
        let now = gatekeep_util::now();
        self.coordinator.record_background(now);
        self.reconciler().schedule_all(now);
        self.publish();
    }

    /// Feed queued collaborator events to the coordinator
    fn pump(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.coordinator.handle_host_event(event, gatekeep_util::now());
        }
        self.publish();
    }

    fn publish(&mut self) {
        for event in self.coordinator.drain_events() {
            log_core_event(&event);
        }
    }

    async fn run(mut self) -> Result<()> {
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

        let mut tick_timer = tokio::time::interval(TICK_INTERVAL);
        tick_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut sensor_timer = tokio::time::interval(self.settings.background.sensor_refresh_interval);
        sensor_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("Service running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, shutting down gracefully");
                    break;
                }

                _ = tick_timer.tick() => {
                    self.host.poll();
                    self.coordinator.tick(gatekeep_util::now());
                }

                _ = sensor_timer.tick() => {
                    if let Err(e) = self.coordinator.refresh_step_count(gatekeep_util::now()).await {
                        debug!(error = %e, "Step count refresh failed");
                    }
                }

                Some(event) = self.events.recv() => {
                    self.coordinator.handle_host_event(event, gatekeep_util::now());
                }
            }
            self.publish();
        }

        info!("Shutting down gatekeepd");
        self.finish();
        info!("Shutdown complete");
        Ok(())
    }

    async fn start(&mut self, args: &StartArgs) -> Result<()> {
        let request = args.request(&self.settings)?;
        let kind = request.variant.kind();
        let session_id = self
            .coordinator
            .start(request, gatekeep_util::now())
            .await
            .with_context(|| format!("Failed to start {kind} session"))?;
        self.pump();

        match self.coordinator.active_session(kind) {
            Some(session) => println!("Started {} session '{}' ({})", kind, session.name, session_id),
            None => println!("{kind} session {session_id} completed immediately"),
        }
        Ok(())
    }

    fn end(&mut self, kind: SessionKind) {
        match self
            .coordinator
            .end(kind, gatekeep_api::EndReason::Cancelled, gatekeep_util::now())
        {
            Some(record) => println!(
                "Ended {} session '{}' after {}",
                kind,
                record.name,
                format_duration(record.duration())
            ),
            None => println!("No {kind} session is active"),
        }
    }

    fn end_all(&mut self) {
        let records = self.coordinator.force_end_all(gatekeep_util::now());
        println!("Ended {} session(s)", records.len());
    }

    fn status(&self) {
        let now = gatekeep_util::now();

        if !self.coordinator.is_any_session_active() {
            println!("No active sessions");
        }
        for session in self.coordinator.sessions() {
            let phase = if session.active {
                LivePhase::Active
            } else {
                LivePhase::Waiting
            };
            let state = live_state(session, phase, now);
            let mut line = format!(
                "{:<13} {:<20} {}",
                session.kind(),
                session.name,
                if session.active { "enforcing" } else { "waiting" }
            );
            if let Some(left) = session.remaining(now) {
                line.push_str(&format!("  {} left", format_duration(left)));
            } else if let Some(ends_at) = state.ends_at {
                line.push_str(&format!("  until {}", ends_at.format("%H:%M")));
            }
            if let Some(progress) = state.progress
                && !matches!(session.variant, SessionVariant::Timed(_))
            {
                line.push_str(&format!("  {progress:.0}%"));
            }
            println!("{line}");
        }

        let merged = self.coordinator.merged_restrictions();
        println!();
        println!(
            "Enforced: {} app(s), {} categories, {} domain(s) -> {}",
            merged.applications.len(),
            merged.categories.len(),
            merged.domains.len(),
            self.host.enforcer.path().display()
        );
        match self.host.enforcer.read() {
            Ok(Some(file)) if file.restrictions != merged => {
                warn!("Enforcement file is out of date, it will be rewritten on the next change");
            }
            Ok(Some(file)) => println!("Last written: {}", file.updated_at.format("%Y-%m-%d %H:%M:%S")),
            Ok(None) => println!("Enforcement file not written yet"),
            Err(e) => warn!(error = %e, "Enforcement file unreadable"),
        }

        match self.host.scheduler.requested() {
            Ok(requested) => {
                for (kind, at) in requested {
                    println!("Next {kind} wake-up: {}", at.format("%Y-%m-%d %H:%M"));
                }
            }
            Err(e) => warn!(error = %e, "Wake-up schedule unreadable"),
        }
    }

    fn history(&self, limit: usize) {
        let records = self.coordinator.history(limit);
        if records.is_empty() {
            println!("No completed sessions");
        }
        for record in records {
            println!(
                "{}  {:<13} {:<20} {:<11} {}",
                record.ended_at.format("%Y-%m-%d %H:%M"),
                record.kind,
                record.name,
                format!("{:?}", record.reason).to_lowercase(),
                format_duration(record.duration())
            );
        }
    }

    fn select(&mut self, args: &SelectArgs) -> Result<()> {
        let set = match (args.clear, args.targets.resolve(&self.settings)?) {
            (true, _) => None,
            (false, Some(set)) => Some(set),
            (false, None) => bail!("Give --selection, --apps, --categories or --domains, or --clear"),
        };

        if args.target == gatekeep_util::SelectionId::legacy().as_str() {
            self.coordinator.set_legacy_selection(set)?;
            println!("Legacy selection updated");
            return Ok(());
        }

        let kind: SessionKind = args.target.parse().map_err(anyhow::Error::msg)?;
        self.coordinator
            .commit_selection(kind, set.unwrap_or_default(), gatekeep_util::now())?;
        println!("Selection for {kind} committed");
        Ok(())
    }

    fn item_done(&mut self, item: &str, undo: bool) -> Result<()> {
        self.host
            .items
            .set_completed(ItemId::new(item), !undo)
            .context("Failed to update checklist item")?;
        self.pump();
        println!("Item '{}' marked {}", item, if undo { "not done" } else { "done" });
        Ok(())
    }

    /// Background work only: no restore, no enforcement
    async fn wake(&self, kind: Option<WakeupKind>) -> Result<()> {
        let now = gatekeep_util::now();
        let kinds = match kind {
            Some(kind) => vec![kind],
            None => self.host.scheduler.due(now)?,
        };
        if kinds.is_empty() {
            debug!("No wake-up due");
            return Ok(());
        }

        let reconciler = self.reconciler();
        for kind in kinds {
            match reconciler.handle_wakeup(kind, now).await {
                Ok(outcome) => println!(
                    "{}: {} pending event(s), next at {}",
                    kind,
                    outcome.pending.len(),
                    outcome.next_wakeup.format("%H:%M")
                ),
                Err(e) => eprintln!("{kind}: {e}"),
            }
        }
        Ok(())
    }
}

fn log_core_event(event: &CoreEvent) {
    match event {
        CoreEvent::SessionStarted {
            session_id,
            kind,
            name,
            enforcing,
        } => info!(session_id = %session_id, kind = %kind, name = %name, enforcing, "Session started"),
        CoreEvent::EnforcementChanged {
            session_id,
            kind,
            enforcing,
        } => info!(session_id = %session_id, kind = %kind, enforcing, "Enforcement changed"),
        CoreEvent::SessionEnded { record } => info!(
            session_id = %record.session_id,
            kind = %record.kind,
            reason = ?record.reason,
            completed = record.completed,
            "Session ended"
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "gatekeepd starting");

    let mut service = Service::open(&args)?;

    if let Command::Wake { kind } = &args.command {
        return service.wake(*kind).await;
    }

    let report = service.restore();
    if report.uncontrolled_termination {
        warn!("The previous run did not shut down cleanly");
    }

    let result = match &args.command {
        Command::Run => return service.run().await,
        Command::Start(start) => service.start(start).await,
        Command::End { kind } => {
            service.end(*kind);
            Ok(())
        }
        Command::EndAll => {
            service.end_all();
            Ok(())
        }
        Command::Status => {
            service.status();
            Ok(())
        }
        Command::History { limit } => {
            service.history(*limit);
            Ok(())
        }
        Command::Select(select) => service.select(select),
        Command::ItemDone { item, undo } => service.item_done(item, *undo),
        Command::Wake { .. } => Ok(()),
    };

    service.finish();
    result
}
