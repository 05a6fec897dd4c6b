use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trainwatch_core::{project, Decoded, HistoryStore, RetentionPolicy, SampleCodec};
use trainwatch_stream::{
    ControllerCommand, SubscriptionController, ViewState, WatchConfig, WebSocketConnector,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Command::new("trainwatch")
        .version(trainwatch_stream::VERSION)
        .about("Live training metrics monitor")
        .subcommand_required(true)
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("last-n")
                .long("last-n")
                .global(true)
                .value_parser(value_parser!(usize))
                .help("Keep only the most recent N samples (0 keeps all)"),
        )
        .subcommand(
            Command::new("watch")
                .about("Subscribe to a job and follow its metrics")
                .arg(
                    Arg::new("job")
                        .long("job")
                        .help("Job to subscribe to"),
                )
                .arg(
                    Arg::new("known-jobs")
                        .long("known-jobs")
                        .value_delimiter(',')
                        .num_args(1..)
                        .help("Job catalog; the last entry is selected unless --job is given"),
                )
                .arg(
                    Arg::new("origin")
                        .long("origin")
                        .help("Origin of the monitoring service, e.g. https://monitor.example.com"),
                ),
        )
        .subcommand(
            Command::new("replay")
                .about("Project recorded frames, one per line, and print the chart series as JSON")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("File of recorded text frames"),
                ),
        );

    let matches = cli.get_matches();
    init_tracing(matches.get_flag("log-json"));

    match matches.subcommand() {
        Some(("watch", args)) => run_watch(args).await,
        Some(("replay", args)) => run_replay(args),
        _ => bail!("unknown subcommand"),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &ArgMatches) -> Result<WatchConfig> {
    let mut config = match args.get_one::<PathBuf>("config") {
        Some(path) => WatchConfig::load(path)?,
        None => WatchConfig::default(),
    };
    if let Some(&n) = args.get_one::<usize>("last-n") {
        config = config.with_retention(RetentionPolicy::last_n(n));
    }
    Ok(config)
}

async fn run_watch(args: &ArgMatches) -> Result<()> {
    let mut config = load_config(args)?;
    if let Some(origin) = args.get_one::<String>("origin") {
        config = config.with_origin(origin.as_str());
    }

    let job = args.get_one::<String>("job").cloned();
    let known_jobs: Option<Vec<String>> = args
        .get_many::<String>("known-jobs")
        .map(|jobs| jobs.cloned().collect());
    if job.is_none() && known_jobs.is_none() {
        bail!("either --job or --known-jobs is required");
    }

    let connector = Arc::new(
        WebSocketConnector::new(config.session.idle_timeout())
            .with_connect_timeout(config.session.connect_timeout()),
    );
    let controller =
        SubscriptionController::new(connector, &config).context("invalid configuration")?;

    let (command_tx, command_rx) = mpsc::channel(16);
    let (view_tx, mut view_rx) = watch::channel(ViewState::default());
    let driver = tokio::spawn(controller.run(command_rx, view_tx, config.axes.clone()));

    // An explicit job overrides the catalog default
    if let Some(job) = job {
        command_tx.send(ControllerCommand::SelectJob(job)).await?;
    }
    if let Some(jobs) = known_jobs {
        command_tx.send(ControllerCommand::CatalogLoaded(jobs)).await?;
    }

    let mut last = ViewState::default();
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for Ctrl-C")?;
                info!("interrupted, shutting down");
                break;
            }
            changed = view_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = view_rx.borrow_and_update().clone();
                report(&last, &view)?;
                last = view;
            }
        }
    }

    // Controller may already have stopped
    let _ = command_tx.send(ControllerCommand::Shutdown).await;
    driver.await.context("controller task failed")?;
    Ok(())
}

fn report(previous: &ViewState, view: &ViewState) -> Result<()> {
    if view.status != previous.status || view.status_reason != previous.status_reason {
        match &view.status_reason {
            Some(reason) => warn!(job = ?view.job, status = %view.status, %reason, "status"),
            None => info!(job = ?view.job, status = %view.status, "status"),
        }
    }

    let fresh = match (&previous.latest, &view.latest) {
        (Some(before), Some(now)) => !Arc::ptr_eq(before, now),
        (None, Some(_)) => true,
        _ => false,
    };
    if let Some(sample) = view.latest.as_ref().filter(|_| fresh) {
        println!("{}", serde_json::to_string(sample.as_ref())?);
    }
    Ok(())
}

fn run_replay(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;
    let path = args
        .get_one::<PathBuf>("file")
        .context("missing replay file")?;
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let codec = SampleCodec::new();
    let mut history = HistoryStore::new(config.retention);
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match codec.decode(line) {
            Ok(Decoded::Sample(sample)) => {
                history.append(sample);
            }
            Ok(Decoded::KeepAlive) => {}
            Err(error) => warn!(line = index + 1, %error, "skipping frame"),
        }
    }

    info!(samples = history.len(), appended = history.appended(), "replay complete");
    let projection = project(&history.snapshot(), &config.axes);
    println!("{}", serde_json::to_string_pretty(&projection)?);
    Ok(())
}
