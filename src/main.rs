use std::{error::Error, process, time::Duration};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, warn, LevelFilter};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use url::Url;

use putv_remote::{
    cmdbar::{self, CmdBar, CmdBarControl, PlayerCmd},
    config::Config,
    events::Event,
    player::{Command, Player},
    remote, signal,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Parser)]
#[command(
    author,
    version,
    about,
    long_about = None,
    after_help = "Commands are read from standard input, one per line. The client keeps \
        running after the input ends; stop it with Ctrl+C, SIGTERM or the quit command. \
        SIGHUP reconnects."
)]
struct Args {
    /// Configuration file
    ///
    /// Settings on the command line take precedence over the file.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    config: Option<String>,

    /// Player socket URL
    ///
    /// Either a complete `ws://` or `wss://` URL, or a path relative to
    /// `--origin`.
    #[arg(short, long, value_hint = ValueHint::Url)]
    url: Option<String>,

    /// Origin of the page serving the player
    #[arg(long, value_hint = ValueHint::Url)]
    origin: Option<String>,

    /// Number of entries per list window
    #[arg(long)]
    page_size: Option<u32>,

    /// Delay before reconnecting, in milliseconds
    #[arg(long, value_name = "MS")]
    reconnect_delay: Option<u64>,

    /// Identifier of the command bar control
    #[arg(long, default_value_t = String::from(cmdbar::DEFAULT_ID))]
    id: String,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Builds the configuration from the optional file and the command line.
fn load_config(args: &Args) -> Result<Config, Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(url) = &args.url {
        config.url.clone_from(url);
    }
    if let Some(origin) = &args.origin {
        config.origin = Some(Url::parse(origin)?);
    }
    if let Some(page_size) = args.page_size {
        config.page_size = page_size;
    }
    if let Some(delay) = args.reconnect_delay {
        config.reconnect_delay = Duration::from_millis(delay);
    }

    config.validate()?;
    if config.url.is_empty() {
        return Err("no player url configured: use --url or a configuration file".into());
    }

    Ok(config)
}

/// Command bar that writes its controls to the log.
struct Console;

impl CmdBar for Console {
    fn load(&mut self, message: Option<&CmdBarControl>, id: &str) {
        match message.map(serde_json::to_string) {
            Some(Ok(json)) => debug!("{id}: {json}"),
            Some(Err(e)) => error!("{id}: {e}"),
            None => debug!("{id}: ready"),
        }
    }
}

fn report(event: &Event) {
    match event {
        Event::Connected => info!("connected"),
        Event::Disconnected => warn!("disconnected"),
        Event::StateChanged { id, state } => match id {
            Some(id) if *id >= 0 => info!("{state} #{id}"),
            _ => info!("{state}"),
        },
        Event::MediaChanged { media, .. } => info!("media: {media}"),
        Event::InfoChanged { info, .. } => info!("info: {info}"),
        Event::OptionsChanged { options, .. } => info!("options: {}", options.join(" ")),
        Event::VolumeChanged(Some(level)) => info!("volume: {level}"),
        Event::ListChanged { playlist, count } => {
            info!("list: {} of {count} entries", playlist.len());
        }
        Event::Error { error, request } => match request {
            Some(request) => warn!("{} failed: {error}", request.method),
            None => warn!("player error: {error}"),
        },
        event => debug!("{event:?}"),
    }
}

/// Reports player events and turns console input into commands.
///
/// Input is first matched against the command bar labels (`toggle play
/// pause`, `volume up`, ...) and then parsed as a command (`about 3`,
/// `connect ws://...`). When the input ends, events are still reported
/// until the player goes away. Returns when there are no more events.
async fn console<R>(
    input: R,
    mut player_cmd: PlayerCmd<Console>,
    mut events: mpsc::UnboundedReceiver<Event>,
    commands: mpsc::UnboundedSender<Command>,
) where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut reading = true;

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                report(&event);
                player_cmd.handle(&event);
            }

            line = lines.next_line(), if reading => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }

                    let command = player_cmd
                        .listen(line)
                        .map_or_else(|| line.parse::<Command>(), Ok);
                    match command {
                        Ok(command) => {
                            if commands.send(command).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("{e}"),
                    }
                }
                Ok(None) => {
                    debug!("end of input");
                    reading = false;
                }
                Err(e) => {
                    error!("error reading input: {e}");
                    reading = false;
                }
            },

            else => break,
        }
    }
}

/// Turns signals into client commands until the client is gone.
///
/// The client loop is never interrupted from the outside: SIGHUP queues a
/// reconnect, and Ctrl+C or SIGTERM queue a graceful stop.
async fn forward_signals(mut signals: signal::Handler, commands: mpsc::UnboundedSender<Command>) {
    loop {
        let signal = signals.recv().await;
        let command = if signal.is_shutdown() {
            info!("received {signal}, shutting down gracefully");
            Command::Quit
        } else {
            info!("received {signal}");
            Command::Reconnect
        };

        if commands.send(command).is_err() {
            break;
        }
    }
}

/// Main application loop.
///
/// # Errors
///
/// This function returns an error when the configuration is invalid or
/// signal handlers cannot be installed. Connection failures are not errors:
/// the client keeps reconnecting until it is stopped.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = load_config(&args)?;

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    let mut player = Player::new(&config);
    player.register_event_handler(event_tx);
    let mut client = remote::Client::new(&config, player, command_rx)?;

    let signals = signal::Handler::new()?;
    let interrupts = tokio::spawn(forward_signals(signals, command_tx.clone()));

    let player_cmd = PlayerCmd::new(Console, args.id.clone());
    let input = BufReader::new(tokio::io::stdin());
    let ui = tokio::spawn(console(input, player_cmd, event_rx, command_tx));

    client.connect();
    let result = client.run().await;

    interrupts.abort();
    ui.abort();
    result.map_err(Into::into)
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and starts the main application loop.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
