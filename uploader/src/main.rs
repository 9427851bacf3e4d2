use std::time::Duration;

use argh::FromArgs;
use uploader::{
    gust::GustTracker, logging, publisher::Wunderground, shutdown::Shutdown, update, Settings,
};

/// Periodically read data from a local Vantage Pro weather station and upload
/// it to the Weather Underground PWS site.
#[derive(FromArgs, Debug)]
struct Args {
    /// station ID on Weather Underground
    #[argh(positional)]
    user_id: String,

    /// station password (key) on Weather Underground
    #[argh(positional)]
    password: String,

    /// enable verbose debug logging
    #[argh(switch, short = 'd')]
    debug: bool,

    /// disable all console logging
    #[argh(switch, short = 'q')]
    quiet: bool,

    /// set serial port device [/dev/ttyS0]
    #[argh(option, short = 't', default = "String::from(\"/dev/ttyS0\")")]
    tty: String,

    /// polling/update delay in seconds [60]
    #[argh(option, short = 'u', default = "60", from_str_fn(parse_delay))]
    update_delay: u64,

    /// console archive interval in minutes [10]
    #[argh(option, short = 'a', default = "10")]
    archive_interval: u16,

    /// upload endpoint [Weather Underground]
    #[argh(option)]
    endpoint: Option<String>,
}

fn parse_delay(value: &str) -> Result<u64, String> {
    match value.parse::<u64>() {
        Ok(0) => Err("update delay must be at least one second".to_string()),
        Ok(secs) => Ok(secs),
        Err(e) => Err(format!("invalid update delay {:?}: {}", value, e)),
    }
}

impl From<Args> for Settings {
    fn from(args: Args) -> Self {
        let mut s = Settings::new(args.user_id, args.password);
        s.tty = args.tty;
        s.update_delay = Duration::from_secs(args.update_delay);
        s.archive_interval = args.archive_interval;
        if let Some(endpoint) = args.endpoint {
            s.endpoint = endpoint;
        }
        s.debug = args.debug;
        s.quiet = args.quiet;
        s
    }
}

/// Parse the command line. Bad arguments print usage and exit with -1.
fn parse_args() -> Args {
    let argv: Vec<String> = std::env::args().collect();
    let prog = argv
        .first()
        .and_then(|p| std::path::Path::new(p).file_name())
        .and_then(|p| p.to_str())
        .unwrap_or("vpro-to-wu");
    let rest: Vec<&str> = argv.iter().skip(1).map(String::as_str).collect();

    match Args::from_args(&[prog], &rest) {
        Ok(args) => args,
        Err(early) => match early.status {
            Ok(()) => {
                println!("{}", early.output);
                std::process::exit(0);
            }
            Err(()) => {
                eprintln!("{}\n", early.output.trim_end());
                if let Err(help) = Args::from_args(&[prog], &["--help"]) {
                    eprintln!("{}", help.output);
                }
                std::process::exit(-1);
            }
        },
    }
}

fn main() {
    let settings: Settings = parse_args().into();
    logging::init(settings.quiet, settings.debug);
    tracing::debug!("{:?}", settings);

    let shutdown = Shutdown::new();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            tracing::info!("got SIGINT, stopping after the current cycle");
            shutdown.trigger();
        })
        .expect("could not set SIGINT handler");
    }

    let mut station = match vantage::VantagePro::open(&settings.tty, settings.station()) {
        Ok(station) => station,
        Err(e) => {
            tracing::error!("could not set up station on {}: {}", settings.tty, e);
            std::process::exit(1);
        }
    };
    let mut publisher = match Wunderground::new(settings.endpoint.clone()) {
        Ok(publisher) => publisher,
        Err(e) => {
            tracing::error!("could not set up publisher: {}", e);
            std::process::exit(1);
        }
    };
    let mut gust = GustTracker::new();

    let stats = update::run(
        &shutdown,
        &mut station,
        &mut publisher,
        &mut gust,
        settings.update_delay,
        &settings.credentials,
    );

    tracing::info!(
        "shut down after {} cycles ({} failed)",
        stats.cycles,
        stats.failures
    );
}
