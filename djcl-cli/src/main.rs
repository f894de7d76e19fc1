use anyhow::Context;
use clap::Parser;
use djcl::{net, Logger, Schedule};
use std::path::PathBuf;

/// A lightweight process supervisor: keeps a schedule of commands running
/// and takes orders over a line-oriented TCP control channel.
#[derive(Parser, Debug)]
#[clap(name = "djcl", disable_version_flag = true)]
struct Opt {
    /// Go into the background after startup, and log to syslog
    #[clap(short, long)]
    daemon: bool,

    /// Listen address for the control channel (default: the wildcard
    /// address)
    #[clap(short, long)]
    address: Option<String>,

    /// TCP port for the control channel
    #[clap(short, long)]
    port: Option<String>,

    /// The schedule: which commands to run, and how
    #[clap(short = 'f', long = "config")]
    config: Option<PathBuf>,

    /// Print version and exit
    #[clap(short = 'v', long = "version")]
    version: bool,

    /// Print the parsed schedule as JSON and exit
    #[clap(long)]
    dump_config: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let opt = Opt::try_parse().unwrap_or_else(|e| {
        use clap::ErrorKind;
        if e.kind() == ErrorKind::DisplayHelp {
            let _ = e.print();
            std::process::exit(0);
        }
        let _ = e.print();
        std::process::exit(1);
    });

    if opt.version {
        println!("djcl {}", env!("CARGO_PKG_VERSION"));
        println!("Copyright (c) 2026 Jörgen Grahn");
        return;
    }

    let (port, config) = match (&opt.port, &opt.config) {
        (Some(port), Some(config)) => (port.clone(), config.clone()),
        _ => {
            eprintln!("usage: djcl [-d] [-a listen-address] -p port -f config");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&opt, &port, &config) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(opt: &Opt, port: &str, config: &std::path::Path) -> anyhow::Result<()> {
    let schedule = Schedule::load(config)?;

    if opt.dump_config {
        println!("{}", serde_json::to_string_pretty(&schedule)?);
        return Ok(());
    }

    let lfd = net::listening_socket(opt.address.as_deref(), port)
        .context("cannot open the listening socket")?;

    let mut log = Logger::new();
    log.info(format_args!(
        "listening on {}:{}",
        opt.address.as_deref().unwrap_or("*"),
        port
    ));

    if opt.daemon {
        nix::unistd::daemon(false, false).context("failed to move to the background")?;
        log.activate();
    }

    djcl::daemon::run(lfd, schedule, &mut log)?;
    Ok(())
}
