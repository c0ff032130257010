use clap::{Arg, ArgAction, Command};
use colored::*;
use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::process;
use std::time::Duration;

use anyhow::{bail, Context};
use vxprobe::{
    config::DetectConfig,
    engine::{resolve_target, DetectEngine},
    output::{OutputConfig, OutputFormat, OutputManager},
};

/// Exit codes: detection ran and found IPnet
const EXIT_DETECTED: i32 = 0;
/// Detection ran; target is not IPnet or the result was inconclusive
const EXIT_NOT_DETECTED: i32 = 1;
/// Execution error: configuration, privilege, filter acquisition, abort
const EXIT_ERROR: i32 = 2;

fn print_banner() {
    println!("{}", r"__     ____  __ ____   ____    ___   ____   _____ ".truecolor(231, 76, 60).bold());
    println!("{}", r"\ \   / /\ \/ /|  _ \ |  _ \  / _ \ | __ ) | ____|".truecolor(231, 76, 60).bold());
    println!("{}", r" \ \ / /  \  / | |_) || |_) || | | ||  _ \ |  _|  ".truecolor(231, 76, 60).bold());
    println!("{}", r"  \ V /   /  \ |  __/ |  _ < | |_| || |_) || |___ ".truecolor(231, 76, 60).bold());
    println!("{}", r"   \_/   /_/\_\|_|    |_| \_\ \___/ |____/ |_____|".truecolor(231, 76, 60).bold());
    println!();
    println!("{}", "Interpeak IPnet / VxWorks stack fingerprinter".bright_blue());
    println!("{}", "URGENT/11 · CVE-2019-12258".bright_blue());
    println!();
}

#[cfg(unix)]
fn has_raw_privilege() -> bool {
    // Raw sockets and iptables manipulation both need root
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn has_raw_privilege() -> bool {
    false
}

/// A target we can bind locally is ourselves; probing it would only
/// fingerprint the local kernel through the loopback
fn is_local_ip(ip: Ipv4Addr) -> bool {
    std::net::TcpListener::bind((ip, 0)).is_ok()
}

fn is_port_reachable(ip: Ipv4Addr, port: u16, timeout: Duration) -> bool {
    TcpStream::connect_timeout(&SocketAddr::from((ip, port)), timeout).is_ok()
}

/// Startup checks: all fatal before any probe runs
fn preflight(config: &DetectConfig) -> anyhow::Result<()> {
    if !has_raw_privilege() {
        bail!("raw packet injection and filter manipulation require root privileges");
    }

    let ip = resolve_target(&config.target).context("could not resolve target")?;

    if is_local_ip(ip) {
        bail!("target {} is a local address, please verify input", ip);
    }

    let reachability_timeout = config
        .timeout_duration()
        .unwrap_or(Duration::from_millis(500));
    if !is_port_reachable(ip, config.port, reachability_timeout) {
        bail!(
            "{}:{} is unreachable; the TCP probes need a listening port",
            ip,
            config.port
        );
    }

    Ok(())
}

async fn run(config: DetectConfig, output: OutputConfig) -> anyhow::Result<i32> {
    preflight(&config)?;

    let mut engine = DetectEngine::new(config).context("failed to initialize detection engine")?;
    let report = engine.run().await.context("detection run failed")?;

    OutputManager::new(output)
        .write_report(&report)
        .context("failed to write report")?;

    if report.fingerprint.verdict.is_ipnet() {
        Ok(EXIT_DETECTED)
    } else {
        Ok(EXIT_NOT_DETECTED)
    }
}

#[tokio::main]
async fn main() {
    let matches = Command::new("vxprobe")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Remote Interpeak IPnet / VxWorks stack fingerprinter with URGENT/11 (CVE-2019-12258) check")
        .arg(
            Arg::new("host")
                .help("Target host IP address or name")
                .required(true),
        )
        .arg(
            Arg::new("port")
                .help("Target TCP port (must be open)")
                .required(true)
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("timeout")
                .short('t')
                .long("timeout")
                .value_name("MS")
                .value_parser(clap::value_parser!(u64))
                .help("Per-probe timeout override in milliseconds"),
        )
        .arg(
            Arg::new("check-vuln")
                .long("check-vuln")
                .action(ArgAction::SetTrue)
                .help("Run the CVE-2019-12258 check (WARNING: may crash a vulnerable device)"),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_name("FORMAT")
                .default_value("text")
                .help("Output format: text or json"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Write the report to a file instead of stdout"),
        )
        .arg(
            Arg::new("no-color")
                .long("no-color")
                .action(ArgAction::SetTrue)
                .help("Disable colored output"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("Increase log verbosity (-v info, -vv debug)"),
        )
        .get_matches();

    let log_level = match matches.get_count("verbose") {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    let format: OutputFormat = match matches.get_one::<String>("format").unwrap().parse() {
        Ok(format) => format,
        Err(e) => {
            eprintln!("{} {}", "[!]".bright_red(), e);
            process::exit(EXIT_ERROR);
        }
    };
    let colored_output = !matches.get_flag("no-color");
    let output = OutputConfig {
        format: format.clone(),
        file: matches.get_one::<String>("output").cloned(),
        colored: colored_output,
    };

    let mut config = DetectConfig::load_default_config();
    config.target = matches.get_one::<String>("host").unwrap().clone();
    config.port = *matches.get_one::<u16>("port").unwrap();
    if let Some(timeout) = matches.get_one::<u64>("timeout") {
        config.timeout = Some(*timeout);
    }
    if matches.get_flag("check-vuln") {
        config.check_vuln = true;
    }

    if format == OutputFormat::Text && output.file.is_none() && colored_output {
        print_banner();
    }

    match run(config, output).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("{} {:#}", "[!]".bright_red(), e);
            process::exit(EXIT_ERROR);
        }
    }
}
