use anyhow::Context;
use clap::{Arg, Command};
use log::LevelFilter;
use mailsift::{FilterChain, Message, Verdict};
use std::process;
use std::sync::Arc;

fn main() {
    let matches = Command::new("mailsift")
        .version(env!("CARGO_PKG_VERSION"))
        .about("A pluggable multi-stage spam classification pipeline")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Chain configuration file path")
                .default_value("mailsift.json"),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Validate the configuration file and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("demo")
                .long("demo")
                .help("Run a classification demonstration against sample messages")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    let config_path = matches.get_one::<String>("config").unwrap();
    let chain = match load_chain(config_path) {
        Ok(chain) => chain,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        println!("Configuration file is valid!");
        println!("Number of filters: {}", chain.len());
        for (i, id) in chain.ids().iter().enumerate() {
            println!("  Filter {}: {}", i + 1, id);
        }
        return;
    }

    if matches.get_flag("demo") {
        let runtime = match tokio::runtime::Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => {
                eprintln!("Failed to start async runtime: {e}");
                process::exit(1);
            }
        };
        runtime.block_on(run_demo(Arc::new(chain)));
    } else {
        println!("Nothing to do. Use --test-config to validate a chain or --demo for a demonstration.");
    }
}

fn load_chain(path: &str) -> anyhow::Result<FilterChain> {
    if std::path::Path::new(path).exists() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {path}"))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("Configuration file is not valid JSON: {path}"))?;
        Ok(FilterChain::from_value(&config)?)
    } else {
        log::warn!("Configuration file '{path}' not found, using the default chain");
        Ok(FilterChain::from_value(&serde_json::json!([
            { "filter": "blacklist" },
            { "filter": "bayes" }
        ]))?)
    }
}

async fn run_demo(chain: Arc<FilterChain>) {
    log::info!("Running classification demonstration...");

    let mut spam = Message::new();
    spam.set_header("Subject", "Cheap pills, buy now");
    spam.body = b"Act now, limited offer, buy cheap pills today".to_vec();
    spam.peer_address = vec!["198.51.100.23".to_string()];

    let mut ham = Message::new();
    ham.set_header("Subject", "Lunch on Thursday?");
    ham.body = b"Are you free for lunch on Thursday after standup?".to_vec();
    ham.peer_address = vec!["192.0.2.10".to_string()];

    // Seed the learning filters so the demo has something to score with.
    for _ in 0..5 {
        chain.classify(&spam, true);
        chain.classify(&ham, false);
    }

    for (label, msg) in [("spam sample", spam), ("ham sample", ham)] {
        let handle = Arc::clone(&chain).evaluate(
            msg,
            move |verdict: Verdict| println!("{label}: immediate verdict = {verdict}"),
            move |verdict: Verdict| println!("{label}: async verdict   = {verdict}"),
        );
        if let Err(e) = handle.await {
            log::error!("Demo evaluation task failed: {e}");
        }
    }

    println!("Demonstration complete.");
}
