use clap::{value_parser, Arg, ArgAction, Command};
use commonware_runtime::{deterministic, Runner};
use latency::scenario::{simulate, LinkConfig, Scenario};
use std::str::FromStr;
use tracing::{error, info, Level};

fn main() {
    // Parse arguments
    let matches = Command::new("commonware-latency")
        .about("measure round-trip latency between peers taking turns on a logical clock")
        .arg(
            Arg::new("config")
                .long("config")
                .help("YAML scenario file (overrides every other scenario flag)"),
        )
        .arg(
            Arg::new("peers")
                .long("peers")
                .value_delimiter(',')
                .default_values(["alpha", "beta", "gamma"]),
        )
        .arg(
            Arg::new("rounds")
                .long("rounds")
                .value_parser(value_parser!(u32))
                .default_value("3"),
        )
        .arg(
            Arg::new("payload-size")
                .long("payload-size")
                .value_parser(value_parser!(usize))
                .default_value("1024"),
        )
        .arg(
            Arg::new("latency-mean")
                .long("latency-mean")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("latency-stddev")
                .long("latency-stddev")
                .value_parser(value_parser!(f64))
                .default_value("0"),
        )
        .arg(
            Arg::new("stall-timeout")
                .long("stall-timeout")
                .help("milliseconds to wait before giving up on a stalled peer")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_parser(value_parser!(u64))
                .default_value("0"),
        )
        .arg(Arg::new("log-level").long("log-level").default_value("info"))
        .arg(Arg::new("json").long("json").action(ArgAction::SetTrue))
        .get_matches();

    // Create logger
    let level = matches.get_one::<String>("log-level").unwrap();
    let level = Level::from_str(level).expect("Invalid log level");
    let logger = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_line_number(true)
        .with_file(true);
    if matches.get_flag("json") {
        logger.json().init();
    } else {
        logger.init();
    }

    // Load scenario
    let scenario = match matches.get_one::<String>("config") {
        Some(path) => {
            let file = std::fs::read_to_string(path).expect("Could not read config file");
            serde_yaml::from_str(&file).expect("Could not parse config file")
        }
        None => Scenario {
            peers: matches
                .get_many::<String>("peers")
                .unwrap()
                .cloned()
                .collect(),
            rounds: *matches.get_one::<u32>("rounds").unwrap(),
            payload_size: *matches.get_one::<usize>("payload-size").unwrap(),
            link: matches
                .get_one::<f64>("latency-mean")
                .map(|latency_mean| LinkConfig {
                    latency_mean: *latency_mean,
                    latency_stddev: *matches.get_one::<f64>("latency-stddev").unwrap(),
                }),
            stall_timeout_ms: matches.get_one::<u64>("stall-timeout").copied(),
            seed: *matches.get_one::<u64>("seed").unwrap(),
        },
    };
    info!(?scenario, "loaded scenario");

    // Run the test
    let executor = deterministic::Runner::seeded(scenario.seed);
    let reports = match executor.start(|context| async move { simulate(context, &scenario).await })
    {
        Ok(reports) => reports,
        Err(err) => {
            error!(?err, "latency test failed");
            std::process::exit(1);
        }
    };

    // Summarize
    for report in reports {
        let summary = report.summary();
        info!(
            peer = %report.name,
            final_time = report.final_time,
            probes = summary.probes,
            complete = summary.complete,
            responses = summary.responses,
            latency = ?summary.latency,
            "summary"
        );
        for (responder, latency) in report.by_responder() {
            info!(
                peer = %report.name,
                %responder,
                min = latency.min,
                max = latency.max,
                mean = latency.mean,
                median = latency.median,
                std_dev = latency.std_dev,
                "latency (ms)"
            );
        }
    }
}
