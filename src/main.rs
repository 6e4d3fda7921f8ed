use std::fs;
use std::io::{self, prelude::*};
use std::path;
use std::process;
use std::thread;
use std::time::Duration;

use clap::ArgEnum;

use dist_sort::{input, DistributedSorterBuilder, Server, ServerConfig, ServerHandle, Worker, WorkerConfig};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    match arg_parser.subcommand() {
        Some(("coordinator", args)) => run_coordinator(args),
        Some(("worker", args)) => run_worker(args),
        _ => unreachable!("subcommand is required"),
    }
}

fn run_coordinator(args: &clap::ArgMatches) {
    let port: u16 = args.value_of_t_or_exit("port");
    let delay: u64 = args.value_of_t_or_exit("delay");
    let timeout: u64 = args.value_of_t_or_exit("timeout");
    let max_attempts: Option<usize> = args
        .is_present("max_attempts")
        .then(|| args.value_of_t_or_exit("max_attempts"));
    let input_path = args.value_of("input").expect("value has a default");

    let config = ServerConfig::new().with_response_timeout(match timeout {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    });

    let server = match Server::bind(("0.0.0.0", port), config) {
        Ok(server) => server,
        Err(err) => {
            log::error!("listener initialization error: {}", err);
            process::exit(1);
        }
    };

    let (handle, accept) = match server.spawn() {
        Ok(spawned) => spawned,
        Err(err) => {
            log::error!("accept thread spawn error: {}", err);
            process::exit(1);
        }
    };

    // the sort is triggered once, after workers had a chance to register
    thread::sleep(Duration::from_secs(delay));

    let list = match input::read_file(path::Path::new(input_path)) {
        Ok(list) => list,
        Err(err) => exit_with(&handle, format!("input file reading error: {}", err)),
    };

    let mut sorter_builder = DistributedSorterBuilder::new();
    if let Some(max_attempts) = max_attempts {
        sorter_builder = sorter_builder.with_max_attempts(max_attempts);
    }
    let sorter = sorter_builder.build(handle.queue(), handle.registry());

    let sorted_stream = match sorter.sort(list) {
        Ok(sorted_stream) => sorted_stream,
        Err(err) => exit_with(&handle, format!("data sorting error: {}", err)),
    };

    let mut output_stream: io::BufWriter<Box<dyn Write>> = match args.value_of("output") {
        Some(output) => match fs::File::create(output) {
            Ok(file) => io::BufWriter::new(Box::new(file)),
            Err(err) => exit_with(&handle, format!("output file creation error: {}", err)),
        },
        None => io::BufWriter::new(Box::new(io::stdout())),
    };

    log::info!("here is the sorted list of {} strings", sorted_stream.len());

    for line in sorted_stream {
        if let Err(err) = output_stream.write_all(format!("{}\n", line).as_bytes()) {
            exit_with(&handle, format!("data saving error: {}", err));
        }
    }

    if let Err(err) = output_stream.flush() {
        exit_with(&handle, format!("data flushing error: {}", err));
    }

    handle.shutdown();
    if accept.join().is_err() {
        log::warn!("accept thread terminated abnormally");
    }
}

fn run_worker(args: &clap::ArgMatches) {
    let master = args.value_of("master").expect("value has a default");
    let reconnect: u64 = args.value_of_t_or_exit("reconnect");
    let threads: Option<usize> = args
        .is_present("threads")
        .then(|| args.value_of_t_or_exit("threads"));

    let mut config = WorkerConfig::new(master).with_reconnect_interval(Duration::from_secs(reconnect));
    if let Some(threads) = threads {
        config = config.with_threads_number(threads);
    }

    let worker = match Worker::new(config) {
        Ok(worker) => worker,
        Err(err) => {
            log::error!("worker initialization error: {}", err);
            process::exit(1);
        }
    };

    worker.run();
}

fn exit_with(handle: &ServerHandle, message: String) -> ! {
    log::error!("{}", message);
    handle.shutdown();
    process::exit(1);
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn is_number(v: &str) -> Result<(), String> {
    match v.parse::<u64>() {
        Ok(_) => Ok(()),
        Err(err) => Err(format!("number expected: {}", err)),
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("dist-sort")
        .about("distributed external sorter")
        .subcommand_required(true)
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .global(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .subcommand(
            clap::App::new("coordinator")
                .about("partitions the input across connected workers and merges the sorted result")
                .arg(
                    clap::Arg::new("port")
                        .short('p')
                        .long("port")
                        .help("listening port")
                        .takes_value(true)
                        .default_value("8100")
                        .validator(|v| match v.parse::<u16>() {
                            Ok(_) => Ok(()),
                            Err(err) => Err(format!("port format incorrect: {}", err)),
                        }),
                )
                .arg(
                    clap::Arg::new("input")
                        .short('i')
                        .long("input")
                        .help("file to be sorted, one string per line")
                        .takes_value(true)
                        .default_value("list_of_strings.txt"),
                )
                .arg(
                    clap::Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("result file (stdout if omitted)")
                        .takes_value(true),
                )
                .arg(
                    clap::Arg::new("delay")
                        .short('d')
                        .long("delay")
                        .help("seconds to wait for workers before sorting")
                        .takes_value(true)
                        .default_value("3")
                        .validator(is_number),
                )
                .arg(
                    clap::Arg::new("timeout")
                        .short('t')
                        .long("timeout")
                        .help("seconds to wait for a worker's answer (0 waits forever)")
                        .takes_value(true)
                        .default_value("30")
                        .validator(is_number),
                )
                .arg(
                    clap::Arg::new("max_attempts")
                        .short('a')
                        .long("max-attempts")
                        .help("delivery attempts per partition (unlimited if omitted)")
                        .takes_value(true)
                        .validator(is_number),
                ),
        )
        .subcommand(
            clap::App::new("worker")
                .about("sorts batches for a coordinator")
                .arg(
                    clap::Arg::new("master")
                        .short('m')
                        .long("master")
                        .help("coordinator address")
                        .takes_value(true)
                        .default_value(dist_sort::worker::DEFAULT_COORDINATOR),
                )
                .arg(
                    clap::Arg::new("threads")
                        .short('t')
                        .long("threads")
                        .help("number of threads to use for sorting a batch")
                        .takes_value(true)
                        .validator(is_number),
                )
                .arg(
                    clap::Arg::new("reconnect")
                        .short('r')
                        .long("reconnect")
                        .help("seconds between connection attempts")
                        .takes_value(true)
                        .default_value("1")
                        .validator(is_number),
                ),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
