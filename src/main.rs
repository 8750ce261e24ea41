mod cache;
mod config;
mod error;
mod replace;
mod replay;
mod trace;

use std::{fs, io, path::PathBuf, process};

use color_eyre::eyre::{self, WrapErr};

use crate::{
    config::{Config, Policy},
    replay::{MalformedPolicy, Replayer},
    trace::Trace,
};

const USAGE: &str = "\
Usage: csim [-hv] -s <num> -E <num> -b <num> -t <file>
       csim [-hv] (--config <json> | -p <path>) -t <file>
Options:
  -h, --help         Print this help message.
  -v                 Print one line of hit/miss/eviction outcomes per record.
  -s <num>           Number of set index bits.
  -E <num>           Number of lines per set.
  -b <num>           Number of block offset bits.
  -t <file>          Trace file (`.xz` traces are decompressed).
  --config <json>    Cache configuration as JSON.
  -p <path>          Read the JSON configuration from a file.
  --repl <policy>    Replacement policy: fifo (default), lru or nmru.
  --seed <num>       Seed for the nmru policy.
  --skip-malformed   Skip unparseable records instead of failing.
  --json <path>      Also write statistics as JSON.
  --buffer-size <n>  Records per block handed over by the trace reader.
  --queue-size <n>   Blocks buffered ahead of the replay.

Examples:
  csim -s 4 -E 1 -b 4 -t traces/yi.trace
  csim -v -s 8 -E 2 -b 4 -t traces/yi.trace
";

fn usage_error(msg: &str) -> ! {
    eprintln!("csim: {msg}");
    eprint!("{USAGE}");
    process::exit(1);
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        print!("{USAGE}");
        return Ok(());
    }
    let verbose = args.contains("-v");

    let config_str: Option<String> = if let Some(config_str) =
        args.opt_value_from_str("--config")?
    {
        Some(config_str)
    } else if let Some(config_path) = args.opt_value_from_str::<_, PathBuf>("-p")? {
        let config_str = fs::read_to_string(&config_path)
            .wrap_err_with(|| format!("could not read config {}", config_path.display()))?;
        Some(config_str)
    } else {
        None
    };

    let mut config = match config_str {
        Some(config_str) => serde_json::from_str::<Config>(&config_str)
            .wrap_err("invalid cache configuration")?,
        None => {
            let set_bits: Option<u32> = args.opt_value_from_str("-s")?;
            let lines_per_set: Option<usize> = args.opt_value_from_str("-E")?;
            let block_bits: Option<u32> = args.opt_value_from_str("-b")?;
            match (set_bits, lines_per_set, block_bits) {
                (Some(s), Some(e), Some(b)) => Config::new(s, b, e),
                _ => usage_error("Missing required command line argument"),
            }
        }
    };
    if let Some(repl) = args.opt_value_from_str::<_, Policy>("--repl")? {
        config.repl = repl;
    }
    if let Some(seed) = args.opt_value_from_str("--seed")? {
        config.seed = seed;
    }
    if args.contains("--skip-malformed") {
        config.malformed = MalformedPolicy::Skip;
    }

    let stats_path: Option<PathBuf> = args.opt_value_from_str("--json")?;
    let records_per_block: usize = args
        .opt_value_from_str("--buffer-size")?
        .unwrap_or(1024 * 16);
    let blocks_per_queue: usize = args.opt_value_from_str("--queue-size")?.unwrap_or(32);
    let trace_path: PathBuf = match args.opt_value_from_str("-t")? {
        Some(path) => path,
        None => usage_error("Missing required command line argument"),
    };

    let remaining = args.finish();
    if !remaining.is_empty() {
        usage_error(&format!("unexpected arguments: {remaining:?}"));
    }

    log::debug!("{config:?}");
    let mut cache = config.to_cache()?;
    let trace = Trace::read(&trace_path, records_per_block, blocks_per_queue)
        .wrap_err_with(|| format!("{}", trace_path.display()))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut replayer = Replayer::new(config.malformed);
    if verbose {
        replayer = replayer.with_diagnostics(&mut out);
    }
    let counters = replayer
        .replay(cache.as_mut(), trace.records())
        .wrap_err_with(|| format!("replaying {}", trace_path.display()))?;

    log::info!(
        "replayed {} records ({} skipped), {} of {} lines valid",
        replayer.records,
        replayer.skipped,
        cache.occupancy(),
        cache.geometry().n_sets * cache.geometry().n_ways
    );
    drop(replayer);
    drop(out);

    println!(
        "hits:{} misses:{} evictions:{}",
        counters.hits, counters.misses, counters.evictions
    );

    if let Some(stats_path) = stats_path {
        let stats_file = fs::File::create(&stats_path)
            .wrap_err_with(|| format!("cannot open output file {}", stats_path.display()))?;
        serde_json::to_writer_pretty(stats_file, &cache.make_stats())?;
    }
    Ok(())
}
