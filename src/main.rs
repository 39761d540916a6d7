use std::path::Path;
use std::process::ExitCode;

use colored::Colorize;

use spike_extraction::acquisition::read_header;
use spike_extraction::acquisition::SignalKind;
use spike_extraction::config::load_config;
use spike_extraction::pipeline;
use spike_extraction::synth::SyntheticSession;
use spike_extraction::Result;

const USAGE: &str = "usage:
  extract-spikes extract <config.yaml> [channel]
  extract-spikes collect <config.yaml>
  extract-spikes header <info.rhd>
  extract-spikes simulate <dir> [seed]";

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let result = match args.get(1).map(String::as_str) {
        Some("extract") if args.len() > 2 => {
            parse_channel(args.get(3)).and_then(|channel| extract(&args[2], channel))
        }
        Some("collect") if args.len() > 2 => collect(&args[2]),
        Some("header") if args.len() > 2 => header(&args[2]),
        Some("simulate") if args.len() > 2 => parse_seed(args.get(3)).and_then(|seed| simulate(&args[2], seed)),
        _ => {
            println!("{}", USAGE);
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn parse_channel(arg: Option<&String>) -> Result<Option<usize>> {
    arg.map(|a| {
        a.parse::<usize>().map_err(|_| {
            spike_extraction::SpikeError::Config(format!("channel must be an index, got {:?}", a))
        })
    })
    .transpose()
}

fn parse_seed(arg: Option<&String>) -> Result<u64> {
    match arg {
        None => Ok(SyntheticSession::default().seed),
        Some(a) => a.parse::<u64>().map_err(|_| {
            spike_extraction::SpikeError::Config(format!("seed must be an integer, got {:?}", a))
        }),
    }
}

fn extract(config_path: &str, channel: Option<usize>) -> Result<()> {
    let config = load_config(config_path)?;
    println!(
        "{} {}",
        "Extracting".green().bold(),
        config.session.directory.display()
    );

    let report = pipeline::run(&config, channel)?;

    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(spikes) => println!(
                "  {:>4} {:<12} {} spikes",
                outcome.index,
                outcome.channel,
                spikes.spike_count.to_string().cyan()
            ),
            Err(e) => println!(
                "  {:>4} {:<12} {}",
                outcome.index,
                outcome.channel,
                e.to_string().red()
            ),
        }
    }

    let failed = report.failures().count();
    let summary = format!(
        "{} channels extracted, {} failed, output in {}",
        report.succeeded().count(),
        failed,
        config.session.output_dir.display()
    );
    if failed == 0 {
        println!("{}", summary.green());
    } else {
        println!("{}", summary.yellow());
    }
    Ok(())
}

fn collect(config_path: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let missing = pipeline::collect(&config)?;

    if missing.is_empty() {
        println!(
            "{} {}",
            "Collected".green().bold(),
            config.session.output_dir.display()
        );
    } else {
        println!(
            "{} {}, no output for: {}",
            "Collected".yellow().bold(),
            config.session.output_dir.display(),
            missing.join(", ").red()
        );
    }
    Ok(())
}

fn header(path: &str) -> Result<()> {
    let header = read_header(path)?;

    println!(
        "{} v{}.{}",
        path.bold(),
        header.version.major,
        header.version.minor
    );
    println!("  sample rate        {} Hz", header.sample_rate);
    println!("  samples per block  {}", header.samples_per_data_block);
    println!("  notch filter       {} Hz", header.notch_filter_hz());
    println!(
        "  bandwidth          {} - {} Hz",
        header.frequency.actual_lower_bandwidth, header.frequency.actual_upper_bandwidth
    );
    for kind in SignalKind::ALL {
        let channels = header.channels.of(kind);
        if channels.is_empty() {
            continue;
        }
        let names: Vec<&str> = channels.iter().map(|c| c.native_name.as_str()).collect();
        println!("  {:<18} {} [{}]", format!("{:?}", kind), channels.len(), names.join(", "));
    }
    Ok(())
}

fn simulate(dir: &str, seed: u64) -> Result<()> {
    let session = SyntheticSession {
        seed,
        ..SyntheticSession::default()
    };
    let output = session.write(Path::new(dir))?;
    let injected: usize = output.spikes.iter().map(Vec::len).sum();

    println!(
        "{} {} channels, {} presentations, {} injected spikes",
        "Simulated".green().bold(),
        output.channel_names.len(),
        output.onsets.len(),
        injected
    );
    println!("  config: {}", output.config_path.display());
    Ok(())
}
