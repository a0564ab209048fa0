use std::collections::BTreeMap;

use arrow::util::pretty::pretty_format_batches;
use flowplan_client::Engine;
use flowplan_common::{keys, EngineConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let opts = parse_opts(&args)?;

    let mut config = match &opts.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    }
    .with_env_overrides()?;
    if let Some(strategies) = &opts.strategies {
        config
            .runtime
            .insert(keys::STEP_STRATEGIES.to_string(), strategies.clone());
    }
    if let Some(parallelism) = opts.parallelism {
        config.default_parallelism = parallelism;
    }

    let engine = if opts.embedded {
        Engine::embedded(config)
    } else {
        Engine::new(config)?
    };

    let mut ctx = engine.context();
    let graph = ctx.graph();
    let source = graph.source("input", "value", opts.values.iter().cloned());
    let mapped = graph.map(source, "normalize", &opts.operator, BTreeMap::new());
    let unique = graph.distinct(mapped, "unique");
    graph.sink(unique, "output");
    graph.describe(mapped, format!("normalize values with {}", opts.operator))?;
    graph.describe(unique, "drop duplicate values")?;

    if opts.explain {
        println!("{}", engine.explain(&ctx)?);
        return Ok(());
    }

    let build = engine.build(&ctx);
    let stats = engine.run_sync(&build)?;
    eprint!("{}", stats.report());
    let batches = stats.outputs.get("output").cloned().unwrap_or_default();
    if batches.iter().all(|b| b.num_rows() == 0) {
        println!("OK: 0 rows");
    } else {
        println!("{}", pretty_format_batches(&batches)?);
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct Opts {
    values: Vec<String>,
    operator: String,
    embedded: bool,
    explain: bool,
    config: Option<String>,
    strategies: Option<String>,
    parallelism: Option<usize>,
}

fn parse_opts(args: &[String]) -> Result<Opts, Box<dyn std::error::Error>> {
    let mut opts = Opts {
        values: Vec::new(),
        operator: "lower".to_string(),
        embedded: false,
        explain: false,
        config: None,
        strategies: None,
        parallelism: None,
    };

    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--embedded" => opts.embedded = true,
            "--explain" => opts.explain = true,
            "--op" => {
                i += 1;
                opts.operator = args.get(i).cloned().ok_or("missing value for --op")?;
            }
            "--config" => {
                i += 1;
                opts.config = Some(args.get(i).cloned().ok_or("missing value for --config")?);
            }
            "--strategies" => {
                i += 1;
                opts.strategies = Some(
                    args.get(i)
                        .cloned()
                        .ok_or("missing value for --strategies")?,
                );
            }
            "--parallelism" => {
                i += 1;
                let raw = args.get(i).ok_or("missing value for --parallelism")?;
                opts.parallelism = Some(raw.parse()?);
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other if other.starts_with("--") => {
                return Err(format!("unknown argument: {other}").into());
            }
            value => opts.values.push(value.to_string()),
        }
        i += 1;
    }
    if opts.values.is_empty() {
        print_usage();
        return Err("no input values given".into());
    }
    Ok(opts)
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  flowplan [--embedded] [--explain] [--op NAME] [--config PATH]");
    eprintln!("           [--strategies a,b] [--parallelism N] VALUE...");
}
