use byte_unit::Byte;
use byteminer::cli::{Cli, Commands, OutputFormat};
use byteminer::config::Config;
use byteminer::engine::ExtractFlags;
use byteminer::error::{ByteminerError, Result as ByteminerResult};
use byteminer::extractor::Extractor;
use byteminer::output_formats::OccurrenceWriter;
use byteminer::plugin_cli::PluginCli;
use byteminer::progress::ProgressReporter;
use byteminer::stream::{SharedStream, Stream};
use clap::{CommandFactory, Parser};
use colored::*;
use env_logger::{Builder, Env, Target};
use is_terminal::IsTerminal;
use log::{info, warn};
use std::fs;
use std::io::{self, BufWriter, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

fn main() -> ByteminerResult<()> {
    let cli = Cli::parse();
    setup_logging(&cli)?;

    let start_time = Instant::now();
    info!("byteminer started with command: {:?}", cli.command);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let color = io::stdout().is_terminal();
    if !color {
        colored::control::set_override(false);
    }

    match &cli.command {
        Commands::Scan {
            file,
            text,
            miners,
            threads,
            batch,
            slice_size,
            max_span,
            no_enclosed,
            format,
            progress,
            metrics,
        } => {
            let plugin_cli = PluginCli::new(config.miner_search_paths());
            let mut specs = config.plugins.miners.clone();
            specs.extend(miners.iter().cloned());
            if specs.is_empty() {
                return Err(ByteminerError::Argument(
                    "no miners given, use --miner LIBRARY::SYMBOL[=CONFIG]".to_string(),
                ));
            }
            let specs = plugin_cli.resolve_specs(&specs);

            let mut engine_config = config.engine.engine_config();
            if let Some(threads) = threads {
                engine_config.threads = *threads;
            }
            if let Some(slice_size) = slice_size {
                engine_config.slice_size = *slice_size;
            }
            if let Some(max_span) = max_span {
                engine_config.max_span = *max_span;
            }
            if *no_enclosed {
                engine_config.flags = engine_config.flags | ExtractFlags::NO_ENCLOSED_OCCURRENCES;
            }
            let batch = batch.unwrap_or(config.engine.batch_size);

            let mut extractor = Extractor::with_config(engine_config, batch, &[], &specs)?;
            if extractor.miners().is_empty() {
                return Err(anyhow::anyhow!(
                    "no miner could be loaded (last error: {})",
                    extractor.last_error()
                )
                .into());
            }

            let stream = open_input(file.as_ref(), text.as_deref())?;
            extractor.set_stream(&stream)?;
            let total = stream.lock().len_hint();

            let interrupted = Arc::new(AtomicBool::new(false));
            {
                let interrupted = interrupted.clone();
                ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))
                    .map_err(|e| anyhow::anyhow!("failed to install Ctrl-C handler: {e}"))?;
            }

            let stdout = io::stdout();
            let mut writer = OccurrenceWriter::new(BufWriter::new(stdout.lock()), *format)
                .with_color(color && *format == OutputFormat::Text);
            let mut reporter = ProgressReporter::new(total, *progress);

            let mut failure = None;
            while !extractor.eof()? {
                if interrupted.load(Ordering::SeqCst) {
                    warn!("Interrupted, stopping at offset {}", stream.lock().position());
                    break;
                }
                match extractor.next() {
                    Ok(batch) => {
                        reporter.update(stream.lock().position(), batch.len());
                        writer.write_batch(&batch)?;
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            writer.finish()?;
            let stats = reporter.finish();

            let adjusted = Byte::from_u64(stats.bytes_scanned)
                .get_appropriate_unit(byte_unit::UnitType::Binary);
            eprintln!(
                "{} {:.2} {} {} {} {} {:.2?}",
                "Scanned".green(),
                adjusted.get_value(),
                adjusted.get_unit(),
                "with".green(),
                format!("{} occurrences", stats.occurrences).cyan(),
                "in".green(),
                stats.elapsed
            );

            if *metrics {
                eprint!("{}", extractor.metrics().gather());
            }
            if let Some(e) = failure {
                return Err(e);
            }
        }
        Commands::Meta { library, format } => {
            let plugin_cli = PluginCli::new(config.miner_search_paths());
            let stdout = io::stdout();
            plugin_cli.show_meta(library, *format, color, &mut stdout.lock())?;
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(*shell, &mut cmd, "byteminer", &mut io::stdout());
        }
    }

    info!(
        "byteminer finished. Total elapsed time: {:.2?}",
        start_time.elapsed()
    );
    Ok(())
}

fn open_input(file: Option<&PathBuf>, text: Option<&str>) -> ByteminerResult<SharedStream> {
    let stream = match (file, text) {
        (Some(path), _) => {
            let stream = Stream::open_file(path);
            if let Some(reason) = stream.failure() {
                return Err(ByteminerError::StreamOpen {
                    path: path.clone(),
                    reason: reason.to_string(),
                });
            }
            stream
        }
        (None, Some(text)) => Stream::open_buffer(text),
        (None, None) => {
            if io::stdin().is_terminal() {
                warn!("Reading input from the terminal, end it with Ctrl-D");
            }
            let mut input = Vec::new();
            io::stdin().read_to_end(&mut input)?;
            Stream::open_buffer(input)
        }
    };
    Ok(stream.into_shared())
}

fn setup_logging(cli: &Cli) -> ByteminerResult<()> {
    let default_filter = if cli.verbose { "info" } else { "warn" };
    let mut builder = Builder::from_env(Env::default().default_filter_or(default_filter));

    builder.format(|buf, record| {
        use std::io::Write;
        writeln!(
            buf,
            "{} [{}] [{}] {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.module_path().unwrap_or("unknown"),
            record.args()
        )
    });

    if let Some(log_path) = &cli.log {
        if let Some(parent_dir) = log_path.parent() {
            if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
                fs::create_dir_all(parent_dir)?;
            }
        }
        let log_file = fs::File::create(log_path)?;
        builder.target(Target::Pipe(Box::new(log_file)));
    } else {
        builder.target(Target::Stderr);
    }

    builder
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;
    Ok(())
}
