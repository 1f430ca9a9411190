//! `tracksleuth` command line: import audio into the fingerprint index and
//! recognize clips against it. Results are printed to stdout as JSON.

use std::path::PathBuf;
use std::process::ExitCode;

use serde::Serialize;
use tracksleuth::config;
use tracksleuth::index::IndexError;
use tracksleuth::{Engine, EngineError, app_dirs, logging};

const DEFAULT_HISTORY_LIMIT: usize = 20;

struct Options {
    home: Option<PathBuf>,
    config: Option<PathBuf>,
    database: Option<PathBuf>,
    command: Command,
}

enum Command {
    Fingerprint {
        paths: Vec<PathBuf>,
        extensions: Vec<String>,
        workers: Option<usize>,
        name: Option<String>,
    },
    Recognize {
        paths: Vec<PathBuf>,
    },
    List,
    Find {
        name: String,
    },
    Delete {
        audio_ids: Vec<String>,
    },
    History {
        min_confidence: Option<f64>,
        limit: usize,
    },
    Stats,
    Config {
        save: bool,
    },
}

#[derive(Serialize)]
struct Stats {
    database: PathBuf,
    audios: u64,
    fingerprints: u64,
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let opts = match parse_args(&args) {
        Ok(opts) => opts,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::from(2);
        }
    };
    if let Some(home) = &opts.home
        && let Err(err) = app_dirs::set_app_root_override(home.clone())
    {
        eprintln!("{err}");
        return ExitCode::from(2);
    }
    if let Err(err) = logging::init() {
        eprintln!("Logging disabled: {err}");
    }
    match run(opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err}");
            eprintln!("{err}");
            if storage_unavailable(err.as_ref()) {
                ExitCode::from(3)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(opts: Options) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match &opts.config {
        Some(path) => path.clone(),
        None => config::config_path()?,
    };
    let mut settings = config::load_from_path(&config_path)?;
    if let Some(database) = opts.database {
        settings.index.database_path = Some(database);
    }

    if let Command::Config { save } = opts.command {
        if save {
            config::save_to_path(&settings, &config_path)?;
            eprintln!("Saved settings to {}", config_path.display());
        }
        print!("{}", toml::to_string_pretty(&settings)?);
        return Ok(());
    }

    let mut engine = Engine::open(settings)?;
    match opts.command {
        Command::Fingerprint {
            paths,
            extensions,
            workers,
            name,
        } => {
            let mut outcomes = Vec::new();
            for path in paths {
                if path.is_dir() {
                    let summary = engine.fingerprint_directory(&path, &extensions, workers)?;
                    outcomes.push(serde_json::to_value(summary)?);
                } else {
                    let outcome = engine.fingerprint_file(&path, name.as_deref())?;
                    outcomes.push(serde_json::to_value(outcome)?);
                }
            }
            print_json(&outcomes)?;
        }
        Command::Recognize { paths } => {
            let mut reports = Vec::new();
            for path in &paths {
                reports.push(engine.recognize_file(path)?);
            }
            if reports.len() == 1 {
                print_json(&reports[0])?;
            } else {
                print_json(&reports)?;
            }
        }
        Command::List => print_json(&engine.fingerprinted_audios()?)?,
        Command::Find { name } => print_json(&engine.source_audios_by_name(&name)?)?,
        Command::Delete { audio_ids } => {
            let removed = engine.delete_audios(&audio_ids)?;
            print_json(&serde_json::json!({ "deleted": removed }))?;
        }
        Command::History {
            min_confidence,
            limit,
        } => print_json(&engine.matched_history(min_confidence, limit)?)?,
        Command::Stats => print_json(&Stats {
            database: engine.index().path().to_path_buf(),
            audios: engine.index().audio_count()?,
            fingerprints: engine.index().fingerprint_count()?,
        })?,
        Command::Config { .. } => {}
    }
    Ok(())
}

fn storage_unavailable(err: &(dyn std::error::Error + 'static)) -> bool {
    err.downcast_ref::<EngineError>()
        .is_some_and(EngineError::is_storage_unavailable)
        || err
            .downcast_ref::<IndexError>()
            .is_some_and(IndexError::is_unavailable)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut home = None;
    let mut config = None;
    let mut database = None;
    let mut command: Option<String> = None;
    let mut positional: Vec<String> = Vec::new();
    let mut extensions: Vec<String> = Vec::new();
    let mut workers = None;
    let mut name = None;
    let mut min_confidence = None;
    let mut limit = DEFAULT_HISTORY_LIMIT;
    let mut save = false;

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => {
                return Err(help_text().to_string());
            }
            "--home" => {
                idx += 1;
                home = Some(PathBuf::from(value_for(args, idx, "--home")?));
            }
            "--config" => {
                idx += 1;
                config = Some(PathBuf::from(value_for(args, idx, "--config")?));
            }
            "--db" => {
                idx += 1;
                database = Some(PathBuf::from(value_for(args, idx, "--db")?));
            }
            "--ext" => {
                idx += 1;
                let value = value_for(args, idx, "--ext")?;
                extensions.extend(
                    value
                        .split(',')
                        .map(|ext| ext.trim().to_string())
                        .filter(|ext| !ext.is_empty()),
                );
            }
            "--workers" => {
                idx += 1;
                let value = value_for(args, idx, "--workers")?;
                workers = Some(parse_usize(value, "--workers")?);
            }
            "--name" => {
                idx += 1;
                name = Some(value_for(args, idx, "--name")?.to_string());
            }
            "--min-confidence" => {
                idx += 1;
                let value = value_for(args, idx, "--min-confidence")?;
                min_confidence = Some(parse_f64(value, "--min-confidence")?);
            }
            "--limit" => {
                idx += 1;
                let value = value_for(args, idx, "--limit")?;
                limit = parse_usize(value, "--limit")?;
            }
            "--save" => {
                save = true;
            }
            flag if flag.starts_with("--") => {
                return Err(format!("Unknown argument: {flag}\n\n{}", help_text()));
            }
            value => {
                if command.is_none() {
                    command = Some(value.to_string());
                } else {
                    positional.push(value.to_string());
                }
            }
        }
        idx += 1;
    }

    let command = command.ok_or_else(|| help_text().to_string())?;
    let command = match command.as_str() {
        "fingerprint" => {
            if positional.is_empty() {
                return Err("fingerprint requires at least one path".to_string());
            }
            if name.is_some() && positional.len() > 1 {
                return Err("--name only applies when fingerprinting a single file".to_string());
            }
            Command::Fingerprint {
                paths: positional.into_iter().map(PathBuf::from).collect(),
                extensions,
                workers,
                name,
            }
        }
        "recognize" => {
            if positional.is_empty() {
                return Err("recognize requires at least one file".to_string());
            }
            Command::Recognize {
                paths: positional.into_iter().map(PathBuf::from).collect(),
            }
        }
        "list" => Command::List,
        "find" => {
            let name = positional
                .into_iter()
                .next()
                .or(name)
                .ok_or_else(|| "find requires an audio name".to_string())?;
            Command::Find { name }
        }
        "delete" => {
            if positional.is_empty() {
                return Err("delete requires at least one audio id".to_string());
            }
            Command::Delete {
                audio_ids: positional,
            }
        }
        "history" => Command::History {
            min_confidence,
            limit,
        },
        "stats" => Command::Stats,
        "config" => Command::Config { save },
        other => {
            return Err(format!("Unknown command: {other}\n\n{}", help_text()));
        }
    };

    Ok(Options {
        home,
        config,
        database,
        command,
    })
}

fn value_for<'a>(args: &'a [String], idx: usize, flag: &str) -> Result<&'a str, String> {
    args.get(idx)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_usize(value: &str, flag: &str) -> Result<usize, String> {
    value
        .parse::<usize>()
        .map_err(|_| format!("Invalid {flag} value: {value}"))
}

fn parse_f64(value: &str, flag: &str) -> Result<f64, String> {
    value
        .parse::<f64>()
        .ok()
        .filter(|parsed| parsed.is_finite())
        .ok_or_else(|| format!("Invalid {flag} value: {value}"))
}

fn help_text() -> &'static str {
    "Usage: tracksleuth [--home DIR] [--config FILE] [--db FILE] <command> [args]

Commands:
  fingerprint <path>... [--ext wav,mp3] [--workers N] [--name NAME]
      Import files or directories into the index.
  recognize <file>...
      Match clips against the index.
  list                      List fingerprinted audios.
  find <name>               List fingerprinted audios with this name.
  delete <audio_id>...      Remove audios and their hashes.
  history [--min-confidence X] [--limit N]
      Show logged recognitions, newest first.
  stats                     Show index counts.
  config [--save]           Print effective settings; --save writes them.

Options:
  --home DIR     Use DIR instead of the default app directory.
  --config FILE  Read settings from FILE.
  --db FILE      Use FILE as the fingerprint index."
}
