mod actors;
mod availability;
mod catalog;
mod cli;
mod composer;
mod config;
mod database;
mod engine;
mod fetcher;
mod io;
mod logging;
mod outside;
mod resolver;
mod result;
mod segment_cache;
mod types;
mod utils;

use clap::Parser;
use miette::{Context, IntoDiagnostic};
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    actors::Segment,
    cli::{Args, Command},
    config::Settings,
    engine::Engine,
    logging::init_logging,
    result::Result,
};

/// Exit code when no gloss token could be derived from the input
const CLIENT_ERROR_CODE: i32 = 2;

fn main() -> miette::Result<()> {
    // Initialize the environment & CLI
    let args = Args::parse();
    init_logging(args.log_level)?;

    let mut settings = Settings::load(Some(&args.config))?;
    args.apply(&mut settings);
    debug!("Settings: {settings:?}");

    match run(args.command, settings) {
        Ok(()) => Ok(()),
        // Distinguish bad input from pipeline failures for calling scripts
        Err(err) if err.is_client_error() => {
            eprintln!("{:?}", miette::Report::from(err));
            std::process::exit(CLIENT_ERROR_CODE)
        }
        Err(err) => Err(err.into()),
    }
}

fn run(command: Command, mut settings: Settings) -> Result<()> {
    match command {
        Command::Resolve { text, no_service } => {
            let engine = Engine::new(settings)?;
            print_json(&engine.resolve(&text, !no_service))
        }
        Command::Tokenize { text, no_service } => {
            let engine = Engine::new(settings)?;
            print_json(&engine.tokenize(&text, !no_service))
        }
        Command::Compose { tokens, speed } => {
            let engine = Engine::new(settings)?.with_video()?;
            print_json(&engine.compose_tokens(&tokens, speed)?)
        }
        Command::Clips { tokens } => {
            let engine = Engine::new(settings)?;
            print_json(&engine.clip_paths(&tokens)?)
        }
        Command::Segment {
            text,
            no_service,
            speed,
        } => {
            let engine = Engine::new(settings)?.with_video()?;
            print_json(&engine.compose_cached(&text, !no_service, speed)?)
        }
        Command::Transcript {
            file,
            no_service,
            speed,
            ..
        } => {
            let content = std::fs::read_to_string(&file)
                .into_diagnostic()
                .wrap_err_with(|| format!("Could not read transcript {}", file.display()))?;
            let segments = Segment::list_from_json(&content)?;

            let engine = Engine::new(settings)?.with_video()?;
            let results = engine.compose_transcript(segments, !no_service, speed)?;

            let failed = results.iter().filter(|r| r.error.is_some()).count();
            info!("{} segments composed, {failed} failed", results.len() - failed);
            print_json(&results)
        }
        Command::Tokens => {
            let engine = Engine::new(settings)?;
            print_json(&engine.tokens())
        }
        Command::ClearCache => {
            // Only the cache directory is needed
            settings.catalog = None;
            let engine = Engine::new(settings)?;
            let deleted = engine.clear_cache()?;
            print_json(&serde_json::json!({
                "deleted": deleted,
                "cache_dir": engine.clip_cache_dir(),
            }))
        }
    }
}

/// Print the result of a command on stdout
fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .into_diagnostic()
        .wrap_err("Could not serialize the result")?;
    println!("{json}");
    Ok(())
}
