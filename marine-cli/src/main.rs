mod commands;
mod models;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use log::{error, LevelFilter};
use marine_fetch::Config;
use models::context::{Context, ContextPointer};
use serde::Serialize;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "marine", about = "Marine conditions with a resilient fetch cache")]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "MARINE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Location {
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,
    #[arg(long, allow_hyphen_values = true)]
    lon: f64,
}

#[derive(Subcommand)]
enum Command {
    /// Hourly wave and swell data
    Marine {
        #[command(flatten)]
        location: Location,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Hourly atmospheric forecast from one model
    Forecast {
        #[command(flatten)]
        location: Location,
        #[arg(long, default_value = "best_match")]
        model: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Current conditions
    Current {
        #[command(flatten)]
        location: Location,
    },
    /// Look up a place by name
    Geocode { name: String },
    /// Cache and deduplication statistics
    Stats,
    /// Remove every cache entry
    Clear,
    /// Remove cache entries whose key contains PATTERN
    Invalidate { pattern: String },
    /// Remove expired cache entries
    Purge,
}

fn init_logging(level: LevelFilter) {
    let config = ConfigBuilder::new()
        .add_filter_allow_str("marine")
        .add_filter_allow_str("utils")
        .build();
    if let Err(err) = TermLogger::init(level, config, TerminalMode::Stderr, ColorChoice::Auto) {
        eprintln!("Failed to initialize logger: {}", err);
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(ctx: &Context, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Marine { location, date } => {
            print_json(&commands::conditions::marine(ctx, location.lat, location.lon, date).await?)?
        }
        Command::Forecast {
            location,
            model,
            date,
        } => print_json(
            &commands::conditions::forecast(ctx, location.lat, location.lon, &model, date).await?,
        )?,
        Command::Current { location } => {
            print_json(&commands::conditions::current(ctx, location.lat, location.lon).await?)?
        }
        Command::Geocode { name } => print_json(&commands::conditions::geocode(ctx, &name).await?)?,
        Command::Stats => print_json(&commands::cache_stats::cache_stats(ctx).await)?,
        Command::Clear => println!(
            "cleared {} entries",
            commands::cache_stats::clear_cache(ctx).await
        ),
        Command::Invalidate { pattern } => println!(
            "invalidated {} entries",
            commands::cache_stats::invalidate(ctx, &pattern).await
        ),
        Command::Purge => println!(
            "purged {} expired entries",
            commands::cache_stats::purge(ctx).await
        ),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!("{}", err);
            return ExitCode::FAILURE;
        }
    };

    let ctx: ContextPointer = match Context::new(config) {
        Ok(ctx) => Arc::new(ctx),
        Err(err) => {
            error!("Failed to open cache: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let result = run(&ctx, cli.command).await;
    ctx.shutdown();
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_negative_coordinates() {
        let cli = Cli::try_parse_from([
            "marine", "current", "--lat", "-33.8688", "--lon", "151.2093",
        ])
        .unwrap();
        match cli.command {
            Command::Current { location } => {
                assert_eq!(location.lat, -33.8688);
                assert_eq!(location.lon, 151.2093);
            }
            _ => panic!("expected current"),
        }
    }

    #[test]
    fn test_parses_date() {
        let cli = Cli::try_parse_from([
            "marine", "marine", "--lat", "43.2965", "--lon", "5.3698", "--date", "2026-10-18",
        ])
        .unwrap();
        match cli.command {
            Command::Marine { date, .. } => {
                assert_eq!(date, NaiveDate::from_ymd_opt(2026, 10, 18));
            }
            _ => panic!("expected marine"),
        }
    }
}
