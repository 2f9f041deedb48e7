use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use carepoint::facility::FacilityHit;
use carepoint::{AppConfig, AppContext, FacilityFilter, FacilityType, GeoPoint, ObservationKind, ProfileFields};

#[derive(Parser, Debug)]
#[command(name = "carepoint")]
#[command(about = "Offline-first personal health records and facility finder", long_about = None)]
struct Args {
    /// Configuration file (defaults to ./carepoint.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory path
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Base URL of the sync endpoint
    #[arg(long)]
    remote_url: Option<String>,

    /// Treat the device as offline; writes are queued
    #[arg(long)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show connectivity, queue and session state
    Status,

    /// Manage the local profile
    Profile {
        #[command(subcommand)]
        action: ProfileCommand,
    },

    /// Change a preference (language, voiceEnabled, darkMode, largeText, highContrast)
    Pref { name: String, value: String },

    /// Record a health reading
    Observe {
        /// mood, bloodPressure, bloodSugar, weight, heartRate, energy or symptom
        kind: ObservationKind,
        value: f64,
        /// Diastolic value for blood pressure
        #[arg(long)]
        secondary: Option<f64>,
        #[arg(long)]
        note: Option<String>,
    },

    /// List health readings
    Observations {
        #[arg(long)]
        kind: Option<ObservationKind>,
        /// Day in YYYY-MM-DD form
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Print the chart series for --kind
        #[arg(long, requires = "kind")]
        series: bool,
    },

    /// Schedule a reminder (time in RFC 3339, e.g. 2026-03-01T08:00:00Z)
    Remind { time: DateTime<Utc>, text: String },

    /// List reminders
    Reminders {
        /// Only reminders due by now
        #[arg(long)]
        due: bool,
    },

    /// Acknowledge (delete) a reminder
    Ack { id: u64 },

    /// Publish a community post
    Post { location: String, content: String },

    /// List community posts
    Posts {
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Search the facility directory
    Facilities {
        /// all, hospital, clinic, pharmacy or volunteer
        #[arg(short = 't', long = "type", default_value = "all")]
        filter: FacilityFilter,
        #[arg(long, requires = "lng")]
        lat: Option<f64>,
        #[arg(long, requires = "lat")]
        lng: Option<f64>,
        /// Sort by distance from the configured home location
        #[arg(long, conflicts_with = "lat")]
        near_home: bool,
        /// Only facilities within this many kilometres
        #[arg(long)]
        radius: Option<f64>,
    },

    /// Closest facility of a type
    Nearest {
        kind: FacilityType,
        #[arg(long, requires = "lng")]
        lat: Option<f64>,
        #[arg(long, requires = "lat")]
        lng: Option<f64>,
    },

    /// Push queued writes now
    Flush,

    /// List queued writes
    Pending,
}

#[derive(Subcommand, Debug)]
enum ProfileCommand {
    Show,
    Save {
        /// Age bracket: child, teen, adult or elderly
        #[arg(long)]
        age: Option<String>,
        #[arg(long)]
        gender: Option<String>,
        #[arg(long)]
        religion: Option<String>,
        #[arg(long)]
        region: Option<String>,
        /// Repeat for several conditions
        #[arg(long = "condition")]
        conditions: Vec<String>,
    },
    /// Delete the profile and log out
    Clear,
}

#[derive(Serialize)]
struct Status<'a> {
    device_id: &'a str,
    connectivity: carepoint::Connectivity,
    remote: bool,
    pending: carepoint::sync::QueueStats,
    logged_in: bool,
    preferences: &'a carepoint::Preferences,
    facilities: usize,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn point(lat: Option<f64>, lng: Option<f64>) -> anyhow::Result<Option<GeoPoint>> {
    match (lat, lng) {
        (Some(lat), Some(lng)) => Ok(Some(GeoPoint::checked(lat, lng)?)),
        _ => Ok(None),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "carepoint=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if let Some(url) = args.remote_url {
        config.remote_url = Some(url);
    }
    if args.offline {
        config.offline = true;
    }
    config.validate()?;

    let mut ctx = AppContext::open(config).await?;

    let result = run(&mut ctx, args.command).await;
    ctx.close().await?;
    result
}

async fn run(ctx: &mut AppContext, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Status => print_json(&Status {
            device_id: &ctx.device_id,
            connectivity: ctx.monitor.state(),
            remote: ctx.coordinator.has_remote(),
            pending: ctx.coordinator.pending().stats()?,
            logged_in: ctx.session.logged_in,
            preferences: &ctx.session.preferences,
            facilities: ctx.facilities.len(),
        }),

        Command::Profile { action } => match action {
            ProfileCommand::Show => print_json(&ctx.profiles.current().await?),
            ProfileCommand::Save {
                age,
                gender,
                religion,
                region,
                conditions,
            } => {
                let fields = ProfileFields {
                    age,
                    gender,
                    religion,
                    region,
                    health_conditions: conditions,
                };
                let profile = ctx.profiles.save(fields, &mut ctx.session).await?;
                print_json(&profile)
            }
            ProfileCommand::Clear => {
                let existed = ctx.profiles.clear(&mut ctx.session).await?;
                println!("{}", if existed { "Profile deleted" } else { "No profile stored" });
                Ok(())
            }
        },

        Command::Pref { name, value } => {
            ctx.session.preferences.set(&name, &value)?;
            ctx.save_preferences().await?;
            print_json(&ctx.session.preferences)
        }

        Command::Observe {
            kind,
            value,
            secondary,
            note,
        } => {
            let mut observation = carepoint::Observation::new(kind, value);
            observation.secondary = secondary;
            observation.note = note;
            print_json(&ctx.health.add(observation).await?)
        }

        Command::Observations { kind, date, series } => match (kind, date) {
            (Some(kind), _) if series => print_json(&ctx.health.series(kind).await?),
            (Some(kind), None) => print_json(&ctx.health.of_kind(kind).await?),
            (Some(kind), Some(date)) => {
                let mut readings = ctx.health.on_date(date).await?;
                readings.retain(|o| o.kind == kind);
                print_json(&readings)
            }
            (None, Some(date)) => print_json(&ctx.health.on_date(date).await?),
            (None, None) => print_json(&ctx.health.all().await?),
        },

        Command::Remind { time, text } => print_json(&ctx.reminders.schedule(time, &text).await?),

        Command::Reminders { due } => {
            if due {
                print_json(&ctx.reminders.due_by(Utc::now()).await?)
            } else {
                print_json(&ctx.reminders.all().await?)
            }
        }

        Command::Ack { id } => print_json(&ctx.reminders.acknowledge(id).await?),

        Command::Post { location, content } => {
            print_json(&ctx.community.post(&location, &content).await?)
        }

        Command::Posts { location, date } => {
            let mut posts = match &location {
                Some(location) => ctx.community.by_location(location).await?,
                None => ctx.community.all().await?,
            };
            if let Some(date) = date {
                posts.retain(|p| p.date == date);
            }
            print_json(&posts)
        }

        Command::Facilities {
            filter,
            lat,
            lng,
            near_home,
            radius,
        } => {
            let center = if near_home {
                Some(ctx.config.home)
            } else {
                point(lat, lng)?
            };
            let hits: Vec<FacilityHit> = ctx.facilities.query_with_distance(filter, center, radius);
            print_json(&hits)
        }

        Command::Nearest { kind, lat, lng } => {
            let from = point(lat, lng)?.unwrap_or(ctx.config.home);
            print_json(&ctx.facilities.nearest_of(kind.into(), from))
        }

        Command::Flush => print_json(&ctx.coordinator.flush().await?),

        Command::Pending => {
            let entries = ctx
                .coordinator
                .pending()
                .entries()?
                .into_iter()
                .map(|slot| match slot.entry {
                    Ok(write) => serde_json::to_value(write),
                    Err(reason) => Ok(serde_json::json!({
                        "sequence": slot.sequence,
                        "unreadable": reason,
                    })),
                })
                .collect::<Result<Vec<_>, _>>()?;
            print_json(&entries)
        }
    }
}
