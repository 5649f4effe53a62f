use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use presence_core::types::{CameraRole, Descriptor, Identity, Sighting};
use presence_store::Db;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "presence", about = "Presence tracker CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// List people currently inside a zone
    Active {
        /// Zone ID
        zone: i64,
    },
    /// Show recent completed visits for a zone
    Recent {
        /// Zone ID
        zone: i64,
        /// Maximum number of visits to show
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
    /// Inject a pre-matched sighting (testing / replays)
    Report {
        /// Zone ID
        #[arg(long)]
        zone: i64,
        /// Camera role: entry or exit
        #[arg(long)]
        role: String,
        /// Person type: student or teacher
        #[arg(long)]
        person_type: String,
        /// Person ID
        #[arg(long)]
        person_id: i64,
        /// Match confidence
        #[arg(long, default_value_t = 1.0)]
        confidence: f32,
    },
    /// Enroll a person's face descriptors into the directory
    Enroll {
        /// Person type: student or teacher
        #[arg(long)]
        person_type: String,
        /// Person ID
        #[arg(long)]
        person_id: i64,
        /// Display name
        #[arg(long)]
        name: String,
        /// JSON file holding an array of descriptor vectors
        #[arg(long)]
        descriptors: PathBuf,
        /// Database path (defaults to the daemon's)
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Register a zone in the directory
    AddZone {
        /// Zone ID
        #[arg(long)]
        zone: i64,
        /// Zone name
        #[arg(long)]
        name: String,
        /// Database path (defaults to the daemon's)
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

// Async proxy for org.presence.Tracker1, generated by zbus.
#[zbus::proxy(
    interface = "org.presence.Tracker1",
    default_service = "org.presence.Tracker1",
    default_path = "/org/presence/Tracker1"
)]
trait Tracker {
    async fn status(&self) -> zbus::Result<String>;
    async fn list_active(&self, zone_id: i64) -> zbus::Result<String>;
    async fn recent_visits(&self, zone_id: i64, limit: u32) -> zbus::Result<String>;
    async fn report_sighting(&self, sighting_json: &str) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status => {
            let proxy = proxy().await?;
            print_json(&proxy.status().await?)?;
        }
        Commands::Active { zone } => {
            let proxy = proxy().await?;
            print_json(&proxy.list_active(zone).await?)?;
        }
        Commands::Recent { zone, limit } => {
            let proxy = proxy().await?;
            print_json(&proxy.recent_visits(zone, limit).await?)?;
        }
        Commands::Report {
            zone,
            role,
            person_type,
            person_id,
            confidence,
        } => {
            let sighting = Sighting {
                identity: Some(parse_identity(&person_type, person_id)?),
                zone_id: zone,
                role: parse_role(&role)?,
                observed_at: Utc::now(),
                confidence,
                descriptor: None,
                image_ref: None,
            };
            let proxy = proxy().await?;
            let result = proxy
                .report_sighting(&serde_json::to_string(&sighting)?)
                .await?;
            print_json(&result)?;
        }
        Commands::Enroll {
            person_type,
            person_id,
            name,
            descriptors,
            db,
        } => {
            let identity = parse_identity(&person_type, person_id)?;
            let raw = std::fs::read_to_string(&descriptors)
                .with_context(|| format!("reading {}", descriptors.display()))?;
            let vectors: Vec<Vec<f32>> =
                serde_json::from_str(&raw).context("descriptors file must be a JSON array of float arrays")?;
            if vectors.is_empty() {
                bail!("descriptors file is empty");
            }

            let db = Db::open(db.unwrap_or_else(default_db_path))?;
            match &identity {
                Identity::Student(id) => db.add_student(*id, &name)?,
                Identity::Teacher(id) => db.add_teacher(*id, &name)?,
            }
            let count = vectors.len();
            for values in vectors {
                db.enroll_descriptor(&identity, &Descriptor::new(values))?;
            }
            println!("enrolled {count} descriptor(s) for {identity} ({name})");
        }
        Commands::AddZone { zone, name, db } => {
            let db = Db::open(db.unwrap_or_else(default_db_path))?;
            db.add_zone(zone, &name)?;
            println!("zone {zone} registered as {name:?}");
        }
    }

    Ok(())
}

async fn proxy() -> Result<TrackerProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("connecting to session bus (is presenced running?)")?;
    Ok(TrackerProxy::new(&conn).await?)
}

fn parse_role(role: &str) -> Result<CameraRole> {
    match role {
        "entry" => Ok(CameraRole::Entry),
        "exit" => Ok(CameraRole::Exit),
        other => bail!("role must be 'entry' or 'exit', got {other:?}"),
    }
}

fn parse_identity(person_type: &str, person_id: i64) -> Result<Identity> {
    match person_type {
        "student" => Ok(Identity::Student(person_id)),
        "teacher" => Ok(Identity::Teacher(person_id)),
        other => bail!("person type must be 'student' or 'teacher', got {other:?}"),
    }
}

/// Same default the daemon uses: $XDG_DATA_HOME/presenced/presence.db.
fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("PRESENCED_DB_PATH") {
        return PathBuf::from(path);
    }
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("presenced")
        .join("presence.db")
}

/// Re-indent a JSON payload for terminal output; print as-is if it is not
/// valid JSON.
fn print_json(payload: &str) -> Result<()> {
    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{payload}"),
    }
    Ok(())
}
