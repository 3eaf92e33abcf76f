use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

// `#[zbus::proxy]` generates `DoormanProxy` (async) and `DoormanProxyBlocking`.
#[zbus::proxy(
    interface = "org.freedesktop.Doorman1",
    default_service = "org.freedesktop.Doorman1",
    default_path = "/org/freedesktop/Doorman1"
)]
trait Doorman {
    async fn resume(&self) -> zbus::Result<bool>;
    async fn enroll(&self, name: &str, image_path: &str) -> zbus::Result<String>;
    async fn count_by_name(&self, name: &str) -> zbus::Result<u32>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn clear_gallery(&self) -> zbus::Result<bool>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "doorman", about = "Doorman face recognition CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll one or more face images under a name
    Enroll {
        /// Name of the person in the images
        #[arg(short, long)]
        name: String,
        /// Image files, each containing the person's face
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// List enrolled names
    List,
    /// Count stored embeddings for a name
    Count {
        name: String,
    },
    /// Show daemon status
    Status,
    /// Resume recognition after a decision
    Resume,
    /// Remove every enrolled identity
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let conn = zbus::Connection::session()
        .await
        .context("connecting to the session bus")?;
    let proxy = DoormanProxy::new(&conn)
        .await
        .context("doormand is not reachable on the session bus")?;

    match cli.command {
        Commands::Enroll { name, images } => {
            let name = name.trim().to_string();
            if name.is_empty() {
                anyhow::bail!("name must not be empty");
            }

            let mut enrolled = 0;
            for (i, image) in images.iter().enumerate() {
                let path = std::fs::canonicalize(image)
                    .with_context(|| format!("reading {}", image.display()))?;
                match proxy.enroll(&name, &path.to_string_lossy()).await {
                    Ok(id) => {
                        enrolled += 1;
                        println!("captured frame {} for {name} ({id})", i + 1);
                    }
                    Err(err) => {
                        tracing::debug!(image = %path.display(), error = %err, "enroll call failed");
                        eprintln!("skipped {}: {err}", image.display());
                    }
                }
            }

            let total = proxy.count_by_name(&name).await?;
            println!("enrolled {enrolled}/{} images; {name} now has {total} embeddings", images.len());
            if enrolled == 0 {
                anyhow::bail!("no faces enrolled");
            }
        }
        Commands::List => {
            let raw = proxy.list_identities().await?;
            let entries: Vec<serde_json::Value> = serde_json::from_str(&raw)?;
            if entries.is_empty() {
                println!("No identities enrolled");
            }
            for entry in entries {
                println!(
                    "{}\t{}",
                    entry["name"].as_str().unwrap_or_default(),
                    entry["count"].as_u64().unwrap_or_default()
                );
            }
        }
        Commands::Count { name } => {
            println!("{}", proxy.count_by_name(name.trim()).await?);
        }
        Commands::Status => {
            let raw = proxy.status().await?;
            let status: serde_json::Value = serde_json::from_str(&raw)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Resume => {
            if proxy.resume().await? {
                println!("resumed");
            } else {
                println!("recognition was not paused");
            }
        }
        Commands::Clear => {
            proxy.clear_gallery().await?;
            println!("gallery cleared");
        }
    }

    Ok(())
}
