use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use serde_json::Value;

// `#[zbus::proxy]` generates both `GateProxy` (async) and `GateProxyBlocking`.
#[zbus::proxy(
    interface = "org.facegate.Gate1",
    default_service = "org.facegate.Gate1",
    default_path = "/org/facegate/Gate1"
)]
trait Gate {
    async fn enroll(&self, name: &str, contact: &str) -> zbus::Result<String>;
    async fn enroll_images(&self, name: &str, contact: &str, images: Vec<String>) -> zbus::Result<String>;
    async fn enroll_unknown(&self, name: &str, contact: &str) -> zbus::Result<String>;
    async fn train(&self) -> zbus::Result<String>;
    async fn identify(&self, threshold: f64) -> zbus::Result<String>;
    async fn identify_image(&self, image: String, threshold: f64) -> zbus::Result<String>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "facegate", about = "Face enrollment and identification gate")]
struct Cli {
    /// Talk to the daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    /// Print the daemon's raw JSON reply
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a person from the camera, or from image files
    Enroll {
        /// Display name; also the dataset directory name
        #[arg(short, long)]
        name: String,
        /// Where awards are sent (e.g. an email address)
        #[arg(short, long)]
        contact: Option<String>,
        /// Face images to enroll instead of using the camera
        #[arg(short, long = "image")]
        images: Vec<PathBuf>,
    },
    /// Enroll someone the last identification reported as Unknown
    EnrollUnknown {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        contact: Option<String>,
    },
    /// Retrain the model from all enrolled samples
    Train,
    /// Identify whoever is in front of the camera, or in an image
    Identify {
        /// Image file to identify instead of using the camera
        #[arg(short, long)]
        image: Option<PathBuf>,
        /// Maximum distance for a match (default: daemon setting)
        #[arg(short, long)]
        threshold: Option<f64>,
    },
    /// List enrolled identities
    List,
    /// Show daemon status
    Status,
    /// List local V4L2 capture devices (does not need the daemon)
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Commands::Devices = cli.command {
        print_devices();
        return Ok(());
    }

    let conn = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("failed to connect to D-Bus")?;
    let proxy = GateProxy::new(&conn)
        .await
        .context("failed to reach facegated")?;

    let reply = match cli.command {
        Commands::Enroll {
            name,
            contact,
            images,
        } => {
            let contact = contact.unwrap_or_default();
            if images.is_empty() {
                println!("Look at the camera...");
                proxy.enroll(&name, &contact).await?
            } else {
                let encoded = images
                    .iter()
                    .map(|p| encode_image(p))
                    .collect::<Result<Vec<_>>>()?;
                proxy.enroll_images(&name, &contact, encoded).await?
            }
        }
        Commands::EnrollUnknown { name, contact } => {
            println!("Look at the camera...");
            proxy
                .enroll_unknown(&name, &contact.unwrap_or_default())
                .await?
        }
        Commands::Train => proxy.train().await?,
        Commands::Identify { image, threshold } => {
            let threshold = threshold.unwrap_or(0.0);
            match image {
                Some(path) => proxy.identify_image(encode_image(&path)?, threshold).await?,
                None => {
                    println!("Look at the camera...");
                    proxy.identify(threshold).await?
                }
            }
        }
        Commands::List => proxy.list_identities().await?,
        Commands::Status => proxy.status().await?,
        Commands::Devices => return Ok(()),
    };

    let value: Value = serde_json::from_str(&reply).context("daemon sent invalid JSON")?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{}", describe(&value));
    }
    Ok(())
}

/// Re-encode an image file as base64 PNG for upload.
fn encode_image(path: &Path) -> Result<String> {
    let img = image::open(path).with_context(|| format!("cannot read image {}", path.display()))?;
    let mut png = Cursor::new(Vec::new());
    img.write_to(&mut png, image::ImageFormat::Png)
        .with_context(|| format!("cannot encode {}", path.display()))?;
    Ok(STANDARD.encode(png.into_inner()))
}

fn print_devices() {
    let devices = facegate_hw::Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return;
    }
    for dev in devices {
        println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
    }
}

/// Human-readable summary of a daemon reply.
fn describe(value: &Value) -> String {
    if let Some(outcome) = value.get("outcome").and_then(Value::as_str) {
        return describe_enrollment(outcome, value);
    }
    if let Some(primary) = value.get("primary") {
        return describe_identification(primary, value);
    }
    if let (Some(people), Some(images)) = (value.get("people"), value.get("images")) {
        return format!("Model trained: {people} people, {images} images");
    }
    if let Some(list) = value.as_array() {
        if list.is_empty() {
            return "No identities enrolled".to_string();
        }
        return list
            .iter()
            .map(|entry| {
                let name = entry["name"].as_str().unwrap_or("?");
                let samples = entry["samples"].as_u64().unwrap_or(0);
                match entry["contact"].as_str() {
                    Some(contact) => format!("{name}  {samples} samples  <{contact}>"),
                    None => format!("{name}  {samples} samples"),
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
    }
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn describe_enrollment(outcome: &str, value: &Value) -> String {
    let name = value["name"].as_str().unwrap_or("?");
    match outcome {
        "new_enrollment" => format!(
            "Registered {name} with {} images and trained the model",
            value["samples"]
        ),
        "append_enrollment" => format!(
            "Added {} more images for {name} and retrained",
            value["samples"]
        ),
        "already_registered" => format!("You are already registered as {name}"),
        "rejected_duplicate" => format!(
            "This face already exists as '{}'. Use that name.",
            value["existing"].as_str().unwrap_or("?")
        ),
        "no_face_captured" => format!("No face captured for {name}; nothing was saved"),
        other => format!("Enrollment finished: {other}"),
    }
}

fn describe_identification(primary: &Value, value: &Value) -> String {
    let confidence = primary["confidence"]
        .as_f64()
        .map(|c| format!("{c:.2}"))
        .unwrap_or_else(|| "-".to_string());
    match primary["name"].as_str() {
        Some(name) if primary["matched"].as_bool() == Some(true) => {
            let mut line = format!("AWARD GRANTED: {name} (distance {confidence})");
            if let Some(contact) = value["contact"].as_str() {
                line.push_str(&format!(", award sent to {contact}"));
            }
            line
        }
        _ => format!(
            "AWARD DENIED: Unknown (distance {confidence}). Run `facegate enroll-unknown --name <name>` to register."
        ),
    }
}
