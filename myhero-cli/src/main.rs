//! Host tool for the MyHero engine
//!
//! Every command opens a loopback session against the configured storage
//! root, authenticates, runs one operation through the dispatcher and
//! disconnects, exactly the way a phone would over the air.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};
use log::*;
use myhero_ble::{
    AuthStore, Config, Endpoint, FileKeyStore, Loopback, RecordingHooks, myhero_home,
};
use myhero_proto::{AUTH_KEY_SIZE, AUTH_STATUS_AUTHENTICATED, FileKind};
use rand::RngCore;

#[derive(Parser)]
#[command(name = "myhero")]
#[command(about = "Talk to a MyHero storage root the way the companion app does")]
struct Cli {
    /// Home directory holding config.json and the key file (default: $MYHERO_HOME or ~/.myhero)
    #[arg(long, global = true)]
    home: Option<PathBuf>,
    /// Override the storage root from config.json
    #[arg(long, global = true)]
    storage: Option<PathBuf>,
    /// Shared key as 64 hex characters
    #[arg(short, long, global = true)]
    key: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bind a key, or prove the bound one
    Pair {
        /// Generate a random key and print it; wins over --key
        #[arg(long)]
        generate: bool,
    },
    /// Erase the bound key so the next key write binds a new one
    Unpair,
    /// List files and directories
    List,
    /// Send a local file to the device
    Upload {
        local: PathBuf,
        /// Name on the device (default: the local file name)
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Fetch a file from the device
    Download {
        name: String,
        /// Where to write it (default: the device file name in the current directory)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Delete a file on the device
    Delete { name: String },
    /// Show pairing state, battery and storage
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let home = match cli.home {
        Some(home) => {
            std::fs::create_dir_all(&home)
                .with_context(|| format!("cannot create {}", home.display()))?;
            home
        }
        None => myhero_home()?,
    };
    let mut config = Config::load(&home)?;
    if let Some(storage) = cli.storage {
        config.storage_root = storage;
    }
    debug!("Using home {} and storage {}", home.display(), config.storage_root.display());

    let key = match (&cli.command, cli.key.as_deref()) {
        (Commands::Pair { generate: true }, _) => {
            let mut key = [0u8; AUTH_KEY_SIZE];
            rand::thread_rng().fill_bytes(&mut key);
            println!("Generated key: {}", HEXLOWER.encode(&key));
            Some(key)
        }
        (_, Some(hex)) => Some(parse_key(hex)?),
        (_, None) => None,
    };

    let auth = AuthStore::load(FileKeyStore::new(&config.key_file))?;
    let mut peer = Loopback::start(&config, auth, RecordingHooks::new())?;
    peer.connect(1)?;

    if let Some(key) = &key {
        if !peer.authenticate(key).await? {
            bail!("key rejected: the device is paired with a different key");
        }
    }

    let outcome = run(&mut peer, &config, cli.command, key.is_some()).await;
    peer.disconnect()?;
    outcome
}

async fn run(
    peer: &mut Loopback<FileKeyStore>,
    config: &Config,
    command: Commands,
    has_key: bool,
) -> anyhow::Result<()> {
    match command {
        Commands::Pair { .. } => {
            if !has_key {
                bail!("pair needs --key or --generate");
            }
            let fingerprint = peer
                .dispatcher()
                .lock()
                .map_err(|_| anyhow::anyhow!("dispatcher lock poisoned"))?
                .auth()
                .fingerprint();
            println!("Paired, key fingerprint {}", fingerprint.unwrap_or_default());
        }
        Commands::Unpair => {
            peer.unpair().await.context("unpair failed")?;
            println!("Key erased, device is back in first-pairing mode");
        }
        Commands::List => {
            let entries = peer.list().await?;
            for entry in &entries {
                match entry.kind {
                    FileKind::Directory => println!("{:>10}  {}/", "-", entry.name),
                    FileKind::File => println!("{:>10}  {}", entry.size, entry.name),
                }
            }
            println!("{} entries", entries.len());
        }
        Commands::Upload { local, name } => {
            let name = match name {
                Some(name) => name,
                None => file_name(&local)?,
            };
            let data = std::fs::read(&local)
                .with_context(|| format!("cannot read {}", local.display()))?;
            if data.is_empty() {
                bail!("{} is empty; the device refuses zero-length uploads", local.display());
            }
            let chunk_size = peer
                .dispatcher()
                .lock()
                .map_err(|_| anyhow::anyhow!("dispatcher lock poisoned"))?
                .engine()
                .chunk_size();
            peer.upload(&name, &data, chunk_size).await?;
            println!("Uploaded {} bytes to {}", data.len(), name);
        }
        Commands::Download { name, out } => {
            let out = match out {
                Some(out) => out,
                None => PathBuf::from(file_name(Path::new(&name))?),
            };
            let data = peer.download(&name).await?;
            std::fs::write(&out, &data).with_context(|| format!("cannot write {}", out.display()))?;
            println!("Downloaded {} bytes to {}", data.len(), out.display());
        }
        Commands::Delete { name } => {
            peer.delete(&name)?;
            println!("Deleted {}", name);
        }
        Commands::Status => {
            let name = peer.read(Endpoint::DeviceName)?;
            let auth = peer.read(Endpoint::AuthStatus)?;
            let battery = peer.read(Endpoint::BatteryLevel)?;
            let fingerprint = peer
                .dispatcher()
                .lock()
                .map_err(|_| anyhow::anyhow!("dispatcher lock poisoned"))?
                .auth()
                .fingerprint();

            println!("Device:   {}", String::from_utf8_lossy(&name));
            println!("Storage:  {}", config.storage_root.display());
            match fingerprint {
                Some(fp) => println!("Key:      bound ({})", fp),
                None => println!("Key:      none, next key write pairs"),
            }
            let unlocked = auth.first() == Some(&AUTH_STATUS_AUTHENTICATED);
            println!("Session:  {}", if unlocked { "authenticated" } else { "locked" });
            println!("Battery:  {}%", battery.first().copied().unwrap_or(0));
            if unlocked {
                let entries = peer.list().await?;
                let files = entries.iter().filter(|e| e.kind == FileKind::File).count();
                println!("Files:    {}", files);
            }
        }
    }
    Ok(())
}

fn parse_key(hex: &str) -> anyhow::Result<[u8; AUTH_KEY_SIZE]> {
    let bytes = HEXLOWER_PERMISSIVE
        .decode(hex.trim().as_bytes())
        .context("key must be hex")?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow::anyhow!("key must be {} bytes, got {}", AUTH_KEY_SIZE, b.len()))
}

fn file_name(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .with_context(|| format!("{} has no usable file name", path.display()))
}
