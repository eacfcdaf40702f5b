//! ALFA File Vault - CLI
//!
//! Command-line interface for vault operations.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use tokio::io::{AsyncBufReadExt, BufReader};

use alfa_file_vault::lock::AUTO_LOCK_CHOICES;
use alfa_file_vault::{
    migrate_legacy_files, spawn_lock_watchdog, ActionOutcome, FileVault, Registration,
    SessionContext, UploadRequest, VaultConfig, VaultError,
};

#[derive(Parser)]
#[command(name = "alfa-files")]
#[command(author = "Karen Tonoyan")]
#[command(version = alfa_file_vault::VERSION)]
#[command(about = "ALFA File Vault - Encrypted personal file vault")]
struct Cli {
    /// Vault data directory
    #[arg(short, long, default_value = "./alfa_vault")]
    vault: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Credentials {
    /// Account email
    #[arg(short, long)]
    email: String,

    /// PIN code
    #[arg(short, long)]
    pin: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account and its encryption key
    Register {
        #[command(flatten)]
        creds: Credentials,

        /// Repeat the PIN
        #[arg(long)]
        confirm_pin: String,
    },

    /// Encrypt and upload a file
    Upload {
        /// File to upload
        path: PathBuf,

        #[command(flatten)]
        creds: Credentials,
    },

    /// List files (newest first)
    List {
        #[command(flatten)]
        creds: Credentials,
    },

    /// Decrypt a file
    View {
        /// File ID
        id: String,

        /// Write decrypted bytes here instead of printing a preview
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        creds: Credentials,
    },

    /// Delete a file
    Delete {
        /// File ID
        id: String,

        #[command(flatten)]
        creds: Credentials,
    },

    /// Show encryption key metadata
    KeyStatus {
        #[command(flatten)]
        creds: Credentials,
    },

    /// Replace the encryption key (existing files become unreadable)
    RegenerateKey {
        #[command(flatten)]
        creds: Credentials,

        /// Confirm the destructive action
        #[arg(long)]
        yes: bool,
    },

    /// Delete the encryption key (all files become unreadable)
    DestroyKey {
        #[command(flatten)]
        creds: Credentials,

        /// Confirm the destructive action
        #[arg(long)]
        yes: bool,
    },

    /// Set the auto-lock timeout in minutes (0 = never)
    AutoLock {
        /// One of 0, 1, 2, 5, 10 (or any value up to a day)
        minutes: u32,

        #[command(flatten)]
        creds: Credentials,
    },

    /// Interactive session with auto-lock (list, view, delete, lock, unlock)
    Shell {
        #[command(flatten)]
        creds: Credentials,
    },

    /// Re-encrypt files stored by the legacy app
    Migrate {
        #[command(flatten)]
        creds: Credentials,
    },

    /// Demo mode (register, upload, lock, unlock, view)
    Demo,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        if let Some(vault_err) = e.downcast_ref::<VaultError>() {
            eprintln!("{}", vault_err.user_message());
        }
        std::process::exit(1);
    }
}

fn open_vault(dir: &Path) -> Result<FileVault> {
    let config_path = dir.join("config.json");
    let mut config = VaultConfig::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    config.data_dir = dir.to_path_buf();

    FileVault::open_local(config).with_context(|| format!("opening vault at {}", dir.display()))
}

async fn sign_in(vault: &FileVault, creds: &Credentials) -> Result<Arc<SessionContext>> {
    Ok(vault.sign_in(&creds.email, &creds.pin).await?)
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Register { creds, confirm_pin } => {
            println!("🔐 Creating account {}...", creds.email);
            let vault = open_vault(&cli.vault)?;
            let session = vault
                .register(&Registration::new(&creds.email, &creds.pin, &confirm_pin))
                .await?;

            let info = vault.key_status(&session).await?;
            println!("✅ Account created: {}", session.user_id());
            if let Some(info) = info {
                println!("🔑 Encryption key: {} ({})", info.fingerprint, info.algorithm);
            }
        }

        Commands::Upload { path, creds } => {
            println!("📥 Uploading: {}", path.display());
            let vault = open_vault(&cli.vault)?;
            let session = sign_in(&vault, &creds).await?;

            let content = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unknown");

            vault.request_upload(&session, UploadRequest::new(file_name, content))?;
            match vault.submit_pin(&session, &creds.pin).await? {
                ActionOutcome::Uploaded(record) => {
                    println!("✅ Uploaded with ID: {}", record.id);
                }
                _ => bail!("unexpected action result"),
            }
        }

        Commands::List { creds } => {
            let vault = open_vault(&cli.vault)?;
            let session = sign_in(&vault, &creds).await?;
            let files = vault.list_files(&session).await?;

            if files.is_empty() {
                println!("📭 No files in vault");
            } else {
                println!("📁 Files in vault ({}):", files.len());
                println!("{:-<72}", "");
                for f in files {
                    let lock = if f.is_encrypted { "🔒" } else { "⚠️" };
                    println!(
                        "{} {} - {} ({} bytes, {}, {})",
                        lock,
                        f.id,
                        f.file_name,
                        f.size,
                        f.mime_type,
                        f.created_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }

        Commands::View { id, output, creds } => {
            let vault = open_vault(&cli.vault)?;
            let session = sign_in(&vault, &creds).await?;
            let record = vault.find_file(&session, &id).await?;

            vault.request_view(&session, &record).await?;
            let file = match vault.submit_pin(&session, &creds.pin).await? {
                ActionOutcome::Viewed(file) => file,
                _ => bail!("unexpected action result"),
            };

            match output {
                Some(out) => {
                    std::fs::write(&out, file.bytes())?;
                    println!("✅ Decrypted to: {}", out.display());
                }
                None => match file.preview(2000) {
                    Some(text) => println!("{}", text),
                    None => println!(
                        "📄 {} ({}, {} bytes) - use --output to save",
                        file.record.file_name, file.record.mime_type, file.record.size
                    ),
                },
            }
        }

        Commands::Delete { id, creds } => {
            println!("🗑️ Deleting file: {}", id);
            let vault = open_vault(&cli.vault)?;
            let session = sign_in(&vault, &creds).await?;
            let record = vault.find_file(&session, &id).await?;

            vault.request_delete(&session, &record).await?;
            vault.submit_pin(&session, &creds.pin).await?;
            println!("✅ File deleted!");
        }

        Commands::KeyStatus { creds } => {
            let vault = open_vault(&cli.vault)?;
            let session = sign_in(&vault, &creds).await?;

            match vault.key_status(&session).await? {
                Some(info) => {
                    println!("🔑 Encryption Key");
                    println!("{:-<40}", "");
                    println!("Alias:        {}", info.alias);
                    println!("Algorithm:    {}", info.algorithm);
                    println!("Fingerprint:  {}", info.fingerprint);
                    println!("Created:      {}", info.created_at.to_rfc3339());
                    println!("File cipher:  {}", vault.config().algorithm.name());
                }
                None => println!("⚠️ No encryption key on this device"),
            }
        }

        Commands::RegenerateKey { creds, yes } => {
            let vault = open_vault(&cli.vault)?;
            let session = sign_in(&vault, &creds).await?;

            if !yes {
                println!("⚠️ Existing files will become permanently unreadable.");
                println!("   Re-run with --yes to continue.");
                return Ok(());
            }

            let info = vault.regenerate_key(&session, &creds.pin, yes).await?;
            println!("✅ New encryption key: {}", info.fingerprint);
        }

        Commands::DestroyKey { creds, yes } => {
            let vault = open_vault(&cli.vault)?;
            let session = sign_in(&vault, &creds).await?;

            if !yes {
                println!("⚠️ Every file in the vault will become permanently unreadable.");
                println!("   Re-run with --yes to continue.");
                return Ok(());
            }

            if vault.destroy_key(&session, &creds.pin, yes).await? {
                println!("🗑️ Encryption key destroyed");
            } else {
                println!("⚠️ No encryption key on this device");
            }
        }

        Commands::AutoLock { minutes, creds } => {
            let vault = open_vault(&cli.vault)?;
            let session = sign_in(&vault, &creds).await?;
            vault.set_auto_lock(&session, minutes)?;

            let mut config = vault.config().clone();
            config.timeout_minutes = minutes;
            config.save(&vault.data_dir().join("config.json"))?;

            match minutes {
                0 => println!("✅ Auto-lock disabled"),
                m => println!("✅ Auto-lock after {} minute(s) of inactivity", m),
            }
            if !AUTO_LOCK_CHOICES.contains(&minutes) {
                println!("   (usual choices: {:?})", AUTO_LOCK_CHOICES);
            }
        }

        Commands::Shell { creds } => {
            let vault = open_vault(&cli.vault)?;
            let session = sign_in(&vault, &creds).await?;
            run_shell(&vault, session).await?;
        }

        Commands::Migrate { creds } => {
            println!("🔄 Migrating legacy files...");
            let vault = open_vault(&cli.vault)?;
            let session = sign_in(&vault, &creds).await?;

            let report = migrate_legacy_files(&vault, &session).await?;
            println!("✅ Migration finished");
            println!("   Scanned:           {}", report.scanned);
            println!("   Already encrypted: {}", report.already_encrypted);
            println!("   Re-encrypted:      {}", report.migrated);
            for (id, err) in &report.failures {
                println!("   ⚠️ {}: {}", id, err);
            }
        }

        Commands::Demo => run_demo().await?,
    }

    Ok(())
}

const SHELL_HELP: &str = "commands: list | view <id> <pin> | delete <id> <pin> | lock | unlock <pin> | auto-lock <minutes> | status | quit";

async fn run_shell(vault: &FileVault, session: Arc<SessionContext>) -> Result<()> {
    let watchdog = spawn_lock_watchdog(
        session.clone(),
        Duration::from_secs(vault.config().watchdog_interval_secs),
    );
    println!("🔓 Signed in. {}", SHELL_HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let words: Vec<&str> = line.split_whitespace().collect();
        let result = match words.as_slice() {
            [] => Ok(()),
            ["quit"] | ["exit"] => break,
            ["help"] => {
                println!("{}", SHELL_HELP);
                Ok(())
            }
            ["status"] => {
                let state = session.lock().snapshot();
                println!(
                    "{:?}, auto-lock {} min, last activity {}",
                    state.phase,
                    state.timeout_minutes,
                    state.last_activity_at.format("%H:%M:%S")
                );
                Ok(())
            }
            ["list"] => vault.list_files(&session).await.map(|files| {
                for f in files {
                    println!("{} - {} ({} bytes)", f.id, f.file_name, f.size);
                }
            }),
            ["view", id, pin] => shell_view(vault, &session, id, pin).await,
            ["delete", id, pin] => shell_delete(vault, &session, id, pin).await,
            ["lock"] => {
                vault.lock(&session);
                println!("🔒 Locked");
                Ok(())
            }
            ["unlock", pin] => vault.unlock(&session, pin).await.map(|_| println!("🔓 Unlocked")),
            ["auto-lock", minutes] => match minutes.parse::<u32>() {
                Ok(m) => vault.set_auto_lock(&session, m),
                Err(_) => Err(VaultError::InvalidInput(format!("not a number: {}", minutes))),
            },
            _ => {
                println!("{}", SHELL_HELP);
                Ok(())
            }
        };

        if let Err(e) = result {
            println!("❌ {}", e.user_message());
        }
    }

    vault.sign_out(&session);
    watchdog.abort();
    println!("👋 Signed out");
    Ok(())
}

async fn shell_view(vault: &FileVault, session: &SessionContext, id: &str, pin: &str) -> Result<(), VaultError> {
    let record = vault.find_file(session, id).await?;
    vault.request_view(session, &record).await?;
    if let ActionOutcome::Viewed(file) = vault.submit_pin(session, pin).await? {
        match file.preview(2000) {
            Some(text) => println!("{}", text),
            None => println!("📄 {} ({}, {} bytes)", file.record.file_name, file.record.mime_type, file.record.size),
        }
    }
    Ok(())
}

async fn shell_delete(vault: &FileVault, session: &SessionContext, id: &str, pin: &str) -> Result<(), VaultError> {
    let record = vault.find_file(session, id).await?;
    vault.request_delete(session, &record).await?;
    vault.submit_pin(session, pin).await?;
    println!("🗑️ Deleted {}", id);
    Ok(())
}

async fn run_demo() -> Result<()> {
    println!("🎮 ALFA File Vault - Demo Mode");
    println!("{:-<40}", "");

    let demo_path = PathBuf::from("./demo_vault");
    if demo_path.exists() {
        std::fs::remove_dir_all(&demo_path)?;
    }

    let email = "demo@alfa.dev";
    let pin = "0123456789";

    let vault = open_vault(&demo_path)?;
    let session = vault.register(&Registration::new(email, pin, pin)).await?;
    let watchdog = spawn_lock_watchdog(
        session.clone(),
        Duration::from_secs(vault.config().watchdog_interval_secs),
    );
    println!("✅ Registered {}", email);

    vault.request_upload(&session, UploadRequest::new("hello.txt", b"0123456789".to_vec()))?;
    let record = match vault.submit_pin(&session, pin).await? {
        ActionOutcome::Uploaded(record) => record,
        _ => bail!("unexpected action result"),
    };
    println!("✅ Uploaded hello.txt as {}", record.id);

    session.lock_now();
    match vault.request_view(&session, &record).await {
        Err(VaultError::VaultLocked) => println!("🔒 Locked: viewing needs the PIN again"),
        other => bail!("expected locked vault, got {:?}", other.map(|_| ())),
    }

    vault.unlock(&session, pin).await?;
    vault.request_view(&session, &record).await?;
    if let ActionOutcome::Viewed(file) = vault.submit_pin(&session, pin).await? {
        println!("🔓 Decrypted: {}", String::from_utf8_lossy(file.bytes()));
    }

    vault.sign_out(&session);
    watchdog.abort();

    println!();
    println!("Try these commands:");
    println!("  alfa-files --vault ./demo_vault list -e {} -p {}", email, pin);
    println!("  alfa-files --vault ./demo_vault view {} -e {} -p {}", record.id, email, pin);
    Ok(())
}
