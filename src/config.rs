use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "scolarited")]
#[command(about = "School back office: classes, enrollments, subjects and assignments")]
#[command(version)]
pub struct Args {
    /// SQLite database file
    #[arg(
        long,
        global = true,
        env = "SCOLARITE_DATABASE",
        default_value = "scolarite.sqlite3"
    )]
    pub database: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the web back office (default)
    Serve(ServeArgs),
    /// Apply pending schema migrations
    Migrate {
        /// Snapshot the database into this directory before migrating
        #[arg(long)]
        backup_dir: Option<PathBuf>,
    },
    /// Report enrollment counter and capacity inconsistencies
    Check,
    /// Re-aggregate cached class counters
    Recount,
    /// Create a back-office account
    CreateUser(CreateUserArgs),
    /// Write a zip backup of the database
    Backup {
        #[arg(long)]
        out: PathBuf,
    },
    /// Restore the database from a zip backup or a bare SQLite file
    Restore {
        #[arg(long)]
        from: PathBuf,
    },
}

#[derive(Debug, Clone, clap::Args)]
pub struct ServeArgs {
    /// Address to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Secret for URL ids. Random per process when unset, which invalidates links on restart.
    #[arg(long, env = "SCOLARITE_ID_SECRET", hide_env_values = true)]
    pub id_secret: Option<String>,

    /// Idle session timeout in minutes
    #[arg(long, default_value_t = 120)]
    pub session_timeout: u64,

    /// Mark the session cookie `Secure`; enable when served over HTTPS
    #[arg(long, env = "SCOLARITE_SECURE_COOKIES")]
    pub secure_cookies: bool,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            id_secret: None,
            session_timeout: 120,
            secure_cookies: false,
        }
    }
}

#[derive(Debug, Clone, clap::Args)]
pub struct CreateUserArgs {
    #[arg(long)]
    pub email: String,

    #[arg(long)]
    pub name: String,

    /// admin, direction, secretariat or enseignant
    #[arg(long, default_value = "admin")]
    pub role: String,

    /// Attach the account to an existing school
    #[arg(long)]
    pub school_id: Option<i64>,

    #[arg(long, env = "SCOLARITE_PASSWORD", hide_env_values = true)]
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: PathBuf,
    pub host: String,
    pub port: u16,
    pub id_secret: String,
    /// True when `id_secret` was generated for this process only.
    pub ephemeral_id_secret: bool,
    pub session_timeout: Duration,
    pub secure_cookies: bool,
}

impl AppConfig {
    pub fn new(database: &Path, serve: &ServeArgs) -> Self {
        let (id_secret, ephemeral_id_secret) = match serve.id_secret.as_deref() {
            Some(s) if !s.trim().is_empty() => (s.to_string(), false),
            _ => (uuid::Uuid::new_v4().to_string(), true),
        };
        Self {
            database: database.to_path_buf(),
            host: serve.host.clone(),
            port: serve.port,
            id_secret,
            ephemeral_id_secret,
            session_timeout: Duration::from_secs(serve.session_timeout.max(1) * 60),
            secure_cookies: serve.secure_cookies,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl From<&Args> for AppConfig {
    fn from(args: &Args) -> Self {
        match &args.command {
            Some(Command::Serve(serve)) => AppConfig::new(&args.database, serve),
            _ => AppConfig::new(&args.database, &ServeArgs::default()),
        }
    }
}
