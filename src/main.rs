use anyhow::Context;
use clap::Parser;
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scolarited::auth::Role;
use scolarited::config::{Command, CreateUserArgs};
use scolarited::records::{diagnostics, users};
use scolarited::{backup, create_router, db, enrollment, session, AppConfig, AppState, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_filter = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("scolarited={},tower_http=info", log_filter).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match &args.command {
        None | Some(Command::Serve(_)) => serve(AppConfig::from(&args)).await,
        Some(Command::Migrate { backup_dir }) => migrate(&args.database, backup_dir.as_deref()),
        Some(Command::Check) => check(&args.database),
        Some(Command::Recount) => recount(&args.database),
        Some(Command::CreateUser(user)) => create_user(&args.database, user),
        Some(Command::Backup { out }) => {
            let summary = backup::export_database_bundle(&args.database, out)?;
            println!(
                "backup written to {} ({}, {} bytes, sha256 {})",
                out.display(),
                summary.bundle_format,
                summary.size_bytes,
                summary.sha256
            );
            Ok(())
        }
        Some(Command::Restore { from }) => {
            let summary = backup::restore_database_bundle(from, &args.database)?;
            // Bring a restored older database up to the current schema.
            let conn = db::open_db(&args.database)?;
            drop(conn);
            println!(
                "database restored from {} ({})",
                from.display(),
                summary.bundle_format_detected
            );
            Ok(())
        }
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let conn = db::open_db(&config.database)?;
    drop(conn);

    if config.ephemeral_id_secret {
        warn!("no id secret configured; links will not survive a restart (set SCOLARITE_ID_SECRET)");
    }

    let listen_addr = config.listen_addr();
    let base_url = config.base_url();
    info!(
        database = %config.database.display(),
        session_timeout_secs = config.session_timeout.as_secs(),
        "starting scolarited"
    );

    let state = AppState::new(config);

    let cleanup_store = state.sessions.clone();
    tokio::spawn(async move {
        session::cleanup_task(cleanup_store, Duration::from_secs(60)).await;
    });

    let app = create_router(state);

    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    info!("listening on {}", base_url);
    info!("health check at {}/health", base_url);

    axum::serve(listener, app).await?;
    Ok(())
}

fn migrate(database: &Path, backup_dir: Option<&Path>) -> anyhow::Result<()> {
    if let Some(dir) = backup_dir {
        match backup::snapshot_to_dir(database, dir)? {
            Some(path) => println!("snapshot written to {}", path.display()),
            None => println!("no existing database; nothing to snapshot"),
        }
    }
    let mut conn = db::connect(database)
        .with_context(|| format!("failed to open {}", database.display()))?;
    let applied = db::migrate(&mut conn)?;
    if applied.is_empty() {
        println!("schema up to date");
    } else {
        for name in applied {
            println!("applied {name}");
        }
    }
    Ok(())
}

fn check(database: &Path) -> anyhow::Result<()> {
    let conn = db::open_db(database)?;
    let mut clean = true;
    for school_id in diagnostics::school_ids(&conn)? {
        let report = diagnostics::build_report(&conn, school_id)?;
        let summary = report.summary();
        println!(
            "school {school_id}: {}",
            serde_json::to_string(&summary).context("failed to serialize summary")?
        );
        for count in report.counts.iter().filter(|c| !c.is_consistent() || c.over_capacity()) {
            println!(
                "  class {} ({}) cached={} actual={} capacity={}",
                count.class_name, count.school_year, count.cached, count.actual, count.capacity
            );
        }
        for row in &report.inactive_students_enrolled {
            println!(
                "  archived student {} still enrolled in {}",
                row.student_name, row.class_name
            );
        }
        for a in &report.inactive_teachers_assigned {
            println!(
                "  inactive teacher {} assigned to {} in {}",
                a.teacher_name.as_deref().unwrap_or("?"),
                a.subject_name,
                a.class_name
            );
        }
        clean &= report.is_clean();
    }
    if !clean {
        std::process::exit(1);
    }
    println!("ok");
    Ok(())
}

fn recount(database: &Path) -> anyhow::Result<()> {
    let conn = db::open_db(database)?;
    let fixed = enrollment::recount(&conn, None)?;
    println!("{fixed} class counter(s) corrected");
    Ok(())
}

fn create_user(database: &Path, user: &CreateUserArgs) -> anyhow::Result<()> {
    let role = Role::parse(&user.role).ok_or_else(|| {
        anyhow::anyhow!(
            "unknown role {:?} (expected admin, direction, secretariat or enseignant)",
            user.role
        )
    })?;
    let conn = db::open_db(database)?;
    let id = users::create_user(
        &conn,
        &users::NewUser {
            email: &user.email,
            name: &user.name,
            role,
            school_id: user.school_id,
            password: &user.password,
        },
    )?;
    info!(user_id = id, role = role.as_str(), "user created");
    println!("user {id} created");
    Ok(())
}
