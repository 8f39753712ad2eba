use anyhow::{anyhow, Context};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/scolarite.sqlite3";
pub const BUNDLE_FORMAT_V1: &str = "scolarite-db-v1";
const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub sha256: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
}

fn sha256_file(path: &Path) -> anyhow::Result<String> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open {}", path.to_string_lossy()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buf).context("failed to read file for digest")?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

/// Consistent copy of a live database, taken with `VACUUM INTO`.
fn snapshot(db_path: &Path, to: &Path) -> anyhow::Result<()> {
    if to.exists() {
        std::fs::remove_file(to)
            .with_context(|| format!("failed to remove stale snapshot {}", to.to_string_lossy()))?;
    }
    let conn = crate::db::connect(db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    conn.execute("VACUUM INTO ?1", [to.to_string_lossy().as_ref()])
        .context("failed to snapshot database")?;
    Ok(())
}

/// Writes a zip with `manifest.json` and the database snapshot.
pub fn export_database_bundle(db_path: &Path, out_path: &Path) -> anyhow::Result<ExportSummary> {
    if !db_path.is_file() {
        return Err(anyhow!(
            "database not found: {}",
            db_path.to_string_lossy()
        ));
    }

    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let snapshot_path = sibling(out_path, ".snapshot");
    snapshot(db_path, &snapshot_path)?;
    let result = write_bundle(&snapshot_path, out_path);
    let _ = std::fs::remove_file(&snapshot_path);
    result
}

fn write_bundle(snapshot_path: &Path, out_path: &Path) -> anyhow::Result<ExportSummary> {
    let digest = sha256_file(snapshot_path)?;
    let size_bytes = std::fs::metadata(snapshot_path)
        .context("failed to stat database snapshot")?
        .len();

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": chrono::Utc::now().to_rfc3339(),
        "sha256": digest,
        "sizeBytes": size_bytes,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    let mut db_file = File::open(snapshot_path).context("failed to open database snapshot")?;
    std::io::copy(&mut db_file, &mut zip).context("failed to write database entry")?;

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        sha256: digest,
        size_bytes,
    })
}

/// Replaces the database at `db_path` with the one in `in_path`.
///
/// Accepts a bundle written by [`export_database_bundle`] or a bare SQLite
/// file. The new database is written next to the target and renamed over it
/// only once it has been fully extracted and verified.
pub fn restore_database_bundle(in_path: &Path, db_path: &Path) -> anyhow::Result<ImportSummary> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let tmp_dst = sibling(db_path, ".restoring");
    if tmp_dst.exists() {
        let _ = std::fs::remove_file(&tmp_dst);
    }

    let detected = match file_kind(in_path)? {
        FileKind::Zip => {
            extract_bundle(in_path, &tmp_dst)?;
            BUNDLE_FORMAT_V1.to_string()
        }
        FileKind::Sqlite => {
            std::fs::copy(in_path, &tmp_dst).with_context(|| {
                format!(
                    "failed to copy sqlite backup from {} to {}",
                    in_path.to_string_lossy(),
                    tmp_dst.to_string_lossy()
                )
            })?;
            "sqlite3".to_string()
        }
        FileKind::Other => {
            return Err(anyhow!(
                "{} is neither a backup bundle nor a SQLite database",
                in_path.to_string_lossy()
            ))
        }
    };

    if db_path.exists() {
        std::fs::remove_file(db_path).with_context(|| {
            format!(
                "failed to remove existing database {}",
                db_path.to_string_lossy()
            )
        })?;
    }
    std::fs::rename(&tmp_dst, db_path).with_context(|| {
        format!(
            "failed to move restored database to {}",
            db_path.to_string_lossy()
        )
    })?;

    Ok(ImportSummary {
        bundle_format_detected: detected,
    })
}

fn extract_bundle(in_path: &Path, tmp_dst: &Path) -> anyhow::Result<()> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }
    let expected = manifest
        .get("sha256")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("manifest.json has no sha256"))?
        .to_string();

    let mut db_out = File::create(tmp_dst).with_context(|| {
        format!(
            "failed to create temp database {}",
            tmp_dst.to_string_lossy()
        )
    })?;
    {
        let mut db_entry = archive
            .by_name(DB_ENTRY)
            .context("bundle missing db/scolarite.sqlite3")?;
        std::io::copy(&mut db_entry, &mut db_out).context("failed to extract database entry")?;
    }
    db_out
        .flush()
        .context("failed to flush extracted database")?;
    drop(db_out);

    let actual = sha256_file(tmp_dst)?;
    if !actual.eq_ignore_ascii_case(&expected) {
        let _ = std::fs::remove_file(tmp_dst);
        return Err(anyhow!(
            "database digest mismatch: manifest says {expected}, extracted file is {actual}"
        ));
    }
    Ok(())
}

/// Zip snapshot in `dir`, named after the current time. `None` when there is no database yet.
pub fn snapshot_to_dir(db_path: &Path, dir: &Path) -> anyhow::Result<Option<PathBuf>> {
    if !db_path.is_file() {
        return Ok(None);
    }
    let name = format!(
        "scolarite-{}.zip",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    );
    let out = dir.join(name);
    export_database_bundle(db_path, &out)?;
    Ok(Some(out))
}

enum FileKind {
    Zip,
    Sqlite,
    Other,
}

fn file_kind(path: &Path) -> anyhow::Result<FileKind> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 16];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    if read >= 4 && sig[..4] == [0x50, 0x4B, 0x03, 0x04] {
        return Ok(FileKind::Zip);
    }
    if read == 16 && &sig == SQLITE_HEADER {
        return Ok(FileKind::Sqlite);
    }
    Ok(FileKind::Other)
}
