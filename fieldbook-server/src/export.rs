//! Export engine: bundle a study into an offline-viewable package
//!
//! Two formats:
//! - `html`: one self-contained document with every referenced table and
//!   image inlined, plus the study's registered output files
//! - `bundle`: a directory holding the card index as JSON and each raw
//!   artifact as a separate file
//!
//! The card list is snapshotted under the study's registry lock before any
//! artifact is read, so a concurrent append is either wholly included or
//! wholly excluded, never half-included.

use crate::state::ServerContext;
use crate::store::ArtifactStore;
use crate::study::StudyMeta;
use base64::Engine;
use chrono::Utc;
use fieldbook_common::model::{Card, Payload};
use fieldbook_common::{Error, Result};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Largest output-dir text file inlined into an HTML export
const INLINE_TEXT_LIMIT: u64 = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Html,
    Bundle,
}

impl std::str::FromStr for ExportFormat {
    type Err = Error;

    fn from_str(raw: &str) -> Result<ExportFormat> {
        match raw {
            "html" => Ok(ExportFormat::Html),
            "bundle" | "json" => Ok(ExportFormat::Bundle),
            other => Err(Error::InvalidInput(format!(
                "unknown export format '{}' (expected html or bundle)",
                other
            ))),
        }
    }
}

/// What a bundle export wrote and where
#[derive(Debug, Clone, Serialize)]
pub struct ExportManifest {
    pub study: String,
    pub path: PathBuf,
    pub card_count: usize,
    pub files: Vec<String>,
}

/// Snapshot a study's cards and metadata under its registry lock
async fn snapshot(
    ctx: &ServerContext,
    label: &str,
) -> Result<(Vec<Card>, StudyMeta, ArtifactStore)> {
    let study = ctx
        .studies
        .get(label)
        .await
        .ok_or_else(|| Error::NotFound(format!("study '{}'", label)))?;
    let registry = study.registry.lock().await;
    let cards = registry.list().to_vec();
    drop(registry);
    Ok((cards, study.meta(), study.store()))
}

// ----------------------------------------------------------------------
// Self-contained HTML
// ----------------------------------------------------------------------

/// Render a study as one offline-viewable HTML document
pub async fn export_html(ctx: &ServerContext, label: &str) -> Result<String> {
    let (cards, meta, store) = snapshot(ctx, label).await?;

    let mut out = String::new();
    let _ = write!(
        out,
        "<!doctype html>\n<html><head><meta charset=\"utf-8\">\
         <title>{title}</title>\n<style>{css}</style></head>\n<body>\n\
         <h1>{title}</h1>\n<p class=\"meta\">exported {when} &middot; {count} cards</p>\n",
        title = escape(&meta.label),
        css = EXPORT_CSS,
        when = Utc::now().format("%Y-%m-%d %H:%M UTC"),
        count = cards.len(),
    );

    for card in &cards {
        render_card(&mut out, card, &store)?;
    }

    if let Some(output_dir) = &meta.output_dir {
        render_output_files(&mut out, output_dir);
    }

    out.push_str("</body></html>\n");
    info!("Exported study '{}' as HTML ({} cards)", label, cards.len());
    Ok(out)
}

const EXPORT_CSS: &str = "body{font-family:system-ui,sans-serif;max-width:60rem;\
margin:2rem auto;padding:0 1rem;color:#222}\
.card{border:1px solid #ddd;border-radius:6px;padding:1rem;margin:1rem 0}\
.card.dismissed{opacity:.5}.kind{color:#888;font-size:.8rem;text-transform:uppercase}\
.meta{color:#888;font-size:.85rem}table{border-collapse:collapse;margin:.5rem 0}\
td,th{border:1px solid #ccc;padding:.25rem .5rem;font-size:.9rem}\
pre{background:#f6f6f6;padding:.5rem;overflow-x:auto}\
img{max-width:100%}.response{background:#eef6ee;padding:.5rem;border-radius:4px}\
.note{border-left:3px solid #ccc;padding-left:.5rem;color:#555}";

fn render_card(out: &mut String, card: &Card, store: &ArtifactStore) -> Result<()> {
    let dismissed = if card.dismissed { " dismissed" } else { "" };
    let _ = write!(out, "<div class=\"card{}\" id=\"{}\">", dismissed, card.id);
    let _ = write!(out, "<div class=\"kind\">{:?}</div>", card.kind);
    if let Some(title) = &card.title {
        let _ = write!(out, "<h3>{}</h3>", escape(title));
    }
    if let Some(description) = &card.description {
        let _ = write!(out, "<p>{}</p>", escape(description));
    }
    render_payload(out, &card.payload, store)?;
    for note in &card.annotations {
        let _ = write!(
            out,
            "<p class=\"note\">{} <span class=\"meta\">({})</span></p>",
            escape(&note.text),
            note.created_at.format("%Y-%m-%d %H:%M"),
        );
    }
    if let Some(provenance) = &card.provenance {
        if let Some(source) = &provenance.source {
            let _ = write!(out, "<p class=\"meta\">source: <code>{}</code></p>", escape(source));
        }
    }
    out.push_str("</div>\n");
    Ok(())
}

fn render_payload(out: &mut String, payload: &Payload, store: &ArtifactStore) -> Result<()> {
    match payload {
        Payload::Table(table_ref) => {
            let file = store.open_table(table_ref.artifact_id)?;
            let rows = file.page(0, file.row_count() as usize, None, true)?;
            out.push_str("<table><tr>");
            for column in &table_ref.schema.columns {
                let _ = write!(out, "<th>{}</th>", escape(&column.name));
            }
            out.push_str("</tr>");
            for row in &rows {
                out.push_str("<tr>");
                for column in &table_ref.schema.columns {
                    let cell = row.get(&column.name).cloned().unwrap_or_default();
                    let _ = write!(out, "<td>{}</td>", escape(&json_text(&cell)));
                }
                out.push_str("</tr>");
            }
            out.push_str("</table>");
            if table_ref.truncated {
                out.push_str("<p class=\"meta\">row cap applied before storage</p>");
            }
        }
        Payload::Image {
            artifact_id,
            media_type,
        } => {
            let bytes = store.read_raw(*artifact_id)?;
            let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
            let _ = write!(
                out,
                "<img src=\"data:{};base64,{}\" alt=\"figure\">",
                escape(media_type),
                encoded
            );
        }
        Payload::Chart { spec } => {
            let _ = write!(
                out,
                "<pre>{}</pre>",
                escape(&serde_json::to_string_pretty(spec).unwrap_or_default())
            );
        }
        Payload::Markdown { text } => {
            let _ = write!(out, "<pre>{}</pre>", escape(text));
        }
        Payload::KeyValue { entries } => {
            out.push_str("<table>");
            for entry in entries {
                let _ = write!(
                    out,
                    "<tr><th>{}</th><td>{}</td></tr>",
                    escape(&entry.key),
                    escape(&json_text(&entry.value))
                );
            }
            out.push_str("</table>");
        }
        Payload::Decision {
            prompt,
            actions,
            content,
        } => {
            let _ = write!(out, "<p><strong>{}</strong></p>", escape(prompt));
            if let Some(inner) = content {
                render_payload(out, inner, store)?;
            }
            let names: Vec<String> =
                actions.iter().map(|a| escape(&a.name)).collect();
            let _ = write!(out, "<p class=\"meta\">actions: {}</p>", names.join(", "));
        }
        Payload::Section => {}
        Payload::AgentTask { status, detail } => {
            let _ = write!(out, "<p>status: <strong>{}</strong></p>", escape(status));
            if let Some(detail) = detail {
                let _ = write!(out, "<p>{}</p>", escape(detail));
            }
        }
    }
    Ok(())
}

/// Inline or list the study's registered output files
fn render_output_files(out: &mut String, dir: &Path) {
    out.push_str("<h2>Output files</h2>\n");
    if !dir.is_dir() {
        let _ = write!(
            out,
            "<p class=\"meta\">registered directory {} not found</p>",
            escape(&dir.display().to_string())
        );
        return;
    }
    for entry in WalkDir::new(dir)
        .max_depth(3)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let name = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .display()
            .to_string();
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let _ = write!(out, "<div class=\"card\"><h3>{}</h3>", escape(&name));
        match classify_file(entry.path()) {
            OutputFileKind::Image(media_type) => match std::fs::read(entry.path()) {
                Ok(bytes) => {
                    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
                    let _ = write!(
                        out,
                        "<img src=\"data:{};base64,{}\" alt=\"{}\">",
                        media_type,
                        encoded,
                        escape(&name)
                    );
                }
                Err(e) => {
                    warn!("Skipping unreadable output file {}: {}", name, e);
                }
            },
            OutputFileKind::Text if size <= INLINE_TEXT_LIMIT => {
                match std::fs::read_to_string(entry.path()) {
                    Ok(text) => {
                        let _ = write!(out, "<pre>{}</pre>", escape(&text));
                    }
                    Err(e) => {
                        warn!("Skipping unreadable output file {}: {}", name, e);
                    }
                }
            }
            _ => {
                let _ = write!(out, "<p class=\"meta\">{} bytes</p>", size);
            }
        }
        out.push_str("</div>\n");
    }
}

enum OutputFileKind {
    Image(&'static str),
    Text,
    Other,
}

fn classify_file(path: &Path) -> OutputFileKind {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => OutputFileKind::Image("image/png"),
        Some("jpg") | Some("jpeg") => OutputFileKind::Image("image/jpeg"),
        Some("svg") => OutputFileKind::Image("image/svg+xml"),
        Some("gif") => OutputFileKind::Image("image/gif"),
        Some("txt") | Some("md") | Some("csv") | Some("json") | Some("log") => {
            OutputFileKind::Text
        }
        _ => OutputFileKind::Other,
    }
}

/// Render every study into one offline-viewable document
pub async fn export_all_html(ctx: &ServerContext) -> Result<String> {
    let labels: Vec<String> = ctx
        .studies
        .list()
        .await
        .into_iter()
        .map(|info| info.label)
        .collect();

    let mut out = String::new();
    let _ = write!(
        out,
        "<!doctype html>\n<html><head><meta charset=\"utf-8\">\
         <title>Fieldbook export</title>\n<style>{css}</style></head>\n<body>\n\
         <h1>Fieldbook export</h1>\n<p class=\"meta\">exported {when} &middot; {count} studies</p>\n",
        css = EXPORT_CSS,
        when = Utc::now().format("%Y-%m-%d %H:%M UTC"),
        count = labels.len(),
    );

    for label in &labels {
        // A study deleted mid-export is dropped, not an error
        let (cards, meta, store) = match snapshot(ctx, label).await {
            Ok(snapshot) => snapshot,
            Err(Error::NotFound(_)) => continue,
            Err(e) => return Err(e),
        };
        let _ = write!(
            out,
            "<h2>{} <span class=\"meta\">({} cards)</span></h2>\n",
            escape(&meta.label),
            cards.len()
        );
        for card in &cards {
            render_card(&mut out, card, &store)?;
        }
        if let Some(output_dir) = &meta.output_dir {
            render_output_files(&mut out, output_dir);
        }
    }

    out.push_str("</body></html>\n");
    info!("Exported {} studies as HTML", labels.len());
    Ok(out)
}

// ----------------------------------------------------------------------
// Structured bundle
// ----------------------------------------------------------------------

#[derive(Serialize)]
struct BundleIndex<'a> {
    study: &'a StudyMeta,
    exported_at: chrono::DateTime<Utc>,
    cards: &'a [Card],
}

/// Write the card index plus raw artifacts as separate files
pub async fn export_bundle(ctx: &ServerContext, label: &str) -> Result<ExportManifest> {
    let (cards, meta, store) = snapshot(ctx, label).await?;

    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    let dest = ctx
        .config
        .exports_dir()
        .join(format!("{}-{}", meta.label, stamp));
    let artifacts_dest = dest.join("artifacts");
    std::fs::create_dir_all(&artifacts_dest)?;

    let mut files = Vec::new();

    let index = BundleIndex {
        study: &meta,
        exported_at: Utc::now(),
        cards: &cards,
    };
    std::fs::write(dest.join("index.json"), serde_json::to_vec_pretty(&index)?)?;
    files.push("index.json".to_string());

    for card in &cards {
        if let Some(artifact_id) = card.payload.artifact_id() {
            let name = store.file_name(artifact_id)?;
            std::fs::copy(
                store.dir().join(&name),
                artifacts_dest.join(&name),
            )?;
            files.push(format!("artifacts/{}", name));
        }
    }

    if let Some(output_dir) = &meta.output_dir {
        if output_dir.is_dir() {
            let files_dest = dest.join("files");
            std::fs::create_dir_all(&files_dest)?;
            for entry in WalkDir::new(output_dir)
                .max_depth(3)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let rel = entry
                    .path()
                    .strip_prefix(output_dir)
                    .unwrap_or(entry.path());
                let target = files_dest.join(rel);
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(entry.path(), &target)?;
                files.push(format!("files/{}", rel.display()));
            }
        }
    }

    info!(
        "Exported study '{}' bundle to {} ({} files)",
        label,
        dest.display(),
        files.len()
    );
    Ok(ExportManifest {
        study: meta.label.clone(),
        path: dest,
        card_count: cards.len(),
        files,
    })
}

/// Bundle every study, one export directory per study
///
/// Each study's snapshot is taken under its own registry lock, so every
/// per-study bundle is internally consistent.
pub async fn export_all_bundle(ctx: &ServerContext) -> Result<Vec<ExportManifest>> {
    let labels: Vec<String> = ctx
        .studies
        .list()
        .await
        .into_iter()
        .map(|info| info.label)
        .collect();
    let mut manifests = Vec::with_capacity(labels.len());
    for label in &labels {
        match export_bundle(ctx, label).await {
            Ok(manifest) => manifests.push(manifest),
            Err(Error::NotFound(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(manifests)
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn json_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
