//! Result materialization: turn a successful engine result into on-disk
//! artifacts and extracted-element descriptors.
//!
//! Every export step is independently best-effort. A failed format is
//! logged and skipped; the job still completes with whatever artifacts
//! could be produced.

use std::fs;
use std::path::{Path, PathBuf};

use crate::engine::{ConversionOutput, LayoutCluster};
use crate::error::Result;

use super::chunker::DocumentChunker;
use super::job::{ConversionJob, ExtractedImage, ExtractedTable, JobSummary};

/// Longest markdown preview attached to a job summary
const PREVIEW_LIMIT: usize = 5000;

/// Materialize `output` for `job` under `output_dir`.
///
/// Mutates the job in place and republishes it through `publish` after
/// each progress step so a polling caller sees monotonically increasing
/// progress. Fails only when the output directory itself cannot be
/// created.
pub fn materialize(
    output: &ConversionOutput,
    job: &mut ConversionJob,
    output_dir: &Path,
    publish: &dyn Fn(&ConversionJob),
) -> Result<()> {
    fs::create_dir_all(output_dir)?;

    job.confidence = aggregate_confidence(output);
    job.page_count = output.pages.len().max(output.document.page_count);

    job.progress = 60;
    job.message = "Extracting images and tables...".to_string();
    publish(job);

    if job.settings.images.extract {
        job.images = extract_images(output, output_dir);
    }
    if job.settings.tables.enabled {
        job.tables = extract_tables(output, output_dir);
    }

    job.progress = 70;
    job.message = "Generating output formats...".to_string();
    publish(job);

    let stem = job.output_stem();
    let doc = &output.document;

    // Markdown first; its content doubles as the preview.
    let markdown = doc.export_markdown();
    record_export(job, "markdown", output_dir.join(format!("{}.md", stem)), |path| {
        fs::write(path, &markdown)?;
        Ok(())
    });

    job.progress = 75;
    publish(job);

    record_export(job, "html", output_dir.join(format!("{}.html", stem)), |path| {
        fs::write(path, doc.export_html())?;
        Ok(())
    });

    job.progress = 80;
    publish(job);

    record_export(job, "json", output_dir.join(format!("{}.json", stem)), |path| {
        let content = serde_json::to_string_pretty(doc)?;
        fs::write(path, content)?;
        Ok(())
    });

    job.progress = 85;
    publish(job);

    record_export(job, "text", output_dir.join(format!("{}.txt", stem)), |path| {
        fs::write(path, doc.export_text())?;
        Ok(())
    });

    record_export(job, "doctags", output_dir.join(format!("{}.doctags", stem)), |path| {
        fs::write(path, doc.export_doctags())?;
        Ok(())
    });

    record_export(
        job,
        "document_tokens",
        output_dir.join(format!("{}.tokens.json", stem)),
        |path| {
            let content = serde_json::to_string_pretty(&doc.export_tokens())?;
            fs::write(path, content)?;
            Ok(())
        },
    );

    job.progress = 90;
    job.message = "Generating chunks for RAG...".to_string();
    publish(job);

    if job.settings.chunking.enabled {
        let chunker = DocumentChunker::new(
            job.settings.chunking.max_tokens,
            job.settings.chunking.merge_peers,
        );
        job.chunks = chunker.chunk(doc);

        if !job.chunks.is_empty() {
            let chunks = job.chunks.clone();
            record_export(
                job,
                "chunks",
                output_dir.join(format!("{}.chunks.json", stem)),
                |path| {
                    let content = serde_json::to_string_pretty(&chunks)?;
                    fs::write(path, content)?;
                    Ok(())
                },
            );
        }
    }

    let mut preview = markdown.clone();
    if preview.len() > PREVIEW_LIMIT {
        let mut cut = PREVIEW_LIMIT;
        while cut > 0 && !preview.is_char_boundary(cut) {
            cut -= 1;
        }
        preview.truncate(cut);
    }

    job.summary = Some(JobSummary {
        markdown_preview: preview,
        formats_available: job.output_paths.keys().cloned().collect(),
        page_count: job.page_count,
        images_count: job.images.len(),
        tables_count: job.tables.len(),
        chunks_count: job.chunks.len(),
        warnings: output.warnings.clone(),
    });

    Ok(())
}

/// Run one export, recording its path only on success.
fn record_export<F>(job: &mut ConversionJob, key: &str, path: PathBuf, write: F)
where
    F: FnOnce(&Path) -> Result<()>,
{
    match write(&path) {
        Ok(()) => {
            job.output_paths.insert(key.to_string(), path);
        }
        Err(e) => {
            tracing::warn!("{} export failed for job {}: {}", key, job.id, e);
        }
    }
}

/// Mean of every confidence value discoverable on the result: layout
/// clusters (including children), OCR cells, and page-level scores.
/// Absent, not zero, when no values exist.
fn aggregate_confidence(output: &ConversionOutput) -> Option<f32> {
    let mut values = Vec::new();

    for page in &output.pages {
        for cluster in &page.layout {
            collect_cluster_confidence(cluster, &mut values);
        }
        for cell in &page.ocr_cells {
            if let Some(c) = cell.confidence {
                values.push(c);
            }
        }
        if let Some(c) = page.confidence {
            values.push(c);
        }
    }

    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f32>() / values.len() as f32)
    }
}

fn collect_cluster_confidence(cluster: &LayoutCluster, values: &mut Vec<f32>) {
    if let Some(c) = cluster.confidence {
        values.push(c);
    }
    for child in &cluster.children {
        collect_cluster_confidence(child, values);
    }
}

/// Write embedded pictures to `images/image_{n}.png`. Pictures without a
/// rendered payload are skipped.
fn extract_images(output: &ConversionOutput, output_dir: &Path) -> Vec<ExtractedImage> {
    let mut images = Vec::new();
    let images_dir = output_dir.join("images");

    for (i, picture) in output.document.pictures.iter().enumerate() {
        let Some(data) = &picture.data else {
            continue;
        };
        let id = i + 1;
        let filename = format!("image_{}.png", id);
        let path = images_dir.join(&filename);

        if let Err(e) = fs::create_dir_all(&images_dir).and_then(|_| fs::write(&path, data)) {
            tracing::warn!("Failed to write image {}: {}", id, e);
            continue;
        }

        images.push(ExtractedImage {
            id,
            filename,
            path,
            caption: picture.caption.clone().unwrap_or_default(),
            label: picture.label.clone(),
        });
    }

    images
}

/// Write tables to `tables/table_{n}.csv` and, when a rendered image is
/// available, `tables/table_{n}.png`.
fn extract_tables(output: &ConversionOutput, output_dir: &Path) -> Vec<ExtractedTable> {
    let mut tables = Vec::new();
    let tables_dir = output_dir.join("tables");

    for (i, table) in output.document.tables.iter().enumerate() {
        let id = i + 1;

        let csv_path = tables_dir.join(format!("table_{}.csv", id));
        let csv_written = fs::create_dir_all(&tables_dir)
            .map_err(crate::error::Error::from)
            .and_then(|_| write_csv(&csv_path, &table.grid));
        let csv_path = match csv_written {
            Ok(()) => Some(csv_path),
            Err(e) => {
                tracing::warn!("Failed to write table {} CSV: {}", id, e);
                None
            }
        };

        let image_path = table.image.as_ref().and_then(|data| {
            let path = tables_dir.join(format!("table_{}.png", id));
            match fs::write(&path, data) {
                Ok(()) => Some(path),
                Err(e) => {
                    tracing::warn!("Failed to write table {} image: {}", id, e);
                    None
                }
            }
        });

        tables.push(ExtractedTable {
            id,
            caption: table.caption.clone().unwrap_or_default(),
            label: table.label.clone(),
            rows: table.grid.clone(),
            csv_path,
            image_path,
        });
    }

    tables
}

fn write_csv(path: &Path, grid: &[Vec<String>]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| crate::error::Error::internal(format!("CSV open failed: {}", e)))?;
    for row in grid {
        writer
            .write_record(row)
            .map_err(|e| crate::error::Error::internal(format!("CSV write failed: {}", e)))?;
    }
    writer
        .flush()
        .map_err(|e| crate::error::Error::internal(format!("CSV flush failed: {}", e)))?;
    Ok(())
}
