use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::warn;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const WRITE_BUFFER: usize = 8 * 1024;

/// Content-Type to extension, checked before falling back to the URL path.
const CONTENT_TYPE_MAP: &[(&str, &str)] = &[
    ("image/png", ".png"),
    ("image/jpeg", ".jpg"),
    ("image/jpg", ".jpg"),
    ("image/webp", ".webp"),
    ("image/gif", ".gif"),
    ("image/bmp", ".bmp"),
    ("image/tiff", ".tiff"),
    ("video/mp4", ".mp4"),
    ("video/webm", ".webm"),
    ("video/quicktime", ".mov"),
    ("video/x-msvideo", ".avi"),
    ("video/mpeg", ".mpeg"),
    ("audio/mpeg", ".mp3"),
    ("audio/wav", ".wav"),
    ("audio/x-wav", ".wav"),
    ("audio/ogg", ".ogg"),
    ("audio/flac", ".flac"),
    ("audio/aac", ".aac"),
    ("application/pdf", ".pdf"),
    ("application/json", ".json"),
    ("application/zip", ".zip"),
    ("text/plain", ".txt"),
    ("text/html", ".html"),
    ("text/csv", ".csv"),
];

fn extension_from_content_type(content_type: &str) -> &'static str {
    // "image/png; charset=utf-8" -> "image/png"
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();
    CONTENT_TYPE_MAP
        .iter()
        .find(|(name, _)| *name == mime)
        .map(|(_, ext)| *ext)
        .unwrap_or("")
}

/// Split a path string at the final extension dot, python-splitext style:
/// the dot stays with the extension, and a leading dot in the file name
/// (hidden files) does not count as one.
pub(crate) fn split_ext(path: &str) -> (&str, &str) {
    let name_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    match path[name_start..].rfind('.') {
        Some(i) if i > 0 => path.split_at(name_start + i),
        _ => (path, ""),
    }
}

fn extension_from_url(url: &str) -> String {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return String::new();
    };
    let (_, ext) = split_ext(parsed.path());
    if !ext.is_empty() && ext.len() <= 5 {
        ext.to_lowercase()
    } else {
        String::new()
    }
}

fn filename_from_url(url: &str) -> String {
    let Ok(parsed) = reqwest::Url::parse(url) else {
        return String::new();
    };
    let path = parsed.path();
    path.rsplit('/').next().unwrap_or("").to_string()
}

fn content_disposition_filename(header: &str) -> Option<String> {
    if !header.contains("filename=") {
        return None;
    }
    let name = header
        .rsplit_once("filename=")?
        .1
        .trim_matches(|c| c == '"' || c == '\'');
    (!name.is_empty()).then(|| name.to_string())
}

fn generate_auto_filename(remote_id: Option<&str>, ext: &str) -> String {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    match remote_id {
        Some(id) if !id.is_empty() => {
            let safe: String = id
                .chars()
                .take(32)
                .map(|c| {
                    if c.is_alphanumeric() || c == '-' || c == '_' {
                        c
                    } else {
                        '_'
                    }
                })
                .collect();
            format!("{safe}_{timestamp}{ext}")
        }
        _ => format!("output_{timestamp}{ext}"),
    }
}

/// Suffix `_1`, `_2`, ... before the extension until the path is free.
fn unique_filepath(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }
    let raw = path.to_string_lossy().into_owned();
    let (base, ext) = split_ext(&raw);
    let mut counter = 1;
    loop {
        let candidate = PathBuf::from(format!("{base}_{counter}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

/// Resolve the final artifact path and create its parent directories.
///
/// An explicit `output_file` wins: absolute or directory-qualified paths
/// are taken as-is, bare names land in `output_dir`, and overwrites are
/// allowed. Otherwise `fallback_name` lands in `output_dir` (default
/// `./output`) with collision suffixes when `avoid_overwrite` is set.
fn resolve_output_path(
    output_dir: Option<&str>,
    output_file: Option<&str>,
    fallback_name: &str,
    avoid_overwrite: bool,
) -> anyhow::Result<PathBuf> {
    let filepath = if let Some(file) = output_file {
        let as_path = Path::new(file);
        let has_dir = as_path
            .parent()
            .is_some_and(|p| !p.as_os_str().is_empty());
        if as_path.is_absolute() || has_dir {
            PathBuf::from(file)
        } else {
            Path::new(output_dir.unwrap_or(".")).join(file)
        }
    } else {
        let base = Path::new(output_dir.unwrap_or("./output")).join(fallback_name);
        if avoid_overwrite {
            unique_filepath(base)
        } else {
            base
        }
    };

    if let Some(parent) = filepath.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(filepath)
}

/// Stream one artifact to disk, resolving extension and filename per the
/// precedence chain. A download that errors mid-stream removes its
/// partial file.
pub(crate) async fn download_file(
    http: &reqwest::Client,
    url: &str,
    output_dir: Option<&str>,
    output_file: Option<&str>,
    remote_id: Option<&str>,
    auto_filename_mode: bool,
) -> anyhow::Result<PathBuf> {
    let mut response = http
        .get(url)
        .timeout(DOWNLOAD_TIMEOUT)
        .send()
        .await?
        .error_for_status()?;

    let mut ext = output_file
        .map(|f| split_ext(f).1.to_string())
        .unwrap_or_default();
    if ext.is_empty() {
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        ext = extension_from_content_type(content_type).to_string();
    }
    if ext.is_empty() {
        ext = extension_from_url(url);
    }
    if ext.is_empty() {
        warn!("could not detect a file extension for {url}");
    }

    let filename = if let Some(file) = output_file {
        let name = file.rsplit_once('/').map_or(file, |(_, name)| name);
        name.to_string()
    } else if auto_filename_mode {
        generate_auto_filename(remote_id, &ext)
    } else {
        let disposition = response
            .headers()
            .get(reqwest::header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(content_disposition_filename);
        match disposition {
            Some(name) => name,
            None => {
                let url_name = filename_from_url(url);
                if !url_name.is_empty() {
                    url_name
                } else if let Some(id) = remote_id.filter(|id| !id.is_empty()) {
                    format!("{id}{ext}")
                } else {
                    format!("output{ext}")
                }
            }
        }
    };

    let filepath = resolve_output_path(output_dir, output_file, &filename, output_file.is_none())?;

    let file = tokio::fs::File::create(&filepath).await?;
    let mut writer = tokio::io::BufWriter::with_capacity(WRITE_BUFFER, file);
    let streamed: anyhow::Result<()> = async {
        while let Some(chunk) = response.chunk().await? {
            writer.write_all(&chunk).await?;
        }
        writer.flush().await?;
        Ok(())
    }
    .await;

    if let Err(err) = streamed {
        let _ = tokio::fs::remove_file(&filepath).await;
        return Err(err);
    }
    Ok(filepath)
}

/// Request/response log events collected while a job runs, in event order.
#[derive(Debug, Default)]
pub(crate) struct RunLogs {
    entries: Vec<(&'static str, Value)>,
}

impl RunLogs {
    pub(crate) fn push(&mut self, event: &'static str, data: Value) {
        self.entries.push((event, data));
    }
}

fn write_log_file(path: &Path, data: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, serde_json::to_string_pretty(data)?)?;
    Ok(())
}

/// Write the collected events as JSON files: one per event under
/// `{output_dir}/logs/` when `to_dir` is set, and/or beside the first
/// saved artifact as `{basename}_{event}.json` when `inline` is set.
pub(crate) fn save_logs(
    logs: &RunLogs,
    output_dir: Option<&str>,
    saved_filepath: Option<&Path>,
    to_dir: bool,
    inline: bool,
) -> anyhow::Result<Vec<String>> {
    let mut saved = Vec::new();

    if to_dir {
        let logs_dir = Path::new(output_dir.unwrap_or("./output")).join("logs");
        for (event, data) in &logs.entries {
            let path = logs_dir.join(format!("{event}.json"));
            write_log_file(&path, data)?;
            saved.push(path.to_string_lossy().into_owned());
        }
    }

    if inline {
        if let Some(artifact) = saved_filepath {
            let raw = artifact.to_string_lossy();
            let (base, _) = split_ext(&raw);
            for (event, data) in &logs.entries {
                let path = PathBuf::from(format!("{base}_{event}.json"));
                write_log_file(&path, data)?;
                saved.push(path.to_string_lossy().into_owned());
            }
        }
    }

    Ok(saved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_mapping_ignores_parameters_and_case() {
        assert_eq!(extension_from_content_type("image/png"), ".png");
        assert_eq!(
            extension_from_content_type("Image/PNG; charset=utf-8"),
            ".png"
        );
        assert_eq!(extension_from_content_type("audio/mpeg"), ".mp3");
        assert_eq!(extension_from_content_type("application/x-unknown"), "");
        assert_eq!(extension_from_content_type(""), "");
    }

    #[test]
    fn url_extension_is_short_lowercase_or_nothing() {
        assert_eq!(extension_from_url("https://cdn.example.com/a/b/video.MP4"), ".mp4");
        assert_eq!(extension_from_url("https://cdn.example.com/file.toolong"), "");
        assert_eq!(extension_from_url("https://cdn.example.com/no-extension"), "");
        assert_eq!(extension_from_url("not a url"), "");
    }

    #[test]
    fn split_ext_keeps_hidden_files_whole() {
        assert_eq!(split_ext("out/image.png"), ("out/image", ".png"));
        assert_eq!(split_ext("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_ext("out/.hidden"), ("out/.hidden", ""));
        assert_eq!(split_ext("noext"), ("noext", ""));
    }

    #[test]
    fn content_disposition_parsing() {
        assert_eq!(
            content_disposition_filename("attachment; filename=\"cat.png\""),
            Some("cat.png".to_string())
        );
        assert_eq!(
            content_disposition_filename("attachment; filename=plain.bin"),
            Some("plain.bin".to_string())
        );
        assert_eq!(content_disposition_filename("attachment"), None);
    }

    #[test]
    fn auto_filename_sanitizes_and_truncates_the_remote_id() {
        let name = generate_auto_filename(Some("abc/123:!?x"), ".png");
        assert!(name.starts_with("abc_123___x_"), "{name}");
        assert!(name.ends_with(".png"));

        let long = "a".repeat(64);
        let name = generate_auto_filename(Some(&long), ".png");
        assert!(name.starts_with(&"a".repeat(32)));
        assert!(!name.starts_with(&"a".repeat(33)));

        let name = generate_auto_filename(None, "");
        assert!(name.starts_with("output_"));
    }

    #[test]
    fn collisions_get_numeric_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.png");
        assert_eq!(unique_filepath(path.clone()), path);

        std::fs::write(&path, b"x").unwrap();
        let next = unique_filepath(path.clone());
        assert_eq!(next, dir.path().join("result_1.png"));

        std::fs::write(&next, b"x").unwrap();
        assert_eq!(unique_filepath(path), dir.path().join("result_2.png"));
    }

    #[test]
    fn explicit_output_file_beats_the_fallback_and_allows_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().to_str().unwrap();

        let path = resolve_output_path(Some(base), Some("mine.png"), "auto.png", false).unwrap();
        assert_eq!(path, dir.path().join("mine.png"));

        // Existing file, explicit name: same path comes back.
        std::fs::write(&path, b"x").unwrap();
        let again = resolve_output_path(Some(base), Some("mine.png"), "auto.png", false).unwrap();
        assert_eq!(again, path);

        // Directory-qualified explicit name ignores output_dir.
        let nested = dir.path().join("sub/deep.png");
        let nested_str = nested.to_str().unwrap();
        let path = resolve_output_path(Some(base), Some(nested_str), "auto.png", false).unwrap();
        assert_eq!(path, nested);
        assert!(nested.parent().unwrap().is_dir());
    }

    #[test]
    fn fallback_names_avoid_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().to_str().unwrap();

        let first = resolve_output_path(Some(base), None, "auto.png", true).unwrap();
        std::fs::write(&first, b"x").unwrap();
        let second = resolve_output_path(Some(base), None, "auto.png", true).unwrap();
        assert_eq!(second, dir.path().join("auto_1.png"));
    }

    #[test]
    fn logs_land_in_the_logs_dir_and_inline() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().to_str().unwrap();
        let artifact = dir.path().join("cat.png");
        std::fs::write(&artifact, b"x").unwrap();

        let mut logs = RunLogs::default();
        logs.push("submit_request", serde_json::json!({"tool": "submit"}));
        logs.push("status_final", serde_json::json!({"status": "completed"}));

        let saved = save_logs(&logs, Some(base), Some(artifact.as_path()), true, true).unwrap();
        assert_eq!(saved.len(), 4);
        assert!(dir.path().join("logs/submit_request.json").is_file());
        assert!(dir.path().join("logs/status_final.json").is_file());
        assert!(dir.path().join("cat_submit_request.json").is_file());
        assert!(dir.path().join("cat_status_final.json").is_file());
    }
}
