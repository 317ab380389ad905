use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::debug;

pub async fn read_file(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Write `content`, creating missing parent directories.
pub async fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    debug!(path = %path.display(), bytes = content.len(), "file written");
    Ok(())
}

/// Replace the 1-based inclusive line range `start..=end` with `replacement`.
///
/// `start == end == line_count + 1` appends. The file's newline style and its trailing
/// newline are preserved. `None` deletes the range; `Some("")` is a single empty line.
pub fn splice_lines(
    content: &str,
    start: usize,
    end: usize,
    replacement: Option<&str>,
) -> Result<String> {
    let newline = if content.contains("\r\n") { "\r\n" } else { "\n" };
    let trailing = content.ends_with('\n') || content.is_empty();
    let mut lines: Vec<&str> = content.lines().collect();
    let total = lines.len();
    let append = start == total + 1 && end == total + 1;

    if start == 0 || end < start {
        bail!("invalid line range {}-{}", start, end);
    }
    if end > total && !append {
        bail!(
            "line range {}-{} is outside the file ({} lines)",
            start,
            end,
            total
        );
    }

    let new_lines: Vec<&str> = match replacement {
        None => Vec::new(),
        Some(text) => text
            .strip_suffix('\n')
            .map(|r| r.strip_suffix('\r').unwrap_or(r))
            .unwrap_or(text)
            .split('\n')
            .map(|l| l.strip_suffix('\r').unwrap_or(l))
            .collect(),
    };

    if append {
        lines.extend(new_lines);
    } else {
        lines.splice(start - 1..end, new_lines);
    }

    let mut out = lines.join(newline);
    if trailing && !lines.is_empty() {
        out.push_str(newline);
    }
    Ok(out)
}

/// Apply one line-range replacement to a file on disk. Returns a status message.
pub async fn replace_lines(
    path: &Path,
    start: usize,
    end: usize,
    replacement: Option<&str>,
) -> Result<String> {
    let content = read_file(path).await?;
    let updated = splice_lines(&content, start, end, replacement)?;
    write_file(path, &updated).await?;
    Ok(format!(
        "Replaced lines {}-{} in {}",
        start,
        end,
        path.display()
    ))
}
