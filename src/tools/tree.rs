use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

const SKIPPED_DIRS: &[&str] = &[".git", "__pycache__"];

struct Node {
    name: String,
    children: Option<Vec<Node>>,
}

/// Recursive tree rendering of `path`. Directories sort before files, each group by name.
///
/// Returns `(false, "")` when the path is missing or not a directory.
pub async fn list_dir(path: PathBuf) -> (bool, String) {
    match tokio::task::spawn_blocking(move || render_tree(&path)).await {
        Ok(result) => result,
        Err(e) => {
            warn!("list_dir task failed: {}", e);
            (false, String::new())
        }
    }
}

fn render_tree(path: &Path) -> (bool, String) {
    if !path.is_dir() {
        return (false, String::new());
    }
    let items = collect(path);
    let mut out = String::new();
    draw(&items, "", &mut out);
    (true, out)
}

fn collect(path: &Path) -> Vec<Node> {
    let Ok(read) = fs::read_dir(path) else {
        return Vec::new();
    };
    let mut items: Vec<Node> = read
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir && SKIPPED_DIRS.contains(&name.as_str()) {
                return None;
            }
            let children = is_dir.then(|| collect(&entry.path()));
            Some(Node { name, children })
        })
        .collect();
    items.sort_by(|a, b| {
        b.children
            .is_some()
            .cmp(&a.children.is_some())
            .then_with(|| a.name.cmp(&b.name))
    });
    items
}

fn draw(items: &[Node], prefix: &str, out: &mut String) {
    for (i, item) in items.iter().enumerate() {
        let last = i + 1 == items.len();
        let connector = if last { "└──" } else { "├──" };
        out.push_str(&format!("{}{} {}\n", prefix, connector, item.name));
        if let Some(children) = &item.children {
            let next = format!("{}{}", prefix, if last { "    " } else { "│   " });
            draw(children, &next, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tree_orders_dirs_first() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("pkg/sub")).unwrap();
        fs::create_dir_all(dir.path().join("__pycache__")).unwrap();
        fs::write(dir.path().join("b.py"), "").unwrap();
        fs::write(dir.path().join("a.py"), "").unwrap();
        fs::write(dir.path().join("pkg/mod.py"), "").unwrap();

        let (ok, tree) = list_dir(dir.path().to_path_buf()).await;
        assert!(ok);
        assert_eq!(
            tree,
            "├── pkg\n│   ├── sub\n│   └── mod.py\n├── a.py\n└── b.py\n"
        );
    }

    #[tokio::test]
    async fn test_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (ok, tree) = list_dir(dir.path().join("nope")).await;
        assert!(!ok);
        assert!(tree.is_empty());
    }
}
