use std::collections::BTreeMap;
use std::ffi::CString;
use std::path::Path;

use anyhow::{anyhow, Result};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use serde::Deserialize;
use tracing::{debug, warn};

use super::types::ApiEntry;

/// Walks `folder` with Python's own `ast` module. `.py` files are read first, then `.pyi`
/// stubs, so stub definitions win on name clashes. Class methods are also flattened to
/// `Class.method` keys.
const INDEX_SCRIPT: &str = r#"
import ast, glob, json, os, warnings

def _args(fn):
    return {a.arg: ast.unparse(a.annotation) for a in fn.args.args if a.annotation}

def _function(fn):
    return {
        "args": _args(fn),
        "returns": ast.unparse(fn.returns) if fn.returns else None,
        "docstring": ast.get_docstring(fn),
    }

def _parse(path):
    with open(path, encoding="utf-8", errors="replace") as fh:
        source = fh.read()
    with warnings.catch_warnings():
        warnings.simplefilter("ignore")
        tree = ast.parse(source, filename=path)
    defs = {}
    for node in tree.body:
        if isinstance(node, (ast.FunctionDef, ast.AsyncFunctionDef)):
            defs[node.name] = _function(node)
        elif isinstance(node, ast.AnnAssign) and isinstance(node.target, ast.Name):
            defs[node.target.id] = {"type": ast.unparse(node.annotation), "docstring": None}
        elif isinstance(node, ast.ClassDef):
            methods, attributes = {}, {}
            for item in node.body:
                if isinstance(item, (ast.FunctionDef, ast.AsyncFunctionDef)):
                    if item.name.startswith("_") and item.name != "__init__":
                        continue
                    methods[item.name] = _function(item)
                elif isinstance(item, ast.AnnAssign) and isinstance(item.target, ast.Name):
                    attributes[item.target.id] = {"type": ast.unparse(item.annotation)}
            defs[node.name] = {
                "methods": methods,
                "attributes": attributes,
                "docstring": ast.get_docstring(node),
            }
            for name, info in methods.items():
                defs[node.name + "." + name] = info
    return defs

entries, skipped = {}, []
root = glob.escape(folder)
for ext in ("py", "pyi"):
    for path in sorted(glob.glob(os.path.join(root, "**", "*." + ext), recursive=True)):
        try:
            entries.update(_parse(path))
        except (SyntaxError, ValueError, OSError) as exc:
            skipped.append(path + ": " + str(exc))

result = json.dumps({"entries": entries, "skipped": skipped})
"#;

#[derive(Debug, Deserialize)]
pub struct IndexDump {
    pub entries: BTreeMap<String, ApiEntry>,
    /// Files that could not be parsed, with the reason.
    pub skipped: Vec<String>,
}

/// Blocking: acquires the GIL. Call from `spawn_blocking`.
pub fn extract_api(folder: &Path) -> Result<IndexDump> {
    let code = CString::new(INDEX_SCRIPT)?;
    let folder = folder.to_string_lossy().into_owned();

    let json: String = Python::with_gil(|py| -> Result<String> {
        let globals = PyDict::new(py);
        globals.set_item("__builtins__", py.import("builtins")?)?;
        globals.set_item("folder", &folder)?;
        py.run(&code, Some(&globals), None)?;
        let result = globals
            .get_item("result")?
            .ok_or_else(|| anyhow!("index script produced no result"))?;
        Ok(result.extract()?)
    })?;

    let dump: IndexDump = serde_json::from_str(&json)?;
    for skipped in &dump.skipped {
        warn!("Skipped unparsable source: {}", skipped);
    }
    debug!(folder = %folder, entries = dump.entries.len(), "API entries extracted");
    Ok(dump)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_functions_classes_and_stubs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("mix.py"),
            r#"
RATE: int = 44100

def mix(a: float, b: float, name) -> float:
    """Mix two signals."""
    return a + b

class Bus:
    """A summing bus."""
    gain: float
    def __init__(self, size: int):
        pass
    def _hidden(self):
        pass
    def route(self, target: str) -> None:
        """Route to target."""
"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("mix.pyi"), "def mix(a: int) -> int: ...\n").unwrap();
        std::fs::write(dir.path().join("broken.py"), "def (:\n").unwrap();

        let dump = extract_api(dir.path()).unwrap();
        assert_eq!(dump.skipped.len(), 1);
        assert_eq!(dump.entries["RATE"].type_annotation.as_deref(), Some("int"));
        assert_eq!(dump.entries["mix"].returns.as_deref(), Some("int"));

        let bus = &dump.entries["Bus"];
        assert_eq!(bus.method_names(), vec!["__init__", "route"]);
        assert_eq!(bus.docstring.as_deref(), Some("A summing bus."));
        assert_eq!(
            dump.entries["Bus.route"].signature("Bus.route").unwrap(),
            "Bus.route(target: str) -> None"
        );
    }
}
