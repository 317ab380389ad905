use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

/// One documented symbol extracted from the library sources.
///
/// Functions carry `args`/`returns`, classes carry `methods`/`attributes`, module-level
/// annotated variables carry only `type`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ApiEntry {
    pub args: Option<BTreeMap<String, String>>,
    pub returns: Option<String>,
    pub docstring: Option<String>,
    #[serde(rename = "type")]
    pub type_annotation: Option<String>,
    pub methods: Option<BTreeMap<String, ApiEntry>>,
    pub attributes: Option<BTreeMap<String, AttributeInfo>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AttributeInfo {
    #[serde(rename = "type")]
    pub type_annotation: Option<String>,
}

impl ApiEntry {
    /// `name(a: int, b: str) -> float` for functions and methods.
    pub fn signature(&self, name: &str) -> Option<String> {
        let args = self.args.as_ref()?;
        let rendered = render_args(args);
        let mut signature = format!("{}({})", name, rendered);
        if let Some(returns) = self.returns.as_deref().filter(|r| !r.is_empty()) {
            signature.push_str(" -> ");
            signature.push_str(returns);
        }
        Some(signature)
    }

    pub fn method_names(&self) -> Vec<&str> {
        self.methods
            .as_ref()
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

/// `a: int, b` with unannotated arguments rendered bare.
pub fn render_args(args: &BTreeMap<String, String>) -> String {
    args.iter()
        .map(|(arg, ty)| {
            if ty.is_empty() {
                arg.clone()
            } else {
                format!("{}: {}", arg, ty)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Where inside an entry a query matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchLocation {
    Exact,
    Name,
    Signature,
    Docstring,
    MethodName,
    MethodSignature,
    MethodDocstring,
    AttributeName,
    AttributeType,
}

impl fmt::Display for MatchLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchLocation::Exact => "exact",
            MatchLocation::Name => "name",
            MatchLocation::Signature => "signature",
            MatchLocation::Docstring => "docstring",
            MatchLocation::MethodName => "method_name",
            MatchLocation::MethodSignature => "method_signature",
            MatchLocation::MethodDocstring => "method_docstring",
            MatchLocation::AttributeName => "attribute_name",
            MatchLocation::AttributeType => "attribute_type",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchRecord {
    pub location: MatchLocation,
    pub text: String,
    /// Method or attribute name for member-level matches.
    pub member: Option<String>,
}

/// An index entry together with every place the query matched it.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiMatch {
    pub name: String,
    pub entry: ApiEntry,
    pub matches: Vec<MatchRecord>,
}
