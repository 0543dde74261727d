//! Query templates with `%{path}` placeholders.
//!
//! A [`QueryPlan`] is compiled once from the configured query and resolved
//! per request draft against whichever [`VariableSource`] the active
//! converter scope selects.

use crate::models::{Group, Log, LogGroup, TAG_PREFIX};

const TAG_PATH: &str = "tag.";
const METADATA_PATH: &str = "metadata.";

/// Something placeholder paths such as `tag.db` can be looked up in.
pub trait VariableSource {
    fn lookup(&self, path: &str) -> Option<&str>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Variable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueryParam {
    key: String,
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryPlan {
    params: Vec<QueryParam>,
    variable_keys: Vec<String>,
}

impl QueryPlan {
    pub fn compile(query: &[(String, String)]) -> Self {
        let mut variable_keys: Vec<String> = Vec::new();
        let params = query
            .iter()
            .map(|(key, template)| {
                let parts = parse_template(template);
                for part in &parts {
                    if let Part::Variable(path) = part
                        && !variable_keys.contains(path)
                    {
                        variable_keys.push(path.clone());
                    }
                }
                QueryParam {
                    key: key.clone(),
                    parts,
                }
            })
            .collect();
        Self {
            params,
            variable_keys,
        }
    }

    /// Distinct placeholder paths in first-seen order.
    pub fn variable_keys(&self) -> &[String] {
        &self.variable_keys
    }

    pub fn has_variables(&self) -> bool {
        !self.variable_keys.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Substitute every placeholder. Paths the source cannot answer become
    /// empty strings.
    pub fn resolve(&self, source: &impl VariableSource) -> Vec<(String, String)> {
        self.params
            .iter()
            .map(|param| {
                let mut value = String::new();
                for part in &param.parts {
                    match part {
                        Part::Literal(text) => value.push_str(text),
                        Part::Variable(path) => {
                            value.push_str(source.lookup(path).unwrap_or_default())
                        }
                    }
                }
                (param.key.clone(), value)
            })
            .collect()
    }
}

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

/// Split a template into literal text and `%{path}` placeholders. Anything
/// that is not a well-formed placeholder stays literal.
fn parse_template(template: &str) -> Vec<Part> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut rest = template;

    while let Some(start) = rest.find("%{") {
        literal.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 && after[..end].chars().all(is_path_char) => {
                if !literal.is_empty() {
                    parts.push(Part::Literal(std::mem::take(&mut literal)));
                }
                parts.push(Part::Variable(after[..end].to_owned()));
                rest = &after[end + 1..];
            }
            _ => {
                literal.push_str("%{");
                rest = after;
            }
        }
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        parts.push(Part::Literal(literal));
    }
    parts
}

/// Tags shared by a legacy group, answering `tag.<name>`.
pub struct GroupTags<'a>(pub &'a LogGroup);

impl VariableSource for GroupTags<'_> {
    fn lookup(&self, path: &str) -> Option<&str> {
        self.0.tag(path.strip_prefix(TAG_PATH)?)
    }
}

/// `__tag__:` contents of a single legacy log, falling back to group tags.
pub struct RecordTags<'a> {
    pub log: &'a Log,
    pub group: &'a LogGroup,
}

impl VariableSource for RecordTags<'_> {
    fn lookup(&self, path: &str) -> Option<&str> {
        let name = path.strip_prefix(TAG_PATH)?;
        self.log
            .contents
            .iter()
            .find(|c| c.key.strip_prefix(TAG_PREFIX) == Some(name))
            .map(|c| c.value.as_str())
            .or_else(|| self.group.tag(name))
    }
}

/// Metadata (`metadata.<key>`) and tags (`tag.<key>`) of a generic group.
pub struct GroupMetadata<'a>(pub &'a Group);

impl VariableSource for GroupMetadata<'_> {
    fn lookup(&self, path: &str) -> Option<&str> {
        if let Some(key) = path.strip_prefix(METADATA_PATH) {
            return self.0.metadata.get(key);
        }
        self.0.tags.get(path.strip_prefix(TAG_PATH)?)
    }
}
