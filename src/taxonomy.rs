use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{BenchmarkError, CoreResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyNode {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub synonyms: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyFile {
    #[serde(default)]
    pub taxonomy_version: Option<String>,
    pub classes: Vec<TaxonomyNode>,
}

/// Validated, read-only class catalog.
#[derive(Debug, Clone)]
pub struct Taxonomy {
    nodes: Vec<TaxonomyNode>,
    index: HashMap<String, usize>,
    aliases: HashMap<String, String>,
    ambiguous_aliases: HashSet<String>,
}

impl Taxonomy {
    pub fn from_file(file: TaxonomyFile) -> CoreResult<Self> {
        Self::from_nodes(file.classes)
    }

    pub fn from_nodes(nodes: Vec<TaxonomyNode>) -> CoreResult<Self> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (position, node) in nodes.iter().enumerate() {
            if node.id.trim().is_empty() {
                return Err(BenchmarkError::validation(format!(
                    "taxonomy node at position {position} has an empty id"
                )));
            }
            if index.insert(node.id.clone(), position).is_some() {
                return Err(BenchmarkError::validation(format!(
                    "duplicate taxonomy id: {}",
                    node.id
                )));
            }
        }

        for node in &nodes {
            if let Some(parent_id) = &node.parent_id {
                if !index.contains_key(parent_id) {
                    return Err(BenchmarkError::validation(format!(
                        "taxonomy node {} references missing parent {parent_id}",
                        node.id
                    )));
                }
            }
        }

        for node in &nodes {
            let mut visited = HashSet::new();
            let mut cursor = Some(node.id.as_str());
            while let Some(current) = cursor {
                if !visited.insert(current) {
                    return Err(BenchmarkError::validation(format!(
                        "taxonomy parent chain of {} contains a cycle at {current}",
                        node.id
                    )));
                }
                cursor = index
                    .get(current)
                    .and_then(|position| nodes[*position].parent_id.as_deref());
            }
        }

        let mut aliases: HashMap<String, String> = HashMap::new();
        let mut ambiguous_aliases = HashSet::new();
        for node in &nodes {
            let names = std::iter::once(node.display_name.as_str())
                .chain(node.synonyms.iter().map(String::as_str));
            for name in names {
                let alias = normalize_label(name);
                if alias.is_empty() || ambiguous_aliases.contains(&alias) {
                    continue;
                }
                match aliases.get(&alias) {
                    Some(existing) if existing != &node.id => {
                        aliases.remove(&alias);
                        ambiguous_aliases.insert(alias);
                    }
                    Some(_) => {}
                    None => {
                        aliases.insert(alias, node.id.clone());
                    }
                }
            }
        }

        Ok(Self {
            nodes,
            index,
            aliases,
            ambiguous_aliases,
        })
    }

    pub fn nodes(&self) -> &[TaxonomyNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn is_leaf(&self, id: &str) -> bool {
        self.contains(id)
            && !self
                .nodes
                .iter()
                .any(|node| node.parent_id.as_deref() == Some(id))
    }

    /// Maps a free-form label to a class id: exact id first, then display
    /// name or synonym after normalization. Aliases shared by two classes
    /// resolve to nothing.
    pub fn resolve_label(&self, label: &str) -> Option<&str> {
        let trimmed = label.trim();
        if let Some(position) = self.index.get(trimmed) {
            return Some(self.nodes[*position].id.as_str());
        }

        let alias = normalize_label(trimmed);
        if self.ambiguous_aliases.contains(&alias) {
            return None;
        }
        self.aliases.get(&alias).map(String::as_str)
    }
}

/// Lowercase, with every run of non-alphanumeric characters collapsed to one space.
pub fn normalize_label(value: &str) -> String {
    value
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect::<Vec<&str>>()
        .join(" ")
}
