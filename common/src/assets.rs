use thiserror::Error;

pub const INDEX_ASSET: &str = "index.html";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssetError {
    #[error("asset `{0}` is not bundled")]
    Missing(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetEntry {
    name: &'static str,
    content_type: &'static str,
    content: &'static [u8],
}

impl AssetEntry {
    pub const fn new(
        name: &'static str,
        content_type: &'static str,
        content: &'static [u8],
    ) -> Self {
        Self {
            name,
            content_type,
            content,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    pub fn content(&self) -> &'static [u8] {
        self.content
    }

    pub fn route(&self) -> String {
        format!("/{}", self.name)
    }
}

#[derive(Debug, Clone)]
pub struct AssetTable {
    entries: Box<[AssetEntry]>,
}

impl AssetTable {
    pub fn new(manifest: &[AssetEntry]) -> Self {
        Self {
            entries: manifest.into(),
        }
    }

    pub fn find(&self, name: &str) -> Option<&AssetEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn resolve(&self, name: &str) -> Result<AssetEntry, AssetError> {
        self.find(name)
            .copied()
            .ok_or_else(|| AssetError::Missing(name.to_string()))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AssetEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.entries.iter().map(|entry| entry.content.len()).sum()
    }
}

impl<'a> IntoIterator for &'a AssetTable {
    type Item = &'a AssetEntry;
    type IntoIter = std::slice::Iter<'a, AssetEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub fn content_type_for_name(file_name: &str) -> &'static str {
    if file_name.ends_with(".html") {
        "text/html"
    } else if file_name.ends_with(".js") {
        "text/javascript"
    } else if file_name.ends_with(".css") {
        "text/css"
    } else if file_name.ends_with(".json") {
        "application/json"
    } else {
        "text/plain"
    }
}
