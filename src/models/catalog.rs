/// A SpeakLeash model that can be downloaded from Hugging Face
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: &'static str,
    pub repo_id: &'static str,
    pub description: &'static str,
    pub parameters: &'static str,
    pub version: &'static str,
    /// Approximate size of the q4_0 file, used for the disk space check
    pub size_mb: u64,
    pub recommended: bool,
}

/// Catalog of supported SpeakLeash models
pub const CATALOG: &[CatalogEntry] = &[
    CatalogEntry {
        name: "bielik-7b-instruct-v0.1",
        repo_id: "SpeakLeash/bielik-7b-instruct-v0.1-gguf",
        description: "Bielik 7B Instruct model optimized for Polish language",
        parameters: "7B",
        version: "v0.1",
        size_mb: 4_100,
        recommended: false,
    },
    CatalogEntry {
        name: "bielik-11b-v2.3-instruct",
        repo_id: "SpeakLeash/bielik-11b-v2.3-instruct-gguf",
        description: "Bielik 11B Instruct model v2.3 with enhanced capabilities",
        parameters: "11B",
        version: "v2.3",
        size_mb: 6_300,
        recommended: false,
    },
    CatalogEntry {
        name: "bielik-4.5b-v3.0-instruct",
        repo_id: "SpeakLeash/bielik-4.5b-v3.0-instruct-gguf",
        description: "Compact Bielik 4.5B model with latest improvements",
        parameters: "4.5B",
        version: "v3.0",
        size_mb: 2_700,
        recommended: true,
    },
];

impl CatalogEntry {
    /// Find catalog entry by name
    #[must_use]
    pub fn find(name: &str) -> Option<&'static Self> {
        CATALOG.iter().find(|m| m.name == name)
    }

    /// Get all catalog names
    #[must_use]
    pub fn all_names() -> Vec<&'static str> {
        CATALOG.iter().map(|m| m.name).collect()
    }

    /// Get the model suggested for first-time users
    #[must_use]
    pub fn recommended() -> &'static Self {
        CATALOG.iter().find(|m| m.recommended).unwrap_or(&CATALOG[0])
    }

    /// Find closest catalog name using Levenshtein distance
    #[must_use]
    pub fn suggest(name: &str) -> Option<&'static str> {
        if name.is_empty() {
            return None;
        }

        CATALOG
            .iter()
            .map(|m| (m.name, levenshtein_distance(name, m.name)))
            .min_by_key(|(_, dist)| *dist)
            .filter(|(_, dist)| *dist <= 3)
            .map(|(model_name, _)| model_name)
    }
}

/// Edit distance between two strings, single-row variant
fn levenshtein_distance(s1: &str, s2: &str) -> usize {
    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut row: Vec<usize> = (0..=b.len()).collect();

    for (i, ca) in a.iter().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            let cost = usize::from(ca != cb);
            row[j + 1] = (above + 1).min(row[j] + 1).min(diagonal + cost);
            diagonal = above;
        }
    }

    row[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_entry() {
        let entry = CatalogEntry::find("bielik-7b-instruct-v0.1").unwrap();
        assert_eq!(entry.repo_id, "SpeakLeash/bielik-7b-instruct-v0.1-gguf");
        assert_eq!(entry.parameters, "7B");
        assert!(CatalogEntry::find("bielik-70b").is_none());
    }

    #[test]
    fn test_all_names() {
        let names = CatalogEntry::all_names();
        assert_eq!(names.len(), 3);
        assert!(names.contains(&"bielik-11b-v2.3-instruct"));
        assert!(names.contains(&"bielik-4.5b-v3.0-instruct"));
    }

    #[test]
    fn test_recommended_is_in_catalog() {
        let rec = CatalogEntry::recommended();
        assert!(CatalogEntry::find(rec.name).is_some());
    }

    #[test]
    fn test_suggest_close_typo() {
        assert_eq!(
            CatalogEntry::suggest("bielik-7b-instruct-v01"),
            Some("bielik-7b-instruct-v0.1")
        );
        assert_eq!(
            CatalogEntry::suggest("bielik-11b-v2.3-instrct"),
            Some("bielik-11b-v2.3-instruct")
        );
    }

    #[test]
    fn test_suggest_rejects_far_names() {
        assert_eq!(CatalogEntry::suggest("llama3"), None);
        assert_eq!(CatalogEntry::suggest(""), None);
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("same", "same"), 0);
        assert_eq!(levenshtein_distance("żółw", "zolw"), 3);
    }
}
