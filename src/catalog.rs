//! The static table of spawnable dogs and the weighted draw over it.

use std::collections::HashSet;
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("catalog is empty")]
    Empty,
    #[error("entity {name:?} has invalid weight {weight}")]
    InvalidWeight { name: String, weight: f64 },
    #[error("entity name {0:?} appears more than once")]
    DuplicateName(String),
}

/// One spawnable entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    /// Display glyph, unicode or custom emoji markup.
    pub emoji: String,
    /// Relative spawn weight.
    pub chance: f64,
    /// Local file path or URL of the spawn picture.
    pub image: String,
}

/// Accepts both a bare list and the `{"dogs": [...]}` wrapper.
#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    Wrapped { dogs: Vec<EntityDefinition> },
    Bare(Vec<EntityDefinition>),
}

/// Immutable, validated list of entity definitions.
#[derive(Debug, Clone)]
pub struct Catalog {
    entries: Vec<EntityDefinition>,
    total_weight: f64,
}

impl Catalog {
    pub fn new(entries: Vec<EntityDefinition>) -> Result<Self, CatalogError> {
        if entries.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut seen = HashSet::new();
        for entry in &entries {
            if !entry.chance.is_finite() || entry.chance <= 0.0 {
                return Err(CatalogError::InvalidWeight {
                    name: entry.name.clone(),
                    weight: entry.chance,
                });
            }
            if !seen.insert(entry.name.to_lowercase()) {
                return Err(CatalogError::DuplicateName(entry.name.clone()));
            }
        }

        let total_weight = entries.iter().map(|e| e.chance).sum();
        Ok(Self {
            entries,
            total_weight,
        })
    }

    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let entries = match serde_json::from_str::<CatalogFile>(json)? {
            CatalogFile::Wrapped { dogs } => dogs,
            CatalogFile::Bare(dogs) => dogs,
        };
        Self::new(entries)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Roulette-wheel draw: each entry wins with probability `chance / total`.
    pub fn pick_random<R: Rng + ?Sized>(&self, rng: &mut R) -> &EntityDefinition {
        let roll = rng.gen_range(0.0..self.total_weight);
        self.pick_at(roll)
    }

    /// The first entry whose cumulative weight reaches `roll`.
    fn pick_at(&self, roll: f64) -> &EntityDefinition {
        let mut upto = 0.0;
        for entry in &self.entries {
            upto += entry.chance;
            if upto >= roll {
                return entry;
            }
        }
        // Float summation can leave `upto` a hair under `total_weight`.
        &self.entries[self.entries.len() - 1]
    }

    /// Case-insensitive lookup by name.
    pub fn find(&self, name: &str) -> Option<&EntityDefinition> {
        let name = name.trim();
        self.entries
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
    }

    pub fn entries(&self) -> &[EntityDefinition] {
        &self.entries
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn entity(name: &str, chance: f64) -> EntityDefinition {
        EntityDefinition {
            name: name.to_string(),
            emoji: "🐕".to_string(),
            chance,
            image: format!("media/dogs/{}.png", name),
        }
    }

    // -- loading -----------------------------------------------------------

    #[test]
    fn parses_wrapped_catalog() {
        let catalog = Catalog::from_json(
            r#"{"dogs": [
                {"name": "mutt", "emoji": "🐕", "chance": 50, "image": "media/dogs/mutt.png"},
                {"name": "husky", "emoji": "🐺", "chance": 10.5, "image": "media/dogs/husky.png"}
            ]}"#,
        )
        .expect("valid catalog");
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.total_weight(), 60.5);
    }

    #[test]
    fn parses_bare_list() {
        let catalog = Catalog::from_json(
            r#"[{"name": "mutt", "emoji": "🐕", "chance": 1, "image": "x.png"}]"#,
        )
        .expect("valid catalog");
        assert_eq!(catalog.entries()[0].name, "mutt");
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            Catalog::from_json("{not json"),
            Err(CatalogError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(matches!(
            Catalog::load("definitely/not/here.json"),
            Err(CatalogError::Io { .. })
        ));
    }

    #[test]
    fn empty_catalog_is_rejected() {
        assert!(matches!(Catalog::new(vec![]), Err(CatalogError::Empty)));
        assert!(matches!(
            Catalog::from_json(r#"{"dogs": []}"#),
            Err(CatalogError::Empty)
        ));
    }

    #[test]
    fn non_positive_weights_are_rejected() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = Catalog::new(vec![entity("mutt", 1.0), entity("husky", bad)]).unwrap_err();
            assert!(matches!(err, CatalogError::InvalidWeight { .. }), "{bad}");
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = Catalog::new(vec![entity("mutt", 1.0), entity("Mutt", 2.0)]).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateName(_)));
    }

    // -- selection ---------------------------------------------------------

    #[test]
    fn pick_at_walks_cumulative_weights() {
        let catalog =
            Catalog::new(vec![entity("a", 1.0), entity("b", 2.0), entity("c", 3.0)]).unwrap();
        assert_eq!(catalog.pick_at(0.0).name, "a");
        assert_eq!(catalog.pick_at(1.0).name, "a");
        assert_eq!(catalog.pick_at(1.5).name, "b");
        assert_eq!(catalog.pick_at(3.0).name, "b");
        assert_eq!(catalog.pick_at(5.9).name, "c");
        assert_eq!(catalog.pick_at(6.0).name, "c");
    }

    #[test]
    fn pick_at_past_total_returns_last() {
        let catalog = Catalog::new(vec![entity("a", 0.1), entity("b", 0.2)]).unwrap();
        assert_eq!(catalog.pick_at(10.0).name, "b");
    }

    #[test]
    fn single_entry_always_wins() {
        let catalog = Catalog::new(vec![entity("only", 3.0)]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            assert_eq!(catalog.pick_random(&mut rng).name, "only");
        }
    }

    #[test]
    fn frequencies_converge_to_weights() {
        let catalog = Catalog::new(vec![
            entity("common", 70.0),
            entity("uncommon", 25.0),
            entity("rare", 5.0),
        ])
        .unwrap();
        let mut rng = StdRng::seed_from_u64(0xD06);
        let draws = 100_000;
        let mut counts = [0usize; 3];
        for _ in 0..draws {
            match catalog.pick_random(&mut rng).name.as_str() {
                "common" => counts[0] += 1,
                "uncommon" => counts[1] += 1,
                _ => counts[2] += 1,
            }
        }
        for (count, expected) in counts.iter().zip([0.70, 0.25, 0.05]) {
            let observed = *count as f64 / draws as f64;
            assert!(
                (observed - expected).abs() < 0.01,
                "observed {observed}, expected {expected}"
            );
        }
    }

    // -- lookup ------------------------------------------------------------

    #[test]
    fn find_is_case_insensitive() {
        let catalog = Catalog::new(vec![entity("Sparkle Dog", 1.0)]).unwrap();
        assert!(catalog.find("sparkle dog").is_some());
        assert!(catalog.find("  SPARKLE DOG ").is_some());
        assert!(catalog.find("sparkle").is_none());
    }
}
