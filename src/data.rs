//! Registry Data Model
//!
//! Row types for the tree catalog and the ecosystem-service configuration,
//! plus the JSON snapshot format the registry is seeded from.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use anyhow::{Context, Result};

pub type TreeId = u64;
pub type SpeciesId = u64;
pub type ServiceId = u64;
pub type VariableId = u64;

/// Origin classification of a tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    #[serde(alias = "nativa")]
    Native,
    #[serde(alias = "exotica")]
    Exotic,
    #[default]
    #[serde(alias = "desconhecida")]
    Unknown,
}

impl Origin {
    /// Parse a query-string value (English or the legacy Portuguese labels)
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "native" | "nativa" => Some(Origin::Native),
            "exotic" | "exotica" | "exótica" => Some(Origin::Exotic),
            "unknown" | "desconhecida" => Some(Origin::Unknown),
            _ => None,
        }
    }
}

/// Cataloged urban tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    #[serde(default)]
    pub id: TreeId,
    /// External plate/tag number, unique across the catalog
    pub plate_number: String,
    pub common_name: String,
    pub scientific_name: String,
    /// Diameter at breast height
    pub dap: f64,
    pub height: f64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub reports: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub origin: Origin,
    #[serde(default)]
    pub planted_by: String,
}

impl Tree {
    pub fn biometrics(&self) -> Biometrics {
        Biometrics {
            dap: self.dap,
            altura: self.height,
        }
    }
}

/// The two fixed measurements every formula can see
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Biometrics {
    pub dap: f64,
    pub altura: f64,
}

/// Species catalog entry; trees join to it by name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Species {
    #[serde(default)]
    pub id: SpeciesId,
    pub scientific_name: String,
    #[serde(default)]
    pub common_name: String,
}

impl Species {
    /// Case-insensitive match against a tree's scientific, then common name
    pub fn matches(&self, tree: &Tree) -> bool {
        let scientific = tree.scientific_name.trim();
        if !scientific.is_empty() && self.scientific_name.trim().eq_ignore_ascii_case(scientific) {
            return true;
        }
        let common = tree.common_name.trim();
        !common.is_empty()
            && !self.common_name.trim().is_empty()
            && self.common_name.trim().eq_ignore_ascii_case(common)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceCategory {
    Carbon,
    Water,
    Air,
    Energy,
    Biodiversity,
    #[default]
    Other,
}

/// Stored definition of one ecosystem-service metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EcosystemServiceConfig {
    #[serde(default)]
    pub id: ServiceId,
    pub name: String,
    /// Unique code
    pub code: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: ServiceCategory,
    pub formula: String,
    #[serde(default)]
    pub coefficients: BTreeMap<String, f64>,
    #[serde(default)]
    pub unit_monetary_value: f64,
    #[serde(default = "default_unit")]
    pub unit: String,
    #[serde(default)]
    pub reference: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub display_order: i32,
    #[serde(default)]
    pub created_by: Option<String>,
}

fn default_unit() -> String {
    "unidade".to_string()
}

fn default_true() -> bool {
    true
}

/// Declared type of a custom variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Float,
    Integer,
    Text,
}

impl DataType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Float | DataType::Integer)
    }
}

/// Typed stored value of a custom variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl VariableValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            VariableValue::Integer(v) => Some(*v as f64),
            VariableValue::Float(v) => Some(*v),
            VariableValue::Text(_) => None,
        }
    }

    /// Re-type a value read from JSON so it matches `data_type`.
    ///
    /// JSON cannot tell `3` from `3.0`, so a whole number stored for a FLOAT
    /// variable arrives as `Integer` and is widened here.
    pub fn conform(self, data_type: DataType) -> Option<Self> {
        match (data_type, self) {
            (DataType::Float, VariableValue::Float(v)) if v.is_finite() => Some(VariableValue::Float(v)),
            (DataType::Float, VariableValue::Integer(v)) => Some(VariableValue::Float(v as f64)),
            (DataType::Integer, VariableValue::Integer(v)) => Some(VariableValue::Integer(v)),
            (DataType::Text, VariableValue::Text(s)) => Some(VariableValue::Text(s)),
            _ => None,
        }
    }
}

/// Manager-defined measurement attached to trees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeVariable {
    #[serde(default)]
    pub id: VariableId,
    pub name: String,
    pub code: String,
    pub data_type: DataType,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default_value: Option<VariableValue>,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// Per-species override of a variable's default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesVariableDefault {
    pub species_id: SpeciesId,
    pub variable_id: VariableId,
    pub value: Option<VariableValue>,
}

/// On-disk seed of the whole registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub species: Vec<Species>,
    #[serde(default)]
    pub trees: Vec<Tree>,
    #[serde(default)]
    pub services: Vec<EcosystemServiceConfig>,
    #[serde(default)]
    pub variables: Vec<TreeVariable>,
    #[serde(default)]
    pub species_defaults: Vec<SpeciesVariableDefault>,
}

impl RegistrySnapshot {
    /// Load a snapshot from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read registry file: {:?}", path))?;

        let snapshot: RegistrySnapshot = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse registry JSON: {:?}", path))?;

        tracing::info!(
            "Loaded registry snapshot: {} trees, {} species, {} services, {} variables",
            snapshot.trees.len(),
            snapshot.species.len(),
            snapshot.services.len(),
            snapshot.variables.len()
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(common: &str, scientific: &str) -> Tree {
        Tree {
            id: 1,
            plate_number: "001".into(),
            common_name: common.into(),
            scientific_name: scientific.into(),
            dap: 10.0,
            height: 5.0,
            latitude: 0.0,
            longitude: 0.0,
            reports: vec![],
            images: vec![],
            origin: Origin::Unknown,
            planted_by: String::new(),
        }
    }

    #[test]
    fn test_origin_accepts_legacy_labels() {
        let o: Origin = serde_json::from_str("\"nativa\"").unwrap();
        assert_eq!(o, Origin::Native);
        let o: Origin = serde_json::from_str("\"exotic\"").unwrap();
        assert_eq!(o, Origin::Exotic);
        assert_eq!(Origin::parse("Desconhecida"), Some(Origin::Unknown));
        assert_eq!(Origin::parse("martian"), None);
    }

    #[test]
    fn test_species_match_by_scientific_then_common_name() {
        let species = Species {
            id: 1,
            scientific_name: "Handroanthus albus".into(),
            common_name: "Ipê-amarelo".into(),
        };
        assert!(species.matches(&tree("whatever", "handroanthus ALBUS")));
        assert!(species.matches(&tree("Ipê-amarelo", "")));
        assert!(!species.matches(&tree("Sibipiruna", "Caesalpinia pluviosa")));
    }

    #[test]
    fn test_value_conform() {
        assert_eq!(
            VariableValue::Integer(3).conform(DataType::Float),
            Some(VariableValue::Float(3.0))
        );
        assert_eq!(VariableValue::Float(3.5).conform(DataType::Integer), None);
        assert_eq!(VariableValue::Text("a".into()).conform(DataType::Float), None);
        assert_eq!(VariableValue::Float(f64::NAN).conform(DataType::Float), None);
    }

    #[test]
    fn test_untagged_value_json() {
        let v: VariableValue = serde_json::from_str("2.5").unwrap();
        assert_eq!(v, VariableValue::Float(2.5));
        let v: VariableValue = serde_json::from_str("4").unwrap();
        assert_eq!(v, VariableValue::Integer(4));
        let v: VariableValue = serde_json::from_str("\"alta\"").unwrap();
        assert_eq!(v.as_number(), None);
    }

    #[test]
    fn test_service_defaults_from_json() {
        let json = r#"{"name": "Carbono", "code": "co2", "formula": "biomassa * 0.5"}"#;
        let s: EcosystemServiceConfig = serde_json::from_str(json).unwrap();
        assert!(s.active);
        assert_eq!(s.unit, "unidade");
        assert_eq!(s.category, ServiceCategory::Other);
        assert!(s.coefficients.is_empty());
    }
}
