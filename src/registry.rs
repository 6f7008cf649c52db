//! In-memory Registry
//!
//! Holds the tree catalog and the service configuration rows, enforces the
//! write-time rules (unique codes and plates, formulas that only reference
//! known names, typed variable defaults) and hands out per-tree snapshots
//! for evaluation.

use std::collections::BTreeMap;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::data::{
    DataType, EcosystemServiceConfig, Origin, RegistrySnapshot, Species, SpeciesId,
    SpeciesVariableDefault, Tree, TreeId, TreeVariable, VariableId, VariableValue,
};
use crate::formula::{check_identifiers, FormulaError};
use crate::services::{known_names, order_services, SpeciesDefaults, TreeSnapshot};
use crate::utils::{parse_typed, TypeCoercionError};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("code `{0}` is already in use")]
    DuplicateCode(String),

    #[error("plate number `{0}` is already registered")]
    DuplicatePlate(String),

    #[error("`{0}` is not a valid variable code")]
    InvalidCode(String),

    #[error("service `{0}` not found")]
    UnknownService(String),

    #[error("variable `{0}` not found")]
    UnknownVariable(String),

    #[error("species {0} not found")]
    UnknownSpecies(SpeciesId),

    #[error("tree {0} not found")]
    UnknownTree(TreeId),

    #[error("invalid formula for `{code}`: {source}")]
    InvalidFormula {
        code: String,
        #[source]
        source: FormulaError,
    },

    #[error("coefficient `{0}` must be a finite number")]
    InvalidCoefficient(String),

    #[error(transparent)]
    InvalidDefault(#[from] TypeCoercionError),

    #[error("invalid biometrics: {0}")]
    InvalidBiometrics(String),

    #[error("duplicate {table} id {id}")]
    DuplicateId { table: &'static str, id: u64 },

    #[error("variable `{variable}` is referenced by service `{service}`")]
    VariableInUse { variable: String, service: String },
}

/// Whether an upsert inserted a new row or replaced one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Custom variable as submitted by the configuration form.
///
/// The default arrives as raw text and is parsed against `data_type`
/// before it is stored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VariableInput {
    pub name: String,
    pub code: String,
    pub data_type: DataType,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default_value: String,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Tree listing filters (query parameter names follow the map UI).
///
/// The map form submits every field, so a blank value means "no filter".
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TreeFilter {
    #[serde(rename = "nome_popular")]
    pub common_name: Option<String>,
    #[serde(rename = "nome_cientifico")]
    pub scientific_name: Option<String>,
    #[serde(rename = "plantado_por")]
    pub planted_by: Option<String>,
    /// Exact common name, as picked from the species dropdown
    pub species: Option<String>,
    #[serde(rename = "origem")]
    pub origin: Option<String>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub dap_min: Option<f64>,
    #[serde(default, deserialize_with = "blank_as_none")]
    pub dap_max: Option<f64>,
    #[serde(rename = "altura_min", default, deserialize_with = "blank_as_none")]
    pub height_min: Option<f64>,
    #[serde(rename = "altura_max", default, deserialize_with = "blank_as_none")]
    pub height_max: Option<f64>,
    /// Only trees with at least one technical report attached
    #[serde(rename = "laudo_only", default, deserialize_with = "flag")]
    pub with_reports_only: bool,
}

/// Query-string number; blank reads as absent
fn blank_as_none<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("`{}` is not a number", raw))),
    }
}

/// Query-string checkbox; blank, `false`, `0` and `off` read as unset
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
    let raw = raw.trim().to_lowercase();
    Ok(!matches!(raw.as_str(), "" | "false" | "0" | "off"))
}

fn contains_ci(haystack: &str, needle: &Option<String>) -> bool {
    match needle.as_deref().map(str::trim) {
        None | Some("") => true,
        Some(needle) => haystack.to_lowercase().contains(&needle.to_lowercase()),
    }
}

impl TreeFilter {
    pub fn matches(&self, tree: &Tree) -> bool {
        if !contains_ci(&tree.common_name, &self.common_name)
            || !contains_ci(&tree.scientific_name, &self.scientific_name)
            || !contains_ci(&tree.planted_by, &self.planted_by)
        {
            return false;
        }

        if let Some(species) = self.species.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            if tree.common_name != species {
                return false;
            }
        }

        // An unrecognized origin label filters nothing out
        if let Some(origin) = self.origin.as_deref().and_then(Origin::parse) {
            if tree.origin != origin {
                return false;
            }
        }

        let in_range = |value: f64, min: Option<f64>, max: Option<f64>| {
            min.map_or(true, |m| value >= m) && max.map_or(true, |m| value <= m)
        };
        if !in_range(tree.dap, self.dap_min, self.dap_max)
            || !in_range(tree.height, self.height_min, self.height_max)
        {
            return false;
        }

        !self.with_reports_only || !tree.reports.is_empty()
    }
}

fn is_identifier(code: &str) -> bool {
    let mut chars = code.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn check_biometrics(tree: &Tree) -> Result<(), RegistryError> {
    for (label, value) in [("dap", tree.dap), ("altura", tree.height)] {
        if !value.is_finite() || value <= 0.0 {
            return Err(RegistryError::InvalidBiometrics(format!(
                "{} must be a positive number, got {}",
                label, value
            )));
        }
    }
    Ok(())
}

fn check_coefficients(coefficients: &BTreeMap<String, f64>) -> Result<(), RegistryError> {
    match coefficients.iter().find(|(_, v)| !v.is_finite()) {
        Some((name, _)) => Err(RegistryError::InvalidCoefficient(name.clone())),
        None => Ok(()),
    }
}

/// Seed rows may omit ids (0), but two rows of one table never share an id
fn check_unique_ids(
    table: &'static str,
    ids: impl IntoIterator<Item = u64>,
) -> Result<(), RegistryError> {
    let mut seen = FxHashSet::default();
    for id in ids {
        if id != 0 && !seen.insert(id) {
            return Err(RegistryError::DuplicateId { table, id });
        }
    }
    Ok(())
}

/// Stored JSON value that does not fit the variable's declared type
fn mismatch(data_type: DataType, value: &VariableValue) -> TypeCoercionError {
    let raw = serde_json::to_string(value).unwrap_or_default();
    TypeCoercionError::new(data_type, &raw, "stored value does not match the declared type")
}

#[derive(Debug, Clone)]
pub struct Registry {
    species: Vec<Species>,
    trees: BTreeMap<TreeId, Tree>,
    services: Vec<EcosystemServiceConfig>,
    variables: Vec<TreeVariable>,
    species_defaults: FxHashMap<(SpeciesId, VariableId), Option<VariableValue>>,
    next_id: u64,
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            species: Vec::new(),
            trees: BTreeMap::new(),
            services: Vec::new(),
            variables: Vec::new(),
            species_defaults: FxHashMap::default(),
            next_id: 1,
        }
    }

    /// Build a registry from a seed snapshot.
    ///
    /// Stored variable values are re-typed against their declared type and
    /// tree biometrics are checked. Service formulas are not re-validated:
    /// legacy rows that no longer evaluate are kept and reported per tree by
    /// the aggregator.
    pub fn from_snapshot(snapshot: RegistrySnapshot) -> Result<Self, RegistryError> {
        check_unique_ids("species", snapshot.species.iter().map(|s| s.id))?;
        check_unique_ids("tree", snapshot.trees.iter().map(|t| t.id))?;
        check_unique_ids("service", snapshot.services.iter().map(|s| s.id))?;
        check_unique_ids("variable", snapshot.variables.iter().map(|v| v.id))?;

        let max_id = [
            snapshot.species.iter().map(|s| s.id).max(),
            snapshot.trees.iter().map(|t| t.id).max(),
            snapshot.services.iter().map(|s| s.id).max(),
            snapshot.variables.iter().map(|v| v.id).max(),
        ]
        .into_iter()
        .flatten()
        .max()
        .unwrap_or(0);
        let mut registry = Registry::new();
        registry.next_id = max_id + 1;

        for mut species in snapshot.species {
            if species.id == 0 {
                species.id = registry.allocate_id();
            }
            registry.species.push(species);
        }

        for mut tree in snapshot.trees {
            check_biometrics(&tree)?;
            if tree.id == 0 {
                tree.id = registry.allocate_id();
            }
            if registry.trees.values().any(|t| t.plate_number == tree.plate_number) {
                return Err(RegistryError::DuplicatePlate(tree.plate_number));
            }
            registry.trees.insert(tree.id, tree);
        }

        for mut variable in snapshot.variables {
            if registry.variable(&variable.code).is_some() {
                return Err(RegistryError::DuplicateCode(variable.code));
            }
            if variable.id == 0 {
                variable.id = registry.allocate_id();
            }
            variable.default_value = match variable.default_value.take() {
                None => None,
                Some(value) => Some(
                    value
                        .clone()
                        .conform(variable.data_type)
                        .ok_or_else(|| mismatch(variable.data_type, &value))?,
                ),
            };
            registry.variables.push(variable);
        }

        for row in snapshot.species_defaults {
            if !registry.species.iter().any(|s| s.id == row.species_id) {
                return Err(RegistryError::UnknownSpecies(row.species_id));
            }
            let data_type = registry
                .variables
                .iter()
                .find(|v| v.id == row.variable_id)
                .map(|v| v.data_type)
                .ok_or_else(|| RegistryError::UnknownVariable(row.variable_id.to_string()))?;
            let value = match row.value {
                None => None,
                Some(value) => Some(
                    value
                        .clone()
                        .conform(data_type)
                        .ok_or_else(|| mismatch(data_type, &value))?,
                ),
            };
            registry
                .species_defaults
                .insert((row.species_id, row.variable_id), value);
        }

        for mut service in snapshot.services {
            if registry.service(&service.code).is_some() {
                return Err(RegistryError::DuplicateCode(service.code));
            }
            if service.id == 0 {
                service.id = registry.allocate_id();
            }
            if let Err(err) = registry.check_formula(&service) {
                tracing::warn!("Seeded service {} has an invalid formula: {}", service.code, err);
            }
            registry.services.push(service);
        }

        tracing::info!(
            "Registry ready: {} trees, {} species, {} services, {} variables, {} species defaults",
            registry.trees.len(),
            registry.species.len(),
            registry.services.len(),
            registry.variables.len(),
            registry.species_defaults.len()
        );
        Ok(registry)
    }

    /// Export the current rows in seed format
    pub fn to_snapshot(&self) -> RegistrySnapshot {
        let mut species_defaults: Vec<SpeciesVariableDefault> = self
            .species_defaults
            .iter()
            .map(|(&(species_id, variable_id), value)| SpeciesVariableDefault {
                species_id,
                variable_id,
                value: value.clone(),
            })
            .collect();
        species_defaults.sort_by_key(|row| (row.species_id, row.variable_id));

        RegistrySnapshot {
            species: self.species.clone(),
            trees: self.trees.values().cloned().collect(),
            services: self.services.clone(),
            variables: self.variables.clone(),
            species_defaults,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // ------------------------------------------------------------------
    // Species
    // ------------------------------------------------------------------

    pub fn add_species(&mut self, mut species: Species) -> SpeciesId {
        species.id = self.allocate_id();
        let id = species.id;
        self.species.push(species);
        id
    }

    pub fn species(&self, id: SpeciesId) -> Option<&Species> {
        self.species.iter().find(|s| s.id == id)
    }

    /// Species a tree belongs to: scientific name match first, then common name
    pub fn species_for_tree(&self, tree: &Tree) -> Option<&Species> {
        let scientific = tree.scientific_name.trim();
        if !scientific.is_empty() {
            if let Some(species) = self
                .species
                .iter()
                .find(|s| s.scientific_name.trim().eq_ignore_ascii_case(scientific))
            {
                return Some(species);
            }
        }
        self.species.iter().find(|s| s.matches(tree))
    }

    // ------------------------------------------------------------------
    // Trees
    // ------------------------------------------------------------------

    pub fn insert_tree(&mut self, mut tree: Tree) -> Result<TreeId, RegistryError> {
        check_biometrics(&tree)?;
        if self.trees.values().any(|t| t.plate_number == tree.plate_number) {
            return Err(RegistryError::DuplicatePlate(tree.plate_number));
        }
        tree.id = self.allocate_id();
        let id = tree.id;
        tracing::debug!("Registered tree {} (plate {})", id, tree.plate_number);
        self.trees.insert(id, tree);
        Ok(id)
    }

    pub fn tree(&self, id: TreeId) -> Option<&Tree> {
        self.trees.get(&id)
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }

    /// Trees matching `filter`, ordered by id
    pub fn find_trees(&self, filter: &TreeFilter) -> Vec<&Tree> {
        self.trees.values().filter(|t| filter.matches(t)).collect()
    }

    // ------------------------------------------------------------------
    // Services
    // ------------------------------------------------------------------

    /// All services in listing order (display order, then name)
    pub fn services(&self) -> Vec<EcosystemServiceConfig> {
        let mut services = self.services.clone();
        order_services(&mut services);
        services
    }

    pub fn service(&self, code: &str) -> Option<&EcosystemServiceConfig> {
        self.services.iter().find(|s| s.code == code)
    }

    /// First service whose formula resolves against the current variables
    /// but would not against `variables`
    fn dependent_service(&self, variables: &[TreeVariable]) -> Option<&EcosystemServiceConfig> {
        self.services.iter().find(|service| {
            let resolves = |vars: &[TreeVariable]| {
                check_identifiers(&service.formula, known_names(&service.coefficients, vars)).is_ok()
            };
            resolves(&self.variables) && !resolves(variables)
        })
    }

    fn ensure_unreferenced(&self, code: &str, variables: &[TreeVariable]) -> Result<(), RegistryError> {
        match self.dependent_service(variables) {
            Some(service) => Err(RegistryError::VariableInUse {
                variable: code.to_string(),
                service: service.code.clone(),
            }),
            None => Ok(()),
        }
    }

    fn check_formula(&self, service: &EcosystemServiceConfig) -> Result<(), RegistryError> {
        check_identifiers(
            &service.formula,
            known_names(&service.coefficients, &self.variables),
        )
        .map(|_| ())
        .map_err(|source| RegistryError::InvalidFormula {
            code: service.code.clone(),
            source,
        })
    }

    pub fn create_service(
        &mut self,
        mut service: EcosystemServiceConfig,
    ) -> Result<&EcosystemServiceConfig, RegistryError> {
        if self.service(&service.code).is_some() {
            return Err(RegistryError::DuplicateCode(service.code));
        }
        check_coefficients(&service.coefficients)?;
        self.check_formula(&service)?;

        service.id = self.allocate_id();
        tracing::info!("Created service {} ({})", service.code, service.name);
        self.services.push(service);
        Ok(&self.services[self.services.len() - 1])
    }

    /// Replace the service stored under `code`. The replacement may carry a
    /// new code as long as it is not taken by another service.
    pub fn update_service(
        &mut self,
        code: &str,
        mut service: EcosystemServiceConfig,
    ) -> Result<&EcosystemServiceConfig, RegistryError> {
        let idx = self
            .services
            .iter()
            .position(|s| s.code == code)
            .ok_or_else(|| RegistryError::UnknownService(code.to_string()))?;
        if service.code != code && self.service(&service.code).is_some() {
            return Err(RegistryError::DuplicateCode(service.code));
        }
        check_coefficients(&service.coefficients)?;
        self.check_formula(&service)?;

        service.id = self.services[idx].id;
        if service.created_by.is_none() {
            service.created_by = self.services[idx].created_by.clone();
        }
        tracing::info!("Updated service {}", service.code);
        self.services[idx] = service;
        Ok(&self.services[idx])
    }

    pub fn delete_service(&mut self, code: &str) -> Result<EcosystemServiceConfig, RegistryError> {
        let idx = self
            .services
            .iter()
            .position(|s| s.code == code)
            .ok_or_else(|| RegistryError::UnknownService(code.to_string()))?;
        tracing::info!("Deleted service {}", code);
        Ok(self.services.remove(idx))
    }

    // ------------------------------------------------------------------
    // Custom variables
    // ------------------------------------------------------------------

    /// All variables ordered by name
    pub fn variables(&self) -> Vec<&TreeVariable> {
        let mut variables: Vec<&TreeVariable> = self.variables.iter().collect();
        variables.sort_by(|a, b| a.name.cmp(&b.name));
        variables
    }

    pub fn variable(&self, code: &str) -> Option<&TreeVariable> {
        self.variables.iter().find(|v| v.code == code)
    }

    fn build_variable(input: VariableInput) -> Result<TreeVariable, RegistryError> {
        if !is_identifier(&input.code) {
            return Err(RegistryError::InvalidCode(input.code));
        }
        let default_value = parse_typed(input.data_type, &input.default_value)?;
        Ok(TreeVariable {
            id: 0,
            name: input.name,
            code: input.code,
            data_type: input.data_type,
            unit: input.unit,
            description: input.description,
            default_value,
            active: input.active,
        })
    }

    pub fn create_variable(&mut self, input: VariableInput) -> Result<&TreeVariable, RegistryError> {
        if self.variable(&input.code).is_some() {
            return Err(RegistryError::DuplicateCode(input.code));
        }
        let mut variable = Self::build_variable(input)?;
        variable.id = self.allocate_id();
        tracing::info!("Created variable {} ({:?})", variable.code, variable.data_type);
        self.variables.push(variable);
        Ok(&self.variables[self.variables.len() - 1])
    }

    /// Replace the variable stored under `code`.
    ///
    /// Renaming or deactivating a variable that a service formula uses is
    /// refused. When the declared type changes, species overrides that no
    /// longer fit the new type are dropped.
    pub fn update_variable(
        &mut self,
        code: &str,
        input: VariableInput,
    ) -> Result<&TreeVariable, RegistryError> {
        let idx = self
            .variables
            .iter()
            .position(|v| v.code == code)
            .ok_or_else(|| RegistryError::UnknownVariable(code.to_string()))?;
        if input.code != code && self.variable(&input.code).is_some() {
            return Err(RegistryError::DuplicateCode(input.code));
        }
        let mut variable = Self::build_variable(input)?;
        variable.id = self.variables[idx].id;

        let mut after = self.variables.clone();
        after[idx] = variable.clone();
        self.ensure_unreferenced(code, &after)?;

        if variable.data_type != self.variables[idx].data_type {
            let id = variable.id;
            let data_type = variable.data_type;
            let before = self.species_defaults.len();
            self.species_defaults.retain(|&(_, variable_id), value| {
                if variable_id != id {
                    return true;
                }
                match value.take() {
                    None => true,
                    Some(v) => match v.conform(data_type) {
                        Some(conformed) => {
                            *value = Some(conformed);
                            true
                        }
                        None => false,
                    },
                }
            });
            let dropped = before - self.species_defaults.len();
            if dropped > 0 {
                tracing::warn!(
                    "Variable {} changed type; dropped {} species overrides",
                    variable.code, dropped
                );
            }
        }

        tracing::info!("Updated variable {}", variable.code);
        self.variables[idx] = variable;
        Ok(&self.variables[idx])
    }

    /// Delete a variable together with its species overrides. Refused while
    /// a service formula uses it.
    pub fn delete_variable(&mut self, code: &str) -> Result<TreeVariable, RegistryError> {
        let idx = self
            .variables
            .iter()
            .position(|v| v.code == code)
            .ok_or_else(|| RegistryError::UnknownVariable(code.to_string()))?;
        let mut after = self.variables.clone();
        after.remove(idx);
        self.ensure_unreferenced(code, &after)?;
        let variable = self.variables.remove(idx);
        self.species_defaults
            .retain(|&(_, variable_id), _| variable_id != variable.id);
        tracing::info!("Deleted variable {}", variable.code);
        Ok(variable)
    }

    // ------------------------------------------------------------------
    // Species overrides
    // ------------------------------------------------------------------

    /// Upsert the override of variable `code` for `species_id`; `raw` is
    /// parsed against the variable's type (empty → null)
    pub fn set_species_default(
        &mut self,
        species_id: SpeciesId,
        code: &str,
        raw: &str,
    ) -> Result<UpsertOutcome, RegistryError> {
        if self.species(species_id).is_none() {
            return Err(RegistryError::UnknownSpecies(species_id));
        }
        let (variable_id, data_type) = self
            .variable(code)
            .map(|v| (v.id, v.data_type))
            .ok_or_else(|| RegistryError::UnknownVariable(code.to_string()))?;
        let value = parse_typed(data_type, raw)?;

        let outcome = match self.species_defaults.insert((species_id, variable_id), value) {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Created,
        };
        tracing::debug!("Species {} override for {}: {:?}", species_id, code, outcome);
        Ok(outcome)
    }

    /// Returns whether an override existed
    pub fn remove_species_default(
        &mut self,
        species_id: SpeciesId,
        code: &str,
    ) -> Result<bool, RegistryError> {
        let variable_id = self
            .variable(code)
            .map(|v| v.id)
            .ok_or_else(|| RegistryError::UnknownVariable(code.to_string()))?;
        Ok(self.species_defaults.remove(&(species_id, variable_id)).is_some())
    }

    /// Overrides stored for one species
    pub fn species_defaults_for(&self, species_id: SpeciesId) -> SpeciesDefaults {
        self.species_defaults
            .iter()
            .filter(|((species, _), _)| *species == species_id)
            .map(|(&(_, variable_id), value)| (variable_id, value.clone()))
            .collect()
    }

    // ------------------------------------------------------------------
    // Evaluation snapshots
    // ------------------------------------------------------------------

    fn snapshot_of(&self, tree: &Tree, services: &[EcosystemServiceConfig]) -> TreeSnapshot {
        let species = self.species_for_tree(tree);
        TreeSnapshot {
            tree: tree.clone(),
            species_id: species.map(|s| s.id),
            species_name: species.map(|s| s.scientific_name.clone()),
            services: services.to_vec(),
            variables: self.variables.clone(),
            species_defaults: species
                .map(|s| self.species_defaults_for(s.id))
                .unwrap_or_default(),
        }
    }

    fn active_services(&self) -> Vec<EcosystemServiceConfig> {
        self.services.iter().filter(|s| s.active).cloned().collect()
    }

    /// Everything needed to evaluate one tree, detached from the registry
    pub fn snapshot_for_tree(&self, id: TreeId) -> Option<TreeSnapshot> {
        let tree = self.trees.get(&id)?;
        Some(self.snapshot_of(tree, &self.active_services()))
    }

    pub fn all_snapshots(&self) -> Vec<TreeSnapshot> {
        let services = self.active_services();
        self.trees
            .values()
            .map(|tree| self.snapshot_of(tree, &services))
            .collect()
    }
}
