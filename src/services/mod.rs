//! Ecosystem-service computation
//!
//! Leaf first:
//! - `resolver`: effective custom-variable value for a tree
//! - `context`: bindings for one service formula
//! - `aggregator`: every active service for a tree, plus catalog totals
//! - `validation`: draft-formula verdicts for the editor
//! - `detail`: tree detail view

pub mod resolver;
pub mod context;
pub mod aggregator;
pub mod validation;
pub mod detail;

pub use resolver::{resolve_variable, Resolved, SpeciesDefaults, ValueSource};
pub use context::{known_names, sample_context, tree_context, FIXED_NAMES, PLACEHOLDER_VALUE};
pub use aggregator::{
    aggregate_catalog, aggregate_tree, evaluate_service, order_services, CatalogSummary,
    ServiceSummary, ServiceTotal, TreeServiceReport,
};
pub use validation::{parse_coefficients, validate_formula, FormulaVerdict, SAMPLE_BIOMETRICS};
pub use detail::{build_tree_detail, TreeDetail, VariableReading};

use crate::data::{EcosystemServiceConfig, SpeciesId, Tree, TreeVariable};

/// Everything one tree's evaluation reads, copied out of the registry so
/// evaluation runs against a consistent snapshot without holding locks
#[derive(Debug, Clone, PartialEq)]
pub struct TreeSnapshot {
    pub tree: Tree,
    pub species_id: Option<SpeciesId>,
    pub species_name: Option<String>,
    pub services: Vec<EcosystemServiceConfig>,
    pub variables: Vec<TreeVariable>,
    /// Overrides for this tree's species only
    pub species_defaults: SpeciesDefaults,
}
