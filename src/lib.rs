//! Habitas Ecosystem Services
//!
//! Evaluates manager-authored ecosystem-service formulas for cataloged urban
//! trees and aggregates the results for the tree detail view.
//!
//! Layout, leaf modules first:
//! - `formula/`: sandboxed arithmetic (lexer, parser, evaluator)
//! - `utils/`: biomass estimator, typed write-time parsing, display rounding
//! - `data`: registry row types and the JSON seed format
//! - `services/`: variable resolution, context building, aggregation
//! - `registry`: in-memory rows with write-time validation
//! - `workflow`: report and notification review status machines
//! - `config`: server settings from the environment
//! - `api_server`: axum router (feature `api`)

pub mod formula;
pub mod utils;
pub mod data;
pub mod services;
pub mod registry;
pub mod workflow;
pub mod config;

#[cfg(feature = "api")]
pub mod api_server;

// Re-export commonly used types
pub use formula::{check_identifiers, evaluate, ErrorMarker, Formula, FormulaContext, FormulaError};
pub use utils::{estimate_biomass, parse_typed, round_display, TypeCoercionError};
pub use data::{
    Biometrics, DataType, EcosystemServiceConfig, Origin, RegistrySnapshot, ServiceCategory,
    Species, SpeciesVariableDefault, Tree, TreeVariable, VariableValue,
};
pub use services::{
    aggregate_catalog, aggregate_tree, build_tree_detail, validate_formula, CatalogSummary,
    FormulaVerdict, ServiceSummary, TreeDetail, TreeServiceReport, TreeSnapshot,
};
pub use registry::{Registry, RegistryError, TreeFilter, UpsertOutcome, VariableInput};
pub use workflow::{
    list_notificacoes, Laudo, LaudoStatus, Notificacao, NotificacaoFilter, NotificacaoStatus, Role, WorkflowError,
};
pub use config::ServerConfig;

#[cfg(feature = "api")]
pub use api_server::{create_router, AppState};
