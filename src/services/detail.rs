//! Tree detail view
//!
//! Identity, biometrics, resolved custom variables and the service summary
//! for one tree, in the shape the map's detail panel consumes.

use serde::Serialize;

use crate::data::{Origin, TreeId, VariableValue};

use super::aggregator::{aggregate_tree, ServiceSummary};
use super::resolver::{resolve_variable, ValueSource};
use super::TreeSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableReading {
    pub code: String,
    pub name: String,
    pub unit: String,
    pub value: Option<VariableValue>,
    pub source: ValueSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeDetail {
    pub id: TreeId,
    pub plate_number: String,
    pub common_name: String,
    pub scientific_name: String,
    pub species: Option<String>,
    pub dap: f64,
    pub height: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub origin: Origin,
    pub planted_by: String,
    pub images: Vec<String>,
    pub reports: Vec<String>,
    pub variables: Vec<VariableReading>,
    pub services: Vec<ServiceSummary>,
    pub total_monetary_value: f64,
}

pub fn build_tree_detail(snapshot: &TreeSnapshot) -> TreeDetail {
    let report = aggregate_tree(snapshot);
    let tree = &snapshot.tree;

    let variables = snapshot
        .variables
        .iter()
        .filter_map(|variable| {
            resolve_variable(variable, &snapshot.species_defaults).map(|resolved| VariableReading {
                code: variable.code.clone(),
                name: variable.name.clone(),
                unit: variable.unit.clone(),
                value: resolved.value.cloned(),
                source: resolved.source,
            })
        })
        .collect();

    TreeDetail {
        id: tree.id,
        plate_number: tree.plate_number.clone(),
        common_name: tree.common_name.clone(),
        scientific_name: tree.scientific_name.clone(),
        species: snapshot.species_name.clone(),
        dap: tree.dap,
        height: tree.height,
        latitude: tree.latitude,
        longitude: tree.longitude,
        origin: tree.origin,
        planted_by: tree.planted_by.clone(),
        images: tree.images.clone(),
        reports: tree.reports.clone(),
        variables,
        services: report.services,
        total_monetary_value: report.total_monetary_value,
    }
}
