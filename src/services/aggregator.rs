//! Service Aggregator
//!
//! Runs every active service formula for a tree and assembles the summary
//! shown in the tree detail panel. A failing service is reported in place
//! and never aborts the rest of the tree.

use rayon::prelude::*;
use serde::Serialize;

use crate::data::{EcosystemServiceConfig, ServiceCategory, TreeId};
use crate::formula::{ErrorMarker, Formula, FormulaError};

use super::context::tree_context;
use super::TreeSnapshot;

/// Per-service result for one tree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceSummary {
    pub code: String,
    pub name: String,
    pub category: ServiceCategory,
    pub unit: String,
    /// Physical-unit result at full precision; `None` when unavailable
    pub result: Option<f64>,
    pub monetary_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorMarker>,
}

impl ServiceSummary {
    pub fn is_available(&self) -> bool {
        self.error.is_none()
    }
}

/// All services for one tree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeServiceReport {
    pub tree_id: TreeId,
    pub services: Vec<ServiceSummary>,
    /// Sum over successfully evaluated services only
    pub total_monetary_value: f64,
    pub failed: usize,
}

/// Sort by display order, then name (the configuration listing order)
pub fn order_services(services: &mut [EcosystemServiceConfig]) {
    services.sort_by(|a, b| {
        a.display_order
            .cmp(&b.display_order)
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Physical result and monetary value for one service
pub fn evaluate_service(
    service: &EcosystemServiceConfig,
    snapshot: &TreeSnapshot,
) -> Result<(f64, f64), FormulaError> {
    let formula = Formula::parse(&service.formula)?;
    let ctx = tree_context(
        snapshot.tree.biometrics(),
        &service.coefficients,
        &snapshot.variables,
        &snapshot.species_defaults,
    );
    let result = formula.evaluate(&ctx)?;
    let monetary = result * service.unit_monetary_value;
    if !monetary.is_finite() {
        return Err(FormulaError::NonFiniteResult);
    }
    Ok((result, monetary))
}

/// Evaluate every active service in `snapshot` for its tree
pub fn aggregate_tree(snapshot: &TreeSnapshot) -> TreeServiceReport {
    let mut services: Vec<EcosystemServiceConfig> = snapshot
        .services
        .iter()
        .filter(|s| s.active)
        .cloned()
        .collect();
    order_services(&mut services);

    let mut summaries = Vec::with_capacity(services.len());
    let mut total = 0.0;
    let mut failed = 0;

    for service in &services {
        let summary = match evaluate_service(service, snapshot) {
            Ok((result, monetary)) => {
                total += monetary;
                ServiceSummary {
                    code: service.code.clone(),
                    name: service.name.clone(),
                    category: service.category,
                    unit: service.unit.clone(),
                    result: Some(result),
                    monetary_value: Some(monetary),
                    error: None,
                }
            }
            Err(err) => {
                tracing::warn!(
                    "Service {} unavailable for tree {}: {}",
                    service.code, snapshot.tree.id, err
                );
                failed += 1;
                ServiceSummary {
                    code: service.code.clone(),
                    name: service.name.clone(),
                    category: service.category,
                    unit: service.unit.clone(),
                    result: None,
                    monetary_value: None,
                    error: Some(ErrorMarker::from(&err)),
                }
            }
        };
        summaries.push(summary);
    }

    tracing::debug!(
        "Aggregated {} services for tree {} ({} failed)",
        summaries.len(), snapshot.tree.id, failed
    );

    TreeServiceReport {
        tree_id: snapshot.tree.id,
        services: summaries,
        total_monetary_value: total,
        failed,
    }
}

/// Catalog-wide totals for one service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceTotal {
    pub code: String,
    pub name: String,
    pub unit: String,
    pub total_result: f64,
    pub total_monetary_value: f64,
    pub evaluated: usize,
    pub failures: usize,
}

/// Totals across many trees
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogSummary {
    pub trees: usize,
    pub services: Vec<ServiceTotal>,
    pub total_monetary_value: f64,
}

/// Aggregate many trees in parallel (Rayon) and fold per-service totals.
///
/// Service order follows the first report; every snapshot is expected to
/// carry the same service list.
pub fn aggregate_catalog(snapshots: &[TreeSnapshot]) -> CatalogSummary {
    let reports: Vec<TreeServiceReport> = snapshots.par_iter().map(aggregate_tree).collect();

    let mut totals: Vec<ServiceTotal> = Vec::new();
    for report in &reports {
        for summary in &report.services {
            let idx = match totals.iter().position(|t| t.code == summary.code) {
                Some(idx) => idx,
                None => {
                    totals.push(ServiceTotal {
                        code: summary.code.clone(),
                        name: summary.name.clone(),
                        unit: summary.unit.clone(),
                        total_result: 0.0,
                        total_monetary_value: 0.0,
                        evaluated: 0,
                        failures: 0,
                    });
                    totals.len() - 1
                }
            };
            let total = &mut totals[idx];
            match (summary.result, summary.monetary_value) {
                (Some(result), Some(monetary)) => {
                    total.total_result += result;
                    total.total_monetary_value += monetary;
                    total.evaluated += 1;
                }
                _ => total.failures += 1,
            }
        }
    }

    let total_monetary_value = reports.iter().map(|r| r.total_monetary_value).sum();
    tracing::info!(
        "Aggregated {} trees across {} services",
        reports.len(), totals.len()
    );

    CatalogSummary {
        trees: reports.len(),
        services: totals,
        total_monetary_value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Origin, Tree};
    use crate::services::SpeciesDefaults;
    use approx::assert_relative_eq;
    use std::collections::BTreeMap;

    fn tree(id: u64, dap: f64, height: f64) -> Tree {
        Tree {
            id,
            plate_number: format!("{:03}", id),
            common_name: "Ipê".into(),
            scientific_name: "Tabebuia".into(),
            dap,
            height,
            latitude: 0.0,
            longitude: 0.0,
            reports: vec![],
            images: vec![],
            origin: Origin::Native,
            planted_by: String::new(),
        }
    }

    fn service(code: &str, name: &str, order: i32, formula: &str, unit_value: f64) -> EcosystemServiceConfig {
        EcosystemServiceConfig {
            id: 0,
            name: name.into(),
            code: code.into(),
            description: String::new(),
            category: ServiceCategory::Carbon,
            formula: formula.into(),
            coefficients: BTreeMap::new(),
            unit_monetary_value: unit_value,
            unit: "kg".into(),
            reference: String::new(),
            active: true,
            display_order: order,
            created_by: None,
        }
    }

    fn snapshot(tree: Tree, services: Vec<EcosystemServiceConfig>) -> TreeSnapshot {
        TreeSnapshot {
            tree,
            species_id: None,
            species_name: None,
            services,
            variables: vec![],
            species_defaults: SpeciesDefaults::default(),
        }
    }

    #[test]
    fn test_display_order_respected() {
        let snap = snapshot(
            tree(1, 10.0, 5.0),
            vec![
                service("b", "Second", 2, "dap", 1.0),
                service("a", "First", 1, "altura", 1.0),
            ],
        );
        let report = aggregate_tree(&snap);
        let codes: Vec<&str> = report.services.iter().map(|s| s.code.as_str()).collect();
        assert_eq!(codes, vec!["a", "b"]);
    }

    #[test]
    fn test_name_breaks_ties() {
        let snap = snapshot(
            tree(1, 10.0, 5.0),
            vec![
                service("z", "Zeta", 1, "dap", 1.0),
                service("y", "Alpha", 1, "dap", 1.0),
            ],
        );
        let report = aggregate_tree(&snap);
        assert_eq!(report.services[0].name, "Alpha");
    }

    #[test]
    fn test_failed_service_does_not_abort() {
        let snap = snapshot(
            tree(1, 10.0, 5.0),
            vec![
                service("ok", "Ok", 1, "dap * 2", 3.0),
                service("bad", "Bad", 2, "1/0", 3.0),
                service("ok2", "Ok2", 3, "altura", 2.0),
            ],
        );
        let report = aggregate_tree(&snap);
        assert_eq!(report.services.len(), 3);
        assert_eq!(report.failed, 1);
        assert!(!report.services[1].is_available());
        assert_eq!(report.services[1].error.as_ref().unwrap().kind, "MathEvaluationError");
        assert_eq!(report.services[1].result, None);
        // 20*3 + 5*2
        assert_relative_eq!(report.total_monetary_value, 70.0);
    }

    #[test]
    fn test_inactive_service_skipped() {
        let mut off = service("off", "Off", 1, "dap", 1.0);
        off.active = false;
        let snap = snapshot(tree(1, 10.0, 5.0), vec![off, service("on", "On", 2, "dap", 1.0)]);
        let report = aggregate_tree(&snap);
        assert_eq!(report.services.len(), 1);
        assert_eq!(report.services[0].code, "on");
    }

    #[test]
    fn test_monetary_overflow_is_failure() {
        let snap = snapshot(tree(1, 10.0, 5.0), vec![service("x", "X", 1, "1e300", 1e300)]);
        let report = aggregate_tree(&snap);
        assert_eq!(report.failed, 1);
        assert_eq!(report.services[0].error.as_ref().unwrap().kind, "NonFiniteResultError");
    }

    #[test]
    fn test_catalog_totals() {
        let services = vec![
            service("d", "Diameter", 1, "dap", 2.0),
            service("h", "Height", 2, "ln(altura - 5)", 1.0),
        ];
        let snaps = vec![
            snapshot(tree(1, 10.0, 5.0), services.clone()),
            snapshot(tree(2, 20.0, 6.0), services.clone()),
        ];
        let summary = aggregate_catalog(&snaps);
        assert_eq!(summary.trees, 2);
        assert_eq!(summary.services[0].code, "d");
        assert_relative_eq!(summary.services[0].total_result, 30.0);
        assert_eq!(summary.services[0].evaluated, 2);
        // ln(0) fails for tree 1, ln(1) = 0 for tree 2
        assert_eq!(summary.services[1].failures, 1);
        assert_eq!(summary.services[1].evaluated, 1);
        assert_relative_eq!(summary.total_monetary_value, 60.0);
    }
}
