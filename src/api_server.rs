// Axum API Server Module
//
// Purpose: JSON API for the tree map and the service configuration screens.
// Registry rows live behind an async RwLock; handlers copy what they need
// under the read lock and evaluate formulas after releasing it.

#[cfg(feature = "api")]
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post, put},
    Router,
};

#[cfg(feature = "api")]
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::TraceLayer,
};

#[cfg(feature = "api")]
use moka::future::Cache;

#[cfg(feature = "api")]
use serde::Deserialize;

#[cfg(feature = "api")]
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "api")]
use std::sync::Arc;

#[cfg(feature = "api")]
use tokio::sync::RwLock;

#[cfg(feature = "api")]
use crate::config::ServerConfig;

#[cfg(feature = "api")]
use crate::data::{
    Biometrics, EcosystemServiceConfig, RegistrySnapshot, ServiceCategory, SpeciesId, TreeId, TreeVariable,
};

#[cfg(feature = "api")]
use crate::registry::{Registry, RegistryError, TreeFilter, UpsertOutcome, VariableInput};

#[cfg(feature = "api")]
use crate::services::{aggregate_catalog, build_tree_detail, parse_coefficients, validate_formula};

// ============================================================================
// Application State
// ============================================================================

#[cfg(feature = "api")]
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RwLock<Registry>>,
    /// Serialized tree detail responses keyed by (tree, registry generation)
    pub cache: Cache<(TreeId, u64), serde_json::Value>,
    /// Bumped under the write lock by every registry write
    generation: Arc<AtomicU64>,
    pub sample: Biometrics,
}

#[cfg(feature = "api")]
impl AppState {
    pub fn new(registry: Registry, config: &ServerConfig) -> Self {
        tracing::info!("Initializing Moka cache...");
        let cache = Cache::builder()
            .max_capacity(config.cache_capacity)
            .time_to_live(config.cache_ttl)
            .build();

        Self {
            registry: Arc::new(RwLock::new(registry)),
            cache,
            generation: Arc::new(AtomicU64::new(0)),
            sample: config.sample,
        }
    }

    /// Registry generation; details cached under an older one are never served
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Apply one registry write. The generation moves before the write lock
    /// is released, so a detail computed from the previous rows can only be
    /// cached under the previous generation.
    async fn write<T>(
        &self,
        apply: impl FnOnce(&mut Registry) -> Result<T, RegistryError>,
    ) -> Result<T, AppError> {
        let mut registry = self.registry.write().await;
        let result = apply(&mut registry)?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        drop(registry);
        self.cache.invalidate_all();
        Ok(result)
    }

    /// Load the seed registry named by `config`
    pub fn load(config: &ServerConfig) -> anyhow::Result<Self> {
        tracing::info!("Loading registry from {:?}...", config.registry_file);
        let snapshot = RegistrySnapshot::load(&config.registry_file)?;
        let registry = Registry::from_snapshot(snapshot)?;
        Ok(Self::new(registry, config))
    }
}

// ============================================================================
// Router
// ============================================================================

#[cfg(feature = "api")]
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))

        // Tree map
        .route("/api/trees", get(list_trees))
        .route("/api/trees/:id", get(get_tree))

        // Formula editor
        .route("/api/formulas/validate", post(check_formula))

        // Service configuration
        .route("/api/services", get(list_services).post(create_service))
        .route("/api/services/summary", get(catalog_summary))
        .route("/api/services/:codigo", put(update_service).delete(delete_service))

        // Custom variables and species overrides
        .route("/api/variables", get(list_variables).post(create_variable))
        .route("/api/variables/:codigo", put(update_variable).delete(delete_variable))
        .route(
            "/api/variables/:codigo/species/:species_id",
            put(set_species_default).delete(remove_species_default),
        )

        // Middleware (applied in reverse order)
        .layer(CompressionLayer::new()) // gzip + brotli compression
        .layer(CorsLayer::permissive()) // Allow all origins
        .layer(TraceLayer::new_for_http()) // Request logging
        .with_state(state)
}

// ============================================================================
// Endpoint Handlers
// ============================================================================

#[cfg(feature = "api")]
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

#[cfg(feature = "api")]
async fn list_trees(
    State(state): State<AppState>,
    Query(filter): Query<TreeFilter>,
) -> Result<Json<serde_json::Value>, AppError> {
    let registry = state.registry.read().await;
    let trees = registry.find_trees(&filter);
    tracing::debug!("Tree search {:?} returned {} trees", filter, trees.len());

    Ok(Json(serde_json::json!({
        "rows": trees.len(),
        "data": trees,
    })))
}

#[cfg(feature = "api")]
async fn get_tree(
    State(state): State<AppState>,
    Path(id): Path<TreeId>,
) -> Result<Json<serde_json::Value>, AppError> {
    if let Some(cached) = state.cache.get(&(id, state.generation())).await {
        tracing::debug!("Cache hit for tree {}", id);
        return Ok(Json(cached));
    }

    // Generation read under the same lock as the rows it describes
    let (generation, snapshot) = {
        let registry = state.registry.read().await;
        let snapshot = registry
            .snapshot_for_tree(id)
            .ok_or_else(|| AppError::from(RegistryError::UnknownTree(id)))?;
        (state.generation(), snapshot)
    };

    let detail = build_tree_detail(&snapshot);
    let result = serde_json::to_value(&detail).map_err(|e| AppError::Internal(e.to_string()))?;

    state.cache.insert((id, generation), result.clone()).await;
    Ok(Json(result))
}

#[cfg(feature = "api")]
#[derive(Debug, Deserialize)]
struct ValidateRequest {
    formula: String,
    /// Object or JSON text; missing means no coefficients
    #[serde(default, alias = "coefficients")]
    coeficientes: serde_json::Value,
}

#[cfg(feature = "api")]
async fn check_formula(
    State(state): State<AppState>,
    Json(request): Json<ValidateRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let coefficients = parse_coefficients(&request.coeficientes).map_err(AppError::Unprocessable)?;

    let variables: Vec<_> = {
        let registry = state.registry.read().await;
        registry.variables().into_iter().cloned().collect()
    };

    let verdict = validate_formula(&request.formula, &coefficients, &variables, state.sample);
    let result = serde_json::to_value(&verdict).map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(result))
}

#[cfg(feature = "api")]
async fn list_services(State(state): State<AppState>) -> Json<Vec<EcosystemServiceConfig>> {
    Json(state.registry.read().await.services())
}

/// Service configuration form body
#[cfg(feature = "api")]
#[derive(Debug, Deserialize)]
struct ServiceRequest {
    name: String,
    code: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: ServiceCategory,
    formula: String,
    #[serde(default, alias = "coefficients")]
    coeficientes: serde_json::Value,
    #[serde(default)]
    unit_monetary_value: f64,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    reference: String,
    #[serde(default)]
    active: Option<bool>,
    #[serde(default)]
    display_order: i32,
    #[serde(default)]
    created_by: Option<String>,
}

#[cfg(feature = "api")]
impl ServiceRequest {
    fn into_config(self) -> Result<EcosystemServiceConfig, AppError> {
        let coefficients = parse_coefficients(&self.coeficientes).map_err(AppError::Unprocessable)?;
        if !self.unit_monetary_value.is_finite() {
            return Err(AppError::Unprocessable("unit_monetary_value must be finite".to_string()));
        }
        Ok(EcosystemServiceConfig {
            id: 0,
            name: self.name,
            code: self.code,
            description: self.description,
            category: self.category,
            formula: self.formula,
            coefficients,
            unit_monetary_value: self.unit_monetary_value,
            unit: self.unit.unwrap_or_else(|| "unidade".to_string()),
            reference: self.reference,
            active: self.active.unwrap_or(true),
            display_order: self.display_order,
            created_by: self.created_by,
        })
    }
}

#[cfg(feature = "api")]
async fn create_service(
    State(state): State<AppState>,
    Json(request): Json<ServiceRequest>,
) -> Result<impl IntoResponse, AppError> {
    let config = request.into_config()?;
    let created = state
        .write(|registry| registry.create_service(config).cloned())
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[cfg(feature = "api")]
async fn update_service(
    State(state): State<AppState>,
    Path(codigo): Path<String>,
    Json(request): Json<ServiceRequest>,
) -> Result<Json<EcosystemServiceConfig>, AppError> {
    let config = request.into_config()?;
    let updated = state
        .write(|registry| registry.update_service(&codigo, config).cloned())
        .await?;
    Ok(Json(updated))
}

#[cfg(feature = "api")]
async fn delete_service(
    State(state): State<AppState>,
    Path(codigo): Path<String>,
) -> Result<StatusCode, AppError> {
    state.write(|registry| registry.delete_service(&codigo)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Catalog-wide totals; evaluation runs on the blocking pool (Rayon inside)
#[cfg(feature = "api")]
async fn catalog_summary(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let snapshots = state.registry.read().await.all_snapshots();
    let summary = tokio::task::spawn_blocking(move || aggregate_catalog(&snapshots))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    let result = serde_json::to_value(&summary).map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(result))
}

#[cfg(feature = "api")]
async fn list_variables(State(state): State<AppState>) -> Json<serde_json::Value> {
    let registry = state.registry.read().await;
    Json(serde_json::json!(registry.variables()))
}

#[cfg(feature = "api")]
async fn create_variable(
    State(state): State<AppState>,
    Json(input): Json<VariableInput>,
) -> Result<impl IntoResponse, AppError> {
    let created = state
        .write(|registry| registry.create_variable(input).cloned())
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[cfg(feature = "api")]
async fn update_variable(
    State(state): State<AppState>,
    Path(codigo): Path<String>,
    Json(input): Json<VariableInput>,
) -> Result<Json<TreeVariable>, AppError> {
    let updated = state
        .write(|registry| registry.update_variable(&codigo, input).cloned())
        .await?;
    Ok(Json(updated))
}

#[cfg(feature = "api")]
async fn delete_variable(
    State(state): State<AppState>,
    Path(codigo): Path<String>,
) -> Result<StatusCode, AppError> {
    state.write(|registry| registry.delete_variable(&codigo)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(feature = "api")]
#[derive(Debug, Deserialize)]
struct SpeciesDefaultRequest {
    /// Raw form text, parsed against the variable's type
    #[serde(default, alias = "value")]
    valor: String,
}

#[cfg(feature = "api")]
async fn set_species_default(
    State(state): State<AppState>,
    Path((codigo, species_id)): Path<(String, SpeciesId)>,
    Json(request): Json<SpeciesDefaultRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .write(|registry| registry.set_species_default(species_id, &codigo, &request.valor))
        .await?;

    let status = match outcome {
        UpsertOutcome::Created => StatusCode::CREATED,
        UpsertOutcome::Updated => StatusCode::OK,
    };
    Ok((status, Json(serde_json::json!({ "outcome": outcome }))))
}

#[cfg(feature = "api")]
async fn remove_species_default(
    State(state): State<AppState>,
    Path((codigo, species_id)): Path<(String, SpeciesId)>,
) -> Result<StatusCode, AppError> {
    let removed = state
        .write(|registry| registry.remove_species_default(species_id, &codigo))
        .await?;
    if !removed {
        return Err(AppError::NotFound(format!(
            "no override of `{}` for species {}",
            codigo, species_id
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Error Handling
// ============================================================================

#[cfg(feature = "api")]
#[derive(Debug)]
enum AppError {
    NotFound(String),
    Conflict(String),
    Unprocessable(String),
    Internal(String),
}

#[cfg(feature = "api")]
impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        let message = err.to_string();
        match err {
            RegistryError::UnknownService(_)
            | RegistryError::UnknownVariable(_)
            | RegistryError::UnknownSpecies(_)
            | RegistryError::UnknownTree(_) => AppError::NotFound(message),
            RegistryError::DuplicateCode(_)
            | RegistryError::DuplicatePlate(_)
            | RegistryError::DuplicateId { .. }
            | RegistryError::VariableInUse { .. } => AppError::Conflict(message),
            RegistryError::InvalidCode(_)
            | RegistryError::InvalidFormula { .. }
            | RegistryError::InvalidCoefficient(_)
            | RegistryError::InvalidDefault(_)
            | RegistryError::InvalidBiometrics(_) => AppError::Unprocessable(message),
        }
    }
}

#[cfg(feature = "api")]
impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
