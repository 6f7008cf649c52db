// API Integration Tests
//
// Purpose: Drive every endpoint through the router against an in-memory registry
// Run with: cargo test --features api --test api_integration_tests

#[cfg(feature = "api")]
mod api_tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use habitas_services::{create_router, AppState, Registry, RegistrySnapshot, ServerConfig};
    use serde_json::{json, Value};
    use tower::ServiceExt; // for oneshot

    const SEED: &str = r#"{
        "species": [
            {"id": 1, "scientific_name": "Handroanthus albus", "common_name": "Ipê-amarelo"},
            {"id": 2, "scientific_name": "Tipuana tipu", "common_name": "Tipuana"}
        ],
        "trees": [
            {"id": 10, "plate_number": "001", "common_name": "Ipê-amarelo", "scientific_name": "Handroanthus albus",
             "dap": 30.0, "height": 10.0, "latitude": -22.9, "longitude": -43.2,
             "reports": ["laudo-001.pdf"], "origin": "nativa", "planted_by": "Prefeitura"},
            {"id": 11, "plate_number": "002", "common_name": "Tipuana", "scientific_name": "Tipuana tipu",
             "dap": 55.0, "height": 16.0, "latitude": -22.91, "longitude": -43.21,
             "origin": "exotica", "planted_by": "Associação de moradores"}
        ],
        "variables": [
            {"id": 20, "name": "Densidade da madeira", "code": "densidade", "data_type": "FLOAT", "default_value": 0.6}
        ],
        "species_defaults": [
            {"species_id": 1, "variable_id": 20, "value": 0.9}
        ],
        "services": [
            {"id": 30, "name": "Carbono estocado", "code": "carbono", "category": "CARBON",
             "formula": "biomassa * 0.47 * 3.67", "unit_monetary_value": 100.0, "unit": "tCO2", "display_order": 1},
            {"id": 31, "name": "Massa seca", "code": "massa", "category": "OTHER",
             "formula": "dap * densidade", "unit_monetary_value": 2.0, "unit": "kg", "display_order": 2}
        ]
    }"#;

    // Helper: Create app state over the in-memory seed
    fn create_test_state() -> AppState {
        let snapshot: RegistrySnapshot = serde_json::from_str(SEED).expect("seed parses");
        let registry = Registry::from_snapshot(snapshot).expect("seed is consistent");
        AppState::new(registry, &ServerConfig::default())
    }

    // Helper: Create test app over the in-memory seed
    fn create_test_app() -> axum::Router {
        create_router(create_test_state())
    }

    // Helper: Parse JSON response
    async fn json_response(response: axum::response::Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read response body");
        serde_json::from_slice(&body).expect("Failed to parse JSON")
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn send(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    // =========================================================================
    // Section 1: Health Check
    // =========================================================================

    #[tokio::test]
    async fn test_health_check() {
        let app = create_test_app();
        let response = app.oneshot(get("/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_response(response).await;
        assert_eq!(json["status"], "healthy");
    }

    // =========================================================================
    // Section 2: Trees
    // =========================================================================

    #[tokio::test]
    async fn test_tree_filters() {
        let app = create_test_app();

        let response = app.clone().oneshot(get("/api/trees?origem=exotica")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_response(response).await;
        assert_eq!(json["rows"], 1);
        assert_eq!(json["data"][0]["plate_number"], "002");

        let response = app.clone().oneshot(get("/api/trees?laudo_only=true")).await.unwrap();
        let json = json_response(response).await;
        assert_eq!(json["rows"], 1);
        assert_eq!(json["data"][0]["plate_number"], "001");

        let response = app.clone().oneshot(get("/api/trees?dap_min=40&nome_popular=tip")).await.unwrap();
        let json = json_response(response).await;
        assert_eq!(json["rows"], 1);

        let response = app.oneshot(get("/api/trees?species=Tipuana")).await.unwrap();
        let json = json_response(response).await;
        assert_eq!(json["rows"], 1);
        assert_eq!(json["data"][0]["plate_number"], "002");
    }

    #[tokio::test]
    async fn test_blank_filters_mean_no_filter() {
        let app = create_test_app();

        let uri = "/api/trees?nome_popular=&nome_cientifico=&plantado_por=&species=&origem=\
                   &dap_min=&dap_max=&altura_min=&altura_max=&laudo_only=";
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_response(response).await;
        assert_eq!(json["rows"], 2);

        let response = app.clone().oneshot(get("/api/trees?laudo_only=false&dap_max=40")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_response(response).await;
        assert_eq!(json["rows"], 1);
        assert_eq!(json["data"][0]["plate_number"], "001");

        let response = app.oneshot(get("/api/trees?dap_min=grosso")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_tree_detail() {
        let app = create_test_app();
        let response = app.oneshot(get("/api/trees/10")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_response(response).await;
        assert_eq!(json["species"], "Handroanthus albus");
        assert_eq!(json["services"][0]["code"], "carbono");
        assert_eq!(json["services"][1]["code"], "massa");
        // species override 0.9 wins over the general default 0.6
        assert_eq!(json["services"][1]["result"].as_f64().unwrap(), 27.0);
        assert_eq!(json["variables"][0]["source"], "species_override");
        assert!(json["total_monetary_value"].as_f64().unwrap() > 54.0);
    }

    #[tokio::test]
    async fn test_unknown_tree_is_404() {
        let app = create_test_app();
        let response = app.oneshot(get("/api/trees/999")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = json_response(response).await;
        assert!(json["error"].as_str().unwrap().contains("999"));
    }

    #[tokio::test]
    async fn test_detail_cache_invalidated_on_write() {
        let app = create_test_app();

        let response = app.clone().oneshot(get("/api/trees/11")).await.unwrap();
        let before = json_response(response).await;
        assert_eq!(before["services"].as_array().unwrap().len(), 2);

        let body = json!({"name": "Água interceptada", "code": "agua", "formula": "altura * 2",
                          "unit_monetary_value": 1.0, "display_order": 3});
        let response = app.clone().oneshot(send("POST", "/api/services", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app.oneshot(get("/api/trees/11")).await.unwrap();
        let after = json_response(response).await;
        assert_eq!(after["services"].as_array().unwrap().len(), 3);
        assert_eq!(after["services"][2]["result"].as_f64().unwrap(), 32.0);
    }

    #[tokio::test]
    async fn test_detail_cached_before_write_is_not_served() {
        let state = create_test_state();
        let app = create_router(state.clone());
        let before = state.generation();

        let body = json!({"name": "Massa seca", "code": "massa", "formula": "dap * densidade * 2",
                          "unit_monetary_value": 2.0, "display_order": 2});
        let response = app.clone().oneshot(send("PUT", "/api/services/massa", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.generation() > before);

        // A reader that copied the rows before the write finishes after it
        state.cache.insert((10, before), json!({"stale": true})).await;

        let response = app.oneshot(get("/api/trees/10")).await.unwrap();
        let json = json_response(response).await;
        assert!(json["stale"].is_null());
        assert_eq!(json["services"][1]["result"].as_f64().unwrap(), 54.0);
    }

    // =========================================================================
    // Section 3: Formula validation
    // =========================================================================

    #[tokio::test]
    async fn test_validate_formula_success() {
        let app = create_test_app();
        let body = json!({"formula": "dap * 2 + coef_a", "coeficientes": "{\"coef_a\": 5}"});
        let response = app.oneshot(send("POST", "/api/formulas/validate", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_response(response).await;
        assert_eq!(json["valid"], true);
        assert_eq!(json["sample_result"].as_f64().unwrap(), 65.0);
    }

    #[tokio::test]
    async fn test_validate_formula_errors() {
        let app = create_test_app();

        let body = json!({"formula": "altura_secreta * 2", "coeficientes": {}});
        let response = app.clone().oneshot(send("POST", "/api/formulas/validate", body)).await.unwrap();
        let json = json_response(response).await;
        assert_eq!(json["valid"], false);
        assert_eq!(json["error_kind"], "UnknownVariableError");

        // Known variable gets a placeholder value
        let body = json!({"formula": "densidade * 10"});
        let response = app.clone().oneshot(send("POST", "/api/formulas/validate", body)).await.unwrap();
        let json = json_response(response).await;
        assert_eq!(json["sample_result"].as_f64().unwrap(), 10.0);

        let body = json!({"formula": "dap", "coeficientes": "not json"});
        let response = app.oneshot(send("POST", "/api/formulas/validate", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    // =========================================================================
    // Section 4: Service configuration
    // =========================================================================

    #[tokio::test]
    async fn test_service_listing_order() {
        let app = create_test_app();
        let response = app.oneshot(get("/api/services")).await.unwrap();
        let json = json_response(response).await;
        let codes: Vec<&str> = json.as_array().unwrap().iter().map(|s| s["code"].as_str().unwrap()).collect();
        assert_eq!(codes, vec!["carbono", "massa"]);
    }

    #[tokio::test]
    async fn test_service_write_rules() {
        let app = create_test_app();

        let body = json!({"name": "Dup", "code": "carbono", "formula": "dap"});
        let response = app.clone().oneshot(send("POST", "/api/services", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = json!({"name": "Bad", "code": "bad", "formula": "dap * fantasma"});
        let response = app.clone().oneshot(send("POST", "/api/services", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json = json_response(response).await;
        assert!(json["error"].as_str().unwrap().contains("fantasma"));

        let body = json!({"name": "Massa seca", "code": "massa", "formula": "dap * densidade * k",
                          "coeficientes": {"k": 2}, "display_order": 2});
        let response = app.clone().oneshot(send("PUT", "/api/services/massa", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_response(response).await;
        assert_eq!(json["coefficients"]["k"], 2.0);

        let response = app
            .clone()
            .oneshot(Request::builder().method("DELETE").uri("/api/services/massa").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(Request::builder().method("DELETE").uri("/api/services/massa").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_catalog_summary() {
        let app = create_test_app();
        let response = app.oneshot(get("/api/services/summary")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_response(response).await;
        assert_eq!(json["trees"], 2);
        assert_eq!(json["services"][1]["code"], "massa");
        // 30 * 0.9 + 55 * 0.6
        assert!((json["services"][1]["total_result"].as_f64().unwrap() - 60.0).abs() < 1e-9);
    }

    // =========================================================================
    // Section 5: Variables and species overrides
    // =========================================================================

    #[tokio::test]
    async fn test_create_variable_typed_default() {
        let app = create_test_app();

        let body = json!({"name": "Idade", "code": "idade", "data_type": "INTEGER", "default_value": "12.8"});
        let response = app.clone().oneshot(send("POST", "/api/variables", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = json_response(response).await;
        assert_eq!(json["default_value"], 12);

        let body = json!({"name": "Ruim", "code": "ruim", "data_type": "FLOAT", "default_value": "abc"});
        let response = app.clone().oneshot(send("POST", "/api/variables", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let response = app.oneshot(get("/api/variables")).await.unwrap();
        let json = json_response(response).await;
        let codes: Vec<&str> = json.as_array().unwrap().iter().map(|v| v["code"].as_str().unwrap()).collect();
        assert_eq!(codes, vec!["densidade", "idade"]);
    }

    #[tokio::test]
    async fn test_species_override_upsert() {
        let app = create_test_app();
        let uri = "/api/variables/densidade/species/2";

        let response = app.clone().oneshot(send("PUT", uri, json!({"valor": "0.75"}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(json_response(response).await["outcome"], "created");

        let response = app.clone().oneshot(send("PUT", uri, json!({"valor": "0.8"}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_response(response).await["outcome"], "updated");

        let response = app.clone().oneshot(get("/api/trees/11")).await.unwrap();
        let json = json_response(response).await;
        assert!((json["services"][1]["result"].as_f64().unwrap() - 44.0).abs() < 1e-9);

        let delete = || Request::builder().method("DELETE").uri(uri).body(Body::empty()).unwrap();
        let response = app.clone().oneshot(delete()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = app.clone().oneshot(delete()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.oneshot(send("PUT", "/api/variables/densidade/species/99", json!({"valor": "1"}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_variable_update_and_delete() {
        let app = create_test_app();
        let delete = |uri: &str| Request::builder().method("DELETE").uri(uri).body(Body::empty()).unwrap();

        let body = json!({"name": "Densidade da madeira", "code": "densidade", "data_type": "FLOAT",
                          "default_value": "0,5"});
        let response = app.clone().oneshot(send("PUT", "/api/variables/densidade", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_response(response).await;
        assert_eq!(json["default_value"], 0.5);

        // Tipuana has no override, so the new general default applies
        let response = app.clone().oneshot(get("/api/trees/11")).await.unwrap();
        let json = json_response(response).await;
        assert!((json["services"][1]["result"].as_f64().unwrap() - 27.5).abs() < 1e-9);

        // Service `massa` still uses it
        let response = app.clone().oneshot(delete("/api/variables/densidade")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = json_response(response).await;
        assert!(json["error"].as_str().unwrap().contains("massa"));

        let body = json!({"name": "Densidade", "code": "dens", "data_type": "FLOAT"});
        let response = app.clone().oneshot(send("PUT", "/api/variables/densidade", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = json!({"name": "Idade", "code": "idade", "data_type": "INTEGER", "default_value": "4"});
        let response = app.clone().oneshot(send("POST", "/api/variables", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let response = app.clone().oneshot(delete("/api/variables/idade")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = app.clone().oneshot(delete("/api/variables/idade")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = json!({"name": "X", "code": "x", "data_type": "FLOAT"});
        let response = app.oneshot(send("PUT", "/api/variables/fantasma", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
