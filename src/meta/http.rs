//! HTTP API of the meta server
//!
//! Replicas acknowledge reconfigurations and report their replicas here; the
//! failure detector and external balancers push their inputs here too.

use crate::common::{
    ConfigUpdateRequest, ConfigUpdateResponse, Error, Gpid, NodeId, ProposalAction, ReplicaInfo,
    METRICS,
};
use crate::meta::service::MetaService;
use crate::meta::view::AppInfo;
use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

/// Replica reports for big nodes can be large
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct MetaState {
    pub service: Arc<MetaService>,
    pub node_id: String,
}

fn error_response(e: &Error) -> (StatusCode, axum::Json<serde_json::Value>) {
    (e.to_http_status(), axum::Json(json!({ "error": e.to_string() })))
}

pub fn create_router(state: MetaState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health))
        .route("/admin/status", axum::routing::get(admin_status))
        .route("/apps", axum::routing::post(create_app))
        .route("/apps/:app_id", axum::routing::get(get_app))
        .route(
            "/apps/:app_id/max_replica_count",
            axum::routing::post(set_max_replica_count),
        )
        // Replica and failure detector inputs
        .route(
            "/meta/update_configuration",
            axum::routing::post(update_configuration),
        )
        .route("/meta/replica_report", axum::routing::post(replica_report))
        .route("/meta/node_state", axum::routing::post(node_state))
        .route("/meta/proposals", axum::routing::post(assign_proposals))
        .route("/metrics", axum::routing::get(metrics))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<MetaState>) -> impl IntoResponse {
    axum::Json(json!({
        "status": "healthy",
        "node_id": state.node_id,
        "version": crate::VERSION,
    }))
}

/// Cluster summary: apps, node loads and the last sweep's health counts
async fn admin_status(State(state): State<MetaState>) -> impl IntoResponse {
    let meta = state.service.lock();
    let view = meta.view();

    let apps: Vec<_> = view
        .apps()
        .map(|app| {
            json!({
                "app_id": app.info.app_id,
                "app_name": app.info.app_name,
                "partition_count": app.info.partition_count,
                "max_replica_count": app.info.max_replica_count,
            })
        })
        .collect();
    let nodes: Vec<_> = view
        .nodes()
        .map(|ns| {
            json!({
                "node": ns.node(),
                "alive": ns.is_alive(),
                "replicas_collected": ns.replicas_collected(),
                "primaries": ns.primary_count(),
                "partitions": ns.partition_count(),
            })
        })
        .collect();

    axum::Json(json!({
        "node_id": state.node_id,
        "nb_apps": apps.len(),
        "nb_partitions": view.gpids().len(),
        "nb_nodes": nodes.len(),
        "nb_alive_nodes": view.alive_nodes().count(),
        "apps": apps,
        "nodes": nodes,
        "partitions_healthy": METRICS.partitions_healthy.get(),
        "partitions_needs_repair": METRICS.partitions_needs_repair.get(),
        "partitions_unrecoverable": METRICS.partitions_unrecoverable.get(),
        "uptime_seconds": METRICS.uptime_seconds(),
    }))
}

async fn create_app(
    State(state): State<MetaState>,
    axum::Json(info): axum::Json<AppInfo>,
) -> impl IntoResponse {
    let app_id = info.app_id;
    match state.service.create_app(info) {
        Ok(()) => (StatusCode::CREATED, axum::Json(json!({ "app_id": app_id }))).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

async fn get_app(State(state): State<MetaState>, Path(app_id): Path<i32>) -> impl IntoResponse {
    let meta = state.service.lock();
    match meta.view().app(app_id) {
        Some(app) => (
            StatusCode::OK,
            axum::Json(json!({
                "info": app.info,
                "partitions": app.partitions,
            })),
        ),
        None => error_response(&Error::AppNotFound(app_id)),
    }
}

#[derive(Debug, Deserialize)]
struct MaxReplicaCountRequest {
    max_replica_count: usize,
}

async fn set_max_replica_count(
    State(state): State<MetaState>,
    Path(app_id): Path<i32>,
    axum::Json(req): axum::Json<MaxReplicaCountRequest>,
) -> impl IntoResponse {
    match state
        .service
        .set_max_replica_count(app_id, req.max_replica_count)
    {
        Ok(info) => (StatusCode::OK, axum::Json(json!(info))),
        Err(e) => error_response(&e),
    }
}

/// Acknowledgement of a proposal the replica has applied
async fn update_configuration(
    State(state): State<MetaState>,
    axum::Json(request): axum::Json<ConfigUpdateRequest>,
) -> impl IntoResponse {
    let pid = request.pid();
    match state.service.on_update_configuration(request) {
        Ok(config) => (
            StatusCode::OK,
            axum::Json(ConfigUpdateResponse {
                accepted: true,
                error: None,
                config: Some(config),
            }),
        ),
        Err(e) => (
            e.to_http_status(),
            axum::Json(ConfigUpdateResponse {
                accepted: false,
                error: Some(e.to_string()),
                config: state.service.config(pid),
            }),
        ),
    }
}

#[derive(Debug, Deserialize)]
struct ReplicaReportRequest {
    node: NodeId,
    #[serde(default)]
    replicas: Vec<ReplicaInfo>,
}

async fn replica_report(
    State(state): State<MetaState>,
    axum::Json(req): axum::Json<ReplicaReportRequest>,
) -> impl IntoResponse {
    let unknown = state.service.on_replica_report(&req.node, &req.replicas);
    axum::Json(json!({
        "collected": req.replicas.len() - unknown,
        "unknown": unknown,
    }))
}

#[derive(Debug, Deserialize)]
struct NodeStateRequest {
    nodes: Vec<NodeId>,
    alive: bool,
}

async fn node_state(
    State(state): State<MetaState>,
    axum::Json(req): axum::Json<NodeStateRequest>,
) -> impl IntoResponse {
    let downgrades = state.service.set_node_state(&req.nodes, req.alive);
    axum::Json(json!({ "downgrades": downgrades }))
}

#[derive(Debug, Deserialize)]
struct ProposalsRequest {
    gpid: Gpid,
    actions: Vec<ProposalAction>,
}

async fn assign_proposals(
    State(state): State<MetaState>,
    axum::Json(req): axum::Json<ProposalsRequest>,
) -> impl IntoResponse {
    let queued = req.actions.len();
    match state.service.assign_proposals(req.gpid, req.actions) {
        Ok(()) => (StatusCode::OK, axum::Json(json!({ "queued": queued }))),
        Err(e) => error_response(&e),
    }
}

pub async fn metrics(State(state): State<MetaState>) -> impl IntoResponse {
    let mut out = String::new();
    {
        let meta = state.service.lock();
        let view = meta.view();
        out += &format!("minimeta_apps {}\n", view.apps().count());
        out += &format!("minimeta_nodes_alive {}\n", view.alive_nodes().count());
        for ns in view.nodes() {
            out += &format!(
                "minimeta_node_primaries{{node=\"{}\"}} {}\n",
                ns.node(),
                ns.primary_count()
            );
            out += &format!(
                "minimeta_node_partitions{{node=\"{}\"}} {}\n",
                ns.node(),
                ns.partition_count()
            );
        }
    }
    out += &METRICS.to_prometheus();

    (StatusCode::OK, out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::balancer::DummyBalancer;
    use crate::meta::guardian::PartitionGuardian;
    use crate::meta::server_state::ServerState;
    use crate::meta::store::MemoryStore;
    use crate::meta::transport::InMemoryTransport;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn router() -> Router {
        let state = ServerState::open(
            Box::new(MemoryStore::new()),
            PartitionGuardian::default(),
            Box::new(DummyBalancer),
        )
        .unwrap();
        create_router(MetaState {
            service: Arc::new(MetaService::new(
                state,
                Arc::new(InMemoryTransport::new()),
            )),
            node_id: "meta-test".into(),
        })
    }

    fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let resp = router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["node_id"], "meta-test");
        assert_eq!(json["version"], crate::VERSION);
    }

    #[tokio::test]
    async fn test_create_and_get_app() {
        let app = router();
        let info = json!({
            "app_id": 3,
            "app_name": "orders",
            "partition_count": 2,
            "max_replica_count": 3,
        });

        let resp = app.clone().oneshot(post("/apps", info.clone())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let resp = app.clone().oneshot(post("/apps", info)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = app
            .clone()
            .oneshot(Request::get("/apps/3").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["partitions"].as_array().unwrap().len(), 2);

        let resp = app
            .oneshot(Request::get("/apps/4").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_out_of_range_app_rejected() {
        let app = router();
        let resp = app
            .clone()
            .oneshot(post(
                "/apps",
                json!({
                    "app_id": 1,
                    "app_name": "huge",
                    "partition_count": 1,
                    "max_replica_count": usize::MAX,
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .oneshot(Request::get("/apps/1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_status() {
        let app = router();
        let resp = app
            .clone()
            .oneshot(post(
                "/meta/node_state",
                json!({ "nodes": ["node-0:34801", "node-1:34801"], "alive": true }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .oneshot(Request::get("/admin/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["nb_nodes"], 2);
        assert_eq!(json["nb_alive_nodes"], 2);
        assert!(json.get("partitions_healthy").is_some());
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let app = router();
        app.clone()
            .oneshot(post(
                "/apps",
                json!({
                    "app_id": 1,
                    "app_name": "t",
                    "partition_count": 1,
                    "max_replica_count": 3,
                }),
            ))
            .await
            .unwrap();

        let mut config = crate::common::PartitionConfig::new(Gpid::new(1, 0), 3);
        config.ballot = 5;
        config.primary = Some(NodeId::from("node-0:34801"));
        let request = ConfigUpdateRequest {
            target: NodeId::from("node-0:34801"),
            node: NodeId::from("node-0:34801"),
            kind: crate::common::ConfigType::AssignPrimary,
            extra: None,
            config,
        };
        let resp = app
            .oneshot(post(
                "/meta/update_configuration",
                serde_json::to_value(&request).unwrap(),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let json = body_json(resp).await;
        assert_eq!(json["accepted"], false);
        assert_eq!(json["config"]["ballot"], 0);
    }

    #[tokio::test]
    async fn test_proposals_for_unknown_partition() {
        let resp = router()
            .oneshot(post(
                "/meta/proposals",
                json!({
                    "gpid": { "app_id": 9, "partition_index": 0 },
                    "actions": [],
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
