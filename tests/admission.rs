//! End-to-end admission tests through the HTTP router
//!
//! Drives `/mutate` with raw admission review bodies the way the API server
//! would, backed by an in-memory namespace registry.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use kube::core::admission::{AdmissionResponse, AdmissionReview};
use kube::core::DynamicObject;
use serde_json::{json, Value};
use tower::ServiceExt;

use cidr_injector::policy::{NamespaceRegistry, PolicyResolver};
use cidr_injector::template::{parse_template, TemplateStore};
use cidr_injector::webhook::{webhook_router, MutationEngine, PatchMode, WebhookState};

const SIDECAR_TEMPLATE: &str = r#"
initContainers:
  - name: cidr-sidecar
    image: registry.example/cidr-sidecar:1.0
    imagePullPolicy: IfNotPresent
    env:
      - name: CIDR_RANGE
        value: "0.0.0.0/0"
      - name: LOG_LEVEL
        value: info
    securityContext:
      capabilities:
        drop: ["ALL"]
"#;

/// Namespaces known to the fake API server, with a lookup counter
#[derive(Default)]
struct FakeRegistry {
    namespaces: HashMap<String, BTreeMap<String, String>>,
    lookups: AtomicUsize,
}

impl FakeRegistry {
    fn with_namespace(mut self, name: &str, annotations: &[(&str, &str)]) -> Self {
        self.namespaces.insert(
            name.to_string(),
            annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }
}

#[async_trait]
impl NamespaceRegistry for FakeRegistry {
    async fn namespace_annotations(
        &self,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, kube::Error> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.namespaces.get(name).cloned())
    }
}

fn registry() -> Arc<FakeRegistry> {
    Arc::new(
        FakeRegistry::default()
            .with_namespace("team-a", &[("cidr-range", "10.1.0.0/16")])
            .with_namespace("team-b", &[("owner", "team-b")]),
    )
}

fn router(registry: Arc<FakeRegistry>, mode: PatchMode) -> axum::Router {
    let template = parse_template(SIDECAR_TEMPLATE.as_bytes()).unwrap();
    let engine = MutationEngine::new(
        PolicyResolver::new(registry),
        Arc::new(TemplateStore::fixed(template)),
    )
    .with_patch_mode(mode);
    webhook_router(Arc::new(WebhookState::new(engine)))
}

fn pod_review(uid: &str, namespace: &str, operation: &str) -> Value {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": uid,
            "kind": {"group": "", "version": "v1", "kind": "Pod"},
            "resource": {"group": "", "version": "v1", "resource": "pods"},
            "name": "web",
            "namespace": namespace,
            "operation": operation,
            "userInfo": {"username": "admin"},
            "object": {
                "apiVersion": "v1",
                "kind": "Pod",
                "metadata": {"name": "web", "namespace": namespace},
                "spec": {"containers": [{"name": "web", "image": "nginx"}]}
            }
        }
    })
}

async fn post(router: axum::Router, body: impl Into<Body>) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method("POST")
        .uri("/mutate")
        .header("content-type", "application/json")
        .body(body.into())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    (status, body.to_vec())
}

async fn admit(router: axum::Router, review: Value) -> AdmissionResponse {
    let (status, body) = post(router, serde_json::to_vec(&review).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    let review: AdmissionReview<DynamicObject> = serde_json::from_slice(&body).unwrap();
    review.response.expect("admission response present")
}

fn patch_of(response: &AdmissionResponse) -> Value {
    serde_json::from_slice(response.patch.as_ref().expect("patch present")).unwrap()
}

#[tokio::test]
async fn annotated_namespace_receives_specialized_init_container() {
    let registry = registry();
    let response = admit(
        router(registry.clone(), PatchMode::InitContainer),
        pod_review("uid-1", "team-a", "CREATE"),
    )
    .await;

    assert!(response.allowed);
    assert_eq!(response.uid, "uid-1");
    assert_eq!(registry.lookups.load(Ordering::SeqCst), 1);

    let patch = patch_of(&response);
    assert_eq!(patch.as_array().unwrap().len(), 1);
    assert_eq!(patch[0]["op"], "add");
    assert_eq!(patch[0]["path"], "/spec/initContainers");

    let sidecar = &patch[0]["value"][0];
    assert_eq!(sidecar["name"], "cidr-sidecar");
    assert_eq!(sidecar["imagePullPolicy"], "Always");
    assert_eq!(
        sidecar["env"],
        json!([
            {"name": "CIDR_RANGE", "value": "10.1.0.0/16"},
            {"name": "LOG_LEVEL", "value": "info"}
        ])
    );
    assert_eq!(
        sidecar["securityContext"]["capabilities"]["add"],
        json!(["NET_ADMIN", "NET_RAW"])
    );
    assert_eq!(
        sidecar["securityContext"],
        json!({"capabilities": {"add": ["NET_ADMIN", "NET_RAW"]}})
    );
}

#[tokio::test]
async fn namespace_without_cidr_annotation_is_denied() {
    let response = admit(
        router(registry(), PatchMode::InitContainer),
        pod_review("uid-2", "team-b", "CREATE"),
    )
    .await;

    assert!(!response.allowed);
    assert_eq!(response.uid, "uid-2");
    assert!(response.patch.is_none());
    assert_eq!(response.result.message, "policy key cidr-range missing");
}

#[tokio::test]
async fn unknown_namespace_is_denied() {
    let response = admit(
        router(registry(), PatchMode::InitContainer),
        pod_review("uid-3", "ghost", "CREATE"),
    )
    .await;

    assert!(!response.allowed);
    assert!(response.result.message.contains("ghost"));
}

#[tokio::test]
async fn sidecar_mode_appends_container_and_shares_process_namespace() {
    let response = admit(
        router(registry(), PatchMode::Sidecar),
        pod_review("uid-4", "team-a", "CREATE"),
    )
    .await;

    assert!(response.allowed);
    let patch = patch_of(&response);
    assert_eq!(patch[0]["path"], "/spec/containers/-");
    assert_eq!(patch[0]["value"]["name"], "cidr-sidecar");
    assert_eq!(
        patch[1],
        json!({"op": "add", "path": "/spec/shareProcessNamespace", "value": true})
    );
}

#[tokio::test]
async fn pod_updates_are_allowed_without_lookup() {
    let registry = registry();
    let response = admit(
        router(registry.clone(), PatchMode::InitContainer),
        pod_review("uid-5", "team-b", "UPDATE"),
    )
    .await;

    assert!(response.allowed);
    assert!(response.patch.is_none());
    assert_eq!(registry.lookups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn garbage_body_is_bad_request_with_empty_body() {
    let (status, body) = post(router(registry(), PatchMode::InitContainer), "not json").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.is_empty());
}

#[tokio::test]
async fn review_without_request_is_bad_request() {
    let review = json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview"
    });
    let (status, body) = post(
        router(registry(), PatchMode::InitContainer),
        serde_json::to_vec(&review).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.is_empty());
}

#[tokio::test]
async fn healthz_reports_ok() {
    let request = Request::builder()
        .uri("/healthz")
        .body(Body::empty())
        .unwrap();
    let response = router(registry(), PatchMode::InitContainer)
        .oneshot(request)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), 64).await.unwrap();
    assert_eq!(&body[..], b"ok");
}

#[tokio::test]
async fn v1beta1_review_is_answered_in_v1beta1() {
    let mut review = pod_review("uid-beta", "team-a", "CREATE");
    review["apiVersion"] = json!("admission.k8s.io/v1beta1");

    let (status, body) = post(
        router(registry(), PatchMode::InitContainer),
        serde_json::to_vec(&review).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let reply: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(reply["apiVersion"], "admission.k8s.io/v1beta1");
    assert_eq!(reply["kind"], "AdmissionReview");
    assert_eq!(reply["response"]["uid"], "uid-beta");
    assert_eq!(reply["response"]["allowed"], true);
}
