use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use bookgrid_core::config::Config;
use bookgrid_core::grid::{Codebook, GridIndex, GridShape};
use bookgrid_core::model::ProjectedTopicModel;
use bookgrid_core::persist::{self, EncoderKind, GridParams, Manifest, ModelPaths, FORMAT_VERSION};
use bookgrid_core::registry::ModelRegistry;
use bookgrid_core::resolve::{ResolverOptions, SimilarityResolver};
use bookgrid_core::store::{PostingStore, SledPostingStore};
use bookgrid_core::vectorize::{CountVectorizer, VectorizerOptions};
use bookgrid_core::Document;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;
use tower::ServiceExt;

fn build_tiny_models(dir: &Path) -> Config {
    let paths = ModelPaths::new(dir.join("models"));
    let v = CountVectorizer::from_terms(vec!["pirate".into(), "space".into()], VectorizerOptions::default());
    persist::save_vectorizer(&paths, &v).unwrap();
    persist::save_topic_model(&paths, &ProjectedTopicModel::new(2, 2, vec![1.0, 0.0, 0.0, 1.0]).unwrap()).unwrap();
    let grid = GridIndex::new(Codebook::new(GridShape::new(1, 2), 2, vec![1.0, 0.0, 0.0, 1.0]).unwrap());
    persist::save_grid(&paths, &grid).unwrap();
    persist::save_manifest(
        &paths,
        &Manifest {
            format_version: FORMAT_VERSION,
            created_at: "2024-01-01T00:00:00Z".into(),
            encoder: EncoderKind::Topic,
            grid: GridParams { rows: 1, cols: 2, dim: 2, epochs: 1, topology: "toroid".into(), cooling: "exponential".into() },
            num_docs: 3,
        },
    )
    .unwrap();

    let config = Config {
        model_dir: paths.root.clone(),
        store_dir: dir.join("postings"),
        min_count: 1,
        min_text_chars: 10,
        ..Config::default()
    };

    // populate, then release the sled lock before the app opens the store
    let registry = Arc::new(ModelRegistry::load(&paths).unwrap());
    let store = SledPostingStore::open(&config.store_dir).unwrap();
    let resolver = SimilarityResolver::new(registry, store, ResolverOptions::from(&config));
    let books = [
        ("p1", "Treasure Island", "pirate pirate ship", Some(10)),
        ("p2", "Treasure Island", "pirate pirate gold", Some(50)),
        ("p3", "Peter Pan", "pirate hook pirate", None),
        ("s1", "Dune", "space space sand", Some(5)),
    ];
    for (id, title, text, popularity) in books {
        let doc = Document { id: id.into(), title: title.into(), text: text.into(), popularity };
        resolver.update(&doc).unwrap();
    }
    resolver.store().flush().unwrap();
    config
}

async fn send(app: Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
    let mut req = Request::post(uri).header("content-type", "application/json");
    if let Some(t) = token {
        req = req.header("X-ADMIN-TOKEN", t);
    }
    req.body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn similar_by_id_dedupes_titles() {
    let dir = tempdir().unwrap();
    let app = server::build_app(build_tiny_models(dir.path())).unwrap();

    let (status, json) = send(app.clone(), get("/similar/p3?min_count=2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "satisfied");
    let ids: Vec<&str> = json["results"].as_array().unwrap().iter().map(|r| r["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["p2"]);

    let (_, json) = send(app.clone(), get("/similar/p3?min_count=2&dedupe=false")).await;
    assert_eq!(json["results"].as_array().unwrap().len(), 2);

    let (status, _) = send(app, get("/similar/unknown")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn similar_by_text_searches_without_registering() {
    let dir = tempdir().unwrap();
    let app = server::build_app(build_tiny_models(dir.path())).unwrap();

    let body = json!({"title": "Stars", "text": "space space space", "min_count": 1});
    let (status, json) = send(app.clone(), post_json("/similar", body, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["results"][0]["id"], "s1");
    assert!(json["id"].is_null());

    let (status, _) = send(app, post_json("/similar", json!({"text": "space"}), None)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn update_requires_admin_token() {
    std::env::set_var("ADMIN_TOKEN", "sekret");
    let dir = tempdir().unwrap();
    let app = server::build_app(build_tiny_models(dir.path())).unwrap();
    let doc = json!({"id": "s2", "title": "Solaris", "summary": "space ocean space"});

    let (status, _) = send(app.clone(), post_json("/update", doc.clone(), Some("wrong"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, json) = send(app.clone(), post_json("/update", doc.clone(), Some("sekret"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json[0]["status"], "registered");
    assert_eq!(json[0]["col"], 1);

    let (_, json) = send(app.clone(), post_json("/update", json!([doc]), Some("sekret"))).await;
    assert_eq!(json[0]["status"], "existing");

    let (_, json) = send(app, get("/similar/s1")).await;
    let ids: Vec<&str> = json["results"].as_array().unwrap().iter().map(|r| r["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["s2"]);
}

#[tokio::test]
async fn health_is_ok() {
    let dir = tempdir().unwrap();
    let app = server::build_app(build_tiny_models(dir.path())).unwrap();
    let resp = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
