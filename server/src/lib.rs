use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use bookgrid_core::config::Config;
use bookgrid_core::persist::ModelPaths;
use bookgrid_core::registry::ModelRegistry;
use bookgrid_core::resolve::{self, Candidate, ResolveStatus, Resolution, ResolverOptions, SimilarityResolver, Update};
use bookgrid_core::store::{PostingStore, SledPostingStore};
use bookgrid_core::{Document, Error};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

type Resolver = SimilarityResolver<SledPostingStore>;
type ApiError = (StatusCode, String);

#[derive(Deserialize)]
pub struct SimilarParams {
    pub min_count: Option<usize>,
    #[serde(default = "default_dedupe")]
    pub dedupe: bool,
}
fn default_dedupe() -> bool { true }

#[derive(Deserialize)]
pub struct TextQuery {
    #[serde(default)]
    pub title: String,
    pub text: String,
    pub min_count: Option<usize>,
    #[serde(default = "default_dedupe")]
    pub dedupe: bool,
}

#[derive(Serialize)]
pub struct SimilarResponse {
    pub id: Option<String>,
    pub status: ResolveStatus,
    pub top_n: usize,
    pub took_s: f64,
    pub results: Vec<Candidate>,
}

#[derive(Serialize)]
pub struct UpdateResult {
    pub id: String,
    pub status: &'static str,
    pub row: Option<u32>,
    pub col: Option<u32>,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub enum UpdateBody {
    One(Document),
    Many(Vec<Document>),
}

#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<Resolver>,
    pub min_count: usize,
    pub admin_token: Option<String>,
}

pub fn build_app(config: Config) -> Result<Router> {
    let registry = Arc::new(ModelRegistry::load(&ModelPaths::new(&config.model_dir))?);
    let store = SledPostingStore::open(&config.store_dir)?;
    let resolver = SimilarityResolver::new(registry, store, ResolverOptions::from(&config));
    let admin_token = std::env::var("ADMIN_TOKEN").ok();
    let app_state = AppState { resolver: Arc::new(resolver), min_count: config.min_count, admin_token };

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/similar/:id", get(similar_by_id))
        .route("/similar", post(similar_by_text))
        .route("/update", post(update_handler))
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());
    Ok(app)
}

fn internal(e: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %e, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// Run blocking resolver work off the async executor.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> bookgrid_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(internal)?.map_err(internal)
}

fn present(
    resolver: &Resolver,
    id: Option<String>,
    resolution: Resolution,
    dedupe: bool,
    started: std::time::Instant,
) -> bookgrid_core::Result<SimilarResponse> {
    let mut results = resolver.hydrate(&resolution.candidates)?;
    if dedupe {
        results = resolve::dedupe_by_title(results);
    }
    Ok(SimilarResponse {
        id,
        status: resolution.status,
        top_n: resolution.top_n,
        took_s: started.elapsed().as_secs_f64(),
        results,
    })
}

pub async fn similar_by_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<SimilarParams>,
) -> Result<Json<SimilarResponse>, ApiError> {
    let started = std::time::Instant::now();
    let min_count = params.min_count.unwrap_or(state.min_count);
    let resolver = state.resolver.clone();
    let response = blocking(move || {
        let resolution = resolver.resolve(resolve::Query::Id(&id), min_count)?;
        present(&resolver, Some(id), resolution, params.dedupe, started)
    })
    .await?;
    if response.status == ResolveStatus::NotIndexed {
        return Err((StatusCode::NOT_FOUND, format!("{} is not indexed", response.id.unwrap_or_default())));
    }
    Ok(Json(response))
}

pub async fn similar_by_text(
    State(state): State<AppState>,
    Json(body): Json<TextQuery>,
) -> Result<Json<SimilarResponse>, ApiError> {
    let started = std::time::Instant::now();
    let min_count = body.min_count.unwrap_or(state.min_count);
    let resolver = state.resolver.clone();
    let doc = Document { id: String::new(), title: body.title, text: body.text, popularity: None };
    let outcome = blocking(move || {
        let min_chars = resolver.options().min_text_chars;
        let vector = match resolver.registry().encode_document(&doc, min_chars) {
            Ok(v) => v,
            Err(Error::EncodingSkip(reason)) => return Ok(Err(reason)),
            Err(e) => return Err(e),
        };
        let resolution = resolver.resolve(resolve::Query::Vector { id: None, vector: &vector }, min_count)?;
        present(&resolver, None, resolution, body.dedupe, started).map(Ok)
    })
    .await?;
    match outcome {
        Ok(response) => Ok(Json(response)),
        Err(reason) => Err((StatusCode::UNPROCESSABLE_ENTITY, reason.to_string())),
    }
}

async fn update_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<UpdateBody>,
) -> Result<Json<Vec<UpdateResult>>, ApiError> {
    authorize(&state, &headers)?;
    let docs = match body {
        UpdateBody::One(d) => vec![d],
        UpdateBody::Many(ds) => ds,
    };
    let resolver = state.resolver.clone();
    let results = blocking(move || {
        let mut out = Vec::with_capacity(docs.len());
        for doc in &docs {
            let update = resolver.update(doc)?;
            let cell = update.cell();
            let (status, reason) = match &update {
                Update::Registered(_) => ("registered", None),
                Update::Existing(_) => ("existing", None),
                Update::Skipped(r) => ("skipped", Some(r.to_string())),
            };
            out.push(UpdateResult {
                id: doc.id.clone(),
                status,
                row: cell.map(|c| c.row),
                col: cell.map(|c| c.col),
                reason,
            });
        }
        resolver.store().flush()?;
        Ok(out)
    })
    .await?;
    Ok(Json(results))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err((StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set".into())),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}
