use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::post;
use axum::Router;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::model::{ModelArtifact, FILL_MODEL_FILE, SPREAD_MODEL_FILE, TIMING_FILE};

#[derive(Debug, Serialize)]
pub struct SpreadPrediction {
    pub spread_will_increase: bool,
    pub spread_increase_prob: f64,
    pub predicted_spread: f64,
}

#[derive(Debug, Serialize)]
pub struct FillPrediction {
    pub will_fill: bool,
    pub fill_probability: f64,
}

/// The combined answer. `spread` and `timing` are always present, null when
/// the corresponding artifact is unavailable; `fill` appears only when the
/// request carried an order price.
#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub spread: Option<SpreadPrediction>,
    pub timing: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill: Option<Option<FillPrediction>>,
}

/// Loaded model artifacts, each optional: missing models degrade the
/// response rather than failing it.
pub struct PredictionEngine {
    spread: Option<ModelArtifact>,
    fill: Option<ModelArtifact>,
    timing: Option<Value>,
}

impl PredictionEngine {
    pub fn load(models_dir: &Path) -> Result<Self> {
        let spread = ModelArtifact::load(&models_dir.join(SPREAD_MODEL_FILE))?;
        if spread.is_some() {
            info!("loaded spread predictor");
        }
        let fill = ModelArtifact::load(&models_dir.join(FILL_MODEL_FILE))?;
        if fill.is_some() {
            info!("loaded fill predictor");
        }

        let timing_path = models_dir.join(TIMING_FILE);
        let timing = if timing_path.exists() {
            let content = std::fs::read_to_string(&timing_path)?;
            info!("loaded timing recommendations");
            Some(serde_json::from_str(&content)?)
        } else {
            None
        };

        Ok(Self {
            spread,
            fill,
            timing,
        })
    }

    fn predict_spread(&self, features: &HashMap<String, f64>) -> Option<SpreadPrediction> {
        let model = self.spread.as_ref()?;
        let (spread_will_increase, spread_increase_prob) = model.classify(features)?;
        Some(SpreadPrediction {
            spread_will_increase,
            spread_increase_prob,
            predicted_spread: model.regress(features).unwrap_or(0.0),
        })
    }

    fn predict_fill(&self, features: &HashMap<String, f64>) -> Option<FillPrediction> {
        let model = self.fill.as_ref()?;
        let (will_fill, fill_probability) = model.classify(features)?;
        Some(FillPrediction {
            will_fill,
            fill_probability,
        })
    }

    pub fn predict_all(&self, features: &HashMap<String, f64>) -> PredictionResponse {
        PredictionResponse {
            spread: self.predict_spread(features),
            timing: self.timing.clone(),
            fill: if features.contains_key("order_price") {
                Some(self.predict_fill(features))
            } else {
                None
            },
        }
    }
}

/// Numeric fields of a JSON object, everything else ignored.
fn parse_features(input: &str) -> Result<HashMap<String, f64>, serde_json::Error> {
    let value: Value = serde_json::from_str(input)?;
    let mut features = HashMap::new();
    if let Value::Object(map) = value {
        for (key, field) in map {
            if let Some(num) = field.as_f64() {
                features.insert(key, num);
            }
        }
    }
    Ok(features)
}

/// One-shot CLI prediction: parse, predict, print. Malformed input prints a
/// structured error and still exits cleanly.
pub fn run_once(models_dir: &Path, input: &str) -> Result<()> {
    let features = match parse_features(input) {
        Ok(features) => features,
        Err(e) => {
            println!("{}", json!({ "error": format!("Invalid JSON: {}", e) }));
            return Ok(());
        }
    };

    let engine = PredictionEngine::load(models_dir)?;
    let response = engine.predict_all(&features);
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

type SharedEngine = Arc<Mutex<PredictionEngine>>;

async fn handle_predict(State(engine): State<SharedEngine>, body: String) -> impl IntoResponse {
    let features = match parse_features(&body) {
        Ok(features) => features,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("Invalid JSON: {}", e) })),
            );
        }
    };

    // Serialize requests: the engine answers one at a time.
    let engine = engine.lock().await;
    let response = engine.predict_all(&features);
    (
        StatusCode::OK,
        Json(serde_json::to_value(response).unwrap_or_else(|_| json!(null))),
    )
}

/// Run the resident prediction service, loading models once at startup.
pub async fn serve(models_dir: &Path, port: u16) -> Result<()> {
    let engine: SharedEngine = Arc::new(Mutex::new(PredictionEngine::load(models_dir)?));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", post(handle_predict))
        .route("/predict", post(handle_predict))
        .layer(cors)
        .with_state(engine);

    let addr = format!("127.0.0.1:{}", port);
    info!("prediction server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
