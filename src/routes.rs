//! JSON API on top of the catch log, the forecast engine and the spot
//! analyzer.

use std::{convert::Infallible, sync::Arc};

use futures_lite::StreamExt;
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::json;
use warp::{
    filters::{body::BodyDeserializeError, multipart::FormData},
    http::StatusCode,
    hyper::body::Buf,
    reject::{MethodNotAllowed, PayloadTooLarge},
    Filter, Rejection, Reply,
};

use crate::{
    analyzer::Analyze,
    forecast::{ForecastEngine, ForecastRequest},
    models::{CatchInput, ValidationError},
    store::{self, CatchStore},
};

/// Upper bound for JSON request bodies.
const JSON_BODY_LIMIT: u64 = 64 * 1024;
const UNAVAILABLE: &str = "The catch log is unavailable right now, please try again";
const DEGRADED_ANALYSIS: &str = "Sorry, I couldn't analyze this image right now.";

/// Everything the routes need, built once at startup.
#[derive(Clone)]
pub struct Services {
    pub catches: Arc<CatchStore>,
    pub forecasts: ForecastEngine,
    pub analyzer: Arc<dyn Analyze>,
    pub max_upload_bytes: u64,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'a str>,
}

fn error_reply(status: StatusCode, message: &str) -> Box<dyn Reply> {
    Box::new(warp::reply::with_status(
        warp::reply::json(&ErrorBody {
            error: message,
            field: None,
        }),
        status,
    ))
}

fn validation_error(err: &ValidationError) -> Box<dyn Reply> {
    Box::new(warp::reply::with_status(
        warp::reply::json(&ErrorBody {
            error: &err.to_string(),
            field: Some(err.field),
        }),
        StatusCode::BAD_REQUEST,
    ))
}

fn store_error(action: &str, err: store::Error) -> Box<dyn Reply> {
    match err {
        store::Error::Validation(err) => validation_error(&err),
        store::Error::Unavailable(err) => {
            error!("Could not {action}: {:?}", err);
            error_reply(StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE)
        }
    }
}

async fn list_catches(store: Arc<CatchStore>) -> Box<dyn Reply> {
    debug!("GET /api/catches");

    match store.all().await {
        Ok(catches) => Box::new(warp::reply::json(&catches)),
        Err(err) => store_error("list catches", err),
    }
}

async fn add_catch(input: CatchInput, store: Arc<CatchStore>) -> Box<dyn Reply> {
    debug!("POST /api/catches {:?}", input);

    let record = match store.add(input).await {
        Ok(record) => record,
        Err(err) => return store_error("log catch", err),
    };

    info!(
        "Logged catch #{}: {} at {}",
        record.id, record.species, record.location
    );

    let message = match store.count().await {
        Ok(total) => format!("Catch logged successfully! Total catches: {total}"),
        Err(err) => {
            warn!("Could not count catches: {:?}", err);
            "Catch logged successfully!".to_string()
        }
    };

    Box::new(warp::reply::json(&json!({
        "message": message,
        "catch": record,
    })))
}

fn forecast(engine: &ForecastEngine, request: ForecastRequest) -> Box<dyn Reply> {
    debug!("POST /api/forecast {:?}", request);

    match engine.forecast(&request) {
        Ok(forecast) => Box::new(warp::reply::json(&forecast)),
        Err(err) => validation_error(&err),
    }
}

struct Upload {
    filename: String,
    content_type: String,
    bytes: Vec<u8>,
}

/// Reads the `file` part of an upload, skipping any other fields.
async fn read_upload(form: FormData) -> Result<Option<Upload>, warp::Error> {
    let mut parts = Box::pin(form);

    while let Some(part) = parts.try_next().await? {
        if part.name() != "file" {
            continue;
        }

        let filename = part.filename().unwrap_or("upload").to_string();
        let content_type = part.content_type().unwrap_or_default().to_string();

        let mut bytes = Vec::new();
        let mut chunks = Box::pin(part.stream());
        while let Some(chunk) = chunks.try_next().await? {
            bytes.extend_from_slice(chunk.chunk());
        }

        return Ok(Some(Upload {
            filename,
            content_type,
            bytes,
        }));
    }

    Ok(None)
}

fn upload_error(message: &str) -> Box<dyn Reply> {
    Box::new(warp::reply::with_status(
        warp::reply::json(&json!({ "success": false, "error": message })),
        StatusCode::BAD_REQUEST,
    ))
}

async fn analyze_spot(form: FormData, analyzer: Arc<dyn Analyze>) -> Box<dyn Reply> {
    debug!("POST /api/analyze");

    let upload = match read_upload(form).await {
        Ok(Some(upload)) => upload,
        Ok(None) => return upload_error("No image file provided"),
        Err(err) => {
            warn!("Could not read upload: {:?}", err);
            return upload_error("Could not read upload");
        }
    };

    if !upload.content_type.starts_with("image/") {
        return upload_error("Only image files are allowed");
    }

    let (success, recommendation) = match analyzer
        .analyze(&upload.bytes, &upload.content_type)
        .await
    {
        Ok(recommendation) => (true, recommendation),
        Err(err) => {
            error!("Could not analyze {}: {:?}", upload.filename, err);
            (false, format!("{DEGRADED_ANALYSIS} Error: {err}"))
        }
    };

    Box::new(warp::reply::json(&json!({
        "success": success,
        "recommendation": recommendation,
        "filename": upload.filename,
    })))
}

async fn handle_rejection(err: Rejection) -> Result<Box<dyn Reply>, Infallible> {
    let reply = if err.is_not_found() {
        error_reply(StatusCode::NOT_FOUND, "Not found")
    } else if let Some(err) = err.find::<BodyDeserializeError>() {
        debug!("Could not decode body: {err}");
        error_reply(StatusCode::BAD_REQUEST, "Invalid JSON data")
    } else if err.find::<PayloadTooLarge>().is_some() {
        upload_error("File too large")
    } else if err.find::<MethodNotAllowed>().is_some() {
        error_reply(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else {
        debug!("Rejected request: {:?}", err);
        error_reply(StatusCode::BAD_REQUEST, "Bad request")
    };

    Ok(reply)
}

pub fn routes(
    services: Services,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let Services {
        catches,
        forecasts,
        analyzer,
        max_upload_bytes,
    } = services;

    let with_catches = warp::any().map(move || catches.clone());
    let with_analyzer = warp::any().map(move || analyzer.clone());

    // GET /
    let root = warp::path::end()
        .and(warp::get())
        .map(|| warp::reply::json(&json!({ "message": "Fishing app backend is live!" })));

    // GET /health
    let health = warp::path!("health").and(warp::get()).map(|| {
        warp::reply::json(&json!({ "status": "healthy", "service": "FishCast API" }))
    });

    // GET /api/catches
    let list_catches_route = warp::path!("api" / "catches")
        .and(warp::get())
        .and(with_catches.clone())
        .then(list_catches);

    // POST /api/catches
    let add_catch_route = warp::path!("api" / "catches")
        .and(warp::post())
        .and(warp::body::content_length_limit(JSON_BODY_LIMIT))
        .and(warp::body::json())
        .and(with_catches)
        .then(add_catch);

    // POST /api/forecast
    let forecast_route = warp::path!("api" / "forecast")
        .and(warp::post())
        .and(warp::body::content_length_limit(JSON_BODY_LIMIT))
        .and(warp::body::json())
        .map(move |request: ForecastRequest| forecast(&forecasts, request));

    // POST /api/analyze
    let analyze_route = warp::path!("api" / "analyze")
        .and(warp::post())
        .and(warp::multipart::form().max_length(max_upload_bytes))
        .and(with_analyzer)
        .then(analyze_spot);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(["GET", "POST", "OPTIONS"])
        .allow_header("content-type");

    root.or(health)
        .or(list_catches_route)
        .or(add_catch_route)
        .or(forecast_route)
        .or(analyze_route)
        .recover(handle_rejection)
        .with(cors)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::{
        analyzer::{self, Disabled},
        models::{CatchRecord, NewCatch},
        store::{CatchLog, MemoryCatchLog, UnavailableError},
    };

    struct Canned;

    /// Catch log whose medium is gone.
    struct Broken;

    #[async_trait]
    impl CatchLog for Broken {
        async fn append(&self, _catch: NewCatch) -> Result<CatchRecord, UnavailableError> {
            Err(UnavailableError::Poisoned)
        }

        async fn all(&self) -> Result<Vec<CatchRecord>, UnavailableError> {
            Err(UnavailableError::Poisoned)
        }

        async fn count(&self) -> Result<usize, UnavailableError> {
            Err(UnavailableError::Poisoned)
        }
    }

    /// Appends fine but cannot count.
    #[derive(Default)]
    struct Uncountable(MemoryCatchLog);

    #[async_trait]
    impl CatchLog for Uncountable {
        async fn append(&self, catch: NewCatch) -> Result<CatchRecord, UnavailableError> {
            self.0.append(catch).await
        }

        async fn all(&self) -> Result<Vec<CatchRecord>, UnavailableError> {
            self.0.all().await
        }

        async fn count(&self) -> Result<usize, UnavailableError> {
            Err(UnavailableError::Poisoned)
        }
    }

    fn bass() -> serde_json::Value {
        json!({
            "species": "Bass",
            "bait": "Worm",
            "location": "Pond A",
            "date": "2024-05-01",
            "time": "07:00"
        })
    }

    #[async_trait]
    impl Analyze for Canned {
        async fn analyze(&self, image: &[u8], content_type: &str) -> Result<String, analyzer::Error> {
            Ok(format!("{} bytes of {content_type}", image.len()))
        }
    }

    fn services(analyzer: Arc<dyn Analyze>) -> Services {
        Services {
            catches: Arc::new(CatchStore::in_memory()),
            forecasts: ForecastEngine::new(),
            analyzer,
            max_upload_bytes: 1024,
        }
    }

    fn multipart(name: &str, filename: &str, content_type: &str, data: &str) -> (String, String) {
        let boundary = "----fishcast-boundary";
        let body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
             Content-Type: {content_type}\r\n\r\n\
             {data}\r\n\
             --{boundary}--\r\n"
        );
        (format!("multipart/form-data; boundary={boundary}"), body)
    }

    async fn upload(analyzer: Arc<dyn Analyze>, content_type: &str, data: &str) -> (StatusCode, Value) {
        let api = routes(services(analyzer));
        let (header, body) = multipart("file", "cove.jpg", content_type, data);
        let response = warp::test::request()
            .method("POST")
            .path("/api/analyze")
            .header("content-type", header)
            .body(body)
            .reply(&api)
            .await;
        (
            response.status(),
            serde_json::from_slice(response.body()).unwrap(),
        )
    }

    #[tokio::test]
    async fn analyze_returns_the_recommendation() {
        let (status, body) = upload(Arc::new(Canned), "image/jpeg", "abcd").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["recommendation"], "4 bytes of image/jpeg");
        assert_eq!(body["filename"], "cove.jpg");
    }

    #[tokio::test]
    async fn failing_analysis_degrades_to_a_message() {
        let (status, body) = upload(Arc::new(Disabled), "image/jpeg", "abcd").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert!(body["recommendation"]
            .as_str()
            .unwrap()
            .starts_with("Sorry, I couldn't analyze this image right now. Error:"));
    }

    #[tokio::test]
    async fn analyze_rejects_non_images() {
        let (status, body) = upload(Arc::new(Canned), "text/plain", "not a photo").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Only image files are allowed");
    }

    #[tokio::test]
    async fn analyze_rejects_oversized_uploads() {
        let (status, body) = upload(Arc::new(Canned), "image/jpeg", &"x".repeat(4096)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "File too large");
    }

    #[tokio::test]
    async fn analyze_requires_a_file_field() {
        let api = routes(services(Arc::new(Canned)));
        let (header, body) = multipart("photo", "cove.jpg", "image/jpeg", "abcd");
        let response = warp::test::request()
            .method("POST")
            .path("/api/analyze")
            .header("content-type", header)
            .body(body)
            .reply(&api)
            .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["error"], "No image file provided");
    }

    #[tokio::test]
    async fn unavailable_catch_log_is_reported_as_503() {
        let api = routes(Services {
            catches: Arc::new(CatchStore::new(Broken)),
            ..services(Arc::new(Canned))
        });

        let listed = warp::test::request()
            .path("/api/catches")
            .reply(&api)
            .await;
        let logged = warp::test::request()
            .method("POST")
            .path("/api/catches")
            .json(&bass())
            .reply(&api)
            .await;

        for response in [listed, logged] {
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
            let body: Value = serde_json::from_slice(response.body()).unwrap();
            assert_eq!(body, json!({ "error": UNAVAILABLE }));
        }
    }

    #[tokio::test]
    async fn logged_catch_without_a_count_still_succeeds() {
        let api = routes(Services {
            catches: Arc::new(CatchStore::new(Uncountable::default())),
            ..services(Arc::new(Canned))
        });

        let response = warp::test::request()
            .method("POST")
            .path("/api/catches")
            .json(&bass())
            .reply(&api)
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["message"], "Catch logged successfully!");
        assert_eq!(body["catch"]["id"], 1);
    }
}
