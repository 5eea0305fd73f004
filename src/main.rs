use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use music_matcher::{
    audio,
    database::{Database, NewSong, Song},
    find_best_match, generate_fingerprint, top_matches, Fingerprint, FingerprintConfig,
    FingerprintError, MatchConfig, MatchResult, ServerConfig,
};

const DEFAULT_TOP_MATCHES: usize = 5;

#[derive(Clone)]
struct AppState {
    db: Database,
    fingerprint: FingerprintConfig,
    matching: MatchConfig,
    request_timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
enum ServiceError {
    #[error("missing multipart field `{0}`")]
    MissingField(&'static str),

    #[error("could not decode audio: {0:#}")]
    Decode(anyhow::Error),

    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    #[error("song already cataloged with id {0}")]
    Duplicate(i64),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    fn status(&self) -> StatusCode {
        match self {
            ServiceError::MissingField(_) => StatusCode::BAD_REQUEST,
            ServiceError::Decode(_) | ServiceError::Fingerprint(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ServiceError::Duplicate(_) => StatusCode::CONFLICT,
            ServiceError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Deserialize)]
struct TopParams {
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct SearchParams {
    q: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();

    let db = Database::new(&config.database_path, config.database_max_connections).await?;
    db.init().await?;

    let fingerprint = FingerprintConfig::default();
    let state = AppState {
        matching: MatchConfig::aligned_with(&fingerprint),
        fingerprint,
        db,
        request_timeout: config.request_timeout,
    };

    let app = router(state, config.max_upload_bytes);

    let addr = config.socket_addr();
    info!("Server running on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/api/identify", post(identify))
        .route("/api/identify/top", post(identify_top))
        .route("/api/songs", get(list_songs).post(add_song))
        .route("/api/songs/search", get(search_songs))
        .route("/api/songs/count", get(song_count))
        .route("/api/songs/:id", delete(delete_song))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .with_state(state)
}

async fn health_check() -> &'static str {
    "Audio matching service is running"
}

async fn identify(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<MatchResult>, StatusCode> {
    let result = async {
        let audio_data = read_audio_field(multipart).await?;
        process_identify(&state, audio_data).await
    }
    .await;

    respond("Identify", result)
}

async fn identify_top(
    State(state): State<AppState>,
    Query(params): Query<TopParams>,
    multipart: Multipart,
) -> Result<Json<Vec<MatchResult>>, StatusCode> {
    let limit = params.limit.unwrap_or(DEFAULT_TOP_MATCHES);
    let result = async {
        let audio_data = read_audio_field(multipart).await?;
        process_identify_top(&state, audio_data, limit).await
    }
    .await;

    respond("Top matches", result)
}

async fn add_song(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let mut audio_data = None;
    let mut title = None;
    let mut artist = None;
    let mut album = None;

    while let Some(field) = multipart.next_field().await.map_err(|_| StatusCode::BAD_REQUEST)? {
        match field.name() {
            Some("audio") => {
                audio_data = Some(field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?);
            }
            Some("title") => {
                title = Some(field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?);
            }
            Some("artist") => {
                artist = Some(field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?);
            }
            Some("album") => {
                album = Some(field.text().await.map_err(|_| StatusCode::BAD_REQUEST)?);
            }
            _ => {}
        }
    }

    let audio_data = audio_data.ok_or(StatusCode::BAD_REQUEST)?;
    let title = title.ok_or(StatusCode::BAD_REQUEST)?;
    let artist = artist.ok_or(StatusCode::BAD_REQUEST)?;

    let song = NewSong {
        title,
        artist,
        album: album.filter(|a| !a.trim().is_empty()),
        duration: None,
    };

    let result = process_add_song(&state, audio_data, song).await;
    respond("Add song", result).map(|Json(song_id)| {
        Json(serde_json::json!({
            "success": true,
            "song_id": song_id
        }))
    })
}

async fn list_songs(State(state): State<AppState>) -> Result<Json<Vec<Song>>, StatusCode> {
    respond("List songs", state.db.list_songs().await.map_err(ServiceError::from))
}

async fn search_songs(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<Song>>, StatusCode> {
    respond(
        "Search songs",
        state.db.search_songs(&params.q).await.map_err(ServiceError::from),
    )
}

async fn song_count(State(state): State<AppState>) -> Result<Json<serde_json::Value>, StatusCode> {
    let count = respond("Song count", state.db.song_count().await.map_err(ServiceError::from))?;
    Ok(Json(serde_json::json!({ "count": count.0 })))
}

async fn delete_song(
    State(state): State<AppState>,
    Path(song_id): Path<i64>,
) -> Result<StatusCode, StatusCode> {
    let Json(deleted) = respond(
        "Delete song",
        state.db.delete_song(song_id).await.map_err(ServiceError::from),
    )?;

    if deleted {
        info!("Deleted song {}", song_id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

fn respond<T>(action: &str, result: Result<T, ServiceError>) -> Result<Json<T>, StatusCode> {
    match result {
        Ok(value) => Ok(Json(value)),
        Err(e) => {
            let status = e.status();
            if status.is_server_error() {
                error!("{} error: {}", action, e);
            } else {
                warn!("{} rejected: {}", action, e);
            }
            Err(status)
        }
    }
}

async fn read_audio_field(mut multipart: Multipart) -> Result<Bytes, ServiceError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ServiceError::MissingField("audio"))?
    {
        if field.name() == Some("audio") {
            return field
                .bytes()
                .await
                .map_err(|_| ServiceError::MissingField("audio"));
        }
    }

    Err(ServiceError::MissingField("audio"))
}

/// Decode and fingerprint an upload off the async runtime.
/// Returns the fingerprint and the decoded duration in seconds.
async fn fingerprint_upload(
    config: &FingerprintConfig,
    audio_data: Bytes,
) -> Result<(Fingerprint, f64), ServiceError> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || -> Result<(Fingerprint, f64), ServiceError> {
        let samples =
            audio::decode_audio(&audio_data, config.sample_rate).map_err(ServiceError::Decode)?;
        let duration = samples.len() as f64 / config.sample_rate as f64;
        let fingerprint = generate_fingerprint(&samples, &config)?;
        Ok((fingerprint, duration))
    })
    .await
    .map_err(|e| ServiceError::Internal(e.into()))?
}

/// Fingerprint the upload and score it against one catalog snapshot.
async fn process_identify(state: &AppState, audio_data: Bytes) -> Result<MatchResult, ServiceError> {
    let work = async {
        let (query, _) = fingerprint_upload(&state.fingerprint, audio_data).await?;
        let catalog = state.db.list_fingerprints().await?;
        let config = state.matching.clone();

        let result = tokio::task::spawn_blocking(move || find_best_match(&query, &catalog, &config))
            .await
            .map_err(anyhow::Error::from)?;
        Ok::<_, ServiceError>(result)
    };

    tokio::time::timeout(state.request_timeout, work)
        .await
        .map_err(|_| ServiceError::Timeout(state.request_timeout))?
}

async fn process_identify_top(
    state: &AppState,
    audio_data: Bytes,
    limit: usize,
) -> Result<Vec<MatchResult>, ServiceError> {
    let work = async {
        let (query, _) = fingerprint_upload(&state.fingerprint, audio_data).await?;
        let catalog = state.db.list_fingerprints().await?;
        let config = state.matching.clone();

        let results =
            tokio::task::spawn_blocking(move || top_matches(&query, &catalog, limit, &config))
                .await
                .map_err(anyhow::Error::from)?;
        Ok::<_, ServiceError>(results)
    };

    tokio::time::timeout(state.request_timeout, work)
        .await
        .map_err(|_| ServiceError::Timeout(state.request_timeout))?
}

async fn process_add_song(
    state: &AppState,
    audio_data: Bytes,
    mut song: NewSong,
) -> Result<i64, ServiceError> {
    let (fingerprint, duration) = tokio::time::timeout(
        state.request_timeout,
        fingerprint_upload(&state.fingerprint, audio_data),
    )
    .await
    .map_err(|_| ServiceError::Timeout(state.request_timeout))??;

    if let Some(existing) = state.db.find_by_digest(&fingerprint.digest).await? {
        return Err(ServiceError::Duplicate(existing.id));
    }

    song.duration = Some(duration);
    let song_id = state.db.add_song(&song, &fingerprint).await?;
    Ok(song_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::f64::consts::PI;
    use std::io::Cursor;
    use tower::ServiceExt;

    const BOUNDARY: &str = "X-MUSIC-MATCHER-BOUNDARY";

    async fn test_app() -> Router {
        let db = Database::new("sqlite::memory:", 1).await.unwrap();
        db.init().await.unwrap();
        let fingerprint = FingerprintConfig::default();
        let state = AppState {
            matching: MatchConfig::aligned_with(&fingerprint),
            fingerprint,
            db,
            request_timeout: Duration::from_secs(30),
        };
        router(state, 10 * 1024 * 1024)
    }

    fn tone_wav(seconds: f64) -> Vec<u8> {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            let len = (seconds * 22050.0) as usize;
            for i in 0..len {
                let t = i as f64 / 22050.0;
                let freq = if t < seconds / 2.0 { 440.0 } else { 2500.0 };
                let s = 0.5 * (2.0 * PI * freq * t).sin() + 0.2 * (2.0 * PI * 7000.0 * t).sin();
                writer.write_sample((s * 16000.0) as i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn multipart_body(audio: &[u8], fields: &[(&str, &str)]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    BOUNDARY, name, value
                )
                .as_bytes(),
            );
        }
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"audio\"; filename=\"clip.wav\"\r\nContent-Type: audio/wav\r\n\r\n",
                BOUNDARY
            )
            .as_bytes(),
        );
        body.extend_from_slice(audio);
        body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn multipart_request(uri: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_identify_against_empty_catalog() {
        let app = test_app().await;
        let response = app
            .oneshot(multipart_request("/api/identify", multipart_body(&tone_wav(1.0), &[])))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["is_match"], false);
        assert_eq!(json["confidence"], 0.0);
        assert!(json["song"].is_null());
    }

    #[tokio::test]
    async fn test_add_then_identify_same_clip() {
        let app = test_app().await;
        let wav = tone_wav(2.0);

        let response = app
            .clone()
            .oneshot(multipart_request(
                "/api/songs",
                multipart_body(&wav, &[("title", "Tone"), ("artist", "Generator")]),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let song_id = json_body(response).await["song_id"].as_i64().unwrap();

        let response = app
            .clone()
            .oneshot(multipart_request("/api/identify", multipart_body(&wav, &[])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["is_match"], true);
        assert_eq!(json["confidence"], 1.0);
        assert_eq!(json["offset"], 0);
        assert_eq!(json["song"]["id"], song_id);
        assert_eq!(json["song"]["title"], "Tone");

        // Same content again is an exact duplicate.
        let response = app
            .oneshot(multipart_request(
                "/api/songs",
                multipart_body(&wav, &[("title", "Tone 2"), ("artist", "Generator")]),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_short_clip_is_unprocessable() {
        let app = test_app().await;
        let response = app
            .oneshot(multipart_request("/api/identify", multipart_body(&tone_wav(0.02), &[])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_garbage_upload_is_unprocessable() {
        let app = test_app().await;
        let response = app
            .oneshot(multipart_request("/api/identify", multipart_body(b"not audio", &[])))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_add_song_requires_title() {
        let app = test_app().await;
        let response = app
            .oneshot(multipart_request(
                "/api/songs",
                multipart_body(&tone_wav(1.0), &[("artist", "Someone")]),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_count_and_delete_missing() {
        let app = test_app().await;

        let response = app
            .clone()
            .oneshot(Request::get("/api/songs/count").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(response).await["count"], 0);

        let response = app
            .oneshot(Request::delete("/api/songs/42").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
