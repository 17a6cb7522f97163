use super::AppState;
use crate::error::ApiError;
use ai::clip::MoodScore;
use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use diary_pipeline::{DiaryRecord, GeoTag, NewDiaryRecord};
use llm::GenerationOutcome;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub caption: String,
    pub moods: Vec<MoodScore>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub blip_caption: String,
    pub user_input: Option<String>,
    #[serde(default)]
    pub moods: Vec<MoodScore>,
    // accepted from existing clients, generation does not use them
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub location: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub diary: String,
    pub tags: Vec<String>,
}

/// Fields of a multipart diary upload.
#[derive(Debug, Default)]
struct DiaryForm {
    image: Option<(Option<String>, Vec<u8>)>,
    user_input: Option<String>,
    geo: GeoTag,
}

async fn read_form(mut multipart: Multipart) -> Result<DiaryForm, ApiError> {
    let mut form = DiaryForm::default();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image_file" | "file" | "image" => {
                let file_name = field.file_name().map(|v| v.to_string());
                let bytes = field.bytes().await?;
                form.image = Some((file_name, bytes.to_vec()));
            }
            "user_input" | "file_info" => form.user_input = Some(field.text().await?),
            "location" => form.geo.location = Some(field.text().await?),
            "latitude" => form.geo.latitude = parse_coordinate(&name, &field.text().await?)?,
            "longitude" => form.geo.longitude = parse_coordinate(&name, &field.text().await?)?,
            _ => tracing::debug!("ignoring multipart field {}", name),
        }
    }

    Ok(form)
}

fn parse_coordinate(name: &str, value: &str) -> Result<Option<f64>, ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<f64>()
        .map(Some)
        .map_err(|_| ApiError::BadRequest(format!("invalid {}: {}", name, value)))
}

fn degraded_to_error(outcome: &GenerationOutcome) -> Result<(), ApiError> {
    match outcome {
        GenerationOutcome::Degraded { result, .. } => {
            Err(ApiError::GenerationDegraded(result.refined_caption.clone()))
        }
        GenerationOutcome::Generated(_) => Ok(()),
    }
}

pub async fn analyze(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let form = read_form(multipart).await?;
    let Some((_, bytes)) = form.image else {
        return Err(ApiError::BadRequest("image_file is required".into()));
    };

    let analysis = state.pipeline.analyze(bytes).await?;
    Ok(Json(AnalyzeResponse {
        caption: analysis.caption,
        moods: analysis.moods,
    }))
}

pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    if request.blip_caption.trim().is_empty() {
        return Err(ApiError::BadRequest("blip_caption is required".into()));
    }

    let outcome = state
        .pipeline
        .generate(
            &request.blip_caption,
            request.user_input.as_deref(),
            &request.moods,
        )
        .await;
    degraded_to_error(&outcome)?;

    let result = outcome.into_result();
    Ok(Json(GenerateResponse {
        diary: result.refined_caption,
        tags: result.keywords,
    }))
}

pub async fn create_diary(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<DiaryRecord>), ApiError> {
    let form = read_form(multipart).await?;
    let Some((file_name, bytes)) = form.image else {
        return Err(ApiError::BadRequest("image_file is required".into()));
    };

    let user_context = form.user_input.as_deref();
    let entry = state.pipeline.run(bytes, user_context).await?;
    degraded_to_error(&entry.outcome)?;

    let record = NewDiaryRecord::from_entry(&entry, user_context, file_name.as_deref(), form.geo);
    let record = state.store.insert(record).await?;
    tracing::info!("diary {} created", record.id);

    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn list_diaries(
    State(state): State<AppState>,
) -> Result<Json<Vec<DiaryRecord>>, ApiError> {
    Ok(Json(state.store.list().await?))
}

pub async fn get_diary(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<DiaryRecord>, ApiError> {
    match state.store.get(id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::NotFound(format!("diary {} not found", id))),
    }
}
