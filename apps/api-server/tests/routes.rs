use ai::blip::{CaptionGraph, CaptionModel, SpecialTokens, TokenDecoder};
use ai::{ModelKind, ModelProvider, ModelRegistry, PreprocessConfig, VisionModel};
use api_server::routes::{get_routes, AppState};
use api_server::store::MemoryDiaryStore;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use diary_pipeline::{DiaryPipeline, PipelineConfig};
use image::{ImageFormat, Rgb, RgbImage};
use llm::{Chat, GenerationConfig, LLMMessage, LLMParams, StructuredGenerationClient};
use ndarray::{Array3, ArrayView2, ArrayView4};
use serde_json::{json, Value};
use std::io::Cursor;
use std::sync::Arc;
use tower::ServiceExt;

const BOUNDARY: &str = "diary-test-boundary";

struct OneWordGraph;

impl CaptionGraph for OneWordGraph {
    fn forward(&self, _: ArrayView4<f32>, input_ids: ArrayView2<i64>) -> anyhow::Result<Array3<f32>> {
        let seq_len = input_ids.shape()[1];
        // "park" first, end-of-sequence after
        let next = if seq_len == 1 { 2 } else { 1 };
        let mut logits = Array3::zeros((1, seq_len, 3));
        logits[[0, seq_len - 1, next]] = 1.0;
        Ok(logits)
    }
}

struct ParkTokenizer;

impl TokenDecoder for ParkTokenizer {
    fn decode_ids(&self, ids: &[u32]) -> anyhow::Result<String> {
        Ok(ids
            .iter()
            .filter(|&&id| id == 2)
            .map(|_| "park")
            .collect::<Vec<_>>()
            .join(" "))
    }
}

struct FakeVision;

#[async_trait]
impl ModelProvider<VisionModel> for FakeVision {
    async fn load(&self, kind: ModelKind) -> anyhow::Result<VisionModel> {
        match kind {
            ModelKind::Caption => Ok(VisionModel::Caption(CaptionModel::new(
                Box::new(OneWordGraph),
                Box::new(ParkTokenizer),
                SpecialTokens { bos: 0, eos: Some(1) },
                PreprocessConfig::blip(),
            ))),
            ModelKind::Mood => anyhow::bail!("no mood model"),
        }
    }
}

struct FixedChat(&'static str);

#[async_trait]
impl Chat for FixedChat {
    async fn get_completion(
        &self,
        _history: Vec<LLMMessage>,
        _params: Option<LLMParams>,
    ) -> anyhow::Result<String> {
        Ok(self.0.to_string())
    }
}

fn app(api_key: Option<&str>) -> Router {
    app_with_upload_limit(api_key, 20 * 1024 * 1024)
}

fn app_with_upload_limit(api_key: Option<&str>, max_upload_bytes: usize) -> Router {
    let registry = Arc::new(ModelRegistry::<VisionModel>::new(Arc::new(FakeVision)));
    let generator = StructuredGenerationClient::new(
        GenerationConfig {
            api_key: api_key.map(|v| v.to_string()),
            ..Default::default()
        },
        Arc::new(FixedChat(
            r#"{"refined_caption": "공원을 걸었다.", "keywords": ["공원", "산책"]}"#,
        )),
    );
    let pipeline = DiaryPipeline::new(
        registry,
        Arc::new(generator),
        PipelineConfig {
            decode: ai::blip::DecodeParams {
                min_new_tokens: 1,
                max_new_tokens: 5,
            },
            ..Default::default()
        },
    );

    get_routes(AppState {
        pipeline: Arc::new(pipeline),
        store: Arc::new(MemoryDiaryStore::new()),
        max_upload_bytes,
    })
}

fn jpeg() -> Vec<u8> {
    let mut buffer = Cursor::new(vec![]);
    RgbImage::from_pixel(100, 100, Rgb([30, 120, 40]))
        .write_to(&mut buffer, ImageFormat::Jpeg)
        .unwrap();
    buffer.into_inner()
}

/// A PNG of pseudo random noise, about 3 MB since noise does not compress.
fn large_png() -> Vec<u8> {
    let mut state: u32 = 0x2545_f491;
    let image = RgbImage::from_fn(1000, 1000, |_, _| {
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        };
        Rgb([next(), next(), next()])
    });
    let mut buffer = Cursor::new(vec![]);
    image.write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
}

fn multipart(image: &[u8], fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = vec![];
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image_file\"; filename=\"park.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(image);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn multipart_request(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "Content-Type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn json_request(uri: &str, value: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(value.to_string()))
        .unwrap()
}

async fn read_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[test_log::test(tokio::test)]
async fn analyze_returns_caption() {
    let response = app(Some("sk-test"))
        .oneshot(multipart_request("/api/v1/analyze/", multipart(&jpeg(), &[])))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = read_json(response).await;
    assert_eq!(json["caption"], "park");
    assert_eq!(json["moods"], json!([]));
}

#[test_log::test(tokio::test)]
async fn uploads_above_two_megabytes_are_accepted() {
    let image = large_png();
    assert!(image.len() > 2 * 1024 * 1024, "only {} bytes", image.len());

    let response = app(Some("sk-test"))
        .oneshot(multipart_request("/api/v1/analyze/", multipart(&image, &[])))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["caption"], "park");
}

#[test_log::test(tokio::test)]
async fn uploads_over_the_configured_limit_are_rejected() {
    let response = app_with_upload_limit(Some("sk-test"), 64 * 1024)
        .oneshot(multipart_request("/api/v1/analyze/", multipart(&large_png(), &[])))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[test_log::test(tokio::test)]
async fn undecodable_upload_is_bad_request() {
    let response = app(Some("sk-test"))
        .oneshot(multipart_request(
            "/api/v1/analyze/",
            multipart(b"not a jpeg", &[]),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = read_json(response).await;
    assert!(json["detail"].as_str().unwrap().starts_with("invalid image"));
}

#[test_log::test(tokio::test)]
async fn generate_returns_diary_and_tags() {
    let response = app(Some("sk-test"))
        .oneshot(json_request(
            "/api/v1/generate/",
            json!({"blip_caption": "a park", "user_input": "산책을 했다"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        read_json(response).await,
        json!({"diary": "공원을 걸었다.", "tags": ["공원", "산책"]})
    );
}

#[test_log::test(tokio::test)]
async fn degraded_generation_is_service_unavailable() {
    let response = app(None)
        .oneshot(json_request(
            "/api/v1/generate/",
            json!({"blip_caption": "a park"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json = read_json(response).await;
    assert!(json["detail"]
        .as_str()
        .unwrap()
        .starts_with("LLM API 호출 실패"));
}

#[test_log::test(tokio::test)]
async fn diary_is_created_and_read_back() {
    let app = app(Some("sk-test"));

    let response = app
        .clone()
        .oneshot(multipart_request(
            "/api/v1/diary/",
            multipart(
                &jpeg(),
                &[
                    ("user_input", "산책을 했다"),
                    ("latitude", "37.5"),
                    ("longitude", "127.0"),
                    ("location", "서울"),
                ],
            ),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let created = read_json(response).await;
    assert_eq!(created["id"], 1);
    assert_eq!(created["refined_caption"], "공원을 걸었다.");
    assert_eq!(created["blip_caption"], "park");
    assert_eq!(created["image_file"], "park.jpg");
    assert_eq!(created["latitude"], 37.5);
    assert_eq!(created["location"], "서울");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/diary/1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["keywords"], json!(["공원", "산책"]));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/diary/9")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
