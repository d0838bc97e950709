use std::path::{Path, PathBuf};

use axum::body::{Body, Bytes};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde_json::json;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tower_http::cors::{Any, CorsLayer};

use pcb_inspect_core::pipeline::annotate_image_use_case::AnnotateImageUseCase;
use pcb_inspect_core::pipeline::transcode_video_use_case::TranscodeVideoUseCase;
use pcb_inspect_core::shared::constants::VIDEO_MIME_TYPE;
use pcb_inspect_core::video::infrastructure::image_file_reader::ImageFileReader;
use pcb_inspect_core::video::infrastructure::jpeg_image_writer::JpegImageWriter;

use crate::error::ApiError;
use crate::state::AppState;

/// Annotated videos are streamed back in chunks of this size (1 MiB).
pub const STREAM_CHUNK_BYTES: usize = 1024 * 1024;

/// Multipart field carrying the uploaded media.
const UPLOAD_FIELD: &str = "file";

const IMAGE_FAILED: &str = "Image prediction failed";
const VIDEO_FAILED: &str = "Video prediction failed";

pub fn router(state: AppState, api_prefix: &str, max_upload_bytes: usize) -> Router {
    let api = Router::new()
        .route("/predict/image", post(predict_image))
        .route("/predict/video", post(predict_video));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .nest(api_prefix, api)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors)
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    log::info!("Health check");
    Json(json!({ "message": "PCB Defect Detection API is running!" }))
}

async fn predict_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let upload = receive_upload(multipart, "jpg").await?;
    log::info!("Annotating image {}", upload.original_name);

    let annotator = state.annotator.clone();
    let input = upload.path.clone();
    let result = tokio::task::spawn_blocking(move || {
        AnnotateImageUseCase::new(
            Box::new(ImageFileReader::new()),
            Box::new(JpegImageWriter::new()),
            annotator,
        )
        .execute(&input)
    })
    .await
    .map_err(|e| ApiError::internal(IMAGE_FAILED, e.to_string()))?;
    drop(upload);

    let image = result.map_err(|e| ApiError::from_pipeline(IMAGE_FAILED, &e))?;
    Ok(([(header::CONTENT_TYPE, image.mime_type)], image.bytes).into_response())
}

async fn predict_video(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let upload = receive_upload(multipart, "mp4").await?;
    log::info!("Annotating video {}", upload.original_name);

    let input = upload.path.clone();
    let output = upload.dir.path().join("annotated.mp4");
    let result = tokio::task::spawn_blocking(move || {
        TranscodeVideoUseCase::new(state.backend, state.annotator, &state.settings)
            .transcode(&input, &output)
    })
    .await
    .map_err(|e| ApiError::internal(VIDEO_FAILED, e.to_string()))?;

    let output = result.map_err(|e| ApiError::from_pipeline(VIDEO_FAILED, &e))?;
    let size = tokio::fs::metadata(&output)
        .await
        .map_err(|e| ApiError::internal(VIDEO_FAILED, e.to_string()))?
        .len();

    let body = Body::from_stream(stream_file(upload.dir, output));
    Ok((
        [
            (header::CONTENT_TYPE, VIDEO_MIME_TYPE.to_string()),
            (header::CONTENT_LENGTH, size.to_string()),
        ],
        body,
    )
        .into_response())
}

/// An uploaded file staged in its own temporary directory.
struct Upload {
    dir: TempDir,
    path: PathBuf,
    original_name: String,
}

/// Copies the `file` field to disk chunk by chunk.
async fn receive_upload(mut multipart: Multipart, default_ext: &str) -> Result<Upload, ApiError> {
    while let Some(mut field) = multipart.next_field().await.map_err(ApiError::from_multipart)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let original_name = field.file_name().unwrap_or("upload").to_string();
        let dir = tempfile::Builder::new()
            .prefix("pcb-inspect-")
            .tempdir()
            .map_err(|e| ApiError::internal("Could not stage upload", e.to_string()))?;
        let path = dir
            .path()
            .join(format!("input.{}", upload_extension(&original_name, default_ext)));

        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| ApiError::internal("Could not stage upload", e.to_string()))?;
        let mut received = 0usize;
        while let Some(chunk) = field.chunk().await.map_err(ApiError::from_multipart)? {
            received += chunk.len();
            file.write_all(&chunk)
                .await
                .map_err(|e| ApiError::internal("Could not stage upload", e.to_string()))?;
        }
        file.flush()
            .await
            .map_err(|e| ApiError::internal("Could not stage upload", e.to_string()))?;

        if received == 0 {
            return Err(ApiError::bad_request(
                "Invalid upload",
                format!("'{original_name}' is empty"),
            ));
        }
        log::debug!("Staged {received} bytes of {original_name} at {}", path.display());

        return Ok(Upload {
            dir,
            path,
            original_name,
        });
    }

    Err(ApiError::bad_request(
        "Invalid upload",
        format!("missing multipart field '{UPLOAD_FIELD}'"),
    ))
}

/// Extension of the client's file name if it is a plain alphanumeric one.
fn upload_extension<'a>(file_name: &'a str, default_ext: &'a str) -> &'a str {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or(default_ext)
}

/// Streams `path` in [`STREAM_CHUNK_BYTES`] chunks.
///
/// Owns `dir`, so the staged upload and the annotated output are removed
/// once the body is finished or the client disconnects.
fn stream_file(dir: TempDir, path: PathBuf) -> impl Stream<Item = std::io::Result<Bytes>> {
    async_stream::try_stream! {
        let _dir = dir;
        let mut file = tokio::fs::File::open(&path).await?;
        let mut buf = vec![0u8; STREAM_CHUNK_BYTES];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            yield Bytes::copy_from_slice(&buf[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::http::{Request, StatusCode};
    use futures::StreamExt;
    use tower::ServiceExt;

    use pcb_inspect_core::annotation::domain::frame_annotator::FrameAnnotator;
    use pcb_inspect_core::pipeline::pipeline_settings::PipelineSettings;
    use pcb_inspect_core::shared::error::BoxError;
    use pcb_inspect_core::shared::frame::Frame;
    use pcb_inspect_core::shared::video_metadata::{FrameRate, VideoMetadata};
    use pcb_inspect_core::video::domain::video_backend::VideoBackend;
    use pcb_inspect_core::video::domain::video_reader::VideoReader;
    use pcb_inspect_core::video::domain::video_writer::VideoWriter;

    const PREFIX: &str = "/pcb/api/v1";
    const BOUNDARY: &str = "pcb-inspect-test-boundary";

    /// Magic prefix the stub reader accepts as a "video".
    const STUB_MAGIC: &[u8] = b"STUBVID";
    const STUB_W: u32 = 4;
    const STUB_H: u32 = 4;

    struct PaintAnnotator {
        fail: bool,
    }

    impl FrameAnnotator for PaintAnnotator {
        fn annotate(&self, mut frame: Frame) -> Result<Frame, BoxError> {
            if self.fail {
                return Err("inference session lost".into());
            }
            frame.data_mut()[0] = 255;
            Ok(frame)
        }
    }

    /// Reads either `STUB_MAGIC` plus a frame count byte (a fresh upload) or
    /// raw frames as written by [`StubWriter`] (re-read while padding).
    #[derive(Default)]
    struct StubReader {
        frames: Vec<Frame>,
    }

    impl VideoReader for StubReader {
        fn open(&mut self, path: &Path) -> Result<VideoMetadata, BoxError> {
            let data = std::fs::read(path)?;
            let frame_bytes = (STUB_W * STUB_H * 3) as usize;
            self.frames = if data.starts_with(STUB_MAGIC) && data.len() == STUB_MAGIC.len() + 1 {
                (0..data[STUB_MAGIC.len()] as usize)
                    .map(|i| Frame::filled(STUB_W, STUB_H, [0, 0, 0], i))
                    .collect()
            } else if !data.is_empty() && data.len() % frame_bytes == 0 {
                data.chunks(frame_bytes)
                    .enumerate()
                    .map(|(i, chunk)| Frame::new(chunk.to_vec(), STUB_W, STUB_H, 3, i))
                    .collect()
            } else {
                return Err("unrecognised container".into());
            };
            Ok(VideoMetadata {
                width: STUB_W,
                height: STUB_H,
                frame_rate: FrameRate::from_fps(30),
                total_frames: self.frames.len(),
                codec: "stub".into(),
                source_path: Some(path.to_path_buf()),
            })
        }

        fn frames(&mut self) -> Box<dyn Iterator<Item = Result<Frame, BoxError>> + '_> {
            Box::new(self.frames.drain(..).map(Ok))
        }

        fn close(&mut self) {
            self.frames.clear();
        }
    }

    /// Appends raw frame bytes to the output file.
    #[derive(Default)]
    struct StubWriter {
        path: Option<PathBuf>,
        file: Option<std::fs::File>,
    }

    impl VideoWriter for StubWriter {
        fn open(&mut self, path: &Path, _metadata: &VideoMetadata) -> Result<(), BoxError> {
            self.file = Some(std::fs::File::create(path)?);
            self.path = Some(path.to_path_buf());
            Ok(())
        }

        fn write(&mut self, frame: &Frame) -> Result<(), BoxError> {
            use std::io::Write;
            self.file.as_mut().ok_or("not opened")?.write_all(frame.data())?;
            Ok(())
        }

        fn bytes_written(&mut self) -> Result<u64, BoxError> {
            Ok(std::fs::metadata(self.path.as_ref().ok_or("not opened")?)?.len())
        }

        fn close(&mut self) -> Result<(), BoxError> {
            self.file = None;
            Ok(())
        }
    }

    struct StubBackend;

    impl VideoBackend for StubBackend {
        fn reader(&self) -> Box<dyn VideoReader> {
            Box::new(StubReader::default())
        }

        fn writer(&self) -> Box<dyn VideoWriter> {
            Box::new(StubWriter::default())
        }
    }

    fn app(fail_annotation: bool, settings: PipelineSettings) -> Router {
        let state = AppState {
            annotator: Arc::new(PaintAnnotator {
                fail: fail_annotation,
            }),
            backend: Arc::new(StubBackend),
            settings,
        };
        router(state, PREFIX, 16 * 1024 * 1024)
    }

    fn unpadded() -> PipelineSettings {
        PipelineSettings {
            min_output_bytes: 0,
            ..PipelineSettings::default()
        }
    }

    fn multipart_request(uri: &str, field: &str, file_name: &str, content: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn stub_video(frames: u8) -> Vec<u8> {
        let mut data = STUB_MAGIC.to_vec();
        data.push(frames);
        data
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_root_reports_running() {
        let response = app(false, unpadded())
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["message"], "PCB Defect Detection API is running!");
    }

    #[tokio::test]
    async fn test_predict_video_returns_annotated_mp4() {
        let uri = format!("{PREFIX}/predict/video");
        let response = app(false, unpadded())
            .oneshot(multipart_request(&uri, "file", "board.mp4", &stub_video(3)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], VIDEO_MIME_TYPE);
        let frame_bytes = (STUB_W * STUB_H * 3) as usize;
        assert_eq!(
            response.headers()[header::CONTENT_LENGTH],
            (3 * frame_bytes).to_string().as_str()
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body.len(), 3 * frame_bytes);
        for frame in body.chunks(frame_bytes) {
            assert_eq!(frame[0], 255, "every frame is annotated");
        }
    }

    #[tokio::test]
    async fn test_predict_video_pads_small_output() {
        let frame_bytes = (STUB_W * STUB_H * 3) as u64;
        let settings = PipelineSettings {
            min_output_bytes: 10 * frame_bytes,
            ..PipelineSettings::default()
        };
        let uri = format!("{PREFIX}/predict/video");
        let response = app(false, settings)
            .oneshot(multipart_request(&uri, "file", "board.mp4", &stub_video(2)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body.len() as u64, 10 * frame_bytes);
    }

    #[tokio::test]
    async fn test_predict_video_rejects_garbage_with_400() {
        let uri = format!("{PREFIX}/predict/video");
        let response = app(false, unpadded())
            .oneshot(multipart_request(&uri, "file", "notes.mp4", b"hello world"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert_eq!(json["message"], VIDEO_FAILED);
        assert_eq!(json["status"], "error");
        assert!(json["details"]
            .as_str()
            .unwrap()
            .contains("unrecognised container"));
    }

    #[tokio::test]
    async fn test_predict_video_annotation_failure_is_500() {
        let uri = format!("{PREFIX}/predict/video");
        let response = app(true, unpadded())
            .oneshot(multipart_request(&uri, "file", "board.mp4", &stub_video(3)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = json_body(response).await;
        assert!(json["details"].as_str().unwrap().contains("frame 0"));
    }

    #[tokio::test]
    async fn test_missing_file_field_is_400() {
        let uri = format!("{PREFIX}/predict/video");
        let response = app(false, unpadded())
            .oneshot(multipart_request(&uri, "attachment", "board.mp4", &stub_video(1)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert!(json["details"].as_str().unwrap().contains("'file'"));
    }

    #[tokio::test]
    async fn test_empty_upload_is_400() {
        let uri = format!("{PREFIX}/predict/image");
        let response = app(false, unpadded())
            .oneshot(multipart_request(&uri, "file", "board.png", b""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_predict_image_returns_jpeg() {
        let mut png = Vec::new();
        image::RgbImage::from_pixel(32, 24, image::Rgb([0, 100, 0]))
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let uri = format!("{PREFIX}/predict/image");
        let response = app(false, unpadded())
            .oneshot(multipart_request(&uri, "file", "board.png", &png))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let decoded = image::load_from_memory(&body).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[tokio::test]
    async fn test_predict_image_rejects_non_image_with_400() {
        let uri = format!("{PREFIX}/predict/image");
        let response = app(false, unpadded())
            .oneshot(multipart_request(&uri, "file", "board.png", b"plain text"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["message"], IMAGE_FAILED);
    }

    #[tokio::test]
    async fn test_stream_file_chunks_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let dir_path = dir.path().to_path_buf();
        let path = dir_path.join("out.mp4");
        std::fs::write(&path, vec![7u8; STREAM_CHUNK_BYTES + 10]).unwrap();

        let chunks: Vec<Bytes> = stream_file(dir, path)
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.iter().map(Bytes::len).sum::<usize>(), STREAM_CHUNK_BYTES + 10);
        assert!(chunks.iter().all(|c| c.len() <= STREAM_CHUNK_BYTES));
        assert!(!dir_path.exists(), "temp dir removed after streaming");
    }

    #[test]
    fn test_upload_extension() {
        assert_eq!(upload_extension("board.MOV", "mp4"), "MOV");
        assert_eq!(upload_extension("no_extension", "mp4"), "mp4");
        assert_eq!(upload_extension("weird.m p4", "mp4"), "mp4");
    }
}
