//! One upload attempt, from form validation to the persisted case record.
//!
//! Stages run strictly in order and nothing is retried: a failure after the video upload
//! leaves already stored objects behind, and a new attempt starts again from validation.

use crate::access::{generate_slug, hash_access_password};
use doc_model::{landing_url, CaseRecord, NewCaseRecord, PortalConfig, Slug, DEFAULT_TITLE};
use pdf_engine::{AnnotateError, Annotator, PdfEngine, QrCodeEncoder, QrEncoder, QrError};
use placement::{PlacementError, PlacementSession, SessionState};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{SystemTime, UNIX_EPOCH};
use storage::{ObjectStore, RecordStore, StorageError};

pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;
const DEFAULT_VIDEO_EXTENSION: &str = "mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    Idle,
    Validating,
    UploadingVideo,
    GeneratingQr,
    AwaitingPlacement,
    FinalizingPdf,
    UploadingPdf,
    PersistingRecord,
    Done,
    Failed,
}

impl UploadStage {
    /// Progress line shown to the operator while the stage runs.
    pub fn status_message(self) -> &'static str {
        match self {
            Self::Idle => "Ready",
            Self::Validating => "Checking files...",
            Self::UploadingVideo => "Uploading video...",
            Self::GeneratingQr => "Generating QR code...",
            Self::AwaitingPlacement => "Position the QR code on the first page",
            Self::FinalizingPdf => "Finalizing PDF...",
            Self::UploadingPdf => "Uploading PDF...",
            Self::PersistingRecord => "Saving case...",
            Self::Done => "Done",
            Self::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error(
        "the video is {:.2} MB, above the {} MB limit; compress it and try again",
        megabytes(.size),
        .limit / 1_048_576
    )]
    VideoTooLarge { size: u64, limit: u64 },
}

fn megabytes(bytes: &u64) -> f64 {
    *bytes as f64 / 1_048_576.0
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("network error while uploading: {0}")]
    TransientNetwork(#[source] StorageError),
    #[error("the file is larger than the storage limit allows; raise the bucket size limit")]
    Quota(#[source] StorageError),
    #[error("storage rejected the upload: {0}")]
    Storage(#[source] StorageError),
    #[error("could not generate the QR code: {0}")]
    Qr(#[from] QrError),
    #[error("could not load the PDF: {0}")]
    DocumentLoad(String),
    #[error("could not finalize the PDF: {0}")]
    Annotate(#[source] AnnotateError),
    #[error("placement failed: {0}")]
    Placement(#[from] PlacementError),
    #[error("could not save the case record: {0}")]
    Persistence(#[source] StorageError),
}

impl UploadError {
    fn from_upload(err: StorageError) -> Self {
        if err.is_quota() {
            Self::Quota(err)
        } else if err.is_transient() {
            Self::TransientNetwork(err)
        } else {
            Self::Storage(err)
        }
    }
}

impl From<AnnotateError> for UploadError {
    fn from(err: AnnotateError) -> Self {
        if err.is_document_error() {
            Self::DocumentLoad(err.to_string())
        } else {
            Self::Annotate(err)
        }
    }
}

/// Form fields of one upload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub case_number: String,
    pub title: Option<String>,
    pub password: Option<String>,
    pub pdf: Vec<u8>,
    pub video: Vec<u8>,
    pub video_file_name: String,
    pub viewport_width: u32,
}

impl UploadRequest {
    pub fn new(
        case_number: impl Into<String>,
        pdf: Vec<u8>,
        video_file_name: impl Into<String>,
        video: Vec<u8>,
    ) -> Self {
        Self {
            case_number: case_number.into(),
            title: None,
            password: None,
            pdf,
            video,
            video_file_name: video_file_name.into(),
            viewport_width: DEFAULT_VIEWPORT_WIDTH,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_viewport_width(mut self, width: u32) -> Self {
        self.viewport_width = width;
        self
    }

    fn validate(&self, max_video_bytes: u64) -> Result<(), ValidationError> {
        if self.case_number.trim().is_empty() {
            return Err(ValidationError::Missing("case number"));
        }
        if self.pdf.is_empty() {
            return Err(ValidationError::Missing("PDF document"));
        }
        if self.video.is_empty() || self.video_file_name.trim().is_empty() {
            return Err(ValidationError::Missing("video"));
        }

        let size = self.video.len() as u64;
        if size > max_video_bytes {
            return Err(ValidationError::VideoTooLarge { size, limit: max_video_bytes });
        }

        Ok(())
    }

    fn title(&self) -> String {
        self.title
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .unwrap_or(DEFAULT_TITLE)
            .to_owned()
    }

    fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|password| !password.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementDecision {
    Confirm,
    Cancel,
}

/// Operator side of the placement step.
pub trait PlacementDriver {
    fn place(&mut self, session: &mut PlacementSession) -> PlacementDecision;
}

/// Confirms wherever the overlay is, optionally after moving it to a fixed render position.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedPlacement {
    pub at: Option<(f32, f32)>,
}

impl FixedPlacement {
    pub fn centered() -> Self {
        Self { at: None }
    }

    pub fn at(x: f32, y: f32) -> Self {
        Self { at: Some((x, y)) }
    }
}

impl PlacementDriver for FixedPlacement {
    fn place(&mut self, session: &mut PlacementSession) -> PlacementDecision {
        if let Some((x, y)) = self.at {
            if let Err(err) = session.move_to(x, y) {
                log::warn!("could not move overlay: {err}");
                return PlacementDecision::Cancel;
            }
        }
        PlacementDecision::Confirm
    }
}

#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub record: CaseRecord,
    pub landing_url: String,
    pub qr_png: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum UploadOutcome {
    Done(UploadReceipt),
    Cancelled,
}

pub fn video_object_path(slug: &Slug, file_name: &str, unix_millis: u128, nonce: u32) -> String {
    format!("videos/{slug}_video_{unix_millis}_{nonce}.{}", video_extension(file_name))
}

pub fn document_object_path(slug: &Slug) -> String {
    format!("documents/{slug}_with_qr.pdf")
}

fn video_extension(file_name: &str) -> String {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.bytes().all(|byte| byte.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| DEFAULT_VIDEO_EXTENSION.to_owned())
}

fn video_content_type(extension: &str) -> &'static str {
    match extension {
        "mp4" | "m4v" => "video/mp4",
        "mov" => "video/quicktime",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}

fn unix_millis() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_millis()).unwrap_or(0)
}

pub struct UploadOrchestrator<'a> {
    config: &'a PortalConfig,
    objects: &'a dyn ObjectStore,
    records: &'a dyn RecordStore,
    engine: &'a mut dyn PdfEngine,
    encoder: Box<dyn QrEncoder + 'a>,
    rng: StdRng,
    stage: UploadStage,
    history: Vec<UploadStage>,
}

impl<'a> UploadOrchestrator<'a> {
    pub fn new(
        config: &'a PortalConfig,
        objects: &'a dyn ObjectStore,
        records: &'a dyn RecordStore,
        engine: &'a mut dyn PdfEngine,
    ) -> Self {
        Self {
            config,
            objects,
            records,
            engine,
            encoder: Box::new(QrCodeEncoder::default()),
            rng: StdRng::from_entropy(),
            stage: UploadStage::Idle,
            history: vec![UploadStage::Idle],
        }
    }

    pub fn with_encoder(mut self, encoder: impl QrEncoder + 'a) -> Self {
        self.encoder = Box::new(encoder);
        self
    }

    /// Deterministic slugs and object names.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn stage(&self) -> UploadStage {
        self.stage
    }

    /// Every stage entered during the latest attempt, starting at `Idle`.
    pub fn history(&self) -> &[UploadStage] {
        &self.history
    }

    fn enter(&mut self, stage: UploadStage) {
        log::info!("upload stage {:?}: {}", stage, stage.status_message());
        self.stage = stage;
        self.history.push(stage);
    }

    pub fn run(
        &mut self,
        request: &UploadRequest,
        driver: &mut dyn PlacementDriver,
    ) -> Result<UploadOutcome, UploadError> {
        self.history.clear();
        self.history.push(UploadStage::Idle);
        self.stage = UploadStage::Idle;

        self.enter(UploadStage::Validating);
        if let Err(err) = request.validate(self.config.limits.max_video_bytes) {
            log::info!("upload rejected before any I/O: {err}");
            self.enter(UploadStage::Idle);
            return Err(err.into());
        }

        match self.run_stages(request, driver) {
            Ok(UploadOutcome::Cancelled) => {
                self.enter(UploadStage::Idle);
                Ok(UploadOutcome::Cancelled)
            }
            Ok(outcome) => {
                self.enter(UploadStage::Done);
                Ok(outcome)
            }
            Err(err) => {
                log::error!("upload failed during {:?}: {err}", self.stage);
                self.enter(UploadStage::Failed);
                Err(err)
            }
        }
    }

    fn run_stages(
        &mut self,
        request: &UploadRequest,
        driver: &mut dyn PlacementDriver,
    ) -> Result<UploadOutcome, UploadError> {
        let slug = generate_slug(&mut self.rng);
        let landing_url = landing_url(self.config.viewer_origin(), &slug);

        self.enter(UploadStage::UploadingVideo);
        let nonce = self.rng.gen_range(0..10_000);
        let video_path = video_object_path(&slug, &request.video_file_name, unix_millis(), nonce);
        let content_type = video_content_type(&video_extension(&request.video_file_name));
        let video_url = self
            .objects
            .put(&self.config.buckets.videos, &video_path, &request.video, content_type)
            .map_err(UploadError::from_upload)?;

        self.enter(UploadStage::GeneratingQr);
        let qr_png = self.encoder.encode_png(&landing_url)?;

        self.enter(UploadStage::AwaitingPlacement);
        let mut session = PlacementSession::open(
            &mut *self.engine,
            &request.pdf,
            qr_png.clone(),
            request.viewport_width,
            &self.config.placement,
        );
        if let SessionState::Failed { message } = session.state() {
            return Err(UploadError::DocumentLoad(message.clone()));
        }

        match driver.place(&mut session) {
            PlacementDecision::Cancel => {
                if let Err(err) = session.cancel() {
                    log::debug!("placement already closed: {err}");
                }
                log::info!("placement cancelled, discarding slug {slug}");
                return Ok(UploadOutcome::Cancelled);
            }
            PlacementDecision::Confirm => {
                if matches!(session.state(), SessionState::Ready) {
                    session.confirm()?;
                }
            }
        }
        let target = session.annotation_target(&landing_url)?;

        self.enter(UploadStage::FinalizingPdf);
        let annotated = Annotator::new(self.config.branding.qr_caption.clone())
            .annotate_supervised(&request.pdf, &qr_png, &target)?;

        self.enter(UploadStage::UploadingPdf);
        let pdf_url = self
            .objects
            .put(
                &self.config.buckets.documents,
                &document_object_path(&slug),
                &annotated.bytes,
                "application/pdf",
            )
            .map_err(UploadError::from_upload)?;

        self.enter(UploadStage::PersistingRecord);
        let new_record = NewCaseRecord {
            slug: slug.clone(),
            case_number: request.case_number.trim().to_owned(),
            title: request.title(),
            video_url,
            pdf_url,
            access_password_hash: request
                .password()
                .map(|password| hash_access_password(&slug, password)),
        };
        let record = self.records.insert(new_record).map_err(UploadError::Persistence)?;

        Ok(UploadOutcome::Done(UploadReceipt { record, landing_url, qr_png }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slug() -> Slug {
        "AB12CD".parse().expect("slug should parse")
    }

    #[test]
    fn object_paths_follow_naming_scheme() {
        assert_eq!(
            video_object_path(&slug(), "Audiência Final.MOV", 1_714_564_800_000, 42),
            "videos/AB12CD_video_1714564800000_42.mov"
        );
        assert_eq!(document_object_path(&slug()), "documents/AB12CD_with_qr.pdf");
    }

    #[test]
    fn video_extension_defaults_to_mp4() {
        assert_eq!(video_extension("clip"), "mp4");
        assert_eq!(video_extension("clip."), "mp4");
        assert_eq!(video_extension("weird.m p4"), "mp4");
        assert_eq!(video_extension("a.b.webm"), "webm");
    }

    #[test]
    fn validation_checks_required_fields_and_size() {
        let request = UploadRequest::new("123", b"%PDF".to_vec(), "v.mp4", vec![0; 11]);
        assert_eq!(request.validate(10), Err(ValidationError::VideoTooLarge { size: 11, limit: 10 }));
        assert_eq!(request.validate(11), Ok(()));

        let blank_case = UploadRequest::new("  ", b"%PDF".to_vec(), "v.mp4", vec![1]);
        assert_eq!(blank_case.validate(10), Err(ValidationError::Missing("case number")));

        let no_pdf = UploadRequest::new("1", Vec::new(), "v.mp4", vec![1]);
        assert_eq!(no_pdf.validate(10), Err(ValidationError::Missing("PDF document")));

        let no_video = UploadRequest::new("1", b"%PDF".to_vec(), "v.mp4", Vec::new());
        assert_eq!(no_video.validate(10), Err(ValidationError::Missing("video")));
    }

    #[test]
    fn oversize_message_is_in_megabytes() {
        let err = ValidationError::VideoTooLarge { size: 60 * 1_048_576, limit: 50 * 1_048_576 };
        assert_eq!(
            err.to_string(),
            "the video is 60.00 MB, above the 50 MB limit; compress it and try again"
        );
    }

    #[test]
    fn title_and_password_fall_back_when_blank() {
        let request = UploadRequest::new("1", Vec::new(), "v.mp4", Vec::new())
            .with_title("   ")
            .with_password("");

        assert_eq!(request.title(), DEFAULT_TITLE);
        assert_eq!(request.password(), None);
    }

    #[test]
    fn storage_errors_map_to_upload_taxonomy() {
        assert!(matches!(
            UploadError::from_upload(StorageError::Transport("reset".to_owned())),
            UploadError::TransientNetwork(_)
        ));
        assert!(matches!(
            UploadError::from_upload(StorageError::Quota("too big".to_owned())),
            UploadError::Quota(_)
        ));
        assert!(matches!(
            UploadError::from_upload(StorageError::Rejected { status: 403, body: String::new() }),
            UploadError::Storage(_)
        ));
    }
}
