use crate::{clamp_drag, clamp_position, to_native_position_with_margin};
use doc_model::{
    AnnotationTarget, NativePosition, OverlayPosition, PlacementSettings, RenderedPage,
};
use pdf_engine::{
    panic_message, OpenSource, PdfEngine, PdfEngineError, PreviewRequest, RgbaImage,
};
use std::panic::{self, AssertUnwindSafe};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlacementError {
    #[error("placement session is closed")]
    SessionClosed,
    #[error("placement has not been confirmed")]
    NotConfirmed,
    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Ready,
    Confirmed(OverlayPosition),
    Cancelled,
    Failed { message: String },
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Ready)
    }
}

/// One modal placement of the QR overlay over a preview of page 1.
#[derive(Debug)]
pub struct PlacementSession {
    state: SessionState,
    page: Option<RenderedPage>,
    preview: Option<RgbaImage>,
    position: OverlayPosition,
    qr_png: Vec<u8>,
    qr_size: f32,
    bottom_margin: f32,
}

impl PlacementSession {
    /// Renders page 1 and centers the overlay on it. A renderer error or panic leaves the
    /// session in [`SessionState::Failed`]; it never retries on its own.
    pub fn open(
        engine: &mut dyn PdfEngine,
        document: &[u8],
        qr_png: Vec<u8>,
        viewport_width: u32,
        settings: &PlacementSettings,
    ) -> Self {
        let target_width = settings.preview_width(viewport_width);

        let rendered = panic::catch_unwind(AssertUnwindSafe(|| {
            render_first_page(engine, document, target_width)
        }));

        match rendered {
            Ok(Ok((page, preview))) => {
                log::debug!(
                    "placement preview {}x{} for native {}x{}",
                    page.rendered_width,
                    page.rendered_height,
                    page.native_width,
                    page.native_height
                );
                let mut session = Self::with_page(page, qr_png, settings);
                session.preview = Some(preview);
                session
            }
            Ok(Err(err)) => Self::failed(format!("Could not load the PDF: {err}"), qr_png, settings),
            Err(payload) => Self::failed(
                format!("Could not load the PDF: {}", panic_message(&payload)),
                qr_png,
                settings,
            ),
        }
    }

    /// Session over an already measured page, without a preview raster.
    pub fn with_page(page: RenderedPage, qr_png: Vec<u8>, settings: &PlacementSettings) -> Self {
        let qr_size = settings.qr_size;
        let position = clamp_position(
            page.centered_overlay(qr_size),
            (page.rendered_width, page.rendered_height),
            qr_size,
        );

        Self {
            state: SessionState::Ready,
            page: Some(page),
            preview: None,
            position,
            qr_png,
            qr_size,
            bottom_margin: settings.bottom_margin,
        }
    }

    fn failed(message: String, qr_png: Vec<u8>, settings: &PlacementSettings) -> Self {
        log::warn!("placement session failed: {message}");
        Self {
            state: SessionState::Failed { message },
            page: None,
            preview: None,
            position: OverlayPosition::default(),
            qr_png,
            qr_size: settings.qr_size,
            bottom_margin: settings.bottom_margin,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn page(&self) -> Option<&RenderedPage> {
        self.page.as_ref()
    }

    pub fn preview(&self) -> Option<&RgbaImage> {
        self.preview.as_ref()
    }

    pub fn position(&self) -> OverlayPosition {
        self.position
    }

    pub fn qr_png(&self) -> &[u8] {
        &self.qr_png
    }

    pub fn qr_size(&self) -> f32 {
        self.qr_size
    }

    fn ready_page(&self) -> Result<RenderedPage, PlacementError> {
        match (&self.state, self.page) {
            (SessionState::Ready, Some(page)) => Ok(page),
            (SessionState::Failed { message }, _) => Err(PlacementError::Failed(message.clone())),
            _ => Err(PlacementError::SessionClosed),
        }
    }

    pub fn drag_by(&mut self, dx: f32, dy: f32) -> Result<OverlayPosition, PlacementError> {
        let page = self.ready_page()?;
        self.position = clamp_drag(
            self.position,
            (dx, dy),
            (page.rendered_width, page.rendered_height),
            self.qr_size,
        );
        Ok(self.position)
    }

    pub fn move_to(&mut self, x: f32, y: f32) -> Result<OverlayPosition, PlacementError> {
        let page = self.ready_page()?;
        self.position = clamp_position(
            OverlayPosition::new(x, y),
            (page.rendered_width, page.rendered_height),
            self.qr_size,
        );
        Ok(self.position)
    }

    pub fn confirm(&mut self) -> Result<OverlayPosition, PlacementError> {
        self.ready_page()?;
        self.state = SessionState::Confirmed(self.position);
        Ok(self.position)
    }

    /// Abandons the session. A failed session can only be left this way.
    pub fn cancel(&mut self) -> Result<(), PlacementError> {
        match self.state {
            SessionState::Ready | SessionState::Failed { .. } => {
                self.state = SessionState::Cancelled;
                Ok(())
            }
            _ => Err(PlacementError::SessionClosed),
        }
    }

    /// Native anchor of the confirmed overlay.
    pub fn target(&self) -> Result<NativePosition, PlacementError> {
        match (&self.state, self.page) {
            (SessionState::Confirmed(position), Some(page)) => Ok(to_native_position_with_margin(
                *position,
                &page,
                self.qr_size,
                self.bottom_margin,
            )),
            (SessionState::Ready, _) => Err(PlacementError::NotConfirmed),
            (SessionState::Failed { message }, _) => Err(PlacementError::Failed(message.clone())),
            _ => Err(PlacementError::SessionClosed),
        }
    }

    pub fn annotation_target(&self, url: &str) -> Result<AnnotationTarget, PlacementError> {
        Ok(AnnotationTarget::with_qr_size(self.target()?, self.qr_size, url))
    }
}

fn render_first_page(
    engine: &mut dyn PdfEngine,
    document: &[u8],
    target_width: u32,
) -> Result<(RenderedPage, RgbaImage), PdfEngineError> {
    let handle = engine.open(OpenSource::from(document))?;

    let rendered = engine.page_size(handle, 0).and_then(|size| {
        let preview =
            engine.render_preview(handle, PreviewRequest { page_index: 0, target_width })?;
        Ok((size, preview))
    });

    if let Err(err) = engine.close(handle) {
        log::debug!("closing preview document failed: {err}");
    }

    let (size, preview) = rendered?;
    let page = RenderedPage::new(
        preview.width() as f32,
        preview.height() as f32,
        size.width_pt,
        size.height_pt,
    );

    Ok((page, preview))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdf_engine::testing::{sample_pdf, SampleSpec};
    use pdf_engine::{DocumentHandle, LopdfEngine, PageSize};

    fn open_sample(viewport_width: u32) -> PlacementSession {
        let mut engine = LopdfEngine::new();
        PlacementSession::open(
            &mut engine,
            &sample_pdf(&SampleSpec::default()),
            vec![1, 2, 3],
            viewport_width,
            &PlacementSettings::default(),
        )
    }

    struct PanickingEngine;

    impl PdfEngine for PanickingEngine {
        fn open(&mut self, _source: OpenSource) -> Result<DocumentHandle, PdfEngineError> {
            panic!("renderer blew up");
        }

        fn page_count(&self, _handle: DocumentHandle) -> Result<u32, PdfEngineError> {
            Ok(0)
        }

        fn page_size(
            &self,
            _handle: DocumentHandle,
            _page_index: u32,
        ) -> Result<PageSize, PdfEngineError> {
            Err(PdfEngineError::Backend("unused".to_owned()))
        }

        fn render_preview(
            &self,
            _handle: DocumentHandle,
            _request: PreviewRequest,
        ) -> Result<RgbaImage, PdfEngineError> {
            Err(PdfEngineError::Backend("unused".to_owned()))
        }

        fn close(&mut self, _handle: DocumentHandle) -> Result<(), PdfEngineError> {
            Ok(())
        }
    }

    #[test]
    fn open_measures_first_page_and_centers_overlay() {
        let session = open_sample(1280);

        assert_eq!(session.state(), &SessionState::Ready);
        let page = session.page().copied().expect("page should be measured");
        assert_eq!(page, RenderedPage::new(600.0, 849.0, 595.0, 842.0));
        assert_eq!(session.position(), OverlayPosition::new(260.0, 384.5));
        assert!(session.preview().is_some());
    }

    #[test]
    fn narrow_viewport_shrinks_preview() {
        let session = open_sample(340);

        let page = session.page().copied().expect("page should be measured");
        assert_eq!(page.rendered_width, 300.0);
    }

    #[test]
    fn drag_stays_within_page() {
        let mut session = open_sample(1280);

        let position = session.drag_by(1000.0, 1000.0).expect("drag should apply");
        assert_eq!(position, OverlayPosition::new(520.0, 769.0));

        let position = session.drag_by(-5000.0, 0.0).expect("drag should apply");
        assert_eq!(position, OverlayPosition::new(0.0, 769.0));
    }

    #[test]
    fn confirm_freezes_position_and_yields_target() {
        let page = RenderedPage::new(600.0, 848.0, 595.0, 842.0);
        let mut session = PlacementSession::with_page(page, Vec::new(), &PlacementSettings::default());

        assert_eq!(session.target(), Err(PlacementError::NotConfirmed));
        assert_eq!(session.confirm(), Ok(OverlayPosition::new(260.0, 384.0)));

        assert_eq!(session.drag_by(10.0, 10.0), Err(PlacementError::SessionClosed));
        let target = session.target().expect("confirmed session has a target");
        assert!((target.x - 257.83).abs() < 0.01);
        assert!((target.y - 380.72).abs() < 0.01);

        let annotation = session
            .annotation_target("https://example.com/?v=AB12CD")
            .expect("confirmed session has a target");
        assert_eq!(annotation.display_text, "example.com/?v=AB12CD");
        assert_eq!(annotation.qr_size, 80.0);
    }

    #[test]
    fn move_to_bottom_edge_clamps_target() {
        let page = RenderedPage::new(600.0, 848.0, 595.0, 842.0);
        let mut session = PlacementSession::with_page(page, Vec::new(), &PlacementSettings::default());

        assert_eq!(session.move_to(260.0, 840.0), Ok(OverlayPosition::new(260.0, 768.0)));
        session.confirm().expect("confirm should succeed");

        assert_eq!(session.target().map(|target| target.y), Ok(40.0));
    }

    #[test]
    fn cancel_closes_session() {
        let mut session = open_sample(1280);

        session.cancel().expect("cancel should succeed");
        assert_eq!(session.state(), &SessionState::Cancelled);
        assert_eq!(session.confirm(), Err(PlacementError::SessionClosed));
        assert_eq!(session.cancel(), Err(PlacementError::SessionClosed));
    }

    #[test]
    fn unreadable_document_fails_with_message() {
        let mut engine = LopdfEngine::new();
        let mut session = PlacementSession::open(
            &mut engine,
            b"definitely not a pdf",
            Vec::new(),
            1280,
            &PlacementSettings::default(),
        );

        let SessionState::Failed { message } = session.state().clone() else {
            panic!("expected failed state, got {:?}", session.state());
        };
        assert!(message.starts_with("Could not load the PDF"));
        assert_eq!(session.drag_by(1.0, 1.0), Err(PlacementError::Failed(message.clone())));
        assert_eq!(session.confirm(), Err(PlacementError::Failed(message)));

        session.cancel().expect("failed session can be cancelled");
        assert_eq!(session.state(), &SessionState::Cancelled);
    }

    #[test]
    fn renderer_panic_is_contained() {
        let session = PlacementSession::open(
            &mut PanickingEngine,
            b"%PDF-1.4",
            Vec::new(),
            1280,
            &PlacementSettings::default(),
        );

        assert_eq!(
            session.state(),
            &SessionState::Failed { message: "Could not load the PDF: renderer blew up".to_owned() }
        );
        assert!(session.state().is_terminal());
    }
}
