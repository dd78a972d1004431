use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use doc_model::{display_text, AnnotationTarget, NativePosition, PortalConfig, RenderedPage, Slug};
use log::LevelFilter;
use pdf_engine::{default_engine, Annotator, OpenSource, PdfEngine, QrCodeEncoder, QrEncoder};
use placement::{PlacementSession, SessionState};
use portal_core::{
    AccessError, CaseAdmin, FixedPlacement, GeoLookup, IpApiLookup, NoGeoLookup,
    UploadOrchestrator, UploadOutcome, UploadRequest, ViewerService, Visitor,
};
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use storage::{FallbackObjectStore, LocalStore, ObjectStore, RawUploadClient, RecordStore, RestBackend};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "docportal")]
#[command(about = "Client portal tooling: QR placement, PDF stamping and case access")]
pub struct Cli {
    /// Configuration file (defaults to the per-user config directory).
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Keep objects and records in this directory instead of the configured backend.
    #[arg(long, global = true, value_name = "DIR")]
    store: Option<PathBuf>,
    /// Raise log verbosity (-v info, -vv debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable PDF metadata.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Convert a render-space overlay position into native page coordinates.
    Place {
        #[arg(long, value_name = "WxH", value_parser = parse_size)]
        rendered: (f32, f32),
        #[arg(long, value_name = "WxH", value_parser = parse_size)]
        native: (f32, f32),
        #[arg(long, value_name = "X,Y", value_parser = parse_point)]
        at: (f32, f32),
        #[arg(long, value_name = "N")]
        qr_size: Option<f32>,
    },
    /// Stamp a QR code, caption and link onto page 1.
    Stamp {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long)]
        url: String,
        /// Native anchor of the QR image, bottom-left origin.
        #[arg(
            long,
            value_name = "X,Y",
            value_parser = parse_point,
            conflicts_with = "at",
            required_unless_present = "at"
        )]
        native: Option<(f32, f32)>,
        /// Overlay position in the placement preview, top-left origin.
        #[arg(long, value_name = "X,Y", value_parser = parse_point)]
        at: Option<(f32, f32)>,
        #[arg(long, default_value_t = 1280)]
        viewport: u32,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the caption form of a URL.
    DisplayText {
        #[arg(value_name = "URL")]
        url: String,
    },
    /// Upload a video and a QR-stamped document, then register the case.
    Upload {
        #[arg(long = "case", value_name = "NUMBER")]
        case_number: String,
        #[arg(long, value_name = "FILE")]
        pdf: PathBuf,
        #[arg(long, value_name = "FILE")]
        video: PathBuf,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        password: Option<String>,
        /// Overlay position in the placement preview; centered when absent.
        #[arg(long, value_name = "X,Y", value_parser = parse_point)]
        at: Option<(f32, f32)>,
        #[arg(long, default_value_t = 1280)]
        viewport: u32,
        /// Also write the generated QR code PNG here.
        #[arg(long, value_name = "FILE")]
        qr_output: Option<PathBuf>,
    },
    /// Open a case the way the client viewer does.
    View {
        #[arg(value_name = "SLUG")]
        slug: String,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        ip: Option<String>,
        #[arg(long)]
        user_agent: Option<String>,
        /// Resolve the visitor location through ipapi.co.
        #[arg(long)]
        locate: bool,
    },
    /// Manage registered cases.
    Cases {
        #[command(subcommand)]
        command: CaseCommands,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Subcommand)]
enum CaseCommands {
    /// List cases, newest first.
    List {
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 1)]
        page: usize,
    },
    /// Delete a case record.
    Delete {
        #[arg(value_name = "ID")]
        id: Uuid,
    },
    /// Show the access history of a case.
    History {
        #[arg(value_name = "SLUG")]
        slug: Slug,
    },
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    page_count: u32,
    first_page_size_pt: Option<PageSizeOutput>,
}

#[derive(Debug, Serialize)]
struct PageSizeOutput {
    width: f32,
    height: f32,
}

#[derive(Debug, Serialize)]
struct PlaceOutput {
    scale_x: f64,
    scale_y: f64,
    native: PointOutput,
    at_bottom_margin: bool,
}

#[derive(Debug, Serialize)]
struct PointOutput {
    x: f64,
    y: f64,
}

#[derive(Debug, Serialize)]
struct UploadOutput {
    slug: String,
    landing_url: String,
    case_number: String,
    title: String,
    video_url: String,
    pdf_url: String,
    protected: bool,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_logging(cli.verbose);

    let config = storage::load_with_env(cli.config.as_deref()).context("failed to load config")?;

    match cli.command {
        Commands::Info { file } => run_info(&file),
        Commands::Place { rendered, native, at, qr_size } => {
            run_place(&config, rendered, native, at, qr_size)
        }
        Commands::Stamp { file, url, native, at, viewport, output } => {
            let anchor = match (native, at) {
                (Some((x, y)), _) => Anchor::Native(x, y),
                (None, Some((x, y))) => Anchor::Overlay(x, y),
                (None, None) => anyhow::bail!("either --native or --at is required"),
            };
            run_stamp(&config, &file, &url, anchor, viewport, output.as_deref())
        }
        Commands::DisplayText { url } => {
            println!("{}", display_text(&url));
            Ok(())
        }
        Commands::Upload {
            case_number,
            pdf,
            video,
            title,
            password,
            at,
            viewport,
            qr_output,
        } => {
            let stores = Stores::open(&config, cli.store.as_deref())?;
            let mut request = UploadRequest::new(
                case_number,
                read_file(&pdf)?,
                file_name(&video),
                read_file(&video)?,
            )
            .with_viewport_width(viewport);
            if let Some(title) = title {
                request = request.with_title(title);
            }
            if let Some(password) = password {
                request = request.with_password(password);
            }
            run_upload(&config, &stores, &request, at, qr_output.as_deref())
        }
        Commands::View { slug, password, ip, user_agent, locate } => {
            let stores = Stores::open(&config, cli.store.as_deref())?;
            let visitor = Visitor { ip, user_agent };
            run_view(&stores, &slug, password.as_deref(), &visitor, locate)
        }
        Commands::Cases { command } => {
            let stores = Stores::open(&config, cli.store.as_deref())?;
            run_cases(&config, &stores, command)
        }
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };

    // RUST_LOG, when set, wins over the -v flags.
    let _ = env_logger::Builder::new().filter_level(level).parse_default_env().try_init();
}

/// Where objects and case records live for this invocation.
enum Stores {
    Local(LocalStore),
    Remote { records: RestBackend, objects: FallbackObjectStore<RestBackend, RawUploadClient> },
}

impl Stores {
    fn open(config: &PortalConfig, store_dir: Option<&Path>) -> Result<Self> {
        if let Some(dir) = store_dir {
            return Ok(Self::Local(LocalStore::with_root(dir)));
        }

        if let Some(backend) = RestBackend::from_config(&config.backend) {
            log::info!("using backend at {}", backend.base_url());
            let objects = FallbackObjectStore::new(backend.clone(), backend.raw_client());
            return Ok(Self::Remote { records: backend, objects });
        }

        let local = LocalStore::from_default_project().context("no data directory available")?;
        log::info!("using local store at {}", local.root().display());
        Ok(Self::Local(local))
    }

    fn objects(&self) -> &dyn ObjectStore {
        match self {
            Self::Local(store) => store,
            Self::Remote { objects, .. } => objects,
        }
    }

    fn records(&self) -> &dyn RecordStore {
        match self {
            Self::Local(store) => store,
            Self::Remote { records, .. } => records,
        }
    }
}

fn run_info(file: &Path) -> Result<()> {
    ensure_file_exists(file)?;

    let mut engine = default_engine();
    let handle = engine.open(OpenSource::from(file)).context("failed to open PDF")?;

    let page_count = engine.page_count(handle)?;
    let first_page_size_pt = if page_count > 0 {
        let size = engine.page_size(handle, 0)?;
        Some(PageSizeOutput { width: size.width_pt, height: size.height_pt })
    } else {
        None
    };

    let payload = InfoOutput { path: file.display().to_string(), page_count, first_page_size_pt };

    let json = serde_json::to_string_pretty(&payload)?;
    println!("{json}");

    engine.close(handle)?;

    Ok(())
}

fn run_place(
    config: &PortalConfig,
    rendered: (f32, f32),
    native: (f32, f32),
    at: (f32, f32),
    qr_size: Option<f32>,
) -> Result<()> {
    if rendered.0 <= 0.0 || rendered.1 <= 0.0 {
        anyhow::bail!("--rendered must be positive in both dimensions");
    }

    let page = RenderedPage::new(rendered.0, rendered.1, native.0, native.1);
    let qr_size = qr_size.unwrap_or(config.placement.qr_size);
    let position = placement::to_native_position_with_margin(
        doc_model::OverlayPosition::new(at.0, at.1),
        &page,
        qr_size,
        config.placement.bottom_margin,
    );

    let payload = PlaceOutput {
        scale_x: round3(page.scale_x()),
        scale_y: round3(page.scale_y()),
        native: PointOutput { x: round3(position.x), y: round3(position.y) },
        at_bottom_margin: position.y <= config.placement.bottom_margin,
    };

    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Anchor {
    Native(f32, f32),
    Overlay(f32, f32),
}

fn run_stamp(
    config: &PortalConfig,
    file: &Path,
    url: &str,
    anchor: Anchor,
    viewport: u32,
    output: Option<&Path>,
) -> Result<()> {
    ensure_file_exists(file)?;
    let source = read_file(file)?;
    let qr_png = QrCodeEncoder::default().encode_png(url).context("failed to generate QR code")?;

    let target = match anchor {
        Anchor::Native(x, y) => {
            let requested = NativePosition::new(x, y);
            let position = placement::clamp_native(requested, config.placement.bottom_margin);
            if position != requested {
                log::warn!(
                    "anchor ({x}, {y}) is off the page, stamping at ({}, {})",
                    position.x,
                    position.y
                );
            }
            AnnotationTarget::with_qr_size(position, config.placement.qr_size, url)
        }
        Anchor::Overlay(x, y) => {
            let mut engine = default_engine();
            let mut session = PlacementSession::open(
                &mut engine,
                &source,
                qr_png.clone(),
                viewport,
                &config.placement,
            );
            if let SessionState::Failed { message } = session.state() {
                anyhow::bail!("{message}");
            }
            session.move_to(x, y)?;
            session.confirm()?;
            session.annotation_target(url)?
        }
    };

    let annotated = Annotator::new(config.branding.qr_caption.clone())
        .annotate_supervised(&source, &qr_png, &target)
        .context("failed to annotate PDF")?;

    let output = output.map(ToOwned::to_owned).unwrap_or_else(|| default_stamp_output(file));
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&output, &annotated.bytes)
        .with_context(|| format!("failed to write PDF to {}", output.display()))?;

    println!("{}", output.display());
    Ok(())
}

fn run_upload(
    config: &PortalConfig,
    stores: &Stores,
    request: &UploadRequest,
    at: Option<(f32, f32)>,
    qr_output: Option<&Path>,
) -> Result<()> {
    let mut driver = match at {
        Some((x, y)) => FixedPlacement::at(x, y),
        None => FixedPlacement::centered(),
    };

    let mut engine = default_engine();
    let mut orchestrator =
        UploadOrchestrator::new(config, stores.objects(), stores.records(), &mut engine);

    let receipt = match orchestrator.run(request, &mut driver)? {
        UploadOutcome::Done(receipt) => receipt,
        UploadOutcome::Cancelled => {
            println!("cancelled");
            return Ok(());
        }
    };

    if let Some(path) = qr_output {
        fs::write(path, &receipt.qr_png)
            .with_context(|| format!("failed to write QR code to {}", path.display()))?;
    }

    let record = &receipt.record;
    let payload = UploadOutput {
        slug: record.slug.to_string(),
        landing_url: receipt.landing_url.clone(),
        case_number: record.case_number.clone(),
        title: record.title.clone(),
        video_url: record.video_url.clone(),
        pdf_url: record.pdf_url.clone(),
        protected: record.is_protected(),
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn run_view(
    stores: &Stores,
    slug: &str,
    password: Option<&str>,
    visitor: &Visitor,
    locate: bool,
) -> Result<()> {
    let geo: Box<dyn GeoLookup> =
        if locate { Box::new(IpApiLookup::default()) } else { Box::new(NoGeoLookup) };
    let viewer = ViewerService::new(stores.records(), geo.as_ref());

    let page = match viewer.open(slug, password, visitor) {
        Ok(page) => page,
        Err(AccessError::Store(err)) => return Err(err).context("failed to load case"),
        Err(err) => anyhow::bail!("{err}"),
    };

    println!("{}", serde_json::to_string_pretty(&page)?);
    Ok(())
}

fn run_cases(config: &PortalConfig, stores: &Stores, command: CaseCommands) -> Result<()> {
    let admin = CaseAdmin::new(config, stores.records());

    match command {
        CaseCommands::List { search, page } => {
            let listing = admin.search(search.as_deref(), page)?;
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
        CaseCommands::Delete { id } => {
            if !admin.delete(id)? {
                anyhow::bail!("no case with id {id}");
            }
            println!("deleted {id}");
        }
        CaseCommands::History { slug } => {
            let history = admin.history(&slug)?;
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
    }

    Ok(())
}

fn ensure_file_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    ensure_file_exists(path)?;
    fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn file_name(path: &Path) -> String {
    path.file_name().and_then(|name| name.to_str()).unwrap_or("video.mp4").to_owned()
}

fn default_stamp_output(file: &Path) -> PathBuf {
    let stem = file.file_stem().and_then(|name| name.to_str()).unwrap_or("document");

    file.with_file_name(format!("{stem}_with_qr.pdf"))
}

fn round3(value: f32) -> f64 {
    (f64::from(value) * 1000.0).round() / 1000.0
}

fn parse_pair(value: &str, separator: char, shape: &str) -> Result<(f32, f32), String> {
    let (first, second) =
        value.split_once(separator).ok_or_else(|| format!("expected {shape}, got '{value}'"))?;
    let parse = |part: &str| {
        part.trim().parse::<f32>().map_err(|err| format!("invalid number '{part}': {err}"))
    };
    Ok((parse(first)?, parse(second)?))
}

fn parse_point(value: &str) -> Result<(f32, f32), String> {
    parse_pair(value, ',', "X,Y")
}

fn parse_size(value: &str) -> Result<(f32, f32), String> {
    parse_pair(value, 'x', "WxH")
}
