use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use vigil_core::{
    BinaryDescriptor, DescriptorExtractor, DirectorySink, DirectorySource, FaceVerdict, Frame,
    FrameSource, LogSink, OrbExtractor, RatioTestMatcher, ReferenceSet, ReferenceStore,
    ScrfdDetector, SessionSummary, StopFlag, VerificationSession,
};
use vigil_hw::{Camera, CameraSource};

mod config;

use config::Config;

type Session = VerificationSession<ScrfdDetector, OrbExtractor>;

#[derive(Parser)]
#[command(name = "vigil", about = "Vigil live face verification")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll the face in a reference image
    Enroll {
        /// Reference image containing the face to enroll
        #[arg(short, long)]
        image: PathBuf,
        /// Where to store the face crop (default: reference_face.<ext> beside the image)
        #[arg(long)]
        face: Option<PathBuf>,
    },
    /// Verify faces in a live stream against an enrolled face
    Verify {
        /// Enrolled face crop
        #[arg(long)]
        face: Option<PathBuf>,
        #[command(flatten)]
        stream: StreamArgs,
    },
    /// Enroll from a reference image, then verify the stream
    Run {
        #[arg(short, long)]
        image: PathBuf,
        #[command(flatten)]
        stream: StreamArgs,
    },
    /// Compare every face in one probe image against an enrolled face
    Compare {
        #[arg(long)]
        face: Option<PathBuf>,
        #[arg(short, long)]
        probe: PathBuf,
        /// Save the annotated probe here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List V4L2 capture devices
    Devices,
}

#[derive(Args)]
struct StreamArgs {
    /// Read frames from an image directory instead of the camera
    #[arg(long)]
    frames: Option<PathBuf>,
    /// V4L2 device path
    #[arg(short, long)]
    device: Option<String>,
    /// Write annotated frames to this directory
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Stop after this many processed frames
    #[arg(long)]
    max_frames: Option<u64>,
    /// Evaluate the faces of a frame in parallel
    #[arg(long)]
    parallel: bool,
}

impl StreamArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(device) = &self.device {
            config.camera_device = device.clone();
        }
        if let Some(output) = &self.output {
            config.output_dir = Some(output.clone());
        }
        if self.max_frames.is_some() {
            config.session.max_frames = self.max_frames;
        }
        if self.parallel {
            config.session.parallel_regions = true;
        }
    }
}

#[derive(Serialize)]
struct CompareReport {
    probe: PathBuf,
    reference_descriptors: usize,
    matched: bool,
    faces: Vec<FaceVerdict>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Enroll { image, face } => {
            let store = face
                .map(ReferenceStore::new)
                .unwrap_or_else(|| ReferenceStore::beside(&image));
            let (_, enrollment_id) = enroll(&config, &image, &store)?;
            println!("Enrolled {enrollment_id}");
            println!("  face:   {}", store.face_path().display());
            println!("  record: {}", store.record_path().display());
        }
        Commands::Verify { face, stream } => {
            stream.apply(&mut config);
            let store = ReferenceStore::new(reference_face(face, &config)?);
            let summary = tokio::task::spawn_blocking(move || {
                let extractor = OrbExtractor::new(config.orb.clone());
                let reference = vigil_core::load_reference(&store, &extractor)
                    .context("failed to load enrolled face")?;
                verify(&config, stream.frames.as_deref(), reference)
            })
            .await??;
            print_summary(&summary)?;
        }
        Commands::Run { image, stream } => {
            stream.apply(&mut config);
            let summary = tokio::task::spawn_blocking(move || {
                let store = ReferenceStore::beside(&image);
                let (reference, _) = enroll(&config, &image, &store)?;
                verify(&config, stream.frames.as_deref(), reference)
            })
            .await??;
            print_summary(&summary)?;
        }
        Commands::Compare { face, probe, output } => {
            let store = ReferenceStore::new(reference_face(face, &config)?);
            let report = compare(&config, &store, &probe, output.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
    }

    Ok(())
}

fn reference_face(flag: Option<PathBuf>, config: &Config) -> Result<PathBuf> {
    match flag.or_else(|| config.reference_face.clone()) {
        Some(path) => Ok(path),
        None => bail!("no enrolled face given (use --face or set reference_face)"),
    }
}

fn load_detector(config: &Config) -> Result<ScrfdDetector> {
    let path = config.scrfd_model_path();
    ScrfdDetector::load(&path, config.detector.clone())
        .with_context(|| format!("failed to load detector model {}", path.display()))
}

fn build_session(config: &Config, reference: ReferenceSet<BinaryDescriptor>) -> Result<Session> {
    let extractor = OrbExtractor::new(config.orb.clone());
    let matcher = RatioTestMatcher::new(extractor.metric())
        .with_ratio(config.ratio_threshold)
        .with_min_good_matches(config.match_count_threshold);
    Ok(VerificationSession::new(load_detector(config)?, extractor, matcher, reference)
        .with_config(config.session.clone()))
}

fn enroll(
    config: &Config,
    image: &Path,
    store: &ReferenceStore,
) -> Result<(ReferenceSet<BinaryDescriptor>, String)> {
    let reference_image = vigil_core::open_reference_image(image)?;
    let mut detector = load_detector(config)?;
    let extractor = OrbExtractor::new(config.orb.clone());
    let enrollment = vigil_core::enroll(&reference_image, &mut detector, &extractor, store)
        .with_context(|| format!("enrollment from {} failed", image.display()))?;
    Ok((enrollment.reference, enrollment.record.id))
}

/// Run the verification loop until end of stream, frame limit or ctrl-c.
fn verify(
    config: &Config,
    frames: Option<&Path>,
    reference: ReferenceSet<BinaryDescriptor>,
) -> Result<SessionSummary> {
    let mut session = build_session(config, reference)?;
    let stop = StopFlag::new();
    watch_ctrl_c(stop.clone());

    match frames {
        Some(dir) => {
            let mut source = DirectorySource::open(dir)
                .with_context(|| format!("failed to open frame directory {}", dir.display()))?;
            present(&mut session, &mut source, config.output_dir.as_deref(), stop)
        }
        None => {
            let camera = Camera::open(
                &config.camera_device,
                config.camera_width,
                config.camera_height,
            )
            .with_context(|| format!("failed to open camera {}", config.camera_device))?;
            let mut source = CameraSource::new(camera, config.warmup_frames)
                .with_context(|| format!("failed to start camera {}", config.camera_device))?;
            present(&mut session, &mut source, config.output_dir.as_deref(), stop)
        }
    }
}

fn present<S: FrameSource>(
    session: &mut Session,
    source: &mut S,
    output: Option<&Path>,
    stop: StopFlag,
) -> Result<SessionSummary> {
    let summary = match output {
        Some(dir) => {
            let mut sink = DirectorySink::create(dir, stop)?;
            session.run(source, &mut sink)?
        }
        None => session.run(source, &mut LogSink::new(stop))?,
    };
    Ok(summary)
}

/// Set `stop` on ctrl-c. Must be called from inside the tokio runtime.
fn watch_ctrl_c(stop: StopFlag) {
    let handle = tokio::runtime::Handle::current();
    handle.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping after the current frame");
            stop.stop();
        }
    });
}

fn compare(
    config: &Config,
    store: &ReferenceStore,
    probe: &Path,
    output: Option<&Path>,
) -> Result<CompareReport> {
    let extractor = OrbExtractor::new(config.orb.clone());
    let reference = vigil_core::load_reference(store, &extractor)?;
    let reference_descriptors = reference.len();

    let image = image::open(probe)
        .with_context(|| format!("failed to read probe {}", probe.display()))?
        .to_rgb8();

    let mut session = build_session(config, reference)?;
    let annotated = session.process_frame(Frame::new(image, 0))?;

    if let Some(path) = output {
        annotated
            .frame
            .image
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    Ok(CompareReport {
        probe: probe.to_path_buf(),
        reference_descriptors,
        matched: annotated.matched_count() > 0,
        faces: annotated.faces,
    })
}

fn print_summary(summary: &SessionSummary) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}
