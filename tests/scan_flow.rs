//! State-machine tests for the scan controller.
//!
//! A scripted decoder replaces rxing so every rung of the escalation ladder
//! can be forced deterministically. Images are tiny PNGs and the target
//! canvases are a few dozen pixels, so the real normaliser still runs.

use futures::StreamExt;
use image::{DynamicImage, ImageReader, Rgb, RgbImage};
use license_scan::{
    AttemptError, AttemptOutcome, AttemptStage, BarcodeDecoder, CropBase, Dimensions, Field,
    OutputFormat, RawImage, ScanConfig, ScanController, ScanError, ScanEvent, ScanOutcome,
    ScanProgressCallback, ScanState,
};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use tokio_test::{assert_err, assert_ok};

const PAYLOAD: &str = "@\n\u{1e}\rANSI 636014040002DL00410278ZC03190024\n\
DLDAQD1234562\nDCSPUBLIC\nDACJOHN\nDADQUINCY\nDBB19800115\nDBA300115\nDAJ123456789\nDCUJR\n";

const INITIAL: Dimensions = Dimensions::new(16, 16);
const UPSCALE: Dimensions = Dimensions::new(40, 30);
const STEP: u32 = 10;

// ── Fixtures ─────────────────────────────────────────────────────────────

/// Replays a fixed list of results and records the pixel size of every image
/// it was asked to decode. Fails once the script runs out.
#[derive(Default)]
struct ScriptedDecoder {
    script: Mutex<VecDeque<Result<String, AttemptError>>>,
    seen: Mutex<Vec<Dimensions>>,
}

impl ScriptedDecoder {
    fn new(script: impl IntoIterator<Item = Result<String, AttemptError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn always_failing() -> Arc<Self> {
        Self::new([])
    }

    fn seen(&self) -> Vec<Dimensions> {
        self.seen.lock().unwrap().clone()
    }
}

impl BarcodeDecoder for ScriptedDecoder {
    fn decode(&self, image: &RawImage) -> Result<String, AttemptError> {
        let (w, h) = ImageReader::new(Cursor::new(image.bytes()))
            .with_guessed_format()
            .unwrap()
            .into_dimensions()
            .unwrap();
        self.seen.lock().unwrap().push(Dimensions::new(w, h));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AttemptError::DecodeFailed {
                detail: "no symbol".into(),
            }))
    }
}

fn miss() -> Result<String, AttemptError> {
    Err(AttemptError::DecodeFailed {
        detail: "no symbol".into(),
    })
}

fn hit() -> Result<String, AttemptError> {
    Ok(PAYLOAD.to_string())
}

fn png(w: u32, h: u32) -> RawImage {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([180, 180, 180])));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    RawImage::new(buf, "image/png").unwrap()
}

/// JPEG whose APP1 segment carries EXIF orientation `code`.
fn rotated_jpeg(w: u32, h: u32, code: u16) -> RawImage {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([180, 180, 180])));
    let mut jpeg = Vec::new();
    img.write_to(&mut Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
        .unwrap();

    let mut app1 = b"Exif\0\0MM\0\x2A\0\0\0\x08".to_vec();
    app1.extend(1u16.to_be_bytes());
    app1.extend(0x0112u16.to_be_bytes());
    app1.extend(3u16.to_be_bytes());
    app1.extend(1u32.to_be_bytes());
    app1.extend(code.to_be_bytes());
    app1.extend([0, 0]);
    app1.extend(0u32.to_be_bytes());

    let mut bytes = jpeg[..2].to_vec();
    bytes.extend([0xFF, 0xE1]);
    bytes.extend(((app1.len() + 2) as u16).to_be_bytes());
    bytes.extend(app1);
    bytes.extend(&jpeg[2..]);
    RawImage::new(bytes, "image/jpeg").unwrap()
}

fn config() -> ScanConfig {
    ScanConfig::builder()
        .initial_size(INITIAL.width, INITIAL.height)
        .upscale_size(UPSCALE.width, UPSCALE.height)
        .growth_step(STEP)
        .max_attempts(3)
        .output_format(OutputFormat::Png)
        .build()
        .unwrap()
}

fn controller(decoder: Arc<ScriptedDecoder>) -> ScanController {
    assert_ok!(ScanController::new(config(), decoder))
}

fn expect_crop(outcome: ScanOutcome) -> license_scan::CropRequest {
    match outcome {
        ScanOutcome::CropRequired(req) => req,
        other => panic!("expected CropRequired, got {other:?}"),
    }
}

// ── Direct and upscale rungs ─────────────────────────────────────────────

#[tokio::test]
async fn direct_decode_success_parses_fields() {
    let decoder = ScriptedDecoder::new([hit()]);
    let c = controller(decoder.clone());

    let outcome = assert_ok!(c.submit_back_image(png(12, 8)).await);
    let result = outcome.into_result().expect("decoded");

    assert_eq!(result.fields.get(Field::DriverLicenseNumber), Some("D1234562"));
    assert_eq!(result.fields.get(Field::CustomerFamilyName), Some("PUBLIC"));
    assert_eq!(result.fields.get(Field::DateOfBirth), Some("2080-01-15"));
    assert_eq!(result.fields.get(Field::LicenseExpirationDate), Some("2030-01-15"));
    assert_eq!(result.fields.get(Field::LicenseNumber), Some("123456789"));
    assert!(result.unmapped_tags.contains(&"DCU".to_string()));
    assert_eq!(result.raw_text, PAYLOAD);

    assert_eq!(result.attempts.len(), 1);
    assert_eq!(result.attempts[0].stage, AttemptStage::Direct);
    assert_eq!(result.attempts[0].target, None);
    assert!(result.attempts[0].outcome.is_decoded());

    // Direct decode reads the original, untouched.
    assert_eq!(decoder.seen(), vec![Dimensions::new(12, 8)]);
    assert_eq!(c.state(), ScanState::Succeeded);
}

#[tokio::test]
async fn upscale_success_never_asks_for_a_crop() {
    let decoder = ScriptedDecoder::new([miss(), hit()]);
    let c = controller(decoder.clone());
    let mut events = c.subscribe();

    let result = assert_ok!(c.submit_back_image(png(12, 8)).await)
        .into_result()
        .expect("decoded");

    assert!(result.stats.upscaled);
    assert_eq!(result.stats.decode_attempts, 2);
    assert_eq!(result.attempts[1].stage, AttemptStage::Upscale);
    assert_eq!(result.attempts[1].target, Some(UPSCALE));
    assert_eq!(result.attempts[1].canvas, Some(UPSCALE));
    assert_eq!(decoder.seen(), vec![Dimensions::new(12, 8), UPSCALE]);

    let collected: Vec<ScanEvent> = events.by_ref().take(5).collect().await;
    assert!(
        !collected.iter().any(|e| matches!(e, ScanEvent::CropRequired { .. })),
        "events: {collected:?}"
    );
    assert!(matches!(collected.last(), Some(ScanEvent::Decoded { .. })));
}

#[tokio::test]
async fn two_automatic_failures_request_a_crop_of_the_upscaled_original() {
    let decoder = ScriptedDecoder::always_failing();
    let c = controller(decoder);

    let req = expect_crop(assert_ok!(c.submit_back_image(png(12, 8)).await));

    assert_eq!(req.attempt_index, 0);
    assert_eq!(req.remaining_attempts, 3);
    assert_eq!(req.target, UPSCALE);
    let CropBase::Normalized(base) = &req.base else {
        panic!("expected a normalised crop base");
    };
    assert_eq!(base.size(), UPSCALE);

    let snap = c.snapshot();
    assert_eq!(snap.state, ScanState::AwaitManualCrop);
    assert_eq!(snap.attempt_index, 0, "entering AwaitManualCrop does not count");
    assert_eq!(c.current_image().map(|n| n.size()), Some(UPSCALE));

    // The base round-trips through a data URL for a browser cropping widget.
    let back = assert_ok!(RawImage::from_data_url(&req.base.to_data_url()));
    assert_eq!(&back, req.base.image());
}

#[tokio::test]
async fn quarter_turn_exif_transposes_the_upscaled_canvas() {
    let decoder = ScriptedDecoder::always_failing();
    let c = controller(decoder.clone());

    let req = expect_crop(assert_ok!(c.submit_back_image(rotated_jpeg(12, 8, 6)).await));

    // Target stays as configured; the canvas trades width for height.
    assert_eq!(req.target, UPSCALE);
    let CropBase::Normalized(base) = &req.base else {
        panic!("expected a normalised crop base");
    };
    assert_eq!(base.orientation().get(), 6);
    assert_eq!(base.size(), UPSCALE.transposed());
    assert_eq!(
        decoder.seen(),
        vec![Dimensions::new(12, 8), Dimensions::new(30, 40)]
    );
}

// ── Manual-crop rung ─────────────────────────────────────────────────────

#[tokio::test]
async fn crop_success_after_one_failed_crop() {
    let decoder = ScriptedDecoder::new([miss(), miss(), miss(), hit()]);
    let c = controller(decoder.clone());

    expect_crop(assert_ok!(c.submit_back_image(png(12, 8)).await));
    let second = expect_crop(assert_ok!(c.submit_crop(png(5, 3)).await));
    assert_eq!(second.attempt_index, 1);
    assert_eq!(second.target, UPSCALE.grown(STEP));

    let result = assert_ok!(c.submit_crop(png(5, 3)).await)
        .into_result()
        .expect("decoded");
    assert_eq!(result.stats.crop_attempts, 1);
    assert_eq!(
        result.attempts.last().map(|a| a.stage),
        Some(AttemptStage::Cropped { attempt_index: 1 })
    );

    // Crops are stretched to the target current at the time they were taken.
    let seen = decoder.seen();
    assert_eq!(seen[2], UPSCALE);
    assert_eq!(seen[3], UPSCALE.grown(STEP));
}

#[tokio::test]
async fn three_failed_crops_exhaust_and_retry_resets() {
    let c = controller(ScriptedDecoder::always_failing());

    let mut req = expect_crop(assert_ok!(c.submit_back_image(png(12, 8)).await));
    let mut targets = vec![req.target];
    let mut indices = vec![req.attempt_index];

    for _ in 0..2 {
        req = expect_crop(assert_ok!(c.submit_crop(png(6, 2)).await));
        targets.push(req.target);
        indices.push(req.attempt_index);
    }

    assert_eq!(indices, vec![0, 1, 2]);
    assert!(targets.windows(2).all(|w| w[1].width > w[0].width && w[1].height > w[0].height));
    assert_eq!(req.remaining_attempts, 1);

    let err = assert_err!(c.submit_crop(png(6, 2)).await);
    assert!(matches!(err, ScanError::DecodeExhausted { attempts: 3 }));
    assert!(err.to_string().contains("clearer image"));

    let snap = c.snapshot();
    assert_eq!(snap.state, ScanState::Exhausted);
    assert_eq!(snap.attempt_index, 3);
    assert_eq!(snap.attempts.len(), 5);
    assert!(snap
        .attempts
        .iter()
        .all(|a| matches!(a.outcome, AttemptOutcome::DecodeFailed(_))));

    // Exhausted is terminal until reset.
    let err = assert_err!(c.submit_crop(png(6, 2)).await);
    assert!(matches!(err, ScanError::InvalidState { state: ScanState::Exhausted, .. }));

    let generation = c.retry();
    let snap = c.snapshot();
    assert_eq!(generation, 1);
    assert_eq!(snap.state, ScanState::AwaitingImage);
    assert_eq!(snap.attempt_index, 0);
    assert_eq!(snap.target, INITIAL);
    assert!(snap.attempts.is_empty());
    assert!(c.current_image().is_none());

    // The reset session accepts a new image.
    expect_crop(assert_ok!(c.submit_back_image(png(12, 8)).await));
}

#[tokio::test]
async fn rejected_inputs_do_not_change_the_session() {
    let config = ScanConfig::builder()
        .initial_size(INITIAL.width, INITIAL.height)
        .upscale_size(UPSCALE.width, UPSCALE.height)
        .max_input_bytes(2048)
        .output_format(OutputFormat::Png)
        .build()
        .unwrap();
    let decoder = ScriptedDecoder::always_failing();
    let c = assert_ok!(ScanController::new(config, decoder.clone()));

    let oversize = assert_ok!(RawImage::new(vec![0u8; 4096], "image/jpeg"));
    let err = assert_err!(c.submit_back_image(oversize).await);
    assert!(err.is_invalid_input());
    assert!(decoder.seen().is_empty());
    assert_eq!(c.state(), ScanState::AwaitingImage);

    let err = assert_err!(RawImage::new(vec![1, 2, 3], "image/gif"));
    assert!(err.is_invalid_input());
}

// ── Cancellation ─────────────────────────────────────────────────────────

/// Blocks inside `decode` until released, so a reset can land mid-attempt.
struct GatedDecoder {
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl BarcodeDecoder for GatedDecoder {
    fn decode(&self, _image: &RawImage) -> Result<String, AttemptError> {
        self.entered.lock().unwrap().send(()).unwrap();
        self.release.lock().unwrap().recv().unwrap();
        Ok(PAYLOAD.to_string())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn result_arriving_after_reset_is_discarded() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let decoder = Arc::new(GatedDecoder {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    });
    let c = Arc::new(assert_ok!(ScanController::new(config(), decoder)));
    let mut events = c.subscribe();

    let task = {
        let c = Arc::clone(&c);
        tokio::spawn(async move { c.submit_back_image(png(12, 8)).await })
    };

    tokio::task::spawn_blocking(move || entered_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(c.state(), ScanState::DirectDecode);

    let generation = c.remove_image();
    release_tx.send(()).unwrap();

    let outcome = assert_ok!(task.await.unwrap());
    assert!(matches!(outcome, ScanOutcome::Cancelled));

    let snap = c.snapshot();
    assert_eq!(snap.generation, generation);
    assert_eq!(snap.state, ScanState::AwaitingImage);
    assert!(!snap.has_image);
    assert!(snap.attempts.is_empty());

    let collected: Vec<ScanEvent> = events.by_ref().take(4).collect().await;
    assert!(matches!(collected[0], ScanEvent::SessionStarted { generation: 0, .. }));
    assert!(matches!(collected[1], ScanEvent::AttemptStarted { generation: 0, .. }));
    assert!(matches!(collected[2], ScanEvent::Reset { generation: 1, .. }));
    assert!(matches!(collected[3], ScanEvent::StaleResultDiscarded { generation: 0 }));
}

// ── Observers ────────────────────────────────────────────────────────────

#[derive(Default)]
struct Counting {
    starts: AtomicUsize,
    failures: AtomicUsize,
    crops: AtomicUsize,
    exhausted: AtomicUsize,
}

impl ScanProgressCallback for Counting {
    fn on_attempt_start(&self, _stage: AttemptStage) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_attempt_failed(&self, _stage: AttemptStage, _error: &AttemptError) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }

    fn on_crop_required(&self, _attempt_index: u32, _target: Dimensions) {
        self.crops.fetch_add(1, Ordering::SeqCst);
    }

    fn on_exhausted(&self, _attempts: u32) {
        self.exhausted.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn progress_callback_sees_every_rung() {
    let counting = Arc::new(Counting::default());
    let config = ScanConfig::builder()
        .initial_size(INITIAL.width, INITIAL.height)
        .upscale_size(UPSCALE.width, UPSCALE.height)
        .max_attempts(1)
        .output_format(OutputFormat::Png)
        .progress_callback(counting.clone())
        .build()
        .unwrap();
    let c = assert_ok!(ScanController::new(config, ScriptedDecoder::always_failing()));

    expect_crop(assert_ok!(c.submit_back_image(png(12, 8)).await));
    let err = assert_err!(c.submit_crop(png(4, 4)).await);
    assert!(err.is_exhausted());

    assert_eq!(counting.starts.load(Ordering::SeqCst), 3);
    assert_eq!(counting.failures.load(Ordering::SeqCst), 3);
    assert_eq!(counting.crops.load(Ordering::SeqCst), 1);
    assert_eq!(counting.exhausted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn event_stream_follows_the_ladder() {
    let c = controller(ScriptedDecoder::always_failing());
    let mut events = c.subscribe();

    expect_crop(assert_ok!(c.submit_back_image(png(12, 8)).await));

    let collected: Vec<ScanEvent> = events.by_ref().take(6).collect().await;
    let kinds: Vec<&str> = collected
        .iter()
        .map(|e| match e {
            ScanEvent::SessionStarted { .. } => "start",
            ScanEvent::AttemptStarted { .. } => "attempt",
            ScanEvent::AttemptFailed { .. } => "failed",
            ScanEvent::CropRequired { .. } => "crop",
            _ => "other",
        })
        .collect();
    assert_eq!(kinds, ["start", "attempt", "failed", "attempt", "failed", "crop"]);
    assert!(collected.iter().all(|e| e.generation() == 0));
}
