//! rodio adapter for the playback ports.
//!
//! rodio has no schedulable device clock, so each output keeps its own epoch
//! and a device clock start becomes a [`Source::delay`] in front of the
//! decoded audio. The delay is counted in samples by the output callback,
//! which keeps running while the runtime is stalled.

use std::{
    io::Cursor,
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex, PoisonError},
    thread,
    time::{Duration, Instant},
};

use rodio::{source::Zero, Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use tokio::runtime::RuntimeFlavor;

use crate::{
    config::Assets,
    error::{AlarmError, Result},
    playback::{AudioAssetResolver, PlaybackHandle, ResolvedAudio},
};

/// Prefix of references that ship with the application.
const BUNDLE_PREFIX: &str = "assets/";

/// The default output device. The stream itself is not `Send`, so it lives
/// on a dedicated thread until this value is dropped.
pub struct RodioOutput {
    handle: OutputStreamHandle,
    _keep: mpsc::Sender<()>,
}

impl RodioOutput {
    pub fn open_default() -> Result<Self> {
        let (handle_tx, handle_rx) = mpsc::channel();
        let (keep, hold) = mpsc::channel::<()>();
        thread::Builder::new()
            .name("rodio-output".to_string())
            .spawn(move || match OutputStream::try_default() {
                Ok((_stream, handle)) => {
                    let _ = handle_tx.send(Ok(handle));
                    // returns once the sender is dropped
                    let _ = hold.recv();
                }
                Err(e) => {
                    let _ = handle_tx.send(Err(AlarmError::Output(e.to_string())));
                }
            })?;
        let handle = handle_rx
            .recv()
            .map_err(|_| AlarmError::Output("output thread exited".to_string()))??;
        log::info!("audio output opened");
        Ok(Self {
            handle,
            _keep: keep,
        })
    }

    fn sink(&self) -> Result<Sink> {
        Sink::try_new(&self.handle).map_err(|e| AlarmError::Output(e.to_string()))
    }
}

/// One sink with the bytes of the audio it plays. `None` audio is silence.
pub struct RodioPlayback {
    sink: Sink,
    audio: Option<Arc<[u8]>>,
    epoch: Instant,
    looping: Mutex<bool>,
    /// device time the current source starts sounding at
    start_at: Mutex<Option<Duration>>,
    /// silent delay in front of the current source
    lead_in: Mutex<Duration>,
}

impl RodioPlayback {
    fn new(sink: Sink, audio: Option<Arc<[u8]>>) -> Self {
        sink.pause();
        Self {
            sink,
            audio,
            epoch: Instant::now(),
            looping: Mutex::new(false),
            start_at: Mutex::new(None),
            lead_in: Mutex::new(Duration::ZERO),
        }
    }

    fn source(&self) -> Result<Box<dyn Source<Item = f32> + Send>> {
        let Some(bytes) = &self.audio else {
            return Ok(Box::new(Zero::<f32>::new(2, 44_100)));
        };
        let cursor = Cursor::new(bytes.clone());
        let source: Box<dyn Source<Item = f32> + Send> = if *lock(&self.looping) {
            Box::new(Decoder::new_looped(cursor).map_err(undecodable)?.convert_samples())
        } else {
            Box::new(Decoder::new(cursor).map_err(undecodable)?.convert_samples())
        };
        Ok(source)
    }

    /// Replaces whatever is queued with the audio, sounding after `lead_in`.
    fn start_after(&self, lead_in: Duration) {
        let source = match self.source() {
            Ok(source) => source,
            Err(e) => {
                log::error!("{e}");
                return;
            }
        };
        self.sink.clear();
        self.sink.append(source.delay(lead_in));
        *lock(&self.lead_in) = lead_in;
        *lock(&self.start_at) = Some(self.device_now() + lead_in);
        self.sink.play();
    }
}

impl PlaybackHandle for RodioPlayback {
    fn device_now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn play_at(&self, at: Duration) {
        self.start_after(at.saturating_sub(self.device_now()));
    }

    fn play(&self) {
        if !self.is_playing() {
            self.start_after(Duration::ZERO);
        }
    }

    fn stop(&self) {
        self.sink.stop();
        *lock(&self.start_at) = None;
    }

    fn set_looping(&self, looping: bool) {
        *lock(&self.looping) = looping;
    }

    fn set_volume(&self, volume: f32) {
        self.sink.set_volume(volume);
    }

    fn volume(&self) -> f32 {
        self.sink.volume()
    }

    fn is_playing(&self) -> bool {
        let started = lock(&self.start_at).is_some_and(|start| self.device_now() >= start);
        started && !self.sink.is_paused() && !self.sink.empty()
    }

    fn position(&self) -> Duration {
        if lock(&self.start_at).is_none() {
            return Duration::ZERO;
        }
        self.sink.get_pos().saturating_sub(*lock(&self.lead_in))
    }
}

/// Resolves audio references against the configured asset directories and
/// decodes them onto fresh sinks.
pub struct RodioResolver {
    output: RodioOutput,
    bundle_dir: PathBuf,
    documents_dir: PathBuf,
}

impl RodioResolver {
    #[must_use]
    pub fn new(output: RodioOutput, assets: &Assets) -> Self {
        Self {
            output,
            bundle_dir: assets.bundle_dir.clone(),
            documents_dir: assets.documents_dir.clone(),
        }
    }

    /// Where `reference` is looked up.
    #[must_use]
    pub fn path_for(&self, reference: &str) -> PathBuf {
        asset_path(&self.bundle_dir, &self.documents_dir, reference)
    }
}

impl AudioAssetResolver for RodioResolver {
    fn resolve(&self, reference: &str) -> Result<ResolvedAudio> {
        let path = self.path_for(reference);
        let (bytes, duration) = off_runtime(|| load_asset(&path, reference))?;
        log::debug!("resolved {reference} to {} ({duration:?})", path.display());
        Ok(ResolvedAudio {
            handle: Arc::new(RodioPlayback::new(self.output.sink()?, Some(bytes))),
            duration,
        })
    }

    fn open_silence(&self) -> Result<Arc<dyn PlaybackHandle>> {
        Ok(Arc::new(RodioPlayback::new(self.output.sink()?, None)))
    }
}

/// `assets/...` references live in the bundle; everything else is reduced
/// to its last path segment and looked up in the documents directory.
fn asset_path(bundle_dir: &Path, documents_dir: &Path, reference: &str) -> PathBuf {
    if reference.starts_with(BUNDLE_PREFIX) {
        bundle_dir.join(reference)
    } else {
        let name = reference.rsplit(['/', '\\']).next().unwrap_or(reference);
        documents_dir.join(name)
    }
}

/// Reads and fully decodes the asset at `path`.
fn load_asset(path: &Path, reference: &str) -> Result<(Arc<[u8]>, Duration)> {
    let bytes: Arc<[u8]> = std::fs::read(path)
        .map_err(|source| AlarmError::AssetNotFound {
            path: path.to_path_buf(),
            source,
        })?
        .into();
    let duration = decoded_duration(&bytes).map_err(|e| AlarmError::AssetUndecodable {
        reference: reference.to_string(),
        reason: e.to_string(),
    })?;
    Ok((bytes, duration))
}

/// Runs blocking work without stalling the other tasks of a multi-threaded
/// runtime. Elsewhere it runs inline.
fn off_runtime<T>(work: impl FnOnce() -> T) -> T {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) if runtime.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(work)
        }
        _ => work(),
    }
}

fn decoded_duration(bytes: &Arc<[u8]>) -> std::result::Result<Duration, rodio::decoder::DecoderError> {
    let decoder = Decoder::new(Cursor::new(bytes.clone()))?;
    if let Some(duration) = decoder.total_duration() {
        return Ok(duration);
    }
    let samples_per_sec = u64::from(decoder.channels()) * u64::from(decoder.sample_rate());
    let samples = decoder.count() as u64;
    Ok(Duration::from_secs_f64(
        samples as f64 / samples_per_sec.max(1) as f64,
    ))
}

fn undecodable(e: rodio::decoder::DecoderError) -> AlarmError {
    AlarmError::AssetUndecodable {
        reference: "queued audio".to_string(),
        reason: e.to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_references_keep_their_path() {
        let path = asset_path(
            Path::new("/bundle"),
            Path::new("/docs"),
            "assets/sounds/marimba.mp3",
        );
        assert_eq!(path, PathBuf::from("/bundle/assets/sounds/marimba.mp3"));
    }

    #[test]
    fn other_references_resolve_by_file_name() {
        let docs = Path::new("/docs");
        assert_eq!(
            asset_path(Path::new("/bundle"), docs, "/var/mobile/old/uuid/ring.wav"),
            docs.join("ring.wav")
        );
        assert_eq!(
            asset_path(Path::new("/bundle"), docs, "ring.wav"),
            docs.join("ring.wav")
        );
    }

    #[test]
    fn missing_asset_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_asset(&dir.path().join("ring.wav"), "ring.wav").unwrap_err();
        assert!(matches!(err, AlarmError::AssetNotFound { .. }), "{err:?}");
    }

    #[test]
    fn unreadable_asset_is_undecodable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ring.wav");
        std::fs::write(&path, b"definitely not audio").unwrap();
        let err = load_asset(&path, "ring.wav").unwrap_err();
        assert!(
            matches!(&err, AlarmError::AssetUndecodable { reference, .. } if reference == "ring.wav"),
            "{err:?}"
        );
    }

    #[test]
    fn loading_outside_a_runtime_runs_inline() {
        let caller = thread::current().id();
        assert_eq!(off_runtime(|| thread::current().id()), caller);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn loading_does_not_stall_the_other_tasks() {
        let received = tokio::spawn(async {
            let (tx, rx) = mpsc::channel();
            // queued behind this task on the only worker
            tokio::spawn(async move {
                let _ = tx.send(());
            });
            off_runtime(|| rx.recv_timeout(Duration::from_secs(5)))
        })
        .await
        .unwrap();
        assert!(received.is_ok());
    }

    #[test]
    fn garbage_is_undecodable() {
        let bytes: Arc<[u8]> = Arc::from(&b"definitely not audio"[..]);
        assert!(decoded_duration(&bytes).is_err());
    }
}
