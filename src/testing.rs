//! Recording fakes for the engine's ports.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    alarm::{AlarmId, AlarmPhase, AlarmSpec, AlarmState},
    background::BackgroundTaskScheduler,
    config::Config,
    engine::Ports,
    error::{AlarmError, Result},
    notification::{NotificationGateway, NotificationRequest},
    playback::{AudioAssetResolver, PlaybackHandle, ResolvedAudio},
    plugin::AlarmPlugin,
    session::{AudioSession, SessionMode},
};

/// Label of the keep-alive stream.
pub const SILENCE: &str = "silence";

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    PlayAt(String, Duration),
    Play(String),
    Stop(String),
    Looping(String, bool),
    Volume(String, f32),
    Mode(SessionMode),
    SystemVolume(f32),
    Vibrate,
    NotificationScheduled(AlarmId, Duration),
    NotificationCancelled(AlarmId),
    KillNotice(String),
    BackgroundSubmitted(Duration),
    BackgroundCancelled,
}

impl Event {
    fn label(&self) -> Option<&str> {
        match self {
            Self::PlayAt(label, _)
            | Self::Play(label)
            | Self::Stop(label)
            | Self::Looping(label, _)
            | Self::Volume(label, _) => Some(label),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<(Instant, Event)>>>,
}

impl Recorder {
    pub fn record(&self, event: Event) {
        self.events.lock().unwrap().push((Instant::now(), event));
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn events_since(&self, index: usize) -> Vec<Event> {
        self.events().split_off(index)
    }

    pub fn events_for(&self, label: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|event| event.label() == Some(label))
            .collect()
    }

    pub fn count(&self, wanted: &Event) -> usize {
        self.events().iter().filter(|event| *event == wanted).count()
    }

    /// When each alarm (not the keep-alive) was told to sound now.
    pub fn timed_plays(&self) -> Vec<(String, Instant)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(at, event)| match event {
                Event::Play(label) if label != SILENCE => Some((label.clone(), *at)),
                _ => None,
            })
            .collect()
    }
}

/// Playback on a fake device clock that starts when the handle is created.
pub struct MockPlayback {
    label: String,
    recorder: Recorder,
    epoch: Instant,
    start: Mutex<Option<Instant>>,
    volume: Mutex<f32>,
}

impl MockPlayback {
    pub fn new(label: impl Into<String>, recorder: Recorder) -> Self {
        Self {
            label: label.into(),
            recorder,
            epoch: Instant::now(),
            start: Mutex::new(None),
            volume: Mutex::new(1.0),
        }
    }
}

impl PlaybackHandle for MockPlayback {
    fn device_now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn play_at(&self, at: Duration) {
        self.recorder.record(Event::PlayAt(self.label.clone(), at));
        *self.start.lock().unwrap() = Some(self.epoch + at);
    }

    fn play(&self) {
        self.recorder.record(Event::Play(self.label.clone()));
        if !self.is_playing() {
            *self.start.lock().unwrap() = Some(Instant::now());
        }
    }

    fn stop(&self) {
        self.recorder.record(Event::Stop(self.label.clone()));
        *self.start.lock().unwrap() = None;
    }

    fn set_looping(&self, looping: bool) {
        self.recorder
            .record(Event::Looping(self.label.clone(), looping));
    }

    fn set_volume(&self, volume: f32) {
        self.recorder.record(Event::Volume(self.label.clone(), volume));
        *self.volume.lock().unwrap() = volume;
    }

    fn volume(&self) -> f32 {
        *self.volume.lock().unwrap()
    }

    fn is_playing(&self) -> bool {
        self.start
            .lock()
            .unwrap()
            .is_some_and(|start| Instant::now() >= start)
    }

    fn position(&self) -> Duration {
        self.start
            .lock()
            .unwrap()
            .map_or(Duration::ZERO, |start| {
                Instant::now().saturating_duration_since(start)
            })
    }
}

/// Resolves every reference except `missing` and `garbled`.
pub struct MockResolver {
    recorder: Recorder,
    duration: Duration,
}

impl MockResolver {
    pub const fn new(recorder: Recorder, duration: Duration) -> Self {
        Self { recorder, duration }
    }
}

impl AudioAssetResolver for MockResolver {
    fn resolve(&self, reference: &str) -> Result<ResolvedAudio> {
        match reference {
            "missing" => Err(AlarmError::AssetNotFound {
                path: reference.into(),
                source: std::io::ErrorKind::NotFound.into(),
            }),
            "garbled" => Err(AlarmError::AssetUndecodable {
                reference: reference.to_string(),
                reason: "not audio".to_string(),
            }),
            _ => Ok(ResolvedAudio {
                handle: Arc::new(MockPlayback::new(reference, self.recorder.clone())),
                duration: self.duration,
            }),
        }
    }

    fn open_silence(&self) -> Result<Arc<dyn PlaybackHandle>> {
        Ok(Arc::new(MockPlayback::new(SILENCE, self.recorder.clone())))
    }
}

pub struct MockSession {
    recorder: Recorder,
    volume: Mutex<f32>,
    volume_fails: bool,
}

impl MockSession {
    pub const fn new(recorder: Recorder, volume: f32) -> Self {
        Self {
            recorder,
            volume: Mutex::new(volume),
            volume_fails: false,
        }
    }

    /// Reading or writing the system volume fails.
    pub const fn with_failing_volume(mut self) -> Self {
        self.volume_fails = true;
        self
    }
}

impl AudioSession for MockSession {
    fn set_mode(&self, mode: SessionMode) -> Result<()> {
        self.recorder.record(Event::Mode(mode));
        Ok(())
    }

    fn system_volume(&self) -> Result<f32> {
        if self.volume_fails {
            return Err(AlarmError::Volume("volume view unavailable".to_string()));
        }
        Ok(*self.volume.lock().unwrap())
    }

    fn set_system_volume(&self, volume: f32) -> Result<()> {
        if self.volume_fails {
            return Err(AlarmError::Volume("volume view unavailable".to_string()));
        }
        self.recorder.record(Event::SystemVolume(volume));
        *self.volume.lock().unwrap() = volume;
        Ok(())
    }

    fn vibration_supported(&self) -> bool {
        true
    }

    fn vibrate(&self) {
        self.recorder.record(Event::Vibrate);
    }
}

pub struct MockNotifications {
    recorder: Recorder,
    fails: bool,
}

impl MockNotifications {
    pub const fn new(recorder: Recorder) -> Self {
        Self {
            recorder,
            fails: false,
        }
    }

    /// Scheduling is refused, as when permission was denied.
    pub const fn failing(mut self) -> Self {
        self.fails = true;
        self
    }
}

impl NotificationGateway for MockNotifications {
    fn schedule(&self, request: NotificationRequest) -> Result<()> {
        if self.fails {
            return Err(AlarmError::Notification("permission denied".to_string()));
        }
        self.recorder
            .record(Event::NotificationScheduled(request.id, request.delay));
        Ok(())
    }

    fn cancel(&self, id: AlarmId) {
        self.recorder.record(Event::NotificationCancelled(id));
    }

    fn notify_on_termination(&self, title: &str, _body: &str, _delay: Duration) -> Result<()> {
        self.recorder.record(Event::KillNotice(title.to_string()));
        Ok(())
    }
}

pub struct MockBackground {
    recorder: Recorder,
    available: bool,
    submit_fails: bool,
}

impl MockBackground {
    pub const fn new(recorder: Recorder, available: bool) -> Self {
        Self {
            recorder,
            available,
            submit_fails: false,
        }
    }

    /// Available, but every submission is rejected.
    pub const fn with_failing_submit(mut self) -> Self {
        self.submit_fails = true;
        self
    }
}

impl BackgroundTaskScheduler for MockBackground {
    fn is_available(&self) -> bool {
        self.available
    }

    fn submit(&self, _identifier: &str, earliest_begin: Duration) -> Result<()> {
        if self.submit_fails {
            return Err(AlarmError::Background("too many pending requests".to_string()));
        }
        self.recorder
            .record(Event::BackgroundSubmitted(earliest_begin));
        Ok(())
    }

    fn cancel(&self, _identifier: &str) {
        self.recorder.record(Event::BackgroundCancelled);
    }
}

/// A registry entry that owns nothing live.
pub fn alarm_state(id: AlarmId, recorder: &Recorder) -> AlarmState {
    AlarmState {
        spec: AlarmSpec::new(id, Duration::from_secs(60), format!("alarm-{id}")),
        trigger: Instant::now() + Duration::from_secs(60),
        due_at: chrono::Local::now(),
        phase: AlarmPhase::Armed,
        playback: Arc::new(MockPlayback::new(format!("alarm-{id}"), recorder.clone())),
        audio_duration: Duration::from_secs(1),
        pending_timer: None,
        deferred: CancellationToken::new(),
        vibrating: false,
        overrides_volume: false,
    }
}

/// Which fake ports of a [`Harness`] fail.
#[derive(Debug, Default, Clone, Copy)]
pub struct Faults {
    pub volume: bool,
    pub notifications: bool,
    pub background_submit: bool,
}

/// A running engine wired to recording fakes.
pub struct Harness {
    pub plugin: AlarmPlugin,
    pub task: JoinHandle<()>,
    pub recorder: Recorder,
}

impl Harness {
    pub fn start(audio_duration: Duration) -> Self {
        Self::start_with(audio_duration, Faults::default())
    }

    pub fn start_with(audio_duration: Duration, faults: Faults) -> Self {
        let recorder = Recorder::default();
        let mut session = MockSession::new(recorder.clone(), 0.5);
        if faults.volume {
            session = session.with_failing_volume();
        }
        let mut notifications = MockNotifications::new(recorder.clone());
        if faults.notifications {
            notifications = notifications.failing();
        }
        let mut background = MockBackground::new(recorder.clone(), true);
        if faults.background_submit {
            background = background.with_failing_submit();
        }
        let ports = Ports {
            resolver: Arc::new(MockResolver::new(recorder.clone(), audio_duration)),
            session: Arc::new(session),
            notifications: Arc::new(notifications),
            background: Arc::new(background),
        };
        let (plugin, task) = AlarmPlugin::start(ports, &Config::default());
        Self {
            plugin,
            task,
            recorder,
        }
    }
}
