//! LiveDrop desk core.
//!
//! The state, workflows and backend client a desktop shell binds its UI
//! to. The shell calls [`commands::invoke`] with a command name and a JSON
//! payload (`order_draft_add_product`, `dispatch_pack`, ...) and renders
//! whatever comes back; long-lived state lives in one [`AppContext`].

use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod api;
pub mod backend;
pub mod cart;
pub mod commands;
pub mod config;
pub mod diagnostics;
pub mod dispatch;
pub mod draft;
pub mod error;
pub mod format;
pub mod keystore;
pub mod models;
pub mod poller;
pub mod scanner;
pub mod sequencing;
pub mod state;

#[cfg(test)]
mod testing;

use api::ApiClient;
use backend::Backend;
use config::AppConfig;
use dispatch::{BulkConfirmation, DispatchBoard, GroupView};
use draft::DraftOrder;
use error::{ApiError, ApiResult};
use keystore::KeyStore;
use models::{Dashboard, StoreSettings};
use poller::Poller;
use scanner::camera::{CameraSlot, ChannelCamera, ChannelFrameSource, Frame};
use scanner::scan_loop::LoopEvent;
use scanner::vision::{ProductIdentifier, VisionClient};
use scanner::{detector, Scanner};
use state::{Action, Store};

/// Frames buffered between the shell's capture and the detection loop.
const FRAME_BUFFER: usize = 4;

struct Pollers {
    dashboard: Poller<Dashboard>,
    pending: Poller<usize>,
    dispatch: Poller<Vec<GroupView>>,
}

/// Everything the command layer works on. One per process.
pub struct AppContext {
    pub config: AppConfig,
    pub api: Arc<ApiClient>,
    pub store: Store,
    pub draft: Mutex<DraftOrder>,
    pub scanner: Arc<Mutex<Scanner>>,
    pub board: Arc<Mutex<DispatchBoard>>,
    pub keys: Arc<dyn KeyStore>,
    pub vision: Arc<dyn ProductIdentifier>,
    pending_bulk: StdMutex<Option<BulkConfirmation>>,
    camera: Arc<ChannelCamera>,
    frame_feed: StdMutex<Option<mpsc::Sender<Frame>>>,
    pollers: StdMutex<Option<Pollers>>,
    shutdown: CancellationToken,
}

impl AppContext {
    pub fn new(config: AppConfig, keys: Arc<dyn KeyStore>) -> Result<Self, String> {
        let api = ApiClient::new(&config).map_err(|e| e.to_string())?;
        let vision = VisionClient::new(&config).map_err(|e| e.to_string())?;
        Ok(Self::with_parts(config, Arc::new(api), keys, Arc::new(vision)))
    }

    pub fn with_parts(
        config: AppConfig,
        api: Arc<ApiClient>,
        keys: Arc<dyn KeyStore>,
        vision: Arc<dyn ProductIdentifier>,
    ) -> Self {
        let (feed, source) = ChannelFrameSource::pair(FRAME_BUFFER);
        let camera = Arc::new(ChannelCamera::new(source));
        let scanner = Scanner::new(CameraSlot::new(camera.clone()));
        Self {
            config,
            api,
            store: Store::new(),
            draft: Mutex::new(DraftOrder::new(models::DEFAULT_DELIVERY)),
            scanner: Arc::new(Mutex::new(scanner)),
            board: Arc::new(Mutex::new(DispatchBoard::new())),
            keys,
            vision,
            pending_bulk: StdMutex::new(None),
            camera,
            frame_feed: StdMutex::new(Some(feed)),
            pollers: StdMutex::new(None),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn backend(&self) -> &dyn Backend {
        self.api.as_ref()
    }

    // -----------------------------------------------------------------------
    // Startup / shutdown
    // -----------------------------------------------------------------------

    /// Load store settings and start the background refreshers. A backend
    /// that is down at startup is reported, not fatal.
    pub async fn start(&self) {
        if let Err(e) = self.load_settings().await {
            warn!(error = %e, "store settings unavailable at startup");
            self.store.dispatch(Action::BackendStatus(false));
            self.store.error(e.to_string());
        }
        self.start_polling();
    }

    pub async fn load_settings(&self) -> ApiResult<StoreSettings> {
        let settings = self.api.settings().await?;
        self.draft
            .lock()
            .await
            .set_default_delivery(settings.default_delivery());
        self.store.dispatch(Action::BackendStatus(true));
        self.store.dispatch(Action::SettingsLoaded(settings.clone()));
        Ok(settings)
    }

    fn start_polling(&self) {
        let mut slot = self.pollers.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }
        let cancel = self.shutdown.child_token();

        let api = Arc::clone(&self.api);
        let store = self.store.clone();
        let dashboard = poller::spawn(
            "dashboard",
            secs(self.config.dashboard_poll_secs),
            cancel.clone(),
            move || {
                let api = Arc::clone(&api);
                let store = store.clone();
                async move {
                    let result = api.dashboard().await;
                    store.dispatch(Action::BackendStatus(result.is_ok()));
                    result
                }
            },
        );

        let api = Arc::clone(&self.api);
        let pending = poller::spawn(
            "pending_count",
            secs(self.config.pending_poll_secs),
            cancel.clone(),
            move || {
                let api = Arc::clone(&api);
                async move { api.pending_order_count().await }
            },
        );

        let api = Arc::clone(&self.api);
        let board = Arc::clone(&self.board);
        let dispatch = poller::spawn(
            "dispatch",
            secs(self.config.dispatch_poll_secs),
            cancel.clone(),
            move || {
                let api = Arc::clone(&api);
                let board = Arc::clone(&board);
                async move {
                    let (token, filter) = board.lock().await.begin_refresh();
                    let groups = api.list_dispatch(filter).await?;
                    let mut board = board.lock().await;
                    board.apply(token, groups);
                    Ok::<_, ApiError>(board.views())
                }
            },
        );

        let store = self.store.clone();
        poller::forward(&dashboard, cancel.clone(), move |d| {
            store.dispatch(Action::DashboardLoaded(d))
        });
        let store = self.store.clone();
        poller::forward(&pending, cancel, move |n| {
            store.dispatch(Action::PendingCount(n))
        });

        info!("background refresh started");
        *slot = Some(Pollers {
            dashboard,
            pending,
            dispatch,
        });
    }

    /// Latest dispatch board views from the background refresher.
    pub fn dispatch_updates(&self) -> Option<watch::Receiver<Option<Vec<GroupView>>>> {
        let pollers = self.pollers.lock().unwrap_or_else(|e| e.into_inner());
        pollers.as_ref().map(|p| p.dispatch.subscribe())
    }

    /// Ask every refresher for an immediate round, e.g. after a mutation.
    pub fn refresh_now(&self) {
        let pollers = self.pollers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(p) = pollers.as_ref() {
            p.dashboard.refresh_now();
            p.pending.refresh_now();
            p.dispatch.refresh_now();
        }
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.pollers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.scanner.lock().await.stop_camera().await;
        info!("desk core shut down");
    }

    // -----------------------------------------------------------------------
    // Bulk dispatch confirmation
    // -----------------------------------------------------------------------

    pub(crate) fn set_pending_bulk(&self, confirmation: Option<BulkConfirmation>) {
        *self.pending_bulk.lock().unwrap_or_else(|e| e.into_inner()) = confirmation;
    }

    pub(crate) fn take_pending_bulk(&self) -> Option<BulkConfirmation> {
        self.pending_bulk
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    // -----------------------------------------------------------------------
    // Camera
    // -----------------------------------------------------------------------

    /// Queue a captured frame for the detection loop. Frames arriving
    /// faster than the loop reads them are dropped.
    pub fn push_frame(&self, frame: Frame) -> bool {
        let feed = self.frame_feed.lock().unwrap_or_else(|e| e.into_inner());
        match feed.as_ref() {
            Some(tx) => tx.try_send(frame).is_ok(),
            None => false,
        }
    }

    /// Start the camera with the configured detector and pump detections
    /// into the scanner.
    pub async fn start_detection(&self) -> Result<(), String> {
        let detector = detector::from_config(&self.config).map_err(|e| {
            self.store.error(format!("{e}. Use manual entry"));
            e.to_string()
        })?;

        let mut scanner = self.scanner.lock().await;
        scanner.stop_camera().await;

        // Each start gets a fresh capture channel; the old one went with
        // the previous lease.
        let (feed, source) = ChannelFrameSource::pair(FRAME_BUFFER);
        self.camera.replace(source);
        *self.frame_feed.lock().unwrap_or_else(|e| e.into_inner()) = Some(feed);

        let events = scanner.start_camera(detector).await.map_err(|e| {
            self.store.error(format!("{e}. Use manual entry"));
            e.to_string()
        })?;
        drop(scanner);
        self.spawn_detection_pump(events);
        Ok(())
    }

    fn spawn_detection_pump(&self, mut events: mpsc::Receiver<LoopEvent>) {
        let scanner = Arc::clone(&self.scanner);
        let api = Arc::clone(&self.api);
        let store = self.store.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let mut scanner = scanner.lock().await;
                if let Err(e) = scanner.handle_loop_event(api.as_ref(), event).await {
                    store.error(e.to_string());
                }
            }
            debug!("detection pump finished");
        });
    }
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n.max(1))
}

/// Resolve the data directory, load configuration from it, and install
/// logging. The guard must outlive the app.
pub fn bootstrap(
    data_dir: Option<PathBuf>,
) -> Result<(AppConfig, tracing_appender::non_blocking::WorkerGuard), String> {
    let data_dir = data_dir.unwrap_or_else(diagnostics::get_data_dir);
    let config = AppConfig::load(&data_dir)?;
    let log_dir = config
        .log_dir
        .clone()
        .unwrap_or_else(|| data_dir.join("logs"));
    let guard = diagnostics::init_tracing(&log_dir);
    Ok((config, guard))
}
