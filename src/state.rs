//! Application-wide state shared by the workflows and the shell.
//!
//! State changes only through [`Action`]s applied by [`Store::dispatch`];
//! the shell watches the store and re-renders on every change.

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::models::{Dashboard, StoreSettings};

/// Notifications kept on screen at once.
const MAX_NOTIFICATIONS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Page {
    #[default]
    Dashboard,
    Scanner,
    Orders,
    Sessions,
    Customers,
    Products,
    Dispatch,
    Settings,
}

impl Page {
    pub const NAV: [Page; 8] = [
        Page::Dashboard,
        Page::Scanner,
        Page::Orders,
        Page::Sessions,
        Page::Customers,
        Page::Products,
        Page::Dispatch,
        Page::Settings,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Page::Dashboard => "Dashboard",
            Page::Scanner => "Scanner",
            Page::Orders => "New Order",
            Page::Sessions => "Sessions",
            Page::Customers => "Customers",
            Page::Products => "Products",
            Page::Dispatch => "Dispatch",
            Page::Settings => "Settings",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Page::Dashboard => "dashboard",
            Page::Scanner => "scanner",
            Page::Orders => "orders",
            Page::Sessions => "sessions",
            Page::Customers => "customers",
            Page::Products => "products",
            Page::Dispatch => "dispatch",
            Page::Settings => "settings",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Page::NAV.into_iter().find(|p| p.as_str() == raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Success,
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: u64,
    pub level: Level,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct AppState {
    pub page: Page,
    pub settings: StoreSettings,
    /// Badge on the Dispatch nav entry.
    pub pending_count: usize,
    pub dashboard: Option<Dashboard>,
    pub backend_online: bool,
    pub notifications: Vec<Notification>,
    next_notification: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Navigate(Page),
    SettingsLoaded(StoreSettings),
    PendingCount(usize),
    DashboardLoaded(Dashboard),
    BackendStatus(bool),
    Notify(Level, String),
    Dismiss(u64),
}

impl AppState {
    pub fn apply(&mut self, action: Action) {
        match action {
            Action::Navigate(page) => self.page = page,
            Action::SettingsLoaded(settings) => self.settings = settings,
            Action::PendingCount(count) => self.pending_count = count,
            Action::DashboardLoaded(dashboard) => {
                self.pending_count = usize::try_from(dashboard.pending_orders)
                    .unwrap_or(self.pending_count);
                self.dashboard = Some(dashboard);
            }
            Action::BackendStatus(online) => self.backend_online = online,
            Action::Notify(level, message) => {
                self.next_notification += 1;
                self.notifications.push(Notification {
                    id: self.next_notification,
                    level,
                    message,
                });
                let overflow = self.notifications.len().saturating_sub(MAX_NOTIFICATIONS);
                self.notifications.drain(..overflow);
            }
            Action::Dismiss(id) => self.notifications.retain(|n| n.id != id),
        }
    }
}

/// Watch-channel backed store. Clones share state.
#[derive(Clone)]
pub struct Store {
    tx: watch::Sender<AppState>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AppState::default());
        Self { tx }
    }

    pub fn dispatch(&self, action: Action) {
        debug!(?action, "state action");
        self.tx.send_modify(|state| state.apply(action));
    }

    pub fn snapshot(&self) -> AppState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AppState> {
        self.tx.subscribe()
    }

    pub fn notify(&self, level: Level, message: impl Into<String>) {
        self.dispatch(Action::Notify(level, message.into()));
    }

    pub fn success(&self, message: impl Into<String>) {
        self.notify(Level::Success, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.notify(Level::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigate_and_parse_pages() {
        let store = Store::new();
        assert_eq!(store.snapshot().page, Page::Dashboard);
        store.dispatch(Action::Navigate(Page::parse("dispatch").unwrap()));
        assert_eq!(store.snapshot().page, Page::Dispatch);
        assert_eq!(Page::parse("nowhere"), None);
        assert_eq!(Page::Orders.label(), "New Order");
    }

    #[test]
    fn test_notifications_capped_and_dismissable() {
        let mut state = AppState::default();
        for i in 0..7 {
            state.apply(Action::Notify(Level::Info, format!("n{i}")));
        }
        assert_eq!(state.notifications.len(), MAX_NOTIFICATIONS);
        assert_eq!(state.notifications[0].message, "n2");
        let id = state.notifications[0].id;
        state.apply(Action::Dismiss(id));
        assert!(state.notifications.iter().all(|n| n.id != id));
    }

    #[test]
    fn test_dashboard_updates_pending_badge() {
        let mut state = AppState::default();
        state.apply(Action::DashboardLoaded(Dashboard {
            pending_orders: 4,
            ..Default::default()
        }));
        assert_eq!(state.pending_count, 4);
        state.apply(Action::PendingCount(9));
        assert_eq!(state.pending_count, 9);
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let store = Store::new();
        let mut rx = store.subscribe();
        store.error("Cannot reach backend");
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().notifications[0].level, Level::Error);
    }
}
