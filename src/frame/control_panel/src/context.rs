use log::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use wrt_api::{ClientStorage, FeatureFlags, PanelConfig, RouterClient, SessionManager};

use crate::document::{Document, Table, ToastKind};
use crate::module::{Confirm, ModuleFactory, PanelModule, RouteHandler};
use crate::{FormData, PanelError, PanelResult};

pub const DEFAULT_ROUTE: &str = "/dashboard";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewState {
    NoSession,
    LoginView,
    MainView(String),
}

/// Fixed base path -> module table.
pub fn module_for_route(base: &str) -> Option<&'static str> {
    match base {
        "dashboard" => Some("dashboard"),
        "network" => Some("network"),
        "system" => Some("system"),
        "vpn" => Some("vpn"),
        "services" => Some("services"),
        _ => None,
    }
}

/// Splits a location hash into (base, sub paths, full path). Empty means the dashboard.
pub fn parse_route(hash: &str) -> (String, Vec<String>, String) {
    let hash = hash.trim_start_matches('#');
    let mut segments: Vec<String> = hash
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect();
    if segments.is_empty() {
        segments.push("dashboard".to_string());
    }
    let base = segments.remove(0);
    let full_path = if segments.is_empty() {
        format!("/{}", base)
    } else {
        format!("/{}/{}", base, segments.join("/"))
    };
    (base, segments, full_path)
}

fn route_matches(route: &str, full_path: &str) -> bool {
    full_path == route
        || (full_path.starts_with(route) && full_path[route.len()..].starts_with('/'))
}

struct TimerGuard(Arc<AtomicUsize>);

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The whole application state. Modules get it by reference; nothing is global.
pub struct AppContext {
    config: PanelConfig,
    client: Arc<RouterClient>,
    session: SessionManager,
    features: RwLock<FeatureFlags>,
    routes: RwLock<Vec<(String, Arc<dyn RouteHandler>)>>,
    factories: HashMap<&'static str, ModuleFactory>,
    modules: RwLock<HashMap<String, Arc<dyn PanelModule>>>,
    poller: Mutex<Option<JoinHandle<()>>>,
    active_timers: Arc<AtomicUsize>,
    view: RwLock<ViewState>,
    current_base: RwLock<Option<String>>,
    document: Mutex<Document>,
    page_visible: AtomicBool,
    confirm: Arc<dyn Confirm>,
    self_ref: Weak<AppContext>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl AppContext {
    pub fn new(
        config: PanelConfig,
        client: Arc<RouterClient>,
        storage: Arc<dyn ClientStorage>,
        confirm: Arc<dyn Confirm>,
    ) -> Arc<Self> {
        Self::with_factories(config, client, storage, confirm, crate::modules::default_factories())
    }

    pub fn with_factories(
        config: PanelConfig,
        client: Arc<RouterClient>,
        storage: Arc<dyn ClientStorage>,
        confirm: Arc<dyn Confirm>,
        factories: HashMap<&'static str, ModuleFactory>,
    ) -> Arc<Self> {
        let session = SessionManager::new(client.clone(), storage);
        Arc::new_cyclic(|weak| AppContext {
            config,
            client,
            session,
            features: RwLock::new(FeatureFlags::default()),
            routes: RwLock::new(Vec::new()),
            factories,
            modules: RwLock::new(HashMap::new()),
            poller: Mutex::new(None),
            active_timers: Arc::new(AtomicUsize::new(0)),
            view: RwLock::new(ViewState::NoSession),
            current_base: RwLock::new(None),
            document: Mutex::new(Document::with_default_layout()),
            page_visible: AtomicBool::new(true),
            confirm,
            self_ref: weak.clone(),
        })
    }

    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    pub fn client(&self) -> &RouterClient {
        &self.client
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn features(&self) -> FeatureFlags {
        self.features.read().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn is_feature_enabled(&self, name: &str) -> bool {
        self.features.read().map(|f| f.is_enabled(name)).unwrap_or(false)
    }

    pub fn view_state(&self) -> ViewState {
        self.view.read().map(|v| v.clone()).unwrap_or(ViewState::NoSession)
    }

    fn set_view(&self, state: ViewState) {
        if let Ok(mut view) = self.view.write() {
            *view = state;
        }
    }

    pub fn with_doc<R>(&self, f: impl FnOnce(&mut Document) -> R) -> R {
        let mut doc = lock(&self.document);
        f(&mut doc)
    }

    pub fn toast(&self, message: &str, kind: ToastKind) {
        match kind {
            ToastKind::Error => warn!("toast: {}", message),
            _ => info!("toast: {}", message),
        }
        self.with_doc(|d| d.toast(message, kind));
    }

    /// Ok → success toast (if any); validation → its own message; cancel → silent;
    /// anything else is logged and shown as `fail`.
    pub fn report<T>(&self, result: PanelResult<T>, ok: &str, fail: &str) -> PanelResult<T> {
        match &result {
            Ok(_) => {
                if !ok.is_empty() {
                    self.toast(ok, ToastKind::Success);
                }
            }
            Err(PanelError::Cancelled) => {}
            Err(PanelError::Validation(message)) => self.toast(message, ToastKind::Error),
            Err(err) => {
                error!("{}: {}", fail, err);
                self.toast(fail, ToastKind::Error);
            }
        }
        result
    }

    /// Store a loaded table, or an empty table carrying `fail` when loading failed.
    pub fn put_table(&self, id: &str, columns: &[&str], result: PanelResult<Table>, fail: &str) {
        let table = match result {
            Ok(table) => table,
            Err(err) => {
                error!("load {} failed: {}", id, err);
                Table::empty(columns, fail)
            }
        };
        self.with_doc(|d| d.set_table(id, table));
    }

    pub fn confirm(&self, message: &str) -> PanelResult<()> {
        if self.confirm.confirm(message) {
            Ok(())
        } else {
            info!("declined: {}", message);
            Err(PanelError::Cancelled)
        }
    }

    /// Fixed wait after a mutation before re-reading router state.
    pub async fn settle(&self) {
        tokio::time::sleep(self.config.settle_delay()).await;
    }

    pub fn register_route(&self, path: &str, handler: Arc<dyn RouteHandler>) {
        if let Ok(mut routes) = self.routes.write() {
            debug!("register route {}", path);
            routes.push((path.to_string(), handler));
        }
    }

    pub fn registered_routes(&self) -> Vec<String> {
        self.routes
            .read()
            .map(|r| r.iter().map(|(p, _)| p.clone()).collect())
            .unwrap_or_default()
    }

    pub fn module(&self, name: &str) -> Option<Arc<dyn PanelModule>> {
        self.modules.read().ok()?.get(name).cloned()
    }

    pub fn is_module_loaded(&self, name: &str) -> bool {
        self.module(name).is_some()
    }

    /// Creates the module on first use. Gated by its features.
    pub fn load_module(&self, name: &str) -> Option<Arc<dyn PanelModule>> {
        let mut modules = self.modules.write().ok()?;
        if let Some(module) = modules.get(name) {
            return Some(module.clone());
        }
        if !self.features().should_load_module(name) {
            debug!("module {} disabled by features", name);
            return None;
        }
        let factory = match self.factories.get(name) {
            Some(factory) => factory,
            None => {
                error!("Failed to load module {}: no factory", name);
                return None;
            }
        };
        let module = factory(self);
        info!("module {} loaded", name);
        modules.insert(name.to_string(), module.clone());
        Some(module)
    }

    pub async fn init(&self) -> ViewState {
        if self.session.restore() {
            if self.session.validate_session().await {
                self.bootstrap().await;
                return self.view_state();
            }
            info!("stored session is no longer valid");
            self.session.clear_token();
        }

        match self.session.saved_credentials() {
            Some(creds) => {
                if let Err(err) = self.login(&creds.username, &creds.password, true).await {
                    error!("Auto-login failed: {}", err);
                    self.session.clear_saved_credentials();
                    self.show_login_view();
                }
            }
            None => self.show_login_view(),
        }
        self.view_state()
    }

    /// Login then bootstrap. Leaves the view untouched on failure.
    pub async fn login(&self, username: &str, password: &str, remember: bool) -> PanelResult<()> {
        self.session.login(username, password, remember).await?;
        self.bootstrap().await;
        Ok(())
    }

    /// Login from the form: failures are shown on the login view.
    pub async fn submit_login(&self, username: &str, password: &str, remember: bool) -> PanelResult<()> {
        let result = self.login(username, password, remember).await;
        if let Err(err) = &result {
            error!("Login error: {}", err);
            let message = format!("Login failed: {}", err);
            self.with_doc(|d| d.set_text("login-error", &message));
            self.toast(&message, ToastKind::Error);
        }
        result
    }

    async fn bootstrap(&self) {
        let flags = FeatureFlags::load(&self.client).await;
        if let Ok(mut features) = self.features.write() {
            *features = flags.clone();
        }
        self.load_module("dashboard");
        self.with_doc(|d| d.apply_feature_flags(&flags));
        self.show_main_view();
        self.start_application().await;
    }

    async fn start_application(&self) {
        let hash = self.with_doc(|d| d.location_hash().to_string());
        if hash.trim_start_matches('#').is_empty() {
            self.navigate(DEFAULT_ROUTE).await;
        } else {
            self.handle_route_change().await;
        }
        if self.is_module_loaded("dashboard") && self.current_base().as_deref() == Some("dashboard") {
            self.start_polling();
        }
    }

    pub async fn logout(&self) {
        self.stop_polling();
        self.session.logout().await;
        self.show_login_view();
    }

    fn show_login_view(&self) {
        self.with_doc(|d| {
            d.set_location_hash("");
            d.show("login-view");
            d.hide("main-view");
        });
        if let Ok(mut base) = self.current_base.write() {
            *base = None;
        }
        self.set_view(ViewState::LoginView);
    }

    fn show_main_view(&self) {
        self.with_doc(|d| {
            d.hide("login-view");
            d.show("main-view");
            d.set_text("login-error", "");
        });
    }

    pub fn current_base(&self) -> Option<String> {
        self.current_base.read().ok().and_then(|b| b.clone())
    }

    pub async fn navigate(&self, path: &str) {
        self.with_doc(|d| d.set_location_hash(path));
        self.handle_route_change().await;
    }

    pub async fn handle_route_change(&self) {
        if !self.session.has_session() {
            return;
        }
        let hash = self.with_doc(|d| d.location_hash().to_string());
        let (base, sub_paths, full_path) = parse_route(&hash);

        let previous = self.current_base();
        if let Ok(mut current) = self.current_base.write() {
            *current = Some(base.clone());
        }
        if let Some(previous) = previous.filter(|p| *p != base) {
            if let Some(module) = module_for_route(&previous).and_then(|m| self.module(m)) {
                if module.capabilities().cleanup {
                    module.cleanup(self);
                }
            }
        }

        let active_href = format!("#/{}", base);
        self.with_doc(|d| {
            for page in d.ids_with_class("page") {
                d.hide(&page);
            }
            for link in d.ids_with_class("nav-link") {
                if d.attr(&link, "href") == Some(active_href.as_str()) {
                    d.add_class(&link, "active");
                } else {
                    d.remove_class(&link, "active");
                }
            }
        });

        if base == "dashboard" {
            self.start_polling();
        } else {
            self.stop_polling();
        }

        let module = module_for_route(&base).and_then(|m| self.load_module(m));

        let handler = self.routes.read().ok().and_then(|routes| {
            routes
                .iter()
                .find(|(path, _)| route_matches(path, &full_path))
                .map(|(_, h)| h.clone())
        });

        match handler {
            Some(handler) => match handler.handle_route(self, &full_path, &sub_paths).await {
                Ok(()) => self.set_view(ViewState::MainView(full_path)),
                Err(err) => {
                    error!("Route handler error: {}", err);
                    self.toast("Failed to load page", ToastKind::Error);
                }
            },
            None => {
                if let Some(module) = module.filter(|m| m.capabilities().load) {
                    if let Err(err) = module.load(self).await {
                        error!("Module {} load error: {}", module.name(), err);
                        self.toast("Failed to load page", ToastKind::Error);
                        return;
                    }
                }
                let page = format!("{}-page", base);
                if self.with_doc(|d| d.show(&page)) {
                    self.set_view(ViewState::MainView(full_path));
                }
            }
        }
    }

    /// Action dispatch for buttons and row actions.
    pub async fn perform(
        &self,
        module: &str,
        action: &str,
        id: Option<&str>,
        form: &FormData,
    ) -> PanelResult<()> {
        if !self.session.has_session() {
            return Err(PanelError::ModuleUnavailable(module.to_string()));
        }
        let instance = match self.load_module(module) {
            Some(instance) => instance,
            None => {
                self.toast(&format!("Module {} is not available", module), ToastKind::Error);
                return Err(PanelError::ModuleUnavailable(module.to_string()));
            }
        };
        debug!("perform {}.{} id={:?}", module, action, id);
        let result = instance.handle_action(self, action, id, form).await;
        if let Err(PanelError::UnknownAction(name)) = &result {
            self.toast(&format!("Unknown action {}", name), ToastKind::Error);
        }
        result
    }

    /// Idempotent: an existing timer is aborted before the new one starts.
    pub fn start_polling(&self) {
        let ctx = self.self_ref.clone();
        let period = self.config.poll_interval();
        let mut poller = lock(&self.poller);
        if let Some(old) = poller.take() {
            old.abort();
        }

        self.active_timers.fetch_add(1, Ordering::SeqCst);
        let guard = TimerGuard(self.active_timers.clone());
        *poller = Some(tokio::spawn(async move {
            let _guard = guard;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(ctx) = ctx.upgrade() else { break };
                ctx.poll_once().await;
            }
        }));
    }

    pub fn stop_polling(&self) {
        if let Some(handle) = lock(&self.poller).take() {
            handle.abort();
            debug!("polling stopped");
        }
    }

    pub fn is_polling(&self) -> bool {
        lock(&self.poller).is_some()
    }

    /// Timer tasks still alive, aborted ones included until the runtime drops them.
    pub fn active_timer_count(&self) -> usize {
        self.active_timers.load(Ordering::SeqCst)
    }

    pub async fn poll_once(&self) {
        if !self.page_visible.load(Ordering::SeqCst) {
            return;
        }
        let Some(dashboard) = self.module("dashboard") else { return };
        if !dashboard.capabilities().update {
            return;
        }
        if let Err(err) = dashboard.update(self).await {
            warn!("dashboard update failed: {}", err);
        }
    }

    pub fn set_page_visible(&self, visible: bool) {
        self.page_visible.store(visible, Ordering::SeqCst);
        if !visible {
            self.stop_polling();
        } else if self.current_base().as_deref() == Some("dashboard")
            && matches!(self.view_state(), ViewState::MainView(_))
        {
            self.start_polling();
        }
    }

    pub fn is_page_visible(&self) -> bool {
        self.page_visible.load(Ordering::SeqCst)
    }
}

impl Drop for AppContext {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{AutoConfirm, ModuleCapabilities};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use ubus_rpc::{MockUbus, RPCErrors};
    use wrt_api::{MemoryStorage, STORAGE_KEY_CREDENTIALS, STORAGE_KEY_SESSION};

    struct Probe {
        name: &'static str,
        fail: bool,
    }

    #[async_trait]
    impl RouteHandler for Probe {
        async fn handle_route(&self, _ctx: &AppContext, _full_path: &str, _sub: &[String]) -> PanelResult<()> {
            if self.fail {
                return Err(PanelError::ReasonError("boom".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PanelModule for Probe {
        fn name(&self) -> &'static str {
            self.name
        }

        fn capabilities(&self) -> ModuleCapabilities {
            ModuleCapabilities { load: false, update: true, cleanup: false }
        }

        async fn update(&self, ctx: &AppContext) -> PanelResult<()> {
            ctx.client().call("system", "info", json!({})).await?;
            Ok(())
        }
    }

    fn probe(name: &'static str, path: &str, fail: bool, ctx: &AppContext) -> Arc<dyn PanelModule> {
        let probe = Arc::new(Probe { name, fail });
        ctx.register_route(path, probe.clone());
        probe
    }

    fn dashboard_probe(ctx: &AppContext) -> Arc<dyn PanelModule> {
        probe("dashboard", "/dashboard", false, ctx)
    }

    fn network_probe(ctx: &AppContext) -> Arc<dyn PanelModule> {
        probe("network", "/network", false, ctx)
    }

    fn failing_probe(ctx: &AppContext) -> Arc<dyn PanelModule> {
        probe("system", "/net", true, ctx)
    }

    fn logged_in_mock() -> Arc<MockUbus> {
        let mock = Arc::new(MockUbus::new());
        mock.on("session", "login", json!({"ubus_rpc_session": "c0ffee"}))
            .on("system", "info", json!({}))
            .fail("uci", "get", RPCErrors::Protocol("Not found".to_string()));
        mock
    }

    fn setup(mock: Arc<MockUbus>, storage: Arc<MemoryStorage>) -> Arc<AppContext> {
        let mut factories: HashMap<&'static str, ModuleFactory> = HashMap::new();
        factories.insert("dashboard", dashboard_probe);
        factories.insert("network", network_probe);
        factories.insert("system", failing_probe);
        let client = Arc::new(RouterClient::new(mock));
        AppContext::with_factories(
            PanelConfig::default(),
            client,
            storage,
            Arc::new(AutoConfirm(true)),
            factories,
        )
    }

    #[test]
    fn test_parse_route() {
        assert_eq!(parse_route(""), ("dashboard".to_string(), vec![], "/dashboard".to_string()));
        assert_eq!(
            parse_route("#/network/firewall"),
            ("network".to_string(), vec!["firewall".to_string()], "/network/firewall".to_string())
        );
        assert_eq!(
            parse_route("//system//cron/"),
            ("system".to_string(), vec!["cron".to_string()], "/system/cron".to_string())
        );
        assert!(route_matches("/network", "/network/dhcp"));
        assert!(!route_matches("/net", "/network"));
    }

    #[tokio::test]
    async fn test_login_bootstrap_and_routing() {
        let _ = env_logger::builder().is_test(true).try_init();
        let ctx = setup(logged_in_mock(), Arc::new(MemoryStorage::new()));

        ctx.login("root", "pw", false).await.unwrap();
        assert_eq!(ctx.view_state(), ViewState::MainView("/dashboard".to_string()));
        assert!(ctx.is_polling());
        assert!(!ctx.with_doc(|d| d.is_hidden("main-view")));
        assert!(ctx.with_doc(|d| d.has_class("nav-dashboard", "active")));

        ctx.navigate("/network/dhcp").await;
        assert_eq!(ctx.view_state(), ViewState::MainView("/network/dhcp".to_string()));
        assert!(!ctx.is_polling());
        assert!(ctx.with_doc(|d| d.has_class("nav-network", "active")));
        assert!(!ctx.with_doc(|d| d.has_class("nav-dashboard", "active")));
        assert_eq!(ctx.registered_routes(), vec!["/dashboard".to_string(), "/network".to_string()]);

        // no module and no route: the page element is shown as is
        ctx.navigate("/vpn").await;
        assert_eq!(ctx.view_state(), ViewState::MainView("/vpn".to_string()));
        assert!(!ctx.with_doc(|d| d.is_hidden("vpn-page")));
        assert!(ctx.with_doc(|d| d.is_hidden("network-page")));
    }

    #[tokio::test]
    async fn test_handler_error_becomes_toast() {
        let ctx = setup(logged_in_mock(), Arc::new(MemoryStorage::new()));
        ctx.login("root", "pw", false).await.unwrap();

        ctx.load_module("system");
        ctx.navigate("/net").await;
        let toasts = ctx.with_doc(|d| d.take_toasts());
        assert!(toasts
            .iter()
            .any(|t| t.message == "Failed to load page" && t.kind == ToastKind::Error));
        assert_eq!(ctx.view_state(), ViewState::MainView("/dashboard".to_string()));
    }

    #[tokio::test]
    async fn test_failed_login_keeps_login_view() {
        let mock = Arc::new(MockUbus::new());
        mock.on("session", "login", json!({}));
        let storage = Arc::new(MemoryStorage::new());
        let ctx = setup(mock, storage.clone());
        assert_eq!(ctx.init().await, ViewState::LoginView);

        assert!(ctx.submit_login("root", "bad", true).await.is_err());
        assert_eq!(ctx.view_state(), ViewState::LoginView);
        assert!(ctx.session().saved_credentials().is_none());
        assert!(storage.get(STORAGE_KEY_SESSION).is_none());
        assert!(ctx.with_doc(|d| d.text("login-error").starts_with("Login failed")));
    }

    #[tokio::test]
    async fn test_init_paths() {
        let mock = logged_in_mock();
        mock.on("session", "access", json!({}));
        let storage = Arc::new(MemoryStorage::new());
        storage.set(STORAGE_KEY_SESSION, "stored").unwrap();
        let ctx = setup(mock.clone(), storage);
        assert_eq!(ctx.init().await, ViewState::MainView("/dashboard".to_string()));
        assert_eq!(mock.call_count("session", "login"), 0);

        // stale session, stale saved password
        let mock = Arc::new(MockUbus::new());
        mock.on_status("session", "access", 6).on("session", "login", json!({}));
        let storage = Arc::new(MemoryStorage::new());
        storage.set(STORAGE_KEY_SESSION, "stale").unwrap();
        storage
            .set(STORAGE_KEY_CREDENTIALS, r#"{"username":"root","password":"old"}"#)
            .unwrap();
        let ctx = setup(mock.clone(), storage.clone());
        assert_eq!(ctx.init().await, ViewState::LoginView);
        assert!(storage.get(STORAGE_KEY_SESSION).is_none());
        assert!(storage.get(STORAGE_KEY_CREDENTIALS).is_none());
        assert_eq!(mock.call_count("session", "login"), 1);
        assert!(ctx.with_doc(|d| d.toasts().is_empty()));
    }

    #[tokio::test]
    async fn test_logout_clears_everything_even_on_error() {
        let mock = logged_in_mock();
        mock.fail("session", "destroy", RPCErrors::Transport("gone".to_string()));
        let storage = Arc::new(MemoryStorage::new());
        let ctx = setup(mock, storage.clone());
        ctx.login("root", "pw", true).await.unwrap();

        ctx.logout().await;
        assert_eq!(ctx.view_state(), ViewState::LoginView);
        assert!(!ctx.is_polling());
        assert!(storage.get(STORAGE_KEY_SESSION).is_none());
        assert!(storage.get(STORAGE_KEY_CREDENTIALS).is_none());
        assert!(!ctx.with_doc(|d| d.is_hidden("login-view")));
    }

    #[tokio::test]
    async fn test_stop_polling_without_timer() {
        let ctx = setup(Arc::new(MockUbus::new()), Arc::new(MemoryStorage::new()));
        assert!(!ctx.is_polling());
        ctx.stop_polling();
        ctx.stop_polling();
        assert!(!ctx.is_polling());
    }

    #[tokio::test]
    async fn test_unavailable_module() {
        let ctx = setup(logged_in_mock(), Arc::new(MemoryStorage::new()));
        ctx.login("root", "pw", false).await.unwrap();
        let err = ctx.perform("vpn", "refresh", None, &FormData::new()).await.unwrap_err();
        assert!(matches!(err, PanelError::ModuleUnavailable(m) if m == "vpn"));
        let err = ctx.perform("network", "frobnicate", None, &FormData::new()).await.unwrap_err();
        assert!(matches!(err, PanelError::UnknownAction(a) if a == "frobnicate"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_polling_twice_keeps_one_timer() {
        let mock = logged_in_mock();
        let ctx = setup(mock.clone(), Arc::new(MemoryStorage::new()));
        ctx.login("root", "pw", false).await.unwrap();

        ctx.start_polling();
        ctx.start_polling();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ctx.active_timer_count(), 1);
        assert_eq!(mock.call_count("system", "info"), 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(mock.call_count("system", "info"), 1);

        ctx.set_page_visible(false);
        assert!(!ctx.is_polling());
        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(mock.call_count("system", "info"), 1);

        ctx.set_page_visible(true);
        assert!(ctx.is_polling());
        tokio::time::sleep(Duration::from_millis(3010)).await;
        assert_eq!(mock.call_count("system", "info"), 2);
    }

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl RouteHandler for Counter {
        async fn handle_route(&self, _ctx: &AppContext, _full_path: &str, _sub: &[String]) -> PanelResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_route_prefix_needs_segment_boundary() {
        let mut factories: HashMap<&'static str, ModuleFactory> = HashMap::new();
        factories.insert("dashboard", dashboard_probe);
        let ctx = AppContext::with_factories(
            PanelConfig::default(),
            Arc::new(RouterClient::new(logged_in_mock())),
            Arc::new(MemoryStorage::new()),
            Arc::new(AutoConfirm(true)),
            factories,
        );
        ctx.login("root", "pw", false).await.unwrap();

        let net = Arc::new(AtomicUsize::new(0));
        let network = Arc::new(AtomicUsize::new(0));
        ctx.register_route("/net", Arc::new(Counter(net.clone())));
        ctx.register_route("/network", Arc::new(Counter(network.clone())));

        ctx.navigate("/network/dhcp").await;
        assert_eq!((net.load(Ordering::SeqCst), network.load(Ordering::SeqCst)), (0, 1));
        assert_eq!(ctx.view_state(), ViewState::MainView("/network/dhcp".to_string()));

        ctx.navigate("/net").await;
        assert_eq!((net.load(Ordering::SeqCst), network.load(Ordering::SeqCst)), (1, 1));
    }

    /// Registers no route, so navigation falls back to its load entry point.
    struct PageOnly {
        name: &'static str,
        load: bool,
    }

    #[async_trait]
    impl PanelModule for PageOnly {
        fn name(&self) -> &'static str {
            self.name
        }

        fn capabilities(&self) -> ModuleCapabilities {
            ModuleCapabilities { load: self.load, update: false, cleanup: false }
        }

        async fn load(&self, ctx: &AppContext) -> PanelResult<()> {
            ctx.client().call("system", "board", json!({})).await?;
            Ok(())
        }
    }

    fn vpn_with_load(_ctx: &AppContext) -> Arc<dyn PanelModule> {
        Arc::new(PageOnly { name: "vpn", load: true })
    }

    fn services_without_load(_ctx: &AppContext) -> Arc<dyn PanelModule> {
        Arc::new(PageOnly { name: "services", load: false })
    }

    #[tokio::test]
    async fn test_load_capability_gates_page_load() {
        let mock = logged_in_mock();
        mock.on("system", "board", json!({}));
        let mut factories: HashMap<&'static str, ModuleFactory> = HashMap::new();
        factories.insert("dashboard", dashboard_probe);
        factories.insert("vpn", vpn_with_load);
        factories.insert("services", services_without_load);
        let ctx = AppContext::with_factories(
            PanelConfig::default(),
            Arc::new(RouterClient::new(mock.clone())),
            Arc::new(MemoryStorage::new()),
            Arc::new(AutoConfirm(true)),
            factories,
        );
        ctx.login("root", "pw", false).await.unwrap();

        ctx.navigate("/vpn").await;
        assert_eq!(mock.call_count("system", "board"), 1);
        assert_eq!(ctx.view_state(), ViewState::MainView("/vpn".to_string()));
        assert!(!ctx.with_doc(|d| d.is_hidden("vpn-page")));

        ctx.navigate("/services").await;
        assert_eq!(mock.call_count("system", "board"), 1);
        assert_eq!(ctx.view_state(), ViewState::MainView("/services".to_string()));

        // a failing load keeps the previous view and reports it
        mock.fail("system", "board", RPCErrors::Transport("down".to_string()));
        ctx.navigate("/vpn").await;
        assert_eq!(ctx.view_state(), ViewState::MainView("/services".to_string()));
        assert!(ctx
            .with_doc(|d| d.take_toasts())
            .iter()
            .any(|t| t.message == "Failed to load page"));
    }
}
