use control_panel::{AppContext, AutoConfirm, Confirm, FileStorage, PanelConfig, PanelError, ViewState};
use log::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::prompt::StdinConfirm;
use crate::render::{render_document, render_toast};
use crate::util::{read_selected_file, ActionArgs};

pub struct CliApp {
    pub ctx: Arc<AppContext>,
    out_dir: PathBuf,
}

pub fn build_context(config: PanelConfig, assume_yes: bool) -> Result<Arc<AppContext>, String> {
    let client = wrt_api::connect_router(&config).map_err(|err| err.to_string())?;
    let storage = FileStorage::open(&config.storage_path()).map_err(|err| err.to_string())?;
    let confirm: Arc<dyn Confirm> = if assume_yes {
        Arc::new(AutoConfirm(true))
    } else {
        Arc::new(StdinConfirm)
    };
    Ok(AppContext::new(config, client, Arc::new(storage), confirm))
}

impl CliApp {
    pub fn new(ctx: Arc<AppContext>, out_dir: &Path) -> Self {
        CliApp {
            ctx,
            out_dir: out_dir.to_path_buf(),
        }
    }

    /// Restore the stored session (or saved credentials). Errors when nobody is logged in.
    pub async fn resume(&self) -> Result<(), String> {
        match self.ctx.init().await {
            ViewState::MainView(_) => Ok(()),
            _ => {
                self.flush_toasts();
                Err("not logged in, run `wrtcli login` first".to_string())
            }
        }
    }

    pub async fn login(&self, username: &str, password: &str, remember: bool) -> Result<(), String> {
        let result = self.ctx.submit_login(username, password, remember).await;
        self.flush_toasts();
        result.map_err(|err| err.to_string())
    }

    pub async fn open(&self, path: &str) {
        let path = if path.starts_with('/') { path.to_string() } else { format!("/{}", path) };
        self.ctx.navigate(&path).await;
    }

    pub async fn run_action(&self, module: &str, action: &str, args: &ActionArgs) -> Result<(), String> {
        for (input, path) in &args.files {
            let file = read_selected_file(path)?;
            info!("select {} for {}", file.name, input);
            self.ctx.with_doc(|d| d.select_file(input, file));
        }
        let result = self
            .ctx
            .perform(module, action, args.id.as_deref(), &args.form)
            .await;
        self.save_downloads()?;
        match result {
            Ok(()) => Ok(()),
            Err(PanelError::Cancelled) => {
                println!("cancelled");
                Ok(())
            }
            Err(err) => Err(err.to_string()),
        }
    }

    /// Writes pending downloads into the output directory and returns their paths.
    pub fn save_downloads(&self) -> Result<Vec<PathBuf>, String> {
        let downloads = self.ctx.with_doc(|d| d.take_downloads());
        let mut saved = Vec::new();
        for download in downloads {
            std::fs::create_dir_all(&self.out_dir)
                .map_err(|err| format!("create {} failed: {}", self.out_dir.display(), err))?;
            let path = self.out_dir.join(&download.filename);
            std::fs::write(&path, &download.bytes)
                .map_err(|err| format!("write {} failed: {}", path.display(), err))?;
            println!("saved {} ({} bytes)", path.display(), download.bytes.len());
            saved.push(path);
        }
        Ok(saved)
    }

    pub fn flush_toasts(&self) {
        for toast in self.ctx.with_doc(|d| d.take_toasts()) {
            println!("{}", render_toast(&toast));
        }
    }

    pub fn show(&self) {
        self.flush_toasts();
        print!("{}", self.ctx.with_doc(|d| render_document(d)));
    }

    pub fn status(&self) -> String {
        let route = match self.ctx.view_state() {
            ViewState::MainView(path) => path,
            ViewState::LoginView => "login".to_string(),
            ViewState::NoSession => "none".to_string(),
        };
        let features = self.ctx.features();
        let enabled: Vec<&str> = wrt_api::DEFAULT_FEATURES
            .iter()
            .copied()
            .filter(|f| features.is_enabled(f))
            .collect();
        format!(
            "endpoint: {}\nsession: {}\nview: {}\npolling: {}\nfeatures: {}\n",
            self.ctx.config().endpoint,
            if self.ctx.session().has_session() { "active" } else { "none" },
            route,
            match (self.ctx.is_polling(), self.ctx.is_page_visible()) {
                (true, _) => "running",
                (false, false) => "paused",
                (false, true) => "off",
            },
            enabled.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::parse_action_args;
    use control_panel::{MemoryStorage, RouterClient};
    use serde_json::json;
    use ubus_rpc::MockUbus;

    async fn app(mock: Arc<MockUbus>, out_dir: &Path) -> CliApp {
        mock.on("session", "login", json!({"ubus_rpc_session": "c0ffee"}))
            .on("session", "access", json!({}))
            .on("system", "info", json!({}))
            .on("system", "board", json!({"hostname": "OpenWrt"}));
        let mut config = PanelConfig::default();
        config.settle_delay_ms = 0;
        let ctx = AppContext::new(
            config,
            Arc::new(RouterClient::new(mock)),
            Arc::new(MemoryStorage::new()),
            Arc::new(AutoConfirm(true)),
        );
        CliApp::new(ctx, out_dir)
    }

    #[tokio::test]
    async fn test_resume_without_session() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(Arc::new(MockUbus::new()), dir.path()).await;
        assert!(app.resume().await.is_err());
        assert_eq!(app.ctx.view_state(), ViewState::LoginView);
        let status = app.status();
        assert!(status.contains("session: none\nview: login\npolling: off"));
    }

    #[tokio::test]
    async fn test_backup_action_saves_download() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockUbus::new());
        mock.on("file", "exec", json!({"code": 0}))
            .on("file", "read", json!({"data": "aGVsbG8="}));
        let app = app(mock, dir.path()).await;
        app.login("root", "pw", false).await.unwrap();
        app.ctx.stop_polling();

        app.run_action("system", "backup", &ActionArgs::default()).await.unwrap();
        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        let path = files[0].as_ref().unwrap().path();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("backup-"));
        assert_eq!(std::fs::read(path).unwrap(), b"hello".to_vec());
    }

    #[tokio::test]
    async fn test_action_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(Arc::new(MockUbus::new()), dir.path()).await;
        app.login("root", "pw", false).await.unwrap();
        app.ctx.stop_polling();

        let args = parse_action_args(&["host=".to_string()]).unwrap();
        assert!(app.run_action("network", "ping", &args).await.is_err());
        let missing = ActionArgs {
            files: vec![("firmware-file".to_string(), dir.path().join("nope.bin"))],
            ..Default::default()
        };
        assert!(app.run_action("system", "validate-firmware", &missing).await.is_err());
    }
}
