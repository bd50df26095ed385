use async_trait::async_trait;
use std::sync::Arc;

use crate::{AppContext, FormData, PanelError, PanelResult};

/// Which optional entry points a module really implements. The shell checks
/// these instead of calling no-op defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModuleCapabilities {
    pub load: bool,
    pub update: bool,
    pub cleanup: bool,
}

#[async_trait]
pub trait PanelModule: Send + Sync {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> ModuleCapabilities;

    async fn load(&self, _ctx: &AppContext) -> PanelResult<()> {
        Ok(())
    }

    async fn update(&self, _ctx: &AppContext) -> PanelResult<()> {
        Ok(())
    }

    async fn handle_action(
        &self,
        _ctx: &AppContext,
        action: &str,
        _id: Option<&str>,
        _form: &FormData,
    ) -> PanelResult<()> {
        Err(PanelError::UnknownAction(action.to_string()))
    }

    fn cleanup(&self, _ctx: &AppContext) {}
}

#[async_trait]
pub trait RouteHandler: Send + Sync {
    async fn handle_route(&self, ctx: &AppContext, full_path: &str, sub_paths: &[String]) -> PanelResult<()>;
}

/// Builds a module and registers its routes on `ctx`.
pub type ModuleFactory = fn(&AppContext) -> Arc<dyn PanelModule>;

pub trait Confirm: Send + Sync {
    fn confirm(&self, message: &str) -> bool;
}

/// Answers every prompt the same way.
pub struct AutoConfirm(pub bool);

impl Confirm for AutoConfirm {
    fn confirm(&self, _message: &str) -> bool {
        self.0
    }
}
