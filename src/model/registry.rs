//! Process-wide catalogue of overlay plugins.
//!
//! Providers render rows of information; actions run work. Both are read as
//! snapshots when an overlay surface is built, so registering while a surface
//! is open only affects surfaces created afterwards.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use static_assertions::assert_impl_all;
use tokio_util::sync::CancellationToken;

use crate::common::prefs::PreferenceStore;
use crate::model::window::WindowId;

/// The preference a row displays, when the host may offer to edit it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrefKey {
    pub namespace: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InfoRow {
    pub label: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit: Option<PrefKey>,
}

impl InfoRow {
    pub fn new(label: impl Into<String>, value: impl ToString) -> Self {
        Self { label: label.into(), value: value.to_string(), edit: None }
    }

    /// Marks the row as showing `namespace.key`; see
    /// [`OverlaySurface::set_preference`](crate::ui::overlay::OverlaySurface::set_preference).
    pub fn editing(mut self, namespace: impl Into<String>, key: impl Into<String>) -> Self {
        self.edit = Some(PrefKey { namespace: namespace.into(), key: key.into() });
        self
    }
}

/// What a plugin gets to see of the window it is rendered for.
#[derive(Clone)]
pub struct PluginContext {
    window_id: WindowId,
    window_name: Arc<str>,
    prefs: Arc<dyn PreferenceStore>,
    cancel: CancellationToken,
}

impl PluginContext {
    pub fn new(
        window_id: WindowId,
        window_name: impl Into<Arc<str>>,
        prefs: Arc<dyn PreferenceStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            window_id,
            window_name: window_name.into(),
            prefs,
            cancel,
        }
    }

    pub fn window_id(&self) -> WindowId { self.window_id }

    pub fn window_name(&self) -> &str { &self.window_name }

    pub fn prefs(&self) -> &dyn PreferenceStore { self.prefs.as_ref() }

    /// Set once the overlay that started this plugin is gone.
    pub fn is_cancelled(&self) -> bool { self.cancel.is_cancelled() }

    pub async fn cancelled(&self) { self.cancel.cancelled().await }
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("window_id", &self.window_id)
            .field("window_name", &self.window_name)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

pub type RenderFn = Arc<dyn Fn(&PluginContext) -> anyhow::Result<Vec<InfoRow>> + Send + Sync>;
pub type ActionFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'static>>;
pub type ExecuteFn = Arc<dyn Fn(PluginContext) -> ActionFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PluginKind {
    Provider,
    Action,
}

#[derive(Clone)]
pub enum Capability {
    Render(RenderFn),
    Execute(ExecuteFn),
}

#[derive(Clone)]
pub struct PluginEntry {
    title: Arc<str>,
    description: Option<Arc<str>>,
    capability: Capability,
}

impl PluginEntry {
    pub fn provider(title: impl Into<Arc<str>>, render: RenderFn) -> Self {
        Self {
            title: title.into(),
            description: None,
            capability: Capability::Render(render),
        }
    }

    pub fn action(title: impl Into<Arc<str>>, description: Option<Arc<str>>, execute: ExecuteFn) -> Self {
        Self {
            title: title.into(),
            description,
            capability: Capability::Execute(execute),
        }
    }

    pub fn title(&self) -> &str { &self.title }

    pub fn description(&self) -> Option<&str> { self.description.as_deref() }

    pub fn capability(&self) -> &Capability { &self.capability }

    pub fn kind(&self) -> PluginKind {
        match self.capability {
            Capability::Render(_) => PluginKind::Provider,
            Capability::Execute(_) => PluginKind::Action,
        }
    }

    /// `None` for actions.
    pub fn render(&self, ctx: &PluginContext) -> Option<anyhow::Result<Vec<InfoRow>>> {
        match &self.capability {
            Capability::Render(render) => Some(render(ctx)),
            Capability::Execute(_) => None,
        }
    }

    /// `None` for providers.
    pub fn execute(&self, ctx: PluginContext) -> Option<ActionFuture> {
        match &self.capability {
            Capability::Execute(execute) => Some(execute(ctx)),
            Capability::Render(_) => None,
        }
    }
}

impl fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginEntry")
            .field("title", &self.title)
            .field("description", &self.description)
            .field("kind", &self.kind())
            .finish()
    }
}

pub trait InfoProvider: Send + Sync + 'static {
    fn title(&self) -> &str;

    fn render(&self, ctx: &PluginContext) -> anyhow::Result<Vec<InfoRow>>;
}

pub trait OverlayAction: Send + Sync + 'static {
    fn title(&self) -> &str;

    fn description(&self) -> Option<&str> { None }

    fn execute(&self, ctx: PluginContext) -> ActionFuture;
}

#[derive(Default)]
pub struct Registry {
    providers: RwLock<Vec<PluginEntry>>,
    actions: RwLock<Vec<PluginEntry>>,
}

assert_impl_all!(Registry: Send, Sync);

impl Registry {
    pub fn new() -> Self { Self::default() }

    pub fn add_provider<F>(&self, title: impl Into<Arc<str>>, render: F)
    where
        F: Fn(&PluginContext) -> anyhow::Result<Vec<InfoRow>> + Send + Sync + 'static,
    {
        self.providers.write().push(PluginEntry::provider(title, Arc::new(render)));
    }

    pub fn add_action<F, Fut>(&self, title: impl Into<Arc<str>>, description: Option<&str>, execute: F)
    where
        F: Fn(PluginContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let execute: ExecuteFn = Arc::new(move |ctx| -> ActionFuture { Box::pin(execute(ctx)) });
        self.actions.write().push(PluginEntry::action(title, description.map(Arc::from), execute));
    }

    pub fn register_provider<P: InfoProvider>(&self, provider: P) {
        let title: Arc<str> = provider.title().into();
        self.add_provider(title, move |ctx| provider.render(ctx));
    }

    pub fn register_action<A: OverlayAction>(&self, action: A) {
        let title: Arc<str> = action.title().into();
        let description = action.description().map(Arc::from);
        let execute: ExecuteFn = Arc::new(move |ctx| action.execute(ctx));
        self.actions.write().push(PluginEntry::action(title, description, execute));
    }

    /// Registration-ordered copy of the providers.
    pub fn providers(&self) -> Vec<PluginEntry> { self.providers.read().clone() }

    /// Registration-ordered copy of the actions.
    pub fn actions(&self) -> Vec<PluginEntry> { self.actions.read().clone() }

    /// Removes the first provider with this title.
    pub fn remove_provider(&self, title: &str) -> bool { remove_first(&self.providers, title) }

    /// Removes the first action with this title.
    pub fn remove_action(&self, title: &str) -> bool { remove_first(&self.actions, title) }

    pub fn clear(&self) {
        self.providers.write().clear();
        self.actions.write().clear();
    }

    pub fn is_empty(&self) -> bool { self.providers.read().is_empty() && self.actions.read().is_empty() }
}

fn remove_first(entries: &RwLock<Vec<PluginEntry>>, title: &str) -> bool {
    let mut entries = entries.write();
    match entries.iter().position(|entry| entry.title() == title) {
        Some(index) => {
            entries.remove(index);
            true
        }
        None => false,
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("providers", &*self.providers.read())
            .field("actions", &*self.actions.read())
            .finish()
    }
}
