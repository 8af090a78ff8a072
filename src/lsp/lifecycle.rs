//! Lifecycle of the backend connection.
//!
//! [`LifecycleController`] owns the live [`Configuration`] and the current
//! [`ProtocolBridge`]. It starts the bridge on activation, replaces it on
//! restart or relevant settings changes, recovers from crashes, routes
//! backend-initiated messages to the [`EditorHost`] and stops everything on
//! deactivation.
//!
//! A bridge is never mutated in place. Restarting shuts the old bridge down
//! completely (its pending requests resolve as cancelled) before the new one
//! is published.

mod commands;
mod remediation;
mod restart_policy;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use arc_swap::{ArcSwap, ArcSwapOption};
use log::{debug, error, info, warn};
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use tower_lsp_server::ls_types::{CompletionItem, Hover, SignatureInformation};

use super::bridge::{
    BridgeEvent, BridgeEvents, BridgeState, DefinitionLocation, ErrorCodes, MINIMUM_BACKEND_VERSION,
    PositionParams, ProtocolBridge,
};
use super::content_cache::{ContentCache, PageSource};
use super::transport::{TransportHandle, TransportSelector};
use super::virtual_uri::VirtualDocumentUri;
use crate::config::{Configuration, SettingsEventKind, load_settings};
use crate::error::{BridgeError, BridgeResult, LockResultExt};
use crate::host::{EditorHost, MessageKind};

pub use commands::Command;
pub use remediation::Remediation;
pub use restart_policy::{MAX_RESTARTS, RESTART_WINDOW, RestartPolicy};

const RESTART_ACTION: &str = "Restart";

/// Opens the byte stream a new bridge runs over.
pub trait Connector: Send + Sync + 'static {
    fn connect<H: EditorHost>(
        &self,
        config: Arc<Configuration>,
        host: &H,
    ) -> impl Future<Output = BridgeResult<TransportHandle>> + Send;
}

/// Connects as the configured transport kind dictates.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelectorConnector;

impl Connector for SelectorConnector {
    fn connect<H: EditorHost>(
        &self,
        config: Arc<Configuration>,
        host: &H,
    ) -> impl Future<Output = BridgeResult<TransportHandle>> + Send {
        TransportSelector::connect(config, host)
    }
}

/// Build the configuration for `workspace_roots` from every settings layer.
///
/// Settings events are logged; a broken layer never prevents a configuration.
pub fn load_configuration(workspace_roots: Vec<PathBuf>, override_settings: Option<Value>) -> Configuration {
    let outcome = load_settings(
        workspace_roots.first().map(PathBuf::as_path),
        override_settings,
    );
    for event in &outcome.events {
        match event.kind {
            SettingsEventKind::Info => info!(
                target: "solargraph_bridge::lifecycle",
                "{}",
                event.message
            ),
            SettingsEventKind::Warning => warn!(
                target: "solargraph_bridge::lifecycle",
                "{}",
                event.message
            ),
        }
    }
    Configuration::resolve(outcome.settings, workspace_roots)
}

/// Page source that always asks the bridge current at fetch time.
struct CurrentBridge {
    slot: Arc<ArcSwapOption<ProtocolBridge>>,
}

impl PageSource for CurrentBridge {
    fn fetch_page(
        &self,
        uri: &VirtualDocumentUri,
    ) -> impl Future<Output = BridgeResult<String>> + Send {
        let bridge = self.slot.load_full();
        let uri = uri.clone();
        async move {
            match bridge {
                Some(bridge) => bridge.fetch_page(&uri).await,
                None => Err(BridgeError::NotReady),
            }
        }
    }
}

enum Control {
    /// The bridge of `generation` lost its transport.
    Crashed { generation: u64, reason: String },
}

struct Inner<H, C> {
    host: H,
    connector: C,
    config: ArcSwap<Configuration>,
    bridge: Arc<ArcSwapOption<ProtocolBridge>>,
    /// Bumped whenever the published bridge changes.
    generation: AtomicU64,
    restart_lock: tokio::sync::Mutex<()>,
    restart_policy: Mutex<RestartPolicy>,
    cache: ContentCache<CurrentBridge>,
    control_tx: mpsc::UnboundedSender<Control>,
    control_rx: Mutex<Option<mpsc::UnboundedReceiver<Control>>>,
    shutting_down: AtomicBool,
}

/// Owner of the configuration and the current bridge.
pub struct LifecycleController<H, C = SelectorConnector> {
    inner: Arc<Inner<H, C>>,
}

impl<H, C> Clone for LifecycleController<H, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: EditorHost> LifecycleController<H> {
    pub fn new(host: H, config: Configuration) -> Self {
        Self::with_connector(host, config, SelectorConnector)
    }
}

impl<H: EditorHost, C: Connector> LifecycleController<H, C> {
    pub fn with_connector(host: H, config: Configuration, connector: C) -> Self {
        let slot = Arc::new(ArcSwapOption::empty());
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let cache = ContentCache::new(Arc::new(CurrentBridge {
            slot: Arc::clone(&slot),
        }));

        Self {
            inner: Arc::new(Inner {
                host,
                connector,
                config: ArcSwap::from_pointee(config),
                bridge: slot,
                generation: AtomicU64::new(0),
                restart_lock: tokio::sync::Mutex::new(()),
                restart_policy: Mutex::new(RestartPolicy::default()),
                cache,
                control_tx,
                control_rx: Mutex::new(Some(control_rx)),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn host(&self) -> &H {
        &self.inner.host
    }

    /// Snapshot of the live configuration.
    pub fn config(&self) -> Arc<Configuration> {
        self.inner.config.load_full()
    }

    /// State of the current bridge; `Disconnected` when there is none.
    pub fn state(&self) -> BridgeState {
        self.inner
            .bridge
            .load_full()
            .map(|bridge| bridge.state())
            .unwrap_or(BridgeState::Disconnected)
    }

    /// Start the backend and connect to it.
    ///
    /// A missing backend is offered an install; when that succeeds the start
    /// is attempted once more. An outdated backend starts degraded and the
    /// update is offered in the background.
    pub async fn activate(&self) -> BridgeResult<()> {
        self.inner.shutting_down.store(false, Ordering::SeqCst);
        self.spawn_control_loop();
        self.inner.start_or_remediate().await
    }

    /// Replace the running bridge with a fresh one.
    pub async fn restart(&self) -> BridgeResult<()> {
        info!(
            target: "solargraph_bridge::lifecycle",
            "Restarting Solargraph"
        );
        self.inner
            .restart_policy
            .lock()
            .recover_poison("restart_policy")
            .reset();
        self.inner.start_or_remediate().await
    }

    /// Stop the backend. Waits for a start in progress so its process is
    /// stopped as well.
    pub async fn deactivate(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        let _guard = self.inner.restart_lock.lock().await;
        self.inner.stop_current().await;
        self.inner.host.set_status("Solargraph: stopped");
    }

    /// Reload settings (with the editor's `override_settings`) and restart
    /// the bridge when a connection-relevant setting changed.
    pub async fn configuration_changed(&self, override_settings: Option<Value>) -> BridgeResult<()> {
        let roots = self.inner.config.load().workspace_roots.clone();
        let next = Arc::new(load_configuration(roots, override_settings));
        let previous = self.inner.config.swap(Arc::clone(&next));

        if previous.requires_restart(&next) && self.inner.bridge.load().is_some() {
            info!(
                target: "solargraph_bridge::lifecycle",
                "Configuration changed; restarting"
            );
            self.restart().await
        } else {
            Ok(())
        }
    }

    /// Position params with the live workspace and snippet settings.
    pub fn position_params(
        &self,
        text: impl Into<String>,
        line: u32,
        column: u32,
        filename: impl AsRef<Path>,
    ) -> PositionParams {
        let config = self.inner.config.load();
        let workspace = config.workspace_for(filename.as_ref()).map(Path::to_path_buf);
        PositionParams::new(text, line, column, filename)
            .with_workspace(workspace)
            .with_snippets(config.with_snippets)
    }

    pub async fn provide_completion(&self, params: &PositionParams) -> Vec<CompletionItem> {
        let result = match self.current_bridge() {
            Ok(bridge) => bridge.suggest(params).await,
            Err(e) => Err(e),
        };
        settle("completion", result)
    }

    /// Resolve deferred documentation; on failure the item comes back as-is.
    pub async fn resolve_completion_item(&self, item: CompletionItem) -> CompletionItem {
        let Ok(bridge) = self.current_bridge() else {
            return item;
        };
        match bridge.resolve_completion_item(item.clone()).await {
            Ok(resolved) => resolved,
            Err(e) => {
                log_feature_error("completion resolve", &e);
                item
            }
        }
    }

    pub async fn provide_hover(&self, params: &PositionParams) -> Option<Hover> {
        let result = match self.current_bridge() {
            Ok(bridge) => bridge.hover(params).await,
            Err(e) => Err(e),
        };
        settle("hover", result)
    }

    pub async fn provide_signature_help(&self, params: &PositionParams) -> Vec<SignatureInformation> {
        let result = match self.current_bridge() {
            Ok(bridge) => bridge.signature_help(params).await,
            Err(e) => Err(e),
        };
        settle("signature help", result)
    }

    pub async fn provide_definition(&self, params: &PositionParams) -> Vec<DefinitionLocation> {
        let result = match self.current_bridge() {
            Ok(bridge) => bridge.definition(params).await,
            Err(e) => Err(e),
        };
        settle("definition", result)
    }

    /// Open the view for a documentation page and start loading it.
    pub fn open_documentation(&self, uri: &str) -> BridgeResult<()> {
        let page = VirtualDocumentUri::parse(uri)?;
        self.inner.cache.provide(page.canonical())?;
        self.inner.host.open_document(page.canonical(), &page.title());
        Ok(())
    }

    /// Content for a documentation view: cached, or a placeholder while
    /// loading. Subscribe with [`Self::document_changes`] to re-render.
    pub fn provide_document_content(&self, uri: &str) -> BridgeResult<String> {
        self.inner.cache.provide(uri)
    }

    /// Re-fetch an open documentation page.
    pub fn refresh_document(&self, uri: &str) -> bool {
        self.inner.cache.invalidate(uri)
    }

    pub fn document_closed(&self, uri: &str) {
        self.inner.cache.remove(uri);
    }

    /// Canonical URIs of documentation pages whose content changed.
    pub fn document_changes(&self) -> broadcast::Receiver<String> {
        self.inner.cache.subscribe()
    }

    fn current_bridge(&self) -> BridgeResult<Arc<ProtocolBridge>> {
        self.inner.bridge.load_full().ok_or(BridgeError::NotReady)
    }

    fn spawn_control_loop(&self) {
        let receiver = self.inner.control_rx.lock().recover_poison("control_rx").take();
        if let Some(receiver) = receiver {
            tokio::spawn(control_loop(Arc::downgrade(&self.inner), receiver));
        }
    }
}

impl<H: EditorHost, C: Connector> Inner<H, C> {
    /// Start, offering remediation (at most once) for a missing or outdated
    /// backend.
    async fn start_or_remediate(self: &Arc<Self>) -> BridgeResult<()> {
        let mut remediated = false;
        loop {
            let error = match self.start().await {
                Ok(bridge) => {
                    if bridge.state() == BridgeState::Degraded && !remediated {
                        self.spawn_update_offer(&bridge);
                    }
                    return Ok(());
                }
                Err(error) => error,
            };

            if matches!(error, BridgeError::Cancelled { .. }) {
                return Err(error);
            }
            if !remediated && let Some(remediation) = Remediation::for_error(&error) {
                let config = self.config.load_full();
                let message = match remediation {
                    Remediation::Install => format!(
                        "Solargraph gem not found. Run `{}` or update your settings. ({})",
                        remediation.command(&config).join(" "),
                        error
                    ),
                    Remediation::Update => format!(
                        "Solargraph gem is out of date. Run `{}` or update your settings. ({})",
                        remediation.command(&config).join(" "),
                        error
                    ),
                };
                if remediation::offer(&self.host, &config, remediation, &message).await {
                    remediated = true;
                    continue;
                }
                return Err(error);
            }

            error!(
                target: "solargraph_bridge::lifecycle",
                "Failed to start Solargraph: {}",
                error
            );
            self.host
                .show_message(
                    MessageKind::Error,
                    &format!("Failed to start Solargraph: {}", error),
                    &[],
                )
                .await;
            return Err(error);
        }
    }

    /// Shut down the current bridge (if any) and publish a new one.
    async fn start(self: &Arc<Self>) -> BridgeResult<Arc<ProtocolBridge>> {
        let _guard = self.restart_lock.lock().await;
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(BridgeError::cancelled("shutting down"));
        }
        self.stop_current().await;

        let config = self.config.load_full();
        self.host.set_status("Solargraph: starting");
        let (bridge, events) = match self.connect(Arc::clone(&config)).await {
            Ok(started) => started,
            Err(e) => {
                self.host.set_status("Solargraph: failed");
                return Err(e);
            }
        };

        let bridge = Arc::new(bridge);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.bridge.store(Some(Arc::clone(&bridge)));
        tokio::spawn(watch_events(
            Arc::clone(self),
            Arc::clone(&bridge),
            generation,
            events,
        ));

        info!(
            target: "solargraph_bridge::lifecycle",
            "Solargraph {} is {} (pid {:?}, port {:?})",
            bridge.server_version().unwrap_or("(unknown version)"),
            bridge.state().as_str(),
            bridge.pid(),
            bridge.port()
        );
        self.host.set_status(match bridge.state() {
            BridgeState::Degraded => "Solargraph: update available",
            _ => "Solargraph: ready",
        });

        if config.check_gem_version
            && let Err(e) = bridge.check_gem_version(false).await
        {
            warn!(
                target: "solargraph_bridge::lifecycle",
                "Gem version check failed: {}",
                e
            );
        }
        self.cache.invalidate_all();
        Ok(bridge)
    }

    async fn connect(&self, config: Arc<Configuration>) -> BridgeResult<(ProtocolBridge, BridgeEvents)> {
        let transport = self.connector.connect(Arc::clone(&config), &self.host).await?;
        ProtocolBridge::start(config, transport).await
    }

    /// Unpublish and shut down the current bridge. Callers hold the restart lock.
    async fn stop_current(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(previous) = self.bridge.swap(None) {
            debug!(
                target: "solargraph_bridge::lifecycle",
                "Shutting down previous bridge ({} pending)",
                previous.pending_count()
            );
            previous.shutdown().await;
        }
    }

    /// Offer an update for the degraded `bridge` without blocking the caller.
    /// A successful update restarts the bridge unless it was replaced meanwhile.
    fn spawn_update_offer(self: &Arc<Self>, bridge: &ProtocolBridge) {
        let generation = self.generation.load(Ordering::SeqCst);
        let message = format!(
            "Solargraph {} is older than {}. Some features may not work.",
            bridge.server_version().unwrap_or("(unknown version)"),
            MINIMUM_BACKEND_VERSION
        );
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let config = inner.config.load_full();
            if !remediation::offer(&inner.host, &config, Remediation::Update, &message).await {
                return;
            }
            if inner.shutting_down.load(Ordering::SeqCst)
                || inner.generation.load(Ordering::SeqCst) != generation
            {
                debug!(
                    target: "solargraph_bridge::lifecycle",
                    "Bridge replaced during the update; not restarting"
                );
                return;
            }
            if let Err(e) = inner.start().await {
                error!(
                    target: "solargraph_bridge::lifecycle",
                    "Restart after update failed: {}",
                    e
                );
                inner
                    .host
                    .show_message(
                        MessageKind::Error,
                        &format!("Failed to restart Solargraph after the update: {}", e),
                        &[],
                    )
                    .await;
            }
        });
    }

    /// React to the transport loss of the bridge published as `generation`.
    async fn recover(self: &Arc<Self>, generation: u64, reason: &str) {
        if self.shutting_down.load(Ordering::SeqCst) || self.generation.load(Ordering::SeqCst) != generation {
            debug!(
                target: "solargraph_bridge::lifecycle",
                "Ignoring disconnect of replaced bridge: {}",
                reason
            );
            return;
        }

        let config = self.config.load_full();
        let allowed = config.auto_restart
            && self
                .restart_policy
                .lock()
                .recover_poison("restart_policy")
                .try_record(Instant::now());
        if allowed {
            warn!(
                target: "solargraph_bridge::lifecycle",
                "Solargraph disconnected ({}); restarting",
                reason
            );
            let _ = self.start_or_remediate().await;
            return;
        }

        {
            let _guard = self.restart_lock.lock().await;
            if self.generation.load(Ordering::SeqCst) == generation {
                self.stop_current().await;
            }
        }
        self.host.set_status("Solargraph: stopped");

        let message = if config.auto_restart {
            format!(
                "Solargraph stopped {} times in {} minutes and will not be restarted automatically: {}",
                MAX_RESTARTS,
                RESTART_WINDOW.as_secs() / 60,
                reason
            )
        } else {
            format!("Solargraph disconnected: {}", reason)
        };
        error!(target: "solargraph_bridge::lifecycle", "{}", message);

        let restart = RESTART_ACTION.to_string();
        let choice = self
            .host
            .show_message(MessageKind::Error, &message, std::slice::from_ref(&restart))
            .await;
        if choice.as_deref() == Some(RESTART_ACTION) {
            self.restart_policy.lock().recover_poison("restart_policy").reset();
            let _ = self.start_or_remediate().await;
        }
    }

    fn handle_notification(self: &Arc<Self>, method: &str, params: &Value) {
        match method {
            "window/showMessage" => {
                let kind = message_kind(params);
                let message = params
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let inner = Arc::clone(self);
                tokio::spawn(async move {
                    inner.host.show_message(kind, &message, &[]).await;
                });
            }
            "window/logMessage" => {
                let message = params.get("message").and_then(Value::as_str).unwrap_or_default();
                match params.get("type").and_then(Value::as_i64) {
                    Some(1) => error!(target: "solargraph_bridge::backend", "{}", message),
                    Some(2) => warn!(target: "solargraph_bridge::backend", "{}", message),
                    Some(3) => info!(target: "solargraph_bridge::backend", "{}", message),
                    _ => debug!(target: "solargraph_bridge::backend", "{}", message),
                }
            }
            _ => debug!(
                target: "solargraph_bridge::lifecycle",
                "Ignoring notification {}",
                method
            ),
        }
    }

    fn handle_server_request(self: &Arc<Self>, bridge: &Arc<ProtocolBridge>, id: Value, method: &str, params: Value) {
        let inner = Arc::clone(self);
        let bridge = Arc::clone(bridge);
        let method = method.to_string();

        tokio::spawn(async move {
            let sent = if method == "window/showMessageRequest" {
                let kind = message_kind(&params);
                let message = params.get("message").and_then(Value::as_str).unwrap_or_default();
                let actions: Vec<String> = params
                    .get("actions")
                    .and_then(Value::as_array)
                    .map(|actions| {
                        actions
                            .iter()
                            .filter_map(|action| action.get("title").and_then(Value::as_str))
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();

                let choice = inner.host.show_message(kind, message, &actions).await;
                let result = choice
                    .filter(|title| actions.contains(title))
                    .map(|title| json!({ "title": title }))
                    .unwrap_or(Value::Null);
                bridge.respond(id, result).await
            } else {
                debug!(
                    target: "solargraph_bridge::lifecycle",
                    "Rejecting unsupported server request {}",
                    method
                );
                bridge
                    .respond_error(id, ErrorCodes::METHOD_NOT_FOUND, &format!("Unhandled method {}", method))
                    .await
            };
            if let Err(e) = sent {
                warn!(
                    target: "solargraph_bridge::lifecycle",
                    "Failed to answer {}: {}",
                    method,
                    e
                );
            }
        });
    }
}

/// Forward one bridge's events until its transport is gone.
async fn watch_events<H: EditorHost, C: Connector>(
    inner: Arc<Inner<H, C>>,
    bridge: Arc<ProtocolBridge>,
    generation: u64,
    mut events: BridgeEvents,
) {
    while let Some(event) = events.recv().await {
        match event {
            BridgeEvent::Notification { method, params } => inner.handle_notification(&method, &params),
            BridgeEvent::ServerRequest { id, method, params } => {
                inner.handle_server_request(&bridge, id, &method, params)
            }
            BridgeEvent::Disconnected { reason } => {
                if inner.generation.load(Ordering::SeqCst) == generation {
                    let _ = inner.control_tx.send(Control::Crashed { generation, reason });
                }
                break;
            }
        }
    }
}

/// Serialize crash recovery. Ends once the controller is dropped.
async fn control_loop<H: EditorHost, C: Connector>(
    inner: Weak<Inner<H, C>>,
    mut receiver: mpsc::UnboundedReceiver<Control>,
) {
    while let Some(control) = receiver.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match control {
            Control::Crashed { generation, reason } => inner.recover(generation, &reason).await,
        }
    }
}

fn message_kind(params: &Value) -> MessageKind {
    match params.get("type").and_then(Value::as_i64) {
        Some(1) => MessageKind::Error,
        Some(2) => MessageKind::Warning,
        _ => MessageKind::Info,
    }
}

/// Unwrap a feature result; failures degrade to an empty answer.
fn settle<T: Default>(feature: &str, result: BridgeResult<T>) -> T {
    result.unwrap_or_else(|e| {
        log_feature_error(feature, &e);
        T::default()
    })
}

fn log_feature_error(feature: &str, error: &BridgeError) {
    match error {
        BridgeError::NotReady | BridgeError::Cancelled { .. } => debug!(
            target: "solargraph_bridge::lifecycle",
            "{} skipped: {}",
            feature,
            error
        ),
        _ => warn!(
            target: "solargraph_bridge::lifecycle",
            "{} failed: {}",
            feature,
            error
        ),
    }
}
