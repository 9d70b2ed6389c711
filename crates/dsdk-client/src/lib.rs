// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! [`Client`] and its options (C6, spec §4.6).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use dsdk_core::{Event, Mode};
use dsdk_error::DsdkError;
use dsdk_event::{EventSender, EventSenderConfig};
use dsdk_function::FunctionDefinition;
use dsdk_middleware::{MiddlewareFactory, MiddlewareStack, SendEventOutcome};

/// Default cloud API base URL (spec §4.6).
pub const DEFAULT_CLOUD_API_URL: &str = "https://api.inngest.com/";
/// Default cloud event base URL (spec §4.6).
pub const DEFAULT_CLOUD_EVENT_URL: &str = "https://inn.gs/";
/// Default dev-server URL used when dev mode is active and no explicit dev
/// URL was supplied by `isDev`, `INNGEST_DEV`, or any higher-precedence URL
/// option/env var. Not named anywhere in the spec text; this is the
/// well-known local dev server address, chosen the same way
/// `abp-config`'s defaults are chosen — a concrete constant a reader can
/// override, not a magic unset state.
pub const DEFAULT_DEV_URL: &str = "http://127.0.0.1:8288";

/// Options accepted by [`Client::new`], mirroring `createClient`'s options
/// object (spec §4.6).
#[derive(Default)]
pub struct ClientOptions {
    /// App id, reported in introspection.
    pub id: String,
    /// Display name.
    pub name: Option<String>,
    /// Auth used when sending events.
    pub event_key: Option<String>,
    /// Auth used to verify requests from the server.
    pub signing_key: Option<String>,
    /// Fallback signing key, used during key rotation.
    pub signing_key_fallback: Option<String>,
    /// Overrides both `api_base_url` and `event_api_base_url`.
    pub base_url: Option<String>,
    /// Overrides the API base URL alone.
    pub api_base_url: Option<String>,
    /// Overrides the event base URL alone.
    pub event_api_base_url: Option<String>,
    /// Branch/preview environment name, sent as `x-inngest-env`.
    pub env: Option<String>,
    /// Environment variables consulted during mode/URL resolution. A real
    /// process would seed this from `std::env::vars()`; tests and
    /// embedders can supply their own map instead.
    pub env_vars: HashMap<String, String>,
    /// Forces dev mode when `Some(true)`/`Some(false)`, or leaves mode
    /// inference to `env_vars`/credentials when `None`.
    pub is_dev: Option<bool>,
    /// Opts into checkpointing (spec §4.4.2); consulted by `dsdk-comm`.
    pub checkpointing: bool,
    /// Client-level middleware factories, instantiated fresh per request.
    pub middleware: Vec<Arc<dyn MiddlewareFactory>>,
    /// Injected HTTP client; falls back to a fresh `reqwest::Client` when absent.
    pub http: Option<reqwest::Client>,
}

impl ClientOptions {
    /// Start an options value with just the required app id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// Resolved mode and base URLs, recomputed whenever the env map or event
/// key changes (spec §4.6 `setEnvVars`).
struct ResolvedState {
    event_key: Option<String>,
    env_vars: HashMap<String, String>,
    mode: Mode,
    api_base_url: String,
    event_base_url: String,
}

/// The process-wide client (C6): configuration, resolved mode/URLs, the
/// function registry, and `send(...)`.
///
/// Mutable only through [`Client::set_event_key`] and
/// [`Client::set_env_vars`] after construction (spec §5) — everything else
/// is fixed at [`Client::new`].
pub struct Client {
    id: String,
    name: Option<String>,
    signing_key: Option<String>,
    signing_key_fallback: Option<String>,
    base_url_option: Option<String>,
    api_base_url_option: Option<String>,
    event_api_base_url_option: Option<String>,
    is_dev_option: Option<bool>,
    checkpointing: bool,
    middleware: Vec<Arc<dyn MiddlewareFactory>>,
    http: reqwest::Client,
    state: RwLock<ResolvedState>,
    functions: RwLock<HashMap<String, Arc<FunctionDefinition>>>,
}

impl Client {
    /// Construct a client, resolving its initial mode and base URLs from
    /// `options.env_vars` and its credentials.
    #[must_use]
    pub fn new(options: ClientOptions) -> Self {
        let has_signing_key = options.signing_key.is_some();
        let mode = resolve_mode(options.is_dev, &options.env_vars, has_signing_key);
        let (api_base_url, event_base_url) = resolve_urls(
            options.base_url.as_deref(),
            options.api_base_url.as_deref(),
            options.event_api_base_url.as_deref(),
            &options.env_vars,
            &mode,
        );

        Self {
            id: options.id,
            name: options.name,
            signing_key: options.signing_key,
            signing_key_fallback: options.signing_key_fallback,
            base_url_option: options.base_url,
            api_base_url_option: options.api_base_url,
            event_api_base_url_option: options.event_api_base_url,
            is_dev_option: options.is_dev,
            checkpointing: options.checkpointing,
            middleware: options.middleware,
            http: options.http.unwrap_or_default(),
            state: RwLock::new(ResolvedState {
                event_key: options.event_key,
                env_vars: options.env_vars,
                mode,
                api_base_url,
                event_base_url,
            }),
            functions: RwLock::new(HashMap::new()),
        }
    }

    /// App id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name, if configured.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Current resolved operating mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.state.read().expect("client state lock poisoned").mode.clone()
    }

    /// Current resolved API base URL (used by `dsdk-comm` for sync/register).
    #[must_use]
    pub fn api_base_url(&self) -> String {
        self.state.read().expect("client state lock poisoned").api_base_url.clone()
    }

    /// Current resolved event base URL.
    #[must_use]
    pub fn event_base_url(&self) -> String {
        self.state.read().expect("client state lock poisoned").event_base_url.clone()
    }

    /// Signing key used to verify requests from the server.
    #[must_use]
    pub fn signing_key(&self) -> Option<&str> {
        self.signing_key.as_deref()
    }

    /// Fallback signing key, tried when the primary key fails verification.
    #[must_use]
    pub fn signing_key_fallback(&self) -> Option<&str> {
        self.signing_key_fallback.as_deref()
    }

    /// `true` if this client opted into checkpointing (spec §4.4.2).
    #[must_use]
    pub fn checkpointing(&self) -> bool {
        self.checkpointing
    }

    /// Event key currently configured (construction-time option or the
    /// most recent [`Client::set_event_key`]), if any. Exposed so
    /// `dsdk-comm` can build a `step.sendEvent` dispatcher that resolves
    /// auth the same way `Client::send` does.
    #[must_use]
    pub fn event_key(&self) -> Option<String> {
        self.state.read().expect("client state lock poisoned").event_key.clone()
    }

    /// Environment name this client reports as `x-inngest-env` (spec §4.8
    /// step 2c), if any is configured.
    #[must_use]
    pub fn environment(&self) -> Option<String> {
        let state = self.state.read().expect("client state lock poisoned");
        self.resolve_environment(&state)
    }

    /// Client-level middleware factories, in registration order. Consumed
    /// by `dsdk-comm` when it assembles a per-request [`MiddlewareStack`]
    /// together with the target function's own factories.
    #[must_use]
    pub fn middleware_factories(&self) -> &[Arc<dyn MiddlewareFactory>] {
        &self.middleware
    }

    /// Replace the event key and re-run nothing else — the event key does
    /// not affect mode or URL resolution (spec §4.6 "recognized options").
    pub fn set_event_key(&self, event_key: impl Into<String>) {
        self.state.write().expect("client state lock poisoned").event_key = Some(event_key.into());
    }

    /// Apply a fresh environment map and re-run mode/URL resolution (spec
    /// §4.6 `setEnvVars`).
    pub fn set_env_vars(&self, env_vars: HashMap<String, String>) {
        let has_signing_key = self.signing_key.is_some();
        let mode = resolve_mode(self.is_dev_option, &env_vars, has_signing_key);
        let (api_base_url, event_base_url) = resolve_urls(
            self.base_url_option.as_deref(),
            self.api_base_url_option.as_deref(),
            self.event_api_base_url_option.as_deref(),
            &env_vars,
            &mode,
        );

        let mut state = self.state.write().expect("client state lock poisoned");
        state.env_vars = env_vars;
        state.mode = mode;
        state.api_base_url = api_base_url;
        state.event_base_url = event_base_url;
    }

    /// Register a function built by [`dsdk_function::FunctionBuilder`],
    /// returning the shared definition `dsdk-comm` looks up by id.
    ///
    /// # Panics
    ///
    /// Panics if a function with the same id is already registered —
    /// mirroring `createFunction`'s fixed, compile/startup-time registry,
    /// which never silently overwrites an existing id.
    pub fn register_function(&self, def: FunctionDefinition) -> Arc<FunctionDefinition> {
        let def = Arc::new(def);
        let mut functions = self.functions.write().expect("function registry lock poisoned");
        let id = def.id().to_string();
        if functions.insert(id.clone(), def.clone()).is_some() {
            drop(functions);
            panic!("function '{id}' is already registered");
        }
        def
    }

    /// Look up a registered function by id (used by `dsdk-comm`'s POST dispatch).
    #[must_use]
    pub fn function(&self, id: &str) -> Option<Arc<FunctionDefinition>> {
        self.functions.read().expect("function registry lock poisoned").get(id).cloned()
    }

    /// All registered functions, for introspection (`dsdk-comm`'s GET).
    #[must_use]
    pub fn functions(&self) -> Vec<Arc<FunctionDefinition>> {
        self.functions.read().expect("function registry lock poisoned").values().cloned().collect()
    }

    /// Send a batch of events using the client's configured environment.
    ///
    /// # Errors
    ///
    /// See [`dsdk_event::EventSender::send`].
    pub async fn send(&self, events: Vec<Event>) -> Result<SendEventOutcome, DsdkError> {
        self.event_sender().send(events).await
    }

    /// Build a fresh [`EventSender`] snapshotting the client's current
    /// resolved state and instantiating the client's middleware factories
    /// anew, as `wrapSendEvent` layers must be (spec §4.5: "Instances are
    /// constructed fresh per request").
    fn event_sender(&self) -> EventSender {
        let state = self.state.read().expect("client state lock poisoned");
        let layers = self.middleware.iter().map(|factory| factory.create()).collect();
        let config = EventSenderConfig {
            event_base: state.event_base_url.clone(),
            event_key: state.event_key.clone(),
            environment: self.resolve_environment(&state),
            mode: state.mode.clone(),
        };
        EventSender::new(self.http.clone(), config, Arc::new(MiddlewareStack::new(layers, vec![])))
    }

    /// Environment header precedence below the explicit-send-option tier
    /// (spec §4.8 step 2c): client option > env var > platform env. The
    /// latter two collapse to the single `env_vars` map this client was
    /// constructed or last `set_env_vars`-ed with.
    fn resolve_environment(&self, state: &ResolvedState) -> Option<String> {
        state.env_vars.get("INNGEST_ENV").cloned().or_else(|| state.env_vars.get("env").cloned())
    }
}

/// Resolve operating mode (spec §4.6 "Mode resolution").
fn resolve_mode(is_dev_option: Option<bool>, env_vars: &HashMap<String, String>, has_signing_key: bool) -> Mode {
    if let Some(explicit) = is_dev_option {
        return if explicit { Mode::dev(None) } else { Mode::cloud() };
    }

    if let Some(value) = env_vars.get("INNGEST_DEV") {
        let lower = value.to_ascii_lowercase();
        if lower == "0" || lower == "false" {
            return Mode::cloud();
        }
        if value.starts_with("http://") || value.starts_with("https://") {
            return Mode::dev(Some(value.clone()));
        }
        return Mode::dev(None);
    }

    // "platform env key" is this crate's only platform-supplied signing
    // credential: INNGEST_SIGNING_KEY. No signing key anywhere means no
    // way to authenticate as cloud, so dev is inferred.
    if !has_signing_key && !env_vars.contains_key("INNGEST_SIGNING_KEY") {
        return Mode::inferred_dev();
    }

    Mode::cloud()
}

/// Resolve the API and event base URLs (spec §4.6 "URL resolution").
fn resolve_urls(
    base_url: Option<&str>,
    api_base_url: Option<&str>,
    event_api_base_url: Option<&str>,
    env_vars: &HashMap<String, String>,
    mode: &Mode,
) -> (String, String) {
    let dev_fallback = || mode.explicit_dev_url.clone().unwrap_or_else(|| DEFAULT_DEV_URL.to_string());

    let api = api_base_url
        .map(str::to_string)
        .or_else(|| base_url.map(str::to_string))
        .or_else(|| env_vars.get("INNGEST_API_BASE_URL").cloned())
        .or_else(|| env_vars.get("INNGEST_BASE_URL").cloned())
        .or_else(|| mode.is_dev.then(dev_fallback))
        .unwrap_or_else(|| DEFAULT_CLOUD_API_URL.to_string());

    let event = event_api_base_url
        .map(str::to_string)
        .or_else(|| base_url.map(str::to_string))
        .or_else(|| env_vars.get("INNGEST_EVENT_API_BASE_URL").cloned())
        .or_else(|| env_vars.get("INNGEST_BASE_URL").cloned())
        .or_else(|| mode.is_dev.then(dev_fallback))
        .unwrap_or_else(|| DEFAULT_CLOUD_EVENT_URL.to_string());

    (api, event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_cloud_mode_with_signing_key() {
        let client = Client::new(ClientOptions {
            signing_key: Some("signkey-prod-abc".into()),
            ..ClientOptions::new("app-a")
        });
        assert!(!client.mode().is_dev);
        assert_eq!(client.api_base_url(), DEFAULT_CLOUD_API_URL);
        assert_eq!(client.event_base_url(), DEFAULT_CLOUD_EVENT_URL);
    }

    #[test]
    fn infers_dev_mode_with_no_credentials() {
        let client = Client::new(ClientOptions::new("app-a"));
        assert!(client.mode().is_dev);
        assert!(!client.mode().is_explicit);
        assert_eq!(client.api_base_url(), DEFAULT_DEV_URL);
    }

    #[test]
    fn explicit_is_dev_false_forces_cloud_even_with_no_key() {
        let client = Client::new(ClientOptions {
            is_dev: Some(false),
            ..ClientOptions::new("app-a")
        });
        assert!(!client.mode().is_dev);
        assert_eq!(client.api_base_url(), DEFAULT_CLOUD_API_URL);
    }

    #[test]
    fn inngest_dev_env_var_as_url_sets_explicit_dev_url() {
        let mut env_vars = HashMap::new();
        env_vars.insert("INNGEST_DEV".to_string(), "http://localhost:9999".to_string());
        let client = Client::new(ClientOptions {
            env_vars,
            ..ClientOptions::new("app-a")
        });
        assert!(client.mode().is_dev);
        assert_eq!(client.api_base_url(), "http://localhost:9999");
        assert_eq!(client.event_base_url(), "http://localhost:9999");
    }

    #[test]
    fn inngest_dev_env_var_false_forces_cloud() {
        let mut env_vars = HashMap::new();
        env_vars.insert("INNGEST_DEV".to_string(), "false".to_string());
        let client = Client::new(ClientOptions {
            env_vars,
            ..ClientOptions::new("app-a")
        });
        assert!(!client.mode().is_dev);
    }

    #[test]
    fn base_url_option_overrides_both_urls() {
        let client = Client::new(ClientOptions {
            base_url: Some("https://proxy.example.com".into()),
            signing_key: Some("signkey-prod-abc".into()),
            ..ClientOptions::new("app-a")
        });
        assert_eq!(client.api_base_url(), "https://proxy.example.com");
        assert_eq!(client.event_base_url(), "https://proxy.example.com");
    }

    #[test]
    fn specific_url_options_beat_base_url_for_their_own_tier() {
        let client = Client::new(ClientOptions {
            api_base_url: Some("https://api.example.com".into()),
            signing_key: Some("signkey-prod-abc".into()),
            ..ClientOptions::new("app-a")
        });
        assert_eq!(client.api_base_url(), "https://api.example.com");
        assert_eq!(client.event_base_url(), DEFAULT_CLOUD_EVENT_URL);
    }

    #[test]
    fn set_env_vars_recomputes_mode_and_urls() {
        let client = Client::new(ClientOptions {
            signing_key: Some("signkey-prod-abc".into()),
            ..ClientOptions::new("app-a")
        });
        assert!(!client.mode().is_dev);

        let mut env_vars = HashMap::new();
        env_vars.insert("INNGEST_DEV".to_string(), "1".to_string());
        client.set_env_vars(env_vars);
        assert!(client.mode().is_dev);
        assert_eq!(client.api_base_url(), DEFAULT_DEV_URL);
    }

    #[test]
    fn set_event_key_does_not_disturb_resolved_urls() {
        let client = Client::new(ClientOptions {
            signing_key: Some("signkey-prod-abc".into()),
            ..ClientOptions::new("app-a")
        });
        let before = client.api_base_url();
        client.set_event_key("evtkey-123");
        assert_eq!(client.api_base_url(), before);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn registering_duplicate_function_id_panics() {
        let client = Client::new(ClientOptions::new("app-a"));
        let handler: dsdk_engine::Handler = Arc::new(|_ctx| Box::pin(async { Ok(serde_json::json!(null)) }));
        let def_a = dsdk_function::FunctionBuilder::new("fn-a", dsdk_core::FunctionTrigger::event("a"))
            .build(handler.clone())
            .unwrap();
        let def_b = dsdk_function::FunctionBuilder::new("fn-a", dsdk_core::FunctionTrigger::event("b"))
            .build(handler)
            .unwrap();
        client.register_function(def_a);
        client.register_function(def_b);
    }
}
