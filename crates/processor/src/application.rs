//! Application lifecycle governor
//!
//! The [`Application`] is the explicitly constructed top-level context of a
//! pump process. It owns the event bus, the stop signal, the service registry,
//! the module list and the metrics registry, and drives three sequential
//! phases:
//!
//! 1. `initialize()` installs signal handling, initializes modules and
//!    publishes `init`.
//! 2. `run()` publishes `run`, then publishes `tick` every `tick_period`
//!    until the stop signal fires. Afterwards it runs the exit phase:
//!    publishes `exit`, finalizes modules and returns the exit status.
//! 3. `stop()` (or SIGINT/SIGTERM) sets the stop signal.
//!
//! # Example
//!
//! ```rust,no_run
//! use eventpump::application::Application;
//! use eventpump_config::PumpConfig;
//!
//! # async fn example() -> eventpump::error::Result<()> {
//! let app = Application::new(PumpConfig::default());
//! app.initialize().await?;
//!
//! app.bus().subscribe_fn("tick", |_topic, payload| async move {
//!     tracing::info!(%payload, "tick");
//!     Ok(())
//! });
//!
//! let status = app.run().await?;
//! std::process::exit(status.code());
//! # }
//! ```

use crate::bus::{topics, PubSub};
use crate::error::{PumpError, Result};
use crate::metrics::MetricsRegistry;
use async_trait::async_trait;
use eventpump_config::PumpConfig;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Phases of the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Created,
    Initialized,
    Running,
    Exiting,
    Terminated,
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AppState::Created => "created",
            AppState::Initialized => "initialized",
            AppState::Running => "running",
            AppState::Exiting => "exiting",
            AppState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Process exit status returned by [`Application::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus(i32);

impl ExitStatus {
    pub const SUCCESS: ExitStatus = ExitStatus(0);
    pub const FAILURE: ExitStatus = ExitStatus(1);

    pub fn code(&self) -> i32 {
        self.0
    }

    pub fn is_success(&self) -> bool {
        self.0 == 0
    }
}

/// Idempotent, broadcast stop condition
///
/// Once set it stays set; every clone observes the same flag.
#[derive(Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Set the signal; returns false if it was already set
    pub fn stop(&self) -> bool {
        self.tx.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        })
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal is set (immediately if it already is)
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Clear the flag at the start of the run phase
    fn reset(&self) {
        self.tx.send_replace(false);
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopSignal")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// A unit of functionality loaded into the application
///
/// Modules typically register services in their constructor and use the
/// hooks to acquire and release resources.
#[async_trait]
pub trait Module: Send + Sync {
    /// Module name, used for logging
    fn name(&self) -> &str;

    /// Called during the init phase, before `init` is published
    async fn initialize(&self, _app: &Application) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called during the exit phase, after `exit` is published
    async fn finalize(&self, _app: &Application) -> anyhow::Result<()> {
        Ok(())
    }
}

type ServiceMap = HashMap<String, Arc<dyn Any + Send + Sync>>;

/// Builder for [`Application`]
pub struct ApplicationBuilder {
    config: PumpConfig,
    handle_signals: bool,
}

impl ApplicationBuilder {
    /// Install SIGINT/SIGTERM handlers during `initialize()` (default: true)
    pub fn handle_signals(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    pub fn build(self) -> Arc<Application> {
        Arc::new(Application {
            config: self.config,
            handle_signals: self.handle_signals,
            bus: Arc::new(PubSub::new()),
            stop: StopSignal::new(),
            state: Mutex::new(AppState::Created),
            services: RwLock::new(HashMap::new()),
            modules: Mutex::new(Vec::new()),
            metrics: MetricsRegistry::new(),
            ticks: AtomicU64::new(0),
        })
    }
}

/// The application governor
pub struct Application {
    config: PumpConfig,
    handle_signals: bool,
    bus: Arc<PubSub>,
    stop: StopSignal,
    state: Mutex<AppState>,
    services: RwLock<ServiceMap>,
    modules: Mutex<Vec<Arc<dyn Module>>>,
    metrics: MetricsRegistry,
    ticks: AtomicU64,
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("state", &self.state())
            .field("services", &self.service_names())
            .field("modules", &self.module_names())
            .finish()
    }
}

impl Application {
    /// Create an application with signal handling enabled
    pub fn new(config: PumpConfig) -> Arc<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: PumpConfig) -> ApplicationBuilder {
        ApplicationBuilder {
            config,
            handle_signals: true,
        }
    }

    pub fn config(&self) -> &PumpConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<PubSub> {
        &self.bus
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// A clone of the process-wide stop signal
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn state(&self) -> AppState {
        *self.state.lock()
    }

    /// Number of ticks published so far
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Request shutdown; calling it again is a no-op
    pub fn stop(&self) {
        if self.stop.stop() {
            info!("Stop requested");
        }
    }

    // Modules

    /// Load a module; its `initialize` hook runs in the init phase
    pub fn add_module<M: Module + 'static>(&self, module: M) {
        let module: Arc<dyn Module> = Arc::new(module);
        if self.state() != AppState::Created {
            warn!(module = %module.name(), "Module added after the init phase; initialize hook will not run");
        }
        self.modules.lock().push(module);
    }

    pub fn module_names(&self) -> Vec<String> {
        self.modules
            .lock()
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    // Services

    /// Register a service under a unique name
    pub fn register_service<S>(&self, name: &str, service: Arc<S>) -> Result<()>
    where
        S: Any + Send + Sync,
    {
        let mut services = self.services.write();
        if services.contains_key(name) {
            error!(service = %name, "Service already registered");
            return Err(PumpError::DuplicateRegistration {
                kind: "service",
                name: name.to_string(),
            });
        }

        services.insert(name.to_string(), service);
        debug!(service = %name, "Service registered");
        Ok(())
    }

    /// Look up a service by name and type
    pub fn get_service<S>(&self, name: &str) -> Result<Arc<S>>
    where
        S: Any + Send + Sync,
    {
        let service = self.services.read().get(name).cloned().ok_or_else(|| {
            error!(service = %name, "Cannot find service - not registered?");
            PumpError::NotFound {
                kind: "service",
                name: name.to_string(),
            }
        })?;

        service.downcast::<S>().map_err(|_| PumpError::TypeMismatch {
            kind: "service",
            name: name.to_string(),
            expected: type_name::<S>(),
        })
    }

    pub fn service_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.read().keys().cloned().collect();
        names.sort();
        names
    }

    // Governors

    /// Run the init phase
    pub async fn initialize(&self) -> Result<()> {
        self.expect_state(AppState::Created, "created")?;
        info!("Initializing ...");

        if self.handle_signals {
            self.install_signal_handlers();
        }

        for module in self.modules_snapshot() {
            debug!(module = %module.name(), "Initializing module");
            module
                .initialize(self)
                .await
                .map_err(|source| PumpError::Lifecycle {
                    topic: topics::INIT.to_string(),
                    source,
                })?;
        }

        self.bus.publish(topics::INIT, Value::Null).await?;
        self.set_state(AppState::Initialized);
        Ok(())
    }

    /// Run the run phase until stopped, then the exit phase
    pub async fn run(&self) -> Result<ExitStatus> {
        self.expect_state(AppState::Initialized, "initialized")?;
        self.set_state(AppState::Running);
        info!("Running ...");

        self.stop.reset();
        let run_result = self.run_time_governor().await;

        self.set_state(AppState::Exiting);
        info!("Exiting ...");
        let exit_result = self.exit_time_governor().await;
        self.set_state(AppState::Terminated);

        match (run_result, exit_result) {
            (Err(e), exit) => {
                if let Err(exit_err) = exit {
                    error!(error = %exit_err, "Exit phase failed after run phase failure");
                }
                Err(e)
            }
            (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => Ok(ExitStatus::SUCCESS),
        }
    }

    async fn run_time_governor(&self) -> Result<()> {
        self.bus.publish(topics::RUN, Value::Null).await?;

        let period = self.config.general().tick_period;
        loop {
            match tokio::time::timeout(period, self.stop.wait()).await {
                Ok(()) => break,
                Err(_elapsed) => self.tick().await,
            }
        }

        debug!(ticks = self.tick_count(), "Run phase finished");
        Ok(())
    }

    async fn tick(&self) {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let payload = json!({ "tick": tick });

        let mut due = vec![topics::TICK];
        if tick % 10 == 0 {
            due.push(topics::TICK_10);
        }
        if tick % 60 == 0 {
            due.push(topics::TICK_60);
        }

        for topic in due {
            // Non-lifecycle failures are logged by the bus and never abort the loop
            if let Err(e) = self.bus.publish(topic, payload.clone()).await {
                error!(topic = %topic, error = %e, "Tick publish failed");
            }
        }
    }

    async fn exit_time_governor(&self) -> Result<()> {
        let published = self.bus.publish(topics::EXIT, Value::Null).await;

        for module in self.modules_snapshot() {
            if let Err(e) = module.finalize(self).await {
                error!(module = %module.name(), error = %e, "Module finalization failed");
            }
        }

        published.map(|_| ())
    }

    fn install_signal_handlers(&self) {
        let stop = self.stop.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    wait_for_termination().await;
                    info!("Termination signal received");
                    stop.stop();
                });
            }
            Err(e) => warn!(error = %e, "No async runtime, signal handling disabled"),
        }
    }

    fn modules_snapshot(&self) -> Vec<Arc<dyn Module>> {
        self.modules.lock().clone()
    }

    fn expect_state(&self, expected: AppState, name: &'static str) -> Result<()> {
        let actual = self.state();
        if actual != expected {
            return Err(PumpError::InvalidState {
                expected: name,
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    fn set_state(&self, state: AppState) {
        debug!(%state, "Application state changed");
        *self.state.lock() = state;
    }
}

/// Resolves on SIGINT or SIGTERM; never resolves if no handler can be installed
async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "SIGINT handler unavailable");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn test_app(tick_period: &str) -> Arc<Application> {
        let config = PumpConfig::from_yaml_str(&format!(
            "general:\n  tick_period: {}\n",
            tick_period
        ))
        .unwrap();
        Application::builder(config).handle_signals(false).build()
    }

    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Module for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        async fn initialize(&self, _app: &Application) -> anyhow::Result<()> {
            self.log.lock().push(format!("{}:initialize", self.name));
            Ok(())
        }

        async fn finalize(&self, _app: &Application) -> anyhow::Result<()> {
            self.log.lock().push(format!("{}:finalize", self.name));
            Ok(())
        }
    }

    #[test]
    fn test_stop_signal_is_idempotent() {
        let signal = StopSignal::new();
        assert!(!signal.is_stopped());
        assert!(signal.stop());
        assert!(!signal.stop());
        assert!(signal.clone().is_stopped());
    }

    #[tokio::test]
    async fn test_stop_signal_wait_resolves_when_already_set() {
        let signal = StopSignal::new();
        signal.stop();
        tokio::time::timeout(Duration::from_millis(50), signal.wait())
            .await
            .unwrap();
    }

    #[test]
    fn test_service_registry() {
        let app = test_app("1s");
        app.register_service("counter", Arc::new(AtomicU64::new(7)))
            .unwrap();

        let err = app
            .register_service("counter", Arc::new(AtomicU64::new(1)))
            .unwrap_err();
        assert!(matches!(err, PumpError::DuplicateRegistration { .. }));

        let svc = app.get_service::<AtomicU64>("counter").unwrap();
        assert_eq!(svc.load(Ordering::Relaxed), 7);

        assert!(matches!(
            app.get_service::<AtomicU64>("missing"),
            Err(PumpError::NotFound { .. })
        ));
        assert!(matches!(
            app.get_service::<AtomicBool>("counter"),
            Err(PumpError::TypeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_run_before_initialize_is_rejected() {
        let app = test_app("1s");
        let err = app.run().await.unwrap_err();
        assert!(matches!(err, PumpError::InvalidState { .. }));
        assert_eq!(app.state(), AppState::Created);
    }

    #[tokio::test]
    async fn test_initialize_twice_is_rejected() {
        let app = test_app("1s");
        app.initialize().await.unwrap();
        assert_eq!(app.state(), AppState::Initialized);
        assert!(app.initialize().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_order_and_module_hooks() {
        let app = test_app("1s");
        let log = Arc::new(Mutex::new(Vec::new()));

        app.add_module(Recorder {
            name: "m".to_string(),
            log: Arc::clone(&log),
        });

        for topic in [topics::INIT, topics::RUN, topics::EXIT] {
            let log = Arc::clone(&log);
            app.bus().subscribe_fn(topic, move |topic, _| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().push(topic);
                    Ok(())
                }
            });
        }

        let stopper = Arc::clone(&app);
        app.bus().subscribe_fn(topics::RUN, move |_, _| {
            let app = Arc::clone(&stopper);
            async move {
                app.stop();
                Ok(())
            }
        });

        app.initialize().await.unwrap();
        let status = app.run().await.unwrap();

        assert!(status.is_success());
        assert_eq!(app.state(), AppState::Terminated);
        assert_eq!(
            *log.lock(),
            vec!["m:initialize", "init", "run", "exit", "m:finalize"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_stopped() {
        let app = test_app("1s");
        let ticks = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&ticks);
        let stopper = Arc::clone(&app);
        app.bus().subscribe_fn(topics::TICK, move |_, payload| {
            let counter = Arc::clone(&counter);
            let app = Arc::clone(&stopper);
            async move {
                let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
                assert_eq!(payload["tick"], n);
                if n == 3 {
                    app.stop();
                }
                Ok(())
            }
        });

        app.initialize().await.unwrap();
        app.run().await.unwrap();

        assert_eq!(ticks.load(Ordering::Relaxed), 3);
        assert_eq!(app.tick_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_derived_tick_topics() {
        let app = test_app("1s");
        let tens = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&tens);
        app.bus().subscribe_fn(topics::TICK_10, move |_, _| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        });
        let stopper = Arc::clone(&app);
        app.bus().subscribe_fn(topics::TICK, move |_, payload| {
            let app = Arc::clone(&stopper);
            async move {
                if payload["tick"] == 25 {
                    app.stop();
                }
                Ok(())
            }
        });

        app.initialize().await.unwrap();
        app.run().await.unwrap();

        assert_eq!(tens.load(Ordering::Relaxed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_failure_does_not_stop_loop() {
        let app = test_app("1s");
        app.bus()
            .subscribe_fn(topics::TICK, |_, _| async { Err(anyhow::anyhow!("flaky")) });

        let stopper = Arc::clone(&app);
        app.bus().subscribe_fn(topics::TICK, move |_, payload| {
            let app = Arc::clone(&stopper);
            async move {
                if payload["tick"] == 2 {
                    app.stop();
                }
                Ok(())
            }
        });

        app.initialize().await.unwrap();
        assert!(app.run().await.unwrap().is_success());
        assert_eq!(app.tick_count(), 2);
    }

    #[tokio::test]
    async fn test_init_failure_is_fatal() {
        let app = test_app("1s");
        app.bus()
            .subscribe_fn(topics::INIT, |_, _| async { Err(anyhow::anyhow!("no store")) });

        let err = app.initialize().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(app.state(), AppState::Created);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_failure_is_reported() {
        let app = test_app("1s");
        app.bus()
            .subscribe_fn(topics::EXIT, |_, _| async { Err(anyhow::anyhow!("flush failed")) });

        let stopper = Arc::clone(&app);
        app.bus().subscribe_fn(topics::RUN, move |_, _| {
            let app = Arc::clone(&stopper);
            async move {
                app.stop();
                Ok(())
            }
        });

        app.initialize().await.unwrap();
        let err = app.run().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(app.state(), AppState::Terminated);
    }
}
