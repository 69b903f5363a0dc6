//! Pump service
//!
//! The application-level registry of pipelines, time-window matrices and
//! connections. It hooks into the governor phases: pipelines are started when
//! `run` is published, and on `exit` the service waits for their sources to
//! wind down before aborting stragglers.

use crate::application::{Application, StopSignal};
use crate::bus::{topics, Subscriber};
use crate::error::{PumpError, Result};
use crate::pipeline::Pipeline;
use crate::window::{Cell, SharedMatrix};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::any::{type_name, Any};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Name under which the service is registered with the application
pub const SERVICE_NAME: &str = "eventpump.PumpService";

type AnyArc = Arc<dyn Any + Send + Sync>;

/// Registry and lifecycle owner of pipelines
pub struct PumpService {
    pipelines: DashMap<String, Arc<Pipeline>>,
    matrices: DashMap<String, AnyArc>,
    connections: DashMap<String, AnyArc>,
    sources: Mutex<Vec<(String, JoinHandle<()>)>>,
    exit_timeout: Duration,
    shutdown: StopSignal,
}

impl std::fmt::Debug for PumpService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PumpService")
            .field("pipelines", &self.pipeline_ids())
            .field("matrices", &self.matrices.len())
            .field("connections", &self.connections.len())
            .finish()
    }
}

impl PumpService {
    /// Create the service, register it and subscribe to `run` and `exit`
    pub fn install(app: &Application) -> Result<Arc<Self>> {
        let service = Arc::new(Self {
            pipelines: DashMap::new(),
            matrices: DashMap::new(),
            connections: DashMap::new(),
            sources: Mutex::new(Vec::new()),
            exit_timeout: app.config().general().exit_timeout,
            shutdown: app.stop_signal(),
        });

        app.register_service(SERVICE_NAME, Arc::clone(&service))?;

        let hook = Arc::new(LifecycleHook {
            service: Arc::clone(&service),
        });
        app.bus().subscribe(topics::RUN, hook.clone());
        app.bus().subscribe(topics::EXIT, hook);

        Ok(service)
    }

    // Pipelines

    pub fn add_pipeline(&self, pipeline: Arc<Pipeline>) -> Result<()> {
        insert_unique(&self.pipelines, "pipeline", pipeline.id(), pipeline.clone())?;
        debug!(pipeline = %pipeline.id(), "Pipeline added");
        Ok(())
    }

    pub fn locate_pipeline(&self, id: &str) -> Result<Arc<Pipeline>> {
        self.pipelines
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| not_found("pipeline", id))
    }

    /// Registered pipeline ids, sorted
    pub fn pipeline_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pipelines.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    // Matrices

    pub fn add_matrix<T: Cell>(&self, id: &str, matrix: SharedMatrix<T>) -> Result<()> {
        insert_unique(&self.matrices, "matrix", id, matrix as AnyArc)
    }

    /// Look up a matrix to share it with another analyzer
    pub fn locate_matrix<T: Cell>(&self, id: &str) -> Result<SharedMatrix<T>> {
        let matrix = self
            .matrices
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| not_found("matrix", id))?;
        downcast(matrix, "matrix", id)
    }

    // Connections

    pub fn add_connection<C: Send + Sync + 'static>(&self, id: &str, connection: Arc<C>) -> Result<()> {
        insert_unique(&self.connections, "connection", id, connection as AnyArc)
    }

    pub fn locate_connection<C: Send + Sync + 'static>(&self, id: &str) -> Result<Arc<C>> {
        let connection = self
            .connections
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| not_found("connection", id))?;
        downcast(connection, "connection", id)
    }

    // Lifecycle

    /// Start every registered pipeline
    pub async fn start_pipelines(&self) -> Result<()> {
        for id in self.pipeline_ids() {
            let pipeline = self.locate_pipeline(&id)?;
            let task = pipeline.start().await?;
            self.sources.lock().push((id, task));
        }
        info!(pipelines = self.pipelines.len(), "Pipelines started");
        Ok(())
    }

    /// Wait up to the exit timeout for source tasks, then abort the rest
    ///
    /// Pipelines are flushed afterwards; flush failures are only logged.
    pub async fn stop_pipelines(&self) {
        // Sources return once the stop signal fires
        self.shutdown.stop();

        let sources: Vec<(String, JoinHandle<()>)> = std::mem::take(&mut *self.sources.lock());
        let deadline = Instant::now() + self.exit_timeout;

        for (id, mut task) in sources {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => debug!(pipeline = %id, "Source stopped"),
                Ok(Err(e)) => warn!(pipeline = %id, error = %e, "Source task failed"),
                Err(_) => {
                    warn!(pipeline = %id, "Source did not stop in time, aborting");
                    task.abort();
                }
            }
        }

        for id in self.pipeline_ids() {
            if let Ok(pipeline) = self.locate_pipeline(&id) {
                if let Err(e) = pipeline.flush().await {
                    warn!(pipeline = %id, error = %e, "Final flush failed");
                }
            }
        }
    }
}

struct LifecycleHook {
    service: Arc<PumpService>,
}

#[async_trait]
impl Subscriber for LifecycleHook {
    async fn on_message(&self, topic: &str, _payload: &Value) -> anyhow::Result<()> {
        match topic {
            topics::RUN => self.service.start_pipelines().await?,
            topics::EXIT => self.service.stop_pipelines().await,
            _ => {}
        }
        Ok(())
    }
}

fn insert_unique<V>(map: &DashMap<String, V>, kind: &'static str, id: &str, value: V) -> Result<()> {
    match map.entry(id.to_string()) {
        Entry::Occupied(_) => Err(PumpError::DuplicateRegistration {
            kind,
            name: id.to_string(),
        }),
        Entry::Vacant(entry) => {
            entry.insert(value);
            Ok(())
        }
    }
}

fn downcast<T: Send + Sync + 'static>(value: AnyArc, kind: &'static str, id: &str) -> Result<Arc<T>> {
    value.downcast::<T>().map_err(|_| PumpError::TypeMismatch {
        kind,
        name: id.to_string(),
        expected: type_name::<T>(),
    })
}

fn not_found(kind: &'static str, id: &str) -> PumpError {
    PumpError::NotFound {
        kind,
        name: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::NullSink;
    use crate::connector::ChannelSource;
    use crate::pipeline::PipelineBuilder;
    use crate::window::{MatrixConfig, TimeWindowMatrix};
    use eventpump_config::PumpConfig;

    fn app() -> Arc<Application> {
        Application::builder(PumpConfig::default())
            .handle_signals(false)
            .build()
    }

    #[test]
    fn test_install_registers_service() {
        let app = app();
        let service = PumpService::install(&app).unwrap();
        let located = app.get_service::<PumpService>(SERVICE_NAME).unwrap();
        assert!(Arc::ptr_eq(&service, &located));
        assert!(PumpService::install(&app).is_err());
    }

    #[test]
    fn test_duplicate_pipeline_rejected() {
        let app = app();
        let service = PumpService::install(&app).unwrap();

        for expect_ok in [true, false] {
            let (source, _tx) = ChannelSource::new("in", 1);
            let pipeline = PipelineBuilder::new("p")
                .source(source)
                .sink(NullSink::new("null"))
                .build(&app)
                .unwrap();
            assert_eq!(service.add_pipeline(pipeline).is_ok(), expect_ok);
        }
        assert!(matches!(
            service.locate_pipeline("q"),
            Err(PumpError::NotFound { .. })
        ));
    }

    #[test]
    fn test_matrix_registry() {
        let app = app();
        let service = PumpService::install(&app).unwrap();
        let matrix = TimeWindowMatrix::<u64>::new("m", &MatrixConfig::default())
            .unwrap()
            .shared();

        service.add_matrix("m", Arc::clone(&matrix)).unwrap();
        assert!(service.add_matrix("m", Arc::clone(&matrix)).is_err());

        let located = service.locate_matrix::<u64>("m").unwrap();
        assert!(Arc::ptr_eq(&matrix, &located));
        assert!(matches!(
            service.locate_matrix::<f64>("m"),
            Err(PumpError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_connection_registry() {
        let app = app();
        let service = PumpService::install(&app).unwrap();
        service
            .add_connection("db", Arc::new(String::from("postgres://")))
            .unwrap();

        assert_eq!(*service.locate_connection::<String>("db").unwrap(), "postgres://");
        assert!(service.locate_connection::<String>("cache").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pipelines_follow_governor_phases() {
        let app = app();
        let service = PumpService::install(&app).unwrap();

        let (source, _tx) = ChannelSource::new("in", 1);
        let pipeline = PipelineBuilder::new("p")
            .source(source)
            .sink(NullSink::new("null"))
            .build(&app)
            .unwrap();
        service.add_pipeline(Arc::clone(&pipeline)).unwrap();

        let observed = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&observed);
        let probe = Arc::clone(&pipeline);
        let stopper = Arc::clone(&app);
        app.bus().subscribe_fn(topics::TICK, move |_, _| {
            *seen.lock() = Some(probe.is_ready());
            stopper.stop();
            async { Ok(()) }
        });

        app.initialize().await.unwrap();
        assert!(!pipeline.is_ready());

        app.run().await.unwrap();
        assert_eq!(*observed.lock(), Some(true));
    }
}
