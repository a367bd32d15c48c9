//! Cross-store transaction management.
//!
//! Two intertwined mechanisms over the graph database:
//!
//! 1. **Nested SQL transactions** — the outer level runs `BEGIN IMMEDIATE` /
//!    `COMMIT` / `ROLLBACK`; nested levels reenter through named savepoints.
//! 2. **Compensation registry** — while a transaction is active, callers
//!    register undo actions for side effects that cannot participate in SQL
//!    (vector-store inserts, above all). On outer rollback the registered
//!    compensations run in reverse order, each isolated from the next; on
//!    commit the registry is cleared without running.
//!
//! A standalone [`Saga`] executor covers multi-step plans with explicit
//! execute/compensate pairs, and the manager keeps an in-memory table of
//! in-flight [`SagaTransaction`] records for the vector ids an ingest has
//! touched.

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use dashmap::DashMap;
use rusqlite::Connection;

use crate::error::{redact_secrets, MemoryError};

// ── Compensations ─────────────────────────────────────────────────────────────

type UndoFn = Box<dyn FnOnce() -> Result<(), MemoryError> + Send>;

struct Compensation {
    description: String,
    undo: UndoFn,
}

// ── Pending saga table ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaState {
    Pending,
    Committed,
    RolledBack,
}

/// In-memory record of the cross-store effects of one ingest.
#[derive(Debug, Clone)]
pub struct SagaTransaction {
    pub id: String,
    pub vector_ids: Vec<String>,
    pub state: SagaState,
}

// ── Transaction context ───────────────────────────────────────────────────────

/// Handle passed to transaction bodies. Gives access to the connection,
/// savepoint-nested sub-transactions, and compensation registration.
pub struct TxnCtx<'a> {
    conn: &'a Connection,
    depth: Cell<u32>,
    compensations: &'a parking_lot::Mutex<Vec<Compensation>>,
}

impl TxnCtx<'_> {
    pub fn conn(&self) -> &Connection {
        self.conn
    }

    /// Register an undo action to run if the outer transaction rolls back.
    pub fn register_compensation(
        &self,
        description: impl Into<String>,
        undo: UndoFn,
    ) {
        self.compensations.lock().push(Compensation {
            description: description.into(),
            undo,
        });
    }

    /// Run a nested sub-transaction through a named savepoint. Failure rolls
    /// back to the savepoint only; the outer transaction stays usable.
    pub fn nested<T>(
        &self,
        f: impl FnOnce(&TxnCtx<'_>) -> Result<T, MemoryError>,
    ) -> Result<T, MemoryError> {
        let depth = self.depth.get() + 1;
        let savepoint = format!("sp_{}_{}", depth, chrono::Utc::now().timestamp_millis());

        self.conn
            .execute_batch(&format!("SAVEPOINT {savepoint}"))
            .map_err(|e| MemoryError::db("savepoint", e))?;

        let child = TxnCtx {
            conn: self.conn,
            depth: Cell::new(depth),
            compensations: self.compensations,
        };

        match f(&child) {
            Ok(value) => {
                self.conn
                    .execute_batch(&format!("RELEASE SAVEPOINT {savepoint}"))
                    .map_err(|e| MemoryError::db("release_savepoint", e))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rb) = self
                    .conn
                    .execute_batch(&format!("ROLLBACK TO SAVEPOINT {savepoint}"))
                {
                    tracing::error!(savepoint = %savepoint, error = %rb, "rollback to savepoint failed");
                }
                Err(err)
            }
        }
    }
}

// ── Transaction manager ───────────────────────────────────────────────────────

/// Serializes outer transactions over the graph database and owns the
/// compensation registry plus the pending-saga table.
pub struct TransactionManager {
    conn: Arc<StdMutex<Connection>>,
    outer: tokio::sync::Mutex<()>,
    active: AtomicBool,
    compensations: Arc<parking_lot::Mutex<Vec<Compensation>>>,
    sagas: DashMap<String, SagaTransaction>,
}

impl TransactionManager {
    pub fn new(conn: Arc<StdMutex<Connection>>) -> Self {
        Self {
            conn,
            outer: tokio::sync::Mutex::new(()),
            active: AtomicBool::new(false),
            compensations: Arc::new(parking_lot::Mutex::new(Vec::new())),
            sagas: DashMap::new(),
        }
    }

    /// Whether an outer transaction is currently in flight.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Run `body` inside an outer transaction, waiting for any in-flight
    /// outer transaction to finish first. SQL runs on a blocking thread.
    pub async fn execute<T, F>(
        &self,
        operation: &'static str,
        body: F,
    ) -> Result<T, MemoryError>
    where
        F: FnOnce(&TxnCtx<'_>) -> Result<T, MemoryError> + Send + 'static,
        T: Send + 'static,
    {
        let _guard = self.outer.lock().await;
        self.run_outer(operation, body).await
    }

    /// Like [`Self::execute`], but fails immediately with `ConcurrencyError`
    /// when another outer transaction is already active.
    pub async fn try_execute<T, F>(
        &self,
        operation: &'static str,
        body: F,
    ) -> Result<T, MemoryError>
    where
        F: FnOnce(&TxnCtx<'_>) -> Result<T, MemoryError> + Send + 'static,
        T: Send + 'static,
    {
        let _guard = self.outer.try_lock().map_err(|_| MemoryError::Concurrency {
            operation,
            message: "an outer transaction is already active".into(),
        })?;
        self.run_outer(operation, body).await
    }

    async fn run_outer<T, F>(&self, operation: &'static str, body: F) -> Result<T, MemoryError>
    where
        F: FnOnce(&TxnCtx<'_>) -> Result<T, MemoryError> + Send + 'static,
        T: Send + 'static,
    {
        self.active.store(true, Ordering::SeqCst);
        let conn = Arc::clone(&self.conn);
        let compensations = Arc::clone(&self.compensations);

        let result = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|e| MemoryError::Database {
                operation,
                message: format!("graph connection lock poisoned: {e}"),
                transient: false,
            })?;
            run_transaction(&conn, &compensations, operation, body)
        })
        .await
        .map_err(|e| MemoryError::Database {
            operation,
            message: format!("transaction task panicked: {e}"),
            transient: false,
        });
        self.active.store(false, Ordering::SeqCst);
        result?
    }

    // ── Pending saga table ────────────────────────────────────────────────

    /// Start tracking the cross-store effects of one ingest.
    pub fn begin_saga(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.sagas.insert(
            id.clone(),
            SagaTransaction {
                id: id.clone(),
                vector_ids: Vec::new(),
                state: SagaState::Pending,
            },
        );
        id
    }

    /// Record a vector id touched by the given saga.
    pub fn saga_add_vector(&self, saga_id: &str, vector_id: impl Into<String>) {
        if let Some(mut saga) = self.sagas.get_mut(saga_id) {
            saga.vector_ids.push(vector_id.into());
        }
    }

    /// Finish a saga, removing it from the table. Returns the final record.
    pub fn complete_saga(&self, saga_id: &str, state: SagaState) -> Option<SagaTransaction> {
        self.sagas.remove(saga_id).map(|(_, mut saga)| {
            saga.state = state;
            saga
        })
    }

    /// Number of sagas currently in flight.
    pub fn pending_sagas(&self) -> usize {
        self.sagas.len()
    }
}

fn run_transaction<T, F>(
    conn: &Connection,
    compensations: &parking_lot::Mutex<Vec<Compensation>>,
    operation: &'static str,
    body: F,
) -> Result<T, MemoryError>
where
    F: FnOnce(&TxnCtx<'_>) -> Result<T, MemoryError>,
{
    compensations.lock().clear();

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| MemoryError::db(operation, e))?;

    let ctx = TxnCtx {
        conn,
        depth: Cell::new(0),
        compensations,
    };

    match body(&ctx) {
        Ok(value) => {
            conn.execute_batch("COMMIT")
                .map_err(|e| MemoryError::db(operation, e))?;
            // Committed: the registered undos must never run.
            compensations.lock().clear();
            Ok(value)
        }
        Err(err) => {
            if let Err(rb) = conn.execute_batch("ROLLBACK") {
                tracing::error!(operation, error = %rb, "outer rollback failed");
            }
            run_compensations(compensations, operation);
            Err(err)
        }
    }
}

/// Run registered compensations in reverse registration order. A failing
/// compensation is logged and never halts the sweep or masks the original
/// error.
fn run_compensations(
    compensations: &parking_lot::Mutex<Vec<Compensation>>,
    operation: &'static str,
) {
    let drained: Vec<Compensation> = compensations.lock().drain(..).collect();
    for comp in drained.into_iter().rev() {
        tracing::debug!(operation, compensation = %comp.description, "running compensation");
        if let Err(e) = (comp.undo)() {
            tracing::error!(
                operation,
                compensation = %comp.description,
                error = %redact_secrets(&e.to_string()),
                "compensation failed"
            );
        }
    }
}

// ── Saga executor ─────────────────────────────────────────────────────────────

/// One step of a [`Saga`]: a forward action and its explicit undo.
#[async_trait]
pub trait SagaStep: Send + Sync {
    fn name(&self) -> &str;
    async fn execute(&self) -> Result<(), MemoryError>;
    async fn compensate(&self) -> Result<(), MemoryError>;
}

/// Boxed future returned by [`FnStep`] closures.
pub type StepFuture = Pin<Box<dyn Future<Output = Result<(), MemoryError>> + Send>>;

/// Closure-backed [`SagaStep`] for plans built inline.
pub struct FnStep<E, C>
where
    E: Fn() -> StepFuture + Send + Sync,
    C: Fn() -> StepFuture + Send + Sync,
{
    name: String,
    execute: E,
    compensate: C,
}

impl<E, C> FnStep<E, C>
where
    E: Fn() -> StepFuture + Send + Sync,
    C: Fn() -> StepFuture + Send + Sync,
{
    pub fn new(name: impl Into<String>, execute: E, compensate: C) -> Self {
        Self {
            name: name.into(),
            execute,
            compensate,
        }
    }
}

#[async_trait]
impl<E, C> SagaStep for FnStep<E, C>
where
    E: Fn() -> StepFuture + Send + Sync,
    C: Fn() -> StepFuture + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self) -> Result<(), MemoryError> {
        (self.execute)().await
    }

    async fn compensate(&self) -> Result<(), MemoryError> {
        (self.compensate)().await
    }
}

/// Executes steps in order; on any failure, compensates the completed prefix
/// in reverse. Compensation failures are logged, not propagated.
pub struct Saga {
    name: &'static str,
    steps: Vec<Box<dyn SagaStep>>,
}

impl Saga {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: Box<dyn SagaStep>) -> Self {
        self.steps.push(step);
        self
    }

    pub async fn run(&self) -> Result<(), MemoryError> {
        for (index, step) in self.steps.iter().enumerate() {
            if let Err(err) = step.execute().await {
                tracing::warn!(
                    saga = self.name,
                    step = step.name(),
                    error = %redact_secrets(&err.to_string()),
                    "saga step failed, compensating"
                );
                for done in self.steps[..index].iter().rev() {
                    if let Err(comp_err) = done.compensate().await {
                        tracing::error!(
                            saga = self.name,
                            step = done.name(),
                            error = %redact_secrets(&comp_err.to_string()),
                            "saga compensation failed"
                        );
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }
}
