//! Shared application state.

use std::sync::{Arc, Mutex};

use rxflow_ai::ClinicalModel;
use rxflow_core::db::Database;
use rxflow_core::workflow::WorkflowResult;

use crate::config::ProcessingMode;
use crate::error::{ApiError, ApiResult};

/// State handed to every handler. The database lock is only taken for
/// synchronous work, never across an await.
#[derive(Clone)]
pub struct AppState {
    db: Arc<Mutex<Database>>,
    model: Arc<dyn ClinicalModel>,
    processing: ProcessingMode,
}

impl AppState {
    pub fn new(db: Database, model: Arc<dyn ClinicalModel>, processing: ProcessingMode) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            model,
            processing,
        }
    }

    pub fn processing(&self) -> ProcessingMode {
        self.processing
    }

    pub fn model(&self) -> Arc<dyn ClinicalModel> {
        Arc::clone(&self.model)
    }

    /// Run `f` with the database locked.
    pub fn with_db<T, F>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&Database) -> WorkflowResult<T>,
    {
        let db = self
            .db
            .lock()
            .map_err(|_| ApiError::Internal("database lock poisoned".into()))?;
        Ok(f(&db)?)
    }
}
