//! Session stages for the two-step input flow.
//!
//! The stage is an explicit value: handlers read it, ask it for the next stage,
//! and write the result back. Nothing else tracks whether a description was submitted.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    AwaitingDescription,
    AwaitingUpload,
    Analyzing,
    Done,
}

#[derive(Debug, Error, PartialEq)]
pub enum StageError {
    #[error("submit a job description before uploading a resume")]
    DescriptionRequired,

    #[error("an analysis is already running for this session")]
    AnalysisRunning,

    #[error("no analysis is running for this session")]
    NotAnalyzing,
}

impl SessionStage {
    /// Locking in a (new) job description. Allowed at any point except mid-analysis.
    pub fn submit_description(self) -> Result<SessionStage, StageError> {
        match self {
            SessionStage::Analyzing => Err(StageError::AnalysisRunning),
            _ => Ok(SessionStage::AwaitingUpload),
        }
    }

    /// Accepting an upload. A finished session may analyze another resume.
    pub fn begin_analysis(self) -> Result<SessionStage, StageError> {
        match self {
            SessionStage::AwaitingUpload | SessionStage::Done => Ok(SessionStage::Analyzing),
            SessionStage::AwaitingDescription => Err(StageError::DescriptionRequired),
            SessionStage::Analyzing => Err(StageError::AnalysisRunning),
        }
    }

    /// Leaving `Analyzing`. Failures go back to `AwaitingUpload` so the user can retry.
    pub fn finish_analysis(self, completed: bool) -> Result<SessionStage, StageError> {
        match (self, completed) {
            (SessionStage::Analyzing, true) => Ok(SessionStage::Done),
            (SessionStage::Analyzing, false) => Ok(SessionStage::AwaitingUpload),
            _ => Err(StageError::NotAnalyzing),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub session_id: Uuid,
    pub stage: SessionStage,
    pub job_description: Option<String>,
}

impl From<StageError> for AppError {
    fn from(e: StageError) -> Self {
        AppError::Conflict(e.to_string())
    }
}

/// In-memory session map. Locks are never held across an `.await`.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<Uuid, Session>>>,
}

impl SessionStore {
    pub fn create(&self) -> Session {
        let session = Session {
            session_id: Uuid::new_v4(),
            stage: SessionStage::AwaitingDescription,
            job_description: None,
        };
        self.write().insert(session.session_id, session.clone());
        debug!(session_id = %session.session_id, "Session created");
        session
    }

    pub fn get(&self, id: Uuid) -> Result<Session, AppError> {
        self.read()
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    pub fn submit_description(&self, id: Uuid, job_description: String) -> Result<Session, AppError> {
        let mut sessions = self.write();
        let session = sessions.get_mut(&id).ok_or_else(|| not_found(id))?;
        session.stage = session.stage.submit_description()?;
        session.job_description = Some(job_description);
        Ok(session.clone())
    }

    /// Moves the session to `Analyzing` and returns the locked-in job description
    /// together with the guard that owns leaving that stage.
    pub fn begin_analysis(&self, id: Uuid) -> Result<(String, AnalysisGuard), AppError> {
        let mut sessions = self.write();
        let session = sessions.get_mut(&id).ok_or_else(|| not_found(id))?;
        session.stage = session.stage.begin_analysis()?;
        let job_description = session.job_description.clone().unwrap_or_default();
        let guard = AnalysisGuard {
            store: self.clone(),
            id,
            armed: true,
        };
        Ok((job_description, guard))
    }

    pub fn finish_analysis(&self, id: Uuid, completed: bool) {
        let mut sessions = self.write();
        if let Some(session) = sessions.get_mut(&id) {
            match session.stage.finish_analysis(completed) {
                Ok(stage) => session.stage = stage,
                Err(e) => debug!(session_id = %id, "Ignoring finish: {e}"),
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, Session>> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Session>> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Holds a session in `Analyzing`. Dropping it before `finish` (error return,
/// cancelled request, panicked task) sends the session back to `AwaitingUpload`.
pub struct AnalysisGuard {
    store: SessionStore,
    id: Uuid,
    armed: bool,
}

impl AnalysisGuard {
    pub fn finish(mut self, completed: bool) {
        self.armed = false;
        self.store.finish_analysis(self.id, completed);
    }
}

impl Drop for AnalysisGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!(session_id = %self.id, "Analysis abandoned before completion");
            self.store.finish_analysis(self.id, false);
        }
    }
}

fn not_found(id: Uuid) -> AppError {
    AppError::NotFound(format!("Session {id} not found"))
}
