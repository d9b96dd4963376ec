//! Subject/session identity for a batch of recordings
//!
//! A session is created per recording group, populated (directly or by
//! derivation from the recording), then locked before any name is built.
//! Locked fields are immutable until an explicit unlock.

use crate::error::{CurateError, Result};
use crate::naming;
use crate::value::Value;
use indexmap::IndexMap;
use std::path::PathBuf;

pub const SUBJECT_PREFIX: &str = "sub-";
pub const SESSION_PREFIX: &str = "ses-";

#[derive(Debug, Clone, Default)]
pub struct Session {
    subject: Option<String>,
    session: Option<String>,
    sub_locked: bool,
    ses_locked: bool,
    /// Source path of the group currently being processed
    pub in_path: Option<PathBuf>,
    /// Subject-level tabular record (one row per subject)
    pub sub_values: IndexMap<String, Option<Value>>,
    /// Recording-level tabular record (one row per archived artifact)
    pub rec_values: IndexMap<String, Option<Value>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn set_subject(&mut self, value: Option<String>) -> Result<()> {
        if self.sub_locked {
            return Err(CurateError::Locked("Subject"));
        }
        self.subject = value;
        Ok(())
    }

    pub fn set_session(&mut self, value: Option<String>) -> Result<()> {
        if self.ses_locked {
            return Err(CurateError::Locked("Session"));
        }
        self.session = value;
        Ok(())
    }

    /// Forbid further changes to the subject Id and canonicalize it.
    pub fn lock_subject(&mut self) {
        self.sub_locked = true;
        if let Some(sub) = self.subject.take() {
            self.subject = Some(naming::cleanup(&sub, SUBJECT_PREFIX));
        }
    }

    /// Forbid further changes to the session Id and canonicalize it.
    /// Locking order is subject first, then session.
    pub fn lock_session(&mut self) {
        if !self.sub_locked {
            tracing::warn!("Session Id locked before subject Id");
        }
        self.ses_locked = true;
        if let Some(ses) = self.session.take() {
            self.session = Some(naming::cleanup(&ses, SESSION_PREFIX));
        }
    }

    pub fn unlock_subject(&mut self) {
        self.sub_locked = false;
    }

    pub fn unlock_session(&mut self) {
        self.ses_locked = false;
    }

    pub fn lock(&mut self) {
        self.lock_subject();
        self.lock_session();
    }

    pub fn is_locked(&self) -> bool {
        self.sub_locked && self.ses_locked
    }

    /// Both Ids locked and defined, subject non-empty.
    pub fn is_valid(&self) -> bool {
        if !self.sub_locked || !self.ses_locked {
            return false;
        }
        match (&self.subject, &self.session) {
            (Some(sub), Some(_)) => !sub.is_empty(),
            _ => false,
        }
    }

    /// Prefix from subject and session Ids, e.g. `sub-001_ses-01`.
    pub fn prefix(&self, sep: char) -> Result<String> {
        let sub = self
            .subject
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CurateError::InvalidSubject(String::new()))?;
        let mut res = sub.to_string();
        if let Some(ses) = self.session.as_deref().filter(|s| !s.is_empty()) {
            res.push(sep);
            res.push_str(ses);
        }
        Ok(res)
    }

    /// Relative destination path generated from subject and session Id.
    pub fn rel_path(&self) -> Result<PathBuf> {
        Ok(PathBuf::from(self.prefix('/')?))
    }
}
