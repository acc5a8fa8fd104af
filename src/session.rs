//! Per-upload image session.
//!
//! A session keeps the image as uploaded (`original`), the image after the
//! operations committed so far (`current`), and the history of those
//! operations. `current` is only ever replaced wholesale, never edited in
//! place, so handles previously read from the session stay valid.

use crate::core::param::Parameters;
use crate::core::task::Family;
use crate::core::types::ImageValue;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Record of one operation committed to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedOperation {
    /// Id of the chain step.
    pub task_id: String,
    /// Filter or transform.
    pub family: Family,
    /// Canonical operation kind.
    pub operation: String,
    /// Parameters as submitted.
    pub parameters: Parameters,
}

/// Image state for one upload.
#[derive(Debug, Clone)]
pub struct ImageSession {
    id: Uuid,
    original: ImageValue,
    current: ImageValue,
    history: Vec<AppliedOperation>,
    revision: u64,
}

impl ImageSession {
    /// Start a session for a freshly uploaded image.
    pub fn new(image: ImageValue) -> Self {
        Self {
            id: Uuid::new_v4(),
            current: image.clone(),
            original: image,
            history: Vec::new(),
            revision: 0,
        }
    }

    /// Session id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The image as uploaded.
    pub fn original(&self) -> &ImageValue {
        &self.original
    }

    /// The image with every committed operation applied.
    pub fn current(&self) -> &ImageValue {
        &self.current
    }

    /// Committed operations, oldest first.
    pub fn history(&self) -> &[AppliedOperation] {
        &self.history
    }

    /// Number of times `current` was replaced since creation or the last
    /// reset.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether `current` differs from `original`.
    pub fn is_modified(&self) -> bool {
        self.revision > 0
    }

    /// Replace the current image.
    pub fn update_current(&mut self, image: ImageValue) {
        self.current = image;
        self.revision += 1;
    }

    /// Replace the current image and append the operations that produced it.
    pub fn commit(&mut self, image: ImageValue, applied: impl IntoIterator<Item = AppliedOperation>) {
        self.history.extend(applied);
        self.update_current(image);
    }

    /// Discard every committed operation. Calling this twice is the same as
    /// calling it once.
    pub fn reset(&mut self) {
        self.current = self.original.clone();
        self.history.clear();
        self.revision = 0;
    }
}
