// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row types shared by the warehouse, the pipeline jobs and the webhook.

use serde::{Deserialize, Serialize};

/// A job posting as stored in the source table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPosting {
    pub job_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: String,
}

impl JobPosting {
    /// Title for display, falling back to the job id.
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&self.job_id)
    }
}

/// One row of the chunk table produced by the transform job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobChunk {
    pub job_id: String,
    pub content: String,
    pub chunk_size: i64,
    /// False exactly when the description fit in a single chunk.
    pub is_split: bool,
}

/// A ranked match returned to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMatch {
    pub job_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    pub score: f32,
}

impl JobMatch {
    pub fn label(&self) -> String {
        let title = self.title.as_deref().unwrap_or(&self.job_id);
        match self.company.as_deref() {
            Some(company) if !company.is_empty() => format!("{} at {}", title, company),
            _ => title.to_string(),
        }
    }
}
