use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    Train,
    #[default]
    Predict,
}

/// Global settings of the job being constructed under a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub job_name: String,
    pub mode: JobMode,
}

impl JobConfig {
    pub fn predict(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            mode: JobMode::Predict,
        }
    }

    pub fn train(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            mode: JobMode::Train,
        }
    }

    pub fn is_train(&self) -> bool {
        self.mode == JobMode::Train
    }
}
