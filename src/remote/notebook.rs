//! Notebook that hosts the remote backend on a hosted GPU runtime.
//!
//! The template is a Jupyter notebook whose code cells carry
//! `{{ backbone_repo }}`, `{{ codec_repo }}`, `{{ device }}` and
//! `{{ auth_token }}` placeholders. Markdown cells are left alone.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

use crate::engine::DeviceHint;

const BUILTIN_TEMPLATE: &str = include_str!("../../config/remote_notebook.ipynb");
const TOKEN_LENGTH: usize = 43;

#[derive(Error, Debug)]
pub enum NotebookError {
    #[error("failed to read notebook template {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("notebook template is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("notebook template has no cells")]
    MissingCells,
}

/// Values substituted into the template.
#[derive(Debug, Clone)]
pub struct NotebookParams {
    pub backbone_repo: String,
    pub codec_repo: String,
    pub device: DeviceHint,
    /// Generated when absent or empty.
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GeneratedNotebook {
    pub notebook: String,
    /// Bearer token the notebook's worker will require.
    pub auth_token: String,
}

pub struct NotebookGenerator {
    template: Value,
}

impl NotebookGenerator {
    /// Generator over the template shipped with voxgate.
    pub fn builtin() -> Result<Self, NotebookError> {
        Self::from_json(BUILTIN_TEMPLATE)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, NotebookError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| NotebookError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, NotebookError> {
        let template: Value = serde_json::from_str(raw)?;
        if !template.get("cells").is_some_and(Value::is_array) {
            return Err(NotebookError::MissingCells);
        }
        Ok(Self { template })
    }

    pub fn generate(&self, params: &NotebookParams) -> Result<GeneratedNotebook, NotebookError> {
        let auth_token = params
            .auth_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(generate_token);
        let replacements = [
            ("{{ backbone_repo }}", params.backbone_repo.as_str()),
            ("{{ codec_repo }}", params.codec_repo.as_str()),
            ("{{ device }}", params.device.as_str()),
            ("{{ auth_token }}", auth_token.as_str()),
        ];

        let mut notebook = self.template.clone();
        if let Some(cells) = notebook.get_mut("cells").and_then(Value::as_array_mut) {
            for cell in cells
                .iter_mut()
                .filter(|c| c.get("cell_type").and_then(Value::as_str) == Some("code"))
            {
                match cell.get_mut("source") {
                    Some(Value::Array(lines)) => {
                        for line in lines.iter_mut() {
                            if let Value::String(text) = line {
                                *text = substitute(text, &replacements);
                            }
                        }
                    }
                    Some(Value::String(text)) => *text = substitute(text, &replacements),
                    _ => {}
                }
            }
        }

        Ok(GeneratedNotebook {
            notebook: serde_json::to_string_pretty(&notebook)?,
            auth_token,
        })
    }
}

fn substitute(text: &str, replacements: &[(&str, &str)]) -> String {
    replacements
        .iter()
        .fold(text.to_string(), |acc, (key, value)| acc.replace(key, value))
}

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}
