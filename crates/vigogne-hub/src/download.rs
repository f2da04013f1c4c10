//! Tokenizer downloading from HuggingFace Hub.

use hf_hub::api::tokio::{Api, ApiBuilder, ApiRepo};
use hf_hub::{Repo, RepoType};
use std::path::{Path, PathBuf};
use vigogne_core::{Result, SecretString, VigogneError};

/// Tokenizer definition file.
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Tokenizer settings file (special tokens).
pub const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";

/// Environment variable holding the Hub access token.
pub const TOKEN_ENV_VAR: &str = "HF_TOKEN";

/// Read the Hub token from `HF_TOKEN`, ignoring empty values.
pub fn token_from_env() -> Option<SecretString> {
    std::env::var(TOKEN_ENV_VAR)
        .ok()
        .filter(|t| !t.trim().is_empty())
        .map(SecretString::new)
}

/// Build API with optional token authentication.
fn build_api(token: Option<&SecretString>) -> Result<Api> {
    let mut builder = ApiBuilder::new().with_progress(false);

    if let Some(secret) = token {
        builder = builder.with_token(Some(secret.expose_secret().to_string()));
    }

    builder.build().map_err(|e| VigogneError::Hub(e.to_string()))
}

fn model_repo(api: &Api, model_id: &str, revision: Option<&str>) -> ApiRepo {
    match revision {
        Some(rev) => api.repo(Repo::with_revision(
            model_id.to_string(),
            RepoType::Model,
            rev.to_string(),
        )),
        None => api.model(model_id.to_string()),
    }
}

/// Local paths of a model's tokenizer files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizerFiles {
    /// `tokenizer.json`.
    pub tokenizer: PathBuf,
    /// `tokenizer_config.json`, when the repository has one.
    pub tokenizer_config: Option<PathBuf>,
}

impl TokenizerFiles {
    /// Tokenizer files inside a local model directory.
    ///
    /// Returns `None` when the directory has no `tokenizer.json`.
    pub fn in_dir(dir: &Path) -> Option<Self> {
        let tokenizer = dir.join(TOKENIZER_FILE);
        if !tokenizer.is_file() {
            return None;
        }
        let config = dir.join(TOKENIZER_CONFIG_FILE);
        Some(Self {
            tokenizer,
            tokenizer_config: config.is_file().then_some(config),
        })
    }
}

/// Download a specific file from a model repository.
///
/// # Arguments
/// * `model_id` - Model identifier
/// * `filename` - File to download
/// * `revision` - Optional revision/branch
/// * `token` - Optional authentication token
pub async fn download_file(
    model_id: &str,
    filename: &str,
    revision: Option<&str>,
    token: Option<&SecretString>,
) -> Result<PathBuf> {
    let api = build_api(token)?;
    model_repo(&api, model_id, revision)
        .get(filename)
        .await
        .map_err(|e| VigogneError::Hub(format!("{model_id}/{filename}: {e}")))
}

/// Download the tokenizer of a Hub model.
///
/// `tokenizer.json` is required; `tokenizer_config.json` is fetched when
/// present. Files land in the standard HuggingFace cache.
pub async fn download_tokenizer(
    model_id: &str,
    revision: Option<&str>,
    token: Option<&SecretString>,
) -> Result<TokenizerFiles> {
    let api = build_api(token)?;
    let repo = model_repo(&api, model_id, revision);

    tracing::info!(model_id, revision = revision.unwrap_or("main"), "Downloading tokenizer");
    let tokenizer = repo.get(TOKENIZER_FILE).await.map_err(|e| {
        VigogneError::Hub(format!(
            "{model_id} has no {TOKENIZER_FILE} (only fast tokenizers are supported): {e}"
        ))
    })?;

    let tokenizer_config = match repo.get(TOKENIZER_CONFIG_FILE).await {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::debug!(model_id, error = %e, "No tokenizer_config.json");
            None
        }
    };

    Ok(TokenizerFiles {
        tokenizer,
        tokenizer_config,
    })
}

/// Resolve a model's tokenizer from a local directory, a `tokenizer.json`
/// path, or the Hub.
pub async fn resolve_tokenizer(
    model_name_or_path: &str,
    revision: Option<&str>,
    token: Option<&SecretString>,
) -> Result<TokenizerFiles> {
    let path = Path::new(model_name_or_path);
    if path.is_dir() {
        return TokenizerFiles::in_dir(path).ok_or_else(|| {
            VigogneError::Config(format!(
                "{} contains no {TOKENIZER_FILE}",
                path.display()
            ))
        });
    }
    if path.is_file() {
        let config = path.with_file_name(TOKENIZER_CONFIG_FILE);
        return Ok(TokenizerFiles {
            tokenizer: path.to_path_buf(),
            tokenizer_config: config.is_file().then_some(config),
        });
    }
    download_tokenizer(model_name_or_path, revision, token).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_local_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TOKENIZER_FILE), "{}").unwrap();

        let files = resolve_tokenizer(dir.path().to_str().unwrap(), None, None)
            .await
            .unwrap();
        assert_eq!(files.tokenizer, dir.path().join(TOKENIZER_FILE));
        assert!(files.tokenizer_config.is_none());

        std::fs::write(dir.path().join(TOKENIZER_CONFIG_FILE), "{}").unwrap();
        let files = TokenizerFiles::in_dir(dir.path()).unwrap();
        assert_eq!(
            files.tokenizer_config,
            Some(dir.path().join(TOKENIZER_CONFIG_FILE))
        );
    }

    #[tokio::test]
    async fn test_resolve_tokenizer_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(TOKENIZER_FILE);
        std::fs::write(&path, "{}").unwrap();

        let files = resolve_tokenizer(path.to_str().unwrap(), None, None)
            .await
            .unwrap();
        assert_eq!(files.tokenizer, path);
    }

    #[tokio::test]
    async fn test_local_dir_without_tokenizer() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_tokenizer(dir.path().to_str().unwrap(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, VigogneError::Config(_)));
    }
}
