use std::path::{Component, Path, PathBuf};

use gan_core::{CategoricalCode, LatentVector, SynthError, LATENT_DIM, STAGE_ORDER};

use crate::error::ApiError;

/// Maximum accepted length of a layer name
const MAX_LAYER_NAME_LEN: usize = 32;

/// Validate a categorical code before anything touches the generator
pub fn validate_categorical_code(values: &[i64]) -> Result<CategoricalCode, ApiError> {
    CategoricalCode::from_values(values).map_err(|e| match e {
        SynthError::InvalidInput(msg) => ApiError::InvalidInput(format!(
            "Provide 16 binary values in 'categorical_code' ({msg})"
        )),
        other => ApiError::Synthesis(other),
    })
}

/// Validate an explicit latent vector before anything touches the generator
pub fn validate_latent(values: &[f32]) -> Result<LatentVector, ApiError> {
    LatentVector::from_slice(values).map_err(|e| match e {
        SynthError::InvalidInput(msg) => ApiError::InvalidInput(format!(
            "Provide {LATENT_DIM} values in [-1, 1] in 'z' ({msg})"
        )),
        other => ApiError::Synthesis(other),
    })
}

/// Normalize a requested layer name. Unknown but well-formed names pass and
/// are reported as not found by the service.
pub fn validate_layer_name(layer: Option<&str>) -> Result<String, ApiError> {
    let name = layer.unwrap_or_default().trim().to_ascii_lowercase();
    if name.is_empty() {
        return Err(ApiError::InvalidInput("Provide 'layer'".to_string()));
    }
    if name.len() > MAX_LAYER_NAME_LEN
        || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ApiError::InvalidInput(format!(
            "Invalid layer name: {name}. Expected one of: {}",
            STAGE_ORDER.join(", ")
        )));
    }
    Ok(name)
}

/// Validate a transcription language hint and reduce it to the ISO 639-1
/// code the recognizer expects (`en_US` and `en-US` become `en`).
pub fn validate_language(language: Option<&str>) -> Result<Option<String>, ApiError> {
    let Some(lang) = language.map(str::trim).filter(|l| !l.is_empty()) else {
        return Ok(None);
    };
    if !is_valid_language_code(lang) {
        return Err(ApiError::InvalidInput(format!(
            "Invalid language code format: {}. Expected format: ll or ll_CC (e.g., en, de_DE)",
            lang
        )));
    }
    Ok(Some(lang[..2].to_string()))
}

fn is_valid_language_code(code: &str) -> bool {
    let parts: Vec<&str> = code.split(['_', '-']).collect();
    let lang_ok = |p: &str| p.len() == 2 && p.chars().all(|c| c.is_ascii_lowercase());
    match parts.len() {
        1 => lang_ok(parts[0]),
        2 => {
            lang_ok(parts[0])
                && parts[1].len() == 2
                && parts[1].chars().all(|c| c.is_ascii_uppercase())
        }
        _ => false,
    }
}

/// Map a URL returned by the generate endpoints (`/static/batch/x.wav`, or a
/// path relative to the static root) onto a file under `static_dir`.
/// Anything that would escape the static root is rejected.
pub fn resolve_static_file(static_dir: &Path, file: &str) -> Result<PathBuf, ApiError> {
    let trimmed = file.trim().trim_start_matches('/');
    let relative = trimmed.strip_prefix("static/").unwrap_or(trimmed);
    if relative.is_empty() {
        return Err(ApiError::InvalidInput("Provide 'file'".to_string()));
    }

    let relative = Path::new(relative);
    if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(ApiError::InvalidInput(format!(
            "file must point inside the static directory: {file}"
        )));
    }
    Ok(static_dir.join(relative))
}

/// Public URL of an artifact written under `static_dir`.
pub fn static_url(static_dir: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(static_dir).unwrap_or(path);
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    format!("/static/{}", parts.join("/"))
}
