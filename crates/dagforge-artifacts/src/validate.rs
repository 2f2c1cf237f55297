// Name validation shared by artifacts and the files inside them.

use dagforge_core::error::{DagforgeError, Result};

/// Artifact names: alphanumeric, underscore, hyphen. No dots or slashes, so
/// an artifact name can never be mistaken for a path segment with an
/// extension or a traversal attempt.
pub fn validate_artifact_name(name: &str) -> Result<&str> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(DagforgeError::validation(format!(
            "artifact name can only contain alphanumeric characters, underscores, and hyphens, got: `{name}`"
        )));
    }
    Ok(name)
}

/// Artifact file names: alphanumeric, underscore, hyphen, dot. No slashes,
/// so a filename can never escape the artifact's directory.
pub fn validate_filename(filename: &str) -> Result<&str> {
    if filename.is_empty()
        || !filename.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(DagforgeError::validation(format!(
            "artifact file name can only contain alphanumeric characters, underscores, hyphens, and dots, got: `{filename}`"
        )));
    }
    Ok(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_slash_containing_names() {
        assert!(validate_artifact_name("").is_err());
        assert!(validate_artifact_name("a/b").is_err());
        assert!(validate_artifact_name("model-v2").is_ok());
    }

    #[test]
    fn filenames_may_contain_dots_but_not_slashes() {
        assert!(validate_filename("weights.pkl").is_ok());
        assert!(validate_filename("../escape").is_err());
    }
}
