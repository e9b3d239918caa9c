use crate::errors::ProviderError;
use std::path::PathBuf;

/// Parses a `--seed` argument of the form `table=path/to/file.ndjson`.
///
/// # Errors
/// Returns [`ProviderError::Command`] when the `=` is missing or either side is empty.
pub fn parse_seed(arg: &str) -> Result<(String, PathBuf), ProviderError> {
    match arg.split_once('=') {
        Some((table, path)) if !table.is_empty() && !path.is_empty() => {
            Ok((table.to_string(), PathBuf::from(path)))
        }
        _ => Err(ProviderError::Command(format!("expected table=file, got {arg}"))),
    }
}
