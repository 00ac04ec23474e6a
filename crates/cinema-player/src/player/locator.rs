use std::path::Path;

use url::Url;

use crate::error::{PlayerError, Result};

/// Parse a media locator. Only absolute URLs (with a scheme) are accepted.
pub fn parse_locator(locator: &str) -> Result<Url> {
    Url::parse(locator.trim()).map_err(|e| {
        log::debug!("Rejecting locator '{locator}': {e}");
        PlayerError::InvalidLocator(locator.to_string())
    })
}

/// Turn an absolute filesystem path into a `file://` locator.
pub fn locator_from_path(path: &Path) -> Result<Url> {
    Url::from_file_path(path).map_err(|()| PlayerError::InvalidLocator(path.display().to_string()))
}
