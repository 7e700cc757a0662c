//! Home page served from a template file on disk.
//!
//! The file is read on every request so edits show up without a restart.

use std::path::Path;

use relay_core::{RelayError, Result};

/// Load the home-page template.
pub async fn render(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| RelayError::TemplateRender(format!("{}: {e}", path.display())))
}
