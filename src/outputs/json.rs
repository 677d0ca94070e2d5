//! JSON output for the event digest and the enrichment checkpoint.
//!
//! The whole digest is serialized once, after every source has finished, so
//! a crashed run never leaves a half-written file behind a valid-looking one.
//! Every write goes through a sibling `.tmp` file that is renamed into place.
//!
//! ```json
//! {
//!   "generated_at": "2026-10-17T09:30:00Z",
//!   "events": [ { "source": "peatix", "url": "...", "title": "..." } ],
//!   "failures": [ { "source": "luma", "stage": "render", "reason": "..." } ]
//! }
//! ```

use crate::models::EventDigest;
use crate::utils::ensure_writable_parent;
use serde::Serialize;
use std::error::Error;
use std::path::Path;
use tokio::fs;
use tracing::{error, info, instrument};

/// Write `value` to `output_path` as pretty-printed JSON.
///
/// The parent directory is created when missing.
pub async fn write_json<T>(value: &T, output_path: &Path) -> Result<(), Box<dyn Error>>
where
    T: Serialize + ?Sized,
{
    let json = serde_json::to_string_pretty(value)?;

    ensure_writable_parent(output_path).await?;

    let tmp_path = output_path.with_extension("json.tmp");
    if let Err(e) = fs::write(&tmp_path, json).await {
        error!(path = %tmp_path.display(), error = %e, "Failed to write JSON");
        return Err(e.into());
    }
    fs::rename(&tmp_path, output_path).await?;
    Ok(())
}

/// Write `digest` to `output_path`.
#[instrument(level = "info", skip_all, fields(output = %output_path.display()))]
pub async fn write_digest(digest: &EventDigest, output_path: &Path) -> Result<(), Box<dyn Error>> {
    write_json(digest, output_path).await?;

    info!(
        events = digest.events.len(),
        failures = digest.failures.len(),
        "Wrote event digest"
    );
    Ok(())
}
