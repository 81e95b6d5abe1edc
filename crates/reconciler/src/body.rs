#![forbid(unsafe_code)]

//! Backlink decoration of changeset bodies.

use bc_core::{BatchChange, Changeset};
use bc_storage::{Store, StoreError};

const LINK_VARIABLE: &str = "batch_change_link";

#[derive(Debug, thiserror::Error)]
pub enum DecorateError {
    #[error("changeset has no owning batch change")]
    NoOwner,
    #[error("batch change not found: {0}")]
    BatchChangeNotFound(i64),
    #[error("retrieving owning batch change: {0}")]
    Store(#[from] StoreError),
}

/// Adds a link back to the owning batch change. A body that references
/// `${{ batch_change_link }}` gets the link in place of the template;
/// any other body gets it appended.
pub fn decorate_body(
    store: &dyn Store,
    changeset: &Changeset,
    body: &str,
    external_url: &str,
) -> Result<String, DecorateError> {
    let owner = changeset
        .owned_by_batch_change_id
        .ok_or(DecorateError::NoOwner)?;
    let batch_change = store
        .get_batch_change(owner)?
        .ok_or(DecorateError::BatchChangeNotFound(owner))?;

    let link = backlink(&batch_change, external_url);
    if body.contains(LINK_VARIABLE) {
        return Ok(substitute_link(body, &link));
    }
    Ok(format!("{body}\n\n{link}"))
}

fn backlink(batch_change: &BatchChange, external_url: &str) -> String {
    format!(
        "[_Created by batch change `{}/{}`._]({})",
        batch_change.namespace_name,
        batch_change.name,
        batch_change.url(external_url)
    )
}

fn substitute_link(body: &str, link: &str) -> String {
    let mut out = String::with_capacity(body.len() + link.len());
    let mut rest = body;
    while let Some(start) = rest.find("${{") {
        let after_open = &rest[start + 3..];
        let Some(end) = after_open.find("}}") else {
            break;
        };
        out.push_str(&rest[..start]);
        if after_open[..end].trim() == LINK_VARIABLE {
            out.push_str(link);
        } else {
            out.push_str(&rest[start..start + 3 + end + 2]);
        }
        rest = &after_open[end + 2..];
    }
    out.push_str(rest);
    out
}
