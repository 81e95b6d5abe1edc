#![forbid(unsafe_code)]

use crate::service::ExternalServiceType;
use serde::{Deserialize, Serialize};

/// A repository on a code host. Under fork workflows the repo a changeset
/// is opened against and the repo its branch is pushed to may differ.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    pub id: i64,
    pub name: String,
    pub external_service_type: ExternalServiceType,
    /// Clone URL used for pushes.
    pub clone_url: String,
    pub archived: bool,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}
