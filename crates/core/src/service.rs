#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExternalServiceType {
    #[serde(rename = "github")]
    GitHub,
    #[serde(rename = "gitlab")]
    GitLab,
    #[serde(rename = "bitbucketServer")]
    BitbucketServer,
    #[serde(rename = "bitbucketCloud")]
    BitbucketCloud,
    #[serde(rename = "azuredevops")]
    AzureDevOps,
    #[serde(rename = "gerrit")]
    Gerrit,
    #[serde(rename = "perforce")]
    Perforce,
}

impl ExternalServiceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::GitLab => "gitlab",
            Self::BitbucketServer => "bitbucketServer",
            Self::BitbucketCloud => "bitbucketCloud",
            Self::AzureDevOps => "azuredevops",
            Self::Gerrit => "gerrit",
            Self::Perforce => "perforce",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let lowered = value.trim().to_ascii_lowercase();
        match lowered.as_str() {
            "github" => Some(Self::GitHub),
            "gitlab" => Some(Self::GitLab),
            "bitbucketserver" => Some(Self::BitbucketServer),
            "bitbucketcloud" => Some(Self::BitbucketCloud),
            "azuredevops" => Some(Self::AzureDevOps),
            "gerrit" => Some(Self::Gerrit),
            "perforce" => Some(Self::Perforce),
            _ => None,
        }
    }

    /// Whether changesets can be opened as drafts and later undrafted.
    pub fn supports_draft(self) -> bool {
        matches!(
            self,
            Self::GitHub | Self::GitLab | Self::AzureDevOps | Self::Gerrit
        )
    }

    /// Whether pushed commits can be re-created and signed by an app
    /// installation on the code host.
    pub fn supports_commit_signing(self) -> bool {
        matches!(self, Self::GitHub)
    }
}

impl std::fmt::Display for ExternalServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
