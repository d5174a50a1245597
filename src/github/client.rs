//! The platform client boundary and its GitHub implementation.

use async_trait::async_trait;
use octocrab::Octocrab;
use tracing::{debug, instrument};

use crate::types::{IssueNumber, RepoId};

use super::error::PlatformError;

/// Outbound calls modules make to the code-hosting platform.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Posts a comment on an issue or pull request.
    async fn post_comment(
        &self,
        repo: &RepoId,
        issue: IssueNumber,
        body: &str,
    ) -> Result<(), PlatformError>;

    /// Adds `login` to the issue's assignees.
    async fn assign_issue(
        &self,
        repo: &RepoId,
        issue: IssueNumber,
        login: &str,
    ) -> Result<(), PlatformError>;
}

/// GitHub REST API via octocrab.
#[derive(Clone)]
pub struct OctocrabPlatform {
    client: Octocrab,
}

impl OctocrabPlatform {
    pub fn new(client: Octocrab) -> Self {
        OctocrabPlatform { client }
    }

    /// Builds a client authenticated with a personal access token, or an
    /// anonymous one when no token is configured (reads only; writes fail).
    pub fn from_token(token: Option<&str>) -> Result<Self, PlatformError> {
        let builder = match token {
            Some(token) => Octocrab::builder().personal_token(token.to_string()),
            None => Octocrab::builder(),
        };
        let client = builder.build().map_err(PlatformError::from_octocrab)?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl PlatformClient for OctocrabPlatform {
    #[instrument(skip(self, body), fields(repo = %repo, issue = %issue))]
    async fn post_comment(
        &self,
        repo: &RepoId,
        issue: IssueNumber,
        body: &str,
    ) -> Result<(), PlatformError> {
        let comment = self
            .client
            .issues(&repo.owner, &repo.repo)
            .create_comment(issue.0, body)
            .await
            .map_err(PlatformError::from_octocrab)?;
        debug!(comment_id = %comment.id, "Posted comment");
        Ok(())
    }

    #[instrument(skip(self), fields(repo = %repo, issue = %issue))]
    async fn assign_issue(
        &self,
        repo: &RepoId,
        issue: IssueNumber,
        login: &str,
    ) -> Result<(), PlatformError> {
        self.client
            .issues(&repo.owner, &repo.repo)
            .add_assignees(issue.0, &[login])
            .await
            .map_err(PlatformError::from_octocrab)?;
        debug!(login, "Assigned issue");
        Ok(())
    }
}

impl std::fmt::Debug for OctocrabPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctocrabPlatform").finish_non_exhaustive()
    }
}
