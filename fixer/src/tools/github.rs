//! GitHub REST service and the repository tools built on it.
//!
//! One [`GitHubService`] per run, shared by the tools through an `Arc`.
//! The service returns `Result`s; the tool wrappers fold every failure
//! into a tagged outcome so nothing raises past the registry boundary.
//! Branch creation treats "already exists" as a recognized non-fatal
//! outcome, not an error.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use super::{Tool, ToolSpec};
use crate::core::types::{RunContext, ToolOutcome};

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "fixer";

/// Issue fields used to compose a goal.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubIssue {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub state: String,
    pub html_url: String,
}

#[derive(Debug, Serialize)]
struct BranchPayload {
    #[serde(rename = "ref")]
    ref_name: String,
    sha: String,
}

#[derive(Debug, Serialize)]
struct PullRequestPayload<'a> {
    title: &'a str,
    body: &'a str,
    head: &'a str,
    base: &'a str,
}

/// Blocking GitHub REST client scoped to one token.
#[derive(Debug)]
pub struct GitHubService {
    client: Client,
    token: String,
}

impl GitHubService {
    pub fn new(token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(anyhow!("GitHub token is required"));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self { client, token })
    }

    fn get(&self, url: &str) -> RequestBuilder {
        self.decorate(self.client.get(url))
    }

    fn decorate(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github.v3+json")
    }

    /// Verify the token by resolving the authenticated user.
    ///
    /// Called before planning starts; a failure here is fatal for the run.
    #[instrument(skip_all)]
    pub fn verify_auth(&self) -> Result<String> {
        let response = self
            .get(&format!("{API_BASE}/user"))
            .send()
            .context("send auth check")?;
        if !response.status().is_success() {
            return Err(anyhow!("token verification failed: {}", response.status()));
        }
        let user: Value = response.json().context("parse auth check response")?;
        let login = user["login"]
            .as_str()
            .ok_or_else(|| anyhow!("auth check response had no login"))?
            .to_string();
        debug!(login = %login, "authenticated to GitHub");
        Ok(login)
    }

    #[instrument(skip(self))]
    pub fn get_issue(&self, repository: &str, number: u64) -> Result<GitHubIssue> {
        let url = format!("{API_BASE}/repos/{repository}/issues/{number}");
        let response = self.get(&url).send().context("send issue request")?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "failed to fetch issue #{number}: {}",
                response.status()
            ));
        }
        response.json().context("parse issue response")
    }

    /// List all file paths on a branch via the recursive tree API.
    #[instrument(skip(self))]
    pub fn list_files(&self, repository: &str, branch: &str) -> Result<Vec<String>> {
        let url = format!("{API_BASE}/repos/{repository}/git/trees/{branch}?recursive=1");
        let response = self.get(&url).send().context("send tree request")?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "failed to list files on '{branch}': {}",
                response.status()
            ));
        }
        let tree: Value = response.json().context("parse tree response")?;
        let files = tree["tree"]
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| entry["type"] == "blob")
                    .filter_map(|entry| entry["path"].as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(files)
    }

    /// Fetch raw file content from a branch.
    #[instrument(skip(self))]
    pub fn read_file(&self, repository: &str, path: &str, branch: &str) -> Result<String> {
        let url = format!("{API_BASE}/repos/{repository}/contents/{path}?ref={branch}");
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github.raw+json")
            .send()
            .context("send contents request")?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "failed to read '{path}' on '{branch}': {}",
                response.status()
            ));
        }
        response.text().context("read contents response")
    }

    fn branch_exists(&self, repository: &str, branch: &str) -> Result<bool> {
        let url = format!("{API_BASE}/repos/{repository}/git/ref/heads/{branch}");
        let response = self.get(&url).send().context("send ref request")?;
        Ok(response.status().is_success())
    }

    /// Create `branch` from `base`. An existing branch is reported as a
    /// non-fatal outcome, not an error.
    #[instrument(skip(self))]
    pub fn create_branch(&self, repository: &str, base: &str, branch: &str) -> Result<String> {
        if self.branch_exists(repository, branch)? {
            warn!("branch already exists");
            return Ok(format!("Branch '{branch}' already exists"));
        }

        let url = format!("{API_BASE}/repos/{repository}/git/ref/heads/{base}");
        let response = self.get(&url).send().context("send base ref request")?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "failed to resolve base branch '{base}': {}",
                response.status()
            ));
        }
        let base_ref: Value = response.json().context("parse base ref response")?;
        let sha = base_ref["object"]["sha"]
            .as_str()
            .ok_or_else(|| anyhow!("base ref response had no sha"))?;

        let url = format!("{API_BASE}/repos/{repository}/git/refs");
        let payload = BranchPayload {
            ref_name: format!("refs/heads/{branch}"),
            sha: sha.to_string(),
        };
        let response = self
            .decorate(self.client.post(&url))
            .json(&payload)
            .send()
            .context("send create branch request")?;

        // Races with a concurrent create come back as 422 and count as
        // the branch existing.
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            warn!("branch already exists");
            return Ok(format!("Branch '{branch}' already exists"));
        }
        if !response.status().is_success() {
            return Err(anyhow!(
                "failed to create branch '{branch}': {}",
                response.status()
            ));
        }
        debug!("branch created");
        Ok(format!("Branch '{branch}' created from '{base}'"))
    }

    /// Commit new content for `path` on `branch`, creating the file if it
    /// does not exist yet.
    #[instrument(skip(self, content, commit_message))]
    pub fn update_file(
        &self,
        repository: &str,
        path: &str,
        content: &str,
        commit_message: &str,
        branch: &str,
    ) -> Result<String> {
        let url = format!("{API_BASE}/repos/{repository}/contents/{path}");

        // The contents API requires the current blob sha when replacing an
        // existing file; a 404 means we are creating it.
        let response = self
            .get(&format!("{url}?ref={branch}"))
            .send()
            .context("send current contents request")?;
        let status = response.status();
        let current_sha = if status.is_success() {
            let contents: Value = response.json().context("parse contents response")?;
            contents["sha"].as_str().map(str::to_string)
        } else if status == StatusCode::NOT_FOUND {
            None
        } else {
            return Err(anyhow!("failed to stat '{path}' on '{branch}': {status}"));
        };

        let mut payload = json!({
            "message": commit_message,
            "content": BASE64.encode(content.as_bytes()),
            "branch": branch,
        });
        if let Some(sha) = &current_sha {
            payload["sha"] = json!(sha);
        }

        let response = self
            .decorate(self.client.put(&url))
            .json(&payload)
            .send()
            .context("send update file request")?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "failed to update '{path}' on '{branch}': {}",
                response.status()
            ));
        }

        debug!(created = current_sha.is_none(), "file committed");
        if current_sha.is_none() {
            Ok(format!("File '{path}' created on branch '{branch}'"))
        } else {
            Ok(format!("File '{path}' updated on branch '{branch}'"))
        }
    }

    /// Open a pull request from `head` into `base`.
    #[instrument(skip(self, title, body))]
    pub fn create_pull_request(
        &self,
        repository: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<String> {
        let url = format!("{API_BASE}/repos/{repository}/pulls");
        let payload = PullRequestPayload {
            title,
            body,
            head,
            base,
        };
        let response = self
            .decorate(self.client.post(&url))
            .json(&payload)
            .send()
            .context("send pull request")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            // A pull request for the same head is a recognized non-fatal
            // conflict, like recreating a branch.
            if status == StatusCode::UNPROCESSABLE_ENTITY && body.contains("already exists") {
                warn!("pull request already exists");
                return Ok(format!("Pull request for '{head}' already exists"));
            }
            return Err(anyhow!("failed to create pull request: {status} - {body}"));
        }
        let pull: Value = response.json().context("parse pull request response")?;
        let html_url = pull["html_url"]
            .as_str()
            .ok_or_else(|| anyhow!("pull request response had no html_url"))?;
        debug!(url = %html_url, "pull request created");
        Ok(format!("Pull request created: {html_url}"))
    }
}

/// Compose a goal text from a fetched issue.
pub fn compose_issue_goal(issue: &GitHubIssue) -> String {
    let mut goal = format!(
        "Fix the following GitHub issue.\n\n#{} {} ({})\n",
        issue.number, issue.title, issue.state
    );
    if let Some(body) = issue
        .body
        .as_deref()
        .map(str::trim)
        .filter(|body| !body.is_empty())
    {
        goal.push_str(&format!("\n{body}\n"));
    }
    goal
}

/// Register the repository tools for one run.
pub fn register_repository_tools(
    registry: &mut super::ToolRegistry,
    service: Arc<GitHubService>,
    ctx: &RunContext,
) {
    registry.register(Box::new(ListFilesTool {
        service: service.clone(),
        repository: ctx.repository.clone(),
        base_branch: ctx.base_branch.clone(),
    }));
    registry.register(Box::new(ReadFileTool {
        service: service.clone(),
        repository: ctx.repository.clone(),
        base_branch: ctx.base_branch.clone(),
    }));
    registry.register(Box::new(CreateBranchTool {
        service: service.clone(),
        repository: ctx.repository.clone(),
        base_branch: ctx.base_branch.clone(),
    }));
    registry.register(Box::new(UpdateFileTool {
        service: service.clone(),
        repository: ctx.repository.clone(),
    }));
    registry.register(Box::new(CreatePullRequestTool {
        service,
        repository: ctx.repository.clone(),
        base_branch: ctx.base_branch.clone(),
    }));
}

fn parse_args<T: serde::de::DeserializeOwned>(args: &Value) -> std::result::Result<T, ToolOutcome> {
    serde_json::from_value(args.clone())
        .map_err(|err| ToolOutcome::failure(format!("invalid arguments: {err}")))
}

fn outcome_from(result: Result<String>) -> ToolOutcome {
    match result {
        Ok(message) => ToolOutcome::success(message),
        Err(err) => ToolOutcome::failure(format!("{err:#}")),
    }
}

/// Lists every file path on the base branch.
pub struct ListFilesTool {
    service: Arc<GitHubService>,
    repository: String,
    base_branch: String,
}

impl ListFilesTool {
    pub fn spec() -> ToolSpec {
        ToolSpec {
            name: "list_repository_files".to_string(),
            description: "List all file paths in the repository".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {},
                "additionalProperties": false
            }),
        }
    }
}

impl Tool for ListFilesTool {
    fn spec(&self) -> ToolSpec {
        Self::spec()
    }

    fn invoke(&self, _args: &Value) -> ToolOutcome {
        outcome_from(
            self.service
                .list_files(&self.repository, &self.base_branch)
                .map(|files| files.join("\n")),
        )
    }
}

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    path: String,
    branch: Option<String>,
}

/// Reads one file's content, from the base branch unless told otherwise.
pub struct ReadFileTool {
    service: Arc<GitHubService>,
    repository: String,
    base_branch: String,
}

impl ReadFileTool {
    pub fn spec() -> ToolSpec {
        ToolSpec {
            name: "read_repository_file".to_string(),
            description: "Read the content of one repository file".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "file path within the repository"},
                    "branch": {"type": "string", "description": "branch to read from (defaults to the base branch)"}
                },
                "required": ["path"],
                "additionalProperties": false
            }),
        }
    }
}

impl Tool for ReadFileTool {
    fn spec(&self) -> ToolSpec {
        Self::spec()
    }

    fn invoke(&self, args: &Value) -> ToolOutcome {
        let args: ReadFileArgs = match parse_args(args) {
            Ok(args) => args,
            Err(outcome) => return outcome,
        };
        let branch = args.branch.as_deref().unwrap_or(&self.base_branch);
        outcome_from(self.service.read_file(&self.repository, &args.path, branch))
    }
}

#[derive(Debug, Deserialize)]
struct CreateBranchArgs {
    branch: String,
}

/// Creates a branch off the base branch.
pub struct CreateBranchTool {
    service: Arc<GitHubService>,
    repository: String,
    base_branch: String,
}

impl CreateBranchTool {
    pub fn spec() -> ToolSpec {
        ToolSpec {
            name: "create_branch".to_string(),
            description: "Create a new branch from the base branch".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "branch": {"type": "string", "description": "name of the branch to create"}
                },
                "required": ["branch"],
                "additionalProperties": false
            }),
        }
    }
}

impl Tool for CreateBranchTool {
    fn spec(&self) -> ToolSpec {
        Self::spec()
    }

    fn invoke(&self, args: &Value) -> ToolOutcome {
        let args: CreateBranchArgs = match parse_args(args) {
            Ok(args) => args,
            Err(outcome) => return outcome,
        };
        outcome_from(
            self.service
                .create_branch(&self.repository, &self.base_branch, &args.branch),
        )
    }
}

#[derive(Debug, Deserialize)]
struct UpdateFileArgs {
    path: String,
    content: String,
    commit_message: String,
    branch: String,
}

/// Commits new file content on a branch.
pub struct UpdateFileTool {
    service: Arc<GitHubService>,
    repository: String,
}

impl UpdateFileTool {
    pub fn spec() -> ToolSpec {
        ToolSpec {
            name: "update_file_in_branch".to_string(),
            description: "Write new content for a file on a branch, committing the change"
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "file path within the repository"},
                    "content": {"type": "string", "description": "full new file content"},
                    "commit_message": {"type": "string", "description": "commit message for the change"},
                    "branch": {"type": "string", "description": "branch to commit to"}
                },
                "required": ["path", "content", "commit_message", "branch"],
                "additionalProperties": false
            }),
        }
    }
}

impl Tool for UpdateFileTool {
    fn spec(&self) -> ToolSpec {
        Self::spec()
    }

    fn invoke(&self, args: &Value) -> ToolOutcome {
        let args: UpdateFileArgs = match parse_args(args) {
            Ok(args) => args,
            Err(outcome) => return outcome,
        };
        outcome_from(self.service.update_file(
            &self.repository,
            &args.path,
            &args.content,
            &args.commit_message,
            &args.branch,
        ))
    }
}

#[derive(Debug, Deserialize)]
struct PullRequestArgs {
    title: String,
    body: String,
    branch: String,
}

/// Opens a pull request from a work branch into the base branch.
pub struct CreatePullRequestTool {
    service: Arc<GitHubService>,
    repository: String,
    base_branch: String,
}

impl CreatePullRequestTool {
    pub fn spec() -> ToolSpec {
        ToolSpec {
            name: "create_pull_request".to_string(),
            description: "Open a pull request from a branch into the base branch".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string", "description": "pull request title"},
                    "body": {"type": "string", "description": "pull request description"},
                    "branch": {"type": "string", "description": "branch holding the changes"}
                },
                "required": ["title", "body", "branch"],
                "additionalProperties": false
            }),
        }
    }
}

impl Tool for CreatePullRequestTool {
    fn spec(&self) -> ToolSpec {
        Self::spec()
    }

    fn invoke(&self, args: &Value) -> ToolOutcome {
        let args: PullRequestArgs = match parse_args(args) {
            Ok(args) => args,
            Err(outcome) => return outcome,
        };
        outcome_from(self.service.create_pull_request(
            &self.repository,
            &args.title,
            &args.body,
            &args.branch,
            &self.base_branch,
        ))
    }
}
