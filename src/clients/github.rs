//! Source host REST client: repository discovery/profiling, branch and file
//! operations, pull request creation.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::clients::{CreatedPullRequest, SourceHost};
use crate::models::{Language, PullRequestRecord, Repository};

const GITHUB_API: &str = "https://api.github.com";
const USER_AGENT: &str = "autopr";
const PAGE_SIZE: u32 = 100;

/// Framework indicators looked up in dependency manifests.
const FRAMEWORK_PATTERNS: &[(&str, &[&str])] = &[
    ("React", &["react", "@types/react"]),
    ("Vue", &["vue", "@vue/"]),
    ("Angular", &["@angular/", "angular"]),
    ("Django", &["django"]),
    ("Flask", &["flask"]),
    ("Spring", &["spring-boot", "springframework"]),
    ("Express", &["express"]),
    ("FastAPI", &["fastapi"]),
    ("Next.js", &["next", "@next/"]),
];

pub struct GithubClient {
    http: reqwest::Client,
    token: String,
    org: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RepoWire {
    pub name: String,
    pub full_name: String,
    pub html_url: String,
    pub clone_url: String,
    pub default_branch: String,
    #[serde(default)]
    pub fork: bool,
    #[serde(default)]
    pub archived: bool,
}

#[derive(Debug, Deserialize)]
struct RefWire {
    object: RefObject,
}

#[derive(Debug, Deserialize)]
struct RefObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ContentWire {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    sha: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PrWire {
    pub html_url: String,
    pub number: u64,
}

/// Translate an error status into a message the run-level classifier
/// understands (authentication failed / access denied / rate limit / ...).
fn status_message(status: StatusCode, operation: &str) -> String {
    match status {
        StatusCode::UNAUTHORIZED => format!("authentication failed during {}", operation),
        StatusCode::FORBIDDEN => format!("access denied during {}", operation),
        StatusCode::TOO_MANY_REQUESTS => format!("api rate limit hit during {}", operation),
        StatusCode::SERVICE_UNAVAILABLE => format!("service unavailable during {}", operation),
        other => format!("{} failed with status {}", operation, other),
    }
}

/// Decode a base64 contents payload (the API inserts line breaks).
pub fn decode_content(encoded: &str) -> Option<String> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = BASE64.decode(compact).ok()?;
    String::from_utf8(bytes).ok()
}

/// Pick the language with the largest byte count from a histogram.
pub fn primary_language(languages: &BTreeMap<String, u64>) -> Option<Language> {
    languages
        .iter()
        .max_by_key(|(_, bytes)| **bytes)
        .and_then(|(name, _)| name.parse().ok())
}

/// Detect frameworks from a package.json's dependency tables.
pub fn frameworks_from_package_json(content: &str) -> Vec<String> {
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(content) else {
        return Vec::new();
    };
    let mut dependency_names: Vec<String> = Vec::new();
    for table in ["dependencies", "devDependencies"] {
        if let Some(deps) = parsed.get(table).and_then(|d| d.as_object()) {
            dependency_names.extend(deps.keys().cloned());
        }
    }

    let mut found = Vec::new();
    for (framework, patterns) in FRAMEWORK_PATTERNS {
        let hit = patterns.iter().any(|pattern| {
            dependency_names
                .iter()
                .any(|dep| dep == pattern || dep.starts_with(pattern))
        });
        if hit {
            found.push(framework.to_string());
        }
    }
    found
}

/// Detect frameworks from a requirements.txt.
pub fn frameworks_from_requirements(content: &str) -> Vec<String> {
    let lower = content.to_lowercase();
    let mut found = Vec::new();
    for (framework, patterns) in FRAMEWORK_PATTERNS {
        if patterns.iter().any(|p| lower.contains(&p.to_lowercase())) {
            found.push(framework.to_string());
        }
    }
    found
}

impl GithubClient {
    pub fn new(token: &str, org: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.to_string(),
            org,
        }
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
    }

    async fn list_repo_page(&self, url: &str, page: u32) -> Result<Vec<RepoWire>> {
        let response = self
            .request(reqwest::Method::GET, url)
            .query(&[
                ("per_page", PAGE_SIZE.to_string()),
                ("page", page.to_string()),
                ("sort", "updated".to_string()),
            ])
            .send()
            .await
            .context("Failed to send repository list request")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!(status_message(status, "repository listing"));
        }
        response
            .json()
            .await
            .context("Failed to parse repository list response")
    }

    async fn list_all(&self, url: &str) -> Result<Vec<RepoWire>> {
        let mut all = Vec::new();
        let mut page = 1u32;
        loop {
            let batch = self.list_repo_page(url, page).await?;
            let count = batch.len();
            all.extend(batch);
            if count < PAGE_SIZE as usize {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    async fn has_file(&self, repo_full_name: &str, path: &str) -> bool {
        let url = format!("{}/repos/{}/contents/{}", GITHUB_API, repo_full_name, path);
        match self.request(reqwest::Method::GET, &url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Profile one repository: language histogram, manifest flags, detected
    /// frameworks. Enrichment is best-effort - a failed probe leaves the
    /// corresponding default in place.
    async fn analyze_repository(&self, wire: RepoWire) -> Repository {
        let mut repo = Repository::new(
            &wire.name,
            &wire.full_name,
            &wire.html_url,
            &wire.clone_url,
            &wire.default_branch,
        );

        let languages_url = format!("{}/repos/{}/languages", GITHUB_API, wire.full_name);
        match self.request(reqwest::Method::GET, &languages_url).send().await {
            Ok(response) if response.status().is_success() => {
                if let Ok(languages) = response.json::<BTreeMap<String, u64>>().await {
                    repo.primary_language = primary_language(&languages);
                    repo.languages = languages;
                }
            }
            Ok(response) => {
                debug!(repo = %wire.full_name, status = %response.status(), "language probe failed")
            }
            Err(err) => debug!(repo = %wire.full_name, error = %err, "language probe failed"),
        }

        repo.has_package_json = self.has_file(&wire.full_name, "package.json").await;
        repo.has_requirements_txt = self.has_file(&wire.full_name, "requirements.txt").await;
        repo.has_dockerfile = self.has_file(&wire.full_name, "Dockerfile").await;
        repo.has_makefile = self.has_file(&wire.full_name, "Makefile").await;
        repo.has_ci_config = self.has_file(&wire.full_name, ".github/workflows").await;

        let mut frameworks = Vec::new();
        if repo.has_package_json {
            if let Ok(Some(content)) = self.read_file(&wire.full_name, "package.json").await {
                frameworks.extend(frameworks_from_package_json(&content));
            }
        }
        if repo.has_requirements_txt {
            if let Ok(Some(content)) = self.read_file(&wire.full_name, "requirements.txt").await {
                frameworks.extend(frameworks_from_requirements(&content));
            }
        }
        frameworks.sort();
        frameworks.dedup();
        repo.frameworks = frameworks;

        repo
    }

    async fn branch_sha(&self, repo_full_name: &str, branch: &str) -> Result<String> {
        let url = format!(
            "{}/repos/{}/git/ref/heads/{}",
            GITHUB_API, repo_full_name, branch
        );
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .context("Failed to resolve base branch ref")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!(status_message(status, "base branch lookup"));
        }
        let parsed: RefWire = response
            .json()
            .await
            .context("Failed to parse branch ref response")?;
        Ok(parsed.object.sha)
    }

    async fn file_sha(&self, repo_full_name: &str, path: &str, branch: &str) -> Option<String> {
        let url = format!("{}/repos/{}/contents/{}", GITHUB_API, repo_full_name, path);
        let response = self
            .request(reqwest::Method::GET, &url)
            .query(&[("ref", branch)])
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.json::<ContentWire>().await.ok()?.sha
    }
}

#[async_trait]
impl SourceHost for GithubClient {
    async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let mut wires = self.list_all(&format!("{}/user/repos", GITHUB_API)).await?;
        if let Some(org) = &self.org {
            let org_url = format!("{}/orgs/{}/repos", GITHUB_API, org);
            wires.extend(self.list_all(&org_url).await?);
        }

        wires.retain(|w| !w.fork && !w.archived);
        wires.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        wires.dedup_by(|a, b| a.full_name == b.full_name);

        let mut repos = Vec::with_capacity(wires.len());
        for wire in wires {
            repos.push(self.analyze_repository(wire).await);
        }
        Ok(repos)
    }

    async fn create_branch(&self, repo_full_name: &str, branch: &str, base: &str) -> Result<bool> {
        let sha = self.branch_sha(repo_full_name, base).await?;

        let url = format!("{}/repos/{}/git/refs", GITHUB_API, repo_full_name);
        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&json!({ "ref": format!("refs/heads/{}", branch), "sha": sha }))
            .send()
            .await
            .context("Failed to send branch creation request")?;

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::UNPROCESSABLE_ENTITY && body.to_lowercase().contains("already exists")
        {
            debug!(repo = repo_full_name, branch, "branch already exists, treating as success");
            return Ok(true);
        }
        if matches!(
            status,
            StatusCode::UNAUTHORIZED
                | StatusCode::FORBIDDEN
                | StatusCode::TOO_MANY_REQUESTS
                | StatusCode::SERVICE_UNAVAILABLE
        ) {
            anyhow::bail!(status_message(status, "branch creation"));
        }
        warn!(repo = repo_full_name, branch, %status, "branch creation rejected");
        Ok(false)
    }

    async fn read_file(&self, repo_full_name: &str, path: &str) -> Result<Option<String>> {
        let url = format!("{}/repos/{}/contents/{}", GITHUB_API, repo_full_name, path);
        let response = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .context("Failed to send file read request")?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            anyhow::bail!(status_message(status, "file read"));
        }

        let parsed: ContentWire = response
            .json()
            .await
            .context("Failed to parse file contents response")?;
        Ok(parsed.content.as_deref().and_then(decode_content))
    }

    async fn write_file(
        &self,
        repo_full_name: &str,
        path: &str,
        content: &str,
        commit_message: &str,
        branch: &str,
    ) -> Result<bool> {
        let existing_sha = self.file_sha(repo_full_name, path, branch).await;

        let url = format!("{}/repos/{}/contents/{}", GITHUB_API, repo_full_name, path);
        let mut payload = json!({
            "message": commit_message,
            "content": BASE64.encode(content),
            "branch": branch,
        });
        if let Some(sha) = existing_sha {
            payload["sha"] = json!(sha);
        }

        let response = self
            .request(reqwest::Method::PUT, &url)
            .json(&payload)
            .send()
            .await
            .context("Failed to send file write request")?;

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            anyhow::bail!(status_message(status, "file write"));
        }
        warn!(repo = repo_full_name, path, %status, "file write rejected");
        Ok(false)
    }

    async fn open_pull_request(
        &self,
        repo_full_name: &str,
        pr: &PullRequestRecord,
    ) -> Result<Option<CreatedPullRequest>> {
        let url = format!("{}/repos/{}/pulls", GITHUB_API, repo_full_name);
        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&json!({
                "title": pr.title,
                "body": pr.body,
                "head": pr.head_branch,
                "base": pr.base_branch,
                "draft": pr.draft,
            }))
            .send()
            .await
            .context("Failed to send pull request creation request")?;

        let status = response.status();
        if !status.is_success() {
            if matches!(
                status,
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
            ) {
                anyhow::bail!(status_message(status, "pull request creation"));
            }
            warn!(repo = repo_full_name, %status, "pull request creation rejected");
            return Ok(None);
        }

        let created: PrWire = response
            .json()
            .await
            .context("Failed to parse pull request response")?;

        if !pr.labels.is_empty() {
            let labels_url = format!(
                "{}/repos/{}/issues/{}/labels",
                GITHUB_API, repo_full_name, created.number
            );
            if let Err(err) = self
                .request(reqwest::Method::POST, &labels_url)
                .json(&json!({ "labels": pr.labels }))
                .send()
                .await
            {
                warn!(repo = repo_full_name, error = %err, "failed to apply PR labels");
            }
        }

        Ok(Some(CreatedPullRequest {
            url: created.html_url,
            number: created.number,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_wire_deserialize() {
        let json = r#"{
            "name": "acme-api",
            "full_name": "acme/acme-api",
            "html_url": "https://github.com/acme/acme-api",
            "clone_url": "https://github.com/acme/acme-api.git",
            "default_branch": "main",
            "fork": false,
            "archived": false
        }"#;
        let repo: RepoWire = serde_json::from_str(json).unwrap();
        assert_eq!(repo.full_name, "acme/acme-api");
        assert_eq!(repo.default_branch, "main");
        assert!(!repo.fork);
    }

    #[test]
    fn test_repo_wire_missing_flags_default_false() {
        let json = r#"{
            "name": "r",
            "full_name": "o/r",
            "html_url": "u",
            "clone_url": "c",
            "default_branch": "main"
        }"#;
        let repo: RepoWire = serde_json::from_str(json).unwrap();
        assert!(!repo.fork);
        assert!(!repo.archived);
    }

    #[test]
    fn test_pr_wire_deserialize() {
        let json = r#"{"html_url": "https://github.com/o/r/pull/7", "number": 7}"#;
        let pr: PrWire = serde_json::from_str(json).unwrap();
        assert_eq!(pr.number, 7);
    }

    #[test]
    fn test_decode_content_with_line_breaks() {
        // "hello world" encoded, split across lines as the API does.
        let encoded = "aGVsbG8g\nd29ybGQ=\n";
        assert_eq!(decode_content(encoded).as_deref(), Some("hello world"));
    }

    #[test]
    fn test_decode_content_invalid_base64() {
        assert!(decode_content("!!!not base64!!!").is_none());
    }

    #[test]
    fn test_primary_language_picks_largest() {
        let mut languages = BTreeMap::new();
        languages.insert("Python".to_string(), 1200u64);
        languages.insert("Rust".to_string(), 90000u64);
        languages.insert("Makefile".to_string(), 50u64);
        assert_eq!(primary_language(&languages), Some(Language::Rust));
    }

    #[test]
    fn test_primary_language_unknown_name_is_none() {
        let mut languages = BTreeMap::new();
        languages.insert("Brainfuck".to_string(), 100u64);
        assert_eq!(primary_language(&languages), None);
    }

    #[test]
    fn test_primary_language_empty_histogram() {
        assert_eq!(primary_language(&BTreeMap::new()), None);
    }

    #[test]
    fn test_frameworks_from_package_json() {
        let content = r#"{
            "dependencies": {"react": "^18.0.0", "express": "^4.18.0"},
            "devDependencies": {"@types/react": "^18.0.0"}
        }"#;
        let frameworks = frameworks_from_package_json(content);
        assert!(frameworks.contains(&"React".to_string()));
        assert!(frameworks.contains(&"Express".to_string()));
        assert!(!frameworks.contains(&"Vue".to_string()));
    }

    #[test]
    fn test_frameworks_from_package_json_malformed() {
        assert!(frameworks_from_package_json("{not json").is_empty());
    }

    #[test]
    fn test_frameworks_from_requirements() {
        let content = "Django==4.2\nfastapi>=0.100\nrequests\n";
        let frameworks = frameworks_from_requirements(content);
        assert!(frameworks.contains(&"Django".to_string()));
        assert!(frameworks.contains(&"FastAPI".to_string()));
        assert!(!frameworks.contains(&"Flask".to_string()));
    }

    #[test]
    fn test_status_message_carries_classifier_keywords() {
        assert!(status_message(StatusCode::UNAUTHORIZED, "x").contains("authentication failed"));
        assert!(status_message(StatusCode::FORBIDDEN, "x").contains("access denied"));
        assert!(status_message(StatusCode::TOO_MANY_REQUESTS, "x").contains("api rate limit"));
        assert!(status_message(StatusCode::SERVICE_UNAVAILABLE, "x").contains("service unavailable"));
    }
}
