//! [`CatalogClient`] backed by the GitHub REST API.
//!
//! Listing revisions costs one request per page of tags. The tags endpoint
//! carries no dates, so each revision is dated with its own commit lookup.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, trace};
use url::Url;

use crate::config::CatalogConfig;
use crate::effects::{CatalogClient, RemoteEntry, RemoteRelease, RemoteRevision};

const USER_AGENT: &str = concat!("dpk/", env!("CARGO_PKG_VERSION"));
const PAGE_SIZE: usize = 100;

pub struct GithubCatalog {
    client: Client,
    api: Url,
    catalog_repo: String,
    catalog_path: String,
    releases_repo: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
    commit: CommitRef,
}

#[derive(Deserialize)]
struct CommitRef {
    sha: String,
}

#[derive(Deserialize)]
struct CommitDetail {
    commit: CommitBody,
}

#[derive(Deserialize)]
struct CommitBody {
    committer: Option<Signature>,
    author: Option<Signature>,
}

#[derive(Deserialize)]
struct Signature {
    date: String,
}

#[derive(Deserialize)]
struct ContentEntry {
    #[serde(rename = "type")]
    kind: String,
    name: String,
    sha: String,
    download_url: Option<String>,
}

impl GithubCatalog {
    /// Builds a client for the configured repositories.
    ///
    /// # Errors
    /// Returns an error if the API root is not a URL or the HTTP client cannot be built.
    pub fn new(config: &CatalogConfig, timeout: Duration) -> Result<Self> {
        let api = Url::parse(&config.api_base)
            .with_context(|| format!("invalid GitHub API root '{}'", config.api_base))?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            client,
            api,
            catalog_repo: config.catalog_repo.clone(),
            catalog_path: config.catalog_path.clone(),
            releases_repo: config.releases_repo.clone(),
            token: config.token.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.api
            .join(path)
            .with_context(|| format!("invalid endpoint '{path}'"))
    }

    /// The token is only ever sent back to the API host.
    fn authorizes(&self, url: &Url) -> bool {
        url.scheme() == self.api.scheme()
            && url.host_str() == self.api.host_str()
            && url.port_or_known_default() == self.api.port_or_known_default()
    }

    fn request(&self, url: &Url) -> RequestBuilder {
        let builder = self.client.get(url.clone());
        match &self.token {
            Some(token) if self.authorizes(url) => {
                builder.header(AUTHORIZATION, format!("token {token}"))
            }
            _ => builder,
        }
    }

    fn send(&self, url: &Url) -> Result<Response> {
        trace!(%url, "GET");
        let response = self
            .request(url)
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .with_context(|| format!("request to {url} failed"))?;
        if response.status() != StatusCode::OK {
            bail!("HTTP {} for {url}", response.status());
        }
        Ok(response)
    }

    fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T> {
        self.send(url)?
            .json()
            .with_context(|| format!("unexpected response body from {url}"))
    }

    fn commit_timestamp(&self, sha: &str) -> Result<i64> {
        let url = self.endpoint(&format!("repos/{}/commits/{sha}", self.catalog_repo))?;
        let detail: CommitDetail = self.get_json(&url)?;
        let signature = detail
            .commit
            .committer
            .or(detail.commit.author)
            .ok_or_else(|| anyhow!("commit {sha} carries no date"))?;
        let date = OffsetDateTime::parse(&signature.date, &Rfc3339)
            .with_context(|| format!("invalid commit date '{}'", signature.date))?;
        i64::try_from(date.unix_timestamp_nanos() / 1_000_000)
            .with_context(|| format!("commit date out of range: {}", signature.date))
    }
}

impl CatalogClient for GithubCatalog {
    fn list_revisions(&self) -> Result<Vec<RemoteRevision>> {
        let mut tags = Vec::new();
        for page in 1.. {
            let mut url = self.endpoint(&format!("repos/{}/tags", self.catalog_repo))?;
            url.query_pairs_mut()
                .append_pair("per_page", &PAGE_SIZE.to_string())
                .append_pair("page", &page.to_string());
            let batch: Vec<TagEntry> = self.get_json(&url)?;
            let done = batch.len() < PAGE_SIZE;
            tags.extend(batch);
            if done {
                break;
            }
        }
        debug!(count = tags.len(), repo = %self.catalog_repo, "tags listed");

        Ok(tags
            .into_iter()
            .map(|tag| RemoteRevision {
                revision_hash: tag.commit.sha,
                name: tag.name,
            })
            .collect())
    }

    fn revision_timestamp(&self, revision: &str) -> Result<i64> {
        self.commit_timestamp(revision)
    }

    fn list_directory(&self, revision: &str) -> Result<Vec<RemoteEntry>> {
        let mut url = self.endpoint(&format!(
            "repos/{}/contents/{}",
            self.catalog_repo, self.catalog_path
        ))?;
        url.query_pairs_mut().append_pair("ref", revision);
        let entries: Vec<ContentEntry> = self
            .get_json(&url)
            .with_context(|| format!("{} is not a directory at {revision}", self.catalog_path))?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.kind == "file")
            .filter_map(|entry| {
                let download_url = entry.download_url?;
                Some(RemoteEntry {
                    content_hash: entry.sha,
                    name: entry.name,
                    download_url,
                })
            })
            .collect())
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let url = Url::parse(url).with_context(|| format!("invalid download url '{url}'"))?;
        let response = self.request(&url).send().with_context(|| format!("request to {url} failed"))?;
        if response.status() != StatusCode::OK {
            bail!("HTTP {} for {url}", response.status());
        }
        let bytes = response
            .bytes()
            .with_context(|| format!("failed to read body of {url}"))?;
        trace!(%url, bytes = bytes.len(), "downloaded");
        Ok(bytes.to_vec())
    }

    fn list_releases(&self) -> Result<Vec<RemoteRelease>> {
        let url = self.endpoint(&format!("repos/{}/releases", self.releases_repo))?;
        self.get_json(&url)
    }
}
