//! GitHub issues and discussions.
//!
//! [`GithubSource`] is the fetch seam used by the pipeline.
//! [`GithubClient`] implements it over the GraphQL search API:
//!
//! ```text
//! repo:{owner}/{repo} is:issue created:{first_day}..{last_day}
//! repo:{owner}/{repo} created:{first_day}..{last_day}      (type: DISCUSSION)
//! ```
//!
//! GitHub search treats both date bounds as inclusive, so the exclusive
//! window end is turned into the previous day. Search caps results at
//! 1000 per query; weekly windows stay well below that.
//!
//! The `convert_*` functions normalize raw items into [`Document`]s.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::GithubConfig;
use crate::models::{Document, RawMetadata};
use crate::partitions::TimeWindow;

/// A comment on an issue or discussion, or an accepted answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub author: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub url: String,
    pub state: String,
    pub author: Option<String>,
    pub labels: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
    /// Total comments on the issue; `comments` may hold fewer.
    pub comment_count: u64,
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discussion {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub url: String,
    pub category: Option<String>,
    pub answered: bool,
    pub answer: Option<Comment>,
    pub author: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub comment_count: u64,
    pub comments: Vec<Comment>,
}

/// Source of GitHub items for a time window.
#[async_trait]
pub trait GithubSource: Send + Sync {
    async fn get_issues(&self, window: &TimeWindow) -> Result<Vec<Issue>>;
    async fn get_discussions(&self, window: &TimeWindow) -> Result<Vec<Discussion>>;
}

/// One document per issue: title, body, then comments.
pub fn convert_issues_to_documents(issues: &[Issue]) -> Vec<Document> {
    issues
        .iter()
        .map(|issue| {
            let mut text = vec![issue.title.clone(), issue.body.clone()];
            text.extend(issue.comments.iter().map(|c| format_comment("Comment", c)));

            let mut metadata = RawMetadata::new();
            metadata.insert("source".into(), json!(issue.url));
            metadata.insert("title".into(), json!(issue.title));
            metadata.insert("number".into(), json!(issue.number));
            metadata.insert("state".into(), json!(issue.state));
            metadata.insert("author".into(), author_value(&issue.author));
            metadata.insert("labels".into(), json!(issue.labels));
            metadata.insert("created_at".into(), json!(issue.created_at));
            metadata.insert("updated_at".into(), json!(issue.updated_at));
            metadata.insert("comment_count".into(), json!(issue.comment_count));
            metadata.insert("type".into(), json!("issue"));

            Document::new(join_sections(&text), metadata)
        })
        .collect()
}

/// One document per discussion: title, body, accepted answer, then comments.
pub fn convert_discussions_to_documents(discussions: &[Discussion]) -> Vec<Document> {
    discussions
        .iter()
        .map(|d| {
            let mut text = vec![d.title.clone(), d.body.clone()];
            if let Some(answer) = &d.answer {
                text.push(format_comment("Answer", answer));
            }
            text.extend(d.comments.iter().map(|c| format_comment("Comment", c)));

            let mut metadata = RawMetadata::new();
            metadata.insert("source".into(), json!(d.url));
            metadata.insert("title".into(), json!(d.title));
            metadata.insert("number".into(), json!(d.number));
            metadata.insert("category".into(), d.category.as_ref().map_or(Value::Null, |c| json!(c)));
            metadata.insert("answered".into(), json!(d.answered));
            metadata.insert("author".into(), author_value(&d.author));
            metadata.insert("created_at".into(), json!(d.created_at));
            metadata.insert("updated_at".into(), json!(d.updated_at));
            metadata.insert("comment_count".into(), json!(d.comment_count));
            metadata.insert("type".into(), json!("discussion"));

            Document::new(join_sections(&text), metadata)
        })
        .collect()
}

fn format_comment(label: &str, comment: &Comment) -> String {
    match &comment.author {
        Some(login) => format!("{} by {}:\n{}", label, login, comment.body.trim()),
        None => format!("{}:\n{}", label, comment.body.trim()),
    }
}

fn join_sections(sections: &[String]) -> String {
    sections
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn author_value(author: &Option<String>) -> Value {
    author.as_ref().map_or(Value::Null, |a| json!(a))
}

/// Search qualifier for the inclusive day range of `window`.
pub fn created_qualifier(window: &TimeWindow) -> String {
    format!(
        "created:{}..{}",
        window.start_date().format("%Y-%m-%d"),
        window.last_date().format("%Y-%m-%d")
    )
}

// ============ GraphQL client ============

const ISSUE_QUERY: &str = r#"
query($q: String!, $first: Int!, $after: String, $comments: Int!) {
  search(query: $q, type: ISSUE, first: $first, after: $after) {
    pageInfo { hasNextPage endCursor }
    nodes {
      ... on Issue {
        number title body url state createdAt updatedAt
        author { login }
        labels(first: 20) { nodes { name } }
        comments(first: $comments) { totalCount nodes { body author { login } } }
      }
    }
  }
}"#;

const DISCUSSION_QUERY: &str = r#"
query($q: String!, $first: Int!, $after: String, $comments: Int!) {
  search(query: $q, type: DISCUSSION, first: $first, after: $after) {
    pageInfo { hasNextPage endCursor }
    nodes {
      ... on Discussion {
        number title body url createdAt updatedAt isAnswered
        author { login }
        category { name }
        answer { body author { login } }
        comments(first: $comments) { totalCount nodes { body author { login } } }
      }
    }
  }
}"#;

/// GitHub GraphQL client. Requires `GITHUB_TOKEN`.
pub struct GithubClient {
    client: reqwest::Client,
    api_url: String,
    token: String,
    owner: String,
    repo: String,
    page_size: u32,
    max_comments: u32,
}

impl GithubClient {
    pub fn from_config(config: &GithubConfig) -> Result<Self> {
        let token = std::env::var("GITHUB_TOKEN")
            .map_err(|_| anyhow!("GITHUB_TOKEN environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("knowledge-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build GitHub HTTP client")?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            token,
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            page_size: config.page_size,
            max_comments: config.max_comments,
        })
    }

    /// Run a search query to exhaustion, returning every matching node.
    async fn search<N: DeserializeOwned>(&self, query: &str, search: &str) -> Result<Vec<N>> {
        let mut nodes = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let body = json!({
                "query": query,
                "variables": {
                    "q": search,
                    "first": self.page_size,
                    "after": after,
                    "comments": self.max_comments,
                }
            });
            let resp = self
                .client
                .post(&self.api_url)
                .bearer_auth(&self.token)
                .json(&body)
                .send()
                .await
                .context("GitHub GraphQL request failed")?;
            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                bail!("GitHub API error {}: {}", status, text);
            }
            let page: GraphqlResponse = resp
                .json()
                .await
                .context("failed to parse GitHub GraphQL response")?;
            let search = page.into_search()?;

            let count = search.nodes.len();
            for node in search.nodes {
                // Results of other types come back as empty objects.
                if node.as_object().is_some_and(|o| o.is_empty()) {
                    continue;
                }
                nodes.push(serde_json::from_value(node).context("unexpected GitHub search node")?);
            }
            debug!(page_items = count, total = nodes.len(), "fetched GitHub search page");

            match (search.page_info.has_next_page, search.page_info.end_cursor) {
                (true, Some(cursor)) => after = Some(cursor),
                _ => break,
            }
        }

        Ok(nodes)
    }
}

#[async_trait]
impl GithubSource for GithubClient {
    async fn get_issues(&self, window: &TimeWindow) -> Result<Vec<Issue>> {
        let search = format!(
            "repo:{}/{} is:issue {}",
            self.owner,
            self.repo,
            created_qualifier(window)
        );
        info!(%search, "fetching GitHub issues");
        let nodes: Vec<IssueNode> = self.search(ISSUE_QUERY, &search).await?;
        Ok(nodes.into_iter().map(Issue::from).collect())
    }

    async fn get_discussions(&self, window: &TimeWindow) -> Result<Vec<Discussion>> {
        let search = format!(
            "repo:{}/{} {}",
            self.owner,
            self.repo,
            created_qualifier(window)
        );
        info!(%search, "fetching GitHub discussions");
        let nodes: Vec<DiscussionNode> = self.search(DISCUSSION_QUERY, &search).await?;
        Ok(nodes.into_iter().map(Discussion::from).collect())
    }
}

// ============ GraphQL response shapes ============

#[derive(Deserialize)]
struct GraphqlResponse {
    data: Option<SearchData>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

impl GraphqlResponse {
    fn into_search(self) -> Result<SearchConnection> {
        if let Some(first) = self.errors.first() {
            bail!("GitHub GraphQL error: {}", first.message);
        }
        self.data
            .map(|d| d.search)
            .ok_or_else(|| anyhow!("GitHub GraphQL response has no data"))
    }
}

#[derive(Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Deserialize)]
struct SearchData {
    search: SearchConnection,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchConnection {
    page_info: PageInfo,
    #[serde(default)]
    nodes: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

/// GitHub returns `null` for empty bodies.
fn nullable_string<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
struct Actor {
    login: String,
}

#[derive(Deserialize)]
struct LabelNode {
    name: String,
}

#[derive(Deserialize)]
struct Labels {
    #[serde(default)]
    nodes: Vec<LabelNode>,
}

#[derive(Deserialize)]
struct CommentNode {
    #[serde(default, deserialize_with = "nullable_string")]
    body: String,
    author: Option<Actor>,
}

impl From<CommentNode> for Comment {
    fn from(node: CommentNode) -> Self {
        Comment {
            author: node.author.map(|a| a.login),
            body: node.body,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Comments {
    #[serde(default)]
    total_count: u64,
    #[serde(default)]
    nodes: Vec<CommentNode>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueNode {
    number: u64,
    title: String,
    #[serde(default, deserialize_with = "nullable_string")]
    body: String,
    url: String,
    state: String,
    created_at: String,
    updated_at: String,
    author: Option<Actor>,
    labels: Option<Labels>,
    comments: Option<Comments>,
}

impl From<IssueNode> for Issue {
    fn from(node: IssueNode) -> Self {
        let comments = node.comments.unwrap_or(Comments {
            total_count: 0,
            nodes: Vec::new(),
        });
        Issue {
            number: node.number,
            title: node.title,
            body: node.body,
            url: node.url,
            state: node.state,
            author: node.author.map(|a| a.login),
            labels: node
                .labels
                .map(|l| l.nodes.into_iter().map(|n| n.name).collect())
                .unwrap_or_default(),
            created_at: node.created_at,
            updated_at: node.updated_at,
            comment_count: comments.total_count,
            comments: comments.nodes.into_iter().map(Comment::from).collect(),
        }
    }
}

#[derive(Deserialize)]
struct CategoryNode {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DiscussionNode {
    number: u64,
    title: String,
    #[serde(default, deserialize_with = "nullable_string")]
    body: String,
    url: String,
    created_at: String,
    updated_at: String,
    #[serde(default)]
    is_answered: Option<bool>,
    author: Option<Actor>,
    category: Option<CategoryNode>,
    answer: Option<CommentNode>,
    comments: Option<Comments>,
}

impl From<DiscussionNode> for Discussion {
    fn from(node: DiscussionNode) -> Self {
        let comments = node.comments.unwrap_or(Comments {
            total_count: 0,
            nodes: Vec::new(),
        });
        Discussion {
            number: node.number,
            title: node.title,
            body: node.body,
            url: node.url,
            category: node.category.map(|c| c.name),
            answered: node.is_answered.unwrap_or(false),
            answer: node.answer.map(Comment::from),
            author: node.author.map(|a| a.login),
            created_at: node.created_at,
            updated_at: node.updated_at,
            comment_count: comments.total_count,
            comments: comments.nodes.into_iter().map(Comment::from).collect(),
        }
    }
}
