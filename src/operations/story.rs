//! Story, chapter, comment and vote operations.
//!
//! Each operation is one pipeline, built once and run per request with the
//! request's arguments. Ids and timestamps are generated before the run so
//! every step of one execution sees the same values.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use super::timestamp;
use super::validation::{require_content, require_id};
use crate::config::OperationsConfig;
use crate::interfaces::{
    field_equals, field_greater_than, item_not_exists, Attributes, ConflictReason, ItemKey,
    Precondition, QueryRequest, UpdateOp,
};
use crate::keys;
use crate::pipeline::{
    increment, CheckNotExists, ExecutionReport, FailurePolicy, Finish, GetItem, Identity,
    Pipeline, PipelineError, PipelineExecutionContext, PipelineExecutor, PutItem, QueryItems,
    RetryPolicy, StashKey, UpdateItem, ValidationError,
};

const STORY: StashKey<Value> = StashKey::new("story");
const FIRST_CHAPTER: StashKey<Value> = StashKey::new("firstChapter");
const PARENT_COMMENT: StashKey<Value> = StashKey::new("parentComment");
const PARENT_CHAPTER: StashKey<Value> = StashKey::new("parentChapter");

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStory {
    pub story_id: String,
    pub title: String,
    /// Text of the opening chapter.
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteOnChapter {
    pub story_id: String,
    pub chapter_id: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateComment {
    pub story_id: String,
    pub chapter_id: String,
    pub parent_id: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBranch {
    pub story_id: String,
    pub parent_chapter_id: String,
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditComment {
    pub story_id: String,
    pub comment_id: String,
    pub content: String,
}

fn arg<'a>(ctx: &'a PipelineExecutionContext, name: &str) -> Result<&'a str, PipelineError> {
    ctx.require_str(name)
}

fn object(value: Value) -> Result<Attributes, PipelineError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(PipelineError::invalid(format!(
            "expected attribute map, got {}",
            other
        ))),
    }
}

/// Depth one below the stashed parent, zero without a parent.
fn child_depth(
    ctx: &PipelineExecutionContext,
    parent: &StashKey<Value>,
) -> Result<i64, PipelineError> {
    Ok(ctx
        .stash
        .get_typed(parent)?
        .and_then(|p| p.get("depth").and_then(Value::as_i64))
        .map_or(0, |depth| depth + 1))
}

fn no_parent(ctx: &PipelineExecutionContext) -> bool {
    ctx.argument_str("parentId").is_none()
}

/// Serialize request arguments and add generated values.
fn arguments<T: Serialize>(
    input: &T,
    generated: impl IntoIterator<Item = (&'static str, Value)>,
) -> Result<Value, PipelineError> {
    let mut args =
        object(serde_json::to_value(input).map_err(|e| PipelineError::invalid(e.to_string()))?)?;
    for (name, value) in generated {
        args.insert(name.to_string(), value);
    }
    Ok(Value::Object(args))
}

fn create_story_pipeline() -> Pipeline {
    Pipeline::new("create_story")
        .step(
            PutItem::new(
                "create_story",
                FailurePolicy::Hard,
                |ctx| Ok(keys::story(arg(ctx, "storyId")?)),
                |ctx| {
                    let story_id = arg(ctx, "storyId")?;
                    let now = arg(ctx, "now")?;
                    let mut attributes = object(json!({
                        "storyId": story_id,
                        "title": arg(ctx, "title")?,
                        "authorId": ctx.identity.subject_id,
                        "rootChapterId": arg(ctx, "chapterId")?,
                        "createdAt": now,
                        "stats": { "commentCount": 0 },
                    }))?;
                    attributes.insert(
                        keys::LISTING_PARTITION_ATTRIBUTE.to_string(),
                        json!(keys::STORIES_PARTITION),
                    );
                    attributes.insert(
                        keys::LISTING_SORT_ATTRIBUTE.to_string(),
                        json!(keys::listing_sort_key(now, story_id)),
                    );
                    Ok(attributes)
                },
            )
            .when(Precondition::new(
                item_not_exists(),
                ConflictReason::ALREADY_EXISTS,
            ))
            .stash_as(STORY.name()),
        )
        .step(
            PutItem::new(
                "create_first_chapter",
                FailurePolicy::Hard,
                |ctx| Ok(keys::chapter(arg(ctx, "storyId")?, arg(ctx, "chapterId")?)),
                |ctx| {
                    object(json!({
                        "chapterId": arg(ctx, "chapterId")?,
                        "storyId": arg(ctx, "storyId")?,
                        "title": arg(ctx, "title")?,
                        "content": arg(ctx, "content")?,
                        "authorId": ctx.identity.subject_id,
                        "depth": 0,
                        "createdAt": arg(ctx, "now")?,
                        "stats": { "upvotes": 0, "childBranches": 0 },
                    }))
                },
            )
            .when(Precondition::new(
                item_not_exists(),
                ConflictReason::ALREADY_EXISTS,
            ))
            .stash_as(FIRST_CHAPTER.name()),
        )
        .step(Finish::new("respond", |ctx| {
            json!({
                "story": ctx.stash.get(STORY.name()),
                "chapter": ctx.stash.get(FIRST_CHAPTER.name()),
            })
        }))
}

fn vote_pipeline() -> Pipeline {
    let vote_key = |ctx: &PipelineExecutionContext| -> Result<ItemKey, PipelineError> {
        Ok(keys::vote(
            &ctx.identity.subject_id,
            arg(ctx, "chapterId")?,
        ))
    };

    Pipeline::new("vote_on_chapter")
        .step(CheckNotExists::new(
            "check_vote",
            ConflictReason::DUPLICATE_VOTE,
            vote_key,
        ))
        .step(
            PutItem::new("create_vote", FailurePolicy::Hard, vote_key, |ctx| {
                object(json!({
                    "storyId": arg(ctx, "storyId")?,
                    "chapterId": arg(ctx, "chapterId")?,
                    "userId": ctx.identity.subject_id,
                    "createdAt": arg(ctx, "now")?,
                }))
            })
            .when(Precondition::new(
                item_not_exists(),
                ConflictReason::DUPLICATE_VOTE,
            )),
        )
        .step(
            increment(
                "increment_upvotes",
                |ctx| Ok(keys::chapter(arg(ctx, "storyId")?, arg(ctx, "chapterId")?)),
                "stats.upvotes",
            )
            .only_if_exists(),
        )
}

fn comment_pipeline() -> Pipeline {
    Pipeline::new("create_comment")
        .step(
            GetItem::new("fetch_parent", FailurePolicy::Hard, |ctx| {
                Ok(keys::comment(arg(ctx, "storyId")?, arg(ctx, "parentId")?))
            })
            .skip_when(no_parent)
            .stash_as(PARENT_COMMENT.name()),
        )
        .step(
            PutItem::new(
                "create_comment",
                FailurePolicy::Hard,
                |ctx| Ok(keys::comment(arg(ctx, "storyId")?, arg(ctx, "commentId")?)),
                |ctx| {
                    let mut attributes = object(json!({
                        "commentId": arg(ctx, "commentId")?,
                        "storyId": arg(ctx, "storyId")?,
                        "chapterId": arg(ctx, "chapterId")?,
                        "authorId": ctx.identity.subject_id,
                        "content": arg(ctx, "content")?,
                        "depth": child_depth(ctx, &PARENT_COMMENT)?,
                        "createdAt": arg(ctx, "now")?,
                        "editableUntil": arg(ctx, "editableUntil")?,
                        "stats": { "replyCount": 0 },
                    }))?;
                    if let Some(parent_id) = ctx.argument_str("parentId") {
                        attributes.insert("parentId".to_string(), json!(parent_id));
                    }
                    Ok(attributes)
                },
            )
            .when(Precondition::new(
                item_not_exists(),
                ConflictReason::ALREADY_EXISTS,
            )),
        )
        .step(
            increment(
                "update_parent_counters",
                |ctx| Ok(keys::comment(arg(ctx, "storyId")?, arg(ctx, "parentId")?)),
                "stats.replyCount",
            )
            .skip_when(no_parent)
            .only_if_exists(),
        )
        .step(
            increment(
                "increment_story_total",
                |ctx| Ok(keys::story(arg(ctx, "storyId")?)),
                "stats.commentCount",
            )
            .only_if_exists(),
        )
}

fn branch_pipeline() -> Pipeline {
    Pipeline::new("create_branch")
        .step(
            GetItem::new("fetch_parent_chapter", FailurePolicy::Hard, |ctx| {
                Ok(keys::chapter(
                    arg(ctx, "storyId")?,
                    arg(ctx, "parentChapterId")?,
                ))
            })
            .stash_as(PARENT_CHAPTER.name()),
        )
        .step(
            PutItem::new(
                "create_chapter",
                FailurePolicy::Hard,
                |ctx| Ok(keys::chapter(arg(ctx, "storyId")?, arg(ctx, "chapterId")?)),
                |ctx| {
                    object(json!({
                        "chapterId": arg(ctx, "chapterId")?,
                        "storyId": arg(ctx, "storyId")?,
                        "parentChapterId": arg(ctx, "parentChapterId")?,
                        "title": arg(ctx, "title")?,
                        "content": arg(ctx, "content")?,
                        "authorId": ctx.identity.subject_id,
                        "depth": child_depth(ctx, &PARENT_CHAPTER)?,
                        "createdAt": arg(ctx, "now")?,
                        "stats": { "upvotes": 0, "childBranches": 0 },
                    }))
                },
            )
            .when(Precondition::new(
                item_not_exists(),
                ConflictReason::ALREADY_EXISTS,
            )),
        )
        .step(
            increment(
                "increment_parent_child_count",
                |ctx| {
                    Ok(keys::chapter(
                        arg(ctx, "storyId")?,
                        arg(ctx, "parentChapterId")?,
                    ))
                },
                "stats.childBranches",
            )
            .only_if_exists(),
        )
}

fn edit_comment_pipeline() -> Pipeline {
    Pipeline::new("edit_comment").step(
        UpdateItem::new(
            "update_comment",
            FailurePolicy::Hard,
            |ctx| Ok(keys::comment(arg(ctx, "storyId")?, arg(ctx, "commentId")?)),
            |ctx| {
                Ok(vec![
                    UpdateOp::set("content", arg(ctx, "content")?),
                    UpdateOp::set("editedAt", arg(ctx, "now")?),
                ])
            },
        )
        .when_with(|ctx| {
            Ok(Precondition::new(
                field_equals("authorId", ctx.identity.subject_id.as_str()),
                ConflictReason::NOT_AUTHOR,
            )
            .and(
                field_greater_than("editableUntil", arg(ctx, "now")?),
                ConflictReason::EDIT_WINDOW_EXPIRED,
            ))
        }),
    )
}

fn page_request(ctx: &PipelineExecutionContext, request: QueryRequest) -> QueryRequest {
    let limit = ctx
        .argument("limit")
        .and_then(Value::as_u64)
        .map_or(crate::interfaces::DEFAULT_QUERY_LIMIT, |l| l as usize);
    request
        .with_limit(limit)
        .after(ctx.argument_str("continuationToken").map(str::to_string))
}

fn list_comments_pipeline(retry: RetryPolicy) -> Pipeline {
    Pipeline::new("list_story_comments").step(
        QueryItems::new("query_comments", FailurePolicy::Hard, |ctx| {
            let request = QueryRequest::partition(keys::story_partition(arg(ctx, "storyId")?))
                .with_prefix(keys::COMMENT_PREFIX);
            Ok(page_request(ctx, request))
        })
        .with_retry(retry),
    )
}

fn list_stories_pipeline(retry: RetryPolicy) -> Pipeline {
    Pipeline::new("list_stories").step(
        QueryItems::new("query_stories", FailurePolicy::Hard, |ctx| {
            let request = QueryRequest::partition(keys::STORIES_PARTITION)
                .on_index(keys::LISTING_INDEX)
                .descending();
            Ok(page_request(ctx, request))
        })
        .with_retry(retry),
    )
}

/// Entry point for the collaborative-fiction write and list operations.
pub struct StoryOperations {
    executor: PipelineExecutor,
    config: OperationsConfig,
    create_story: Pipeline,
    vote: Pipeline,
    comment: Pipeline,
    branch: Pipeline,
    edit_comment: Pipeline,
    list_comments: Pipeline,
    list_stories: Pipeline,
}

impl StoryOperations {
    pub fn new(executor: PipelineExecutor, config: OperationsConfig) -> Self {
        let retry = RetryPolicy::from_settings(&config.read_retry);
        Self {
            executor,
            create_story: create_story_pipeline(),
            vote: vote_pipeline(),
            comment: comment_pipeline(),
            branch: branch_pipeline(),
            edit_comment: edit_comment_pipeline(),
            list_comments: list_comments_pipeline(retry.clone()),
            list_stories: list_stories_pipeline(retry),
            config,
        }
    }

    pub fn config(&self) -> &OperationsConfig {
        &self.config
    }

    async fn run(
        &self,
        pipeline: &Pipeline,
        identity: Identity,
        arguments: Value,
    ) -> ExecutionReport {
        let ctx = PipelineExecutionContext::new(identity, arguments);
        let report = self.executor.execute(pipeline, ctx).await;
        if !report.degraded_steps().is_empty() {
            info!(
                operation = pipeline.name(),
                degraded = ?report.degraded_steps(),
                "Operation completed with degraded steps"
            );
        }
        report
    }

    /// Create a story with its opening chapter.
    pub async fn create_story(
        &self,
        identity: Identity,
        input: CreateStory,
    ) -> Result<ExecutionReport, PipelineError> {
        require_id("subjectId", &identity.subject_id)?;
        require_id("storyId", &input.story_id)?;
        require_content("title", &input.title, self.config.max_content_length)?;
        require_content("content", &input.content, self.config.max_content_length)?;

        let args = arguments(
            &input,
            [
                ("chapterId", json!(Uuid::new_v4().to_string())),
                ("now", json!(timestamp(Utc::now()))),
            ],
        )?;
        Ok(self.run(&self.create_story, identity, args).await)
    }

    /// Record one vote per user and chapter and bump the chapter's tally.
    pub async fn vote_on_chapter(
        &self,
        identity: Identity,
        input: VoteOnChapter,
    ) -> Result<ExecutionReport, PipelineError> {
        require_id("subjectId", &identity.subject_id)?;
        require_id("storyId", &input.story_id)?;
        require_id("chapterId", &input.chapter_id)?;

        let args = arguments(&input, [("now", json!(timestamp(Utc::now())))])?;
        Ok(self.run(&self.vote, identity, args).await)
    }

    /// Create a comment, optionally as a reply, and update counters.
    pub async fn create_comment(
        &self,
        identity: Identity,
        input: CreateComment,
    ) -> Result<ExecutionReport, PipelineError> {
        require_id("subjectId", &identity.subject_id)?;
        require_id("storyId", &input.story_id)?;
        require_id("chapterId", &input.chapter_id)?;
        if let Some(parent_id) = &input.parent_id {
            require_id("parentId", parent_id)?;
        }
        require_content("content", &input.content, self.config.max_content_length)?;

        let now = Utc::now();
        let editable_until = self
            .config
            .edit_window()
            .and_then(|window| now.checked_add_signed(window))
            .ok_or_else(|| PipelineError::invalid("edit window out of range"))?;
        let args = arguments(
            &input,
            [
                ("commentId", json!(Uuid::new_v4().to_string())),
                ("now", json!(timestamp(now))),
                ("editableUntil", json!(timestamp(editable_until))),
            ],
        )?;
        Ok(self.run(&self.comment, identity, args).await)
    }

    /// Branch a new chapter off an existing one.
    pub async fn create_branch(
        &self,
        identity: Identity,
        input: CreateBranch,
    ) -> Result<ExecutionReport, PipelineError> {
        require_id("subjectId", &identity.subject_id)?;
        require_id("storyId", &input.story_id)?;
        require_id("parentChapterId", &input.parent_chapter_id)?;
        require_content("title", &input.title, self.config.max_content_length)?;
        require_content("content", &input.content, self.config.max_content_length)?;

        let args = arguments(
            &input,
            [
                ("chapterId", json!(Uuid::new_v4().to_string())),
                ("now", json!(timestamp(Utc::now()))),
            ],
        )?;
        Ok(self.run(&self.branch, identity, args).await)
    }

    /// Replace a comment's content; only its author, only inside the edit
    /// window measured against `now`.
    pub async fn edit_comment(
        &self,
        identity: Identity,
        input: EditComment,
        now: DateTime<Utc>,
    ) -> Result<ExecutionReport, PipelineError> {
        require_id("subjectId", &identity.subject_id)?;
        require_id("storyId", &input.story_id)?;
        require_id("commentId", &input.comment_id)?;
        require_content("content", &input.content, self.config.max_content_length)?;

        let args = arguments(&input, [("now", json!(timestamp(now)))])?;
        Ok(self.run(&self.edit_comment, identity, args).await)
    }

    /// One page of a story's comments in sort-key order.
    pub async fn list_story_comments(
        &self,
        identity: Identity,
        story_id: &str,
        limit: usize,
        continuation_token: Option<String>,
    ) -> Result<ExecutionReport, PipelineError> {
        require_id("storyId", story_id)?;
        require_limit(limit)?;
        let args = json!({
            "storyId": story_id,
            "limit": limit,
            "continuationToken": continuation_token,
        });
        Ok(self.run(&self.list_comments, identity, args).await)
    }

    /// One page of all stories, newest first.
    pub async fn list_stories(
        &self,
        identity: Identity,
        limit: usize,
        continuation_token: Option<String>,
    ) -> Result<ExecutionReport, PipelineError> {
        require_limit(limit)?;
        let args = json!({
            "limit": limit,
            "continuationToken": continuation_token,
        });
        Ok(self.run(&self.list_stories, identity, args).await)
    }
}

fn require_limit(limit: usize) -> Result<(), ValidationError> {
    if limit == 0 {
        return Err(ValidationError::new("limit", "must be positive"));
    }
    Ok(())
}
