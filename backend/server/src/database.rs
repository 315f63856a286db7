//! # Redis
//!
//! RAM database backing every table.
//!
//! ## Requirements
//!
//! - Fast lookups by id, by owner and by (reviewer, submission) pair
//! - Small rows, one JSON document each
//! - Uniqueness on usernames, submissions per owner and reviews per pair, without a
//!   relational engine
//!
//! ## Implementation
//!
//! - Redis hash per table: 1 big key, then id to JSON pairs
//! - `HSETNX` on index hashes is the uniqueness check, Redis queues it atomically
//! - A review's claim and rows are written by one Lua script, a failed write never
//!   leaves a claimed pair behind
//! - Sorted sets keyed by creation time (ms) give ordering for the review queue,
//!   a submission's review history and a user's unread notifications
//!
//! | Key | Type | Content |
//! |-----|------|---------|
//! | `accounts` | hash | account id -> account |
//! | `usernames` | hash | lowercased username -> account id |
//! | `submissions` | hash | submission id -> submission |
//! | `submission_owners` | hash | owner id -> submission id |
//! | `submission_queue` | zset | submission id scored by creation time |
//! | `reviews` | hash | review id -> review |
//! | `review_keys` | hash | `<submission>:<reviewer>` -> review id |
//! | `profile_reviews:<submission>` | zset | review id scored by creation time |
//! | `reviewed:<reviewer>` | set | submission ids |
//! | `notifications:<user>` | hash | notification id -> notification |
//! | `unread:<user>` | zset | unread notification ids scored by creation time |
use std::{collections::HashSet, sync::LazyLock, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use redis::{
    AsyncCommands, Client, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Account, Notification, Review, Submission},
    store::{Store, username_key},
};

const ACCOUNTS: &str = "accounts";
const USERNAMES: &str = "usernames";
const SUBMISSIONS: &str = "submissions";
const SUBMISSION_OWNERS: &str = "submission_owners";
const SUBMISSION_QUEUE: &str = "submission_queue";
const REVIEWS: &str = "reviews";
const REVIEW_KEYS: &str = "review_keys";

/// KEYS: review_keys, reviews, profile_reviews, reviewed.
/// ARGV: pair, review id, review, created at (ms), submission id.
static INSERT_REVIEW: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
        if redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2]) == 0 then
            return 0
        end
        redis.call('HSET', KEYS[2], ARGV[2], ARGV[3])
        redis.call('ZADD', KEYS[3], ARGV[4], ARGV[2])
        redis.call('SADD', KEYS[4], ARGV[5])
        return 1
        ",
    )
});

fn profile_reviews_key(profile_id: Uuid) -> String {
    format!("profile_reviews:{profile_id}")
}

fn reviewed_key(reviewer: Uuid) -> String {
    format!("reviewed:{reviewer}")
}

fn notifications_key(user: Uuid) -> String {
    format!("notifications:{user}")
}

fn unread_key(user: Uuid) -> String {
    format!("unread:{user}")
}

fn review_pair(profile_id: Uuid, reviewer: Uuid) -> String {
    format!("{profile_id}:{reviewer}")
}

pub async fn init_redis(redis_url: &str) -> AppResult<ConnectionManager> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Duration::from_millis(100));

    let client = Client::open(redis_url)?;
    let connection_manager = client.get_connection_manager_with_config(config).await?;

    Ok(connection_manager)
}

fn encode<T: Serialize>(value: &T) -> AppResult<String> {
    serde_json::to_string(value).map_err(AppError::internal)
}

fn decode<T: DeserializeOwned>(raw: &str) -> AppResult<T> {
    serde_json::from_str(raw).map_err(AppError::internal)
}

fn decode_all<T: DeserializeOwned>(rows: Vec<Option<String>>) -> AppResult<Vec<T>> {
    rows.into_iter().flatten().map(|raw| decode(&raw)).collect()
}

fn parse_ids(raw: Vec<String>) -> Vec<Uuid> {
    raw.iter().filter_map(|id| Uuid::parse_str(id).ok()).collect()
}

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    async fn get_many<T: DeserializeOwned>(
        &self,
        key: &str,
        ids: &[String],
    ) -> AppResult<Vec<T>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.connection.clone();
        let rows: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(key)
            .arg(ids)
            .query_async(&mut conn)
            .await?;

        decode_all(rows)
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn account(&self, id: Uuid) -> AppResult<Option<Account>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.hget(ACCOUNTS, id.to_string()).await?;

        raw.map(|raw| decode(&raw)).transpose()
    }

    async fn save_account(&self, account: &Account) -> AppResult<()> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .hset(ACCOUNTS, account.id.to_string(), encode(account)?)
            .await?;

        Ok(())
    }

    async fn claim_username(&self, username: &str, owner: Uuid) -> AppResult<bool> {
        let mut conn = self.connection.clone();
        let key = username_key(username);

        let claimed: bool = conn.hset_nx(USERNAMES, &key, owner.to_string()).await?;
        if claimed {
            return Ok(true);
        }

        let holder: Option<String> = conn.hget(USERNAMES, &key).await?;

        Ok(holder.as_deref() == Some(owner.to_string().as_str()))
    }

    async fn release_username(&self, username: &str, owner: Uuid) -> AppResult<()> {
        let mut conn = self.connection.clone();
        let key = username_key(username);

        let holder: Option<String> = conn.hget(USERNAMES, &key).await?;
        if holder.as_deref() == Some(owner.to_string().as_str()) {
            let _: () = conn.hdel(USERNAMES, &key).await?;
        }

        Ok(())
    }

    async fn submission(&self, id: Uuid) -> AppResult<Option<Submission>> {
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.hget(SUBMISSIONS, id.to_string()).await?;

        raw.map(|raw| decode(&raw)).transpose()
    }

    async fn submission_of(&self, owner: Uuid) -> AppResult<Option<Submission>> {
        let mut conn = self.connection.clone();
        let id: Option<String> = conn.hget(SUBMISSION_OWNERS, owner.to_string()).await?;

        match id.and_then(|id| Uuid::parse_str(&id).ok()) {
            Some(id) => self.submission(id).await,
            None => Ok(None),
        }
    }

    async fn upsert_submission(&self, mut submission: Submission) -> AppResult<Submission> {
        let mut conn = self.connection.clone();
        let owner = submission.user_id.to_string();

        let inserted: bool = conn
            .hset_nx(SUBMISSION_OWNERS, &owner, submission.id.to_string())
            .await?;

        if !inserted {
            // The owner index is claimed before the row is written, so it may name a
            // submission that is not stored yet. Its id wins either way.
            let id: Option<String> = conn.hget(SUBMISSION_OWNERS, &owner).await?;
            if let Some(id) = id.and_then(|id| Uuid::parse_str(&id).ok()) {
                submission.id = id;
            }

            if let Some(existing) = self.submission(submission.id).await? {
                submission.created_at = existing.created_at;
            }
        }

        let id = submission.id.to_string();
        let _: () = redis::pipe()
            .atomic()
            .hset(SUBMISSIONS, &id, encode(&submission)?)
            .ignore()
            .zadd(SUBMISSION_QUEUE, &id, submission.created_at.timestamp_millis())
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(submission)
    }

    async fn submissions_oldest_first(&self) -> AppResult<Vec<Submission>> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = conn.zrange(SUBMISSION_QUEUE, 0, -1).await?;

        self.get_many(SUBMISSIONS, &ids).await
    }

    async fn insert_review(&self, review: &Review) -> AppResult<bool> {
        let mut conn = self.connection.clone();
        let inserted: bool = INSERT_REVIEW
            .key(REVIEW_KEYS)
            .key(REVIEWS)
            .key(profile_reviews_key(review.profile_id))
            .key(reviewed_key(review.reviewer_id))
            .arg(review_pair(review.profile_id, review.reviewer_id))
            .arg(review.id.to_string())
            .arg(encode(review)?)
            .arg(review.created_at.timestamp_millis())
            .arg(review.profile_id.to_string())
            .invoke_async(&mut conn)
            .await?;

        Ok(inserted)
    }

    async fn reviews_for(&self, profile_id: Uuid) -> AppResult<Vec<Review>> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = conn.zrevrange(profile_reviews_key(profile_id), 0, -1).await?;

        self.get_many(REVIEWS, &ids).await
    }

    async fn reviewed_by(&self, reviewer: Uuid) -> AppResult<HashSet<Uuid>> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = conn.smembers(reviewed_key(reviewer)).await?;

        Ok(parse_ids(ids).into_iter().collect())
    }

    async fn push_notification(&self, notification: &Notification) -> AppResult<()> {
        let mut conn = self.connection.clone();
        let id = notification.id.to_string();

        let _: () = redis::pipe()
            .atomic()
            .hset(notifications_key(notification.user_id), &id, encode(notification)?)
            .ignore()
            .zadd(
                unread_key(notification.user_id),
                &id,
                notification.created_at.timestamp_millis(),
            )
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn unread_notifications(&self, user: Uuid) -> AppResult<Vec<Notification>> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = conn.zrevrange(unread_key(user), 0, -1).await?;

        self.get_many(&notifications_key(user), &ids).await
    }

    async fn mark_read(&self, user: Uuid, ids: &[Uuid]) -> AppResult<usize> {
        let key = notifications_key(user);
        let mut fields: Vec<String> = ids.iter().map(Uuid::to_string).collect();
        fields.sort_unstable();
        fields.dedup();

        if fields.is_empty() {
            return Ok(0);
        }

        // Only ids in the caller's own unread set can be removed.
        let unread = unread_key(user);
        let mut conn = self.connection.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for field in &fields {
            pipe.zrem(&unread, field);
        }
        let removed: Vec<i64> = pipe.query_async(&mut conn).await?;

        let changed: Vec<String> = fields
            .into_iter()
            .zip(removed)
            .filter(|(_, removed)| *removed > 0)
            .map(|(field, _)| field)
            .collect();

        if changed.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut pipe = redis::pipe();
        for mut notification in self.get_many::<Notification>(&key, &changed).await? {
            notification.read = true;
            notification.updated_at = now;
            pipe.hset(&key, notification.id.to_string(), encode(&notification)?).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;

        Ok(changed.len())
    }
}
