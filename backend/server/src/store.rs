//! # Store
//!
//! Persistence seam for accounts, submissions, reviews and notifications.
//!
//! Two backends:
//! - [`RedisStore`](crate::database::RedisStore): production, shared between instances
//! - [`MemoryStore`]: single process, used for local runs and tests
//!
//! Ownership rules ("a user reads and writes only their own rows") are enforced by the
//! handlers. The store only guarantees the uniqueness constraints:
//! - one account per username (case-insensitive)
//! - one submission per owner
//! - one review per (reviewer, submission)
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{Account, Notification, Review, Submission},
};

#[async_trait]
pub trait Store: Send + Sync {
    async fn account(&self, id: Uuid) -> AppResult<Option<Account>>;

    async fn save_account(&self, account: &Account) -> AppResult<()>;

    /// Reserves `username` for `owner`. False when another account already holds it.
    async fn claim_username(&self, username: &str, owner: Uuid) -> AppResult<bool>;

    /// Frees `username` if `owner` holds it.
    async fn release_username(&self, username: &str, owner: Uuid) -> AppResult<()>;

    async fn submission(&self, id: Uuid) -> AppResult<Option<Submission>>;

    async fn submission_of(&self, owner: Uuid) -> AppResult<Option<Submission>>;

    /// Inserts `submission`, or replaces the text and images of the owner's existing one
    /// keeping its id and creation time. Returns what was stored.
    async fn upsert_submission(&self, submission: Submission) -> AppResult<Submission>;

    /// Every submission ordered by creation time, oldest first.
    async fn submissions_oldest_first(&self) -> AppResult<Vec<Submission>>;

    /// False when the reviewer already reviewed that submission.
    async fn insert_review(&self, review: &Review) -> AppResult<bool>;

    /// Reviews of a submission, newest first.
    async fn reviews_for(&self, profile_id: Uuid) -> AppResult<Vec<Review>>;

    /// Submission ids the reviewer has already reviewed.
    async fn reviewed_by(&self, reviewer: Uuid) -> AppResult<HashSet<Uuid>>;

    async fn push_notification(&self, notification: &Notification) -> AppResult<()>;

    /// Unread notifications of a user, newest first.
    async fn unread_notifications(&self, user: Uuid) -> AppResult<Vec<Notification>>;

    /// Marks the listed notifications of `user` read, ignoring ids owned by anyone else.
    /// Returns how many changed.
    async fn mark_read(&self, user: Uuid, ids: &[Uuid]) -> AppResult<usize>;
}

pub fn username_key(username: &str) -> String {
    username.trim().to_lowercase()
}

#[derive(Default)]
struct Tables {
    accounts: HashMap<Uuid, Account>,
    usernames: HashMap<String, Uuid>,
    submissions: HashMap<Uuid, Submission>,
    submission_owners: HashMap<Uuid, Uuid>,
    reviews: HashMap<Uuid, Review>,
    review_keys: HashSet<(Uuid, Uuid)>,
    notifications: HashMap<Uuid, Notification>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn account(&self, id: Uuid) -> AppResult<Option<Account>> {
        Ok(self.tables.read().accounts.get(&id).cloned())
    }

    async fn save_account(&self, account: &Account) -> AppResult<()> {
        self.tables
            .write()
            .accounts
            .insert(account.id, account.clone());

        Ok(())
    }

    async fn claim_username(&self, username: &str, owner: Uuid) -> AppResult<bool> {
        let mut tables = self.tables.write();
        let holder = *tables
            .usernames
            .entry(username_key(username))
            .or_insert(owner);

        Ok(holder == owner)
    }

    async fn release_username(&self, username: &str, owner: Uuid) -> AppResult<()> {
        let mut tables = self.tables.write();
        let key = username_key(username);

        if tables.usernames.get(&key) == Some(&owner) {
            tables.usernames.remove(&key);
        }

        Ok(())
    }

    async fn submission(&self, id: Uuid) -> AppResult<Option<Submission>> {
        Ok(self.tables.read().submissions.get(&id).cloned())
    }

    async fn submission_of(&self, owner: Uuid) -> AppResult<Option<Submission>> {
        let tables = self.tables.read();

        Ok(tables
            .submission_owners
            .get(&owner)
            .and_then(|id| tables.submissions.get(id))
            .cloned())
    }

    async fn upsert_submission(&self, mut submission: Submission) -> AppResult<Submission> {
        let mut tables = self.tables.write();

        let existing = tables
            .submission_owners
            .get(&submission.user_id)
            .and_then(|id| tables.submissions.get(id));

        if let Some(existing) = existing {
            submission.id = existing.id;
            submission.created_at = existing.created_at;
        }

        tables
            .submission_owners
            .insert(submission.user_id, submission.id);
        tables
            .submissions
            .insert(submission.id, submission.clone());

        Ok(submission)
    }

    async fn submissions_oldest_first(&self) -> AppResult<Vec<Submission>> {
        let mut submissions: Vec<Submission> =
            self.tables.read().submissions.values().cloned().collect();
        submissions.sort_by_key(|s| s.created_at);

        Ok(submissions)
    }

    async fn insert_review(&self, review: &Review) -> AppResult<bool> {
        let mut tables = self.tables.write();

        if !tables
            .review_keys
            .insert((review.profile_id, review.reviewer_id))
        {
            return Ok(false);
        }

        tables.reviews.insert(review.id, review.clone());

        Ok(true)
    }

    async fn reviews_for(&self, profile_id: Uuid) -> AppResult<Vec<Review>> {
        let mut reviews: Vec<Review> = self
            .tables
            .read()
            .reviews
            .values()
            .filter(|r| r.profile_id == profile_id)
            .cloned()
            .collect();
        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(reviews)
    }

    async fn reviewed_by(&self, reviewer: Uuid) -> AppResult<HashSet<Uuid>> {
        Ok(self
            .tables
            .read()
            .review_keys
            .iter()
            .filter(|(_, by)| *by == reviewer)
            .map(|(profile, _)| *profile)
            .collect())
    }

    async fn push_notification(&self, notification: &Notification) -> AppResult<()> {
        self.tables
            .write()
            .notifications
            .insert(notification.id, notification.clone());

        Ok(())
    }

    async fn unread_notifications(&self, user: Uuid) -> AppResult<Vec<Notification>> {
        let mut unread: Vec<Notification> = self
            .tables
            .read()
            .notifications
            .values()
            .filter(|n| n.user_id == user && !n.read)
            .cloned()
            .collect();
        unread.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(unread)
    }

    async fn mark_read(&self, user: Uuid, ids: &[Uuid]) -> AppResult<usize> {
        let mut tables = self.tables.write();
        let now = chrono::Utc::now();
        let mut updated = 0;

        for id in ids {
            if let Some(notification) = tables.notifications.get_mut(id) {
                if notification.user_id == user && !notification.read {
                    notification.read = true;
                    notification.updated_at = now;
                    updated += 1;
                }
            }
        }

        Ok(updated)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn usernames_are_unique_ignoring_case() {
        suite::usernames_are_unique_ignoring_case(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn upsert_keeps_one_submission_per_owner() {
        suite::upsert_keeps_one_submission_per_owner(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn concurrent_first_submissions_share_one_row() {
        suite::concurrent_first_submissions_share_one_row(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn queue_is_oldest_first() {
        suite::queue_is_oldest_first(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn reviews_are_unique_and_newest_first() {
        suite::reviews_are_unique_and_newest_first(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn mark_read_only_touches_own_notifications() {
        suite::mark_read_only_touches_own_notifications(&MemoryStore::new()).await;
    }
}
