//! # Records
//!
//! Rows persisted by the [`Store`](crate::store::Store).
//!
//! - Account: one per authenticated user, holds the chosen role and public identity
//! - Submission: dating profile content (text + up to 6 images) put up for review
//! - Review: star rating + written feedback left by a reviewer on a submission
//! - Notification: message to a submission owner, currently only on new reviews
use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_SUBMISSION_IMAGES: usize = 6;
pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;
pub const ANONYMOUS_REVIEWER: &str = "Anonymous Reviewer";
pub const NEW_REVIEW: &str = "new_review";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Submitter,
    Reviewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Submitter => "submitter",
            Role::Reviewer => "reviewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitter" => Ok(Role::Submitter),
            "reviewer" => Ok(Role::Reviewer),
            _ => Err(()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Account {
    pub id: Uuid,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub display_name: Option<String>,
    pub username: Option<String>,
    pub bio: Option<String>,
    pub profile_image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(id: Uuid, email: Option<String>) -> Self {
        let now = Utc::now();

        Self {
            id,
            email,
            role: None,
            display_name: None,
            username: None,
            bio: None,
            profile_image_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Both public identity fields are filled in.
    pub fn is_complete(&self) -> bool {
        let filled =
            |field: &Option<String>| field.as_deref().is_some_and(|s| !s.trim().is_empty());

        filled(&self.display_name) && filled(&self.username)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Submission {
    pub id: Uuid,
    pub user_id: Uuid,
    pub profile_text: String,
    pub images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Review {
    pub id: Uuid,
    pub profile_id: Uuid,
    pub reviewer_id: Uuid,
    pub reviewer_name: String,
    pub rating: u8,
    pub feedback: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub message: String,
    pub kind: String,
    pub related_id: Option<Uuid>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Notification {
    pub fn new_review(owner: Uuid, review: &Review) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            user_id: owner,
            message: format!("You received a new review with rating: {}/5", review.rating),
            kind: NEW_REVIEW.to_string(),
            related_id: Some(review.id),
            read: false,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_known_values_only() {
        assert_eq!("submitter".parse::<Role>(), Ok(Role::Submitter));
        assert_eq!("reviewer".parse::<Role>(), Ok(Role::Reviewer));
        assert!("admin".parse::<Role>().is_err());
        assert!("Reviewer".parse::<Role>().is_err());
    }

    #[test]
    fn account_completion_needs_both_identity_fields() {
        let mut account = Account::new(Uuid::new_v4(), None);
        assert!(!account.is_complete());

        account.display_name = Some("Sam".into());
        assert!(!account.is_complete());

        account.username = Some("   ".into());
        assert!(!account.is_complete());

        account.username = Some("sam_1".into());
        assert!(account.is_complete());
    }

    #[test]
    fn new_review_notification_points_at_review() {
        let review = Review {
            id: Uuid::new_v4(),
            profile_id: Uuid::new_v4(),
            reviewer_id: Uuid::new_v4(),
            reviewer_name: ANONYMOUS_REVIEWER.into(),
            rating: 4,
            feedback: "Lead with the hiking photo, it is great".into(),
            created_at: Utc::now(),
        };
        let owner = Uuid::new_v4();

        let notification = Notification::new_review(owner, &review);

        assert_eq!(notification.user_id, owner);
        assert_eq!(notification.related_id, Some(review.id));
        assert_eq!(notification.kind, NEW_REVIEW);
        assert_eq!(notification.message, "You received a new review with rating: 4/5");
        assert!(!notification.read);
    }
}
