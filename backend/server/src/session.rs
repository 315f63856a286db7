//! # Session State
//!
//! Single answer to "who is this user and where should the client send them".
//!
//! Inputs, highest precedence first:
//! 1. Stored account row (role, display name, username)
//! 2. Role recorded by the identity provider in the token's `user_metadata`
//!
//! Clients never cache or merge this themselves, they ask `/api/session` again.
use serde::Serialize;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    models::{Account, Role, Submission},
};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoleSource {
    Account,
    Token,
    None,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Next {
    ChooseRole,
    ProfileSetup,
    Submit,
    MyReviews,
    Review,
}

impl Next {
    pub fn path(&self) -> &'static str {
        match self {
            Next::ChooseRole => "/dashboard",
            Next::ProfileSetup => "/profile-setup",
            Next::Submit => "/submit",
            Next::MyReviews => "/my-reviews",
            Next::Review => "/review",
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SessionState {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub role_source: RoleSource,
    pub has_account: bool,
    pub profile_complete: bool,
    pub has_submission: bool,
    pub next: Next,
    pub redirect: &'static str,
}

/// Effective role of a user. Every role check goes through here so the API never
/// disagrees with `/api/session`.
pub fn resolve_role(user: &AuthUser, account: Option<&Account>) -> (Option<Role>, RoleSource) {
    match (account.and_then(|a| a.role), user.claims.metadata_role()) {
        (Some(role), _) => (Some(role), RoleSource::Account),
        (None, Some(role)) => (Some(role), RoleSource::Token),
        (None, None) => (None, RoleSource::None),
    }
}

pub fn reconcile(
    user: &AuthUser,
    account: Option<&Account>,
    submission: Option<&Submission>,
) -> SessionState {
    let (role, role_source) = resolve_role(user, account);

    let profile_complete = account.is_some_and(Account::is_complete);
    let has_submission = submission.is_some();

    let next = match role {
        None => Next::ChooseRole,
        Some(_) if !profile_complete => Next::ProfileSetup,
        Some(Role::Submitter) if has_submission => Next::MyReviews,
        Some(Role::Submitter) => Next::Submit,
        Some(Role::Reviewer) => Next::Review,
    };

    SessionState {
        user_id: user.id,
        email: account
            .and_then(|a| a.email.clone())
            .or_else(|| user.email.clone()),
        role,
        role_source,
        has_account: account.is_some(),
        profile_complete,
        has_submission,
        next,
        redirect: next.path(),
    }
}
