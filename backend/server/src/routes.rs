use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Multipart, State as AxumState},
    http::HeaderMap,
    response::IntoResponse,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    analytics::{Analytics, summarize},
    auth::{AuthUser, authenticate},
    error::{AppError, AppResult},
    models::{
        ANONYMOUS_REVIEWER, Account, MAX_SUBMISSION_IMAGES, Notification, Review, Role, Submission,
    },
    session::{SessionState, reconcile, resolve_role},
    state::State,
    utils::{
        parse_json, read_form, validate_display_name, validate_feedback, validate_rating,
        validate_username,
    },
};

type AppState = AxumState<Arc<State>>;

const REVIEWERS_ONLY: &str = "Only reviewers can access this endpoint";

/// Same role `/api/session` reports, so a token-only reviewer is let in too.
async fn require_reviewer(state: &State, user: &AuthUser) -> AppResult<Option<Account>> {
    let account = state.store.account(user.id).await?;

    match resolve_role(user, account.as_ref()) {
        (Some(Role::Reviewer), _) => Ok(account),
        _ => Err(AppError::forbidden(REVIEWERS_ONLY)),
    }
}

/// Never fails, unauthenticated callers get `authenticated: false`.
pub async fn auth_status_handler(
    AxumState(state): AppState,
    headers: HeaderMap,
) -> impl IntoResponse {
    let user = match authenticate(&state, &headers) {
        Ok(user) => user,
        Err(e) => {
            return Json(json!({
                "authenticated": false,
                "error": e.to_string(),
            }));
        }
    };

    match state.store.account(user.id).await {
        Ok(account) => Json(json!({
            "authenticated": true,
            "user_id": user.id,
            "role": account.and_then(|a| a.role),
            "expires_at": user.claims.exp,
        })),
        Err(e) => {
            warn!("Could not load account {}: {e}", user.id);

            Json(json!({
                "authenticated": true,
                "user_id": user.id,
                "role": Value::Null,
                "error": "Could not verify role",
            }))
        }
    }
}

pub async fn session_handler(
    AxumState(state): AppState,
    user: AuthUser,
) -> AppResult<Json<SessionState>> {
    let account = state.store.account(user.id).await?;
    let submission = state.store.submission_of(user.id).await?;

    Ok(Json(reconcile(&user, account.as_ref(), submission.as_ref())))
}

#[derive(Deserialize)]
struct SetRole {
    role: Option<String>,
    #[serde(default, alias = "userId")]
    user_id: Option<Uuid>,
    email: Option<String>,
}

pub async fn set_role_handler(
    AxumState(state): AppState,
    user: AuthUser,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let payload: SetRole = parse_json(&body)?;

    let role: Role = payload
        .role
        .as_deref()
        .ok_or_else(|| AppError::invalid("Missing required fields: role"))?
        .parse()
        .map_err(|_| {
            AppError::invalid(r#"Invalid role: must be either "submitter" or "reviewer""#)
        })?;

    if payload.user_id.is_some_and(|id| id != user.id) {
        return Err(AppError::forbidden("You can only update your own role"));
    }

    let (mut account, operation) = match state.store.account(user.id).await? {
        Some(account) => (account, "updated"),
        None => (
            Account::new(user.id, payload.email.or_else(|| user.email.clone())),
            "inserted",
        ),
    };

    account.role = Some(role);
    account.touch();
    state.store.save_account(&account).await?;

    info!("Account {} {operation} with role {role}", user.id);

    Ok(Json(json!({
        "success": true,
        "role": role,
        "operation": operation,
    })))
}

pub async fn get_account_handler(
    AxumState(state): AppState,
    user: AuthUser,
) -> AppResult<Json<Account>> {
    state
        .store
        .account(user.id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Account not found".into()))
}

#[derive(Deserialize)]
struct UpdateAccount {
    #[serde(alias = "displayName")]
    display_name: Option<String>,
    bio: Option<String>,
}

pub async fn update_account_handler(
    AxumState(state): AppState,
    user: AuthUser,
    body: Bytes,
) -> AppResult<Json<Account>> {
    let payload: UpdateAccount = parse_json(&body)?;

    let mut account = match state.store.account(user.id).await? {
        Some(account) => account,
        None => {
            let mut account = Account::new(user.id, user.email.clone());
            account.role = Some(Role::Submitter);
            account
        }
    };

    if let Some(display_name) = payload.display_name {
        account.display_name = Some(validate_display_name(&display_name)?);
    }

    if let Some(bio) = payload.bio {
        let bio = bio.trim();
        account.bio = (!bio.is_empty()).then(|| bio.to_string());
    }

    account.touch();
    state.store.save_account(&account).await?;

    Ok(Json(account))
}

pub async fn profile_setup_handler(
    AxumState(state): AppState,
    user: AuthUser,
    multipart: Multipart,
) -> AppResult<Json<Account>> {
    let mut form = read_form(multipart).await?;

    let display_name = validate_display_name(form.text("displayName").unwrap_or_default())?;
    let username = validate_username(form.text("username").unwrap_or_default())?;
    let avatar = form.take_file("profileImage");

    if let Some(avatar) = &avatar {
        state.images.validate(avatar)?;
    }

    let mut account = state
        .store
        .account(user.id)
        .await?
        .unwrap_or_else(|| Account::new(user.id, user.email.clone()));

    if !state.store.claim_username(&username, user.id).await? {
        return Err(AppError::Conflict("Username is already taken".into()));
    }

    if let Some(avatar) = &avatar {
        match state.images.put_avatar(user.id, avatar).await {
            Ok(url) => account.profile_image_url = Some(url),
            Err(e) => {
                if account.username.as_deref() != Some(username.as_str()) {
                    state.store.release_username(&username, user.id).await?;
                }

                return Err(e);
            }
        }
    }

    let previous = account.username.replace(username.clone());
    account.display_name = Some(display_name);
    account.touch();
    state.store.save_account(&account).await?;

    if let Some(previous) = previous.filter(|previous| !previous.eq_ignore_ascii_case(&username)) {
        state.store.release_username(&previous, user.id).await?;
    }

    Ok(Json(account))
}

#[derive(Serialize)]
struct SubmittedProfile {
    success: bool,
    profile_id: Uuid,
    image_urls: Vec<String>,
}

pub async fn submit_profile_handler(
    AxumState(state): AppState,
    user: AuthUser,
    multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let mut form = read_form(multipart).await?;

    let profile_text = form.text("profileText").unwrap_or_default().trim().to_string();
    let uploads: Vec<_> = (0..MAX_SUBMISSION_IMAGES)
        .filter_map(|slot| form.take_file(&format!("image{slot}")))
        .collect();

    if uploads.is_empty() {
        return Err(AppError::invalid("At least one image is required"));
    }

    for upload in &uploads {
        state.images.validate(upload)?;
    }

    let mut image_urls = Vec::with_capacity(uploads.len());
    for (slot, upload) in uploads.iter().enumerate() {
        match state.images.put_submission_image(user.id, slot, upload).await {
            Ok(url) => image_urls.push(url),
            Err(e) => warn!("Error uploading image {slot} for {}: {e}", user.id),
        }
    }

    if image_urls.is_empty() {
        return Err(AppError::internal(std::io::Error::other("Failed to upload images")));
    }

    let now = Utc::now();
    let submission = state
        .store
        .upsert_submission(Submission {
            id: Uuid::new_v4(),
            user_id: user.id,
            profile_text,
            images: image_urls.clone(),
            created_at: now,
            updated_at: now,
        })
        .await?;

    info!("Stored submission {} for {}", submission.id, user.id);

    Ok(Json(SubmittedProfile {
        success: true,
        profile_id: submission.id,
        image_urls,
    }))
}

#[derive(Serialize)]
struct Owner {
    display_name: Option<String>,
    username: Option<String>,
}

#[derive(Serialize)]
struct ProfileToReview {
    id: Uuid,
    profile_text: String,
    images: Vec<String>,
    user_id: Uuid,
    users: Owner,
}

pub async fn profile_to_review_handler(
    AxumState(state): AppState,
    user: AuthUser,
) -> AppResult<impl IntoResponse> {
    require_reviewer(&state, &user).await?;

    let reviewed = state.store.reviewed_by(user.id).await?;

    let next = state
        .store
        .submissions_oldest_first()
        .await?
        .into_iter()
        .find(|s| s.user_id != user.id && !reviewed.contains(&s.id))
        .ok_or_else(|| AppError::Empty("No more profiles to review".into()))?;

    let owner = state.store.account(next.user_id).await?;

    let profile = ProfileToReview {
        id: next.id,
        profile_text: next.profile_text,
        images: next.images,
        user_id: next.user_id,
        users: Owner {
            display_name: owner.as_ref().and_then(|o| o.display_name.clone()),
            username: owner.and_then(|o| o.username),
        },
    };

    Ok(Json(json!({ "profile": profile })))
}

#[derive(Deserialize)]
struct SubmitReview {
    #[serde(default, alias = "profileId")]
    profile_id: Option<Uuid>,
    rating: Option<Value>,
    feedback: Option<String>,
}

pub async fn submit_review_handler(
    AxumState(state): AppState,
    user: AuthUser,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let payload: SubmitReview = parse_json(&body)?;

    let (Some(profile_id), Some(rating), Some(feedback)) = (
        payload.profile_id,
        payload.rating,
        payload.feedback.filter(|f| !f.trim().is_empty()),
    ) else {
        return Err(AppError::invalid("Profile ID, rating, and feedback are required"));
    };

    let rating = rating
        .as_i64()
        .or_else(|| rating.as_f64().filter(|r| r.fract() == 0.0).map(|r| r as i64))
        .ok_or_else(|| AppError::invalid("Rating must be an integer between 1 and 5"))
        .and_then(validate_rating)?;
    let feedback = validate_feedback(&feedback)?;

    let reviewer = require_reviewer(&state, &user).await?;

    let submission = state
        .store
        .submission(profile_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Profile not found".into()))?;

    if submission.user_id == user.id {
        return Err(AppError::forbidden("You cannot review your own profile"));
    }

    let review = Review {
        id: Uuid::new_v4(),
        profile_id,
        reviewer_id: user.id,
        reviewer_name: reviewer
            .and_then(|account| account.display_name)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| ANONYMOUS_REVIEWER.to_string()),
        rating,
        feedback,
        created_at: Utc::now(),
    };

    if !state.store.insert_review(&review).await? {
        return Err(AppError::invalid("You have already reviewed this profile"));
    }

    let notification = Notification::new_review(submission.user_id, &review);
    if let Err(e) = state.store.push_notification(&notification).await {
        warn!("Review {} stored but owner was not notified: {e}", review.id);
    }

    info!("Review {} left on {profile_id} by {}", review.id, user.id);

    Ok(Json(json!({
        "success": true,
        "review_id": review.id,
    })))
}

#[derive(Serialize)]
struct MyReviews {
    reviews: Vec<Review>,
    analytics: Analytics,
    profile_id: Uuid,
}

pub async fn my_reviews_handler(
    AxumState(state): AppState,
    user: AuthUser,
) -> AppResult<impl IntoResponse> {
    let submission = state
        .store
        .submission_of(user.id)
        .await?
        .ok_or_else(|| AppError::Empty("No profile found".into()))?;

    let reviews = state.store.reviews_for(submission.id).await?;

    Ok(Json(MyReviews {
        analytics: summarize(&reviews),
        reviews,
        profile_id: submission.id,
    }))
}

pub async fn notifications_handler(
    AxumState(state): AppState,
    user: AuthUser,
) -> AppResult<impl IntoResponse> {
    let notifications = state.store.unread_notifications(user.id).await?;

    Ok(Json(json!({
        "unread_count": notifications.len(),
        "notifications": notifications,
    })))
}

#[derive(Deserialize)]
struct MarkRead {
    #[serde(default, alias = "notificationIds")]
    notification_ids: Option<Vec<Uuid>>,
}

pub async fn mark_read_handler(
    AxumState(state): AppState,
    user: AuthUser,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let payload: MarkRead = parse_json(&body)?;

    let ids = payload
        .notification_ids
        .filter(|ids| !ids.is_empty())
        .ok_or_else(|| AppError::invalid("Invalid notification IDs"))?;

    let updated = state.store.mark_read(user.id, &ids).await?;

    Ok(Json(json!({
        "success": true,
        "updated": updated,
    })))
}
