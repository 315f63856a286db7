use std::{sync::Arc, time::Duration};

use axum::http::StatusCode;
use axum_test::{
    TestResponse, TestServer,
    multipart::{MultipartForm, Part},
};
use chrono::Utc;
use serde_json::{Value, json};
use server::{
    auth::{Claims, UserMetadata, issue_token},
    config::{Config, StoreBackend},
    create_router,
    state::State,
    store::MemoryStore,
};
use tempfile::TempDir;
use uuid::Uuid;

const SECRET: &str = "integration-secret";
const FEEDBACK: &str = "Your first photo is great, the bio could use a hook";
const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

struct Harness {
    server: TestServer,
    _uploads: TempDir,
}

impl Harness {
    async fn new() -> Self {
        let uploads = tempfile::tempdir().expect("tempdir");
        let config = Config {
            port: 0,
            store_backend: StoreBackend::Memory,
            redis_url: String::new(),
            upload_dir: uploads.path().to_path_buf(),
            public_url: "http://test.local".into(),
            frontend_origin: "http://localhost:3000".into(),
            max_image_bytes: 64 * 1024,
            jwt_secret: SECRET.into(),
        };

        let state = State::with_store(config, Arc::new(MemoryStore::new()))
            .await
            .expect("app state");
        let server = TestServer::new(create_router(state)).unwrap();

        Self {
            server,
            _uploads: uploads,
        }
    }

    async fn get(&self, path: &str, user: Uuid) -> TestResponse {
        self.server
            .get(path)
            .authorization_bearer(token(user, None))
            .await
    }

    async fn post(&self, path: &str, user: Uuid, body: Value) -> TestResponse {
        self.server
            .post(path)
            .authorization_bearer(token(user, None))
            .json(&body)
            .await
    }

    async fn multipart(&self, path: &str, user: Uuid, form: MultipartForm) -> TestResponse {
        self.server
            .post(path)
            .authorization_bearer(token(user, None))
            .multipart(form)
            .await
    }

    async fn set_role(&self, user: Uuid, role: &str) {
        self.post("/api/set-user-role", user, json!({ "role": role }))
            .await
            .assert_status_ok();
    }

    async fn setup_identity(&self, user: Uuid, display_name: &str, username: &str) {
        let form = MultipartForm::new()
            .add_text("displayName", display_name)
            .add_text("username", username);

        self.multipart("/api/profile-setup", user, form)
            .await
            .assert_status_ok();
    }

    async fn submitter(&self, display_name: &str, username: &str) -> (Uuid, Uuid) {
        let user = Uuid::new_v4();
        self.set_role(user, "submitter").await;
        self.setup_identity(user, display_name, username).await;

        let response = self
            .multipart("/api/submit-profile", user, submission_form("Hiking, coffee, bad puns", 1))
            .await;
        response.assert_status_ok();

        let profile_id = response.json::<Value>()["profile_id"]
            .as_str()
            .and_then(|id| Uuid::parse_str(id).ok())
            .expect("profile id");

        tokio::time::sleep(Duration::from_millis(2)).await;

        (user, profile_id)
    }

    async fn reviewer(&self, display_name: Option<&str>) -> Uuid {
        let user = Uuid::new_v4();
        self.set_role(user, "reviewer").await;

        if let Some(display_name) = display_name {
            self.server
                .put("/api/account")
                .authorization_bearer(token(user, None))
                .json(&json!({ "display_name": display_name }))
                .await
                .assert_status_ok();
        }

        user
    }

    async fn review(&self, reviewer: Uuid, profile_id: Uuid, rating: i64) -> TestResponse {
        self.post(
            "/api/submit-review",
            reviewer,
            json!({ "profileId": profile_id, "rating": rating, "feedback": FEEDBACK }),
        )
        .await
    }
}

fn token(user: Uuid, metadata_role: Option<&str>) -> String {
    let claims = Claims {
        sub: user.to_string(),
        email: Some(format!("{user}@example.com")),
        exp: (Utc::now().timestamp() + 3600) as u64,
        user_metadata: UserMetadata {
            role: metadata_role.map(str::to_string),
        },
    };

    issue_token(SECRET, &claims).unwrap()
}

fn image(name: &str, mime: &str) -> Part {
    Part::bytes(PNG.to_vec()).file_name(name).mime_type(mime)
}

fn submission_form(text: &str, images: usize) -> MultipartForm {
    (0..images).fold(
        MultipartForm::new().add_text("profileText", text),
        |form, slot| {
            form.add_part(
                format!("image{slot}"),
                image(&format!("p{slot}.png"), "image/png"),
            )
        },
    )
}

#[tokio::test]
async fn auth_status_reports_session_without_failing() {
    let harness = Harness::new().await;

    let anonymous = harness.server.get("/api/auth-status").await;
    assert_eq!(anonymous.status_code(), StatusCode::OK);
    assert_eq!(anonymous.json::<Value>()["authenticated"], false);

    let user = Uuid::new_v4();
    let fresh = harness.get("/api/auth-status", user).await.json::<Value>();
    assert_eq!(fresh["authenticated"], true);
    assert_eq!(fresh["user_id"], user.to_string());
    assert_eq!(fresh["role"], Value::Null);

    harness.set_role(user, "reviewer").await;
    let with_role = harness.get("/api/auth-status", user).await.json::<Value>();
    assert_eq!(with_role["role"], "reviewer");
}

#[tokio::test]
async fn protected_routes_need_a_valid_token() {
    let harness = Harness::new().await;

    for path in [
        "/api/session",
        "/api/account",
        "/api/get-profile-to-review",
        "/api/get-my-reviews",
        "/api/get-notifications",
    ] {
        let response = harness.server.get(path).await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED, "{path}");
    }

    let forged = harness
        .server
        .get("/api/session")
        .authorization_bearer("not-a-jwt")
        .await;
    assert_eq!(forged.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(forged.json::<Value>()["status"], 401);
}

#[tokio::test]
async fn session_walks_a_submitter_through_onboarding() {
    let harness = Harness::new().await;
    let user = Uuid::new_v4();

    let next = |body: Value| body["next"].as_str().unwrap().to_string();

    let state = harness.get("/api/session", user).await.json::<Value>();
    assert_eq!(next(state.clone()), "choose_role");
    assert_eq!(state["redirect"], "/dashboard");

    harness.set_role(user, "submitter").await;
    let state = harness.get("/api/session", user).await.json::<Value>();
    assert_eq!(next(state.clone()), "profile_setup");
    assert_eq!(state["role_source"], "account");

    harness.setup_identity(user, "Sam", "sam_99").await;
    let state = harness.get("/api/session", user).await.json::<Value>();
    assert_eq!(next(state.clone()), "submit");
    assert_eq!(state["profile_complete"], true);

    harness
        .multipart("/api/submit-profile", user, submission_form("About me", 2))
        .await
        .assert_status_ok();
    let state = harness.get("/api/session", user).await.json::<Value>();
    assert_eq!(next(state.clone()), "my_reviews");
    assert_eq!(state["has_submission"], true);
}

#[tokio::test]
async fn session_falls_back_to_token_role() {
    let harness = Harness::new().await;
    let user = Uuid::new_v4();

    let state = harness
        .server
        .get("/api/session")
        .authorization_bearer(token(user, Some("reviewer")))
        .await
        .json::<Value>();

    assert_eq!(state["role"], "reviewer");
    assert_eq!(state["role_source"], "token");
    assert_eq!(state["next"], "profile_setup");
}

#[tokio::test]
async fn token_role_opens_the_review_queue() {
    let harness = Harness::new().await;
    let (_, profile) = harness.submitter("Ivy", "ivy").await;

    let user = Uuid::new_v4();
    let bearer = token(user, Some("reviewer"));

    harness
        .server
        .post("/api/profile-setup")
        .authorization_bearer(&bearer)
        .multipart(
            MultipartForm::new()
                .add_text("displayName", "Jo")
                .add_text("username", "jo_reviews"),
        )
        .await
        .assert_status_ok();

    let state = harness
        .server
        .get("/api/session")
        .authorization_bearer(&bearer)
        .await
        .json::<Value>();
    assert_eq!(state["next"], "review");
    assert_eq!(state["role_source"], "token");

    let queue = harness
        .server
        .get("/api/get-profile-to-review")
        .authorization_bearer(&bearer)
        .await;
    queue.assert_status_ok();
    assert_eq!(queue.json::<Value>()["profile"]["id"], profile.to_string());

    harness
        .server
        .post("/api/submit-review")
        .authorization_bearer(&bearer)
        .json(&json!({ "profile_id": profile, "rating": 5, "feedback": FEEDBACK }))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn set_role_validates_and_upserts() {
    let harness = Harness::new().await;
    let user = Uuid::new_v4();

    let missing = harness.post("/api/set-user-role", user, json!({})).await;
    assert_eq!(missing.status_code(), StatusCode::BAD_REQUEST);

    let invalid = harness
        .post("/api/set-user-role", user, json!({ "role": "admin" }))
        .await;
    assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);

    let someone_else = harness
        .post(
            "/api/set-user-role",
            user,
            json!({ "role": "reviewer", "userId": Uuid::new_v4() }),
        )
        .await;
    assert_eq!(someone_else.status_code(), StatusCode::FORBIDDEN);

    let inserted = harness
        .post(
            "/api/set-user-role",
            user,
            json!({ "role": "reviewer", "userId": user, "email": "given@example.com" }),
        )
        .await
        .json::<Value>();
    assert_eq!(inserted["operation"], "inserted");
    assert_eq!(inserted["role"], "reviewer");

    let updated = harness
        .post("/api/set-user-role", user, json!({ "role": "submitter" }))
        .await
        .json::<Value>();
    assert_eq!(updated["operation"], "updated");

    let account = harness.get("/api/account", user).await.json::<Value>();
    assert_eq!(account["role"], "submitter");
    assert_eq!(account["email"], "given@example.com");

    let malformed = harness
        .server
        .post("/api/set-user-role")
        .authorization_bearer(token(user, None))
        .text("{not json")
        .await;
    assert_eq!(malformed.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn account_settings_create_missing_rows_as_submitter() {
    let harness = Harness::new().await;
    let user = Uuid::new_v4();

    assert_eq!(
        harness.get("/api/account", user).await.status_code(),
        StatusCode::NOT_FOUND
    );

    let saved = harness
        .server
        .put("/api/account")
        .authorization_bearer(token(user, None))
        .json(&json!({ "displayName": "  Robin ", "bio": "Cat person" }))
        .await
        .json::<Value>();
    assert_eq!(saved["role"], "submitter");
    assert_eq!(saved["display_name"], "Robin");
    assert_eq!(saved["bio"], "Cat person");

    let too_short = harness
        .server
        .put("/api/account")
        .authorization_bearer(token(user, None))
        .json(&json!({ "display_name": "R" }))
        .await;
    assert_eq!(too_short.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn profile_setup_enforces_username_rules() {
    let harness = Harness::new().await;
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

    harness.setup_identity(alice, "Alice", "alice").await;

    let taken = harness
        .multipart(
            "/api/profile-setup",
            bob,
            MultipartForm::new()
                .add_text("displayName", "Bob")
                .add_text("username", "ALICE"),
        )
        .await;
    assert_eq!(taken.status_code(), StatusCode::CONFLICT);

    let bad_chars = harness
        .multipart(
            "/api/profile-setup",
            bob,
            MultipartForm::new()
                .add_text("displayName", "Bob")
                .add_text("username", "bob!"),
        )
        .await;
    assert_eq!(bad_chars.status_code(), StatusCode::BAD_REQUEST);

    let not_image = harness
        .multipart(
            "/api/profile-setup",
            bob,
            MultipartForm::new()
                .add_text("displayName", "Bob")
                .add_text("username", "bob")
                .add_part("profileImage", image("notes.txt", "text/plain")),
        )
        .await;
    assert_eq!(not_image.status_code(), StatusCode::BAD_REQUEST);

    // Alice renames, freeing her old username.
    harness.setup_identity(alice, "Alice", "alice_b").await;
    harness.setup_identity(bob, "Bob", "alice").await;
}

#[tokio::test]
async fn profile_setup_serves_uploaded_avatar() {
    let harness = Harness::new().await;
    let user = Uuid::new_v4();

    let account = harness
        .multipart(
            "/api/profile-setup",
            user,
            MultipartForm::new()
                .add_text("displayName", "Sam")
                .add_text("username", "sam")
                .add_part("profileImage", image("me.png", "image/png")),
        )
        .await
        .json::<Value>();

    let url = account["profile_image_url"].as_str().unwrap();
    assert!(url.starts_with("http://test.local/images/avatar_"));

    let path = url.trim_start_matches("http://test.local");
    let served = harness.server.get(path).await;
    assert_eq!(served.status_code(), StatusCode::OK);
    assert_eq!(served.as_bytes().as_ref(), PNG);
}

#[tokio::test]
async fn uploads_are_stored_by_image_format_not_file_name() {
    let harness = Harness::new().await;
    let user = Uuid::new_v4();

    let upload = |part: Part| {
        MultipartForm::new()
            .add_text("profileText", "hi")
            .add_part("image0", part)
    };

    let script = Part::bytes(b"<script>fetch('/api/account')</script>".to_vec())
        .file_name("x.html")
        .mime_type("image/png");
    let rejected = harness.multipart("/api/submit-profile", user, upload(script)).await;
    assert_eq!(rejected.status_code(), StatusCode::BAD_REQUEST);

    let svg = Part::bytes(b"<svg onload=\"alert(1)\"/>".to_vec())
        .file_name("x.svg")
        .mime_type("image/svg+xml");
    let rejected = harness.multipart("/api/submit-profile", user, upload(svg)).await;
    assert_eq!(rejected.status_code(), StatusCode::BAD_REQUEST);

    let stored = harness
        .multipart("/api/submit-profile", user, upload(image("x.html", "image/png")))
        .await
        .json::<Value>();
    let url = stored["image_urls"][0].as_str().unwrap();
    assert!(url.ends_with(".png"), "{url}");

    let served = harness
        .server
        .get(url.trim_start_matches("http://test.local"))
        .await;
    served.assert_status_ok();
    assert_eq!(served.header("content-type"), "image/png");
    assert_eq!(served.header("x-content-type-options"), "nosniff");
}

#[tokio::test]
async fn submit_profile_requires_images_and_replaces_in_place() {
    let harness = Harness::new().await;
    let user = Uuid::new_v4();

    let empty = harness
        .multipart("/api/submit-profile", user, submission_form("no photos", 0))
        .await;
    assert_eq!(empty.status_code(), StatusCode::BAD_REQUEST);

    let wrong_type = harness
        .multipart(
            "/api/submit-profile",
            user,
            MultipartForm::new()
                .add_text("profileText", "doc")
                .add_part("image0", image("cv.pdf", "application/pdf")),
        )
        .await;
    assert_eq!(wrong_type.status_code(), StatusCode::BAD_REQUEST);

    let first = harness
        .multipart("/api/submit-profile", user, submission_form("v1", 3))
        .await
        .json::<Value>();
    assert_eq!(first["success"], true);
    assert_eq!(first["image_urls"].as_array().unwrap().len(), 3);

    let second = harness
        .multipart("/api/submit-profile", user, submission_form("v2", 1))
        .await
        .json::<Value>();
    assert_eq!(first["profile_id"], second["profile_id"]);
    assert_eq!(second["image_urls"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn review_queue_serves_oldest_unreviewed_submission() {
    let harness = Harness::new().await;
    let (_, older) = harness.submitter("Ana", "ana").await;
    let (_, newer) = harness.submitter("Ben", "ben").await;
    let reviewer = harness.reviewer(None).await;

    let (submitter, _) = harness.submitter("Cyd", "cyd").await;
    let forbidden = harness.get("/api/get-profile-to-review", submitter).await;
    assert_eq!(forbidden.status_code(), StatusCode::FORBIDDEN);

    let first = harness
        .get("/api/get-profile-to-review", reviewer)
        .await
        .json::<Value>();
    assert_eq!(first["profile"]["id"], older.to_string());
    assert_eq!(first["profile"]["users"]["username"], "ana");
    assert_eq!(first["profile"]["users"]["display_name"], "Ana");

    harness.review(reviewer, older, 4).await.assert_status_ok();

    let second = harness
        .get("/api/get-profile-to-review", reviewer)
        .await
        .json::<Value>();
    assert_eq!(second["profile"]["id"], newer.to_string());

    harness.review(reviewer, newer, 3).await.assert_status_ok();

    let cyd_profile = harness
        .get("/api/get-profile-to-review", reviewer)
        .await
        .json::<Value>()["profile"]["id"]
        .as_str()
        .and_then(|id| Uuid::parse_str(id).ok())
        .unwrap();
    harness.review(reviewer, cyd_profile, 5).await.assert_status_ok();

    let done = harness.get("/api/get-profile-to-review", reviewer).await;
    assert_eq!(done.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(done.json::<Value>()["message"], "No more profiles to review");
}

#[tokio::test]
async fn reviewers_never_get_their_own_submission() {
    let harness = Harness::new().await;
    let (user, _) = harness.submitter("Dee", "dee").await;
    harness.set_role(user, "reviewer").await;

    let response = harness.get("/api/get-profile-to-review", user).await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn submit_review_validates_input() {
    let harness = Harness::new().await;
    let (owner, profile) = harness.submitter("Eve", "eve").await;
    let reviewer = harness.reviewer(None).await;

    let cases = [
        json!({ "rating": 3, "feedback": FEEDBACK }),
        json!({ "profileId": profile, "feedback": FEEDBACK }),
        json!({ "profileId": profile, "rating": 3 }),
        json!({ "profileId": profile, "rating": 6, "feedback": FEEDBACK }),
        json!({ "profileId": profile, "rating": 0, "feedback": FEEDBACK }),
        json!({ "profileId": profile, "rating": 2.5, "feedback": FEEDBACK }),
        json!({ "profileId": profile, "rating": 3, "feedback": "too short" }),
    ];

    for body in cases {
        let response = harness.post("/api/submit-review", reviewer, body.clone()).await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST, "{body}");
    }

    let unknown = harness.review(reviewer, Uuid::new_v4(), 3).await;
    assert_eq!(unknown.status_code(), StatusCode::NOT_FOUND);

    let not_reviewer = harness.review(owner, profile, 3).await;
    assert_eq!(not_reviewer.status_code(), StatusCode::FORBIDDEN);

    harness.set_role(owner, "reviewer").await;
    let own = harness.review(owner, profile, 5).await;
    assert_eq!(own.status_code(), StatusCode::FORBIDDEN);

    let whole_number = harness
        .post(
            "/api/submit-review",
            reviewer,
            json!({ "profile_id": profile, "rating": 4.0, "feedback": FEEDBACK }),
        )
        .await;
    whole_number.assert_status_ok();
    assert!(whole_number.json::<Value>()["review_id"].is_string());

    let duplicate = harness.review(reviewer, profile, 1).await;
    assert_eq!(duplicate.status_code(), StatusCode::BAD_REQUEST);
    assert_eq!(
        duplicate.json::<Value>()["error"],
        "You have already reviewed this profile"
    );
}

#[tokio::test]
async fn my_reviews_reports_history_and_analytics() {
    let harness = Harness::new().await;
    let (owner, profile) = harness.submitter("Fay", "fay").await;

    let stranger = Uuid::new_v4();
    let none = harness.get("/api/get-my-reviews", stranger).await;
    assert_eq!(none.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(none.json::<Value>()["message"], "No profile found");

    let empty = harness.get("/api/get-my-reviews", owner).await.json::<Value>();
    assert_eq!(empty["analytics"]["review_count"], 0);
    assert_eq!(empty["analytics"]["average_rating"], 0.0);

    let named = harness.reviewer(Some("Gus")).await;
    let anonymous = harness.reviewer(None).await;
    harness.review(named, profile, 5).await.assert_status_ok();
    tokio::time::sleep(Duration::from_millis(2)).await;
    harness.review(anonymous, profile, 2).await.assert_status_ok();

    let body = harness.get("/api/get-my-reviews", owner).await.json::<Value>();
    assert_eq!(body["profile_id"], profile.to_string());

    let reviews = body["reviews"].as_array().unwrap();
    assert_eq!(reviews.len(), 2);
    assert_eq!(reviews[0]["reviewer_name"], "Anonymous Reviewer");
    assert_eq!(reviews[1]["reviewer_name"], "Gus");

    assert_eq!(body["analytics"]["review_count"], 2);
    assert_eq!(body["analytics"]["average_rating"], 3.5);
    assert_eq!(body["analytics"]["rating_distribution"]["5"], 1);
    assert_eq!(body["analytics"]["rating_distribution"]["2"], 1);
    assert_eq!(body["analytics"]["rating_distribution"]["3"], 0);
}

#[tokio::test]
async fn owners_are_notified_and_can_mark_read() {
    let harness = Harness::new().await;
    let (owner, profile) = harness.submitter("Hal", "hal").await;
    let reviewer = harness.reviewer(None).await;

    let review_id = harness.review(reviewer, profile, 4).await.json::<Value>()["review_id"].clone();

    let inbox = harness.get("/api/get-notifications", owner).await.json::<Value>();
    assert_eq!(inbox["unread_count"], 1);

    let notification = &inbox["notifications"][0];
    assert_eq!(notification["kind"], "new_review");
    assert_eq!(notification["related_id"], review_id);
    assert_eq!(notification["message"], "You received a new review with rating: 4/5");

    let id = notification["id"].clone();

    let invalid = harness
        .post("/api/get-notifications", owner, json!({ "notificationIds": [] }))
        .await;
    assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);

    let foreign = harness
        .post("/api/get-notifications", reviewer, json!({ "notificationIds": [id] }))
        .await
        .json::<Value>();
    assert_eq!(foreign["updated"], 0);

    let marked = harness
        .post("/api/get-notifications", owner, json!({ "notification_ids": [id] }))
        .await
        .json::<Value>();
    assert_eq!(marked["success"], true);
    assert_eq!(marked["updated"], 1);

    let inbox = harness.get("/api/get-notifications", owner).await.json::<Value>();
    assert_eq!(inbox["unread_count"], 0);
}
