use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::{
    Client, Response,
    multipart::{Form, Part},
};
use serde::Serialize;
use serde_json::{Value, json};
use uuid::Uuid;

/// Smallest valid PNG, one transparent pixel.
const PIXEL: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4,
    0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae,
    0x42, 0x60, 0x82,
];

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Secret the backend verifies tokens with.
    #[arg(long, env = "JWT_SECRET")]
    secret: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a development access token.
    Token {
        #[arg(long)]
        user: Option<Uuid>,

        #[arg(long)]
        email: Option<String>,

        /// Role recorded in user_metadata, as the identity provider would at sign up.
        #[arg(long)]
        role: Option<String>,

        #[arg(long, default_value_t = 3600)]
        ttl: i64,
    },

    /// Run a submitter and a reviewer through the whole flow against a live server.
    Smoke {
        #[arg(long, default_value = "http://localhost:1111")]
        url: String,
    },
}

#[derive(Serialize)]
struct UserMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
}

#[derive(Serialize)]
struct Claims {
    sub: String,
    email: Option<String>,
    exp: i64,
    aud: &'static str,
    user_metadata: UserMetadata,
}

fn mint(
    secret: &str,
    user: Uuid,
    email: Option<String>,
    role: Option<String>,
    ttl: i64,
) -> Result<String> {
    let claims = Claims {
        sub: user.to_string(),
        email,
        exp: Utc::now().timestamp() + ttl,
        aud: "authenticated",
        user_metadata: UserMetadata { role },
    };

    Ok(encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

async fn expect_ok(step: &str, response: Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);

    if !status.is_success() {
        bail!("{step} failed with {status}: {body}");
    }

    println!("{step}: {body}");

    Ok(body)
}

async fn smoke(secret: &str, url: &str) -> Result<()> {
    let client = Client::new();
    let url = url.trim_end_matches('/');

    let submitter = Uuid::new_v4();
    let reviewer = Uuid::new_v4();
    let email = |user: Uuid| Some(format!("{user}@example.com"));
    let submitter_token = mint(secret, submitter, email(submitter), None, 600)?;
    let reviewer_token = mint(secret, reviewer, email(reviewer), None, 600)?;

    for (token, role) in [(&submitter_token, "submitter"), (&reviewer_token, "reviewer")] {
        let response = client
            .post(format!("{url}/api/set-user-role"))
            .bearer_auth(token)
            .json(&json!({ "role": role }))
            .send()
            .await?;
        expect_ok(&format!("set {role}"), response).await?;
    }

    let suffix = &submitter.simple().to_string()[..8];
    let identity = Form::new()
        .text("displayName", "Smoke Submitter")
        .text("username", format!("smoke_{suffix}"));
    let response = client
        .post(format!("{url}/api/profile-setup"))
        .bearer_auth(&submitter_token)
        .multipart(identity)
        .send()
        .await?;
    expect_ok("profile setup", response).await?;

    let photo = Part::bytes(PIXEL.to_vec())
        .file_name("pixel.png")
        .mime_str("image/png")?;
    let submission = Form::new()
        .text("profileText", "Smoke test submission")
        .part("image0", photo);
    let response = client
        .post(format!("{url}/api/submit-profile"))
        .bearer_auth(&submitter_token)
        .multipart(submission)
        .send()
        .await?;
    let profile_id = expect_ok("submit profile", response).await?["profile_id"].clone();

    let response = client
        .post(format!("{url}/api/submit-review"))
        .bearer_auth(&reviewer_token)
        .json(&json!({
            "profile_id": profile_id,
            "rating": 4,
            "feedback": "Smoke test feedback that is long enough",
        }))
        .send()
        .await?;
    expect_ok("submit review", response).await?;

    let response = client
        .get(format!("{url}/api/get-my-reviews"))
        .bearer_auth(&submitter_token)
        .send()
        .await?;
    let reviews = expect_ok("my reviews", response).await?;

    let count = reviews["analytics"]["review_count"]
        .as_u64()
        .context("missing review count")?;
    if count != 1 {
        bail!("expected 1 review, found {count}");
    }

    let response = client
        .get(format!("{url}/api/get-notifications"))
        .bearer_auth(&submitter_token)
        .send()
        .await?;
    expect_ok("notifications", response).await?;

    println!("Smoke test passed");

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Token {
            user,
            email,
            role,
            ttl,
        } => {
            let user = user.unwrap_or_else(Uuid::new_v4);
            println!("{}", mint(&args.secret, user, email, role, ttl)?);
        }
        Command::Smoke { url } => smoke(&args.secret, &url).await?,
    }

    Ok(())
}
