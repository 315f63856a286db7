use std::{collections::HashMap, sync::LazyLock};

use axum::{body::Bytes, extract::Multipart};
use regex::Regex;
use serde::de::DeserializeOwned;

use crate::{
    error::{AppError, AppResult},
    models::{MAX_RATING, MIN_RATING},
};

pub const MIN_DISPLAY_NAME: usize = 2;
pub const MIN_USERNAME: usize = 3;
pub const MIN_FEEDBACK: usize = 20;

static USERNAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());

/// File part of a multipart form.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

#[derive(Debug, Default)]
pub struct Form {
    pub fields: HashMap<String, String>,
    pub files: HashMap<String, Upload>,
}

impl Form {
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Takes a file part out of the form, skipping empty ones.
    pub fn take_file(&mut self, name: &str) -> Option<Upload> {
        self.files.remove(name).filter(|upload| !upload.bytes.is_empty())
    }
}

pub fn parse_json<T: DeserializeOwned>(body: &Bytes) -> AppResult<T> {
    serde_json::from_slice(body).map_err(|_| AppError::MalformedPayload)
}

/// Drains a multipart body. Parts with a file name are files, everything else is text.
pub async fn read_form(mut multipart: Multipart) -> AppResult<Form> {
    let mut form = Form::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| AppError::MalformedPayload)?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(|_| AppError::MalformedPayload)?;

                form.files.insert(
                    name,
                    Upload {
                        file_name: Some(file_name),
                        content_type,
                        bytes,
                    },
                );
            }
            None => {
                let text = field.text().await.map_err(|_| AppError::MalformedPayload)?;
                form.fields.insert(name, text);
            }
        }
    }

    Ok(form)
}

pub fn validate_display_name(display_name: &str) -> AppResult<String> {
    let display_name = display_name.trim();

    if display_name.is_empty() {
        return Err(AppError::invalid("Display name is required"));
    }

    if display_name.chars().count() < MIN_DISPLAY_NAME {
        return Err(AppError::invalid(format!(
            "Display name must be at least {MIN_DISPLAY_NAME} characters"
        )));
    }

    Ok(display_name.to_string())
}

pub fn validate_username(username: &str) -> AppResult<String> {
    let username = username.trim();

    if username.is_empty() {
        return Err(AppError::invalid("Username is required"));
    }

    if username.chars().count() < MIN_USERNAME {
        return Err(AppError::invalid(format!(
            "Username must be at least {MIN_USERNAME} characters"
        )));
    }

    if !USERNAME.is_match(username) {
        return Err(AppError::invalid(
            "Username can only contain letters, numbers, and underscores",
        ));
    }

    Ok(username.to_string())
}

pub fn validate_rating(rating: i64) -> AppResult<u8> {
    if !(MIN_RATING as i64..=MAX_RATING as i64).contains(&rating) {
        return Err(AppError::invalid(format!(
            "Rating must be an integer between {MIN_RATING} and {MAX_RATING}"
        )));
    }

    Ok(rating as u8)
}

pub fn validate_feedback(feedback: &str) -> AppResult<String> {
    let feedback = feedback.trim();

    if feedback.chars().count() < MIN_FEEDBACK {
        return Err(AppError::invalid(format!(
            "Feedback should be at least {MIN_FEEDBACK} characters"
        )));
    }

    Ok(feedback.to_string())
}
