use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{MAX_RATING, MIN_RATING, Review};

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Analytics {
    pub review_count: usize,
    /// Mean rating to one decimal, 0 without reviews.
    pub average_rating: f64,
    pub rating_distribution: BTreeMap<u8, usize>,
}

pub fn summarize(reviews: &[Review]) -> Analytics {
    let mut rating_distribution: BTreeMap<u8, usize> =
        (MIN_RATING..=MAX_RATING).map(|rating| (rating, 0)).collect();

    for review in reviews {
        *rating_distribution.entry(review.rating).or_default() += 1;
    }

    let review_count = reviews.len();
    let average_rating = if review_count == 0 {
        0.0
    } else {
        let total: u32 = reviews.iter().map(|r| r.rating as u32).sum();
        (total as f64 / review_count as f64 * 10.0).round() / 10.0
    };

    Analytics {
        review_count,
        average_rating,
        rating_distribution,
    }
}
