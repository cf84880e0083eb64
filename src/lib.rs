//! Movie recommendation demo services.
//!
//! - event collector: `/interact` publishes like/dislike events to a queue
//! - pipeline: appends queued events to the interaction log, keeps the
//!   `top_items` list fresh and retrains the personalization model
//! - recommendations: `/recs/{user_id}` blends personalized, popular and
//!   random items

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod queue;
pub mod services;
