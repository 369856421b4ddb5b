//! Prompt-to-video front-end.
//!
//! Submits text-to-video jobs to a hosted videos API, polls them to
//! completion and lets a session browse, download and delete past jobs.
//! The `prompt-to-video` binary serves this as a JSON API; `render` is a
//! one-shot command-line client.

pub mod app_state;
pub mod config;
pub mod flows;
pub mod models;
pub mod routes;
pub mod services;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;
