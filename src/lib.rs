//! Turnstile - Admission Control for HTTP APIs
//!
//! This crate gates API routes with per-caller sliding-window rate limits.
//! Each route category maps to a policy tier; callers are identified by
//! authenticated subject or trusted network address, and every decision is
//! reported back through the standard `X-RateLimit-*` headers.

pub mod admission;
pub mod config;
pub mod error;
pub mod http;
