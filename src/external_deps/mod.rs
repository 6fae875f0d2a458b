//! Integrations with external solving services.

pub mod captcha;
