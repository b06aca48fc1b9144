//! Alert Delivery
//!
//! Renders a batch of spreads as a plain-text report and mails it through
//! an SMTP relay.

pub mod report;
pub mod smtp;

pub use report::{render_body, render_subject};
pub use smtp::SmtpDispatcher;
