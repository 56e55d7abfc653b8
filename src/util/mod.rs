//! Input hygiene for values that cross the remote boundary.
//!
//! - **Subscription URLs** are checked before they are queued for the remote
//!   service, so a typo never costs a round trip or a rejected edit.
//! - **Titles** coming from the service are cleaned before they reach the tree.

mod text;
mod url_validator;

pub use text::sanitize_title;
pub use url_validator::{validate_feed_url, UrlValidationError};
