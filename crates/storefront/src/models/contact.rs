//! Contact form submissions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use millikit_core::{ContactId, Email};

/// A stored contact form message. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contact {
    pub id: ContactId,
    pub name: String,
    pub email: Email,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Input for a contact form submission.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewContact {
    pub name: String,
    pub email: Email,
    pub message: String,
}
