//! Inbound events and the identifiers that key them.
//!
//! Events are normalized by the transport collaborator before they reach the
//! ingest queue and are never mutated afterwards. An edit at the source
//! produces a new `Event` value with the same `id`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of an independent event stream (e.g. one chat channel)
    SourceId
);
string_id!(
    /// Identifier of the account that produced an event
    AuthorId
);
string_id!(
    /// Identifier of a single event, unique within its source
    EventId
);

/// A media attachment referenced by an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    /// Where the media can be fetched from
    pub url: String,
}

impl MediaRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Short stable label for the media (first 12 hex chars of SHA-256 of the URL)
    pub fn content_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.url.as_bytes());
        let digest = hasher.finalize();

        format!("{:x}", digest)[..12].to_string()
    }
}

/// A normalized inbound event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event identifier
    pub id: EventId,

    /// Stream the event arrived on
    pub source: SourceId,

    /// Who produced it
    pub author: AuthorId,

    /// Ordering timestamp assigned by the source
    pub timestamp: DateTime<Utc>,

    /// Textual content
    #[serde(default)]
    pub content: String,

    /// Attached media, if any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaRef>,
}

impl Event {
    /// Create a text-only event
    pub fn new(
        id: impl Into<EventId>,
        source: impl Into<SourceId>,
        author: impl Into<AuthorId>,
        timestamp: DateTime<Utc>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            author: author.into(),
            timestamp,
            content: content.into(),
            media: Vec::new(),
        }
    }

    /// Attach media references
    pub fn with_media(mut self, media: Vec<MediaRef>) -> Self {
        self.media = media;
        self
    }
}
