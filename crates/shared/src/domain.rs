use std::{cmp::Ordering, fmt};

use serde::{Deserialize, Serialize};

/// Whole milliseconds on the server clock, for display.
pub type Timestamp = i64;

/// A server timestamp exactly as the backend sent it, in fractional
/// milliseconds. The backend filters `since` polls with a strict `>` on this
/// value, so sync cursors carry it unrounded.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerTime(f64);

impl ServerTime {
    pub const ZERO: Self = Self(0.0);

    /// `None` for negative or non-finite values.
    pub fn from_wire(raw: f64) -> Option<Self> {
        if !raw.is_finite() || raw < 0.0 {
            return None;
        }
        // folds -0.0 into 0.0 so ordering stays total
        Some(Self(raw + 0.0))
    }

    pub fn from_millis(millis: Timestamp) -> Self {
        Self(millis.max(0) as f64)
    }

    pub fn millis(self) -> Timestamp {
        self.0.floor() as Timestamp
    }

    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl PartialEq for ServerTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ServerTime {}

impl PartialOrd for ServerTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServerTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Shortest form that parses back to the same value, e.g. `1000.5` or `150`.
impl fmt::Display for ServerTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Preview shown in the chat list when the last message is an image without text.
pub const IMAGE_PREVIEW_LABEL: &str = "📷 Image";

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
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
    };
}

id_newtype!(ChatId);
id_newtype!(MessageId);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, deserialize_with = "crate::protocol::de_timestamp")]
    pub created_at: Timestamp,
}

/// A server-confirmed message. Locally composed messages only become a
/// `Message` once the server has assigned the id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub image_ref: Option<String>,
    pub sender: String,
    pub timestamp: ServerTime,
}

impl Message {
    pub fn has_image(&self) -> bool {
        self.image_ref.is_some()
    }

    pub fn is_from(&self, username: &str) -> bool {
        self.sender == username
    }

    /// Text used for the chat list preview when this is the last message.
    pub fn preview(&self) -> String {
        if self.content.is_empty() && self.has_image() {
            IMAGE_PREVIEW_LABEL.to_string()
        } else {
            self.content.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    pub id: ChatId,
    pub current_user: String,
    pub counterpart: String,
    pub counterpart_avatar: Option<String>,
    /// Oldest first.
    pub messages: Vec<Message>,
    pub last_message_preview: Option<String>,
    pub last_activity: Timestamp,
    pub unread_count: u32,
}

impl Chat {
    pub fn new(id: ChatId, current_user: impl Into<String>, counterpart: impl Into<String>) -> Self {
        Self {
            id,
            current_user: current_user.into(),
            counterpart: counterpart.into(),
            counterpart_avatar: None,
            messages: Vec::new(),
            last_message_preview: None,
            last_activity: 0,
            unread_count: 0,
        }
    }

    pub fn latest_timestamp(&self) -> Option<ServerTime> {
        self.messages.iter().map(|message| message.timestamp).max()
    }

    /// Recomputes the derived preview fields from the last message.
    pub fn refresh_preview(&mut self) {
        if let Some(last) = self.messages.last() {
            self.last_message_preview = Some(last.preview());
            self.last_activity = last.timestamp.millis();
        }
    }
}

/// A rectangle normalized against the image's own dimensions, so
/// `(0,0)` is the top-left corner and `(1,1)` the bottom-right corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

/// A region scaled to the rendered size of an image, in display units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Region {
    /// Builds a region from raw corners. Returns `None` when a coordinate is
    /// not finite; otherwise clamps into the unit square and orders corners.
    pub fn normalized(x1: f64, y1: f64, x2: f64, y2: f64) -> Option<Self> {
        if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
            return None;
        }
        let clamp = |v: f64| v.clamp(0.0, 1.0);
        let (x1, x2) = (clamp(x1.min(x2)), clamp(x1.max(x2)));
        let (y1, y2) = (clamp(y1.min(y2)), clamp(y1.max(y2)));
        Some(Self { x1, y1, x2, y2 })
    }

    pub fn to_screen(&self, rendered_width: f64, rendered_height: f64) -> ScreenRect {
        ScreenRect {
            left: self.x1 * rendered_width,
            top: self.y1 * rendered_height,
            width: (self.x2 - self.x1) * rendered_width,
            height: (self.y2 - self.y1) * rendered_height,
        }
    }
}

/// An image held back by the sensitive-content gate until the user decides.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingImage {
    pub image_ref: String,
    pub regions: Vec<Region>,
    pub sensitive: bool,
}
