use chrono::{DateTime, Local, Utc};
use shared::domain::{Chat, Message, PendingImage, Timestamp};

/// A line typed into the open chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Text(String),
    Image(String),
    Retry,
    Quit,
    Empty,
    Unknown(String),
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Text(line.to_string());
    };
    let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
    match (name, rest.trim()) {
        ("quit", _) => Input::Quit,
        ("retry", _) => Input::Retry,
        ("image", image_ref) if !image_ref.is_empty() => Input::Image(image_ref.to_string()),
        _ => Input::Unknown(line.to_string()),
    }
}

/// `now`, `Nm`, `Nh` or `Nd` since `timestamp`.
pub fn relative_label(now: DateTime<Utc>, timestamp: Timestamp) -> String {
    let Some(then) = DateTime::<Utc>::from_timestamp_millis(timestamp) else {
        return String::new();
    };
    let elapsed = now.signed_duration_since(then);
    if elapsed.num_minutes() < 1 {
        "now".to_string()
    } else if elapsed.num_hours() < 1 {
        format!("{}m", elapsed.num_minutes())
    } else if elapsed.num_days() < 1 {
        format!("{}h", elapsed.num_hours())
    } else {
        format!("{}d", elapsed.num_days())
    }
}

pub fn chat_row(chat: &Chat, now: DateTime<Utc>) -> String {
    let preview = chat.last_message_preview.as_deref().unwrap_or("");
    let when = if chat.last_activity > 0 {
        relative_label(now, chat.last_activity)
    } else {
        String::new()
    };
    let mut row = format!("{}  {:<16} {:<32} {}", chat.id, chat.counterpart, preview, when);
    if chat.unread_count > 0 {
        row.push_str(&format!("  ({} unread)", chat.unread_count));
    }
    row.trim_end().to_string()
}

/// Own messages are attributed to `me`.
pub fn message_line(message: &Message, current_user: &str) -> String {
    let time = DateTime::<Utc>::from_timestamp_millis(message.timestamp.millis())
        .map(|at| at.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_default();
    let body = match (&message.image_ref, message.content.is_empty()) {
        (Some(image_ref), true) => format!("[image {image_ref}]"),
        (Some(image_ref), false) => format!("{} [image {image_ref}]", message.content),
        (None, _) => message.content.clone(),
    };
    let sender = if message.is_from(current_user) {
        "me"
    } else {
        message.sender.as_str()
    };
    format!("[{time}] {sender}: {body}")
}

pub fn flagged_prompt(pending: &PendingImage) -> String {
    let mut prompt = format!(
        "{} may contain sensitive data in {} region(s):",
        pending.image_ref,
        pending.regions.len()
    );
    for region in &pending.regions {
        prompt.push_str(&format!(
            "\n  ({:.2}, {:.2}) to ({:.2}, {:.2})",
            region.x1, region.y1, region.x2, region.y2
        ));
    }
    prompt.push_str("\nsend anyway? [y/n]");
    prompt
}

pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
#[path = "tests/view_tests.rs"]
mod tests;
