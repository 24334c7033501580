use super::*;
use chrono::{Duration, TimeZone};
use shared::domain::{ChatId, MessageId, Region, ServerTime};

fn at(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().expect("valid time")
}

#[test]
fn relative_labels_pick_the_largest_unit() {
    let then = 1_700_000_000_000;
    let now = at(then);
    assert_eq!(relative_label(now, then), "now");
    assert_eq!(relative_label(now + Duration::seconds(59), then), "now");
    assert_eq!(relative_label(now + Duration::minutes(5), then), "5m");
    assert_eq!(relative_label(now + Duration::hours(3), then), "3h");
    assert_eq!(relative_label(now + Duration::days(2), then), "2d");
}

#[test]
fn parses_chat_commands() {
    assert_eq!(parse_input("  hello  "), Input::Text("hello".into()));
    assert_eq!(parse_input("/image img://cat"), Input::Image("img://cat".into()));
    assert_eq!(parse_input("/image"), Input::Unknown("/image".into()));
    assert_eq!(parse_input("/retry"), Input::Retry);
    assert_eq!(parse_input("/quit"), Input::Quit);
    assert_eq!(parse_input("   "), Input::Empty);
    assert_eq!(parse_input("/dance"), Input::Unknown("/dance".into()));
}

#[test]
fn chat_row_shows_preview_and_unread() {
    let mut chat = Chat::new(ChatId::new("c-1"), "alice_dev", "bob_designer");
    chat.last_message_preview = Some("see you".into());
    chat.last_activity = 1_700_000_000_000;
    chat.unread_count = 2;

    let row = chat_row(&chat, at(1_700_000_000_000) + Duration::minutes(7));
    assert!(row.starts_with("c-1"));
    assert!(row.contains("bob_designer"));
    assert!(row.contains("see you"));
    assert!(row.contains("7m"));
    assert!(row.ends_with("(2 unread)"));
}

#[test]
fn image_only_message_line_names_the_image() {
    let message = Message {
        id: MessageId::new("m1"),
        content: String::new(),
        image_ref: Some("img://cat".into()),
        sender: "bob_designer".into(),
        timestamp: ServerTime::from_millis(1_700_000_000_000),
    };
    let line = message_line(&message, "alice_dev");
    assert!(line.ends_with("bob_designer: [image img://cat]"));
}

#[test]
fn own_messages_are_attributed_to_me() {
    let message = Message {
        id: MessageId::new("m2"),
        content: "on my way".into(),
        image_ref: None,
        sender: "alice_dev".into(),
        timestamp: ServerTime::from_millis(1_700_000_000_000),
    };
    assert!(message_line(&message, "alice_dev").ends_with("] me: on my way"));
    assert!(message_line(&message, "bob_designer").ends_with("] alice_dev: on my way"));
}

#[test]
fn flagged_prompt_lists_regions() {
    let pending = PendingImage {
        image_ref: "img://passport".into(),
        regions: vec![Region::normalized(0.1, 0.2, 0.6, 0.4).expect("region")],
        sensitive: true,
    };
    let prompt = flagged_prompt(&pending);
    assert!(prompt.contains("1 region(s)"));
    assert!(prompt.contains("(0.10, 0.20) to (0.60, 0.40)"));
    assert!(is_yes(" Y "));
    assert!(!is_yes("nope"));
}
