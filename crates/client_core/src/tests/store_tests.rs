use super::*;
use shared::domain::{Timestamp, IMAGE_PREVIEW_LABEL};

fn message(id: &str, timestamp: Timestamp) -> Message {
    Message {
        id: MessageId::new(id),
        content: format!("text of {id}"),
        image_ref: None,
        sender: "bob_designer".to_string(),
        timestamp: ServerTime::from_millis(timestamp),
    }
}

fn chat(id: &str, messages: Vec<Message>) -> Chat {
    let mut chat = Chat::new(ChatId::new(id), "alice_dev", "bob_designer");
    chat.messages = messages;
    chat.refresh_preview();
    chat
}

fn ids(store: &ChatStore, chat_id: &ChatId) -> Vec<String> {
    store
        .chat(chat_id)
        .expect("chat")
        .messages
        .iter()
        .map(|message| message.id.0.clone())
        .collect()
}

#[test]
fn apply_appends_only_unknown_ids_in_server_order() {
    let mut store = ChatStore::new();
    store.upsert_chat(chat("c-1", vec![message("m1", 100)]));
    let chat_id = ChatId::new("c-1");

    let appended = store
        .apply_reconciled_messages(&chat_id, vec![message("m1", 100), message("m3", 150), message("m2", 150)])
        .expect("known chat");

    assert_eq!(appended, 2);
    assert_eq!(ids(&store, &chat_id), vec!["m1", "m3", "m2"]);
}

#[test]
fn apply_dedups_within_one_batch() {
    let mut store = ChatStore::new();
    store.upsert_chat(chat("c-1", Vec::new()));
    let chat_id = ChatId::new("c-1");

    let appended = store
        .apply_reconciled_messages(&chat_id, vec![message("m1", 1), message("m1", 1)])
        .expect("known chat");
    assert_eq!(appended, 1);
}

#[test]
fn apply_to_unknown_chat_is_reported() {
    let mut store = ChatStore::new();
    assert_eq!(
        store.apply_reconciled_messages(&ChatId::new("missing"), vec![message("m1", 1)]),
        None
    );
}

#[test]
fn preview_uses_placeholder_for_image_only_message() {
    let mut store = ChatStore::new();
    store.upsert_chat(chat("c-1", vec![message("m1", 10)]));
    let chat_id = ChatId::new("c-1");

    let mut image = message("m2", 20);
    image.content.clear();
    image.image_ref = Some("img://passport".to_string());
    store.apply_reconciled_messages(&chat_id, vec![image]);

    let chat = store.chat(&chat_id).expect("chat");
    assert_eq!(chat.last_message_preview.as_deref(), Some(IMAGE_PREVIEW_LABEL));
    assert_eq!(chat.last_activity, 20);
}

#[test]
fn preview_follows_the_last_text_message() {
    let mut store = ChatStore::new();
    store.upsert_chat(chat("c-1", Vec::new()));
    let chat_id = ChatId::new("c-1");
    store.apply_reconciled_messages(&chat_id, vec![message("m1", 10), message("m2", 30)]);

    let chat = store.chat(&chat_id).expect("chat");
    assert_eq!(chat.last_message_preview.as_deref(), Some("text of m2"));
    assert_eq!(store.latest_timestamp(&chat_id), Some(ServerTime::from_millis(30)));
}

#[test]
fn merge_adopts_backend_order_and_keeps_unlisted_chats() {
    let mut store = ChatStore::new();
    store.upsert_chat(chat("c-old", Vec::new()));
    store.upsert_chat(chat("c-1", vec![message("m1", 1)]));

    store.merge_chat_list(vec![
        chat("c-2", vec![message("n1", 5)]),
        chat("c-1", vec![message("m1", 1), message("m2", 2)]),
    ]);

    let order: Vec<String> = store.list_chats().into_iter().map(|c| c.id.0).collect();
    assert_eq!(order, vec!["c-2", "c-1", "c-old"]);
    assert_eq!(ids(&store, &ChatId::new("c-1")), vec!["m1", "m2"]);
}

#[test]
fn merge_takes_unread_count_from_server() {
    let mut store = ChatStore::new();
    store.upsert_chat(chat("c-1", Vec::new()));
    let mut refreshed = chat("c-1", Vec::new());
    refreshed.unread_count = 4;
    store.merge_chat_list(vec![refreshed]);
    assert_eq!(store.chat(&ChatId::new("c-1")).expect("chat").unread_count, 4);

    assert!(store.mark_read(&ChatId::new("c-1")));
    assert_eq!(store.chat(&ChatId::new("c-1")).expect("chat").unread_count, 0);
}

#[test]
fn upsert_of_known_chat_never_drops_messages() {
    let mut store = ChatStore::new();
    store.upsert_chat(chat("c-1", vec![message("m1", 1), message("m2", 2)]));
    store.upsert_chat(chat("c-1", vec![message("m1", 1)]));
    assert_eq!(ids(&store, &ChatId::new("c-1")), vec!["m1", "m2"]);
}

#[test]
fn failed_sends_are_kept_apart_from_confirmed_messages() {
    let mut store = ChatStore::new();
    store.upsert_chat(chat("c-1", Vec::new()));
    let chat_id = ChatId::new("c-1");

    let first = store.record_failed_send(&chat_id, Draft::text("hi"), "timed out");
    let second = store.record_failed_send(&chat_id, Draft::image("img://a"), "offline");
    assert_ne!(first, second);
    assert!(store.chat(&chat_id).expect("chat").messages.is_empty());
    assert_eq!(store.failed_sends(&chat_id).len(), 2);

    let taken = store.take_failed_send(&chat_id, first).expect("taken");
    assert_eq!(taken.draft, Draft::text("hi"));
    assert_eq!(store.failed_sends(&chat_id).len(), 1);
    assert!(store.take_failed_send(&chat_id, first).is_none());
}
