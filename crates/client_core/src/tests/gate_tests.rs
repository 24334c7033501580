use super::*;
use shared::domain::Region;

fn region() -> Region {
    Region::normalized(0.1, 0.1, 0.5, 0.5).expect("region")
}

#[test]
fn clear_classification_forwards_and_returns_to_idle() {
    let mut gate = SensitiveContentGate::new();
    let chat = ChatId::new("c-1");
    assert!(gate.begin(&chat, "img://cat"));
    assert!(!gate.is_idle(&chat));

    let decision = gate.resolve(&chat, Some(Classification::clear()));
    assert_eq!(decision, Some(GateDecision::Forward("img://cat".to_string())));
    assert!(gate.is_idle(&chat));
}

#[test]
fn not_sensitive_with_regions_still_forwards() {
    let mut gate = SensitiveContentGate::new();
    let chat = ChatId::new("c-1");
    gate.begin(&chat, "img://cat");
    let decision = gate.resolve(
        &chat,
        Some(Classification {
            sensitive: false,
            regions: vec![region()],
        }),
    );
    assert!(matches!(decision, Some(GateDecision::Forward(_))));
}

#[test]
fn failed_classification_fails_open() {
    let mut gate = SensitiveContentGate::new();
    let chat = ChatId::new("c-1");
    gate.begin(&chat, "img://card");
    assert_eq!(
        gate.resolve(&chat, None),
        Some(GateDecision::Forward("img://card".to_string()))
    );
    assert!(gate.is_idle(&chat));
}

#[test]
fn flagged_image_waits_for_decision() {
    let mut gate = SensitiveContentGate::new();
    let chat = ChatId::new("c-1");
    gate.begin(&chat, "img://passport");

    let decision = gate.resolve(&chat, Some(Classification::flagged(vec![region()])));
    let Some(GateDecision::AwaitConfirmation(pending)) = decision else {
        panic!("expected confirmation, got {decision:?}");
    };
    assert_eq!(pending.image_ref, "img://passport");
    assert_eq!(pending.regions, vec![region()]);
    assert!(pending.sensitive);

    assert_eq!(gate.pending(&chat), Some(&pending));
    assert!(!gate.begin(&chat, "img://other"), "one pending image per chat");

    let confirmed = gate.take_pending(&chat).expect("pending");
    assert_eq!(confirmed, pending);
    assert!(gate.is_idle(&chat));
    assert!(gate.take_pending(&chat).is_none());
}

#[test]
fn cancel_clears_pending_image() {
    let mut gate = SensitiveContentGate::new();
    let chat = ChatId::new("c-1");
    gate.begin(&chat, "img://passport");
    gate.resolve(&chat, Some(Classification::flagged(vec![region()])));

    assert!(gate.cancel(&chat));
    assert!(gate.pending(&chat).is_none());
    assert!(!gate.cancel(&chat));
}

#[test]
fn cannot_take_pending_while_classifying() {
    let mut gate = SensitiveContentGate::new();
    let chat = ChatId::new("c-1");
    gate.begin(&chat, "img://passport");
    assert!(gate.take_pending(&chat).is_none());
    assert!(!gate.cancel(&chat));
    assert!(matches!(
        gate.state(&chat),
        Some(GateState::Classifying { .. })
    ));
}

#[test]
fn resolve_without_classifying_is_ignored() {
    let mut gate = SensitiveContentGate::new();
    assert_eq!(gate.resolve(&ChatId::new("c-1"), None), None);
}

#[test]
fn gates_are_independent_per_chat() {
    let mut gate = SensitiveContentGate::new();
    assert!(gate.begin(&ChatId::new("c-1"), "img://a"));
    assert!(gate.begin(&ChatId::new("c-2"), "img://b"));
}
