use serde_json::json;

use super::*;
use crate::ErrorKind;

#[test]
fn decode_inbound_batch() {
    let inbound = Inbound::from_json(
        r#"{"messages": [
            {"component": "c1", "action": "add_tag", "params": "name=rspec&x=a%20b"},
            {"component": "c1", "action": "clear"},
            {"component": "c2", "action": "_reactive", "name": "query", "value": "ru"}
        ]}"#,
    )
    .unwrap();
    assert_eq!(
        inbound.messages,
        vec![
            SubMessage::action_with_params("c1", "add_tag", "name=rspec&x=a+b"),
            SubMessage::action("c1", "clear"),
            SubMessage::reactive("c2", "query", "ru"),
        ]
    );
    assert_eq!(inbound.messages[2].component(), "c2");
}

#[test]
fn reactive_without_name_is_invalid() {
    let e = Inbound::from_json(r#"{"messages": [{"component": "c", "action": "_reactive"}]}"#)
        .unwrap_err();
    assert_eq!(e.kind(), ErrorKind::InvalidMessage);
}

#[test]
fn malformed_json_is_invalid() {
    let e = Inbound::from_json(r#"{"messages": [{"action": "x"}]}"#).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::InvalidMessage);
    assert!(Inbound::from_json("not json").is_err());
}

#[test]
fn params_decoding() {
    let params = Params::decode("qty=3&note=hello%20world&qty=4&empty=");
    assert_eq!(params.len(), 3);
    assert_eq!(params.get("note"), Some("hello world"));
    assert_eq!(params.parse::<i64>("qty"), Some(4));
    assert_eq!(params.parse::<i64>("note"), None);
    assert_eq!(params.get("empty"), Some(""));
    assert_eq!(params.get("missing"), None);
    assert_eq!(
        params.iter().map(|(k, _)| k).collect::<Vec<_>>(),
        ["qty", "note", "empty"]
    );
}

#[test]
fn params_encode() {
    let params = Params::decode("a=1&b=x y");
    assert_eq!(params.to_string(), "a=1&b=x+y");
    assert_eq!(Params::decode(&params.encode()), params);
    assert!(Params::decode("").is_empty());
}

#[test]
fn params_to_value() {
    let value = Params::decode("id=7").to_value();
    assert_eq!(value.to_json(), json!({"id": "7"}));
}

#[test]
fn envelope_json() {
    let render = Envelope::new(
        "c1",
        Outbound::Render {
            render: vec![Some("<p>".to_string()), None],
        },
    );
    assert_eq!(
        serde_json::to_value(&render).unwrap(),
        json!({"component": "c1", "render": ["<p>", null]})
    );

    let status = Envelope::new(
        "c1",
        Outbound::Status {
            status: Status::Subscribed,
        },
    );
    assert_eq!(
        status.to_json().unwrap(),
        r#"{"component":"c1","status":"subscribed"}"#
    );

    let error = Envelope::new(
        "c1",
        Outbound::Error {
            error: "<div>x</div>".to_string(),
        },
    );
    assert_eq!(
        serde_json::to_value(&error).unwrap(),
        json!({"component": "c1", "error": "<div>x</div>"})
    );
}

#[test]
fn envelope_parses_back() {
    let envelope: Envelope =
        serde_json::from_str(r#"{"component":"c9","status":"destroyed"}"#).unwrap();
    assert_eq!(
        envelope,
        Envelope::new(
            "c9",
            Outbound::Status {
                status: Status::Destroyed
            }
        )
    );
    assert_eq!(Status::Destroyed.to_string(), "destroyed");
}

#[test]
fn mailbox_shares_queue() {
    let mailbox = Mailbox::new();
    let mut outbox: Box<dyn Outbox> = Box::new(mailbox.clone());
    outbox.send(Envelope::new(
        "a",
        Outbound::Status {
            status: Status::Subscribed,
        },
    ));
    assert_eq!(mailbox.len(), 1);
    assert_eq!(mailbox.take()[0].component, "a");
    assert!(mailbox.is_empty());
}

#[test]
fn closure_outbox() {
    let mut sent = Vec::new();
    {
        let mut outbox = |e: Envelope| sent.push(e.component);
        Outbox::send(
            &mut outbox,
            Envelope::new("x", Outbound::Error { error: String::new() }),
        );
    }
    assert_eq!(sent, ["x"]);
}
