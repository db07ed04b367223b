//! Unit tests for the ServerQuery line codec

use voicerank::adapters::teamspeak::query::{
    escape, parse_notification, parse_records, parse_status, unescape, STATUS_CHANNEL_NAME_IN_USE,
};
use voicerank::adapters::teamspeak::{ClientEvent, Command, LeaveReason};

#[test]
fn test_command_line() {
    let line = Command::new("sendtextmessage")
        .arg("targetmode", 1)
        .arg("target", 7)
        .arg("msg", "Your code: 12|34")
        .to_line();
    assert_eq!(line, "sendtextmessage targetmode=1 target=7 msg=Your\\scode:\\s12\\p34");

    let line = Command::new("clientlist").option("uid").option("groups").to_line();
    assert_eq!(line, "clientlist -uid -groups");
}

#[test]
fn test_escape_reversible_for_names() {
    let name = "Mike's Room / 2 | tab\there";
    assert_eq!(unescape(&escape(name)), name);
}

#[test]
fn test_client_list_records() {
    let line = "clid=1 cid=5 client_database_id=10 client_nickname=Anna client_type=0 \
                client_unique_identifier=abc= client_servergroups=7,9|clid=2 cid=5 \
                client_database_id=11 client_nickname=Query\\sBot client_type=1 \
                client_unique_identifier=def=";

    let records = parse_records(line);

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].get_u64("clid"), Some(1));
    assert_eq!(records[0].get("client_unique_identifier"), Some("abc="));
    assert_eq!(records[0].get_id_list("client_servergroups"), vec![7, 9]);
    assert_eq!(records[1].get("client_nickname"), Some("Query Bot"));
}

#[test]
fn test_status_line() {
    let status = parse_status("error id=771 msg=channel\\sname\\sis\\salready\\sin\\suse").unwrap();
    assert_eq!(status.id, STATUS_CHANNEL_NAME_IN_USE);
    assert_eq!(status.message, "channel name is already in use");
    assert!(!status.is_ok());

    assert!(parse_status("error id=0 msg=ok").unwrap().is_ok());
    assert!(parse_status("clid=1").is_none());
}

#[test]
fn test_enter_view_event() {
    let notification = parse_notification(
        "notifycliententerview cfid=0 ctid=1 reasonid=0 clid=12 client_unique_identifier=xyz= \
         client_nickname=Ben client_database_id=33 client_type=0 client_servergroups=8",
    )
    .unwrap();

    match ClientEvent::from_notification(&notification) {
        Some(ClientEvent::Joined {
            clid,
            database_id,
            unique_id,
            nickname,
            regular,
            server_groups,
        }) => {
            assert_eq!(clid, 12);
            assert_eq!(database_id, Some(33));
            assert_eq!(unique_id, "xyz=");
            assert_eq!(nickname, "Ben");
            assert!(regular);
            assert_eq!(server_groups, Some(vec![8]));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

/// Every disconnect reason is reported as a leave
#[test]
fn test_left_view_reasons() {
    for (id, reason) in [
        (3, LeaveReason::Timeout),
        (5, LeaveReason::Kicked),
        (6, LeaveReason::Banned),
        (8, LeaveReason::Quit),
        (11, LeaveReason::ServerShutdown),
        (4, LeaveReason::Other(4)),
    ] {
        let line = format!("notifyclientleftview cfid=1 ctid=0 reasonid={} clid=12", id);
        let notification = parse_notification(&line).unwrap();
        assert_eq!(
            ClientEvent::from_notification(&notification),
            Some(ClientEvent::Left { clid: 12, reason })
        );
    }
}

#[test]
fn test_unrelated_notifications_ignored() {
    let notification = parse_notification("notifytextmessage targetmode=1 msg=hi").unwrap();
    assert_eq!(ClientEvent::from_notification(&notification), None);
    assert!(parse_notification("clid=1").is_none());
}
