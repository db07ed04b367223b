//! Command bus round trips through the in-memory medium and a mock adapter.

use crate::mock_adapter::{division_group, level_group, MockAdapter, MOVE_BLOCK_GROUP};
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use voicerank::bus::{
    verification_text, BusCommand, BusMedium, BusReply, BusRequest, CommandClient,
    CommandResponder, MemoryMedium,
};
use voicerank::storage::{AccrualStore, Database};
use voicerank::Platform;

struct Harness {
    adapter: Arc<MockAdapter>,
    store: AccrualStore,
    medium: Arc<MemoryMedium>,
    client: CommandClient,
    responder: Arc<CommandResponder<MockAdapter>>,
    shutdown: watch::Sender<bool>,
}

fn harness(platform: Platform) -> Harness {
    let adapter = Arc::new(MockAdapter::new(platform));
    let store = AccrualStore::new(Arc::new(Database::open_in_memory().unwrap()));
    let medium = Arc::new(MemoryMedium::new());
    let client = CommandClient::with_timing(medium.clone(), Duration::from_millis(20), 50);
    let responder = Arc::new(CommandResponder::new(
        Arc::clone(&adapter),
        store.clone(),
        medium.clone(),
        Duration::from_secs(30),
    ));
    let (shutdown, _) = watch::channel(false);

    Harness {
        adapter,
        store,
        medium,
        client,
        responder,
        shutdown,
    }
}

impl Harness {
    /// Start the responder loop and wait until it listens.
    async fn start(&self) -> tokio::task::JoinHandle<()> {
        let channel = self.responder.platform().command_channel();
        let handle = tokio::spawn(Arc::clone(&self.responder).run(self.shutdown.subscribe()));
        while !self.medium.channels().contains(&channel) {
            tokio::task::yield_now().await;
        }
        handle
    }

    fn add_user(&self, platform: Platform, platform_id: &str) {
        let now = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        self.store
            .upsert_identity(platform, platform_id, "Anna", now)
            .unwrap();
    }
}

#[tokio::test]
async fn test_create_owned_channel_records_channel() {
    let h = harness(Platform::Teamspeak);
    let task = h.start().await;
    h.add_user(Platform::Teamspeak, "uid-1");

    let channel = h
        .client
        .create_owned_channel(Platform::Teamspeak, "uid-1", "Anna's Room")
        .await;

    assert_eq!(channel, Some(5000));
    let record = h.store.identity(Platform::Teamspeak, "uid-1").unwrap().unwrap();
    assert_eq!(record.teamspeak_channel, Some(5000));

    h.shutdown.send(true).unwrap();
    task.await.unwrap();
}

#[tokio::test]
async fn test_send_verification() {
    let h = harness(Platform::Discord);
    let _task = h.start().await;

    assert!(h.client.send_verification(Platform::Discord, "42", "123456").await);
    assert_eq!(
        h.adapter.messages(),
        vec![("42".to_string(), verification_text("123456"))]
    );
}

/// Action failures come back as a negative reply, not a timeout
#[tokio::test]
async fn test_failed_action_replies_false() {
    let h = harness(Platform::Discord);
    let _task = h.start().await;
    h.adapter.forget("42");

    let started = std::time::Instant::now();
    assert!(!h.client.send_verification(Platform::Discord, "42", "1").await);
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(h.adapter.messages().is_empty());
}

/// Unknown users are corrected to level 1 and division 1
#[tokio::test]
async fn test_check_ranks_corrects_groups() {
    let h = harness(Platform::Teamspeak);
    let _task = h.start().await;
    h.add_user(Platform::Teamspeak, "uid-1");
    h.adapter
        .set_groups("uid-1", vec![7, level_group(4), level_group(9)]);

    assert!(h.client.check_ranks(Platform::Teamspeak, "uid-1").await);
    assert_eq!(
        h.adapter.groups_of("uid-1"),
        vec![7, level_group(1), division_group(1)]
    );
}

#[tokio::test]
async fn test_move_shield_toggles_group_and_flag() {
    let h = harness(Platform::Teamspeak);
    let _task = h.start().await;
    h.add_user(Platform::Teamspeak, "uid-1");

    assert!(h.client.set_move_shield(Platform::Teamspeak, "uid-1", true).await);
    assert!(h.adapter.groups_of("uid-1").contains(&MOVE_BLOCK_GROUP));
    let record = h.store.identity(Platform::Teamspeak, "uid-1").unwrap().unwrap();
    assert!(!record.teamspeak_moveable);

    assert!(h.client.set_move_shield(Platform::Teamspeak, "uid-1", false).await);
    assert!(!h.adapter.groups_of("uid-1").contains(&MOVE_BLOCK_GROUP));
    let record = h.store.identity(Platform::Teamspeak, "uid-1").unwrap().unwrap();
    assert!(record.teamspeak_moveable);
}

#[tokio::test]
async fn test_set_apex_channel() {
    let h = harness(Platform::Discord);
    let _task = h.start().await;

    assert!(h.client.set_apex_channel(Platform::Discord, 77).await);
    assert_eq!(h.adapter.calls(), vec!["relocate 77".to_string()]);
}

/// Commands on the other platform's channel are not picked up
#[tokio::test]
async fn test_wrong_platform_times_out() {
    let h = harness(Platform::Discord);
    let _task = h.start().await;
    let client = CommandClient::with_timing(h.medium.clone(), Duration::from_millis(10), 5);

    assert!(!client.set_apex_channel(Platform::Teamspeak, 77).await);
    assert!(h.adapter.calls().is_empty());
}

/// The same message id is executed once
#[tokio::test]
async fn test_redelivery_is_ignored() {
    let h = harness(Platform::Discord);
    let request = BusRequest::new(
        BusCommand::CreateOwnedChannel {
            platform_id: "42".to_string(),
            channel_name: "Room".to_string(),
        },
        Some("msg-1".to_string()),
    );
    let payload = serde_json::to_string(&request).unwrap();

    let first = h.responder.handle(&payload).await;
    let second = h.responder.handle(&payload).await;

    assert_eq!(first, Some(BusReply::Channel { channel_id: Some(5000) }));
    assert_eq!(second, None);
    assert_eq!(h.adapter.calls().len(), 1);
    assert_eq!(
        h.medium.take("msg-1").unwrap().as_deref(),
        Some(r#"{"channel_id":5000}"#)
    );
}

/// Without a message id the action runs but no reply key is written
#[tokio::test]
async fn test_fire_and_forget() {
    let h = harness(Platform::Discord);
    let payload = r#"{"command":"set_apex_channel","channel_id":12}"#;

    assert_eq!(h.responder.handle(payload).await, Some(BusReply::ok(true)));
    assert_eq!(h.adapter.calls(), vec!["relocate 12".to_string()]);
}

#[tokio::test]
async fn test_malformed_request_ignored() {
    let h = harness(Platform::Discord);
    assert_eq!(h.responder.handle("not json").await, None);
    assert_eq!(h.responder.handle(r#"{"command":"reboot"}"#).await, None);
    assert!(h.adapter.calls().is_empty());
}
