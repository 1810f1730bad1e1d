use std::time::Duration;

use counsel_chat::chat::{
    Conversation, ConversationUpdate, ConversationViewModel, DeliveryConfirmation,
};
use counsel_chat::common::MessageStatus;
use counsel_chat::config::ChannelConfig;
use counsel_chat::network::{BackoffPolicy, ChannelState, SupervisedConnector, memory};
use counsel_chat::session::{LocalUser, SessionContext};
use counsel_chat::storage::FileSecretStore;

fn participant(user: &str, delivery: DeliveryConfirmation) -> ConversationViewModel {
    let session = SessionContext::ephemeral(LocalUser::new(user, user));
    ConversationViewModel::new(Conversation::new("conv1", "Counselor"), &session, delivery)
}

#[tokio::test(start_paused = true)]
async fn student_and_counsellor_exchange_messages() {
    let (a, b) = memory::pair(16);
    let config = ChannelConfig::new("conv1");
    let delivery = DeliveryConfirmation::default();
    let mut student = participant("student", delivery);
    let mut counsellor = participant("counsellor", delivery);
    student.connect(&a, &config).await.unwrap();
    counsellor.connect(&b, &config).await.unwrap();
    assert_eq!(student.channel_state(), ChannelState::Open);

    let question = student.send_text("Can we talk tomorrow?").unwrap();
    assert_eq!(
        counsellor.process_next().await.unwrap(),
        ConversationUpdate::Appended(question.clone())
    );
    assert_eq!(counsellor.summary().unread_count, 1);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(
        student.pump_events(),
        vec![ConversationUpdate::StatusChanged {
            message_id: question.clone(),
            status: MessageStatus::Delivered,
        }]
    );

    let answer = counsellor.send_text("Sure, 10am works.").unwrap();
    assert_eq!(
        student.process_next().await.unwrap(),
        ConversationUpdate::Appended(answer.clone())
    );

    let ids: Vec<_> = student.snapshot().iter().map(|m| m.id().clone()).collect();
    assert_eq!(ids, vec![answer, question]);

    assert_eq!(counsellor.mark_read(), 1);
    assert_eq!(counsellor.summary().unread_count, 0);

    student.close();
    student.close();
    assert_eq!(student.channel_state(), ChannelState::Closed);
}

#[tokio::test]
async fn supervised_links_carry_messages_and_receipts() {
    let (a, b) = memory::pair(16);
    let config = ChannelConfig::new("conv1");
    let a = SupervisedConnector::new(a, BackoffPolicy::default());
    let b = SupervisedConnector::new(b, BackoffPolicy::default());

    let mut student = participant("student", DeliveryConfirmation::PeerReceipt);
    let mut counsellor = participant("counsellor", DeliveryConfirmation::PeerReceipt);
    student.connect(&a, &config).await.unwrap();
    counsellor.connect(&b, &config).await.unwrap();

    let id = student.send_text("hello").unwrap();
    assert_eq!(
        counsellor.process_next().await.unwrap(),
        ConversationUpdate::Appended(id.clone())
    );
    assert_eq!(
        student.process_next().await.unwrap(),
        ConversationUpdate::StatusChanged {
            message_id: id.clone(),
            status: MessageStatus::Delivered,
        }
    );
}

#[tokio::test]
async fn restored_session_signs_outgoing_messages() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("secrets.json");
    SessionContext::sign_in(
        &FileSecretStore::new(&path),
        LocalUser::new("user123", "John Doe"),
    )
    .unwrap();

    let session = SessionContext::restore(&FileSecretStore::new(&path))
        .unwrap()
        .unwrap();
    let mut vm = ConversationViewModel::new(
        Conversation::new("conv1", "Sarah Johnson"),
        &session,
        DeliveryConfirmation::default(),
    );
    let id = vm.send_text("hi").unwrap();

    let message = vm.conversation().store().get(&id).unwrap();
    assert_eq!(message.sender_id(), "user123");
    assert_eq!(message.conversation_id(), "conv1");
    assert_eq!(
        vm.process_next().await.unwrap(),
        ConversationUpdate::SendFailed(id)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn burst_arrives_in_send_order_on_a_threaded_runtime() {
    for _ in 0..5 {
        let (a, b) = memory::pair(1);
        let config = ChannelConfig::new("conv1");
        let delivery = DeliveryConfirmation::default();
        let mut student = participant("student", delivery);
        let mut counsellor = participant("counsellor", delivery);
        student.connect(&a, &config).await.unwrap();
        counsellor.connect(&b, &config).await.unwrap();

        let sent: Vec<_> = (0..30)
            .map(|i| student.send_text(&format!("m{i}")).unwrap())
            .collect();

        let mut received = Vec::new();
        while received.len() < sent.len() {
            match counsellor.process_next().await.unwrap() {
                ConversationUpdate::Appended(id) => received.push(id),
                other => panic!("unexpected update {other:?}"),
            }
        }
        assert_eq!(received, sent);

        let texts: Vec<_> = counsellor
            .snapshot()
            .iter()
            .map(|m| m.text().to_string())
            .collect();
        let expected: Vec<_> = (0..30).rev().map(|i| format!("m{i}")).collect();
        assert_eq!(texts, expected);
        student.close();
        counsellor.close();
    }
}
