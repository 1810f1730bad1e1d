//! Conversation view model: the only code that touches both the message
//! store and the channel.
//!
//! Outgoing text is appended locally first and handed to a single writer
//! task that puts messages and receipts on the channel in the order they were
//! produced. Everything that arrives later (channel payloads, delivery timers, send
//! failures) is queued as a [`ConversationEvent`] and applied by whoever owns
//! the view model, via [`ConversationViewModel::process_next`] or
//! [`ConversationViewModel::pump_events`]. That owner is the single writer of
//! the store.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::common::codec::{self, Frame, ReceiptEnvelope};
use crate::common::{
    ConversationEvent, Message, MessageClock, MessageId, MessageStatus, Receipt,
};
use crate::config::ChannelConfig;
use crate::error::{ChatError, Result};
use crate::network::{ChannelSender, ChannelSession, ChannelState, Connector};
use crate::session::{Role, SessionContext};

use super::delivery::{self, DeliveryConfirmation, Transition};
use super::screening::{Flag, Screener};
use super::store::{MessageStore, Snapshot};
use super::summary::ConversationSummary;

/// A conversation and its messages. Lives as long as the screen showing it.
#[derive(Debug)]
pub struct Conversation {
    id: String,
    display_name: String,
    store: MessageStore,
}

impl Conversation {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            store: MessageStore::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    #[cfg(test)]
    pub(crate) fn store_mut(&mut self) -> &mut MessageStore {
        &mut self.store
    }
}

/// What applying one event changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationUpdate {
    Appended(MessageId),
    StatusChanged {
        message_id: MessageId,
        status: MessageStatus,
    },
    /// Forwarding failed; the local copy stays in the store.
    SendFailed(MessageId),
    Ignored,
}

type ErrorHandler = Box<dyn FnMut(&ChatError) + Send>;

/// Work for the writer task, in channel order.
enum Outbound {
    Message(Message),
    Receipt(Receipt),
}

pub struct ConversationViewModel {
    conversation: Conversation,
    local_sender_id: String,
    local_role: Role,
    delivery: DeliveryConfirmation,
    clock: MessageClock,
    channel: Option<ChannelSession>,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    events_tx: mpsc::UnboundedSender<ConversationEvent>,
    events_rx: mpsc::UnboundedReceiver<ConversationEvent>,
    screener: Option<Screener>,
    flags: HashMap<MessageId, Flag>,
    on_error: ErrorHandler,
}

impl ConversationViewModel {
    pub fn new(
        conversation: Conversation,
        session: &SessionContext,
        delivery: DeliveryConfirmation,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let screener = match Screener::new() {
            Ok(screener) => Some(screener),
            Err(err) => {
                log::error!("Message screening disabled: {err}");
                None
            }
        };
        Self {
            conversation,
            local_sender_id: session.user_id().to_string(),
            local_role: session.role(),
            delivery,
            clock: MessageClock::new(),
            channel: None,
            outbound: None,
            events_tx,
            events_rx,
            screener,
            flags: HashMap::new(),
            on_error: Box::new(|err: &ChatError| log::warn!("Conversation error: {err}")),
        }
    }

    /// Replaces the default (logging) handler for errors surfaced
    /// asynchronously, such as a failed send.
    pub fn set_error_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&ChatError) + Send + 'static,
    {
        self.on_error = Box::new(handler);
    }

    /// Opens a channel for this conversation. On failure the error is also
    /// reported to the error handler and the conversation keeps working in
    /// local mode.
    pub async fn connect<C: Connector>(&mut self, connector: &C, config: &ChannelConfig) -> Result<()> {
        match ChannelSession::open(connector, config).await {
            Ok(session) => self.attach(session),
            Err(err) => {
                (self.on_error)(&err);
                Err(err)
            }
        }
    }

    /// Takes ownership of an open session and routes its payloads here.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach(&mut self, mut session: ChannelSession) -> Result<()> {
        let events = self.events_tx.clone();
        session.on_receive(move |payload| {
            if events.send(ConversationEvent::Inbound(payload)).is_err() {
                log::debug!("Conversation dropped; discarding inbound payload");
            }
        })?;

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_outbound(
            session.sender(),
            queue_rx,
            self.events_tx.clone(),
            self.delivery.local_timer(),
        ));
        self.outbound = Some(queue_tx);

        if let Some(mut previous) = self.channel.replace(session) {
            previous.close();
        }
        Ok(())
    }

    /// Appends a new local message and queues it for the channel.
    pub fn send_text(&mut self, text: &str) -> Result<MessageId> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyInput);
        }

        let message = Message::outgoing(
            text,
            self.clock.next(),
            self.local_sender_id.as_str(),
            self.conversation.id(),
        );
        let message_id = message.id().clone();
        self.conversation.store.append(message.clone());
        self.screen(&message_id, self.local_role, text);
        self.forward(message);
        Ok(message_id)
    }

    /// Queues `message` behind everything written before it. Without a
    /// writer the failure is still reported through the event queue.
    fn forward(&self, message: Message) {
        let message_id = message.id().clone();
        let queued = self
            .outbound
            .as_ref()
            .is_some_and(|queue| queue.send(Outbound::Message(message)).is_ok());
        if !queued {
            let _ = self.events_tx.send(ConversationEvent::SendFailed {
                message_id,
                error: ChatError::ChannelNotOpen,
            });
        }
    }

    fn screen(&mut self, message_id: &MessageId, role: Role, text: &str) {
        let Some(flag) = self.screener.as_ref().and_then(|s| s.screen(role, text)) else {
            return;
        };
        match flag {
            Flag::Emergency => log::error!(
                "Student emergency flagged on {message_id} in `{}`",
                self.conversation.id
            ),
            Flag::Misconduct(kind) => log::error!(
                "Counsellor misconduct flagged on {message_id} in `{}`: {}",
                self.conversation.id,
                kind.as_str()
            ),
        }
        self.flags.insert(message_id.clone(), flag);
    }

    /// Handles one raw channel payload. Malformed or foreign payloads are
    /// logged and dropped.
    pub fn on_channel_message(&mut self, payload: &[u8]) -> ConversationUpdate {
        match codec::decode(payload) {
            Ok(Frame::Message(message)) => self.accept_message(message),
            Ok(Frame::Receipt(ReceiptEnvelope { receipt })) => self.accept_receipt(receipt),
            Err(err) => {
                log::warn!(
                    "Discarding payload on conversation `{}`: {err}",
                    self.conversation.id
                );
                ConversationUpdate::Ignored
            }
        }
    }

    fn accept_message(&mut self, message: Message) -> ConversationUpdate {
        if message.conversation_id() != self.conversation.id {
            log::warn!(
                "Dropping message {} addressed to conversation `{}`",
                message.id(),
                message.conversation_id()
            );
            return ConversationUpdate::Ignored;
        }

        let message_id = message.id().clone();
        let from_peer = !message.is_from(&self.local_sender_id);
        let text = message.text().to_string();
        if !self.conversation.store.append(message) {
            return ConversationUpdate::Ignored;
        }
        if from_peer {
            self.screen(&message_id, self.local_role.counterpart(), &text);
            if self.delivery.uses_receipts() {
                self.send_receipt(message_id.clone(), MessageStatus::Delivered);
            }
        }
        ConversationUpdate::Appended(message_id)
    }

    fn accept_receipt(&mut self, receipt: Receipt) -> ConversationUpdate {
        if receipt.conversation_id != self.conversation.id {
            log::warn!(
                "Dropping receipt for conversation `{}`",
                receipt.conversation_id
            );
            return ConversationUpdate::Ignored;
        }
        let ours = self
            .conversation
            .store
            .get(&receipt.message_id)
            .is_some_and(|message| message.is_from(&self.local_sender_id));
        if !ours {
            log::debug!("Receipt for {} does not match a local message", receipt.message_id);
            return ConversationUpdate::Ignored;
        }
        self.apply_status(receipt.message_id, receipt.status)
    }

    /// Moves a message forward. Confirmations that arrive after the message
    /// already went further (a timer firing after a read receipt) are stale
    /// and ignored.
    fn apply_status(&mut self, message_id: MessageId, status: MessageStatus) -> ConversationUpdate {
        let stale = self
            .conversation
            .store
            .get(&message_id)
            .is_some_and(|message| message.status() >= status);
        if stale {
            return ConversationUpdate::Ignored;
        }

        match self.conversation.store.update_status(&message_id, status) {
            Ok(Some(Transition::Advanced { to, .. })) => ConversationUpdate::StatusChanged {
                message_id,
                status: to,
            },
            Ok(_) => ConversationUpdate::Ignored,
            Err(err) => {
                (self.on_error)(&err);
                ConversationUpdate::Ignored
            }
        }
    }

    fn send_receipt(&self, message_id: MessageId, status: MessageStatus) {
        let Some(queue) = self.outbound.as_ref() else {
            return;
        };
        let receipt = Receipt {
            message_id,
            conversation_id: self.conversation.id.clone(),
            status,
        };
        if queue.send(Outbound::Receipt(receipt)).is_err() {
            log::warn!("Writer gone; {status} receipt not sent");
        }
    }

    /// Marks every unread incoming message as read. Returns how many changed.
    ///
    /// Reading is always an explicit action of the app (for example when the
    /// conversation gains focus); nothing marks messages read on its own.
    pub fn mark_read(&mut self) -> usize {
        let unread: Vec<MessageId> = self
            .conversation
            .store
            .snapshot()
            .iter()
            .filter(|message| !message.is_from(&self.local_sender_id))
            .filter(|message| message.status() < MessageStatus::Read)
            .map(|message| message.id().clone())
            .collect();

        let mut changed = 0;
        for message_id in unread {
            if let ConversationUpdate::StatusChanged { .. } =
                self.apply_status(message_id.clone(), MessageStatus::Read)
            {
                changed += 1;
                if self.delivery.uses_receipts() {
                    self.send_receipt(message_id, MessageStatus::Read);
                }
            }
        }
        changed
    }

    fn handle_event(&mut self, event: ConversationEvent) -> ConversationUpdate {
        match event {
            ConversationEvent::Inbound(payload) => self.on_channel_message(&payload),
            ConversationEvent::DeliveryTimerElapsed(message_id) => {
                self.apply_status(message_id, MessageStatus::Delivered)
            }
            ConversationEvent::SendFailed { message_id, error } => {
                log::warn!("Message {message_id} not forwarded: {error}");
                (self.on_error)(&error);
                ConversationUpdate::SendFailed(message_id)
            }
        }
    }

    /// Waits for the next queued event and applies it.
    pub async fn process_next(&mut self) -> Option<ConversationUpdate> {
        let event = self.events_rx.recv().await?;
        Some(self.handle_event(event))
    }

    /// Applies every event queued so far without waiting. Returns the
    /// updates that changed something.
    pub fn pump_events(&mut self) -> Vec<ConversationUpdate> {
        let mut updates = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            let update = self.handle_event(event);
            if update != ConversationUpdate::Ignored {
                updates.push(update);
            }
        }
        updates
    }

    pub fn snapshot(&self) -> Snapshot {
        self.conversation.snapshot()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn local_sender_id(&self) -> &str {
        &self.local_sender_id
    }

    /// Screening annotation for a stored message, if it was flagged.
    pub fn flag(&self, message_id: &MessageId) -> Option<Flag> {
        self.flags.get(message_id).copied()
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel
            .as_ref()
            .map_or(ChannelState::Idle, ChannelSession::state)
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary::of(&self.conversation, &self.local_sender_id)
    }

    /// Tears the channel down when the screen goes away. Idempotent.
    pub fn close(&mut self) {
        if let Some(channel) = self.channel.as_mut() {
            channel.close();
        }
    }
}

/// The view model's only channel writer: drains the queue in order and starts
/// each delivery timer once its message has been written.
async fn write_outbound(
    sender: ChannelSender,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<ConversationEvent>,
    timer: Option<Duration>,
) {
    while let Some(item) = queue.recv().await {
        match item {
            Outbound::Message(message) => {
                let message_id = message.id().clone();
                match sender.send(&message).await {
                    Ok(()) => {
                        if let Some(delay) = timer {
                            tokio::spawn(delivery::confirm_after(delay, message_id, events.clone()));
                        }
                    }
                    Err(error) => {
                        let _ = events.send(ConversationEvent::SendFailed { message_id, error });
                    }
                }
            }
            Outbound::Receipt(receipt) => {
                let message_id = receipt.message_id.clone();
                let status = receipt.status;
                if let Err(err) = sender.send_receipt(receipt).await {
                    log::warn!("Failed to send {status} receipt for {message_id}: {err}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::chat::screening::Misconduct;
    use crate::network::memory;
    use crate::session::LocalUser;

    fn view_model(user: &str, delivery: DeliveryConfirmation) -> ConversationViewModel {
        let session = SessionContext::ephemeral(LocalUser::new(user, user));
        ConversationViewModel::new(Conversation::new("conv1", "Counselor"), &session, delivery)
    }

    fn timer() -> DeliveryConfirmation {
        DeliveryConfirmation::LocalTimer { delay_ms: 1000 }
    }

    async fn connected_pair(
        delivery: DeliveryConfirmation,
    ) -> (ConversationViewModel, ConversationViewModel) {
        let (a, b) = memory::pair(16);
        let config = ChannelConfig::new("conv1");
        let mut student = view_model("student", delivery);
        let mut counsellor = view_model("counsellor", delivery);
        student.connect(&a, &config).await.unwrap();
        counsellor.connect(&b, &config).await.unwrap();
        (student, counsellor)
    }

    fn payload(json: &str) -> Vec<u8> {
        json.as_bytes().to_vec()
    }

    #[tokio::test]
    async fn blank_text_is_rejected_without_mutation() {
        let mut vm = view_model("student", timer());
        for text in ["", "   ", "\n\t"] {
            assert!(matches!(vm.send_text(text), Err(ChatError::EmptyInput)));
        }
        assert!(vm.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sent_message_becomes_delivered_after_timer() {
        let (mut student, _counsellor) = connected_pair(timer()).await;

        let id = student.send_text("hi").unwrap();
        let snapshot = student.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.newest().unwrap().status(), MessageStatus::Sent);
        assert_eq!(snapshot.newest().unwrap().text(), "hi");

        let update = student.process_next().await.unwrap();
        assert_eq!(
            update,
            ConversationUpdate::StatusChanged {
                message_id: id.clone(),
                status: MessageStatus::Delivered
            }
        );
        assert_eq!(
            student.conversation().store().get(&id).unwrap().status(),
            MessageStatus::Delivered
        );
    }

    #[tokio::test(start_paused = true)]
    async fn delivered_status_waits_for_timer() {
        let (mut student, _counsellor) = connected_pair(timer()).await;
        let id = student.send_text("hi").unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(student.pump_events().is_empty());
        assert_eq!(
            student.conversation().store().get(&id).unwrap().status(),
            MessageStatus::Sent
        );

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(student.pump_events().len(), 1);
        assert_eq!(
            student.conversation().store().get(&id).unwrap().status(),
            MessageStatus::Delivered
        );
    }

    #[tokio::test]
    async fn peer_receives_message_with_original_fields() {
        let (mut student, mut counsellor) = connected_pair(timer()).await;
        let id = student.send_text("hello there").unwrap();

        let update = counsellor.process_next().await.unwrap();
        assert_eq!(update, ConversationUpdate::Appended(id.clone()));

        let sent = student.conversation().store().get(&id).unwrap().clone();
        let received = counsellor.conversation().store().get(&id).unwrap();
        assert_eq!(received, &sent);
        assert_eq!(received.sender_id(), "student");
        assert_eq!(received.status(), MessageStatus::Sent);
    }

    #[tokio::test]
    async fn send_without_channel_keeps_local_message() {
        let mut vm = view_model("student", timer());
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        vm.set_error_handler(move |err| sink.lock().unwrap().push(err.to_string()));

        let id = vm.send_text("offline").unwrap();
        let update = vm.process_next().await.unwrap();

        assert_eq!(update, ConversationUpdate::SendFailed(id.clone()));
        assert_eq!(vm.snapshot().len(), 1);
        assert_eq!(vm.snapshot().newest().unwrap().id(), &id);
        assert_eq!(errors.lock().unwrap().as_slice(), ["channel is not open"]);
    }

    #[tokio::test]
    async fn send_after_close_reports_channel_not_open() {
        let (mut student, _counsellor) = connected_pair(timer()).await;
        student.close();
        student.close();
        assert_eq!(student.channel_state(), ChannelState::Closed);

        let id = student.send_text("late").unwrap();
        assert_eq!(
            student.process_next().await.unwrap(),
            ConversationUpdate::SendFailed(id)
        );
        assert_eq!(student.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn malformed_payload_leaves_store_unchanged() {
        let mut vm = view_model("student", timer());
        vm.send_text("mine").unwrap();
        let before: Vec<Message> = vm.snapshot().iter().cloned().collect();

        assert_eq!(vm.on_channel_message(b"{not json"), ConversationUpdate::Ignored);
        assert_eq!(
            vm.on_channel_message(&payload(r#"{"id":"x","text":"hi"}"#)),
            ConversationUpdate::Ignored
        );

        let after: Vec<Message> = vm.snapshot().iter().cloned().collect();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn malformed_payload_over_channel_is_dropped() {
        let (a, b) = memory::pair(4);
        let config = ChannelConfig::new("conv1");
        let mut vm = view_model("student", timer());
        vm.connect(&a, &config).await.unwrap();
        let raw = b.connect(&config).await.unwrap();

        raw.outbound.send(b"garbage".to_vec()).await.unwrap();
        assert_eq!(vm.process_next().await.unwrap(), ConversationUpdate::Ignored);
        assert!(vm.snapshot().is_empty());
    }

    #[tokio::test]
    async fn foreign_conversation_is_dropped() {
        let mut vm = view_model("student", timer());
        let json = r#"{"id":"m9","text":"hi","timestamp":1,"senderId":"other","conversationId":"conv2","status":"sent"}"#;
        assert_eq!(vm.on_channel_message(&payload(json)), ConversationUpdate::Ignored);
        assert!(vm.snapshot().is_empty());
    }

    #[tokio::test]
    async fn inbound_messages_append_in_arrival_order() {
        let mut vm = view_model("student", timer());
        let late = r#"{"id":"m2","text":"second","timestamp":50,"senderId":"c","conversationId":"conv1","status":"sent"}"#;
        let early = r#"{"id":"m1","text":"first","timestamp":10,"senderId":"c","conversationId":"conv1","status":"sent"}"#;
        vm.on_channel_message(&payload(late));
        vm.on_channel_message(&payload(early));
        vm.on_channel_message(&payload(early));

        let ids: Vec<String> = vm.snapshot().iter().map(|m| m.id().to_string()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn mark_read_only_touches_incoming() {
        let mut vm = view_model("student", timer());
        let own = vm.send_text("mine").unwrap();
        let json = r#"{"id":"m1","text":"hey","timestamp":1,"senderId":"c","conversationId":"conv1","status":"sent"}"#;
        vm.on_channel_message(&payload(json));

        assert_eq!(vm.mark_read(), 1);
        assert_eq!(vm.mark_read(), 0);
        let store = vm.conversation().store();
        assert_eq!(store.get(&MessageId::from("m1")).unwrap().status(), MessageStatus::Read);
        assert_eq!(store.get(&own).unwrap().status(), MessageStatus::Sent);
    }

    #[tokio::test]
    async fn receipts_advance_the_authors_copy() {
        let (mut student, mut counsellor) = connected_pair(DeliveryConfirmation::PeerReceipt).await;
        let id = student.send_text("are you there?").unwrap();

        assert_eq!(
            counsellor.process_next().await.unwrap(),
            ConversationUpdate::Appended(id.clone())
        );
        assert_eq!(
            student.process_next().await.unwrap(),
            ConversationUpdate::StatusChanged {
                message_id: id.clone(),
                status: MessageStatus::Delivered
            }
        );

        assert_eq!(counsellor.mark_read(), 1);
        assert_eq!(
            student.process_next().await.unwrap(),
            ConversationUpdate::StatusChanged {
                message_id: id.clone(),
                status: MessageStatus::Read
            }
        );
    }

    #[tokio::test]
    async fn receipt_for_someone_elses_message_is_ignored() {
        let mut vm = view_model("student", DeliveryConfirmation::PeerReceipt);
        let json = r#"{"id":"m1","text":"hey","timestamp":1,"senderId":"c","conversationId":"conv1","status":"sent"}"#;
        vm.on_channel_message(&payload(json));

        let receipt = r#"{"receipt":{"messageId":"m1","conversationId":"conv1","status":"read"}}"#;
        assert_eq!(vm.on_channel_message(&payload(receipt)), ConversationUpdate::Ignored);
        assert_eq!(
            vm.conversation().store().get(&MessageId::from("m1")).unwrap().status(),
            MessageStatus::Sent
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_after_read_receipt_is_ignored() {
        let mut vm = view_model("student", timer());
        let id = vm.send_text("hi").unwrap();
        let receipt = format!(
            r#"{{"receipt":{{"messageId":"{id}","conversationId":"conv1","status":"read"}}}}"#
        );
        assert!(matches!(
            vm.on_channel_message(receipt.as_bytes()),
            ConversationUpdate::StatusChanged { status: MessageStatus::Read, .. }
        ));

        let update = vm.handle_event(ConversationEvent::DeliveryTimerElapsed(id.clone()));
        assert_eq!(update, ConversationUpdate::Ignored);
        assert_eq!(
            vm.conversation().store().get(&id).unwrap().status(),
            MessageStatus::Read
        );
    }

    #[tokio::test]
    async fn own_timestamps_are_strictly_increasing() {
        let mut vm = view_model("student", timer());
        for n in 0..5 {
            vm.send_text(&format!("m{n}")).unwrap();
        }
        let stamps: Vec<i64> = vm.snapshot().iter().map(Message::timestamp).collect();
        assert!(stamps.windows(2).all(|pair| pair[0] > pair[1]));
    }

    #[tokio::test]
    async fn outgoing_student_distress_is_flagged() {
        let mut vm = view_model("student", timer());
        let urgent = vm.send_text("I want to die").unwrap();
        let calm = vm.send_text("see you thursday").unwrap();

        assert_eq!(vm.flag(&urgent), Some(Flag::Emergency));
        assert_eq!(vm.flag(&calm), None);
        assert_eq!(vm.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn incoming_counsellor_text_is_screened_for_misconduct() {
        let mut vm = view_model("student", timer());
        let json = r#"{"id":"m1","text":"Let's meet up outside school","timestamp":1,"senderId":"c","conversationId":"conv1","status":"sent"}"#;

        assert_eq!(
            vm.on_channel_message(&payload(json)),
            ConversationUpdate::Appended(MessageId::from("m1"))
        );
        assert_eq!(
            vm.flag(&MessageId::from("m1")),
            Some(Flag::Misconduct(Misconduct::InappropriateMeeting))
        );
    }

    #[tokio::test]
    async fn counsellor_side_screens_student_text_for_danger() {
        let session = SessionContext::ephemeral(
            LocalUser::new("counsellor", "Dr. Smith").with_role(Role::Counsellor),
        );
        let mut vm =
            ConversationViewModel::new(Conversation::new("conv1", "Student"), &session, timer());
        let json = r#"{"id":"m1","text":"I took too many pills","timestamp":1,"senderId":"s","conversationId":"conv1","status":"sent"}"#;
        vm.on_channel_message(&payload(json));

        assert_eq!(vm.flag(&MessageId::from("m1")), Some(Flag::Emergency));
        let own = vm.send_text("How are you feeling now?").unwrap();
        assert_eq!(vm.flag(&own), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn receipts_follow_messages_in_order() {
        let (mut student, mut counsellor) = connected_pair(DeliveryConfirmation::PeerReceipt).await;
        let sent: Vec<MessageId> = (0..20)
            .map(|n| student.send_text(&format!("m{n}")).unwrap())
            .collect();

        let mut received = Vec::new();
        while received.len() < sent.len() {
            if let Some(ConversationUpdate::Appended(id)) = counsellor.process_next().await {
                received.push(id);
            }
        }
        assert_eq!(received, sent);

        let mut delivered = Vec::new();
        while delivered.len() < sent.len() {
            if let Some(ConversationUpdate::StatusChanged { message_id, .. }) =
                student.process_next().await
            {
                delivered.push(message_id);
            }
        }
        assert_eq!(delivered, sent);
    }
}
