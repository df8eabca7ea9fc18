//! Chat and notice sending on top of the sync engine and the envelope
//! service.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use edusync_realtime::{Listener, Multiplexer, TypingNotifier};
use edusync_remote::RemoteStore;
use edusync_shared::constants::{BROADCAST_RECEIVER, TYPING_EVENT};
use edusync_shared::protocol::TypingEvent;
use edusync_shared::records::{ChatMessage, Notice, Priority};
use edusync_shared::{EnvelopeService, MessageKind, ThreadId};

use crate::engine::{ChangeHandlers, Patch, SubscriptionHandle, SyncEngine, WriteOutcome};
use crate::error::SyncError;

/// A record as it was built and written, with the fate of its remote write.
#[derive(Debug)]
pub struct Sent<T> {
    pub record: T,
    pub outcome: WriteOutcome,
}

/// Result of [`MessagingOrchestrator::send_broadcast`].
#[derive(Debug)]
pub struct BroadcastSent {
    pub notice: Sent<Notice>,
    pub message: Sent<ChatMessage>,
}

/// Who is sending.
#[derive(Debug, Clone, Copy)]
pub struct Author<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub role: &'a str,
}

pub struct MessagingOrchestrator<R> {
    engine: Arc<SyncEngine<R>>,
    envelopes: EnvelopeService,
    realtime: Multiplexer,
    typing_window: Duration,
}

impl<R: RemoteStore> MessagingOrchestrator<R> {
    pub fn new(
        engine: Arc<SyncEngine<R>>,
        envelopes: EnvelopeService,
        realtime: Multiplexer,
        typing_window: Duration,
    ) -> Self {
        Self {
            engine,
            envelopes,
            realtime,
            typing_window,
        }
    }

    pub fn envelopes(&self) -> &EnvelopeService {
        &self.envelopes
    }

    /// Send a chat message. Private messages are sealed for the
    /// sender/receiver thread; messages to `ALL` stay plaintext.
    ///
    /// The returned record carries the stored text, i.e. the envelope for
    /// private messages.
    pub async fn send_message(
        &self,
        sender: Author<'_>,
        receiver_id: &str,
        text: &str,
    ) -> Result<Sent<ChatMessage>, SyncError> {
        let kind = MessageKind::for_receiver(receiver_id);
        let body = match kind {
            MessageKind::Broadcast => text.to_string(),
            MessageKind::Private => self
                .envelopes
                .encrypt(text, &ThreadId::between(sender.id, receiver_id)),
        };

        let message = ChatMessage {
            id: Uuid::new_v4().to_string(),
            sender_id: sender.id.to_string(),
            receiver_id: receiver_id.to_string(),
            sender_name: sender.name.to_string(),
            sender_role: sender.role.to_string(),
            text: body,
            timestamp: Utc::now(),
            is_read: false,
            kind,
        };

        let outcome = self.engine.create(message.clone()).await?;
        debug!(id = %message.id, to = receiver_id, kind = ?kind, "message sent");
        Ok(Sent {
            record: message,
            outcome,
        })
    }

    /// Post a notice and announce it to everyone in chat with the same text.
    pub async fn send_broadcast(
        &self,
        sender: Author<'_>,
        text: &str,
        priority: Priority,
    ) -> Result<BroadcastSent, SyncError> {
        let notice = Notice {
            id: Uuid::new_v4().to_string(),
            title: text.lines().next().unwrap_or_default().to_string(),
            content: text.to_string(),
            priority,
            author_id: sender.id.to_string(),
            author_name: sender.name.to_string(),
            author_role: sender.role.to_string(),
            created_at: Utc::now(),
        };
        let notice_outcome = self.engine.create(notice.clone()).await?;
        let message = self.send_message(sender, BROADCAST_RECEIVER, text).await?;

        info!(notice = %notice.id, priority = ?priority, "broadcast posted");
        Ok(BroadcastSent {
            notice: Sent {
                record: notice,
                outcome: notice_outcome,
            },
            message,
        })
    }

    /// `message` with its text readable. Undecryptable envelopes read as the
    /// placeholder.
    pub fn open_message(&self, mut message: ChatMessage) -> ChatMessage {
        if message.kind == MessageKind::Private {
            let thread = ThreadId::between(&message.sender_id, &message.receiver_id);
            message.text = self.envelopes.decrypt(&message.text, &thread);
        }
        message
    }

    /// Everything a user sent, received, or was broadcast, oldest first.
    pub async fn inbox(&self, user_id: &str) -> Result<Vec<ChatMessage>, SyncError> {
        let chats = self.engine.get_all::<ChatMessage>().await?;
        Ok(self.readable(chats, |m| {
            m.sender_id == user_id || m.receiver_id == user_id || m.kind == MessageKind::Broadcast
        }))
    }

    /// The private thread between `a` and `b`, oldest first.
    pub async fn conversation(&self, a: &str, b: &str) -> Result<Vec<ChatMessage>, SyncError> {
        let thread = ThreadId::between(a, b);
        let chats = self.engine.get_all::<ChatMessage>().await?;
        Ok(self.readable(chats, |m| {
            m.kind == MessageKind::Private && ThreadId::between(&m.sender_id, &m.receiver_id) == thread
        }))
    }

    pub async fn mark_read(&self, message_id: &str) -> Result<WriteOutcome, SyncError> {
        self.engine
            .update::<ChatMessage>(message_id, Patch::new().set("isRead", true))
            .await
    }

    /// Hand every new message addressed to `user_id` (including broadcasts)
    /// to `handler`, decrypted.
    pub fn watch_incoming<F>(&self, user_id: &str, handler: F) -> SubscriptionHandle
    where
        F: Fn(ChatMessage) + Send + Sync + 'static,
    {
        let user_id = user_id.to_string();
        let envelopes = self.envelopes.clone();

        self.engine.subscribe(ChangeHandlers::<ChatMessage>::new().on_insert(move |mut message| {
            let addressed = message.receiver_id == user_id
                || (message.kind == MessageKind::Broadcast && message.sender_id != user_id);
            if !addressed {
                return;
            }
            if message.kind == MessageKind::Private {
                let thread = ThreadId::between(&message.sender_id, &message.receiver_id);
                message.text = envelopes.decrypt(&message.text, &thread);
            }
            handler(message);
        }))
    }

    /// Debounced typing indicator from `sender_id` on the thread with
    /// `receiver_id`.
    pub fn typing(&self, sender_id: &str, receiver_id: &str) -> TypingNotifier {
        let channel = self.realtime.thread(&ThreadId::between(sender_id, receiver_id));
        TypingNotifier::new(channel, sender_id, self.typing_window)
    }

    /// Typing events on the thread between `a` and `b`, both participants
    /// included.
    pub fn on_typing<F>(&self, a: &str, b: &str, handler: F) -> Listener
    where
        F: Fn(TypingEvent) + Send + 'static,
    {
        let channel = self.realtime.thread(&ThreadId::between(a, b));
        channel.on(TYPING_EVENT, move |payload| {
            match serde_json::from_value::<TypingEvent>(payload) {
                Ok(event) => handler(event),
                Err(e) => warn!(error = %e, "malformed typing event"),
            }
        })
    }

    fn readable(
        &self,
        chats: Vec<ChatMessage>,
        keep: impl Fn(&ChatMessage) -> bool,
    ) -> Vec<ChatMessage> {
        let mut messages: Vec<ChatMessage> = chats
            .into_iter()
            .filter(|m| keep(m))
            .map(|m| self.open_message(m))
            .collect();
        messages.sort_by_key(|m| m.timestamp);
        messages
    }
}
