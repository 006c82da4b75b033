//! Chat Router
//!
//! One handler per inbound [`ClientEvent`] variant. Messages are always
//! appended to the store before anything is fanned out, so a client never
//! sees a message that a later history fetch cannot reproduce.
//!
//! Errors stay inside the event that caused them: [`ChatRouter::dispatch`]
//! logs and counts them, and only `Forbidden` is reported back, to the
//! acting session alone.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, warn};

use crate::application::channels::{Dispatcher, Topic, UserQueue};
use crate::application::dto::{
    required_group, ChatMessageDto, ClientEvent, DeliveredPayload, GroupDeliveredPayload,
    GroupDeliveryEvent, GroupDeliveryStatus, GroupMessageDto, GroupReadEvent, GroupReadPayload,
    GroupSendPayload, GroupTypingEvent, GroupTypingPayload, MessagesDeliveredEvent, ReadPayload,
    ReadReceiptEvent, ReadRecordDto, RejectedEvent, SendPayload, ServerEvent, SubscribePayload,
    TypingEvent, TypingPayload, epoch_ms,
};
use crate::domain::{
    display_name_or_id, DeliveryLedger, DirectDelivery, GroupDirectory, GroupId, Message,
    MessageId, MessageStore, MessageType, Recipient, UserDirectory, UserId,
};
use crate::infrastructure::metrics;
use crate::shared::error::AppError;

/// Who sent an event, and over which session.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub user: UserId,
    pub session_id: String,
}

impl EventContext {
    pub fn new(user: UserId, session_id: impl Into<String>) -> Self {
        Self {
            user,
            session_id: session_id.into(),
        }
    }
}

pub struct ChatRouter {
    store: Arc<dyn MessageStore>,
    ledger: Arc<dyn DeliveryLedger>,
    groups: Arc<dyn GroupDirectory>,
    users: Arc<dyn UserDirectory>,
    dispatcher: Arc<dyn Dispatcher>,
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str, AppError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(AppError::InvalidArgument(format!("{} is required", field))),
    }
}

fn required_content(value: &Option<String>) -> Result<String, AppError> {
    value
        .clone()
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| AppError::InvalidArgument("content is required".into()))
}

impl ChatRouter {
    pub fn new(
        store: Arc<dyn MessageStore>,
        ledger: Arc<dyn DeliveryLedger>,
        groups: Arc<dyn GroupDirectory>,
        users: Arc<dyn UserDirectory>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            store,
            ledger,
            groups,
            users,
            dispatcher,
        }
    }

    /// Handle one event, containing any failure.
    pub async fn dispatch(&self, ctx: &EventContext, event: ClientEvent) {
        let name = event.name();
        let Err(e) = self.handle(ctx, event).await else {
            return;
        };

        metrics::record_dropped_event(name, e.kind());
        match &e {
            AppError::Forbidden(reason) => {
                warn!(user = %ctx.user, event = name, reason = %reason, "Event rejected");
                self.dispatcher.send_to_session(
                    &ctx.session_id,
                    ServerEvent::Rejected(RejectedEvent {
                        event: name.to_string(),
                        code: e.kind().to_string(),
                        reason: reason.clone(),
                    }),
                );
            }
            e if e.is_client_error() => {
                warn!(user = %ctx.user, event = name, error = %e, "Event dropped");
            }
            e => {
                error!(user = %ctx.user, event = name, error = %e, "Event failed");
            }
        }
    }

    /// Route one event to its handler.
    pub async fn handle(&self, ctx: &EventContext, event: ClientEvent) -> Result<(), AppError> {
        match event {
            ClientEvent::Send(p) => self.send(ctx, p).await,
            ClientEvent::Join => self.join(ctx).await,
            ClientEvent::Typing(p) => self.typing(ctx, p),
            ClientEvent::Delivered(p) => self.delivered(ctx, p).await,
            ClientEvent::Read(p) => self.read(ctx, p).await,
            ClientEvent::GroupSend(p) => self.group_send(ctx, p).await,
            ClientEvent::GroupTyping(p) => self.group_typing(ctx, p).await,
            ClientEvent::GroupDelivered(p) => self.group_delivered(ctx, p).await,
            ClientEvent::GroupRead(p) => self.group_read(ctx, p).await,
            ClientEvent::Subscribe(p) => self.subscribe(ctx, p).await,
            ClientEvent::Unsubscribe(p) => self.unsubscribe(ctx, p),
        }
    }

    async fn send(&self, ctx: &EventContext, payload: SendPayload) -> Result<(), AppError> {
        let content = required_content(&payload.content)?;
        let id = MessageId::parse_or_generate(payload.message_id.as_deref())?;
        let recipient = match payload.to.as_deref().map(str::trim) {
            Some(to) if !to.is_empty() => Recipient::User(UserId::parse(to)?),
            _ => Recipient::Public,
        };

        let message = Message {
            id,
            sender: ctx.user.clone(),
            recipient,
            sender_name: None,
            content,
            message_type: MessageType::Chat,
            sent_at: Utc::now(),
        };

        let kind = if message.is_direct() { "direct" } else { "public" };
        let stored = self.store.append(&message).await?;
        metrics::record_persisted(kind, stored.inserted);
        if !stored.inserted {
            return self.echo_duplicate(ctx, id).await;
        }

        let dto = ChatMessageDto::new(&message, DirectDelivery::default());
        match &message.recipient {
            Recipient::User(to) => {
                debug!(message_id = %id, from = %ctx.user, to = %to, "Direct message");
                self.dispatcher
                    .send_to_user(to, UserQueue::Messages, ServerEvent::Message(dto.clone()));
                if to != &ctx.user {
                    self.dispatcher
                        .send_to_user(&ctx.user, UserQueue::Messages, ServerEvent::Message(dto));
                }
            }
            _ => {
                debug!(message_id = %id, from = %ctx.user, "Public message");
                self.dispatcher
                    .publish(Topic::Public, ServerEvent::PublicMessage(dto));
            }
        }
        Ok(())
    }

    /// A retried send: show the sender what was stored the first time.
    async fn echo_duplicate(&self, ctx: &EventContext, id: MessageId) -> Result<(), AppError> {
        let existing = self.store.by_id(id).await?;
        if existing.sender != ctx.user {
            return Err(AppError::Conflict(format!("message id {} already in use", id)));
        }
        debug!(message_id = %id, "Duplicate send absorbed");

        let event = match &existing.recipient {
            Recipient::User(_) => {
                let state = self.ledger.direct_state(id).await?;
                ServerEvent::Message(ChatMessageDto::new(&existing, state))
            }
            Recipient::Public => {
                ServerEvent::PublicMessage(ChatMessageDto::new(&existing, DirectDelivery::default()))
            }
            Recipient::Group(_) => match GroupMessageDto::from_message(&existing) {
                Some(dto) => ServerEvent::GroupMessage(dto),
                None => return Ok(()),
            },
        };
        let queue = if existing.group_id().is_some() {
            UserQueue::GroupMessages
        } else {
            UserQueue::Messages
        };
        self.dispatcher.send_to_user(&ctx.user, queue, event);
        Ok(())
    }

    /// Announcement only; nothing is stored.
    async fn join(&self, ctx: &EventContext) -> Result<(), AppError> {
        let name = display_name_or_id(self.users.as_ref(), &ctx.user).await;
        let announcement = Message {
            id: MessageId::generate(),
            sender: ctx.user.clone(),
            recipient: Recipient::Public,
            sender_name: Some(name.clone()),
            content: format!("{} joined the chat", name),
            message_type: MessageType::Join,
            sent_at: Utc::now(),
        };
        self.dispatcher.publish(
            Topic::Public,
            ServerEvent::PublicMessage(ChatMessageDto::new(&announcement, DirectDelivery::default())),
        );
        Ok(())
    }

    fn typing(&self, ctx: &EventContext, payload: TypingPayload) -> Result<(), AppError> {
        let to = UserId::parse(required(&payload.to, "to")?)?;
        self.dispatcher.send_to_user(
            &to,
            UserQueue::Typing,
            ServerEvent::Typing(TypingEvent {
                from: ctx.user.clone(),
                to: to.clone(),
                timestamp: epoch_ms(Utc::now()),
            }),
        );
        Ok(())
    }

    async fn delivered(&self, ctx: &EventContext, payload: DeliveredPayload) -> Result<(), AppError> {
        let id = MessageId::parse(required(&payload.message_id, "messageId")?)?;
        let message = self.store.by_id(id).await?;
        match message.direct_recipient() {
            Some(to) if to == &ctx.user => {}
            Some(_) => {
                return Err(AppError::Forbidden(
                    "only the recipient can acknowledge a message".into(),
                ))
            }
            None => return Err(AppError::InvalidArgument(format!("{} is not a direct message", id))),
        }

        if !self.ledger.mark_delivered(id, Utc::now()).await? {
            debug!(message_id = %id, "Already delivered");
            return Ok(());
        }

        let state = self.ledger.direct_state(id).await?;
        self.dispatcher.send_to_user(
            &message.sender,
            UserQueue::Messages,
            ServerEvent::MessagesDelivered(MessagesDeliveredEvent {
                messages: vec![ChatMessageDto::new(&message, state)],
            }),
        );
        Ok(())
    }

    async fn read(&self, ctx: &EventContext, payload: ReadPayload) -> Result<(), AppError> {
        let counterparty = UserId::parse(required(&payload.from, "from")?)?;
        let read_at = Utc::now();
        let ids = self.ledger.mark_read(&ctx.user, &counterparty, read_at).await?;
        let Some(last) = ids.last().copied() else {
            debug!(reader = %ctx.user, from = %counterparty, "Nothing to mark read");
            return Ok(());
        };

        debug!(reader = %ctx.user, from = %counterparty, count = ids.len(), "Conversation read");
        self.dispatcher.send_to_user(
            &counterparty,
            UserQueue::Messages,
            ServerEvent::ReadReceipt(ReadReceiptEvent {
                message_id: last,
                message_type: MessageType::ReadReceipt,
                from: ctx.user.clone(),
                to: counterparty.clone(),
                timestamp: epoch_ms(read_at),
                delivered: true,
                read_at: epoch_ms(read_at),
                message_ids: ids,
            }),
        );
        Ok(())
    }

    /// Members of `group`, `Forbidden` unless `user` is one of them.
    async fn members_for(&self, group: GroupId, user: &UserId) -> Result<Vec<UserId>, AppError> {
        let members = self.groups.get_members(group).await?;
        if !members.contains(user) {
            return Err(AppError::Forbidden(format!("not a member of group {}", group)));
        }
        Ok(members)
    }

    async fn ensure_member(&self, group: GroupId, user: &UserId) -> Result<(), AppError> {
        if self.groups.is_member(group, user).await? {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!("not a member of group {}", group)))
        }
    }

    async fn group_send(&self, ctx: &EventContext, payload: GroupSendPayload) -> Result<(), AppError> {
        let group = required_group(&payload.group_id)?;
        let content = required_content(&payload.content)?;
        let id = MessageId::parse_or_generate(payload.message_id.as_deref())?;
        let members = self.members_for(group, &ctx.user).await?;
        let sender_name = display_name_or_id(self.users.as_ref(), &ctx.user).await;

        let message = Message {
            id,
            sender: ctx.user.clone(),
            recipient: Recipient::Group(group),
            sender_name: Some(sender_name),
            content,
            message_type: MessageType::Chat,
            sent_at: Utc::now(),
        };

        let stored = self.store.append(&message).await?;
        metrics::record_persisted("group", stored.inserted);
        if !stored.inserted {
            return self.echo_duplicate(ctx, id).await;
        }

        let Some(dto) = GroupMessageDto::from_message(&message) else {
            return Ok(());
        };
        debug!(message_id = %id, group = %group, members = members.len(), "Group message");
        self.dispatcher
            .publish(Topic::Group(group), ServerEvent::GroupMessage(dto.clone()));
        for member in &members {
            self.dispatcher.send_to_user(
                member,
                UserQueue::GroupMessages,
                ServerEvent::GroupMessage(dto.clone()),
            );
        }
        Ok(())
    }

    async fn group_typing(&self, ctx: &EventContext, payload: GroupTypingPayload) -> Result<(), AppError> {
        let group = required_group(&payload.group_id)?;
        self.ensure_member(group, &ctx.user).await?;
        self.dispatcher.publish(
            Topic::GroupTyping(group),
            ServerEvent::GroupTyping(GroupTypingEvent {
                group_id: group,
                from: ctx.user.clone(),
                timestamp: epoch_ms(Utc::now()),
            }),
        );
        Ok(())
    }

    /// Load a message and check it belongs to `group`.
    async fn group_message(&self, group: GroupId, id: MessageId) -> Result<Message, AppError> {
        let message = self.store.by_id(id).await?;
        if message.group_id() != Some(group) {
            return Err(AppError::NotFound(format!("message {} in group {}", id, group)));
        }
        Ok(message)
    }

    async fn group_delivered(
        &self,
        ctx: &EventContext,
        payload: GroupDeliveredPayload,
    ) -> Result<(), AppError> {
        let group = required_group(&payload.group_id)?;
        let id = MessageId::parse(required(&payload.message_id, "messageId")?)?;
        self.ensure_member(group, &ctx.user).await?;
        let message = self.group_message(group, id).await?;
        if message.sender == ctx.user {
            return Ok(());
        }

        let update = self.ledger.mark_group_delivered(id, &ctx.user, Utc::now()).await?;
        if !update.inserted {
            debug!(message_id = %id, recipient = %ctx.user, "Group delivery already recorded");
            return Ok(());
        }
        self.dispatcher.publish(
            Topic::GroupDelivery(group),
            ServerEvent::GroupDelivery(GroupDeliveryEvent {
                group_id: group,
                updates: vec![GroupDeliveryStatus {
                    message_id: id,
                    delivered_recipients: update.recipients,
                }],
            }),
        );
        Ok(())
    }

    async fn group_read(&self, ctx: &EventContext, payload: GroupReadPayload) -> Result<(), AppError> {
        let group = required_group(&payload.group_id)?;
        if payload.message_ids.is_empty() {
            return Err(AppError::InvalidArgument("messageIds is required".into()));
        }
        let ids = payload
            .message_ids
            .iter()
            .map(|raw| MessageId::parse(raw))
            .collect::<Result<Vec<_>, _>>()?;
        self.ensure_member(group, &ctx.user).await?;

        let now = Utc::now();
        let mut synthesized: BTreeMap<MessageId, GroupDeliveryStatus> = BTreeMap::new();
        for id in ids {
            let message = match self.group_message(group, id).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(message_id = %id, group = %group, error = %e, "Skipping read ack");
                    continue;
                }
            };
            if message.sender == ctx.user {
                continue;
            }

            let update = self.ledger.mark_group_read(id, &ctx.user, now).await?;
            if update.delivery_synthesized {
                let recipients = self.ledger.group_delivered_recipients(id).await?;
                synthesized.insert(
                    id,
                    GroupDeliveryStatus {
                        message_id: id,
                        delivered_recipients: recipients,
                    },
                );
            }
            if update.inserted {
                self.dispatcher.publish(
                    Topic::GroupRead(group),
                    ServerEvent::GroupRead(GroupReadEvent {
                        group_id: group,
                        message_id: id,
                        read_recipients: update.reads.iter().map(ReadRecordDto::from).collect(),
                    }),
                );
            }
        }

        if !synthesized.is_empty() {
            self.dispatcher.publish(
                Topic::GroupDelivery(group),
                ServerEvent::GroupDelivery(GroupDeliveryEvent {
                    group_id: group,
                    updates: synthesized.into_values().collect(),
                }),
            );
        }
        Ok(())
    }

    async fn subscribe(&self, ctx: &EventContext, payload: SubscribePayload) -> Result<(), AppError> {
        let topic: Topic = payload.topic.parse()?;
        if let Some(group) = topic.group_id() {
            self.ensure_member(group, &ctx.user).await?;
        }
        if !self.dispatcher.subscribe(&ctx.session_id, topic) {
            return Err(AppError::NotFound(format!("session {}", ctx.session_id)));
        }
        debug!(session_id = %ctx.session_id, topic = %topic, "Subscribed");
        Ok(())
    }

    fn unsubscribe(&self, ctx: &EventContext, payload: SubscribePayload) -> Result<(), AppError> {
        let topic: Topic = payload.topic.parse()?;
        self.dispatcher.unsubscribe(&ctx.session_id, topic);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MockGroupDirectory, MockUserDirectory};
    use crate::infrastructure::memory::{MemoryDatabase, MemoryDeliveryLedger, MemoryMessageStore};
    use parking_lot::Mutex;

    /// Records every outbound event.
    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(String, ServerEvent)>>,
    }

    impl Recorder {
        fn names_for(&self, target: &str) -> Vec<&'static str> {
            self.sent
                .lock()
                .iter()
                .filter(|(t, _)| t == target)
                .map(|(_, e)| e.event_name())
                .collect()
        }
    }

    impl Dispatcher for Recorder {
        fn send_to_user(&self, user: &UserId, _queue: UserQueue, event: ServerEvent) {
            self.sent.lock().push((user.to_string(), event));
        }
        fn publish(&self, topic: Topic, event: ServerEvent) {
            self.sent.lock().push((format!("topic:{}", topic), event));
        }
        fn send_to_session(&self, session_id: &str, event: ServerEvent) -> bool {
            self.sent.lock().push((format!("session:{}", session_id), event));
            true
        }
        fn subscribe(&self, _session_id: &str, _topic: Topic) -> bool {
            true
        }
        fn unsubscribe(&self, _session_id: &str, _topic: Topic) {}
    }

    fn user(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn router(groups: MockGroupDirectory) -> (ChatRouter, Arc<Recorder>, Arc<MemoryMessageStore>) {
        let db = Arc::new(MemoryDatabase::new());
        let store = Arc::new(MemoryMessageStore::new(db.clone()));
        let ledger = Arc::new(MemoryDeliveryLedger::new(db));
        let mut users = MockUserDirectory::new();
        users.expect_display_name_of().returning(|_| Ok(None));
        let recorder = Arc::new(Recorder::default());
        let router = ChatRouter::new(
            store.clone(),
            ledger,
            Arc::new(groups),
            Arc::new(users),
            recorder.clone(),
        );
        (router, recorder, store)
    }

    fn ctx(email: &str) -> EventContext {
        EventContext::new(user(email), "session-1")
    }

    #[tokio::test]
    async fn test_send_without_content_is_dropped_silently() {
        let (router, recorder, _) = router(MockGroupDirectory::new());
        let event = ClientEvent::Send(SendPayload {
            to: Some("b@x.com".into()),
            content: None,
            message_id: None,
        });

        router.dispatch(&ctx("a@x.com"), event).await;
        assert!(recorder.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_send_echoes_only_to_sender() {
        let (router, recorder, _) = router(MockGroupDirectory::new());
        let id = MessageId::generate().to_string();
        let payload = SendPayload {
            to: Some("b@x.com".into()),
            content: Some("hi".into()),
            message_id: Some(id),
        };

        router.handle(&ctx("a@x.com"), ClientEvent::Send(payload.clone())).await.unwrap();
        router.handle(&ctx("a@x.com"), ClientEvent::Send(payload)).await.unwrap();

        assert_eq!(recorder.names_for("b@x.com"), vec!["MESSAGE"]);
        assert_eq!(recorder.names_for("a@x.com"), vec!["MESSAGE", "MESSAGE"]);
    }

    #[tokio::test]
    async fn test_non_member_group_send_is_rejected_to_session() {
        let mut groups = MockGroupDirectory::new();
        groups
            .expect_get_members()
            .returning(|_| Ok(vec![UserId::parse("b@x.com").unwrap()]));
        let (router, recorder, store) = router(groups);

        let event = ClientEvent::GroupSend(GroupSendPayload {
            group_id: Some(crate::application::dto::RawGroupId::Number(1)),
            content: Some("hello".into()),
            message_id: None,
        });
        router.dispatch(&ctx("a@x.com"), event).await;

        assert_eq!(recorder.names_for("session:session-1"), vec!["REJECTED"]);
        assert_eq!(recorder.sent.lock().len(), 1);
        let history = store
            .history(&crate::domain::ConversationKey::Group(GroupId(1)))
            .await
            .unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_group_is_dropped_without_rejection() {
        let mut groups = MockGroupDirectory::new();
        groups
            .expect_get_members()
            .returning(|g| Err(AppError::NotFound(format!("group {}", g))));
        let (router, recorder, _) = router(groups);

        let event = ClientEvent::GroupSend(GroupSendPayload {
            group_id: Some(crate::application::dto::RawGroupId::Number(99)),
            content: Some("hello".into()),
            message_id: None,
        });
        router.dispatch(&ctx("a@x.com"), event).await;
        assert!(recorder.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_only_recipient_may_acknowledge_delivery() {
        let (router, recorder, store) = router(MockGroupDirectory::new());
        router
            .handle(
                &ctx("a@x.com"),
                ClientEvent::Send(SendPayload {
                    to: Some("b@x.com".into()),
                    content: Some("hi".into()),
                    message_id: None,
                }),
            )
            .await
            .unwrap();
        let key = crate::domain::ConversationKey::direct(&user("a@x.com"), &user("b@x.com"));
        let id = store.history(&key).await.unwrap()[0].id.to_string();

        let result = router
            .handle(
                &ctx("c@x.com"),
                ClientEvent::Delivered(DeliveredPayload {
                    message_id: Some(id),
                }),
            )
            .await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
        assert!(!recorder.names_for("a@x.com").contains(&"MESSAGES_DELIVERED"));
    }

    #[tokio::test]
    async fn test_read_with_nothing_unread_sends_no_receipt() {
        let (router, recorder, _) = router(MockGroupDirectory::new());
        router
            .handle(
                &ctx("b@x.com"),
                ClientEvent::Read(ReadPayload {
                    from: Some("a@x.com".into()),
                }),
            )
            .await
            .unwrap();
        assert!(recorder.sent.lock().is_empty());
    }
}
