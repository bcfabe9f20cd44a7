//! Conversation view-model: the ordered message list, the pending input
//! buffer and the busy flag, kept in sync with the chat service.
//!
//! Each remote operation comes in two forms. `load_history` and `submit`
//! await the transport directly. Hosts that must keep drawing while a
//! request is out use the split form instead (`begin_*`, run the call on a
//! task, then `finish_*` with its result).

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::client::{ChatReply, ChatTransport, Exchange, TransportError};
use crate::input::InputBuffer;

pub const HISTORY_LOAD_ERROR: &str = "Could not load previous conversations.";
pub const SEND_ERROR: &str = "Something went wrong!";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    role: Role,
    text: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into() }
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self { role: Role::Bot, text: text.into() }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Notification sent to subscribers after every mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    /// The whole message list was replaced by a history load.
    Replaced,
    Appended(Message),
    Busy(bool),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("still waiting for a reply to the previous message")]
    Busy,

    #[error("previous conversations are still loading")]
    LoadingHistory,
}

pub struct Conversation {
    transport: Arc<dyn ChatTransport>,
    messages: Vec<Message>,
    input: InputBuffer,
    busy: bool,
    history_requested: bool,
    history_pending: bool,
    subscribers: Vec<mpsc::UnboundedSender<ConversationEvent>>,
}

impl Conversation {
    pub fn new(transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            transport,
            messages: Vec::new(),
            input: InputBuffer::new(),
            busy: false,
            history_requested: false,
            history_pending: false,
            subscribers: Vec::new(),
        }
    }

    pub fn transport(&self) -> Arc<dyn ChatTransport> {
        Arc::clone(&self.transport)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn input(&self) -> &InputBuffer {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut InputBuffer {
        &mut self.input
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ConversationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    fn notify(&mut self, event: ConversationEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn append(&mut self, message: Message) {
        self.messages.push(message.clone());
        self.notify(ConversationEvent::Appended(message));
    }

    fn set_busy(&mut self, busy: bool) {
        if self.busy != busy {
            self.busy = busy;
            self.notify(ConversationEvent::Busy(busy));
        }
    }

    /// Load the stored conversation from the service. Only the first call
    /// reaches the transport; later calls return the current messages.
    pub async fn load_history(&mut self) -> &[Message] {
        if self.begin_history_load() {
            let transport = self.transport();
            let result = transport.fetch_history().await;
            self.finish_history_load(result);
        }
        &self.messages
    }

    /// Returns false if history has already been requested this session.
    pub fn begin_history_load(&mut self) -> bool {
        if self.history_requested {
            debug!("history already requested, skipping");
            return false;
        }
        self.history_requested = true;
        self.history_pending = true;
        true
    }

    pub fn is_loading_history(&self) -> bool {
        self.history_pending
    }

    pub fn finish_history_load(&mut self, result: Result<Vec<Exchange>, TransportError>) {
        self.history_pending = false;
        self.messages = match result {
            Ok(history) => history
                .into_iter()
                .flat_map(|exchange| [Message::user(exchange.user), Message::bot(exchange.bot)])
                .collect(),
            Err(err) => {
                warn!(error = %err, "failed to load conversation history");
                vec![Message::bot(HISTORY_LOAD_ERROR)]
            }
        };
        debug!(count = self.messages.len(), "conversation history loaded");
        self.notify(ConversationEvent::Replaced);
    }

    /// Send `text` to the service and append the reply.
    ///
    /// Blank input is ignored. While history is loading, or a previous message
    /// is still waiting for its reply, the call is rejected and nothing changes.
    pub async fn submit(&mut self, text: &str) -> Result<(), SubmitError> {
        if let Some(message) = self.begin_submit(text)? {
            let transport = self.transport();
            let result = transport.send_message(&message).await;
            self.finish_submit(result);
        }
        Ok(())
    }

    /// Optimistically append the user message and mark the conversation busy.
    /// Returns the text to hand to the transport, or `None` for blank input.
    pub fn begin_submit(&mut self, text: &str) -> Result<Option<String>, SubmitError> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        // A history load replaces the message list, so nothing may be appended before it lands
        if self.history_pending {
            return Err(SubmitError::LoadingHistory);
        }
        if self.busy {
            return Err(SubmitError::Busy);
        }

        self.append(Message::user(text));
        self.input.clear();
        self.set_busy(true);
        Ok(Some(text.to_string()))
    }

    pub fn finish_submit(&mut self, result: Result<ChatReply, TransportError>) {
        if !self.busy {
            debug!("reply arrived with no submission outstanding, ignoring");
            return;
        }

        let reply = match result {
            Ok(reply) => Message::bot(reply.reply),
            Err(err) => {
                warn!(error = %err, "failed to send chat message");
                Message::bot(SEND_ERROR)
            }
        };
        self.append(reply);
        self.set_busy(false);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory transport. `None` for history or reply makes that call fail.
    /// When given an event receiver, it records every event already delivered
    /// at the moment `send_message` is called.
    pub(crate) struct FakeTransport {
        pub history: Option<Vec<Exchange>>,
        pub reply: Option<String>,
        pub history_calls: AtomicUsize,
        pub sent: Mutex<Vec<String>>,
        pub events: Mutex<Option<mpsc::UnboundedReceiver<ConversationEvent>>>,
        pub seen_before_send: Mutex<Vec<ConversationEvent>>,
    }

    impl FakeTransport {
        pub fn new(history: Option<Vec<Exchange>>, reply: Option<&str>) -> Self {
            Self {
                history,
                reply: reply.map(str::to_string),
                history_calls: AtomicUsize::new(0),
                sent: Mutex::new(Vec::new()),
                events: Mutex::new(None),
                seen_before_send: Mutex::new(Vec::new()),
            }
        }

        fn record_events(&self) {
            if let Some(rx) = self.events.lock().unwrap().as_mut() {
                let mut seen = self.seen_before_send.lock().unwrap();
                while let Ok(event) = rx.try_recv() {
                    seen.push(event);
                }
            }
        }
    }

    #[async_trait]
    impl ChatTransport for FakeTransport {
        async fn fetch_history(&self) -> Result<Vec<Exchange>, TransportError> {
            self.history_calls.fetch_add(1, Ordering::SeqCst);
            self.history
                .clone()
                .ok_or(TransportError::Status(StatusCode::INTERNAL_SERVER_ERROR))
        }

        async fn send_message(&self, text: &str) -> Result<ChatReply, TransportError> {
            self.record_events();
            self.sent.lock().unwrap().push(text.to_string());
            match &self.reply {
                Some(reply) => Ok(ChatReply { reply: reply.clone() }),
                None => Err(TransportError::Status(StatusCode::INTERNAL_SERVER_ERROR)),
            }
        }
    }

    fn conversation(fake: FakeTransport) -> (Conversation, Arc<FakeTransport>) {
        let fake = Arc::new(fake);
        (Conversation::new(fake.clone()), fake)
    }

    fn exchange(user: &str, bot: &str) -> Exchange {
        Exchange { user: user.into(), bot: bot.into() }
    }

    #[tokio::test]
    async fn test_load_history_flattens_pairs() {
        let (mut conv, _) = conversation(FakeTransport::new(Some(vec![exchange("hi", "hello")]), None));

        let messages = conv.load_history().await;

        assert_eq!(messages, &[Message::user("hi"), Message::bot("hello")]);
    }

    #[tokio::test]
    async fn test_load_history_preserves_pair_order() {
        let history = vec![exchange("one", "1"), exchange("two", "2"), exchange("three", "3")];
        let (mut conv, _) = conversation(FakeTransport::new(Some(history), None));

        conv.load_history().await;

        let texts: Vec<&str> = conv.messages().iter().map(Message::text).collect();
        assert_eq!(texts, ["one", "1", "two", "2", "three", "3"]);
        let roles: Vec<Role> = conv.messages().iter().map(Message::role).collect();
        assert_eq!(roles, [Role::User, Role::Bot, Role::User, Role::Bot, Role::User, Role::Bot]);
    }

    #[tokio::test]
    async fn test_load_history_failure_shows_single_error() {
        let (mut conv, _) = conversation(FakeTransport::new(None, None));

        conv.load_history().await;

        assert_eq!(conv.messages(), &[Message::bot(HISTORY_LOAD_ERROR)]);
    }

    #[tokio::test]
    async fn test_load_history_runs_once() {
        let (mut conv, fake) = conversation(FakeTransport::new(Some(vec![exchange("hi", "hello")]), None));

        conv.load_history().await;
        conv.load_history().await;

        assert_eq!(fake.history_calls.load(Ordering::SeqCst), 1);
        assert_eq!(conv.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_blank_submit_is_noop() {
        let (mut conv, fake) = conversation(FakeTransport::new(Some(vec![]), Some("reply")));

        conv.submit("").await.unwrap();
        conv.submit("   ").await.unwrap();
        conv.submit("\t\n").await.unwrap();

        assert!(conv.messages().is_empty());
        assert!(!conv.is_busy());
        assert!(fake.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_appends_user_then_reply() {
        let (mut conv, fake) = conversation(FakeTransport::new(Some(vec![]), Some("Hello there!")));

        conv.submit("  hi  ").await.unwrap();

        assert_eq!(conv.messages(), &[Message::user("  hi  "), Message::bot("Hello there!")]);
        assert_eq!(*fake.sent.lock().unwrap(), vec!["  hi  ".to_string()]);
        assert!(!conv.is_busy());
    }

    #[tokio::test]
    async fn test_submit_failure_appends_error_and_keeps_user_message() {
        let (mut conv, _) = conversation(FakeTransport::new(Some(vec![]), None));

        conv.submit("hi").await.unwrap();

        assert_eq!(conv.messages(), &[Message::user("hi"), Message::bot(SEND_ERROR)]);
        assert!(!conv.is_busy());
    }

    #[tokio::test]
    async fn test_user_message_is_visible_before_reply() {
        let (mut conv, fake) = conversation(FakeTransport::new(Some(vec![]), Some("ok")));
        *fake.events.lock().unwrap() = Some(conv.subscribe());

        conv.submit("ping").await.unwrap();

        let seen = fake.seen_before_send.lock().unwrap();
        assert_eq!(
            *seen,
            vec![ConversationEvent::Appended(Message::user("ping")), ConversationEvent::Busy(true)]
        );
    }

    #[tokio::test]
    async fn test_submit_clears_input() {
        let (mut conv, fake) = conversation(FakeTransport::new(Some(vec![]), Some("pong")));
        "ping".chars().for_each(|c| conv.input_mut().insert(c));

        conv.submit("ping").await.unwrap();

        assert!(conv.input().is_empty());
        assert_eq!(*fake.sent.lock().unwrap(), vec!["ping".to_string()]);
        assert_eq!(conv.messages().len(), 2);
    }

    #[test]
    fn test_busy_only_between_begin_and_finish() {
        let (mut conv, _) = conversation(FakeTransport::new(None, None));
        assert!(!conv.is_busy());

        let text = conv.begin_submit("hello").unwrap();
        assert_eq!(text.as_deref(), Some("hello"));
        assert!(conv.is_busy());
        assert_eq!(conv.messages(), &[Message::user("hello")]);

        conv.finish_submit(Ok(ChatReply { reply: "hi!".into() }));
        assert!(!conv.is_busy());
        assert_eq!(conv.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_submit_while_busy_is_rejected() {
        let (mut conv, fake) = conversation(FakeTransport::new(None, Some("reply")));
        conv.begin_submit("first").unwrap();
        "second".chars().for_each(|c| conv.input_mut().insert(c));

        let result = conv.submit("second").await;

        assert_eq!(result, Err(SubmitError::Busy));
        assert_eq!(conv.messages(), &[Message::user("first")]);
        assert_eq!(conv.input().text(), "second");
        assert!(fake.sent.lock().unwrap().is_empty());
        assert!(conv.is_busy());
    }

    #[test]
    fn test_finish_without_outstanding_submit_is_ignored() {
        let (mut conv, _) = conversation(FakeTransport::new(None, None));

        conv.finish_submit(Ok(ChatReply { reply: "stray".into() }));

        assert!(conv.messages().is_empty());
    }

    #[test]
    fn test_subscribers_see_every_mutation() {
        let (mut conv, _) = conversation(FakeTransport::new(None, None));
        let mut rx = conv.subscribe();

        conv.finish_history_load(Ok(vec![exchange("a", "b")]));
        conv.begin_submit("c").unwrap();
        conv.finish_submit(Err(TransportError::Timeout));

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(
            events,
            vec![
                ConversationEvent::Replaced,
                ConversationEvent::Appended(Message::user("c")),
                ConversationEvent::Busy(true),
                ConversationEvent::Appended(Message::bot(SEND_ERROR)),
                ConversationEvent::Busy(false),
            ]
        );
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let (mut conv, _) = conversation(FakeTransport::new(None, None));
        let rx = conv.subscribe();
        let mut live = conv.subscribe();
        drop(rx);

        conv.begin_submit("x").unwrap();

        assert_eq!(conv.subscribers.len(), 1);
        assert_eq!(live.try_recv(), Ok(ConversationEvent::Appended(Message::user("x"))));
    }

    #[test]
    fn test_submit_rejected_until_history_lands() {
        let (mut conv, _) = conversation(FakeTransport::new(None, None));
        assert!(conv.begin_history_load());

        assert_eq!(conv.begin_submit("early"), Err(SubmitError::LoadingHistory));
        assert!(conv.messages().is_empty());
        assert!(!conv.is_busy());

        conv.finish_history_load(Ok(vec![exchange("old", "reply")]));
        assert!(!conv.is_loading_history());
        assert_eq!(conv.begin_submit("now").unwrap().as_deref(), Some("now"));
        assert_eq!(
            conv.messages(),
            &[Message::user("old"), Message::bot("reply"), Message::user("now")]
        );
    }

    #[test]
    fn test_failed_history_load_unblocks_submit() {
        let (mut conv, _) = conversation(FakeTransport::new(None, None));
        conv.begin_history_load();

        conv.finish_history_load(Err(TransportError::Timeout));

        assert!(conv.begin_submit("hello").is_ok());
        assert_eq!(conv.messages(), &[Message::bot(HISTORY_LOAD_ERROR), Message::user("hello")]);
    }

    #[test]
    fn test_message_serializes_lowercase_role() {
        let json = serde_json::to_string(&Message::bot("hello")).unwrap();
        assert_eq!(json, r#"{"role":"bot","text":"hello"}"#);
    }
}
