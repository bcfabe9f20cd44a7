use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::{ChatReply, ChatTransport, Exchange, TransportError};
use crate::conversation::{Conversation, ConversationEvent};
use crate::ui;

type Pending<T> = Option<JoinHandle<Result<T, TransportError>>>;

pub struct App {
    // Core state
    pub should_quit: bool,
    pub conversation: Conversation,
    pub base_url: String,
    /// One-line notice shown in the footer, e.g. a rejected submission
    pub status: Option<String>,

    // Outstanding requests, polled from the event loop
    history_task: Pending<Vec<Exchange>>,
    send_task: Pending<ChatReply>,
    updates: mpsc::UnboundedReceiver<ConversationEvent>,

    // Chat view state
    pub scroll: u16,
    pub follow_latest: bool,
    pub chat_height: u16, // Inner height of chat area, set during render
    pub chat_width: u16,  // Inner width of chat area, set during render

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation
}

impl App {
    /// Build the app and start the one history load for this session.
    pub fn new(transport: Arc<dyn ChatTransport>, base_url: String) -> Self {
        let mut conversation = Conversation::new(transport);
        let updates = conversation.subscribe();

        let mut app = Self {
            should_quit: false,
            conversation,
            base_url,
            status: None,
            history_task: None,
            send_task: None,
            updates,
            scroll: 0,
            follow_latest: true,
            chat_height: 0,
            chat_width: 0,
            animation_frame: 0,
        };
        app.start_history_load();
        app
    }

    fn start_history_load(&mut self) {
        if self.conversation.begin_history_load() {
            let transport = self.conversation.transport();
            self.history_task = Some(tokio::spawn(async move { transport.fetch_history().await }));
        }
    }

    pub fn is_loading_history(&self) -> bool {
        self.history_task.is_some()
    }

    /// Send the input buffer. Rejected with a footer notice while history is
    /// still loading or a reply is outstanding; the text stays in the input.
    pub fn submit_input(&mut self) {
        let text = self.conversation.input().text().to_string();
        match self.conversation.begin_submit(&text) {
            Ok(Some(message)) => {
                self.status = None;
                let transport = self.conversation.transport();
                self.send_task = Some(tokio::spawn(async move { transport.send_message(&message).await }));
            }
            Ok(None) => {}
            Err(err) => {
                debug!(reason = %err, "submission rejected");
                self.status = Some(err.to_string());
            }
        }
    }

    /// Apply the results of any requests that have completed.
    pub async fn poll_tasks(&mut self) {
        if let Some(handle) = take_finished(&mut self.history_task) {
            let result = handle.await.unwrap_or_else(|err| {
                warn!(error = %err, "history task failed");
                Err(TransportError::Interrupted)
            });
            self.conversation.finish_history_load(result);
            self.status = None;
        }

        if let Some(handle) = take_finished(&mut self.send_task) {
            let result = handle.await.unwrap_or_else(|err| {
                warn!(error = %err, "send task failed");
                Err(TransportError::Interrupted)
            });
            self.conversation.finish_submit(result);
            self.status = None;
        }
    }

    /// React to conversation changes: keep the newest message in view.
    pub fn drain_updates(&mut self) {
        let mut changed = false;
        while let Ok(event) = self.updates.try_recv() {
            changed |= matches!(event, ConversationEvent::Replaced | ConversationEvent::Appended(_));
        }
        if changed {
            self.follow_latest = true;
        }
        if self.follow_latest {
            self.scroll_to_bottom();
        }
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.conversation.is_busy() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn scroll_up(&mut self, lines: u16) {
        self.scroll = self.scroll.saturating_sub(lines);
        self.follow_latest = false;
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.scroll = self.scroll.saturating_add(lines).min(self.max_scroll());
        self.follow_latest = self.scroll >= self.max_scroll();
    }

    pub fn half_page(&self) -> u16 {
        (self.visible_height() / 2).max(1)
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll = self.max_scroll();
    }

    fn visible_height(&self) -> u16 {
        if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        }
    }

    fn max_scroll(&self) -> u16 {
        self.total_chat_lines().saturating_sub(self.visible_height())
    }

    /// Number of rendered lines in the chat area, measured on the paragraph `ui` draws
    pub fn total_chat_lines(&self) -> u16 {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 { self.chat_width } else { 50 };
        let total_lines = ui::chat_paragraph(self).line_count(wrap_width);
        total_lines.min(u16::MAX as usize) as u16
    }

    /// Abort outstanding requests so nothing lands on a torn-down view.
    pub fn shutdown(&mut self) {
        let mut aborted = 0;
        if let Some(handle) = self.history_task.take() {
            handle.abort();
            aborted += 1;
        }
        if let Some(handle) = self.send_task.take() {
            handle.abort();
            aborted += 1;
        }
        if aborted > 0 {
            info!(aborted, "cancelled outstanding requests");
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn take_finished<T>(task: &mut Option<JoinHandle<T>>) -> Option<JoinHandle<T>> {
    if task.as_ref().is_some_and(|handle| handle.is_finished()) {
        task.take()
    } else {
        None
    }
}
