use std::path::PathBuf;
use std::time::Duration;

use futures_util::StreamExt;
use ratatui::layout::Rect;
use ratatui::widgets::ListState;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::input::TextField;
use crate::openai::{self, OpenAIClient, MODEL_LIST_TIMEOUT};
use crate::session::{ChatSession, RequestId, StreamEvent};
use crate::transcript::ChatTurn;
use crate::tui::AppEvent;
use crate::ui;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    Compose,
    Transcript,
    ApiKey,
}

impl FocusPane {
    pub fn next(self) -> Self {
        match self {
            FocusPane::Compose => FocusPane::Transcript,
            FocusPane::Transcript => FocusPane::ApiKey,
            FocusPane::ApiKey => FocusPane::Compose,
        }
    }

    pub fn is_text_field(self) -> bool {
        matches!(self, FocusPane::Compose | FocusPane::ApiKey)
    }
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub focus: FocusPane,

    // Conversation
    pub session: ChatSession,
    pub compose: TextField,
    pub api_key: TextField, // memory only, never saved or logged
    pub status: Option<String>,

    // Transcript view
    pub chat_scroll: u16,
    pub follow_tail: bool,
    pub chat_height: u16, // Height of chat area for scroll calculations
    pub chat_width: u16,  // Width of chat area for wrap calculations
    pub chat_area: Option<Rect>,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Model picker state
    pub show_model_picker: bool,
    pub available_models: Vec<String>,
    pub model_picker_state: ListState,
    pub model_list_wanted: bool,
    pub model_list_pending: bool,
    pub model_list_timeout: Duration,

    // Endpoint
    http: reqwest::Client,
    pub base_url: String,
    pub selected_model: String,
    pub config_path: Option<PathBuf>,
}

impl App {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, config_path: Option<PathBuf>) -> Self {
        Self {
            should_quit: false,
            input_mode: InputMode::Editing,
            focus: FocusPane::Compose,

            session: ChatSession::new(),
            compose: TextField::new(),
            api_key: TextField::new(),
            status: None,

            chat_scroll: 0,
            follow_tail: true,
            chat_height: 0,
            chat_width: 0,
            chat_area: None,

            animation_frame: 0,

            show_model_picker: false,
            available_models: Vec::new(),
            model_picker_state: ListState::default(),
            model_list_wanted: false,
            model_list_pending: false,
            model_list_timeout: MODEL_LIST_TIMEOUT,

            http: openai::http_client(),
            base_url: base_url.into(),
            selected_model: model.into(),
            config_path,
        }
    }

    /// Client carrying the current key; every client shares one connection pool
    pub fn client(&self) -> OpenAIClient {
        OpenAIClient::with_client(self.http.clone(), &self.base_url, self.api_key.value())
            .with_list_timeout(self.model_list_timeout)
    }

    /// Turn the compose field into a user turn
    pub fn submit_input(&mut self) {
        if self.compose.is_empty() {
            return;
        }

        match self.session.submit(self.compose.value()) {
            Ok(()) => {
                self.compose.take();
                self.status = None;
                self.follow_tail = true;
                self.scroll_to_bottom();
            }
            Err(e) => {
                // Keep the text so it can be sent once the reply is complete
                self.status = Some(format!("Not sent: {}", e));
            }
        }
    }

    /// Issue a completion request if the transcript is waiting for one.
    ///
    /// The request runs on its own task and only reports back through `tx`.
    pub fn dispatch_request(&mut self, tx: &UnboundedSender<AppEvent>) -> Option<RequestId> {
        let (id, messages) = self.session.begin_request()?;
        let client = self.client();
        let model = self.selected_model.clone();
        tokio::spawn(stream_reply(client, model, id, messages, tx.clone()));
        self.scroll_to_bottom();
        Some(id)
    }

    pub fn handle_stream_event(&mut self, event: StreamEvent) {
        self.session.apply(event);
        if let Some(error) = self.session.last_error() {
            self.status = Some(format!("Request failed: {}", error));
        }
        if self.follow_tail {
            self.scroll_to_bottom();
        }
    }

    pub fn commit_api_key(&mut self) {
        self.input_mode = InputMode::Normal;
        self.focus = FocusPane::Compose;
        self.status = Some(if self.api_key.is_empty() {
            "API key cleared".to_string()
        } else {
            "API key set for this session".to_string()
        });
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.session.is_awaiting() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    /// Number of rows the transcript occupies when wrapped to the pane width.
    ///
    /// Counted on the same wrapped paragraph the transcript pane renders.
    pub fn chat_line_count(&self) -> u16 {
        let wrap_width = if self.chat_width > 0 { self.chat_width } else { 50 };
        let rows = ui::transcript_paragraph(self).line_count(wrap_width);
        u16::try_from(rows).unwrap_or(u16::MAX)
    }

    fn max_scroll(&self) -> u16 {
        let visible_height = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };
        self.chat_line_count().saturating_sub(visible_height)
    }

    pub fn scroll_to_bottom(&mut self) {
        self.chat_scroll = self.max_scroll();
    }

    pub fn scroll_to_top(&mut self) {
        self.chat_scroll = 0;
        self.follow_tail = false;
    }

    pub fn scroll_down(&mut self, rows: u16) {
        let max_scroll = self.max_scroll();
        self.chat_scroll = self.chat_scroll.saturating_add(rows).min(max_scroll);
        // Reaching the bottom re-attaches the view to the stream
        self.follow_tail = self.chat_scroll >= max_scroll;
    }

    pub fn scroll_up(&mut self, rows: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(rows);
        self.follow_tail = self.chat_scroll >= self.max_scroll();
    }

    pub fn half_page(&self) -> u16 {
        (self.chat_height / 2).max(1)
    }

    // Model picker methods
    pub fn request_model_list(&mut self) {
        if self.model_list_pending {
            return;
        }
        self.model_list_wanted = true;
        self.status = Some("Listing models...".to_string());
    }

    /// Fetch the model list off the UI task; the result comes back as `AppEvent::Models`
    pub fn dispatch_model_list(&mut self, tx: &UnboundedSender<AppEvent>) -> bool {
        if !self.model_list_wanted {
            return false;
        }
        self.model_list_wanted = false;
        self.model_list_pending = true;

        let client = self.client();
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = client.list_models().await.map_err(|e| format!("{:#}", e));
            let _ = tx.send(AppEvent::Models(result));
        });
        true
    }

    pub fn handle_model_list(&mut self, result: Result<Vec<String>, String>) {
        self.model_list_pending = false;
        match result {
            Ok(models) if models.is_empty() => {
                self.status = Some("The server reported no models".to_string());
            }
            Ok(models) => {
                let current = models.iter().position(|m| *m == self.selected_model);
                self.available_models = models;
                self.model_picker_state.select(Some(current.unwrap_or(0)));
                self.show_model_picker = true;
                self.status = None;
            }
            Err(e) => {
                warn!("listing models failed: {}", e);
                self.status = Some(format!("Could not list models: {}", e));
            }
        }
    }

    pub fn model_picker_nav_down(&mut self) {
        let len = self.available_models.len();
        if len > 0 {
            let i = self.model_picker_state.selected().unwrap_or(0);
            self.model_picker_state.select(Some((i + 1).min(len - 1)));
        }
    }

    pub fn model_picker_nav_up(&mut self) {
        let i = self.model_picker_state.selected().unwrap_or(0);
        self.model_picker_state.select(Some(i.saturating_sub(1)));
    }

    pub fn select_model(&mut self) {
        let Some(model) = self
            .model_picker_state
            .selected()
            .and_then(|i| self.available_models.get(i))
            .cloned()
        else {
            return;
        };

        info!(%model, "model selected");
        self.selected_model = model;
        self.show_model_picker = false;

        if let Some(path) = &self.config_path {
            if let Err(e) = Config::save_default_model(path, &self.selected_model) {
                warn!("could not save model choice: {:#}", e);
            }
        }
    }
}

/// Body of a request task: forward every fragment, then exactly one of Done or Failed
pub async fn stream_reply(
    client: OpenAIClient,
    model: String,
    id: RequestId,
    messages: Vec<ChatTurn>,
    tx: UnboundedSender<AppEvent>,
) {
    let mut fragments = match client.stream_chat(&model, &messages).await {
        Ok(fragments) => fragments,
        Err(e) => {
            let _ = tx.send(AppEvent::Stream(StreamEvent::Failed(id, format!("{:#}", e))));
            return;
        }
    };

    let mut count = 0usize;
    while let Some(item) = fragments.next().await {
        let event = match item {
            Ok(fragment) => {
                count += 1;
                StreamEvent::Fragment(id, fragment)
            }
            Err(e) => {
                let _ = tx.send(AppEvent::Stream(StreamEvent::Failed(id, format!("{:#}", e))));
                return;
            }
        };
        if tx.send(AppEvent::Stream(event)).is_err() {
            // UI is gone
            return;
        }
    }

    debug!(request = %id, fragments = count, "stream exhausted");
    let _ = tx.send(AppEvent::Stream(StreamEvent::Done(id)));
}
