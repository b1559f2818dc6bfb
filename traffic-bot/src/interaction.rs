//! Per-chat conversation state and dispatch of inbound chat events.
//!
//! States live only in memory. A restart puts every chat back to `Idle`,
//! which is harmless because the period menu can always be reopened.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use indoc::indoc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::charts::{self, ChartImage};
use crate::clickhouse::FlowSource;
use crate::error::{ReportError, SettingsError};
use crate::period::Period;
use crate::report::{self, ReportPipeline};
use crate::settings::SettingsStore;
use crate::timezone::{self, DisplayZone};

pub type ChatId = i64;
pub type UserId = u64;

const HELP_TEXT: &str = indoc! {"
    Traffic reports for the external network boundary.

    /graph - choose a period
    /graph_1h, /graph_6h, /graph_24h, /graph_7d - report right away
    /settings - set your display timezone
    /cancel - leave the current prompt
"};

const SETTINGS_PROMPT: &str =
    "Send your UTC offset in whole hours, from -12 to +14 (for example +5, -3 or UTC+2). /cancel to keep the current one.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChatState {
    #[default]
    Idle,
    PeriodMenuShown,
    /// Waiting for `user_id` to type an offset. Other members of a group
    /// chat are not answered.
    SettingsPrompt { user_id: UserId },
}

/// Inbound chat event after the transport has stripped it down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Callback(String),
}

/// Inline button and its callback payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Period(Period),
    Settings,
}

impl Button {
    pub fn label(self) -> &'static str {
        match self {
            Button::Period(p) => p.token(),
            Button::Settings => "Timezone",
        }
    }

    pub fn payload(self) -> String {
        match self {
            Button::Period(p) => format!("period:{}", p.token()),
            Button::Settings => "settings:open".to_owned(),
        }
    }

    pub fn from_payload(payload: &str) -> Option<Button> {
        match payload.split_once(':')? {
            ("period", token) => Period::from_token(token).map(Button::Period),
            ("settings", "open") => Some(Button::Settings),
            _ => None,
        }
    }
}

pub fn main_menu() -> Vec<Vec<Button>> {
    vec![
        Period::ALL.into_iter().map(Button::Period).collect(),
        vec![Button::Settings],
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
    pub chart: Option<ChartImage>,
    pub menu: Option<Vec<Vec<Button>>>,
}

impl OutboundMessage {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            chart: None,
            menu: None,
        }
    }

    fn with_menu(text: impl Into<String>) -> Self {
        Self {
            menu: Some(main_menu()),
            ..Self::text(text)
        }
    }
}

/// Chats allowed to talk to the bot. Empty means everyone.
#[derive(Debug, Clone, Default)]
pub struct AllowList(HashSet<ChatId>);

impl AllowList {
    pub fn new(ids: impl IntoIterator<Item = ChatId>) -> Self {
        Self(ids.into_iter().collect())
    }

    pub fn is_allowed(&self, chat_id: ChatId) -> bool {
        self.0.is_empty() || self.0.contains(&chat_id)
    }
}

enum Command<'a> {
    Help,
    Menu,
    Report(Option<Period>),
    Settings,
    Cancel,
    Other(&'a str),
}

fn parse_command(text: &str) -> Command<'_> {
    let text = text.trim();
    let first = text.split_whitespace().next().unwrap_or_default();
    // Group chats address commands as `/graph@BotName`.
    let word = first.split('@').next().unwrap_or_default().to_lowercase();

    match word.as_str() {
        "/start" | "/help" => Command::Help,
        "/graph" | "graph" | "график" => Command::Menu,
        "/settings" => Command::Settings,
        "/cancel" => Command::Cancel,
        w => match w.strip_prefix("/graph_") {
            Some(token) => Command::Report(Period::from_token(token)),
            None => Command::Other(text),
        },
    }
}

/// Transient notice shown while a report is being built.
pub fn building_status(period: Period) -> String {
    format!("Building the traffic chart for the last {}...", period.label())
}

pub fn finished_status(period: Period, delivered: bool) -> String {
    if delivered {
        format!("Traffic chart for the last {} sent.", period.label())
    } else {
        format!("Traffic chart for the last {} could not be built.", period.label())
    }
}

pub struct Interaction<S> {
    allow_list: AllowList,
    settings: SettingsStore,
    pipeline: ReportPipeline<S>,
    default_zone: DisplayZone,
    states: Mutex<HashMap<ChatId, ChatState>>,
}

impl<S: FlowSource> Interaction<S> {
    pub fn new(
        allow_list: AllowList,
        settings: SettingsStore,
        pipeline: ReportPipeline<S>,
        default_zone: DisplayZone,
    ) -> Self {
        Self {
            allow_list,
            settings,
            pipeline,
            default_zone,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_allowed(&self, chat_id: ChatId) -> bool {
        self.allow_list.is_allowed(chat_id)
    }

    pub async fn state(&self, chat_id: ChatId) -> ChatState {
        self.states
            .lock()
            .await
            .get(&chat_id)
            .copied()
            .unwrap_or_default()
    }

    async fn set_state(&self, chat_id: ChatId, state: ChatState) {
        let mut states = self.states.lock().await;
        if state == ChatState::Idle {
            states.remove(&chat_id);
        } else {
            states.insert(chat_id, state);
        }
    }

    /// Zone for a user: their stored offset, else the configured default.
    async fn zone_for(&self, user_id: UserId) -> DisplayZone {
        self.settings
            .stored_timezone(&user_id.to_string())
            .await
            .and_then(DisplayZone::from_hours)
            .unwrap_or(self.default_zone)
    }

    /// The period `event` would report on, if any. Lets the transport post a
    /// progress notice before the slow part starts; changes no state.
    pub async fn pending_period(&self, chat_id: ChatId, event: &Inbound) -> Option<Period> {
        if !self.is_allowed(chat_id) {
            return None;
        }
        match event {
            Inbound::Callback(payload) => match Button::from_payload(payload)? {
                Button::Period(period) => Some(period),
                Button::Settings => None,
            },
            Inbound::Text(text) => match parse_command(text) {
                Command::Report(period) => period,
                Command::Other(text) => {
                    let menu_open = self.state(chat_id).await == ChatState::PeriodMenuShown;
                    menu_open.then(|| Period::from_token(text)).flatten()
                }
                _ => None,
            },
        }
    }

    /// Handle one inbound event. Unauthorised chats get no reply at all;
    /// every other event yields at most one outbound message.
    pub async fn handle_event(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        event: Inbound,
    ) -> Option<OutboundMessage> {
        if !self.is_allowed(chat_id) {
            info!("Ignoring event from unauthorised chat {chat_id}");
            return None;
        }
        debug!("Chat {chat_id} user {user_id}: {event:?}");

        match event {
            Inbound::Text(text) => self.handle_text(chat_id, user_id, &text).await,
            Inbound::Callback(payload) => match Button::from_payload(&payload) {
                Some(Button::Period(period)) => Some(self.report(chat_id, user_id, period).await),
                Some(Button::Settings) => Some(self.open_settings(chat_id, user_id).await),
                None => {
                    warn!("Unknown callback payload {payload:?} from chat {chat_id}");
                    self.set_state(chat_id, ChatState::Idle).await;
                    Some(OutboundMessage::with_menu("Unknown action."))
                }
            },
        }
    }

    async fn handle_text(&self, chat_id: ChatId, user_id: UserId, text: &str) -> Option<OutboundMessage> {
        match parse_command(text) {
            Command::Help => {
                self.set_state(chat_id, ChatState::Idle).await;
                Some(OutboundMessage::with_menu(HELP_TEXT))
            }
            Command::Menu => {
                self.set_state(chat_id, ChatState::PeriodMenuShown).await;
                Some(OutboundMessage::with_menu("Choose a period for the traffic chart:"))
            }
            Command::Report(Some(period)) => Some(self.report(chat_id, user_id, period).await),
            Command::Report(None) => {
                self.set_state(chat_id, ChatState::Idle).await;
                Some(OutboundMessage::with_menu("Unknown period."))
            }
            Command::Settings => Some(self.open_settings(chat_id, user_id).await),
            Command::Cancel => match self.state(chat_id).await {
                ChatState::SettingsPrompt { user_id: owner } if owner != user_id => None,
                _ => {
                    self.set_state(chat_id, ChatState::Idle).await;
                    Some(OutboundMessage::text("Cancelled."))
                }
            },
            Command::Other(text) => match self.state(chat_id).await {
                ChatState::SettingsPrompt { user_id: owner } if owner == user_id => {
                    Some(self.apply_offset(chat_id, user_id, text).await)
                }
                ChatState::SettingsPrompt { .. } => None,
                ChatState::PeriodMenuShown => match Period::from_token(text) {
                    Some(period) => Some(self.report(chat_id, user_id, period).await),
                    None => None,
                },
                ChatState::Idle => None,
            },
        }
    }

    async fn open_settings(&self, chat_id: ChatId, user_id: UserId) -> OutboundMessage {
        self.set_state(chat_id, ChatState::SettingsPrompt { user_id }).await;
        let current = self.zone_for(user_id).await;
        OutboundMessage::text(format!(
            "Your timezone is {}.\n{SETTINGS_PROMPT}",
            current.label()
        ))
    }

    async fn apply_offset(&self, chat_id: ChatId, user_id: UserId, text: &str) -> OutboundMessage {
        let result = match timezone::parse_offset(text) {
            Ok(hours) => self
                .settings
                .set_timezone(&user_id.to_string(), hours)
                .await
                .map(|()| hours),
            Err(e) => Err(e.into()),
        };

        match result {
            Ok(hours) => {
                self.set_state(chat_id, ChatState::Idle).await;
                OutboundMessage::with_menu(format!("Timezone set to {}.", timezone::label(hours)))
            }
            Err(SettingsError::Validation(e)) => {
                debug!("Rejected offset from user {user_id}: {e}");
                OutboundMessage::text(format!("{e}.\n{SETTINGS_PROMPT}"))
            }
            Err(e) => {
                warn!("Could not save timezone for user {user_id}: {e}");
                self.set_state(chat_id, ChatState::Idle).await;
                OutboundMessage::text("Could not save the setting. Please try again later.")
            }
        }
    }

    async fn report(&self, chat_id: ChatId, user_id: UserId, period: Period) -> OutboundMessage {
        self.set_state(chat_id, ChatState::Idle).await;
        let zone = self.zone_for(user_id).await;

        let result = async {
            let report = self.pipeline.build(period, Utc::now()).await?;
            let chart = charts::render(&report, zone).await?;
            Ok::<_, ReportError>((report::caption(&report, zone), chart))
        }
        .await;

        match result {
            Ok((text, chart)) => OutboundMessage {
                text,
                chart: Some(chart),
                menu: None,
            },
            Err(e) => {
                if let ReportError::Render(render) = &e {
                    warn!("Chart for {period} in chat {chat_id} failed to render: {render}");
                } else {
                    info!("Report {period} for chat {chat_id} failed: {e}");
                }
                OutboundMessage::with_menu(e.user_message())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration as StdDuration;

    use chrono::Duration;

    use super::*;
    use crate::clickhouse::{ClickHouseClient, TimeSeriesPoint};
    use crate::error::FetchError;
    use crate::period::{Bindings, PeriodOverrides};
    use crate::query::{BytesExpression, FlowQuery};

    enum FakeSource {
        Rows(Vec<TimeSeriesPoint>),
        Malformed,
    }

    impl FlowSource for FakeSource {
        async fn fetch(&self, _query: &FlowQuery) -> Result<Vec<TimeSeriesPoint>, FetchError> {
            match self {
                FakeSource::Rows(rows) => Ok(rows.clone()),
                FakeSource::Malformed => Err(FetchError::Malformed {
                    line: 1,
                    reason: "expected 4 columns, got 2".into(),
                }),
            }
        }
    }

    fn sample_rows() -> Vec<TimeSeriesPoint> {
        let start = Utc::now() - Duration::hours(1);
        (0..60)
            .flat_map(|m| {
                ["edge / et0", "edge / et1"].map(|label| TimeSeriesPoint {
                    timestamp: start + Duration::minutes(m),
                    interface_label: label.to_owned(),
                    bytes_total: 1_000_000.0,
                })
            })
            .collect()
    }

    async fn bot_in_zone<S: FlowSource>(
        dir: &Path,
        source: S,
        allowed: &[ChatId],
        default_zone: DisplayZone,
    ) -> Interaction<S> {
        let settings = SettingsStore::open(dir.join("tz.json")).await.unwrap();
        let pipeline = ReportPipeline::new(
            source,
            Bindings::resolve_all(&PeriodOverrides::default()).unwrap(),
            BytesExpression::default(),
            "external".to_owned(),
        );
        Interaction::new(
            AllowList::new(allowed.iter().copied()),
            settings,
            pipeline,
            default_zone,
        )
    }

    async fn bot_with<S: FlowSource>(dir: &Path, source: S, allowed: &[ChatId]) -> Interaction<S> {
        bot_in_zone(dir, source, allowed, DisplayZone::default()).await
    }

    fn text(s: &str) -> Inbound {
        Inbound::Text(s.to_owned())
    }

    #[tokio::test]
    async fn unauthorised_chat_gets_silence() {
        let dir = tempfile::tempdir().unwrap();
        let bot = bot_with(dir.path(), FakeSource::Rows(sample_rows()), &[-100123]).await;

        assert!(bot.handle_event(-100123, 1, text("/graph")).await.is_some());
        assert!(bot.handle_event(-100999, 1, text("/graph")).await.is_none());
        assert!(
            bot.handle_event(-100999, 1, Inbound::Callback("period:1h".into()))
                .await
                .is_none()
        );
        assert_eq!(bot.state(-100999).await, ChatState::Idle);
    }

    #[test]
    fn empty_allow_list_allows_everyone() {
        assert!(AllowList::default().is_allowed(42));
        assert!(!AllowList::new([1]).is_allowed(42));
    }

    #[tokio::test]
    async fn menu_then_period_delivers_chart() {
        let dir = tempfile::tempdir().unwrap();
        let bot = bot_with(dir.path(), FakeSource::Rows(sample_rows()), &[]).await;

        let menu = bot.handle_event(7, 1, text("график")).await.unwrap();
        assert_eq!(menu.menu, Some(main_menu()));
        assert_eq!(bot.state(7).await, ChatState::PeriodMenuShown);

        let reply = bot
            .handle_event(7, 1, Inbound::Callback(Button::Period(Period::OneHour).payload()))
            .await
            .unwrap();
        let chart = reply.chart.expect("chart attached");
        assert_eq!(chart.file_name, "traffic-1h.png");
        assert_eq!(&chart.bytes[..4], b"\x89PNG");
        assert!(reply.text.contains("total (all interfaces): min"));
        assert_eq!(bot.state(7).await, ChatState::Idle);
    }

    #[tokio::test]
    async fn direct_command_and_bot_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let bot = bot_with(dir.path(), FakeSource::Rows(sample_rows()), &[]).await;

        let reply = bot.handle_event(7, 1, text("/graph_6h@TrafficBot")).await.unwrap();
        assert!(reply.chart.is_some());

        let reply = bot.handle_event(7, 1, text("/graph_2h")).await.unwrap();
        assert_eq!(reply.text, "Unknown period.");
    }

    #[tokio::test]
    async fn settings_flow_reprompts_on_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let bot = bot_with(dir.path(), FakeSource::Rows(sample_rows()), &[]).await;

        let prompt = ChatState::SettingsPrompt { user_id: 99 };
        bot.handle_event(7, 99, text("/settings")).await.unwrap();
        assert_eq!(bot.state(7).await, prompt);

        let reply = bot.handle_event(7, 99, text("+15")).await.unwrap();
        assert!(reply.text.contains("outside"));
        assert_eq!(bot.state(7).await, prompt);

        let reply = bot.handle_event(7, 99, text("tomorrow")).await.unwrap();
        assert!(reply.text.contains(SETTINGS_PROMPT));
        assert_eq!(bot.state(7).await, prompt);

        let reply = bot.handle_event(7, 99, text("+-5")).await.unwrap();
        assert!(reply.text.contains("not a timezone offset"));

        let reply = bot.handle_event(7, 99, text("UTC+5")).await.unwrap();
        assert_eq!(reply.text, "Timezone set to UTC+5.");
        assert_eq!(bot.state(7).await, ChatState::Idle);
        assert_eq!(bot.settings.get_timezone("99").await, 5);
    }

    #[tokio::test]
    async fn report_caption_uses_stored_offset() {
        let dir = tempfile::tempdir().unwrap();
        let bot = bot_with(dir.path(), FakeSource::Rows(sample_rows()), &[]).await;
        bot.settings.set_timezone("99", -4).await.unwrap();

        let reply = bot.handle_event(7, 99, text("/graph_1h")).await.unwrap();
        assert!(reply.text.contains("UTC-4"));
    }

    #[tokio::test]
    async fn states_are_per_chat() {
        let dir = tempfile::tempdir().unwrap();
        let bot = bot_with(dir.path(), FakeSource::Rows(sample_rows()), &[]).await;

        bot.handle_event(1, 10, text("/settings")).await.unwrap();
        bot.handle_event(2, 20, text("/graph")).await.unwrap();
        assert_eq!(bot.state(1).await, ChatState::SettingsPrompt { user_id: 10 });
        assert_eq!(bot.state(2).await, ChatState::PeriodMenuShown);

        // Plain chatter in an idle or menu chat is ignored.
        assert!(bot.handle_event(3, 30, text("hello")).await.is_none());
        assert!(bot.handle_event(2, 20, text("hello")).await.is_none());
    }

    #[tokio::test]
    async fn malformed_data_becomes_one_error_message() {
        let dir = tempfile::tempdir().unwrap();
        let bot = bot_with(dir.path(), FakeSource::Malformed, &[]).await;

        let reply = bot.handle_event(7, 1, text("/graph_24h")).await.unwrap();
        assert_eq!(reply.text, "Traffic data is unavailable at the moment.");
        assert!(reply.chart.is_none());
        assert_eq!(bot.state(7).await, ChatState::Idle);
    }

    #[tokio::test]
    async fn empty_result_reports_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let bot = bot_with(dir.path(), FakeSource::Rows(Vec::new()), &[]).await;

        let reply = bot.handle_event(7, 1, text("/graph_7d")).await.unwrap();
        assert_eq!(reply.text, "No traffic data for the selected period.");
    }

    #[tokio::test]
    async fn unreachable_source_asks_to_retry() {
        let dir = tempfile::tempdir().unwrap();
        let client = ClickHouseClient::new("http://127.0.0.1:9", StdDuration::from_secs(2)).unwrap();
        let bot = bot_with(dir.path(), client, &[]).await;

        let reply = bot.handle_event(7, 1, text("/graph_1h")).await.unwrap();
        assert!(reply.text.contains("try again later"));
    }

    #[tokio::test]
    async fn settings_prompt_belongs_to_the_user_who_opened_it() {
        let dir = tempfile::tempdir().unwrap();
        let bot = bot_with(dir.path(), FakeSource::Rows(sample_rows()), &[-100123]).await;

        bot.handle_event(-100123, 10, text("/settings")).await.unwrap();
        assert!(bot.handle_event(-100123, 20, text("hello everyone")).await.is_none());
        assert!(bot.handle_event(-100123, 20, text("3")).await.is_none());
        assert!(bot.handle_event(-100123, 20, text("/cancel")).await.is_none());
        assert_eq!(bot.settings.stored_timezone("20").await, None);
        assert_eq!(
            bot.state(-100123).await,
            ChatState::SettingsPrompt { user_id: 10 }
        );

        let reply = bot.handle_event(-100123, 10, text("-3")).await.unwrap();
        assert_eq!(reply.text, "Timezone set to UTC-3.");
        assert_eq!(bot.settings.get_timezone("10").await, -3);
        assert_eq!(bot.state(-100123).await, ChatState::Idle);
    }

    #[tokio::test]
    async fn out_of_range_stored_offset_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tz.json"), r#"{"99": 1000000, "98": 99}"#).unwrap();
        let bot = bot_with(dir.path(), FakeSource::Rows(sample_rows()), &[]).await;

        for user in [99, 98] {
            let reply = bot.handle_event(7, user, text("/graph_1h")).await.unwrap();
            assert!(reply.chart.is_some());
            let range_line = reply.text.lines().nth(1).unwrap();
            assert!(range_line.ends_with(" UTC"), "{range_line}");
        }
    }

    #[tokio::test]
    async fn configured_zone_applies_until_user_picks_one() {
        let dir = tempfile::tempdir().unwrap();
        let almaty = DisplayZone::parse("Asia/Almaty").unwrap();
        let bot = bot_in_zone(dir.path(), FakeSource::Rows(sample_rows()), &[], almaty).await;

        let reply = bot.handle_event(7, 5, text("/graph_1h")).await.unwrap();
        assert!(reply.text.lines().nth(1).unwrap().ends_with("Asia/Almaty"));

        let reply = bot.handle_event(7, 5, text("/settings")).await.unwrap();
        assert!(reply.text.starts_with("Your timezone is Asia/Almaty."));
        bot.handle_event(7, 5, text("+2")).await.unwrap();

        let reply = bot.handle_event(7, 5, text("/graph_1h")).await.unwrap();
        assert!(reply.text.lines().nth(1).unwrap().ends_with("UTC+2"));
    }

    #[tokio::test]
    async fn http_error_from_source_reads_as_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let url = crate::clickhouse::testing::serve_once(500, "Code: 60. DB::Exception").await;
        let client = ClickHouseClient::new(&url, StdDuration::from_secs(5)).unwrap();
        let bot = bot_with(dir.path(), client, &[]).await;

        let reply = bot.handle_event(7, 1, text("/graph_24h")).await.unwrap();
        assert_eq!(reply.text, "Traffic data is unavailable at the moment.");
        assert!(reply.chart.is_none());
    }

    #[tokio::test]
    async fn pending_period_matches_what_gets_reported() {
        let dir = tempfile::tempdir().unwrap();
        let bot = bot_with(dir.path(), FakeSource::Rows(sample_rows()), &[-100123]).await;
        let chat = -100123;

        let callback = Inbound::Callback(Button::Period(Period::Week).payload());
        assert_eq!(bot.pending_period(chat, &callback).await, Some(Period::Week));
        assert_eq!(bot.pending_period(-100999, &callback).await, None);
        assert_eq!(bot.pending_period(chat, &text("/graph_6h@TrafficBot")).await, Some(Period::SixHours));
        assert_eq!(bot.pending_period(chat, &text("/graph")).await, None);
        assert_eq!(
            bot.pending_period(chat, &Inbound::Callback(Button::Settings.payload())).await,
            None
        );

        // Typed tokens only count while the menu is open.
        assert_eq!(bot.pending_period(chat, &text("24h")).await, None);
        bot.handle_event(chat, 1, text("/graph")).await.unwrap();
        assert_eq!(bot.pending_period(chat, &text("24h")).await, Some(Period::Day));
        assert_eq!(bot.state(chat).await, ChatState::PeriodMenuShown);
    }

    #[test]
    fn status_texts_name_the_period() {
        assert_eq!(
            building_status(Period::Week),
            "Building the traffic chart for the last 7 days..."
        );
        assert!(finished_status(Period::OneHour, true).ends_with("sent."));
        assert!(finished_status(Period::OneHour, false).contains("could not be built"));
    }

    #[test]
    fn button_payloads_round_trip() {
        for row in main_menu() {
            for button in row {
                assert_eq!(Button::from_payload(&button.payload()), Some(button));
            }
        }
        assert_eq!(Button::from_payload("period:3h"), None);
        assert_eq!(Button::from_payload("garbage"), None);
    }
}
