use serde::{Deserialize, Serialize};

/// Closed set of actions the planner may request. Unknown keywords coerce to
/// `Wait` in the parser; the executor dispatches exhaustively over this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    LongPress,
    Type,
    Swipe,
    Back,
    Home,
    Wait,
    Complete,
    OpenTarget,
    DismissInputMethod,
    Submit,
    Extract,
    ShareFinding,
}

impl ActionKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "click" | "tap" => Some(Self::Click),
            "long_press" | "longpress" | "long_click" => Some(Self::LongPress),
            "type" | "input_text" | "type_text" => Some(Self::Type),
            "swipe" | "scroll" => Some(Self::Swipe),
            "back" => Some(Self::Back),
            "home" => Some(Self::Home),
            "wait" => Some(Self::Wait),
            "complete" | "done" | "finish" => Some(Self::Complete),
            "open_target" | "open_app" | "launch" => Some(Self::OpenTarget),
            "dismiss_input_method" | "dismiss_keyboard" | "hide_keyboard" => {
                Some(Self::DismissInputMethod)
            }
            "submit" | "enter" => Some(Self::Submit),
            "extract" => Some(Self::Extract),
            "share_finding" => Some(Self::ShareFinding),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Click => "click",
            Self::LongPress => "long_press",
            Self::Type => "type",
            Self::Swipe => "swipe",
            Self::Back => "back",
            Self::Home => "home",
            Self::Wait => "wait",
            Self::Complete => "complete",
            Self::OpenTarget => "open_target",
            Self::DismissInputMethod => "dismiss_input_method",
            Self::Submit => "submit",
            Self::Extract => "extract",
            Self::ShareFinding => "share_finding",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwipeDirection {
    Up,
    Down,
    Left,
    Right,
}

impl SwipeDirection {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            _ => None,
        }
    }
}

/// One typed step of a plan. Optional fields are populated per action kind;
/// absent fields stay `None` rather than failing the decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub action: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<SwipeDirection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub description: String,
}

impl PlanStep {
    pub fn bare(action: ActionKind) -> Self {
        Self {
            action,
            element: None,
            text: None,
            direction: None,
            duration_ms: None,
            app: None,
            query: None,
            key: None,
            value: None,
            description: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }
}

/// One iteration's validated plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
    pub reasoning: String,
    pub confidence: Confidence,
    pub progress: String,
    /// Populated only on the first planner call of a task.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relevant_apps: Vec<String>,
}

impl Plan {
    /// Synthetic fallback plan: a single WAIT carrying the parse error as its
    /// reasoning. The loop must always receive a plan, never an error.
    pub fn wait_fallback(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let mut step = PlanStep::bare(ActionKind::Wait);
        step.duration_ms = Some(1000);
        step.description = "wait for the screen to settle".into();
        Self {
            steps: vec![step],
            reasoning: reason,
            confidence: Confidence::Low,
            progress: String::new(),
            relevant_apps: Vec::new(),
        }
    }

    pub fn is_complete_only(&self) -> bool {
        self.steps.len() == 1 && self.steps[0].action == ActionKind::Complete
    }
}
