use crate::driver::traits::{KeyCode, Point, SwipeDirection};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Stable identity of a command inside a flow, assigned depth-first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CommandId(pub usize);

impl std::fmt::Display for CommandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An executable node of a flow
#[derive(Debug, Clone, PartialEq)]
pub struct FlowCommand {
    pub id: CommandId,
    pub command: Command,
}

impl FlowCommand {
    pub fn new(command: Command) -> Self {
        Self {
            id: CommandId::default(),
            command,
        }
    }
}

impl<'de> Deserialize<'de> for FlowCommand {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_yaml::Value::deserialize(deserializer)?;
        super::yaml::parse_command_value(&value)
            .map(FlowCommand::new)
            .map_err(|e| D::Error::custom(format!("{:#}", e)))
    }
}

/// Number every command of the tree depth-first, starting at `next`
pub fn assign_ids(commands: &mut [FlowCommand], next: &mut usize) {
    for cmd in commands.iter_mut() {
        cmd.id = CommandId(*next);
        *next += 1;
        match &mut cmd.command {
            Command::RunFlow(p) => assign_ids(&mut p.commands, next),
            Command::Repeat(p) => assign_ids(&mut p.commands, next),
            Command::ApplyConfiguration(config) => {
                if let Some(init) = &mut config.init_flow {
                    assign_ids(&mut init.commands, next);
                }
            }
            _ => {}
        }
    }
}

/// Wrap plain commands into a numbered flow
pub fn build_flow(commands: Vec<Command>) -> Vec<FlowCommand> {
    let mut flow: Vec<FlowCommand> = commands.into_iter().map(FlowCommand::new).collect();
    let mut next = 0;
    assign_ids(&mut flow, &mut next);
    flow
}

/// All supported commands
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // Interactions
    TapOnElement(TapOnElementParams),
    TapOnPoint(TapOnPointParams),
    TapOnRelativePoint(TapOnRelativePointParams),
    LongPress(ElementSelector),
    InputText(String),
    InputRandom(InputRandomParams),
    EraseText(Option<u32>),
    PressKey(KeyCode),
    BackPress,
    HideKeyboard,
    CopyTextFrom(ElementSelector),
    PasteText,

    // Swipe/Scroll
    Swipe(SwipeParams),
    Scroll,
    ScrollUntilVisible(ScrollUntilVisibleParams),

    // Assertions
    AssertVisible(ElementSelector),
    AssertNotVisible(ElementSelector),
    AssertCondition(AssertConditionParams),

    // App lifecycle
    LaunchApp(LaunchAppParams),
    StopApp(String),
    ClearAppState(String),
    ClearKeychain,
    OpenLink(String),
    SetLocation(SetLocationParams),
    TakeScreenshot(String),
    WaitForAnimationToEnd(Option<u64>),
    MockNetwork(String),

    // Control flow
    RunFlow(RunFlowParams),
    Repeat(RepeatParams),

    // Variables
    DefineVariables(BTreeMap<String, String>),
    RunScript(RunScriptParams),
    EvalScript(String),

    ApplyConfiguration(FlowConfig),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TapOnElementParams {
    pub selector: ElementSelector,
    /// Default: true
    pub retry_if_no_change: Option<bool>,
    /// Default: false
    pub wait_until_visible: Option<bool>,
    pub long_press: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TapOnPointParams {
    pub x: i32,
    pub y: i32,
    #[serde(default)]
    pub retry_if_no_change: Option<bool>,
    #[serde(default)]
    pub long_press: Option<bool>,
}

/// Tap on `"x,y"` (absolute) or `"x%,y%"` (relative to the screen)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TapOnRelativePointParams {
    pub point: String,
    #[serde(default)]
    pub retry_if_no_change: Option<bool>,
    #[serde(default)]
    pub long_press: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InputRandomKind {
    Text,
    Number,
    Email,
    PersonName,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputRandomParams {
    pub kind: InputRandomKind,
    /// Only used by `TEXT` and `NUMBER`, default 8
    #[serde(default)]
    pub length: Option<usize>,
}

impl InputRandomParams {
    pub fn new(kind: InputRandomKind) -> Self {
        Self { kind, length: None }
    }
}

/// Swipe shapes accepted by the `swipe` command
#[derive(Debug, Clone, PartialEq)]
pub enum SwipeTarget {
    Direction(SwipeDirection),
    Coordinates { start: Point, end: Point },
    /// Percent strings such as `"90%,50%"`
    Relative { start: String, end: String },
    Element {
        selector: ElementSelector,
        direction: SwipeDirection,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwipeParams {
    pub target: SwipeTarget,
    pub duration_ms: u64,
}

pub const DEFAULT_SWIPE_DURATION_MS: u64 = 400;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollUntilVisibleParams {
    #[serde(alias = "element")]
    pub selector: ElementSelector,
    /// Finger direction of the search, default DOWN
    #[serde(default = "default_scroll_direction")]
    pub direction: SwipeDirection,
    #[serde(default = "default_scroll_timeout")]
    pub timeout: u64,
}

fn default_scroll_direction() -> SwipeDirection {
    SwipeDirection::Down
}

fn default_scroll_timeout() -> u64 {
    20000
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertConditionParams {
    pub condition: Condition,
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchAppParams {
    /// Filled from the flow header when omitted
    #[serde(default, alias = "url")]
    pub app_id: String,
    #[serde(default)]
    pub clear_state: Option<bool>,
    #[serde(default)]
    pub clear_keychain: Option<bool>,
    /// Stop app before launching (default: true)
    #[serde(default)]
    pub stop_app: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SetLocationParams {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFlowParams {
    pub commands: Vec<FlowCommand>,
    #[serde(default, rename = "when")]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepeatParams {
    /// Kept as text so it can come from a script expression
    #[serde(default, deserialize_with = "deserialize_scalar_string")]
    pub times: Option<String>,
    #[serde(default, rename = "while")]
    pub condition: Option<Condition>,
    pub commands: Vec<FlowCommand>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunScriptParams {
    pub script: String,
    #[serde(default, deserialize_with = "deserialize_string_map")]
    pub env: BTreeMap<String, String>,
    /// File name or label, used in error messages
    #[serde(default)]
    pub source: Option<String>,
}

/// Flow header, executed as a leading `ApplyConfiguration` command
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowConfig {
    #[serde(default, alias = "url")]
    pub app_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub init_flow: Option<InitFlow>,
}

/// Commands run once to produce app state for the main flow
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitFlow {
    #[serde(default)]
    pub app_id: String,
    pub commands: Vec<FlowCommand>,
}

/// Declarative element query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementSelector {
    #[serde(default, alias = "text", skip_serializing_if = "Option::is_none")]
    pub text_regex: Option<String>,
    #[serde(default, alias = "id", skip_serializing_if = "Option::is_none")]
    pub id_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<SizeSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub below: Option<Box<ElementSelector>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub above: Option<Box<ElementSelector>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_of: Option<Box<ElementSelector>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_of: Option<Box<ElementSelector>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains_child: Option<Box<ElementSelector>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traits: Option<Vec<ElementTrait>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default)]
    pub optional: bool,
}

impl ElementSelector {
    pub fn text(text: &str) -> Self {
        Self {
            text_regex: Some(text.to_string()),
            ..Default::default()
        }
    }

    pub fn id(id: &str) -> Self {
        Self {
            id_regex: Some(id.to_string()),
            ..Default::default()
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Human-readable summary, clause by clause
    pub fn description(&self) -> String {
        let mut parts = Vec::new();

        if let Some(text) = &self.text_regex {
            parts.push(format!("Text matching regex: {}", text));
        }
        if let Some(id) = &self.id_regex {
            parts.push(format!("Id matching regex: {}", id));
        }
        if let Some(size) = &self.size {
            parts.push(format!("Size: {}", size.description()));
        }
        if let Some(s) = &self.below {
            parts.push(format!("Below: {}", s.description()));
        }
        if let Some(s) = &self.above {
            parts.push(format!("Above: {}", s.description()));
        }
        if let Some(s) = &self.left_of {
            parts.push(format!("Left of: {}", s.description()));
        }
        if let Some(s) = &self.right_of {
            parts.push(format!("Right of: {}", s.description()));
        }
        if let Some(s) = &self.contains_child {
            parts.push(format!("Contains child: {}", s.description()));
        }
        for t in self.traits.iter().flatten() {
            parts.push(t.description().to_string());
        }
        if let Some(enabled) = self.enabled {
            parts.push(if enabled { "Enabled" } else { "Disabled" }.to_string());
        }
        if let Some(index) = self.index {
            parts.push(format!("Index: {}", index));
        }

        parts.join(", ")
    }

    fn evaluate_scripts<E>(&mut self, eval: &mut dyn FnMut(&str) -> Result<String, E>) -> Result<(), E> {
        eval_opt(&mut self.text_regex, eval)?;
        eval_opt(&mut self.id_regex, eval)?;
        for nested in [
            &mut self.below,
            &mut self.above,
            &mut self.left_of,
            &mut self.right_of,
            &mut self.contains_child,
        ]
        .into_iter()
        .flatten()
        {
            nested.evaluate_scripts(eval)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SizeSelector {
    #[serde(default)]
    pub width: Option<i32>,
    #[serde(default)]
    pub height: Option<i32>,
    #[serde(default)]
    pub tolerance: Option<i32>,
}

impl SizeSelector {
    fn description(&self) -> String {
        let mut parts = Vec::new();
        if let Some(w) = self.width {
            parts.push(format!("width={}", w));
        }
        if let Some(h) = self.height {
            parts.push(format!("height={}", h));
        }
        if let Some(t) = self.tolerance {
            parts.push(format!("tolerance={}", t));
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElementTrait {
    Text,
    Square,
    LongText,
}

impl ElementTrait {
    pub fn description(&self) -> &'static str {
        match self {
            ElementTrait::Text => "Has text",
            ElementTrait::Square => "Is square",
            ElementTrait::LongText => "Has long text",
        }
    }
}

/// Conjunction of optional clauses
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(default)]
    pub visible: Option<ElementSelector>,
    #[serde(default)]
    pub not_visible: Option<ElementSelector>,
    /// Script output, already interpolated when evaluated
    #[serde(default, alias = "script", alias = "true")]
    pub script_condition: Option<String>,
}

impl Condition {
    pub fn is_optional(&self) -> bool {
        self.visible.as_ref().map_or(false, |s| s.optional)
            || self.not_visible.as_ref().map_or(false, |s| s.optional)
    }

    pub fn description(&self) -> String {
        let mut parts = Vec::new();
        if let Some(s) = &self.visible {
            parts.push(format!("{} is visible", s.description()));
        }
        if let Some(s) = &self.not_visible {
            parts.push(format!("{} is not visible", s.description()));
        }
        if let Some(script) = &self.script_condition {
            parts.push(format!("{} is true", script));
        }
        if parts.is_empty() {
            "true".to_string()
        } else {
            parts.join(" and ")
        }
    }

    pub fn evaluate_scripts<E>(
        &self,
        eval: &mut dyn FnMut(&str) -> Result<String, E>,
    ) -> Result<Condition, E> {
        let mut c = self.clone();
        if let Some(s) = &mut c.visible {
            s.evaluate_scripts(eval)?;
        }
        if let Some(s) = &mut c.not_visible {
            s.evaluate_scripts(eval)?;
        }
        eval_opt(&mut c.script_condition, eval)?;
        Ok(c)
    }
}

fn eval_str<E>(s: &mut String, eval: &mut dyn FnMut(&str) -> Result<String, E>) -> Result<(), E> {
    *s = eval(s)?;
    Ok(())
}

fn eval_opt<E>(
    s: &mut Option<String>,
    eval: &mut dyn FnMut(&str) -> Result<String, E>,
) -> Result<(), E> {
    if let Some(inner) = s {
        eval_str(inner, eval)?;
    }
    Ok(())
}

impl Command {
    /// Children owned by composite commands
    pub fn sub_commands(&self) -> &[FlowCommand] {
        match self {
            Command::RunFlow(p) => &p.commands,
            Command::Repeat(p) => &p.commands,
            _ => &[],
        }
    }

    /// Copy of the command with every `${...}` in its text fields evaluated
    ///
    /// Composite guards, children and script bodies are left untouched; the
    /// interpreter evaluates them when it reaches them.
    pub fn evaluate_scripts<E>(
        &self,
        eval: &mut dyn FnMut(&str) -> Result<String, E>,
    ) -> Result<Command, E> {
        let mut cmd = self.clone();
        match &mut cmd {
            Command::TapOnElement(p) => p.selector.evaluate_scripts(eval)?,
            Command::TapOnRelativePoint(p) => eval_str(&mut p.point, eval)?,
            Command::LongPress(s)
            | Command::CopyTextFrom(s)
            | Command::AssertVisible(s)
            | Command::AssertNotVisible(s) => s.evaluate_scripts(eval)?,
            Command::InputText(text) => eval_str(text, eval)?,
            Command::Swipe(p) => match &mut p.target {
                SwipeTarget::Relative { start, end } => {
                    eval_str(start, eval)?;
                    eval_str(end, eval)?;
                }
                SwipeTarget::Element { selector, .. } => selector.evaluate_scripts(eval)?,
                _ => {}
            },
            Command::ScrollUntilVisible(p) => p.selector.evaluate_scripts(eval)?,
            Command::AssertCondition(p) => p.condition = p.condition.evaluate_scripts(eval)?,
            Command::LaunchApp(p) => eval_str(&mut p.app_id, eval)?,
            Command::StopApp(s)
            | Command::ClearAppState(s)
            | Command::OpenLink(s)
            | Command::TakeScreenshot(s)
            | Command::MockNetwork(s) => eval_str(s, eval)?,
            Command::Repeat(p) => eval_opt(&mut p.times, eval)?,
            Command::DefineVariables(env) => {
                for value in env.values_mut() {
                    eval_str(value, eval)?;
                }
            }
            Command::RunScript(p) => {
                for value in p.env.values_mut() {
                    eval_str(value, eval)?;
                }
            }
            _ => {}
        }
        Ok(cmd)
    }

    /// One-line summary used in progress output
    pub fn description(&self) -> String {
        match self {
            Command::TapOnElement(p) => {
                let verb = if p.long_press == Some(true) {
                    "Long press on"
                } else {
                    "Tap on"
                };
                format!("{} {}{}", verb, p.selector.description(), optional_suffix(&p.selector))
            }
            Command::TapOnPoint(p) => format!("Tap on point ({}, {})", p.x, p.y),
            Command::TapOnRelativePoint(p) => format!("Tap on point ({})", p.point),
            Command::LongPress(s) => format!("Long press on {}{}", s.description(), optional_suffix(s)),
            Command::InputText(text) => format!("Input text {}", text),
            Command::InputRandom(p) => match p.kind {
                InputRandomKind::Text => "Input random text".to_string(),
                InputRandomKind::Number => "Input random number".to_string(),
                InputRandomKind::Email => "Input random email address".to_string(),
                InputRandomKind::PersonName => "Input random person name".to_string(),
            },
            Command::EraseText(None) => "Erase text".to_string(),
            Command::EraseText(Some(n)) => format!("Erase {} characters", n),
            Command::PressKey(code) => format!("Press {:?} key", code),
            Command::BackPress => "Press back".to_string(),
            Command::HideKeyboard => "Hide Keyboard".to_string(),
            Command::CopyTextFrom(s) => format!("Copy text from element with {}", s.description()),
            Command::PasteText => "Paste text".to_string(),
            Command::Swipe(p) => match &p.target {
                SwipeTarget::Direction(d) => format!("Swiping in {:?} direction", d),
                SwipeTarget::Coordinates { start, end } => format!(
                    "Swipe from ({},{}) to ({},{}) in {} ms",
                    start.x, start.y, end.x, end.y, p.duration_ms
                ),
                SwipeTarget::Relative { start, end } => {
                    format!("Swipe from ({}) to ({}) in {} ms", start, end, p.duration_ms)
                }
                SwipeTarget::Element {
                    selector,
                    direction,
                } => format!(
                    "Swiping in {:?} direction on {}",
                    direction,
                    selector.description()
                ),
            },
            Command::Scroll => "Scroll vertically".to_string(),
            Command::ScrollUntilVisible(p) => format!(
                "Scrolling {:?} until {} is visible",
                p.direction,
                p.selector.description()
            ),
            Command::AssertVisible(s) => {
                format!("Assert that {} is visible{}", s.description(), optional_suffix(s))
            }
            Command::AssertNotVisible(s) => format!(
                "Assert that {} is not visible{}",
                s.description(),
                optional_suffix(s)
            ),
            Command::AssertCondition(p) => format!("Assert that {}", p.condition.description()),
            Command::LaunchApp(p) => {
                let mut s = format!("Launch app \"{}\"", p.app_id);
                if p.clear_state == Some(true) {
                    s.push_str(" with clear state");
                }
                if p.clear_keychain == Some(true) {
                    s.push_str(" with clear keychain");
                }
                if p.stop_app == Some(false) {
                    s.push_str(" without stopping app");
                }
                s
            }
            Command::StopApp(app) => format!("Stop {}", app),
            Command::ClearAppState(app) => format!("Clear state of {}", app),
            Command::ClearKeychain => "Clear keychain".to_string(),
            Command::OpenLink(link) => format!("Open {}", link),
            Command::SetLocation(p) => {
                format!("Set location (lat: {}, lon: {})", p.latitude, p.longitude)
            }
            Command::TakeScreenshot(path) => format!("Take screenshot {}", path),
            Command::WaitForAnimationToEnd(_) => "Wait for animation to end".to_string(),
            Command::MockNetwork(path) => format!("Set up network mocks from {}", path),
            Command::RunFlow(p) => match (&p.label, &p.condition) {
                (Some(label), _) => label.clone(),
                (None, Some(c)) => format!("Run flow when {}", c.description()),
                (None, None) => "Run flow".to_string(),
            },
            Command::Repeat(p) => {
                let mut s = "Repeat".to_string();
                if let Some(c) = &p.condition {
                    s.push_str(&format!(" while {}", c.description()));
                }
                if let Some(times) = &p.times {
                    s.push_str(&format!(" {} times", times));
                }
                s
            }
            Command::DefineVariables(env) => {
                let names: Vec<&str> = env.keys().map(|k| k.as_str()).collect();
                format!("Define variables {}", names.join(", "))
            }
            Command::RunScript(p) => match &p.source {
                Some(src) => format!("Run {}", src),
                None => "Run script".to_string(),
            },
            Command::EvalScript(script) => format!("Run {}", script),
            Command::ApplyConfiguration(config) => match &config.name {
                Some(name) => format!("Apply configuration \"{}\"", name),
                None => "Apply configuration".to_string(),
            },
        }
    }
}

fn optional_suffix(selector: &ElementSelector) -> &'static str {
    if selector.optional {
        " (Optional)"
    } else {
        ""
    }
}

/// Accept `3` as well as `"3"` or `"${n}"`
fn deserialize_scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(v) => scalar_to_string(&v).map(Some).map_err(D::Error::custom),
    }
}

fn deserialize_string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_yaml::Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(k, v)| scalar_to_string(&v).map(|s| (k, s)))
        .collect::<Result<_, _>>()
        .map_err(D::Error::custom)
}

pub(crate) fn scalar_to_string(value: &serde_yaml::Value) -> Result<String, String> {
    match value {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Null => Ok(String::new()),
        other => Err(format!("expected a scalar value, got {:?}", other)),
    }
}
