use super::types::{
    assign_ids, scalar_to_string, AssertConditionParams, Command, Condition, ElementSelector,
    FlowCommand, FlowConfig, InputRandomKind, InputRandomParams, LaunchAppParams, RepeatParams,
    RunFlowParams, RunScriptParams, ScrollUntilVisibleParams, SetLocationParams, SwipeParams,
    SwipeTarget, TapOnElementParams, TapOnPointParams, TapOnRelativePointParams,
    DEFAULT_SWIPE_DURATION_MS,
};
use crate::driver::traits::{KeyCode, Point, SwipeDirection};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Parse a YAML flow file into numbered commands
pub fn parse_flow_file(path: &Path) -> Result<Vec<FlowCommand>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;

    parse_flow_content(&content).with_context(|| format!("Invalid flow: {}", path.display()))
}

/// Parse YAML flow content
///
/// An optional header document (`appId`, `name`, `initFlow`) may precede a
/// `---` line; it becomes a leading `ApplyConfiguration` command.
pub fn parse_flow_content(content: &str) -> Result<Vec<FlowCommand>> {
    let (header, body) = split_header(content);

    let config = match header {
        Some(h) if !h.trim().is_empty() => Some(
            serde_yaml::from_str::<FlowConfig>(h).context("Failed to parse YAML header")?,
        ),
        _ => None,
    };

    let mut commands = parse_commands(body)?;

    if let Some(mut config) = config {
        if !config.app_id.is_empty() {
            fill_app_ids(&mut commands, &config.app_id);
        }
        if let Some(init) = &mut config.init_flow {
            if init.app_id.is_empty() {
                init.app_id = config.app_id.clone();
            }
            let app_id = init.app_id.clone();
            fill_app_ids(&mut init.commands, &app_id);
        }
        commands.insert(0, FlowCommand::new(Command::ApplyConfiguration(config)));
    }

    let mut next = 0;
    assign_ids(&mut commands, &mut next);
    Ok(commands)
}

fn split_header(content: &str) -> (Option<&str>, &str) {
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return (Some(&content[..offset]), &content[offset + line.len()..]);
        }
        offset += line.len();
    }
    (None, content)
}

fn parse_commands(yaml: &str) -> Result<Vec<FlowCommand>> {
    let yaml = yaml.trim();
    if yaml.is_empty() {
        return Ok(Vec::new());
    }

    let values: Vec<Value> =
        serde_yaml::from_str(yaml).context("Failed to parse YAML commands")?;

    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            parse_command_value(v)
                .map(FlowCommand::new)
                .with_context(|| format!("Command #{}", i + 1))
        })
        .collect()
}

/// Commands without an explicit app id act on the flow's app
fn fill_app_ids(commands: &mut [FlowCommand], app_id: &str) {
    for cmd in commands.iter_mut() {
        match &mut cmd.command {
            Command::LaunchApp(p) if p.app_id.is_empty() => p.app_id = app_id.to_string(),
            Command::StopApp(id) | Command::ClearAppState(id) if id.is_empty() => {
                *id = app_id.to_string()
            }
            Command::RunFlow(p) => fill_app_ids(&mut p.commands, app_id),
            Command::Repeat(p) => fill_app_ids(&mut p.commands, app_id),
            _ => {}
        }
    }
}

/// Parse a single command from a YAML value
pub fn parse_command_value(value: &Value) -> Result<Command> {
    match value {
        // Simple string command like "- backPress" or "- hideKeyboard"
        Value::String(s) => {
            parse_simple_command(s)?.ok_or_else(|| anyhow::anyhow!("Unknown command: {}", s))
        }

        // Command with parameters like "- tapOn:\n    text: 'Login'"
        Value::Mapping(map) => {
            let mut entries = map.iter();
            let (key, params) = match (entries.next(), entries.next()) {
                (Some(entry), None) => entry,
                _ => bail!("Invalid command format: expected single key mapping"),
            };
            let name = key
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("Command name must be a string"))?;

            if params.is_null() {
                if let Some(cmd) = parse_simple_command(name)? {
                    return Ok(cmd);
                }
            }

            parse_command_with_params(name, params)
                .with_context(|| format!("Invalid parameters for {}", name))
        }

        _ => bail!("Invalid command format: {:?}", value),
    }
}

/// Parse a command without parameters
fn parse_simple_command(name: &str) -> Result<Option<Command>> {
    let cmd = match name {
        "launchApp" | "open" => Command::LaunchApp(LaunchAppParams::default()),
        "stopApp" | "stop" => Command::StopApp(String::new()),
        "clearState" | "clearAppState" => Command::ClearAppState(String::new()),
        "clearKeychain" => Command::ClearKeychain,
        "back" | "backPress" => Command::BackPress,
        "hideKeyboard" | "hideKbd" => Command::HideKeyboard,
        "pasteText" => Command::PasteText,
        "scroll" => Command::Scroll,
        "eraseText" | "clear" => Command::EraseText(None),
        "waitForAnimationToEnd" => Command::WaitForAnimationToEnd(None),
        "inputRandomText" => Command::InputRandom(InputRandomParams::new(InputRandomKind::Text)),
        "inputRandomNumber" => {
            Command::InputRandom(InputRandomParams::new(InputRandomKind::Number))
        }
        "inputRandomEmail" => Command::InputRandom(InputRandomParams::new(InputRandomKind::Email)),
        "inputRandomPersonName" => {
            Command::InputRandom(InputRandomParams::new(InputRandomKind::PersonName))
        }
        "swipeLeft" => swipe_direction(SwipeDirection::Left),
        "swipeRight" => swipe_direction(SwipeDirection::Right),
        "swipeUp" => swipe_direction(SwipeDirection::Up),
        "swipeDown" => swipe_direction(SwipeDirection::Down),
        _ => return Ok(None),
    };

    Ok(Some(cmd))
}

fn swipe_direction(direction: SwipeDirection) -> Command {
    Command::Swipe(SwipeParams {
        target: SwipeTarget::Direction(direction),
        duration_ms: DEFAULT_SWIPE_DURATION_MS,
    })
}

/// Tap flags that may sit next to selector fields
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TapFlags {
    #[serde(default, alias = "retryTapIfNoChange")]
    retry_if_no_change: Option<bool>,
    #[serde(default)]
    wait_until_visible: Option<bool>,
    #[serde(default)]
    long_press: Option<bool>,
}

/// Parse a command with parameters
fn parse_command_with_params(name: &str, params: &Value) -> Result<Command> {
    let cmd = match name {
        "tapOn" | "tapOnElement" | "tap" => {
            if params.get("point").is_some() {
                Command::TapOnRelativePoint(serde_yaml::from_value::<TapOnRelativePointParams>(
                    params.clone(),
                )?)
            } else {
                let flags: TapFlags = if params.is_mapping() {
                    serde_yaml::from_value(params.clone())?
                } else {
                    TapFlags::default()
                };
                Command::TapOnElement(TapOnElementParams {
                    selector: parse_selector(params)?,
                    retry_if_no_change: flags.retry_if_no_change,
                    wait_until_visible: flags.wait_until_visible,
                    long_press: flags.long_press,
                })
            }
        }
        "tapOnPoint" => Command::TapOnPoint(serde_yaml::from_value::<TapOnPointParams>(
            params.clone(),
        )?),
        "longPressOn" | "longPress" => Command::LongPress(parse_selector(params)?),
        "inputText" | "write" => Command::InputText(scalar(params)?),
        "inputRandom" => Command::InputRandom(serde_yaml::from_value(params.clone())?),
        "inputRandomText" | "inputRandomNumber" => {
            #[derive(Deserialize)]
            struct Length {
                #[serde(default)]
                length: Option<usize>,
            }
            let Length { length } = serde_yaml::from_value(params.clone())?;
            let kind = if name == "inputRandomText" {
                InputRandomKind::Text
            } else {
                InputRandomKind::Number
            };
            Command::InputRandom(InputRandomParams { kind, length })
        }
        "eraseText" | "clear" => {
            let count = match params {
                Value::Mapping(_) => params
                    .get("charactersToErase")
                    .and_then(|v| v.as_u64())
                    .map(|n| n as u32),
                other => Some(serde_yaml::from_value::<u32>(other.clone())?),
            };
            Command::EraseText(count)
        }
        "pressKey" => Command::PressKey(serde_yaml::from_value::<KeyCode>(params.clone())?),
        "copyTextFrom" => Command::CopyTextFrom(parse_selector(params)?),
        "swipe" => Command::Swipe(parse_swipe(params)?),
        "scrollUntilVisible" | "scrollTo" => {
            if params.is_string() {
                Command::ScrollUntilVisible(ScrollUntilVisibleParams {
                    selector: parse_selector(params)?,
                    direction: SwipeDirection::Down,
                    timeout: 20000,
                })
            } else {
                Command::ScrollUntilVisible(serde_yaml::from_value(params.clone())?)
            }
        }
        "assertVisible" | "see" => Command::AssertVisible(parse_selector(params)?),
        "assertNotVisible" | "notSee" => Command::AssertNotVisible(parse_selector(params)?),
        "assertTrue" => Command::AssertCondition(AssertConditionParams {
            condition: Condition {
                script_condition: Some(scalar(params)?),
                ..Default::default()
            },
            timeout: None,
        }),
        "assertCondition" => Command::AssertCondition(serde_yaml::from_value(params.clone())?),
        "extendedWaitUntil" => {
            let condition: Condition = serde_yaml::from_value(params.clone())?;
            let timeout = params.get("timeout").and_then(|v| v.as_u64());
            Command::AssertCondition(AssertConditionParams { condition, timeout })
        }
        "launchApp" | "open" => {
            if params.is_mapping() {
                Command::LaunchApp(serde_yaml::from_value(params.clone())?)
            } else {
                Command::LaunchApp(LaunchAppParams {
                    app_id: scalar(params)?,
                    ..Default::default()
                })
            }
        }
        "stopApp" | "stop" => Command::StopApp(scalar(params)?),
        "clearState" | "clearAppState" => Command::ClearAppState(scalar(params)?),
        "openLink" | "deepLink" => Command::OpenLink(scalar_or_field(params, "link")?),
        "setLocation" => {
            Command::SetLocation(serde_yaml::from_value::<SetLocationParams>(params.clone())?)
        }
        "takeScreenshot" => Command::TakeScreenshot(scalar_or_field(params, "path")?),
        "waitForAnimationToEnd" => {
            Command::WaitForAnimationToEnd(params.get("timeout").and_then(|v| v.as_u64()))
        }
        "mockNetwork" => Command::MockNetwork(scalar_or_field(params, "path")?),
        "runFlow" => {
            if params.get("file").is_some() || params.is_string() {
                bail!("runFlow only supports inline `commands`");
            }
            Command::RunFlow(serde_yaml::from_value::<RunFlowParams>(params.clone())?)
        }
        "repeat" => Command::Repeat(serde_yaml::from_value::<RepeatParams>(params.clone())?),
        "defineVariables" | "env" => Command::DefineVariables(string_map(params)?),
        "runScript" => {
            if params.is_string() {
                Command::RunScript(RunScriptParams {
                    script: scalar(params)?,
                    ..Default::default()
                })
            } else {
                Command::RunScript(serde_yaml::from_value(params.clone())?)
            }
        }
        "evalScript" => Command::EvalScript(scalar(params)?),
        "applyConfiguration" => Command::ApplyConfiguration(serde_yaml::from_value(params.clone())?),
        _ => bail!("Unknown command: {}", name),
    };

    Ok(cmd)
}

/// A selector, or plain text as a shorthand for `text:`
fn parse_selector(params: &Value) -> Result<ElementSelector> {
    match params {
        Value::String(_) | Value::Number(_) => Ok(ElementSelector::text(&scalar(params)?)),
        _ => Ok(serde_yaml::from_value(params.clone())?),
    }
}

fn scalar(value: &Value) -> Result<String> {
    scalar_to_string(value).map_err(anyhow::Error::msg)
}

fn scalar_or_field(value: &Value, field: &str) -> Result<String> {
    match value.get(field) {
        Some(inner) => scalar(inner),
        None => scalar(value),
    }
}

fn string_map(value: &Value) -> Result<BTreeMap<String, String>> {
    let raw: BTreeMap<String, Value> = serde_yaml::from_value(value.clone())?;
    raw.into_iter()
        .map(|(k, v)| scalar(&v).map(|s| (k, s)))
        .collect()
}

fn parse_point(s: &str) -> Result<Point> {
    let parts: Vec<i32> = s
        .split(',')
        .map(|p| p.trim().parse::<i32>())
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("Invalid point: {}", s))?;
    match parts.as_slice() {
        [x, y] => Ok(Point::new(*x, *y)),
        _ => bail!("Invalid point: {}", s),
    }
}

/// `direction`, `start`+`end`, or `direction`+`from`
fn parse_swipe(params: &Value) -> Result<SwipeParams> {
    let duration_ms = params
        .get("duration")
        .and_then(|v| v.as_u64())
        .unwrap_or(DEFAULT_SWIPE_DURATION_MS);

    let direction = params
        .get("direction")
        .map(|v| serde_yaml::from_value::<SwipeDirection>(v.clone()))
        .transpose()
        .context("Direction can be either RIGHT, LEFT, UP or DOWN")?;
    let start = params.get("start").map(scalar).transpose()?;
    let end = params.get("end").map(scalar).transpose()?;
    let from = params.get("from").map(parse_selector).transpose()?;

    let target = match (direction, start, end, from) {
        (None, Some(start), Some(end), None) => {
            if start.contains('%') || end.contains('%') {
                if !(start.contains('%') && end.contains('%')) {
                    bail!(
                        "You need to provide start and end coordinates with %, Found: ({}, {})",
                        start,
                        end
                    );
                }
                SwipeTarget::Relative { start, end }
            } else {
                SwipeTarget::Coordinates {
                    start: parse_point(&start)?,
                    end: parse_point(&end)?,
                }
            }
        }
        (Some(direction), None, None, None) => SwipeTarget::Direction(direction),
        (Some(direction), None, None, Some(selector)) => SwipeTarget::Element {
            selector,
            direction,
        },
        (Some(_), _, _, _) => bail!("You cannot provide start/end coordinates with directional swipe"),
        _ => bail!(
            "Swipe takes either a direction, start and end coordinates, or a direction and an element"
        ),
    };

    Ok(SwipeParams {
        target,
        duration_ms,
    })
}
