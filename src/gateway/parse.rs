//! Parsers for `pactl` output

use super::{GatewayError, ModuleHandle, LOOPBACK_TAG};
use log::warn;

/// One block of `pactl list sources`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceBlock {
    pub name: String,
    pub description: String,
    pub muted: Option<bool>,
    /// Sink this source monitors, `None` for real inputs
    pub monitor_of: Option<String>,
}

impl SourceBlock {
    /// Whether this is a physical/virtual input rather than a sink monitor
    pub fn is_input(&self) -> bool {
        self.monitor_of.is_none() && !self.name.ends_with(".monitor")
    }
}

fn parse_error(command: &str, detail: impl Into<String>) -> GatewayError {
    GatewayError::Parse {
        command: command.to_string(),
        detail: detail.into(),
    }
}

fn field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.strip_prefix(key)
        .and_then(|rest| rest.strip_prefix(':'))
        .map(str::trim)
}

fn parse_yes_no(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" | "1" => Some(true),
        "no" | "false" | "0" => Some(false),
        _ => None,
    }
}

/// Parse the long `pactl list sources` listing into blocks, in server order
pub fn parse_source_list(output: &str) -> Result<Vec<SourceBlock>, GatewayError> {
    let mut blocks: Vec<SourceBlock> = Vec::new();
    let mut current: Option<SourceBlock> = None;

    for line in output.lines() {
        let stripped = line.trim();
        if stripped.starts_with("Source #") {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            current = Some(SourceBlock::default());
            continue;
        }

        let Some(block) = current.as_mut() else {
            continue;
        };

        if let Some(name) = field(stripped, "Name") {
            block.name = name.to_string();
        } else if let Some(description) = field(stripped, "Description") {
            block.description = description.to_string();
        } else if let Some(mute) = field(stripped, "Mute") {
            block.muted = parse_yes_no(mute);
        } else if let Some(sink) = field(stripped, "Monitor of Sink") {
            if sink != "n/a" && !sink.is_empty() {
                block.monitor_of = Some(sink.to_string());
            }
        }
    }
    if let Some(block) = current.take() {
        blocks.push(block);
    }

    if let Some(unnamed) = blocks.iter().position(|b| b.name.is_empty()) {
        return Err(parse_error(
            "list sources",
            format!("source block {} has no Name field", unnamed),
        ));
    }

    // Sources without a description fall back to their name
    for block in &mut blocks {
        if block.description.is_empty() {
            block.description = block.name.clone();
        }
    }

    Ok(blocks)
}

/// Parse `pactl get-source-mute`, which prints `Mute: yes` (or a bare `yes`)
pub fn parse_mute(output: &str) -> Result<bool, GatewayError> {
    let trimmed = output.trim();
    let value = trimmed
        .rsplit_once(':')
        .map(|(_, v)| v.trim())
        .unwrap_or(trimmed);
    parse_yes_no(value).ok_or_else(|| parse_error("get-source-mute", format!("{:?}", trimmed)))
}

/// Parse the module index printed by `pactl load-module`
pub fn parse_module_index(output: &str) -> Result<ModuleHandle, GatewayError> {
    let trimmed = output.trim();
    trimmed
        .parse::<u32>()
        .map(ModuleHandle)
        .map_err(|_| parse_error("load-module", format!("not a module index: {:?}", trimmed)))
}

/// Parse `pactl get-default-source`
pub fn parse_default_source(output: &str) -> Result<String, GatewayError> {
    let trimmed = output.trim();
    if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
        return Err(parse_error("get-default-source", format!("{:?}", trimmed)));
    }
    Ok(trimmed.to_string())
}

/// Whether a module argument string sets exactly our tag as sink input property
fn carries_tag(args: &str) -> bool {
    args.split_whitespace()
        .filter_map(|arg| arg.strip_prefix("sink_input_properties="))
        .any(|props| props.trim_matches(|c| c == '"' || c == '\'') == LOOPBACK_TAG)
}

/// Find loopback modules carrying our tag in `pactl list short modules`.
///
/// Lines look like `<index>\t<module name>\t<arguments>`. Lines that do not
/// have that shape are skipped.
pub fn parse_tagged_loopbacks(output: &str) -> Vec<ModuleHandle> {
    let mut handles = Vec::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let mut columns = line.splitn(3, '\t');
        let (Some(index), Some(name)) = (columns.next(), columns.next()) else {
            warn!("Skipping unparseable module line {:?}", line);
            continue;
        };
        let args = columns.next().unwrap_or("");

        if name.trim() != "module-loopback" || !carries_tag(args) {
            continue;
        }
        match index.trim().parse::<u32>() {
            Ok(index) => handles.push(ModuleHandle(index)),
            Err(_) => warn!("Skipping module line with bad index {:?}", line),
        }
    }
    handles
}
