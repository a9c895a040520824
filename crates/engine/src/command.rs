//! In-chat control commands.
//!
//! Commands are recognized case-insensitively on the trimmed message text.
//! Anything that is not a command is ordinary chat.

/// A recognized control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Install a system prompt override; the text is trimmed when stored.
    SetPrompt(String),
    ShowPrompt,
    ResetPrompt,
    ClearHistory,
}

const SET_PREFIXES: [&str; 2] = ["/setprompt ", "/sp "];
const SYSTEM_SHORTCUT: &str = "!system:";
const SHOW: [&str; 2] = ["/showprompt", "/sp?"];
const RESET: [&str; 2] = ["/resetprompt", "/rsp"];
const CLEAR: [&str; 3] = ["/clear", "/clearhistory", "/ch"];

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &text[prefix.len()..])
}

impl Command {
    /// Parse `text` as a command, or `None` for ordinary chat.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();

        if let Some(rest) = SET_PREFIXES
            .iter()
            .find_map(|p| strip_prefix_ignore_case(text, p))
        {
            return Some(Command::SetPrompt(rest.to_string()));
        }
        if let Some(rest) = strip_prefix_ignore_case(text, SYSTEM_SHORTCUT) {
            return Some(Command::SetPrompt(rest.to_string()));
        }

        let is = |names: &[&str]| names.iter().any(|n| text.eq_ignore_ascii_case(n));
        if is(&SHOW[..]) {
            Some(Command::ShowPrompt)
        } else if is(&RESET[..]) {
            Some(Command::ResetPrompt)
        } else if is(&CLEAR[..]) {
            Some(Command::ClearHistory)
        } else {
            None
        }
    }
}
