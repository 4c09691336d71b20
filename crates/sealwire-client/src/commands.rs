//! Parsing of lines typed into the TUI.
//!
//! A line is chat text unless it starts with `/` (or is a quit alias, some
//! of which come from muscle memory rather than any slash convention).

/// Inputs that end the session cleanly.
pub const QUIT_COMMANDS: &[&str] = &["/quit", "/q", "/exit", ":wq", ":q", ":wqa"];

/// One parsed TUI line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain chat text to encrypt and send.
    Chat(String),
    /// `/join <name>`
    Join(String),
    /// `/leave <name>`
    Leave(String),
    /// `/create <name>`
    Create(String),
    /// `/delete <name>`
    Delete(String),
    /// A quit alias; drop the socket and exit cleanly.
    Quit,
    /// Unrecognized or malformed slash input. The payload is the message to
    /// show locally in red; no frame is emitted.
    Invalid(String),
    /// Whitespace only; ignored.
    Empty,
}

/// Parse one line from the TUI.
pub fn parse_line(line: &str) -> Command {
    let text = line.trim();
    if text.is_empty() {
        return Command::Empty;
    }

    if QUIT_COMMANDS.contains(&text) {
        return Command::Quit;
    }

    if !text.starts_with('/') {
        return Command::Chat(text.to_string());
    }

    let mut fields = text.split_whitespace();
    let command = fields.next().unwrap_or_default();
    let args: Vec<&str> = fields.collect();

    let room_arg = |make: fn(String) -> Command| {
        if args.len() == 1 {
            make(args[0].to_string())
        } else {
            Command::Invalid(format!("Usage: {command} <room-name>"))
        }
    };

    match command {
        "/join" => room_arg(Command::Join),
        "/leave" => room_arg(Command::Leave),
        "/create" => room_arg(Command::Create),
        "/delete" => room_arg(Command::Delete),
        other => Command::Invalid(format!(
            "Command \"{other}\" not recognised. Available commands: /join, /leave, /create, /delete"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_text_passes_through_trimmed() {
        assert_eq!(parse_line("  hello world  "), Command::Chat("hello world".to_string()));
    }

    #[test]
    fn empty_lines_are_ignored() {
        assert_eq!(parse_line(""), Command::Empty);
        assert_eq!(parse_line("   \t "), Command::Empty);
    }

    #[test]
    fn room_commands_take_exactly_one_argument() {
        assert_eq!(parse_line("/join rust"), Command::Join("rust".to_string()));
        assert_eq!(parse_line("/leave rust"), Command::Leave("rust".to_string()));
        assert_eq!(parse_line("/create priv"), Command::Create("priv".to_string()));
        assert_eq!(parse_line("/delete priv"), Command::Delete("priv".to_string()));

        assert!(matches!(parse_line("/join"), Command::Invalid(_)));
        assert!(matches!(parse_line("/join two words"), Command::Invalid(_)));
    }

    #[test]
    fn every_quit_alias_is_recognized() {
        for alias in QUIT_COMMANDS {
            assert_eq!(parse_line(alias), Command::Quit, "alias {alias}");
        }
    }

    #[test]
    fn unknown_slash_input_is_local_only() {
        let Command::Invalid(text) = parse_line("/dance") else {
            panic!("expected Invalid");
        };
        assert!(text.contains("/dance"));
        assert!(text.contains("/join"));
    }

    #[test]
    fn slash_mid_sentence_is_chat() {
        assert_eq!(
            parse_line("10/10 would chat again"),
            Command::Chat("10/10 would chat again".to_string())
        );
    }
}
