//! Terminal command parsing.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join { room: String, name: String },
    Start { force: bool },
    /// Zero-based option index
    Answer(usize),
    Next,
    View,
    Help,
    Quit,
}

/// Parse one input line. `Ok(None)` for a blank line.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let command = match head.to_ascii_lowercase().as_str() {
        "join" => match rest.as_slice() {
            [room, name @ ..] if !name.is_empty() => Command::Join {
                room: room.to_string(),
                name: name.join(" "),
            },
            _ => return Err("usage: join <room> <name>".to_string()),
        },
        "start" => Command::Start { force: false },
        "solo" => Command::Start { force: true },
        "answer" | "a" => match rest.as_slice() {
            [n] => Command::Answer(parse_option(n)?),
            _ => return Err("usage: answer <1-4>".to_string()),
        },
        "next" | "n" => Command::Next,
        "view" | "v" => Command::View,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other if rest.is_empty() && other.chars().all(|c| c.is_ascii_digit()) => {
            Command::Answer(parse_option(other)?)
        }
        other => return Err(format!("unknown command '{other}', type 'help'")),
    };
    Ok(Some(command))
}

fn parse_option(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n - 1),
        _ => Err(format!("'{raw}' is not an option number")),
    }
}
