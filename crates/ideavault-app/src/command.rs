//! Terminal command parsing.
//!
//! One command per input line. Parsing is pure so the shell can be tested
//! without a terminal.

use thiserror::Error;

/// A field of the idea being edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum DraftField {
    Title,
    #[strum(serialize = "desc", serialize = "description")]
    Description,
    Tags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Login { email: String, password: String },
    Register { email: String, password: String, password_confirm: String },
    Logout,
    Whoami,
    List,
    Refresh,
    Add { title: String, description: String, tags: String },
    /// Put the last submitted draft back and send it again.
    Retry,
    /// Open the idea at a 1-based list position for editing.
    Edit(usize),
    Set { field: DraftField, text: String },
    Save,
    Cancel,
    /// Delete the idea at a 1-based position; asks first unless `confirmed`.
    Delete { position: usize, confirmed: bool },
    /// Answer to the last confirmation question.
    Confirm(bool),
    Help,
    Quit,
    /// Blank line.
    Nothing,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unknown command: {0} (try 'help')")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("not a list position: {0}")]
    Position(String),
}

pub const HELP: &str = "\
Commands:
  login <email> <password>
  register <email> <password> <password-confirm>
  logout
  whoami
  list
  refresh
  add <title> | <description> | <tags, comma separated>
  retry                      resend the last submitted idea
  edit <n>
  set title|desc|tags <text>
  save
  cancel
  delete <n> [--yes]         asks for confirmation unless --yes
  yes | no                   answer a confirmation
  help
  quit";

/// Parse one line of input.
pub fn parse(line: &str) -> Result<Command, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::Nothing);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "login" => {
            let [email, password] = words::<2>(rest).ok_or(ParseError::Usage("login <email> <password>"))?;
            Command::Login { email, password }
        }
        "register" => {
            let [email, password, password_confirm] = words::<3>(rest)
                .ok_or(ParseError::Usage("register <email> <password> <password-confirm>"))?;
            Command::Register { email, password, password_confirm }
        }
        "logout" => Command::Logout,
        "whoami" => Command::Whoami,
        "list" | "ls" => Command::List,
        "refresh" => Command::Refresh,
        "add" => parse_add(rest)?,
        "retry" => Command::Retry,
        "edit" => Command::Edit(position(rest)?),
        "set" => {
            let (field, text) = rest
                .split_once(char::is_whitespace)
                .map(|(field, text)| (field, text.trim()))
                .unwrap_or((rest, ""));
            let field = field
                .to_ascii_lowercase()
                .parse()
                .map_err(|_| ParseError::Usage("set title|desc|tags <text>"))?;
            Command::Set { field, text: text.to_string() }
        }
        "save" => Command::Save,
        "cancel" => Command::Cancel,
        "delete" | "rm" => parse_delete(rest)?,
        "yes" | "y" => Command::Confirm(true),
        "no" | "n" => Command::Confirm(false),
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(command)
}

/// Exactly `N` whitespace-separated words.
fn words<const N: usize>(rest: &str) -> Option<[String; N]> {
    let words: Vec<String> = rest.split_whitespace().map(str::to_string).collect();
    words.try_into().ok()
}

/// `title | description | tags`. Missing trailing parts are left empty so the
/// form can report them.
fn parse_add(rest: &str) -> Result<Command, ParseError> {
    if rest.is_empty() {
        return Err(ParseError::Usage("add <title> | <description> | <tags>"));
    }
    let mut parts = rest.splitn(3, '|').map(|part| part.trim().to_string());
    Ok(Command::Add {
        title: parts.next().unwrap_or_default(),
        description: parts.next().unwrap_or_default(),
        tags: parts.next().unwrap_or_default(),
    })
}

/// `<n>` with an optional `--yes`/`-y` on either side.
fn parse_delete(rest: &str) -> Result<Command, ParseError> {
    let mut confirmed = false;
    let mut positions = Vec::new();
    for word in rest.split_whitespace() {
        match word {
            "--yes" | "-y" => confirmed = true,
            other => positions.push(other),
        }
    }
    match positions.as_slice() {
        [n] => Ok(Command::Delete { position: position(n)?, confirmed }),
        _ => Err(ParseError::Usage("delete <n> [--yes]")),
    }
}

fn position(rest: &str) -> Result<usize, ParseError> {
    match rest.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ParseError::Position(rest.to_string())),
    }
}
