use crate::errors::ProviderError;

/// One line of shell input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Subscribe { name: String },
    Unsubscribe { name: String },
    Insert { table: String, json: String },
    Update { table: String, json: String },
    Delete { table: String, id: String },
    DropList { name: String },
    Lists,
    Sessions,
    Help,
    Quit,
}

pub const HELP: &str = "Commands:
  sub <name>                 subscribe to a search list
  unsub <name>               drop one subscription
  insert <table> <json>      insert a record
  update <table> <json>      replace a record with the same key
  delete <table> <id>        delete a record
  drop-list <name>           delete a published list from outside
  lists                      print published lists
  sessions                   print live searches
  quit";

impl Command {
    /// Parses a shell line. Blank lines and `#` comments yield `None`.
    ///
    /// # Errors
    /// Returns [`ProviderError::Command`] for unknown commands or missing arguments.
    pub fn parse_line(line: &str) -> Result<Option<Self>, ProviderError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((h, r)) => (h, r.trim()),
            None => (line, ""),
        };
        let cmd = match head.to_ascii_lowercase().as_str() {
            "sub" | "subscribe" => Self::Subscribe { name: required(head, rest)? },
            "unsub" | "unsubscribe" => Self::Unsubscribe { name: required(head, rest)? },
            "insert" => {
                let (table, json) = two(head, rest)?;
                Self::Insert { table, json }
            }
            "update" => {
                let (table, json) = two(head, rest)?;
                Self::Update { table, json }
            }
            "delete" => {
                let (table, id) = two(head, rest)?;
                Self::Delete { table, id }
            }
            "drop-list" => Self::DropList { name: required(head, rest)? },
            "lists" => Self::Lists,
            "sessions" => Self::Sessions,
            "help" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(ProviderError::Command(format!("unrecognized: {other}"))),
        };
        Ok(Some(cmd))
    }
}

fn required(head: &str, rest: &str) -> Result<String, ProviderError> {
    if rest.is_empty() {
        return Err(ProviderError::Command(format!("{head}: missing argument")));
    }
    Ok(rest.to_string())
}

/// `<word> <remainder>`; the remainder may contain spaces (JSON bodies).
fn two(head: &str, rest: &str) -> Result<(String, String), ProviderError> {
    match rest.split_once(char::is_whitespace) {
        Some((a, b)) if !b.trim().is_empty() => Ok((a.to_string(), b.trim().to_string())),
        _ => Err(ProviderError::Command(format!("{head}: expected two arguments"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_bodies_keep_their_spaces() {
        let cmd = Command::parse_line(r#"insert books {"ds_id": "x", "title": "A B"}"#).unwrap();
        assert_eq!(
            cmd,
            Some(Command::Insert {
                table: "books".into(),
                json: r#"{"ds_id": "x", "title": "A B"}"#.into()
            })
        );
    }

    #[test]
    fn blank_and_comment_lines_are_skipped() {
        assert_eq!(Command::parse_line("   ").unwrap(), None);
        assert_eq!(Command::parse_line("# note").unwrap(), None);
    }

    #[test]
    fn missing_arguments_are_rejected() {
        assert!(Command::parse_line("sub").is_err());
        assert!(Command::parse_line("delete books").is_err());
        assert!(matches!(
            Command::parse_line("frobnicate"),
            Err(ProviderError::Command(m)) if m == "unrecognized: frobnicate"
        ));
    }
}
