use crate::backend::memory::{MemoryDatabase, MemoryLists};
use crate::config::ProviderConfig;
use crate::errors::ProviderError;
use crate::provider::{Provider, ProviderStatus};
use crate::query;
use crate::session::SessionState;
use serde_json::Value;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;

use super::command::{Command, HELP};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputMode {
    Human,
    Json,
}

/// What the shell commands act on.
pub struct Shell {
    pub database: Arc<MemoryDatabase>,
    pub lists: MemoryLists,
    pub status: ProviderStatus,
    pub mode: OutputMode,
}

fn state_label(state: &SessionState) -> String {
    match state {
        SessionState::Bootstrapping => "bootstrapping".into(),
        SessionState::Ready => "ready".into(),
        SessionState::Failed(e) => format!("failed ({e})"),
        SessionState::Closed => "closed".into(),
    }
}

/// Executes one command against the shell state. Returns `false` once the shell should exit.
///
/// # Errors
/// Invalid JSON and rejected database writes are returned to the caller.
pub fn run(shell: &Shell, cmd: Command, out: &mut dyn Write) -> Result<bool, ProviderError> {
    match cmd {
        Command::Subscribe { name } => {
            shell.lists.subscribe(&name);
            writeln!(out, "subscribed {name}")?;
        }
        Command::Unsubscribe { name } => {
            shell.lists.unsubscribe(&name);
            writeln!(out, "unsubscribed {name}")?;
        }
        Command::Insert { table, json } => {
            let record: Value = serde_json::from_str(&json)?;
            let id = shell.database.insert(&table, record)?;
            writeln!(out, "inserted {table}/{id}")?;
        }
        Command::Update { table, json } => {
            let record: Value = serde_json::from_str(&json)?;
            let id = shell.database.update(&table, record)?;
            writeln!(out, "updated {table}/{id}")?;
        }
        Command::Delete { table, id } => {
            if shell.database.delete(&table, &id) {
                writeln!(out, "deleted {table}/{id}")?;
            } else {
                writeln!(out, "not found {table}/{id}")?;
            }
        }
        Command::DropList { name } => {
            if shell.lists.delete_list(&name) {
                writeln!(out, "dropped {name}")?;
            } else {
                writeln!(out, "no list {name}")?;
            }
        }
        Command::Lists => {
            for name in shell.lists.names() {
                let entries = shell.lists.entries(&name).unwrap_or_default();
                match shell.mode {
                    OutputMode::Json => {
                        let json = serde_json::json!({"list": name, "entries": entries});
                        writeln!(out, "{json}")?;
                    }
                    OutputMode::Human => writeln!(out, "{name}: {}", entries.join(", "))?,
                }
            }
        }
        Command::Sessions => {
            for s in shell.status.sessions() {
                let state = state_label(&s.state());
                match shell.mode {
                    OutputMode::Json => {
                        let json = serde_json::json!({
                            "name": s.name,
                            "id": s.session_id.to_string(),
                            "subscribers": s.subscribers,
                            "state": state,
                        });
                        writeln!(out, "{json}")?;
                    }
                    OutputMode::Human => writeln!(
                        out,
                        "{} subscribers={} state={state} id={}",
                        s.name, s.subscribers, s.session_id
                    )?,
                }
            }
        }
        Command::Help => writeln!(out, "{HELP}")?,
        Command::Quit => return Ok(false),
    }
    Ok(true)
}

/// Runs a provider over the given in-memory backends and feeds it shell commands from
/// `input` until `quit` or end of input. All sessions are closed before returning.
///
/// # Errors
/// Returns the provider's error if it stopped abnormally, or an I/O error on `input`/`out`.
pub async fn run_shell<R>(
    config: ProviderConfig,
    database: Arc<MemoryDatabase>,
    lists: MemoryLists,
    mode: OutputMode,
    input: R,
    out: &mut dyn Write,
) -> Result<(), ProviderError>
where
    R: AsyncBufRead + Unpin,
{
    let provider = Provider::new(config, database.clone(), Arc::new(lists.clone()));
    let status = provider.status();
    let shutdown = CancellationToken::new();
    let task = provider.spawn(shutdown.clone()).await?;
    let shell = Shell { database, lists, status, mode };

    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if task.is_finished() {
            writeln!(out, "provider stopped")?;
            break;
        }
        let cmd = match Command::parse_line(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(e) => {
                writeln!(out, "{e}")?;
                continue;
            }
        };
        match run(&shell, cmd, out) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => writeln!(out, "error: {e}")?,
        }
        out.flush()?;
    }

    shutdown.cancel();
    task.await.map_err(|e| ProviderError::Config(format!("provider task failed: {e}")))?
}

/// Renders the descriptor and plan a subscription name would produce.
///
/// # Errors
/// Returns the parse error for invalid names.
pub fn describe(name: &str, primary_key: &str) -> Result<String, ProviderError> {
    let descriptor = query::parse(name)?;
    let plan = query::translate(&descriptor, primary_key);
    Ok(format!("descriptor: {descriptor:#?}\nplan: {plan}"))
}
