//! Interactive console and the `oneliner` command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crate::engine::Engine;

const PROMPT: &str = "> ";
const HISTORY_FILE: &str = ".cobe_history";

/// Non-ASCII letters a one-liner may keep.
const EXTRA_CHARS: &str = "áéíóúÁÉÍÓÚñÑlçÇ";

/// `~/.cobe_history`, when a home directory is known.
pub fn history_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(HISTORY_FILE))
}

/// Learn `line`, then answer it.
pub fn respond<E: Engine>(engine: &mut E, line: &str) -> Result<String> {
    engine.train(line).context("training failed")?;
    let reply = engine.reply(line).context("reply failed")?;
    Ok(reply)
}

/// Read-train-reply loop. Returns on end of input.
pub fn run<E: Engine>(engine: &mut E, history: Option<PathBuf>) -> Result<()> {
    let mut editor = DefaultEditor::new().context("can't start line editor")?;
    if let Some(path) = &history
        && let Err(e) = editor.load_history(path)
    {
        tracing::debug!(path = %path.display(), error = %e, "No history loaded");
    }

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = editor.add_history_entry(line.as_str());
                }
                match respond(engine, &line) {
                    Ok(reply) => println!("{reply}"),
                    Err(e) => tracing::error!(error = %format!("{e:#}"), "Engine failed"),
                }
            }
            // Ctrl-C clears the line, like a shell.
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => {
                println!();
                break;
            }
            Err(e) => return Err(e).context("can't read from terminal"),
        }
    }

    if let Some(path) = &history
        && let Err(e) = editor.save_history(path)
    {
        tracing::warn!(path = %path.display(), error = %e, "Can't save history");
    }
    Ok(())
}

/// A reply to the empty seed, cleaned up for use as a standalone line.
pub fn oneliner<E: Engine>(engine: &mut E) -> Result<String> {
    let reply = engine.reply("").context("reply failed")?;
    Ok(clean_oneliner(&reply))
}

/// Keep ASCII letters, digits, punctuation, spaces and a few accented
/// letters; end a sentence that stops on a lowercase letter with `.`.
pub fn clean_oneliner(reply: &str) -> String {
    let mut line: String = reply
        .chars()
        .filter(|&c| c.is_ascii_alphanumeric() || c.is_ascii_punctuation() || c == ' ' || EXTRA_CHARS.contains(c))
        .collect();
    if line.ends_with(|c: char| c.is_ascii_lowercase()) {
        line.push('.');
    }
    line
}
