//! Interactive terminal front-end over [`ChatService`].
//!
//! The delta loop pulls with [`crate::service::DeltaStream::blocking_next`],
//! so the whole loop must run on a plain thread (or a blocking pool thread),
//! never on an async executor thread.

use std::io::{self, BufRead, Write};

use crate::error::ChatError;
use crate::history::ConversationHistory;
use crate::log_info;
use crate::service::ChatService;

/// Read-stream-print loop on stdin/stdout. `:clear` resets the conversation,
/// `:quit` (or EOF) exits.
pub fn run(service: &ChatService, history: &mut ConversationHistory) -> Result<(), ChatError> {
    let stdin = io::stdin();
    run_with(service, history, stdin.lock(), io::stdout())
}

pub fn run_with(
    service: &ChatService,
    history: &mut ConversationHistory,
    input: impl BufRead,
    mut output: impl Write,
) -> Result<(), ChatError> {
    let mut lines = input.lines();

    loop {
        write!(output, "you> ")?;
        output.flush()?;

        let Some(line) = lines.next() else {
            break;
        };
        let query = line?;
        let query = query.trim();

        match query {
            "" => continue,
            ":quit" => break,
            ":clear" => {
                *history = ConversationHistory::new();
                writeln!(output, "(history cleared)")?;
                continue;
            }
            _ => {}
        }

        let mut stream = service.stream_chat(query, history)?;
        let mut reply = String::new();
        while let Some(delta) = stream.blocking_next() {
            match delta {
                Ok(delta) => {
                    write!(output, "{}", delta.text)?;
                    output.flush()?;
                    reply.push_str(&delta.text);
                }
                Err(e) => {
                    writeln!(output, "\n(error: {e})")?;
                    reply.clear();
                    break;
                }
            }
        }
        writeln!(output)?;

        if !reply.is_empty() {
            history.push_user(query);
            history.push_assistant(&reply);
        }
    }

    log_info!("interactive session ended after {} turns", history.len());
    Ok(())
}
