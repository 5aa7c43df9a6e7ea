// Line handling over raw TCP.
//
// The wire format is newline-terminated text: a chat line is whatever bytes
// arrive before the `\n` / `\r\n` in a single read. There is no length
// prefix and no reassembly — a message split across two reads is two
// messages. That limitation is part of the protocol contract, not something
// either endpoint papers over.
//
// Both helpers are pure string functions so they can be exercised without a
// socket.

/// Strip trailing line terminators from a received chunk.
///
/// Only trailing `\r` / `\n` are removed; interior newlines are preserved
/// (a chunk that happens to carry two lines is still one chat message).
pub fn trim_line(chunk: &str) -> &str {
    chunk.trim_end_matches(['\r', '\n'])
}

/// Format a chat line as delivered to broadcast recipients.
pub fn format_broadcast(sender: &str, text: &str) -> String {
    format!("{sender}: {text}\n")
}
