//! RESP command serializer.
//!
//! Encodes command arguments into the RESP bulk string array wire format:
//! `*<N>\r\n$<len>\r\narg1\r\n$<len>\r\narg2\r\n…`

use itoa::Buffer;

/// Append one command (an array of bulk strings) to `buf`.
fn write_command<'a>(buf: &mut Vec<u8>, argc: usize, args: impl Iterator<Item = &'a [u8]>) {
    let mut itoa_buf = Buffer::new();

    buf.push(b'*');
    buf.extend_from_slice(itoa_buf.format(argc).as_bytes());
    buf.extend_from_slice(b"\r\n");

    for arg in args {
        buf.push(b'$');
        buf.extend_from_slice(itoa_buf.format(arg.len()).as_bytes());
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(arg);
        buf.extend_from_slice(b"\r\n");
    }
}

/// Bytes needed for a command whose arguments total `payload` bytes.
#[inline]
fn capacity_for(argc: usize, payload: usize) -> usize {
    // '*' + digits + \r\n, then '$' + digits + \r\n + data + \r\n per arg
    13 + argc * 15 + payload
}

/// Encode a command from string arguments (convenience wrapper).
pub fn encode_command_str(args: &[&str]) -> Vec<u8> {
    let payload = args.iter().map(|a| a.len()).sum();
    let mut buf = Vec::with_capacity(capacity_for(args.len(), payload));
    write_command(&mut buf, args.len(), args.iter().map(|s| s.as_bytes()));
    buf
}

/// Encode a command name followed by a variable list of arguments,
/// e.g. `SUBSCRIBE` plus the channel names.
pub fn encode_named_command(name: &str, args: &[&str]) -> Vec<u8> {
    let payload = name.len() + args.iter().map(|a| a.len()).sum::<usize>();
    let mut buf = Vec::with_capacity(capacity_for(args.len() + 1, payload));
    let all = std::iter::once(name.as_bytes()).chain(args.iter().map(|s| s.as_bytes()));
    write_command(&mut buf, args.len() + 1, all);
    buf
}

/// Encode multiple commands into a single buffer for pipelined writes.
pub fn encode_pipeline(commands: &[Vec<String>]) -> Vec<u8> {
    let cap = commands
        .iter()
        .map(|c| capacity_for(c.len(), c.iter().map(|a| a.len()).sum()))
        .sum();
    let mut buf = Vec::with_capacity(cap);
    for cmd_args in commands {
        write_command(&mut buf, cmd_args.len(), cmd_args.iter().map(|s| s.as_bytes()));
    }
    buf
}

// ── Tests ──────────────────────────────────────────────────────────
