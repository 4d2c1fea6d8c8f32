//! SASL `EXTERNAL` handshake, the only authentication mechanism a session bus on unix needs.

use std::io::{Read, Write};

use crate::{Error, Result};

/// Longest line we accept from the server during the handshake.
const MAX_LINE_LEN: usize = 16 * 1024;

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Read one `\r\n`-terminated line, byte by byte so nothing after the line is consumed.
fn read_line(stream: &mut impl Read) -> Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    while !line.ends_with(b"\r\n") {
        if line.len() > MAX_LINE_LEN {
            return Err(Error::Auth);
        }
        match stream.read(&mut byte) {
            Ok(0) => return Err(Error::Disconnected),
            Ok(_) => line.push(byte[0]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    line.truncate(line.len() - 2);
    String::from_utf8(line).map_err(|_| Error::Auth)
}

/// Authenticate as `uid` on a freshly connected, blocking stream. Returns the server GUID.
pub fn authenticate(stream: &mut (impl Read + Write), uid: u32) -> Result<String> {
    let command = format!("\0AUTH EXTERNAL {}\r\n", hex_encode(uid.to_string().as_bytes()));
    stream.write_all(command.as_bytes())?;

    let reply = read_line(&mut *stream)?;
    let guid = match reply.split_once(' ') {
        Some(("OK", guid)) => guid.to_string(),
        _ => {
            log::error!("bus rejected EXTERNAL authentication: {}", reply);
            return Err(Error::Auth);
        }
    };

    stream.write_all(b"BEGIN\r\n")?;
    Ok(guid)
}
