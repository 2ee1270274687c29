use std::io;

/// Classifies an I/O error as "the listener/peer went away" (expected, log quietly)
/// versus a real failure worth a `warn!`.
///
/// `std::net`'s `io::Error` surfaces a closed-listener condition with `ErrorKind::NotConnected`
/// on some platforms and as a plain `Other` carrying the message "use of closed network
/// connection" on others (no stable `ErrorKind` variant exists for it), so both are checked.
pub fn is_use_of_closed_connection(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::NotConnected {
        return true;
    }
    let msg = err.to_string();
    msg.contains("use of closed network connection") || msg.contains("Bad file descriptor")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_not_connected() {
        let err = io::Error::from(io::ErrorKind::NotConnected);
        assert!(is_use_of_closed_connection(&err));
    }

    #[test]
    fn classifies_message_text() {
        let err = io::Error::other("use of closed network connection");
        assert!(is_use_of_closed_connection(&err));
    }

    #[test]
    fn does_not_classify_other_errors() {
        let err = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(!is_use_of_closed_connection(&err));
    }
}
