//! Command validation ahead of spawning.

use devserve_common::{ServerError, ServerResult};

/// Validate a server command vector before it reaches `spawn`.
///
/// Rejects empty argv and argv entries containing NUL bytes (which the
/// OS would refuse anyway, with a much less helpful message).
pub fn validate_command(name: &str, argv: &[String]) -> ServerResult<()> {
    if argv.is_empty() || argv[0].trim().is_empty() {
        return Err(ServerError::spawn_failed(name, "empty command"));
    }

    for arg in argv {
        if arg.contains('\0') {
            return Err(ServerError::spawn_failed(
                name,
                "command contains a NUL byte",
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_command_rejected() {
        assert!(validate_command("x", &[]).is_err());
        assert!(validate_command("x", &["  ".to_string()]).is_err());
    }

    #[test]
    fn test_nul_byte_rejected() {
        assert!(validate_command("x", &["ls".to_string(), "a\0b".to_string()]).is_err());
    }

    #[test]
    fn test_normal_command_accepted() {
        let argv = vec!["cargo".to_string(), "run".to_string()];
        assert!(validate_command("x", &argv).is_ok());
    }
}
