//! Remote-execution output filtering.
//!
//! Provisioner ssh output arrives polluted with agent log lines and ssh
//! host-key warnings. [`filter_noise`] strips the known noise families
//! line-wise, byte-for-byte preserving everything it keeps.

use std::sync::LazyLock;

use regex::bytes::Regex;

static TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}").expect("timestamp pattern"));

static SSH_WARNING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Warning: Permanently added").expect("ssh warning pattern"));

static DEPRECATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("DeprecationWarning").expect("deprecation pattern"));

/// Strip provisioner noise from command output.
///
/// Drops, in one pass over the lines:
/// - lines starting with a `YYYY-MM-DD HH:MM:SS` timestamp (agent logs),
/// - lines starting with `Warning: Permanently added` (ssh host keys),
/// - lines containing `DeprecationWarning` plus the single line after
///   them (the quoted source line).
///
/// Kept lines keep their exact bytes, including line endings, so the
/// function is idempotent.
pub fn filter_noise(output: &[u8]) -> Vec<u8> {
    let mut kept = Vec::with_capacity(output.len());
    let mut skip_next = false;
    for line in output.split_inclusive(|&b| b == b'\n') {
        if skip_next {
            skip_next = false;
            continue;
        }
        if TIMESTAMP.is_match(line) || SSH_WARNING.is_match(line) {
            continue;
        }
        if DEPRECATION.is_match(line) {
            skip_next = true;
            continue;
        }
        kept.extend_from_slice(line);
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOISY: &[u8] = b"\
2012-04-11 11:56:04,376 INFO connecting to environment\n\
Warning: Permanently added '10.10.10.163' (RSA) to the list of known hosts.\n\
/usr/lib/python2.7/popen2.py:29: DeprecationWarning: module is deprecated\n\
  import popen2\n\
Creating tables ...\n\
Installed 0 object(s) from 0 fixture(s)\n";

    #[test]
    fn strips_all_three_noise_families() {
        let filtered = filter_noise(NOISY);
        assert_eq!(
            filtered,
            b"Creating tables ...\nInstalled 0 object(s) from 0 fixture(s)\n"
        );
    }

    #[test]
    fn is_idempotent() {
        let once = filter_noise(NOISY);
        let twice = filter_noise(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn deprecation_on_last_line_drops_only_itself() {
        let out = filter_noise(b"kept\nsomething DeprecationWarning here\n");
        assert_eq!(out, b"kept\n");
    }

    #[test]
    fn consecutive_deprecation_lines() {
        // The second DeprecationWarning line is consumed as the "line
        // after" the first, so the third line survives.
        let out = filter_noise(b"a DeprecationWarning\nb DeprecationWarning\nkept\n");
        assert_eq!(out, b"kept\n");
    }

    #[test]
    fn empty_and_clean_output_pass_through() {
        assert_eq!(filter_noise(b""), b"");
        assert_eq!(filter_noise(b"all good\n"), b"all good\n");
        assert_eq!(filter_noise(b"no trailing newline"), b"no trailing newline");
    }

    #[test]
    fn timestamp_must_anchor_the_line() {
        let line = b"at 2012-04-11 11:56:04 things happened\n";
        assert_eq!(filter_noise(line), line);
    }

    #[test]
    fn non_utf8_bytes_survive() {
        let line = b"binary \xff\xfe output\n";
        assert_eq!(filter_noise(line), line);
    }
}
