// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::Error;

/// Signal names accepted from operators, with their numbers. The optional
/// `SIG` prefix is stripped before lookup.
const SIG_TABLE: [(&str, u16); 14] = [
    ("HUP", 1),
    ("INT", 2),
    ("QUIT", 3),
    ("ABRT", 6),
    ("KILL", 9),
    ("ALRM", 14),
    ("TERM", 15),
    ("USR1", 10),
    ("USR2", 12),
    ("CONT", 18),
    ("STOP", 19),
    ("TSTP", 20),
    ("TTIN", 21),
    ("TTOU", 22),
];

/// Comma-separated list of all accepted signal names.
pub fn signal_names() -> String {
    SIG_TABLE
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(",")
}

/// Translate a signal name or numeric literal to its number.
pub fn xlate_signal(text: &str) -> Result<u16, Error> {
    if let Ok(num) = text.parse::<u16>() {
        if num != 0 {
            return Ok(num);
        }
    }
    let stripped = if text.len() > 3 && text[..3].eq_ignore_ascii_case("sig") {
        &text[3..]
    } else {
        text
    };
    SIG_TABLE
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(stripped))
        .map(|(_, num)| *num)
        .ok_or_else(|| Error::BadSignal(text.to_owned(), signal_names()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_translate_with_and_without_prefix() {
        assert_eq!(xlate_signal("KILL").unwrap(), 9);
        assert_eq!(xlate_signal("SIGKILL").unwrap(), 9);
        assert_eq!(xlate_signal("sigterm").unwrap(), 15);
        assert_eq!(xlate_signal("Hup").unwrap(), 1);
        assert_eq!(xlate_signal("TTOU").unwrap(), 22);
    }

    #[test]
    fn numeric_literals_pass_through() {
        assert_eq!(xlate_signal("15").unwrap(), 15);
        assert_eq!(xlate_signal("64").unwrap(), 64);
    }

    #[test]
    fn unknown_names_list_the_valid_ones() {
        let err = xlate_signal("SIGFROB").unwrap_err();
        match err {
            Error::BadSignal(name, names) => {
                assert_eq!(name, "SIGFROB");
                assert!(names.contains("HUP"));
                assert!(names.contains("TTOU"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(xlate_signal("0").is_err());
    }
}
