//! Privacy masking of SIP user parts.
//!
//! `alice@example.com` becomes `a***e@example.com`. Only the user part is
//! touched; everything from the first `@` on is kept byte for byte.

const MASK: char = '*';

/// Mask the user part of an address.
///
/// The first and last characters of the user part are kept and the interior
/// is replaced with `*`. User parts of one or two characters keep only their
/// first character. A value without `@` is treated as a bare user part.
pub fn mask_user(value: &str) -> String {
    match value.split_once('@') {
        Some((user, domain)) => format!("{}@{}", mask_user_part(user), domain),
        None => mask_user_part(value),
    }
}

fn mask_user_part(user: &str) -> String {
    let chars: Vec<char> = user.chars().collect();
    match chars.len() {
        0 => String::new(),
        1 | 2 => {
            let mut masked = String::with_capacity(user.len());
            masked.push(chars[0]);
            masked.extend(std::iter::repeat(MASK).take(chars.len() - 1));
            masked
        }
        n => {
            let mut masked = String::with_capacity(user.len());
            masked.push(chars[0]);
            masked.extend(std::iter::repeat(MASK).take(n - 2));
            masked.push(chars[n - 1]);
            masked
        }
    }
}

/// Mask every user part inside a full From/To header.
///
/// A user part is the text between a `:` and the next `@`, provided no `>`
/// comes first: `"Alice" <sip:alice@example.com>;tag=1` becomes
/// `"Alice" <sip:a***e@example.com>;tag=1`. Display names are left alone.
pub fn mask_header_users(header: &str) -> String {
    let mut out = String::with_capacity(header.len());
    let mut rest = header;

    while let Some(colon) = rest.find(':') {
        let (head, tail) = rest.split_at(colon + 1);
        out.push_str(head);

        match tail.find(['@', '>']) {
            Some(end) if end > 0 && tail[end..].starts_with('@') => {
                out.push_str(&mask_user_part(&tail[..end]));
                out.push('@');
                rest = &tail[end + 1..];
            }
            _ => rest = tail,
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_user_keeps_domain() {
        assert_eq!(mask_user("alice@example.com"), "a***e@example.com");
        assert_eq!(mask_user("bob@b.example"), "b*b@b.example");
    }

    #[test]
    fn test_mask_short_users() {
        assert_eq!(mask_user("al@x"), "a*@x");
        assert_eq!(mask_user("a@x"), "a@x");
        assert_eq!(mask_user("@x"), "@x");
    }

    #[test]
    fn test_mask_bare_user() {
        assert_eq!(mask_user("1001"), "1**1");
        assert_eq!(mask_user("alice"), "a***e");
        assert_eq!(mask_user(""), "");
    }

    #[test]
    fn test_mask_is_deterministic() {
        let once = mask_user("carol@voip.example.net");
        assert_eq!(once, mask_user("carol@voip.example.net"));
        assert!(once.ends_with("@voip.example.net"));
    }

    #[test]
    fn test_mask_multibyte_user() {
        assert_eq!(mask_user("jösé@x"), "j**é@x");
    }

    #[test]
    fn test_mask_header() {
        assert_eq!(
            mask_header_users("\"Alice\" <sip:alice@example.com>;tag=abc"),
            "\"Alice\" <sip:a***e@example.com>;tag=abc"
        );
        assert_eq!(
            mask_header_users("<sip:1001@10.0.0.1:5060>"),
            "<sip:1**1@10.0.0.1:5060>"
        );
    }

    #[test]
    fn test_mask_header_without_user_is_unchanged() {
        assert_eq!(
            mask_header_users("<sip:example.com>;tag=1"),
            "<sip:example.com>;tag=1"
        );
        assert_eq!(mask_header_users("sip:@host"), "sip:@host");
        assert_eq!(mask_header_users(""), "");
    }
}
